use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::json;
use txt2img_stack_core::logging::{log_error, log_info};
use txt2img_stack_core::{DeploymentContext, ModelInfo, StackConfig, Txt2ImgStack};

use crate::adapters::assembly_store::AssemblyStore;

pub const MANIFEST_KEY: &str = "manifest.json";
pub const ASSEMBLY_SCHEMA_VERSION: &str = "36.0.0";
pub const STACK_ARTIFACT_TYPE: &str = "aws:cloudformation:stack";

const COMPONENT: &str = "synth_handler";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthRequest {
    pub stack_name: String,
    pub model_info: ModelInfo,
    pub context: DeploymentContext,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SynthResponse {
    pub status: String,
    pub stack_name: String,
    pub template_key: String,
    pub manifest_key: String,
    pub resource_count: usize,
    pub instance_count: u32,
    pub endpoint_parameter: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthError {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssemblyManifest {
    pub version: String,
    pub artifacts: BTreeMap<String, ArtifactManifest>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactManifest {
    #[serde(rename = "type")]
    pub artifact_type: String,
    pub environment: String,
    pub properties: ArtifactProperties,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactProperties {
    pub template_file: String,
}

pub fn template_key(stack_name: &str) -> String {
    format!("{stack_name}.template.json")
}

/// Assembles the stack, synthesizes its template and writes the cloud assembly.
pub fn handle_synth(
    request: &SynthRequest,
    store: &dyn AssemblyStore,
) -> Result<SynthResponse, SynthError> {
    let config = StackConfig::from_context(&request.context);
    log_info(
        COMPONENT,
        "synth_started",
        json!({
            "stack": request.stack_name.clone(),
            "context_keys": request.context.keys().collect::<Vec<_>>(),
            "instance_count": config.instance_count,
        }),
    );

    match write_assembly(request, &config, store) {
        Ok(response) => {
            log_info(
                COMPONENT,
                "synth_completed",
                json!({
                    "stack": response.stack_name.clone(),
                    "template_key": response.template_key.clone(),
                    "resource_count": response.resource_count,
                }),
            );
            Ok(response)
        }
        Err(error) => {
            log_error(
                COMPONENT,
                "synth_failed",
                json!({
                    "stack": request.stack_name.clone(),
                    "error": error.message.clone(),
                }),
            );
            Err(error)
        }
    }
}

fn write_assembly(
    request: &SynthRequest,
    config: &StackConfig,
    store: &dyn AssemblyStore,
) -> Result<SynthResponse, SynthError> {
    let stack = Txt2ImgStack::build(&request.stack_name, &request.model_info, config)
        .map_err(|error| SynthError {
            message: format!("failed to assemble stack: {error}"),
        })?;
    let template = stack.to_template().map_err(|error| SynthError {
        message: format!("failed to synthesize template: {error}"),
    })?;
    let template_body = template.to_pretty_json().map_err(|error| SynthError {
        message: error.message().to_string(),
    })?;

    let template_key = template_key(&request.stack_name);
    let manifest = AssemblyManifest {
        version: ASSEMBLY_SCHEMA_VERSION.to_string(),
        artifacts: BTreeMap::from([(
            request.stack_name.clone(),
            ArtifactManifest {
                artifact_type: STACK_ARTIFACT_TYPE.to_string(),
                environment: format!("aws://unknown-account/{}", request.model_info.region_name),
                properties: ArtifactProperties {
                    template_file: template_key.clone(),
                },
            },
        )]),
    };
    let manifest_body = serde_json::to_vec_pretty(&manifest).map_err(|error| SynthError {
        message: format!("failed to serialize assembly manifest: {error}"),
    })?;

    store
        .write_object(&template_key, template_body.as_bytes())
        .map_err(|message| SynthError { message })?;
    // a template without a manifest is not a usable assembly
    if let Err(message) = store.write_object(MANIFEST_KEY, &manifest_body) {
        return Err(match store.delete_object(&template_key) {
            Ok(()) => SynthError { message },
            Err(cleanup) => SynthError {
                message: format!("{message}; cleanup of '{template_key}' failed: {cleanup}"),
            },
        });
    }

    Ok(SynthResponse {
        status: "synthesized".to_string(),
        stack_name: request.stack_name.clone(),
        template_key,
        manifest_key: MANIFEST_KEY.to_string(),
        resource_count: template.resources.len(),
        instance_count: stack.endpoint.descriptor.instance_count,
        endpoint_parameter: stack.endpoint_parameter.name,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::Value;
    use txt2img_stack_core::contract::INSTANCE_COUNT_CONTEXT_KEY;
    use txt2img_stack_core::CloudFormationTemplate;

    use super::*;

    struct CapturingStore {
        objects: Mutex<BTreeMap<String, Vec<u8>>>,
    }

    impl CapturingStore {
        fn new() -> Self {
            Self {
                objects: Mutex::new(BTreeMap::new()),
            }
        }

        fn object(&self, key: &str) -> Option<Vec<u8>> {
            self.objects.lock().expect("poisoned mutex").get(key).cloned()
        }
    }

    impl AssemblyStore for CapturingStore {
        fn write_object(&self, key: &str, body: &[u8]) -> Result<(), String> {
            self.objects
                .lock()
                .expect("poisoned mutex")
                .insert(key.to_string(), body.to_vec());
            Ok(())
        }

        fn delete_object(&self, key: &str) -> Result<(), String> {
            self.objects.lock().expect("poisoned mutex").remove(key);
            Ok(())
        }
    }

    struct FailingStore;

    impl AssemblyStore for FailingStore {
        fn write_object(&self, _key: &str, _body: &[u8]) -> Result<(), String> {
            Err("disk full".to_string())
        }

        fn delete_object(&self, _key: &str) -> Result<(), String> {
            Ok(())
        }
    }

    /// Accepts everything except the manifest.
    struct ManifestRejectingStore {
        inner: CapturingStore,
    }

    impl AssemblyStore for ManifestRejectingStore {
        fn write_object(&self, key: &str, body: &[u8]) -> Result<(), String> {
            if key == MANIFEST_KEY {
                return Err("quota exceeded".to_string());
            }
            self.inner.write_object(key, body)
        }

        fn delete_object(&self, key: &str) -> Result<(), String> {
            self.inner.delete_object(key)
        }
    }

    fn request(context: DeploymentContext) -> SynthRequest {
        SynthRequest {
            stack_name: "Txt2ImgSagemakerStack".to_string(),
            model_info: ModelInfo {
                model_bucket_name: "b".to_string(),
                model_bucket_key: "k".to_string(),
                model_docker_image: "img".to_string(),
                instance_type: "ml.m5.xlarge".to_string(),
                region_name: "us-east-1".to_string(),
            },
            context,
        }
    }

    #[test]
    fn writes_template_and_manifest() {
        let store = CapturingStore::new();
        let response = handle_synth(&request(DeploymentContext::new()), &store)
            .expect("synth should succeed");

        assert_eq!(response.template_key, "Txt2ImgSagemakerStack.template.json");
        assert_eq!(response.instance_count, 1);
        assert_eq!(response.endpoint_parameter, "txt2img_sm_endpoint");
        // role, three policies, model, config, endpoint, parameter
        assert_eq!(response.resource_count, 8);

        let template_bytes = store.object(&response.template_key).expect("template written");
        let template: CloudFormationTemplate =
            serde_json::from_slice(&template_bytes).expect("template should parse");
        assert_eq!(template.resources.len(), 8);

        let manifest: Value = serde_json::from_slice(
            &store.object(MANIFEST_KEY).expect("manifest written"),
        )
        .expect("manifest should parse");
        let artifact = &manifest["artifacts"]["Txt2ImgSagemakerStack"];
        assert_eq!(artifact["type"], "aws:cloudformation:stack");
        assert_eq!(artifact["environment"], "aws://unknown-account/us-east-1");
        assert_eq!(
            artifact["properties"]["templateFile"],
            "Txt2ImgSagemakerStack.template.json"
        );
    }

    #[test]
    fn honours_instance_count_context() {
        let store = CapturingStore::new();
        let context = DeploymentContext::from([(
            INSTANCE_COUNT_CONTEXT_KEY.to_string(),
            "3".to_string(),
        )]);
        let response = handle_synth(&request(context), &store).expect("synth should succeed");
        assert_eq!(response.instance_count, 3);
    }

    #[test]
    fn surfaces_store_failures() {
        let error = handle_synth(&request(DeploymentContext::new()), &FailingStore)
            .expect_err("write failure should propagate");
        assert_eq!(error.message, "disk full");
    }

    #[test]
    fn manifest_failure_leaves_no_template_behind() {
        let store = ManifestRejectingStore {
            inner: CapturingStore::new(),
        };
        let error = handle_synth(&request(DeploymentContext::new()), &store)
            .expect_err("manifest failure should propagate");

        assert_eq!(error.message, "quota exceeded");
        assert!(store
            .inner
            .objects
            .lock()
            .expect("poisoned mutex")
            .is_empty());
    }

    #[test]
    fn invalid_stack_names_write_nothing() {
        for name in ["", "has space", "1starts-digit", "under_score"] {
            let store = CapturingStore::new();
            let mut request = request(DeploymentContext::new());
            request.stack_name = name.to_string();

            let error = handle_synth(&request, &store).expect_err("invalid stack name");
            assert!(
                error.message.starts_with("failed to assemble stack: stack name"),
                "name {name:?}: {}",
                error.message
            );
            assert!(store
                .objects
                .lock()
                .expect("poisoned mutex")
                .is_empty());
        }
    }
}

//! Loading model metadata and deployment context from files and flags.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use txt2img_stack_core::{DeploymentContext, ModelInfo};

/// Model info fields supplied individually on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelInfoOverrides {
    pub model_bucket_name: Option<String>,
    pub model_bucket_key: Option<String>,
    pub model_docker_image: Option<String>,
    pub instance_type: Option<String>,
    pub region_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialModelInfo {
    model_bucket_name: Option<String>,
    model_bucket_key: Option<String>,
    model_docker_image: Option<String>,
    instance_type: Option<String>,
    region_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ContextFile {
    #[serde(default)]
    context: serde_json::Map<String, Value>,
}

/// Merges an optional JSON model info file with flag overrides. Flags win.
///
/// Only the file and explicit flags are consulted; the process environment is not.
pub fn resolve_model_info(
    file: Option<&Path>,
    overrides: ModelInfoOverrides,
) -> Result<ModelInfo, String> {
    let base = match file {
        Some(path) => {
            let text = read_file(path)?;
            serde_json::from_str::<PartialModelInfo>(&text).map_err(|error| {
                format!("invalid model info file '{}': {error}", path.display())
            })?
        }
        None => PartialModelInfo::default(),
    };

    Ok(ModelInfo {
        model_bucket_name: required(
            "model_bucket_name",
            overrides.model_bucket_name.or(base.model_bucket_name),
        )?,
        model_bucket_key: required(
            "model_bucket_key",
            overrides.model_bucket_key.or(base.model_bucket_key),
        )?,
        model_docker_image: required(
            "model_docker_image",
            overrides.model_docker_image.or(base.model_docker_image),
        )?,
        instance_type: required(
            "instance_type",
            overrides.instance_type.or(base.instance_type),
        )?,
        region_name: required("region_name", overrides.region_name.or(base.region_name))?,
    })
}

/// Reads `{"context": {...}}` from a cdk.json-style file, then applies `key=value` pairs.
pub fn load_context(file: Option<&Path>, pairs: &[String]) -> Result<DeploymentContext, String> {
    let mut context = DeploymentContext::new();

    if let Some(path) = file {
        let text = read_file(path)?;
        let parsed: ContextFile = serde_json::from_str(&text)
            .map_err(|error| format!("invalid context file '{}': {error}", path.display()))?;
        for (key, value) in parsed.context {
            context.insert(key, context_value_to_string(value));
        }
    }

    for pair in pairs {
        let (key, value) = parse_context_pair(pair)?;
        context.insert(key, value);
    }

    Ok(context)
}

pub fn parse_context_pair(pair: &str) -> Result<(String, String), String> {
    let Some((key, value)) = pair.split_once('=') else {
        return Err(format!("context must be KEY=VALUE, got '{pair}'"));
    };
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("context key cannot be empty in '{pair}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn context_value_to_string(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

fn required(field: &str, value: Option<String>) -> Result<String, String> {
    value.ok_or_else(|| format!("model info field '{field}' is required"))
}

fn read_file(path: &Path) -> Result<String, String> {
    fs::read_to_string(path).map_err(|error| format!("failed to read '{}': {error}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        std::io::Write::write_all(&mut file, contents.as_bytes()).expect("write temp file");
        file
    }

    #[test]
    fn flags_override_model_info_file() {
        let file = write_temp(
            r#"{
                "model_bucket_name": "file-bucket",
                "model_bucket_key": "file-key",
                "model_docker_image": "file-image",
                "instance_type": "ml.g4dn.4xlarge",
                "region_name": "us-west-2"
            }"#,
        );
        let overrides = ModelInfoOverrides {
            region_name: Some("eu-west-1".to_string()),
            ..ModelInfoOverrides::default()
        };

        let info = resolve_model_info(Some(file.path()), overrides).expect("model info");
        assert_eq!(info.model_bucket_name, "file-bucket");
        assert_eq!(info.region_name, "eu-west-1");
    }

    #[test]
    fn file_region_reaches_model_info_without_region_flag() {
        let file = write_temp(
            r#"{
                "model_bucket_name": "file-bucket",
                "model_bucket_key": "file-key",
                "model_docker_image": "file-image",
                "instance_type": "ml.g4dn.4xlarge",
                "region_name": "us-east-1"
            }"#,
        );

        let info = resolve_model_info(Some(file.path()), ModelInfoOverrides::default())
            .expect("model info");
        assert_eq!(info.region_name, "us-east-1");
        assert_eq!(info.instance_type, "ml.g4dn.4xlarge");
    }

    #[test]
    fn missing_field_is_reported() {
        let overrides = ModelInfoOverrides {
            model_bucket_name: Some("b".to_string()),
            model_bucket_key: Some("k".to_string()),
            model_docker_image: Some("img".to_string()),
            instance_type: Some("ml.m5.xlarge".to_string()),
            region_name: None,
        };
        let error = resolve_model_info(None, overrides).expect_err("region is missing");
        assert_eq!(error, "model info field 'region_name' is required");
    }

    #[test]
    fn context_pairs_override_context_file() {
        let file = write_temp(r#"{"app": "cargo run", "context": {"instance_count_param": 2, "other": "x"}}"#);
        let context = load_context(
            Some(file.path()),
            &["instance_count_param=5".to_string()],
        )
        .expect("context");

        assert_eq!(context["instance_count_param"], "5");
        assert_eq!(context["other"], "x");
    }

    #[test]
    fn numeric_context_values_become_strings() {
        let file = write_temp(r#"{"context": {"instance_count_param": 2}}"#);
        let context = load_context(Some(file.path()), &[]).expect("context");
        assert_eq!(context["instance_count_param"], "2");
    }

    #[test]
    fn malformed_pairs_are_rejected() {
        assert!(parse_context_pair("instance_count_param").is_err());
        assert!(parse_context_pair("=3").is_err());
        assert_eq!(
            parse_context_pair("instance_count_param=").expect("empty value is allowed"),
            ("instance_count_param".to_string(), String::new())
        );
    }
}

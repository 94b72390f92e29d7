//! SageMaker hosting: model, endpoint configuration and endpoint.
//!
//! [`SageMakerEndpoint::new`] lays out the three CloudFormation resources
//! under one construct so callers can hang dependencies off the whole group.
//! The endpoint name is only known after provisioning, so it is exposed as a
//! [`Token`].

use std::collections::BTreeMap;

use serde::Serialize;

use crate::construct::{ConstructGraph, NodeId, StackOutput};
use crate::contract::{ModelInfo, StackConfig, ValidationError};
use crate::token::Token;

pub const ENDPOINT_CONSTRUCT_ID: &str = "TXT2IMG";
pub const MODEL_NAME: &str = "StableDiffusionText2Img";
pub const PROJECT_PREFIX: &str = "GenerativeAiDemo";
pub const DEFAULT_VARIANT_NAME: &str = "AllTraffic";
pub const DEFAULT_VARIANT_WEIGHT: u32 = 1;
pub const NOT_YET_DEPLOYED: &str = "not_yet_deployed";

pub const MMS_MAX_RESPONSE_SIZE: &str = "20000000";
pub const SAGEMAKER_CONTAINER_LOG_LEVEL: &str = "20";
pub const SAGEMAKER_PROGRAM: &str = "inference.py";
pub const SAGEMAKER_SUBMIT_DIRECTORY: &str = "/opt/ml/model/code";

const MODEL_RESOURCE_TYPE: &str = "AWS::SageMaker::Model";
const ENDPOINT_CONFIG_RESOURCE_TYPE: &str = "AWS::SageMaker::EndpointConfig";
const ENDPOINT_RESOURCE_TYPE: &str = "AWS::SageMaker::Endpoint";

/// Inference server tuning values passed to the hosting container.
pub fn inference_environment(region_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            "MMS_MAX_RESPONSE_SIZE".to_string(),
            MMS_MAX_RESPONSE_SIZE.to_string(),
        ),
        (
            "SAGEMAKER_CONTAINER_LOG_LEVEL".to_string(),
            SAGEMAKER_CONTAINER_LOG_LEVEL.to_string(),
        ),
        (
            "SAGEMAKER_PROGRAM".to_string(),
            SAGEMAKER_PROGRAM.to_string(),
        ),
        ("SAGEMAKER_REGION".to_string(), region_name.to_string()),
        (
            "SAGEMAKER_SUBMIT_DIRECTORY".to_string(),
            SAGEMAKER_SUBMIT_DIRECTORY.to_string(),
        ),
    ])
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TrafficVariant {
    pub variant_name: String,
    pub initial_variant_weight: u32,
}

/// Declarative description of the hosted model endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub project_prefix: String,
    pub role_arn: Token,
    pub model_name: String,
    pub model_bucket_name: String,
    pub model_bucket_key: String,
    pub model_docker_image: String,
    pub instance_type: String,
    pub instance_count: u32,
    pub variants: Vec<TrafficVariant>,
    pub environment: BTreeMap<String, String>,
    pub deploy_enable: bool,
}

impl EndpointDescriptor {
    /// The txt2img descriptor: one `AllTraffic` variant, fixed environment, deploy enabled.
    pub fn txt2img(role_arn: Token, model_info: &ModelInfo, config: &StackConfig) -> Self {
        Self {
            project_prefix: format!("{PROJECT_PREFIX}-{}", config.instance_count),
            role_arn,
            model_name: MODEL_NAME.to_string(),
            model_bucket_name: model_info.model_bucket_name.clone(),
            model_bucket_key: model_info.model_bucket_key.clone(),
            model_docker_image: model_info.model_docker_image.clone(),
            instance_type: model_info.instance_type.clone(),
            instance_count: config.instance_count,
            variants: vec![TrafficVariant {
                variant_name: DEFAULT_VARIANT_NAME.to_string(),
                initial_variant_weight: DEFAULT_VARIANT_WEIGHT,
            }],
            environment: inference_environment(&model_info.region_name),
            deploy_enable: true,
        }
    }

    pub fn model_data_url(&self) -> String {
        format!("s3://{}/{}", self.model_bucket_name, self.model_bucket_key)
    }

    fn resource_name(&self, suffix: &str) -> String {
        format!("{}-{}-{suffix}", self.project_prefix, self.model_name)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerDefinition<'a> {
    environment: &'a BTreeMap<String, String>,
    image: &'a str,
    model_data_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ModelProperties<'a> {
    containers: Vec<ContainerDefinition<'a>>,
    execution_role_arn: &'a Token,
    model_name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ProductionVariant<'a> {
    initial_instance_count: u32,
    initial_variant_weight: u32,
    instance_type: &'a str,
    model_name: Token,
    variant_name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct EndpointConfigProperties<'a> {
    endpoint_config_name: String,
    production_variants: Vec<ProductionVariant<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct EndpointProperties {
    endpoint_config_name: Token,
    endpoint_name: String,
}

/// The realized endpoint construct.
#[derive(Debug, Clone, PartialEq)]
pub struct SageMakerEndpoint {
    pub node: NodeId,
    pub model: NodeId,
    pub endpoint_config: NodeId,
    pub endpoint: Option<NodeId>,
    pub descriptor: EndpointDescriptor,
    endpoint_name: Token,
}

impl SageMakerEndpoint {
    pub fn new(
        graph: &mut ConstructGraph,
        scope: NodeId,
        id: &str,
        descriptor: EndpointDescriptor,
    ) -> Result<Self, ValidationError> {
        if descriptor.instance_count == 0 {
            return Err(ValidationError::new(
                "instance_count must be a positive integer",
            ));
        }
        if descriptor.variants.is_empty() {
            return Err(ValidationError::new(
                "endpoint needs at least one traffic variant",
            ));
        }

        let node = graph.add_construct(scope, id)?;

        let model_properties = ModelProperties {
            containers: vec![ContainerDefinition {
                environment: &descriptor.environment,
                image: &descriptor.model_docker_image,
                model_data_url: descriptor.model_data_url(),
            }],
            execution_role_arn: &descriptor.role_arn,
            model_name: descriptor.resource_name("Model"),
        };
        let model = graph.add_resource(
            node,
            format!("{}-Model", descriptor.model_name),
            MODEL_RESOURCE_TYPE,
            to_properties(&model_properties)?,
        )?;
        let model_id = resource_logical_id(graph, model)?;

        let config_properties = EndpointConfigProperties {
            endpoint_config_name: descriptor.resource_name("Config"),
            production_variants: descriptor
                .variants
                .iter()
                .map(|variant| ProductionVariant {
                    initial_instance_count: descriptor.instance_count,
                    initial_variant_weight: variant.initial_variant_weight,
                    instance_type: &descriptor.instance_type,
                    model_name: Token::attribute(&model_id, "ModelName"),
                    variant_name: &variant.variant_name,
                })
                .collect(),
        };
        let endpoint_config = graph.add_resource(
            node,
            format!("{}-Config", descriptor.model_name),
            ENDPOINT_CONFIG_RESOURCE_TYPE,
            to_properties(&config_properties)?,
        )?;

        let (endpoint, endpoint_name) = if descriptor.deploy_enable {
            graph.add_dependency(endpoint_config, model)?;
            let config_id = resource_logical_id(graph, endpoint_config)?;
            let endpoint_properties = EndpointProperties {
                endpoint_config_name: Token::attribute(&config_id, "EndpointConfigName"),
                endpoint_name: descriptor.resource_name("Endpoint"),
            };
            let endpoint = graph.add_resource(
                node,
                format!("{}-Endpoint", descriptor.model_name),
                ENDPOINT_RESOURCE_TYPE,
                to_properties(&endpoint_properties)?,
            )?;
            let endpoint_id = resource_logical_id(graph, endpoint)?;
            let endpoint_name = Token::attribute(endpoint_id, "EndpointName");
            graph.add_output(
                format!("{}EndpointName", descriptor.model_name),
                StackOutput {
                    value: endpoint_name.clone(),
                    description: Some("Name of the deployed SageMaker endpoint".to_string()),
                },
            )?;
            (Some(endpoint), endpoint_name)
        } else {
            (None, Token::literal(NOT_YET_DEPLOYED))
        };

        Ok(Self {
            node,
            model,
            endpoint_config,
            endpoint,
            descriptor,
            endpoint_name,
        })
    }

    /// Deferred endpoint name; the literal `not_yet_deployed` when deployment is disabled.
    pub fn endpoint_name(&self) -> &Token {
        &self.endpoint_name
    }
}

fn to_properties(properties: &impl Serialize) -> Result<serde_json::Value, ValidationError> {
    serde_json::to_value(properties)
        .map_err(|error| ValidationError::new(format!("failed to serialize properties: {error}")))
}

fn resource_logical_id(graph: &ConstructGraph, node: NodeId) -> Result<String, ValidationError> {
    graph
        .logical_id(node)
        .map(str::to_string)
        .ok_or_else(|| ValidationError::new(format!("'{}' is not a resource", graph.node(node).path)))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn model_info() -> ModelInfo {
        ModelInfo {
            model_bucket_name: "models".to_string(),
            model_bucket_key: "sd/model.tar.gz".to_string(),
            model_docker_image: "123.dkr.ecr.us-west-2.amazonaws.com/sd:latest".to_string(),
            instance_type: "ml.g4dn.4xlarge".to_string(),
            region_name: "us-west-2".to_string(),
        }
    }

    fn build(descriptor: EndpointDescriptor) -> (ConstructGraph, SageMakerEndpoint) {
        let mut graph = ConstructGraph::new("TestStack");
        let root = graph.root();
        let endpoint = SageMakerEndpoint::new(&mut graph, root, ENDPOINT_CONSTRUCT_ID, descriptor)
            .expect("endpoint");
        (graph, endpoint)
    }

    #[test]
    fn environment_has_exactly_the_fixed_keys() {
        let environment = inference_environment("eu-central-1");
        let keys: Vec<&str> = environment.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![
                "MMS_MAX_RESPONSE_SIZE",
                "SAGEMAKER_CONTAINER_LOG_LEVEL",
                "SAGEMAKER_PROGRAM",
                "SAGEMAKER_REGION",
                "SAGEMAKER_SUBMIT_DIRECTORY",
            ]
        );
        assert_eq!(environment["MMS_MAX_RESPONSE_SIZE"], "20000000");
        assert_eq!(environment["SAGEMAKER_CONTAINER_LOG_LEVEL"], "20");
        assert_eq!(environment["SAGEMAKER_PROGRAM"], "inference.py");
        assert_eq!(environment["SAGEMAKER_REGION"], "eu-central-1");
        assert_eq!(environment["SAGEMAKER_SUBMIT_DIRECTORY"], "/opt/ml/model/code");
    }

    #[test]
    fn descriptor_has_single_all_traffic_variant() {
        let config = StackConfig { instance_count: 2 };
        let descriptor = EndpointDescriptor::txt2img(Token::literal("arn"), &model_info(), &config);
        assert_eq!(
            descriptor.variants,
            vec![TrafficVariant {
                variant_name: "AllTraffic".to_string(),
                initial_variant_weight: 1,
            }]
        );
        assert_eq!(descriptor.instance_count, 2);
        assert_eq!(descriptor.project_prefix, "GenerativeAiDemo-2");
        assert!(descriptor.deploy_enable);
    }

    #[test]
    fn lays_out_model_config_and_endpoint() {
        let descriptor = EndpointDescriptor::txt2img(
            Token::attribute("RoleABC", "Arn"),
            &model_info(),
            &StackConfig::default(),
        );
        let (graph, endpoint) = build(descriptor);

        let model = graph.node(endpoint.model).resource.as_ref().expect("model");
        assert_eq!(model.resource_type, "AWS::SageMaker::Model");
        assert_eq!(
            model.properties["ExecutionRoleArn"],
            json!({"Fn::GetAtt": ["RoleABC", "Arn"]})
        );
        assert_eq!(
            model.properties["ModelName"],
            "GenerativeAiDemo-1-StableDiffusionText2Img-Model"
        );
        assert_eq!(
            model.properties["Containers"][0]["ModelDataUrl"],
            "s3://models/sd/model.tar.gz"
        );
        assert_eq!(
            model.properties["Containers"][0]["Environment"]["SAGEMAKER_REGION"],
            "us-west-2"
        );

        let config = graph
            .node(endpoint.endpoint_config)
            .resource
            .as_ref()
            .expect("config");
        let variant = &config.properties["ProductionVariants"][0];
        assert_eq!(variant["VariantName"], "AllTraffic");
        assert_eq!(variant["InitialVariantWeight"], 1);
        assert_eq!(variant["InitialInstanceCount"], 1);
        assert_eq!(variant["InstanceType"], "ml.g4dn.4xlarge");
        assert_eq!(
            variant["ModelName"],
            json!({"Fn::GetAtt": [model.logical_id, "ModelName"]})
        );

        let endpoint_node = endpoint.endpoint.expect("endpoint deployed");
        let endpoint_id = graph.logical_id(endpoint_node).expect("endpoint id");
        assert_eq!(
            endpoint.endpoint_name(),
            &Token::attribute(endpoint_id, "EndpointName")
        );
        assert!(graph
            .outputs()
            .contains_key("StableDiffusionText2ImgEndpointName"));
    }

    #[test]
    fn disabled_deploy_skips_endpoint() {
        let mut descriptor =
            EndpointDescriptor::txt2img(Token::literal("arn"), &model_info(), &StackConfig::default());
        descriptor.deploy_enable = false;
        let (graph, endpoint) = build(descriptor);

        assert!(endpoint.endpoint.is_none());
        assert_eq!(endpoint.endpoint_name().as_resolved().as_deref(), Some(NOT_YET_DEPLOYED));
        assert!(graph.outputs().is_empty());
        assert_eq!(graph.resources().count(), 2);
    }

    #[test]
    fn rejects_zero_instance_count() {
        let descriptor = EndpointDescriptor::txt2img(
            Token::literal("arn"),
            &model_info(),
            &StackConfig { instance_count: 0 },
        );
        let mut graph = ConstructGraph::new("TestStack");
        let root = graph.root();
        let error = SageMakerEndpoint::new(&mut graph, root, ENDPOINT_CONSTRUCT_ID, descriptor)
            .expect_err("zero instances should fail");
        assert_eq!(error.message(), "instance_count must be a positive integer");
    }
}

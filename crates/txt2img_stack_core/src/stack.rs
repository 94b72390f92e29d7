use serde_json::json;

use crate::construct::ConstructGraph;
use crate::contract::{
    validate_stack_name, ModelInfo, StackConfig, ValidationError, ENDPOINT_PARAMETER_NAME,
};
use crate::iam::{build_deployment_permissions, DeploymentPermissions};
use crate::logging::log_info;
use crate::sagemaker::{EndpointDescriptor, SageMakerEndpoint, ENDPOINT_CONSTRUCT_ID};
use crate::ssm::SharedParameter;
use crate::template::{synthesize, CloudFormationTemplate};

const COMPONENT: &str = "txt2img_stack";

/// The assembled txt2img hosting stack.
#[derive(Debug, Clone)]
pub struct Txt2ImgStack {
    pub graph: ConstructGraph,
    pub permissions: DeploymentPermissions,
    pub endpoint: SageMakerEndpoint,
    pub endpoint_parameter: SharedParameter,
}

impl Txt2ImgStack {
    /// Policies first, then the endpoint, then the ordering edges, then the published name.
    pub fn build(
        stack_name: &str,
        model_info: &ModelInfo,
        config: &StackConfig,
    ) -> Result<Self, ValidationError> {
        validate_stack_name(stack_name)?;
        let mut graph = ConstructGraph::new(stack_name);
        let root = graph.root();

        let permissions = build_deployment_permissions(&mut graph, root)?;
        log_info(
            COMPONENT,
            "permissions_declared",
            json!({
                "stack": stack_name,
                "role": permissions.role.logical_id,
                "policies": permissions
                    .policies
                    .iter()
                    .map(|policy| policy.kind.as_str())
                    .collect::<Vec<_>>(),
            }),
        );

        let descriptor = EndpointDescriptor::txt2img(permissions.role.arn(), model_info, config);
        let endpoint = SageMakerEndpoint::new(&mut graph, root, ENDPOINT_CONSTRUCT_ID, descriptor)?;
        log_info(
            COMPONENT,
            "endpoint_declared",
            json!({
                "stack": stack_name,
                "instance_type": endpoint.descriptor.instance_type,
                "instance_count": endpoint.descriptor.instance_count,
                "region": model_info.region_name,
            }),
        );

        for policy_node in permissions.policy_nodes() {
            graph.add_dependency(endpoint.node, policy_node)?;
        }

        let endpoint_parameter = SharedParameter::publish(
            &mut graph,
            root,
            ENDPOINT_PARAMETER_NAME,
            endpoint.endpoint_name().clone(),
        )?;
        log_info(
            COMPONENT,
            "endpoint_name_published",
            json!({
                "stack": stack_name,
                "parameter": endpoint_parameter.name,
                "sources": endpoint_parameter.source_logical_ids(),
            }),
        );

        Ok(Self {
            graph,
            permissions,
            endpoint,
            endpoint_parameter,
        })
    }

    pub fn to_template(&self) -> Result<CloudFormationTemplate, ValidationError> {
        synthesize(&self.graph)
    }
}

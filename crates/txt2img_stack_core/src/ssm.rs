//! Shared parameter publishing for cross-stack discovery.

use serde::Serialize;

use crate::construct::{ConstructGraph, NodeId};
use crate::contract::ValidationError;
use crate::token::Token;

const PARAMETER_RESOURCE_TYPE: &str = "AWS::SSM::Parameter";
const RESOURCE_ID: &str = "Resource";

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ParameterProperties<'a> {
    name: &'a str,
    #[serde(rename = "Type")]
    parameter_type: &'static str,
    value: &'a Token,
}

/// A string parameter whose value may stay deferred until provisioning.
#[derive(Debug, Clone, PartialEq)]
pub struct SharedParameter {
    pub node: NodeId,
    pub logical_id: String,
    pub name: String,
    pub value: Token,
}

impl SharedParameter {
    /// Publishes `value` under `name`. The construct id matches the parameter name.
    pub fn publish(
        graph: &mut ConstructGraph,
        scope: NodeId,
        name: &str,
        value: Token,
    ) -> Result<Self, ValidationError> {
        if name.trim().is_empty() {
            return Err(ValidationError::new("parameter name cannot be empty"));
        }

        let properties = serde_json::to_value(ParameterProperties {
            name,
            parameter_type: "String",
            value: &value,
        })
        .map_err(|error| {
            ValidationError::new(format!("failed to serialize parameter {name}: {error}"))
        })?;

        let node = graph.add_construct(scope, name)?;
        let resource = graph.add_resource(node, RESOURCE_ID, PARAMETER_RESOURCE_TYPE, properties)?;
        let logical_id = graph
            .logical_id(resource)
            .ok_or_else(|| ValidationError::new("parameter resource has no logical id"))?
            .to_string();

        Ok(Self {
            node,
            logical_id,
            name: name.to_string(),
            value,
        })
    }

    /// Resources whose attributes feed the published value.
    pub fn source_logical_ids(&self) -> Vec<&str> {
        self.value.referenced_logical_ids()
    }
}

//! CloudFormation template synthesis.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::construct::ConstructGraph;
use crate::contract::ValidationError;

pub const CDK_PATH_METADATA_KEY: &str = "aws:cdk:path";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct TemplateResource {
    #[serde(rename = "Type")]
    pub resource_type: String,
    pub properties: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct TemplateOutput {
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct CloudFormationTemplate {
    pub resources: BTreeMap<String, TemplateResource>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, TemplateOutput>,
}

impl CloudFormationTemplate {
    pub fn resources_of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a TemplateResource)> + 'a {
        self.resources
            .iter()
            .filter(move |(_, resource)| resource.resource_type == resource_type)
    }

    pub fn to_pretty_json(&self) -> Result<String, ValidationError> {
        serde_json::to_string_pretty(self)
            .map_err(|error| ValidationError::new(format!("failed to render template: {error}")))
    }
}

/// Renders the graph as a template. Fails if the resource dependencies contain a cycle.
pub fn synthesize(graph: &ConstructGraph) -> Result<CloudFormationTemplate, ValidationError> {
    graph.creation_order()?;

    let depends_on = graph.explicit_depends_on();
    let resources = graph
        .resources()
        .map(|(node, resource)| {
            let entry = TemplateResource {
                resource_type: resource.resource_type.clone(),
                properties: resource.properties.clone(),
                depends_on: depends_on
                    .get(&resource.logical_id)
                    .map(|targets| targets.iter().cloned().collect())
                    .unwrap_or_default(),
                metadata: BTreeMap::from([(
                    CDK_PATH_METADATA_KEY.to_string(),
                    graph.node(node).path.clone(),
                )]),
            };
            (resource.logical_id.clone(), entry)
        })
        .collect();

    let mut outputs = BTreeMap::new();
    for (id, output) in graph.outputs() {
        let value = serde_json::to_value(&output.value).map_err(|error| {
            ValidationError::new(format!("failed to render output {id}: {error}"))
        })?;
        outputs.insert(
            id.clone(),
            TemplateOutput {
                value,
                description: output.description.clone(),
            },
        );
    }

    Ok(CloudFormationTemplate { resources, outputs })
}

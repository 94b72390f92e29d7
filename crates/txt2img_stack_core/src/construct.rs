//! Construct tree with resources, explicit dependency edges and outputs.
//!
//! Resources get stable logical ids derived from their path. Dependencies
//! declared between constructs expand to every resource underneath them when
//! the template is synthesized.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::contract::ValidationError;
use crate::token::{references_in, Token};

const DEFAULT_RESOURCE_ID: &str = "Resource";
const HASH_LEN: usize = 8;
const MAX_HUMAN_LEN: usize = 240;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone, PartialEq)]
pub struct CfnResource {
    pub resource_type: String,
    pub logical_id: String,
    pub properties: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstructNode {
    pub id: String,
    pub path: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub resource: Option<CfnResource>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StackOutput {
    pub value: Token,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConstructGraph {
    nodes: Vec<ConstructNode>,
    dependencies: BTreeSet<(NodeId, NodeId)>,
    outputs: BTreeMap<String, StackOutput>,
}

impl ConstructGraph {
    pub fn new(stack_name: impl Into<String>) -> Self {
        let stack_name = stack_name.into();
        Self {
            nodes: vec![ConstructNode {
                path: stack_name.clone(),
                id: stack_name,
                parent: None,
                children: Vec::new(),
                resource: None,
            }],
            dependencies: BTreeSet::new(),
            outputs: BTreeMap::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &ConstructNode {
        &self.nodes[id.0]
    }

    #[cfg(test)]
    pub(crate) fn find(&self, path: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|node| node.path == path)
            .map(NodeId)
    }

    pub fn add_construct(
        &mut self,
        parent: NodeId,
        id: impl Into<String>,
    ) -> Result<NodeId, ValidationError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ValidationError::new("construct id cannot be empty"));
        }
        if id.contains('/') {
            return Err(ValidationError::new(format!(
                "construct id '{id}' cannot contain '/'"
            )));
        }
        let parent_node = self
            .nodes
            .get(parent.0)
            .ok_or_else(|| ValidationError::new("parent construct does not exist"))?;
        if parent_node
            .children
            .iter()
            .any(|child| self.nodes[child.0].id == id)
        {
            return Err(ValidationError::new(format!(
                "There is already a construct with id '{id}' in '{}'",
                parent_node.path
            )));
        }

        let node_id = NodeId(self.nodes.len());
        let path = format!("{}/{id}", parent_node.path);
        self.nodes.push(ConstructNode {
            id,
            path,
            parent: Some(parent),
            children: Vec::new(),
            resource: None,
        });
        self.nodes[parent.0].children.push(node_id);
        Ok(node_id)
    }

    /// Adds a resource node and assigns its logical id.
    pub fn add_resource(
        &mut self,
        parent: NodeId,
        id: impl Into<String>,
        resource_type: &str,
        properties: Value,
    ) -> Result<NodeId, ValidationError> {
        let node_id = self.add_construct(parent, id)?;
        let logical_id = allocate_logical_id(&self.path_components(node_id));
        if self.resources().any(|(_, resource)| resource.logical_id == logical_id) {
            return Err(ValidationError::new(format!(
                "logical id '{logical_id}' is already allocated"
            )));
        }
        self.nodes[node_id.0].resource = Some(CfnResource {
            resource_type: resource_type.to_string(),
            logical_id,
            properties,
        });
        Ok(node_id)
    }

    /// Replaces the property bag of an existing resource.
    pub fn set_properties(&mut self, id: NodeId, properties: Value) -> Result<(), ValidationError> {
        let node = self
            .nodes
            .get_mut(id.0)
            .ok_or_else(|| ValidationError::new("construct does not exist"))?;
        match node.resource.as_mut() {
            Some(resource) => {
                resource.properties = properties;
                Ok(())
            }
            None => Err(ValidationError::new(format!(
                "construct '{}' is not a resource",
                node.path
            ))),
        }
    }

    pub fn logical_id(&self, id: NodeId) -> Option<&str> {
        self.nodes[id.0]
            .resource
            .as_ref()
            .map(|resource| resource.logical_id.as_str())
    }

    /// Declares that nothing under `from` may be created before everything under `to`.
    pub fn add_dependency(&mut self, from: NodeId, to: NodeId) -> Result<(), ValidationError> {
        if from == to {
            return Err(ValidationError::new(format!(
                "construct '{}' cannot depend on itself",
                self.nodes[from.0].path
            )));
        }
        self.dependencies.insert((from, to));
        Ok(())
    }

    pub fn construct_dependencies(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.dependencies.iter().copied()
    }

    pub fn add_output(
        &mut self,
        id: impl Into<String>,
        output: StackOutput,
    ) -> Result<(), ValidationError> {
        let id = id.into();
        if self.outputs.contains_key(&id) {
            return Err(ValidationError::new(format!("duplicate output '{id}'")));
        }
        self.outputs.insert(id, output);
        Ok(())
    }

    pub fn outputs(&self) -> &BTreeMap<String, StackOutput> {
        &self.outputs
    }

    pub fn resources(&self) -> impl Iterator<Item = (NodeId, &CfnResource)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(index, node)| node.resource.as_ref().map(|r| (NodeId(index), r)))
    }

    /// Resource nodes in the subtree rooted at `id`, including `id` itself.
    pub fn resources_under(&self, id: NodeId) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let node = &self.nodes[current.0];
            if node.resource.is_some() {
                found.push(current);
            }
            stack.extend(node.children.iter().rev().copied());
        }
        found.sort();
        found
    }

    /// Explicit `DependsOn` edges at resource level, keyed by the dependent logical id.
    pub fn explicit_depends_on(&self) -> BTreeMap<String, BTreeSet<String>> {
        let mut edges: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (from, to) in &self.dependencies {
            let targets: Vec<&str> = self
                .resources_under(*to)
                .into_iter()
                .filter_map(|node| self.logical_id(node))
                .collect();
            for source in self.resources_under(*from) {
                let Some(source_id) = self.logical_id(source) else {
                    continue;
                };
                let entry = edges.entry(source_id.to_string()).or_default();
                for target in &targets {
                    if *target != source_id {
                        entry.insert((*target).to_string());
                    }
                }
            }
        }
        edges.retain(|_, targets| !targets.is_empty());
        edges
    }

    /// Every edge the provisioning engine will honour: explicit plus token references.
    pub fn all_edges(&self) -> BTreeMap<String, BTreeSet<String>> {
        let mut edges = self.explicit_depends_on();
        for (_, resource) in self.resources() {
            let entry = edges.entry(resource.logical_id.clone()).or_default();
            for reference in references_in(&resource.properties) {
                if reference != resource.logical_id {
                    entry.insert(reference);
                }
            }
        }
        edges
    }

    /// Deterministic creation order; fails on unknown references or cycles.
    pub fn creation_order(&self) -> Result<Vec<String>, ValidationError> {
        let known: BTreeSet<String> = self
            .resources()
            .map(|(_, resource)| resource.logical_id.clone())
            .collect();
        let edges = self.all_edges();

        let mut pending: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for id in &known {
            let deps = edges.get(id).cloned().unwrap_or_default();
            if let Some(missing) = deps.iter().find(|dep| !known.contains(*dep)) {
                return Err(ValidationError::new(format!(
                    "resource '{id}' references unknown resource '{missing}'"
                )));
            }
            pending.insert(id.clone(), deps);
        }

        let mut order = Vec::with_capacity(pending.len());
        while !pending.is_empty() {
            let ready: Vec<String> = pending
                .iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(id, _)| id.clone())
                .collect();
            if ready.is_empty() {
                let blocked: Vec<&str> = pending.keys().map(String::as_str).collect();
                return Err(ValidationError::new(format!(
                    "dependency cycle between resources: {}",
                    blocked.join(", ")
                )));
            }
            for id in &ready {
                pending.remove(id);
            }
            for deps in pending.values_mut() {
                for id in &ready {
                    deps.remove(id);
                }
            }
            order.extend(ready);
        }
        Ok(order)
    }

    fn path_components(&self, id: NodeId) -> Vec<&str> {
        let mut components = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = &self.nodes[node_id.0];
            if node.parent.is_some() {
                components.push(node.id.as_str());
            }
            current = node.parent;
        }
        components.reverse();
        components
    }
}

/// Builds a logical id from the path below the stack: readable alphanumeric
/// prefix plus a digest of the full path.
pub fn allocate_logical_id(components: &[&str]) -> String {
    let digest = Sha256::digest(components.join("/").as_bytes());
    let hash: String = format!("{digest:x}")
        .chars()
        .take(HASH_LEN)
        .collect::<String>()
        .to_uppercase();

    let readable_components = match components.split_last() {
        Some((last, rest)) if *last == DEFAULT_RESOURCE_ID && !rest.is_empty() => rest,
        _ => components,
    };
    let human: String = readable_components
        .iter()
        .flat_map(|component| component.chars())
        .filter(char::is_ascii_alphanumeric)
        .take(MAX_HUMAN_LEN)
        .collect();

    format!("{human}{hash}")
}

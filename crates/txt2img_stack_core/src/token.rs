//! Deferred references.
//!
//! Values such as an endpoint name or a role ARN only exist once the
//! provisioning engine has created the resource. A [`Token`] holds such a
//! value symbolically and serializes to the matching CloudFormation
//! intrinsic function.

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_json::Value;

pub const PSEUDO_PARAMETER_PREFIX: &str = "AWS::";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Literal(String),
    /// `{"Ref": logical_id}`; also used for pseudo parameters such as `AWS::Partition`.
    Ref(String),
    GetAtt {
        logical_id: String,
        attribute: String,
    },
    Join {
        delimiter: String,
        parts: Vec<Token>,
    },
}

impl Token {
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    pub fn reference(logical_id: impl Into<String>) -> Self {
        Self::Ref(logical_id.into())
    }

    pub fn attribute(logical_id: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::GetAtt {
            logical_id: logical_id.into(),
            attribute: attribute.into(),
        }
    }

    pub fn join(delimiter: impl Into<String>, parts: Vec<Token>) -> Self {
        Self::Join {
            delimiter: delimiter.into(),
            parts,
        }
    }

    pub fn partition() -> Self {
        Self::Ref(format!("{PSEUDO_PARAMETER_PREFIX}Partition"))
    }

    /// True when the value is known at assembly time.
    pub fn is_resolved(&self) -> bool {
        match self {
            Self::Literal(_) => true,
            Self::Ref(_) | Self::GetAtt { .. } => false,
            Self::Join { parts, .. } => parts.iter().all(Token::is_resolved),
        }
    }

    /// Resolves fully literal tokens, joining where needed.
    pub fn as_resolved(&self) -> Option<String> {
        match self {
            Self::Literal(value) => Some(value.clone()),
            Self::Ref(_) | Self::GetAtt { .. } => None,
            Self::Join { delimiter, parts } => parts
                .iter()
                .map(Token::as_resolved)
                .collect::<Option<Vec<_>>>()
                .map(|resolved| resolved.join(delimiter)),
        }
    }

    /// Logical ids of resources this token depends on. Pseudo parameters are skipped.
    pub fn referenced_logical_ids(&self) -> Vec<&str> {
        let mut ids = Vec::new();
        self.collect_references(&mut ids);
        ids
    }

    fn collect_references<'a>(&'a self, ids: &mut Vec<&'a str>) {
        match self {
            Self::Literal(_) => {}
            Self::Ref(id) => {
                if !id.starts_with(PSEUDO_PARAMETER_PREFIX) {
                    ids.push(id);
                }
            }
            Self::GetAtt { logical_id, .. } => ids.push(logical_id),
            Self::Join { parts, .. } => {
                for part in parts {
                    part.collect_references(ids);
                }
            }
        }
    }
}

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Self::literal(value)
    }
}

impl From<String> for Token {
    fn from(value: String) -> Self {
        Self::Literal(value)
    }
}

impl Serialize for Token {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Literal(value) => serializer.serialize_str(value),
            Self::Ref(id) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("Ref", id)?;
                map.end()
            }
            Self::GetAtt {
                logical_id,
                attribute,
            } => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("Fn::GetAtt", &[logical_id, attribute])?;
                map.end()
            }
            Self::Join { delimiter, parts } => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("Fn::Join", &JoinArgs { delimiter, parts })?;
                map.end()
            }
        }
    }
}

struct JoinArgs<'a> {
    delimiter: &'a str,
    parts: &'a [Token],
}

impl Serialize for JoinArgs<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(2))?;
        seq.serialize_element(self.delimiter)?;
        seq.serialize_element(self.parts)?;
        seq.end()
    }
}

/// Finds resource references (`Ref` / `Fn::GetAtt`) anywhere in a synthesized property bag.
pub fn references_in(value: &Value) -> Vec<String> {
    let mut ids = Vec::new();
    walk_references(value, &mut ids);
    ids
}

fn walk_references(value: &Value, ids: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(Value::String(id)) = map.get("Ref") {
                    if !id.starts_with(PSEUDO_PARAMETER_PREFIX) {
                        ids.push(id.clone());
                    }
                    return;
                }
                if let Some(Value::Array(args)) = map.get("Fn::GetAtt") {
                    if let Some(Value::String(id)) = args.first() {
                        ids.push(id.clone());
                    }
                    return;
                }
            }
            for nested in map.values() {
                walk_references(nested, ids);
            }
        }
        Value::Array(items) => {
            for item in items {
                walk_references(item, ids);
            }
        }
        _ => {}
    }
}

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const ENDPOINT_PARAMETER_NAME: &str = "txt2img_sm_endpoint";
pub const INSTANCE_COUNT_CONTEXT_KEY: &str = "instance_count_param";
pub const DEFAULT_INSTANCE_COUNT: u32 = 1;
pub const DEFAULT_STACK_NAME: &str = "Txt2ImgSagemakerStack";
pub const MAX_STACK_NAME_LEN: usize = 128;

/// Deployment context values, keyed the same way as `cdk.json` context.
pub type DeploymentContext = BTreeMap<String, String>;

/// Model artifact and hosting metadata supplied by the caller.
///
/// Values are passed through verbatim; emptiness or malformed references are
/// reported by the provisioning engine when the template is applied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelInfo {
    pub model_bucket_name: String,
    pub model_bucket_key: String,
    pub model_docker_image: String,
    pub instance_type: String,
    pub region_name: String,
}

/// Stack-level knobs resolved from the deployment context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackConfig {
    /// Number of hosting instances behind the single traffic variant.
    pub instance_count: u32,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            instance_count: DEFAULT_INSTANCE_COUNT,
        }
    }
}

impl StackConfig {
    pub fn from_context(context: &DeploymentContext) -> Self {
        Self {
            instance_count: resolve_instance_count(
                context.get(INSTANCE_COUNT_CONTEXT_KEY).map(String::as_str),
            ),
        }
    }
}

/// Parses the instance count context value.
///
/// Absent, blank, non-numeric and non-positive values all resolve to
/// [`DEFAULT_INSTANCE_COUNT`].
pub fn resolve_instance_count(raw: Option<&str>) -> u32 {
    raw.map(str::trim)
        .and_then(|value| value.parse::<u32>().ok())
        .filter(|count| *count > 0)
        .unwrap_or(DEFAULT_INSTANCE_COUNT)
}

/// Stack names must start with a letter and contain only letters, digits and hyphens.
pub fn validate_stack_name(name: &str) -> Result<(), ValidationError> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(ValidationError::new("stack name cannot be empty"));
    };
    if name.len() > MAX_STACK_NAME_LEN {
        return Err(ValidationError::new(format!(
            "stack name '{name}' exceeds {MAX_STACK_NAME_LEN} characters"
        )));
    }
    if !first.is_ascii_alphabetic()
        || !chars.all(|c| c.is_ascii_alphanumeric() || c == '-')
    {
        return Err(ValidationError::new(format!(
            "stack name '{name}' must match ^[A-Za-z][A-Za-z0-9-]*$"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ValidationError {}

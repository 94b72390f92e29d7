//! Declarative assembly of the txt2img SageMaker hosting stack.
//!
//! This crate builds the construct graph (execution role, inline policies,
//! SageMaker model/config/endpoint, shared SSM parameter) and synthesizes it
//! into a CloudFormation template. It never calls AWS: provisioning belongs
//! to whatever engine consumes the template.

pub mod construct;
pub mod contract;
pub mod iam;
pub mod logging;
pub mod sagemaker;
pub mod ssm;
pub mod stack;
pub mod template;
pub mod token;

pub use contract::{DeploymentContext, ModelInfo, StackConfig, ValidationError};
pub use stack::Txt2ImgStack;
pub use template::{synthesize, CloudFormationTemplate};
pub use token::Token;

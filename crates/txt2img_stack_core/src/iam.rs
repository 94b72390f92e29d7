//! Execution role and the inline deployment policies attached to it.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::json;

use crate::construct::{ConstructGraph, NodeId};
use crate::contract::ValidationError;
use crate::token::Token;

pub const SAGEMAKER_SERVICE_PRINCIPAL: &str = "sagemaker.amazonaws.com";
pub const EXECUTION_ROLE_ID: &str = "Gen-AI-SageMaker-Policy";
pub const S3_FULL_ACCESS_POLICY: &str = "AmazonS3FullAccess";
pub const POLICY_DOCUMENT_VERSION: &str = "2012-10-17";
pub const WILDCARD_RESOURCE: &str = "*";

const ROLE_RESOURCE_TYPE: &str = "AWS::IAM::Role";
const POLICY_RESOURCE_TYPE: &str = "AWS::IAM::Policy";
const RESOURCE_ID: &str = "Resource";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Effect {
    Allow,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePrincipal(String);

impl ServicePrincipal {
    pub fn new(service: impl Into<String>) -> Self {
        Self(service.into())
    }

    pub fn service(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyStatement {
    pub effect: Effect,
    pub actions: Vec<String>,
    pub resources: Vec<String>,
    pub principal: Option<ServicePrincipal>,
}

impl PolicyStatement {
    pub fn allow<A, R>(actions: A, resources: R) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        Self {
            effect: Effect::Allow,
            actions: actions.into_iter().map(Into::into).collect(),
            resources: resources.into_iter().map(Into::into).collect(),
            principal: None,
        }
    }

    fn assume_role_by(principal: &ServicePrincipal) -> Self {
        Self {
            effect: Effect::Allow,
            actions: vec!["sts:AssumeRole".to_string()],
            resources: Vec::new(),
            principal: Some(principal.clone()),
        }
    }

    /// True when the statement grants on every resource.
    pub fn is_wildcard_scoped(&self) -> bool {
        self.resources.iter().any(|resource| resource == WILDCARD_RESOURCE)
    }
}

impl Serialize for PolicyStatement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("Action", &OneOrMany(&self.actions))?;
        map.serialize_entry("Effect", &self.effect)?;
        if let Some(principal) = &self.principal {
            map.serialize_entry("Principal", &json!({ "Service": principal.service() }))?;
        }
        if !self.resources.is_empty() {
            map.serialize_entry("Resource", &OneOrMany(&self.resources))?;
        }
        map.end()
    }
}

/// Single values serialize as a scalar, several as a list.
struct OneOrMany<'a>(&'a [String]);

impl Serialize for OneOrMany<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            [single] => serializer.serialize_str(single),
            many => many.serialize(serializer),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyDocument {
    #[serde(rename = "Statement")]
    pub statements: Vec<PolicyStatement>,
    #[serde(rename = "Version")]
    pub version: &'static str,
}

impl PolicyDocument {
    pub fn new(statements: Vec<PolicyStatement>) -> Self {
        Self {
            statements,
            version: POLICY_DOCUMENT_VERSION,
        }
    }
}

/// The three single-purpose inline policies the hosting role carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PolicyKind {
    Sts,
    Logs,
    Ecr,
}

impl PolicyKind {
    pub const ALL: [PolicyKind; 3] = [Self::Sts, Self::Logs, Self::Ecr];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sts => "sts-policy",
            Self::Logs => "logs-policy",
            Self::Ecr => "ecr-policy",
        }
    }

    pub fn construct_id(self) -> &'static str {
        match self {
            Self::Sts => "sm-deploy-policy-sts",
            Self::Logs => "sm-deploy-policy-logs",
            Self::Ecr => "sm-deploy-policy-ecr",
        }
    }

    pub fn actions(self) -> &'static [&'static str] {
        match self {
            Self::Sts => &["sts:AssumeRole"],
            Self::Logs => &[
                "cloudwatch:PutMetricData",
                "logs:CreateLogStream",
                "logs:PutLogEvents",
                "logs:CreateLogGroup",
                "logs:DescribeLogStreams",
                "ecr:GetAuthorizationToken",
            ],
            Self::Ecr => &["ecr:*"],
        }
    }

    // Every kind is scoped to all resources.
    pub fn statement(self) -> PolicyStatement {
        PolicyStatement::allow(self.actions().iter().copied(), [WILDCARD_RESOURCE])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedPolicy {
    name: String,
}

impl ManagedPolicy {
    pub fn aws_managed(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arn(&self) -> Token {
        Token::join(
            "",
            vec![
                Token::literal("arn:"),
                Token::partition(),
                Token::literal(format!(":iam::aws:policy/{}", self.name)),
            ],
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRole {
    pub node: NodeId,
    pub resource: NodeId,
    pub logical_id: String,
    pub assumed_by: ServicePrincipal,
    pub managed_policies: Vec<ManagedPolicy>,
    pub inline_policies: Vec<PolicyKind>,
}

impl ExecutionRole {
    pub fn arn(&self) -> Token {
        Token::attribute(&self.logical_id, "Arn")
    }

    pub fn name_ref(&self) -> Token {
        Token::reference(&self.logical_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InlinePolicy {
    pub kind: PolicyKind,
    pub node: NodeId,
    pub logical_id: String,
    pub document: PolicyDocument,
}

#[derive(Debug, Clone)]
pub struct ExecutionRoleBuilder {
    id: String,
    assumed_by: ServicePrincipal,
    managed_policies: Vec<ManagedPolicy>,
}

impl ExecutionRoleBuilder {
    pub fn new(id: impl Into<String>, assumed_by: ServicePrincipal) -> Self {
        Self {
            id: id.into(),
            assumed_by,
            managed_policies: Vec::new(),
        }
    }

    pub fn managed_policy(mut self, policy: ManagedPolicy) -> Self {
        if !self.managed_policies.contains(&policy) {
            self.managed_policies.push(policy);
        }
        self
    }

    pub fn build(
        self,
        graph: &mut ConstructGraph,
        scope: NodeId,
    ) -> Result<ExecutionRole, ValidationError> {
        let trust = PolicyDocument::new(vec![PolicyStatement::assume_role_by(&self.assumed_by)]);
        let managed_arns: Vec<Token> = self.managed_policies.iter().map(ManagedPolicy::arn).collect();
        let properties = json!({
            "AssumeRolePolicyDocument": trust,
            "ManagedPolicyArns": managed_arns,
        });

        let node = graph.add_construct(scope, self.id)?;
        let resource = graph.add_resource(node, RESOURCE_ID, ROLE_RESOURCE_TYPE, properties)?;
        let logical_id = graph
            .logical_id(resource)
            .ok_or_else(|| ValidationError::new("role resource has no logical id"))?
            .to_string();

        Ok(ExecutionRole {
            node,
            resource,
            logical_id,
            assumed_by: self.assumed_by,
            managed_policies: self.managed_policies,
            inline_policies: Vec::new(),
        })
    }
}

/// Creates an `AWS::IAM::Policy` for `kind` and attaches it to `role`.
pub fn attach_inline_policy(
    graph: &mut ConstructGraph,
    scope: NodeId,
    role: &mut ExecutionRole,
    kind: PolicyKind,
) -> Result<InlinePolicy, ValidationError> {
    if role.inline_policies.contains(&kind) {
        return Err(ValidationError::new(format!(
            "{} is already attached to the execution role",
            kind.as_str()
        )));
    }

    let node = graph.add_construct(scope, kind.construct_id())?;
    let resource = graph.add_resource(node, RESOURCE_ID, POLICY_RESOURCE_TYPE, json!({}))?;
    let logical_id = graph
        .logical_id(resource)
        .ok_or_else(|| ValidationError::new("policy resource has no logical id"))?
        .to_string();

    let document = PolicyDocument::new(vec![kind.statement()]);
    graph.set_properties(
        resource,
        json!({
            "PolicyDocument": document,
            "PolicyName": logical_id,
            "Roles": [role.name_ref()],
        }),
    )?;
    role.inline_policies.push(kind);

    Ok(InlinePolicy {
        kind,
        node,
        logical_id,
        document,
    })
}

/// Output of the policy builder: the role plus its three inline policies.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentPermissions {
    pub role: ExecutionRole,
    pub policies: Vec<InlinePolicy>,
}

impl DeploymentPermissions {
    pub fn policy(&self, kind: PolicyKind) -> Option<&InlinePolicy> {
        self.policies.iter().find(|policy| policy.kind == kind)
    }

    pub fn policy_nodes(&self) -> Vec<NodeId> {
        self.policies.iter().map(|policy| policy.node).collect()
    }
}

/// Builds the SageMaker execution role with S3 full access and the sts/logs/ecr inline policies.
pub fn build_deployment_permissions(
    graph: &mut ConstructGraph,
    scope: NodeId,
) -> Result<DeploymentPermissions, ValidationError> {
    let mut role = ExecutionRoleBuilder::new(
        EXECUTION_ROLE_ID,
        ServicePrincipal::new(SAGEMAKER_SERVICE_PRINCIPAL),
    )
    .managed_policy(ManagedPolicy::aws_managed(S3_FULL_ACCESS_POLICY))
    .build(graph, scope)?;

    let mut policies = Vec::with_capacity(PolicyKind::ALL.len());
    for kind in PolicyKind::ALL {
        policies.push(attach_inline_policy(graph, scope, &mut role, kind)?);
    }

    Ok(DeploymentPermissions { role, policies })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn permissions() -> (ConstructGraph, DeploymentPermissions) {
        let mut graph = ConstructGraph::new("TestStack");
        let root = graph.root();
        let permissions = build_deployment_permissions(&mut graph, root).expect("permissions");
        (graph, permissions)
    }

    #[test]
    fn role_trusts_only_sagemaker() {
        let (graph, permissions) = permissions();
        assert_eq!(permissions.role.assumed_by.service(), SAGEMAKER_SERVICE_PRINCIPAL);

        let role = graph
            .node(permissions.role.resource)
            .resource
            .as_ref()
            .expect("role resource");
        assert_eq!(role.resource_type, "AWS::IAM::Role");
        assert_eq!(
            role.properties["AssumeRolePolicyDocument"],
            json!({
                "Statement": [{
                    "Action": "sts:AssumeRole",
                    "Effect": "Allow",
                    "Principal": {"Service": "sagemaker.amazonaws.com"}
                }],
                "Version": "2012-10-17"
            })
        );
    }

    #[test]
    fn role_carries_one_managed_and_three_inline_policies() {
        let (_, permissions) = permissions();
        let managed: Vec<&str> = permissions
            .role
            .managed_policies
            .iter()
            .map(ManagedPolicy::name)
            .collect();
        assert_eq!(managed, vec![S3_FULL_ACCESS_POLICY]);
        assert_eq!(permissions.role.inline_policies, PolicyKind::ALL.to_vec());
        assert_eq!(permissions.policies.len(), 3);
    }

    // Least-privilege violation kept on purpose: all three grants are wildcard-scoped.
    #[test]
    fn inline_policies_are_wildcard_scoped() {
        let (_, permissions) = permissions();
        for policy in &permissions.policies {
            assert_eq!(policy.document.statements.len(), 1);
            let statement = &policy.document.statements[0];
            assert_eq!(statement.effect, Effect::Allow);
            assert!(statement.is_wildcard_scoped(), "{}", policy.kind.as_str());
        }

        let ecr = permissions.policy(PolicyKind::Ecr).expect("ecr policy");
        assert_eq!(ecr.document.statements[0].actions, vec!["ecr:*"]);
    }

    #[test]
    fn logs_policy_includes_registry_auth() {
        let (graph, permissions) = permissions();
        let logs = permissions.policy(PolicyKind::Logs).expect("logs policy");
        let actions = &logs.document.statements[0].actions;
        assert_eq!(actions.len(), 6);
        assert!(actions.iter().any(|action| action == "ecr:GetAuthorizationToken"));

        let node = graph.find("TestStack/sm-deploy-policy-logs/Resource").expect("node");
        let resource = graph.node(node).resource.as_ref().expect("resource");
        assert_eq!(resource.properties["PolicyName"], json!(logs.logical_id));
        assert_eq!(
            resource.properties["Roles"],
            json!([{"Ref": permissions.role.logical_id}])
        );
        assert_eq!(
            resource.properties["PolicyDocument"]["Statement"][0]["Resource"],
            json!("*")
        );
    }

    #[test]
    fn attaching_the_same_policy_twice_fails() {
        let (mut graph, mut permissions) = permissions();
        let root = graph.root();
        let error = attach_inline_policy(&mut graph, root, &mut permissions.role, PolicyKind::Sts)
            .expect_err("duplicate attachment should fail");
        assert!(error.message().contains("sts-policy"));
    }
}

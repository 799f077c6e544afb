//! IAM policy statements, documents and roles.

use serde::{Serialize, Serializer};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

use crate::graph::{Construct, ConstructKind};
use crate::{CfnResource, ConstructPath, LogicalId, Result, Token};

pub const POLICY_VERSION: &str = "2012-10-17";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Effect {
    Allow,
    Deny,
}

/// Who a statement applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// Anyone (`{"AWS": "*"}`).
    Any,
    /// An AWS service, e.g. `lambda.amazonaws.com`.
    Service(String),
}

impl Principal {
    pub fn service(name: impl Into<String>) -> Self {
        Principal::Service(name.into())
    }

    fn key(&self) -> &'static str {
        match self {
            Principal::Any => "AWS",
            Principal::Service(_) => "Service",
        }
    }

    fn value(&self) -> &str {
        match self {
            Principal::Any => "*",
            Principal::Service(s) => s,
        }
    }
}

/// A single IAM policy statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyStatement {
    pub effect: Effect,
    pub actions: Vec<String>,
    pub principals: Vec<Principal>,
    pub resources: Vec<Token>,
    /// operator -> condition key -> values
    pub conditions: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl PolicyStatement {
    pub fn allow() -> Self {
        Self {
            effect: Effect::Allow,
            actions: Vec::new(),
            principals: Vec::new(),
            resources: Vec::new(),
            conditions: BTreeMap::new(),
        }
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.actions.push(action.into());
        self
    }

    pub fn actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actions.extend(actions.into_iter().map(Into::into));
        self
    }

    pub fn principal(mut self, principal: Principal) -> Self {
        self.principals.push(principal);
        self
    }

    pub fn resource(mut self, resource: Token) -> Self {
        self.resources.push(resource);
        self
    }

    pub fn condition<I, S>(mut self, operator: &str, key: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.conditions
            .entry(operator.to_string())
            .or_default()
            .entry(key.to_string())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    /// Values of `operator`/`key`, if the condition is present.
    pub fn condition_values(&self, operator: &str, key: &str) -> Option<&[String]> {
        self.conditions
            .get(operator)
            .and_then(|keys| keys.get(key))
            .map(Vec::as_slice)
    }
}

/// Lists of one element collapse to a scalar in policy JSON.
fn one_or_many<T: Serialize>(items: &[T]) -> Value {
    match items {
        [single] => json!(single),
        many => json!(many),
    }
}

impl Serialize for PolicyStatement {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut out = Map::new();
        out.insert("Action".to_string(), one_or_many(&self.actions));
        if !self.conditions.is_empty() {
            out.insert("Condition".to_string(), json!(self.conditions));
        }
        out.insert("Effect".to_string(), json!(self.effect));

        let mut principal: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for p in &self.principals {
            let values = principal.entry(p.key()).or_default();
            if !values.contains(&p.value()) {
                values.push(p.value());
            }
        }
        if !principal.is_empty() {
            let principal: Map<String, Value> = principal
                .into_iter()
                .map(|(k, v)| (k.to_string(), one_or_many(&v)))
                .collect();
            out.insert("Principal".to_string(), Value::Object(principal));
        }

        if !self.resources.is_empty() {
            out.insert("Resource".to_string(), one_or_many(&self.resources));
        }
        Value::Object(out).serialize(serializer)
    }
}

/// A policy document (`Statement` + `Version`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyDocument {
    pub statements: Vec<PolicyStatement>,
}

impl PolicyDocument {
    pub fn new(statements: Vec<PolicyStatement>) -> Self {
        Self { statements }
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

impl Serialize for PolicyDocument {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        json!({
            "Statement": self.statements,
            "Version": POLICY_VERSION,
        })
        .serialize(serializer)
    }
}

/// AWS managed policy reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedPolicy {
    pub name: String,
}

impl ManagedPolicy {
    pub fn aws_managed(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn arn(&self) -> Token {
        Token::arn(
            "iam",
            vec![Token::Literal(format!("aws:policy/{}", self.name))],
            false,
        )
    }
}

/// An IAM role plus the default inline policy holding granted statements.
#[derive(Debug, Clone, PartialEq)]
pub struct Role {
    pub path: ConstructPath,
    pub assumed_by: Principal,
    pub managed_policies: Vec<ManagedPolicy>,
    pub statements: Vec<PolicyStatement>,
}

impl Role {
    pub fn new(path: ConstructPath, assumed_by: Principal) -> Self {
        Self {
            path,
            assumed_by,
            managed_policies: Vec::new(),
            statements: Vec::new(),
        }
    }

    pub fn with_managed_policy(mut self, policy: ManagedPolicy) -> Self {
        self.managed_policies.push(policy);
        self
    }

    pub fn with_statement(mut self, statement: PolicyStatement) -> Self {
        self.statements.push(statement);
        self
    }

    pub fn with_statements(mut self, statements: impl IntoIterator<Item = PolicyStatement>) -> Self {
        self.statements.extend(statements);
        self
    }

    pub fn logical_id(&self) -> LogicalId {
        self.path.resource().logical_id()
    }

    pub fn arn(&self) -> Token {
        Token::get_att(&self.logical_id(), "Arn")
    }

    fn policy_path(&self) -> ConstructPath {
        self.path.child("DefaultPolicy").resource()
    }

    /// Logical id of the default policy, present only when statements were granted.
    pub fn default_policy_id(&self) -> Option<LogicalId> {
        (!self.statements.is_empty()).then(|| self.policy_path().logical_id())
    }

    pub(crate) fn render_resources(&self) -> Vec<CfnResource> {
        let assume = PolicyStatement::allow()
            .action("sts:AssumeRole")
            .principal(self.assumed_by.clone());
        let mut properties = json!({
            "AssumeRolePolicyDocument": PolicyDocument::new(vec![assume]),
        });
        if !self.managed_policies.is_empty() {
            let arns: Vec<Token> = self.managed_policies.iter().map(ManagedPolicy::arn).collect();
            properties["ManagedPolicyArns"] = json!(arns);
        }

        let mut resources = vec![CfnResource::new(
            self.path.resource(),
            "AWS::IAM::Role",
            properties,
        )];

        if !self.statements.is_empty() {
            let policy_path = self.policy_path();
            let policy_id = policy_path.logical_id();
            resources.push(CfnResource::new(
                policy_path,
                "AWS::IAM::Policy",
                json!({
                    "PolicyDocument": PolicyDocument::new(self.statements.clone()),
                    "PolicyName": policy_id.as_str(),
                    "Roles": [Token::Ref(self.logical_id())],
                }),
            ));
        }

        resources
    }
}

impl Construct for Role {
    fn kind(&self) -> ConstructKind {
        ConstructKind::Role
    }

    fn path(&self) -> &ConstructPath {
        &self.path
    }

    fn render(&self) -> Result<Vec<CfnResource>> {
        Ok(self.render_resources())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_json_collapses_single_values() {
        let statement = PolicyStatement::allow()
            .action("s3:GetObject")
            .principal(Principal::Any)
            .resource(Token::literal("arn:aws:s3:::example/*"))
            .condition("IpAddress", "aws:SourceIp", ["10.0.0.0/8", "192.168.0.0/16"]);

        assert_eq!(
            serde_json::to_value(&statement).unwrap(),
            json!({
                "Action": "s3:GetObject",
                "Condition": {"IpAddress": {"aws:SourceIp": ["10.0.0.0/8", "192.168.0.0/16"]}},
                "Effect": "Allow",
                "Principal": {"AWS": "*"},
                "Resource": "arn:aws:s3:::example/*",
            })
        );
    }

    #[test]
    fn test_statement_without_principal_or_condition() {
        let statement = PolicyStatement::allow()
            .actions(["dynamodb:PutItem", "dynamodb:UpdateItem"])
            .resource(Token::literal("arn"));
        let value = serde_json::to_value(&statement).unwrap();
        assert!(value.get("Principal").is_none());
        assert!(value.get("Condition").is_none());
        assert_eq!(value["Action"], json!(["dynamodb:PutItem", "dynamodb:UpdateItem"]));
    }

    #[test]
    fn test_role_renders_default_policy_only_when_granted() {
        let role = Role::new(ConstructPath::root("pipelineRole"), Principal::service("codebuild.amazonaws.com"))
            .with_managed_policy(ManagedPolicy::aws_managed("AmazonS3FullAccess"));
        let resources = role.render_resources();
        assert_eq!(resources.len(), 1);
        assert_eq!(
            resources[0].property("/AssumeRolePolicyDocument/Statement/0/Principal/Service"),
            Some(&json!("codebuild.amazonaws.com"))
        );
        assert!(role.default_policy_id().is_none());

        let role = role.with_statement(PolicyStatement::allow().action("logs:PutLogEvents").resource(Token::literal("*")));
        let resources = role.render_resources();
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[1].resource_type, "AWS::IAM::Policy");
        assert_eq!(Some(resources[1].logical_id.clone()), role.default_policy_id());
        assert!(resources[1].references().contains(role.logical_id().as_str()));
    }
}

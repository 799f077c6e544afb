//! Stateless compute function descriptor.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

use crate::asset::FileAsset;
use crate::graph::{Construct, ConstructKind};
use crate::iam::{ManagedPolicy, PolicyStatement, Principal, Role};
use crate::{CfnResource, ConstructPath, Error, LogicalId, Result, Token};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Runtime {
    #[serde(rename = "nodejs14.x")]
    Nodejs14x,
    #[serde(rename = "nodejs16.x")]
    Nodejs16x,
    #[serde(rename = "nodejs18.x")]
    Nodejs18x,
    #[serde(rename = "nodejs20.x")]
    Nodejs20x,
    #[serde(rename = "python3.9")]
    Python39,
    #[serde(rename = "python3.11")]
    Python311,
    #[serde(rename = "python3.12")]
    Python312,
    #[serde(rename = "provided.al2023")]
    ProvidedAl2023,
}

impl Runtime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Runtime::Nodejs14x => "nodejs14.x",
            Runtime::Nodejs16x => "nodejs16.x",
            Runtime::Nodejs18x => "nodejs18.x",
            Runtime::Nodejs20x => "nodejs20.x",
            Runtime::Python39 => "python3.9",
            Runtime::Python311 => "python3.11",
            Runtime::Python312 => "python3.12",
            Runtime::ProvidedAl2023 => "provided.al2023",
        }
    }
}

impl std::fmt::Display for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Runtime {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        [
            Runtime::Nodejs14x,
            Runtime::Nodejs16x,
            Runtime::Nodejs18x,
            Runtime::Nodejs20x,
            Runtime::Python39,
            Runtime::Python311,
            Runtime::Python312,
            Runtime::ProvidedAl2023,
        ]
        .into_iter()
        .find(|r| r.as_str() == s)
        .ok_or_else(|| Error::InvalidInput(format!("unknown runtime: {s}")))
    }
}

/// Where the function code comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Code {
    Asset(FileAsset),
    /// Source embedded in the template (small handlers only).
    Inline(String),
}

/// A Lambda function with its execution role.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub path: ConstructPath,
    pub runtime: Runtime,
    pub handler: String,
    pub code: Code,
    pub environment: BTreeMap<String, Token>,
    /// Statements granted to the execution role.
    pub statements: Vec<PolicyStatement>,
    pub timeout_seconds: Option<u32>,
    pub memory_size: Option<u32>,
}

impl Function {
    pub fn new(id: &str, runtime: Runtime, handler: impl Into<String>, code: Code) -> Self {
        Self::at(ConstructPath::root(id), runtime, handler, code)
    }

    /// Create a function at an arbitrary construct path.
    pub fn at(path: ConstructPath, runtime: Runtime, handler: impl Into<String>, code: Code) -> Self {
        Self {
            path,
            runtime,
            handler: handler.into(),
            code,
            environment: BTreeMap::new(),
            statements: Vec::new(),
            timeout_seconds: None,
            memory_size: None,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: Token) -> Self {
        self.environment.insert(key.into(), value);
        self
    }

    pub fn with_statement(mut self, statement: PolicyStatement) -> Self {
        self.statements.push(statement);
        self
    }

    pub fn with_timeout(mut self, seconds: u32) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn with_memory_size(mut self, megabytes: u32) -> Self {
        self.memory_size = Some(megabytes);
        self
    }

    pub fn logical_id(&self) -> LogicalId {
        self.path.resource().logical_id()
    }

    pub fn function_arn(&self) -> Token {
        Token::get_att(&self.logical_id(), "Arn")
    }

    /// Execution role, carrying the basic logging policy and every granted statement.
    pub fn role(&self) -> Role {
        Role::new(
            self.path.child("ServiceRole"),
            Principal::service("lambda.amazonaws.com"),
        )
        .with_managed_policy(ManagedPolicy::aws_managed(
            "service-role/AWSLambdaBasicExecutionRole",
        ))
        .with_statements(self.statements.iter().cloned())
    }

    pub(crate) fn render_resources(&self) -> Vec<CfnResource> {
        let role = self.role();
        let mut resources = role.render_resources();

        let code = match &self.code {
            Code::Asset(asset) => json!({
                "S3Bucket": FileAsset::bucket_name(),
                "S3Key": asset.object_key(),
            }),
            Code::Inline(source) => json!({ "ZipFile": source }),
        };

        let mut properties = json!({
            "Code": code,
            "Handler": self.handler,
            "Role": role.arn(),
            "Runtime": self.runtime.as_str(),
        });
        if !self.environment.is_empty() {
            properties["Environment"] = json!({ "Variables": self.environment });
        }
        if let Some(timeout) = self.timeout_seconds {
            properties["Timeout"] = json!(timeout);
        }
        if let Some(memory) = self.memory_size {
            properties["MemorySize"] = json!(memory);
        }

        let mut function =
            CfnResource::new(self.path.resource(), "AWS::Lambda::Function", properties);
        if let Some(policy_id) = role.default_policy_id() {
            function = function.depends_on(policy_id);
        }
        resources.push(function.depends_on(role.logical_id()));
        resources
    }
}

impl Construct for Function {
    fn kind(&self) -> ConstructKind {
        ConstructKind::Function
    }

    fn path(&self) -> &ConstructPath {
        &self.path
    }

    fn render(&self) -> Result<Vec<CfnResource>> {
        Ok(self.render_resources())
    }

    fn assets(&self) -> Vec<FileAsset> {
        match &self.code {
            Code::Asset(asset) => vec![asset.clone()],
            Code::Inline(_) => Vec::new(),
        }
    }
}

/// `AWS::Lambda::Permission` letting `principal` invoke `function_arn` from `source_arn`.
pub fn invoke_permission(
    path: ConstructPath,
    function_arn: Token,
    principal: &str,
    source_arn: Token,
) -> CfnResource {
    CfnResource::new(
        path,
        "AWS::Lambda::Permission",
        json!({
            "Action": "lambda:InvokeFunction",
            "FunctionName": function_arn,
            "Principal": principal,
            "SourceArn": source_arn,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::Packaging;
    use std::path::PathBuf;

    fn asset() -> FileAsset {
        FileAsset {
            source_path: PathBuf::from("api"),
            hash: "abc123".to_string(),
            packaging: Packaging::ZipDirectory,
        }
    }

    #[test]
    fn test_render_function_with_role() {
        let f = Function::new("updateTable", Runtime::Nodejs14x, "update.handler", Code::Asset(asset()))
            .with_env("TABLE_NAME", Token::Ref(LogicalId::new("Table1")));
        let resources = f.render().unwrap();

        // role without granted statements: role + function
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0].resource_type, "AWS::IAM::Role");
        let function = &resources[1];
        assert_eq!(function.property("/Runtime"), Some(&json!("nodejs14.x")));
        assert_eq!(function.property("/Code/S3Key"), Some(&json!("abc123.zip")));
        assert_eq!(
            function.property("/Environment/Variables/TABLE_NAME"),
            Some(&json!({"Ref": "Table1"}))
        );
        assert_eq!(function.depends_on, vec![resources[0].logical_id.clone()]);
        assert_eq!(f.assets(), vec![asset()]);
    }

    #[test]
    fn test_granted_statements_land_in_default_policy() {
        let f = Function::new("fn", Runtime::Python312, "index.handler", Code::Inline("pass".into()))
            .with_statement(PolicyStatement::allow().action("s3:GetObject").resource(Token::literal("*")));
        let resources = f.render().unwrap();
        assert_eq!(resources.len(), 3);
        assert_eq!(resources[1].resource_type, "AWS::IAM::Policy");
        assert_eq!(resources[2].depends_on.len(), 2);
        assert_eq!(resources[2].property("/Code/ZipFile"), Some(&json!("pass")));
        assert!(f.assets().is_empty());
    }

    #[test]
    fn test_runtime_parse() {
        assert_eq!("nodejs14.x".parse::<Runtime>().unwrap(), Runtime::Nodejs14x);
        assert!("cobol".parse::<Runtime>().is_err());
    }
}

//! Object store descriptor: a website bucket and its resource policy.

use serde_json::json;

use crate::graph::{Construct, ConstructKind};
use crate::iam::{PolicyDocument, PolicyStatement, Principal};
use crate::{CfnResource, ConstructPath, LogicalId, RemovalPolicy, Result, Token};

/// Condition operator and key used to restrict reads by client address.
pub const SOURCE_IP_OPERATOR: &str = "IpAddress";
pub const SOURCE_IP_KEY: &str = "aws:SourceIp";

/// Who may read objects anonymously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicRead {
    Disabled,
    /// Anyone on the internet.
    Anyone,
    /// Anyone whose source address falls in one of these prefixes.
    SourceIps(Vec<String>),
}

/// Static website hosting settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Website {
    pub index_document: String,
    pub error_document: Option<String>,
}

/// An S3 bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    pub path: ConstructPath,
    pub bucket_name: Option<String>,
    pub website: Option<Website>,
    pub public_read: PublicRead,
    pub removal_policy: RemovalPolicy,
    /// Server-side encryption with S3 managed keys.
    pub encrypted: bool,
    /// Extra statements for the bucket policy.
    pub policy_statements: Vec<PolicyStatement>,
}

impl Bucket {
    pub fn new(id: &str) -> Self {
        Self::at(ConstructPath::root(id))
    }

    pub fn at(path: ConstructPath) -> Self {
        Self {
            path,
            bucket_name: None,
            website: None,
            public_read: PublicRead::Disabled,
            removal_policy: RemovalPolicy::Retain,
            encrypted: false,
            policy_statements: Vec::new(),
        }
    }

    pub fn with_bucket_name(mut self, name: impl Into<String>) -> Self {
        self.bucket_name = Some(name.into());
        self
    }

    pub fn with_website(mut self, website: Website) -> Self {
        self.website = Some(website);
        self
    }

    pub fn with_public_read(mut self, public_read: PublicRead) -> Self {
        self.public_read = public_read;
        self
    }

    pub fn with_removal_policy(mut self, policy: RemovalPolicy) -> Self {
        self.removal_policy = policy;
        self
    }

    pub fn with_encryption(mut self) -> Self {
        self.encrypted = true;
        self
    }

    pub fn with_policy_statement(mut self, statement: PolicyStatement) -> Self {
        self.policy_statements.push(statement);
        self
    }

    pub fn logical_id(&self) -> LogicalId {
        self.path.resource().logical_id()
    }

    pub fn bucket_ref(&self) -> Token {
        Token::Ref(self.logical_id())
    }

    pub fn bucket_arn(&self) -> Token {
        Token::get_att(&self.logical_id(), "Arn")
    }

    /// ARN matching the objects under `pattern`, e.g. `*`.
    pub fn arn_for_objects(&self, pattern: &str) -> Token {
        Token::concat(vec![self.bucket_arn(), Token::Literal(format!("/{pattern}"))])
    }

    /// Every statement of the bucket policy, public-read grant first.
    pub fn resource_policy(&self) -> PolicyDocument {
        let read = || {
            PolicyStatement::allow()
                .action("s3:GetObject")
                .principal(Principal::Any)
                .resource(self.arn_for_objects("*"))
        };
        let mut statements = match &self.public_read {
            PublicRead::Disabled => Vec::new(),
            PublicRead::Anyone => vec![read()],
            PublicRead::SourceIps(prefixes) => {
                vec![read().condition(SOURCE_IP_OPERATOR, SOURCE_IP_KEY, prefixes.iter().cloned())]
            }
        };
        statements.extend(self.policy_statements.iter().cloned());
        PolicyDocument::new(statements)
    }

    fn render_resources(&self) -> Vec<CfnResource> {
        let mut properties = json!({});
        if let Some(name) = &self.bucket_name {
            properties["BucketName"] = json!(name);
        }
        if self.encrypted {
            properties["BucketEncryption"] = json!({
                "ServerSideEncryptionConfiguration": [
                    {"ServerSideEncryptionByDefault": {"SSEAlgorithm": "AES256"}}
                ]
            });
        }
        let public = self.public_read != PublicRead::Disabled;
        properties["PublicAccessBlockConfiguration"] = json!({
            "BlockPublicAcls": !public,
            "BlockPublicPolicy": !public,
            "IgnorePublicAcls": !public,
            "RestrictPublicBuckets": !public,
        });
        if let Some(website) = &self.website {
            let mut config = json!({"IndexDocument": website.index_document});
            if let Some(error) = &website.error_document {
                config["ErrorDocument"] = json!(error);
            }
            properties["WebsiteConfiguration"] = config;
        }

        let mut resources = vec![
            CfnResource::new(self.path.resource(), "AWS::S3::Bucket", properties)
                .with_removal_policy(Some(self.removal_policy)),
        ];

        let policy = self.resource_policy();
        if !policy.is_empty() {
            resources.push(CfnResource::new(
                self.path.child("Policy").resource(),
                "AWS::S3::BucketPolicy",
                json!({
                    "Bucket": self.bucket_ref(),
                    "PolicyDocument": policy,
                }),
            ));
        }

        resources
    }
}

impl Construct for Bucket {
    fn kind(&self) -> ConstructKind {
        ConstructKind::Bucket
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

    fn site_bucket(public_read: PublicRead) -> Bucket {
        Bucket::new("siteBucket")
            .with_bucket_name("example.dev")
            .with_website(Website {
                index_document: "index.html".to_string(),
                error_document: None,
            })
            .with_public_read(public_read)
            .with_removal_policy(RemovalPolicy::Destroy)
    }

    #[test]
    fn test_private_bucket_has_no_policy() {
        let resources = Bucket::new("private").render().unwrap();
        assert_eq!(resources.len(), 1);
        assert_eq!(
            resources[0].property("/PublicAccessBlockConfiguration/BlockPublicPolicy"),
            Some(&json!(true))
        );
        assert_eq!(resources[0].removal_policy, Some(RemovalPolicy::Retain));
    }

    #[test]
    fn test_source_ip_restricted_read() {
        let bucket = site_bucket(PublicRead::SourceIps(vec![
            "103.21.244.0/22".to_string(),
            "104.16.0.0/13".to_string(),
        ]));
        let resources = bucket.render().unwrap();
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0].property("/BucketName"), Some(&json!("example.dev")));
        assert_eq!(
            resources[0].property("/WebsiteConfiguration/IndexDocument"),
            Some(&json!("index.html"))
        );

        let policy = bucket.resource_policy();
        assert_eq!(policy.statements.len(), 1);
        let statement = &policy.statements[0];
        assert_eq!(statement.actions, vec!["s3:GetObject".to_string()]);
        assert_eq!(
            statement.condition_values(SOURCE_IP_OPERATOR, SOURCE_IP_KEY),
            Some(&["103.21.244.0/22".to_string(), "104.16.0.0/13".to_string()][..])
        );

        let rendered = resources[1].property("/PolicyDocument/Statement/0").unwrap();
        assert_eq!(rendered["Principal"], json!({"AWS": "*"}));
        assert!(resources[1].references().contains(bucket.logical_id().as_str()));
    }

    #[test]
    fn test_unrestricted_read_has_no_condition() {
        let policy = site_bucket(PublicRead::Anyone).resource_policy();
        assert_eq!(policy.statements.len(), 1);
        assert!(policy.statements[0].conditions.is_empty());
    }
}

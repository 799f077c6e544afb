//! One-time content sync of local assets into a bucket.
//!
//! Rendered as a custom resource backed by a small provider function that
//! unpacks each source archive into the destination bucket on create/update.

use serde_json::json;

use crate::asset::FileAsset;
use crate::graph::{Construct, ConstructKind};
use crate::iam::PolicyStatement;
use crate::lambda::{Code, Function, Runtime};
use crate::s3::Bucket;
use crate::{CfnResource, ConstructPath, LogicalId, Result, Token};

pub const RESOURCE_TYPE: &str = "Custom::CDKBucketDeployment";

/// Provider handler source, inlined into the template.
const HANDLER_SOURCE: &str = include_str!("s3_deployment/handler.py");

const READ_ACTIONS: [&str; 3] = ["s3:GetObject*", "s3:GetBucket*", "s3:List*"];
const WRITE_ACTIONS: [&str; 4] = ["s3:DeleteObject*", "s3:PutObject", "s3:PutObjectTagging", "s3:Abort*"];

#[derive(Debug, Clone, PartialEq)]
pub struct BucketDeployment {
    pub path: ConstructPath,
    pub sources: Vec<FileAsset>,
    pub destination: LogicalId,
    pub destination_prefix: Option<String>,
    /// Delete destination objects that are not part of the sources.
    pub prune: bool,
    /// Leave objects in place when the deployment is deleted.
    pub retain_on_delete: bool,
}

impl BucketDeployment {
    pub fn new(id: &str, sources: Vec<FileAsset>, destination: &Bucket) -> Self {
        Self {
            path: ConstructPath::root(id),
            sources,
            destination: destination.logical_id(),
            destination_prefix: None,
            prune: true,
            retain_on_delete: true,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.destination_prefix = Some(prefix.into());
        self
    }

    pub fn with_retain_on_delete(mut self, retain: bool) -> Self {
        self.retain_on_delete = retain;
        self
    }

    pub fn logical_id(&self) -> LogicalId {
        self.path.child("CustomResource").resource().logical_id()
    }

    /// Provider function with read access to the asset bucket and write access to the destination.
    pub fn provider(&self) -> Function {
        let destination_arn = Token::get_att(&self.destination, "Arn");
        Function::at(
            self.path.child("Provider"),
            Runtime::Python312,
            "index.handler",
            Code::Inline(HANDLER_SOURCE.to_string()),
        )
        .with_timeout(900)
        .with_statement(
            PolicyStatement::allow()
                .actions(READ_ACTIONS)
                .resource(FileAsset::bucket_arn())
                .resource(Token::concat(vec![FileAsset::bucket_arn(), Token::literal("/*")])),
        )
        .with_statement(
            PolicyStatement::allow()
                .actions(READ_ACTIONS)
                .actions(WRITE_ACTIONS)
                .resource(destination_arn.clone())
                .resource(Token::concat(vec![destination_arn, Token::literal("/*")])),
        )
    }

    fn render_resources(&self) -> Vec<CfnResource> {
        let provider = self.provider();
        let mut resources = provider.render_resources();

        let mut properties = json!({
            "ServiceToken": provider.function_arn(),
            "SourceBucketNames": self.sources.iter().map(|_| FileAsset::bucket_name()).collect::<Vec<_>>(),
            "SourceObjectKeys": self.sources.iter().map(FileAsset::object_key).collect::<Vec<_>>(),
            "DestinationBucketName": Token::Ref(self.destination.clone()),
            "Prune": self.prune,
            "RetainOnDelete": self.retain_on_delete,
        });
        if let Some(prefix) = &self.destination_prefix {
            properties["DestinationBucketKeyPrefix"] = json!(prefix);
        }

        resources.push(CfnResource::new(
            self.path.child("CustomResource").resource(),
            RESOURCE_TYPE,
            properties,
        ));
        resources
    }
}

impl Construct for BucketDeployment {
    fn kind(&self) -> ConstructKind {
        ConstructKind::BucketDeployment
    }

    fn path(&self) -> &ConstructPath {
        &self.path
    }

    fn render(&self) -> Result<Vec<CfnResource>> {
        Ok(self.render_resources())
    }

    fn assets(&self) -> Vec<FileAsset> {
        self.sources.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::Packaging;
    use std::path::PathBuf;

    fn deployment() -> (Bucket, BucketDeployment) {
        let bucket = Bucket::new("siteBucket").with_bucket_name("example.dev");
        let asset = FileAsset {
            source_path: PathBuf::from("build"),
            hash: "feed".to_string(),
            packaging: Packaging::ZipDirectory,
        };
        let deployment = BucketDeployment::new("deployWebsite", vec![asset], &bucket);
        (bucket, deployment)
    }

    #[test]
    fn test_handler_fits_inline_limit() {
        assert!(HANDLER_SOURCE.len() < 4096);
        assert!(HANDLER_SOURCE.contains("def handler"));
    }

    #[test]
    fn test_custom_resource_targets_bucket() {
        let (bucket, deployment) = deployment();
        let resources = deployment.render().unwrap();
        let custom = resources.last().unwrap();
        assert_eq!(custom.resource_type, RESOURCE_TYPE);
        assert_eq!(custom.logical_id, deployment.logical_id());
        assert_eq!(
            custom.property("/DestinationBucketName"),
            Some(&json!({"Ref": bucket.logical_id().as_str()}))
        );
        assert_eq!(custom.property("/SourceObjectKeys"), Some(&json!(["feed.zip"])));
        assert!(custom.references().contains(deployment.provider().logical_id().as_str()));
        assert_eq!(deployment.assets().len(), 1);
    }

    #[test]
    fn test_provider_can_write_destination() {
        let (bucket, deployment) = deployment();
        let provider = deployment.provider();
        let writes = provider
            .statements
            .iter()
            .find(|s| s.actions.iter().any(|a| a == "s3:PutObject"))
            .unwrap();
        assert_eq!(writes.resources[0], bucket.bucket_arn());
    }
}

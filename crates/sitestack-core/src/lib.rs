//! Core domain types for the sitestack infrastructure definition.
//!
//! This crate contains:
//! - Logical identifiers and construct paths
//! - Tokens (references resolved by the provisioning engine)
//! - Resource descriptors (table, function, API, bucket, deployment, pipeline)
//! - The resource graph and its CloudFormation template form
//! - File asset fingerprinting

pub mod apigateway;
pub mod asset;
pub mod codebuild;
pub mod codepipeline;
pub mod dynamodb;
pub mod error;
pub mod graph;
pub mod iam;
pub mod id;
pub mod lambda;
pub mod resource;
pub mod s3;
pub mod s3_deployment;
pub mod template;
pub mod token;

pub use error::{Error, Result};
pub use graph::{Construct, ConstructKind, ResourceGraph, StackEnv};
pub use id::{ConstructPath, LogicalId};
pub use resource::{CfnResource, RemovalPolicy};
pub use token::{Pseudo, Token};

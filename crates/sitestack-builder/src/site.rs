//! Assembles the site descriptors into one resource graph.

use std::path::Path;

use sitestack_config::SiteConfig;
use sitestack_core::apigateway::RestApi;
use sitestack_core::asset::{AssetHasher, FileAsset};
use sitestack_core::codebuild::{BuildEnvironment, BuildSpec, Project};
use sitestack_core::codepipeline::{Action, Artifact, Pipeline, Placement, Stage};
use sitestack_core::dynamodb::{Attribute, Table};
use sitestack_core::iam::{ManagedPolicy, Principal, Role};
use sitestack_core::lambda::{Code, Function};
use sitestack_core::s3::{Bucket, PublicRead, Website};
use sitestack_core::s3_deployment::BucketDeployment;
use sitestack_core::{ConstructPath, ResourceGraph, Token};
use tracing::{debug, info};

use crate::BuildResult;

const SOURCE_STAGE: &str = "Source";
const BUILD_STAGE: &str = "Build";
const SOURCE_ACTION: &str = "GitHub";
const BUILD_ACTION: &str = "Build";

/// A built and validated site graph.
#[derive(Debug, Clone)]
pub struct SiteGraph {
    pub graph: ResourceGraph,
    /// Stage names in execution order.
    pub stages: Vec<String>,
    /// Build specification embedded in the build project.
    pub build_spec: BuildSpec,
}

/// Build the resource graph for `site`.
///
/// Asset paths in the configuration are resolved against `root`.
pub fn build_site_graph(
    site: &SiteConfig,
    root: &Path,
    hasher: &dyn AssetHasher,
) -> BuildResult<SiteGraph> {
    let mut graph = ResourceGraph::new(site.stack_env());

    // Table and the function writing to it
    let table_cfg = &site.table;
    let mut table = Table::new(
        &table_cfg.id,
        Attribute {
            name: table_cfg.partition_key.clone(),
            attribute_type: table_cfg.key_type,
        },
    )
    .with_billing(table_cfg.billing)
    .with_removal_policy(table_cfg.removal);
    if let Some((name, attribute_type)) = &table_cfg.sort_key {
        table = table.with_sort_key(Attribute {
            name: name.clone(),
            attribute_type: *attribute_type,
        });
    }
    graph.add(&table)?;

    let function_cfg = &site.api.function;
    let code = FileAsset::from_path(root.join(&function_cfg.code), hasher)?;
    let function = Function::new(
        &function_cfg.id,
        function_cfg.runtime,
        function_cfg.handler.clone(),
        Code::Asset(code),
    )
    .with_env(function_cfg.table_env.clone(), table.table_name())
    .with_statement(table.grant_write_data());
    graph.add(&function)?;

    let mut api = RestApi::new(&site.api.id, function.function_arn()).with_cors(site.api.cors.clone());
    for (path_part, methods) in &site.api.routes {
        api = api.with_route(path_part, methods.iter().cloned());
    }
    graph.add(&api)?;

    // Website bucket and its content
    let website = &site.website;
    let bucket = Bucket::new(&website.id)
        .with_bucket_name(website.bucket_name.clone())
        .with_website(Website {
            index_document: website.index_document.clone(),
            error_document: website.error_document.clone(),
        })
        .with_public_read(PublicRead::SourceIps(website.allowed_ips.clone()))
        .with_removal_policy(website.removal);
    graph.add(&bucket)?;

    let content = FileAsset::from_path(root.join(&website.assets), hasher)?;
    let deployment = BucketDeployment::new(&website.deployment_id, vec![content], &bucket);
    graph.add(&deployment)?;

    // Delivery pipeline
    let pipeline_cfg = &site.pipeline;
    let build_cfg = &pipeline_cfg.build;
    let build_spec = site.build_spec();

    let project = Project::new(&build_cfg.id, build_spec.clone()).with_environment(BuildEnvironment {
        image: build_cfg.image.clone(),
        compute_type: build_cfg.compute_type.clone(),
    });

    let source_output = Artifact::for_action(SOURCE_STAGE, SOURCE_ACTION);
    let source = Stage::new(SOURCE_STAGE).with_action(Action::GitHubSource {
        name: SOURCE_ACTION.to_string(),
        owner: pipeline_cfg.github.owner.clone(),
        repo: pipeline_cfg.github.repo.clone(),
        branch: pipeline_cfg.github.branch.clone(),
        oauth_token: Token::SecretsManager {
            secret_id: pipeline_cfg.github.token_secret.clone(),
        },
        output: source_output.clone(),
        trigger: pipeline_cfg.github.trigger,
    });
    let build = Stage::new(BUILD_STAGE).with_action(Action::CodeBuild {
        name: BUILD_ACTION.to_string(),
        project: project.logical_id(),
        input: source_output,
        outputs: Vec::new(),
    });
    let pipeline = Pipeline::new(&pipeline_cfg.id)
        .with_name(pipeline_cfg.name.clone())
        .add_stage(source, Placement::Last)?
        .add_stage(build, Placement::JustAfter(SOURCE_STAGE.to_string()))?;

    let role = build_cfg
        .managed_policies
        .iter()
        .fold(
            Role::new(
                ConstructPath::root(build_cfg.role_id.clone()),
                Principal::service("codebuild.amazonaws.com"),
            ),
            |role, name| role.with_managed_policy(ManagedPolicy::aws_managed(name.clone())),
        )
        .with_statements(project.log_statements())
        .with_statement(pipeline.artifact_access_statement());
    let project = project.with_role(&role);

    graph.add(&role)?;
    graph.add(&project)?;
    graph.add(&pipeline)?;

    graph.validate()?;

    let stages: Vec<String> = pipeline.stage_names().into_iter().map(String::from).collect();
    debug!(stages = ?stages, "Pipeline stages");
    info!(
        stack = %graph.env().stack_name,
        resources = graph.resources().len(),
        assets = graph.assets().len(),
        "Built resource graph"
    );

    Ok(SiteGraph {
        graph,
        stages,
        build_spec,
    })
}

//! Site configuration parsing.
//!
//! Every node is optional. Values given in the document replace the
//! corresponding defaults; list-valued settings (routes, allowed addresses,
//! build phases) replace the default list as a whole.

use crate::site::{ApiConfig, BuildConfig, PipelineConfig, SiteConfig, TableConfig, WebsiteConfig};
use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use sitestack_core::apigateway::{ALL_METHODS, ALL_ORIGINS};
use sitestack_core::codebuild::{BuildArtifacts, BuildSpec, PhaseKind};
use sitestack_core::dynamodb::{AttributeType, BillingMode};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

/// Read and parse a configuration file.
pub fn load_site_config(path: &Path) -> ConfigResult<SiteConfig> {
    let text = std::fs::read_to_string(path)?;
    let site = parse_site_config(&text)?;
    info!(path = %path.display(), stack = %site.stack.name, "Loaded site configuration");
    Ok(site)
}

/// Parse a site configuration from KDL text, layered over the defaults.
pub fn parse_site_config(kdl: &str) -> ConfigResult<SiteConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut site = SiteConfig::default();
    let mut seen = HashSet::new();

    for node in doc.nodes() {
        let name = node.name().value();
        if !seen.insert(name.to_string()) {
            return Err(ConfigError::Duplicate(format!("'{name}' block")));
        }

        match name {
            "stack" => {
                if let Some(stack_name) = get_first_string_arg(node) {
                    site.stack.name = stack_name;
                }
                if let Some(region) = get_string_prop(node, "region") {
                    site.stack.region = region;
                }
                if let Some(account) = get_string_prop(node, "account") {
                    site.stack.account = account;
                }
            }
            "table" => parse_table(node, &mut site.table)?,
            "api" => parse_api(node, &mut site.api)?,
            "website" => parse_website(node, &mut site.website)?,
            "pipeline" => parse_pipeline(node, &mut site.pipeline)?,
            "variables" => {
                if let Some(children) = node.children() {
                    for child in children.nodes() {
                        let key = child.name().value().to_string();
                        if let Some(val) = get_first_string_arg(child) {
                            site.variables.insert(key, val);
                        }
                    }
                }
            }
            other => debug!(node = other, "Ignoring unknown configuration node"),
        }
    }

    site.validate()?;
    Ok(site)
}

fn parse_table(node: &KdlNode, table: &mut TableConfig) -> ConfigResult<()> {
    if let Some(id) = get_first_string_arg(node) {
        table.id = id;
    }

    for child in children(node) {
        match child.name().value() {
            "partition-key" => {
                table.partition_key = get_first_string_arg(child)
                    .ok_or_else(|| ConfigError::MissingField("table partition-key name".to_string()))?;
                if let Some(key_type) = get_string_prop(child, "type") {
                    table.key_type = parse_value("table partition-key type", &key_type)?;
                }
            }
            "sort-key" => {
                let name = required_arg(child, "table sort-key name")?;
                let key_type = match get_string_prop(child, "type") {
                    Some(t) => parse_value("table sort-key type", &t)?,
                    None => AttributeType::String,
                };
                table.sort_key = Some((name, key_type));
            }
            "billing" => {
                table.billing = match required_arg(child, "table billing")?.as_str() {
                    "pay-per-request" => BillingMode::PayPerRequest,
                    "provisioned" => BillingMode::Provisioned {
                        read: get_u32_prop(child, "read")?.unwrap_or(5),
                        write: get_u32_prop(child, "write")?.unwrap_or(5),
                    },
                    other => {
                        return Err(ConfigError::invalid(
                            "table billing",
                            format!("unknown billing mode: {other}"),
                        ));
                    }
                };
            }
            "removal" => table.removal = parse_arg(child, "table removal")?,
            _ => {}
        }
    }
    Ok(())
}

fn parse_api(node: &KdlNode, api: &mut ApiConfig) -> ConfigResult<()> {
    if let Some(id) = get_first_string_arg(node) {
        api.id = id;
    }

    let mut routes = BTreeMap::new();
    for child in children(node) {
        match child.name().value() {
            "function" => {
                let function = &mut api.function;
                if let Some(id) = get_first_string_arg(child) {
                    function.id = id;
                }
                for setting in children(child) {
                    match setting.name().value() {
                        "runtime" => function.runtime = parse_arg(setting, "function runtime")?,
                        "handler" => {
                            function.handler = required_arg(setting, "function handler")?;
                        }
                        "code" => function.code = PathBuf::from(required_arg(setting, "function code")?),
                        "table-env" => {
                            function.table_env = required_arg(setting, "function table-env")?;
                        }
                        _ => {}
                    }
                }
            }
            "route" => {
                let path_part = get_first_string_arg(child)
                    .ok_or_else(|| ConfigError::MissingField("route path".to_string()))?;
                let mut methods = Vec::new();
                for method in children(child).filter(|c| c.name().value() == "method") {
                    methods.extend(get_all_string_args(method).iter().map(|m| m.to_uppercase()));
                }
                if methods.is_empty() {
                    return Err(ConfigError::MissingField(format!(
                        "method for route '{path_part}'"
                    )));
                }
                if routes.insert(path_part.clone(), methods).is_some() {
                    return Err(ConfigError::Duplicate(format!("route '{path_part}'")));
                }
            }
            "cors" => {
                for setting in children(child) {
                    let values = get_all_string_args(setting);
                    match setting.name().value() {
                        "allow-headers" => api.cors.allow_headers = values,
                        "allow-methods" => api.cors.allow_methods = expand_all(values, &ALL_METHODS),
                        "allow-origins" => {
                            if values.len() > 1 {
                                return Err(ConfigError::invalid(
                                    "api cors allow-origins",
                                    format!("a single origin is allowed, got {}", values.join(", ")),
                                ));
                            }
                            api.cors.allow_origins = expand_all(values, &ALL_ORIGINS);
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    if !routes.is_empty() {
        api.routes = routes;
    }
    Ok(())
}

fn parse_website(node: &KdlNode, website: &mut WebsiteConfig) -> ConfigResult<()> {
    if let Some(id) = get_first_string_arg(node) {
        website.id = id;
    }

    for child in children(node) {
        match child.name().value() {
            "bucket-name" => website.bucket_name = required_arg(child, "website bucket-name")?,
            "index-document" => {
                website.index_document = required_arg(child, "website index-document")?;
            }
            "error-document" => website.error_document = get_first_string_arg(child),
            "assets" => website.assets = PathBuf::from(required_arg(child, "website assets")?),
            "deployment" => website.deployment_id = required_arg(child, "website deployment")?,
            "removal" => website.removal = parse_arg(child, "website removal")?,
            "allowed-ips" => website.allowed_ips = get_all_string_args(child),
            _ => {}
        }
    }
    Ok(())
}

fn parse_pipeline(node: &KdlNode, pipeline: &mut PipelineConfig) -> ConfigResult<()> {
    if let Some(id) = get_first_string_arg(node) {
        pipeline.id = id;
    }
    if let Some(name) = get_string_prop(node, "name") {
        pipeline.name = name;
    }

    for child in children(node) {
        match child.name().value() {
            "github" => {
                let github = &mut pipeline.github;
                if let Some(owner) = get_string_prop(child, "owner") {
                    github.owner = owner;
                }
                if let Some(repo) = get_string_prop(child, "repo") {
                    github.repo = repo;
                }
                if let Some(branch) = get_string_prop(child, "branch") {
                    github.branch = branch;
                }
                if let Some(secret) = get_string_prop(child, "token-secret") {
                    github.token_secret = secret;
                }
                if let Some(trigger) = get_string_prop(child, "trigger") {
                    github.trigger = parse_value("github trigger", &trigger)?;
                }
            }
            "build" => parse_build(child, &mut pipeline.build)?,
            _ => {}
        }
    }
    Ok(())
}

fn parse_build(node: &KdlNode, build: &mut BuildConfig) -> ConfigResult<()> {
    if let Some(id) = get_first_string_arg(node) {
        build.id = id;
    }
    if let Some(role) = get_string_prop(node, "role") {
        build.role_id = role;
    }

    let mut spec = BuildSpec::new();
    let mut has_phases = false;
    let mut managed_policies = Vec::new();

    for child in children(node) {
        match child.name().value() {
            "image" => build.image = required_arg(child, "build image")?,
            "compute-type" => build.compute_type = required_arg(child, "build compute-type")?,
            "managed-policy" => managed_policies.extend(get_all_string_args(child)),
            "phase" => {
                let kind: PhaseKind = parse_arg(child, "build phase")?;
                has_phases = true;
                for step in children(child) {
                    match step.name().value() {
                        "runtime" => {
                            let args = get_all_string_args(step);
                            let [runtime, version] = args.as_slice() else {
                                return Err(ConfigError::invalid(
                                    "build phase runtime",
                                    "expected a runtime name and a version",
                                ));
                            };
                            if kind != PhaseKind::Install {
                                return Err(ConfigError::invalid(
                                    "build phase runtime",
                                    "runtime versions belong to the install phase",
                                ));
                            }
                            spec = spec.with_runtime(runtime.clone(), version.clone());
                        }
                        "run" => {
                            spec = spec.with_commands(kind, [required_arg(step, "build phase run")?]);
                        }
                        _ => {}
                    }
                }
            }
            "artifacts" => {
                let mut files = Vec::new();
                for entry in children(child).filter(|c| c.name().value() == "files") {
                    files.extend(get_all_string_args(entry));
                }
                if files.is_empty() {
                    return Err(ConfigError::MissingField("build artifacts files".to_string()));
                }
                build.spec.artifacts = Some(BuildArtifacts {
                    files,
                    base_directory: get_string_prop(child, "base-directory"),
                });
            }
            _ => {}
        }
    }

    if has_phases {
        spec.artifacts = build.spec.artifacts.take();
        build.spec = spec;
    }
    if !managed_policies.is_empty() {
        build.managed_policies = managed_policies;
    }
    Ok(())
}

// Helper functions for extracting values from KDL nodes

fn children(node: &KdlNode) -> impl Iterator<Item = &KdlNode> {
    node.children().into_iter().flat_map(|doc| doc.nodes())
}

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn get_u32_prop(node: &KdlNode, name: &str) -> ConfigResult<Option<u32>> {
    match node.get(name) {
        None => Ok(None),
        Some(value) => value
            .as_integer()
            .and_then(|v| u32::try_from(v).ok())
            .map(Some)
            .ok_or_else(|| ConfigError::invalid(name, "expected a non-negative integer")),
    }
}

fn required_arg(node: &KdlNode, field: &str) -> ConfigResult<String> {
    get_first_string_arg(node).ok_or_else(|| ConfigError::MissingField(field.to_string()))
}

fn parse_arg<T>(node: &KdlNode, field: &str) -> ConfigResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    parse_value(field, &required_arg(node, field)?)
}

fn parse_value<T>(field: &str, value: &str) -> ConfigResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e| ConfigError::invalid(field, e))
}

/// `"ALL"` stands for the full list.
fn expand_all(values: Vec<String>, all: &[&str]) -> Vec<String> {
    if values.iter().any(|v| v == "ALL") {
        all.iter().map(|v| v.to_string()).collect()
    } else {
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitestack_core::codepipeline::GitHubTrigger;
    use sitestack_core::lambda::Runtime;
    use sitestack_core::RemovalPolicy;

    #[test]
    fn test_empty_document_yields_defaults() {
        let site = parse_site_config("").unwrap();
        assert_eq!(site, SiteConfig::default());
    }

    #[test]
    fn test_parse_full_document() {
        let kdl = r#"
            stack "DemoStack" region="us-east-1" account="123456789012"

            table "visits" {
                partition-key "pk" type="string"
                sort-key "visitedAt" type="number"
                billing "provisioned" read=2 write=1
                removal "retain"
            }

            api "visitApi" {
                function "recordVisit" {
                    runtime "nodejs20.x"
                    handler "index.handler"
                    code "lambda"
                }
                route "visit" {
                    method "post" "put"
                }
                cors {
                    allow-headers "Content-Type"
                    allow-methods "ALL"
                    allow-origins "https://example.org"
                }
            }

            website "contentBucket" {
                bucket-name "example.org"
                index-document "index.html"
                assets "dist"
                allowed-ips "10.0.0.0/8" "192.168.0.0/16"
            }

            pipeline "deliver" name="demoPipeline" {
                github owner="octo" repo="demo" branch="trunk" token-secret="gh" trigger="webhook"
                build "compile" role="compileRole" {
                    image "aws/codebuild/standard:7.0"
                    managed-policy "AmazonS3FullAccess"
                    phase "install" {
                        runtime "nodejs" "20"
                        run "npm ci"
                    }
                    phase "post_build" {
                        run "aws s3 sync dist s3://${site.bucket}/"
                    }
                    artifacts base-directory="dist" {
                        files "**/*"
                    }
                }
            }

            variables {
                distribution "E2ABCDEF"
            }
        "#;

        let site = parse_site_config(kdl).unwrap();
        assert_eq!(site.stack.name, "DemoStack");
        assert_eq!(site.stack.account, "123456789012");
        assert_eq!(site.table.id, "visits");
        assert_eq!(site.table.key_type, AttributeType::String);
        assert_eq!(site.table.sort_key, Some(("visitedAt".to_string(), AttributeType::Number)));
        assert_eq!(site.table.billing, BillingMode::Provisioned { read: 2, write: 1 });
        assert_eq!(site.table.removal, RemovalPolicy::Retain);
        assert_eq!(site.api.function.runtime, Runtime::Nodejs20x);
        assert_eq!(site.api.function.table_env, "TABLE_NAME");
        assert_eq!(site.api.routes.get("visit"), Some(&vec!["POST".to_string(), "PUT".to_string()]));
        assert_eq!(site.api.cors.allow_methods.len(), ALL_METHODS.len());
        assert_eq!(site.api.cors.allow_origins, vec!["https://example.org".to_string()]);
        assert_eq!(site.website.allowed_ips.len(), 2);
        assert_eq!(site.pipeline.name, "demoPipeline");
        assert_eq!(site.pipeline.github.trigger, GitHubTrigger::Webhook);
        assert_eq!(site.pipeline.build.role_id, "compileRole");
        assert_eq!(site.pipeline.build.managed_policies, vec!["AmazonS3FullAccess".to_string()]);

        let spec = &site.pipeline.build.spec;
        assert_eq!(spec.phases.len(), 2);
        assert!(!spec.phases.contains_key(&PhaseKind::Build));
        assert_eq!(spec.artifacts.as_ref().unwrap().base_directory.as_deref(), Some("dist"));
        assert_eq!(site.variables.get("distribution").map(String::as_str), Some("E2ABCDEF"));

        let post_build: Vec<String> = site
            .build_spec()
            .all_commands()
            .filter(|(k, _)| *k == PhaseKind::PostBuild)
            .map(|(_, c)| c.to_string())
            .collect();
        assert_eq!(post_build, vec!["aws s3 sync dist s3://example.org/".to_string()]);
    }

    #[test]
    fn test_sample_config_matches_defaults() {
        let site = parse_site_config(include_str!("../../../site.kdl")).unwrap();
        assert_eq!(site, SiteConfig::default());
    }

    #[test]
    fn test_partial_override_keeps_defaults() {
        let kdl = r#"
            website "siteBucket" {
                bucket-name "example.org"
            }
        "#;
        let site = parse_site_config(kdl).unwrap();
        let defaults = SiteConfig::default();
        assert_eq!(site.website.bucket_name, "example.org");
        assert_eq!(site.website.allowed_ips, defaults.website.allowed_ips);
        assert_eq!(site.pipeline, defaults.pipeline);
    }

    #[test]
    fn test_duplicate_block_rejected() {
        let kdl = r#"
            stack "A"
            stack "B"
        "#;
        assert!(matches!(parse_site_config(kdl), Err(ConfigError::Duplicate(_))));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let bad_removal = r#"table "t" { removal "forever" }"#;
        assert!(matches!(
            parse_site_config(bad_removal),
            Err(ConfigError::InvalidValue { .. })
        ));

        let two_origins = r#"api "a" { cors { allow-origins "https://a.example" "https://b.example" } }"#;
        assert!(matches!(parse_site_config(two_origins), Err(ConfigError::InvalidValue { .. })));

        let empty_owner = r#"pipeline "p" { github owner="" }"#;
        assert!(matches!(parse_site_config(empty_owner), Err(ConfigError::MissingField(_))));
    }

    #[test]
    fn test_malformed_ips_pass_through() {
        let kdl = r#"website "siteBucket" { allowed-ips "not-an-ip" "10.0.0.0/99" }"#;
        let site = parse_site_config(kdl).unwrap();
        assert_eq!(site.website.allowed_ips, vec!["not-an-ip", "10.0.0.0/99"]);
    }

    #[test]
    fn test_runtime_outside_install_rejected() {
        let kdl = r#"
            pipeline "p" {
                build "b" {
                    phase "build" { runtime "nodejs" "20" }
                }
            }
        "#;
        assert!(matches!(parse_site_config(kdl), Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site.kdl");
        std::fs::write(&path, r#"stack "FileStack""#).unwrap();
        assert_eq!(load_site_config(&path).unwrap().stack.name, "FileStack");

        let missing = dir.path().join("missing.kdl");
        assert!(matches!(load_site_config(&missing), Err(ConfigError::Io(_))));
    }
}

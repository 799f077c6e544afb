//! Cloud assembly output.
//!
//! Layout of the output directory:
//! - `manifest.json`: artifacts of the assembly (the stack and its asset manifest)
//! - `<Stack>.template.json`: the synthesized template
//! - `<Stack>.assets.json`: where each file asset is published
//! - `asset.<hash>/`: staged copy of each asset

use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use sitestack_core::asset::{BOOTSTRAP_QUALIFIER, DirectoryHasher, FileAsset, Packaging};
use sitestack_core::{ResourceGraph, StackEnv};

use crate::{BuildError, BuildResult};

/// Schema version of the manifests written here.
pub const ASSEMBLY_VERSION: &str = "36.0.0";

const BOOTSTRAP_VERSION: u32 = 6;

/// `manifest.json`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssemblyManifest {
    pub version: String,
    pub artifacts: BTreeMap<String, ArtifactManifest>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactManifest {
    #[serde(rename = "type")]
    pub artifact_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    pub properties: Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// A written cloud assembly.
#[derive(Debug, Clone)]
pub struct CloudAssembly {
    pub directory: PathBuf,
    pub template_file: PathBuf,
    pub assets_file: PathBuf,
    pub manifest: AssemblyManifest,
}

impl CloudAssembly {
    /// Synthesize `graph` into `directory`, creating it if needed.
    pub fn write(graph: &ResourceGraph, directory: &Path) -> BuildResult<Self> {
        let env = graph.env();
        create_dir(directory)?;

        let template_name = format!("{}.template.json", env.stack_name);
        let template_file = directory.join(&template_name);
        write_file(&template_file, &graph.template().to_json_pretty()?)?;
        let template_asset = FileAsset::from_path(&template_file, &DirectoryHasher)?;

        let mut files = BTreeMap::new();
        for asset in graph.assets() {
            stage_asset(asset, directory)?;
            files.insert(
                asset.hash.clone(),
                asset_entry(env, &asset.staged_name(), asset.packaging, &asset.object_key()),
            );
        }
        files.insert(
            template_asset.hash.clone(),
            asset_entry(env, &template_name, Packaging::File, &template_asset.object_key()),
        );

        let assets_name = format!("{}.assets.json", env.stack_name);
        let assets_file = directory.join(&assets_name);
        write_json(
            &assets_file,
            &json!({
                "version": ASSEMBLY_VERSION,
                "files": files,
                "dockerImages": {},
            }),
        )?;

        let manifest = assembly_manifest(env, &template_name, &assets_name, &template_asset);
        write_json(&directory.join("manifest.json"), &manifest)?;
        write_json(&directory.join("cdk.out"), &json!({"version": ASSEMBLY_VERSION}))?;

        info!(
            directory = %directory.display(),
            stack = %env.stack_name,
            assets = graph.assets().len(),
            "Wrote cloud assembly"
        );

        Ok(Self {
            directory: directory.to_path_buf(),
            template_file,
            assets_file,
            manifest,
        })
    }
}

fn bootstrap_role(kind: &str) -> String {
    format!(
        "arn:${{AWS::Partition}}:iam::${{AWS::AccountId}}:role/cdk-{BOOTSTRAP_QUALIFIER}-{kind}-role-${{AWS::AccountId}}-${{AWS::Region}}"
    )
}

fn bootstrap_bucket() -> String {
    format!("cdk-{BOOTSTRAP_QUALIFIER}-assets-${{AWS::AccountId}}-${{AWS::Region}}")
}

fn bootstrap_parameter() -> String {
    format!("/cdk-bootstrap/{BOOTSTRAP_QUALIFIER}/version")
}

fn destination_key(env: &StackEnv) -> String {
    let account = env
        .account
        .as_deref()
        .filter(|a| !a.is_empty())
        .unwrap_or("current_account");
    format!("{account}-{}", env.region)
}

fn asset_entry(env: &StackEnv, source: &str, packaging: Packaging, object_key: &str) -> Value {
    let destination = destination_key(env);
    json!({
        "source": {"path": source, "packaging": packaging.as_str()},
        "destinations": {
            destination: {
                "bucketName": bootstrap_bucket(),
                "objectKey": object_key,
                "region": env.region,
                "assumeRoleArn": bootstrap_role("file-publishing"),
            }
        }
    })
}

fn assembly_manifest(
    env: &StackEnv,
    template_name: &str,
    assets_name: &str,
    template_asset: &FileAsset,
) -> AssemblyManifest {
    let assets_id = format!("{}.assets", env.stack_name);

    let mut artifacts = BTreeMap::new();
    artifacts.insert(
        assets_id.clone(),
        ArtifactManifest {
            artifact_type: "cdk:asset-manifest".to_string(),
            environment: None,
            properties: json!({
                "file": assets_name,
                "requiresBootstrapStackVersion": BOOTSTRAP_VERSION,
                "bootstrapStackVersionSsmParameter": bootstrap_parameter(),
            }),
            dependencies: Vec::new(),
            display_name: None,
        },
    );
    artifacts.insert(
        env.stack_name.clone(),
        ArtifactManifest {
            artifact_type: "aws:cloudformation:stack".to_string(),
            environment: Some(env.environment_uri()),
            properties: json!({
                "templateFile": template_name,
                "validateOnSynth": false,
                "assumeRoleArn": bootstrap_role("deploy"),
                "cloudFormationExecutionRoleArn": bootstrap_role("cfn-exec"),
                "stackTemplateAssetObjectUrl": format!(
                    "s3://{}/{}",
                    bootstrap_bucket(),
                    template_asset.object_key()
                ),
                "requiresBootstrapStackVersion": BOOTSTRAP_VERSION,
                "bootstrapStackVersionSsmParameter": bootstrap_parameter(),
                "additionalDependencies": [assets_id],
            }),
            dependencies: vec![assets_id],
            display_name: Some(env.stack_name.clone()),
        },
    );

    AssemblyManifest {
        version: ASSEMBLY_VERSION.to_string(),
        artifacts,
    }
}

/// Copy an asset into `asset.<hash>/` unless an earlier run staged it already.
fn stage_asset(asset: &FileAsset, directory: &Path) -> BuildResult<()> {
    let target = directory.join(asset.staged_name());
    if target.exists() {
        debug!(asset = %asset.hash, "Asset already staged");
        return Ok(());
    }

    match asset.packaging {
        Packaging::ZipDirectory => copy_dir(&asset.source_path, &target)?,
        Packaging::File => {
            create_dir(&target)?;
            let name = asset
                .source_path
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(&asset.hash));
            let dest = target.join(name);
            std::fs::copy(&asset.source_path, &dest).map_err(|e| write_error(&dest, e))?;
        }
    }
    debug!(asset = %asset.hash, target = %target.display(), "Staged asset");
    Ok(())
}

fn copy_dir(from: &Path, to: &Path) -> BuildResult<()> {
    create_dir(to)?;
    let entries = std::fs::read_dir(from).map_err(|e| write_error(from, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| write_error(from, e))?;
        let source = entry.path();
        let dest = to.join(entry.file_name());
        let file_type = entry.file_type().map_err(|e| write_error(&source, e))?;
        if file_type.is_dir() {
            copy_dir(&source, &dest)?;
        } else if file_type.is_symlink() && source.is_dir() {
            return Err(write_error(
                &source,
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "symlinked directories are not staged",
                ),
            ));
        } else {
            std::fs::copy(&source, &dest).map_err(|e| write_error(&dest, e))?;
        }
    }
    Ok(())
}

fn write_error(path: &Path, source: std::io::Error) -> BuildError {
    BuildError::Write {
        path: path.display().to_string(),
        source,
    }
}

fn create_dir(path: &Path) -> BuildResult<()> {
    std::fs::create_dir_all(path).map_err(|e| write_error(path, e))
}

fn write_file(path: &Path, contents: &str) -> BuildResult<()> {
    std::fs::write(path, contents).map_err(|e| write_error(path, e))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> BuildResult<()> {
    let mut text = serde_json::to_string_pretty(value)?;
    text.push('\n');
    write_file(path, &text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_site_graph;
    use sitestack_config::SiteConfig;

    fn site_root() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("api")).unwrap();
        std::fs::write(dir.path().join("api/update.js"), "exports.handler = async () => ({});").unwrap();
        std::fs::create_dir_all(dir.path().join("build/static")).unwrap();
        std::fs::write(dir.path().join("build/index.html"), "<html></html>").unwrap();
        std::fs::write(dir.path().join("build/static/app.js"), "console.log(1)").unwrap();
        dir
    }

    #[test]
    fn test_write_assembly() {
        let root = site_root();
        let out = tempfile::tempdir().unwrap();
        let site = build_site_graph(&SiteConfig::default(), root.path(), &DirectoryHasher).unwrap();

        let assembly = CloudAssembly::write(&site.graph, out.path()).unwrap();
        assert!(assembly.template_file.ends_with("PortfolioSiteCdkStack.template.json"));
        assert!(out.path().join("manifest.json").exists());

        let stack = &assembly.manifest.artifacts["PortfolioSiteCdkStack"];
        assert_eq!(stack.artifact_type, "aws:cloudformation:stack");
        assert_eq!(stack.environment.as_deref(), Some("aws://unknown-account/eu-central-1"));
        assert_eq!(stack.dependencies, vec!["PortfolioSiteCdkStack.assets".to_string()]);

        for asset in site.graph.assets() {
            assert!(out.path().join(asset.staged_name()).is_dir());
        }
        let content = site
            .graph
            .assets()
            .iter()
            .find(|a| a.source_path.ends_with("build"))
            .unwrap();
        assert!(out.path().join(content.staged_name()).join("static/app.js").exists());

        let assets: Value =
            serde_json::from_str(&std::fs::read_to_string(&assembly.assets_file).unwrap()).unwrap();
        let files = assets["files"].as_object().unwrap();
        // two staged assets plus the template
        assert_eq!(files.len(), 3);
        assert_eq!(
            files[&content.hash]["destinations"]["current_account-eu-central-1"]["objectKey"],
            json!(format!("{}.zip", content.hash))
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_staging_refuses_symlinked_directories() {
        let source = tempfile::tempdir().unwrap();
        std::fs::write(source.path().join("index.html"), "<html></html>").unwrap();
        std::os::unix::fs::symlink(source.path(), source.path().join("loop")).unwrap();

        let out = tempfile::tempdir().unwrap();
        let result = copy_dir(source.path(), &out.path().join("asset.test"));
        assert!(matches!(result, Err(BuildError::Write { .. })));
    }

    #[test]
    fn test_rewrite_is_stable() {
        let root = site_root();
        let out = tempfile::tempdir().unwrap();
        let site = build_site_graph(&SiteConfig::default(), root.path(), &DirectoryHasher).unwrap();

        let first = CloudAssembly::write(&site.graph, out.path()).unwrap();
        let template = std::fs::read_to_string(&first.template_file).unwrap();
        let manifest = std::fs::read_to_string(out.path().join("manifest.json")).unwrap();

        let second = CloudAssembly::write(&site.graph, out.path()).unwrap();
        assert_eq!(template, std::fs::read_to_string(&second.template_file).unwrap());
        assert_eq!(manifest, std::fs::read_to_string(out.path().join("manifest.json")).unwrap());
    }
}

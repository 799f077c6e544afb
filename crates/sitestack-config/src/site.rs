//! Site configuration model.
//!
//! [`SiteConfig::default`] describes the portfolio site stack as deployed:
//! a visitor table written by one function behind a POST route, a website
//! bucket readable only through the CDN's address ranges, and a pipeline
//! that rebuilds and republishes the site from GitHub.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;

use sitestack_core::apigateway::CorsOptions;
use sitestack_core::codebuild::{BuildArtifacts, BuildSpec, PhaseKind};
use sitestack_core::codepipeline::GitHubTrigger;
use sitestack_core::dynamodb::{AttributeType, BillingMode};
use sitestack_core::lambda::Runtime;
use sitestack_core::{RemovalPolicy, StackEnv};
use tracing::warn;

use crate::variables::VariableContext;
use crate::{ConfigError, ConfigResult};

/// Address ranges of the CDN in front of the site.
///
/// The originally deployed policy listed these as bare addresses, which
/// IAM matches as single hosts; the published ranges are used instead.
pub const DEFAULT_ALLOWED_IPS: [&str; 15] = [
    "103.21.244.0/22",
    "103.22.200.0/22",
    "103.31.4.0/22",
    "104.16.0.0/13",
    "104.24.0.0/14",
    "108.162.192.0/18",
    "131.0.72.0/22",
    "141.101.64.0/18",
    "162.158.0.0/15",
    "172.64.0.0/13",
    "173.245.48.0/20",
    "188.114.96.0/20",
    "190.93.240.0/20",
    "197.234.240.0/22",
    "198.41.128.0/17",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackConfig {
    pub name: String,
    pub region: String,
    /// Empty means "resolved from credentials at deploy time".
    pub account: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableConfig {
    pub id: String,
    pub partition_key: String,
    pub key_type: AttributeType,
    pub sort_key: Option<(String, AttributeType)>,
    pub billing: BillingMode,
    pub removal: RemovalPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionConfig {
    pub id: String,
    pub runtime: Runtime,
    pub handler: String,
    /// Directory packaged as the function code.
    pub code: PathBuf,
    /// Environment variable carrying the table name.
    pub table_env: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub id: String,
    pub function: FunctionConfig,
    /// Path part -> methods.
    pub routes: BTreeMap<String, Vec<String>>,
    pub cors: CorsOptions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebsiteConfig {
    pub id: String,
    pub bucket_name: String,
    pub index_document: String,
    pub error_document: Option<String>,
    /// Local directory synced into the bucket on deploy.
    pub assets: PathBuf,
    pub deployment_id: String,
    pub removal: RemovalPolicy,
    /// Address prefixes allowed to read objects.
    pub allowed_ips: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubConfig {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    /// Name of the secret holding the OAuth token.
    pub token_secret: String,
    pub trigger: GitHubTrigger,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
    pub id: String,
    pub role_id: String,
    pub image: String,
    pub compute_type: String,
    pub managed_policies: Vec<String>,
    /// Build specification with `${...}` templates left in its commands.
    pub spec: BuildSpec,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub id: String,
    pub name: String,
    pub github: GitHubConfig,
    pub build: BuildConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteConfig {
    pub stack: StackConfig,
    pub table: TableConfig,
    pub api: ApiConfig,
    pub website: WebsiteConfig,
    pub pipeline: PipelineConfig,
    /// User-defined variables for build command templates.
    pub variables: BTreeMap<String, String>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        let spec = BuildSpec::new()
            .with_runtime("nodejs", "10")
            .with_commands(
                PhaseKind::Install,
                ["npm ci", "pip install awscli --upgrade --user"],
            )
            .with_commands(PhaseKind::Build, ["npm run build"])
            .with_commands(
                PhaseKind::PostBuild,
                [
                    "aws s3 rm s3://${site.bucket}/ --recursive",
                    "aws s3 cp ./build s3://${site.bucket}/ --recursive --grants read=uri=http://acs.amazonaws.com/groups/global/AllUsers",
                ],
            )
            .with_artifacts(BuildArtifacts {
                files: vec!["**/*".to_string()],
                base_directory: Some("build".to_string()),
            });

        Self {
            stack: StackConfig {
                name: "PortfolioSiteCdkStack".to_string(),
                region: "eu-central-1".to_string(),
                account: String::new(),
            },
            table: TableConfig {
                id: "siteUserData".to_string(),
                partition_key: "id".to_string(),
                key_type: AttributeType::Number,
                sort_key: None,
                billing: BillingMode::default(),
                removal: RemovalPolicy::Destroy,
            },
            api: ApiConfig {
                id: "updateApi".to_string(),
                function: FunctionConfig {
                    id: "updateTable".to_string(),
                    runtime: Runtime::Nodejs14x,
                    handler: "update.handler".to_string(),
                    code: PathBuf::from("api"),
                    table_env: "TABLE_NAME".to_string(),
                },
                routes: BTreeMap::from([("post".to_string(), vec!["POST".to_string()])]),
                cors: CorsOptions::permissive(),
            },
            website: WebsiteConfig {
                id: "siteBucket".to_string(),
                bucket_name: "narhi.dev".to_string(),
                index_document: "index.html".to_string(),
                error_document: None,
                assets: PathBuf::from("build"),
                deployment_id: "deployWebsite".to_string(),
                removal: RemovalPolicy::Destroy,
                allowed_ips: DEFAULT_ALLOWED_IPS.iter().map(|ip| ip.to_string()).collect(),
            },
            pipeline: PipelineConfig {
                id: "s3Pipeline".to_string(),
                name: "sitePipeline".to_string(),
                github: GitHubConfig {
                    owner: "Walaska".to_string(),
                    repo: "walas-site".to_string(),
                    branch: "main".to_string(),
                    token_secret: "github-token".to_string(),
                    trigger: GitHubTrigger::Poll,
                },
                build: BuildConfig {
                    id: "codeBuild".to_string(),
                    role_id: "pipelineRole".to_string(),
                    // nodejs 10 is only installable on the 1.0 image
                    image: "aws/codebuild/standard:1.0".to_string(),
                    compute_type: "BUILD_GENERAL1_SMALL".to_string(),
                    managed_policies: vec![
                        "AmazonS3FullAccess".to_string(),
                        "CloudFrontFullAccess".to_string(),
                    ],
                    spec,
                },
            },
            variables: BTreeMap::new(),
        }
    }
}

impl SiteConfig {
    pub fn stack_env(&self) -> StackEnv {
        StackEnv {
            stack_name: self.stack.name.clone(),
            account: Some(self.stack.account.clone()).filter(|a| !a.is_empty()),
            region: self.stack.region.clone(),
        }
    }

    /// Check required values.
    ///
    /// Source IP entries are only inspected for a warning.
    pub fn validate(&self) -> ConfigResult<()> {
        let required = [
            ("stack name", &self.stack.name),
            ("stack region", &self.stack.region),
            ("website bucket-name", &self.website.bucket_name),
            ("website index-document", &self.website.index_document),
            ("github owner", &self.pipeline.github.owner),
            ("github repo", &self.pipeline.github.repo),
            ("github branch", &self.pipeline.github.branch),
            ("github token-secret", &self.pipeline.github.token_secret),
            ("function handler", &self.api.function.handler),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField(field.to_string()));
            }
        }

        if self.api.routes.is_empty() {
            return Err(ConfigError::MissingField("api route".to_string()));
        }
        if self.website.allowed_ips.is_empty() {
            return Err(ConfigError::MissingField("website allowed-ips".to_string()));
        }
        for ip in &self.website.allowed_ips {
            if let Some(problem) = prefix_problem(ip) {
                warn!(ip = %ip, problem, "Source IP entry passed through as is");
            }
        }
        Ok(())
    }

    /// Build specification with every known variable interpolated.
    pub fn build_spec(&self) -> BuildSpec {
        let ctx = VariableContext::for_site(self);
        let mut spec = self.pipeline.build.spec.clone();
        for phase in spec.phases.values_mut() {
            for command in &mut phase.commands {
                let resolved = ctx.interpolate(command);
                for name in ctx.unresolved(&resolved) {
                    warn!(variable = %name, "Unknown variable in build command left as is");
                }
                *command = resolved;
            }
        }
        spec
    }
}

/// Describes what IAM would make of a source IP entry, if it is not a
/// plain `addr/len` prefix. Entries are never rejected here: the bucket
/// policy carries them verbatim and the provisioning engine judges them.
fn prefix_problem(entry: &str) -> Option<&'static str> {
    let (addr, len) = match entry.split_once('/') {
        Some((addr, len)) => (addr, Some(len)),
        None => (entry, None),
    };
    let Ok(addr) = addr.parse::<IpAddr>() else {
        return Some("not an IP address");
    };
    let max = if addr.is_ipv4() { 32 } else { 128 };

    match len.map(str::parse::<u8>) {
        None => Some("no prefix length, matches a single host"),
        Some(Err(_)) => Some("bad prefix length"),
        Some(Ok(len)) if len > max => Some("prefix length out of range"),
        Some(Ok(_)) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let site = SiteConfig::default();
        site.validate().unwrap();
        assert_eq!(site.website.allowed_ips.len(), 15);
        assert_eq!(site.stack_env().account, None);
        assert_eq!(site.stack_env().environment_uri(), "aws://unknown-account/eu-central-1");
    }

    #[test]
    fn test_build_spec_interpolates_bucket() {
        let mut site = SiteConfig::default();
        site.website.bucket_name = "example.org".to_string();
        let commands: Vec<String> = site
            .build_spec()
            .all_commands()
            .map(|(_, c)| c.to_string())
            .collect();
        assert!(commands.contains(&"aws s3 rm s3://example.org/ --recursive".to_string()));
        assert!(commands.iter().all(|c| !c.contains("narhi.dev")));
    }

    #[test]
    fn test_required_fields() {
        let mut site = SiteConfig::default();
        site.pipeline.github.branch = String::new();
        assert!(matches!(site.validate(), Err(ConfigError::MissingField(_))));
    }

    #[test]
    fn test_prefix_problems() {
        assert_eq!(prefix_problem("10.0.0.0/8"), None);
        assert_eq!(prefix_problem("2400:cb00::/32"), None);
        assert!(prefix_problem("10.0.0.1").is_some());
        assert!(prefix_problem("10.0.0.0/33").is_some());
        assert!(prefix_problem("not-an-ip").is_some());
    }

    #[test]
    fn test_malformed_ips_are_not_rejected() {
        let mut site = SiteConfig::default();
        site.website.allowed_ips = vec!["not-an-ip".to_string(), "10.0.0.0/99".to_string()];
        assert!(site.validate().is_ok());
    }

    #[test]
    fn test_env_variables_left_for_build_runner() {
        let mut site = SiteConfig::default();
        site.pipeline.build.spec = BuildSpec::new()
            .with_commands(PhaseKind::Build, ["echo ${env.SITESTACK_SITE_TEST_TOKEN}"]);

        // SAFETY: the variable name is unique to this test.
        unsafe { std::env::set_var("SITESTACK_SITE_TEST_TOKEN", "AKIA-first") };
        let first = site.build_spec().to_json_string().unwrap();
        unsafe { std::env::set_var("SITESTACK_SITE_TEST_TOKEN", "AKIA-second") };
        let second = site.build_spec().to_json_string().unwrap();
        unsafe { std::env::remove_var("SITESTACK_SITE_TEST_TOKEN") };

        assert_eq!(first, second);
        assert!(!first.contains("AKIA"));
        assert!(first.contains("echo $SITESTACK_SITE_TEST_TOKEN"));
    }
}

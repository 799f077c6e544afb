//! Variable interpolation for build commands.
//!
//! Supports variables like:
//! - `${stack.name}`, `${stack.region}`, `${stack.account}`
//! - `${site.bucket}` - Website bucket name
//! - `${site.index}` - Index document
//! - `${site.assets}` - Local content directory
//! - `${pipeline.name}` - Pipeline name
//! - `${github.owner}`, `${github.repo}`, `${github.branch}`
//! - `${env.VAR_NAME}` - Left to the build runner as `$VAR_NAME`
//! - `${name}` - Custom variable from the `variables` block

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::site::SiteConfig;

/// Variable context containing all available variables for interpolation.
#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    pub stack: StackContext,
    pub site: SiteContext,
    pub pipeline_name: String,
    pub github: GitHubContext,
    /// Custom variables defined by user
    pub custom: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct StackContext {
    pub name: String,
    pub region: String,
    pub account: String,
}

#[derive(Debug, Clone, Default)]
pub struct SiteContext {
    pub bucket: String,
    pub index: String,
    pub assets: String,
}

#[derive(Debug, Clone, Default)]
pub struct GitHubContext {
    pub owner: String,
    pub repo: String,
    pub branch: String,
}

// Regex for matching ${...} variables
static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_-]*(?:\.[a-zA-Z_][a-zA-Z0-9_]*)?)\}").unwrap()
});

impl VariableContext {
    /// Context holding the values of a site configuration.
    pub fn for_site(site: &SiteConfig) -> Self {
        Self {
            stack: StackContext {
                name: site.stack.name.clone(),
                region: site.stack.region.clone(),
                account: site.stack.account.clone(),
            },
            site: SiteContext {
                bucket: site.website.bucket_name.clone(),
                index: site.website.index_document.clone(),
                assets: site.website.assets.display().to_string(),
            },
            pipeline_name: site.pipeline.name.clone(),
            github: GitHubContext {
                owner: site.pipeline.github.owner.clone(),
                repo: site.pipeline.github.repo.clone(),
                branch: site.pipeline.github.branch.clone(),
            },
            custom: site
                .variables
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Resolve a variable name to its value.
    pub fn resolve(&self, var_name: &str) -> Option<String> {
        let parts: Vec<&str> = var_name.split('.').collect();

        match parts.as_slice() {
            ["stack", "name"] => Some(self.stack.name.clone()),
            ["stack", "region"] => Some(self.stack.region.clone()),
            ["stack", "account"] => Some(self.stack.account.clone()),

            ["site", "bucket"] => Some(self.site.bucket.clone()),
            ["site", "index"] => Some(self.site.index.clone()),
            ["site", "assets"] => Some(self.site.assets.clone()),

            ["pipeline", "name"] => Some(self.pipeline_name.clone()),

            ["github", "owner"] => Some(self.github.owner.clone()),
            ["github", "repo"] => Some(self.github.repo.clone()),
            ["github", "branch"] => Some(self.github.branch.clone()),

            // Expanded by CodeBuild at run time, never read from this process.
            ["env", name] => Some(format!("${name}")),

            [name] => self.custom.get(*name).cloned(),

            _ => None,
        }
    }

    /// Interpolate all variables in a string.
    /// Unknown variables are left in place.
    pub fn interpolate(&self, input: &str) -> String {
        VAR_REGEX
            .replace_all(input, |caps: &regex::Captures| {
                let var_name = &caps[1];
                self.resolve(var_name)
                    .unwrap_or_else(|| format!("${{{}}}", var_name))
            })
            .to_string()
    }

    /// Names of variables in `input` this context cannot resolve.
    pub fn unresolved(&self, input: &str) -> Vec<String> {
        VAR_REGEX
            .captures_iter(input)
            .map(|caps| caps[1].to_string())
            .filter(|name| self.resolve(name).is_none())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site_context() -> VariableContext {
        let mut site = SiteConfig::default();
        site.website.bucket_name = "example.dev".to_string();
        site.stack.name = "SiteStack".to_string();
        VariableContext::for_site(&site)
    }

    #[test]
    fn test_basic_interpolation() {
        let ctx = site_context();
        let result = ctx.interpolate("aws s3 rm s3://${site.bucket}/ --region ${stack.region}");
        assert_eq!(result, "aws s3 rm s3://example.dev/ --region eu-central-1");
        assert_eq!(ctx.interpolate("${stack.name}"), "SiteStack");
    }

    #[test]
    fn test_env_variables_deferred() {
        let ctx = site_context();
        assert_eq!(ctx.interpolate("NODE_ENV=${env.NODE_ENV}"), "NODE_ENV=$NODE_ENV");
        assert!(ctx.unresolved("${env.NODE_ENV}").is_empty());
    }

    #[test]
    fn test_custom_variables() {
        let mut ctx = site_context();
        ctx.custom.insert("distribution".to_string(), "E2ABCDEF".to_string());

        assert_eq!(
            ctx.interpolate("aws cloudfront create-invalidation --distribution-id ${distribution}"),
            "aws cloudfront create-invalidation --distribution-id E2ABCDEF"
        );
    }

    #[test]
    fn test_unknown_variable_preserved() {
        let ctx = VariableContext::default();
        let result = ctx.interpolate("Unknown: ${unknown.var}");
        assert_eq!(result, "Unknown: ${unknown.var}");
        assert_eq!(ctx.unresolved(&result), vec!["unknown.var".to_string()]);
    }

    #[test]
    fn test_for_site() {
        let site = SiteConfig::default();
        let ctx = VariableContext::for_site(&site);
        assert_eq!(
            ctx.interpolate("${github.owner}/${github.repo}@${github.branch} -> ${site.bucket}"),
            "Walaska/walas-site@main -> narhi.dev"
        );
        assert_eq!(ctx.interpolate("${pipeline.name}"), "sitePipeline");
        assert!(ctx.unresolved("${site.bucket} ${site.index}").is_empty());
    }
}

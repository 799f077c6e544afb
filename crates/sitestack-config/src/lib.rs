//! KDL configuration for the sitestack infrastructure definition.
//!
//! This crate handles:
//! - The site configuration model and its built-in defaults
//! - Parsing `site.kdl` on top of those defaults
//! - Variable interpolation in build commands

pub mod error;
pub mod parse;
pub mod site;
pub mod variables;

pub use error::{ConfigError, ConfigResult};
pub use parse::{load_site_config, parse_site_config};
pub use site::{
    ApiConfig, BuildConfig, FunctionConfig, GitHubConfig, PipelineConfig, SiteConfig, StackConfig,
    TableConfig, WebsiteConfig,
};
pub use variables::VariableContext;

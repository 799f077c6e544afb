//! CLI command implementations.

pub mod inspect;
pub mod synth;

use anyhow::{Context, Result};
use sitestack_builder::{SiteGraph, build_site_graph};
use sitestack_config::{SiteConfig, load_site_config};
use sitestack_core::asset::DirectoryHasher;
use std::path::{Path, PathBuf};
use tracing::info;

/// Load the configuration, or the built-in defaults if the file does not exist.
///
/// Returns the configuration and the directory asset paths are relative to.
pub(crate) fn load(config: &Path) -> Result<(SiteConfig, PathBuf)> {
    if !config.exists() {
        info!(path = %config.display(), "Configuration file not found, using built-in defaults");
        return Ok((SiteConfig::default(), PathBuf::from(".")));
    }

    let site = load_site_config(config)
        .with_context(|| format!("failed to load {}", config.display()))?;
    let root = match config.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((site, root))
}

/// Load the configuration and build the validated resource graph.
pub(crate) fn build(config: &Path) -> Result<SiteGraph> {
    let (site, root) = load(config)?;
    build_site_graph(&site, &root, &DirectoryHasher).context("failed to build resource graph")
}

//! Validation and inspection commands.

use anyhow::Result;
use std::path::Path;

pub fn validate(config: &Path) -> Result<()> {
    let site = super::build(config)?;
    let graph = &site.graph;

    println!("Configuration is valid");
    println!("  stack:     {} ({})", graph.env().stack_name, graph.env().environment_uri());
    println!("  pipeline:  {}", site.stages.join(" -> "));
    println!("  assets:    {}", graph.assets().len());
    println!("  resources: {}", graph.resources().len());
    for (resource_type, count) in graph.type_counts() {
        println!("    {:<40} {}", resource_type, count);
    }
    Ok(())
}

pub fn list(config: &Path) -> Result<()> {
    let site = super::build(config)?;

    println!("{:<56} {:<36} PATH", "LOGICAL ID", "TYPE");
    for resource in site.graph.resources() {
        println!(
            "{:<56} {:<36} {}",
            resource.logical_id.as_str(),
            resource.resource_type,
            resource.path
        );
    }
    Ok(())
}

/// Needs only the configuration, not the asset directories.
pub fn buildspec(config: &Path) -> Result<()> {
    let (site, _) = super::load(config)?;
    println!("{}", site.build_spec().to_json_string()?);
    Ok(())
}

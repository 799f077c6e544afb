//! Synthesis command.

use anyhow::{Context, Result};
use sitestack_builder::CloudAssembly;
use std::path::Path;

pub fn run(config: &Path, output: &Path, print: bool) -> Result<()> {
    let site = super::build(config)?;

    if print {
        print!("{}", site.graph.template().to_json_pretty()?);
        return Ok(());
    }

    let assembly = CloudAssembly::write(&site.graph, output)
        .with_context(|| format!("failed to write cloud assembly to {}", output.display()))?;
    println!(
        "Synthesized {} ({} resources) to {}",
        site.graph.env().stack_name,
        site.graph.resources().len(),
        assembly.template_file.display()
    );
    Ok(())
}

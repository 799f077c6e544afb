//! Resource graph builder and cloud assembly writer.
//!
//! [`build_site_graph`] turns a [`SiteConfig`](sitestack_config::SiteConfig)
//! into a validated resource graph; [`CloudAssembly`] writes that graph out
//! in the layout deployment tooling reads.

pub mod assembly;
pub mod error;
pub mod site;

pub use assembly::{AssemblyManifest, CloudAssembly};
pub use error::{BuildError, BuildResult};
pub use site::{SiteGraph, build_site_graph};

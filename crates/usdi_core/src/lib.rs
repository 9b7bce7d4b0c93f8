//! usdi Core - USD scene engine and boundary adapters.
//!
//! This crate provides:
//!
//! - **USD support**: USDA parsing and writing, USDZ reading, composition
//!   of sublayers, references, payloads and variants into a `Stage`
//! - **Adapters**: scene-graph JSON, world bounds, dependency checking and
//!   USDZ packaging over an open stage
//!
//! # Example
//!
//! ```ignore
//! use usdi_core::usd::Stage;
//! use usdi_core::{compute_scene_bounds, scene_graph_json};
//!
//! let stage = Stage::open("scene.usda")?;
//! println!("{}", scene_graph_json(&stage)?);
//! if let Some(bounds) = compute_scene_bounds(&stage) {
//!     println!("center {:?}, extent {}", bounds.center, bounds.max_extent);
//! }
//! ```

pub mod bounds;
pub mod dependencies;
pub mod package;
pub mod scene_graph;
pub mod usd;

// Re-export commonly used types
pub use bounds::{compute_scene_bounds, BBoxCache, SceneBounds};
pub use dependencies::{compute_all_dependencies, DependencyCheck, DependencyContext, DependencyReport};
pub use package::{create_package, PackageOptions, PackageSummary};
pub use scene_graph::{prim_references_json, scene_graph_json};
pub use usd::{Prim, Reference, Stage};

/// Path of a file under the workspace root.
#[cfg(test)]
pub(crate) fn test_asset_path(relative: &str) -> std::path::PathBuf {
    std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../..").join(relative)
}

/// Fresh scratch directory for a test that writes files.
#[cfg(test)]
pub(crate) fn scratch_dir(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("usdi-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

//! USD scene description support.
//!
//! This module reads USDA text layers and USDZ packages, composes them into
//! a stage and writes layers back out as USDA.
//!
//! ## Supported Composition
//!
//! - Sublayers
//! - References and payloads, with list-editing (`prepend`, `delete`, ...)
//! - Variant selections
//! - `xformOp` transform stacks
//!
//! ## Not Supported
//!
//! - Binary `.usdc` layers (recognized and reported, never parsed)
//! - Inherits, specializes and relocates
//! - Layer offsets on sublayers and references
//!
//! # Example
//!
//! ```ignore
//! use usdi_core::usd::Stage;
//!
//! let stage = Stage::open("path/to/scene.usda")?;
//! for prim in stage.traverse() {
//!     println!("{} ({})", prim.path(), prim.type_name());
//! }
//! ```

mod compose;
mod edit;
mod layer;
mod parser;
pub mod path;
mod resolver;
mod stage;
mod value;
mod writer;
pub mod xform;

pub use compose::LayerStack;
pub use edit::{EditError, EditResult};
pub use layer::*;
pub use parser::{parse_layer_bytes, parse_usda, ParseError, ParseResult, MAX_NESTING_DEPTH};
pub use resolver::{
    extension_of, normalize_path, AssetLocation, PackageArchive, ResolveError, ResolveResult, Resolver,
    LAYER_EXTENSIONS,
};
pub use stage::{Attribute, InitialLoadSet, Prim, Stage, StageError, StageOptions, StageResult, Traverse};
pub use value::{format_float, quote_asset_path, quote_string, DictEntry, Value};
pub use writer::write_layer;
pub use xform::{local_transform, LocalTransform, XformOp};

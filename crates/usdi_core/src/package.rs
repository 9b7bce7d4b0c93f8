//! USDZ packaging.
//!
//! A package is a zip archive with stored (uncompressed) entries whose data
//! is 64-byte aligned. The root layer is the first entry. Text layers are
//! rewritten so their asset paths point at entries inside the archive.
//!
//! **Device-compatible mode sets the root layer's `metersPerUnit` to 1.0.**
//! Geometry is not rescaled, so an asset authored in centimetres appears
//! 100 times larger to any consumer that honours unit metadata.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::dependencies::{DependencyError, DependencyGraph, LayerNode};
use crate::usd::{extension_of, AssetLocation, ResolveError, Resolver};

/// Errors that can occur while creating a package.
#[derive(Error, Debug)]
pub enum PackageError {
    #[error("Empty asset path")]
    EmptyPath,

    #[error("Package output must be a .usdz file: {0}")]
    InvalidOutput(String),

    #[error("Dependency error: {0}")]
    Dependencies(#[from] DependencyError),

    #[error("Cannot package a root that is not a file on disk: {0}")]
    UnsupportedRoot(String),

    #[error("Cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: ResolveError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// Result type for packaging.
pub type PackageResult<T> = Result<T, PackageError>;

/// Packaging options.
#[derive(Clone, Debug)]
pub struct PackageOptions {
    /// Set the root layer's `metersPerUnit` to 1.0
    pub device_compatible: bool,
    /// Byte alignment of entry data
    pub alignment: u16,
}

impl Default for PackageOptions {
    fn default() -> Self {
        Self {
            device_compatible: false,
            alignment: 64,
        }
    }
}

/// What went into a package.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PackageSummary {
    /// Archive entry names in archive order
    pub entries: Vec<String>,
    /// Dependencies left out (unresolved, or inside another archive)
    pub skipped: Vec<String>,
}

/// Bundle `asset` and everything it depends on into the `.usdz` at
/// `output`. The archive is written next to `output` and moved into place
/// only once complete.
pub fn create_package<P: AsRef<Path>, Q: AsRef<Path>>(
    asset: P,
    output: Q,
    options: &PackageOptions,
) -> PackageResult<PackageSummary> {
    let (asset, output) = (asset.as_ref(), output.as_ref());
    if asset.as_os_str().is_empty() {
        return Err(PackageError::EmptyPath);
    }
    if extension_of(&output.to_string_lossy()).as_deref() != Some("usdz") {
        return Err(PackageError::InvalidOutput(output.display().to_string()));
    }

    let mut resolver = Resolver::new();
    let graph = DependencyGraph::collect(&mut resolver, asset)?;
    let AssetLocation::File(root_path) = &graph.layers[0] else {
        return Err(PackageError::UnsupportedRoot(graph.layers[0].to_string()));
    };
    let root_dir = root_path.parent().map(Path::to_path_buf).unwrap_or_default();

    let mut summary = PackageSummary::default();
    for unresolved in &graph.unresolved {
        log::warn!("Skipping unresolved dependency '{}'", unresolved);
        summary.skipped.push(unresolved.clone());
    }

    let mut names = EntryNames::default();
    let mut entries: Vec<(&AssetLocation, String)> = Vec::new();
    for location in graph.layers.iter().chain(&graph.assets) {
        match location {
            AssetLocation::File(path) => {
                let name = names.assign(path, &root_dir);
                entries.push((location, name));
            }
            other => {
                log::warn!("Skipping {}, it is not a file on disk", other);
                summary.skipped.push(other.to_string());
            }
        }
    }

    let entry_names: HashMap<&AssetLocation, &str> = entries.iter().map(|(l, n)| (*l, n.as_str())).collect();
    let nodes: HashMap<&AssetLocation, &LayerNode> = graph.nodes.iter().map(|n| (&n.layer.location, n)).collect();

    let tmp_path = PathBuf::from(format!("{}.tmp", output.display()));
    let written = write_archive(&tmp_path, &entries, &nodes, &entry_names, &mut resolver, options);
    if let Err(err) = written {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(err);
    }
    if let Err(err) = std::fs::rename(&tmp_path, output) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(err.into());
    }

    summary.entries = entries.into_iter().map(|(_, name)| name).collect();
    log::info!(
        "Created package {} ({} entries{})",
        output.display(),
        summary.entries.len(),
        if options.device_compatible { ", metersPerUnit = 1" } else { "" }
    );
    Ok(summary)
}

fn write_archive(
    path: &Path,
    entries: &[(&AssetLocation, String)],
    nodes: &HashMap<&AssetLocation, &LayerNode>,
    entry_names: &HashMap<&AssetLocation, &str>,
    resolver: &mut Resolver,
    options: &PackageOptions,
) -> PackageResult<()> {
    let file_options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .with_alignment(options.alignment);
    let mut writer = ZipWriter::new(File::create(path)?);

    for (index, (location, name)) in entries.iter().enumerate() {
        let bytes = match nodes.get(location) {
            Some(node) => {
                let mut layer = node.layer.clone();
                layer.remap_asset_paths(&mut |authored| {
                    let target = entry_names.get(node.resolved.get(authored)?)?;
                    Some(relative_entry_path(name, target))
                });
                if index == 0 && options.device_compatible {
                    layer.set_meters_per_unit(1.0);
                }
                layer.export_to_string().into_bytes()
            }
            None => resolver.read(location).map_err(|source| PackageError::Read {
                path: location.to_string(),
                source,
            })?,
        };

        log::debug!("Adding {} as {}", location, name);
        writer.start_file(name.as_str(), file_options)?;
        writer.write_all(&bytes)?;
    }

    writer.finish()?;
    Ok(())
}

/// Allocates unique archive entry names.
#[derive(Default)]
struct EntryNames {
    used: HashSet<String>,
}

impl EntryNames {
    /// Files under the root layer's directory keep their relative path;
    /// others go under `external/`, with a numeric suffix on collision.
    fn assign(&mut self, path: &Path, root_dir: &Path) -> String {
        if let Ok(relative) = path.strip_prefix(root_dir) {
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if self.used.insert(name.clone()) {
                return name;
            }
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "asset".to_string());
        let (stem, extension) = match file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), format!(".{}", ext)),
            _ => (file_name.clone(), String::new()),
        };

        let mut name = format!("external/{}", file_name);
        let mut suffix = 1;
        while !self.used.insert(name.clone()) {
            name = format!("external/{}_{}{}", stem, suffix, extension);
            suffix += 1;
        }
        name
    }
}

/// Anchored relative path from the entry `from` to the entry `to`.
fn relative_entry_path(from: &str, to: &str) -> String {
    let from_dirs: Vec<&str> = from.split('/').collect();
    let from_dirs = &from_dirs[..from_dirs.len() - 1];
    let to_parts: Vec<&str> = to.split('/').collect();

    let common = from_dirs
        .iter()
        .zip(&to_parts[..to_parts.len() - 1])
        .take_while(|(a, b)| a == b)
        .count();
    let ups = from_dirs.len() - common;
    let rest = to_parts[common..].join("/");

    if ups == 0 {
        format!("./{}", rest)
    } else {
        format!("{}{}", "../".repeat(ups), rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usd::{PackageArchive, Stage};
    use crate::{scratch_dir, test_asset_path};

    #[test]
    fn test_relative_entry_path() {
        assert_eq!(relative_entry_path("root.usda", "textures/a.png"), "./textures/a.png");
        assert_eq!(relative_entry_path("parts/p.usda", "textures/a.png"), "../textures/a.png");
        assert_eq!(relative_entry_path("parts/p.usda", "parts/q.usda"), "./q.usda");
        assert_eq!(relative_entry_path("a/b/c.usda", "a/d.png"), "../d.png");
    }

    #[test]
    fn test_entry_names() {
        let mut names = EntryNames::default();
        let root = Path::new("/project/scene");
        assert_eq!(names.assign(Path::new("/project/scene/tex/a.png"), root), "tex/a.png");
        assert_eq!(names.assign(Path::new("/shared/b.png"), root), "external/b.png");
        assert_eq!(names.assign(Path::new("/other/b.png"), root), "external/b_1.png");
        assert_eq!(names.assign(Path::new("/more/b.png"), root), "external/b_2.png");
    }

    #[test]
    fn test_package_units() {
        let dir = scratch_dir("package-units");
        let source = test_asset_path("assets/units_cm.usda");

        let generic = dir.join("generic.usdz");
        create_package(&source, &generic, &PackageOptions::default()).unwrap();
        let stage = Stage::open(&generic).unwrap();
        assert_eq!(stage.meters_per_unit(), 0.01);
        assert_eq!(stage.prim_at_path("/Asset/Body").unwrap().type_name(), "Cube");

        let device = dir.join("device.usdz");
        let options = PackageOptions {
            device_compatible: true,
            ..Default::default()
        };
        create_package(&source, &device, &options).unwrap();
        let stage = Stage::open(&device).unwrap();
        assert_eq!(stage.meters_per_unit(), 1.0);

        // source asset is left alone
        assert_eq!(Stage::open(&source).unwrap().meters_per_unit(), 0.01);
        assert!(!dir.join("device.usdz.tmp").exists());
    }

    #[test]
    fn test_package_dependencies() {
        let dir = scratch_dir("package-deps");
        let output = dir.join("deps.usdz");
        let summary = create_package(test_asset_path("assets/deps/root.usda"), &output, &PackageOptions::default())
            .unwrap();

        assert_eq!(
            summary.entries,
            vec!["root.usda", "lighting.usda", "parts/part.usda", "textures/wood.png"]
        );
        assert_eq!(summary.skipped, vec!["./parts/missing.usda", "./textures/missing.png"]);

        let archive = PackageArchive::open(&output).unwrap();
        assert_eq!(archive.root_layer(), Some("root.usda"));
        let texture = std::fs::read(test_asset_path("assets/deps/textures/wood.png")).unwrap();
        assert_eq!(archive.read("textures/wood.png"), Some(texture.as_slice()));

        let stage = Stage::open(&output).unwrap();
        assert_eq!(stage.prim_at_path("/Root/Part/Body").unwrap().type_name(), "Cube");
        assert!(stage.prim_at_path("/Root/Key").is_some());
        assert!(stage.root_layer().read_only);
    }

    #[test]
    fn test_package_external_assets() {
        let dir = scratch_dir("package-external");
        std::fs::create_dir_all(dir.join("scene")).unwrap();
        std::fs::create_dir_all(dir.join("shared")).unwrap();
        std::fs::write(dir.join("shared/tex.png"), b"texture").unwrap();
        std::fs::write(
            dir.join("scene/root.usda"),
            "#usda 1.0\ndef Shader \"S\" {\n    asset inputs:file = @../shared/tex.png@\n}\n",
        )
        .unwrap();

        let output = dir.join("out.usdz");
        let summary = create_package(dir.join("scene/root.usda"), &output, &PackageOptions::default()).unwrap();
        assert_eq!(summary.entries, vec!["root.usda", "external/tex.png"]);

        let archive = PackageArchive::open(&output).unwrap();
        let root = std::str::from_utf8(archive.read("root.usda").unwrap()).unwrap();
        assert!(root.contains("@./external/tex.png@"));
    }

    #[test]
    fn test_package_failures() {
        let dir = scratch_dir("package-failures");
        let source = test_asset_path("assets/units_cm.usda");

        assert!(matches!(
            create_package("", dir.join("a.usdz"), &PackageOptions::default()),
            Err(PackageError::EmptyPath)
        ));
        assert!(matches!(
            create_package(&source, dir.join("a.zip"), &PackageOptions::default()),
            Err(PackageError::InvalidOutput(_))
        ));

        let output = dir.join("missing.usdz");
        assert!(matches!(
            create_package(dir.join("missing.usda"), &output, &PackageOptions::default()),
            Err(PackageError::Dependencies(_))
        ));
        assert!(!output.exists());
    }
}

//! Asset resolution.
//!
//! Asset paths authored in a layer are anchored to the directory of that
//! layer. Files inside a `.usdz` archive resolve to other entries of the
//! same archive; `archive.usdz[entry]` names an entry directly.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use super::layer::Layer;
use super::parser::{parse_layer_bytes, ParseError};

/// File extensions that name scene description layers.
pub const LAYER_EXTENSIONS: [&str; 4] = ["usda", "usd", "usdc", "usdz"];

/// Errors that can occur while locating or reading assets.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Asset not found: {0}")]
    NotFound(String),

    #[error("Archive error in {path}: {source}")]
    Archive {
        path: String,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Archive {0} contains no layer")]
    NoRootLayer(String),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
}

/// Result type for resolver operations.
pub type ResolveResult<T> = Result<T, ResolveError>;

/// A resolved asset.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AssetLocation {
    /// A file on disk
    File(PathBuf),

    /// An entry inside a `.usdz` archive
    Packaged { archive: PathBuf, entry: String },

    /// A layer with no backing asset (parsed from a string)
    Anonymous(String),
}

impl AssetLocation {
    pub fn is_packaged(&self) -> bool {
        matches!(self, AssetLocation::Packaged { .. })
    }

    /// Lower-cased extension of the file or entry name.
    pub fn extension(&self) -> Option<String> {
        let name = match self {
            AssetLocation::File(path) => path.file_name()?.to_str()?,
            AssetLocation::Packaged { entry, .. } => entry.rsplit('/').next()?,
            AssetLocation::Anonymous(_) => return None,
        };
        extension_of(name)
    }

    /// True when the extension names a scene description layer.
    pub fn is_layer(&self) -> bool {
        self.extension()
            .is_some_and(|ext| LAYER_EXTENSIONS.contains(&ext.as_str()))
    }

    /// The on-disk file path, when there is one.
    pub fn file_path(&self) -> Option<&Path> {
        match self {
            AssetLocation::File(path) => Some(path),
            _ => None,
        }
    }
}

impl fmt::Display for AssetLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetLocation::File(path) => write!(f, "{}", path.display()),
            AssetLocation::Packaged { archive, entry } => write!(f, "{}[{}]", archive.display(), entry),
            AssetLocation::Anonymous(name) => write!(f, "anon:{}", name),
        }
    }
}

/// Lower-cased extension of a file name.
pub fn extension_of(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Split `outer[inner]` package-relative paths.
fn split_package_path(asset_path: &str) -> Option<(&str, &str)> {
    let inner = asset_path.strip_suffix(']')?;
    let open = inner.find('[')?;
    Some((&inner[..open], &inner[open + 1..]))
}

/// Lexically normalize a path (drop `.`, fold `..`).
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Join an archive-relative path onto the directory of `entry`.
fn join_entry(entry: &str, relative: &str) -> String {
    let mut parts: Vec<&str> = entry.split('/').collect();
    parts.pop();
    for part in relative.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

/// In-memory contents of a `.usdz` archive, in archive order.
#[derive(Debug, Default)]
pub struct PackageArchive {
    entries: Vec<(String, Vec<u8>)>,
}

impl PackageArchive {
    /// Read every file entry of a zip archive.
    pub fn open(path: &Path) -> ResolveResult<Self> {
        let file = File::open(path)?;
        let archive_error = |source| ResolveError::Archive {
            path: path.display().to_string(),
            source,
        };
        let mut archive = zip::ZipArchive::new(file).map_err(archive_error)?;

        let mut entries = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let mut entry = archive.by_index(index).map_err(archive_error)?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            let mut data = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut data)?;
            entries.push((name, data));
        }

        Ok(Self { entries })
    }

    pub fn entry_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn read(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, data)| data.as_slice())
    }

    /// First entry that is a layer; the archive's root layer.
    pub fn root_layer(&self) -> Option<&str> {
        self.entry_names()
            .find(|name| extension_of(name).is_some_and(|ext| LAYER_EXTENSIONS.contains(&ext.as_str())))
    }
}

/// Resolves asset paths to locations and reads their contents.
///
/// Archives are read once and kept in memory.
#[derive(Debug, Default)]
pub struct Resolver {
    archives: HashMap<PathBuf, Arc<PackageArchive>>,
}

impl Resolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load (or fetch the cached copy of) an archive.
    pub fn archive(&mut self, path: &Path) -> ResolveResult<Arc<PackageArchive>> {
        if let Some(archive) = self.archives.get(path) {
            return Ok(Arc::clone(archive));
        }
        log::debug!("Reading archive {}", path.display());
        let archive = Arc::new(PackageArchive::open(path)?);
        self.archives.insert(path.to_path_buf(), Arc::clone(&archive));
        Ok(archive)
    }

    /// Resolve a root path given by a caller (relative to the working
    /// directory). Archives resolve to their root layer entry.
    pub fn resolve_root(&mut self, path: &Path) -> ResolveResult<AssetLocation> {
        let text = path.to_string_lossy();
        if let Some((outer, inner)) = split_package_path(&text) {
            let archive_path = normalize_path(Path::new(outer));
            let archive = self.archive(&archive_path)?;
            if !archive.contains(inner) {
                return Err(ResolveError::NotFound(text.into_owned()));
            }
            return Ok(AssetLocation::Packaged {
                archive: archive_path,
                entry: inner.to_string(),
            });
        }

        if !path.is_file() {
            return Err(ResolveError::NotFound(path.display().to_string()));
        }
        self.layer_location(AssetLocation::File(normalize_path(path)))
    }

    /// Resolve an authored asset path against the layer that authored it.
    /// Returns `None` when nothing exists at the resolved location.
    pub fn resolve(&mut self, asset_path: &str, anchor: &AssetLocation) -> Option<AssetLocation> {
        if asset_path.is_empty() {
            return None;
        }

        if let Some((outer, inner)) = split_package_path(asset_path) {
            let archive = self.resolve(outer, anchor)?;
            let AssetLocation::File(archive_path) = archive else {
                return None;
            };
            let contents = self.archive(&archive_path).ok()?;
            return contents.contains(inner).then(|| AssetLocation::Packaged {
                archive: archive_path,
                entry: inner.to_string(),
            });
        }

        let candidate = Path::new(asset_path);
        match anchor {
            AssetLocation::Packaged { archive, entry } if !candidate.is_absolute() => {
                let name = join_entry(entry, asset_path);
                let contents = self.archive(archive).ok()?;
                contents.contains(&name).then(|| AssetLocation::Packaged {
                    archive: archive.clone(),
                    entry: name,
                })
            }
            _ => {
                let joined = if candidate.is_absolute() {
                    candidate.to_path_buf()
                } else {
                    let base = match anchor {
                        AssetLocation::File(path) => path.parent().map(Path::to_path_buf).unwrap_or_default(),
                        AssetLocation::Packaged { archive, .. } => {
                            archive.parent().map(Path::to_path_buf).unwrap_or_default()
                        }
                        AssetLocation::Anonymous(_) => PathBuf::new(),
                    };
                    base.join(candidate)
                };
                let resolved = normalize_path(&joined);
                resolved.is_file().then_some(AssetLocation::File(resolved))
            }
        }
    }

    /// Location of the layer to open for a resolved asset. Archives map to
    /// their root layer entry; everything else is returned unchanged.
    pub fn layer_location(&mut self, location: AssetLocation) -> ResolveResult<AssetLocation> {
        match &location {
            AssetLocation::File(path) if location.extension().as_deref() == Some("usdz") => {
                let archive = self.archive(path)?;
                let entry = archive
                    .root_layer()
                    .ok_or_else(|| ResolveError::NoRootLayer(path.display().to_string()))?;
                Ok(AssetLocation::Packaged {
                    archive: path.clone(),
                    entry: entry.to_string(),
                })
            }
            _ => Ok(location),
        }
    }

    /// Read the bytes of an asset.
    pub fn read(&mut self, location: &AssetLocation) -> ResolveResult<Vec<u8>> {
        match location {
            AssetLocation::File(path) => Ok(std::fs::read(path)?),
            AssetLocation::Packaged { archive, entry } => {
                let contents = self.archive(archive)?;
                contents
                    .read(entry)
                    .map(<[u8]>::to_vec)
                    .ok_or_else(|| ResolveError::NotFound(location.to_string()))
            }
            AssetLocation::Anonymous(_) => Err(ResolveError::NotFound(location.to_string())),
        }
    }

    /// Open and parse the layer at a resolved location.
    pub fn open_layer(&mut self, location: AssetLocation) -> ResolveResult<Layer> {
        let location = self.layer_location(location)?;
        let bytes = self.read(&location)?;
        log::debug!("Parsing layer {}", location);
        Ok(parse_layer_bytes(&bytes, location)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("scene.USDA"), Some("usda".to_string()));
        assert_eq!(extension_of("textures/wood.png"), Some("png".to_string()));
        assert_eq!(extension_of(".hidden"), None);
        assert_eq!(extension_of("README"), None);
    }

    #[test]
    fn test_split_package_path() {
        assert_eq!(split_package_path("a.usdz[b/c.usda]"), Some(("a.usdz", "b/c.usda")));
        assert_eq!(split_package_path("a.usda"), None);
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(Path::new("a/./b/../c.usda")), PathBuf::from("a/c.usda"));
        assert_eq!(normalize_path(Path::new("../x.usda")), PathBuf::from("../x.usda"));
    }

    #[test]
    fn test_join_entry() {
        assert_eq!(join_entry("scene.usda", "./tex/a.png"), "tex/a.png");
        assert_eq!(join_entry("sub/scene.usda", "../a.usda"), "a.usda");
    }

    #[test]
    fn test_resolve_relative_to_anchor() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../assets/ref_test");
        let anchor = AssetLocation::File(dir.join("ref_test.usda"));
        let mut resolver = Resolver::new();

        let resolved = resolver.resolve("./cube.usda", &anchor).unwrap();
        assert_eq!(resolved, AssetLocation::File(normalize_path(&dir.join("cube.usda"))));
        assert!(resolver.resolve("./missing.usda", &anchor).is_none());
        assert!(resolver.resolve("", &anchor).is_none());
    }

    #[test]
    fn test_resolve_root_missing() {
        let mut resolver = Resolver::new();
        let err = resolver.resolve_root(Path::new("/nonexistent/scene.usda")).unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(_)));
    }
}

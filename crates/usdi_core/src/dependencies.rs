//! Transitive asset dependencies of a layer.
//!
//! Starting from a root layer, every sublayer, reference, payload and
//! asset-valued attribute is resolved. Text layers found this way are walked
//! in turn; everything else is recorded as an asset.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

use thiserror::Error;

use crate::usd::{AssetLocation, Layer, ParseError, ResolveError, Resolver, Value};

/// Errors that can occur while computing dependencies.
#[derive(Error, Debug)]
pub enum DependencyError {
    #[error("Empty asset path")]
    EmptyPath,

    #[error("Cannot open root layer: {0}")]
    Open(#[from] ResolveError),
}

/// Every dependency of an asset.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DependencyReport {
    /// Layers in discovery order, the root first
    pub layers: Vec<AssetLocation>,
    /// Non-layer assets (textures, audio, ...)
    pub assets: Vec<AssetLocation>,
    /// Authored asset paths that did not resolve, de-duplicated
    pub unresolved: Vec<String>,
}

/// A walked text layer and what its authored asset paths resolved to.
#[derive(Debug)]
pub(crate) struct LayerNode {
    pub(crate) layer: Layer,
    pub(crate) resolved: HashMap<String, AssetLocation>,
}

/// Full result of a dependency walk, kept for packaging.
#[derive(Debug)]
pub(crate) struct DependencyGraph {
    /// Parsed text layers, root first
    pub(crate) nodes: Vec<LayerNode>,
    /// Every layer (parsed or binary) in discovery order
    pub(crate) layers: Vec<AssetLocation>,
    pub(crate) assets: Vec<AssetLocation>,
    pub(crate) unresolved: Vec<String>,
}

impl DependencyGraph {
    /// Walk every dependency reachable from `root`.
    pub(crate) fn collect(resolver: &mut Resolver, root: &Path) -> Result<Self, DependencyError> {
        if root.as_os_str().is_empty() {
            return Err(DependencyError::EmptyPath);
        }

        let location = resolver.resolve_root(root)?;
        let root_layer = resolver.open_layer(location)?;

        let mut graph = DependencyGraph {
            nodes: Vec::new(),
            layers: vec![root_layer.location.clone()],
            assets: Vec::new(),
            unresolved: Vec::new(),
        };
        let mut seen: HashSet<AssetLocation> = HashSet::from([root_layer.location.clone()]);
        let mut queue = VecDeque::from([root_layer]);

        while let Some(layer) = queue.pop_front() {
            let mut resolved = HashMap::new();

            for authored in authored_asset_paths(&layer) {
                if resolved.contains_key(&authored) {
                    continue;
                }
                let Some(location) = resolver.resolve(&authored, &layer.location) else {
                    log::warn!("{}: unresolved asset path '{}'", layer.location, authored);
                    graph.add_unresolved(authored);
                    continue;
                };
                resolved.insert(authored.clone(), location.clone());

                if !seen.insert(location.clone()) {
                    continue;
                }
                if !location.is_layer() {
                    graph.assets.push(location);
                    continue;
                }

                match resolver.open_layer(location.clone()) {
                    Ok(dependency) => {
                        graph.layers.push(location);
                        queue.push_back(dependency);
                    }
                    Err(ResolveError::Parse(ParseError::UnsupportedFormat(_))) => {
                        log::debug!("{}: binary layer, not walked", location);
                        graph.layers.push(location);
                    }
                    Err(err) => {
                        log::warn!("{}: cannot open '{}': {}", layer.location, authored, err);
                        graph.add_unresolved(authored);
                    }
                }
            }

            graph.nodes.push(LayerNode { layer, resolved });
        }

        Ok(graph)
    }

    fn add_unresolved(&mut self, authored: String) {
        if !self.unresolved.contains(&authored) {
            self.unresolved.push(authored);
        }
    }

    pub(crate) fn into_report(self) -> DependencyReport {
        DependencyReport {
            layers: self.layers,
            assets: self.assets,
            unresolved: self.unresolved,
        }
    }
}

/// Every asset path authored in a layer, in authoring order. Deleted
/// references and payloads are not dependencies.
fn authored_asset_paths(layer: &Layer) -> Vec<String> {
    let mut paths: Vec<String> = layer.sub_layers.clone();
    let mut push = |path: &str| {
        if !path.is_empty() && !paths.iter().any(|p| p == path) {
            paths.push(path.to_string());
        }
    };

    for entry in &layer.metadata {
        entry.value.visit(&mut |v| {
            if let Some(asset) = v.as_asset_path() {
                push(asset);
            }
        });
    }

    layer.for_each_prim_spec(&mut |spec| {
        for arcs in [&spec.references, &spec.payloads] {
            for reference in arcs.items() {
                if !arcs.deleted.contains(reference) {
                    push(&reference.asset_path);
                }
            }
        }
        let values = spec
            .metadata
            .iter()
            .map(|m| &m.value)
            .chain(spec.properties.iter().flat_map(|p| p.values()));
        for value in values {
            value.visit(&mut |v| {
                if let Value::AssetPath(asset) = v {
                    push(asset);
                }
            });
        }
    });

    paths
}

/// Compute all layers and assets an asset depends on, and the authored
/// paths that could not be resolved.
///
/// The root itself must open; anything below it that fails is reported in
/// `unresolved` rather than as an error.
pub fn compute_all_dependencies<P: AsRef<Path>>(asset_path: P) -> Result<DependencyReport, DependencyError> {
    let mut resolver = Resolver::new();
    DependencyGraph::collect(&mut resolver, asset_path.as_ref()).map(DependencyGraph::into_report)
}

/// Outcome of a dependency check.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DependencyCheck {
    pub success: bool,
    pub unresolved_count: usize,
}

/// Holds the unresolved paths of the most recent check until the next check
/// or an explicit clear.
#[derive(Clone, Debug, Default)]
pub struct DependencyContext {
    unresolved: Vec<String>,
}

impl DependencyContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check the dependencies of `asset_path`, replacing the stored list.
    ///
    /// An empty path or a root that cannot be opened fails with no entries.
    /// Any other error fails with a single `internal error` entry.
    pub fn check(&mut self, asset_path: &str) -> DependencyCheck {
        self.clear();

        match compute_all_dependencies(asset_path) {
            Ok(report) => {
                self.unresolved = report.unresolved;
                DependencyCheck {
                    success: true,
                    unresolved_count: self.unresolved.len(),
                }
            }
            Err(DependencyError::EmptyPath)
            | Err(DependencyError::Open(ResolveError::NotFound(_)))
            | Err(DependencyError::Open(ResolveError::Parse(_))) => DependencyCheck::default(),
            Err(err) => {
                self.record_failure(&format!("internal error: {}", err));
                DependencyCheck {
                    success: false,
                    unresolved_count: 1,
                }
            }
        }
    }

    /// Replace the stored list with a single failure message.
    pub fn record_failure(&mut self, message: &str) {
        self.unresolved.clear();
        self.unresolved.push(message.to_string());
    }

    /// Unresolved path at `index`, or `""` when out of range.
    pub fn unresolved_path(&self, index: i64) -> &str {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.unresolved.get(i))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn unresolved_paths(&self) -> &[String] {
        &self.unresolved
    }

    pub fn clear(&mut self) {
        self.unresolved.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::{scratch_dir, test_asset_path};

    fn file_name(location: &AssetLocation) -> String {
        match location {
            AssetLocation::File(path) => path.file_name().unwrap().to_string_lossy().into_owned(),
            other => other.to_string(),
        }
    }

    #[test]
    fn test_compute_all_dependencies() {
        let report = compute_all_dependencies(test_asset_path("assets/deps/root.usda")).unwrap();

        let layers: Vec<String> = report.layers.iter().map(file_name).collect();
        assert_eq!(layers, vec!["root.usda", "lighting.usda", "part.usda"]);

        let assets: Vec<String> = report.assets.iter().map(file_name).collect();
        assert_eq!(assets, vec!["wood.png"]);

        assert_eq!(report.unresolved, vec!["./parts/missing.usda", "./textures/missing.png"]);
    }

    #[test]
    fn test_missing_root() {
        let err = compute_all_dependencies("/no/such/asset.usda").unwrap_err();
        assert!(matches!(err, DependencyError::Open(ResolveError::NotFound(_))));
        assert!(matches!(compute_all_dependencies(""), Err(DependencyError::EmptyPath)));
    }

    #[test]
    fn test_binary_layers_are_listed_not_walked() {
        let dir = scratch_dir("deps-binary");
        std::fs::write(
            dir.join("root.usda"),
            "#usda 1.0\ndef \"A\" (\n    references = @./model.usdc@\n) {}\n",
        )
        .unwrap();
        std::fs::write(dir.join("model.usdc"), b"PXR-USDC\x00\x08\x00\x00").unwrap();

        let report = compute_all_dependencies(dir.join("root.usda")).unwrap();
        let layers: Vec<String> = report.layers.iter().map(file_name).collect();
        assert_eq!(layers, vec!["root.usda", "model.usdc"]);
        assert!(report.unresolved.is_empty());
    }

    #[test]
    fn test_broken_layer_is_unresolved() {
        let dir = scratch_dir("deps-broken");
        std::fs::write(dir.join("root.usda"), "#usda 1.0\n(\n    subLayers = [@./broken.usda@]\n)\n").unwrap();
        std::fs::write(dir.join("broken.usda"), "#usda 1.0\ndef \"Open\" {\n").unwrap();

        let report = compute_all_dependencies(dir.join("root.usda")).unwrap();
        assert_eq!(report.layers.len(), 1);
        assert_eq!(report.unresolved, vec!["./broken.usda"]);
    }

    #[test]
    fn test_context_check() {
        let mut context = DependencyContext::new();
        let check = context.check(&test_asset_path("assets/deps/root.usda").to_string_lossy());

        assert_eq!(
            check,
            DependencyCheck {
                success: true,
                unresolved_count: 2
            }
        );
        assert_eq!(context.unresolved_path(0), "./parts/missing.usda");
        assert_eq!(context.unresolved_path(1), "./textures/missing.png");
        assert_eq!(context.unresolved_path(2), "");
        assert_eq!(context.unresolved_path(-1), "");

        context.clear();
        assert_eq!(context.unresolved_path(0), "");
    }

    #[test]
    fn test_context_failures() {
        let mut context = DependencyContext::new();
        context.record_failure("stale");

        assert_eq!(context.check(""), DependencyCheck::default());
        assert!(context.unresolved_paths().is_empty());

        assert_eq!(context.check("/no/such/asset.usda"), DependencyCheck::default());
        let invalid = test_asset_path("assets/invalid.usda");
        assert_eq!(context.check(&invalid.to_string_lossy()), DependencyCheck::default());
    }

    #[test]
    fn test_context_internal_error() {
        let dir = scratch_dir("deps-corrupt");
        let corrupt: PathBuf = dir.join("corrupt.usdz");
        std::fs::write(&corrupt, b"definitely not a zip archive").unwrap();

        let mut context = DependencyContext::new();
        let check = context.check(&corrupt.to_string_lossy());
        assert_eq!(
            check,
            DependencyCheck {
                success: false,
                unresolved_count: 1
            }
        );
        assert!(context.unresolved_path(0).starts_with("internal error: "));
    }
}

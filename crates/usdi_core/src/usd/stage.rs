//! Composed stages and prims.

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;

use super::compose::{load_referenced_stacks, Composer, LayerStack};
use super::layer::{Layer, MetadataEntry, PrimSpec, PropertySpec, Reference, Specifier};
use super::parser::ParseError;
use super::path::{components, is_absolute, ABSOLUTE_ROOT};
use super::resolver::{AssetLocation, ResolveError, Resolver};
use super::value::Value;

/// Errors that can occur while opening or saving a stage.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("Empty stage path")]
    EmptyPath,

    #[error("Stage not found: {0}")]
    NotFound(String),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Resolve error: {0}")]
    Resolve(ResolveError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Layer is read-only: {0}")]
    ReadOnlyLayer(String),

    #[error("Layer has no file to save to: {0}")]
    NotFileBacked(String),
}

impl From<ResolveError> for StageError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NotFound(path) => StageError::NotFound(path),
            ResolveError::Parse(e) => StageError::Parse(e),
            ResolveError::Io(e) => StageError::Io(e),
            other => StageError::Resolve(other),
        }
    }
}

/// Result type for stage operations.
pub type StageResult<T> = Result<T, StageError>;

/// Which payloads are loaded when a stage is opened.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InitialLoadSet {
    #[default]
    LoadAll,
    LoadNone,
}

/// Options for opening a stage.
#[derive(Clone, Debug, Default)]
pub struct StageOptions {
    pub load: InitialLoadSet,
}

/// A composed prim.
#[derive(Clone, Debug)]
pub struct Prim {
    pub(crate) name: String,
    pub(crate) path: String,
    pub(crate) type_name: String,
    pub(crate) specifier: Specifier,
    pub(crate) metadata: Vec<MetadataEntry>,
    pub(crate) properties: Vec<PropertySpec>,
    pub(crate) children: Vec<Prim>,
    pub(crate) references: Vec<Reference>,
}

impl Prim {
    pub(crate) fn new(name: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            type_name: String::new(),
            specifier: Specifier::Over,
            metadata: Vec::new(),
            properties: Vec::new(),
            children: Vec::new(),
            references: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Schema type name; empty for typeless prims.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn specifier(&self) -> Specifier {
        self.specifier
    }

    pub fn is_pseudo_root(&self) -> bool {
        self.path == ABSOLUTE_ROOT
    }

    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.iter().find(|m| m.key == key).map(|m| &m.value)
    }

    /// `active = false` deactivates a prim and its subtree.
    pub fn is_active(&self) -> bool {
        self.metadata("active").and_then(Value::as_bool).unwrap_or(true)
    }

    pub fn is_defined(&self) -> bool {
        self.specifier != Specifier::Over
    }

    pub fn is_abstract(&self) -> bool {
        self.specifier == Specifier::Class
    }

    /// The default traversal predicate: defined, active and not abstract.
    pub fn is_default_visible(&self) -> bool {
        self.specifier == Specifier::Def && self.is_active()
    }

    /// All children, in composed order.
    pub fn children(&self) -> &[Prim] {
        &self.children
    }

    /// Children that pass the default predicate.
    pub fn default_children(&self) -> impl DoubleEndedIterator<Item = &Prim> {
        self.children.iter().filter(|c| c.is_default_visible())
    }

    pub fn child(&self, name: &str) -> Option<&Prim> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn properties(&self) -> &[PropertySpec] {
        &self.properties
    }

    /// An attribute by name (relationships are not attributes).
    pub fn attribute(&self, name: &str) -> Option<Attribute<'_>> {
        self.properties
            .iter()
            .find(|p| p.name == name && !p.is_relationship())
            .map(|spec| Attribute { spec })
    }

    /// Target paths of a relationship, empty when it is not authored.
    pub fn relationship_targets(&self, name: &str) -> Vec<String> {
        let Some(spec) = self.properties.iter().find(|p| p.name == name && p.is_relationship()) else {
            return Vec::new();
        };
        let mut targets = Vec::new();
        if let Some(value) = &spec.default {
            value.visit(&mut |v| {
                if let Value::Path(path) = v {
                    targets.push(path.clone());
                }
            });
        }
        targets
    }

    /// Reference arcs introduced on this prim that resolved while composing.
    pub fn direct_references(&self) -> &[Reference] {
        &self.references
    }

    /// Authored-form copy of this prim and its subtree, without arcs.
    pub fn to_spec(&self) -> PrimSpec {
        let mut spec = PrimSpec::new(self.specifier, self.type_name.clone(), self.name.clone(), self.path.clone());
        spec.metadata = self.metadata.clone();
        spec.properties = self.properties.clone();
        spec.children = self.children.iter().map(Prim::to_spec).collect();
        spec
    }
}

/// Read-only view of a composed attribute.
#[derive(Clone, Copy, Debug)]
pub struct Attribute<'a> {
    spec: &'a PropertySpec,
}

impl<'a> Attribute<'a> {
    pub fn name(&self) -> &'a str {
        &self.spec.name
    }

    /// Declared value type (`double3`, `token[]`, ...).
    pub fn type_name(&self) -> &'a str {
        self.spec.type_name()
    }

    /// Value at the default time. Time samples are not evaluated here and a
    /// blocked (`None`) value reads as no value.
    pub fn get(&self) -> Option<&'a Value> {
        match &self.spec.default {
            Some(Value::None) | None => None,
            Some(value) => Some(value),
        }
    }

    pub fn time_samples(&self) -> Option<&'a Value> {
        self.spec.time_samples.as_ref()
    }

    pub fn is_custom(&self) -> bool {
        self.spec.custom
    }
}

/// Pre-order iterator over prims passing the default predicate.
pub struct Traverse<'a> {
    stack: Vec<&'a Prim>,
}

impl<'a> Iterator for Traverse<'a> {
    type Item = &'a Prim;

    fn next(&mut self) -> Option<&'a Prim> {
        let prim = self.stack.pop()?;
        self.stack.extend(prim.default_children().rev());
        Some(prim)
    }
}

/// A composed scene opened from a root layer.
#[derive(Debug)]
pub struct Stage {
    root_stack: LayerStack,
    stacks: HashMap<AssetLocation, LayerStack>,
    resolver: Resolver,
    options: StageOptions,
    pseudo_root: Prim,
}

impl Stage {
    /// Open a stage, loading all payloads.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use usdi_core::usd::Stage;
    ///
    /// let stage = Stage::open("scene.usda")?;
    /// for prim in stage.traverse() {
    ///     println!("{} {}", prim.path(), prim.type_name());
    /// }
    /// ```
    pub fn open<P: AsRef<Path>>(path: P) -> StageResult<Self> {
        Self::open_with(path, StageOptions::default())
    }

    /// Open a stage with explicit options.
    pub fn open_with<P: AsRef<Path>>(path: P, options: StageOptions) -> StageResult<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(StageError::EmptyPath);
        }

        let mut resolver = Resolver::new();
        let location = resolver.resolve_root(path)?;
        log::debug!("Opening stage {}", location);
        let root_layer = resolver.open_layer(location)?;
        Ok(Self::build(root_layer, resolver, options))
    }

    /// Compose a stage around an already-parsed root layer.
    pub fn from_root_layer(root_layer: Layer, options: StageOptions) -> Self {
        Self::build(root_layer, Resolver::new(), options)
    }

    fn build(root_layer: Layer, mut resolver: Resolver, options: StageOptions) -> Self {
        let root_stack = LayerStack::build(&mut resolver, root_layer);
        let mut stage = Self {
            root_stack,
            stacks: HashMap::new(),
            resolver,
            options,
            pseudo_root: Prim::new("", ABSOLUTE_ROOT),
        };
        stage.recompose();
        stage
    }

    /// Rebuild the composed prim tree from the current layers.
    pub fn recompose(&mut self) {
        let load_payloads = self.options.load == InitialLoadSet::LoadAll;
        load_referenced_stacks(&mut self.resolver, &self.root_stack, &mut self.stacks, load_payloads);
        let pseudo_root =
            Composer::new(&self.root_stack, &self.stacks, &mut self.resolver, load_payloads).compose_root();
        self.pseudo_root = pseudo_root;
    }

    pub fn root_layer(&self) -> &Layer {
        self.root_stack.root()
    }

    pub(crate) fn root_layer_mut(&mut self) -> &mut Layer {
        self.root_stack.root_mut()
    }

    pub fn layer_stack(&self) -> &LayerStack {
        &self.root_stack
    }

    pub fn pseudo_root(&self) -> &Prim {
        &self.pseudo_root
    }

    /// The prim at an absolute path, if it exists on the composed stage.
    pub fn prim_at_path(&self, path: &str) -> Option<&Prim> {
        if !is_absolute(path) {
            return None;
        }
        let mut prim = &self.pseudo_root;
        for name in components(path) {
            prim = prim.child(name)?;
        }
        Some(prim)
    }

    /// The prim named by the root layer's `defaultPrim` metadata.
    pub fn default_prim(&self) -> Option<&Prim> {
        let name = self.root_layer().default_prim()?;
        self.prim_at_path(&format!("/{}", name))
    }

    /// Linear unit of the stage, 0.01 (centimetres) when not authored.
    pub fn meters_per_unit(&self) -> f64 {
        self.root_layer().meters_per_unit().unwrap_or(0.01)
    }

    /// Up axis of the stage, `Y` when not authored.
    pub fn up_axis(&self) -> &str {
        self.root_layer().up_axis().unwrap_or("Y")
    }

    /// Pre-order traversal using the default predicate.
    pub fn traverse(&self) -> Traverse<'_> {
        Traverse {
            stack: self.pseudo_root.default_children().rev().collect(),
        }
    }

    /// Flatten the composed stage into a single layer with no arcs.
    pub fn flatten(&self) -> Layer {
        let root = self.root_layer();
        let mut layer = Layer::new(AssetLocation::Anonymous("flattened".into()));
        layer.metadata.push(MetadataEntry::new(
            "doc",
            Value::String(format!("Generated from Composed Stage of root layer {}\n", root.location)),
        ));
        for entry in &root.metadata {
            if entry.key != "doc" {
                layer.metadata.push(entry.clone());
            }
        }
        layer.root.children = self.pseudo_root.children.iter().map(Prim::to_spec).collect();
        layer
    }

    /// Flattened stage as USDA text.
    pub fn export_to_string(&self) -> String {
        self.flatten().export_to_string()
    }

    /// Write the flattened stage to `path`.
    pub fn export<P: AsRef<Path>>(&self, path: P) -> StageResult<()> {
        self.flatten().export(path.as_ref())?;
        Ok(())
    }

    /// Write the root layer back to its file.
    pub fn save(&mut self) -> StageResult<()> {
        let layer = self.root_stack.root_mut();
        if layer.read_only {
            return Err(StageError::ReadOnlyLayer(layer.location.to_string()));
        }
        let Some(path) = layer.location.file_path().map(Path::to_path_buf) else {
            return Err(StageError::NotFileBacked(layer.location.to_string()));
        };
        layer.export(&path)?;
        layer.dirty = false;
        log::debug!("Saved {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usd::parse_usda;
    use crate::test_asset_path;

    fn stage(content: &str) -> Stage {
        let layer = parse_usda(content, AssetLocation::Anonymous("test".into())).unwrap();
        Stage::from_root_layer(layer, StageOptions::default())
    }

    #[test]
    fn test_open_empty_path() {
        assert!(matches!(Stage::open(""), Err(StageError::EmptyPath)));
    }

    #[test]
    fn test_open_missing_file() {
        assert!(matches!(
            Stage::open("/definitely/not/here.usda"),
            Err(StageError::NotFound(_))
        ));
    }

    #[test]
    fn test_open_invalid_file() {
        let err = Stage::open(test_asset_path("assets/invalid.usda")).unwrap_err();
        assert!(matches!(err, StageError::Parse(_)));
    }

    #[test]
    fn test_open_triangle() {
        let stage = Stage::open(test_asset_path("assets/triangle.usda")).unwrap();
        let mesh = stage.prim_at_path("/Triangle").unwrap();
        assert_eq!(mesh.type_name(), "Mesh");
        assert_eq!(stage.default_prim().unwrap().path(), "/Triangle");
        assert!(stage.prim_at_path("Triangle").is_none());
    }

    #[test]
    fn test_stage_metadata_fallbacks() {
        let stage = stage("#usda 1.0\n");
        assert_eq!(stage.meters_per_unit(), 0.01);
        assert_eq!(stage.up_axis(), "Y");
        assert!(stage.default_prim().is_none());
        assert!(stage.pseudo_root().children().is_empty());
    }

    #[test]
    fn test_traverse_default_predicate() {
        let stage = stage(
            r#"#usda 1.0
def Xform "A" {
    def "A1" {}
    def "Off" (
        active = false
    ) {
        def "Hidden" {}
    }
}
class "Template" {}
def "B" {}
"#,
        );

        let paths: Vec<&str> = stage.traverse().map(Prim::path).collect();
        assert_eq!(paths, vec!["/A", "/A/A1", "/B"]);
    }

    #[test]
    fn test_attribute_get() {
        let stage = stage(
            r#"#usda 1.0
def Sphere "Ball" {
    double radius = 2.5
    float blocked = None
    float animated.timeSamples = { 0: 1, 1: 2 }
    rel material:binding = </Mat>
}
"#,
        );

        let ball = stage.prim_at_path("/Ball").unwrap();
        let radius = ball.attribute("radius").unwrap();
        assert_eq!(radius.type_name(), "double");
        assert_eq!(radius.get(), Some(&Value::Float(2.5)));
        assert!(ball.attribute("blocked").unwrap().get().is_none());

        let animated = ball.attribute("animated").unwrap();
        assert!(animated.get().is_none());
        assert!(animated.time_samples().is_some());

        assert!(ball.attribute("material:binding").is_none());
        assert_eq!(ball.relationship_targets("material:binding"), vec!["/Mat".to_string()]);
    }

    #[test]
    fn test_sublayer_opinions() {
        let stage = Stage::open(test_asset_path("assets/layered/shot.usda")).unwrap();
        let ball = stage.prim_at_path("/World/Ball").unwrap();

        // shot.usda overrides the radius authored in its sublayer
        assert_eq!(ball.attribute("radius").unwrap().get().and_then(Value::as_f64), Some(3.0));
        assert_eq!(ball.type_name(), "Sphere");
        assert_eq!(stage.layer_stack().layers().len(), 2);
    }

    #[test]
    fn test_payload_loading() {
        let path = test_asset_path("assets/layered/payload_root.usda");

        let loaded = Stage::open(&path).unwrap();
        assert!(loaded.prim_at_path("/Set/Ball").is_some());

        let options = StageOptions {
            load: InitialLoadSet::LoadNone,
        };
        let unloaded = Stage::open_with(&path, options).unwrap();
        assert!(unloaded.prim_at_path("/Set").is_some());
        assert!(unloaded.prim_at_path("/Set/Ball").is_none());
    }

    #[test]
    fn test_flatten_bakes_references() {
        let stage = Stage::open(test_asset_path("assets/ref_test/ref_test.usda")).unwrap();
        let text = stage.export_to_string();

        assert!(text.starts_with("#usda 1.0\n"));
        assert!(text.contains("Generated from Composed Stage of root layer"));
        assert!(!text.contains("references"));

        let flattened = parse_usda(&text, AssetLocation::Anonymous("flat".into())).unwrap();
        assert!(flattened.prim_spec("/World/CubeA/Mesh").is_some());
        assert!(flattened.prim_spec("/World/CubeB/Mesh").is_some());
    }

    #[test]
    fn test_save_anonymous_layer_fails() {
        let mut stage = stage("#usda 1.0\n");
        assert!(matches!(stage.save(), Err(StageError::NotFileBacked(_))));
    }
}

//! Authored scene description: layers, prim specs and property specs.
//!
//! A `Layer` is the parsed content of one file. Nothing here is composed;
//! see `compose` for how layers combine into a stage.

use std::fmt;
use std::path::Path;

use super::path::{child_path, components, ABSOLUTE_ROOT};
use super::resolver::AssetLocation;
use super::value::Value;
use super::writer::write_layer;

/// How a prim spec contributes to its prim.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Specifier {
    /// `def` (defines the prim)
    Def,
    /// `over` (only adds opinions)
    Over,
    /// `class` (abstract, skipped by default traversal)
    Class,
}

impl Specifier {
    /// Keyword used in USDA text.
    pub fn as_str(&self) -> &'static str {
        match self {
            Specifier::Def => "def",
            Specifier::Over => "over",
            Specifier::Class => "class",
        }
    }

    /// Parse a specifier keyword.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "def" => Some(Specifier::Def),
            "over" => Some(Specifier::Over),
            "class" => Some(Specifier::Class),
            _ => None,
        }
    }
}

/// A reference or payload arc: an asset path plus an optional prim path.
///
/// An empty `asset_path` refers to the layer stack that authored it; an
/// empty `prim_path` targets the referenced layer's default prim.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Reference {
    pub asset_path: String,
    pub prim_path: String,
}

impl Reference {
    pub fn new(asset_path: impl Into<String>, prim_path: impl Into<String>) -> Self {
        Self {
            asset_path: asset_path.into(),
            prim_path: prim_path.into(),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.asset_path.is_empty() {
            write!(f, "{}", super::value::quote_asset_path(&self.asset_path))?;
        }
        if !self.prim_path.is_empty() {
            write!(f, "<{}>", self.prim_path)?;
        }
        Ok(())
    }
}

/// List-editing keyword in front of a metadata or property statement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListEdit {
    Add,
    Prepend,
    Append,
    Delete,
    Reorder,
}

impl ListEdit {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListEdit::Add => "add",
            ListEdit::Prepend => "prepend",
            ListEdit::Append => "append",
            ListEdit::Delete => "delete",
            ListEdit::Reorder => "reorder",
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "add" => Some(ListEdit::Add),
            "prepend" => Some(ListEdit::Prepend),
            "append" => Some(ListEdit::Append),
            "delete" => Some(ListEdit::Delete),
            "reorder" => Some(ListEdit::Reorder),
            _ => None,
        }
    }
}

/// Where to insert an item into a list op.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListPosition {
    FrontOfPrependList,
    BackOfPrependList,
    FrontOfAppendList,
    BackOfAppendList,
}

/// A list-edited value such as `references`.
///
/// When `explicit` is set the other lists are ignored on application.
#[derive(Clone, Debug, PartialEq)]
pub struct ListOp<T> {
    pub explicit: Option<Vec<T>>,
    pub added: Vec<T>,
    pub prepended: Vec<T>,
    pub appended: Vec<T>,
    pub deleted: Vec<T>,
    pub ordered: Vec<T>,
}

impl<T> Default for ListOp<T> {
    fn default() -> Self {
        Self {
            explicit: None,
            added: Vec::new(),
            prepended: Vec::new(),
            appended: Vec::new(),
            deleted: Vec::new(),
            ordered: Vec::new(),
        }
    }
}

impl<T: Clone + PartialEq> ListOp<T> {
    /// True when nothing is authored.
    pub fn is_empty(&self) -> bool {
        self.explicit.is_none()
            && self.added.is_empty()
            && self.prepended.is_empty()
            && self.appended.is_empty()
            && self.deleted.is_empty()
            && self.ordered.is_empty()
    }

    /// Store the items of one authored statement.
    pub fn set(&mut self, edit: Option<ListEdit>, items: Vec<T>) {
        match edit {
            None => self.explicit = Some(items),
            Some(ListEdit::Add) => self.added = items,
            Some(ListEdit::Prepend) => self.prepended = items,
            Some(ListEdit::Append) => self.appended = items,
            Some(ListEdit::Delete) => self.deleted = items,
            Some(ListEdit::Reorder) => self.ordered = items,
        }
    }

    /// Authored statements in writing order. `None` is the explicit list.
    pub fn statements(&self) -> Vec<(Option<ListEdit>, &[T])> {
        let mut out = Vec::new();
        if let Some(explicit) = &self.explicit {
            out.push((None, explicit.as_slice()));
        }
        for (edit, items) in [
            (ListEdit::Delete, &self.deleted),
            (ListEdit::Add, &self.added),
            (ListEdit::Prepend, &self.prepended),
            (ListEdit::Append, &self.appended),
            (ListEdit::Reorder, &self.ordered),
        ] {
            if !items.is_empty() {
                out.push((Some(edit), items.as_slice()));
            }
        }
        out
    }

    /// Every authored item, in any list.
    pub fn items(&self) -> impl Iterator<Item = &T> {
        self.explicit
            .iter()
            .flatten()
            .chain(&self.added)
            .chain(&self.prepended)
            .chain(&self.appended)
            .chain(&self.deleted)
            .chain(&self.ordered)
    }

    /// Every authored item, mutably.
    pub fn items_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.explicit
            .iter_mut()
            .flatten()
            .chain(&mut self.added)
            .chain(&mut self.prepended)
            .chain(&mut self.appended)
            .chain(&mut self.deleted)
            .chain(&mut self.ordered)
    }

    /// Apply this (stronger) op on top of a weaker result. Each item keeps
    /// the tag it was added with; new items get `tag`.
    pub fn apply<A: Clone>(&self, list: &mut Vec<(T, A)>, tag: &A) {
        if let Some(explicit) = &self.explicit {
            list.clear();
            for item in explicit {
                if !list.iter().any(|(x, _)| x == item) {
                    list.push((item.clone(), tag.clone()));
                }
            }
            return;
        }

        list.retain(|(x, _)| !self.deleted.contains(x));

        for item in &self.added {
            if !list.iter().any(|(x, _)| x == item) {
                list.push((item.clone(), tag.clone()));
            }
        }

        if !self.prepended.is_empty() {
            list.retain(|(x, _)| !self.prepended.contains(x));
            let mut front: Vec<(T, A)> = self.prepended.iter().map(|i| (i.clone(), tag.clone())).collect();
            front.append(list);
            *list = front;
        }

        if !self.appended.is_empty() {
            list.retain(|(x, _)| !self.appended.contains(x));
            list.extend(self.appended.iter().map(|i| (i.clone(), tag.clone())));
        }

        if !self.ordered.is_empty() {
            let mut reordered: Vec<(T, A)> = Vec::with_capacity(list.len());
            for item in &self.ordered {
                if let Some(pos) = list.iter().position(|(x, _)| x == item) {
                    reordered.push(list.remove(pos));
                }
            }
            reordered.append(list);
            *list = reordered;
        }
    }

    /// Insert an item. An item already in the destination list is moved.
    pub fn insert(&mut self, item: T, position: ListPosition) {
        let list = if let Some(explicit) = self.explicit.as_mut() {
            explicit
        } else {
            self.deleted.retain(|x| x != &item);
            match position {
                ListPosition::FrontOfPrependList | ListPosition::BackOfPrependList => &mut self.prepended,
                ListPosition::FrontOfAppendList | ListPosition::BackOfAppendList => &mut self.appended,
            }
        };

        list.retain(|x| x != &item);
        match position {
            ListPosition::FrontOfPrependList | ListPosition::FrontOfAppendList => list.insert(0, item),
            ListPosition::BackOfPrependList | ListPosition::BackOfAppendList => list.push(item),
        }
    }

    /// Remove an item. Explicit lists drop it; otherwise it is taken out of
    /// the added, prepended and appended lists and recorded as deleted.
    pub fn remove(&mut self, item: &T) {
        if let Some(explicit) = self.explicit.as_mut() {
            explicit.retain(|x| x != item);
            return;
        }
        self.added.retain(|x| x != item);
        self.prepended.retain(|x| x != item);
        self.appended.retain(|x| x != item);
        self.ordered.retain(|x| x != item);
        if !self.deleted.contains(item) {
            self.deleted.push(item.clone());
        }
    }
}

/// One metadata statement: `[edit] key = value`.
#[derive(Clone, Debug, PartialEq)]
pub struct MetadataEntry {
    pub list_edit: Option<ListEdit>,
    pub key: String,
    pub value: Value,
}

impl MetadataEntry {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            list_edit: None,
            key: key.into(),
            value,
        }
    }
}

/// Attribute or relationship.
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyKind {
    Attribute { type_name: String },
    Relationship,
}

/// Authored opinions for one property.
#[derive(Clone, Debug, PartialEq)]
pub struct PropertySpec {
    pub name: String,
    pub kind: PropertyKind,
    pub custom: bool,
    /// `uniform`, `config` or `varying` when authored
    pub variability: Option<String>,
    pub list_edit: Option<ListEdit>,
    /// Default value (relationship targets for relationships)
    pub default: Option<Value>,
    pub time_samples: Option<Value>,
    pub connections: Option<Value>,
    pub metadata: Vec<MetadataEntry>,
}

impl PropertySpec {
    /// A new attribute declaration with no value.
    pub fn attribute(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PropertyKind::Attribute {
                type_name: type_name.into(),
            },
            custom: false,
            variability: None,
            list_edit: None,
            default: None,
            time_samples: None,
            connections: None,
            metadata: Vec::new(),
        }
    }

    /// A new relationship declaration with no targets.
    pub fn relationship(name: impl Into<String>) -> Self {
        Self {
            kind: PropertyKind::Relationship,
            ..Self::attribute(name, "")
        }
    }

    /// Declared value type, or `rel` for relationships.
    pub fn type_name(&self) -> &str {
        match &self.kind {
            PropertyKind::Attribute { type_name } => type_name,
            PropertyKind::Relationship => "rel",
        }
    }

    pub fn is_relationship(&self) -> bool {
        matches!(self.kind, PropertyKind::Relationship)
    }

    /// Visit every authored value of this property.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut Value> {
        self.default
            .iter_mut()
            .chain(self.time_samples.iter_mut())
            .chain(self.connections.iter_mut())
            .chain(self.metadata.iter_mut().map(|m| &mut m.value))
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.default
            .iter()
            .chain(self.time_samples.iter())
            .chain(self.connections.iter())
            .chain(self.metadata.iter().map(|m| &m.value))
    }
}

/// `variantSet "name" = { ... }`
#[derive(Clone, Debug, PartialEq)]
pub struct VariantSetSpec {
    pub name: String,
    pub variants: Vec<VariantSpec>,
}

/// One variant: a prim body applied to the owning prim when selected.
#[derive(Clone, Debug, PartialEq)]
pub struct VariantSpec {
    pub name: String,
    pub prim: PrimSpec,
}

/// Authored opinions for one prim in one layer.
#[derive(Clone, Debug, PartialEq)]
pub struct PrimSpec {
    pub specifier: Specifier,
    pub type_name: String,
    pub name: String,
    pub path: String,
    pub metadata: Vec<MetadataEntry>,
    pub references: ListOp<Reference>,
    pub payloads: ListOp<Reference>,
    pub properties: Vec<PropertySpec>,
    pub children: Vec<PrimSpec>,
    pub variant_sets: Vec<VariantSetSpec>,
}

impl PrimSpec {
    pub fn new(specifier: Specifier, type_name: impl Into<String>, name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            specifier,
            type_name: type_name.into(),
            name: name.into(),
            path: path.into(),
            metadata: Vec::new(),
            references: ListOp::default(),
            payloads: ListOp::default(),
            properties: Vec::new(),
            children: Vec::new(),
            variant_sets: Vec::new(),
        }
    }

    /// The spec at the root of every layer (holds root prims as children).
    pub fn pseudo_root() -> Self {
        Self::new(Specifier::Def, "", "", ABSOLUTE_ROOT)
    }

    pub fn child(&self, name: &str) -> Option<&PrimSpec> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut PrimSpec> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    pub fn property(&self, name: &str) -> Option<&PropertySpec> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Last authored value for a metadata key.
    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.iter().rev().find(|m| m.key == key).map(|m| &m.value)
    }

    /// Replace (or add) a plain metadata value.
    pub fn set_metadata(&mut self, key: &str, value: Value) {
        set_metadata_entry(&mut self.metadata, key, value);
    }

    /// Visit this spec, its descendants and the prims inside its variants.
    pub fn for_each(&self, f: &mut dyn FnMut(&PrimSpec)) {
        f(self);
        for variant_set in &self.variant_sets {
            for variant in &variant_set.variants {
                variant.prim.for_each(f);
            }
        }
        for child in &self.children {
            child.for_each(f);
        }
    }

    /// Mutable counterpart of `for_each`.
    pub fn for_each_mut(&mut self, f: &mut dyn FnMut(&mut PrimSpec)) {
        f(self);
        for variant_set in &mut self.variant_sets {
            for variant in &mut variant_set.variants {
                variant.prim.for_each_mut(f);
            }
        }
        for child in &mut self.children {
            child.for_each_mut(f);
        }
    }
}

fn set_metadata_entry(entries: &mut Vec<MetadataEntry>, key: &str, value: Value) {
    match entries.iter().position(|m| m.key == key) {
        Some(index) => {
            entries.retain(|m| m.key != key);
            entries.insert(index.min(entries.len()), MetadataEntry::new(key, value));
        }
        None => entries.push(MetadataEntry::new(key, value)),
    }
}

/// One parsed scene description file.
#[derive(Clone, Debug)]
pub struct Layer {
    pub location: AssetLocation,
    pub metadata: Vec<MetadataEntry>,
    pub sub_layers: Vec<String>,
    /// Pseudo-root spec; its children are the layer's root prims
    pub root: PrimSpec,
    pub read_only: bool,
    pub dirty: bool,
}

impl Layer {
    /// An empty layer at `location`.
    pub fn new(location: AssetLocation) -> Self {
        let read_only = location.is_packaged();
        Self {
            location,
            metadata: Vec::new(),
            sub_layers: Vec::new(),
            root: PrimSpec::pseudo_root(),
            read_only,
            dirty: false,
        }
    }

    /// Parse USDA text into a layer.
    pub fn from_string(content: &str, location: AssetLocation) -> super::ParseResult<Self> {
        super::parse_usda(content, location)
    }

    pub fn root_prims(&self) -> &[PrimSpec] {
        &self.root.children
    }

    /// Last authored value for a layer metadata key.
    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.iter().rev().find(|m| m.key == key).map(|m| &m.value)
    }

    pub fn set_metadata(&mut self, key: &str, value: Value) {
        set_metadata_entry(&mut self.metadata, key, value);
        self.dirty = true;
    }

    /// Name of the default prim, with any leading `/` removed.
    pub fn default_prim(&self) -> Option<&str> {
        self.metadata("defaultPrim")
            .and_then(Value::as_str)
            .map(|s| s.trim_start_matches('/'))
            .filter(|s| !s.is_empty())
    }

    pub fn meters_per_unit(&self) -> Option<f64> {
        self.metadata("metersPerUnit").and_then(Value::as_f64)
    }

    pub fn set_meters_per_unit(&mut self, meters_per_unit: f64) {
        self.set_metadata("metersPerUnit", Value::Float(meters_per_unit));
    }

    pub fn up_axis(&self) -> Option<&str> {
        self.metadata("upAxis").and_then(Value::as_str)
    }

    /// Spec at an absolute prim path.
    pub fn prim_spec(&self, path: &str) -> Option<&PrimSpec> {
        let mut spec = &self.root;
        for name in components(path) {
            spec = spec.child(name)?;
        }
        Some(spec)
    }

    pub fn prim_spec_mut(&mut self, path: &str) -> Option<&mut PrimSpec> {
        let mut spec = &mut self.root;
        for name in components(path) {
            spec = spec.child_mut(name)?;
        }
        Some(spec)
    }

    /// Spec at a path, creating `over` specs for any missing prims.
    pub fn ensure_prim_spec(&mut self, path: &str) -> &mut PrimSpec {
        let mut spec = &mut self.root;
        for name in components(path) {
            let index = match spec.children.iter().position(|c| c.name == name) {
                Some(index) => index,
                None => {
                    let child = PrimSpec::new(Specifier::Over, "", name, child_path(&spec.path, name));
                    spec.children.push(child);
                    spec.children.len() - 1
                }
            };
            spec = &mut spec.children[index];
        }
        spec
    }

    /// Visit every prim spec in the layer (variants included).
    pub fn for_each_prim_spec(&self, f: &mut dyn FnMut(&PrimSpec)) {
        for prim in &self.root.children {
            prim.for_each(f);
        }
    }

    /// Rewrite every authored asset path: sublayers, references, payloads
    /// and asset-valued metadata and properties. `f` returns the
    /// replacement, or `None` to leave a path unchanged.
    pub fn remap_asset_paths(&mut self, f: &mut dyn FnMut(&str) -> Option<String>) {
        for sub_layer in &mut self.sub_layers {
            if let Some(new_path) = f(sub_layer.as_str()) {
                *sub_layer = new_path;
            }
        }
        for entry in &mut self.metadata {
            remap_value(&mut entry.value, &mut *f);
        }
        self.root.for_each_mut(&mut |spec| {
            for reference in spec.references.items_mut().chain(spec.payloads.items_mut()) {
                if reference.asset_path.is_empty() {
                    continue;
                }
                if let Some(new_path) = f(&reference.asset_path) {
                    reference.asset_path = new_path;
                }
            }
            for entry in &mut spec.metadata {
                remap_value(&mut entry.value, &mut *f);
            }
            for property in &mut spec.properties {
                for value in property.values_mut() {
                    remap_value(value, &mut *f);
                }
            }
        });
    }

    /// USDA text for this layer.
    pub fn export_to_string(&self) -> String {
        write_layer(self)
    }

    /// Write the layer as USDA text to `path`.
    pub fn export(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.export_to_string())
    }
}

fn remap_value(value: &mut Value, f: &mut dyn FnMut(&str) -> Option<String>) {
    value.visit_mut(&mut |v| {
        if let Value::AssetPath(asset) = v {
            if asset.is_empty() {
                return;
            }
            if let Some(new_path) = f(asset.as_str()) {
                *asset = new_path;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(asset: &str) -> Reference {
        Reference::new(asset, "")
    }

    fn applied(ops: &[&ListOp<Reference>]) -> Vec<String> {
        let mut list: Vec<(Reference, ())> = Vec::new();
        for op in ops {
            op.apply(&mut list, &());
        }
        list.into_iter().map(|(r, _)| r.asset_path).collect()
    }

    #[test]
    fn test_list_op_prepend_is_strongest_first() {
        let mut weak = ListOp::default();
        weak.set(Some(ListEdit::Prepend), vec![r("a"), r("b")]);
        let mut strong = ListOp::default();
        strong.set(Some(ListEdit::Prepend), vec![r("c")]);
        strong.set(Some(ListEdit::Append), vec![r("a")]);

        assert_eq!(applied(&[&weak, &strong]), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_list_op_explicit_replaces() {
        let mut weak = ListOp::default();
        weak.set(Some(ListEdit::Prepend), vec![r("a")]);
        let mut strong = ListOp::default();
        strong.set(None, vec![r("b")]);

        assert_eq!(applied(&[&weak, &strong]), vec!["b"]);
    }

    #[test]
    fn test_list_op_delete() {
        let mut weak = ListOp::default();
        weak.set(None, vec![r("a"), r("b")]);
        let mut strong = ListOp::default();
        strong.set(Some(ListEdit::Delete), vec![r("a")]);

        assert_eq!(applied(&[&weak, &strong]), vec!["b"]);
    }

    #[test]
    fn test_insert_front_moves_existing() {
        let mut op = ListOp::default();
        op.set(Some(ListEdit::Prepend), vec![r("a"), r("b")]);
        op.insert(r("b"), ListPosition::FrontOfPrependList);
        assert_eq!(op.prepended, vec![r("b"), r("a")]);

        op.insert(r("c"), ListPosition::BackOfAppendList);
        assert_eq!(op.appended, vec![r("c")]);
    }

    #[test]
    fn test_insert_into_explicit_list() {
        let mut op = ListOp::default();
        op.set(None, vec![r("a")]);
        op.insert(r("b"), ListPosition::FrontOfPrependList);
        assert_eq!(op.explicit, Some(vec![r("b"), r("a")]));
        assert!(op.prepended.is_empty());
    }

    #[test]
    fn test_remove_records_delete() {
        let mut op = ListOp::default();
        op.set(Some(ListEdit::Prepend), vec![r("a"), r("b")]);
        op.remove(&r("a"));
        assert_eq!(op.prepended, vec![r("b")]);
        assert_eq!(op.deleted, vec![r("a")]);

        let mut explicit = ListOp::default();
        explicit.set(None, vec![r("a")]);
        explicit.remove(&r("a"));
        assert_eq!(explicit.explicit, Some(vec![]));
        assert!(explicit.deleted.is_empty());
    }

    #[test]
    fn test_remove_matches_exactly() {
        let mut op = ListOp::default();
        op.set(Some(ListEdit::Prepend), vec![Reference::new("a.usda", "/A")]);
        op.remove(&Reference::new("a.usda", ""));
        assert_eq!(op.prepended.len(), 1);
    }

    #[test]
    fn test_ensure_prim_spec_creates_overs() {
        let mut layer = Layer::new(AssetLocation::Anonymous("test".into()));
        layer.ensure_prim_spec("/World/Cube").type_name = "Cube".into();

        let world = layer.prim_spec("/World").unwrap();
        assert_eq!(world.specifier, Specifier::Over);
        let cube = layer.prim_spec("/World/Cube").unwrap();
        assert_eq!(cube.path, "/World/Cube");
        assert_eq!(cube.type_name, "Cube");
    }

    #[test]
    fn test_layer_metadata() {
        let mut layer = Layer::new(AssetLocation::Anonymous("test".into()));
        assert_eq!(layer.meters_per_unit(), None);
        layer.set_meters_per_unit(0.01);
        layer.set_meters_per_unit(1.0);
        assert_eq!(layer.meters_per_unit(), Some(1.0));
        assert_eq!(layer.metadata.len(), 1);
        assert!(layer.dirty);
    }
}

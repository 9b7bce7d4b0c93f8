//! Composition of layers into the prim tree of a stage.
//!
//! Opinions for a prim are gathered strongest first:
//!
//! 1. local specs from the layer stack (root layer, then sublayers)
//! 2. the selected variant of each variant set
//! 3. references, in list order
//! 4. payloads (when loaded)
//!
//! Each referenced site is expanded the same way, so arcs nest. The
//! composed prim takes the strongest opinion for every field.

use std::collections::{HashMap, HashSet, VecDeque};

use super::layer::{Layer, ListOp, MetadataEntry, PrimSpec, PropertySpec, Reference, Specifier};
use super::path::{child_path, has_prefix, name_of, replace_prefix, ABSOLUTE_ROOT};
use super::resolver::{AssetLocation, Resolver};
use super::stage::Prim;
use super::value::Value;

/// Metadata consumed by composition and not carried on composed prims.
const COMPOSITION_METADATA: [&str; 2] = ["variants", "variantSets"];

/// Nested arcs beyond this depth are ignored.
const MAX_ARC_DEPTH: usize = 64;

/// A root layer followed by its sublayers, strongest first.
#[derive(Clone, Debug)]
pub struct LayerStack {
    layers: Vec<Layer>,
}

impl LayerStack {
    /// Build the stack for `root`, loading sublayers depth-first.
    /// Sublayers that cannot be found or parsed are skipped.
    pub fn build(resolver: &mut Resolver, root: Layer) -> Self {
        let mut layers = Vec::new();
        let mut seen = HashSet::new();
        collect_sub_layers(resolver, root, &mut layers, &mut seen);
        Self { layers }
    }

    /// The root layer.
    pub fn root(&self) -> &Layer {
        &self.layers[0]
    }

    pub fn root_mut(&mut self) -> &mut Layer {
        &mut self.layers[0]
    }

    /// All layers, strongest first.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Location of the root layer (identifies the stack).
    pub fn location(&self) -> &AssetLocation {
        &self.root().location
    }

    pub fn default_prim(&self) -> Option<&str> {
        self.root().default_prim()
    }

    /// Specs at `path` in every layer, strongest first.
    pub fn prim_specs(&self, path: &str) -> Vec<(&Layer, &PrimSpec)> {
        self.layers
            .iter()
            .filter_map(|layer| layer.prim_spec(path).map(|spec| (layer, spec)))
            .collect()
    }
}

fn collect_sub_layers(
    resolver: &mut Resolver,
    layer: Layer,
    layers: &mut Vec<Layer>,
    seen: &mut HashSet<AssetLocation>,
) {
    seen.insert(layer.location.clone());
    let anchor = layer.location.clone();
    let sub_layers = layer.sub_layers.clone();
    layers.push(layer);

    for sub_layer in sub_layers {
        let Some(location) = resolver.resolve(&sub_layer, &anchor) else {
            log::warn!("Could not resolve sublayer @{}@ in {}", sub_layer, anchor);
            continue;
        };
        if seen.contains(&location) {
            log::warn!("Sublayer cycle at {} in {}", location, anchor);
            continue;
        }
        match resolver.open_layer(location) {
            Ok(sub) => collect_sub_layers(resolver, sub, layers, seen),
            Err(e) => log::warn!("Skipping sublayer @{}@ in {}: {}", sub_layer, anchor, e),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ArcKind {
    Reference,
    Payload,
}

impl ArcKind {
    fn list(self, spec: &PrimSpec) -> &ListOp<Reference> {
        match self {
            ArcKind::Reference => &spec.references,
            ArcKind::Payload => &spec.payloads,
        }
    }

    fn label(self) -> &'static str {
        match self {
            ArcKind::Reference => "reference",
            ArcKind::Payload => "payload",
        }
    }
}

/// Open the layer stack of every asset reachable through references (and
/// payloads when `load_payloads` is set) that is not already loaded.
pub fn load_referenced_stacks(
    resolver: &mut Resolver,
    root: &LayerStack,
    stacks: &mut HashMap<AssetLocation, LayerStack>,
    load_payloads: bool,
) {
    let mut failed = HashSet::new();
    let mut pending: VecDeque<Vec<(String, AssetLocation)>> = VecDeque::new();
    pending.push_back(arc_asset_paths(root, load_payloads));

    while let Some(assets) = pending.pop_front() {
        for (asset_path, anchor) in assets {
            let Some(location) = resolver.resolve(&asset_path, &anchor) else {
                continue;
            };
            if stacks.contains_key(&location) || failed.contains(&location) {
                continue;
            }
            match resolver.open_layer(location.clone()) {
                Ok(layer) => {
                    let stack = LayerStack::build(resolver, layer);
                    pending.push_back(arc_asset_paths(&stack, load_payloads));
                    stacks.insert(location, stack);
                }
                Err(e) => {
                    log::warn!("Could not open referenced layer {}: {}", location, e);
                    failed.insert(location);
                }
            }
        }
    }
}

/// External arc asset paths authored anywhere in a stack, with the layer
/// that authored each.
fn arc_asset_paths(stack: &LayerStack, load_payloads: bool) -> Vec<(String, AssetLocation)> {
    let mut assets = Vec::new();
    for layer in stack.layers() {
        layer.for_each_prim_spec(&mut |spec| {
            let payloads = load_payloads.then_some(&spec.payloads);
            for reference in spec.references.items().chain(payloads.into_iter().flat_map(|p| p.items())) {
                if !reference.asset_path.is_empty() {
                    assets.push((reference.asset_path.clone(), layer.location.clone()));
                }
            }
        });
    }
    assets
}

/// Maps paths of a referenced namespace onto stage paths.
#[derive(Clone, Debug)]
struct PathMap {
    src_root: String,
    dst_root: String,
}

impl PathMap {
    fn identity() -> Self {
        Self {
            src_root: ABSOLUTE_ROOT.to_string(),
            dst_root: ABSOLUTE_ROOT.to_string(),
        }
    }

    fn map_path(&self, path: &str) -> String {
        if self.src_root == self.dst_root {
            path.to_string()
        } else {
            replace_prefix(path, &self.src_root, &self.dst_root)
        }
    }

    fn map_value(&self, value: &mut Value) {
        if self.src_root == self.dst_root {
            return;
        }
        value.visit_mut(&mut |v| {
            if let Value::Path(path) = v {
                *path = self.map_path(path);
            }
        });
    }
}

/// Specs for one site (a layer stack and a path in it), strongest first.
#[derive(Clone)]
struct Node<'a> {
    stack: &'a LayerStack,
    site: String,
    specs: Vec<(&'a Layer, &'a PrimSpec)>,
    map: PathMap,
    /// Sites that introduced the arcs leading here
    chain: Vec<(AssetLocation, String)>,
}

/// Builds composed prims from a root layer stack and the stacks it
/// references.
pub struct Composer<'a> {
    root: &'a LayerStack,
    stacks: &'a HashMap<AssetLocation, LayerStack>,
    resolver: &'a mut Resolver,
    load_payloads: bool,
}

impl<'a> Composer<'a> {
    pub fn new(
        root: &'a LayerStack,
        stacks: &'a HashMap<AssetLocation, LayerStack>,
        resolver: &'a mut Resolver,
        load_payloads: bool,
    ) -> Self {
        Self {
            root,
            stacks,
            resolver,
            load_payloads,
        }
    }

    /// Compose the whole stage, returning the pseudo root.
    pub fn compose_root(&mut self) -> Prim {
        let root = self.root;
        let node = Node {
            stack: root,
            site: ABSOLUTE_ROOT.to_string(),
            specs: root.layers().iter().map(|layer| (layer, &layer.root)).collect(),
            map: PathMap::identity(),
            chain: Vec::new(),
        };
        let mut pseudo_root = self.compose_prim(ABSOLUTE_ROOT, vec![node]);
        pseudo_root.specifier = Specifier::Def;
        pseudo_root
    }

    fn compose_prim(&mut self, path: &str, nodes: Vec<Node<'a>>) -> Prim {
        let mut selections = HashMap::new();
        let mut opinions = Vec::new();
        let mut arcs = Vec::new();
        for node in nodes {
            self.expand(node, path, &mut selections, &mut opinions, &mut arcs);
        }

        let mut prim = Prim::new(name_of(path), path);
        prim.references = arcs;

        let specs = || opinions.iter().flat_map(|node| node.specs.iter().map(move |(_, spec)| (*spec, &node.map)));

        prim.specifier = specs()
            .map(|(spec, _)| spec.specifier)
            .find(|s| *s != Specifier::Over)
            .unwrap_or(Specifier::Over);

        prim.type_name = specs()
            .map(|(spec, _)| spec.type_name.as_str())
            .find(|t| !t.is_empty())
            .unwrap_or_default()
            .to_string();

        for (spec, _) in specs() {
            for entry in &spec.metadata {
                if COMPOSITION_METADATA.contains(&entry.key.as_str()) {
                    continue;
                }
                if !prim.metadata.iter().any(|m| m.key == entry.key) {
                    prim.metadata.push(MetadataEntry::new(entry.key.clone(), entry.value.clone()));
                }
            }
        }

        for (spec, map) in specs() {
            for property in &spec.properties {
                overlay_property(&mut prim.properties, property, map);
            }
        }

        let mut names: Vec<&'a str> = Vec::new();
        for node in &opinions {
            for &(_, spec) in &node.specs {
                for child in &spec.children {
                    if !names.contains(&child.name.as_str()) {
                        names.push(&child.name);
                    }
                }
            }
        }

        for name in names {
            let child_nodes: Vec<Node<'a>> = opinions
                .iter()
                .filter_map(|node| {
                    let specs: Vec<(&'a Layer, &'a PrimSpec)> = node
                        .specs
                        .iter()
                        .filter_map(|&(layer, spec)| spec.child(name).map(|child| (layer, child)))
                        .collect();
                    (!specs.is_empty()).then(|| Node {
                        stack: node.stack,
                        site: child_path(&node.site, name),
                        specs,
                        map: node.map.clone(),
                        chain: node.chain.clone(),
                    })
                })
                .collect();
            let child = self.compose_prim(&child_path(path, name), child_nodes);
            prim.children.push(child);
        }

        prim
    }

    /// Append the opinions of `node` and everything its arcs bring in.
    fn expand(
        &mut self,
        node: Node<'a>,
        path: &str,
        selections: &mut HashMap<String, String>,
        out: &mut Vec<Node<'a>>,
        arcs: &mut Vec<Reference>,
    ) {
        for &(_, spec) in &node.specs {
            if let Some(Value::Dictionary(entries)) = spec.metadata("variants") {
                for entry in entries {
                    if let Some(selection) = entry.value.as_str() {
                        selections
                            .entry(entry.key.clone())
                            .or_insert_with(|| selection.to_string());
                    }
                }
            }
        }
        out.push(node.clone());

        let mut set_names: Vec<&'a str> = Vec::new();
        for &(_, spec) in &node.specs {
            for variant_set in &spec.variant_sets {
                if !set_names.contains(&variant_set.name.as_str()) {
                    set_names.push(&variant_set.name);
                }
            }
        }
        for set_name in set_names {
            let Some(selection) = selections.get(set_name).cloned() else {
                continue;
            };
            let specs: Vec<(&'a Layer, &'a PrimSpec)> = node
                .specs
                .iter()
                .filter_map(|&(layer, spec)| {
                    let variant_set = spec.variant_sets.iter().find(|vs| vs.name == set_name)?;
                    let variant = variant_set.variants.iter().find(|v| v.name == selection)?;
                    Some((layer, &variant.prim))
                })
                .collect();
            if specs.is_empty() {
                log::debug!("No variant '{}' in set '{}' on {}", selection, set_name, path);
                continue;
            }
            let variant_node = Node {
                specs,
                ..node.clone()
            };
            self.expand(variant_node, path, selections, out, arcs);
        }

        let mut kinds = vec![ArcKind::Reference];
        if self.load_payloads {
            kinds.push(ArcKind::Payload);
        }
        for kind in kinds {
            let mut items: Vec<(Reference, &'a Layer)> = Vec::new();
            for &(layer, spec) in node.specs.iter().rev() {
                kind.list(spec).apply(&mut items, &layer);
            }
            for (reference, anchor) in items {
                self.add_arc(&node, path, kind, &reference, anchor, selections, out, arcs);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn add_arc(
        &mut self,
        node: &Node<'a>,
        path: &str,
        kind: ArcKind,
        reference: &Reference,
        anchor: &'a Layer,
        selections: &mut HashMap<String, String>,
        out: &mut Vec<Node<'a>>,
        arcs: &mut Vec<Reference>,
    ) {
        let stacks: &'a HashMap<AssetLocation, LayerStack> = self.stacks;
        let target_stack: &'a LayerStack = if reference.asset_path.is_empty() {
            node.stack
        } else {
            let Some(location) = self.resolver.resolve(&reference.asset_path, &anchor.location) else {
                log::warn!("Unresolved {} @{}@ on {}", kind.label(), reference.asset_path, path);
                return;
            };
            match stacks.get(&location) {
                Some(stack) => stack,
                None => {
                    log::warn!("Could not open {} {} on {}", kind.label(), location, path);
                    return;
                }
            }
        };

        let target_path = if !reference.prim_path.is_empty() {
            reference.prim_path.clone()
        } else if let Some(default_prim) = target_stack.default_prim() {
            child_path(ABSOLUTE_ROOT, default_prim)
        } else {
            log::warn!(
                "{} {} on {} names no prim and the layer has no default prim",
                kind.label(),
                reference,
                path
            );
            return;
        };

        let specs = target_stack.prim_specs(&target_path);
        if specs.is_empty() {
            log::warn!("{} target {} not found for {}", kind.label(), target_path, path);
            return;
        }

        let site = (node.stack.location().clone(), node.site.clone());
        let target_location = target_stack.location();
        let is_cycle = node.chain.iter().chain(std::iter::once(&site)).any(|(location, site_path)| {
            location == target_location
                && (has_prefix(&target_path, site_path) || has_prefix(site_path, &target_path))
        });
        if is_cycle || node.chain.len() >= MAX_ARC_DEPTH {
            log::warn!("Skipping cyclic {} {} on {}", kind.label(), reference, path);
            return;
        }

        if kind == ArcKind::Reference {
            arcs.push(reference.clone());
        }

        let mut chain = node.chain.clone();
        chain.push(site);
        let child = Node {
            stack: target_stack,
            site: target_path.clone(),
            specs,
            map: PathMap {
                src_root: target_path,
                dst_root: path.to_string(),
            },
            chain,
        };
        self.expand(child, path, selections, out, arcs);
    }
}

/// Merge a weaker property opinion into the composed list.
fn overlay_property(properties: &mut Vec<PropertySpec>, weaker: &PropertySpec, map: &PathMap) {
    let mapped = |value: &Option<Value>| {
        value.clone().map(|mut v| {
            map.map_value(&mut v);
            v
        })
    };

    match properties.iter_mut().find(|p| p.name == weaker.name) {
        Some(existing) => {
            if existing.default.is_none() {
                existing.default = mapped(&weaker.default);
            }
            if existing.time_samples.is_none() {
                existing.time_samples = mapped(&weaker.time_samples);
            }
            if existing.connections.is_none() {
                existing.connections = mapped(&weaker.connections);
            }
            for entry in &weaker.metadata {
                if !existing.metadata.iter().any(|m| m.key == entry.key) {
                    existing.metadata.push(entry.clone());
                }
            }
        }
        None => {
            let mut property = weaker.clone();
            property.list_edit = None;
            property.default = mapped(&weaker.default);
            property.time_samples = mapped(&weaker.time_samples);
            property.connections = mapped(&weaker.connections);
            properties.push(property);
        }
    }
}

//! World-space bounding boxes of composed prims.
//!
//! Bounds come from authored `extent` attributes where present, otherwise
//! from points or the intrinsic shape of the prim type. `PointInstancer`
//! prims contribute one prototype bound per instance.

use std::collections::HashMap;

use usdi_math::{DMat4, DQuat, DVec3, Range3d, Vec3};

use crate::usd::path::{components, parent_path, ABSOLUTE_ROOT};
use crate::usd::xform::local_transform;
use crate::usd::{Prim, Stage, Value};

/// Prim types whose extent is the range of their `points`.
const POINT_BASED_TYPES: [&str; 6] = ["Mesh", "Points", "BasisCurves", "NurbsCurves", "NurbsPatch", "TetMesh"];

const DEFAULT_PURPOSE: &str = "default";

/// Instancers nested inside prototypes deeper than this are ignored.
const MAX_INSTANCER_DEPTH: usize = 8;

/// Axis-aligned scene bounds in single precision.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SceneBounds {
    pub min: Vec3,
    pub max: Vec3,
    pub center: Vec3,
    pub max_extent: f32,
}

impl SceneBounds {
    /// Narrow a range to `f32`. Returns `None` for an empty range.
    pub fn from_range(range: &Range3d) -> Option<Self> {
        if range.is_empty() {
            return None;
        }
        Some(Self {
            min: range.min.as_vec3(),
            max: range.max.as_vec3(),
            center: range.midpoint().as_vec3(),
            max_extent: range.max_extent() as f32,
        })
    }
}

/// Computes world bounds, caching local-to-world transforms by prim path.
#[derive(Debug)]
pub struct BBoxCache {
    purposes: Vec<String>,
    use_instancing: bool,
    world_xforms: HashMap<String, DMat4>,
}

impl Default for BBoxCache {
    /// `default` and `render` purposes with instancers expanded.
    fn default() -> Self {
        Self::new(&[DEFAULT_PURPOSE, "render"], true)
    }
}

/// Traversal entry: a prim, the transform of its parent in the space being
/// accumulated, and the purpose authored on its nearest-to-root ancestor.
struct Pending<'a> {
    prim: &'a Prim,
    parent_xform: DMat4,
    purpose: Option<&'a str>,
}

impl BBoxCache {
    /// A cache including the given purposes. With `use_instancing` off,
    /// point instancers contribute nothing.
    pub fn new(purposes: &[&str], use_instancing: bool) -> Self {
        Self {
            purposes: purposes.iter().map(|p| p.to_string()).collect(),
            use_instancing,
            world_xforms: HashMap::new(),
        }
    }

    /// Drop cached transforms (call after editing the stage).
    pub fn clear(&mut self) {
        self.world_xforms.clear();
    }

    /// Local-to-world transform of the prim at `path`.
    pub fn local_to_world(&mut self, stage: &Stage, path: &str) -> DMat4 {
        if path == ABSOLUTE_ROOT {
            return DMat4::IDENTITY;
        }
        if let Some(xform) = self.world_xforms.get(path) {
            return *xform;
        }

        let parent = match parent_path(path) {
            Some(parent) => self.local_to_world(stage, parent),
            None => DMat4::IDENTITY,
        };
        let world = match stage.prim_at_path(path) {
            Some(prim) => apply_local(parent, prim),
            None => parent,
        };
        self.world_xforms.insert(path.to_string(), world);
        world
    }

    /// World-space bound of `prim` and its included descendants.
    pub fn compute_world_bound(&mut self, stage: &Stage, prim: &Prim) -> Range3d {
        let parent_xform = match parent_path(prim.path()) {
            Some(parent) => self.local_to_world(stage, parent),
            None => DMat4::IDENTITY,
        };
        let purpose = inherited_purpose(stage, prim.path());
        self.bound_subtree(stage, prim, parent_xform, purpose.as_deref(), true, 0)
    }

    /// Bound of a subtree in the space of `parent_xform`. When `world` is
    /// set the accumulated transforms are world transforms and get cached.
    fn bound_subtree(
        &mut self,
        stage: &Stage,
        root: &Prim,
        parent_xform: DMat4,
        purpose: Option<&str>,
        world: bool,
        depth: usize,
    ) -> Range3d {
        let mut bound = Range3d::EMPTY;
        let mut stack = vec![Pending {
            prim: root,
            parent_xform,
            purpose,
        }];

        while let Some(Pending {
            prim,
            parent_xform,
            purpose,
        }) = stack.pop()
        {
            if token_attribute(prim, "visibility") == Some("invisible") {
                continue;
            }
            // an authored purpose overrides everything below it
            let purpose = purpose.or_else(|| token_attribute(prim, "purpose"));
            let effective = purpose.unwrap_or(DEFAULT_PURPOSE);
            if !self.purposes.iter().any(|p| p == effective) {
                continue;
            }

            let xform = if prim.is_pseudo_root() {
                parent_xform
            } else {
                apply_local(parent_xform, prim)
            };
            if world {
                self.world_xforms.insert(prim.path().to_string(), xform);
            }

            if prim.type_name() == "PointInstancer" {
                if self.use_instancing && depth < MAX_INSTANCER_DEPTH {
                    let instances = self.instancer_bound(stage, prim, xform, purpose, depth);
                    bound.union_with(&instances);
                }
                continue;
            }

            if let Some(extent) = local_extent(prim) {
                bound.union_with(&extent.transformed(&xform));
            }

            for child in prim.default_children().rev() {
                stack.push(Pending {
                    prim: child,
                    parent_xform: xform,
                    purpose,
                });
            }
        }

        bound
    }

    /// Union of every instance's prototype bound, in the space of
    /// `instancer_xform`.
    fn instancer_bound(
        &mut self,
        stage: &Stage,
        instancer: &Prim,
        instancer_xform: DMat4,
        purpose: Option<&str>,
        depth: usize,
    ) -> Range3d {
        let prototypes = instancer.relationship_targets("prototypes");
        let indices = array_attribute(instancer, "protoIndices", Value::as_int_array);
        let positions = array_attribute(instancer, "positions", Value::as_vec3_array);
        let orientations = array_attribute(instancer, "orientations", Value::as_quat_array);
        let scales = array_attribute(instancer, "scales", Value::as_vec3_array);

        // Prototype bounds relative to the instancer
        let mut prototype_bounds: HashMap<usize, Range3d> = HashMap::new();
        let mut bound = Range3d::EMPTY;

        for (i, &index) in indices.iter().enumerate() {
            let Ok(index) = usize::try_from(index) else {
                continue;
            };
            let Some(target) = prototypes.get(index) else {
                log::warn!("{}: protoIndices[{}] = {} out of range", instancer.path(), i, index);
                continue;
            };

            let prototype = match prototype_bounds.get(&index) {
                Some(range) => *range,
                None => {
                    let range = match stage.prim_at_path(target) {
                        Some(proto) => self.bound_subtree(stage, proto, DMat4::IDENTITY, purpose, false, depth + 1),
                        None => {
                            log::warn!("{}: prototype {} not found", instancer.path(), target);
                            Range3d::EMPTY
                        }
                    };
                    prototype_bounds.insert(index, range);
                    range
                }
            };

            let instance = DMat4::from_scale_rotation_translation(
                scales.get(i).copied().unwrap_or(DVec3::ONE),
                orientations.get(i).copied().unwrap_or(DQuat::IDENTITY),
                positions.get(i).copied().unwrap_or(DVec3::ZERO),
            );
            bound.union_with(&prototype.transformed(&(instancer_xform * instance)));
        }

        bound
    }
}

/// Compose a prim's local transform onto its parent's.
fn apply_local(parent: DMat4, prim: &Prim) -> DMat4 {
    let local = local_transform(prim);
    if local.resets_xform_stack {
        local.matrix
    } else {
        parent * local.matrix
    }
}

fn token_attribute<'a>(prim: &'a Prim, name: &str) -> Option<&'a str> {
    prim.attribute(name)?.get()?.as_str()
}

fn array_attribute<T>(prim: &Prim, name: &str, read: fn(&Value) -> Option<Vec<T>>) -> Vec<T> {
    prim.attribute(name).and_then(|a| a.get()).and_then(read).unwrap_or_default()
}

fn number_attribute(prim: &Prim, name: &str, fallback: f64) -> f64 {
    prim.attribute(name)
        .and_then(|a| a.get())
        .and_then(Value::as_f64)
        .unwrap_or(fallback)
}

/// Purpose the prim at `path` inherits: the one authored on its ancestor
/// closest to the root, if any.
fn inherited_purpose(stage: &Stage, path: &str) -> Option<String> {
    let mut prim = stage.pseudo_root();
    let names: Vec<&str> = components(path).collect();
    let ancestors = names.len().saturating_sub(1);
    for name in &names[..ancestors] {
        prim = prim.child(name)?;
        if let Some(authored) = token_attribute(prim, "purpose") {
            return Some(authored.to_string());
        }
    }
    None
}

/// Extent of a single prim in its own space, ignoring descendants.
pub fn local_extent(prim: &Prim) -> Option<Range3d> {
    if let Some(extent) = prim.attribute("extent").and_then(|a| a.get()).and_then(Value::as_vec3_array) {
        if let [a, b] = extent[..] {
            return Some(Range3d::new(a, b));
        }
    }

    let type_name = prim.type_name();
    if POINT_BASED_TYPES.contains(&type_name) {
        let points = prim.attribute("points")?.get()?.as_vec3_array()?;
        return Some(Range3d::from_points(points));
    }

    let axis = token_attribute(prim, "axis").unwrap_or("Z");
    let along_axis = |along: f64, across: f64| match axis {
        "X" => DVec3::new(along, across, across),
        "Y" => DVec3::new(across, along, across),
        _ => DVec3::new(across, across, along),
    };

    let half = match type_name {
        "Cube" => DVec3::splat(number_attribute(prim, "size", 2.0) * 0.5),
        "Sphere" => DVec3::splat(number_attribute(prim, "radius", 1.0)),
        "Cylinder" | "Cone" => {
            let radius = number_attribute(prim, "radius", 1.0);
            let height = number_attribute(prim, "height", 2.0);
            along_axis(height * 0.5, radius)
        }
        "Capsule" => {
            let radius = number_attribute(prim, "radius", 0.5);
            let height = number_attribute(prim, "height", 1.0);
            along_axis(height * 0.5 + radius, radius)
        }
        "Plane" => {
            let width = number_attribute(prim, "width", 2.0) * 0.5;
            let length = number_attribute(prim, "length", 2.0) * 0.5;
            match axis {
                "X" => DVec3::new(0.0, length, width),
                "Y" => DVec3::new(width, 0.0, length),
                _ => DVec3::new(width, length, 0.0),
            }
        }
        _ => return None,
    };
    Some(Range3d::new(-half, half))
}

/// Bounds of the stage's default prim (or the whole stage when none is
/// set), for `default` and `render` purposes with instancing.
pub fn compute_scene_bounds(stage: &Stage) -> Option<SceneBounds> {
    let root = stage.default_prim().unwrap_or_else(|| stage.pseudo_root());
    let range = BBoxCache::default().compute_world_bound(stage, root);
    SceneBounds::from_range(&range)
}

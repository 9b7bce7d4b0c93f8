//! Transform operations (`xformOp:*` attributes).

use usdi_math::{DMat4, DQuat, DVec3};

use super::stage::Prim;
use super::value::Value;

const INVERT_PREFIX: &str = "!invert!";
const RESET_XFORM_STACK: &str = "!resetXformStack!";

/// A rotation axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    fn rotation(self, degrees: f64) -> DMat4 {
        let radians = degrees.to_radians();
        match self {
            Axis::X => DMat4::from_rotation_x(radians),
            Axis::Y => DMat4::from_rotation_y(radians),
            Axis::Z => DMat4::from_rotation_z(radians),
        }
    }

    fn from_char(c: char) -> Option<Self> {
        match c {
            'X' => Some(Axis::X),
            'Y' => Some(Axis::Y),
            'Z' => Some(Axis::Z),
            _ => None,
        }
    }
}

/// Transform operation types found in `xformOpOrder`.
#[derive(Clone, Debug, PartialEq)]
pub enum XformOp {
    /// Translation (xformOp:translate)
    Translate(DVec3),

    /// Scale (uniform or non-uniform)
    Scale(DVec3),

    /// Rotation in degrees around X axis
    RotateX(f64),

    /// Rotation in degrees around Y axis
    RotateY(f64),

    /// Rotation in degrees around Z axis
    RotateZ(f64),

    /// Three-axis rotation in degrees; the first axis in `order` is applied first
    Rotate3 { order: [Axis; 3], angles: DVec3 },

    /// Quaternion rotation
    Orient(DQuat),

    /// Full 4x4 transform matrix
    Transform(DMat4),
}

impl XformOp {
    /// Convert this operation to a transformation matrix.
    pub fn to_matrix(&self) -> DMat4 {
        match self {
            XformOp::Translate(t) => DMat4::from_translation(*t),
            XformOp::Scale(s) => DMat4::from_scale(*s),
            XformOp::RotateX(deg) => Axis::X.rotation(*deg),
            XformOp::RotateY(deg) => Axis::Y.rotation(*deg),
            XformOp::RotateZ(deg) => Axis::Z.rotation(*deg),
            XformOp::Rotate3 { order, angles } => {
                let angle = |axis: Axis| match axis {
                    Axis::X => angles.x,
                    Axis::Y => angles.y,
                    Axis::Z => angles.z,
                };
                let [a, b, c] = *order;
                c.rotation(angle(c)) * b.rotation(angle(b)) * a.rotation(angle(a))
            }
            XformOp::Orient(q) => DMat4::from_quat(*q),
            XformOp::Transform(m) => *m,
        }
    }

    /// Build an op from its type token (`translate`, `rotateXYZ`, ...) and
    /// authored value.
    pub fn from_attribute(op_type: &str, value: &Value) -> Option<Self> {
        let op = match op_type {
            "translate" => XformOp::Translate(value.as_vec3()?),
            "scale" => XformOp::Scale(value.as_vec3().or_else(|| value.as_f64().map(DVec3::splat))?),
            "rotateX" => XformOp::RotateX(value.as_f64()?),
            "rotateY" => XformOp::RotateY(value.as_f64()?),
            "rotateZ" => XformOp::RotateZ(value.as_f64()?),
            "orient" => XformOp::Orient(value.as_quat()?),
            "transform" => XformOp::Transform(value.as_matrix4()?),
            other => {
                let axes = other.strip_prefix("rotate")?;
                let mut chars = axes.chars().map(Axis::from_char);
                let order = [chars.next()??, chars.next()??, chars.next()??];
                if chars.next().is_some() {
                    return None;
                }
                XformOp::Rotate3 {
                    order,
                    angles: value.as_vec3()?,
                }
            }
        };
        Some(op)
    }
}

/// Combine a list of xformOps into a single matrix.
pub fn compose_xform_ops(ops: &[XformOp]) -> DMat4 {
    let mut result = DMat4::IDENTITY;
    for op in ops {
        result *= op.to_matrix();
    }
    result
}

/// A prim's local transform.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocalTransform {
    pub matrix: DMat4,
    /// Parent transforms do not apply to this prim
    pub resets_xform_stack: bool,
}

impl Default for LocalTransform {
    fn default() -> Self {
        Self {
            matrix: DMat4::IDENTITY,
            resets_xform_stack: false,
        }
    }
}

/// Evaluate `xformOpOrder` on a prim at the default time.
///
/// Ops named in the order but missing a value are skipped with a warning.
pub fn local_transform(prim: &Prim) -> LocalTransform {
    let mut transform = LocalTransform::default();
    let Some(order) = prim.attribute("xformOpOrder").and_then(|a| a.get()).and_then(Value::as_array) else {
        return transform;
    };

    for token in order.iter().filter_map(Value::as_str) {
        if token == RESET_XFORM_STACK {
            transform.matrix = DMat4::IDENTITY;
            transform.resets_xform_stack = true;
            continue;
        }

        let (inverse, name) = match token.strip_prefix(INVERT_PREFIX) {
            Some(name) => (true, name),
            None => (false, token),
        };
        let Some(op_type) = name.strip_prefix("xformOp:").and_then(|rest| rest.split(':').next()) else {
            log::warn!("{}: ignoring xformOp '{}'", prim.path(), token);
            continue;
        };
        let op = prim
            .attribute(name)
            .and_then(|a| a.get())
            .and_then(|value| XformOp::from_attribute(op_type, value));
        match op {
            Some(op) => {
                let matrix = op.to_matrix();
                transform.matrix *= if inverse { matrix.inverse() } else { matrix };
            }
            None => log::warn!("{}: xformOp '{}' has no usable value", prim.path(), name),
        }
    }

    transform
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usd::{parse_usda, AssetLocation, Stage, StageOptions};

    fn approx(a: DVec3, b: DVec3) -> bool {
        (a - b).length() < 1e-9
    }

    fn transform_of(body: &str) -> LocalTransform {
        let content = format!("#usda 1.0\ndef Xform \"X\" {{\n{}\n}}\n", body);
        let layer = parse_usda(&content, AssetLocation::Anonymous("test".into())).unwrap();
        let stage = Stage::from_root_layer(layer, StageOptions::default());
        local_transform(stage.prim_at_path("/X").unwrap())
    }

    #[test]
    fn test_compose_xform_ops() {
        let ops = vec![
            XformOp::Translate(DVec3::new(1.0, 2.0, 3.0)),
            XformOp::Scale(DVec3::new(2.0, 2.0, 2.0)),
        ];

        let m = compose_xform_ops(&ops);
        let p = m.transform_point3(DVec3::new(1.0, 1.0, 1.0));
        assert!(approx(p, DVec3::new(3.0, 4.0, 5.0)));
    }

    #[test]
    fn test_rotate_xyz_applies_x_first() {
        let op = XformOp::Rotate3 {
            order: [Axis::X, Axis::Y, Axis::Z],
            angles: DVec3::new(90.0, 0.0, 90.0),
        };
        let expected = Axis::Z.rotation(90.0) * Axis::X.rotation(90.0);
        let p = DVec3::new(0.0, 1.0, 0.0);
        assert!(approx(op.to_matrix().transform_point3(p), expected.transform_point3(p)));
        // +Y -> +Z under rotateX(90), unchanged by rotateZ(90)
        assert!(approx(op.to_matrix().transform_point3(p), DVec3::new(0.0, 0.0, 1.0)));
    }

    #[test]
    fn test_from_attribute() {
        let v = Value::Tuple(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(
            XformOp::from_attribute("translate", &v),
            Some(XformOp::Translate(DVec3::new(1.0, 2.0, 3.0)))
        );
        assert!(matches!(
            XformOp::from_attribute("rotateZYX", &v),
            Some(XformOp::Rotate3 { order: [Axis::Z, Axis::Y, Axis::X], .. })
        ));
        assert!(XformOp::from_attribute("rotateXX", &v).is_none());
        assert!(XformOp::from_attribute("shear", &v).is_none());
    }

    #[test]
    fn test_local_transform_order() {
        let t = transform_of(
            r#"    double3 xformOp:translate = (10, 0, 0)
    double3 xformOp:scale = (2, 2, 2)
    uniform token[] xformOpOrder = ["xformOp:translate", "xformOp:scale"]"#,
        );
        assert!(!t.resets_xform_stack);
        let p = t.matrix.transform_point3(DVec3::new(1.0, 0.0, 0.0));
        assert!(approx(p, DVec3::new(12.0, 0.0, 0.0)));
    }

    #[test]
    fn test_local_transform_pivot_and_invert() {
        let t = transform_of(
            r#"    double3 xformOp:translate:pivot = (1, 0, 0)
    float xformOp:rotateZ = 180
    uniform token[] xformOpOrder = ["xformOp:translate:pivot", "xformOp:rotateZ", "!invert!xformOp:translate:pivot"]"#,
        );
        // rotation about the pivot leaves the pivot fixed
        let p = t.matrix.transform_point3(DVec3::new(1.0, 0.0, 0.0));
        assert!(approx(p, DVec3::new(1.0, 0.0, 0.0)));
        let q = t.matrix.transform_point3(DVec3::ZERO);
        assert!(approx(q, DVec3::new(2.0, 0.0, 0.0)));
    }

    #[test]
    fn test_local_transform_reset_stack() {
        let t = transform_of(
            r#"    double3 xformOp:translate = (5, 0, 0)
    uniform token[] xformOpOrder = ["!resetXformStack!", "xformOp:translate"]"#,
        );
        assert!(t.resets_xform_stack);
        assert!(approx(t.matrix.transform_point3(DVec3::ZERO), DVec3::new(5.0, 0.0, 0.0)));
    }

    #[test]
    fn test_local_transform_without_order() {
        let t = transform_of("    double3 xformOp:translate = (5, 0, 0)");
        assert_eq!(t, LocalTransform::default());
    }
}

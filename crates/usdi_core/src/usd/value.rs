//! Scene description values.
//!
//! A `Value` is the parsed form of anything that can appear on the right of
//! `=` in a USDA file: attribute defaults, metadata, time samples and
//! dictionaries. Values keep enough structure to be written back out and to
//! be read as vectors, matrices and quaternions by the geometry code.

use std::fmt;

use usdi_math::{DMat4, DQuat, DVec3};

/// A parsed scene description value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// `None` (a blocked or empty value)
    None,

    /// `true` / `false`
    Bool(bool),

    /// Integer literal (no decimal point or exponent)
    Int(i64),

    /// Floating point literal
    Float(f64),

    /// Quoted string (also used for tokens)
    String(String),

    /// Bare identifier such as `inf` or `nan`
    Ident(String),

    /// `@path@` asset path
    AssetPath(String),

    /// `</Some/Path>` scene path
    Path(String),

    /// `(a, b, c)`
    Tuple(Vec<Value>),

    /// `[a, b, c]`
    Array(Vec<Value>),

    /// `{ type key = value ... }`
    Dictionary(Vec<DictEntry>),

    /// `{ time: value, ... }`
    TimeSamples(Vec<(f64, Value)>),
}

/// One typed entry of a dictionary value.
#[derive(Clone, Debug, PartialEq)]
pub struct DictEntry {
    /// Declared value type (`string`, `double3`, `dictionary`, ...)
    pub type_name: String,

    /// Entry key
    pub key: String,

    /// Entry value
    pub value: Value,
}

impl Value {
    /// Numeric value as `f64` (integers widen, `inf`/`nan` identifiers parse).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Ident(s) => match s.as_str() {
                "inf" => Some(f64::INFINITY),
                "-inf" => Some(f64::NEG_INFINITY),
                "nan" => Some(f64::NAN),
                _ => None,
            },
            _ => None,
        }
    }

    /// Integer value (floats are not truncated).
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Boolean value. USDA writes booleans as `true`/`false` or `0`/`1`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    /// String or token contents.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Ident(s) => Some(s),
            _ => None,
        }
    }

    /// Asset path contents (without the `@` delimiters).
    pub fn as_asset_path(&self) -> Option<&str> {
        match self {
            Value::AssetPath(s) => Some(s),
            _ => None,
        }
    }

    /// Scene path contents (without the `<>` delimiters).
    pub fn as_path(&self) -> Option<&str> {
        match self {
            Value::Path(s) => Some(s),
            _ => None,
        }
    }

    /// Array elements.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// A 3-tuple of numbers.
    pub fn as_vec3(&self) -> Option<DVec3> {
        match self {
            Value::Tuple(items) if items.len() == 3 => Some(DVec3::new(
                items[0].as_f64()?,
                items[1].as_f64()?,
                items[2].as_f64()?,
            )),
            _ => None,
        }
    }

    /// An array of 3-tuples (points, extents, positions, scales).
    pub fn as_vec3_array(&self) -> Option<Vec<DVec3>> {
        self.as_array()?.iter().map(Value::as_vec3).collect()
    }

    /// An array of integers.
    pub fn as_int_array(&self) -> Option<Vec<i64>> {
        self.as_array()?.iter().map(Value::as_i64).collect()
    }

    /// A quaternion written `(w, x, y, z)` (real part first).
    pub fn as_quat(&self) -> Option<DQuat> {
        match self {
            Value::Tuple(items) if items.len() == 4 => {
                let w = items[0].as_f64()?;
                let x = items[1].as_f64()?;
                let y = items[2].as_f64()?;
                let z = items[3].as_f64()?;
                Some(DQuat::from_xyzw(x, y, z, w).normalize())
            }
            _ => None,
        }
    }

    /// An array of quaternions.
    pub fn as_quat_array(&self) -> Option<Vec<DQuat>> {
        self.as_array()?.iter().map(Value::as_quat).collect()
    }

    /// A `matrix4d` value. USDA stores matrices row-major with the
    /// translation in the last row (row-vector convention), which is the
    /// column layout glam expects.
    pub fn as_matrix4(&self) -> Option<DMat4> {
        let Value::Tuple(rows) = self else {
            return None;
        };
        if rows.len() != 4 {
            return None;
        }

        let mut cols = [[0.0f64; 4]; 4];
        for (i, row) in rows.iter().enumerate() {
            let Value::Tuple(items) = row else {
                return None;
            };
            if items.len() != 4 {
                return None;
            }
            for (j, item) in items.iter().enumerate() {
                cols[i][j] = item.as_f64()?;
            }
        }

        Some(DMat4::from_cols_array_2d(&cols))
    }

    /// Look up a key in a dictionary value.
    pub fn dict_get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Dictionary(entries) => entries.iter().find(|e| e.key == key).map(|e| &e.value),
            _ => None,
        }
    }

    /// Visit every nested value mutably (depth-first, self first).
    pub fn visit_mut(&mut self, f: &mut dyn FnMut(&mut Value)) {
        f(self);
        match self {
            Value::Tuple(items) | Value::Array(items) => {
                for item in items {
                    item.visit_mut(f);
                }
            }
            Value::Dictionary(entries) => {
                for entry in entries {
                    entry.value.visit_mut(f);
                }
            }
            Value::TimeSamples(samples) => {
                for (_, value) in samples {
                    value.visit_mut(f);
                }
            }
            _ => {}
        }
    }

    /// Visit every nested value (depth-first, self first).
    pub fn visit(&self, f: &mut dyn FnMut(&Value)) {
        f(self);
        match self {
            Value::Tuple(items) | Value::Array(items) => {
                for item in items {
                    item.visit(f);
                }
            }
            Value::Dictionary(entries) => {
                for entry in entries {
                    entry.value.visit(f);
                }
            }
            Value::TimeSamples(samples) => {
                for (_, value) in samples {
                    value.visit(f);
                }
            }
            _ => {}
        }
    }
}

/// Format a float the way USDA files spell them.
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else if value == f64::INFINITY {
        "inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        format!("{}", value)
    }
}

/// Quote a string for USDA output.
pub fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Delimit an asset path, switching to `@@@` when the path contains `@`.
pub fn quote_asset_path(s: &str) -> String {
    if s.contains('@') {
        format!("@@@{}@@@", s)
    } else {
        format!("@{}@", s)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", format_float(*v)),
            Value::String(s) => write!(f, "{}", quote_string(s)),
            Value::Ident(s) => write!(f, "{}", s),
            Value::AssetPath(s) => write!(f, "{}", quote_asset_path(s)),
            Value::Path(s) => write!(f, "<{}>", s),
            Value::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Dictionary(entries) => {
                write!(f, "{{")?;
                for entry in entries {
                    write!(f, " {} {} = {}", entry.type_name, quote_dict_key(&entry.key), entry.value)?;
                }
                write!(f, " }}")
            }
            Value::TimeSamples(samples) => {
                write!(f, "{{")?;
                for (i, (time, value)) in samples.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, " {}: {}", format_float(*time), value)?;
                }
                write!(f, " }}")
            }
        }
    }
}

/// Dictionary keys are identifiers unless they need quoting.
pub(crate) fn quote_dict_key(key: &str) -> String {
    let is_ident = key
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':');
    if is_ident {
        key.to_string()
    } else {
        quote_string(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_nested() {
        let value = Value::Array(vec![
            Value::Tuple(vec![Value::Int(0), Value::Float(0.5), Value::Int(-1)]),
            Value::Tuple(vec![Value::Int(1), Value::Int(1), Value::Int(1)]),
        ]);
        assert_eq!(value.to_string(), "[(0, 0.5, -1), (1, 1, 1)]");
    }

    #[test]
    fn test_float_formatting() {
        assert_eq!(format_float(1.0), "1");
        assert_eq!(format_float(0.01), "0.01");
        assert_eq!(format_float(f64::INFINITY), "inf");
        assert_eq!(format_float(f64::NEG_INFINITY), "-inf");
    }

    #[test]
    fn test_quote_string_escapes() {
        assert_eq!(quote_string("a\"b\\c\nd"), "\"a\\\"b\\\\c\\nd\"");
        assert_eq!(quote_string("\u{1}"), "\"\\x01\"");
    }

    #[test]
    fn test_as_vec3_array() {
        let value = Value::Array(vec![
            Value::Tuple(vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
            Value::Tuple(vec![Value::Float(0.5), Value::Int(0), Value::Ident("inf".into())]),
        ]);
        let points = value.as_vec3_array().unwrap();
        assert_eq!(points[0], DVec3::new(1.0, 2.0, 3.0));
        assert_eq!(points[1].z, f64::INFINITY);
    }

    #[test]
    fn test_as_quat_real_first() {
        let value = Value::Tuple(vec![Value::Int(1), Value::Int(0), Value::Int(0), Value::Int(0)]);
        assert_eq!(value.as_quat().unwrap(), DQuat::IDENTITY);
    }

    #[test]
    fn test_as_matrix4_translation_row() {
        let row = |a: i64, b: i64, c: i64, d: i64| {
            Value::Tuple(vec![Value::Int(a), Value::Int(b), Value::Int(c), Value::Int(d)])
        };
        let value = Value::Tuple(vec![row(1, 0, 0, 0), row(0, 1, 0, 0), row(0, 0, 1, 0), row(5, 6, 7, 1)]);
        let m = value.as_matrix4().unwrap();
        assert_eq!(m.transform_point3(DVec3::ZERO), DVec3::new(5.0, 6.0, 7.0));
    }

    #[test]
    fn test_dict_get() {
        let value = Value::Dictionary(vec![DictEntry {
            type_name: "string".into(),
            key: "shadingVariant".into(),
            value: Value::String("red".into()),
        }]);
        assert_eq!(value.dict_get("shadingVariant").and_then(Value::as_str), Some("red"));
        assert!(value.dict_get("missing").is_none());
    }
}

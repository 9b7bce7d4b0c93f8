//! Scene path helpers.
//!
//! Prim paths are plain strings (`/World/Cube`). The pseudo root is `/`.
//! Property paths append `.name` to a prim path (`/World/Cube.size`).

/// Path of the pseudo root.
pub const ABSOLUTE_ROOT: &str = "/";

/// True when `path` is an absolute prim or property path.
pub fn is_absolute(path: &str) -> bool {
    path.starts_with('/')
}

/// True when `name` is a valid prim name (identifier characters only).
pub fn is_valid_prim_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// Path of a named child under `parent`.
pub fn child_path(parent: &str, name: &str) -> String {
    if parent == ABSOLUTE_ROOT || parent.is_empty() {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Parent of a prim path. The parent of a root prim is `/`.
pub fn parent_path(path: &str) -> Option<&str> {
    if path == ABSOLUTE_ROOT || !is_absolute(path) {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ABSOLUTE_ROOT),
        Some(i) => Some(&path[..i]),
        None => None,
    }
}

/// Last element of a prim path.
pub fn name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Names of the prims along a path (`/A/B` → `["A", "B"]`).
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty())
}

/// True when `path` is `prefix` or lies under it (children or properties).
pub fn has_prefix(path: &str, prefix: &str) -> bool {
    if prefix == ABSOLUTE_ROOT {
        return is_absolute(path);
    }
    match path.strip_prefix(prefix) {
        Some("") => true,
        Some(rest) => rest.starts_with('/') || rest.starts_with('.'),
        None => false,
    }
}

/// Replace the `src` prefix of `path` with `dst`. Paths outside `src`
/// are returned unchanged.
pub fn replace_prefix(path: &str, src: &str, dst: &str) -> String {
    if !has_prefix(path, src) {
        return path.to_string();
    }
    if src == ABSOLUTE_ROOT {
        return format!("{}{}", dst.trim_end_matches('/'), path);
    }
    let rest = &path[src.len()..];
    if dst == ABSOLUTE_ROOT && rest.starts_with('/') {
        rest.to_string()
    } else {
        format!("{}{}", dst, rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_and_parent() {
        assert_eq!(child_path("/", "World"), "/World");
        assert_eq!(child_path("/World", "Cube"), "/World/Cube");
        assert_eq!(parent_path("/World/Cube"), Some("/World"));
        assert_eq!(parent_path("/World"), Some("/"));
        assert_eq!(parent_path("/"), None);
        assert_eq!(name_of("/World/Cube"), "Cube");
    }

    #[test]
    fn test_has_prefix_respects_boundaries() {
        assert!(has_prefix("/World/Cube", "/World"));
        assert!(has_prefix("/World.visibility", "/World"));
        assert!(has_prefix("/World", "/World"));
        assert!(!has_prefix("/WorldMap", "/World"));
    }

    #[test]
    fn test_replace_prefix() {
        assert_eq!(replace_prefix("/Cube/Mesh", "/Cube", "/World/Ref"), "/World/Ref/Mesh");
        assert_eq!(replace_prefix("/Cube.size", "/Cube", "/A"), "/A.size");
        assert_eq!(replace_prefix("/Other", "/Cube", "/A"), "/Other");
    }

    #[test]
    fn test_prim_names() {
        assert!(is_valid_prim_name("Cube_01"));
        assert!(!is_valid_prim_name("1Cube"));
        assert!(!is_valid_prim_name(""));
        assert_eq!(components("/A/B").collect::<Vec<_>>(), vec!["A", "B"]);
    }
}

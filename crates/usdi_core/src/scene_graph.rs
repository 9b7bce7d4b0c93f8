//! JSON views of the composed scene graph.

use serde::Serialize;

use crate::usd::{Prim, Stage};

enum Step<'a> {
    Open(&'a Prim),
    Close,
}

/// Render the visible prim hierarchy under the pseudo root as a JSON array
/// of `{"name","path","type"?,"children"}` objects, in composed child order.
/// `type` is left out for typeless prims.
pub fn scene_graph_json(stage: &Stage) -> serde_json::Result<String> {
    let mut out = String::from("[");
    let mut stack: Vec<Step> = stage.pseudo_root().default_children().rev().map(Step::Open).collect();
    // Whether the next node written is the first in its array
    let mut first = true;

    while let Some(step) = stack.pop() {
        match step {
            Step::Open(prim) => {
                if !first {
                    out.push(',');
                }
                out.push_str("{\"name\":");
                out.push_str(&serde_json::to_string(prim.name())?);
                out.push_str(",\"path\":");
                out.push_str(&serde_json::to_string(prim.path())?);
                if !prim.type_name().is_empty() {
                    out.push_str(",\"type\":");
                    out.push_str(&serde_json::to_string(prim.type_name())?);
                }
                out.push_str(",\"children\":[");

                stack.push(Step::Close);
                stack.extend(prim.default_children().rev().map(Step::Open));
                first = true;
            }
            Step::Close => {
                out.push_str("]}");
                first = false;
            }
        }
    }

    out.push(']');
    Ok(out)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReferenceEntry<'a> {
    asset_path: &'a str,
    prim_path: &'a str,
}

/// The direct reference arcs of a prim as `[{"assetPath","primPath"}]`.
/// Arcs that did not resolve are not listed.
pub fn prim_references_json(prim: &Prim) -> serde_json::Result<String> {
    let entries: Vec<ReferenceEntry> = prim
        .direct_references()
        .iter()
        .map(|r| ReferenceEntry {
            asset_path: &r.asset_path,
            prim_path: &r.prim_path,
        })
        .collect();
    serde_json::to_string(&entries)
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value as Json};

    use super::*;
    use crate::test_asset_path;
    use crate::usd::path::child_path;
    use crate::usd::{parse_usda, AssetLocation, Layer, PrimSpec, Specifier, StageOptions};

    fn stage(content: &str) -> Stage {
        let layer = parse_usda(content, AssetLocation::Anonymous("test".into())).unwrap();
        Stage::from_root_layer(layer, StageOptions::default())
    }

    #[test]
    fn test_empty_scene() {
        assert_eq!(scene_graph_json(&stage("#usda 1.0\n")).unwrap(), "[]");
    }

    #[test]
    fn test_scene_graph_shape() {
        let stage = stage(
            r#"#usda 1.0
def Xform "World" {
    def Mesh "Ground" {}
    def "Group" {
        def Sphere "Ball" {}
    }
    def "Inactive" (
        active = false
    ) {}
}
class "Template" {}
over "Sparse" {}
def Camera "Cam" {}
"#,
        );

        let text = scene_graph_json(&stage).unwrap();
        assert!(text.starts_with(r#"[{"name":"World","path":"/World","type":"Xform","children":[{"name":"Ground""#));

        let parsed: Json = serde_json::from_str(&text).unwrap();
        assert_eq!(
            parsed,
            json!([
                {
                    "name": "World",
                    "path": "/World",
                    "type": "Xform",
                    "children": [
                        {"name": "Ground", "path": "/World/Ground", "type": "Mesh", "children": []},
                        {
                            "name": "Group",
                            "path": "/World/Group",
                            "children": [
                                {"name": "Ball", "path": "/World/Group/Ball", "type": "Sphere", "children": []}
                            ]
                        }
                    ]
                },
                {"name": "Cam", "path": "/Cam", "type": "Camera", "children": []}
            ])
        );
    }

    #[test]
    fn test_scene_graph_escaping() {
        let stage = Stage::open(test_asset_path("assets/escape_names.usda")).unwrap();
        let text = scene_graph_json(&stage).unwrap();

        assert!(text.contains(r#""name":"Say \"hi\"\\\t\u0001""#));
        let parsed: Json = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed[0]["name"], "Say \"hi\"\\\t\u{1}");
        assert_eq!(parsed[0]["path"], "/Say \"hi\"\\\t\u{1}");
        assert_eq!(parsed[1]["name"], "caf\u{e9}");
    }

    #[test]
    fn test_control_characters_round_trip() {
        let name: String = (0u8..0x20).map(char::from).chain(['"', '\\']).collect();
        let mut layer = Layer::new(AssetLocation::Anonymous("control".into()));
        layer
            .root
            .children
            .push(PrimSpec::new(Specifier::Def, "Scope", name.clone(), child_path("/", &name)));
        let stage = Stage::from_root_layer(layer, StageOptions::default());
        let text = scene_graph_json(&stage).unwrap();

        let mut escaped: String = (0u8..0x20)
            .map(|b| match b {
                0x08 => "\\b".to_string(),
                0x09 => "\\t".to_string(),
                0x0a => "\\n".to_string(),
                0x0c => "\\f".to_string(),
                0x0d => "\\r".to_string(),
                _ => format!("\\u{:04x}", b),
            })
            .collect();
        escaped.push_str("\\\"\\\\");
        assert!(text.contains(&format!("\"name\":\"{}\"", escaped)));
        assert!(!text.bytes().any(|b| b < 0x20));

        let parsed: Json = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed[0]["name"], name.as_str());
        assert_eq!(parsed[0]["path"], format!("/{}", name));
        assert_eq!(parsed[0]["type"], "Scope");
    }

    #[test]
    fn test_deep_hierarchy() {
        let depth = 200;
        let mut content = String::from("#usda 1.0\n");
        for i in 0..depth {
            content.push_str(&format!("def \"N{}\" {{\n", i));
        }
        for _ in 0..depth {
            content.push_str("}\n");
        }

        let layer = parse_usda(&content, AssetLocation::Anonymous("deep".into())).unwrap();
        let stage = Stage::from_root_layer(layer, StageOptions::default());
        let text = scene_graph_json(&stage).unwrap();
        assert_eq!(text.matches("\"children\":[").count(), depth);
        assert!(text.ends_with(&format!("{}]", "]}".repeat(depth))));
    }

    #[test]
    fn test_prim_references_json() {
        let stage = Stage::open(test_asset_path("assets/ref_test/ref_test.usda")).unwrap();

        let cube_a = stage.prim_at_path("/World/CubeA").unwrap();
        let parsed: Json = serde_json::from_str(&prim_references_json(cube_a).unwrap()).unwrap();
        assert_eq!(parsed, json!([{"assetPath": "./cube.usda", "primPath": ""}]));

        let cube_b = stage.prim_at_path("/World/CubeB").unwrap();
        assert_eq!(
            prim_references_json(cube_b).unwrap(),
            r#"[{"assetPath":"./cube.usda","primPath":"/Cube"}]"#
        );

        let world = stage.prim_at_path("/World").unwrap();
        assert_eq!(prim_references_json(world).unwrap(), "[]");
    }

    #[test]
    fn test_unresolved_references_are_skipped() {
        let stage = stage(
            r#"#usda 1.0
def "Broken" (
    references = @./does_not_exist.usda@
) {}
"#,
        );
        let prim = stage.prim_at_path("/Broken").unwrap();
        assert_eq!(prim_references_json(prim).unwrap(), "[]");
    }
}

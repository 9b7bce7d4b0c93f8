//! USDA text writer.
//!
//! Output always parses back with [`parse_usda`](super::parse_usda).

use std::fmt::Write;

use super::layer::{Layer, ListOp, MetadataEntry, PrimSpec, PropertySpec, Reference};
use super::value::{quote_asset_path, quote_string, Value};

const INDENT: &str = "    ";

/// Serialize a layer as USDA text.
pub fn write_layer(layer: &Layer) -> String {
    let mut out = String::from("#usda 1.0\n");

    if !layer.metadata.is_empty() || !layer.sub_layers.is_empty() {
        out.push_str("(\n");
        for entry in &layer.metadata {
            write_metadata_entry(&mut out, entry, 1);
        }
        if !layer.sub_layers.is_empty() {
            out.push_str(INDENT);
            out.push_str("subLayers = [\n");
            for (i, sub_layer) in layer.sub_layers.iter().enumerate() {
                let separator = if i + 1 < layer.sub_layers.len() { "," } else { "" };
                let _ = writeln!(out, "{}{}{}{}", INDENT, INDENT, quote_asset_path(sub_layer), separator);
            }
            out.push_str(INDENT);
            out.push_str("]\n");
        }
        out.push_str(")\n");
    }

    for prim in layer.root_prims() {
        out.push('\n');
        write_prim(&mut out, prim, 0);
    }

    out
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
}

fn write_metadata_entry(out: &mut String, entry: &MetadataEntry, depth: usize) {
    indent(out, depth);
    if let Some(edit) = entry.list_edit {
        out.push_str(edit.as_str());
        out.push(' ');
    }
    let _ = writeln!(out, "{} = {}", entry.key, entry.value);
}

fn write_reference_list(out: &mut String, key: &str, op: &ListOp<Reference>, depth: usize) {
    for (edit, items) in op.statements() {
        indent(out, depth);
        if let Some(edit) = edit {
            out.push_str(edit.as_str());
            out.push(' ');
        }
        let _ = match items {
            [] => writeln!(out, "{} = None", key),
            [single] => writeln!(out, "{} = {}", key, single),
            many => {
                let joined: Vec<String> = many.iter().map(Reference::to_string).collect();
                writeln!(out, "{} = [{}]", key, joined.join(", "))
            }
        };
    }
}

fn write_prim(out: &mut String, prim: &PrimSpec, depth: usize) {
    indent(out, depth);
    out.push_str(prim.specifier.as_str());
    if !prim.type_name.is_empty() {
        out.push(' ');
        out.push_str(&prim.type_name);
    }
    let _ = write!(out, " {}", quote_string(&prim.name));
    write_prim_metadata_block(out, prim, depth);
    out.push('\n');
    indent(out, depth);
    out.push_str("{\n");
    write_prim_body(out, prim, depth + 1);
    indent(out, depth);
    out.push_str("}\n");
}

fn write_prim_metadata_block(out: &mut String, prim: &PrimSpec, depth: usize) {
    if prim.metadata.is_empty() && prim.references.is_empty() && prim.payloads.is_empty() {
        return;
    }
    out.push_str(" (\n");
    for entry in &prim.metadata {
        write_metadata_entry(out, entry, depth + 1);
    }
    write_reference_list(out, "references", &prim.references, depth + 1);
    write_reference_list(out, "payload", &prim.payloads, depth + 1);
    indent(out, depth);
    out.push(')');
}

fn write_prim_body(out: &mut String, prim: &PrimSpec, depth: usize) {
    for property in &prim.properties {
        write_property(out, property, depth);
    }

    for variant_set in &prim.variant_sets {
        indent(out, depth);
        let _ = writeln!(out, "variantSet {} = {{", quote_string(&variant_set.name));
        for variant in &variant_set.variants {
            indent(out, depth + 1);
            out.push_str(&quote_string(&variant.name));
            write_prim_metadata_block(out, &variant.prim, depth + 1);
            out.push_str(" {\n");
            write_prim_body(out, &variant.prim, depth + 2);
            indent(out, depth + 1);
            out.push_str("}\n");
        }
        indent(out, depth);
        out.push_str("}\n");
    }

    for (i, child) in prim.children.iter().enumerate() {
        if i > 0 || !prim.properties.is_empty() || !prim.variant_sets.is_empty() {
            out.push('\n');
        }
        write_prim(out, child, depth);
    }
}

fn property_prefix(property: &PropertySpec) -> String {
    let mut prefix = String::new();
    if let Some(edit) = property.list_edit {
        prefix.push_str(edit.as_str());
        prefix.push(' ');
    }
    if property.custom {
        prefix.push_str("custom ");
    }
    if let Some(variability) = &property.variability {
        prefix.push_str(variability);
        prefix.push(' ');
    }
    prefix.push_str(property.type_name());
    prefix.push(' ');
    prefix.push_str(&property.name);
    prefix
}

fn write_property(out: &mut String, property: &PropertySpec, depth: usize) {
    let prefix = property_prefix(property);
    let has_value_line = property.default.is_some()
        || (property.time_samples.is_none() && property.connections.is_none());

    if has_value_line {
        indent(out, depth);
        out.push_str(&prefix);
        if let Some(value) = &property.default {
            let _ = write!(out, " = {}", value);
        }
        write_property_metadata(out, &property.metadata, depth);
        out.push('\n');
    }

    if let Some(samples) = &property.time_samples {
        indent(out, depth);
        let _ = write!(out, "{}.timeSamples = ", prefix);
        write_time_samples(out, samples, depth);
        if !has_value_line {
            write_property_metadata(out, &property.metadata, depth);
        }
        out.push('\n');
    }

    if let Some(connections) = &property.connections {
        indent(out, depth);
        let _ = write!(out, "{}.connect = {}", prefix, connections);
        if !has_value_line && property.time_samples.is_none() {
            write_property_metadata(out, &property.metadata, depth);
        }
        out.push('\n');
    }
}

fn write_time_samples(out: &mut String, samples: &Value, depth: usize) {
    match samples {
        Value::TimeSamples(samples) => {
            out.push_str("{\n");
            for (time, value) in samples {
                indent(out, depth + 1);
                let _ = writeln!(out, "{}: {},", super::value::format_float(*time), value);
            }
            indent(out, depth);
            out.push('}');
        }
        other => {
            let _ = write!(out, "{}", other);
        }
    }
}

fn write_property_metadata(out: &mut String, metadata: &[MetadataEntry], depth: usize) {
    if metadata.is_empty() {
        return;
    }
    out.push_str(" (\n");
    for entry in metadata {
        write_metadata_entry(out, entry, depth + 1);
    }
    indent(out, depth);
    out.push(')');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usd::{parse_usda, AssetLocation, Specifier};

    const SCENE: &str = r#"#usda 1.0
(
    "Round trip"
    defaultPrim = "World"
    metersPerUnit = 0.01
    subLayers = [@./base.usda@, @./lights.usda@]
)

def Xform "World" (
    kind = "assembly"
    prepend references = [@./a.usda@</A>, @./b.usda@]
    delete references = @./c.usda@
    payload = @./heavy.usda@
) {
    uniform token[] xformOpOrder = ["xformOp:translate"]
    double3 xformOp:translate = (1, 2, 3)
    float radius.timeSamples = { 0: 1, 24: 2.5 }
    custom rel target = </World/Child>
    color3f inputs:color.connect = </Mat.outputs:rgb>
    string label = "tab\there \"quoted\"" (
        doc = "a label"
    )

    variantSet "look" = {
        "red" (
            references = None
        ) {
            color3f color = (1, 0, 0)
        }
    }

    def "Child" {}
    over "Patched" {}
}
"#;

    fn parse(content: &str) -> Layer {
        parse_usda(content, AssetLocation::Anonymous("test".into())).unwrap()
    }

    #[test]
    fn test_writer_output_reparses() {
        let layer = parse(SCENE);
        let text = write_layer(&layer);
        let reparsed = parse(&text);

        assert_eq!(reparsed.metadata, layer.metadata);
        assert_eq!(reparsed.sub_layers, layer.sub_layers);
        assert_eq!(reparsed.root, layer.root);
    }

    #[test]
    fn test_writer_header() {
        let text = write_layer(&parse(SCENE));
        assert!(text.starts_with("#usda 1.0\n(\n"));
        assert!(text.contains("    metersPerUnit = 0.01\n"));
        assert!(text.contains("prepend references = [@./a.usda@</A>, @./b.usda@]"));
        assert!(text.contains("delete references = @./c.usda@"));
    }

    #[test]
    fn test_writer_empty_layer() {
        let layer = Layer::new(AssetLocation::Anonymous("empty".into()));
        assert_eq!(write_layer(&layer), "#usda 1.0\n");
    }

    #[test]
    fn test_writer_preserves_specifiers() {
        let reparsed = parse(&write_layer(&parse(SCENE)));
        assert_eq!(reparsed.prim_spec("/World/Patched").unwrap().specifier, Specifier::Over);
        assert_eq!(reparsed.prim_spec("/World").unwrap().type_name, "Xform");
    }
}

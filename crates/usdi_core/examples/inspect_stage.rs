//! Example: Open a stage and print what the C interface would return.
//!
//! Run with: cargo run --example inspect_stage -- assets/ref_test/ref_test.usda

use std::env;

use anyhow::{bail, Context, Result};
use usdi_core::usd::Stage;
use usdi_core::{compute_scene_bounds, prim_references_json, scene_graph_json, DependencyContext};

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        println!("Usage: inspect_stage <path-to-usd-file>");
        println!("\nExamples:");
        println!("  cargo run --example inspect_stage -- assets/triangle.usda");
        println!("  cargo run --example inspect_stage -- assets/ref_test/ref_test.usda");
        println!("  cargo run --example inspect_stage -- assets/deps/root.usda");
        bail!("missing stage path");
    }

    let path = &args[1];
    println!("Opening stage: {}", path);
    let stage = Stage::open(path).with_context(|| format!("failed to open {}", path))?;

    println!("\n=== Stage ===");
    println!("metersPerUnit: {}", stage.meters_per_unit());
    println!("upAxis: {}", stage.up_axis());
    if let Some(prim) = stage.default_prim() {
        println!("defaultPrim: {}", prim.path());
    }

    println!("\n--- Scene Graph ---");
    println!("{}", scene_graph_json(&stage)?);

    println!("\n--- References ---");
    for prim in stage.traverse() {
        if !prim.direct_references().is_empty() {
            println!("  {} {}", prim.path(), prim_references_json(prim)?);
        }
    }

    println!("\n--- World Bounds ---");
    match compute_scene_bounds(&stage) {
        Some(bounds) => {
            println!("  Min: ({:.2}, {:.2}, {:.2})", bounds.min.x, bounds.min.y, bounds.min.z);
            println!("  Max: ({:.2}, {:.2}, {:.2})", bounds.max.x, bounds.max.y, bounds.max.z);
            println!("  Max extent: {:.2}", bounds.max_extent);
        }
        None => println!("  (no geometry)"),
    }

    println!("\n--- Dependencies ---");
    let mut context = DependencyContext::new();
    let check = context.check(path);
    println!("  success: {}, unresolved: {}", check.success, check.unresolved_count);
    for unresolved in context.unresolved_paths() {
        println!("  unresolved: {}", unresolved);
    }

    Ok(())
}

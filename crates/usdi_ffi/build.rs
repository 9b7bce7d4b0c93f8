use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=src/lib.rs");
    println!("cargo:rerun-if-changed=cbindgen.toml");

    let Ok(crate_dir) = env::var("CARGO_MANIFEST_DIR") else {
        return;
    };
    let output_file = PathBuf::from(&crate_dir).join("include").join("usdi.h");

    let config = match cbindgen::Config::from_file(PathBuf::from(&crate_dir).join("cbindgen.toml")) {
        Ok(config) => config,
        Err(e) => {
            println!("cargo:warning=cbindgen: cannot read cbindgen.toml: {}", e);
            return;
        }
    };

    match cbindgen::Builder::new().with_crate(&crate_dir).with_config(config).generate() {
        Ok(bindings) => {
            if let Some(dir) = output_file.parent() {
                let _ = std::fs::create_dir_all(dir);
            }
            bindings.write_to_file(&output_file);
        }
        Err(cbindgen::Error::ParseSyntaxError { .. }) => {
            // Test builds may contain code cbindgen cannot parse.
            eprintln!("cbindgen: skipping header generation (parse error, likely cfg(test))");
        }
        Err(e) => {
            println!("cargo:warning=cbindgen: header not generated: {:?}", e);
        }
    }
}

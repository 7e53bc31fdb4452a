use std::error::Error;
use std::path::PathBuf;
use std::{env, fs};

use canopy_generate::RenderOptions;

#[path = "grammar.rs"]
mod grammar;

fn main() -> Result<(), Box<dyn Error>> {
    println!("cargo:rerun-if-changed=grammar.rs");
    println!("cargo:rerun-if-changed=build.rs");

    let data = canopy_generate::generate(&grammar::grammar())?;
    let source = canopy_generate::render(
        &data,
        &RenderOptions {
            scanner_path: Some("crate::scanner::new_scanner".to_owned()),
            ..RenderOptions::default()
        },
    );

    let out_dir = PathBuf::from(env::var("OUT_DIR")?);
    fs::write(out_dir.join("parser.rs"), source)?;
    Ok(())
}

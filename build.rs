//! Compiles the WGSL shaders in `shaders/` to SPIR-V so the renderer can
//! embed them with `include_bytes!`.

use std::env;
use std::fs;
use std::path::PathBuf;

/// Shaders to compile, relative to the `shaders/` directory.
const SHADERS: &[&str] = &["cube.wgsl"];

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));

    for name in SHADERS {
        let path = PathBuf::from("shaders").join(name);
        println!("cargo:rerun-if-changed={}", path.display());

        let source = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("Failed to read shader {}: {e}", path.display()));

        let words = compile_shader(&source, name).unwrap_or_else(|e| panic!("{e}"));
        let bytes = words
            .iter()
            .flat_map(|word| word.to_le_bytes())
            .collect::<Vec<u8>>();

        let out_path = out_dir.join(name).with_extension("spv");
        fs::write(&out_path, bytes)
            .unwrap_or_else(|e| panic!("Failed to write {}: {e}", out_path.display()));
    }
}

/// Parse, validate and translate one WGSL shader into SPIR-V words. Every
/// entry point in the module ends up in the output.
fn compile_shader(source: &str, name: &str) -> Result<Vec<u32>, String> {
    let module = naga::front::wgsl::parse_str(source)
        .map_err(|e| format!("WGSL parse error for {}: {}", name, e.emit_to_string(source)))?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    let info = validator
        .validate(&module)
        .map_err(|e| format!("Validation error for {}: {:?}", name, e))?;

    // ADJUST_COORDINATE_SPACE flips clip-space Y so the shaders can assume a
    // Y-up NDC with counter-clockwise front faces, as on every other API.
    let options = naga::back::spv::Options {
        flags: naga::back::spv::WriterFlags::ADJUST_COORDINATE_SPACE
            | naga::back::spv::WriterFlags::LABEL_VARYINGS,
        ..Default::default()
    };

    naga::back::spv::write_vec(&module, &info, &options, None)
        .map_err(|e| format!("SPIR-V generation error for {}: {:?}", name, e))
}

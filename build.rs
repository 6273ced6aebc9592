use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Declares one module per `src/passes/<id>/mod.rs` so each pass can self-register.
fn main() -> io::Result<()> {
    let passes_root = PathBuf::from(env::var_os("CARGO_MANIFEST_DIR").unwrap_or_default())
        .join("src")
        .join("passes");
    println!("cargo:rerun-if-changed={}", passes_root.display());

    let mut declarations = String::new();
    for (name, module) in pass_modules(&passes_root)? {
        println!("cargo:rerun-if-changed={}", module.display());
        declarations.push_str(&format!("#[path = {module:?}]\npub(crate) mod {name};\n"));
    }

    let out_dir = PathBuf::from(env::var_os("OUT_DIR").unwrap_or_default());
    fs::write(out_dir.join("pass_modules.rs"), declarations)
}

/// Pass directories holding a `mod.rs`, ordered by name.
fn pass_modules(root: &Path) -> io::Result<Vec<(String, PathBuf)>> {
    let mut modules = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let module = entry.path().join("mod.rs");
        if entry.file_type()?.is_dir() && module.is_file() {
            modules.push((entry.file_name().to_string_lossy().into_owned(), module));
        }
    }
    modules.sort();
    Ok(modules)
}

use std::env;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

fn main() {
    // The host-side build (tests, the fake platform) needs no linker script.
    if cfg!(feature = "rt") {
        let out = &PathBuf::from(env::var_os("OUT_DIR").expect("OUT_DIR is set by cargo"));

        File::create(out.join("memory.x"))
            .expect("Failed to create memory.x in OUT_DIR")
            .write_all(include_bytes!("memory.x"))
            .expect("Failed to write memory.x");
        println!("cargo:rustc-link-search={}", out.display());

        println!("cargo:rerun-if-changed=memory.x");
    }

    println!("cargo:rerun-if-changed=build.rs");
}

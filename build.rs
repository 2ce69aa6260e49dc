//! Puts `memory.x` on the linker search path and adds the RP2040 link
//! scripts. Only the `firmware` build links for the target; host builds and
//! tests get nothing.

use std::env;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=memory.x");
    println!("cargo:rerun-if-changed=build.rs");

    if env::var_os("CARGO_FEATURE_FIRMWARE").is_none() {
        return;
    }

    let out = PathBuf::from(env::var_os("OUT_DIR").unwrap());
    File::create(out.join("memory.x"))
        .unwrap()
        .write_all(include_bytes!("memory.x"))
        .unwrap();
    println!("cargo:rustc-link-search={}", out.display());

    // Skip args already supplied through RUSTFLAGS.
    let rustflags = env::var("CARGO_ENCODED_RUSTFLAGS").unwrap_or_default();
    for script in ["link.x", "link-rp.x", "defmt.x"] {
        if !rustflags.contains(script) {
            println!("cargo:rustc-link-arg-bins=-T{}", script);
        }
    }
    if !rustflags.contains("--nmagic") {
        println!("cargo:rustc-link-arg-bins=--nmagic");
    }
}

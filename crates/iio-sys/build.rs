//! Build script for iio-sys.
//!
//! Locates libiio through pkg-config and falls back to the standard library
//! directories when no `.pc` file is installed (common on embedded images).

use std::path::Path;

fn main() {
    println!("cargo:rerun-if-env-changed=IIO_LIB_DIR");

    if let Ok(dir) = std::env::var("IIO_LIB_DIR") {
        println!("cargo:rustc-link-search=native={}", dir);
        println!("cargo:rustc-link-lib=iio");
        return;
    }

    // Try pkg-config first
    if pkg_config::probe_library("libiio").is_ok() {
        return;
    }

    // Fallback to standard locations
    println!("cargo:rustc-link-lib=iio");

    let lib_paths = [
        "/usr/local/lib",
        "/usr/lib",
        "/usr/lib/x86_64-linux-gnu",
        "/usr/lib/aarch64-linux-gnu",
        "/usr/lib/arm-linux-gnueabihf",
    ];

    for path in lib_paths {
        if Path::new(path).join("libiio.so").exists() || Path::new(path).join("libiio.a").exists()
        {
            println!("cargo:rustc-link-search=native={}", path);
            break;
        }
    }
}

//! Build script for ntodbg-core
//!
//! Checks the toolchain before compilation:
//! - Minimum Rust version (`let ... else` needs Rust 1.65.0+)
//!
//! ## Requirements
//!
//! - **Rust**: 1.65.0 or newer
//! - **QNX Neutrino**: native process control (`target_os = "nto"`)
//! - **Other hosts**: remote control and offline helpers only

fn main()
{
    println!("cargo:rerun-if-changed=build.rs");

    match rustc_version::version() {
        Ok(found) => {
            let required = rustc_version::Version::new(1, 65, 0);
            if found < required {
                panic!("ntodbg-core requires Rust {required} or newer, found {found}");
            }
        }
        Err(_) => println!("cargo:warning=could not verify Rust version"),
    }
}

//! Version stamping for tsupctl.
//!
//! OpenWrt package builds set `TSUP_VERSION` to the feed's package version;
//! local builds fall back to the crate version. Blank values count as unset.

fn main() {
    println!("cargo:rerun-if-env-changed=TSUP_VERSION");
    println!("cargo:rerun-if-changed=Cargo.toml");

    let version = match std::env::var("TSUP_VERSION") {
        Ok(pinned) if !pinned.trim().is_empty() => pinned.trim().to_string(),
        _ => env!("CARGO_PKG_VERSION").to_string(),
    };
    println!("cargo:rustc-env=TSUP_VERSION={}", version);
}

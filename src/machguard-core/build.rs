//! Records the compilation target triple as `TARGET`.
//!
//! Probe availability differs between Darwin, Linux and other unix hosts,
//! so `machguard scan` prints the triple in its report header to tell which
//! platform backend produced the results.

fn main() {
    let target = std::env::var("TARGET").unwrap_or_else(|_| "unknown".to_string());
    println!("cargo:rustc-env=TARGET={target}");
    println!("cargo:rerun-if-env-changed=TARGET");
}

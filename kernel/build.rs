fn main() {
    println!("cargo:rerun-if-changed=linker.ld");
    // The linker script only applies to the bare-metal target; host
    // builds (unit tests) link normally.
    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if target_os == "none" {
        println!(
            "cargo:rustc-link-arg=-T{}/linker.ld",
            env!("CARGO_MANIFEST_DIR")
        );
    }
}

fn main() {
    use std::env;

    println!("cargo:rerun-if-changed=build.rs");

    // MediaRemote is a private framework, so it is not on the default search path.
    if env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("macos") {
        println!("cargo:rustc-link-search=framework=/System/Library/PrivateFrameworks");
    }
}

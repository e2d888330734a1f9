fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-env-changed=LITEPORT_BRIDGE_LIB_DIR");

    if std::env::var_os("CARGO_FEATURE_LINK_NATIVE").is_none() {
        return Ok(());
    }

    let lib_dir = std::env::var("LITEPORT_BRIDGE_LIB_DIR")
        .map_err(|_| "feature `link-native` needs LITEPORT_BRIDGE_LIB_DIR to point at libliteport_bridge.a")?;
    println!("cargo:rustc-link-search=native={lib_dir}");
    println!("cargo:rustc-link-lib=static=liteport_bridge");

    let cxx = match std::env::var("CARGO_CFG_TARGET_OS")?.as_str() {
        "ios" | "macos" => "c++",
        "android" => "c++_shared",
        _ => "stdc++",
    };
    println!("cargo:rustc-link-lib={cxx}");
    Ok(())
}

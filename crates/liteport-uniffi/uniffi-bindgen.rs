//! Generates the Kotlin and Swift sources from the compiled library:
//!
//! ```bash
//! cargo run -p liteport-uniffi --features cli --bin uniffi-bindgen -- \
//!     generate --library target/release/libliteport_uniffi.so \
//!     --language kotlin --out-dir ./bindings/kotlin
//! ```

fn main() {
    uniffi::uniffi_bindgen_main()
}

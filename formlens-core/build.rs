fn main() {
    // The "static" feature of pdfium-render links against a prebuilt
    // pdfium archive. Point PDFIUM_STATIC_LIB_PATH at the directory
    // containing libpdfium.a when it is not on the default search path.
    if let Ok(path) = std::env::var("PDFIUM_STATIC_LIB_PATH") {
        println!("cargo:rustc-link-search=native={path}");
    }
    println!("cargo:rerun-if-env-changed=PDFIUM_STATIC_LIB_PATH");

    #[cfg(target_os = "macos")]
    {
        println!("cargo:rustc-link-arg=-fapple-link-rtlib");
        println!("cargo:rustc-link-lib=dylib=c++");
        println!("cargo:rustc-link-lib=framework=CoreGraphics");
    }

    #[cfg(all(target_os = "linux", target_arch = "aarch64"))]
    println!("cargo:rustc-link-lib=dylib=c++");
}

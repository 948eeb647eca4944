fn main() {
    // Only link OpenCL when the gpu feature is enabled
    if cfg!(feature = "gpu") {
        if let Ok(dir) = std::env::var("OPENCL_LIB_DIR") {
            println!("cargo:rustc-link-search=native={}", dir);
        }
        println!("cargo:rustc-link-lib=OpenCL");
    }
    println!("cargo:rerun-if-env-changed=OPENCL_LIB_DIR");
}

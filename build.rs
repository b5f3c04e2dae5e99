use std::env;

fn main() {
    // ONNX Runtime local opcional: MCEREBRO_ORT_DIR=onnxruntime-linux-x64-1.22.0
    println!("cargo:rerun-if-env-changed=MCEREBRO_ORT_DIR");

    if env::var_os("CARGO_FEATURE_ONNX").is_none() {
        return;
    }
    if let Ok(dir) = env::var("MCEREBRO_ORT_DIR") {
        println!("cargo:rustc-link-search=native={}/lib", dir);
        println!("cargo:rustc-link-lib=dylib=onnxruntime");
        println!("cargo:rerun-if-changed={}", dir);
    }
}

use std::env;

fn main() {
    println!("cargo:rerun-if-env-changed=ROCM_PATH");
    println!("cargo:rerun-if-env-changed=HIP_PATH");

    // Host-only builds (DummyRuntime) need nothing from ROCm
    if env::var_os("CARGO_FEATURE_ROCM").is_none() {
        return;
    }

    let rocm_root = env::var("ROCM_PATH")
        .or_else(|_| env::var("HIP_PATH"))
        .unwrap_or_else(|_| "/opt/rocm".to_string());

    println!("cargo:rustc-link-search=native={}/lib", rocm_root);
    println!("cargo:rustc-link-lib=dylib=amdhip64");

    if !std::path::Path::new(&rocm_root).join("lib").exists() {
        println!(
            "cargo:warning=ROCm libraries not found under {}/lib. Set ROCM_PATH if ROCm is installed elsewhere.",
            rocm_root
        );
    }
}

#[cfg(not(all(feature = "bpf", target_os = "linux")))]
fn main() {}

#[cfg(all(feature = "bpf", target_os = "linux"))]
fn main() {
    bpf::generate();
}

#[cfg(all(feature = "bpf", target_os = "linux"))]
mod bpf {
    use libbpf_cargo::SkeletonBuilder;
    use std::env;
    use std::path::PathBuf;

    const SRC: &str = "src/probe/bpf/mod.bpf.c";

    pub fn generate() {
        let out = PathBuf::from(env::var("OUT_DIR").unwrap()).join("f2fsdist.bpf.rs");

        SkeletonBuilder::new()
            .source(SRC)
            .build_and_generate(&out)
            .unwrap();

        println!("cargo:rerun-if-changed={SRC}");
    }
}

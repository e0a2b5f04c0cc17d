fn main() -> Result<(), Box<dyn std::error::Error>> {
    let out_dir = std::path::PathBuf::from(std::env::var("OUT_DIR")?);

    tonic_build::configure()
        .file_descriptor_set_path(out_dir.join("conduit_admin_descriptor.bin"))
        .compile(&["proto/admin.proto"], &["proto"])?;

    println!("cargo:rerun-if-changed=proto/admin.proto");
    Ok(())
}

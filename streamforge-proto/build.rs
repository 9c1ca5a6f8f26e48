fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    let proto_dir = "../proto";

    // Generate both server (worker side) and client (core side) code.
    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true)
        .type_attribute(".", "#[derive(serde::Serialize, serde::Deserialize)]")
        .compile_protos(
            &[format!("{proto_dir}/transcoder.proto")],
            &[proto_dir.to_string()],
        )?;

    println!("cargo:rerun-if-changed={proto_dir}/transcoder.proto");

    Ok(())
}

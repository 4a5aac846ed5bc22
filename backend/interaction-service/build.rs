fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_well_known_types(true)
        .extern_path(".google.protobuf", "::pbjson_types")
        .compile_protos(
            &["../proto/services_v2/interaction_service.proto"],
            &["../proto/services_v2"],
        )?;
    println!("cargo:rerun-if-changed=../proto/services_v2/interaction_service.proto");
    Ok(())
}

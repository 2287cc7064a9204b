//! Build script for mc-bot.
//!
//! Generates the tonic client for the management service that runs on the
//! game server instance.

use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use vendored protoc to avoid system dependency
    if std::env::var_os("PROTOC").is_none() {
        let protoc = protoc_bin_vendored::protoc_bin_path()?;
        // SAFETY: build scripts are single threaded; nothing else reads the
        // environment concurrently.
        unsafe {
            std::env::set_var("PROTOC", protoc);
        }
    }

    let proto_root = PathBuf::from("../../protos");
    let proto = proto_root.join("management/management.proto");

    tonic_prost_build::configure()
        .build_server(false) // We only need client code
        .build_client(true)
        .compile_protos(&[&proto], &[&proto_root])?;

    println!("cargo:rerun-if-changed={}", proto.display());

    Ok(())
}

//! Generates the `runtime.v1` messages and gRPC stubs from `proto/api.proto`.
//!
//! The proto is parsed with protox, so building does not need `protoc`.

use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    let proto_dir = "proto";
    let protos = ["proto/api.proto"];

    let descriptors = protox::compile(protos, [proto_dir])?;
    tonic_build::configure()
        .build_client(true)
        // The in-process fake runtime used by the client tests serves these.
        .build_server(true)
        .compile_fds(descriptors)?;

    for proto in &protos {
        println!("cargo:rerun-if-changed={proto}");
    }
    Ok(())
}

//! Streamforge protocol definitions
//!
//! Protobuf definitions and tonic-generated code for the transcoder worker
//! RPC contract. Workers are separate OS processes; the playback core talks
//! to them exclusively through the `Transcoder` service defined here.

pub mod transcoder {
    #![allow(clippy::all)]
    #![allow(warnings)]
    tonic::include_proto!("streamforge.transcoder");
}

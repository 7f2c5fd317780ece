//! The PCCC application layer: file types, command encoders and reply
//! decoding.

pub mod command;
pub mod file;
pub mod reply;

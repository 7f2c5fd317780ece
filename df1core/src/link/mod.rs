//! The link modules implement DF1 framing: control symbols, CRC-16, the
//! streaming receive buffer and the frame codec.

pub mod buffer;
pub mod frame;
pub mod symbol;

//! Decode-time model of a `.lclass` file: the constant pool, attributes
//! and the draft class produced by the version-1 decoder.

mod structs;

pub mod decoder;
pub mod writer;

pub use structs::*;

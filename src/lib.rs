//! Loader and native-call runtime for the `.lclass` binary class format.
//!
//! A `.lclass` file is a big-endian class image starting with the magic
//! `"HOTL"`. [`runtime::ClassRegistry::load_class`] finds the file on the
//! class path, decodes it, resolves named super classes recursively and
//! prepares every method body as directly callable machine code: call sites
//! described by `methodref` attributes are patched with either a direct
//! call to an already-loaded method or a trampoline that resolves the
//! target through the registry at call time.
//!
//! The runtime assumes x86-64 host code in method bodies and the Microsoft
//! x64 calling convention at every generated call site, on all platforms.
//! The registry performs no synchronization of guest code and is meant to
//! be driven from a single thread; loaded classes are memoized and never
//! evicted, so references handed out stay valid for the registry's
//! lifetime.

pub mod bytes;
pub mod class;
pub mod error;
pub mod flags;
pub mod runtime;

pub use bytes::ByteReader;
pub use error::ClassLoadError;
pub use flags::AccessFlags;
pub use runtime::{Class, ClassRegistry, Field, Method};

/// File magic, the string `"HOTL"`.
pub const LCLASS_MAGIC: u32 = 0x484F_544C;

/// The only class-file version this crate decodes.
pub const LCLASS_VERSION: u16 = 1;

/// Extension appended to a class name when searching the class path.
pub const LCLASS_EXTENSION: &str = "lclass";

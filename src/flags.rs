use std::fmt;

use bitflags::bitflags;

bitflags! {
    /// 16-bit access-flag set shared by classes, fields and methods.
    ///
    /// Several bit positions carry two meanings depending on the entity
    /// they are attached to (`SUPER` on a class is `SYNCHRONIZED` on a
    /// method, and so on). The raw bits are stored as-is; interpretation
    /// is left to the consumer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AccessFlags: u16 {
        const PUBLIC       = 0x0001;
        const PRIVATE      = 0x0002;
        const PROTECTED    = 0x0004;
        const STATIC       = 0x0008;
        const FINAL        = 0x0010;
        const SUPER        = 0x0020;
        const SYNCHRONIZED = 0x0020;
        const VOLATILE     = 0x0040;
        const BRIDGE       = 0x0040;
        const TRANSIENT    = 0x0080;
        const VARARGS      = 0x0080;
        const NATIVE       = 0x0100;
        const INTERFACE    = 0x0200;
        const ABSTRACT     = 0x0400;
        const STRICT       = 0x0800;
        const SYNTHETIC    = 0x1000;
        const ANNOTATION   = 0x2000;
        const ENUM         = 0x4000;
        const MODULE       = 0x8000;
    }
}

impl AccessFlags {
    pub fn as_u16(self) -> u16 {
        self.bits()
    }
}

impl From<u16> for AccessFlags {
    fn from(bits: u16) -> Self {
        // extra bits allowed, kept verbatim
        AccessFlags::from_bits_retain(bits)
    }
}

// Fixed rendering order; aliased positions print both names.
const FLAG_NAMES: &[(AccessFlags, &str)] = &[
    (AccessFlags::PUBLIC, "Public"),
    (AccessFlags::PRIVATE, "Private"),
    (AccessFlags::PROTECTED, "Protected"),
    (AccessFlags::STATIC, "Static"),
    (AccessFlags::FINAL, "Final"),
    (AccessFlags::SUPER, "Super(Synchronized)"),
    (AccessFlags::VOLATILE, "Volatile(Bridge)"),
    (AccessFlags::TRANSIENT, "Transient(Varargs)"),
    (AccessFlags::NATIVE, "Native"),
    (AccessFlags::INTERFACE, "Interface"),
    (AccessFlags::ABSTRACT, "Abstract"),
    (AccessFlags::STRICT, "Strict"),
    (AccessFlags::SYNTHETIC, "Synthetic"),
    (AccessFlags::ANNOTATION, "Annotation"),
    (AccessFlags::ENUM, "Enum"),
    (AccessFlags::MODULE, "Module"),
];

impl fmt::Display for AccessFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut printed = false;
        for (flag, name) in FLAG_NAMES {
            if self.contains(*flag) {
                if printed {
                    write!(f, " | ")?;
                }
                write!(f, "{name}")?;
                printed = true;
            }
        }
        Ok(())
    }
}

//! Version-1 `.lclass` encoder.
//!
//! Re-serializes a [`ClassFile`] draft with a canonical constant pool:
//! entries appear in first-use order, every string is interned once, and
//! attributes are written in model order with `code` before `methodref`.
//! Decoding the output yields a structurally equal draft.

use std::collections::HashMap;
use std::io;

use byteorder::{BigEndian, WriteBytesExt};

use crate::class::{
    Attribute, ClassFile, ConstantPoolEntry, FieldEntry, MethodEntry, CONSTANT_CLASS_TAG,
    CONSTANT_UTF8_TAG,
};
use crate::{LCLASS_MAGIC, LCLASS_VERSION};

/// Serializes a whole `.lclass` file, magic and version included.
pub fn encode<W: WriteBytesExt>(class: &ClassFile, writer: &mut W) -> io::Result<()> {
    let pool = PoolBuilder::build(class);

    writer.write_u32::<BigEndian>(LCLASS_MAGIC)?;
    writer.write_u16::<BigEndian>(LCLASS_VERSION)?;

    writer.write_u16::<BigEndian>(pool.entries.len() as u16 + 1)?;
    for entry in &pool.entries {
        match entry {
            ConstantPoolEntry::ClassRef { name_index } => {
                writer.write_u8(CONSTANT_CLASS_TAG)?;
                writer.write_u16::<BigEndian>(*name_index)?;
            }
            ConstantPoolEntry::Utf8(string) => {
                writer.write_u8(CONSTANT_UTF8_TAG)?;
                writer.write_u32::<BigEndian>(string.len() as u32)?;
                writer.write_all(string.as_bytes())?;
            }
        }
    }

    writer.write_u16::<BigEndian>(class.access_flags.as_u16())?;
    writer.write_u16::<BigEndian>(pool.class_ref(&class.name))?;

    writer.write_u16::<BigEndian>(class.supers.len() as u16)?;
    for super_name in &class.supers {
        writer.write_u16::<BigEndian>(pool.class_ref(super_name))?;
    }

    writer.write_u16::<BigEndian>(class.fields.len() as u16)?;
    for field in &class.fields {
        write_field(field, &pool, writer)?;
    }

    writer.write_u16::<BigEndian>(class.methods.len() as u16)?;
    for method in &class.methods {
        write_method(method, &pool, writer)?;
    }

    writer.write_u16::<BigEndian>(class.attributes.len() as u16)?;
    for attribute in &class.attributes {
        write_attribute(attribute, &pool, writer)?;
    }

    Ok(())
}

pub fn encode_to_vec(class: &ClassFile) -> Vec<u8> {
    let mut bytes = Vec::new();
    encode(class, &mut bytes).expect("writing to a vector does not fail");
    bytes
}

fn write_field<W: WriteBytesExt>(
    field: &FieldEntry,
    pool: &PoolBuilder,
    writer: &mut W,
) -> io::Result<()> {
    writer.write_u16::<BigEndian>(field.access_flags.as_u16())?;
    writer.write_u16::<BigEndian>(pool.utf8(&field.name))?;
    writer.write_u16::<BigEndian>(pool.utf8(&field.descriptor))?;
    writer.write_u16::<BigEndian>(field.attributes.len() as u16)?;
    for attribute in &field.attributes {
        write_attribute(attribute, pool, writer)?;
    }
    Ok(())
}

fn write_method<W: WriteBytesExt>(
    method: &MethodEntry,
    pool: &PoolBuilder,
    writer: &mut W,
) -> io::Result<()> {
    writer.write_u16::<BigEndian>(method.access_flags.as_u16())?;
    writer.write_u16::<BigEndian>(pool.utf8(&method.name))?;
    writer.write_u16::<BigEndian>(pool.utf8(&method.descriptor))?;

    let mut attribute_count = method.method_refs.len() + method.attributes.len();
    if !method.code.is_empty() {
        attribute_count += 1;
    }
    writer.write_u16::<BigEndian>(attribute_count as u16)?;

    if !method.code.is_empty() {
        writer.write_u16::<BigEndian>(pool.utf8("code"))?;
        writer.write_u32::<BigEndian>(method.code.len() as u32)?;
        writer.write_all(&method.code)?;
    }
    for method_ref in &method.method_refs {
        writer.write_u16::<BigEndian>(pool.utf8("methodref"))?;
        writer.write_u32::<BigEndian>(8)?;
        writer.write_u16::<BigEndian>(pool.utf8(&method_ref.class_name))?;
        writer.write_u16::<BigEndian>(pool.utf8(&method_ref.method_descriptor))?;
        writer.write_u32::<BigEndian>(method_ref.byte_offset)?;
    }
    for attribute in &method.attributes {
        write_attribute(attribute, pool, writer)?;
    }
    Ok(())
}

fn write_attribute<W: WriteBytesExt>(
    attribute: &Attribute,
    pool: &PoolBuilder,
    writer: &mut W,
) -> io::Result<()> {
    writer.write_u16::<BigEndian>(pool.utf8(&attribute.name))?;
    writer.write_u32::<BigEndian>(attribute.info.len() as u32)?;
    writer.write_all(&attribute.info)
}

/// Interned constant pool in first-use order.
struct PoolBuilder {
    entries: Vec<ConstantPoolEntry>,
    utf8_indices: HashMap<String, u16>,
    class_indices: HashMap<String, u16>,
}

impl PoolBuilder {
    fn build(class: &ClassFile) -> Self {
        let mut pool = PoolBuilder {
            entries: Vec::new(),
            utf8_indices: HashMap::new(),
            class_indices: HashMap::new(),
        };

        pool.intern_class_ref(&class.name);
        for super_name in &class.supers {
            pool.intern_class_ref(super_name);
        }
        for field in &class.fields {
            pool.intern_utf8(&field.name);
            pool.intern_utf8(&field.descriptor);
            for attribute in &field.attributes {
                pool.intern_utf8(&attribute.name);
            }
        }
        for method in &class.methods {
            pool.intern_utf8(&method.name);
            pool.intern_utf8(&method.descriptor);
            if !method.code.is_empty() {
                pool.intern_utf8("code");
            }
            for method_ref in &method.method_refs {
                pool.intern_utf8("methodref");
                pool.intern_utf8(&method_ref.class_name);
                pool.intern_utf8(&method_ref.method_descriptor);
            }
            for attribute in &method.attributes {
                pool.intern_utf8(&attribute.name);
            }
        }
        for attribute in &class.attributes {
            pool.intern_utf8(&attribute.name);
        }

        pool
    }

    fn intern_utf8(&mut self, string: &str) -> u16 {
        if let Some(&index) = self.utf8_indices.get(string) {
            return index;
        }
        self.entries
            .push(ConstantPoolEntry::Utf8(string.to_string()));
        let index = self.next_index();
        self.utf8_indices.insert(string.to_string(), index);
        index
    }

    fn intern_class_ref(&mut self, name: &str) -> u16 {
        if let Some(&index) = self.class_indices.get(name) {
            return index;
        }
        let name_index = self.intern_utf8(name);
        self.entries.push(ConstantPoolEntry::ClassRef { name_index });
        let index = self.next_index();
        self.class_indices.insert(name.to_string(), index);
        index
    }

    fn next_index(&self) -> u16 {
        assert!(self.entries.len() <= u16::MAX as usize - 1, "constant pool overflow");
        self.entries.len() as u16
    }

    fn utf8(&self, string: &str) -> u16 {
        self.utf8_indices[string]
    }

    fn class_ref(&self, name: &str) -> u16 {
        self.class_indices[name]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{decoder::decode_v1, FieldEntry, MethodEntry, MethodRef};
    use crate::bytes::ByteReader;
    use crate::flags::AccessFlags;

    fn round_trip(class: &ClassFile) -> ClassFile {
        let bytes = encode_to_vec(class);
        let mut reader = ByteReader::new(bytes);
        assert_eq!(reader.read_u32(), LCLASS_MAGIC);
        assert_eq!(reader.read_u16(), LCLASS_VERSION);
        decode_v1(&mut reader).unwrap()
    }

    #[test]
    fn empty_class_round_trips() {
        let class = ClassFile {
            name: "A".to_string(),
            access_flags: AccessFlags::PUBLIC,
            supers: vec![],
            fields: vec![],
            methods: vec![],
            attributes: vec![],
        };
        assert_eq!(round_trip(&class), class);
    }

    #[test]
    fn full_class_round_trips() {
        let class = ClassFile {
            name: "Test".to_string(),
            access_flags: AccessFlags::PUBLIC | AccessFlags::FINAL,
            supers: vec!["Base".to_string(), "Mixin".to_string()],
            fields: vec![FieldEntry {
                access_flags: AccessFlags::PUBLIC | AccessFlags::STATIC,
                name: "f".to_string(),
                descriptor: "I".to_string(),
                attributes: vec![Attribute {
                    name: "notes".to_string(),
                    info: vec![1, 2, 3],
                }],
            }],
            methods: vec![MethodEntry {
                access_flags: AccessFlags::PUBLIC,
                name: "m".to_string(),
                descriptor: "P".to_string(),
                code: vec![0x90, 0x00, 0xC3],
                method_refs: vec![MethodRef {
                    class_name: "Base".to_string(),
                    method_descriptor: "L".to_string(),
                    byte_offset: 1,
                }],
                attributes: vec![],
            }],
            attributes: vec![Attribute {
                name: "source".to_string(),
                info: b"Test.lava".to_vec(),
            }],
        };
        assert_eq!(round_trip(&class), class);
    }

    #[test]
    fn strings_are_interned_once() {
        // the same name used as a method descriptor and a ref target must
        // not duplicate pool entries
        let class = ClassFile {
            name: "A".to_string(),
            access_flags: AccessFlags::PUBLIC,
            supers: vec!["A".to_string()],
            fields: vec![],
            methods: vec![],
            attributes: vec![],
        };
        let bytes = encode_to_vec(&class);
        let mut reader = ByteReader::new(bytes);
        reader.read_u32();
        reader.read_u16();
        // one utf8 "A" and one class ref, logical pool size 2
        assert_eq!(reader.read_u16(), 3);
    }
}

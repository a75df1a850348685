//! Version-1 `.lclass` body decoder.
//!
//! The reader is positioned immediately after the 4-byte magic and the
//! 2-byte version. All structure is validated eagerly against the constant
//! pool; the first bad record short-circuits with its specific
//! [`ClassLoadError`] kind.

use crate::bytes::ByteReader;
use crate::class::{
    Attribute, ClassFile, ConstantPool, ConstantPoolEntry, FieldEntry, MethodEntry, MethodRef,
    CONSTANT_CLASS_TAG, CONSTANT_UTF8_TAG,
};
use crate::error::ClassLoadError;
use crate::flags::AccessFlags;

pub fn decode_v1(reader: &mut ByteReader) -> Result<ClassFile, ClassLoadError> {
    let pool = decode_constant_pool(reader)?;
    if !pool.validate() {
        return Err(ClassLoadError::InvalidConstantPool);
    }

    let access_flags = AccessFlags::from(reader.read_u16());

    let this_class = reader.read_u16();
    let Some(name) = pool.class_name(this_class) else {
        return Err(ClassLoadError::InvalidThisClassEntry);
    };
    let name = name.to_string();

    let super_count = reader.read_u16();
    let super_indices = reader.read_u16s(super_count as usize);
    let mut supers = Vec::with_capacity(super_indices.len());
    for index in &super_indices {
        let Some(super_name) = pool.class_name(*index) else {
            return Err(ClassLoadError::InvalidSuperClassEntry);
        };
        supers.push(super_name.to_string());
    }

    let field_count = reader.read_u16();
    let mut fields = Vec::with_capacity(field_count as usize);
    for _ in 0..field_count {
        fields.push(decode_field(reader, &pool)?);
    }

    let method_count = reader.read_u16();
    let mut methods = Vec::with_capacity(method_count as usize);
    for _ in 0..method_count {
        methods.push(decode_method(reader, &pool)?);
    }

    let attribute_count = reader.read_u16();
    let mut attributes = Vec::new();
    for _ in 0..attribute_count {
        // class-level code/methodref shapes carry no meaning; only opaque
        // attributes are kept here
        if let ParsedAttribute::Other(attribute) = decode_attribute(reader, &pool)? {
            attributes.push(attribute);
        }
    }

    Ok(ClassFile {
        name,
        access_flags,
        supers,
        fields,
        methods,
        attributes,
    })
}

fn decode_constant_pool(reader: &mut ByteReader) -> Result<ConstantPool, ClassLoadError> {
    // the declared count is one past the logical size; 0 and 1 both mean
    // an empty pool
    let count = reader.read_u16();
    let logical = (count as usize).saturating_sub(1);

    let mut pool = ConstantPool::with_capacity(logical);
    for _ in 0..logical {
        pool.push(decode_constant(reader)?);
    }
    Ok(pool)
}

fn decode_constant(reader: &mut ByteReader) -> Result<ConstantPoolEntry, ClassLoadError> {
    let tag = reader.read_u8();
    match tag {
        CONSTANT_CLASS_TAG => Ok(ConstantPoolEntry::ClassRef {
            name_index: reader.read_u16(),
        }),
        CONSTANT_UTF8_TAG => {
            let length = reader.read_u32();
            let bytes = reader.read_bytes(length as usize);
            Ok(ConstantPoolEntry::Utf8(
                String::from_utf8_lossy(bytes).into_owned(),
            ))
        }
        _ => Err(ClassLoadError::InvalidConstantPoolEntry),
    }
}

fn decode_field(reader: &mut ByteReader, pool: &ConstantPool) -> Result<FieldEntry, ClassLoadError> {
    let access_flags = AccessFlags::from(reader.read_u16());

    let Some(name) = pool.utf8(reader.read_u16()) else {
        return Err(ClassLoadError::InvalidFieldName);
    };
    let name = name.to_string();

    let Some(descriptor) = pool.utf8(reader.read_u16()) else {
        return Err(ClassLoadError::InvalidFieldDescriptor);
    };
    let descriptor = descriptor.to_string();

    let attribute_count = reader.read_u16();
    let mut attributes = Vec::new();
    for _ in 0..attribute_count {
        // fields have no executable code; code/methodref shapes are read
        // for stream consistency and dropped
        if let ParsedAttribute::Other(attribute) = decode_attribute(reader, pool)? {
            attributes.push(attribute);
        }
    }

    Ok(FieldEntry {
        access_flags,
        name,
        descriptor,
        attributes,
    })
}

fn decode_method(
    reader: &mut ByteReader,
    pool: &ConstantPool,
) -> Result<MethodEntry, ClassLoadError> {
    let access_flags = AccessFlags::from(reader.read_u16());

    let Some(name) = pool.utf8(reader.read_u16()) else {
        return Err(ClassLoadError::InvalidMethodName);
    };
    let name = name.to_string();

    let Some(descriptor) = pool.utf8(reader.read_u16()) else {
        return Err(ClassLoadError::InvalidMethodDescriptor);
    };
    let descriptor = descriptor.to_string();

    let attribute_count = reader.read_u16();
    let mut code: Option<Vec<u8>> = None;
    let mut method_refs = Vec::new();
    let mut attributes = Vec::new();
    for _ in 0..attribute_count {
        match decode_attribute(reader, pool)? {
            ParsedAttribute::Code(bytes) => {
                if code.is_some() {
                    // at most one code attribute per method
                    return Err(ClassLoadError::InvalidAttributeName);
                }
                code = Some(bytes);
            }
            ParsedAttribute::MethodRef {
                class_name_index,
                method_descriptor_index,
                byte_offset,
            } => {
                let Some(class_name) = pool.utf8(class_name_index) else {
                    return Err(ClassLoadError::InvalidMethodRefClassName);
                };
                let Some(method_descriptor) = pool.utf8(method_descriptor_index) else {
                    return Err(ClassLoadError::InvalidMethodRefMethodDescriptor);
                };
                method_refs.push(MethodRef {
                    class_name: class_name.to_string(),
                    method_descriptor: method_descriptor.to_string(),
                    byte_offset,
                });
            }
            ParsedAttribute::Other(attribute) => attributes.push(attribute),
        }
    }

    Ok(MethodEntry {
        access_flags,
        name,
        descriptor,
        code: code.unwrap_or_default(),
        method_refs,
        attributes,
    })
}

enum ParsedAttribute {
    Code(Vec<u8>),
    MethodRef {
        class_name_index: u16,
        method_descriptor_index: u16,
        byte_offset: u32,
    },
    Other(Attribute),
}

fn decode_attribute(
    reader: &mut ByteReader,
    pool: &ConstantPool,
) -> Result<ParsedAttribute, ClassLoadError> {
    let Some(name) = pool.utf8(reader.read_u16()) else {
        return Err(ClassLoadError::InvalidAttributeName);
    };
    let length = reader.read_u32();

    match name {
        "code" => Ok(ParsedAttribute::Code(reader.read_u8s(length as usize))),
        "methodref" => {
            // the payload is nominally 8 bytes; a short payload zero-pads
            // into index 0, which fails resolution at the caller
            let mut info = ByteReader::new(reader.read_u8s(length as usize));
            Ok(ParsedAttribute::MethodRef {
                class_name_index: info.read_u16(),
                method_descriptor_index: info.read_u16(),
                byte_offset: info.read_u32(),
            })
        }
        _ => Ok(ParsedAttribute::Other(Attribute {
            name: name.to_string(),
            info: reader.read_u8s(length as usize),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Body(Vec<u8>);

    impl Body {
        fn new() -> Self {
            Body(Vec::new())
        }
        fn u8(mut self, v: u8) -> Self {
            self.0.push(v);
            self
        }
        fn u16(mut self, v: u16) -> Self {
            self.0.extend_from_slice(&v.to_be_bytes());
            self
        }
        fn u32(mut self, v: u32) -> Self {
            self.0.extend_from_slice(&v.to_be_bytes());
            self
        }
        fn utf8(self, s: &str) -> Self {
            let with_len = self.u8(2).u32(s.len() as u32);
            Body([with_len.0, s.as_bytes().to_vec()].concat())
        }
        fn class_ref(self, name_index: u16) -> Self {
            self.u8(1).u16(name_index)
        }
        fn decode(self) -> Result<ClassFile, ClassLoadError> {
            decode_v1(&mut ByteReader::new(self.0))
        }
    }

    #[test]
    fn empty_pool_has_no_this_class() {
        let err = Body::new()
            .u16(1) // pool count, logical size zero
            .u16(0x0001)
            .u16(0) // this_class
            .decode()
            .unwrap_err();
        assert_eq!(err, ClassLoadError::InvalidThisClassEntry);
    }

    #[test]
    fn minimal_class_decodes() {
        let class = Body::new()
            .u16(3)
            .utf8("A")
            .class_ref(1)
            .u16(0x0001)
            .u16(2) // this_class
            .u16(0) // supers
            .u16(0) // fields
            .u16(0) // methods
            .u16(0) // attributes
            .decode()
            .unwrap();
        assert_eq!(class.name, "A");
        assert_eq!(class.access_flags, AccessFlags::PUBLIC);
        assert!(class.supers.is_empty());
        assert!(class.fields.is_empty());
        assert!(class.methods.is_empty());
        assert!(class.attributes.is_empty());
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let err = Body::new().u16(2).u8(3).decode().unwrap_err();
        assert_eq!(err, ClassLoadError::InvalidConstantPoolEntry);
    }

    #[test]
    fn dangling_class_ref_fails_pool_validation() {
        let err = Body::new()
            .u16(2)
            .class_ref(5)
            .decode()
            .unwrap_err();
        assert_eq!(err, ClassLoadError::InvalidConstantPool);
    }

    #[test]
    fn this_class_must_be_a_class_ref() {
        let err = Body::new()
            .u16(2)
            .utf8("A")
            .u16(0x0001)
            .u16(1) // points at the utf8 entry, not a class ref
            .decode()
            .unwrap_err();
        assert_eq!(err, ClassLoadError::InvalidThisClassEntry);
    }

    #[test]
    fn super_entries_must_be_class_refs() {
        let err = Body::new()
            .u16(3)
            .utf8("A")
            .class_ref(1)
            .u16(0x0001)
            .u16(2)
            .u16(1) // one super
            .u16(1) // utf8, not a class ref
            .decode()
            .unwrap_err();
        assert_eq!(err, ClassLoadError::InvalidSuperClassEntry);
    }

    #[test]
    fn field_cross_references_are_checked() {
        let base = |descriptor_index: u16| {
            Body::new()
                .u16(4)
                .utf8("A")
                .class_ref(1)
                .utf8("f")
                .u16(0x0001)
                .u16(2)
                .u16(0)
                .u16(1) // one field
                .u16(0x0001)
                .u16(3) // name "f"
                .u16(descriptor_index)
                .u16(0) // field attributes
                .u16(0) // methods
                .u16(0) // class attributes
        };
        assert_eq!(
            base(2).decode().unwrap_err(),
            ClassLoadError::InvalidFieldDescriptor
        );
        let class = base(3).decode().unwrap();
        assert_eq!(class.fields[0].name, "f");
        assert_eq!(class.fields[0].descriptor, "f");
    }

    #[test]
    fn method_code_and_refs_are_lifted() {
        let class = Body::new()
            .u16(7)
            .utf8("A")
            .class_ref(1)
            .utf8("m")
            .utf8("code")
            .utf8("methodref")
            .utf8("B")
            .u16(0x0001)
            .u16(2)
            .u16(0)
            .u16(0)
            .u16(1) // one method
            .u16(0x0001)
            .u16(3) // name
            .u16(3) // descriptor
            .u16(2) // two attributes
            .u16(4) // "code"
            .u32(3)
            .u8(0x90)
            .u8(0x00)
            .u8(0xC3)
            .u16(5) // "methodref"
            .u32(8)
            .u16(6) // class name "B"
            .u16(3) // descriptor "m"
            .u32(1) // byte offset
            .u16(0)
            .decode()
            .unwrap();

        let method = &class.methods[0];
        assert_eq!(method.code, vec![0x90, 0x00, 0xC3]);
        assert_eq!(
            method.method_refs,
            vec![MethodRef {
                class_name: "B".to_string(),
                method_descriptor: "m".to_string(),
                byte_offset: 1,
            }]
        );
        assert!(method.attributes.is_empty());
    }

    #[test]
    fn second_code_attribute_is_rejected() {
        let err = Body::new()
            .u16(5)
            .utf8("A")
            .class_ref(1)
            .utf8("m")
            .utf8("code")
            .u16(0x0001)
            .u16(2)
            .u16(0)
            .u16(0)
            .u16(1)
            .u16(0x0001)
            .u16(3)
            .u16(3)
            .u16(2) // two code attributes
            .u16(4)
            .u32(1)
            .u8(0xC3)
            .u16(4)
            .u32(1)
            .u8(0xC3)
            .u16(0)
            .decode()
            .unwrap_err();
        assert_eq!(err, ClassLoadError::InvalidAttributeName);
    }

    #[test]
    fn short_methodref_payload_fails_resolution() {
        let err = Body::new()
            .u16(5)
            .utf8("A")
            .class_ref(1)
            .utf8("m")
            .utf8("methodref")
            .u16(0x0001)
            .u16(2)
            .u16(0)
            .u16(0)
            .u16(1)
            .u16(0x0001)
            .u16(3)
            .u16(3)
            .u16(1)
            .u16(4) // "methodref"
            .u32(1) // truncated payload: indices read as zero
            .u8(0x00)
            .u16(0)
            .decode()
            .unwrap_err();
        assert_eq!(err, ClassLoadError::InvalidMethodRefClassName);
    }

    #[test]
    fn unknown_attributes_are_preserved() {
        let class = Body::new()
            .u16(5)
            .utf8("A")
            .class_ref(1)
            .utf8("m")
            .utf8("notes")
            .u16(0x0001)
            .u16(2)
            .u16(0)
            .u16(0)
            .u16(1)
            .u16(0x0001)
            .u16(3)
            .u16(3)
            .u16(1)
            .u16(4) // "notes"
            .u32(2)
            .u8(0xAA)
            .u8(0xBB)
            .u16(0)
            .decode()
            .unwrap();
        assert_eq!(
            class.methods[0].attributes,
            vec![Attribute {
                name: "notes".to_string(),
                info: vec![0xAA, 0xBB],
            }]
        );
    }
}

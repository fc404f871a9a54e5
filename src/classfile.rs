//! Minimal JVM class-file reader.
//!
//! Only what the annotation index needs is decoded: the class header,
//! interfaces, field and method names/types, and the runtime (in)visible
//! annotation attributes on the class and its members. Every other attribute
//! is skipped by length.

use crate::index::{
    AnnotationInstance, AnnotationValue, ClassFlags, ClassInfo, FieldInfo, MethodInfo,
};

const MAGIC: u32 = 0xCAFE_BABE;
const ACC_INTERFACE: u16 = 0x0200;
const ACC_ABSTRACT: u16 = 0x0400;
const ACC_ANNOTATION: u16 = 0x2000;

const RUNTIME_VISIBLE: &str = "RuntimeVisibleAnnotations";
const RUNTIME_INVISIBLE: &str = "RuntimeInvisibleAnnotations";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ClassFileError {
    #[error("not a class file (magic {0:#010x})")]
    BadMagic(u32),
    #[error("class file truncated at offset {0}")]
    Truncated(usize),
    #[error("invalid constant pool reference #{0}")]
    BadConstant(u16),
    #[error("unknown constant pool tag {0}")]
    UnknownTag(u8),
    #[error("invalid element value tag {0:#04x}")]
    BadElementTag(u8),
    #[error("annotation values nested deeper than {MAX_VALUE_DEPTH}")]
    TooDeep,
}

/// Nesting bound for annotation element values.
pub const MAX_VALUE_DEPTH: usize = 64;

type Result<T> = std::result::Result<T, ClassFileError>;

enum Constant {
    Utf8(String),
    Class(u16),
    Other,
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or(ClassFileError::Truncated(self.pos))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u1(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u2(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u4(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

struct ConstantPool {
    entries: Vec<Constant>,
}

impl ConstantPool {
    fn read(r: &mut Reader<'_>) -> Result<Self> {
        let count = r.u2()? as usize;
        let mut entries = Vec::with_capacity(count);
        entries.push(Constant::Other);
        while entries.len() < count {
            let tag = r.u1()?;
            match tag {
                1 => {
                    let len = r.u2()? as usize;
                    let bytes = r.take(len)?;
                    entries.push(Constant::Utf8(String::from_utf8_lossy(bytes).into_owned()));
                }
                7 => entries.push(Constant::Class(r.u2()?)),
                3 | 4 | 9 | 10 | 11 | 12 | 17 | 18 => {
                    r.take(4)?;
                    entries.push(Constant::Other);
                }
                5 | 6 => {
                    // long and double occupy two slots
                    r.take(8)?;
                    entries.push(Constant::Other);
                    entries.push(Constant::Other);
                }
                8 | 16 | 19 | 20 => {
                    r.take(2)?;
                    entries.push(Constant::Other);
                }
                15 => {
                    r.take(3)?;
                    entries.push(Constant::Other);
                }
                other => return Err(ClassFileError::UnknownTag(other)),
            }
        }
        Ok(Self { entries })
    }

    fn utf8(&self, index: u16) -> Result<&str> {
        match self.entries.get(index as usize) {
            Some(Constant::Utf8(s)) => Ok(s),
            _ => Err(ClassFileError::BadConstant(index)),
        }
    }

    fn class_name(&self, index: u16) -> Result<String> {
        match self.entries.get(index as usize) {
            Some(Constant::Class(name_index)) => Ok(internal_to_name(self.utf8(*name_index)?)),
            _ => Err(ClassFileError::BadConstant(index)),
        }
    }
}

pub fn read_class(bytes: &[u8]) -> Result<ClassInfo> {
    let mut r = Reader::new(bytes);
    let magic = r.u4()?;
    if magic != MAGIC {
        return Err(ClassFileError::BadMagic(magic));
    }
    let _minor = r.u2()?;
    let _major = r.u2()?;
    let pool = ConstantPool::read(&mut r)?;

    let access = r.u2()?;
    let name = pool.class_name(r.u2()?)?;
    let super_index = r.u2()?;
    let superclass = if super_index == 0 {
        None
    } else {
        Some(pool.class_name(super_index)?)
    };

    let interface_count = r.u2()?;
    let mut interfaces = Vec::with_capacity(interface_count as usize);
    for _ in 0..interface_count {
        interfaces.push(pool.class_name(r.u2()?)?);
    }

    let field_count = r.u2()?;
    let mut fields = Vec::with_capacity(field_count as usize);
    for _ in 0..field_count {
        let _access = r.u2()?;
        let field_name = pool.utf8(r.u2()?)?.to_string();
        let descriptor = pool.utf8(r.u2()?)?;
        let type_name = descriptor_to_type(descriptor);
        let annotations = read_attributes(&mut r, &pool)?;
        fields.push(FieldInfo {
            name: field_name,
            type_name,
            annotations,
        });
    }

    let method_count = r.u2()?;
    let mut methods = Vec::with_capacity(method_count as usize);
    for _ in 0..method_count {
        let _access = r.u2()?;
        let method_name = pool.utf8(r.u2()?)?.to_string();
        let descriptor = pool.utf8(r.u2()?)?;
        let return_type = descriptor
            .rsplit_once(')')
            .map(|(_, ret)| descriptor_to_type(ret))
            .unwrap_or_else(|| descriptor_to_type(descriptor));
        let annotations = read_attributes(&mut r, &pool)?;
        methods.push(MethodInfo {
            name: method_name,
            return_type,
            annotations,
        });
    }

    let annotations = read_attributes(&mut r, &pool)?;

    Ok(ClassInfo {
        name,
        superclass,
        interfaces,
        flags: ClassFlags {
            interface: access & ACC_INTERFACE != 0,
            annotation: access & ACC_ANNOTATION != 0,
            abstract_: access & ACC_ABSTRACT != 0,
        },
        annotations,
        fields,
        methods,
    })
}

fn read_attributes(r: &mut Reader<'_>, pool: &ConstantPool) -> Result<Vec<AnnotationInstance>> {
    let count = r.u2()?;
    let mut annotations = Vec::new();
    for _ in 0..count {
        let name = pool.utf8(r.u2()?)?;
        let length = r.u4()? as usize;
        if name == RUNTIME_VISIBLE || name == RUNTIME_INVISIBLE {
            let body = r.take(length)?;
            let mut inner = Reader::new(body);
            let num = inner.u2()?;
            for _ in 0..num {
                annotations.push(read_annotation(&mut inner, pool, 0)?);
            }
        } else {
            r.take(length)?;
        }
    }
    Ok(annotations)
}

fn read_annotation(
    r: &mut Reader<'_>,
    pool: &ConstantPool,
    depth: usize,
) -> Result<AnnotationInstance> {
    if depth > MAX_VALUE_DEPTH {
        return Err(ClassFileError::TooDeep);
    }
    let name = descriptor_to_type(pool.utf8(r.u2()?)?);
    let pairs = r.u2()?;
    let mut values = Vec::with_capacity(pairs as usize);
    for _ in 0..pairs {
        let key = pool.utf8(r.u2()?)?.to_string();
        values.push((key, read_element_value(r, pool, depth + 1)?));
    }
    Ok(AnnotationInstance { name, values })
}

fn read_element_value(
    r: &mut Reader<'_>,
    pool: &ConstantPool,
    depth: usize,
) -> Result<AnnotationValue> {
    if depth > MAX_VALUE_DEPTH {
        return Err(ClassFileError::TooDeep);
    }
    let tag = r.u1()?;
    let value = match tag {
        b's' => AnnotationValue::Constant(pool.utf8(r.u2()?)?.to_string()),
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' => {
            AnnotationValue::Constant(format!("#{}", r.u2()?))
        }
        b'e' => {
            let type_name = descriptor_to_type(pool.utf8(r.u2()?)?);
            let constant = pool.utf8(r.u2()?)?.to_string();
            AnnotationValue::Enum {
                type_name,
                constant,
            }
        }
        b'c' => AnnotationValue::Class(descriptor_to_type(pool.utf8(r.u2()?)?)),
        b'@' => AnnotationValue::Annotation(read_annotation(r, pool, depth + 1)?),
        b'[' => {
            let count = r.u2()?;
            let mut items = Vec::with_capacity(count as usize);
            for _ in 0..count {
                items.push(read_element_value(r, pool, depth + 1)?);
            }
            AnnotationValue::Array(items)
        }
        other => return Err(ClassFileError::BadElementTag(other)),
    };
    Ok(value)
}

/// `org/example/Foo` -> `org.example.Foo`
pub fn internal_to_name(internal: &str) -> String {
    internal.replace('/', ".")
}

/// Field descriptor to a source-level type name: `Lorg/example/Foo;` ->
/// `org.example.Foo`, `I` -> `int`, `[J` -> `long[]`.
pub fn descriptor_to_type(descriptor: &str) -> String {
    let dims = descriptor.chars().take_while(|c| *c == '[').count();
    let base = &descriptor[dims..];
    let mut name = match base {
        "B" => "byte".to_string(),
        "C" => "char".to_string(),
        "D" => "double".to_string(),
        "F" => "float".to_string(),
        "I" => "int".to_string(),
        "J" => "long".to_string(),
        "S" => "short".to_string(),
        "Z" => "boolean".to_string(),
        "V" => "void".to_string(),
        _ => internal_to_name(
            base.strip_prefix('L')
                .and_then(|b| b.strip_suffix(';'))
                .unwrap_or(base),
        ),
    };
    for _ in 0..dims {
        name.push_str("[]");
    }
    name
}

//! Schema registry: classes, typed fields, send permissions.
//!
//! The real deployment loads a DC file; that loader is out of scope here.
//! This registry is built from configuration and provides exactly the
//! interface the agent needs: class lookup by id or name, field lookup by
//! index, the `clsend`/`ownsend` permission bits, a streaming payload
//! validator, and a stable 32-bit hash that stands in for the DC hash in
//! the handshake.

use doorman_proto::{DatagramView, ProtocolError};
use thiserror::Error;

/// Errors raised while building a [`SchemaRegistry`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// Two classes share a name.
    #[error("duplicate class name: {0}")]
    DuplicateClass(String),

    /// More classes than a u16 class id can address.
    #[error("too many classes: {0} exceeds the u16 id space")]
    TooManyClasses(usize),

    /// More fields in one class than a u16 field id can address.
    #[error("class {class} has too many fields: {count}")]
    TooManyFields {
        /// Offending class name.
        class: String,
        /// Number of declared fields.
        count: usize,
    },
}

/// Atomic wire types a field payload is composed of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// Unsigned 8-bit integer.
    Uint8,
    /// Unsigned 16-bit integer.
    Uint16,
    /// Unsigned 32-bit integer.
    Uint32,
    /// Unsigned 64-bit integer.
    Uint64,
    /// Signed 8-bit integer.
    Int8,
    /// Signed 16-bit integer.
    Int16,
    /// Signed 32-bit integer.
    Int32,
    /// Signed 64-bit integer.
    Int64,
    /// IEEE-754 double.
    Float64,
    /// Length-prefixed UTF-8 string.
    String,
    /// Length-prefixed byte blob.
    Blob,
}

impl FieldType {
    /// Validate one value of this type at the cursor, advancing past it.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Truncated` if the datagram runs out mid-value.
    /// - `ProtocolError::InvalidString` for malformed string fields.
    pub fn consume(self, view: &mut DatagramView) -> Result<(), ProtocolError> {
        match self {
            Self::Uint8 | Self::Int8 => view.skip(1),
            Self::Uint16 | Self::Int16 => view.skip(2),
            Self::Uint32 | Self::Int32 => view.skip(4),
            Self::Uint64 | Self::Int64 | Self::Float64 => view.skip(8),
            Self::String => view.read_string().map(|_| ()),
            Self::Blob => view.read_blob().map(|_| ()),
        }
    }

    /// Stable name used in the schema hash.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Uint8 => "uint8",
            Self::Uint16 => "uint16",
            Self::Uint32 => "uint32",
            Self::Uint64 => "uint64",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float64 => "float64",
            Self::String => "string",
            Self::Blob => "blob",
        }
    }
}

/// One declared field of a class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    /// Field name, for diagnostics.
    pub name: String,
    /// Value types, packed in order.
    pub types: Vec<FieldType>,
    /// Sendable by any client.
    pub clsend: bool,
    /// Sendable by the owning client.
    pub ownsend: bool,
}

impl FieldSpec {
    /// Validate a complete payload for this field, advancing the cursor
    /// past it.
    ///
    /// # Errors
    ///
    /// - `ProtocolError` from any component type that fails to unpack.
    pub fn consume(&self, view: &mut DatagramView) -> Result<(), ProtocolError> {
        for ty in &self.types {
            ty.consume(view)?;
        }
        Ok(())
    }
}

/// One declared class. Field ids are indexes into `fields`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassSpec {
    /// Class name.
    pub name: String,
    /// Declared fields, in id order.
    pub fields: Vec<FieldSpec>,
}

impl ClassSpec {
    /// Field lookup by wire id.
    #[must_use]
    pub fn field(&self, field_id: u16) -> Option<&FieldSpec> {
        self.fields.get(field_id as usize)
    }
}

/// Immutable class catalog with a stable hash.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    classes: Vec<ClassSpec>,
    hash: u32,
}

impl SchemaRegistry {
    /// Build a registry from class declarations. Class ids are assigned in
    /// declaration order.
    ///
    /// # Errors
    ///
    /// - [`SchemaError`] for duplicate names or id-space overflow.
    pub fn build(classes: Vec<ClassSpec>) -> Result<Self, SchemaError> {
        if classes.len() > usize::from(u16::MAX) {
            return Err(SchemaError::TooManyClasses(classes.len()));
        }
        for (i, class) in classes.iter().enumerate() {
            if class.fields.len() > usize::from(u16::MAX) {
                return Err(SchemaError::TooManyFields {
                    class: class.name.clone(),
                    count: class.fields.len(),
                });
            }
            if classes[..i].iter().any(|c| c.name == class.name) {
                return Err(SchemaError::DuplicateClass(class.name.clone()));
            }
        }

        let hash = hash_classes(&classes);
        Ok(Self { classes, hash })
    }

    /// The schema hash clients must present in CLIENT_HELLO.
    #[must_use]
    pub fn hash(&self) -> u32 {
        self.hash
    }

    /// Class lookup by id.
    #[must_use]
    pub fn class(&self, class_id: u16) -> Option<&ClassSpec> {
        self.classes.get(class_id as usize)
    }

    /// Class id lookup by name.
    #[must_use]
    pub fn class_id_by_name(&self, name: &str) -> Option<u16> {
        self.classes.iter().position(|c| c.name == name).map(|i| i as u16)
    }

    /// Field lookup by class and field id.
    #[must_use]
    pub fn field(&self, class_id: u16, field_id: u16) -> Option<&FieldSpec> {
        self.class(class_id)?.field(field_id)
    }

    /// Number of declared classes.
    #[must_use]
    pub fn class_count(&self) -> usize {
        self.classes.len()
    }
}

/// FNV-1a over every name, type, and permission bit of the schema, in
/// declaration order. Any structural change moves the hash.
fn hash_classes(classes: &[ClassSpec]) -> u32 {
    const FNV_OFFSET: u32 = 0x811c_9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;

    let mut hash = FNV_OFFSET;
    let mut mix = |bytes: &[u8]| {
        for &b in bytes {
            hash ^= u32::from(b);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
    };

    for class in classes {
        mix(class.name.as_bytes());
        for field in &class.fields {
            mix(field.name.as_bytes());
            for ty in &field.types {
                mix(ty.name().as_bytes());
            }
            mix(&[u8::from(field.clsend), u8::from(field.ownsend)]);
        }
    }
    hash
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use doorman_proto::Datagram;

    use super::*;

    fn login_class() -> ClassSpec {
        ClassSpec {
            name: "Login".to_string(),
            fields: vec![
                FieldSpec {
                    name: "login".to_string(),
                    types: vec![FieldType::String, FieldType::String],
                    clsend: true,
                    ownsend: false,
                },
                FieldSpec {
                    name: "setStatus".to_string(),
                    types: vec![FieldType::Uint8],
                    clsend: false,
                    ownsend: true,
                },
            ],
        }
    }

    #[test]
    fn lookup_by_id_and_name() {
        let schema = SchemaRegistry::build(vec![login_class()]).unwrap();

        assert_eq!(schema.class_id_by_name("Login"), Some(0));
        assert_eq!(schema.class_id_by_name("Nope"), None);
        assert_eq!(schema.class(0).unwrap().name, "Login");
        assert_eq!(schema.field(0, 0).unwrap().name, "login");
        assert!(schema.field(0, 2).is_none());
        assert!(schema.field(1, 0).is_none());
    }

    #[test]
    fn duplicate_class_rejected() {
        let result = SchemaRegistry::build(vec![login_class(), login_class()]);
        assert_eq!(result.unwrap_err(), SchemaError::DuplicateClass("Login".to_string()));
    }

    #[test]
    fn hash_is_stable_and_structure_sensitive() {
        let a = SchemaRegistry::build(vec![login_class()]).unwrap();
        let b = SchemaRegistry::build(vec![login_class()]).unwrap();
        assert_eq!(a.hash(), b.hash());

        let mut altered = login_class();
        altered.fields[0].clsend = false;
        let c = SchemaRegistry::build(vec![altered]).unwrap();
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn field_consume_accepts_well_formed_payload() {
        let schema = SchemaRegistry::build(vec![login_class()]).unwrap();
        let field = schema.field(0, 0).unwrap();

        let mut dg = Datagram::new();
        dg.add_string("user").unwrap();
        dg.add_string("hunter2").unwrap();

        let mut view = DatagramView::new(dg.into_bytes());
        field.consume(&mut view).unwrap();
        assert!(view.is_exhausted());
    }

    #[test]
    fn field_consume_rejects_truncated_payload() {
        let schema = SchemaRegistry::build(vec![login_class()]).unwrap();
        let field = schema.field(0, 0).unwrap();

        let mut dg = Datagram::new();
        dg.add_string("user").unwrap();
        // Second string missing entirely.

        let mut view = DatagramView::new(dg.into_bytes());
        assert!(matches!(field.consume(&mut view), Err(ProtocolError::Truncated { .. })));
    }

    #[test]
    fn empty_payload_field() {
        let field =
            FieldSpec { name: "ping".to_string(), types: vec![], clsend: true, ownsend: false };
        let mut view = DatagramView::new(Bytes::new());
        field.consume(&mut view).unwrap();
    }
}

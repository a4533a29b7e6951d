//! Agent configuration.
//!
//! Everything the supervisor needs comes from one TOML file: bind address,
//! expected protocol version, the identity channel range, the schema
//! classes, and the uberdog catalog. The schema section stands in for the
//! DC file in deployments of this agent; see the core crate's
//! `SchemaRegistry` docs.

use std::path::Path;

use doorman_core::{
    ClassSpec, FieldSpec, FieldType, SchemaRegistry, Uberdog, UberdogRegistry,
};
use serde::Deserialize;

use crate::error::AgentError;

fn default_bind() -> String {
    "0.0.0.0:7198".to_string()
}

fn default_version() -> String {
    "dev".to_string()
}

/// Identity channel range.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelRange {
    /// First allocatable channel.
    pub min: u64,
    /// Last allocatable channel (inclusive).
    pub max: u64,
}

impl Default for ChannelRange {
    fn default() -> Self {
        Self { min: 1_000_000, max: 1_009_999 }
    }
}

/// One configured uberdog.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UberdogDef {
    /// Object id.
    pub id: u32,
    /// Schema class name; must exist in `classes`.
    pub class: String,
    /// Whether pre-auth sessions may send it updates.
    #[serde(default)]
    pub anonymous: bool,
}

/// One field of a configured class.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDef {
    /// Field name.
    pub name: String,
    /// Value types, e.g. `["uint32", "string"]`.
    #[serde(default)]
    pub types: Vec<String>,
    /// Permission keywords: `clsend`, `ownsend`.
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// One configured class. Field ids follow declaration order.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassDef {
    /// Class name.
    pub name: String,
    /// Declared fields.
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

/// Top-level agent configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Listen address, `ip:port`.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Protocol version expected in CLIENT_HELLO.
    #[serde(default = "default_version")]
    pub version: String,

    /// Identity channel range.
    #[serde(default)]
    pub channels: ChannelRange,

    /// Well-known objects.
    #[serde(default)]
    pub uberdogs: Vec<UberdogDef>,

    /// Schema classes.
    #[serde(default)]
    pub classes: Vec<ClassDef>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            version: default_version(),
            channels: ChannelRange::default(),
            uberdogs: Vec::new(),
            classes: Vec::new(),
        }
    }
}

impl AgentConfig {
    /// Load and parse a TOML configuration file.
    ///
    /// # Errors
    ///
    /// - `AgentError::Config` if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| AgentError::Config(format!("cannot read {}: {e}", path.display())))?;
        toml::from_str(&text)
            .map_err(|e| AgentError::Config(format!("cannot parse {}: {e}", path.display())))
    }

    /// Parse a TOML configuration string.
    ///
    /// # Errors
    ///
    /// - `AgentError::Config` on malformed TOML.
    pub fn parse(text: &str) -> Result<Self, AgentError> {
        toml::from_str(text).map_err(|e| AgentError::Config(e.to_string()))
    }

    /// Build the immutable registries from this configuration.
    ///
    /// # Errors
    ///
    /// - `AgentError::Config` for unknown field types or keywords, an
    ///   uberdog naming an undeclared class, or duplicate uberdog ids.
    pub fn build_registries(&self) -> Result<(SchemaRegistry, UberdogRegistry), AgentError> {
        let mut classes = Vec::with_capacity(self.classes.len());
        for class in &self.classes {
            let mut fields = Vec::with_capacity(class.fields.len());
            for field in &class.fields {
                let types = field
                    .types
                    .iter()
                    .map(|t| parse_field_type(t))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|t| {
                        AgentError::Config(format!(
                            "class {}: field {}: unknown type \"{t}\"",
                            class.name, field.name
                        ))
                    })?;

                let mut clsend = false;
                let mut ownsend = false;
                for keyword in &field.keywords {
                    match keyword.as_str() {
                        "clsend" => clsend = true,
                        "ownsend" => ownsend = true,
                        other => {
                            return Err(AgentError::Config(format!(
                                "class {}: field {}: unknown keyword \"{other}\"",
                                class.name, field.name
                            )));
                        },
                    }
                }

                fields.push(FieldSpec { name: field.name.clone(), types, clsend, ownsend });
            }
            classes.push(ClassSpec { name: class.name.clone(), fields });
        }

        let schema = SchemaRegistry::build(classes)?;

        let mut uberdogs = UberdogRegistry::new();
        for dog in &self.uberdogs {
            let Some(class_id) = schema.class_id_by_name(&dog.class) else {
                return Err(AgentError::Config(format!(
                    "uberdog {}: class \"{}\" does not exist",
                    dog.id, dog.class
                )));
            };
            if uberdogs.get(dog.id).is_some() {
                return Err(AgentError::Config(format!("duplicate uberdog id {}", dog.id)));
            }
            uberdogs.insert(dog.id, Uberdog { class_id, anonymous: dog.anonymous });
        }

        Ok((schema, uberdogs))
    }
}

fn parse_field_type(name: &str) -> Result<FieldType, String> {
    match name {
        "uint8" => Ok(FieldType::Uint8),
        "uint16" => Ok(FieldType::Uint16),
        "uint32" => Ok(FieldType::Uint32),
        "uint64" => Ok(FieldType::Uint64),
        "int8" => Ok(FieldType::Int8),
        "int16" => Ok(FieldType::Int16),
        "int32" => Ok(FieldType::Int32),
        "int64" => Ok(FieldType::Int64),
        "float64" => Ok(FieldType::Float64),
        "string" => Ok(FieldType::String),
        "blob" => Ok(FieldType::Blob),
        other => Err(other.to_string()),
    }
}

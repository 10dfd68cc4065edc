//! Field schema and layer description used to recognise thematic attributes.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use arrow_schema::{DataType, TimeUnit};

use crate::error::ConfigError;

/// Value type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// UTF-8 text, stored as received.
    Text,
    /// 32-bit signed integer.
    Integer,
    /// 64-bit signed integer.
    Integer64,
    /// Double precision floating point.
    Double,
    /// ISO-8601 date-time, stored as nanoseconds since the Unix epoch.
    Timestamp,
}

impl FieldType {
    /// Returns the canonical lowercase name of this type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::Integer64 => "integer64",
            FieldType::Double => "double",
            FieldType::Timestamp => "timestamp",
        }
    }

    /// Arrow data type used when exporting values of this type.
    #[must_use]
    pub fn arrow_data_type(&self) -> DataType {
        match self {
            FieldType::Text => DataType::Utf8,
            FieldType::Integer => DataType::Int32,
            FieldType::Integer64 => DataType::Int64,
            FieldType::Double => DataType::Float64,
            FieldType::Timestamp => DataType::Timestamp(TimeUnit::Nanosecond, Some("UTC".into())),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "string" | "str" => Ok(FieldType::Text),
            "integer" | "int" | "int32" => Ok(FieldType::Integer),
            "integer64" | "int64" | "long" => Ok(FieldType::Integer64),
            "double" | "float" | "float64" | "real" => Ok(FieldType::Double),
            "timestamp" | "datetime" => Ok(FieldType::Timestamp),
            _ => Err(ConfigError::UnknownFieldType {
                value: s.to_string(),
            }),
        }
    }
}

/// One entry of the output field schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDefinition {
    /// Output field name
    pub name: String,
    /// Value type
    pub field_type: FieldType,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

impl FromStr for FieldDefinition {
    type Err = ConfigError;

    /// Parses `name` (text) or `name:type`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidFieldSpec {
            value: s.to_string(),
        };
        let (name, field_type) = match s.split_once(':') {
            Some((name, ty)) => (name.trim(), ty.parse::<FieldType>()?),
            None => (s.trim(), FieldType::Text),
        };
        if name.is_empty() {
            return Err(invalid());
        }
        Ok(Self::new(name, field_type))
    }
}

/// A source typename taking part in the output schema, with its optional
/// geometry attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerProperties {
    /// Typename, possibly prefixed (`ns:Type`)
    pub name: String,
    /// Local name of the element holding the geometry, if any
    pub geometry_attribute: Option<String>,
}

impl LayerProperties {
    pub fn new(name: impl Into<String>, geometry_attribute: Option<&str>) -> Self {
        Self {
            name: name.into(),
            geometry_attribute: geometry_attribute
                .filter(|g| !g.is_empty())
                .map(str::to_string),
        }
    }

    /// The typename without its namespace prefix.
    #[must_use]
    pub fn local_name(&self) -> &str {
        strip_prefix(&self.name)
    }
}

/// Removes a `prefix:` from a qualified name.
pub(crate) fn strip_prefix(name: &str) -> &str {
    match name.split_once(':') {
        Some((_, local)) => local,
        None => name,
    }
}

/// Lookup of thematic attributes by element name (or `layer|field` key for
/// joined layers) to the index and definition of the output field.
#[derive(Debug, Clone, Default)]
pub(crate) struct ThematicAttributes {
    by_key: HashMap<String, (usize, FieldDefinition)>,
}

impl ThematicAttributes {
    /// Every field is recognised by its own name.
    pub(crate) fn from_fields(fields: &[FieldDefinition]) -> Self {
        let by_key = fields
            .iter()
            .enumerate()
            .map(|(idx, field)| (field.name.clone(), (idx, field.clone())))
            .collect();
        Self { by_key }
    }

    /// Fields are recognised through the `field -> (layer, source field)`
    /// remapping. With a single layer the key is the source field name,
    /// otherwise `layer|source_field` with the layer's prefix stripped.
    /// Fields missing from the remapping are not thematic.
    pub(crate) fn from_mapping(
        fields: &[FieldDefinition],
        mapping: &HashMap<String, (String, String)>,
        layer_count: usize,
    ) -> Self {
        let mut by_key = HashMap::new();
        for (idx, field) in fields.iter().enumerate() {
            let Some((layer, source_field)) = mapping.get(&field.name) else {
                continue;
            };
            let key = if layer_count == 1 {
                source_field.clone()
            } else {
                composite_key(strip_prefix(layer), source_field)
            };
            by_key.insert(key, (idx, field.clone()));
        }
        Self { by_key }
    }

    pub(crate) fn get(&self, key: &str) -> Option<&(usize, FieldDefinition)> {
        self.by_key.get(key)
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.by_key.len()
    }
}

/// Builds the `layer|field` key used for joined layers.
pub(crate) fn composite_key(layer: &str, field: &str) -> String {
    format!("{layer}|{field}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_field_types() {
        assert_eq!("text".parse::<FieldType>().unwrap(), FieldType::Text);
        assert_eq!("INT".parse::<FieldType>().unwrap(), FieldType::Integer);
        assert_eq!("int64".parse::<FieldType>().unwrap(), FieldType::Integer64);
        assert_eq!("double".parse::<FieldType>().unwrap(), FieldType::Double);
        assert_eq!(
            "datetime".parse::<FieldType>().unwrap(),
            FieldType::Timestamp
        );
        assert!(matches!(
            "blob".parse::<FieldType>(),
            Err(ConfigError::UnknownFieldType { .. })
        ));
    }

    #[test]
    fn parse_field_definitions() {
        let def: FieldDefinition = "population:integer64".parse().unwrap();
        assert_eq!(def, FieldDefinition::new("population", FieldType::Integer64));

        let def: FieldDefinition = "name".parse().unwrap();
        assert_eq!(def.field_type, FieldType::Text);

        assert!(matches!(
            ":int".parse::<FieldDefinition>(),
            Err(ConfigError::InvalidFieldSpec { .. })
        ));
    }

    #[test]
    fn arrow_types() {
        assert_eq!(FieldType::Integer.arrow_data_type(), DataType::Int32);
        assert_eq!(FieldType::Text.arrow_data_type(), DataType::Utf8);
        assert!(matches!(
            FieldType::Timestamp.arrow_data_type(),
            DataType::Timestamp(TimeUnit::Nanosecond, _)
        ));
    }

    #[test]
    fn layer_local_name() {
        let layer = LayerProperties::new("topp:states", Some("the_geom"));
        assert_eq!(layer.local_name(), "states");
        assert_eq!(layer.geometry_attribute.as_deref(), Some("the_geom"));

        let layer = LayerProperties::new("states", Some(""));
        assert_eq!(layer.local_name(), "states");
        assert!(layer.geometry_attribute.is_none());
    }

    #[test]
    fn thematic_from_fields() {
        let fields = vec![
            FieldDefinition::new("name", FieldType::Text),
            FieldDefinition::new("pop", FieldType::Integer),
        ];
        let thematic = ThematicAttributes::from_fields(&fields);
        assert_eq!(thematic.len(), 2);
        assert_eq!(thematic.get("pop").map(|(idx, _)| *idx), Some(1));
        assert!(!thematic.contains("other"));
    }

    #[test]
    fn thematic_from_mapping_with_several_layers() {
        let fields = vec![
            FieldDefinition::new("a_name", FieldType::Text),
            FieldDefinition::new("b_name", FieldType::Text),
            FieldDefinition::new("unmapped", FieldType::Text),
        ];
        let mut mapping = HashMap::new();
        mapping.insert(
            "a_name".to_string(),
            ("ns:lakes".to_string(), "name".to_string()),
        );
        mapping.insert(
            "b_name".to_string(),
            ("ns:rivers".to_string(), "name".to_string()),
        );

        let thematic = ThematicAttributes::from_mapping(&fields, &mapping, 2);
        assert_eq!(thematic.len(), 2);
        assert_eq!(thematic.get("lakes|name").map(|(idx, _)| *idx), Some(0));
        assert_eq!(thematic.get("rivers|name").map(|(idx, _)| *idx), Some(1));

        let single = ThematicAttributes::from_mapping(&fields, &mapping, 1);
        assert!(single.contains("name"));
    }
}

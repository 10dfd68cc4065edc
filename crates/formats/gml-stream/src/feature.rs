//! Feature records produced by the parser.

use std::fmt;

use arrow_cast::parse::string_to_timestamp_nanos;

use crate::schema::FieldType;

/// A typed thematic attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Text(String),
    Integer(i32),
    Integer64(i64),
    Double(f64),
    /// Nanoseconds since the Unix epoch, UTC.
    Timestamp(i64),
}

impl AttributeValue {
    /// Converts raw element text to the declared field type.
    ///
    /// Returns `None` when the text cannot be represented in that type.
    #[must_use]
    pub fn parse(raw: &str, field_type: FieldType) -> Option<Self> {
        let trimmed = raw.trim();
        match field_type {
            FieldType::Text => Some(AttributeValue::Text(raw.to_string())),
            FieldType::Integer => trimmed.parse().ok().map(AttributeValue::Integer),
            FieldType::Integer64 => trimmed.parse().ok().map(AttributeValue::Integer64),
            FieldType::Double => trimmed.parse().ok().map(AttributeValue::Double),
            FieldType::Timestamp => string_to_timestamp_nanos(trimmed)
                .ok()
                .map(AttributeValue::Timestamp),
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Text(v) => f.write_str(v),
            AttributeValue::Integer(v) => write!(f, "{v}"),
            AttributeValue::Integer64(v) => write!(f, "{v}"),
            AttributeValue::Double(v) => write!(f, "{v}"),
            AttributeValue::Timestamp(v) => write!(f, "{v}ns"),
        }
    }
}

/// A feature assembled from one feature (or tuple) element.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    id: u64,
    attributes: Vec<Option<AttributeValue>>,
    geometry: Option<Vec<u8>>,
    valid: bool,
}

impl Feature {
    /// Creates an incomplete feature with `attribute_count` unset attributes.
    pub(crate) fn new(id: u64, attribute_count: usize) -> Self {
        Self {
            id,
            attributes: vec![None; attribute_count],
            geometry: None,
            valid: false,
        }
    }

    /// Sequence number of the feature within the stream.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Attribute values indexed by field position.
    #[must_use]
    pub fn attributes(&self) -> &[Option<AttributeValue>] {
        &self.attributes
    }

    /// The attribute at `index`, if set.
    #[must_use]
    pub fn attribute(&self, index: usize) -> Option<&AttributeValue> {
        self.attributes.get(index).and_then(Option::as_ref)
    }

    /// The geometry as WKB.
    #[must_use]
    pub fn geometry(&self) -> Option<&[u8]> {
        self.geometry.as_deref()
    }

    #[must_use]
    pub fn has_geometry(&self) -> bool {
        self.geometry.is_some()
    }

    /// Takes ownership of the WKB geometry.
    pub fn take_geometry(&mut self) -> Option<Vec<u8>> {
        self.geometry.take()
    }

    /// True once the enclosing element has been closed.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub(crate) fn set_attribute(&mut self, index: usize, value: Option<AttributeValue>) {
        if let Some(slot) = self.attributes.get_mut(index) {
            *slot = value;
        }
    }

    pub(crate) fn set_geometry(&mut self, wkb: Vec<u8>) {
        self.geometry = Some(wkb);
    }

    pub(crate) fn mark_valid(&mut self) {
        self.valid = true;
    }
}

/// A completed feature paired with its original identifier (empty if the
/// source carried none).
pub type FeatureWithId = (Feature, String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_typed_values() {
        assert_eq!(
            AttributeValue::parse(" 42 ", FieldType::Integer),
            Some(AttributeValue::Integer(42))
        );
        assert_eq!(
            AttributeValue::parse("9000000000", FieldType::Integer64),
            Some(AttributeValue::Integer64(9_000_000_000))
        );
        assert_eq!(
            AttributeValue::parse("1.5", FieldType::Double),
            Some(AttributeValue::Double(1.5))
        );
        assert_eq!(
            AttributeValue::parse(" keep spaces ", FieldType::Text),
            Some(AttributeValue::Text(" keep spaces ".to_string()))
        );
    }

    #[test]
    fn unparsable_values_are_unset() {
        assert_eq!(AttributeValue::parse("abc", FieldType::Integer), None);
        assert_eq!(AttributeValue::parse("9000000000", FieldType::Integer), None);
        assert_eq!(AttributeValue::parse("", FieldType::Double), None);
        assert_eq!(AttributeValue::parse("yesterday", FieldType::Timestamp), None);
    }

    #[test]
    fn parse_timestamp() {
        assert_eq!(
            AttributeValue::parse("1970-01-01T00:00:01Z", FieldType::Timestamp),
            Some(AttributeValue::Timestamp(1_000_000_000))
        );
    }

    #[test]
    fn feature_attribute_slots() {
        let mut feature = Feature::new(7, 2);
        assert_eq!(feature.id(), 7);
        assert!(!feature.is_valid());
        assert_eq!(feature.attributes().len(), 2);

        feature.set_attribute(1, Some(AttributeValue::Text("x".into())));
        feature.set_attribute(5, Some(AttributeValue::Text("ignored".into())));
        assert_eq!(feature.attribute(1).and_then(AttributeValue::as_text), Some("x"));
        assert!(feature.attribute(0).is_none());

        feature.set_geometry(vec![1, 2, 3]);
        assert!(feature.has_geometry());
        assert_eq!(feature.take_geometry(), Some(vec![1, 2, 3]));
        assert!(!feature.has_geometry());
    }
}

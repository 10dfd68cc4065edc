//! Construction-time configuration of [`crate::GmlStreamingParser`].

use std::collections::HashMap;

use crate::crs::AxisOrientationPolicy;
use crate::error::ConfigError;
use crate::schema::{FieldDefinition, LayerProperties};

/// Configuration options for parsing a GML/WFS response.
///
/// With a single layer, features are the elements named after its typename.
/// With several layers, features are `Tuple` elements joining one member
/// element per layer.
#[derive(Debug, Clone, Default)]
pub struct ParserOptions {
    layers: Vec<LayerProperties>,
    fields: Vec<FieldDefinition>,
    field_mapping: Option<HashMap<String, (String, String)>>,
    axis_policy: AxisOrientationPolicy,
    invert_axis: bool,
}

impl ParserOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Options for a single typename and its geometry attribute.
    #[must_use]
    pub fn for_type(typename: &str, geometry_attribute: Option<&str>) -> Self {
        Self::new().with_layer(LayerProperties::new(typename, geometry_attribute))
    }

    #[must_use]
    pub fn with_layer(mut self, layer: LayerProperties) -> Self {
        self.layers.push(layer);
        self
    }

    #[must_use]
    pub fn with_layers(mut self, layers: impl IntoIterator<Item = LayerProperties>) -> Self {
        self.layers.extend(layers);
        self
    }

    #[must_use]
    pub fn with_field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub fn with_fields(mut self, fields: impl IntoIterator<Item = FieldDefinition>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Maps output field `field` to `source_field` of typename `layer`.
    ///
    /// Once a mapping is configured, unmapped fields are never filled.
    #[must_use]
    pub fn with_field_mapping(
        mut self,
        field: impl Into<String>,
        layer: impl Into<String>,
        source_field: impl Into<String>,
    ) -> Self {
        self.field_mapping
            .get_or_insert_with(HashMap::new)
            .insert(field.into(), (layer.into(), source_field.into()));
        self
    }

    #[must_use]
    pub fn with_axis_policy(mut self, policy: AxisOrientationPolicy) -> Self {
        self.axis_policy = policy;
        self
    }

    /// Requests swapped axes; the CRS may flip this again.
    #[must_use]
    pub fn with_invert_axis(mut self, invert: bool) -> Self {
        self.invert_axis = invert;
        self
    }

    #[must_use]
    pub fn layers(&self) -> &[LayerProperties] {
        &self.layers
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldDefinition] {
        &self.fields
    }

    #[must_use]
    pub fn field_mapping(&self) -> Option<&HashMap<String, (String, String)>> {
        self.field_mapping.as_ref()
    }

    #[must_use]
    pub fn axis_policy(&self) -> AxisOrientationPolicy {
        self.axis_policy
    }

    #[must_use]
    pub fn invert_axis(&self) -> bool {
        self.invert_axis
    }

    /// Checks that the options describe something to parse.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.layers.is_empty() {
            return Err(ConfigError::NoLayers);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldType;

    #[test]
    fn builder_defaults() {
        let options = ParserOptions::new();
        assert_eq!(options.axis_policy(), AxisOrientationPolicy::HonourEpsgIfUrn);
        assert!(!options.invert_axis());
        assert!(options.field_mapping().is_none());
        assert_eq!(options.validate(), Err(ConfigError::NoLayers));
    }

    #[test]
    fn builder_chain() {
        let options = ParserOptions::for_type("ns:roads", Some("geom"))
            .with_field(FieldDefinition::new("name", FieldType::Text))
            .with_field_mapping("name", "ns:roads", "label")
            .with_axis_policy(AxisOrientationPolicy::IgnoreEpsg)
            .with_invert_axis(true);
        assert_eq!(options.layers().len(), 1);
        assert_eq!(options.fields().len(), 1);
        assert_eq!(
            options.field_mapping().and_then(|m| m.get("name")),
            Some(&("ns:roads".to_string(), "label".to_string()))
        );
        assert!(options.invert_axis());
        assert!(options.validate().is_ok());
    }
}

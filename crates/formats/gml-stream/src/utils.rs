//! Human readable labels for the Arrow schema of parsed features.

use arrow_schema::{DataType, Field};

/// Display label of a column of the feature schema.
///
/// # Examples
///
/// ```
/// use arrow_schema::{DataType, Field};
/// use gml_stream::utils::FeatureFieldExt;
///
/// assert_eq!(Field::new("name", DataType::Utf8, true).type_label(), "String");
/// ```
pub trait FeatureFieldExt {
    /// Type label: the geometry column is reported as `Geometry (WKB)`.
    fn type_label(&self) -> String;
}

impl FeatureFieldExt for Field {
    fn type_label(&self) -> String {
        let is_wkb = self
            .metadata()
            .get("ARROW:extension:name")
            .is_some_and(|name| name == "geoarrow.wkb");
        if is_wkb {
            return "Geometry (WKB)".to_string();
        }
        data_type_label(self.data_type())
    }
}

/// Label of the data types produced for thematic attributes.
#[must_use]
pub fn data_type_label(data_type: &DataType) -> String {
    match data_type {
        DataType::Int32 => "Int32".to_string(),
        DataType::Int64 => "Int64".to_string(),
        DataType::Float64 => "Float64".to_string(),
        DataType::Utf8 => "String".to_string(),
        DataType::Binary => "Binary".to_string(),
        DataType::Timestamp(unit, tz) => {
            let tz_str = tz.as_ref().map_or("", |t| t.as_ref());
            format!("Timestamp({unit:?}, {tz_str})")
        },
        _ => format!("{data_type:?}"),
    }
}

//! Conversion of parsed features into Arrow record batches.
//!
//! The batch holds one column per schema field, followed by an `id` column
//! with the `gml:id`/`fid` of each feature and a `geometry` column with WKB
//! tagged as a `geoarrow.wkb` extension type.

use std::collections::HashMap;
use std::sync::Arc;

use arrow_array::{
    ArrayRef, BinaryArray, Float64Array, Int32Array, Int64Array, RecordBatch, StringArray,
    TimestampNanosecondArray,
};
use arrow_schema::{ArrowError, Field, Schema, SchemaRef};

use crate::feature::{AttributeValue, FeatureWithId};
use crate::schema::{FieldDefinition, FieldType};

/// Name of the column holding the original feature identifier.
pub const ID_COLUMN: &str = "id";
/// Name of the WKB geometry column.
pub const GEOMETRY_COLUMN: &str = "geometry";

const EXTENSION_NAME_KEY: &str = "ARROW:extension:name";
const WKB_EXTENSION_NAME: &str = "geoarrow.wkb";

/// Arrow schema of the batches built by [`features_to_record_batch`].
#[must_use]
pub fn feature_schema(fields: &[FieldDefinition]) -> SchemaRef {
    let mut columns: Vec<Field> = fields
        .iter()
        .map(|f| Field::new(&f.name, f.field_type.arrow_data_type(), true))
        .collect();
    columns.push(Field::new(ID_COLUMN, arrow_schema::DataType::Utf8, false));
    columns.push(
        Field::new(GEOMETRY_COLUMN, arrow_schema::DataType::Binary, true).with_metadata(
            HashMap::from([(EXTENSION_NAME_KEY.to_string(), WKB_EXTENSION_NAME.to_string())]),
        ),
    );
    Arc::new(Schema::new(columns))
}

/// Builds a record batch from stolen features.
pub fn features_to_record_batch(
    fields: &[FieldDefinition],
    features: &[FeatureWithId],
) -> Result<RecordBatch, ArrowError> {
    let schema = feature_schema(fields);
    let mut columns: Vec<ArrayRef> = fields
        .iter()
        .enumerate()
        .map(|(idx, field)| build_column(field.field_type, idx, features))
        .collect();

    let ids: StringArray = features.iter().map(|(_, id)| Some(id.as_str())).collect();
    columns.push(Arc::new(ids));
    let geometries: BinaryArray = features
        .iter()
        .map(|(feature, _)| feature.geometry())
        .collect();
    columns.push(Arc::new(geometries));

    RecordBatch::try_new(schema, columns)
}

fn build_column(field_type: FieldType, idx: usize, features: &[FeatureWithId]) -> ArrayRef {
    let values = features.iter().map(|(feature, _)| feature.attribute(idx));
    match field_type {
        FieldType::Text => {
            let array: StringArray = values
                .map(|v| match v {
                    Some(AttributeValue::Text(s)) => Some(s.clone()),
                    Some(other) => Some(other.to_string()),
                    None => None,
                })
                .collect();
            Arc::new(array)
        },
        FieldType::Integer => {
            let array: Int32Array = values
                .map(|v| match v {
                    Some(AttributeValue::Integer(i)) => Some(*i),
                    _ => None,
                })
                .collect();
            Arc::new(array)
        },
        FieldType::Integer64 => {
            let array: Int64Array = values
                .map(|v| match v {
                    Some(AttributeValue::Integer64(i)) => Some(*i),
                    _ => None,
                })
                .collect();
            Arc::new(array)
        },
        FieldType::Double => {
            let array: Float64Array = values
                .map(|v| match v {
                    Some(AttributeValue::Double(d)) => Some(*d),
                    _ => None,
                })
                .collect();
            Arc::new(array)
        },
        FieldType::Timestamp => {
            let array: TimestampNanosecondArray = values
                .map(|v| match v {
                    Some(AttributeValue::Timestamp(ns)) => Some(*ns),
                    _ => None,
                })
                .collect();
            Arc::new(array.with_timezone("UTC"))
        },
    }
}

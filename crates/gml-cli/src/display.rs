//! Display utilities for formatting CLI output.
//!
//! This module provides table row structures and formatting functions
//! for presenting parsed features and stream diagnostics.

use geozero::ToWkt;
use geozero::wkb::Wkb;
use gml_stream::batch::feature_schema;
use gml_stream::utils::FeatureFieldExt;
use gml_stream::{FeatureWithId, FieldDefinition, GeometryType, GmlVersion};
use tabled::{Table, Tabled};

/// Table row representation for displaying one parsed feature.
#[derive(Tabled)]
pub struct FeatureRow {
    /// `gml:id` or `fid` of the feature.
    #[tabled(rename = "ID")]
    pub id: String,
    /// Set attributes as `name=value` pairs.
    #[tabled(rename = "Attributes")]
    pub attributes: String,
    /// Geometry rendered as WKT.
    #[tabled(rename = "Geometry")]
    pub geometry: String,
}

/// Table row representation for displaying field/column information.
#[derive(Tabled)]
pub struct FieldRow {
    /// Name of the field.
    #[tabled(rename = "Field")]
    pub name: String,
    /// Data type of the field.
    #[tabled(rename = "Type")]
    pub data_type: String,
    /// Whether the field can contain null values.
    #[tabled(rename = "Nullable")]
    pub nullable: String,
}

#[derive(Tabled)]
pub struct PropertyRow {
    #[tabled(rename = "Property")]
    pub property: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

/// What the parser learned about a response, collected after the last chunk.
#[derive(Debug, Clone, Default)]
pub struct StreamSummary {
    pub dataset: String,
    pub gml_version: Option<GmlVersion>,
    pub geometry_type: GeometryType,
    pub crs: Option<String>,
    pub srs_name: Option<String>,
    pub axis_inverted: bool,
    /// `(min_x, min_y, max_x, max_y)` and whether it was computed from the features.
    pub extent: Option<([f64; 4], bool)>,
    pub feature_count: u64,
    pub number_returned: i64,
    pub number_matched: i64,
    pub truncated: bool,
    pub exception: Option<String>,
    pub ignored_geometry_attributes: Vec<(String, String)>,
}

/// Renders WKB as WKT, or a placeholder when there is nothing to render.
#[must_use]
pub fn geometry_wkt(geometry: Option<&[u8]>) -> String {
    match geometry {
        Some(wkb) => Wkb(wkb.to_vec())
            .to_wkt()
            .unwrap_or_else(|e| format!("<invalid WKB: {e}>")),
        None => "EMPTY".to_string(),
    }
}

#[must_use]
pub fn feature_rows(fields: &[FieldDefinition], features: &[FeatureWithId]) -> Vec<FeatureRow> {
    features
        .iter()
        .map(|(feature, id)| {
            let attributes = fields
                .iter()
                .enumerate()
                .filter_map(|(idx, field)| {
                    feature
                        .attribute(idx)
                        .map(|value| format!("{}={value}", field.name))
                })
                .collect::<Vec<_>>()
                .join(", ");
            FeatureRow {
                id: id.clone(),
                attributes,
                geometry: geometry_wkt(feature.geometry()),
            }
        })
        .collect()
}

/// Display parsed features in a formatted table.
pub fn display_features(fields: &[FieldDefinition], features: &[FeatureWithId], total: u64) {
    println!("\nFeatures ({} of {total}):\n", features.len());
    if features.is_empty() {
        return;
    }
    let table = Table::new(feature_rows(fields, features)).to_string();
    println!("{table}");
}

fn counter(value: i64) -> String {
    if value < 0 {
        "unknown".to_string()
    } else {
        value.to_string()
    }
}

#[must_use]
pub fn summary_rows(summary: &StreamSummary) -> Vec<PropertyRow> {
    let row = |property: &str, value: String| PropertyRow {
        property: property.to_string(),
        value,
    };
    let na = || "N/A".to_string();

    let mut rows = vec![
        row(
            "GML version",
            summary.gml_version.map_or_else(na, |v| match v {
                GmlVersion::Gml2 => "GML 2/3.1".to_string(),
                GmlVersion::Gml32 => "GML 3.2".to_string(),
            }),
        ),
        row("Geometry type", summary.geometry_type.to_string()),
        row("CRS", summary.crs.clone().unwrap_or_else(na)),
        row("srsName", summary.srs_name.clone().unwrap_or_else(na)),
        row(
            "Axis inverted",
            if summary.axis_inverted { "Yes" } else { "No" }.to_string(),
        ),
    ];
    let extent = match summary.extent {
        Some(([min_x, min_y, max_x, max_y], computed)) => {
            let suffix = if computed { " (computed)" } else { "" };
            format!("({min_x}, {min_y}) - ({max_x}, {max_y}){suffix}")
        },
        None => na(),
    };
    rows.push(row("Extent", extent));
    rows.push(row("Features", summary.feature_count.to_string()));
    rows.push(row("Number returned", counter(summary.number_returned)));
    rows.push(row("Number matched", counter(summary.number_matched)));
    rows.push(row(
        "Truncated",
        if summary.truncated { "Yes" } else { "No" }.to_string(),
    ));
    if let Some(text) = &summary.exception {
        rows.push(row("Exception", text.clone()));
    }
    for (layer, attribute) in &summary.ignored_geometry_attributes {
        rows.push(row("Ignored geometry", format!("{layer}.{attribute}")));
    }
    rows
}

#[must_use]
pub fn field_rows(fields: &[FieldDefinition]) -> Vec<FieldRow> {
    feature_schema(fields)
        .fields()
        .iter()
        .map(|f| FieldRow {
            name: f.name().clone(),
            data_type: f.type_label(),
            nullable: if f.is_nullable() { "Yes" } else { "No" }.to_string(),
        })
        .collect()
}

/// Display stream diagnostics and the feature schema in formatted tables.
pub fn display_summary(summary: &StreamSummary, fields: &[FieldDefinition]) {
    println!("\nDataset: {}", summary.dataset);

    println!("\n=== Response ===");
    let table = Table::new(summary_rows(summary)).to_string();
    println!("{table}");

    println!("\n=== Fields ===");
    let table = Table::new(field_rows(fields)).to_string();
    println!("{table}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use gml_stream::{FieldType, GmlStreamingParser};

    fn parse(document: &str) -> (Vec<FieldDefinition>, Vec<FeatureWithId>) {
        let fields = vec![
            FieldDefinition::new("name", FieldType::Text),
            FieldDefinition::new("rank", FieldType::Integer),
        ];
        let mut parser = GmlStreamingParser::for_type("ns:place", Some("geom"), fields.clone());
        parser.process_data(document.as_bytes(), true).unwrap();
        (fields, parser.get_and_steal_ready_features())
    }

    #[test]
    fn test_feature_rows() {
        let (fields, features) = parse(
            r#"<c xmlns:ns="urn:ns" xmlns:gml="http://www.opengis.net/gml/3.2"><ns:place gml:id="p.1"><ns:name>Alpha</ns:name><ns:geom><gml:Point><gml:pos>1 2</gml:pos></gml:Point></ns:geom></ns:place><ns:place gml:id="p.2"><ns:rank>7</ns:rank></ns:place></c>"#,
        );
        let rows = feature_rows(&fields, &features);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "p.1");
        assert_eq!(rows[0].attributes, "name=Alpha");
        assert!(rows[0].geometry.starts_with("POINT"));
        assert_eq!(rows[1].attributes, "rank=7");
        assert_eq!(rows[1].geometry, "EMPTY");
    }

    #[test]
    fn test_invalid_wkb_is_reported() {
        assert!(geometry_wkt(Some(&[1, 42])).starts_with("<invalid WKB"));
    }

    #[test]
    fn test_summary_rows() {
        let summary = StreamSummary {
            dataset: "response.xml".to_string(),
            gml_version: Some(GmlVersion::Gml32),
            geometry_type: GeometryType::Point,
            crs: Some("EPSG:4326".to_string()),
            extent: Some(([0.0, 1.0, 2.0, 3.0], true)),
            number_returned: 2,
            exception: Some("boom".to_string()),
            ..StreamSummary::default()
        };
        let rows = summary_rows(&summary);
        let value = |name: &str| {
            rows.iter()
                .find(|r| r.property == name)
                .map(|r| r.value.clone())
        };
        assert_eq!(value("GML version").as_deref(), Some("GML 3.2"));
        assert_eq!(value("CRS").as_deref(), Some("EPSG:4326"));
        assert_eq!(value("srsName").as_deref(), Some("N/A"));
        assert_eq!(value("Extent").as_deref(), Some("(0, 1) - (2, 3) (computed)"));
        assert_eq!(value("Number returned").as_deref(), Some("2"));
        assert_eq!(value("Number matched").as_deref(), Some("unknown"));
        assert_eq!(value("Exception").as_deref(), Some("boom"));
    }

    #[test]
    fn test_field_rows() {
        let rows = field_rows(&[FieldDefinition::new("height", FieldType::Double)]);
        let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["height", "id", "geometry"]);
        assert_eq!(rows[0].data_type, "Float64");
        assert_eq!(rows[1].nullable, "No");
        assert_eq!(rows[2].data_type, "Geometry (WKB)");
    }

    #[test]
    fn test_display_functions_run() {
        let (fields, features) = parse(r#"<c xmlns:ns="urn:ns"><ns:place/></c>"#);
        display_features(&fields, &features, 1);
        display_features(&fields, &[], 0);
        display_summary(&StreamSummary::default(), &fields);
    }
}

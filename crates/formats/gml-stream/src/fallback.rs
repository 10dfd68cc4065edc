//! Conversion hook for geometry encodings the parser does not decode itself.
//!
//! When a geometry property contains elements such as `ArcString`,
//! `PolygonPatch` or `CompositeSurface`, the parser captures the GML of the
//! whole property and hands it to a [`GmlGeometryConverter`]. Without a
//! converter such features are emitted without geometry.

use crate::error::GeometryError;

/// Converts a GML geometry fragment to WKB.
pub trait GmlGeometryConverter: Send {
    /// `gml` holds the captured geometry element(s) with local names only,
    /// e.g. `<Curve ><segments ><Arc >...</Arc></segments></Curve>`.
    fn convert(&self, gml: &str) -> Result<Vec<u8>, GeometryError>;
}

impl<F> GmlGeometryConverter for F
where
    F: Fn(&str) -> Result<Vec<u8>, GeometryError> + Send,
{
    fn convert(&self, gml: &str) -> Result<Vec<u8>, GeometryError> {
        self(gml)
    }
}

/// Local names that are structural parts of natively decoded geometries.
pub(crate) const NATIVE_GEOMETRY_PARTS: [&str; 13] = [
    "exterior",
    "interior",
    "innerBoundaryIs",
    "outerBoundaryIs",
    "LinearRing",
    "pointMember",
    "curveMember",
    "lineStringMember",
    "polygonMember",
    "surfaceMember",
    "Curve",
    "segments",
    "LineStringSegment",
];

/// Appends `<local a="v" ...>` to a capture buffer.
pub(crate) fn capture_start_tag<'a>(
    buffer: &mut String,
    local: &str,
    attributes: impl IntoIterator<Item = (&'a str, &'a str)>,
) {
    buffer.push('<');
    buffer.push_str(local);
    buffer.push(' ');
    for (name, value) in attributes {
        buffer.push_str(name);
        buffer.push_str("=\"");
        buffer.push_str(&quick_xml::escape::escape(value));
        buffer.push_str("\" ");
    }
    buffer.push('>');
}

/// Appends `</local>` to a capture buffer.
pub(crate) fn capture_end_tag(buffer: &mut String, local: &str) {
    buffer.push_str("</");
    buffer.push_str(local);
    buffer.push('>');
}

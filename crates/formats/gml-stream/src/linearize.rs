//! A ready-made [`GmlGeometryConverter`] for curved and patch-based GML.
//!
//! Arcs and circles are replaced by chords, curves built from several
//! segments are joined into one line and surfaces made of polygon patches
//! become polygons. Coordinates are read in document order; the parser
//! swaps axes afterwards when the CRS asks for it.

use std::f64::consts::TAU;

use geo_types::Coord;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::coords::{
    DEFAULT_COORDINATE_SEPARATOR, DEFAULT_DIMENSION, DEFAULT_TUPLE_SEPARATOR,
    points_from_coordinates, points_from_pos_list,
};
use crate::error::GeometryError;
use crate::fallback::GmlGeometryConverter;
use crate::wkb::{self, GeometryType};

/// Chords used for a full circle unless configured otherwise.
pub const DEFAULT_SEGMENTS_PER_CIRCLE: usize = 72;

/// Elements whose coordinates form one piece of linework.
const SEGMENTS: [&str; 8] = [
    "Arc",
    "ArcString",
    "Circle",
    "LineStringSegment",
    "LineString",
    "LinearRing",
    "GeodesicString",
    "Geodesic",
];

/// Elements that join their segments into a single line.
const CURVES: [&str; 4] = ["Curve", "CompositeCurve", "OrientableCurve", "Ring"];

const BOUNDARIES: [&str; 4] = ["exterior", "interior", "outerBoundaryIs", "innerBoundaryIs"];

const PATCHES: [&str; 4] = ["Polygon", "PolygonPatch", "Rectangle", "Triangle"];

/// Approximates arcs and circles by straight segments.
#[derive(Debug, Clone, Copy)]
pub struct CurveLinearizer {
    segments_per_circle: usize,
}

impl Default for CurveLinearizer {
    fn default() -> Self {
        Self::new(DEFAULT_SEGMENTS_PER_CIRCLE)
    }
}

impl CurveLinearizer {
    /// `segments_per_circle` bounds the angle covered by one chord; at least
    /// four are used.
    #[must_use]
    pub fn new(segments_per_circle: usize) -> Self {
        Self {
            segments_per_circle: segments_per_circle.max(4),
        }
    }

    fn max_step(&self) -> f64 {
        TAU / self.segments_per_circle as f64
    }

    fn densify(&self, kind: &str, points: &[Coord<f64>]) -> Vec<Coord<f64>> {
        match kind {
            "Arc" | "ArcString" => {
                let mut line = Vec::new();
                let mut rest = points;
                while rest.len() >= 3 {
                    let arc = self.arc(rest[0], rest[1], rest[2], false);
                    append(&mut line, &arc);
                    rest = &rest[2..];
                }
                if rest.len() == 2 {
                    append(&mut line, rest);
                }
                line
            },
            "Circle" if points.len() >= 3 => self.arc(points[0], points[1], points[2], true),
            _ => points.to_vec(),
        }
    }

    /// Chords of the arc from `start` through `middle` to `end`, or of the
    /// whole circle through the three points.
    fn arc(
        &self,
        start: Coord<f64>,
        middle: Coord<f64>,
        end: Coord<f64>,
        full_circle: bool,
    ) -> Vec<Coord<f64>> {
        let Some(center) = circumcenter(start, middle, end) else {
            return vec![start, middle, end];
        };
        let radius = distance(center, start);
        let angle = |p: Coord<f64>| (p.y - center.y).atan2(p.x - center.x);
        let clockwise = cross(start, middle, end) < 0.0;

        let start_angle = angle(start);
        let mut sweep = if full_circle {
            TAU
        } else {
            let delta = angle(end) - start_angle;
            if clockwise {
                TAU - delta.rem_euclid(TAU)
            } else {
                delta.rem_euclid(TAU)
            }
        };
        if clockwise {
            sweep = -sweep;
        }

        let steps = ((sweep.abs() / self.max_step()).ceil() as usize).max(2);
        let mut line: Vec<Coord<f64>> = (0..=steps)
            .map(|i| {
                let a = start_angle + sweep * i as f64 / steps as f64;
                Coord {
                    x: center.x + radius * a.cos(),
                    y: center.y + radius * a.sin(),
                }
            })
            .collect();
        line[0] = start;
        line[steps] = if full_circle { start } else { end };
        line
    }
}

fn cross(a: Coord<f64>, b: Coord<f64>, c: Coord<f64>) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

fn distance(a: Coord<f64>, b: Coord<f64>) -> f64 {
    (a.x - b.x).hypot(a.y - b.y)
}

fn circumcenter(a: Coord<f64>, b: Coord<f64>, c: Coord<f64>) -> Option<Coord<f64>> {
    let d = 2.0 * cross(a, b, c);
    let scale = distance(a, b).max(distance(b, c)).max(distance(a, c));
    if d.abs() <= f64::EPSILON * scale * scale {
        return None;
    }
    let ab = (b.x - a.x).powi(2) + (b.y - a.y).powi(2);
    let ac = (c.x - a.x).powi(2) + (c.y - a.y).powi(2);
    Some(Coord {
        x: a.x + ((c.y - a.y) * ab - (b.y - a.y) * ac) / d,
        y: a.y + ((b.x - a.x) * ac - (c.x - a.x) * ab) / d,
    })
}

/// Appends `points`, skipping the first one when it repeats the last point.
fn append(line: &mut Vec<Coord<f64>>, points: &[Coord<f64>]) {
    let skip = usize::from(matches!((line.last(), points.first()), (Some(a), Some(b)) if a == b));
    line.extend_from_slice(&points[skip..]);
}

#[derive(Debug, Default)]
struct Collector {
    stack: Vec<String>,
    dimension: Option<usize>,
    separators: (String, String),
    text: String,
    segment: Vec<Coord<f64>>,
    path: Vec<Coord<f64>>,
    rings: Vec<Vec<Coord<f64>>>,
    polygons: Vec<Vec<Vec<Coord<f64>>>>,
    curves: Vec<Vec<Coord<f64>>>,
    points: Vec<Coord<f64>>,
}

impl Collector {
    fn within(&self, names: &[&str]) -> bool {
        self.stack.iter().any(|n| names.contains(&n.as_str()))
    }

    fn start(&mut self, tag: &BytesStart<'_>) -> Result<(), GeometryError> {
        let local = String::from_utf8_lossy(tag.local_name().as_ref()).into_owned();
        let mut cs = None;
        let mut ts = None;
        for attribute in tag.attributes() {
            let attribute = attribute.map_err(conversion)?;
            let value = attribute.unescape_value().map_err(conversion)?;
            match attribute.key.local_name().as_ref() {
                b"srsDimension" => self.dimension = value.trim().parse().ok(),
                b"cs" => cs = Some(value.into_owned()),
                b"ts" => ts = Some(value.into_owned()),
                _ => {},
            }
        }

        match local.as_str() {
            "pos" | "posList" => self.text.clear(),
            "coordinates" => {
                self.text.clear();
                self.separators = (
                    cs.filter(|v| !v.is_empty())
                        .unwrap_or_else(|| DEFAULT_COORDINATE_SEPARATOR.to_string()),
                    ts.filter(|v| !v.is_empty())
                        .unwrap_or_else(|| DEFAULT_TUPLE_SEPARATOR.to_string()),
                );
            },
            name if SEGMENTS.contains(&name) || name == "Point" => self.segment.clear(),
            _ => {},
        }
        self.stack.push(local);
        Ok(())
    }

    fn end(&mut self, linearizer: &CurveLinearizer) {
        let Some(local) = self.stack.pop() else {
            return;
        };
        match local.as_str() {
            "pos" | "posList" => {
                let dimension = self.dimension.unwrap_or(DEFAULT_DIMENSION);
                let points = points_from_pos_list(&self.text, dimension, false);
                self.segment.extend(points);
            },
            "coordinates" => {
                let (cs, ts) = &self.separators;
                let points = points_from_coordinates(&self.text, cs, ts, false);
                self.segment.extend(points);
            },
            "Point" => self.points.extend(self.segment.drain(..)),
            name if SEGMENTS.contains(&name) => {
                let line = linearizer.densify(name, &self.segment);
                self.segment.clear();
                append(&mut self.path, &line);
                self.finish_line();
            },
            name if CURVES.contains(&name) => self.finish_line(),
            name if BOUNDARIES.contains(&name) => {
                let mut ring = std::mem::take(&mut self.path);
                match (ring.first().copied(), ring.last()) {
                    (Some(first), Some(last)) if first != *last => ring.push(first),
                    _ => {},
                }
                if !ring.is_empty() {
                    self.rings.push(ring);
                }
            },
            name if PATCHES.contains(&name) => {
                if !self.rings.is_empty() {
                    let rings = std::mem::take(&mut self.rings);
                    self.polygons.push(rings);
                }
            },
            _ => {},
        }
    }

    /// Completes a free-standing line once no enclosing curve or boundary
    /// still collects segments.
    fn finish_line(&mut self) {
        if self.path.is_empty() || self.within(&CURVES) || self.within(&BOUNDARIES) {
            return;
        }
        let line = std::mem::take(&mut self.path);
        self.curves.push(line);
    }

    fn into_wkb(mut self) -> Result<Vec<u8>, GeometryError> {
        if !self.rings.is_empty() {
            let rings = std::mem::take(&mut self.rings);
            self.polygons.push(rings);
        }
        let polygon = |rings: &[Vec<Coord<f64>>]| {
            let rings: Vec<Vec<u8>> = rings.iter().map(|r| wkb::ring(r)).collect();
            wkb::polygon(&rings)
        };

        match (
            self.polygons.as_slice(),
            self.curves.as_slice(),
            self.points.as_slice(),
        ) {
            ([single], _, _) => Ok(polygon(single)),
            ([], [single], _) => Ok(wkb::line_string(single)),
            ([], [], [single]) => Ok(wkb::point(*single)),
            ([], [], []) => Err(GeometryError::Conversion {
                message: "no coordinates found in geometry".to_string(),
            }),
            ([], [], points) => {
                let members: Vec<Vec<u8>> = points.iter().map(|p| wkb::point(*p)).collect();
                Ok(wkb::multi(GeometryType::MultiPoint, &members))
            },
            ([], curves, _) => {
                let members: Vec<Vec<u8>> = curves.iter().map(|c| wkb::line_string(c)).collect();
                Ok(wkb::multi(GeometryType::MultiLineString, &members))
            },
            (polygons, _, _) => {
                let members: Vec<Vec<u8>> = polygons.iter().map(|p| polygon(p)).collect();
                Ok(wkb::multi(GeometryType::MultiPolygon, &members))
            },
        }
    }
}

fn conversion(err: impl std::fmt::Display) -> GeometryError {
    GeometryError::Conversion {
        message: err.to_string(),
    }
}

impl GmlGeometryConverter for CurveLinearizer {
    fn convert(&self, gml: &str) -> Result<Vec<u8>, GeometryError> {
        let mut reader = Reader::from_str(gml);
        let mut collector = Collector::default();
        loop {
            match reader.read_event().map_err(conversion)? {
                Event::Start(tag) => collector.start(&tag)?,
                Event::Empty(tag) => {
                    collector.start(&tag)?;
                    collector.end(self);
                },
                Event::End(_) => collector.end(self),
                Event::Text(text) => collector.text.push_str(&text.decode().map_err(conversion)?),
                Event::Eof => break,
                _ => {},
            }
        }
        collector.into_wkb()
    }
}

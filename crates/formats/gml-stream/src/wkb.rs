//! Well-known binary (WKB) geometry encoding.
//!
//! The parser emits little-endian 2D WKB. Single geometries are written in
//! one go from a coordinate list; multi-part geometries are assembled from
//! fragments collected on a [`FragmentStack`]. The walker at the bottom of
//! the module reads any 2D/Z/M/ZM WKB in either byte order and is used to
//! swap axes of externally converted geometries and to compute bounds.

use geo_types::{Coord, Rect};

use crate::error::GeometryError;

/// Byte-order flag for little-endian (NDR) WKB.
pub const WKB_LITTLE_ENDIAN: u8 = 1;

const HEADER_LEN: usize = 1 + 4;
const COORD_LEN: usize = 2 * 8;

/// Geometry type of a WKB buffer or of a whole stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GeometryType {
    #[default]
    Unknown,
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
}

impl GeometryType {
    /// The WKB type code, 0 for [`GeometryType::Unknown`].
    #[must_use]
    pub fn code(self) -> u32 {
        match self {
            GeometryType::Unknown => 0,
            GeometryType::Point => 1,
            GeometryType::LineString => 2,
            GeometryType::Polygon => 3,
            GeometryType::MultiPoint => 4,
            GeometryType::MultiLineString => 5,
            GeometryType::MultiPolygon => 6,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            GeometryType::Unknown => "Unknown",
            GeometryType::Point => "Point",
            GeometryType::LineString => "LineString",
            GeometryType::Polygon => "Polygon",
            GeometryType::MultiPoint => "MultiPoint",
            GeometryType::MultiLineString => "MultiLineString",
            GeometryType::MultiPolygon => "MultiPolygon",
        }
    }

    /// The multi type collecting geometries of this type.
    #[must_use]
    pub fn multi(self) -> Self {
        match self {
            GeometryType::Point => GeometryType::MultiPoint,
            GeometryType::LineString => GeometryType::MultiLineString,
            GeometryType::Polygon => GeometryType::MultiPolygon,
            other => other,
        }
    }

    #[must_use]
    pub fn is_multi(self) -> bool {
        matches!(
            self,
            GeometryType::MultiPoint | GeometryType::MultiLineString | GeometryType::MultiPolygon
        )
    }
}

impl std::fmt::Display for GeometryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Geometry type seen so far in a stream. Once the multi variant of a type
/// has been recorded, single geometries of that type no longer change it.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeometryTypeTracker {
    current: GeometryType,
}

impl GeometryTypeTracker {
    pub fn record(&mut self, observed: GeometryType) {
        if !observed.is_multi() && self.current == observed.multi() {
            return;
        }
        self.current = observed;
    }

    #[must_use]
    pub fn current(&self) -> GeometryType {
        self.current
    }
}

fn header(buffer: &mut Vec<u8>, geometry_type: GeometryType) {
    buffer.push(WKB_LITTLE_ENDIAN);
    buffer.extend_from_slice(&geometry_type.code().to_le_bytes());
}

fn count(buffer: &mut Vec<u8>, n: usize) {
    // WKB counts are u32 by definition.
    buffer.extend_from_slice(&(n as u32).to_le_bytes());
}

fn coords(buffer: &mut Vec<u8>, points: &[Coord<f64>]) {
    for point in points {
        buffer.extend_from_slice(&point.x.to_le_bytes());
        buffer.extend_from_slice(&point.y.to_le_bytes());
    }
}

/// WKB point.
#[must_use]
pub fn point(coord: Coord<f64>) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(HEADER_LEN + COORD_LEN);
    header(&mut buffer, GeometryType::Point);
    coords(&mut buffer, &[coord]);
    buffer
}

/// WKB line string.
#[must_use]
pub fn line_string(points: &[Coord<f64>]) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(HEADER_LEN + 4 + points.len() * COORD_LEN);
    header(&mut buffer, GeometryType::LineString);
    count(&mut buffer, points.len());
    coords(&mut buffer, points);
    buffer
}

/// A polygon ring fragment: point count and coordinates, no header.
#[must_use]
pub fn ring(points: &[Coord<f64>]) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(4 + points.len() * COORD_LEN);
    count(&mut buffer, points.len());
    coords(&mut buffer, points);
    buffer
}

/// WKB polygon from ring fragments built with [`ring`].
#[must_use]
pub fn polygon(rings: &[Vec<u8>]) -> Vec<u8> {
    let payload: usize = rings.iter().map(Vec::len).sum();
    let mut buffer = Vec::with_capacity(HEADER_LEN + 4 + payload);
    header(&mut buffer, GeometryType::Polygon);
    count(&mut buffer, rings.len());
    for ring in rings {
        buffer.extend_from_slice(ring);
    }
    buffer
}

/// WKB multi geometry from complete member geometries.
#[must_use]
pub fn multi(geometry_type: GeometryType, members: &[Vec<u8>]) -> Vec<u8> {
    let payload: usize = members.iter().map(Vec::len).sum();
    let mut buffer = Vec::with_capacity(HEADER_LEN + 4 + payload);
    header(&mut buffer, geometry_type);
    count(&mut buffer, members.len());
    for member in members {
        buffer.extend_from_slice(member);
    }
    buffer
}

/// WKB multi polygon; each entry holds the ring fragments of one polygon.
#[must_use]
pub fn multi_polygon(polygons: &[Vec<Vec<u8>>]) -> Vec<u8> {
    let members: Vec<Vec<u8>> = polygons.iter().map(|rings| polygon(rings)).collect();
    multi(GeometryType::MultiPolygon, &members)
}

/// Closed five-point polygon covering `rect`.
#[must_use]
pub fn rectangle(rect: Rect<f64>) -> Vec<u8> {
    let (min, max) = (rect.min(), rect.max());
    let points = [
        Coord { x: min.x, y: min.y },
        Coord { x: max.x, y: min.y },
        Coord { x: max.x, y: max.y },
        Coord { x: min.x, y: max.y },
        Coord { x: min.x, y: min.y },
    ];
    polygon(&[ring(&points)])
}

/// Stack of fragment lists for nested multi-part geometries.
#[derive(Debug, Default)]
pub struct FragmentStack {
    lists: Vec<Vec<Vec<u8>>>,
}

impl FragmentStack {
    pub fn push_list(&mut self) {
        self.lists.push(Vec::new());
    }

    /// Appends `fragment` to the innermost list. Returns false, dropping the
    /// fragment, when no list is open.
    pub fn push_fragment(&mut self, fragment: Vec<u8>) -> bool {
        match self.lists.last_mut() {
            Some(list) => {
                list.push(fragment);
                true
            },
            None => false,
        }
    }

    /// Removes every list, outermost first.
    pub fn take_all(&mut self) -> Vec<Vec<Vec<u8>>> {
        std::mem::take(&mut self.lists)
    }

    pub fn clear(&mut self) {
        self.lists.clear();
    }
}

fn read_u32(wkb: &[u8], at: usize, little: bool) -> Result<u32, GeometryError> {
    let bytes: [u8; 4] = wkb
        .get(at..at + 4)
        .and_then(|b| b.try_into().ok())
        .ok_or(GeometryError::Truncated { offset: at })?;
    Ok(if little {
        u32::from_le_bytes(bytes)
    } else {
        u32::from_be_bytes(bytes)
    })
}

fn read_f64(wkb: &[u8], at: usize, little: bool) -> Result<f64, GeometryError> {
    let bytes: [u8; 8] = wkb
        .get(at..at + 8)
        .and_then(|b| b.try_into().ok())
        .ok_or(GeometryError::Truncated { offset: at })?;
    Ok(if little {
        f64::from_le_bytes(bytes)
    } else {
        f64::from_be_bytes(bytes)
    })
}

/// Calls `visit(offset, little_endian)` for the first ordinate of every
/// coordinate of the geometry starting at `at`; returns the end offset.
fn walk<F: FnMut(usize, bool)>(wkb: &[u8], at: usize, visit: &mut F) -> Result<usize, GeometryError> {
    let flag = *wkb.get(at).ok_or(GeometryError::Truncated { offset: at })?;
    let little = match flag {
        0 => false,
        1 => true,
        _ => return Err(GeometryError::InvalidByteOrder { flag, offset: at }),
    };
    let code = read_u32(wkb, at + 1, little)?;
    let dimensions = match code / 1000 {
        0 => 2,
        1 | 2 => 3,
        3 => 4,
        _ => return Err(GeometryError::UnsupportedType { code }),
    };
    let stride = dimensions * 8;
    let mut at = at + HEADER_LEN;

    let sequence = |at: &mut usize, visit: &mut F| -> Result<(), GeometryError> {
        let n = read_u32(wkb, *at, little)? as usize;
        *at += 4;
        for _ in 0..n {
            if *at + stride > wkb.len() {
                return Err(GeometryError::Truncated { offset: *at });
            }
            visit(*at, little);
            *at += stride;
        }
        Ok(())
    };

    match code % 1000 {
        1 => {
            if at + stride > wkb.len() {
                return Err(GeometryError::Truncated { offset: at });
            }
            visit(at, little);
            at += stride;
        },
        2 => sequence(&mut at, visit)?,
        3 => {
            let rings = read_u32(wkb, at, little)?;
            at += 4;
            for _ in 0..rings {
                sequence(&mut at, visit)?;
            }
        },
        4..=7 => {
            let members = read_u32(wkb, at, little)?;
            at += 4;
            for _ in 0..members {
                at = walk(wkb, at, visit)?;
            }
        },
        _ => return Err(GeometryError::UnsupportedType { code }),
    }
    Ok(at)
}

/// The type of a WKB geometry, ignoring Z/M. Geometry collections are
/// [`GeometryType::Unknown`].
pub fn geometry_type(wkb: &[u8]) -> Result<GeometryType, GeometryError> {
    let flag = *wkb.first().ok_or(GeometryError::Truncated { offset: 0 })?;
    let little = match flag {
        0 => false,
        1 => true,
        _ => return Err(GeometryError::InvalidByteOrder { flag, offset: 0 }),
    };
    Ok(match read_u32(wkb, 1, little)? % 1000 {
        1 => GeometryType::Point,
        2 => GeometryType::LineString,
        3 => GeometryType::Polygon,
        4 => GeometryType::MultiPoint,
        5 => GeometryType::MultiLineString,
        6 => GeometryType::MultiPolygon,
        _ => GeometryType::Unknown,
    })
}

/// Swaps the first two ordinates of every coordinate in place.
pub fn swap_axes(wkb: &mut [u8]) -> Result<(), GeometryError> {
    let mut offsets = Vec::new();
    walk(wkb, 0, &mut |at, _| offsets.push(at))?;
    for at in offsets {
        let (x, y) = wkb[at..at + COORD_LEN].split_at_mut(8);
        x.swap_with_slice(y);
    }
    Ok(())
}

/// The 2D coordinates of a WKB geometry, in storage order.
pub fn coordinates(wkb: &[u8]) -> Result<Vec<Coord<f64>>, GeometryError> {
    let mut positions = Vec::new();
    walk(wkb, 0, &mut |at, little| positions.push((at, little)))?;
    positions
        .into_iter()
        .map(|(at, little)| {
            Ok(Coord {
                x: read_f64(wkb, at, little)?,
                y: read_f64(wkb, at + 8, little)?,
            })
        })
        .collect()
}

/// Bounding rectangle of a WKB geometry, `None` when it has no finite
/// coordinates.
pub fn bounds(wkb: &[u8]) -> Result<Option<Rect<f64>>, GeometryError> {
    Ok(coordinates(wkb)?
        .into_iter()
        .filter(|c| c.x.is_finite() && c.y.is_finite())
        .fold(None, |acc: Option<Rect<f64>>, c| {
            Some(match acc {
                None => Rect::new(c, c),
                Some(rect) => union(rect, Rect::new(c, c)),
            })
        }))
}

/// Smallest rectangle containing both `a` and `b`.
#[must_use]
pub fn union(a: Rect<f64>, b: Rect<f64>) -> Rect<f64> {
    Rect::new(
        Coord {
            x: a.min().x.min(b.min().x),
            y: a.min().y.min(b.min().y),
        },
        Coord {
            x: a.max().x.max(b.max().x),
            y: a.max().y.max(b.max().y),
        },
    )
}

//! Conversion of coordinate-bearing character data into coordinate lists.
//!
//! Two GML encodings are supported: `gml:coordinates` with configurable
//! coordinate (`cs`) and tuple (`ts`) separators, and `gml:pos`/`gml:posList`
//! with whitespace separated ordinates grouped by the stream dimension.
//! Tokens that do not parse as numbers drop their point; the rest of the
//! list is kept.

use geo_types::Coord;
use log::debug;

/// Default coordinate separator inside a `gml:coordinates` tuple.
pub const DEFAULT_COORDINATE_SEPARATOR: &str = ",";
/// Default separator between `gml:coordinates` tuples.
pub const DEFAULT_TUPLE_SEPARATOR: &str = " ";
/// Dimension assumed for `posList` when no `srsDimension` was seen.
pub const DEFAULT_DIMENSION: usize = 2;

/// Which text syntax the last coordinate element used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinateSyntax {
    /// `gml:coordinates` with its separators.
    Coordinates {
        coordinate_separator: String,
        tuple_separator: String,
    },
    /// `gml:pos` / `gml:posList`.
    PosList,
}

impl Default for CoordinateSyntax {
    fn default() -> Self {
        CoordinateSyntax::Coordinates {
            coordinate_separator: DEFAULT_COORDINATE_SEPARATOR.to_string(),
            tuple_separator: DEFAULT_TUPLE_SEPARATOR.to_string(),
        }
    }
}

impl CoordinateSyntax {
    /// Syntax of a `gml:coordinates` element; empty or missing separators
    /// fall back to the defaults.
    #[must_use]
    pub fn coordinates(cs: Option<&str>, ts: Option<&str>) -> Self {
        let pick = |value: Option<&str>, default: &str| {
            value
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
                .to_string()
        };
        CoordinateSyntax::Coordinates {
            coordinate_separator: pick(cs, DEFAULT_COORDINATE_SEPARATOR),
            tuple_separator: pick(ts, DEFAULT_TUPLE_SEPARATOR),
        }
    }
}

/// Coordinate syntax and dimensionality in effect for the stream.
#[derive(Debug, Clone, Default)]
pub struct CoordinateFormat {
    syntax: CoordinateSyntax,
    dimension: Option<usize>,
}

impl CoordinateFormat {
    pub fn set_syntax(&mut self, syntax: CoordinateSyntax) {
        self.syntax = syntax;
    }

    #[must_use]
    pub fn syntax(&self) -> &CoordinateSyntax {
        &self.syntax
    }

    /// The dimension in effect, if an `srsDimension` has been seen.
    #[must_use]
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Records the dimension from an `srsDimension` attribute value. Only the
    /// first valid value is kept.
    pub fn resolve_dimension(&mut self, srs_dimension: Option<&str>) {
        if self.dimension.is_some() {
            return;
        }
        if let Some(dimension) = srs_dimension
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|d| *d > 0)
        {
            debug!("srsDimension resolved to {dimension}");
            self.dimension = Some(dimension);
        }
    }

    /// Parses `text` with the current syntax.
    #[must_use]
    pub fn points(&self, text: &str, invert_axis: bool) -> Vec<Coord<f64>> {
        match &self.syntax {
            CoordinateSyntax::Coordinates {
                coordinate_separator,
                tuple_separator,
            } => points_from_coordinates(text, coordinate_separator, tuple_separator, invert_axis),
            CoordinateSyntax::PosList => points_from_pos_list(
                text,
                self.dimension.unwrap_or(DEFAULT_DIMENSION),
                invert_axis,
            ),
        }
    }
}

fn oriented(x: f64, y: f64, invert_axis: bool) -> Coord<f64> {
    if invert_axis {
        Coord { x: y, y: x }
    } else {
        Coord { x, y }
    }
}

fn split_nonempty<'a>(text: &'a str, separator: &'a str) -> Box<dyn Iterator<Item = &'a str> + 'a> {
    if separator.trim().is_empty() {
        Box::new(text.split_whitespace())
    } else {
        Box::new(
            text.split(separator)
                .map(str::trim)
                .filter(|part| !part.is_empty()),
        )
    }
}

/// Parses `gml:coordinates` text. A whitespace tuple separator matches any
/// run of whitespace.
#[must_use]
pub fn points_from_coordinates(
    text: &str,
    coordinate_separator: &str,
    tuple_separator: &str,
    invert_axis: bool,
) -> Vec<Coord<f64>> {
    let mut points = Vec::new();
    for tuple in split_nonempty(text, tuple_separator) {
        let mut parts = split_nonempty(tuple, coordinate_separator);
        let (Some(x), Some(y)) = (parts.next(), parts.next()) else {
            continue;
        };
        match (x.parse::<f64>(), y.parse::<f64>()) {
            (Ok(x), Ok(y)) => points.push(oriented(x, y, invert_axis)),
            _ => debug!("Skipping unparsable coordinate tuple '{tuple}'"),
        }
    }
    points
}

/// Parses `gml:pos` / `gml:posList` text in groups of `dimension` ordinates;
/// only the first two ordinates of each group are kept.
#[must_use]
pub fn points_from_pos_list(text: &str, dimension: usize, invert_axis: bool) -> Vec<Coord<f64>> {
    let dimension = dimension.max(2);
    let ordinates: Vec<&str> = text.split_whitespace().collect();
    if ordinates.len() % dimension != 0 {
        debug!(
            "Wrong number of ordinates ({}) for dimension {dimension}",
            ordinates.len()
        );
    }

    ordinates
        .chunks_exact(dimension)
        .filter_map(|group| match (group[0].parse::<f64>(), group[1].parse::<f64>()) {
            (Ok(x), Ok(y)) => Some(oriented(x, y, invert_axis)),
            _ => {
                debug!("Skipping unparsable position '{}'", group.join(" "));
                None
            },
        })
        .collect()
}

//! Spatial reference detection and axis-order policy.
//!
//! The first geometry carrying a usable `srsName` fixes the EPSG code of the
//! stream and whether coordinates have to be swapped.

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use log::debug;

use crate::error::ConfigError;

const OGC_HTTP_PREFIX: &str = "http://www.opengis.net/def/crs/EPSG/";
const URN_PREFIXES: [&str; 2] = ["urn:ogc:def:crs:EPSG:", "urn:x-ogc:def:crs:EPSG:"];

/// How the axis order declared by a CRS is taken into account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AxisOrientationPolicy {
    /// Honour the CRS axis order whatever the identifier form.
    HonourEpsg,
    /// Honour the CRS axis order only for URN (and OGC URI) identifiers.
    #[default]
    HonourEpsgIfUrn,
    /// Never look at the CRS axis order.
    IgnoreEpsg,
}

impl AxisOrientationPolicy {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AxisOrientationPolicy::HonourEpsg => "honour-epsg",
            AxisOrientationPolicy::HonourEpsgIfUrn => "honour-epsg-if-urn",
            AxisOrientationPolicy::IgnoreEpsg => "ignore-epsg",
        }
    }
}

impl fmt::Display for AxisOrientationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AxisOrientationPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "honour-epsg" | "honor-epsg" => Ok(AxisOrientationPolicy::HonourEpsg),
            "honour-epsg-if-urn" | "honor-epsg-if-urn" => Ok(AxisOrientationPolicy::HonourEpsgIfUrn),
            "ignore-epsg" => Ok(AxisOrientationPolicy::IgnoreEpsg),
            _ => Err(ConfigError::UnknownAxisPolicy {
                value: s.to_string(),
            }),
        }
    }
}

/// Source of the axis order declared by EPSG coordinate reference systems.
pub trait AxisOrderLookup: Send {
    /// True when the CRS lists northing (latitude) before easting.
    fn is_northing_first(&self, epsg: u32) -> bool;
}

/// Codes in the 4000 block that are geocentric or projected easting/northing
/// systems. Everything else in the block is a latitude-first geographic CRS.
const EASTING_FIRST_IN_GEOGRAPHIC_BLOCK: &[RangeInclusive<u32>] = &[
    4026..=4026,
    4037..=4038,
    4048..=4051,
    4056..=4063,
    4071..=4071,
    4082..=4083,
    4087..=4088,
    4093..=4096,
    4217..=4217,
    // Geocentric ITRF and national realisations
    4328..=4328,
    4330..=4338,
    4340..=4340,
    4342..=4342,
    4344..=4344,
    4346..=4346,
    4348..=4348,
    4350..=4350,
    4352..=4352,
    4354..=4354,
    4356..=4356,
    4358..=4358,
    4360..=4360,
    4362..=4362,
    4364..=4364,
    4366..=4366,
    4368..=4368,
    4370..=4370,
    4372..=4372,
    4374..=4375,
    4377..=4377,
    4379..=4379,
    4381..=4381,
    4383..=4383,
    4385..=4386,
    4388..=4388,
    // Projected: Kertau, NAD27 and NAD83 state planes and others
    4390..=4462,
    4465..=4465,
    4467..=4468,
    4471..=4471,
    4473..=4474,
    4479..=4479,
    4481..=4481,
    4484..=4489,
    4556..=4556,
    4559..=4559,
    4647..=4647,
    4826..=4826,
    4906..=4906,
    4910..=4920,
];

/// Even codes in these ranges are geocentric; the odd ones are 3D geographic.
const GEOCENTRIC_PAIRS: &[RangeInclusive<u32>] = &[4882..=4896, 4922..=4998];

/// Geographic CRS outside the 4000 block, and projected systems defined with
/// northing first.
const NORTHING_FIRST: &[RangeInclusive<u32>] = &[
    // Pulkovo and ETRS89 Gauss-Kruger, Poland CS2000 and CS92
    2166..=2180,
    2463..=2549,
    3006..=3024,
    3034..=3035,
    3038..=3051,
    3059..=3059,
    3126..=3138,
    3301..=3301,
    3346..=3346,
    3824..=3824,
    3889..=3889,
    3906..=3906,
    5013..=5013,
    5048..=5048,
    5105..=5130,
    5228..=5229,
    5233..=5233,
    5246..=5246,
    5252..=5252,
    5264..=5264,
    5324..=5324,
    5340..=5340,
    5354..=5354,
    5360..=5360,
    5365..=5365,
    5371..=5371,
    5373..=5373,
    5381..=5381,
    5393..=5393,
    5451..=5451,
    5464..=5464,
    5467..=5467,
    5489..=5489,
    5524..=5524,
    5527..=5527,
    5546..=5546,
    5561..=5561,
    5593..=5593,
    5681..=5681,
    5886..=5886,
    6135..=6135,
    6207..=6207,
    6311..=6311,
    // NAD83(2011), NAD83(PA11), NAD83(MA11)
    6318..=6319,
    6322..=6322,
    6325..=6325,
    6365..=6365,
    6668..=6668,
    6706..=6706,
    6783..=6783,
    6990..=6990,
    7683..=7683,
    7686..=7686,
    7798..=7798,
    // GDA2020
    7843..=7844,
    31466..=31469,
];

/// Built-in axis-order table: geographic EPSG codes and the common
/// projected systems defined with northing first.
#[derive(Debug, Clone, Copy, Default)]
pub struct EpsgAxisOrder;

impl AxisOrderLookup for EpsgAxisOrder {
    fn is_northing_first(&self, epsg: u32) -> bool {
        let listed = |ranges: &[RangeInclusive<u32>]| ranges.iter().any(|r| r.contains(&epsg));
        if (4000..=4999).contains(&epsg) {
            let geocentric = epsg % 2 == 0 && listed(GEOCENTRIC_PAIRS);
            return !geocentric && !listed(EASTING_FIRST_IN_GEOGRAPHIC_BLOCK);
        }
        listed(NORTHING_FIRST)
    }
}

/// A parsed `srsName`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrsName {
    pub epsg: u32,
    /// Whether the identifier used a URN-like form
    pub is_urn: bool,
}

/// Extracts the EPSG code from an `srsName` value.
///
/// Accepted forms are `EPSG:4326`, `http://www.opengis.net/gml/srs/epsg.xml#4326`,
/// `urn:ogc:def:crs:EPSG::4326` (also `urn:x-ogc`) and
/// `http://www.opengis.net/def/crs/EPSG/0/4326`.
#[must_use]
pub fn parse_srs_name(srs_name: &str) -> Option<SrsName> {
    let (code, is_urn) = if srs_name.starts_with(OGC_HTTP_PREFIX) {
        (srs_name.rsplit('/').next().unwrap_or_default(), true)
    } else if srs_name.starts_with("http") {
        (srs_name.split('#').nth(1).unwrap_or_default(), false)
    } else if URN_PREFIXES.iter().any(|p| srs_name.starts_with(p)) {
        (srs_name.rsplit(':').next().unwrap_or_default(), true)
    } else {
        (srs_name.split(':').nth(1).unwrap_or_default(), false)
    };
    let epsg = code.trim().parse::<u32>().ok()?;
    Some(SrsName { epsg, is_urn })
}

/// Resolved CRS state of a stream.
#[derive(Debug, Clone, Default)]
pub struct CrsState {
    epsg: u32,
    srs_name: Option<String>,
    invert_axis: bool,
}

impl CrsState {
    pub fn new(invert_request: bool) -> Self {
        Self {
            epsg: 0,
            srs_name: None,
            invert_axis: invert_request,
        }
    }

    /// EPSG code, 0 while unknown.
    #[must_use]
    pub fn epsg(&self) -> u32 {
        self.epsg
    }

    #[must_use]
    pub fn srs_name(&self) -> Option<&str> {
        self.srs_name.as_deref()
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.epsg != 0
    }

    #[must_use]
    pub fn invert_axis(&self) -> bool {
        self.invert_axis
    }

    /// Tries to resolve the CRS from an `srsName` value. Does nothing once
    /// resolved; an unusable value leaves the state unknown.
    pub fn resolve(
        &mut self,
        srs_name: &str,
        policy: AxisOrientationPolicy,
        invert_request: bool,
        lookup: &dyn AxisOrderLookup,
    ) {
        if self.is_resolved() {
            return;
        }
        let Some(parsed) = parse_srs_name(srs_name) else {
            debug!("No EPSG code in srsName '{srs_name}'");
            return;
        };

        let honour = match policy {
            AxisOrientationPolicy::HonourEpsg => true,
            AxisOrientationPolicy::HonourEpsgIfUrn => parsed.is_urn,
            AxisOrientationPolicy::IgnoreEpsg => false,
        };
        self.invert_axis = if honour && lookup.is_northing_first(parsed.epsg) {
            !invert_request
        } else {
            invert_request
        };
        self.epsg = parsed.epsg;
        self.srs_name = Some(srs_name.to_string());
        debug!(
            "CRS resolved to EPSG:{} from '{srs_name}', invert axis: {}",
            self.epsg, self.invert_axis
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_axis_order_table() {
        let northing_first = [
            4326, 4258, 4269, 4490, 4937, 4979, 2180, 2177, 3006, 3011, 3035, 3044, 5048,
            6318, 7844, 31467,
        ];
        for epsg in northing_first {
            assert!(EpsgAxisOrder.is_northing_first(epsg), "EPSG:{epsg}");
        }
        let easting_first = [
            4978, 4936, 4087, 4088, 4328, 4348, 4647, 3857, 25832, 2056, 27700, 32632, 3067,
            900_913,
        ];
        for epsg in easting_first {
            assert!(!EpsgAxisOrder.is_northing_first(epsg), "EPSG:{epsg}");
        }
    }

    #[test]
    fn srs_name_forms() {
        let cases = [
            ("EPSG:4326", Some((4326, false))),
            ("http://www.opengis.net/gml/srs/epsg.xml#31467", Some((31467, false))),
            ("urn:ogc:def:crs:EPSG::4326", Some((4326, true))),
            ("urn:x-ogc:def:crs:EPSG:6.9:25832", Some((25832, true))),
            ("http://www.opengis.net/def/crs/EPSG/0/3035", Some((3035, true))),
            ("http://example.com/crs", None),
            ("EPSG", None),
            ("CRS:84", None),
        ];
        for (input, expected) in cases {
            let parsed = parse_srs_name(input).map(|s| (s.epsg, s.is_urn));
            assert_eq!(parsed, expected, "{input}");
        }
    }

    #[test]
    fn policy_from_str() {
        assert_eq!(
            "honour-epsg".parse::<AxisOrientationPolicy>().unwrap(),
            AxisOrientationPolicy::HonourEpsg
        );
        assert_eq!(
            "Honor_EPSG_if_URN".parse::<AxisOrientationPolicy>().unwrap(),
            AxisOrientationPolicy::HonourEpsgIfUrn
        );
        assert!(matches!(
            "sometimes".parse::<AxisOrientationPolicy>(),
            Err(ConfigError::UnknownAxisPolicy { .. })
        ));
    }

    #[test]
    fn invert_only_for_urn_with_default_policy() {
        let mut state = CrsState::new(false);
        state.resolve(
            "EPSG:4326",
            AxisOrientationPolicy::HonourEpsgIfUrn,
            false,
            &EpsgAxisOrder,
        );
        assert_eq!(state.epsg(), 4326);
        assert!(!state.invert_axis());

        let mut state = CrsState::new(false);
        state.resolve(
            "urn:ogc:def:crs:EPSG::4326",
            AxisOrientationPolicy::HonourEpsgIfUrn,
            false,
            &EpsgAxisOrder,
        );
        assert!(state.invert_axis());
    }

    #[test]
    fn invert_request_is_xored() {
        let mut state = CrsState::new(true);
        state.resolve("EPSG:4326", AxisOrientationPolicy::HonourEpsg, true, &EpsgAxisOrder);
        assert!(!state.invert_axis());

        let mut state = CrsState::new(true);
        state.resolve("EPSG:3857", AxisOrientationPolicy::HonourEpsg, true, &EpsgAxisOrder);
        assert!(state.invert_axis());

        let mut state = CrsState::new(false);
        state.resolve(
            "urn:ogc:def:crs:EPSG::4326",
            AxisOrientationPolicy::IgnoreEpsg,
            false,
            &EpsgAxisOrder,
        );
        assert!(!state.invert_axis());
    }

    #[test]
    fn resolution_is_one_shot() {
        let mut state = CrsState::new(false);
        state.resolve("bogus", AxisOrientationPolicy::HonourEpsg, false, &EpsgAxisOrder);
        assert!(!state.is_resolved());
        state.resolve("EPSG:25832", AxisOrientationPolicy::HonourEpsg, false, &EpsgAxisOrder);
        state.resolve("EPSG:4326", AxisOrientationPolicy::HonourEpsg, false, &EpsgAxisOrder);
        assert_eq!(state.epsg(), 25832);
        assert_eq!(state.srs_name(), Some("EPSG:25832"));
        assert!(!state.invert_axis());
    }

    #[test]
    fn custom_lookup() {
        struct Everything;
        impl AxisOrderLookup for Everything {
            fn is_northing_first(&self, _epsg: u32) -> bool {
                true
            }
        }
        let mut state = CrsState::new(false);
        state.resolve("EPSG:3857", AxisOrientationPolicy::HonourEpsg, false, &Everything);
        assert!(state.invert_axis());
    }
}

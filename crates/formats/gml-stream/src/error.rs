//! Domain error types for the GML streaming parser.
//!
//! Stream-level failures (malformed XML) are reported through
//! [`format_shared::SpatialFormatReadError`] so that callers get line and
//! column information. The enums here cover failures that never abort a
//! stream: geometry decoding problems and invalid configuration.

use thiserror::Error;

/// Errors raised while walking or converting binary geometries.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GeometryError {
    /// The buffer ended before the declared payload was read.
    #[error("WKB buffer truncated at byte {offset}")]
    Truncated {
        /// Byte offset at which more data was expected
        offset: usize,
    },

    /// The byte-order flag was neither 0 nor 1.
    #[error("Invalid WKB byte order flag {flag} at byte {offset}")]
    InvalidByteOrder {
        /// The flag value found
        flag: u8,
        /// Byte offset of the flag
        offset: usize,
    },

    /// The geometry type code is not supported.
    #[error("Unsupported WKB geometry type code {code}")]
    UnsupportedType {
        /// The raw type code
        code: u32,
    },

    /// The external GML converter could not produce a geometry.
    #[error("GML fallback conversion failed: {message}")]
    Conversion {
        /// Description of the failure
        message: String,
    },
}

/// Configuration errors.
///
/// These errors occur when parser options or command-line values are invalid.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Unknown field type name
    #[error("Unknown field type '{value}' (expected one of: text, integer, integer64, double, timestamp)")]
    UnknownFieldType {
        /// The rejected value
        value: String,
    },

    /// Malformed `name:type` field specification
    #[error("Invalid field specification '{value}': expected NAME or NAME:TYPE")]
    InvalidFieldSpec {
        /// The rejected value
        value: String,
    },

    /// Unknown axis orientation policy name
    #[error("Unknown axis policy '{value}' (expected honour-epsg, honour-epsg-if-urn or ignore-epsg)")]
    UnknownAxisPolicy {
        /// The rejected value
        value: String,
    },

    /// No layer was configured
    #[error("At least one typename must be configured")]
    NoLayers,
}

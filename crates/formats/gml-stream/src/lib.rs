//! `gml-stream` parses GML and WFS `GetFeature` responses incrementally into
//! feature records with WKB geometries.
//!
//! The crate includes:
//! - **Streaming parser**: [`GmlStreamingParser`] accepts the response in
//!   arbitrary byte chunks and queues completed features.
//! - **Geometry assembly**: points, lines, polygons and their multi variants
//!   from GML 2, 3.1 and 3.2 encodings, with axis-order handling driven by the
//!   `srsName` of the response.
//! - **Diagnostics**: exception reports, truncated responses, paging counters
//!   and the layer extent advertised by the server.
//! - **Character sets**: responses declared as ISO-8859-1, UTF-16 or any
//!   other WHATWG encoding are transcoded before tokenizing.
//! - **Arrow export**: [`batch::features_to_record_batch`].

pub mod batch;
pub mod charset;
pub mod coords;
pub mod crs;
pub mod error;
pub mod fallback;
pub mod feature;
pub mod linearize;
pub mod mode;
pub mod namespace;
pub mod options;
pub mod parser;
pub mod schema;
pub mod utils;
pub mod wkb;
pub mod xml;

pub use crs::{AxisOrderLookup, AxisOrientationPolicy, EpsgAxisOrder};
pub use error::{ConfigError, GeometryError};
pub use fallback::GmlGeometryConverter;
pub use feature::{AttributeValue, Feature, FeatureWithId};
pub use linearize::CurveLinearizer;
pub use format_shared::{SourcePosition, SpatialFormatReadError, SpatialFormatResult};
pub use namespace::GmlVersion;
pub use options::ParserOptions;
pub use parser::GmlStreamingParser;
pub use schema::{FieldDefinition, FieldType, LayerProperties};
pub use wkb::GeometryType;

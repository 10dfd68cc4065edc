//! The streaming GML/WFS feature parser.
//!
//! [`GmlStreamingParser`] is fed the bytes of a `GetFeature` response in
//! arbitrary chunks. Element events drive an explicit stack of
//! [`ParseMode`]s; coordinates are turned into WKB fragments as their
//! elements close and completed features are queued until the caller steals
//! them with [`GmlStreamingParser::get_and_steal_ready_features`].

use std::collections::HashMap;
use std::fmt;

use format_shared::SpatialFormatResult;
use geo_types::{Coord, Rect};
use log::{debug, warn};

use crate::coords::{CoordinateFormat, CoordinateSyntax, points_from_pos_list};
use crate::crs::{AxisOrderLookup, AxisOrientationPolicy, CrsState, EpsgAxisOrder};
use crate::error::ConfigError;
use crate::fallback::{
    GmlGeometryConverter, NATIVE_GEOMETRY_PARTS, capture_end_tag, capture_start_tag,
};
use crate::feature::{AttributeValue, Feature, FeatureWithId};
use crate::mode::{ModeStack, ParseMode};
use crate::namespace::{GmlNamespace, GmlVersion};
use crate::options::ParserOptions;
use crate::schema::{FieldDefinition, ThematicAttributes, composite_key, strip_prefix};
use crate::wkb::{self, FragmentStack, GeometryType, GeometryTypeTracker};
use crate::xml::{
    ElementName, XmlAttribute, XmlEventSink, XmlEventSource, attribute_value, attribute_value_ns,
};

const TUPLE: &str = "Tuple";

/// Incremental parser turning a GML/WFS response into features with WKB
/// geometries.
///
/// ```no_run
/// use gml_stream::{FieldDefinition, FieldType, GmlStreamingParser};
///
/// let mut parser = GmlStreamingParser::for_type(
///     "ns:roads",
///     Some("geometry"),
///     vec![FieldDefinition::new("name", FieldType::Text)],
/// );
/// for chunk in [&b"<wfs:FeatureCollection"[..], &b" ...>"[..]] {
///     parser.process_data(chunk, false)?;
///     for (feature, gml_id) in parser.get_and_steal_ready_features() {
///         println!("{gml_id}: {:?}", feature.attributes());
///     }
/// }
/// parser.process_data(&[], true)?;
/// # Ok::<(), gml_stream::SpatialFormatReadError>(())
/// ```
pub struct GmlStreamingParser {
    source: XmlEventSource,
    dispatcher: Dispatcher,
}

impl GmlStreamingParser {
    /// Creates a parser from validated options.
    pub fn new(options: ParserOptions) -> Result<Self, ConfigError> {
        options.validate()?;
        Ok(Self {
            source: XmlEventSource::new(),
            dispatcher: Dispatcher::new(&options),
        })
    }

    /// Parser for the features of a single typename.
    #[must_use]
    pub fn for_type(
        typename: &str,
        geometry_attribute: Option<&str>,
        fields: Vec<FieldDefinition>,
    ) -> Self {
        let options = ParserOptions::for_type(typename, geometry_attribute).with_fields(fields);
        Self {
            source: XmlEventSource::new(),
            dispatcher: Dispatcher::new(&options),
        }
    }

    /// Installs the converter used for geometries with unsupported elements.
    #[must_use]
    pub fn with_fallback_converter(mut self, converter: impl GmlGeometryConverter + 'static) -> Self {
        self.dispatcher.fallback = Some(Box::new(converter));
        self
    }

    /// Replaces the built-in EPSG axis-order table.
    #[must_use]
    pub fn with_axis_order_lookup(mut self, lookup: impl AxisOrderLookup + 'static) -> Self {
        self.dispatcher.axis_lookup = Box::new(lookup);
        self
    }

    /// Feeds the next chunk of the response.
    ///
    /// Features completed by this chunk become available through
    /// [`Self::get_and_steal_ready_features`]. Malformed XML is fatal: the
    /// error carries the line and column and is returned again by every
    /// later call.
    pub fn process_data(&mut self, data: &[u8], at_end: bool) -> SpatialFormatResult<()> {
        self.source
            .feed(data, at_end, &mut self.dispatcher)
            .map_err(|e| e.with_additional_context("GML response"))
    }

    /// Hands over every completed feature, in completion order, with its
    /// `gml:id`/`fid` (empty when absent).
    pub fn get_and_steal_ready_features(&mut self) -> Vec<FeatureWithId> {
        std::mem::take(&mut self.dispatcher.ready)
    }

    /// Geometry type of the stream so far.
    #[must_use]
    pub fn wkb_type(&self) -> GeometryType {
        self.dispatcher.geometry_type.current()
    }

    /// EPSG code of the stream, 0 while unknown.
    #[must_use]
    pub fn epsg_code(&self) -> u32 {
        self.dispatcher.crs.epsg()
    }

    /// The `srsName` the EPSG code was read from.
    #[must_use]
    pub fn srs_name(&self) -> Option<&str> {
        self.dispatcher.crs.srs_name()
    }

    /// `EPSG:<code>` once the CRS is known.
    #[must_use]
    pub fn crs_identifier(&self) -> Option<String> {
        self.dispatcher
            .crs
            .is_resolved()
            .then(|| format!("EPSG:{}", self.dispatcher.crs.epsg()))
    }

    /// Whether coordinates are swapped.
    #[must_use]
    pub fn invert_axis_orientation(&self) -> bool {
        self.dispatcher.crs.invert_axis()
    }

    /// Extent from the collection-level `boundedBy`, if one preceded the
    /// first feature.
    #[must_use]
    pub fn layer_extent(&self) -> Option<Rect<f64>> {
        self.dispatcher.layer_extent
    }

    /// True when the response is an `ExceptionReport`.
    #[must_use]
    pub fn is_exception(&self) -> bool {
        self.dispatcher.is_exception
    }

    /// Text of the exception report, several texts separated by newlines.
    #[must_use]
    pub fn exception_text(&self) -> &str {
        &self.dispatcher.exception_text
    }

    /// True when the server flagged the response as truncated.
    #[must_use]
    pub fn is_truncated_response(&self) -> bool {
        self.dispatcher.truncated_response
    }

    /// `numberReturned` (or `numberOfFeatures`), -1 when unknown.
    #[must_use]
    pub fn number_returned(&self) -> i64 {
        self.dispatcher.number_returned
    }

    /// `numberMatched`, -1 when unknown.
    #[must_use]
    pub fn number_matched(&self) -> i64 {
        self.dispatcher.number_matched
    }

    /// Number of completed features, stolen or not.
    #[must_use]
    pub fn feature_count(&self) -> u64 {
        self.dispatcher.feature_count
    }

    /// `(typename, geometry attribute)` pairs dropped because an earlier
    /// typename already provides the geometry.
    #[must_use]
    pub fn ignored_geometry_attributes(&self) -> &[(String, String)] {
        &self.dispatcher.ignored_geometry_attributes
    }

    /// GML namespace version of the stream, once seen.
    #[must_use]
    pub fn gml_version(&self) -> Option<GmlVersion> {
        self.dispatcher.namespace.version()
    }

    /// The output fields.
    #[must_use]
    pub fn fields(&self) -> &[FieldDefinition] {
        &self.dispatcher.fields
    }

    /// The open parse modes, outermost first.
    #[must_use]
    pub fn parse_modes(&self) -> &[ParseMode] {
        self.dispatcher.modes.as_slice()
    }

    /// Union of the bounds of the features' geometries.
    #[must_use]
    pub fn calculate_extent(features: &[FeatureWithId]) -> Option<Rect<f64>> {
        features
            .iter()
            .filter_map(|(feature, _)| feature.geometry())
            .filter_map(|geometry| match wkb::bounds(geometry) {
                Ok(bounds) => bounds,
                Err(e) => {
                    debug!("Skipping geometry in extent computation: {e}");
                    None
                },
            })
            .reduce(wkb::union)
    }
}

impl fmt::Debug for GmlStreamingParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GmlStreamingParser")
            .field("typename", &self.dispatcher.typename)
            .field("modes", &self.dispatcher.modes)
            .field("feature_count", &self.dispatcher.feature_count)
            .field("ready", &self.dispatcher.ready.len())
            .finish_non_exhaustive()
    }
}

/// Parse state driven by the XML events.
struct Dispatcher {
    // Configuration
    typename: Option<String>,
    layer_geometry: HashMap<String, Option<String>>,
    ignored_geometry_attributes: Vec<(String, String)>,
    fields: Vec<FieldDefinition>,
    thematic: ThematicAttributes,
    axis_policy: AxisOrientationPolicy,
    invert_request: bool,
    fallback: Option<Box<dyn GmlGeometryConverter>>,
    axis_lookup: Box<dyn AxisOrderLookup>,

    // Resolved once
    namespace: GmlNamespace,
    crs: CrsState,
    coords: CoordinateFormat,

    modes: ModeStack,
    depth: usize,
    feature_depth: Option<usize>,
    feature_tuple_depth: Option<usize>,
    current_feature: Option<Feature>,
    current_feature_id: String,
    current_typename: String,
    geometry_attribute: Option<String>,
    attribute_name: String,
    attribute_depth: Option<usize>,
    text: String,

    current_wkb: Vec<u8>,
    fragments: FragmentStack,
    geometry_type: GeometryTypeTracker,
    geometry_string: String,
    found_unhandled_geometry: bool,

    current_extent: Option<Rect<f64>>,
    lower_corner: Option<Coord<f64>>,
    upper_corner: Option<Coord<f64>>,
    bounded_by_null: bool,
    layer_extent: Option<Rect<f64>>,

    is_exception: bool,
    exception_text: String,
    truncated_response: bool,
    number_returned: i64,
    number_matched: i64,

    ready: Vec<FeatureWithId>,
    feature_count: u64,
}

impl Dispatcher {
    fn new(options: &ParserOptions) -> Self {
        let layers = options.layers();
        let fields = options.fields().to_vec();
        let thematic = match options.field_mapping() {
            Some(mapping) => ThematicAttributes::from_mapping(&fields, mapping, layers.len()),
            None => ThematicAttributes::from_fields(&fields),
        };

        let mut layer_geometry = HashMap::new();
        let mut ignored_geometry_attributes = Vec::new();
        let mut geometry_found = false;
        for layer in layers {
            let mut geometry = layer.geometry_attribute.clone();
            if let Some(attribute) = &geometry {
                if geometry_found {
                    warn!(
                        "Ignoring geometry attribute '{attribute}' of typename '{}': only one geometry per feature is supported",
                        layer.name
                    );
                    ignored_geometry_attributes.push((layer.name.clone(), attribute.clone()));
                    geometry = None;
                }
                geometry_found = true;
            }
            layer_geometry.insert(strip_prefix(&layer.name).to_string(), geometry);
        }

        let (typename, geometry_attribute) = match layers {
            [single] => (
                Some(single.local_name().to_string()),
                single.geometry_attribute.clone(),
            ),
            _ => (None, None),
        };

        Self {
            typename,
            layer_geometry,
            ignored_geometry_attributes,
            fields,
            thematic,
            axis_policy: options.axis_policy(),
            invert_request: options.invert_axis(),
            fallback: None,
            axis_lookup: Box::new(EpsgAxisOrder),
            namespace: GmlNamespace::default(),
            crs: CrsState::new(options.invert_axis()),
            coords: CoordinateFormat::default(),
            modes: ModeStack::default(),
            depth: 0,
            feature_depth: None,
            feature_tuple_depth: None,
            current_feature: None,
            current_feature_id: String::new(),
            current_typename: String::new(),
            geometry_attribute,
            attribute_name: String::new(),
            attribute_depth: None,
            text: String::new(),
            current_wkb: Vec::new(),
            fragments: FragmentStack::default(),
            geometry_type: GeometryTypeTracker::default(),
            geometry_string: String::new(),
            found_unhandled_geometry: false,
            current_extent: None,
            lower_corner: None,
            upper_corner: None,
            bounded_by_null: false,
            layer_extent: None,
            is_exception: false,
            exception_text: String::new(),
            truncated_response: false,
            number_returned: -1,
            number_matched: -1,
            ready: Vec::new(),
            feature_count: 0,
        }
    }

    fn invert(&self) -> bool {
        self.crs.invert_axis()
    }

    fn is_geometry_attribute(&self, local: &str) -> bool {
        self.geometry_attribute.as_deref() == Some(local)
    }

    fn is_typename(&self, local: &str) -> bool {
        self.typename.as_deref() == Some(local)
    }

    /// Reads `gml:id`, locking the GML namespace if it is still unknown.
    fn read_gml_id(&mut self, attributes: &[XmlAttribute]) -> Option<String> {
        if let Some(version) = self.namespace.version() {
            return attribute_value_ns(attributes, version.uri(), "id").map(str::to_string);
        }
        for version in [GmlVersion::Gml2, GmlVersion::Gml32] {
            if let Some(id) =
                attribute_value_ns(attributes, version.uri(), "id").filter(|id| !id.is_empty())
            {
                self.namespace.observe(Some(version.uri()));
                return Some(id.to_string());
            }
        }
        None
    }

    fn start_feature(&mut self, mode: ParseMode) {
        self.current_feature = Some(Feature::new(self.feature_count, self.fields.len()));
        self.current_extent = None;
        self.lower_corner = None;
        self.upper_corner = None;
        self.current_wkb.clear();
        self.fragments.clear();
        self.feature_depth = Some(self.depth);
        self.modes.push(mode);
    }

    fn start_feature_tuple(&mut self, local: &str, geometry: Option<String>, attributes: &[XmlAttribute]) {
        self.feature_tuple_depth = Some(self.depth);
        self.current_typename = local.to_string();
        self.geometry_attribute = if self.current_wkb.is_empty() {
            geometry
        } else {
            None
        };
        self.modes.push(ParseMode::FeatureTuple);

        let id = self.read_gml_id(attributes).unwrap_or_default();
        if !self.current_feature_id.is_empty() {
            self.current_feature_id.push('|');
        }
        self.current_feature_id.push_str(&id);
    }

    fn read_paging_counters(&mut self, attributes: &[XmlAttribute]) {
        let counter = |value: Option<&str>| -> i64 {
            value
                .and_then(|v| v.trim().parse::<i64>().ok())
                .unwrap_or(-1)
        };
        let returned = attribute_value(attributes, "numberReturned")
            .filter(|v| !v.is_empty())
            .or_else(|| attribute_value(attributes, "numberOfFeatures"));
        self.number_returned = counter(returned);
        self.number_matched = counter(attribute_value(attributes, "numberMatched"));
        debug!(
            "Paging counters: returned {}, matched {}",
            self.number_returned, self.number_matched
        );
    }

    fn set_attribute(&mut self, key: &str, raw: &str) {
        let Some((index, definition)) = self.thematic.get(key) else {
            return;
        };
        let (index, field_type) = (*index, definition.field_type);
        let value = AttributeValue::parse(raw, field_type);
        if value.is_none() && !raw.trim().is_empty() {
            debug!("Value '{raw}' of '{key}' is not a valid {field_type}");
        }
        if let Some(feature) = self.current_feature.as_mut() {
            feature.set_attribute(index, value);
        }
    }

    fn finish_attribute(&mut self) {
        self.modes.pop();
        self.attribute_depth = None;
        let name = std::mem::take(&mut self.attribute_name);
        let text = std::mem::take(&mut self.text);
        self.set_attribute(&name, &text);
    }

    fn finish_geometry_attribute(&mut self) {
        self.modes.pop();
        if self.found_unhandled_geometry {
            self.convert_captured_geometry();
        }
        self.geometry_string.clear();
    }

    fn convert_captured_geometry(&mut self) {
        let Some(converter) = &self.fallback else {
            debug!("Unsupported geometry encoding and no fallback converter; feature left without geometry");
            return;
        };
        match converter.convert(&self.geometry_string) {
            Ok(mut geometry) => {
                if self.crs.invert_axis()
                    && let Err(e) = wkb::swap_axes(&mut geometry)
                {
                    warn!("Could not swap axes of converted geometry: {e}");
                    return;
                }
                match wkb::geometry_type(&geometry) {
                    Ok(GeometryType::Unknown) | Err(_) => {},
                    Ok(observed) => self.geometry_type.record(observed),
                }
                if let Some(feature) = self.current_feature.as_mut() {
                    feature.set_geometry(geometry);
                }
            },
            Err(e) => warn!("{e}"),
        }
    }

    fn finish_bounded_by(&mut self) {
        if self.current_extent.is_none() && !self.bounded_by_null {
            let points = self.coords.points(&self.text, self.invert());
            match points.as_slice() {
                [first, second, ..] => self.current_extent = Some(Rect::new(*first, *second)),
                _ => debug!("Could not create bounding box from '{}'", self.text.trim()),
            }
        }
        if self.current_extent.is_some()
            && self.layer_extent.is_none()
            && self.current_feature.is_none()
            && self.feature_count == 0
        {
            self.layer_extent = self.current_extent.take();
        }
        self.modes.pop();
    }

    fn finish_corner(&mut self, mode: ParseMode) {
        let points = points_from_pos_list(&self.text, 2, self.invert());
        if let [corner] = points.as_slice() {
            if mode == ParseMode::LowerCorner {
                self.lower_corner = Some(*corner);
            } else {
                self.upper_corner = Some(*corner);
            }
            if let (Some(lower), Some(upper)) = (self.lower_corner, self.upper_corner) {
                self.current_extent = Some(Rect::new(lower, upper));
            }
        }
        self.modes.pop();
    }

    fn finish_feature(&mut self) {
        if let Some(mut feature) = self.current_feature.take() {
            if !feature.has_geometry() {
                if !self.current_wkb.is_empty() {
                    feature.set_geometry(std::mem::take(&mut self.current_wkb));
                } else if let Some(extent) = self
                    .current_extent
                    .filter(|r| r.width() > 0.0 && r.height() > 0.0)
                {
                    feature.set_geometry(wkb::rectangle(extent));
                }
            }
            feature.mark_valid();
            let id = std::mem::take(&mut self.current_feature_id);
            self.ready.push((feature, id));
            self.feature_count += 1;
        }
        self.feature_depth = None;
        self.modes.pop();
    }

    /// Stores a point or line either as the feature geometry or as a
    /// member fragment of the enclosing multi geometry.
    fn emit_simple(&mut self, mode: ParseMode, geometry_type: GeometryType, geometry: Vec<u8>) {
        if mode == ParseMode::Geometry {
            self.current_wkb = geometry;
            self.geometry_type.record(geometry_type);
        } else if !self.fragments.push_fragment(geometry) {
            debug!("No open fragment list, dropping {geometry_type}");
        }
    }

    fn first_fragment_list(&mut self) -> Vec<Vec<u8>> {
        self.fragments.take_all().into_iter().next().unwrap_or_default()
    }

    fn start(&mut self, name: &ElementName, attributes: &[XmlAttribute]) {
        let local = name.local.as_str();
        self.namespace.observe(name.namespace());
        let is_gml = self.namespace.matches(name.namespace());
        let mode = self.modes.top();
        let mut is_geometry = false;

        if mode.captures_geometry() {
            capture_start_tag(
                &mut self.geometry_string,
                local,
                attributes.iter().map(|a| (a.local.as_str(), a.value.as_str())),
            );
        }

        if is_gml && local == "coordinates" {
            self.modes.push(ParseMode::Coordinate);
            self.text.clear();
            self.coords.set_syntax(CoordinateSyntax::coordinates(
                attribute_value(attributes, "cs"),
                attribute_value(attributes, "ts"),
            ));
        } else if is_gml && (local == "pos" || local == "posList") {
            self.modes.push(ParseMode::PosList);
            self.text.clear();
            self.coords.set_syntax(CoordinateSyntax::PosList);
            self.coords
                .resolve_dimension(attribute_value(attributes, "srsDimension"));
        } else if self.is_geometry_attribute(local) {
            self.modes.push(ParseMode::Geometry);
            self.found_unhandled_geometry = false;
            self.geometry_string.clear();
            self.fragments.clear();
        } else if is_gml && local == "boundedBy" {
            self.modes.push(ParseMode::BoundingBox);
            self.current_extent = None;
            self.lower_corner = None;
            self.upper_corner = None;
            self.bounded_by_null = false;
        } else if mode == ParseMode::BoundingBox && is_gml && local == "null" {
            self.modes.push(ParseMode::Null);
            self.bounded_by_null = true;
        } else if mode == ParseMode::BoundingBox && is_gml && local == "Envelope" {
            is_geometry = true;
            self.modes.push(ParseMode::Envelope);
        } else if mode == ParseMode::Envelope && is_gml && local == "lowerCorner" {
            self.modes.push(ParseMode::LowerCorner);
            self.text.clear();
        } else if mode == ParseMode::Envelope && is_gml && local == "upperCorner" {
            self.modes.push(ParseMode::UpperCorner);
            self.text.clear();
        } else if mode == ParseMode::None && self.typename.is_none() && local == TUPLE {
            self.start_feature(ParseMode::Tuple);
            self.current_feature_id.clear();
        } else if mode == ParseMode::Tuple {
            if let Some(geometry) = self.layer_geometry.get(local).cloned() {
                self.start_feature_tuple(local, geometry, attributes);
            }
        } else if mode == ParseMode::None && self.is_typename(local) {
            self.start_feature(ParseMode::Feature);
            self.current_feature_id = match attribute_value(attributes, "fid") {
                Some(fid) if !fid.is_empty() => fid.to_string(),
                _ => self.read_gml_id(attributes).unwrap_or_default(),
            };
        } else if mode == ParseMode::BoundingBox && is_gml && local == "Box" {
            is_geometry = true;
        } else if is_gml && (local == "Point" || local == "LineString") {
            is_geometry = true;
        } else if is_gml && local == "Polygon" {
            is_geometry = true;
            self.fragments.push_list();
        } else if is_gml && local == "MultiPoint" {
            is_geometry = true;
            self.modes.push(ParseMode::MultiPoint);
            self.fragments.push_list();
        } else if is_gml && (local == "MultiLineString" || local == "MultiCurve") {
            is_geometry = true;
            self.modes.push(ParseMode::MultiLine);
            self.fragments.push_list();
        } else if is_gml && (local == "MultiPolygon" || local == "MultiSurface") {
            is_geometry = true;
            self.modes.push(ParseMode::MultiPolygon);
        } else if mode == ParseMode::FeatureTuple {
            let key = composite_key(&self.current_typename, local);
            if self.thematic.contains(&key) {
                self.modes.push(ParseMode::AttributeTuple);
                self.attribute_name = key;
                self.attribute_depth = Some(self.depth);
                self.text.clear();
            }
        } else if mode == ParseMode::Feature {
            if self.thematic.contains(local) {
                self.modes.push(ParseMode::Attribute);
                self.attribute_name = local.to_string();
                self.attribute_depth = Some(self.depth);
                self.text.clear();
            } else if local.eq_ignore_ascii_case("attribute") {
                // <Attribute name="desc" value="My description"/>
                if let Some(attribute) = attribute_value(attributes, "name")
                    && self.thematic.contains(attribute)
                {
                    let value = attribute_value(attributes, "value").unwrap_or_default();
                    self.set_attribute(attribute, value);
                }
            }
        } else if self.depth == 0 && local == "FeatureCollection" {
            self.read_paging_counters(attributes);
        } else if self.depth == 0 && (local == "ExceptionReport" || local == "ServiceExceptionReport")
        {
            self.is_exception = true;
            self.modes.push(ParseMode::ExceptionReport);
        } else if self.is_exception && (local == "ExceptionText" || local == "ServiceException") {
            self.text.clear();
            self.modes.push(ParseMode::ExceptionText);
        } else if self.depth == 1 && local == "truncatedResponse" {
            warn!("Server reported a truncated response");
            self.truncated_response = true;
        } else if !self.geometry_string.is_empty() && !NATIVE_GEOMETRY_PARTS.contains(&local) {
            debug!("Unsupported geometry element <{local}>, using fallback conversion");
            self.found_unhandled_geometry = true;
        }

        if !self.geometry_string.is_empty() {
            is_geometry = true;
        }
        if is_geometry {
            if self.coords.dimension().is_none() {
                self.coords
                    .resolve_dimension(attribute_value(attributes, "srsDimension"));
            }
            if !self.crs.is_resolved()
                && let Some(srs_name) = attribute_value(attributes, "srsName")
            {
                self.crs.resolve(
                    srs_name,
                    self.axis_policy,
                    self.invert_request,
                    self.axis_lookup.as_ref(),
                );
            }
        }

        self.depth += 1;
    }

    fn end(&mut self, name: &ElementName) {
        self.depth = self.depth.saturating_sub(1);
        let local = name.local.as_str();
        let is_gml = self.namespace.matches(name.namespace());
        let mode = self.modes.top();

        if mode == ParseMode::Coordinate && is_gml && local == "coordinates" {
            self.modes.pop();
        } else if mode == ParseMode::PosList && is_gml && (local == "pos" || local == "posList") {
            self.modes.pop();
        } else if mode == ParseMode::AttributeTuple
            && self.attribute_depth == Some(self.depth)
            && composite_key(&self.current_typename, local) == self.attribute_name
        {
            self.finish_attribute();
        } else if mode == ParseMode::Attribute
            && self.attribute_depth == Some(self.depth)
            && local == self.attribute_name
        {
            self.finish_attribute();
        } else if mode == ParseMode::Geometry && self.is_geometry_attribute(local) {
            self.finish_geometry_attribute();
        } else if mode == ParseMode::BoundingBox && is_gml && local == "boundedBy" {
            self.finish_bounded_by();
        } else if mode == ParseMode::Null && is_gml && local == "null" {
            self.modes.pop();
        } else if mode == ParseMode::Envelope && is_gml && local == "Envelope" {
            self.modes.pop();
        } else if mode == ParseMode::LowerCorner && is_gml && local == "lowerCorner" {
            self.finish_corner(mode);
        } else if mode == ParseMode::UpperCorner && is_gml && local == "upperCorner" {
            self.finish_corner(mode);
        } else if mode == ParseMode::FeatureTuple && self.feature_tuple_depth == Some(self.depth) {
            self.modes.pop();
            self.feature_tuple_depth = None;
        } else if ((mode == ParseMode::Tuple && self.typename.is_none() && local == TUPLE)
            || (mode == ParseMode::Feature && self.is_typename(local)))
            && self.feature_depth == Some(self.depth)
        {
            self.finish_feature();
        } else if is_gml && local == "Point" {
            let points = self.coords.points(&self.text, self.invert());
            match points.first() {
                Some(first) => self.emit_simple(mode, GeometryType::Point, wkb::point(*first)),
                None => debug!("Point without coordinates"),
            }
        } else if is_gml && (local == "LineString" || local == "LineStringSegment") {
            let points = self.coords.points(&self.text, self.invert());
            self.emit_simple(mode, GeometryType::LineString, wkb::line_string(&points));
        } else if matches!(mode, ParseMode::Geometry | ParseMode::MultiPolygon)
            && is_gml
            && local == "LinearRing"
        {
            let points = self.coords.points(&self.text, self.invert());
            if !self.fragments.push_fragment(wkb::ring(&points)) {
                debug!("No open fragment list, dropping ring");
            }
        } else if matches!(mode, ParseMode::Geometry | ParseMode::MultiPolygon)
            && is_gml
            && local == "Polygon"
        {
            self.geometry_type.record(GeometryType::Polygon);
            if mode == ParseMode::Geometry {
                let rings = self.first_fragment_list();
                self.current_wkb = wkb::polygon(&rings);
            }
        } else if mode == ParseMode::MultiPoint && is_gml && local == "MultiPoint" {
            self.geometry_type.record(GeometryType::MultiPoint);
            self.modes.pop();
            let points = self.first_fragment_list();
            self.current_wkb = wkb::multi(GeometryType::MultiPoint, &points);
        } else if mode == ParseMode::MultiLine
            && is_gml
            && (local == "MultiLineString" || local == "MultiCurve")
        {
            self.geometry_type.record(GeometryType::MultiLineString);
            self.modes.pop();
            let lines = self.first_fragment_list();
            self.current_wkb = wkb::multi(GeometryType::MultiLineString, &lines);
        } else if mode == ParseMode::MultiPolygon
            && is_gml
            && (local == "MultiPolygon" || local == "MultiSurface")
        {
            self.geometry_type.record(GeometryType::MultiPolygon);
            self.modes.pop();
            let polygons = self.fragments.take_all();
            self.current_wkb = wkb::multi_polygon(&polygons);
        } else if self.depth == 0 && (local == "ExceptionReport" || local == "ServiceExceptionReport")
        {
            self.modes.pop();
        } else if mode == ParseMode::ExceptionText
            && (local == "ExceptionText" || local == "ServiceException")
        {
            if !self.exception_text.is_empty() {
                self.exception_text.push('\n');
            }
            self.exception_text.push_str(&self.text);
            self.modes.pop();
        }

        if !self.geometry_string.is_empty() {
            capture_end_tag(&mut self.geometry_string, local);
        }
    }

    fn chars(&mut self, text: &str) {
        if self.modes.is_empty() {
            return;
        }
        if !self.geometry_string.is_empty() {
            self.geometry_string
                .push_str(&quick_xml::escape::escape(text));
        }
        if self.modes.top().accumulates_text() {
            self.text.push_str(text);
        }
    }
}

impl XmlEventSink for Dispatcher {
    fn start_element(&mut self, name: &ElementName, attributes: &[XmlAttribute]) {
        self.start(name, attributes);
    }

    fn end_element(&mut self, name: &ElementName) {
        self.end(name);
    }

    fn characters(&mut self, text: &str) {
        self.chars(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldType, LayerProperties};

    fn feed(parser: &mut GmlStreamingParser, doc: &str) {
        parser.process_data(doc.as_bytes(), true).unwrap();
    }

    #[test]
    fn new_requires_a_layer() {
        assert!(matches!(
            GmlStreamingParser::new(ParserOptions::new()),
            Err(ConfigError::NoLayers)
        ));
    }

    #[test]
    fn typename_prefix_is_stripped() {
        let parser = GmlStreamingParser::for_type("topp:states", Some("the_geom"), Vec::new());
        assert_eq!(parser.dispatcher.typename.as_deref(), Some("states"));
        assert_eq!(
            parser.dispatcher.geometry_attribute.as_deref(),
            Some("the_geom")
        );
    }

    #[test]
    fn duplicate_geometry_attributes_first_wins() {
        let options = ParserOptions::new().with_layers([
            LayerProperties::new("ns:a", Some("geom")),
            LayerProperties::new("ns:b", None),
            LayerProperties::new("ns:c", Some("shape")),
        ]);
        let parser = GmlStreamingParser::new(options).unwrap();
        assert_eq!(
            parser.ignored_geometry_attributes(),
            &[("ns:c".to_string(), "shape".to_string())]
        );
        assert_eq!(
            parser.dispatcher.layer_geometry.get("a"),
            Some(&Some("geom".to_string()))
        );
        assert_eq!(parser.dispatcher.layer_geometry.get("c"), Some(&None));
        assert!(parser.dispatcher.typename.is_none());
    }

    #[test]
    fn mode_stack_is_empty_after_document() {
        let mut parser = GmlStreamingParser::for_type(
            "t",
            Some("geom"),
            vec![FieldDefinition::new("a", FieldType::Text)],
        );
        feed(
            &mut parser,
            r#"<c xmlns:gml="http://www.opengis.net/gml"><t><a>x</a><geom><gml:Point><gml:coordinates>1,2</gml:coordinates></gml:Point></geom></t></c>"#,
        );
        assert!(parser.parse_modes().is_empty());
        assert_eq!(parser.dispatcher.depth, 0);
        assert_eq!(parser.feature_count(), 1);
        assert_eq!(parser.wkb_type(), GeometryType::Point);
    }

    #[test]
    fn legacy_attribute_encoding() {
        let mut parser = GmlStreamingParser::for_type(
            "t",
            None,
            vec![FieldDefinition::new("desc", FieldType::Text)],
        );
        feed(
            &mut parser,
            r#"<c><t><Attribute name="desc" value="My description"/><attribute name="other" value="x"/></t></c>"#,
        );
        let features = parser.get_and_steal_ready_features();
        assert_eq!(features.len(), 1);
        assert_eq!(
            features[0].0.attribute(0),
            Some(&AttributeValue::Text("My description".into()))
        );
    }

    #[test]
    fn nested_element_with_attribute_name_stays_in_value() {
        let mut parser = GmlStreamingParser::for_type(
            "t",
            None,
            vec![FieldDefinition::new("a", FieldType::Text)],
        );
        feed(&mut parser, "<c><t><a><a>inner</a>tail</a></t></c>");
        let features = parser.get_and_steal_ready_features();
        assert_eq!(
            features[0].0.attribute(0),
            Some(&AttributeValue::Text("innertail".into()))
        );
        assert!(parser.parse_modes().is_empty());
    }

    #[test]
    fn calculate_extent_unions_geometries() {
        let mut a = Feature::new(0, 0);
        a.set_geometry(wkb::point(Coord { x: 1.0, y: 5.0 }));
        let mut b = Feature::new(1, 0);
        b.set_geometry(wkb::point(Coord { x: -3.0, y: 2.0 }));
        let without = Feature::new(2, 0);
        let features = vec![
            (a, String::new()),
            (b, String::new()),
            (without, String::new()),
        ];
        let extent = GmlStreamingParser::calculate_extent(&features).unwrap();
        assert_eq!(extent.min(), Coord { x: -3.0, y: 2.0 });
        assert_eq!(extent.max(), Coord { x: 1.0, y: 5.0 });
        assert!(GmlStreamingParser::calculate_extent(&[]).is_none());
    }
}

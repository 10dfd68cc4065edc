//! Command-line interface for `gmlstream`, an incremental GML/WFS response reader.
//!
//! The binary feeds a saved `GetFeature` response to [`gml_stream`] in fixed
//! size chunks, the way a client would while the response is still arriving,
//! and reports the assembled features or what was learned about the response.
//!
//! # Available Commands
//!
//! - `parse` - Print the features of a response with their geometry as WKT
//! - `info` - Display response diagnostics and the feature schema

mod display;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{Level, debug, info, warn};
use tracing_log::LogTracer;
use tracing_subscriber::FmtSubscriber;

use gml_stream::{
    AxisOrientationPolicy, CurveLinearizer, FeatureWithId, FieldDefinition, GmlStreamingParser,
    LayerProperties, ParserOptions, linearize::DEFAULT_SEGMENTS_PER_CIRCLE,
};

use crate::display::StreamSummary;

const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Parser)]
#[command(
    name = "gmlstream",
    version,
    about = "Incremental GML/WFS response parsing in Rust",
    long_about = "gmlstream reads WFS GetFeature responses (GML 2, 3.1 and 3.2) chunk by chunk\n\
                  and turns them into feature records with WKB geometries."
)]
/// Command-line arguments and options for the `gmlstream` CLI.
struct Cli {
    /// Enable verbose (INFO level) logging output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug (DEBUG level) logging output with detailed diagnostics.
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Options describing the features expected in the response.
#[derive(Args, Debug, Clone)]
struct StreamArgs {
    /// Path to the GML/WFS response.
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Feature typename, optionally prefixed (e.g. "`topp:states`").
    #[arg(short, long, value_name = "TYPENAME")]
    typename: String,

    /// Name of the geometry property of the features.
    #[arg(short, long, value_name = "NAME")]
    geometry_attribute: Option<String>,

    /// Thematic field as `name` or `name:type` (text, integer, integer64, double, timestamp).
    #[arg(short, long = "field", value_name = "FIELD")]
    fields: Vec<FieldDefinition>,

    /// Number of bytes fed to the parser at a time.
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Request swapped coordinate axes.
    #[arg(long)]
    invert_axis: bool,

    /// How the axis order of the response CRS is honoured.
    #[arg(long, value_name = "POLICY", default_value_t = AxisOrientationPolicy::default())]
    axis_policy: AxisOrientationPolicy,

    /// Chords used to approximate a full circle when linearizing arcs.
    #[arg(long, value_name = "N", default_value_t = DEFAULT_SEGMENTS_PER_CIRCLE)]
    arc_segments: usize,

    /// Leave curved and patch-based geometries empty instead of linearizing them.
    #[arg(long)]
    skip_curves: bool,
}

impl StreamArgs {
    fn parser_options(&self) -> ParserOptions {
        ParserOptions::new()
            .with_layer(LayerProperties::new(
                &self.typename,
                self.geometry_attribute.as_deref(),
            ))
            .with_fields(self.fields.iter().cloned())
            .with_axis_policy(self.axis_policy)
            .with_invert_axis(self.invert_axis)
    }

    fn curve_converter(&self) -> Option<CurveLinearizer> {
        (!self.skip_curves).then(|| CurveLinearizer::new(self.arc_segments))
    }
}

/// Available subcommands for the `gmlstream` CLI.
#[derive(Subcommand)]
enum Commands {
    /// Prints the features of a response.
    Parse {
        #[command(flatten)]
        stream: StreamArgs,

        /// Stop after this many features.
        #[arg(short, long, value_name = "N")]
        limit: Option<usize>,
    },

    /// Displays diagnostics about a response: CRS, extent, paging counters,
    /// truncation, exceptions and the schema of the produced features.
    Info {
        #[command(flatten)]
        stream: StreamArgs,
    },
}

/// Entry point for the `gmlstream` command-line interface.
///
/// # Errors
///
/// Returns an error if the response cannot be read or parsed, or if the
/// logging system cannot be initialized.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug {
        Level::DEBUG
    } else if cli.verbose {
        Level::INFO
    } else {
        Level::WARN
    };

    // Bridge logs from the `log` crate to the `tracing` ecosystem.
    LogTracer::init()?;

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Parse { stream, limit } => {
            info!("Parsing {}", stream.input.display());
            handle_parse(&stream, limit).await?;
        },
        Commands::Info { stream } => {
            info!("Displaying info for {}", stream.input.display());
            handle_info(&stream).await?;
        },
    }

    Ok(())
}

/// Result of streaming a file through the parser.
struct StreamOutcome {
    parser: GmlStreamingParser,
    features: Vec<FeatureWithId>,
}

/// Feeds `path` to a new parser in chunks, draining ready features after each
/// chunk. Reading stops early once `limit` features have been collected.
async fn stream_file(
    path: &Path,
    options: ParserOptions,
    converter: Option<CurveLinearizer>,
    chunk_size: usize,
    limit: Option<usize>,
) -> Result<StreamOutcome> {
    if chunk_size == 0 {
        return Err(anyhow!("Chunk size must be at least one byte."));
    }
    let mut parser = GmlStreamingParser::new(options)?;
    if let Some(converter) = converter {
        parser = parser.with_fallback_converter(converter);
    }
    let mut file = File::open(path)
        .await
        .with_context(|| format!("Failed to open '{}'", path.display()))?;

    let mut buffer = vec![0u8; chunk_size];
    let mut features = Vec::new();
    let mut chunks = 0usize;
    loop {
        let read = file
            .read(&mut buffer)
            .await
            .with_context(|| format!("Failed to read '{}'", path.display()))?;
        let at_end = read == 0;
        parser
            .process_data(&buffer[..read], at_end)
            .with_context(|| format!("Failed to parse '{}'", path.display()))?;
        chunks += 1;

        let ready = parser.get_and_steal_ready_features();
        if !ready.is_empty() {
            debug!("Chunk {chunks}: {} feature(s) ready", ready.len());
        }
        features.extend(ready);

        if let Some(limit) = limit
            && features.len() >= limit
        {
            features.truncate(limit);
            debug!("Feature limit {limit} reached after {chunks} chunk(s)");
            break;
        }
        if at_end {
            break;
        }
    }

    Ok(StreamOutcome { parser, features })
}

fn summarize(dataset: &Path, outcome: &StreamOutcome) -> StreamSummary {
    let parser = &outcome.parser;
    let extent = parser
        .layer_extent()
        .map(|r| (r, false))
        .or_else(|| GmlStreamingParser::calculate_extent(&outcome.features).map(|r| (r, true)))
        .map(|(r, computed)| ([r.min().x, r.min().y, r.max().x, r.max().y], computed));

    StreamSummary {
        dataset: dataset.display().to_string(),
        gml_version: parser.gml_version(),
        geometry_type: parser.wkb_type(),
        crs: parser.crs_identifier(),
        srs_name: parser.srs_name().map(str::to_string),
        axis_inverted: parser.invert_axis_orientation(),
        extent,
        feature_count: parser.feature_count(),
        number_returned: parser.number_returned(),
        number_matched: parser.number_matched(),
        truncated: parser.is_truncated_response(),
        exception: parser
            .is_exception()
            .then(|| parser.exception_text().to_string()),
        ignored_geometry_attributes: parser.ignored_geometry_attributes().to_vec(),
    }
}

async fn handle_parse(stream: &StreamArgs, limit: Option<usize>) -> Result<()> {
    let outcome = stream_file(
        &stream.input,
        stream.parser_options(),
        stream.curve_converter(),
        stream.chunk_size,
        limit,
    )
    .await?;
    let parser = &outcome.parser;

    if parser.is_exception() {
        return Err(anyhow!(
            "Server returned an exception: {}",
            parser.exception_text()
        ));
    }
    if parser.is_truncated_response() {
        warn!("The server truncated the response; features may be missing");
    }

    display::display_features(parser.fields(), &outcome.features, parser.feature_count());
    Ok(())
}

async fn handle_info(stream: &StreamArgs) -> Result<()> {
    let outcome = stream_file(
        &stream.input,
        stream.parser_options(),
        stream.curve_converter(),
        stream.chunk_size,
        None,
    )
    .await?;
    let summary = summarize(&stream.input, &outcome);
    display::display_summary(&summary, outcome.parser.fields());
    Ok(())
}

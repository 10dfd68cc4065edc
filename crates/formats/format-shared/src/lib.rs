//! Error and position types shared by the streaming format readers.

use std::error::Error as StdError;
use std::fmt;

/// A position within a streamed source document.
///
/// Line and column are 1-based to align with human expectations; the column
/// counts characters, not bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourcePosition {
    /// Line number in the source (1-based)
    pub line: Option<u64>,
    /// Column number in the source (1-based, in characters)
    pub column: Option<u64>,
    /// Byte offset from the start of the stream
    pub byte_offset: Option<u64>,
    /// Qualified name of the element being processed, if any
    pub element: Option<String>,
}

impl SourcePosition {
    /// Creates a position from a line, a column and an absolute byte offset.
    #[must_use]
    pub fn at(line: u64, column: u64, byte_offset: u64) -> Self {
        Self {
            line: Some(line),
            column: Some(column),
            byte_offset: Some(byte_offset),
            element: None,
        }
    }

    /// Attaches the name of the element being processed.
    #[must_use]
    pub fn with_element(mut self, element: impl Into<String>) -> Self {
        self.element = Some(element.into());
        self
    }

    /// Returns true when the position does not contain any location metadata.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.line.is_none()
            && self.column.is_none()
            && self.byte_offset.is_none()
            && self.element.is_none()
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();

        if let Some(line) = self.line {
            parts.push(format!("line {line}"));
        }
        if let Some(column) = self.column {
            parts.push(format!("column {column}"));
        }
        if let Some(byte) = self.byte_offset {
            parts.push(format!("byte {byte}"));
        }
        if let Some(element) = &self.element {
            parts.push(format!("element <{element}>"));
        }

        if parts.is_empty() {
            write!(f, "unknown position")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}

/// Errors that can occur when reading streamed spatial formats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpatialFormatReadError {
    /// The input is not well-formed.
    Parse {
        /// Human readable description of the failure.
        message: String,
        /// Optional position describing where the failure occurred.
        position: Option<SourcePosition>,
        /// Optional context describing what was being read.
        context: Option<String>,
    },
    /// Other error type not classified above.
    Other {
        /// Human readable description of the failure.
        message: String,
    },
}

impl SpatialFormatReadError {
    fn fmt_context(context: Option<&str>) -> String {
        context
            .map(|c| format!(" while reading {c}"))
            .unwrap_or_default()
    }

    fn fmt_position(position: Option<&SourcePosition>) -> String {
        position.map(|pos| format!(" at {pos}")).unwrap_or_default()
    }

    /// Builds a [`SpatialFormatReadError::Parse`] located at `position`.
    #[must_use]
    pub fn parse_at(message: impl Into<String>, position: SourcePosition) -> Self {
        SpatialFormatReadError::Parse {
            message: message.into(),
            position: Some(position),
            context: None,
        }
    }

    /// The source position attached to a parse error, if any.
    #[must_use]
    pub fn position(&self) -> Option<&SourcePosition> {
        match self {
            SpatialFormatReadError::Parse { position, .. } => position.as_ref(),
            SpatialFormatReadError::Other { .. } => None,
        }
    }

    /// Attach additional context to the error, returning the updated error.
    #[must_use]
    pub fn with_additional_context(mut self, context: impl Into<String>) -> Self {
        let context = context.into();
        match &mut self {
            SpatialFormatReadError::Parse {
                context: existing, ..
            } => match existing {
                Some(existing) if !existing.is_empty() => {
                    existing.push_str("; ");
                    existing.push_str(&context);
                },
                _ => *existing = Some(context),
            },
            SpatialFormatReadError::Other { message } => {
                message.push_str(" (");
                message.push_str(&context);
                message.push(')');
            },
        }
        self
    }
}

impl fmt::Display for SpatialFormatReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpatialFormatReadError::Parse {
                message,
                position,
                context,
            } => write!(
                f,
                "Parse error{}{}: {message}",
                Self::fmt_context(context.as_deref()),
                Self::fmt_position(position.as_ref())
            ),
            SpatialFormatReadError::Other { message } => f.write_str(message),
        }
    }
}

impl StdError for SpatialFormatReadError {}

/// Result type alias that uses [`SpatialFormatReadError`].
pub type SpatialFormatResult<T> = Result<T, SpatialFormatReadError>;

//! Parse modes and the explicit mode stack driving the dispatcher.

/// The XML context the parser is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParseMode {
    None,
    Geometry,
    Coordinate,
    PosList,
    BoundingBox,
    Null,
    Envelope,
    LowerCorner,
    UpperCorner,
    MultiPoint,
    MultiLine,
    MultiPolygon,
    Tuple,
    Feature,
    FeatureTuple,
    Attribute,
    AttributeTuple,
    ExceptionReport,
    ExceptionText,
}

impl ParseMode {
    /// Modes in which raw start tags are captured for the GML fallback.
    #[must_use]
    pub fn captures_geometry(self) -> bool {
        matches!(
            self,
            ParseMode::Geometry
                | ParseMode::Coordinate
                | ParseMode::PosList
                | ParseMode::MultiPoint
                | ParseMode::MultiLine
                | ParseMode::MultiPolygon
        )
    }

    /// Modes whose character data is accumulated.
    #[must_use]
    pub fn accumulates_text(self) -> bool {
        matches!(
            self,
            ParseMode::Attribute
                | ParseMode::AttributeTuple
                | ParseMode::Coordinate
                | ParseMode::PosList
                | ParseMode::LowerCorner
                | ParseMode::UpperCorner
                | ParseMode::ExceptionText
        )
    }
}

/// Stack of open recognised elements. The top is the innermost one.
#[derive(Debug, Clone, Default)]
pub struct ModeStack {
    modes: Vec<ParseMode>,
}

impl ModeStack {
    /// The innermost mode, or [`ParseMode::None`] when nothing is open.
    #[must_use]
    pub fn top(&self) -> ParseMode {
        self.modes.last().copied().unwrap_or(ParseMode::None)
    }

    pub fn push(&mut self, mode: ParseMode) {
        self.modes.push(mode);
    }

    pub fn pop(&mut self) -> Option<ParseMode> {
        self.modes.pop()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }

    /// The open modes, outermost first.
    #[must_use]
    pub fn as_slice(&self) -> &[ParseMode] {
        &self.modes
    }
}

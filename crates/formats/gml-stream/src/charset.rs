//! Character set handling for responses that are not UTF-8.
//!
//! The XML reader only understands UTF-8. Servers still answer in
//! ISO-8859-1 or UTF-16 now and then, so the first bytes of a response are
//! held back until the byte order mark or the `encoding` of the XML
//! declaration is known, and everything after that is transcoded with
//! `encoding_rs`.

use std::borrow::Cow;
use std::fmt;
use std::mem;

use encoding_rs::{CoderResult, Decoder, Encoding, UTF_8};
use format_shared::{SpatialFormatReadError, SpatialFormatResult};
use quick_xml::Reader;
use quick_xml::events::Event;

/// Largest prefix searched for the end of an XML declaration.
const DECLARATION_LIMIT: usize = 1024;

const XML_DECLARATION_START: &[u8] = b"<?xml";

enum State {
    Sniffing(Vec<u8>),
    Utf8,
    Transcoding(Decoder),
}

/// Converts a response to UTF-8 chunk by chunk.
pub struct ResponseDecoder {
    state: State,
    encoding: &'static Encoding,
}

impl fmt::Debug for ResponseDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            State::Sniffing(head) => format!("sniffing ({} bytes)", head.len()),
            State::Utf8 => "utf-8".to_string(),
            State::Transcoding(_) => "transcoding".to_string(),
        };
        f.debug_struct("ResponseDecoder")
            .field("state", &state)
            .field("encoding", &self.encoding.name())
            .finish()
    }
}

impl Default for ResponseDecoder {
    fn default() -> Self {
        Self {
            state: State::Sniffing(Vec::new()),
            encoding: UTF_8,
        }
    }
}

impl ResponseDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The detected encoding. UTF-8 until the declaration has been seen.
    #[must_use]
    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    /// Returns the UTF-8 text of `data`. The result is empty while the
    /// encoding is still undecided.
    ///
    /// # Errors
    ///
    /// Fails when the declaration names an encoding that is not known.
    pub fn decode<'a>(&mut self, data: &'a [u8], last: bool) -> SpatialFormatResult<Cow<'a, [u8]>> {
        let head = match &mut self.state {
            State::Utf8 => return Ok(Cow::Borrowed(data)),
            State::Transcoding(decoder) => {
                return Ok(Cow::Owned(transcode(decoder, data, last)));
            },
            State::Sniffing(head) => {
                head.extend_from_slice(data);
                match sniff(head, last)? {
                    Some(encoding) => {
                        self.encoding = encoding;
                        mem::take(head)
                    },
                    None => return Ok(Cow::Borrowed(&[])),
                }
            },
        };

        if self.encoding == UTF_8 {
            self.state = State::Utf8;
            return Ok(Cow::Owned(head));
        }
        log::debug!("Transcoding response from {}", self.encoding.name());
        let mut decoder = self.encoding.new_decoder_with_bom_removal();
        let text = transcode(&mut decoder, &head, last);
        self.state = State::Transcoding(decoder);
        Ok(Cow::Owned(text))
    }
}

fn sniff(head: &[u8], last: bool) -> SpatialFormatResult<Option<&'static Encoding>> {
    if let Some((encoding, _)) = Encoding::for_bom(head) {
        return Ok(Some(encoding));
    }
    if head.len() < XML_DECLARATION_START.len() && !last {
        return Ok(None);
    }
    if !head.starts_with(XML_DECLARATION_START) {
        return Ok(Some(UTF_8));
    }
    let Some(end) = head.windows(2).position(|w| w == b"?>") else {
        if last || head.len() >= DECLARATION_LIMIT {
            return Ok(Some(UTF_8));
        }
        return Ok(None);
    };

    let mut reader = Reader::from_reader(&head[..end + 2]);
    let label = match reader.read_event() {
        Ok(Event::Decl(declaration)) => match declaration.encoding() {
            Some(Ok(label)) => label.into_owned(),
            _ => return Ok(Some(UTF_8)),
        },
        // Malformed declarations are reported by the XML reader.
        _ => return Ok(Some(UTF_8)),
    };
    Encoding::for_label(&label).map(Some).ok_or_else(|| {
        SpatialFormatReadError::Other {
            message: format!(
                "unsupported encoding '{}'",
                String::from_utf8_lossy(&label)
            ),
        }
    })
}

fn transcode(decoder: &mut Decoder, data: &[u8], last: bool) -> Vec<u8> {
    let capacity = decoder
        .max_utf8_buffer_length(data.len())
        .unwrap_or(data.len() * 3);
    let mut text = String::with_capacity(capacity);
    let mut input = data;
    loop {
        let (result, read, _) = decoder.decode_to_string(input, &mut text, last);
        input = &input[read..];
        match result {
            CoderResult::InputEmpty => break,
            CoderResult::OutputFull => text.reserve(input.len() * 3 + 4),
        }
    }
    text.into_bytes()
}

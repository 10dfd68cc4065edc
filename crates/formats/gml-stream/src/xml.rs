//! Incremental XML event source.
//!
//! A WFS response arrives in arbitrary chunks. quick-xml's tokio reader can
//! be suspended in the middle of any token, so the whole read loop lives in
//! a single boxed future owning an [`NsReader`]. [`XmlEventSource::feed`]
//! hands it the next chunk, polls it once and forwards the events it
//! produced until it runs out of input again. Tokenizing, namespace scopes
//! and end tag matching all stay inside quick-xml.

use std::future::Future;
use std::io;
use std::mem;
use std::pin::Pin;
use std::str;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

use format_shared::{SourcePosition, SpatialFormatReadError, SpatialFormatResult};
use quick_xml::NsReader;
use quick_xml::errors::IllFormedError;
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use tokio::io::{AsyncBufRead, AsyncRead, ReadBuf};

use crate::charset::ResponseDecoder;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// A namespace-resolved element name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementName {
    /// Namespace URI, `None` when the element is in no namespace
    pub namespace: Option<String>,
    /// Local part of the name
    pub local: String,
}

impl ElementName {
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }
}

/// A namespace-resolved attribute. Namespace declarations are not reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlAttribute {
    /// Namespace URI; unprefixed attributes have none
    pub namespace: Option<String>,
    pub local: String,
    /// Value with entity and character references resolved
    pub value: String,
}

/// Value of the unprefixed attribute `local`.
#[must_use]
pub fn attribute_value<'a>(attributes: &'a [XmlAttribute], local: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|a| a.namespace.is_none() && a.local == local)
        .map(|a| a.value.as_str())
}

/// Value of the attribute `local` in `namespace`.
#[must_use]
pub fn attribute_value_ns<'a>(
    attributes: &'a [XmlAttribute],
    namespace: &str,
    local: &str,
) -> Option<&'a str> {
    attributes
        .iter()
        .find(|a| a.namespace.as_deref() == Some(namespace) && a.local == local)
        .map(|a| a.value.as_str())
}

/// Receiver of the events produced by [`XmlEventSource::feed`].
pub trait XmlEventSink {
    fn start_element(&mut self, name: &ElementName, attributes: &[XmlAttribute]);
    fn end_element(&mut self, name: &ElementName);
    /// Character data. A single text node may be delivered in several pieces.
    fn characters(&mut self, text: &str);
}

#[derive(Debug, Clone, Copy)]
struct TextPosition {
    line: u64,
    column: u64,
    offset: u64,
}

impl Default for TextPosition {
    fn default() -> Self {
        Self {
            line: 1,
            column: 1,
            offset: 0,
        }
    }
}

impl TextPosition {
    fn advanced(mut self, bytes: &[u8]) -> Self {
        for &byte in bytes {
            if byte == b'\n' {
                self.line += 1;
                self.column = 1;
            } else if byte & 0b1100_0000 != 0b1000_0000 {
                self.column += 1;
            }
        }
        self.offset += bytes.len() as u64;
        self
    }

    fn source_position(self) -> SourcePosition {
        SourcePosition::at(self.line, self.column, self.offset)
    }
}

#[derive(Debug)]
enum XmlEvent {
    Start(ElementName, Vec<XmlAttribute>),
    End(ElementName),
    Text(String),
}

/// State shared between [`XmlEventSource`] and the suspended read loop.
#[derive(Debug, Default)]
struct Exchange {
    input: Vec<u8>,
    at_end: bool,
    events: Vec<XmlEvent>,
    /// Offset just past the last complete event
    consumed: u64,
}

fn lock(exchange: &Mutex<Exchange>) -> MutexGuard<'_, Exchange> {
    exchange.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Byte source that reports `Pending` instead of end of file until the
/// final chunk has been handed over.
struct ChunkReader {
    exchange: Arc<Mutex<Exchange>>,
    buffer: Vec<u8>,
    position: usize,
}

impl ChunkReader {
    /// Makes unread bytes available. Returns false while waiting for input.
    fn refill(&mut self) -> bool {
        if self.position < self.buffer.len() {
            return true;
        }
        let mut exchange = lock(&self.exchange);
        if exchange.input.is_empty() {
            return exchange.at_end;
        }
        self.buffer.clear();
        self.position = 0;
        mem::swap(&mut self.buffer, &mut exchange.input);
        true
    }
}

impl AsyncRead for ChunkReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.refill() {
            return Poll::Pending;
        }
        let available = &this.buffer[this.position..];
        let amount = available.len().min(buf.remaining());
        buf.put_slice(&available[..amount]);
        this.position += amount;
        Poll::Ready(Ok(()))
    }
}

impl AsyncBufRead for ChunkReader {
    fn poll_fill_buf(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<&[u8]>> {
        let this = self.get_mut();
        if this.refill() {
            Poll::Ready(Ok(&this.buffer[this.position..]))
        } else {
            Poll::Pending
        }
    }

    fn consume(self: Pin<&mut Self>, amount: usize) {
        let this = self.get_mut();
        this.position = (this.position + amount).min(this.buffer.len());
    }
}

/// Why the read loop stopped, and where.
#[derive(Debug)]
struct Failure {
    message: String,
    offset: u64,
    element: Option<String>,
}

impl Failure {
    fn new(message: impl Into<String>, offset: u64, open: &[String]) -> Self {
        Self {
            message: message.into(),
            offset,
            element: open.last().cloned(),
        }
    }
}

type ReadLoop = Pin<Box<dyn Future<Output = Result<(), Failure>> + Send>>;

/// Push-style XML tokenizer fed with byte chunks.
pub struct XmlEventSource {
    decoder: ResponseDecoder,
    exchange: Arc<Mutex<Exchange>>,
    read_loop: Option<ReadLoop>,
    /// Position just past the last complete event
    position: TextPosition,
    /// Decoded input from `position` on
    retained: Vec<u8>,
    error: Option<SpatialFormatReadError>,
}

impl std::fmt::Debug for XmlEventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XmlEventSource")
            .field("decoder", &self.decoder)
            .field("position", &self.position)
            .field("pending", &self.retained.len())
            .field("finished", &self.read_loop.is_none())
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl Default for XmlEventSource {
    fn default() -> Self {
        Self::new()
    }
}

impl XmlEventSource {
    #[must_use]
    pub fn new() -> Self {
        let exchange = Arc::new(Mutex::new(Exchange::default()));
        let mut reader = NsReader::from_reader(ChunkReader {
            exchange: Arc::clone(&exchange),
            buffer: Vec::new(),
            position: 0,
        });
        reader.config_mut().expand_empty_elements = true;

        Self {
            decoder: ResponseDecoder::new(),
            read_loop: Some(Box::pin(read_events(reader, Arc::clone(&exchange)))),
            exchange,
            position: TextPosition::default(),
            retained: Vec::new(),
            error: None,
        }
    }

    /// Number of bytes received but not part of a complete event yet.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.retained.len()
    }

    /// Appends `data` and delivers every event that can be completed.
    ///
    /// Markup cut by the chunk boundary is finished on the next call. With
    /// `at_end` set, the input must form a complete document. Once an error
    /// has been returned, every later call returns it again.
    pub fn feed<S: XmlEventSink>(
        &mut self,
        data: &[u8],
        at_end: bool,
        sink: &mut S,
    ) -> SpatialFormatResult<()> {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        if self.read_loop.is_none() {
            return Err(SpatialFormatReadError::parse_at(
                "parsing finished",
                self.position.source_position(),
            ));
        }

        let text = match self.decoder.decode(data, at_end) {
            Ok(text) => text,
            Err(error) => return Err(self.fail(error)),
        };
        let text = if self.position.offset == 0 && self.retained.is_empty() {
            text.strip_prefix(UTF8_BOM).unwrap_or(&text[..])
        } else {
            &text[..]
        };
        self.retained.extend_from_slice(text);
        {
            let mut exchange = lock(&self.exchange);
            exchange.input.extend_from_slice(text);
            exchange.at_end = at_end;
        }

        let Some(read_loop) = self.read_loop.as_mut() else {
            return Ok(());
        };
        let outcome = read_loop
            .as_mut()
            .poll(&mut Context::from_waker(Waker::noop()));

        let (events, consumed) = {
            let mut exchange = lock(&self.exchange);
            (mem::take(&mut exchange.events), exchange.consumed)
        };
        for event in &events {
            match event {
                XmlEvent::Start(name, attributes) => sink.start_element(name, attributes),
                XmlEvent::End(name) => sink.end_element(name),
                XmlEvent::Text(text) => sink.characters(text),
            }
        }

        match outcome {
            Poll::Pending if at_end => {
                let position = self.position_at(u64::MAX);
                Err(self.fail(SpatialFormatReadError::parse_at(
                    "unexpected end of input",
                    position,
                )))
            },
            Poll::Pending => {
                self.advance_to(consumed);
                Ok(())
            },
            Poll::Ready(Ok(())) => {
                self.advance_to(u64::MAX);
                self.read_loop = None;
                Ok(())
            },
            Poll::Ready(Err(failure)) => {
                let mut position = self.position_at(failure.offset);
                if let Some(element) = failure.element {
                    position = position.with_element(element);
                }
                Err(self.fail(SpatialFormatReadError::parse_at(failure.message, position)))
            },
        }
    }

    fn fail(&mut self, error: SpatialFormatReadError) -> SpatialFormatReadError {
        self.read_loop = None;
        self.error = Some(error.clone());
        error
    }

    fn retained_until(&self, offset: u64) -> usize {
        usize::try_from(offset.saturating_sub(self.position.offset))
            .unwrap_or(usize::MAX)
            .min(self.retained.len())
    }

    fn position_at(&self, offset: u64) -> SourcePosition {
        let end = self.retained_until(offset);
        self.position
            .advanced(&self.retained[..end])
            .source_position()
    }

    fn advance_to(&mut self, offset: u64) {
        let end = self.retained_until(offset);
        self.position = self.position.advanced(&self.retained[..end]);
        self.retained.drain(..end);
    }
}

/// The suspended read loop. Ends with the document or the first error.
async fn read_events(
    mut reader: NsReader<ChunkReader>,
    exchange: Arc<Mutex<Exchange>>,
) -> Result<(), Failure> {
    let mut buf = Vec::new();
    let mut open: Vec<String> = Vec::new();
    let mut seen_root = false;

    loop {
        buf.clear();
        let start = reader.buffer_position();
        let event = match reader.read_event_into_async(&mut buf).await {
            Ok(event) => event,
            Err(err) => {
                return Err(Failure::new(describe(&err), reader.error_position(), &open));
            },
        };

        let produced = match event {
            Event::Start(tag) => {
                if open.is_empty() {
                    if seen_root {
                        return Err(Failure::new("junk after document element", start, &open));
                    }
                    seen_root = true;
                }
                let (name, attributes) =
                    resolve_start(&reader, &tag).map_err(|m| Failure::new(m, start, &open))?;
                let tag_name = tag.name();
                let qname = utf8(tag_name.as_ref()).map_err(|m| Failure::new(m, start, &open))?;
                open.push(qname.to_string());
                Some(XmlEvent::Start(name, attributes))
            },
            Event::End(tag) => {
                let (namespace, local) = reader.resolve_element(tag.name());
                let name = element_name(namespace, local.as_ref())
                    .map_err(|m| Failure::new(m, start, &open))?;
                open.pop();
                Some(XmlEvent::End(name))
            },
            Event::Text(text) => {
                let text = text
                    .decode()
                    .map_err(|e| Failure::new(e.to_string(), start, &open))?;
                characters(&text, &open).map_err(|m| Failure::new(m, start, &open))?
            },
            Event::CData(cdata) => {
                let text = cdata
                    .decode()
                    .map_err(|e| Failure::new(e.to_string(), start, &open))?;
                characters(&text, &open).map_err(|m| Failure::new(m, start, &open))?
            },
            Event::GeneralRef(reference) => {
                let text = match reference.resolve_char_ref() {
                    Ok(Some(ch)) => Ok(ch.to_string()),
                    Ok(None) => reference
                        .decode()
                        .map_err(|e| e.to_string())
                        .and_then(|name| match resolve_predefined_entity(&name) {
                            Some(text) => Ok(text.to_string()),
                            None => Err(format!("undefined entity &{name};")),
                        }),
                    Err(err) => Err(err.to_string()),
                };
                text.and_then(|t| characters(&t, &open))
                    .map_err(|m| Failure::new(m, start, &open))?
            },
            Event::Eof => {
                let end = reader.buffer_position();
                if let Some(qname) = open.last() {
                    return Err(Failure::new(format!("unclosed element <{qname}>"), end, &open));
                }
                if !seen_root {
                    return Err(Failure::new("no element found", end, &open));
                }
                return Ok(());
            },
            _ => None,
        };

        let mut shared = lock(&exchange);
        if let Some(event) = produced {
            shared.events.push(event);
        }
        shared.consumed = reader.buffer_position();
    }
}

fn describe(err: &quick_xml::Error) -> String {
    match err {
        quick_xml::Error::IllFormed(IllFormedError::MismatchedEndTag { expected, found }) => {
            format!("mismatched tag: expected </{expected}>, found </{found}>")
        },
        quick_xml::Error::IllFormed(IllFormedError::UnmatchedEndTag(name)) => {
            format!("unexpected closing tag </{name}>")
        },
        other => other.to_string(),
    }
}

fn characters(text: &str, open: &[String]) -> Result<Option<XmlEvent>, String> {
    if open.is_empty() {
        if text.trim().is_empty() {
            return Ok(None);
        }
        return Err("text outside the document element".to_string());
    }
    Ok((!text.is_empty()).then(|| XmlEvent::Text(text.to_string())))
}

fn resolve_start(
    reader: &NsReader<ChunkReader>,
    tag: &BytesStart<'_>,
) -> Result<(ElementName, Vec<XmlAttribute>), String> {
    let (namespace, local) = reader.resolve_element(tag.name());
    let name = element_name(namespace, local.as_ref())?;

    let mut attributes = Vec::new();
    for attribute in tag.attributes() {
        let attribute = attribute.map_err(|e| e.to_string())?;
        if attribute.key.as_namespace_binding().is_some() {
            continue;
        }
        let (namespace, local) = reader.resolve_attribute(attribute.key);
        attributes.push(XmlAttribute {
            namespace: namespace_uri(namespace)?,
            local: utf8(local.as_ref())?.to_string(),
            value: attribute
                .unescape_value()
                .map_err(|e| e.to_string())?
                .into_owned(),
        });
    }
    Ok((name, attributes))
}

fn element_name(namespace: ResolveResult<'_>, local: &[u8]) -> Result<ElementName, String> {
    Ok(ElementName {
        namespace: namespace_uri(namespace)?,
        local: utf8(local)?.to_string(),
    })
}

fn namespace_uri(namespace: ResolveResult<'_>) -> Result<Option<String>, String> {
    match namespace {
        ResolveResult::Bound(uri) => utf8(uri.0).map(|uri| Some(uri.to_string())),
        ResolveResult::Unbound => Ok(None),
        ResolveResult::Unknown(prefix) => Err(format!(
            "unbound prefix '{}'",
            String::from_utf8_lossy(&prefix)
        )),
    }
}

fn utf8(bytes: &[u8]) -> Result<&str, String> {
    str::from_utf8(bytes).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl XmlEventSink for Recorder {
        fn start_element(&mut self, name: &ElementName, attributes: &[XmlAttribute]) {
            let attrs: Vec<String> = attributes
                .iter()
                .map(|a| format!("{}={}", a.local, a.value))
                .collect();
            self.events.push(format!(
                "start {}|{} [{}]",
                name.namespace().unwrap_or("-"),
                name.local,
                attrs.join(",")
            ));
        }

        fn end_element(&mut self, name: &ElementName) {
            self.events.push(format!("end {}", name.local));
        }

        fn characters(&mut self, text: &str) {
            match self.events.last_mut() {
                Some(last) if last.starts_with("text ") => last.push_str(text),
                _ => self.events.push(format!("text {text}")),
            }
        }
    }

    const DOC: &str = r#"<?xml version="1.0"?>
<!-- generated -->
<a:root xmlns:a="urn:a" xmlns="urn:default"><child x="1 &amp; 2">hi &lt;there&gt; &#65;<![CDATA[<b>]]></child><a:empty/></a:root>"#;

    fn expected() -> Vec<String> {
        vec![
            "start urn:a|root []".to_string(),
            "start urn:default|child [x=1 & 2]".to_string(),
            "text hi <there> A<b>".to_string(),
            "end child".to_string(),
            "start urn:a|empty []".to_string(),
            "end empty".to_string(),
            "end root".to_string(),
        ]
    }

    #[test]
    fn whole_document() {
        let mut source = XmlEventSource::new();
        let mut recorder = Recorder::default();
        source.feed(DOC.as_bytes(), true, &mut recorder).unwrap();
        assert_eq!(recorder.events, expected());
    }

    #[test]
    fn byte_by_byte() {
        let mut source = XmlEventSource::new();
        let mut recorder = Recorder::default();
        for byte in DOC.as_bytes() {
            source
                .feed(std::slice::from_ref(byte), false, &mut recorder)
                .unwrap();
        }
        source.feed(&[], true, &mut recorder).unwrap();
        assert_eq!(recorder.events, expected());
        assert_eq!(source.pending_len(), 0);
    }

    #[test]
    fn events_arrive_before_the_end() {
        let mut source = XmlEventSource::new();
        let mut recorder = Recorder::default();
        source
            .feed(b"<root><a>one</a><b x=\"", false, &mut recorder)
            .unwrap();
        assert_eq!(recorder.events, ["start -|root []", "start -|a []", "text one", "end a"]);
        assert_eq!(source.pending_len(), 6);
    }

    #[test]
    fn mismatched_tag_reports_line_and_column() {
        let mut source = XmlEventSource::new();
        let mut recorder = Recorder::default();
        let err = source
            .feed(b"<root>\n  <a></b>\n</root>", true, &mut recorder)
            .unwrap_err();
        match &err {
            SpatialFormatReadError::Parse {
                message, position, ..
            } => {
                assert!(message.contains("mismatched tag"), "got {message}");
                let position = position.as_ref().unwrap();
                assert_eq!(position.line, Some(2));
                assert_eq!(position.column, Some(6));
                assert_eq!(position.element.as_deref(), Some("a"));
            },
            _ => panic!("Expected Parse error"),
        }

        // The error is latched.
        assert_eq!(source.feed(b"", true, &mut recorder).unwrap_err(), err);
    }

    #[test]
    fn syntax_error_is_fatal_before_the_end() {
        let mut source = XmlEventSource::new();
        let mut recorder = Recorder::default();
        let err = source
            .feed(b"<c><t><a>one</a></t><!x><t><a>two</a></t>", false, &mut recorder)
            .unwrap_err();
        assert_eq!(err.position().and_then(|p| p.column), Some(21));
        assert!(recorder.events.contains(&"end t".to_string()));
        assert!(!recorder.events.contains(&"text two".to_string()));

        let padding = vec![b' '; 100_000];
        assert_eq!(source.feed(&padding, false, &mut recorder).unwrap_err(), err);
    }

    #[test]
    fn truncated_input_is_only_fatal_at_end() {
        let mut source = XmlEventSource::new();
        let mut recorder = Recorder::default();
        source.feed(b"<root><a", false, &mut recorder).unwrap();
        assert_eq!(recorder.events.len(), 1);
        let err = source.feed(b"", true, &mut recorder).unwrap_err();
        assert!(matches!(err, SpatialFormatReadError::Parse { .. }));
    }

    #[test]
    fn unclosed_root_and_empty_input() {
        let mut recorder = Recorder::default();
        let err = XmlEventSource::new()
            .feed(b"<root>", true, &mut recorder)
            .unwrap_err();
        assert!(err.to_string().contains("unclosed element <root>"));

        let err = XmlEventSource::new()
            .feed(b"  ", true, &mut recorder)
            .unwrap_err();
        assert!(err.to_string().contains("no element found"));
    }

    #[test]
    fn content_after_the_root_is_rejected() {
        let mut recorder = Recorder::default();
        let err = XmlEventSource::new()
            .feed(b"<a/><b/>", true, &mut recorder)
            .unwrap_err();
        assert!(err.to_string().contains("junk after document element"));

        let err = XmlEventSource::new()
            .feed(b"<a/>tail", true, &mut recorder)
            .unwrap_err();
        assert!(err.to_string().contains("text outside the document element"));
    }

    #[test]
    fn unbound_prefix_is_fatal() {
        let mut recorder = Recorder::default();
        let err = XmlEventSource::new()
            .feed(b"<gml:Point/>", true, &mut recorder)
            .unwrap_err();
        assert!(err.to_string().contains("unbound prefix 'gml'"));
    }

    #[test]
    fn undefined_entity_is_fatal() {
        let mut recorder = Recorder::default();
        let err = XmlEventSource::new()
            .feed(b"<a>&nbsp;</a>", true, &mut recorder)
            .unwrap_err();
        assert!(err.to_string().contains("undefined entity &nbsp;"));
    }

    #[test]
    fn column_counts_characters() {
        let mut recorder = Recorder::default();
        let err = XmlEventSource::new()
            .feed("<r>é</x>".as_bytes(), true, &mut recorder)
            .unwrap_err();
        let position = err.position().unwrap();
        assert_eq!(position.line, Some(1));
        assert_eq!(position.column, Some(5));
        assert_eq!(position.byte_offset, Some(5));
    }

    #[test]
    fn latin1_document() {
        let mut source = XmlEventSource::new();
        let mut recorder = Recorder::default();
        let document = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><c><a>Z\xFCrich</a></c>";
        for chunk in document.chunks(5) {
            source.feed(chunk, false, &mut recorder).unwrap();
        }
        source.feed(&[], true, &mut recorder).unwrap();
        assert!(recorder.events.contains(&"text Zürich".to_string()));
    }

    #[test]
    fn byte_order_mark_is_skipped() {
        let mut recorder = Recorder::default();
        let mut source = XmlEventSource::new();
        let err = source
            .feed(b"\xEF\xBB\xBF<r></x>", true, &mut recorder)
            .unwrap_err();
        assert_eq!(err.position().and_then(|p| p.column), Some(4));
    }

    #[test]
    fn feeding_after_the_end_fails() {
        let mut source = XmlEventSource::new();
        let mut recorder = Recorder::default();
        source.feed(b"<a/>", true, &mut recorder).unwrap();
        let err = source.feed(b"<b/>", true, &mut recorder).unwrap_err();
        assert!(err.to_string().contains("parsing finished"));
    }

    #[test]
    fn attribute_lookup_helpers() {
        let attributes = vec![
            XmlAttribute {
                namespace: None,
                local: "fid".into(),
                value: "a".into(),
            },
            XmlAttribute {
                namespace: Some("urn:x".into()),
                local: "id".into(),
                value: "b".into(),
            },
        ];
        assert_eq!(attribute_value(&attributes, "fid"), Some("a"));
        assert_eq!(attribute_value(&attributes, "id"), None);
        assert_eq!(attribute_value_ns(&attributes, "urn:x", "id"), Some("b"));
    }
}

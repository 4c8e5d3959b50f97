//! Binary frame codec for the Bytedance bidirectional TTS protocol.
//!
//! Every websocket binary message is one frame:
//!
//! ```text
//! byte 0    protocol version (4 bits) | header size in 4-byte words (4 bits)
//! byte 1    message type (4 bits)     | message type flags (4 bits)
//! byte 2    serialization (4 bits)    | compression (4 bits)
//! byte 3    reserved
//! [u32 BE]                error code          ErrorInformation only
//! [u32 BE]                event               flags == WithEvent
//! [u32 BE len + UTF-8]    connection id       ConnectionStarted
//! [u32 BE len + UTF-8]    session id          session-scoped events
//! [i32 BE]                sequence            flags carry a sequence
//! [u32 BE len + bytes]    payload
//! ```
//!
//! The codec is pure: no I/O and no shared state.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use thiserror::Error;

use crate::core::tts::base::TTSError;

/// Protocol version carried in every header.
pub const PROTOCOL_VERSION: u8 = 0b0001;

/// Header size in 4-byte words.
pub const DEFAULT_HEADER_SIZE: u8 = 0b0001;

const HEADER_LEN: usize = 4;

// =============================================================================
// Errors
// =============================================================================

/// Failure to decode a frame. Never produced for well-formed input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("truncated frame: {field} needs {needed} bytes, {available} available")]
    Truncated {
        field: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("unknown message type: {0:#06b}")]
    UnknownMessageType(u8),

    #[error("invalid message type flags: {0:#06b}")]
    InvalidFlags(u8),

    #[error("invalid header size: {0}")]
    InvalidHeaderSize(u8),

    #[error("unsupported compression: {0}")]
    UnsupportedCompression(u8),

    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),
}

impl From<DecodeError> for TTSError {
    fn from(err: DecodeError) -> Self {
        TTSError::Decode(err.to_string())
    }
}

// =============================================================================
// Header fields
// =============================================================================

/// Message type nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Client request carrying an event and JSON payload
    FullClientRequest,
    /// Server response carrying audio
    AudioOnlyResponse,
    /// Server response carrying JSON
    FullServerResponse,
    /// Server error with numeric code
    ErrorInformation,
}

impl MessageType {
    #[inline]
    pub const fn code(&self) -> u8 {
        match self {
            Self::FullClientRequest => 0b0001,
            Self::AudioOnlyResponse => 0b1011,
            Self::FullServerResponse => 0b1001,
            Self::ErrorInformation => 0b1111,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0b0001 => Some(Self::FullClientRequest),
            0b1011 => Some(Self::AudioOnlyResponse),
            0b1001 => Some(Self::FullServerResponse),
            0b1111 => Some(Self::ErrorInformation),
            _ => None,
        }
    }
}

/// Message type specific flags nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageFlags {
    /// Non-terminal packet without sequence
    NoSequence,
    /// Non-terminal packet with sequence > 0
    PositiveSequence,
    /// Last packet without sequence
    LastNoSequence,
    /// Last packet with sequence < 0
    NegativeSequence,
    /// Optional section starts with an event code
    WithEvent,
}

impl MessageFlags {
    #[inline]
    pub const fn code(&self) -> u8 {
        match self {
            Self::NoSequence => 0b0000,
            Self::PositiveSequence => 0b0001,
            Self::LastNoSequence => 0b0010,
            Self::NegativeSequence => 0b0011,
            Self::WithEvent => 0b0100,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0b0000 => Some(Self::NoSequence),
            0b0001 => Some(Self::PositiveSequence),
            0b0010 => Some(Self::LastNoSequence),
            0b0011 => Some(Self::NegativeSequence),
            0b0100 => Some(Self::WithEvent),
            _ => None,
        }
    }

    #[inline]
    pub const fn has_sequence(&self) -> bool {
        matches!(self, Self::PositiveSequence | Self::NegativeSequence)
    }
}

/// Serialization method nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Serialization {
    Raw,
    Json,
    Other(u8),
}

impl Serialization {
    #[inline]
    pub const fn code(&self) -> u8 {
        match self {
            Self::Raw => 0b0000,
            Self::Json => 0b0001,
            Self::Other(code) => *code & 0x0F,
        }
    }

    pub const fn from_code(code: u8) -> Self {
        match code {
            0b0000 => Self::Raw,
            0b0001 => Self::Json,
            other => Self::Other(other),
        }
    }
}

/// Compression nibble. Only uncompressed frames are decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compression {
    None,
    Gzip,
    Other(u8),
}

impl Compression {
    #[inline]
    pub const fn code(&self) -> u8 {
        match self {
            Self::None => 0b0000,
            Self::Gzip => 0b0001,
            Self::Other(code) => *code & 0x0F,
        }
    }

    pub const fn from_code(code: u8) -> Self {
        match code {
            0b0000 => Self::None,
            0b0001 => Self::Gzip,
            other => Self::Other(other),
        }
    }
}

// =============================================================================
// Events
// =============================================================================

/// Protocol event carried in the optional section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    None,
    StartConnection,
    FinishConnection,
    ConnectionStarted,
    ConnectionFailed,
    ConnectionFinished,
    StartSession,
    FinishSession,
    SessionStarted,
    SessionFinished,
    SessionFailed,
    TaskRequest,
    SentenceStart,
    SentenceEnd,
    /// Synthesized audio (a.k.a. TTSResponse)
    AudioChunk,
    Unknown(u32),
}

/// How the fields after the event code are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventLayout {
    Bare,
    ConnectionScoped,
    ConnectionStarted,
    ConnectionFailed,
    SessionScoped,
}

impl EventType {
    #[inline]
    pub const fn code(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::StartConnection => 1,
            Self::FinishConnection => 2,
            Self::ConnectionStarted => 50,
            Self::ConnectionFailed => 51,
            Self::ConnectionFinished => 52,
            Self::StartSession => 100,
            Self::FinishSession => 102,
            Self::SessionStarted => 150,
            Self::SessionFinished => 152,
            Self::SessionFailed => 153,
            Self::TaskRequest => 200,
            Self::SentenceStart => 350,
            Self::SentenceEnd => 351,
            Self::AudioChunk => 352,
            Self::Unknown(code) => *code,
        }
    }

    pub const fn from_code(code: u32) -> Self {
        match code {
            0 => Self::None,
            1 => Self::StartConnection,
            2 => Self::FinishConnection,
            50 => Self::ConnectionStarted,
            51 => Self::ConnectionFailed,
            52 => Self::ConnectionFinished,
            100 => Self::StartSession,
            102 => Self::FinishSession,
            150 => Self::SessionStarted,
            152 => Self::SessionFinished,
            153 => Self::SessionFailed,
            200 => Self::TaskRequest,
            350 => Self::SentenceStart,
            351 => Self::SentenceEnd,
            352 => Self::AudioChunk,
            other => Self::Unknown(other),
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::StartConnection => "StartConnection",
            Self::FinishConnection => "FinishConnection",
            Self::ConnectionStarted => "ConnectionStarted",
            Self::ConnectionFailed => "ConnectionFailed",
            Self::ConnectionFinished => "ConnectionFinished",
            Self::StartSession => "StartSession",
            Self::FinishSession => "FinishSession",
            Self::SessionStarted => "SessionStarted",
            Self::SessionFinished => "SessionFinished",
            Self::SessionFailed => "SessionFailed",
            Self::TaskRequest => "TaskRequest",
            Self::SentenceStart => "SentenceStart",
            Self::SentenceEnd => "SentenceEnd",
            Self::AudioChunk => "AudioChunk",
            Self::Unknown(_) => "Unknown",
        }
    }

    const fn layout(&self) -> EventLayout {
        match self {
            Self::None => EventLayout::Bare,
            Self::StartConnection | Self::FinishConnection | Self::ConnectionFinished => {
                EventLayout::ConnectionScoped
            }
            Self::ConnectionStarted => EventLayout::ConnectionStarted,
            Self::ConnectionFailed => EventLayout::ConnectionFailed,
            _ => EventLayout::SessionScoped,
        }
    }

    /// Whether the payload of this event is UTF-8 JSON text.
    const fn has_text_payload(&self) -> bool {
        !matches!(self, Self::AudioChunk | Self::Unknown(_) | Self::None)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.as_str(), self.code())
    }
}

// =============================================================================
// Header
// =============================================================================

/// The fixed 4-byte frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub header_size: u8,
    pub message_type: MessageType,
    pub flags: MessageFlags,
    pub serialization: Serialization,
    pub compression: Compression,
    pub reserved: u8,
}

impl Header {
    pub const fn new(
        message_type: MessageType,
        flags: MessageFlags,
        serialization: Serialization,
    ) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            header_size: DEFAULT_HEADER_SIZE,
            message_type,
            flags,
            serialization,
            compression: Compression::None,
            reserved: 0,
        }
    }

    /// Header used by every client request: event-carrying JSON.
    pub const fn client_request() -> Self {
        Self::new(
            MessageType::FullClientRequest,
            MessageFlags::WithEvent,
            Serialization::Json,
        )
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        [
            (self.version << 4) | (self.header_size & 0x0F),
            (self.message_type.code() << 4) | self.flags.code(),
            (self.serialization.code() << 4) | self.compression.code(),
            self.reserved,
        ]
    }

    /// Parse the first four bytes of a frame.
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < HEADER_LEN {
            return Err(DecodeError::Truncated {
                field: "header",
                needed: HEADER_LEN,
                available: data.len(),
            });
        }

        let header_size = data[0] & 0x0F;
        if header_size == 0 {
            return Err(DecodeError::InvalidHeaderSize(header_size));
        }
        let type_code = data[1] >> 4;
        let message_type =
            MessageType::from_code(type_code).ok_or(DecodeError::UnknownMessageType(type_code))?;
        let flag_code = data[1] & 0x0F;
        let flags = MessageFlags::from_code(flag_code).ok_or(DecodeError::InvalidFlags(flag_code))?;

        Ok(Self {
            version: data[0] >> 4,
            header_size,
            message_type,
            flags,
            serialization: Serialization::from_code(data[2] >> 4),
            compression: Compression::from_code(data[2] & 0x0F),
            reserved: data[3],
        })
    }

    /// Full header length in bytes, including extension words.
    #[inline]
    pub fn len(&self) -> usize {
        self.header_size as usize * 4
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::client_request()
    }
}

/// Optional section written after the header of a client request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionalFields {
    pub event: Option<EventType>,
    pub session_id: Option<String>,
    pub sequence: Option<i32>,
}

impl OptionalFields {
    pub fn event(event: EventType) -> Self {
        Self {
            event: Some(event),
            ..Default::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    fn write_to(&self, buf: &mut BytesMut) {
        if let Some(event) = self.event
            && event != EventType::None
        {
            buf.put_u32(event.code());
        }
        if let Some(session_id) = &self.session_id {
            put_string(buf, session_id);
        }
        if let Some(sequence) = self.sequence {
            buf.put_i32(sequence);
        }
    }
}

/// Encode a header, an optional section and an optional payload.
///
/// The payload, when present, is preceded by its u32 BE length.
pub fn encode(header: &Header, optional: &OptionalFields, payload: Option<&[u8]>) -> Bytes {
    let payload_len = payload.map_or(0, |p| p.len() + 4);
    let mut buf = BytesMut::with_capacity(header.len() + 64 + payload_len);
    write_header(&mut buf, header);
    optional.write_to(&mut buf);
    if let Some(payload) = payload {
        put_bytes(&mut buf, payload);
    }
    buf.freeze()
}

// =============================================================================
// Frame
// =============================================================================

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: Header,
    pub event: Option<EventType>,
    pub connection_id: Option<String>,
    pub session_id: Option<String>,
    pub sequence: Option<i32>,
    pub error_code: Option<u32>,
    pub payload: Option<Bytes>,
}

impl Frame {
    fn with_header(header: Header) -> Self {
        Self {
            header,
            event: None,
            connection_id: None,
            session_id: None,
            sequence: None,
            error_code: None,
            payload: None,
        }
    }

    /// Client request frame. `session_id` is required for session-scoped events.
    pub fn client(event: EventType, session_id: Option<&str>, payload: impl Into<Bytes>) -> Self {
        let mut frame = Self::with_header(Header::client_request());
        frame.event = Some(event);
        frame.session_id = session_id.map(str::to_string);
        frame.payload = Some(payload.into());
        frame
    }

    /// Server event frame, as sent by the vendor.
    pub fn server(event: EventType, session_id: Option<&str>, payload: impl Into<Bytes>) -> Self {
        let (message_type, serialization) = match event {
            EventType::AudioChunk => (MessageType::AudioOnlyResponse, Serialization::Raw),
            _ => (MessageType::FullServerResponse, Serialization::Json),
        };
        let mut frame = Self::with_header(Header::new(
            message_type,
            MessageFlags::WithEvent,
            serialization,
        ));
        frame.event = Some(event);
        frame.session_id = session_id.map(str::to_string);
        frame.payload = Some(payload.into());
        frame
    }

    pub fn connection_started(connection_id: &str) -> Self {
        let mut frame = Self::with_header(Header::new(
            MessageType::FullServerResponse,
            MessageFlags::WithEvent,
            Serialization::Json,
        ));
        frame.event = Some(EventType::ConnectionStarted);
        frame.connection_id = Some(connection_id.to_string());
        frame
    }

    pub fn error(code: u32, message: impl Into<Bytes>) -> Self {
        let mut frame = Self::with_header(Header::new(
            MessageType::ErrorInformation,
            MessageFlags::NoSequence,
            Serialization::Json,
        ));
        frame.error_code = Some(code);
        frame.payload = Some(message.into());
        frame
    }

    /// Event of this frame, `EventType::None` when absent.
    #[inline]
    pub fn event_type(&self) -> EventType {
        self.event.unwrap_or(EventType::None)
    }

    pub fn payload_str(&self) -> Option<&str> {
        self.payload
            .as_deref()
            .and_then(|p| std::str::from_utf8(p).ok())
    }

    /// Payload parsed as JSON; `None` when absent, empty or malformed.
    pub fn payload_json(&self) -> Option<serde_json::Value> {
        self.payload_str()
            .filter(|s| !s.trim().is_empty())
            .and_then(|s| serde_json::from_str(s).ok())
    }

    /// Human-readable error payload; binary payloads are summarized.
    pub fn error_message(&self) -> String {
        match self.payload.as_deref() {
            None => "Unknown error".to_string(),
            Some(raw) => match std::str::from_utf8(raw) {
                Ok(text) => text.to_string(),
                Err(_) => format!("Binary payload (length: {})", raw.len()),
            },
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(
            self.header.len() + 64 + self.payload.as_ref().map_or(0, Bytes::len),
        );
        write_header(&mut buf, &self.header);

        if self.header.message_type == MessageType::ErrorInformation {
            buf.put_u32(self.error_code.unwrap_or_default());
            put_bytes(&mut buf, self.payload.as_deref().unwrap_or_default());
            return buf.freeze();
        }

        if self.header.flags != MessageFlags::WithEvent {
            if self.header.flags.has_sequence() {
                buf.put_i32(self.sequence.unwrap_or_default());
            }
            if let Some(payload) = &self.payload {
                put_bytes(&mut buf, payload);
            }
            return buf.freeze();
        }

        let event = self.event_type();
        buf.put_u32(event.code());
        match event.layout() {
            EventLayout::Bare => {}
            EventLayout::ConnectionScoped => {
                if let Some(payload) = &self.payload {
                    put_bytes(&mut buf, payload);
                }
            }
            EventLayout::ConnectionStarted => {
                put_string(&mut buf, self.connection_id.as_deref().unwrap_or_default());
                if let Some(payload) = &self.payload {
                    put_bytes(&mut buf, payload);
                }
            }
            EventLayout::ConnectionFailed => {
                if let Some(session_id) = &self.session_id {
                    put_string(&mut buf, session_id);
                }
                put_bytes(&mut buf, self.payload.as_deref().unwrap_or_default());
            }
            EventLayout::SessionScoped => {
                put_string(&mut buf, self.session_id.as_deref().unwrap_or_default());
                put_bytes(&mut buf, self.payload.as_deref().unwrap_or_default());
            }
        }
        buf.freeze()
    }
}

/// Decode one frame.
///
/// Fails on truncated input, unknown message types, unsupported compression
/// and invalid UTF-8 in text fields. Never returns a partially populated frame.
pub fn decode(data: &[u8]) -> Result<Frame, DecodeError> {
    let header = Header::parse(data)?;
    if data.len() < header.len() {
        return Err(DecodeError::Truncated {
            field: "header extension",
            needed: header.len(),
            available: data.len(),
        });
    }
    if header.compression != Compression::None {
        return Err(DecodeError::UnsupportedCompression(header.compression.code()));
    }

    let mut reader = FrameReader {
        data: &data[header.len()..],
    };
    let mut frame = Frame::with_header(header);

    if header.message_type == MessageType::ErrorInformation {
        frame.error_code = Some(reader.read_u32("error code")?);
        frame.payload = Some(reader.read_bytes("error payload")?);
        return Ok(frame);
    }

    if header.flags != MessageFlags::WithEvent {
        if header.flags.has_sequence() {
            frame.sequence = Some(reader.read_i32("sequence")?);
        }
        frame.payload = reader.read_optional_bytes("payload")?;
        return Ok(frame);
    }

    let event = EventType::from_code(reader.read_u32("event")?);
    frame.event = Some(event);

    match event.layout() {
        EventLayout::Bare => {}
        EventLayout::ConnectionScoped => {
            frame.payload = reader.read_optional_bytes("payload")?;
        }
        EventLayout::ConnectionStarted => {
            frame.connection_id = Some(reader.read_string("connection id")?);
            frame.payload = reader.read_optional_bytes("payload")?;
        }
        EventLayout::ConnectionFailed => {
            // Either `session id + meta` or a bare meta string.
            let first = reader.read_bytes("connection failed field")?;
            if reader.is_empty() {
                frame.payload = Some(first);
            } else {
                frame.session_id = Some(into_string(first, "session id")?);
                frame.payload = Some(reader.read_bytes("payload")?);
            }
        }
        EventLayout::SessionScoped => {
            frame.session_id = Some(reader.read_string("session id")?);
            frame.payload = Some(reader.read_bytes("payload")?);
        }
    }

    if event.has_text_payload()
        && let Some(payload) = &frame.payload
        && std::str::from_utf8(payload).is_err()
    {
        return Err(DecodeError::InvalidUtf8("payload"));
    }

    Ok(frame)
}

// =============================================================================
// Wire helpers
// =============================================================================

fn write_header(buf: &mut BytesMut, header: &Header) {
    buf.put_slice(&header.to_bytes());
    // Extension words are reserved and zero-filled.
    buf.put_bytes(0, header.len().saturating_sub(HEADER_LEN));
}

fn put_bytes(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u32(data.len() as u32);
    buf.put_slice(data);
}

fn put_string(buf: &mut BytesMut, value: &str) {
    put_bytes(buf, value.as_bytes());
}

fn into_string(raw: Bytes, field: &'static str) -> Result<String, DecodeError> {
    String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::InvalidUtf8(field))
}

struct FrameReader<'a> {
    data: &'a [u8],
}

impl FrameReader<'_> {
    fn is_empty(&self) -> bool {
        !self.data.has_remaining()
    }

    fn ensure(&self, field: &'static str, needed: usize) -> Result<(), DecodeError> {
        if self.data.remaining() < needed {
            return Err(DecodeError::Truncated {
                field,
                needed,
                available: self.data.remaining(),
            });
        }
        Ok(())
    }

    fn read_u32(&mut self, field: &'static str) -> Result<u32, DecodeError> {
        self.ensure(field, 4)?;
        Ok(self.data.get_u32())
    }

    fn read_i32(&mut self, field: &'static str) -> Result<i32, DecodeError> {
        self.ensure(field, 4)?;
        Ok(self.data.get_i32())
    }

    fn read_bytes(&mut self, field: &'static str) -> Result<Bytes, DecodeError> {
        let len = self.read_u32(field)? as usize;
        self.ensure(field, len)?;
        Ok(self.data.copy_to_bytes(len))
    }

    fn read_optional_bytes(&mut self, field: &'static str) -> Result<Option<Bytes>, DecodeError> {
        if self.is_empty() {
            return Ok(None);
        }
        self.read_bytes(field).map(Some)
    }

    fn read_string(&mut self, field: &'static str) -> Result<String, DecodeError> {
        let raw = self.read_bytes(field)?;
        into_string(raw, field)
    }
}

//! Error types for rtmp-session
//!
//! `Error` is what the engine layer (protocol, AMF, FLV, connector) returns.
//! The session layer wraps it into one error type per operation so callers
//! can tell *which step* failed, and each of those carries the integer code
//! exposed by the blocking client.

use std::collections::TryReserveError;
use std::fmt;
use std::io;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Engine-level error
#[derive(Debug)]
pub enum Error {
    /// I/O error during network operations
    Io(io::Error),
    /// RTMP protocol violation
    Protocol(ProtocolError),
    /// AMF encoding/decoding error
    Amf(AmfError),
    /// Handshake failure
    Handshake(HandshakeError),
    /// FLV parsing error
    Media(MediaError),
    /// Connect or stream request refused by the server
    Rejected(String),
    /// Operation timed out
    Timeout,
    /// Connection was closed
    ConnectionClosed,
    /// Server signalled the end of the played stream
    EndOfStream,
    /// Invalid configuration or URL
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::Amf(e) => write!(f, "AMF error: {}", e),
            Error::Handshake(e) => write!(f, "Handshake error: {}", e),
            Error::Media(e) => write!(f, "Media error: {}", e),
            Error::Rejected(msg) => write!(f, "Rejected by server: {}", msg),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::ConnectionClosed => write!(f, "Connection closed"),
            Error::EndOfStream => write!(f, "End of stream"),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Protocol(e) => Some(e),
            Error::Amf(e) => Some(e),
            Error::Handshake(e) => Some(e),
            Error::Media(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<AmfError> for Error {
    fn from(err: AmfError) -> Self {
        Error::Amf(err)
    }
}

impl From<HandshakeError> for Error {
    fn from(err: HandshakeError) -> Self {
        Error::Handshake(err)
    }
}

impl From<MediaError> for Error {
    fn from(err: MediaError) -> Self {
        Error::Media(err)
    }
}

/// Protocol-level errors
#[derive(Debug)]
pub enum ProtocolError {
    InvalidChunkHeader,
    MessageTooLarge { size: u32, max: u32 },
    InvalidCommand(String),
    UnexpectedResponse(String),
    /// Engine operation called before the step it depends on
    InvalidState(&'static str),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::InvalidChunkHeader => write!(f, "Invalid chunk header"),
            ProtocolError::MessageTooLarge { size, max } => {
                write!(f, "Message too large: {} bytes (max {})", size, max)
            }
            ProtocolError::InvalidCommand(cmd) => write!(f, "Invalid command: {}", cmd),
            ProtocolError::UnexpectedResponse(msg) => write!(f, "Unexpected response: {}", msg),
            ProtocolError::InvalidState(what) => write!(f, "Invalid state: {}", what),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// AMF encoding/decoding errors
#[derive(Debug)]
pub enum AmfError {
    UnknownMarker(u8),
    UnexpectedEof,
    InvalidUtf8,
    InvalidReference(u16),
    NestingTooDeep,
}

impl fmt::Display for AmfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmfError::UnknownMarker(m) => write!(f, "Unknown AMF marker: 0x{:02x}", m),
            AmfError::UnexpectedEof => write!(f, "Unexpected end of AMF data"),
            AmfError::InvalidUtf8 => write!(f, "Invalid UTF-8 in AMF string"),
            AmfError::InvalidReference(idx) => write!(f, "Invalid AMF reference: {}", idx),
            AmfError::NestingTooDeep => write!(f, "AMF nesting too deep"),
        }
    }
}

impl std::error::Error for AmfError {}

/// Handshake-specific errors
#[derive(Debug)]
pub enum HandshakeError {
    InvalidVersion(u8),
    InvalidState,
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::InvalidVersion(v) => write!(f, "Invalid RTMP version: {}", v),
            HandshakeError::InvalidState => write!(f, "Invalid handshake state"),
        }
    }
}

impl std::error::Error for HandshakeError {}

/// FLV stream errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    InvalidFlvHeader,
    InvalidFlvTag,
    UnsupportedTagType(u8),
}

impl fmt::Display for MediaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaError::InvalidFlvHeader => write!(f, "Invalid FLV header"),
            MediaError::InvalidFlvTag => write!(f, "Invalid FLV tag"),
            MediaError::UnsupportedTagType(t) => write!(f, "Unsupported FLV tag type: {}", t),
        }
    }
}

impl std::error::Error for MediaError {}

/// Failure of `RtmpSession::open`, one variant per setup step
#[derive(Debug)]
pub enum OpenError {
    /// The engine connection could not be allocated
    AllocationFailed(Error),
    /// The URL was empty or could not be applied to the connection
    InvalidUrl(Error),
    /// TCP connect, handshake or `connect` command failed
    ConnectFailed(Error),
    /// Stream creation or play/publish negotiation failed
    StreamSetupFailed(Error),
    /// The session already holds a connection; `close` it first
    AlreadyOpen,
}

impl OpenError {
    /// Status code used by the blocking client
    pub fn code(&self) -> i32 {
        match self {
            OpenError::AllocationFailed(_) => -1,
            OpenError::InvalidUrl(_) => -2,
            OpenError::ConnectFailed(_) => -3,
            OpenError::StreamSetupFailed(_) => -4,
            OpenError::AlreadyOpen => -5,
        }
    }
}

impl fmt::Display for OpenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenError::AllocationFailed(e) => write!(f, "Connection allocation failed: {}", e),
            OpenError::InvalidUrl(e) => write!(f, "URL setup failed: {}", e),
            OpenError::ConnectFailed(e) => write!(f, "Connect failed: {}", e),
            OpenError::StreamSetupFailed(e) => write!(f, "Stream setup failed: {}", e),
            OpenError::AlreadyOpen => write!(f, "Session already open"),
        }
    }
}

impl std::error::Error for OpenError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OpenError::AllocationFailed(e)
            | OpenError::InvalidUrl(e)
            | OpenError::ConnectFailed(e)
            | OpenError::StreamSetupFailed(e) => Some(e),
            OpenError::AlreadyOpen => None,
        }
    }
}

/// Failure of `RtmpSession::read`
#[derive(Debug)]
pub enum ReadError {
    NotConnected,
    /// The session was opened for publishing
    WrongMode,
    /// `offset` lies past the end of the destination buffer
    InvalidRange { offset: usize, len: usize },
    /// The transient read buffer could not be reserved
    OutOfMemory(TryReserveError),
    Engine(Error),
}

impl ReadError {
    /// Status code used by the blocking client
    pub fn code(&self) -> i32 {
        match self {
            ReadError::NotConnected => -1,
            ReadError::WrongMode => -2,
            ReadError::InvalidRange { .. } => -3,
            ReadError::OutOfMemory(_) => -4,
            ReadError::Engine(_) => -5,
        }
    }
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadError::NotConnected => write!(f, "Read on a session that is not connected"),
            ReadError::WrongMode => write!(f, "Read on a publishing session"),
            ReadError::InvalidRange { offset, len } => {
                write!(f, "Read offset {} outside buffer of {} bytes", offset, len)
            }
            ReadError::OutOfMemory(e) => write!(f, "Read buffer allocation failed: {}", e),
            ReadError::Engine(e) => write!(f, "Read failed: {}", e),
        }
    }
}

impl std::error::Error for ReadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReadError::OutOfMemory(e) => Some(e),
            ReadError::Engine(e) => Some(e),
            _ => None,
        }
    }
}

/// Failure of `RtmpSession::write`
#[derive(Debug)]
pub enum WriteError {
    NotConnected,
    /// The session was opened for playing
    WrongMode,
    Engine(Error),
}

impl WriteError {
    /// Status code used by the blocking client
    pub fn code(&self) -> i32 {
        match self {
            WriteError::NotConnected => -1,
            WriteError::WrongMode => -2,
            WriteError::Engine(_) => -5,
        }
    }
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteError::NotConnected => write!(f, "Write on a session that is not connected"),
            WriteError::WrongMode => write!(f, "Write on a playing session"),
            WriteError::Engine(e) => write!(f, "Write failed: {}", e),
        }
    }
}

impl std::error::Error for WriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WriteError::Engine(e) => Some(e),
            _ => None,
        }
    }
}

/// Failure of `RtmpSession::pause`
#[derive(Debug)]
pub enum PauseError {
    NotConnected,
    /// Publishing sessions cannot be paused
    WrongMode,
    /// Live streams are not resumable
    LiveStream,
    InvalidTime(i64),
    Engine(Error),
}

impl PauseError {
    /// Status code used by the blocking client
    pub fn code(&self) -> i32 {
        match self {
            PauseError::NotConnected => -1,
            _ => 0,
        }
    }
}

impl fmt::Display for PauseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PauseError::NotConnected => write!(f, "Pause on a session that is not connected"),
            PauseError::WrongMode => write!(f, "Pause on a publishing session"),
            PauseError::LiveStream => write!(f, "Live streams cannot be paused"),
            PauseError::InvalidTime(t) => write!(f, "Invalid pause time: {}", t),
            PauseError::Engine(e) => write!(f, "Pause failed: {}", e),
        }
    }
}

impl std::error::Error for PauseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PauseError::Engine(e) => Some(e),
            _ => None,
        }
    }
}

/// Failure of `RtmpSession::seek`
///
/// Uninhabited: seeking is not implemented at the session layer and always
/// succeeds without doing anything.
#[derive(Debug)]
pub enum SeekError {}

impl fmt::Display for SeekError {
    fn fmt(&self, _f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {}
    }
}

impl std::error::Error for SeekError {}

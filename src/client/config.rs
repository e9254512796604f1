//! Client configuration and URL parsing

use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::constants::{
    DEFAULT_BUFFER_LENGTH, DEFAULT_FLASH_VER, RECOMMENDED_CHUNK_SIZE, RTMP_PORT,
};

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// RTMP URL to connect to (rtmp://host[:port]/app/stream)
    pub url: String,

    /// Bound on TCP connect, handshake and the `connect` exchange
    pub connect_timeout: Duration,

    /// How long a read waits for the next media message before returning 0
    pub read_timeout: Duration,

    /// Enable TCP_NODELAY
    pub tcp_nodelay: bool,

    /// Flash version string to send
    pub flash_ver: String,

    /// SWF URL to send
    pub swf_url: Option<String>,

    /// Page URL to send
    pub page_url: Option<String>,

    /// Play buffer length in milliseconds
    pub buffer_length: u32,

    /// Outgoing chunk size announced after connecting
    pub chunk_size: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            tcp_nodelay: true,
            flash_ver: DEFAULT_FLASH_VER.to_string(),
            swf_url: None,
            page_url: None,
            buffer_length: DEFAULT_BUFFER_LENGTH,
            chunk_size: RECOMMENDED_CHUNK_SIZE,
        }
    }
}

impl ClientConfig {
    /// Create a new config with the given URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }

    pub fn flash_ver(mut self, flash_ver: impl Into<String>) -> Self {
        self.flash_ver = flash_ver.into();
        self
    }

    pub fn swf_url(mut self, url: impl Into<String>) -> Self {
        self.swf_url = Some(url.into());
        self
    }

    pub fn page_url(mut self, url: impl Into<String>) -> Self {
        self.page_url = Some(url.into());
        self
    }

    pub fn buffer_length(mut self, millis: u32) -> Self {
        self.buffer_length = millis;
        self
    }

    pub fn chunk_size(mut self, size: u32) -> Self {
        self.chunk_size = size;
        self
    }

    /// Parse the configured URL into components
    pub fn parse_url(&self) -> Result<ParsedUrl> {
        ParsedUrl::parse(&self.url)
    }
}

/// Parsed RTMP URL components
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUrl {
    pub host: String,
    pub port: u16,
    pub app: String,
    /// Normalised play path, query string included
    pub play_path: String,
}

impl ParsedUrl {
    /// Parse `rtmp://host[:port]/app/playpath`
    pub fn parse(url: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::Config(format!("{}: {}", reason, url));

        let rest = url
            .get(..7)
            .filter(|scheme| scheme.eq_ignore_ascii_case("rtmp://"))
            .map(|_| &url[7..])
            .ok_or_else(|| invalid("Not an rtmp:// URL"))?;

        let (authority, path) = rest
            .split_once('/')
            .ok_or_else(|| invalid("Missing application"))?;

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, after) = bracketed
                .split_once(']')
                .ok_or_else(|| invalid("Unterminated IPv6 address"))?;
            let port = match after.strip_prefix(':') {
                Some(p) => Some(p),
                None if after.is_empty() => None,
                None => return Err(invalid("Invalid host")),
            };
            (host, port)
        } else {
            match authority.split_once(':') {
                Some((h, p)) => (h, Some(p)),
                None => (authority, None),
            }
        };

        if host.is_empty() {
            return Err(invalid("Missing host"));
        }
        let port = match port {
            Some(p) => p.parse().map_err(|_| invalid("Invalid port"))?,
            None => RTMP_PORT,
        };

        let (app, play_path) = path
            .split_once('/')
            .ok_or_else(|| invalid("Missing stream name"))?;
        if app.is_empty() {
            return Err(invalid("Missing application"));
        }
        if play_path.is_empty() || play_path.starts_with('?') {
            return Err(invalid("Missing stream name"));
        }

        Ok(ParsedUrl {
            host: host.to_string(),
            port,
            app: app.to_string(),
            play_path: normalize_play_path(play_path),
        })
    }

    /// `tcUrl` sent in the connect command
    pub fn tc_url(&self) -> String {
        if self.host.contains(':') {
            format!("rtmp://[{}]:{}/{}", self.host, self.port, self.app)
        } else {
            format!("rtmp://{}:{}/{}", self.host, self.port, self.app)
        }
    }

    /// `host:port` string suitable for `TcpStream::connect`
    pub fn socket_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Map a file-like stream name onto the name the server expects
///
/// `x.flv` plays as `x`, MP4-family files need the `mp4:` prefix and MP3
/// files play as `mp3:x`. The query string is carried over.
pub fn normalize_play_path(path: &str) -> String {
    let (name, query) = match path.split_once('?') {
        Some((n, q)) => (n, Some(q)),
        None => (path, None),
    };

    let lower = name.to_ascii_lowercase();
    let has_prefix = lower.starts_with("mp4:") || lower.starts_with("mp3:");

    let mut normalized = if lower.ends_with(".flv") {
        name[..name.len() - 4].to_string()
    } else if has_prefix {
        name.to_string()
    } else if [".mp4", ".m4v", ".f4v", ".mov"]
        .iter()
        .any(|ext| lower.ends_with(ext))
    {
        format!("mp4:{}", name)
    } else if lower.ends_with(".mp3") {
        format!("mp3:{}", &name[..name.len() - 4])
    } else {
        name.to_string()
    };

    if let Some(query) = query {
        normalized.push('?');
        normalized.push_str(query);
    }
    normalized
}

//! RTMP client connector
//!
//! The default [`RtmpEngine`]: a tokio TCP client that performs the simple
//! handshake, negotiates one play or publish stream and converts between RTMP
//! media messages and an FLV byte stream.

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};

use crate::amf::{Amf0Encoder, AmfValue};
use crate::error::{Error, ProtocolError, Result};
use crate::media::{FlvDemuxer, FlvMuxer, FlvTag, FlvTagType};
use crate::protocol::chunk::{ChunkDecoder, ChunkEncoder, RtmpChunk};
use crate::protocol::constants::*;
use crate::protocol::handshake::ClientHandshake;
use crate::protocol::message::{Command, DataMessage, RtmpMessage, UserControlEvent};

use super::config::{ClientConfig, ParsedUrl};
use super::engine::RtmpEngine;

struct Transport {
    reader: BufReader<ReadHalf<TcpStream>>,
    writer: BufWriter<WriteHalf<TcpStream>>,
}

/// RTMP client connector
pub struct RtmpConnector {
    config: ClientConfig,
    url: Option<ParsedUrl>,
    live: bool,
    publishing: bool,

    transport: Option<Transport>,
    alive: bool,
    read_buf: BytesMut,
    write_buf: BytesMut,
    chunk_decoder: ChunkDecoder,
    chunk_encoder: ChunkEncoder,
    transaction_id: f64,
    stream_id: u32,

    // Inbound flow control
    window_ack_size: u32,
    bytes_received: u64,
    last_ack: u64,

    // Play side
    muxer: FlvMuxer,
    pending: BytesMut,
    last_timestamp: u32,
    stream_ended: bool,
    pause_stamp: u32,

    // Publish side
    demuxer: FlvDemuxer,
}

impl RtmpConnector {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            url: None,
            live: false,
            publishing: false,
            transport: None,
            alive: false,
            read_buf: BytesMut::with_capacity(64 * 1024),
            write_buf: BytesMut::with_capacity(64 * 1024),
            chunk_decoder: ChunkDecoder::new(),
            chunk_encoder: ChunkEncoder::new(),
            transaction_id: 0.0,
            stream_id: 0,
            window_ack_size: DEFAULT_WINDOW_ACK_SIZE,
            bytes_received: 0,
            last_ack: 0,
            muxer: FlvMuxer::new(),
            pending: BytesMut::new(),
            last_timestamp: 0,
            stream_ended: false,
            pause_stamp: 0,
            demuxer: FlvDemuxer::new(),
        }
    }

    /// Message stream ID assigned by createStream (0 before that)
    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    pub fn parsed_url(&self) -> Option<&ParsedUrl> {
        self.url.as_ref()
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn is_publishing(&self) -> bool {
        self.publishing
    }

    fn next_transaction_id(&mut self) -> f64 {
        self.transaction_id += 1.0;
        self.transaction_id
    }

    /// TCP connect, handshake and the `connect` command
    async fn establish(&mut self, url: &ParsedUrl) -> Result<()> {
        let socket = TcpStream::connect(url.socket_addr()).await?;
        if self.config.tcp_nodelay {
            socket.set_nodelay(true)?;
        }

        let (read_half, write_half) = tokio::io::split(socket);
        self.transport = Some(Transport {
            reader: BufReader::with_capacity(64 * 1024, read_half),
            writer: BufWriter::with_capacity(64 * 1024, write_half),
        });
        self.alive = true;

        self.do_handshake().await?;
        tracing::debug!(host = %url.host, port = url.port, "Handshake complete");

        let transaction_id = self.send_connect(url).await?;
        self.wait_connect_result(transaction_id).await?;

        self.queue_message(&RtmpMessage::WindowAckSize(DEFAULT_WINDOW_ACK_SIZE), 0, 0);
        let chunk_size = self.config.chunk_size.clamp(1, MAX_CHUNK_SIZE);
        self.queue_message(&RtmpMessage::SetChunkSize(chunk_size), 0, 0);
        self.chunk_encoder.set_chunk_size(chunk_size);
        self.flush().await
    }

    async fn do_handshake(&mut self) -> Result<()> {
        let mut handshake = ClientHandshake::new();

        let c0c1 = handshake.start()?;
        self.write_buf.put_slice(&c0c1);
        self.flush().await?;

        while !handshake.is_done() {
            self.fill_read_buf(None).await?;
            if let Some(c2) = handshake.process(&mut self.read_buf)? {
                self.write_buf.put_slice(&c2);
                self.flush().await?;
            }
        }

        Ok(())
    }

    async fn send_connect(&mut self, url: &ParsedUrl) -> Result<f64> {
        let mut props: Vec<(String, AmfValue)> = Vec::new();
        let mut push = |key: &str, value: AmfValue| props.push((key.to_string(), value));

        push("app", url.app.as_str().into());
        if self.publishing {
            push("type", "nonprivate".into());
        }
        push("flashVer", self.config.flash_ver.as_str().into());
        if let Some(swf_url) = &self.config.swf_url {
            push("swfUrl", swf_url.as_str().into());
        }
        push("tcUrl", url.tc_url().into());
        if !self.publishing {
            push("fpad", false.into());
            push("capabilities", 15.0.into());
            push("audioCodecs", 3191.0.into());
            push("videoCodecs", 252.0.into());
            push("videoFunction", 1.0.into());
            if let Some(page_url) = &self.config.page_url {
                push("pageUrl", page_url.as_str().into());
            }
        }

        let transaction_id = self.next_transaction_id();
        self.send_command(Command {
            name: CMD_CONNECT.to_string(),
            transaction_id,
            command_object: AmfValue::Object(props),
            arguments: vec![],
            stream_id: 0,
        })
        .await?;

        Ok(transaction_id)
    }

    async fn wait_connect_result(&mut self, transaction_id: f64) -> Result<()> {
        loop {
            match self.recv().await? {
                RtmpMessage::Command(cmd)
                    if cmd.name == CMD_RESULT && cmd.transaction_id == transaction_id =>
                {
                    return Ok(());
                }
                RtmpMessage::Command(cmd)
                    if cmd.name == CMD_ERROR && cmd.transaction_id == transaction_id =>
                {
                    let code = cmd.status_code().unwrap_or("NetConnection.Connect.Rejected");
                    return Err(Error::Rejected(code.to_string()));
                }
                other => self.on_message(other)?,
            }
        }
    }

    async fn create_stream(&mut self) -> Result<u32> {
        let transaction_id = self.next_transaction_id();
        self.send_command(Command::call(CMD_CREATE_STREAM, transaction_id, vec![]))
            .await?;

        loop {
            match self.recv().await? {
                RtmpMessage::Command(cmd)
                    if cmd.name == CMD_RESULT && cmd.transaction_id == transaction_id =>
                {
                    let id = cmd
                        .arguments
                        .first()
                        .and_then(AmfValue::as_number)
                        .ok_or_else(|| {
                            ProtocolError::UnexpectedResponse(
                                "createStream result without stream id".into(),
                            )
                        })?;
                    self.stream_id = stream_id_from(id)?;
                    tracing::debug!(stream_id = self.stream_id, "Stream created");
                    return Ok(self.stream_id);
                }
                RtmpMessage::Command(cmd)
                    if cmd.name == CMD_ERROR && cmd.transaction_id == transaction_id =>
                {
                    let code = cmd.status_code().unwrap_or("createStream rejected");
                    return Err(Error::Rejected(code.to_string()));
                }
                other => self.on_message(other)?,
            }
        }
    }

    async fn start_play(&mut self, url: &ParsedUrl) -> Result<()> {
        let stream_id = self.create_stream().await?;

        self.queue_message(
            &RtmpMessage::UserControl(UserControlEvent::SetBufferLength {
                stream_id,
                buffer_ms: self.config.buffer_length,
            }),
            0,
            0,
        );

        let start = if self.live { -1.0 } else { -2.0 };
        self.queue_command(Command::stream(
            CMD_PLAY,
            stream_id,
            vec![
                url.play_path.as_str().into(),
                AmfValue::Number(start),
                AmfValue::Number(-1.0),
                AmfValue::Boolean(true),
            ],
        ));
        self.flush().await?;

        // Anything arriving from here on follows the file header
        self.muxer.write_header(&mut self.pending);
        self.wait_for_status(NS_PLAY_START).await
    }

    async fn start_publish(&mut self, url: &ParsedUrl) -> Result<()> {
        let name: AmfValue = url.play_path.as_str().into();

        let transaction_id = self.next_transaction_id();
        self.queue_command(Command::call(CMD_RELEASE_STREAM, transaction_id, vec![name.clone()]));
        let transaction_id = self.next_transaction_id();
        self.queue_command(Command::call(CMD_FC_PUBLISH, transaction_id, vec![name.clone()]));
        self.flush().await?;

        let stream_id = self.create_stream().await?;
        self.send_command(Command::stream(CMD_PUBLISH, stream_id, vec![name, "live".into()]))
            .await?;

        self.wait_for_status(NS_PUBLISH_START).await
    }

    /// Wait for `expected` on the stream; failure codes abort the wait
    async fn wait_for_status(&mut self, expected: &str) -> Result<()> {
        loop {
            match self.recv().await? {
                RtmpMessage::Command(cmd) if cmd.name == CMD_ON_STATUS => {
                    let code = cmd.status_code().unwrap_or_default();
                    if code == expected {
                        return Ok(());
                    }
                    if Command::is_failure_code(code) {
                        return Err(Error::Rejected(code.to_string()));
                    }
                    tracing::debug!(code = code, "Stream status");
                }
                other => self.on_message(other)?,
            }
        }
    }

    /// Next message without a deadline
    async fn recv(&mut self) -> Result<RtmpMessage> {
        self.next_message(None).await?.ok_or(Error::Timeout)
    }

    /// Next message the caller needs to see
    ///
    /// Protocol control is handled here. `Ok(None)` means the deadline passed.
    async fn next_message(&mut self, deadline: Option<Instant>) -> Result<Option<RtmpMessage>> {
        loop {
            let chunk = match self.chunk_decoder.decode(&mut self.read_buf) {
                Ok(chunk) => chunk,
                Err(e) => {
                    self.alive = false;
                    return Err(e);
                }
            };

            if let Some(chunk) = chunk {
                let message = RtmpMessage::from_chunk(&chunk)?;
                if let Some(message) = self.handle_control(message).await? {
                    return Ok(Some(message));
                }
                continue;
            }

            if !self.fill_read_buf(deadline).await? {
                return Ok(None);
            }
        }
    }

    /// Read more bytes; `Ok(false)` if the deadline passed first
    async fn fill_read_buf(&mut self, deadline: Option<Instant>) -> Result<bool> {
        let transport = self
            .transport
            .as_mut()
            .ok_or(ProtocolError::InvalidState("not connected"))?;

        let read = transport.reader.read_buf(&mut self.read_buf);
        let result = match deadline {
            Some(deadline) => match timeout_at(deadline, read).await {
                Ok(result) => result,
                Err(_) => return Ok(false),
            },
            None => read.await,
        };

        let n = match result {
            Ok(0) => {
                self.alive = false;
                return Err(Error::ConnectionClosed);
            }
            Ok(n) => n,
            Err(e) => {
                self.alive = false;
                return Err(e.into());
            }
        };

        self.bytes_received += n as u64;
        if self.window_ack_size > 0
            && self.bytes_received - self.last_ack > (self.window_ack_size / 10) as u64
        {
            // Sequence number wraps with the 32-bit field
            let sequence = self.bytes_received as u32;
            self.queue_message(&RtmpMessage::Acknowledgement { sequence }, 0, 0);
            self.flush().await?;
            self.last_ack = self.bytes_received;
        }

        Ok(true)
    }

    async fn handle_control(&mut self, message: RtmpMessage) -> Result<Option<RtmpMessage>> {
        match message {
            RtmpMessage::SetChunkSize(size) => {
                tracing::debug!(size = size, "Peer set chunk size");
                self.chunk_decoder.set_chunk_size(size);
            }
            RtmpMessage::Abort { csid } => self.chunk_decoder.abort(csid),
            RtmpMessage::WindowAckSize(size) => {
                tracing::debug!(size = size, "Peer set window ack size");
                self.window_ack_size = size;
            }
            RtmpMessage::SetPeerBandwidth { size, limit_type } => {
                tracing::trace!(size = size, limit_type = limit_type, "Peer bandwidth");
            }
            RtmpMessage::Acknowledgement { .. } => {}
            RtmpMessage::UserControl(UserControlEvent::PingRequest(timestamp)) => {
                self.queue_message(
                    &RtmpMessage::UserControl(UserControlEvent::PingResponse(timestamp)),
                    0,
                    0,
                );
                self.flush().await?;
            }
            RtmpMessage::UserControl(UserControlEvent::StreamEof(id)) => {
                return Ok(Some(RtmpMessage::UserControl(UserControlEvent::StreamEof(id))));
            }
            RtmpMessage::UserControl(event) => {
                tracing::trace!(event = ?event, "User control event");
            }
            other => return Ok(Some(other)),
        }
        Ok(None)
    }

    /// Messages outside of a negotiation wait
    fn on_message(&mut self, message: RtmpMessage) -> Result<()> {
        match message {
            RtmpMessage::Audio { timestamp, data } if !self.publishing => {
                self.mux(FlvTag::new(FlvTagType::Audio, timestamp, data));
            }
            RtmpMessage::Video { timestamp, data } if !self.publishing => {
                self.mux(FlvTag::new(FlvTagType::Video, timestamp, data));
            }
            RtmpMessage::Aggregate { timestamp, data } if !self.publishing => {
                self.muxer
                    .write_aggregate(timestamp, &data, &mut self.pending)?;
            }
            RtmpMessage::Data(data) if !self.publishing => self.mux_metadata(data),
            RtmpMessage::UserControl(UserControlEvent::StreamEof(id)) if !self.publishing => {
                tracing::debug!(stream_id = id, "Stream EOF");
                self.stream_ended = true;
            }
            RtmpMessage::Command(cmd) => self.on_command(cmd),
            other => tracing::trace!(message = ?other, "Unhandled message"),
        }
        Ok(())
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd.name.as_str() {
            CMD_ON_STATUS => match cmd.status_code().unwrap_or_default() {
                code @ (NS_PLAY_STOP | NS_PLAY_COMPLETE) if !self.publishing => {
                    tracing::info!(code = code, "Stream ended");
                    self.stream_ended = true;
                }
                code if Command::is_failure_code(code) => {
                    tracing::warn!(code = code, "Server reported failure");
                }
                code => tracing::debug!(code = code, "Stream status"),
            },
            CMD_ERROR => {
                tracing::warn!(
                    transaction_id = cmd.transaction_id,
                    code = cmd.status_code().unwrap_or_default(),
                    "Server returned error"
                );
            }
            name => tracing::trace!(command = name, "Unhandled command"),
        }
    }

    fn mux(&mut self, tag: FlvTag) {
        self.last_timestamp = tag.timestamp;
        self.muxer.write_tag(&tag, &mut self.pending);
    }

    fn mux_metadata(&mut self, mut data: DataMessage) {
        if data.name == CMD_SET_DATA_FRAME && !data.values.is_empty() {
            if let AmfValue::String(name) = data.values.remove(0) {
                data.name = name;
            }
        }
        if data.name != CMD_ON_METADATA {
            tracing::trace!(name = data.name, "Skipping data message");
            return;
        }

        let (_, body) = RtmpMessage::Data(data).encode();
        self.mux(FlvTag::new(FlvTagType::Script, self.last_timestamp, body));
    }

    fn queue_message(&mut self, message: &RtmpMessage, stream_id: u32, timestamp: u32) {
        let (message_type, payload) = message.encode();
        let chunk = RtmpChunk {
            csid: message.default_csid(),
            timestamp,
            message_type,
            stream_id,
            payload,
        };
        self.chunk_encoder.encode(&chunk, &mut self.write_buf);
    }

    fn queue_command(&mut self, cmd: Command) {
        let stream_id = cmd.stream_id;
        self.queue_message(&RtmpMessage::Command(cmd), stream_id, 0);
    }

    async fn send_command(&mut self, cmd: Command) -> Result<()> {
        self.queue_command(cmd);
        self.flush().await
    }

    fn queue_tag(&mut self, tag: FlvTag) {
        let (csid, payload) = match tag.tag_type {
            FlvTagType::Audio => (CSID_AUDIO, tag.data),
            FlvTagType::Video => (CSID_VIDEO, tag.data),
            FlvTagType::Script => (CSID_DATA, with_set_data_frame(tag.data)),
        };
        let chunk = RtmpChunk {
            csid,
            timestamp: tag.timestamp,
            message_type: tag.tag_type.as_byte(),
            stream_id: self.stream_id,
            payload,
        };
        self.chunk_encoder.encode(&chunk, &mut self.write_buf);
    }

    async fn flush(&mut self) -> Result<()> {
        let transport = self
            .transport
            .as_mut()
            .ok_or(ProtocolError::InvalidState("not connected"))?;

        let mut result = transport.writer.write_all(&self.write_buf).await;
        if result.is_ok() {
            result = transport.writer.flush().await;
        }
        self.write_buf.clear();

        if let Err(e) = result {
            self.alive = false;
            return Err(e.into());
        }
        Ok(())
    }
}

/// Stream id from a createStream result; must be a whole number in `1..=u32::MAX`
fn stream_id_from(value: f64) -> Result<u32> {
    if value.fract() == 0.0 && value >= 1.0 && value <= u32::MAX as f64 {
        Ok(value as u32)
    } else {
        Err(ProtocolError::UnexpectedResponse(format!("invalid stream id {}", value)).into())
    }
}

/// Prefix a script tag body with `@setDataFrame` unless already present
fn with_set_data_frame(body: Bytes) -> Bytes {
    let mut encoder = Amf0Encoder::new();
    encoder.encode(&AmfValue::String(CMD_SET_DATA_FRAME.to_string()));
    let prefix = encoder.finish();
    if body.starts_with(&prefix) {
        return body;
    }

    let mut payload = BytesMut::with_capacity(prefix.len() + body.len());
    payload.put_slice(&prefix);
    payload.put_slice(&body);
    payload.freeze()
}

#[async_trait]
impl RtmpEngine for RtmpConnector {
    fn setup_url(&mut self, url: &str) -> Result<()> {
        let parsed = ParsedUrl::parse(url)?;
        tracing::debug!(
            host = %parsed.host,
            port = parsed.port,
            app = %parsed.app,
            play_path = %parsed.play_path,
            "URL parsed"
        );
        self.config.url = url.to_string();
        self.url = Some(parsed);
        Ok(())
    }

    fn set_live(&mut self) {
        self.live = true;
    }

    fn enable_write(&mut self) {
        self.publishing = true;
    }

    async fn connect(&mut self) -> Result<()> {
        if self.transport.is_some() {
            return Err(ProtocolError::InvalidState("already connected").into());
        }
        let url = self
            .url
            .clone()
            .ok_or(ProtocolError::InvalidState("URL not set"))?;

        let limit = self.config.connect_timeout;
        match timeout(limit, self.establish(&url)).await {
            Ok(result) => result?,
            Err(_) => {
                self.alive = false;
                return Err(Error::Timeout);
            }
        }

        tracing::info!(host = %url.host, port = url.port, app = %url.app, "Connected");
        Ok(())
    }

    async fn connect_stream(&mut self) -> Result<()> {
        if !self.is_connected() {
            return Err(ProtocolError::InvalidState("not connected").into());
        }
        let url = self
            .url
            .clone()
            .ok_or(ProtocolError::InvalidState("URL not set"))?;

        let limit = self.config.connect_timeout;
        let negotiation = if self.publishing {
            timeout(limit, self.start_publish(&url)).await
        } else {
            timeout(limit, self.start_play(&url)).await
        };
        negotiation.map_err(|_| Error::Timeout)??;

        tracing::info!(
            stream = %url.play_path,
            stream_id = self.stream_id,
            publishing = self.publishing,
            "Stream started"
        );
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.publishing {
            return Err(ProtocolError::InvalidState("read on a publish stream").into());
        }
        if buf.is_empty() {
            return Ok(0);
        }

        if self.pending.is_empty() {
            let deadline = Instant::now() + self.config.read_timeout;
            while self.pending.is_empty() {
                if self.stream_ended {
                    return Err(Error::EndOfStream);
                }
                match self.next_message(Some(deadline)).await? {
                    Some(message) => self.on_message(message)?,
                    None => return Ok(0),
                }
            }
        }

        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.advance(n);
        Ok(n)
    }

    async fn write(&mut self, data: &[u8]) -> Result<usize> {
        if !self.publishing {
            return Err(ProtocolError::InvalidState("write on a play stream").into());
        }
        if !self.is_connected() {
            return Err(Error::ConnectionClosed);
        }

        for tag in self.demuxer.push(data)? {
            self.queue_tag(tag);
        }
        if !self.write_buf.is_empty() {
            self.flush().await?;
        }
        Ok(data.len())
    }

    async fn pause(&mut self, pause: bool, stamp_ms: u32) -> Result<()> {
        if self.publishing || self.stream_id == 0 {
            return Err(ProtocolError::InvalidState("pause needs a play stream").into());
        }

        let stamp = if pause {
            self.pause_stamp = stamp_ms;
            stamp_ms
        } else if stamp_ms == 0 {
            self.pause_stamp
        } else {
            stamp_ms
        };

        let mut cmd = Command::stream(
            CMD_PAUSE,
            self.stream_id,
            vec![AmfValue::Boolean(pause), AmfValue::Number(stamp as f64)],
        );
        cmd.transaction_id = self.next_transaction_id();
        self.send_command(cmd).await?;

        tracing::debug!(pause = pause, stamp = stamp, "Pause requested");
        Ok(())
    }

    async fn close(&mut self) {
        if self.transport.is_none() {
            return;
        }

        if self.alive && self.stream_id != 0 {
            if self.publishing {
                if let Some(name) = self.url.as_ref().map(|u| u.play_path.clone()) {
                    let transaction_id = self.next_transaction_id();
                    self.queue_command(Command::call(
                        CMD_FC_UNPUBLISH,
                        transaction_id,
                        vec![name.into()],
                    ));
                }
            }
            let transaction_id = self.next_transaction_id();
            self.queue_command(Command::call(
                CMD_DELETE_STREAM,
                transaction_id,
                vec![AmfValue::Number(self.stream_id as f64)],
            ));
            if let Err(e) = self.flush().await {
                tracing::debug!(error = %e, "Failed to send teardown commands");
            }
        }

        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.writer.shutdown().await {
                tracing::debug!(error = %e, "Socket shutdown failed");
            }
        }

        self.alive = false;
        self.stream_id = 0;
        self.write_buf.clear();
        tracing::debug!("Connection closed");
    }

    fn is_connected(&self) -> bool {
        self.transport.is_some() && self.alive
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amf::amf0;
    use crate::media::flv::FLV_FILE_HEADER;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Script {
        Play,
        PlayIdle,
        RejectPlay,
        Publish,
        /// Unrelated `_error` replies arrive before the connect result
        StrayError,
        BadStreamId,
    }

    /// Minimal in-process RTMP server speaking through the crate's own codec
    struct TestServer {
        socket: TcpStream,
        buf: BytesMut,
        decoder: ChunkDecoder,
        encoder: ChunkEncoder,
    }

    impl TestServer {
        async fn accept(listener: TcpListener) -> std::io::Result<Self> {
            let (mut socket, _) = listener.accept().await?;

            let mut c0c1 = vec![0u8; 1 + HANDSHAKE_SIZE];
            socket.read_exact(&mut c0c1).await?;
            let mut reply = vec![RTMP_VERSION];
            reply.extend_from_slice(&[0u8; HANDSHAKE_SIZE]);
            reply.extend_from_slice(&c0c1[1..]);
            socket.write_all(&reply).await?;
            let mut c2 = vec![0u8; HANDSHAKE_SIZE];
            socket.read_exact(&mut c2).await?;

            Ok(Self {
                socket,
                buf: BytesMut::new(),
                decoder: ChunkDecoder::new(),
                encoder: ChunkEncoder::new(),
            })
        }

        async fn send(&mut self, message: RtmpMessage, stream_id: u32, timestamp: u32) {
            let (message_type, payload) = message.encode();
            let chunk = RtmpChunk {
                csid: message.default_csid(),
                timestamp,
                message_type,
                stream_id,
                payload,
            };
            let mut out = BytesMut::new();
            self.encoder.encode(&chunk, &mut out);
            let _ = self.socket.write_all(&out).await;
        }

        async fn status(&mut self, code: &str) {
            let info = AmfValue::object([("level", "status"), ("code", code)]);
            let cmd = Command::stream(CMD_ON_STATUS, 1, vec![info]);
            self.send(RtmpMessage::Command(cmd), 1, 0).await;
        }

        async fn recv(&mut self) -> Option<RtmpMessage> {
            loop {
                if let Some(chunk) = self.decoder.decode(&mut self.buf).ok()? {
                    return RtmpMessage::from_chunk(&chunk).ok();
                }
                if self.socket.read_buf(&mut self.buf).await.ok()? == 0 {
                    return None;
                }
            }
        }

        async fn send_media(&mut self) {
            let metadata = DataMessage {
                name: CMD_ON_METADATA.to_string(),
                values: vec![AmfValue::object([("width", 640.0)])],
                stream_id: 1,
            };
            self.send(RtmpMessage::Data(metadata), 1, 0).await;

            let mut keyframe = vec![0x17, 0x01];
            keyframe.resize(300, 0);
            let video = RtmpMessage::Video {
                timestamp: 40,
                data: Bytes::from(keyframe),
            };
            self.send(video, 1, 40).await;

            let audio = RtmpMessage::Audio {
                timestamp: 60,
                data: Bytes::from_static(&[0xAF, 0x01, 0x21]),
            };
            self.send(audio, 1, 60).await;

            let mut aggregate = BytesMut::new();
            FlvTag::new(FlvTagType::Video, 1000, Bytes::from_static(&[0x27, 0x01]))
                .write_to(&mut aggregate);
            FlvTag::new(FlvTagType::Audio, 1020, Bytes::from_static(&[0xAF, 0x01]))
                .write_to(&mut aggregate);
            let aggregate = RtmpMessage::Aggregate {
                timestamp: 100,
                data: aggregate.freeze(),
            };
            self.send(aggregate, 1, 100).await;
        }

        async fn respond(&mut self, script: Script, cmd: &Command) {
            match cmd.name.as_str() {
                CMD_CONNECT => {
                    if script == Script::StrayError {
                        let info = AmfValue::object([("code", "NetConnection.Call.Failed")]);
                        let stray = Command::call(CMD_ERROR, cmd.transaction_id + 40.0, vec![info]);
                        self.send(RtmpMessage::Command(stray), 0, 0).await;
                    }
                    self.send(RtmpMessage::WindowAckSize(1000), 0, 0).await;
                    self.send(RtmpMessage::UserControl(UserControlEvent::PingRequest(77)), 0, 0)
                        .await;
                    self.send(RtmpMessage::SetChunkSize(4096), 0, 0).await;
                    self.encoder.set_chunk_size(4096);
                    let info = AmfValue::object([("code", "NetConnection.Connect.Success")]);
                    let result = Command::call(CMD_RESULT, cmd.transaction_id, vec![info]);
                    self.send(RtmpMessage::Command(result), 0, 0).await;
                }
                CMD_CREATE_STREAM => {
                    let id = if script == Script::BadStreamId { -1.5 } else { 1.0 };
                    let result = Command::call(CMD_RESULT, cmd.transaction_id, vec![id.into()]);
                    self.send(RtmpMessage::Command(result), 0, 0).await;
                }
                CMD_PLAY if script == Script::RejectPlay => {
                    self.status("NetStream.Play.StreamNotFound").await;
                }
                CMD_PLAY => {
                    self.status(NS_PLAY_START).await;
                    if script == Script::Play {
                        self.send_media().await;
                        self.status(NS_PLAY_STOP).await;
                    }
                }
                CMD_PUBLISH => self.status(NS_PUBLISH_START).await,
                _ => {}
            }
        }
    }

    async fn serve(listener: TcpListener, script: Script, events: mpsc::UnboundedSender<String>) {
        let Ok(mut server) = TestServer::accept(listener).await else {
            return;
        };

        while let Some(message) = server.recv().await {
            let event = match &message {
                RtmpMessage::SetChunkSize(size) => {
                    server.decoder.set_chunk_size(*size);
                    continue;
                }
                RtmpMessage::Acknowledgement { .. } => "ack".to_string(),
                RtmpMessage::UserControl(UserControlEvent::PingResponse(ts)) => {
                    format!("pong:{}", ts)
                }
                RtmpMessage::Audio { timestamp, .. } => format!("audio:{}", timestamp),
                RtmpMessage::Video { timestamp, data } => {
                    format!("video:{}:{}", timestamp, data.len())
                }
                RtmpMessage::Data(data) => format!(
                    "data:{}:{}",
                    data.name,
                    data.values.first().and_then(AmfValue::as_str).unwrap_or("")
                ),
                RtmpMessage::Command(cmd) if cmd.name == CMD_PAUSE => format!(
                    "pause:{}:{}",
                    cmd.arguments[0].as_bool().unwrap(),
                    cmd.arguments[1].as_number().unwrap()
                ),
                RtmpMessage::Command(cmd) => match cmd.arguments.first().and_then(AmfValue::as_str) {
                    Some(name) => format!("{}:{}", cmd.name, name),
                    None => cmd.name.clone(),
                },
                _ => continue,
            };
            let _ = events.send(event);

            if let RtmpMessage::Command(cmd) = &message {
                server.respond(script, cmd).await;
            }
        }
    }

    async fn start(script: Script) -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(serve(listener, script, tx));
        (format!("rtmp://{}/live/cam.flv", addr), rx)
    }

    /// Events until the server sees the socket close
    async fn collect(events: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(event) = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
        {
            out.push(event);
        }
        out
    }

    fn commands(events: &[String]) -> Vec<&str> {
        events
            .iter()
            .map(String::as_str)
            .filter(|e| {
                !["ack", "pong", "audio", "video", "data", "pause"]
                    .iter()
                    .any(|p| e.starts_with(p))
            })
            .collect()
    }

    async fn connected(url: &str, config: ClientConfig, publish: bool) -> RtmpConnector {
        let mut connector = RtmpConnector::new(config);
        connector.setup_url(url).unwrap();
        if publish {
            connector.enable_write();
        }
        connector.connect().await.unwrap();
        connector.connect_stream().await.unwrap();
        connector
    }

    #[tokio::test]
    async fn test_play_produces_flv() {
        let (url, mut events) = start(Script::Play).await;
        let mut connector = connected(&url, ClientConfig::default(), false).await;
        assert!(connector.is_connected());
        assert_eq!(connector.stream_id(), 1);

        // Small buffer so tags straddle reads
        let mut flv = Vec::new();
        let mut buf = [0u8; 7];
        loop {
            match connector.read(&mut buf).await {
                Ok(n) => {
                    assert!(n > 0);
                    flv.extend_from_slice(&buf[..n]);
                }
                Err(Error::EndOfStream) => break,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        assert_eq!(&flv[..13], &FLV_FILE_HEADER);
        let tags = FlvDemuxer::new().push(&flv).unwrap();
        let summary: Vec<_> = tags.iter().map(|t| (t.tag_type, t.timestamp)).collect();
        assert_eq!(
            summary,
            vec![
                (FlvTagType::Script, 0),
                (FlvTagType::Video, 40),
                (FlvTagType::Audio, 60),
                (FlvTagType::Video, 100),
                (FlvTagType::Audio, 120),
            ]
        );
        assert!(tags[1].is_keyframe());
        assert_eq!(tags[1].data.len(), 300);

        let metadata = amf0::decode_all(&tags[0].data).unwrap();
        assert_eq!(metadata[0].as_str(), Some(CMD_ON_METADATA));
        assert_eq!(metadata[1].get_number("width"), Some(640.0));

        connector.close().await;
        assert!(!connector.is_connected());

        let events = collect(&mut events).await;
        assert!(events.iter().any(|e| e == "pong:77"));
        assert!(events.iter().any(|e| e == "ack"));
        assert_eq!(
            commands(&events),
            vec!["connect", "createStream", "play:cam", "deleteStream"]
        );
    }

    #[tokio::test]
    async fn test_publish_sends_tags() {
        let (url, mut events) = start(Script::Publish).await;
        let mut connector = connected(&url, ClientConfig::default(), true).await;

        let mut file = BytesMut::new();
        let mut muxer = FlvMuxer::new();
        let metadata = amf0::encode_all(&[
            CMD_ON_METADATA.into(),
            AmfValue::object([("width", 640.0)]),
        ]);
        muxer.write_tag(&FlvTag::new(FlvTagType::Script, 0, metadata), &mut file);
        let mut keyframe = vec![0x17, 0x01];
        keyframe.resize(500, 0);
        muxer.write_tag(&FlvTag::new(FlvTagType::Video, 0, Bytes::from(keyframe)), &mut file);
        muxer.write_tag(
            &FlvTag::new(FlvTagType::Audio, 23, Bytes::from_static(&[0xAF, 0x01, 0x21])),
            &mut file,
        );

        for slice in file.chunks(5) {
            assert_eq!(connector.write(slice).await.unwrap(), slice.len());
        }
        connector.close().await;

        let events = collect(&mut events).await;
        assert_eq!(
            commands(&events),
            vec![
                "connect",
                "releaseStream:cam",
                "FCPublish:cam",
                "createStream",
                "publish:cam",
                "FCUnpublish:cam",
                "deleteStream",
            ]
        );
        let media: Vec<&str> = events
            .iter()
            .map(String::as_str)
            .filter(|e| ["data", "video", "audio"].iter().any(|p| e.starts_with(p)))
            .collect();
        assert_eq!(
            media,
            vec!["data:@setDataFrame:onMetaData", "video:0:500", "audio:23"]
        );
    }

    #[tokio::test]
    async fn test_play_rejected() {
        let (url, _events) = start(Script::RejectPlay).await;
        let mut connector = RtmpConnector::new(ClientConfig::default());
        connector.setup_url(&url).unwrap();
        connector.connect().await.unwrap();

        match connector.connect_stream().await {
            Err(Error::Rejected(code)) => assert_eq!(code, "NetStream.Play.StreamNotFound"),
            other => panic!("expected rejection, got {:?}", other),
        }
        connector.close().await;
    }

    #[tokio::test]
    async fn test_read_timeout_and_pause() {
        let (url, mut events) = start(Script::PlayIdle).await;
        let config = ClientConfig::default().read_timeout(Duration::from_millis(100));
        let mut connector = connected(&url, config, false).await;

        let mut buf = [0u8; 64];
        assert_eq!(connector.read(&mut buf).await.unwrap(), 13);
        assert_eq!(connector.read(&mut buf).await.unwrap(), 0);
        assert!(connector.is_connected());

        connector.pause(true, 500).await.unwrap();
        connector.pause(false, 0).await.unwrap();
        assert!(connector.write(b"FLV").await.is_err());
        connector.close().await;

        let events = collect(&mut events).await;
        assert!(events.iter().any(|e| e == "pause:true:500"));
        assert!(events.iter().any(|e| e == "pause:false:500"));
    }

    #[tokio::test]
    async fn test_connect_failures() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut connector = RtmpConnector::new(ClientConfig::default());
        assert!(connector.connect().await.is_err());
        assert!(matches!(
            connector.setup_url("rtmp://host/app"),
            Err(Error::Config(_))
        ));

        connector
            .setup_url(&format!("rtmp://{}/live/cam", addr))
            .unwrap();
        assert!(connector.connect().await.is_err());
        assert!(!connector.is_connected());
        connector.close().await;
    }

    #[tokio::test]
    async fn test_connect_ignores_unrelated_error() {
        let (url, _events) = start(Script::StrayError).await;
        let mut connector = RtmpConnector::new(ClientConfig::default());
        connector.setup_url(&url).unwrap();
        connector.connect().await.unwrap();
        connector.connect_stream().await.unwrap();
        assert_eq!(connector.stream_id(), 1);
        connector.close().await;
    }

    #[tokio::test]
    async fn test_invalid_stream_id_rejected() {
        let (url, _events) = start(Script::BadStreamId).await;
        let mut connector = RtmpConnector::new(ClientConfig::default());
        connector.setup_url(&url).unwrap();
        connector.connect().await.unwrap();
        assert!(matches!(
            connector.connect_stream().await,
            Err(Error::Protocol(ProtocolError::UnexpectedResponse(_)))
        ));
        connector.close().await;
    }

    #[test]
    fn test_stream_id_range() {
        assert_eq!(stream_id_from(1.0).unwrap(), 1);
        assert_eq!(stream_id_from(u32::MAX as f64).unwrap(), u32::MAX);
        for bad in [0.0, -1.0, 1.5, f64::NAN, f64::INFINITY, u32::MAX as f64 + 1.0] {
            assert!(stream_id_from(bad).is_err(), "{} accepted", bad);
        }
    }

    #[test]
    fn test_set_data_frame_prefix() {
        let body = amf0::encode_all(&[CMD_ON_METADATA.into()]);
        let prefixed = with_set_data_frame(body.clone());
        let values = amf0::decode_all(&prefixed).unwrap();
        assert_eq!(values[0].as_str(), Some(CMD_SET_DATA_FRAME));
        assert_eq!(values[1].as_str(), Some(CMD_ON_METADATA));

        // Already prefixed bodies pass through
        assert_eq!(with_set_data_frame(prefixed.clone()), prefixed);
    }
}

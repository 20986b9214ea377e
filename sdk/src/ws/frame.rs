//! STOMP 1.2 frame codec.
//!
//! The auction server speaks STOMP over WebSocket text messages. A frame is
//! a command line, `name:value` header lines, a blank line, a body and a
//! terminating NUL. A bare end-of-line between frames is a heartbeat.

use std::fmt;
use std::time::Duration;

use super::error::WsError;

/// Heartbeat frame sent on the outgoing interval.
pub const HEARTBEAT: &str = "\n";

/// Protocol versions offered on CONNECT.
pub const ACCEPT_VERSION: &str = "1.2,1.1,1.0";

/// Largest inbound frame the decoder buffers, in bytes.
pub const MAX_FRAME_BYTES: usize = 1 << 20;

/// STOMP frame commands used by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Client handshake.
    Connect,
    /// Server handshake reply.
    Connected,
    /// Publish to a destination.
    Send,
    /// Open a subscription.
    Subscribe,
    /// Close a subscription.
    Unsubscribe,
    /// Graceful client shutdown.
    Disconnect,
    /// Message delivered on a subscription.
    Message,
    /// Receipt for a client frame.
    Receipt,
    /// Server-side error; the server closes the connection after it.
    Error,
}

impl Command {
    /// Returns the wire name of the command.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    /// Parses a command line.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        match line {
            "CONNECT" | "STOMP" => Some(Self::Connect),
            "CONNECTED" => Some(Self::Connected),
            "SEND" => Some(Self::Send),
            "SUBSCRIBE" => Some(Self::Subscribe),
            "UNSUBSCRIBE" => Some(Self::Unsubscribe),
            "DISCONNECT" => Some(Self::Disconnect),
            "MESSAGE" => Some(Self::Message),
            "RECEIPT" => Some(Self::Receipt),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }

    /// CONNECT and CONNECTED headers are never escaped.
    const fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame command.
    pub command: Command,
    /// Headers in wire order. Repeated names are allowed; the first wins.
    pub headers: Vec<(String, String)>,
    /// Frame body.
    pub body: String,
}

impl Frame {
    /// Creates an empty frame.
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Appends a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the first value of a header.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Builds the CONNECT frame.
    #[must_use]
    pub fn connect(credential: Option<&str>, heartbeat: &str) -> Self {
        let frame = Self::new(Command::Connect)
            .with_header("accept-version", ACCEPT_VERSION)
            .with_header("heart-beat", heartbeat);
        with_authorization(frame, credential)
    }

    /// Builds a SUBSCRIBE frame.
    #[must_use]
    pub fn subscribe(id: &str, destination: &str, credential: Option<&str>) -> Self {
        let frame = Self::new(Command::Subscribe)
            .with_header("id", id)
            .with_header("destination", destination)
            .with_header("ack", "auto");
        with_authorization(frame, credential)
    }

    /// Builds an UNSUBSCRIBE frame.
    #[must_use]
    pub fn unsubscribe(id: &str) -> Self {
        Self::new(Command::Unsubscribe).with_header("id", id)
    }

    /// Builds a SEND frame with a JSON body.
    #[must_use]
    pub fn send(destination: &str, json: String, credential: Option<&str>) -> Self {
        let frame = Self::new(Command::Send)
            .with_header("destination", destination)
            .with_header("content-type", "application/json");
        with_authorization(frame, credential).with_body(json)
    }

    /// Builds the DISCONNECT frame.
    #[must_use]
    pub fn disconnect() -> Self {
        Self::new(Command::Disconnect)
    }

    /// Encodes the frame for the wire.
    #[must_use]
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());

        out.push_str(self.command.as_str());
        out.push('\n');

        for (name, value) in &self.headers {
            if escape {
                push_escaped(&mut out, name);
                out.push(':');
                push_escaped(&mut out, value);
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }

        if !self.body.is_empty() && self.header("content-length").is_none() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }

        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

fn with_authorization(frame: Frame, credential: Option<&str>) -> Frame {
    match credential {
        Some(token) => frame.with_header("Authorization", format!("Bearer {}", token)),
        None => frame,
    }
}

fn push_escaped(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
}

fn unescape(value: &str) -> Result<String, WsError> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            Some(other) => {
                return Err(WsError::Frame(format!("undefined escape \\{}", other)));
            }
            None => return Err(WsError::Frame("dangling escape".to_string())),
        }
    }

    Ok(out)
}

/// One decoded unit of inbound traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A bare end-of-line.
    Heartbeat,
    /// A complete frame.
    Frame(Frame),
}

/// Incremental decoder for inbound text.
///
/// Accepts partial frames and several frames per chunk. On a malformed
/// frame, or one larger than [`MAX_FRAME_BYTES`], the buffered input is
/// discarded so later chunks still decode.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    /// Creates an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk of inbound text.
    pub fn push(&mut self, chunk: &str) {
        self.buffer.extend_from_slice(chunk.as_bytes());
    }

    /// Returns true if no partial input is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Returns the next complete unit, or `None` if more input is needed.
    ///
    /// # Errors
    ///
    /// Returns `WsError::Frame` if the buffered input is not valid STOMP.
    pub fn next_frame(&mut self) -> Result<Option<Inbound>, WsError> {
        let result = self.decode_next();
        if result.is_err() {
            self.buffer.clear();
        }
        result
    }

    fn decode_next(&mut self) -> Result<Option<Inbound>, WsError> {
        match self.buffer.first() {
            None => return Ok(None),
            Some(b'\n') => {
                self.buffer.drain(..1);
                return Ok(Some(Inbound::Heartbeat));
            }
            Some(b'\r') => {
                return match self.buffer.get(1) {
                    Some(b'\n') => {
                        self.buffer.drain(..2);
                        Ok(Some(Inbound::Heartbeat))
                    }
                    Some(_) => Err(WsError::Frame("stray carriage return".to_string())),
                    None => Ok(None),
                };
            }
            Some(_) => {}
        }

        let Some((head_end, body_start)) = find_header_end(&self.buffer) else {
            return self.incomplete();
        };

        let head = self
            .buffer
            .get(..head_end)
            .map(std::str::from_utf8)
            .transpose()
            .map_err(|_| WsError::Frame("header block is not UTF-8".to_string()))?
            .unwrap_or_default();

        let mut lines = head.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));
        let command_line = lines.next().unwrap_or_default();
        let command = Command::parse(command_line)
            .ok_or_else(|| WsError::Frame(format!("unknown command {:?}", command_line)))?;

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| WsError::Frame(format!("header without colon: {:?}", line)))?;
            if command.escapes_headers() {
                headers.push((unescape(name)?, unescape(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let content_length = headers
            .iter()
            .find(|(name, _)| name == "content-length")
            .map(|(_, value)| value.trim().parse::<usize>())
            .transpose()
            .map_err(|_| WsError::Frame("invalid content-length".to_string()))?;

        let (body_end, frame_end) = match content_length {
            Some(len) => {
                let end = body_start
                    .checked_add(len)
                    .filter(|end| *end < MAX_FRAME_BYTES)
                    .ok_or_else(|| {
                        WsError::Frame(format!("content-length {} exceeds frame limit", len))
                    })?;
                match self.buffer.get(end) {
                    None => return Ok(None),
                    Some(0) => (end, end + 1),
                    Some(_) => {
                        return Err(WsError::Frame(
                            "body longer than content-length".to_string(),
                        ))
                    }
                }
            }
            None => {
                let tail = self.buffer.get(body_start..).unwrap_or_default();
                match tail.iter().position(|b| *b == 0) {
                    Some(pos) => (body_start + pos, body_start + pos + 1),
                    None => return self.incomplete(),
                }
            }
        };

        let body = self
            .buffer
            .get(body_start..body_end)
            .map(|bytes| String::from_utf8(bytes.to_vec()))
            .transpose()
            .map_err(|_| WsError::Frame("body is not UTF-8".to_string()))?
            .unwrap_or_default();

        self.buffer.drain(..frame_end);

        Ok(Some(Inbound::Frame(Frame {
            command,
            headers,
            body,
        })))
    }

    /// Waits for more input unless the partial frame is already too large.
    fn incomplete(&self) -> Result<Option<Inbound>, WsError> {
        if self.buffer.len() >= MAX_FRAME_BYTES {
            return Err(WsError::Frame(format!(
                "unterminated frame exceeds {} bytes",
                MAX_FRAME_BYTES
            )));
        }
        Ok(None)
    }
}

/// Finds the blank line ending the header block.
///
/// Returns the end of the header text and the start of the body.
fn find_header_end(buffer: &[u8]) -> Option<(usize, usize)> {
    buffer.iter().enumerate().find_map(|(i, b)| {
        if *b != b'\n' {
            return None;
        }
        match (buffer.get(i + 1), buffer.get(i + 2)) {
            (Some(b'\n'), _) => Some((i, i + 2)),
            (Some(b'\r'), Some(b'\n')) => Some((i, i + 3)),
            _ => None,
        }
    })
}

/// Effective heartbeat intervals after negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Heartbeat {
    /// How often the client must send something.
    pub outgoing: Option<Duration>,
    /// How often the server promised to send something.
    pub incoming: Option<Duration>,
}

impl Heartbeat {
    /// Negotiates intervals from the client offer and the server's
    /// `heart-beat` header.
    ///
    /// Each direction is the larger of the two sides, or disabled if either
    /// side sent 0. A missing or malformed header disables both.
    #[must_use]
    pub fn negotiate(
        client_outgoing: Duration,
        client_incoming: Duration,
        server_header: Option<&str>,
    ) -> Self {
        let (server_outgoing, server_incoming) =
            server_header.and_then(parse_heartbeat).unwrap_or((0, 0));
        let cx = u64::try_from(client_outgoing.as_millis()).unwrap_or(u64::MAX);
        let cy = u64::try_from(client_incoming.as_millis()).unwrap_or(u64::MAX);

        let pick = |ours: u64, theirs: u64| {
            (ours != 0 && theirs != 0).then(|| Duration::from_millis(ours.max(theirs)))
        };

        Self {
            outgoing: pick(cx, server_incoming),
            incoming: pick(cy, server_outgoing),
        }
    }
}

/// Parses a `heart-beat` header value (`"sx,sy"` in milliseconds).
#[must_use]
pub fn parse_heartbeat(value: &str) -> Option<(u64, u64)> {
    let (first, second) = value.split_once(',')?;
    Some((first.trim().parse().ok()?, second.trim().parse().ok()?))
}

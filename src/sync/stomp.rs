//! Minimal STOMP 1.2 text-frame codec.
//!
//! Frame layout: `COMMAND\nheader:value\n...\n\nbody\0`. Header values are
//! escaped (`\\`, `\n`, `\r`, `\c`) except on CONNECT/CONNECTED frames. Bare
//! EOLs between frames are heart-beats and are skipped.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect,
    Connected,
    Subscribe,
    Send,
    Message,
    Receipt,
    Error,
    Disconnect,
}

impl Command {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "CONNECT" | "STOMP" => Some(Self::Connect),
            "CONNECTED" => Some(Self::Connected),
            "SUBSCRIBE" => Some(Self::Subscribe),
            "SEND" => Some(Self::Send),
            "MESSAGE" => Some(Self::Message),
            "RECEIPT" => Some(Self::Receipt),
            "ERROR" => Some(Self::Error),
            "DISCONNECT" => Some(Self::Disconnect),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Connected => "CONNECTED",
            Self::Subscribe => "SUBSCRIBE",
            Self::Send => "SEND",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
            Self::Disconnect => "DISCONNECT",
        }
    }

    /// CONNECT and CONNECTED headers are sent verbatim.
    fn escapes_headers(&self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("unknown STOMP command: {0}")]
    UnknownCommand(String),
    #[error("malformed STOMP header line: {0}")]
    MalformedHeader(String),
    #[error("invalid escape sequence in STOMP header")]
    InvalidEscape,
    #[error("STOMP frame is missing its NUL terminator")]
    Unterminated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value for `name`; STOMP says repeated headers keep the first.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn connect(host: &str, admin_id: Option<&str>) -> Self {
        let mut frame = Self::new(Command::Connect)
            .header("accept-version", "1.2")
            .header("host", host)
            .header("heart-beat", "0,0");
        if let Some(id) = admin_id {
            frame = frame.header("Admin-ID", id);
        }
        frame
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    pub fn send_json(destination: &str, body: &serde_json::Value) -> Self {
        Self::new(Command::Send)
            .header("destination", destination)
            .header("content-type", "application/json")
            .body(body.to_string())
    }

    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        let escape = self.command.escapes_headers();
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command.as_str())?;
        if let Some(dest) = self.get("destination") {
            write!(f, " {dest}")?;
        }
        Ok(())
    }
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(raw: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(FrameError::InvalidEscape),
        }
    }
    Ok(out)
}

/// Decode every frame contained in one WebSocket text message.
pub fn decode(text: &str) -> Result<Vec<Frame>, FrameError> {
    let mut frames = Vec::new();
    let mut rest = text;
    loop {
        rest = rest.trim_start_matches(['\n', '\r']);
        if rest.is_empty() {
            return Ok(frames);
        }
        let (frame, remaining) = decode_one(rest)?;
        frames.push(frame);
        rest = remaining;
    }
}

fn decode_one(text: &str) -> Result<(Frame, &str), FrameError> {
    let (command_line, mut rest) = text.split_once('\n').ok_or(FrameError::Unterminated)?;
    let command_line = command_line.trim_end_matches('\r');
    let command = Command::parse(command_line)
        .ok_or_else(|| FrameError::UnknownCommand(command_line.to_string()))?;

    let mut headers = Vec::new();
    loop {
        let (line, remaining) = rest.split_once('\n').ok_or(FrameError::Unterminated)?;
        rest = remaining;
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
        if command.escapes_headers() {
            headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .and_then(|(_, v)| v.trim().parse::<usize>().ok());

    let (body, remaining) = match content_length {
        Some(len) if rest.len() > len && rest.is_char_boundary(len) => {
            let (body, tail) = rest.split_at(len);
            let tail = tail.strip_prefix('\0').ok_or(FrameError::Unterminated)?;
            (body, tail)
        }
        _ => {
            let end = rest.find('\0').ok_or(FrameError::Unterminated)?;
            (&rest[..end], &rest[end + 1..])
        }
    };

    Ok((
        Frame {
            command,
            headers,
            body: body.to_string(),
        },
        remaining,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_frame_encoding() {
        let encoded = Frame::subscribe("sub-0", "/topic/orders").encode();
        assert_eq!(
            encoded,
            "SUBSCRIBE\nid:sub-0\ndestination:/topic/orders\nack:auto\n\n\0"
        );
    }

    #[test]
    fn test_send_frame_carries_content_length() {
        let body = serde_json::json!({ "type": "ADMIN_CONNECTED" });
        let encoded = Frame::send_json("/app/admin", &body).encode();
        assert!(encoded.starts_with("SEND\ndestination:/app/admin\n"));
        assert!(encoded.contains("content-length:26\n"));
        assert!(encoded.ends_with("\n\n{\"type\":\"ADMIN_CONNECTED\"}\0"));
    }

    #[test]
    fn test_decode_message_with_heartbeats_and_two_frames() {
        let text = "\nMESSAGE\ndestination:/topic/orders\nsubscription:sub-0\n\n[1]\0\n\
                    MESSAGE\r\ndestination:/topic/notifications\r\n\r\n{}\0";
        let frames = decode(text).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].command, Command::Message);
        assert_eq!(frames[0].get("destination"), Some("/topic/orders"));
        assert_eq!(frames[0].body, "[1]");
        assert_eq!(frames[1].get("destination"), Some("/topic/notifications"));
        assert_eq!(frames[1].body, "{}");
    }

    #[test]
    fn test_decode_respects_content_length_with_embedded_nul() {
        let text = "MESSAGE\ndestination:/x\ncontent-length:3\n\na\0b\0";
        let frames = decode(text).unwrap();
        assert_eq!(frames[0].body, "a\0b");
    }

    #[test]
    fn test_header_escaping() {
        let frame = Frame::new(Command::Send).header("note", "a:b\nc\\d");
        let encoded = frame.encode();
        assert!(encoded.contains("note:a\\cb\\nc\\\\d\n"));
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded[0].get("note"), Some("a:b\nc\\d"));

        // CONNECTED headers are not unescaped.
        let connected = decode("CONNECTED\nversion:1.2\nserver:x\\c1\n\n\0").unwrap();
        assert_eq!(connected[0].get("server"), Some("x\\c1"));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(
            decode("HELLO\n\n\0"),
            Err(FrameError::UnknownCommand("HELLO".to_string()))
        );
        assert_eq!(decode("MESSAGE\nbroken\n\n\0"), Err(FrameError::MalformedHeader("broken".to_string())));
        assert_eq!(decode("MESSAGE\n\nbody"), Err(FrameError::Unterminated));
    }
}

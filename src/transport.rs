// Framed JSON-RPC message channel over any async byte stream

use crate::error::{Result, TransportError};
use tokio::io::{
    self, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin,
    Stdout,
};

/// Largest Content-Length body accepted
pub const MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Detect framing based on the first successfully read message.
    Auto,
    /// Newline-delimited JSON messages.
    Newline,
    /// JSON-RPC/LSP style framing: `Content-Length: N\r\n\r\n<json bytes>`
    ContentLength,
}

fn trim_crlf(s: &str) -> &str {
    s.trim_end_matches(&['\r', '\n'][..])
}

fn parse_content_length_header(line: &str) -> Option<usize> {
    // Case-insensitive header name, optional whitespace.
    let line = trim_crlf(line).trim();
    let (name, value) = line.split_once(':')?;
    if !name.trim().eq_ignore_ascii_case("content-length") {
        return None;
    }
    value.trim().parse::<usize>().ok()
}

/// One end of a duplex message channel.
///
/// The server side runs over stdin/stdout, the client side over a child
/// process's pipes, and tests over `tokio::io::duplex`.
pub struct FramedTransport<R, W> {
    reader: BufReader<R>,
    writer: W,
    framing: Framing,
}

/// Server-side transport bound to the process's stdin/stdout
pub type StdioTransport = FramedTransport<Stdin, Stdout>;

impl StdioTransport {
    pub fn stdio() -> Self {
        Self::new(io::stdin(), io::stdout())
    }
}

impl<R, W> FramedTransport<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Transport that detects framing from the first inbound message
    pub fn new(reader: R, writer: W) -> Self {
        Self::with_framing(reader, writer, Framing::Auto)
    }

    pub fn with_framing(reader: R, writer: W, framing: Framing) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
            framing,
        }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Read one JSON-RPC message.
    ///
    /// End of input is reported as `TransportError::ConnectionClosed`.
    pub async fn read_message(&mut self) -> Result<String> {
        match self.framing {
            Framing::Auto => self.read_message_auto().await,
            Framing::Newline => self.read_message_newline().await,
            Framing::ContentLength => self.read_message_content_length().await,
        }
    }

    /// Write one JSON-RPC message using the detected framing.
    pub async fn write_message(&mut self, message: &str) -> Result<()> {
        match self.framing {
            Framing::ContentLength => self.write_message_content_length(message).await,
            Framing::Auto | Framing::Newline => self.write_message_newline(message).await,
        }
    }

    /// Flush and close the write half
    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await.map_err(TransportError::Io)?;
        Ok(())
    }

    async fn write_message_newline(&mut self, message: &str) -> Result<()> {
        self.writer
            .write_all(message.as_bytes())
            .await
            .map_err(TransportError::Io)?;
        self.writer.write_all(b"\n").await.map_err(TransportError::Io)?;
        self.writer.flush().await.map_err(TransportError::Io)?;
        Ok(())
    }

    async fn write_message_content_length(&mut self, message: &str) -> Result<()> {
        let bytes = message.as_bytes();
        let header = format!("Content-Length: {}\r\n\r\n", bytes.len());
        self.writer
            .write_all(header.as_bytes())
            .await
            .map_err(TransportError::Io)?;
        self.writer.write_all(bytes).await.map_err(TransportError::Io)?;
        self.writer.flush().await.map_err(TransportError::Io)?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String> {
        let mut line = Vec::new();
        let n = self
            .reader
            .read_until(b'\n', &mut line)
            .await
            .map_err(TransportError::Io)?;
        if n == 0 {
            return Err(TransportError::ConnectionClosed.into());
        }
        // The whole line is consumed either way, so the stream stays in sync.
        String::from_utf8(line).map_err(|e| {
            TransportError::InvalidMessage(format!("Invalid UTF-8 in JSON-RPC message: {}", e))
                .into()
        })
    }

    async fn read_message_newline(&mut self) -> Result<String> {
        loop {
            let line = self.read_line().await?;
            let trimmed = trim_crlf(&line);
            if !trimmed.trim().is_empty() {
                return Ok(trimmed.to_string());
            }
        }
    }

    async fn read_message_auto(&mut self) -> Result<String> {
        loop {
            let line = self.read_line().await?;
            let line_trimmed = trim_crlf(&line);
            if line_trimmed.trim().is_empty() {
                continue;
            }

            if parse_content_length_header(line_trimmed).is_some() {
                self.framing = Framing::ContentLength;
                return self
                    .read_message_content_length_with_first_line(line_trimmed)
                    .await;
            }

            self.framing = Framing::Newline;
            return Ok(line_trimmed.to_string());
        }
    }

    async fn read_message_content_length(&mut self) -> Result<String> {
        let first = self.read_line().await?;
        self.read_message_content_length_with_first_line(trim_crlf(&first))
            .await
    }

    async fn read_message_content_length_with_first_line(&mut self, first: &str) -> Result<String> {
        let content_length = parse_content_length_header(first).ok_or_else(|| {
            TransportError::InvalidMessage(format!(
                "Expected Content-Length header, got: {}",
                first
            ))
        })?;

        // Remaining headers end at a blank line.
        loop {
            let header_line = self.read_line().await?;
            if trim_crlf(&header_line).is_empty() {
                break;
            }
        }

        if content_length > MAX_MESSAGE_BYTES {
            return Err(TransportError::InvalidMessage(format!(
                "Content-Length {} exceeds the {} byte limit",
                content_length, MAX_MESSAGE_BYTES
            ))
            .into());
        }

        let mut buf = vec![0u8; content_length];
        self.reader
            .read_exact(&mut buf)
            .await
            .map_err(TransportError::Io)?;

        let s = String::from_utf8(buf).map_err(|e| {
            TransportError::InvalidMessage(format!("Invalid UTF-8 in JSON-RPC message: {}", e))
        })?;
        Ok(s)
    }
}

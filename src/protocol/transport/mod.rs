//! Line-delimited stdio transport.
//!
//! One logical message per non-empty trimmed line. Diagnostics go to stderr
//! so they can never interleave with protocol bytes on stdout.

use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout,
};

pub struct Transport<R, W> {
    reader: R,
    writer: W,
}

impl Transport<BufReader<Stdin>, Stdout> {
    /// Transport over the process's stdin/stdout.
    pub fn stdio() -> Self {
        Self {
            reader: BufReader::new(tokio::io::stdin()),
            writer: tokio::io::stdout(),
        }
    }
}

impl<R, W> Transport<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Read the next message, skipping empty lines.
    ///
    /// Returns `None` on end-of-stream. Read errors (including invalid
    /// UTF-8) are treated as end-of-stream so the caller's loop terminates
    /// cleanly instead of propagating.
    pub async fn read_message(&mut self) -> Option<String> {
        let mut line = String::new();
        loop {
            line.clear();
            match self.reader.read_line(&mut line).await {
                Ok(0) => return None,
                Ok(_) => {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        return Some(trimmed.to_string());
                    }
                }
                Err(_) => return None,
            }
        }
    }

    /// Write one message followed by a newline, flushed immediately.
    /// A write failure is unrecoverable for the caller.
    pub async fn write_message(&mut self, message: &str) -> std::io::Result<()> {
        self.writer.write_all(message.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await
    }

    /// Emit a human-readable diagnostic line on stderr.
    pub fn log(&self, message: &str) {
        eprintln!("[MCP] {}", message);
    }
}

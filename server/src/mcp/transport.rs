//! MCP Transport Layer
//!
//! Newline-delimited JSON-RPC over any async reader/writer pair; stdio in
//! production, in-memory buffers in tests.

use super::protocol::{JsonRpcRequest, JsonRpcResponse};
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// One line read from the client
#[derive(Debug)]
pub enum Inbound {
    Request(JsonRpcRequest),
    /// Line that is not a JSON-RPC request
    Malformed(String),
    Blank,
}

pub struct LineTransport<R, W> {
    reader: R,
    writer: W,
    line: Vec<u8>,
}

impl LineTransport<BufReader<tokio::io::Stdin>, tokio::io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            line: Vec::new(),
        }
    }

    /// Next message, or `None` at end of input
    pub async fn read_message(&mut self) -> io::Result<Option<Inbound>> {
        self.line.clear();
        if self.reader.read_until(b'\n', &mut self.line).await? == 0 {
            return Ok(None);
        }

        let line = match std::str::from_utf8(&self.line) {
            Ok(text) => text.trim(),
            Err(e) => {
                tracing::warn!("Dropping non-UTF-8 input line: {}", e);
                return Ok(Some(Inbound::Malformed(e.to_string())));
            }
        };
        if line.is_empty() {
            return Ok(Some(Inbound::Blank));
        }

        Ok(Some(match serde_json::from_str(line) {
            Ok(request) => Inbound::Request(request),
            Err(e) => {
                tracing::warn!("Failed to parse JSON-RPC request: {}", e);
                Inbound::Malformed(e.to_string())
            }
        }))
    }

    pub async fn write_response(&mut self, response: &JsonRpcResponse) -> io::Result<()> {
        let json = serde_json::to_string(response)?;
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await
    }

    pub fn into_writer(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::JsonRpcError;

    #[tokio::test]
    async fn test_reads_lines_until_eof() {
        let input = b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n\n{oops\n".as_slice();
        let mut transport = LineTransport::new(input, Vec::new());

        assert!(matches!(
            transport.read_message().await.unwrap(),
            Some(Inbound::Request(r)) if r.method == "ping"
        ));
        assert!(matches!(
            transport.read_message().await.unwrap(),
            Some(Inbound::Blank)
        ));
        assert!(matches!(
            transport.read_message().await.unwrap(),
            Some(Inbound::Malformed(_))
        ));
        assert!(transport.read_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_malformed() {
        let input = b"\xff\xfe{}\n{\"jsonrpc\":\"2.0\",\"method\":\"ping\"}\n".as_slice();
        let mut transport = LineTransport::new(input, Vec::new());

        assert!(matches!(
            transport.read_message().await.unwrap(),
            Some(Inbound::Malformed(_))
        ));
        assert!(matches!(
            transport.read_message().await.unwrap(),
            Some(Inbound::Request(r)) if r.method == "ping"
        ));
    }

    #[tokio::test]
    async fn test_writes_one_line_per_response() {
        let mut transport = LineTransport::new(b"".as_slice(), Vec::new());
        transport
            .write_response(&JsonRpcResponse::error(
                Some(serde_json::json!(1)),
                JsonRpcError::method_not_found("nope"),
            ))
            .await
            .unwrap();

        let out = String::from_utf8(transport.into_writer()).unwrap();
        assert!(out.ends_with('\n'));
        assert_eq!(out.lines().count(), 1);
        assert!(out.contains("-32601"));
    }
}

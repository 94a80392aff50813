//! Newline-delimited JSON-RPC over a reader/writer pair (stdin/stdout in
//! production).

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::mcp::McpServer;

/// Serve messages until the reader hits end of input.
pub async fn serve<R, W>(server: &McpServer, reader: R, mut writer: W) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(reply) = server.handle_text(line).await {
            let mut out = reply.to_string();
            out.push('\n');
            writer.write_all(out.as_bytes()).await?;
            writer.flush().await?;
        }
    }
    log::info!("input closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::sync::Arc;
    use tokio::io::BufReader;
    use vectool_core::testutil::test_context;
    use vectool_core::tool::build_registry;

    #[tokio::test]
    async fn one_reply_per_request_line() {
        let server = McpServer::new(build_registry(Arc::new(test_context())));
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
            "\n",
            "garbage\n",
        );
        let mut output = Vec::new();
        serve(&server, BufReader::new(input.as_bytes()), &mut output).await.unwrap();

        let replies: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(replies.len(), 3);
        assert_eq!(replies[0]["id"], 1);
        assert_eq!(replies[1]["id"], 2);
        assert_eq!(replies[2]["error"]["code"], crate::mcp::PARSE_ERROR);
    }
}

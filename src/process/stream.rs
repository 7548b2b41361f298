//! Line-oriented reading of child process pipes

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Read `reader` line by line until EOF, calling `on_line` for each line.
///
/// Lines are decoded lossily so a stray non-UTF-8 byte never ends the stream,
/// and the line terminator (`\n` or `\r\n`) is stripped. A read error ends
/// the stream like EOF would.
pub async fn read_lines<R, F>(reader: R, mut on_line: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(String),
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                }
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
                on_line(String::from_utf8_lossy(&buf).into_owned());
            }
            Err(e) => {
                tracing::debug!(error = %e, "pipe read failed");
                break;
            }
        }
    }
}

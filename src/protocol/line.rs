//! Bounded line reading shared by the request and response decoders.

use bytes::BytesMut;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::error::{Error, Result};

/// Maximum length of a header line, terminator included.
pub const MAX_LINE_LENGTH: usize = 1024;

/// Largest piece of an attachment body moved at once.
pub const CHUNK_SIZE: usize = MAX_LINE_LENGTH;

/// Read one `\n`-terminated line into `line`, without the terminator.
///
/// Returns `Ok(false)` when the stream ends exactly at a line boundary.
/// Never consumes bytes past the terminator, so a length-governed read can
/// pick up right where the header ended.
pub(crate) async fn read_line<R>(reader: &mut R, line: &mut BytesMut) -> Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();

    loop {
        let (done, used) = {
            let available = reader
                .fill_buf()
                .await
                .map_err(|e| Error::io("read()", e))?;

            if available.is_empty() {
                if line.is_empty() {
                    return Ok(false);
                }
                return Err(Error::PrematureEof("unterminated header line".to_string()));
            }

            match find_newline(available) {
                Some(pos) => {
                    if line.len() + pos + 1 > MAX_LINE_LENGTH {
                        return Err(Error::LineTooLong {
                            limit: MAX_LINE_LENGTH,
                        });
                    }
                    line.extend_from_slice(&available[..pos]);
                    (true, pos + 1)
                }
                None => {
                    // The terminator still has to fit after these bytes
                    if line.len() + available.len() + 1 > MAX_LINE_LENGTH {
                        return Err(Error::LineTooLong {
                            limit: MAX_LINE_LENGTH,
                        });
                    }
                    line.extend_from_slice(available);
                    (false, available.len())
                }
            }
        };

        reader.consume(used);
        if done {
            return Ok(true);
        }
    }
}

/// Header lines are text; anything else is a protocol violation.
pub(crate) fn as_text(line: &[u8]) -> Result<&str> {
    std::str::from_utf8(line)
        .map_err(|_| Error::ProtocolParse("header line is not valid UTF-8".to_string()))
}

fn find_newline(buffer: &[u8]) -> Option<usize> {
    buffer.iter().position(|&b| b == b'\n')
}

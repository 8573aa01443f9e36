//! Request grammar: `user=` line, optional `img=` line, message line.

use bytes::BytesMut;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt};

use super::line::{as_text, read_line, MAX_LINE_LENGTH};
use crate::error::{Error, Result};

const USER_PREFIX: &str = "user=";
const IMAGE_PREFIX: &str = "img=";

/// A message posted to the bulletin board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub user: String,
    pub image: Option<String>,
    pub message: String,
}

impl Request {
    pub fn new(user: impl Into<String>, message: impl Into<String>) -> Self {
        Request {
            user: user.into(),
            image: None,
            message: message.into(),
        }
    }

    /// Attach an image URL.
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Check that the request can be expressed in the line grammar.
    pub fn validate(&self) -> Result<()> {
        if self.user.is_empty() {
            return Err(Error::InvalidRequest("user must not be empty".to_string()));
        }

        check_line("user", USER_PREFIX.len() + self.user.len(), &self.user)?;
        if let Some(image) = &self.image {
            check_line("image", IMAGE_PREFIX.len() + image.len(), image)?;
        }
        check_line("message", self.message.len(), &self.message)?;

        // Without an img= line the decoder would read this message as one
        if self.image.is_none() && self.message.starts_with(IMAGE_PREFIX) {
            return Err(Error::InvalidRequest(format!(
                "message must not start with {IMAGE_PREFIX:?} unless an image is given"
            )));
        }

        Ok(())
    }

    /// Append the wire form of this request to `buf`.
    pub fn encode_to(&self, buf: &mut BytesMut) -> Result<()> {
        self.validate()?;

        buf.extend_from_slice(USER_PREFIX.as_bytes());
        buf.extend_from_slice(self.user.as_bytes());
        buf.extend_from_slice(b"\n");

        if let Some(image) = &self.image {
            buf.extend_from_slice(IMAGE_PREFIX.as_bytes());
            buf.extend_from_slice(image.as_bytes());
            buf.extend_from_slice(b"\n");
        }

        buf.extend_from_slice(self.message.as_bytes());
        buf.extend_from_slice(b"\n");
        Ok(())
    }
}

fn check_line(field: &str, content_len: usize, value: &str) -> Result<()> {
    if value.contains('\n') {
        return Err(Error::InvalidRequest(format!(
            "{field} must not contain a newline"
        )));
    }
    if content_len + 1 > MAX_LINE_LENGTH {
        return Err(Error::InvalidRequest(format!(
            "{field} line exceeds {MAX_LINE_LENGTH} bytes"
        )));
    }
    Ok(())
}

/// Write a request and flush. The caller half-closes afterwards.
pub async fn encode_request<W>(writer: &mut W, request: &Request) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(64 + request.message.len());
    request.encode_to(&mut buf)?;

    writer
        .write_all(&buf)
        .await
        .map_err(|e| Error::io("write()", e))?;
    writer.flush().await.map_err(|e| Error::io("flush()", e))
}

/// Read exactly one request, up to and including the sender's half-close.
pub async fn decode_request<R>(reader: &mut R) -> Result<Request>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = BytesMut::with_capacity(MAX_LINE_LENGTH);

    if !read_line(reader, &mut line).await? {
        return Err(Error::PrematureEof("missing user line".to_string()));
    }
    let user = match as_text(&line)?.strip_prefix(USER_PREFIX) {
        Some(user) if !user.is_empty() => user.to_string(),
        Some(_) => return Err(Error::ProtocolParse("empty user".to_string())),
        None => {
            return Err(Error::ProtocolParse(format!(
                "expected user line, got {:?}",
                String::from_utf8_lossy(&line)
            )))
        }
    };

    if !read_line(reader, &mut line).await? {
        return Err(Error::PrematureEof("missing message line".to_string()));
    }
    let second = as_text(&line)?;
    let image = second.strip_prefix(IMAGE_PREFIX).map(str::to_string);
    if image.is_some() && !read_line(reader, &mut line).await? {
        return Err(Error::PrematureEof("missing message line".to_string()));
    }
    let message = as_text(&line)?.to_string();

    if read_line(reader, &mut line).await? {
        return Err(Error::ProtocolParse(
            "unexpected data after message line".to_string(),
        ));
    }

    Ok(Request {
        user,
        image,
        message,
    })
}

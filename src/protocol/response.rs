//! Response grammar: a `status=` line followed by any number of
//! `file=` / `len=` headers, each followed by exactly `len` raw bytes.
//!
//! The decoder never holds more than one chunk of an attachment body in
//! memory; callers pull the body through [`ResponseDecoder::next_chunk`] and
//! forward each piece to its destination as it arrives.

use std::io;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncBufRead, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::line::{as_text, read_line, CHUNK_SIZE, MAX_LINE_LENGTH};
use crate::error::{Error, Result};

const STATUS_PREFIX: &str = "status=";
const FILE_PREFIX: &str = "file=";
const LEN_PREFIX: &str = "len=";

/// A named binary attachment held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub body: Bytes,
}

impl Attachment {
    pub fn new(name: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Attachment {
            name: name.into(),
            body: body.into(),
        }
    }
}

/// A complete response with in-memory attachments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub status: i32,
    pub attachments: Vec<Attachment>,
}

impl Response {
    pub fn new(status: i32) -> Self {
        Response {
            status,
            attachments: Vec::new(),
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}

/// Decoded `file=` / `len=` header pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentHeader {
    pub name: String,
    pub len: u64,
}

/// Where the decoder is within the response.
#[derive(Debug)]
enum DecodeState {
    /// Nothing read yet; the status line comes first.
    Status,
    /// Between attachments, in line mode.
    Headers,
    /// Inside a length-governed read.
    Body {
        name: String,
        len: u64,
        remaining: u64,
    },
}

/// Streaming response decoder.
pub struct ResponseDecoder<R> {
    reader: R,
    line: BytesMut,
    state: DecodeState,
}

impl<R> ResponseDecoder<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        ResponseDecoder {
            reader,
            line: BytesMut::with_capacity(MAX_LINE_LENGTH),
            state: DecodeState::Status,
        }
    }

    /// Read the leading `status=` line.
    pub async fn read_status(&mut self) -> Result<i32> {
        if !matches!(self.state, DecodeState::Status) {
            return Err(Error::ProtocolParse("status already read".to_string()));
        }

        let line = match self.next_line().await? {
            Some(line) => line,
            None => return Err(Error::PrematureEof("missing status line".to_string())),
        };

        let value = line.strip_prefix(STATUS_PREFIX).ok_or_else(|| {
            Error::ProtocolParse(format!("expected status line, got {line:?}"))
        })?;
        let status = value
            .parse()
            .map_err(|_| Error::ProtocolParse(format!("invalid status {value:?}")))?;

        self.state = DecodeState::Headers;
        Ok(status)
    }

    /// Read the next `file=` / `len=` pair, or `None` at end-of-stream.
    ///
    /// Any unread bytes of the previous body are discarded first.
    pub async fn next_attachment(&mut self) -> Result<Option<AttachmentHeader>> {
        match self.state {
            DecodeState::Status => {
                return Err(Error::ProtocolParse(
                    "attachment requested before status".to_string(),
                ))
            }
            DecodeState::Body { .. } => self.skip_body().await?,
            DecodeState::Headers => {}
        }

        let line = match self.next_line().await? {
            Some(line) => line,
            None => return Ok(None),
        };

        let name = match line.strip_prefix(FILE_PREFIX) {
            Some(name) => name.to_string(),
            None if line.starts_with(LEN_PREFIX) => {
                return Err(Error::ProtocolParse(
                    "len= without preceding file=".to_string(),
                ))
            }
            None if line.starts_with(STATUS_PREFIX) => {
                return Err(Error::ProtocolParse("duplicate status line".to_string()))
            }
            None => {
                return Err(Error::ProtocolParse(format!(
                    "unrecognized header line {line:?}"
                )))
            }
        };

        let line = match self.next_line().await? {
            Some(line) => line,
            None => {
                return Err(Error::ProtocolParse(format!(
                    "file={name} is not followed by len="
                )))
            }
        };
        let value = line.strip_prefix(LEN_PREFIX).ok_or_else(|| {
            Error::ProtocolParse(format!("file={name} is followed by {line:?} instead of len="))
        })?;
        let len: u64 = value
            .parse()
            .map_err(|_| Error::ProtocolParse(format!("invalid length {value:?}")))?;

        self.state = if len == 0 {
            DecodeState::Headers
        } else {
            DecodeState::Body {
                name: name.clone(),
                len,
                remaining: len,
            }
        };

        Ok(Some(AttachmentHeader { name, len }))
    }

    /// Read the next piece of the current body into `buf`.
    ///
    /// Returns at most [`CHUNK_SIZE`] bytes, and 0 once the body is complete.
    /// `buf` must not be empty while body bytes remain.
    pub async fn next_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        let DecodeState::Body {
            name,
            len,
            remaining,
        } = &mut self.state
        else {
            return Ok(0);
        };

        if buf.is_empty() {
            return Err(Error::io(
                "read()",
                io::Error::new(io::ErrorKind::InvalidInput, "empty chunk buffer"),
            ));
        }
        let want = (*remaining).min(buf.len().min(CHUNK_SIZE) as u64) as usize;

        let n = self
            .reader
            .read(&mut buf[..want])
            .await
            .map_err(|e| Error::io("read()", e))?;
        if n == 0 {
            return Err(Error::PrematureEof(format!(
                "attachment {name}: received {} of {len} bytes",
                *len - *remaining
            )));
        }

        *remaining -= n as u64;
        if *remaining == 0 {
            self.state = DecodeState::Headers;
        }
        Ok(n)
    }

    /// Stream the rest of the current body into `sink`.
    pub async fn copy_body<W>(&mut self, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut chunk = [0u8; CHUNK_SIZE];
        let mut total = 0;

        loop {
            let n = self.next_chunk(&mut chunk).await?;
            if n == 0 {
                break;
            }
            sink.write_all(&chunk[..n])
                .await
                .map_err(|e| Error::io("write()", e))?;
            total += n as u64;
        }

        sink.flush().await.map_err(|e| Error::io("flush()", e))?;
        Ok(total)
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    async fn skip_body(&mut self) -> Result<()> {
        let mut chunk = [0u8; CHUNK_SIZE];
        while self.next_chunk(&mut chunk).await? > 0 {}
        Ok(())
    }

    async fn next_line(&mut self) -> Result<Option<String>> {
        if !read_line(&mut self.reader, &mut self.line).await? {
            return Ok(None);
        }
        Ok(Some(as_text(&self.line)?.to_string()))
    }
}

/// Streaming response encoder.
pub struct ResponseEncoder<W> {
    writer: W,
}

impl<W> ResponseEncoder<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(writer: W) -> Self {
        ResponseEncoder { writer }
    }

    pub async fn write_status(&mut self, status: i32) -> Result<()> {
        self.write_line(STATUS_PREFIX, &status.to_string()).await
    }

    pub async fn write_attachment_header(&mut self, name: &str, len: u64) -> Result<()> {
        check_name(name)?;
        self.write_line(FILE_PREFIX, name).await?;
        self.write_line(LEN_PREFIX, &len.to_string()).await
    }

    /// Write one attachment whose body is already in memory.
    pub async fn write_attachment(&mut self, attachment: &Attachment) -> Result<()> {
        self.write_attachment_header(&attachment.name, attachment.body.len() as u64)
            .await?;
        self.writer
            .write_all(&attachment.body)
            .await
            .map_err(|e| Error::io("write()", e))
    }

    /// Write one attachment, streaming exactly `len` bytes from `source`.
    pub async fn write_attachment_from<S>(
        &mut self,
        name: &str,
        len: u64,
        source: &mut S,
    ) -> Result<()>
    where
        S: AsyncRead + Unpin,
    {
        self.write_attachment_header(name, len).await?;

        let mut chunk = [0u8; CHUNK_SIZE];
        let mut remaining = len;
        while remaining > 0 {
            let want = remaining.min(CHUNK_SIZE as u64) as usize;
            let n = source
                .read(&mut chunk[..want])
                .await
                .map_err(|e| Error::io("read()", e))?;
            if n == 0 {
                return Err(Error::PrematureEof(format!(
                    "attachment {name}: source provided {} of {len} bytes",
                    len - remaining
                )));
            }
            self.writer
                .write_all(&chunk[..n])
                .await
                .map_err(|e| Error::io("write()", e))?;
            remaining -= n as u64;
        }
        Ok(())
    }

    /// Flush and hand back the writer.
    pub async fn finish(mut self) -> Result<W> {
        self.writer
            .flush()
            .await
            .map_err(|e| Error::io("flush()", e))?;
        Ok(self.writer)
    }

    async fn write_line(&mut self, prefix: &str, value: &str) -> Result<()> {
        let mut line = BytesMut::with_capacity(prefix.len() + value.len() + 1);
        line.extend_from_slice(prefix.as_bytes());
        line.extend_from_slice(value.as_bytes());
        line.extend_from_slice(b"\n");
        self.writer
            .write_all(&line)
            .await
            .map_err(|e| Error::io("write()", e))
    }
}

/// Reject names that would not come back as a single `file=` line.
fn check_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::ProtocolParse("empty attachment name".to_string()));
    }
    if name.contains('\n') {
        return Err(Error::ProtocolParse(format!(
            "attachment name {name:?} contains a newline"
        )));
    }
    if FILE_PREFIX.len() + name.len() + 1 > MAX_LINE_LENGTH {
        return Err(Error::ProtocolParse(format!(
            "file= line for a {}-byte name exceeds {MAX_LINE_LENGTH} bytes",
            name.len()
        )));
    }
    Ok(())
}

/// Write a whole response and flush.
///
/// Every attachment name is checked before the first byte goes out, so a
/// bad name leaves the peer with no status line rather than a short response.
pub async fn encode_response<W>(writer: &mut W, response: &Response) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    for attachment in &response.attachments {
        check_name(&attachment.name)?;
    }

    let mut encoder = ResponseEncoder::new(writer);
    encoder.write_status(response.status).await?;
    for attachment in &response.attachments {
        encoder.write_attachment(attachment).await?;
    }
    encoder.finish().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Body with every byte value, newlines and header-looking text included.
    fn body(len: usize) -> Vec<u8> {
        let pattern = b"status=1\nfile=x\nlen=3\n\x00\xff";
        (0..len)
            .map(|i| {
                if i % 7 == 0 {
                    pattern[i % pattern.len()]
                } else {
                    (i % 251) as u8
                }
            })
            .collect()
    }

    fn wire(status: i32, attachments: &[(&str, &[u8])]) -> Vec<u8> {
        let mut out = format!("status={status}\n").into_bytes();
        for (name, body) in attachments {
            out.extend_from_slice(format!("file={name}\nlen={}\n", body.len()).as_bytes());
            out.extend_from_slice(body);
        }
        out
    }

    fn expect_parse_error<T: std::fmt::Debug>(result: Result<T>) {
        match result {
            Err(Error::ProtocolParse(_)) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_attachment_lengths_around_chunk_size() {
        for len in [0, 1, 1023, 1024, 1025, 1_048_576] {
            let payload = body(len);
            let data = wire(0, &[("big.bin", &payload), ("tail.txt", b"end")]);
            let mut decoder = ResponseDecoder::new(&data[..]);

            assert_eq!(decoder.read_status().await.unwrap(), 0);

            let header = decoder.next_attachment().await.unwrap().unwrap();
            assert_eq!(header.name, "big.bin");
            assert_eq!(header.len, len as u64);

            let mut sink = Vec::new();
            let copied = decoder.copy_body(&mut sink).await.unwrap();
            assert_eq!(copied, len as u64);
            assert!(sink == payload, "body mismatch for len {len}");

            // The next header must start right after the body
            let header = decoder.next_attachment().await.unwrap().unwrap();
            assert_eq!(header.name, "tail.txt");
            let mut sink = Vec::new();
            decoder.copy_body(&mut sink).await.unwrap();
            assert_eq!(sink, b"end");

            assert!(decoder.next_attachment().await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_chunks_are_bounded() {
        let payload = body(5000);
        let data = wire(0, &[("a", &payload)]);
        let mut decoder = ResponseDecoder::new(&data[..]);
        decoder.read_status().await.unwrap();
        decoder.next_attachment().await.unwrap().unwrap();

        let mut buf = vec![0u8; 8 * CHUNK_SIZE];
        let mut total = 0;
        loop {
            let n = decoder.next_chunk(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            assert!(n <= CHUNK_SIZE);
            total += n;
        }
        assert_eq!(total, 5000);
    }

    #[tokio::test]
    async fn test_status_only() {
        let mut decoder = ResponseDecoder::new(&b"status=-3\n"[..]);
        assert_eq!(decoder.read_status().await.unwrap(), -3);
        assert!(decoder.next_attachment().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_partial_reads() {
        let mock = tokio_test::io::Builder::new()
            .read(b"sta")
            .read(b"tus=0\nfi")
            .read(b"le=out.txt\nlen")
            .read(b"=4\nPO")
            .read(b"NG")
            .build();
        let mut decoder = ResponseDecoder::new(tokio::io::BufReader::new(mock));

        assert_eq!(decoder.read_status().await.unwrap(), 0);
        let header = decoder.next_attachment().await.unwrap().unwrap();
        assert_eq!(
            header,
            AttachmentHeader {
                name: "out.txt".to_string(),
                len: 4
            }
        );
        let mut sink = Vec::new();
        decoder.copy_body(&mut sink).await.unwrap();
        assert_eq!(sink, b"PONG");
        assert!(decoder.next_attachment().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_truncated_body() {
        let mock = tokio_test::io::Builder::new()
            .read(b"status=0\nfile=part.bin\nlen=10\n")
            .read(b"abc")
            .build();
        let mut decoder = ResponseDecoder::new(tokio::io::BufReader::new(mock));
        decoder.read_status().await.unwrap();
        decoder.next_attachment().await.unwrap().unwrap();

        let mut sink = Vec::new();
        match decoder.copy_body(&mut sink).await {
            Err(Error::PrematureEof(msg)) => assert!(msg.contains("3 of 10")),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(sink, b"abc");
    }

    #[tokio::test]
    async fn test_unread_body_is_skipped() {
        let data = wire(0, &[("a", b"first body\n"), ("b", b"second")]);
        let mut decoder = ResponseDecoder::new(&data[..]);
        decoder.read_status().await.unwrap();

        assert_eq!(decoder.next_attachment().await.unwrap().unwrap().name, "a");
        assert_eq!(decoder.next_attachment().await.unwrap().unwrap().name, "b");
        assert!(decoder.next_attachment().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_status() {
        let mut decoder = ResponseDecoder::new(&b""[..]);
        match decoder.read_status().await {
            Err(Error::PrematureEof(_)) => {}
            other => panic!("unexpected: {:?}", other),
        }

        let mut decoder = ResponseDecoder::new(&b"file=a\nlen=1\nx"[..]);
        expect_parse_error(decoder.read_status().await);

        let mut decoder = ResponseDecoder::new(&b"status=ok\n"[..]);
        expect_parse_error(decoder.read_status().await);
    }

    #[tokio::test]
    async fn test_header_errors() {
        let cases: [&[u8]; 6] = [
            b"status=0\nlen=3\nabc",
            b"status=0\nfile=a\n",
            b"status=0\nfile=a\nfile=b\nlen=1\nx",
            b"status=0\nstatus=1\n",
            b"status=0\nhello\n",
            b"status=0\nfile=a\nlen=-1\n",
        ];

        for case in cases {
            let mut decoder = ResponseDecoder::new(case);
            decoder.read_status().await.unwrap();
            expect_parse_error(decoder.next_attachment().await);
        }
    }

    #[tokio::test]
    async fn test_header_line_too_long() {
        let mut data = b"status=0\nfile=".to_vec();
        data.extend(std::iter::repeat(b'a').take(2 * MAX_LINE_LENGTH));
        data.extend_from_slice(b"\nlen=1\nx");
        let mut decoder = ResponseDecoder::new(&data[..]);
        decoder.read_status().await.unwrap();

        match decoder.next_attachment().await {
            Err(Error::LineTooLong { .. }) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_encode_response() {
        let response = Response::new(0)
            .with_attachment(Attachment::new("out.txt", &b"PONG"[..]))
            .with_attachment(Attachment::new("empty", Bytes::new()));

        let mut out = Vec::new();
        encode_response(&mut out, &response).await.unwrap();
        assert_eq!(out, b"status=0\nfile=out.txt\nlen=4\nPONGfile=empty\nlen=0\n");
    }

    #[tokio::test]
    async fn test_encode_from_short_source() {
        let mut encoder = ResponseEncoder::new(Vec::new());
        encoder.write_status(0).await.unwrap();

        let mut source: &[u8] = b"abc";
        match encoder.write_attachment_from("a", 5, &mut source).await {
            Err(Error::PrematureEof(_)) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_encode_streamed_then_decode() {
        let payload = body(3000);
        let mut encoder = ResponseEncoder::new(Vec::new());
        encoder.write_status(2).await.unwrap();
        encoder
            .write_attachment_from("s.bin", payload.len() as u64, &mut &payload[..])
            .await
            .unwrap();
        let out = encoder.finish().await.unwrap();

        let mut decoder = ResponseDecoder::new(&out[..]);
        assert_eq!(decoder.read_status().await.unwrap(), 2);
        assert_eq!(decoder.next_attachment().await.unwrap().unwrap().len, 3000);
        let mut sink = Vec::new();
        decoder.copy_body(&mut sink).await.unwrap();
        assert!(sink == payload);
    }

    #[tokio::test]
    async fn test_encoder_rejects_bad_names() {
        let too_long = "n".repeat(MAX_LINE_LENGTH - FILE_PREFIX.len());
        for name in ["", "a\nb", too_long.as_str()] {
            let mut encoder = ResponseEncoder::new(Vec::new());
            expect_parse_error(encoder.write_attachment_header(name, 1).await);
            assert!(encoder.finish().await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_longest_name_decodes() {
        let longest = "n".repeat(MAX_LINE_LENGTH - FILE_PREFIX.len() - 1);
        let response =
            Response::new(0).with_attachment(Attachment::new(longest.clone(), &b"x"[..]));

        let mut out = Vec::new();
        encode_response(&mut out, &response).await.unwrap();

        let mut decoder = ResponseDecoder::new(&out[..]);
        decoder.read_status().await.unwrap();
        assert_eq!(decoder.next_attachment().await.unwrap().unwrap().name, longest);

        let too_long =
            Response::new(0).with_attachment(Attachment::new(longest + "n", &b"x"[..]));
        let mut out = Vec::new();
        expect_parse_error(encode_response(&mut out, &too_long).await);
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_bad_later_name_writes_nothing() {
        let response = Response::new(0)
            .with_attachment(Attachment::new("ok.txt", &b"A"[..]))
            .with_attachment(Attachment::new("bad\nname", &b"B"[..]));

        let mut out = Vec::new();
        expect_parse_error(encode_response(&mut out, &response).await);
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_empty_chunk_buffer_mid_body() {
        let mut decoder = ResponseDecoder::new(&b"status=0\nfile=a\nlen=3\nabc"[..]);
        decoder.read_status().await.unwrap();
        decoder.next_attachment().await.unwrap().unwrap();

        match decoder.next_chunk(&mut []).await {
            Err(err @ Error::StreamIo { .. }) => assert_eq!(err.operation(), "read()"),
            other => panic!("unexpected: {:?}", other),
        }

        // The body is still intact for a real buffer
        let mut buf = [0u8; 8];
        assert_eq!(decoder.next_chunk(&mut buf).await.unwrap(), 3);
        assert_eq!(&buf[..3], b"abc");
    }
}

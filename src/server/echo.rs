//! Stub business logic: echo the message back as a single attachment.

use crate::protocol::{Attachment, Request, Response};

/// Name of the attachment carrying the echoed message.
pub const ECHO_FILE_NAME: &str = "echo.txt";

pub fn echo(request: &Request) -> Response {
    Response::new(0).with_attachment(Attachment::new(
        ECHO_FILE_NAME,
        request.message.clone().into_bytes(),
    ))
}

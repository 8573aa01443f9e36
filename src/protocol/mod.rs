//! Wire protocol shared by the client and the collaborator.
//!
//! One request, one response, one connection:
//!
//! ```text
//! Request:  user=<user>\n
//!           [img=<url>\n]
//!           <message>\n
//!           <half-close>
//!
//! Response: status=<integer>\n
//!           { file=<name>\n
//!             len=<n>\n
//!             <exactly n raw bytes> }*
//!           <end-of-stream>
//!
//! Example:
//! Request:  user=bob\nping\n
//! Response: status=0\nfile=out.txt\nlen=4\nPONG
//! ```
//!
//! Header lines are bounded by [`MAX_LINE_LENGTH`]. Attachment bodies are
//! length-governed: they may contain any bytes, newlines included, and are
//! moved in pieces of at most [`CHUNK_SIZE`] bytes.

mod line;
pub mod request;
pub mod response;

pub use line::{CHUNK_SIZE, MAX_LINE_LENGTH};
pub use request::{decode_request, encode_request, Request};
pub use response::{
    encode_response, Attachment, AttachmentHeader, Response, ResponseDecoder, ResponseEncoder,
};

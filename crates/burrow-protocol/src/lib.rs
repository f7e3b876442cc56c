//! Wire protocol for the burrow tunnel.
//!
//! Every message on the tunnel socket is a length-prefixed frame carrying
//! one JSON envelope:
//!
//! ```text
//! +----------------+-------------------+
//! | Length (4 BE)  | Payload (N bytes) |
//! +----------------+-------------------+
//! ```
//!
//! - **Length**: 4-byte big-endian u32, payload length in bytes
//! - **Payload**: one UTF-8 JSON envelope, tagged `"type": "request"` or
//!   `"type": "response"`, with the body carried as base64
//!
//! There is no trailing delimiter. The length is validated against a
//! configurable maximum before any allocation; an oversized length means
//! the stream is corrupted and the connection must be torn down.

pub mod envelope;
pub mod errors;
pub mod frame;

pub use envelope::{
    decode_envelope, encode_envelope, Envelope, Headers, RequestEnvelope, ResponseEnvelope,
};
pub use errors::ProtocolError;
pub use frame::{encode_frame, read_frame, write_frame, FrameDecoder, DEFAULT_MAX_FRAME_BYTES};

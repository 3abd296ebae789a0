//! Binary wire protocol spoken between `weave_server` and the external compute worker over a
//! Unix domain socket.
//!
//! A frame is a 16-byte [`header::FrameHeader`] followed by a payload no larger than
//! [`header::MAX_FRAME_SIZE`]. Requests carry generation parameters and a prompt; responses
//! carry either a decoded image or an error code and message.

pub mod error;
pub mod header;
pub mod request;
pub mod response;

pub use error::CodecError;
pub use header::{FrameHeader, MessageType, HEADER_LEN, MAX_FRAME_SIZE};
pub use request::{decode_request, encode_request, EncodeRequest};
pub use response::{decode_response, encode_err, encode_ok, GenerationError, GenerationResponse, ImageResult};

//! Incremental frame decoding.
//!
//! The wire format is one frame per `\n`-terminated line, each forwarded line
//! carrying a `data: ` prefix. [`FrameDecoder`] is the synchronous core that
//! buffers partial lines across network chunks; [`FrameStream`] adapts it to
//! any byte [`Stream`](futures_core::Stream).

pub(crate) mod constants;
mod decoder;
mod frame_stream;

pub use constants::{DATA_PREFIX, DONE_SENTINEL};
pub use decoder::{Frame, FrameDecoder};
pub use frame_stream::FrameStream;

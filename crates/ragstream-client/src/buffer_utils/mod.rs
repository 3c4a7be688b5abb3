mod utf8;
mod frame;
mod decoder;

pub use utf8::Utf8Decoder;
pub use frame::{FrameBuffer, FRAME_TERMINATOR};
pub use decoder::{ChunkDecoder, Decoded, DATA_PREFIX, DONE_SENTINEL, EVENT_PREFIX};

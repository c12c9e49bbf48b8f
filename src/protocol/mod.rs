//! Protocol module - the two-channel multiplexing frame format.
//!
//! One raw stream carries both stdout and stderr of a remote process:
//! - 8-byte header encoding/decoding
//! - Frame struct and single-frame read/write helpers
//! - Streaming demultiplexer that routes payloads to two sinks

mod demux;
mod frame;
mod wire_format;

pub use demux::{demultiplex, DemuxStats};
pub use frame::{build_frame, read_frame, write_frame, Frame};
pub use wire_format::{
    Channel, FrameHeader, DEFAULT_MAX_FRAME_PAYLOAD, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE,
};

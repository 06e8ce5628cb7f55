//! Push-stream (Server-Sent Events) acquisition.

mod client;
pub mod frame;
mod session;

pub use client::{QueueStream, StreamClient};
pub use frame::{Frame, FrameDecoder, decode_frame};
pub use session::{ByteStream, SessionStats, StreamSession, StreamState};

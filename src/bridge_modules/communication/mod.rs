pub mod connection;
pub mod frame_handler;

pub use connection::{connect, WsStream};
pub use frame_handler::{FrameHandler, FrameOutcome, RawFrameBudget};

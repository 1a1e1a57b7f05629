pub mod board;
pub mod depth;

pub use board::{SaveBoard, StreamStatus};
pub use depth::{DepthBuffer, DepthReader, DepthStore};

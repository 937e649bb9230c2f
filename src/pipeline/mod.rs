//! 流水线：字节流 → NDJSON 帧 → 类型化消息，以及缓冲请求的重试策略。
//!
//! # Response Pipeline
//!
//! ```text
//! Transport body → FrameBuffer → serde_json → Stream<T>
//!   (Bytes chunks)   (lines)      (decode)    (arrival order)
//! ```
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`decode`] | NDJSON frame decoder |
//! | [`retry`] | Fixed-delay retry policy for buffered requests |

pub mod decode;
pub mod retry;

pub use decode::{decode_ndjson, FrameBuffer, FrameDecoder};
pub use retry::{Decision, RetryPolicy};

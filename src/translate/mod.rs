//! Translation between the caller's chat-completions dialect and the upstream.
//!
//! Request/response translation and stream re-framing are pure (no I/O); the
//! proxy layer drives them.

pub mod openai_types;
pub mod request;
pub mod response;
pub mod sse;
pub mod streaming;

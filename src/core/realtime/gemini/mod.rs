//! Gemini voice transport.
//!
//! Gemini media is carried outside this crate, so the session only owns the
//! local side of a call: the audio route and the listener contract.
//! Listening mode and manual responses are not available on this transport.

mod client;

pub use client::GeminiVoiceSession;

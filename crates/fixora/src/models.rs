//! These models represent the objects passed around by the relay
//!
//! There are several different related formats we need to interact with:
//! - dashboard chat messages, sent from the browser to the relay
//! - stream events, sent from the relay to the browser
//! - openai-compatible messages/tools, sent from the relay to the LLM
//! - anthropic messages/tools, sent from the relay to the LLM
//!
//! These all overlap to varying degrees. We always immediately convert those data models
//! into the internal structs using to/from helpers. Because of the need for compatibility,
//! the internal models are not an exact match to any of these formats.
pub mod event;
pub mod message;
pub mod role;
pub mod tool;

//! Shared types and pure logic for the dig image studio: presets, prompt
//! composition, attachments, the wire codec, reply normalization, the
//! prompt-refinement chat and the file-backed store.

pub mod attachments;
pub mod chat;
pub mod codec;
pub mod commands;
pub mod composer;
pub mod errors;
pub mod events;
pub mod parts;
pub mod presets;
pub mod request;
pub mod share;
pub mod store;

pub use errors::{DigError, DigResult};

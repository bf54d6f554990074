//! # Request Interop HTTP
//!
//! Standardized server messages on top of the `http` crate, and the
//! [`Mapper`] that converts requests to and from them.
//!
//! Outbound mapping opens upload temp files and takes ownership of body
//! streams. Inbound mapping copies every stream it reads into a fresh
//! temporary buffer, so the message can still be read afterwards.

mod mapper;
mod message;

// Public API
pub use mapper::Mapper;
pub use message::{
    HttpMessageFactory, MessageFactory, ServerMessage, UploadedFile, UploadedFileNode,
    UploadedFiles,
};

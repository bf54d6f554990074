//! # Request Interop Core
//!
//! Normalizes the ambient description of an incoming HTTP request (server
//! metadata, cookies, query params, form fields, raw upload encoding, body)
//! into strongly-shaped request values, in a mutable and a frozen flavor.
//!
//! This crate is usually used through `request-interop`, which also
//! re-exports the standardized-message mapper.

mod body;
mod config;
pub mod decode;
mod error;
mod factory;
mod mover;
mod request;
mod snapshot;
mod tracing_macros;
pub mod upload;
mod url;
mod value;
mod variant;

#[cfg(feature = "tracing")]
#[doc(hidden)]
pub use tracing as __tracing;

// Public API
pub use body::{Body, BodySource, BodyStream, ReadSeek, DEFAULT_SPOOL_THRESHOLD};
pub use config::{InteropConfig, DEFAULT_MAX_DEPTH};
pub use error::{InteropError, Result};
pub use factory::{parse_bool, RequestFactory, RequestOverrides};
pub use mover::{FileMover, RegisteredUploads};
pub use request::{FrozenRequest, Headers, Request};
pub use snapshot::{parse_form, ServerParams, Snapshot};
pub use upload::{
    map_group, try_map_group, FrozenUpload, FrozenUploads, Upload, UploadGroup, UploadInfo,
    UploadNode, Uploads,
};
pub use url::Url;
pub use value::{lookup, Key, Opaque, Value, ValueMap};
pub use variant::{freeze, freeze_server, Frozen, Mutable, RequestParts, Variant};

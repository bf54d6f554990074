//! # Request Interop
//!
//! Strongly-shaped request values built from the ambient state of a
//! CGI-style server: server variables, cookies, query and form params, the
//! classic upload encoding, and the raw body.
//!
//! ## Quick Start
//!
//! ```rust
//! use request_interop::prelude::*;
//!
//! let snapshot = Snapshot::new()
//!     .server_var("REQUEST_METHOD", "post")
//!     .server_var("HTTP_HOST", "example.com")
//!     .server_var("REQUEST_URI", "/api/items?page=2")
//!     .server_var("CONTENT_TYPE", "application/json")
//!     .query(value_map! { "page" => "2" })
//!     .body(bytes_body(r#"{"name":"widget"}"#));
//!
//! let mut factory: RequestFactory = RequestFactory::new(snapshot);
//! let request = factory.new_request(RequestOverrides::default()).unwrap();
//!
//! assert_eq!(request.method, "POST");
//! assert_eq!(request.url.to_string(), "http://example.com/api/items?page=2");
//! assert_eq!(request.input, value_map! { "name" => "widget" });
//!
//! fn bytes_body(s: &'static str) -> BodySource {
//!     BodySource::Bytes(s.as_bytes().to_vec().into())
//! }
//! ```
//!
//! ## Variants
//!
//! [`Mutable`] builds [`Request`] values with public fields and a lazily
//! opened body. [`Frozen`] builds [`FrozenRequest`] values: every tree is
//! validated to hold only null, scalar, and nested-map values, and no
//! stream is carried.
//!
//! ## Optional Features
//!
//! - `http` (default) - [`ServerMessage`] and the bidirectional [`Mapper`]
//! - `tracing` (default) - structured logging of soft failures
//!
//! ```toml
//! [dependencies]
//! request-interop = { version = "0.1", default-features = false }
//! ```

// Re-export core functionality
pub use request_interop_core::*;

// Re-export standardized message mapping (feature-gated)
#[cfg(feature = "http")]
pub use request_interop_http::{
    HttpMessageFactory, Mapper, MessageFactory, ServerMessage, UploadedFile, UploadedFileNode,
    UploadedFiles,
};

// Re-export http for message construction
#[cfg(feature = "http")]
pub use http;

/// Prelude module - import everything you need with `use request_interop::prelude::*`
pub mod prelude {
    pub use request_interop_core::{
        value_map,
        // Body streams
        Body,
        BodySource,
        BodyStream,
        // Configuration
        InteropConfig,
        // Error handling
        InteropError,
        // Variants
        Frozen,
        FrozenRequest,
        FrozenUpload,
        Key,
        Mutable,
        Opaque,
        // Requests
        Request,
        // Normalizer
        RequestFactory,
        RequestOverrides,
        Result,
        Snapshot,
        Upload,
        UploadInfo,
        UploadNode,
        Url,
        // Scalar-leaf trees
        Value,
        ValueMap,
        Variant,
    };

    #[cfg(feature = "http")]
    pub use request_interop_http::{HttpMessageFactory, Mapper, MessageFactory, ServerMessage};

    // Re-export serde_json for dumping frozen requests
    pub use serde_json;
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn prelude_imports_work() {
        let _: fn() -> Result<()> = || Ok(());
        let _ = value_map! { "a" => 1 };
    }
}

//! Request values produced by the factory and the mapper

use crate::body::{Body, BodySource, BodyStream};
use crate::snapshot::{content_length, ServerParams};
use crate::upload::{FrozenUploads, Uploads};
use crate::url::Url;
use crate::value::ValueMap;
use crate::variant::RequestParts;
use indexmap::IndexMap;
use serde::Serialize;
use std::io;

/// Lowercased header names mapped to their string values
pub type Headers = IndexMap<String, String>;

/// Mutable request
///
/// Every field is public and reassignable. The body stream opens lazily:
/// without an explicit body, the first access reads standard input.
#[derive(Debug, Default)]
pub struct Request {
    pub cookies: ValueMap,
    pub files: ValueMap,
    pub headers: Headers,
    pub input: ValueMap,
    pub method: String,
    pub query: ValueMap,
    pub server: ServerParams,
    pub uploads: Uploads,
    pub url: Url,
    body: Option<Body>,
}

impl Request {
    /// Create an empty request
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a body
    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Replace the body
    pub fn set_body(&mut self, body: Option<Body>) {
        self.body = body;
    }

    /// Check whether a body has been attached
    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    /// Get the body, falling back to standard input
    ///
    /// Standard input is read up to the `CONTENT_LENGTH` server field, when
    /// one is set.
    pub fn body(&mut self) -> &mut Body {
        let limit = content_length(&self.server);
        self.body
            .get_or_insert_with(|| Body::pending(BodySource::Stdin { limit }))
    }

    /// Get the body stream, opening it on first access
    pub fn stream(&mut self) -> io::Result<&mut BodyStream> {
        self.body().stream()
    }

    /// Rewind and read the full body
    pub fn contents(&mut self) -> io::Result<String> {
        self.body().contents()
    }

    /// Look up a header by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Build a request from its plain record
    pub fn from_parts(parts: RequestParts<crate::upload::Upload>) -> Self {
        Self {
            cookies: parts.cookies,
            files: parts.files,
            headers: parts.headers,
            input: parts.input,
            method: parts.method,
            query: parts.query,
            server: parts.server,
            uploads: parts.uploads,
            url: parts.url,
            body: parts.body,
        }
    }

    /// Split a request into its plain record
    pub fn into_parts(self) -> RequestParts<crate::upload::Upload> {
        RequestParts {
            cookies: self.cookies,
            files: self.files,
            headers: self.headers,
            input: self.input,
            method: self.method,
            query: self.query,
            server: self.server,
            uploads: self.uploads,
            url: self.url,
            body: self.body,
        }
    }
}

/// Frozen request
///
/// Built only through validation: every tree holds nothing but null, scalar
/// and nested-map values, and no stream is carried. Serializes with one
/// member per field, uploads as nested descriptor objects.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrozenRequest {
    pub(crate) cookies: ValueMap,
    pub(crate) files: ValueMap,
    pub(crate) headers: Headers,
    pub(crate) input: ValueMap,
    pub(crate) method: String,
    pub(crate) query: ValueMap,
    pub(crate) server: ServerParams,
    pub(crate) uploads: FrozenUploads,
    pub(crate) url: Url,
}

impl FrozenRequest {
    pub fn cookies(&self) -> &ValueMap {
        &self.cookies
    }

    pub fn files(&self) -> &ValueMap {
        &self.files
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Look up a header by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn input(&self) -> &ValueMap {
        &self.input
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn query(&self) -> &ValueMap {
        &self.query
    }

    pub fn server(&self) -> &ServerParams {
        &self.server
    }

    pub fn uploads(&self) -> &FrozenUploads {
        &self.uploads
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Split a request into its plain record
    pub fn into_parts(self) -> RequestParts<crate::upload::FrozenUpload> {
        RequestParts {
            cookies: self.cookies,
            files: self.files,
            headers: self.headers,
            input: self.input,
            method: self.method,
            query: self.query,
            server: self.server,
            uploads: self.uploads,
            url: self.url,
            body: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use bytes::Bytes;

    #[test]
    fn test_stdin_fallback_reads_at_most_content_length() {
        let mut request = Request::new();
        request
            .server
            .insert("CONTENT_LENGTH".into(), Value::from("0"));

        assert_eq!(
            request.body().source(),
            Some(&BodySource::Stdin { limit: Some(0) })
        );
        assert_eq!(request.contents().unwrap(), "");
    }

    #[test]
    fn test_fields_are_reassignable() {
        let mut request = Request::new();
        request.method = "PATCH".into();
        request.headers.insert("x-trace".into(), "abc".into());
        request.url.path = Some("/items".into());

        assert_eq!(request.method, "PATCH");
        assert_eq!(request.header("X-Trace"), Some("abc"));
        assert_eq!(request.url.to_string(), "http:///items");
    }

    #[test]
    fn test_body_contents_rewinds() {
        let mut request =
            Request::new().with_body(Body::pending(Bytes::from_static(b"{\"foo\":\"bar\"}")));
        assert!(request.has_body());
        assert_eq!(request.contents().unwrap(), "{\"foo\":\"bar\"}");
        assert_eq!(request.contents().unwrap(), "{\"foo\":\"bar\"}");
    }

    #[test]
    fn test_parts_round_trip() {
        let mut request = Request::new();
        request.server.insert("REQUEST_METHOD".into(), Value::from("GET"));
        request.method = "GET".into();

        let parts = request.into_parts();
        assert!(parts.body.is_none());
        let request = Request::from_parts(parts);
        assert_eq!(request.method, "GET");
        assert_eq!(request.server.get("REQUEST_METHOD"), Some(&Value::from("GET")));
    }

    #[test]
    fn test_frozen_request_serializes() {
        use crate::upload::{Upload, UploadInfo, UploadNode};
        use crate::value::Key;

        let mut request = Request::new();
        request.method = "POST".into();
        request.url.host = Some("example.com".into());
        request.uploads.insert(
            Key::from("doc"),
            UploadNode::File(Upload::new(UploadInfo::new("/tmp/php1", 0).name("a.txt"))),
        );

        let frozen = FrozenRequest::try_from(request).unwrap();
        let json = serde_json::to_value(&frozen).unwrap();
        assert_eq!(json["method"], "POST");
        assert_eq!(json["url"]["host"], "example.com");
        assert_eq!(json["url"]["port"], serde_json::Value::Null);
        assert_eq!(json["uploads"]["doc"]["tmp_name"], "/tmp/php1");
        assert_eq!(json["uploads"]["doc"]["name"], "a.txt");
    }
}

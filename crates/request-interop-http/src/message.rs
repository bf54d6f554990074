//! Standardized server messages
//!
//! [`ServerMessage`] is an `http` request head plus everything a server-side
//! message carries beyond the wire format: server params, cookie params,
//! query params, a parsed body, and a tree of uploaded files. Builders
//! consume and return the message, so a message is never changed in place.

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::request::Parts;
use http::{HeaderMap, Method, Uri, Version};
use request_interop_core::{
    BodyStream, InteropError, Result, ServerParams, UploadGroup, UploadNode, ValueMap,
};
use std::fmt;
use std::path::Path;

/// Tree of uploaded files, keyed like the form fields that produced them
pub type UploadedFiles = UploadGroup<UploadedFile>;

/// One node of an [`UploadedFiles`] tree
pub type UploadedFileNode = UploadNode<UploadedFile>;

/// A file received with a server message
#[derive(Debug)]
pub struct UploadedFile {
    stream: BodyStream,
    size: Option<u64>,
    error: i32,
    client_filename: Option<String>,
    client_media_type: Option<String>,
}

impl UploadedFile {
    pub fn new(
        stream: BodyStream,
        size: Option<u64>,
        error: i32,
        client_filename: Option<String>,
        client_media_type: Option<String>,
    ) -> Self {
        Self {
            stream,
            size,
            error,
            client_filename,
            client_media_type,
        }
    }

    pub fn stream(&self) -> &BodyStream {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut BodyStream {
        &mut self.stream
    }

    pub fn into_stream(self) -> BodyStream {
        self.stream
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn error(&self) -> i32 {
        self.error
    }

    pub fn client_filename(&self) -> Option<&str> {
        self.client_filename.as_deref()
    }

    pub fn client_media_type(&self) -> Option<&str> {
        self.client_media_type.as_deref()
    }
}

/// A server-side HTTP request message
pub struct ServerMessage {
    head: Parts,
    body: BodyStream,
    server_params: ServerParams,
    cookie_params: ValueMap,
    query_params: ValueMap,
    parsed_body: Option<ValueMap>,
    uploaded_files: UploadedFiles,
}

impl ServerMessage {
    /// Create a message with an empty body and no headers
    pub fn new(method: Method, uri: Uri, server_params: ServerParams) -> Self {
        let (mut head, ()) = http::Request::new(()).into_parts();
        head.method = method;
        head.uri = uri;

        Self {
            head,
            body: BodyStream::from_bytes(Bytes::new()),
            server_params,
            cookie_params: ValueMap::new(),
            query_params: ValueMap::new(),
            parsed_body: None,
            uploaded_files: UploadedFiles::new(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.head.method
    }

    pub fn uri(&self) -> &Uri {
        &self.head.uri
    }

    /// The `user[:pass]` part of the URI authority
    pub fn userinfo(&self) -> Option<&str> {
        self.head
            .uri
            .authority()
            .and_then(|authority| authority.as_str().rsplit_once('@'))
            .map(|(userinfo, _)| userinfo)
    }

    pub fn version(&self) -> Version {
        self.head.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.head.headers
    }

    /// All values of one header, in insertion order
    pub fn header_values(&self, name: &str) -> Vec<&[u8]> {
        self.head
            .headers
            .get_all(name)
            .iter()
            .map(HeaderValue::as_bytes)
            .collect()
    }

    pub fn server_params(&self) -> &ServerParams {
        &self.server_params
    }

    pub fn cookie_params(&self) -> &ValueMap {
        &self.cookie_params
    }

    pub fn query_params(&self) -> &ValueMap {
        &self.query_params
    }

    pub fn parsed_body(&self) -> Option<&ValueMap> {
        self.parsed_body.as_ref()
    }

    pub fn uploaded_files(&self) -> &UploadedFiles {
        &self.uploaded_files
    }

    pub fn uploaded_files_mut(&mut self) -> &mut UploadedFiles {
        &mut self.uploaded_files
    }

    pub fn body(&self) -> &BodyStream {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut BodyStream {
        &mut self.body
    }

    /// Rewind and read the full body
    pub fn body_bytes(&mut self) -> Result<Vec<u8>> {
        Ok(self.body.read_all()?)
    }

    pub fn into_body(self) -> BodyStream {
        self.body
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.head.method = method;
        self
    }

    pub fn with_uri(mut self, uri: Uri) -> Self {
        self.head.uri = uri;
        self
    }

    pub fn with_cookie_params(mut self, cookies: ValueMap) -> Self {
        self.cookie_params = cookies;
        self
    }

    pub fn with_query_params(mut self, query: ValueMap) -> Self {
        self.query_params = query;
        self
    }

    pub fn with_parsed_body(mut self, parsed_body: Option<ValueMap>) -> Self {
        self.parsed_body = parsed_body;
        self
    }

    pub fn with_uploaded_files(mut self, uploaded_files: UploadedFiles) -> Self {
        self.uploaded_files = uploaded_files;
        self
    }

    /// Replace every value of a header with a single value
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| InteropError::InvalidMessage(format!("header name `{}`: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| InteropError::InvalidMessage(format!("header `{}`: {}", name, e)))?;
        self.head.headers.insert(name, value);
        Ok(self)
    }

    /// Add a value to a header, keeping the existing ones
    pub fn with_added_header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| InteropError::InvalidMessage(format!("header name `{}`: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| InteropError::InvalidMessage(format!("header `{}`: {}", name, e)))?;
        self.head.headers.append(name, value);
        Ok(self)
    }

    pub fn with_body(mut self, body: BodyStream) -> Self {
        self.body = body;
        self
    }
}

impl fmt::Debug for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerMessage")
            .field("method", &self.head.method)
            .field("uri", &self.head.uri)
            .field("headers", &self.head.headers)
            .field("server_params", &self.server_params)
            .field("cookie_params", &self.cookie_params)
            .field("query_params", &self.query_params)
            .field("parsed_body", &self.parsed_body)
            .field("uploaded_files", &self.uploaded_files)
            .field("body", &self.body)
            .finish()
    }
}

/// Creates standardized messages, streams, and uploaded files
pub trait MessageFactory {
    /// Create a server message from a method, a URI string, and server params
    fn create_server_request(
        &self,
        method: &str,
        uri: &str,
        server_params: ServerParams,
    ) -> Result<ServerMessage>;

    /// Adopt an open stream as a message stream
    fn create_stream_from_resource(&self, stream: BodyStream) -> Result<BodyStream>;

    /// Open a file as a message stream
    fn create_stream_from_file(&self, path: &str) -> Result<BodyStream>;

    /// Create an uploaded-file value
    fn create_uploaded_file(
        &self,
        stream: BodyStream,
        size: Option<u64>,
        error: i32,
        client_filename: Option<String>,
        client_media_type: Option<String>,
    ) -> UploadedFile;
}

/// [`MessageFactory`] building [`ServerMessage`]s with the `http` crate's
/// method and URI parsers
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpMessageFactory;

impl MessageFactory for HttpMessageFactory {
    fn create_server_request(
        &self,
        method: &str,
        uri: &str,
        server_params: ServerParams,
    ) -> Result<ServerMessage> {
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|e| InteropError::InvalidMessage(format!("method `{}`: {}", method, e)))?;
        let uri = uri
            .parse::<Uri>()
            .map_err(|e| InteropError::InvalidMessage(format!("uri `{}`: {}", uri, e)))?;

        Ok(ServerMessage::new(method, uri, server_params))
    }

    fn create_stream_from_resource(&self, stream: BodyStream) -> Result<BodyStream> {
        Ok(stream)
    }

    fn create_stream_from_file(&self, path: &str) -> Result<BodyStream> {
        Ok(BodyStream::open(Path::new(path))?)
    }

    fn create_uploaded_file(
        &self,
        stream: BodyStream,
        size: Option<u64>,
        error: i32,
        client_filename: Option<String>,
        client_media_type: Option<String>,
    ) -> UploadedFile {
        UploadedFile::new(stream, size, error, client_filename, client_media_type)
    }
}

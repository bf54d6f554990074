//! Bidirectional mapping between requests and standardized messages
//!
//! Outbound, [`Mapper::to_message`] builds a [`ServerMessage`] through a
//! [`MessageFactory`]. Inbound, [`Mapper::from_message`] walks the message
//! and realizes a request of the mapper's [`Variant`].
//!
//! ```
//! use request_interop_core::{value_map, Mutable, Request};
//! use request_interop_http::Mapper;
//!
//! let mapper: Mapper<Mutable> = Mapper::new();
//!
//! let mut request = Request::new();
//! request.method = "GET".into();
//! request.query = value_map! { "page" => "2" };
//!
//! let message = mapper.to_message(request).unwrap();
//! assert_eq!(message.query_params(), &value_map! { "page" => "2" });
//!
//! let request = mapper.from_message(message).unwrap();
//! assert_eq!(request.method, "GET");
//! ```

use crate::message::{
    HttpMessageFactory, MessageFactory, ServerMessage, UploadedFile, UploadedFiles,
};
use http::{HeaderMap, Uri};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use request_interop_core::{
    trace_debug, try_map_group, Body, BodyStream, Headers, InteropConfig, InteropError, Mutable,
    RequestParts, Result, ServerParams, UploadGroup, UploadInfo, UploadNode, Url, Value,
    ValueMap, Variant,
};
use std::marker::PhantomData;

/// Maps requests of variant `V` to and from messages built by `F`
#[derive(Debug, Clone)]
pub struct Mapper<V = Mutable, F = HttpMessageFactory> {
    factory: F,
    config: InteropConfig,
    _variant: PhantomData<V>,
}

impl<V: Variant> Mapper<V, HttpMessageFactory> {
    /// Create a mapper over the default message factory
    pub fn new() -> Self {
        Self::with_factory(HttpMessageFactory)
    }
}

impl<V: Variant> Default for Mapper<V, HttpMessageFactory> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Variant, F: MessageFactory> Mapper<V, F> {
    /// Create a mapper over a custom message factory
    pub fn with_factory(factory: F) -> Self {
        Self {
            factory,
            config: InteropConfig::default(),
            _variant: PhantomData,
        }
    }

    /// Replace the configuration
    pub fn config(mut self, config: InteropConfig) -> Self {
        self.config = config;
        self
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Build a standardized message from a request
    ///
    /// The body, when the request carries one, is attached last.
    pub fn to_message(&self, request: V::Request) -> Result<ServerMessage> {
        let parts = V::into_parts(request);

        let mut message = self
            .factory
            .create_server_request(&parts.method, &message_uri(&parts.url), parts.server)?
            .with_cookie_params(parts.cookies)
            .with_query_params(parts.query)
            .with_parsed_body(Some(parts.input))
            .with_uploaded_files(self.to_uploaded_files(parts.uploads)?);

        for (name, value) in &parts.headers {
            message = message.with_header(name, value)?;
        }

        if let Some(body) = parts.body {
            let stream = self.factory.create_stream_from_resource(body.into_stream()?)?;
            message = message.with_body(stream);
        }

        Ok(message)
    }

    /// Map an upload tree to uploaded files, keeping its shape
    ///
    /// A leaf uses its attached stream when it has one and otherwise opens
    /// its temp file.
    pub fn to_uploaded_files(&self, uploads: UploadGroup<V::Upload>) -> Result<UploadedFiles> {
        try_map_group(uploads, &mut |upload| -> Result<UploadedFile> {
            let (info, body) = V::upload_parts(upload);
            let stream = match body {
                Some(body) => self
                    .factory
                    .create_stream_from_resource(body.into_stream()?)?,
                None => self.factory.create_stream_from_file(&info.tmp_name)?,
            };

            Ok(self.factory.create_uploaded_file(
                stream,
                info.size,
                info.error,
                info.name,
                info.media_type,
            ))
        })
    }

    /// Realize a request from a standardized message
    pub fn from_message(&self, mut message: ServerMessage) -> Result<V::Request> {
        let input = match message.parsed_body() {
            Some(parsed_body) => self.from_parsed_body(parsed_body)?,
            None => ValueMap::new(),
        };

        let body = if V::STREAMS {
            let stream = self.from_stream(message.body_mut())?;
            Some(V::new_body(stream)?)
        } else {
            None
        };

        let parts = RequestParts {
            cookies: message.cookie_params().clone(),
            files: ValueMap::new(),
            headers: self.from_headers(message.headers()),
            input,
            method: message.method().as_str().to_ascii_uppercase(),
            query: self.from_query_params(message.query_params())?,
            server: self.from_server_params(message.server_params())?,
            uploads: self.from_uploaded_files(message.uploaded_files_mut())?,
            url: self.from_uri(message.uri()),
            body,
        };

        self.new_request(parts)
    }

    /// Copy a parsed body, keeping null and scalar leaves as they are
    pub fn from_parsed_body(&self, parsed_body: &ValueMap) -> Result<ValueMap> {
        transfer(parsed_body, &|value| Some(value.clone()))
    }

    /// Copy query params, converting every leaf to a string
    pub fn from_query_params(&self, query: &ValueMap) -> Result<ValueMap> {
        transfer(query, &|value| value.coerce_string().map(Value::String))
    }

    /// Copy server params, converting every field to a string
    ///
    /// Server params are flat: a nested map is as untransferable as an
    /// opaque value.
    pub fn from_server_params(&self, server: &ServerParams) -> Result<ServerParams> {
        server
            .iter()
            .map(|(name, value)| match value.coerce_string() {
                Some(s) => Ok((name.clone(), Value::String(s))),
                None => Err(rejected(name, value)),
            })
            .collect()
    }

    /// Lower-case header names and join repeated values with `", "`
    pub fn from_headers(&self, headers: &HeaderMap) -> Headers {
        headers
            .keys()
            .map(|name| {
                let values: Vec<_> = headers
                    .get_all(name)
                    .iter()
                    .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
                    .collect();
                (name.as_str().to_ascii_lowercase(), values.join(", "))
            })
            .collect()
    }

    /// Copy a stream into a fresh temporary buffer
    ///
    /// Both the source and the copy are left rewound.
    pub fn from_stream(&self, stream: &mut BodyStream) -> Result<BodyStream> {
        stream.rewind()?;
        let copy = BodyStream::spool(stream, self.config.spool_threshold)?;
        stream.rewind()?;
        Ok(copy)
    }

    /// Rebuild an upload tree from uploaded files
    ///
    /// The temp name is the storage location of each file's stream.
    pub fn from_uploaded_files(
        &self,
        files: &mut UploadedFiles,
    ) -> Result<UploadGroup<V::Upload>> {
        let mut uploads = UploadGroup::with_capacity(files.len());

        for (key, node) in files.iter_mut() {
            let node = match node {
                UploadNode::Group(group) => UploadNode::Group(self.from_uploaded_files(group)?),
                UploadNode::File(file) => UploadNode::File(self.from_uploaded_file(file)?),
            };
            uploads.insert(key.clone(), node);
        }

        Ok(uploads)
    }

    fn from_uploaded_file(&self, file: &mut UploadedFile) -> Result<V::Upload> {
        let info = UploadInfo {
            tmp_name: file.stream().uri().unwrap_or_default().to_string(),
            error: file.error(),
            name: file.client_filename().map(str::to_string),
            full_path: None,
            media_type: file.client_media_type().map(str::to_string),
            size: file.size(),
        };

        let body = if V::STREAMS {
            Some(V::new_body(self.from_stream(file.stream_mut())?)?)
        } else {
            None
        };

        Ok(self.new_upload(info, body))
    }

    /// Split a message URI into URL components
    ///
    /// Userinfo splits on its first `:`. The fragment never reaches the
    /// server, so it is always absent.
    pub fn from_uri(&self, uri: &Uri) -> Url {
        let (user, pass) = match uri
            .authority()
            .and_then(|authority| authority.as_str().rsplit_once('@'))
        {
            Some((userinfo, _)) => match userinfo.split_once(':') {
                Some((user, pass)) => (Some(user.to_string()), Some(pass.to_string())),
                None => (Some(userinfo.to_string()), None),
            },
            None => (None, None),
        };

        self.new_url(Url {
            scheme: uri.scheme_str().map(str::to_string),
            host: uri.host().map(str::to_string),
            port: uri.port_u16(),
            user,
            pass,
            path: Some(uri.path()).filter(|p| !p.is_empty()).map(str::to_string),
            query: uri.query().filter(|q| !q.is_empty()).map(str::to_string),
            fragment: None,
        })
    }

    /// Realize a request from explicit parts, with no ambient defaults
    pub fn new_request(&self, parts: RequestParts<V::Upload>) -> Result<V::Request> {
        V::request(parts)
    }

    pub fn new_upload(&self, info: UploadInfo, body: Option<Body>) -> V::Upload {
        V::upload(info, body)
    }

    pub fn new_url(&self, url: Url) -> Url {
        url
    }

    /// Always fails: a message has no raw body to attach after the fact
    pub fn new_body(&self, _stream: BodyStream) -> Result<Body> {
        Err(InteropError::Unsupported(
            "no direct mapping to or from a request body",
        ))
    }
}

/// URI string handed to the message factory
///
/// Absolute when the URL has a host, origin-form otherwise.
fn message_uri(url: &Url) -> String {
    let path = url.path.as_deref().map(encode_uri_text);
    let query = url.query.as_deref().map(encode_uri_text);

    if url.host.as_deref().is_some_and(|host| !host.is_empty()) {
        return Url {
            path,
            query,
            fragment: None,
            ..url.clone()
        }
        .to_string();
    }

    let path = path.filter(|p| !p.is_empty()).unwrap_or_else(|| "/".to_string());
    match query.filter(|q| !q.is_empty()) {
        Some(query) => format!("{}?{}", path, query),
        None => path,
    }
}

/// Bytes `http::Uri` refuses in a path or query; `%` is left alone so
/// existing escapes survive
const URI_UNSAFE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'`');

fn encode_uri_text(text: &str) -> String {
    utf8_percent_encode(text, URI_UNSAFE).to_string()
}

/// Walk a tree, converting leaves with `leaf` and failing on anything it
/// refuses
fn transfer(map: &ValueMap, leaf: &dyn Fn(&Value) -> Option<Value>) -> Result<ValueMap> {
    map.iter()
        .map(|(key, value)| {
            let value = match value {
                Value::Map(child) => Value::Map(transfer(child, leaf)?),
                Value::Opaque(_) => return Err(rejected(key, value)),
                _ => leaf(value).ok_or_else(|| rejected(key, value))?,
            };
            Ok((key.clone(), value))
        })
        .collect()
}

fn rejected(key: impl std::fmt::Display, value: &Value) -> InteropError {
    trace_debug!(key = %key, found = value.type_name(), "cannot transfer value");
    InteropError::type_transfer(key, value.type_name())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::HeaderValue;
    use request_interop_core::{value_map, Frozen, Opaque, Request};

    fn mapper() -> Mapper<Mutable> {
        Mapper::new()
    }

    #[test]
    fn test_from_parsed_body_keeps_nesting() {
        let body = value_map! {
            "foo" => value_map! { "bar" => value_map! { "baz" => "dib" } },
            "n" => 7,
            "none" => Value::Null,
        };
        assert_eq!(mapper().from_parsed_body(&body).unwrap(), body);
    }

    #[test]
    fn test_from_parsed_body_rejects_opaque() {
        let body = value_map! { "foo" => Opaque::named("resource", ()) };
        let err = mapper().from_parsed_body(&body).unwrap_err();
        assert!(
            matches!(err, InteropError::TypeTransfer { ref key, ref found } if key == "foo" && found == "resource")
        );
    }

    #[test]
    fn test_from_query_params_stringifies_leaves() {
        let query = value_map! {
            "page" => 2,
            "flag" => true,
            "nested" => value_map! { "off" => false },
        };
        let expect = value_map! {
            "page" => "2",
            "flag" => "1",
            "nested" => value_map! { "off" => "" },
        };
        assert_eq!(mapper().from_query_params(&query).unwrap(), expect);

        let query = value_map! { "a" => value_map! { "b" => Opaque::new(1u8) } };
        assert!(mapper().from_query_params(&query).is_err());
    }

    #[test]
    fn test_from_server_params_requires_flat_scalars() {
        let mut server = ServerParams::new();
        server.insert("SERVER_PORT".into(), Value::from(443));
        server.insert("HTTPS".into(), Value::from("on"));

        let actual = mapper().from_server_params(&server).unwrap();
        assert_eq!(actual.get("SERVER_PORT"), Some(&Value::from("443")));
        assert_eq!(actual.get("HTTPS"), Some(&Value::from("on")));

        server.insert("argv".into(), Value::from(value_map! { 0 => "x" }));
        let err = mapper().from_server_params(&server).unwrap_err();
        assert!(matches!(err, InteropError::TypeTransfer { ref key, .. } if key == "argv"));
    }

    #[test]
    fn test_from_headers_lowercases_and_joins() {
        let mut headers = HeaderMap::new();
        headers.append("Accept", HeaderValue::from_static("text/html"));
        headers.append("accept", HeaderValue::from_static("application/json"));
        headers.insert("X-Request-Id", HeaderValue::from_static("abc"));

        let actual = mapper().from_headers(&headers);
        assert_eq!(
            actual.get("accept").map(String::as_str),
            Some("text/html, application/json")
        );
        assert_eq!(actual.get("x-request-id").map(String::as_str), Some("abc"));
    }

    #[test]
    fn test_from_stream_copies_and_rewinds() {
        let mut source = BodyStream::from_bytes("payload");
        let mut copy = mapper().from_stream(&mut source).unwrap();

        assert_eq!(copy.read_all().unwrap(), b"payload");
        assert_eq!(source.read_all().unwrap(), b"payload");
        assert!(copy.uri().is_none());
    }

    #[test]
    fn test_from_uri_splits_userinfo() {
        let uri: Uri = "https://user:pa:ss@example.com:8443/p?q=1".parse().unwrap();
        let url = mapper().from_uri(&uri);
        assert_eq!(url.scheme.as_deref(), Some("https"));
        assert_eq!(url.user.as_deref(), Some("user"));
        assert_eq!(url.pass.as_deref(), Some("pa:ss"));
        assert_eq!(url.host.as_deref(), Some("example.com"));
        assert_eq!(url.port, Some(8443));
        assert_eq!(url.path.as_deref(), Some("/p"));
        assert_eq!(url.query.as_deref(), Some("q=1"));
        assert_eq!(url.fragment, None);

        let uri: Uri = "http://solo@example.com/".parse().unwrap();
        let url = mapper().from_uri(&uri);
        assert_eq!(url.user.as_deref(), Some("solo"));
        assert_eq!(url.pass, None);
    }

    #[test]
    fn test_message_uri_forms() {
        let url = Url::parse("https://example.com/a?b=c#frag").unwrap();
        assert_eq!(message_uri(&url), "https://example.com/a?b=c");

        let url = Url {
            path: Some("/only".into()),
            query: Some("x=1".into()),
            ..Url::default()
        };
        assert_eq!(message_uri(&url), "/only?x=1");
        assert_eq!(message_uri(&Url::default()), "/");
    }

    #[test]
    fn test_message_uri_encodes_raw_characters() {
        let url = Url {
            host: Some("example.com".into()),
            path: Some("/a b/<c>".into()),
            query: Some("q=a b&a=\"x\"&t=<b>&pct=%20".into()),
            ..Url::default()
        };
        assert_eq!(
            message_uri(&url),
            "http://example.com/a%20b/%3Cc%3E?q=a%20b&a=%22x%22&t=%3Cb%3E&pct=%20"
        );

        let message = mapper()
            .to_message({
                let mut request = Request::new();
                request.method = "GET".into();
                request.url = url;
                request
            })
            .unwrap();
        assert_eq!(message.uri().path(), "/a%20b/%3Cc%3E");
        assert_eq!(
            message.uri().query(),
            Some("q=a%20b&a=%22x%22&t=%3Cb%3E&pct=%20")
        );
    }

    #[test]
    fn test_new_body_is_unsupported() {
        let err = mapper()
            .new_body(BodyStream::from_bytes("x"))
            .unwrap_err();
        assert!(err.is_unsupported());

        let frozen: Mapper<Frozen> = Mapper::new();
        assert!(frozen
            .new_body(BodyStream::from_bytes("x"))
            .unwrap_err()
            .is_unsupported());
    }

    #[test]
    fn test_empty_method_is_invalid() {
        let err = mapper().to_message(request_interop_core::Request::new()).unwrap_err();
        assert!(matches!(err, InteropError::InvalidMessage(_)));
    }

    #[test]
    fn test_frozen_message_without_uploads() {
        let frozen: Mapper<Frozen> = Mapper::new();
        let message = HttpMessageFactory
            .create_server_request("get", "/search?q=rust", ServerParams::new())
            .unwrap()
            .with_query_params(value_map! { "q" => "rust" })
            .with_body(BodyStream::from_bytes("ignored"));

        let request = frozen.from_message(message).unwrap();
        assert_eq!(request.method(), "GET");
        assert_eq!(request.query(), &value_map! { "q" => "rust" });
        assert_eq!(request.url().path.as_deref(), Some("/search"));
        assert_eq!(request.url().host, None);
        assert!(request.uploads().is_empty());
    }
}

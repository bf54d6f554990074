//! Normalizing an ambient snapshot into request values
//!
//! [`RequestFactory`] derives every request component from a [`Snapshot`]:
//! headers from `HTTP_*` server fields, the method with its override, the
//! URL from the half-dozen places servers report it, decoded input from the
//! body, and an upload tree from the raw upload encoding. Each derivation is
//! a public operation so callers can reuse them piecemeal.

use crate::body::{Body, BodySource, BodyStream};
use crate::config::InteropConfig;
use crate::decode;
use crate::error::Result;
use crate::mover::RegisteredUploads;
use crate::request::Headers;
use crate::snapshot::{ServerParams, Snapshot};
use crate::upload::{UploadGroup, UploadInfo, UploadNode};
use crate::url::Url;
use crate::value::{lookup, Key, Value, ValueMap};
use crate::variant::{Mutable, RequestParts, Variant};
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::{alphabet, Engine};
use std::io;
use std::marker::PhantomData;
use std::net::Ipv4Addr;

const BASIC_CREDENTIALS: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

const UPLOAD_FIELDS: [&str; 6] = ["tmp_name", "error", "name", "full_path", "type", "size"];

/// Builds request values of variant `V` from one ambient snapshot
///
/// # Example
///
/// ```
/// use request_interop_core::{RequestFactory, RequestOverrides, Snapshot};
///
/// let snapshot = Snapshot::new()
///     .server_var("REQUEST_METHOD", "get")
///     .server_var("HTTP_HOST", "example.com")
///     .server_var("REQUEST_URI", "/items?page=2");
///
/// let mut factory: RequestFactory = RequestFactory::new(snapshot);
/// let request = factory.new_request(RequestOverrides::new()).unwrap();
///
/// assert_eq!(request.method, "GET");
/// assert_eq!(request.url.to_string(), "http://example.com/items?page=2");
/// ```
pub struct RequestFactory<V: Variant = Mutable> {
    snapshot: Snapshot,
    config: InteropConfig,
    body: Body,
    _variant: PhantomData<V>,
}

impl<V: Variant> RequestFactory<V> {
    /// Create a factory with the default configuration
    pub fn new(snapshot: Snapshot) -> Self {
        Self::with_config(snapshot, InteropConfig::default())
    }

    /// Create a factory with a custom configuration
    pub fn with_config(snapshot: Snapshot, config: InteropConfig) -> Self {
        let body = Body::pending(snapshot.body.clone()).with_spool_threshold(config.spool_threshold);
        Self {
            snapshot,
            config,
            body,
            _variant: PhantomData,
        }
    }

    /// Get the snapshot the factory reads from
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Get the configuration
    pub fn config(&self) -> &InteropConfig {
        &self.config
    }

    fn server_value(&self, name: &str) -> Option<&Value> {
        self.snapshot.server.get(name).filter(|v| !v.is_null())
    }

    fn server_string(&self, name: &str) -> Option<String> {
        self.server_value(name).and_then(Value::coerce_string)
    }

    /// Media type of the body, from the `CONTENT_TYPE` server field
    ///
    /// Parameters are dropped and the result is lowercased; a malformed value
    /// yields `None`.
    pub fn content_type(&self) -> Option<String> {
        self.server_string("CONTENT_TYPE")
            .and_then(|ct| decode::media_type(&ct))
    }

    pub fn cookies(&self) -> ValueMap {
        self.snapshot.cookies.clone()
    }

    pub fn files(&self) -> ValueMap {
        self.snapshot.files.clone()
    }

    /// Headers from the `HTTP_*` server fields plus `CONTENT_LENGTH` and
    /// `CONTENT_TYPE`
    ///
    /// `HTTP_X_FORWARDED_FOR` becomes `x-forwarded-for`. A later field with
    /// the same header name overwrites an earlier one.
    pub fn headers(&self) -> Headers {
        let mut headers = Headers::new();

        for (key, value) in &self.snapshot.server {
            let Some(name) = key.strip_prefix("HTTP_") else {
                continue;
            };
            let Some(value) = value.coerce_string() else {
                continue;
            };
            headers.insert(name.to_ascii_lowercase().replace('_', "-"), value);
        }

        if let Some(length) = self.server_string("CONTENT_LENGTH") {
            headers.insert("content-length".to_string(), length);
        }
        if let Some(content_type) = self.server_string("CONTENT_TYPE") {
            headers.insert("content-type".to_string(), content_type);
        }

        headers
    }

    /// Decoded input, chosen by content type
    ///
    /// JSON and XML bodies are decoded; anything else yields the snapshot's
    /// pre-parsed form fields.
    pub fn input(&mut self) -> ValueMap {
        match self.content_type().as_deref() {
            Some("application/json") => self.input_json(),
            Some("application/xml") | Some("text/xml") => self.input_xml(),
            _ => self.snapshot.post.clone(),
        }
    }

    /// Decode the body as JSON, degrading to an empty map
    pub fn input_json(&mut self) -> ValueMap {
        let max_depth = self.config.max_depth;
        self.read_body()
            .and_then(|bytes| decode::json(&bytes, max_depth))
            .unwrap_or_default()
    }

    /// Decode the body as XML, degrading to an empty map
    pub fn input_xml(&mut self) -> ValueMap {
        let max_depth = self.config.max_depth;
        self.read_body()
            .and_then(|bytes| decode::xml(&bytes, max_depth))
            .unwrap_or_default()
    }

    fn read_body(&mut self) -> Option<Vec<u8>> {
        match self.body.bytes() {
            Ok(bytes) => Some(bytes),
            Err(_err) => {
                crate::trace_warn!(error = %_err, "could not read request body");
                None
            }
        }
    }

    /// Request method, upper-cased
    ///
    /// A POST carrying `HTTP_X_HTTP_METHOD_OVERRIDE` takes the override.
    pub fn method(&self) -> String {
        let method = self
            .server_string("REQUEST_METHOD")
            .unwrap_or_default()
            .to_ascii_uppercase();

        if method == "POST" && self.config.method_override {
            if let Some(method_override) = self.server_string("HTTP_X_HTTP_METHOD_OVERRIDE") {
                crate::trace_debug!(method = %method_override, "method overridden");
                return method_override.to_ascii_uppercase();
            }
        }

        method
    }

    pub fn query(&self) -> ValueMap {
        self.snapshot.query.clone()
    }

    pub fn server(&self) -> ServerParams {
        self.snapshot.server.clone()
    }

    /// Get the body stream, opening the snapshot's body source once
    pub fn body_resource(&mut self) -> io::Result<&mut BodyStream> {
        self.body.stream()
    }

    fn take_body(&mut self) -> Body {
        let fresh = Body::pending(self.snapshot.body.clone())
            .with_spool_threshold(self.config.spool_threshold);
        std::mem::replace(&mut self.body, fresh)
    }

    /// Upload tree rebuilt from the snapshot's raw upload encoding
    pub fn uploads(&self) -> UploadGroup<V::Upload> {
        self.uploads_from(&self.snapshot.files)
    }

    /// Rebuild an upload tree from a raw upload encoding
    ///
    /// An entry whose `tmp_name` is a string is one file. An entry whose
    /// `tmp_name` is a map holds parallel maps (`tmp_name[k]`, `error[k]`,
    /// ...) that are recombined per key. Any other map is a nested level.
    pub fn uploads_from(&self, files: &ValueMap) -> UploadGroup<V::Upload> {
        let mut uploads = UploadGroup::new();

        for (field, file) in files {
            let Some(file) = file.as_map() else {
                crate::trace_debug!(field = %field, "skipping non-map upload entry");
                continue;
            };

            let node = match lookup(file, "tmp_name") {
                Some(Value::String(_)) => UploadNode::File(self.upload_from(file)),
                Some(Value::Map(tmp_names)) => {
                    let group = tmp_names
                        .keys()
                        .map(|key| (key.clone(), Value::Map(parallel_entry(file, key))))
                        .collect();
                    UploadNode::Group(self.uploads_from(&group))
                }
                _ => UploadNode::Group(self.uploads_from(file)),
            };

            uploads.insert(field.clone(), node);
        }

        uploads
    }

    fn upload_from(&self, file: &ValueMap) -> V::Upload {
        let field = |name: &str| lookup(file, name).filter(|v| !v.is_null());

        let mut info = UploadInfo::new(
            field("tmp_name").and_then(Value::coerce_string).unwrap_or_default(),
            field("error")
                .and_then(Value::coerce_int)
                .and_then(|e| i32::try_from(e).ok())
                .unwrap_or_default(),
        );
        info.name = field("name").and_then(Value::coerce_string);
        info.full_path = field("full_path").and_then(Value::coerce_string);
        info.media_type = field("type").and_then(Value::coerce_string);
        info.size = field("size")
            .and_then(Value::coerce_int)
            .and_then(|s| u64::try_from(s).ok());

        crate::trace_trace!(tmp_name = %info.tmp_name, error = info.error, "rebuilt upload");
        self.new_upload(info, None)
    }

    /// Register every `tmp_name` in the raw upload encoding as movable
    pub fn upload_registry(&self) -> RegisteredUploads {
        let registry = RegisteredUploads::new();
        collect_tmp_names(&self.snapshot.files, &registry);
        registry
    }

    /// URL components derived from the server fields
    ///
    /// The fragment is never reported by servers and is always absent.
    pub fn url_parts(&self) -> Url {
        let (user, pass) = self.url_user();
        let (host, port) = self.url_host();
        let (path, query) = self.url_data();

        Url {
            scheme: Some(self.url_scheme()),
            host,
            port,
            user,
            pass,
            path,
            query,
            fragment: None,
        }
    }

    /// `https` when the `HTTPS` field is a truthy value, `http` otherwise
    ///
    /// Truthy values are `1`, `true`, `on` and `yes`, in any case.
    pub fn url_scheme(&self) -> String {
        let secure = self
            .server_value("HTTPS")
            .and_then(Value::coerce_string)
            .and_then(|s| parse_bool(&s))
            .unwrap_or(false);

        let scheme = if secure { "https" } else { "http" };
        scheme.to_string()
    }

    /// Percent-encoded user and password
    ///
    /// `PHP_AUTH_USER` and `PHP_AUTH_PW` are used when present. Otherwise
    /// Basic credentials in `HTTP_AUTHORIZATION` are decoded, with or
    /// without base64 padding.
    pub fn url_user(&self) -> (Option<String>, Option<String>) {
        let encode = |raw: Vec<u8>| urlencoding::encode_binary(&raw).into_owned();

        if let Some(user) = self.server_string("PHP_AUTH_USER") {
            let pass = self.server_string("PHP_AUTH_PW");
            return (Some(encode(user.into_bytes())), pass.map(|p| encode(p.into_bytes())));
        }

        let authorization = self.server_string("HTTP_AUTHORIZATION").unwrap_or_default();
        if !authorization.to_ascii_lowercase().starts_with("basic ") {
            return (None, None);
        }

        let encoded = authorization.get(6..).unwrap_or_default().trim();
        let decoded = BASIC_CREDENTIALS.decode(encoded).unwrap_or_default();
        if decoded.is_empty() || decoded == b"0" {
            return (None, None);
        }

        match decoded.iter().position(|b| *b == b':') {
            Some(pos) => (
                Some(encode(decoded[..pos].to_vec())),
                Some(encode(decoded[pos + 1..].to_vec())),
            ),
            None => (Some(encode(decoded)), None),
        }
    }

    /// Host and port
    ///
    /// `HTTP_HOST` wins, with its embedded port or else `SERVER_PORT`. Without
    /// it, `SERVER_ADDR` is used, bracketed unless it is IPv4.
    pub fn url_host(&self) -> (Option<String>, Option<u16>) {
        let server_port = self
            .server_value("SERVER_PORT")
            .and_then(Value::coerce_int)
            .and_then(to_port);

        if let Some(Value::String(http_host)) = self.server_value("HTTP_HOST") {
            if let Some((host, port)) = split_host_header(http_host) {
                let port = match port {
                    Some(port) => to_port(Value::from(port).coerce_int().unwrap_or_default()),
                    None => server_port,
                };
                return (Some(host.to_string()), port);
            }
        }

        let Some(addr) = self.server_string("SERVER_ADDR") else {
            return (None, None);
        };

        if addr.parse::<Ipv4Addr>().is_ok() {
            (Some(addr), server_port)
        } else {
            (Some(format!("[{}]", addr)), server_port)
        }
    }

    /// Path and query
    ///
    /// Reads the rewritten IIS URL when flagged, then `REQUEST_URI` (with
    /// `QUERY_STRING` taking precedence over its query), then `PHP_SELF`.
    pub fn url_data(&self) -> (Option<String>, Option<String>) {
        let split = |uri: String| match uri.split_once('?') {
            Some((path, query)) => (Some(path.to_string()), Some(query.to_string())),
            None => (Some(uri), None),
        };

        let rewritten = matches!(
            self.server_value("IIS_WasUrlRewritten"),
            Some(Value::String(flag)) if flag == "1"
        );
        if rewritten {
            if let Some(unencoded) = self.server_string("UNENCODED_URL") {
                return split(unencoded);
            }
        }

        let query_string = self.server_string("QUERY_STRING");

        if let Some(request_uri) = self.server_string("REQUEST_URI") {
            let (path, query) = split(request_uri);
            return (path, query_string.or(query));
        }

        (self.server_string("PHP_SELF"), query_string)
    }

    /// Build a request, deriving every component not overridden
    ///
    /// The body of a streaming variant is handed to the request; the factory
    /// re-opens its body source for any later request.
    pub fn new_request(&mut self, overrides: RequestOverrides<V::Upload>) -> Result<V::Request> {
        let RequestOverrides {
            cookies,
            files,
            headers,
            input,
            method,
            query,
            server,
            uploads,
            url,
            body,
        } = overrides;

        let input = match input {
            Some(input) => input,
            None => self.input(),
        };

        let body = match body {
            Some(body) => Some(body),
            None if V::STREAMS => Some(self.take_body()),
            None => None,
        };

        V::request(RequestParts {
            cookies: cookies.unwrap_or_else(|| self.cookies()),
            files: files.unwrap_or_else(|| self.files()),
            headers: headers.unwrap_or_else(|| self.headers()),
            input,
            method: method.unwrap_or_else(|| self.method()),
            query: query.unwrap_or_else(|| self.query()),
            server: server.unwrap_or_else(|| self.server()),
            uploads: uploads.unwrap_or_else(|| self.uploads()),
            url: url.unwrap_or_else(|| self.new_url(Url::default())),
            body,
        })
    }

    /// Build an upload of this factory's variant
    pub fn new_upload(&self, info: UploadInfo, body: Option<Body>) -> V::Upload {
        V::upload(info, body)
    }

    /// Build a URL, filling every absent component from [`url_parts`](Self::url_parts)
    pub fn new_url(&self, overrides: Url) -> Url {
        overrides.with_defaults(self.url_parts())
    }

    /// Wrap a stream as a body of this factory's variant
    pub fn new_body(&self, stream: BodyStream) -> Result<Body> {
        V::new_body(stream)
    }

    /// Source the factory's body is read from
    pub fn body_source(&self) -> &BodySource {
        &self.snapshot.body
    }
}

/// Components that replace the derived ones in [`RequestFactory::new_request`]
#[derive(Debug)]
pub struct RequestOverrides<U> {
    pub cookies: Option<ValueMap>,
    pub files: Option<ValueMap>,
    pub headers: Option<Headers>,
    pub input: Option<ValueMap>,
    pub method: Option<String>,
    pub query: Option<ValueMap>,
    pub server: Option<ServerParams>,
    pub uploads: Option<UploadGroup<U>>,
    pub url: Option<Url>,
    pub body: Option<Body>,
}

impl<U> Default for RequestOverrides<U> {
    fn default() -> Self {
        Self {
            cookies: None,
            files: None,
            headers: None,
            input: None,
            method: None,
            query: None,
            server: None,
            uploads: None,
            url: None,
            body: None,
        }
    }
}

impl<U> RequestOverrides<U> {
    /// Override nothing
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cookies(mut self, cookies: ValueMap) -> Self {
        self.cookies = Some(cookies);
        self
    }

    pub fn files(mut self, files: ValueMap) -> Self {
        self.files = Some(files);
        self
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn input(mut self, input: ValueMap) -> Self {
        self.input = Some(input);
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn query(mut self, query: ValueMap) -> Self {
        self.query = Some(query);
        self
    }

    pub fn server(mut self, server: ServerParams) -> Self {
        self.server = Some(server);
        self
    }

    pub fn uploads(mut self, uploads: UploadGroup<U>) -> Self {
        self.uploads = Some(uploads);
        self
    }

    pub fn url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// Recombine the parallel maps of a grouped upload entry at `key`
fn parallel_entry(file: &ValueMap, key: &Key) -> ValueMap {
    UPLOAD_FIELDS
        .iter()
        .map(|name| {
            let value = lookup(file, name)
                .and_then(|field| field.as_map())
                .and_then(|field| field.get(key))
                .cloned()
                .unwrap_or_default();
            (Key::from(*name), value)
        })
        .collect()
}

fn collect_tmp_names(files: &ValueMap, registry: &RegisteredUploads) {
    for file in files.values().filter_map(Value::as_map) {
        match lookup(file, "tmp_name") {
            Some(Value::String(tmp_name)) => registry.register(tmp_name),
            Some(Value::Map(tmp_names)) => collect_leaf_strings(tmp_names, registry),
            _ => collect_tmp_names(file, registry),
        }
    }
}

fn collect_leaf_strings(map: &ValueMap, registry: &RegisteredUploads) {
    for value in map.values() {
        match value {
            Value::String(tmp_name) => registry.register(tmp_name),
            Value::Map(nested) => collect_leaf_strings(nested, registry),
            _ => {}
        }
    }
}

/// Parse a boolean flag the way server configuration reads one
///
/// Returns `None` for values that are neither truthy nor falsy.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" | "" => Some(false),
        _ => None,
    }
}

fn to_port(port: i64) -> Option<u16> {
    u16::try_from(port).ok()
}

/// Split a `Host` header into host and raw port text
///
/// The host is any run of bracketed segments and non-colon characters; the
/// port is whatever follows the first top-level colon, and must not contain
/// `/`, `?` or `#`.
fn split_host_header(value: &str) -> Option<(&str, Option<&str>)> {
    let bytes = value.as_bytes();
    let mut end = 0;

    while end < bytes.len() {
        match bytes[end] {
            b'[' => match value.rfind(']').filter(|close| *close > end) {
                Some(close) => end = close + 1,
                None => end += 1,
            },
            b':' => break,
            _ => end += 1,
        }
    }

    let (host, rest) = value.split_at(end);
    match rest.strip_prefix(':') {
        None => Some((host, None)),
        Some(port) if port.contains(['/', '?', '#']) => None,
        Some(port) => Some((host, Some(port))),
    }
}

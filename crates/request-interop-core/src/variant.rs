//! Mutable and frozen realizations of a request
//!
//! The factory and the mapper compute a [`RequestParts`] record and hand it
//! to a [`Variant`], which decides how strictly it is checked and whether
//! streams are carried.

use crate::body::{Body, BodyStream};
use crate::error::{InteropError, Result};
use crate::request::{FrozenRequest, Headers, Request};
use crate::snapshot::ServerParams;
use crate::upload::{map_group, FrozenUpload, Upload, UploadGroup, UploadInfo};
use crate::url::Url;
use crate::value::{Value, ValueMap};

/// Canonical plain record of one request
#[derive(Debug)]
pub struct RequestParts<U> {
    pub cookies: ValueMap,
    pub files: ValueMap,
    pub headers: Headers,
    pub input: ValueMap,
    pub method: String,
    pub query: ValueMap,
    pub server: ServerParams,
    pub uploads: UploadGroup<U>,
    pub url: Url,
    pub body: Option<Body>,
}

impl<U> Default for RequestParts<U> {
    fn default() -> Self {
        Self {
            cookies: ValueMap::new(),
            files: ValueMap::new(),
            headers: Headers::new(),
            input: ValueMap::new(),
            method: String::new(),
            query: ValueMap::new(),
            server: ServerParams::new(),
            uploads: UploadGroup::new(),
            url: Url::default(),
            body: None,
        }
    }
}

/// A family of request and upload types sharing one construction policy
pub trait Variant {
    /// The request type produced
    type Request;
    /// The upload type held in the request's upload tree
    type Upload;

    /// Whether requests and uploads of this variant carry streams
    const STREAMS: bool;

    /// Realize a request from its plain record
    fn request(parts: RequestParts<Self::Upload>) -> Result<Self::Request>;

    /// Split a request back into its plain record
    fn into_parts(request: Self::Request) -> RequestParts<Self::Upload>;

    /// Realize an upload; variants without streams drop `body`
    fn upload(info: UploadInfo, body: Option<Body>) -> Self::Upload;

    /// Split an upload into descriptor and attached stream
    fn upload_parts(upload: Self::Upload) -> (UploadInfo, Option<Body>);

    /// Wrap a stream as a body
    fn new_body(stream: BodyStream) -> Result<Body>;
}

/// Requests with public, reassignable fields and lazy streams
#[derive(Debug, Clone, Copy, Default)]
pub struct Mutable;

impl Variant for Mutable {
    type Request = Request;
    type Upload = Upload;

    const STREAMS: bool = true;

    fn request(parts: RequestParts<Upload>) -> Result<Request> {
        Ok(Request::from_parts(parts))
    }

    fn into_parts(request: Request) -> RequestParts<Upload> {
        request.into_parts()
    }

    fn upload(info: UploadInfo, body: Option<Body>) -> Upload {
        match body {
            Some(body) => Upload::new(info).with_body(body),
            None => Upload::new(info),
        }
    }

    fn upload_parts(upload: Upload) -> (UploadInfo, Option<Body>) {
        upload.into_parts()
    }

    fn new_body(stream: BodyStream) -> Result<Body> {
        Ok(Body::new(stream))
    }
}

/// Validated, immutable requests without streams
#[derive(Debug, Clone, Copy, Default)]
pub struct Frozen;

impl Variant for Frozen {
    type Request = FrozenRequest;
    type Upload = FrozenUpload;

    const STREAMS: bool = false;

    fn request(parts: RequestParts<FrozenUpload>) -> Result<FrozenRequest> {
        if parts.body.is_some() {
            return Err(InteropError::Unsupported(
                "frozen requests cannot carry a body stream",
            ));
        }

        Ok(FrozenRequest {
            cookies: freeze(parts.cookies)?,
            files: freeze(parts.files)?,
            headers: parts.headers,
            input: freeze(parts.input)?,
            method: parts.method,
            query: freeze(parts.query)?,
            server: freeze_server(parts.server)?,
            uploads: parts.uploads,
            url: parts.url,
        })
    }

    fn into_parts(request: FrozenRequest) -> RequestParts<FrozenUpload> {
        request.into_parts()
    }

    fn upload(info: UploadInfo, _body: Option<Body>) -> FrozenUpload {
        FrozenUpload::new(info)
    }

    fn upload_parts(upload: FrozenUpload) -> (UploadInfo, Option<Body>) {
        (upload.info().clone(), None)
    }

    fn new_body(_stream: BodyStream) -> Result<Body> {
        Err(InteropError::Unsupported("frozen requests have no body"))
    }
}

/// Check that a tree holds only null, scalar, and nested-map values
///
/// ```
/// use request_interop_core::{freeze, value_map, Opaque, Value};
///
/// assert!(freeze(value_map! { "a" => value_map! { "b" => 1 } }).is_ok());
/// assert!(freeze(value_map! { "a" => Value::from(Opaque::new(())) }).is_err());
/// ```
pub fn freeze(map: ValueMap) -> Result<ValueMap> {
    for value in map.values() {
        check_frozen(value)?;
    }
    Ok(map)
}

/// Check every server field the way [`freeze`] checks a tree
pub fn freeze_server(server: ServerParams) -> Result<ServerParams> {
    for value in server.values() {
        check_frozen(value)?;
    }
    Ok(server)
}

fn check_frozen(value: &Value) -> Result<()> {
    match value {
        Value::Map(map) => map.values().try_for_each(check_frozen),
        Value::Opaque(opaque) => Err(InteropError::validation(opaque.type_name())),
        _ => Ok(()),
    }
}

/// Freeze a mutable request, dropping its body and upload streams
impl TryFrom<Request> for FrozenRequest {
    type Error = InteropError;

    fn try_from(request: Request) -> Result<Self> {
        let parts = request.into_parts();
        Frozen::request(RequestParts {
            uploads: map_group(parts.uploads, |upload| {
                FrozenUpload::new(upload.into_parts().0)
            }),
            cookies: parts.cookies,
            files: parts.files,
            headers: parts.headers,
            input: parts.input,
            method: parts.method,
            query: parts.query,
            server: parts.server,
            url: parts.url,
            body: None,
        })
    }
}

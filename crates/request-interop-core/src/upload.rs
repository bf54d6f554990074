//! Uploaded-file descriptors and upload trees

use crate::body::{Body, BodyStream};
use crate::mover::FileMover;
use crate::value::Key;
use indexmap::IndexMap;
use serde::Serialize;
use std::io;
use std::ops::{Deref, DerefMut};
use std::path::Path;

/// Upload error codes reported by the upload mechanism
pub mod code {
    /// The file uploaded successfully
    pub const OK: i32 = 0;
    /// The file exceeds the server's maximum upload size
    pub const INI_SIZE: i32 = 1;
    /// The file exceeds the form's declared maximum size
    pub const FORM_SIZE: i32 = 2;
    /// The file was only partially uploaded
    pub const PARTIAL: i32 = 3;
    /// No file was uploaded
    pub const NO_FILE: i32 = 4;
    /// The temporary folder is missing
    pub const NO_TMP_DIR: i32 = 6;
    /// Writing the file to disk failed
    pub const CANT_WRITE: i32 = 7;
    /// A server extension stopped the upload
    pub const EXTENSION: i32 = 8;
}

/// Plain descriptor of one uploaded file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadInfo {
    /// Where the upload mechanism stored the file
    pub tmp_name: String,
    /// Upload error code, see [`code`]
    pub error: i32,
    /// Client-declared file name
    pub name: Option<String>,
    /// Client-declared full path (directory uploads)
    pub full_path: Option<String>,
    /// Client-declared media type
    pub media_type: Option<String>,
    /// Declared size in bytes
    pub size: Option<u64>,
}

impl UploadInfo {
    /// Create a descriptor with only the required fields
    pub fn new(tmp_name: impl Into<String>, error: i32) -> Self {
        Self {
            tmp_name: tmp_name.into(),
            error,
            ..Self::default()
        }
    }

    /// Set the client file name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the client full path
    pub fn full_path(mut self, full_path: impl Into<String>) -> Self {
        self.full_path = Some(full_path.into());
        self
    }

    /// Set the client media type
    pub fn media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    /// Set the declared size
    pub fn size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Check whether the upload completed without error
    pub fn is_ok(&self) -> bool {
        self.error == code::OK
    }

    /// Move the stored file to `to` through the host's move capability
    ///
    /// Returns `false` when the mover refuses or the move fails.
    pub fn move_to(&self, to: impl AsRef<Path>, mover: &dyn FileMover) -> bool {
        mover.move_uploaded_file(Path::new(&self.tmp_name), to.as_ref())
    }
}

/// Mutable upload: a descriptor plus an optional attached stream
///
/// Without an attached stream, the first read opens the descriptor's
/// `tmp_name`.
#[derive(Debug)]
pub struct Upload {
    info: UploadInfo,
    body: Option<Body>,
}

impl Upload {
    /// Create an upload with no attached stream
    pub fn new(info: UploadInfo) -> Self {
        Self { info, body: None }
    }

    /// Attach a stream
    pub fn with_body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    /// Check whether a stream is attached
    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    /// Get the stream, opening `tmp_name` on first access if none is attached
    pub fn stream(&mut self) -> io::Result<&mut BodyStream> {
        if self.body.is_none() {
            let stream = BodyStream::open(&self.info.tmp_name)?;
            self.body = Some(Body::new(stream));
        }

        match &mut self.body {
            Some(body) => body.stream(),
            None => Err(io::Error::new(io::ErrorKind::NotFound, "upload has no stream")),
        }
    }

    /// Rewind and read the full contents
    pub fn contents(&mut self) -> io::Result<String> {
        self.stream()?;
        match &mut self.body {
            Some(body) => body.contents(),
            None => Ok(String::new()),
        }
    }

    /// Get the descriptor
    pub fn info(&self) -> &UploadInfo {
        &self.info
    }

    /// Split into descriptor and attached stream
    pub fn into_parts(self) -> (UploadInfo, Option<Body>) {
        (self.info, self.body)
    }
}

impl Deref for Upload {
    type Target = UploadInfo;

    fn deref(&self) -> &Self::Target {
        &self.info
    }
}

impl DerefMut for Upload {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.info
    }
}

/// Frozen upload: a descriptor that never carries a stream
///
/// Every read re-opens the recorded `tmp_name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FrozenUpload {
    info: UploadInfo,
}

impl FrozenUpload {
    /// Create a frozen upload from a descriptor
    pub fn new(info: UploadInfo) -> Self {
        Self { info }
    }

    /// Open a fresh stream over the stored file
    pub fn open(&self) -> io::Result<BodyStream> {
        BodyStream::open(&self.info.tmp_name)
    }

    /// Read the full contents of the stored file
    pub fn contents(&self) -> io::Result<String> {
        let bytes = self.open()?.read_all()?;
        String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Get the descriptor
    pub fn info(&self) -> &UploadInfo {
        &self.info
    }
}

impl Deref for FrozenUpload {
    type Target = UploadInfo;

    fn deref(&self) -> &Self::Target {
        &self.info
    }
}

/// One position in an upload tree
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum UploadNode<U> {
    /// A single uploaded file
    File(U),
    /// A nested level keyed like the form fields that produced it
    Group(UploadGroup<U>),
}

/// One level of an upload tree
pub type UploadGroup<U> = IndexMap<Key, UploadNode<U>>;

/// Upload tree of mutable uploads
pub type Uploads = UploadGroup<Upload>;

/// Upload tree of frozen uploads
pub type FrozenUploads = UploadGroup<FrozenUpload>;

impl<U> UploadNode<U> {
    /// Get the file at this position
    pub fn as_file(&self) -> Option<&U> {
        match self {
            UploadNode::File(file) => Some(file),
            UploadNode::Group(_) => None,
        }
    }

    /// Get the file at this position mutably
    pub fn as_file_mut(&mut self) -> Option<&mut U> {
        match self {
            UploadNode::File(file) => Some(file),
            UploadNode::Group(_) => None,
        }
    }

    /// Get the group at this position
    pub fn as_group(&self) -> Option<&UploadGroup<U>> {
        match self {
            UploadNode::Group(group) => Some(group),
            UploadNode::File(_) => None,
        }
    }

    /// Look up a child of a group
    pub fn get(&self, key: impl Into<Key>) -> Option<&UploadNode<U>> {
        self.as_group().and_then(|group| group.get(&key.into()))
    }

    /// Count the files at or below this position
    pub fn file_count(&self) -> usize {
        match self {
            UploadNode::File(_) => 1,
            UploadNode::Group(group) => group.values().map(UploadNode::file_count).sum(),
        }
    }

    /// Convert every file, keeping the tree shape
    pub fn try_map<V, E>(
        self,
        f: &mut impl FnMut(U) -> Result<V, E>,
    ) -> Result<UploadNode<V>, E> {
        match self {
            UploadNode::File(file) => f(file).map(UploadNode::File),
            UploadNode::Group(group) => try_map_group(group, f).map(UploadNode::Group),
        }
    }
}

/// Convert every file of a group, keeping keys, order, and nesting
pub fn try_map_group<U, V, E>(
    group: UploadGroup<U>,
    f: &mut impl FnMut(U) -> Result<V, E>,
) -> Result<UploadGroup<V>, E> {
    group
        .into_iter()
        .map(|(key, node)| node.try_map(&mut *f).map(|node| (key, node)))
        .collect()
}

/// Convert every file of a group with an infallible function
pub fn map_group<U, V>(group: UploadGroup<U>, mut f: impl FnMut(U) -> V) -> UploadGroup<V> {
    let result: Result<_, std::convert::Infallible> = try_map_group(group, &mut |u| Ok(f(u)));
    match result {
        Ok(group) => group,
        Err(never) => match never {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mover::RegisteredUploads;
    use std::io::Write;

    fn fake_upload() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "This is a fake upload tmp file.").unwrap();
        file
    }

    #[test]
    fn test_stream_opens_tmp_name_lazily() {
        let file = fake_upload();
        let info = UploadInfo::new(file.path().to_string_lossy(), code::OK)
            .name("FakeUpload.txt")
            .media_type("text/plain");

        let mut upload = Upload::new(info);
        assert!(!upload.has_body());
        assert_eq!(upload.contents().unwrap(), "This is a fake upload tmp file.");
        assert!(upload.has_body());
        assert_eq!(upload.name.as_deref(), Some("FakeUpload.txt"));
    }

    #[test]
    fn test_fields_are_reassignable() {
        let mut upload = Upload::new(UploadInfo::new("/tmp/a", code::OK));
        upload.name = Some("renamed.txt".into());
        upload.error = code::PARTIAL;
        assert_eq!(upload.info().name.as_deref(), Some("renamed.txt"));
        assert!(!upload.is_ok());
    }

    #[test]
    fn test_frozen_upload_reopens_each_read() {
        let file = fake_upload();
        let upload = FrozenUpload::new(UploadInfo::new(file.path().to_string_lossy(), code::OK));
        assert_eq!(upload.contents().unwrap(), "This is a fake upload tmp file.");
        assert_eq!(upload.contents().unwrap(), "This is a fake upload tmp file.");
    }

    #[test]
    fn test_move_of_unregistered_file_fails() {
        let file = fake_upload();
        let info = UploadInfo::new(file.path().to_string_lossy(), code::OK);
        let dir = tempfile::tempdir().unwrap();

        let mover = RegisteredUploads::new();
        assert!(!info.move_to(dir.path().join("moved.txt"), &mover));
        assert!(file.path().exists());
    }

    #[test]
    fn test_move_of_missing_file_returns_false() {
        let info = UploadInfo::new("/nonexistent/request-interop/upload", code::OK);
        let mover = RegisteredUploads::new().with("/nonexistent/request-interop/upload");
        assert!(!info.move_to("/tmp/123", &mover));
    }

    #[test]
    fn test_map_group_keeps_shape() {
        let mut inner = UploadGroup::new();
        inner.insert(Key::from(0), UploadNode::File(UploadInfo::new("/tmp/a", 0)));
        inner.insert(Key::from(1), UploadNode::File(UploadInfo::new("/tmp/b", 0)));
        let mut group = UploadGroup::new();
        group.insert(Key::from("photos"), UploadNode::Group(inner));

        let frozen = map_group(group, FrozenUpload::new);
        let photos = &frozen[&Key::from("photos")];
        assert_eq!(photos.file_count(), 2);
        assert_eq!(
            photos.get(1).and_then(UploadNode::as_file).map(|u| u.tmp_name.as_str()),
            Some("/tmp/b")
        );
    }
}

//! `multipart/form-data` encoding.
//!
//! Each part renders as
//!
//! ```text
//! --<boundary>\r\n
//! Content-Disposition: form-data; name="<name>"[; filename="<filename>"]\r\n
//! [Content-Type: <type>\r\n]
//! \r\n
//! <bytes>\r\n
//! ```
//!
//! and the body ends with `--<boundary>--\r\n`.
//!
//! Bodies made only of in-memory parts are encoded into one buffer. File parts
//! are opened at encode time and streamed from disk while the request is sent.

use crate::body::RequestBody;
use crate::error::EncodingError;
use bytes::{BufMut, Bytes, BytesMut};
use futures::future::{self, Either};
use futures::stream::{self, StreamExt};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, Take};
use tokio_util::io::ReaderStream;

/// Byte source of a multipart field.
#[derive(Debug, Clone)]
enum FieldSource {
    Bytes(Bytes),
    File(PathBuf),
}

/// One part of a `multipart/form-data` body.
///
/// Text fields (no filename) render without `filename` and, unless one is set
/// explicitly, without `Content-Type`. File fields always carry both; the
/// content type defaults to `application/octet-stream`.
#[derive(Debug, Clone)]
pub struct MultipartField {
    name: String,
    filename: Option<String>,
    content_type: Option<String>,
    source: FieldSource,
}

impl MultipartField {
    /// Plain text field.
    #[must_use]
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filename: None,
            content_type: None,
            source: FieldSource::Bytes(Bytes::from(value.into())),
        }
    }

    /// File field backed by in-memory bytes.
    #[must_use]
    pub fn bytes(name: impl Into<String>, filename: impl Into<String>, data: Bytes) -> Self {
        Self {
            name: name.into(),
            filename: Some(filename.into()),
            content_type: None,
            source: FieldSource::Bytes(data),
        }
    }

    /// File field streamed from disk when the request is sent.
    ///
    /// The filename defaults to the last component of `path`.
    #[must_use]
    pub fn file(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let filename = path
            .file_name()
            .map_or_else(|| "file".to_owned(), |n| n.to_string_lossy().into_owned());
        Self {
            name: name.into(),
            filename: Some(filename),
            content_type: None,
            source: FieldSource::File(path),
        }
    }

    /// Override the filename.
    #[must_use]
    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Set the part's `Content-Type`.
    #[must_use]
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Open a file source and read its current size.
    async fn open(&self, path: &Path) -> Result<(File, u64), EncodingError> {
        let unreadable = |source| EncodingError::MultipartSource {
            name: self.name.clone(),
            source,
        };
        let file = File::open(path).await.map_err(unreadable)?;
        let length = file.metadata().await.map_err(unreadable)?.len();
        Ok((file, length))
    }

    fn write_headers(&self, out: &mut BytesMut) {
        out.put_slice(b"Content-Disposition: form-data; name=\"");
        out.put_slice(escape_quoted(&self.name).as_bytes());
        out.put_slice(b"\"");
        if let Some(filename) = &self.filename {
            out.put_slice(b"; filename=\"");
            out.put_slice(escape_quoted(filename).as_bytes());
            out.put_slice(b"\"");
        }
        out.put_slice(b"\r\n");

        let content_type = match (&self.content_type, &self.filename) {
            (Some(ct), _) => Some(ct.as_str()),
            (None, Some(_)) => Some(mime::APPLICATION_OCTET_STREAM.as_ref()),
            (None, None) => None,
        };
        if let Some(content_type) = content_type {
            out.put_slice(b"Content-Type: ");
            out.put_slice(content_type.as_bytes());
            out.put_slice(b"\r\n");
        }
    }
}

/// Generate a fresh boundary token.
pub(crate) fn generate_boundary() -> String {
    format!("wpkit.{:08x}", rand::random::<u32>())
}

/// `Content-Type` header value for a body encoded with `boundary`.
pub(crate) fn content_type(boundary: &str) -> String {
    format!("multipart/form-data; boundary={boundary}")
}

/// Contiguous run of an encoded body.
enum Segment {
    Bytes(Bytes),
    File(Take<File>),
}

impl Segment {
    fn into_stream(
        self,
    ) -> Either<stream::Once<future::Ready<io::Result<Bytes>>>, ReaderStream<Take<File>>> {
        match self {
            Self::Bytes(bytes) => Either::Left(stream::once(future::ready(Ok(bytes)))),
            Self::File(file) => Either::Right(ReaderStream::new(file)),
        }
    }
}

/// Encode `fields` with the given boundary.
///
/// File sources are opened here, so an unreadable file surfaces as
/// [`EncodingError::MultipartSource`] at send time. Their size is taken now;
/// the streamed part is cut to it if the file grows meanwhile.
///
/// # Errors
/// Returns [`EncodingError::MultipartSource`] if a file field cannot be opened.
pub async fn encode(
    fields: &[MultipartField],
    boundary: &str,
) -> Result<RequestBody, EncodingError> {
    let mut segments = Vec::new();
    let mut length: u64 = 0;
    let mut out = BytesMut::new();
    for field in fields {
        out.put_slice(b"--");
        out.put_slice(boundary.as_bytes());
        out.put_slice(b"\r\n");
        field.write_headers(&mut out);
        out.put_slice(b"\r\n");
        match &field.source {
            FieldSource::Bytes(bytes) => out.put_slice(bytes),
            FieldSource::File(path) => {
                let (file, size) = field.open(path).await?;
                let head = out.split().freeze();
                length += head.len() as u64 + size;
                segments.push(Segment::Bytes(head));
                segments.push(Segment::File(file.take(size)));
            }
        }
        out.put_slice(b"\r\n");
    }
    out.put_slice(b"--");
    out.put_slice(boundary.as_bytes());
    out.put_slice(b"--\r\n");

    if segments.is_empty() {
        return Ok(RequestBody::full(out.freeze()));
    }
    let tail = out.freeze();
    length += tail.len() as u64;
    segments.push(Segment::Bytes(tail));
    Ok(RequestBody::stream(
        stream::iter(segments).flat_map(Segment::into_stream),
        length,
    ))
}

/// Percent-escape characters that would break a quoted header parameter.
fn escape_quoted(value: &str) -> String {
    value
        .replace('"', "%22")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use std::io::Write;

    async fn encode_to_bytes(fields: &[MultipartField]) -> Bytes {
        let body = encode(fields, "B").await.unwrap();
        body.collect().await.unwrap().to_bytes()
    }

    #[tokio::test]
    async fn test_single_text_field() {
        let body = encode_to_bytes(&[MultipartField::text("name", "value")]).await;
        assert_eq!(
            body.as_ref(),
            b"--B\r\nContent-Disposition: form-data; name=\"name\"\r\n\r\nvalue\r\n--B--\r\n"
        );
    }

    #[tokio::test]
    async fn test_file_field_includes_filename_and_content_type() {
        let field = MultipartField::bytes("media", "cat.png", Bytes::from_static(b"PNG"))
            .content_type("image/png");
        let body = encode_to_bytes(&[field]).await;
        assert_eq!(
            body.as_ref(),
            b"--B\r\nContent-Disposition: form-data; name=\"media\"; filename=\"cat.png\"\r\n\
              Content-Type: image/png\r\n\r\nPNG\r\n--B--\r\n"
        );
    }

    #[tokio::test]
    async fn test_file_field_defaults_to_octet_stream() {
        let field = MultipartField::bytes("blob", "data.bin", Bytes::from_static(b"\x00\x01"));
        let body = encode_to_bytes(&[field]).await;
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("Content-Type: application/octet-stream\r\n"));
    }

    #[tokio::test]
    async fn test_fields_keep_order() {
        let fields = [
            MultipartField::text("first", "1"),
            MultipartField::text("second", "2"),
        ];
        let body = encode_to_bytes(&fields).await;
        let text = String::from_utf8_lossy(&body);
        let first = text.find("name=\"first\"").unwrap();
        let second = text.find("name=\"second\"").unwrap();
        assert!(first < second);
        assert_eq!(text.matches("--B\r\n").count(), 2);
        assert!(text.ends_with("--B--\r\n"));
    }

    #[tokio::test]
    async fn test_in_memory_parts_are_replayable() {
        let body = encode(&[MultipartField::text("a", "b")], "B").await.unwrap();
        assert!(body.is_replayable());
    }

    #[tokio::test]
    async fn test_file_source_is_streamed_with_exact_length() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"from disk").unwrap();

        let fields = [
            MultipartField::text("title", "Notes"),
            MultipartField::file("upload", file.path()).filename("notes.txt"),
        ];
        let body = encode(&fields, "B").await.unwrap();
        assert!(!body.is_replayable());
        let declared = body.len();

        let bytes = body.collect().await.unwrap().to_bytes();
        assert_eq!(bytes.len() as u64, declared);
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.starts_with("--B\r\nContent-Disposition: form-data; name=\"title\""));
        assert!(text.contains("filename=\"notes.txt\""));
        assert!(text.contains("\r\n\r\nfrom disk\r\n--B--\r\n"));
    }

    #[tokio::test]
    async fn test_missing_file_is_encoding_error() {
        let field = MultipartField::file("upload", "/definitely/not/here.bin");
        let err = encode(&[field], "B").await.unwrap_err();
        match err {
            EncodingError::MultipartSource { name, source } => {
                assert_eq!(name, "upload");
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("expected MultipartSource, got {other:?}"),
        }
    }

    #[test]
    fn test_boundary_is_fresh() {
        let a = generate_boundary();
        let b = generate_boundary();
        assert!(a.starts_with("wpkit."));
        assert_eq!(a.len(), "wpkit.".len() + 8);
        // Two 32-bit draws colliding is vanishingly unlikely
        assert_ne!(a, b);
    }

    #[test]
    fn test_quotes_are_escaped() {
        assert_eq!(escape_quoted("a\"b\r\nc"), "a%22b%0D%0Ac");
    }
}

//! Request body selection.
//!
//! A request carries at most one body representation. The first
//! body-producing call picks it; incompatible later calls fail with
//! [`HttpError::BodyConflict`] and leave the current body untouched.
//! Form fields are the exception: once a file is attached they are written as
//! multipart fields instead of being urlencoded.

use crate::error::HttpError;
use crate::values::Values;
use bytes::{BufMut, Bytes, BytesMut};
use rand::Rng;

/// Content type written for attached files
const FILE_PART_CONTENT_TYPE: &str = "application/octet-stream";

/// Body representation accumulated by the request builder
#[derive(Debug, Clone, Default)]
pub enum BodyKind {
    /// No body-producing call yet
    #[default]
    Unset,
    /// Explicit payload (string or marshalled JSON)
    Raw(Bytes),
    /// `application/x-www-form-urlencoded` fields
    Form(Values),
    /// `multipart/form-data` fields and files
    Multipart(MultipartForm),
}

impl BodyKind {
    /// Short name used in conflict errors and logs
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            BodyKind::Unset => "unset",
            BodyKind::Raw(_) => "raw",
            BodyKind::Form(_) => "form",
            BodyKind::Multipart(_) => "multipart",
        }
    }

    /// Set an explicit payload. Only allowed while no body is set.
    ///
    /// # Errors
    /// Returns `HttpError::BodyConflict` if any body is already set.
    pub fn set_raw(&mut self, bytes: Bytes) -> Result<(), HttpError> {
        match self {
            BodyKind::Unset => {
                *self = BodyKind::Raw(bytes);
                Ok(())
            }
            other => Err(conflict(other, "raw")),
        }
    }

    /// Append form fields.
    ///
    /// # Errors
    /// Returns `HttpError::BodyConflict` if a raw body is set.
    pub fn add_fields<I, K, V>(&mut self, fields: I) -> Result<(), HttpError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        match self {
            BodyKind::Unset => {
                *self = BodyKind::Form(fields.into_iter().collect());
                Ok(())
            }
            BodyKind::Form(values) => {
                values.extend(fields);
                Ok(())
            }
            BodyKind::Multipart(form) => {
                form.fields.extend(fields);
                Ok(())
            }
            BodyKind::Raw(_) => Err(conflict(self, "form")),
        }
    }

    /// Attach a file part, switching to multipart.
    ///
    /// Form fields already collected become multipart fields.
    ///
    /// # Errors
    /// Returns `HttpError::BodyConflict` if a raw body is set.
    pub fn add_file(&mut self, part: FilePart) -> Result<(), HttpError> {
        match std::mem::take(self) {
            BodyKind::Unset => {
                *self = BodyKind::Multipart(MultipartForm::new(Values::new(), vec![part]));
            }
            BodyKind::Form(fields) => {
                *self = BodyKind::Multipart(MultipartForm::new(fields, vec![part]));
            }
            BodyKind::Multipart(mut form) => {
                form.files.push(part);
                *self = BodyKind::Multipart(form);
            }
            raw @ BodyKind::Raw(_) => {
                let err = conflict(&raw, "multipart");
                *self = raw;
                return Err(err);
            }
        }
        Ok(())
    }

    /// Produce the wire body.
    ///
    /// Returns the bytes plus a `Content-Type` that must override whatever the
    /// caller set (only multipart needs one, because of its boundary).
    ///
    /// # Errors
    /// Returns `HttpError::Encoding` if form fields cannot be urlencoded.
    pub fn resolve(&self) -> Result<(Bytes, Option<String>), HttpError> {
        match self {
            BodyKind::Unset => Ok((Bytes::new(), None)),
            BodyKind::Raw(bytes) => Ok((bytes.clone(), None)),
            BodyKind::Form(values) => Ok((Bytes::from(values.encode()?), None)),
            BodyKind::Multipart(form) => Ok((form.encode(), Some(form.content_type()))),
        }
    }
}

fn conflict(existing: &BodyKind, attempted: &'static str) -> HttpError {
    HttpError::BodyConflict {
        existing: existing.name(),
        attempted,
    }
}

/// One attached file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub field_name: String,
    pub file_name: String,
    pub content: Bytes,
}

impl FilePart {
    #[must_use]
    pub fn new(
        field_name: impl Into<String>,
        file_name: impl Into<String>,
        content: impl Into<Bytes>,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            file_name: file_name.into(),
            content: content.into(),
        }
    }
}

/// Buffered `multipart/form-data` body
#[derive(Debug, Clone)]
pub struct MultipartForm {
    boundary: String,
    pub fields: Values,
    pub files: Vec<FilePart>,
}

impl MultipartForm {
    fn new(fields: Values, files: Vec<FilePart>) -> Self {
        Self {
            boundary: gen_boundary(),
            fields,
            files,
        }
    }

    #[must_use]
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Serialize fields first, then files, then the closing boundary.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        for (name, value) in self.fields.iter() {
            self.put_delimiter(&mut buf);
            buf.put_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                    escape_quotes(name)
                )
                .as_bytes(),
            );
            buf.put_slice(value.as_bytes());
            buf.put_slice(b"\r\n");
        }
        for file in &self.files {
            self.put_delimiter(&mut buf);
            buf.put_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                    escape_quotes(&file.field_name),
                    escape_quotes(&file.file_name)
                )
                .as_bytes(),
            );
            buf.put_slice(format!("Content-Type: {FILE_PART_CONTENT_TYPE}\r\n\r\n").as_bytes());
            buf.put_slice(&file.content);
            buf.put_slice(b"\r\n");
        }
        buf.put_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        buf.freeze()
    }

    fn put_delimiter(&self, buf: &mut BytesMut) {
        buf.put_slice(format!("--{}\r\n", self.boundary).as_bytes());
    }
}

fn gen_boundary() -> String {
    let mut rng = rand::rng();
    let a: u64 = rng.random();
    let b: u64 = rng.random();
    format!("{a:016x}{b:016x}")
}

fn escape_quotes(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn file(name: &str) -> FilePart {
        FilePart::new("upload", name, Bytes::from_static(b"file-bytes"))
    }

    #[test]
    fn test_raw_after_multipart_conflicts_and_keeps_state() {
        let mut body = BodyKind::Unset;
        body.add_file(file("a.txt")).unwrap();

        let err = body.set_raw(Bytes::from_static(b"{}")).unwrap_err();
        assert!(matches!(
            err,
            HttpError::BodyConflict {
                existing: "multipart",
                attempted: "raw"
            }
        ));

        let BodyKind::Multipart(form) = &body else {
            panic!("expected multipart body, got {body:?}");
        };
        assert_eq!(form.files, vec![file("a.txt")]);
    }

    #[test]
    fn test_multipart_after_raw_conflicts_and_keeps_state() {
        let mut body = BodyKind::Unset;
        body.set_raw(Bytes::from_static(b"payload")).unwrap();

        let err = body.add_file(file("a.txt")).unwrap_err();
        assert!(matches!(err, HttpError::BodyConflict { existing: "raw", .. }));
        assert!(matches!(&body, BodyKind::Raw(b) if b.as_ref() == b"payload"));
    }

    #[test]
    fn test_raw_twice_conflicts() {
        let mut body = BodyKind::Unset;
        body.set_raw(Bytes::from_static(b"one")).unwrap();
        assert!(body.set_raw(Bytes::from_static(b"two")).is_err());
        assert!(matches!(&body, BodyKind::Raw(b) if b.as_ref() == b"one"));
    }

    #[test]
    fn test_fields_after_raw_conflict() {
        let mut body = BodyKind::Unset;
        body.set_raw(Bytes::from_static(b"x")).unwrap();
        assert!(body.add_fields([("k", "v")]).is_err());
        assert_eq!(body.name(), "raw");
    }

    #[test]
    fn test_raw_after_form_conflicts() {
        let mut body = BodyKind::Unset;
        body.add_fields([("k", "v")]).unwrap();
        assert!(matches!(
            body.set_raw(Bytes::from_static(b"x")),
            Err(HttpError::BodyConflict { existing: "form", .. })
        ));
    }

    #[test]
    fn test_form_fields_accumulate_and_encode() {
        let mut body = BodyKind::Unset;
        body.add_fields([("k1", "v1")]).unwrap();
        body.add_fields([("k1", "v2"), ("k2", "x")]).unwrap();

        let (bytes, content_type) = body.resolve().unwrap();
        assert_eq!(bytes.as_ref(), b"k1=v1&k1=v2&k2=x");
        assert!(content_type.is_none());
    }

    #[test]
    fn test_fields_move_into_multipart() {
        let mut body = BodyKind::Unset;
        body.add_fields([("title", "report")]).unwrap();
        body.add_file(file("r.pdf")).unwrap();
        body.add_fields([("tag", "q3")]).unwrap();

        let BodyKind::Multipart(form) = &body else {
            panic!("expected multipart body");
        };
        assert_eq!(form.fields.get("title"), Some("report"));
        assert_eq!(form.fields.get("tag"), Some("q3"));
        assert_eq!(form.files.len(), 1);
    }

    #[test]
    fn test_multipart_encoding_layout() {
        let mut body = BodyKind::Unset;
        body.add_fields([("name", "value")]).unwrap();
        body.add_file(FilePart::new("doc", "say \"hi\".txt", "hello")).unwrap();

        let (bytes, content_type) = body.resolve().unwrap();
        assert!(matches!(body, BodyKind::Multipart(_)));
        let content_type = content_type.unwrap();
        let boundary = content_type
            .strip_prefix("multipart/form-data; boundary=")
            .unwrap();
        assert_eq!(boundary.len(), 32);

        let expected = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"name\"\r\n\r\n\
             value\r\n\
             --{boundary}\r\n\
             Content-Disposition: form-data; name=\"doc\"; filename=\"say \\\"hi\\\".txt\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n\
             hello\r\n\
             --{boundary}--\r\n"
        );
        assert_eq!(String::from_utf8(bytes.to_vec()).unwrap(), expected);
    }

    #[test]
    fn test_boundaries_differ() {
        assert_ne!(gen_boundary(), gen_boundary());
        assert_eq!(gen_boundary().len(), 32);
    }

    #[test]
    fn test_unset_resolves_empty() {
        let (bytes, content_type) = BodyKind::Unset.resolve().unwrap();
        assert!(bytes.is_empty());
        assert!(content_type.is_none());
    }
}

//! Streaming `multipart/form-data` bodies
//!
//! The file part is chained from disk between an in-memory head and tail,
//! so the body length is known up front and the file is never buffered.

use crate::error::{LookasideError, LookasideResult};
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Builder for a form body
#[derive(Debug, Clone)]
pub struct MultipartForm {
    boundary: String,
    fields: Vec<(String, String)>,
    file: Option<FilePart>,
}

#[derive(Debug, Clone)]
struct FilePart {
    field: String,
    filename: String,
    path: PathBuf,
}

impl Default for MultipartForm {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartForm {
    pub fn new() -> Self {
        Self {
            boundary: format!("lookaside-{}", Uuid::new_v4().simple()),
            fields: Vec::new(),
            file: None,
        }
    }

    /// Add a text field
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    /// Attach a file; only one file part is supported
    pub fn file(mut self, field: impl Into<String>, filename: impl Into<String>, path: &Path) -> Self {
        self.file = Some(FilePart {
            field: field.into(),
            filename: filename.into(),
            path: path.to_path_buf(),
        });
        self
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    fn head(&self) -> Vec<u8> {
        let mut head = String::new();
        for (name, value) in &self.fields {
            head.push_str(&format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                self.boundary,
                escape_quoted(name),
                value
            ));
        }
        if let Some(file) = &self.file {
            head.push_str(&format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                self.boundary,
                escape_quoted(&file.field),
                escape_quoted(&file.filename)
            ));
        }
        head.into_bytes()
    }

    fn tail(&self) -> Vec<u8> {
        let lead = if self.file.is_some() { "\r\n" } else { "" };
        format!("{}--{}--\r\n", lead, self.boundary).into_bytes()
    }

    /// Open the body; returns its exact length and a reader over it
    pub fn into_reader(self) -> LookasideResult<(u64, Box<dyn Read + Send>)> {
        let head = self.head();
        let tail = self.tail();

        match &self.file {
            None => {
                let len = (head.len() + tail.len()) as u64;
                Ok((len, Box::new(Cursor::new(head).chain(Cursor::new(tail)))))
            }
            Some(part) => {
                let file = File::open(&part.path).map_err(|e| {
                    LookasideError::io(format!("opening {} for upload", part.path.display()), e)
                })?;
                let file_len = file
                    .metadata()
                    .map_err(|e| LookasideError::io(format!("reading size of {}", part.path.display()), e))?
                    .len();
                let len = head.len() as u64 + file_len + tail.len() as u64;
                let body = Cursor::new(head).chain(file).chain(Cursor::new(tail));
                Ok((len, Box::new(body)))
            }
        }
    }
}

fn escape_quoted(s: &str) -> String {
    s.replace('"', "%22").replace('\r', "%0D").replace('\n', "%0A")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn read_all(form: MultipartForm) -> (u64, String) {
        let (len, mut reader) = form.into_reader().unwrap();
        let mut body = String::new();
        reader.read_to_string(&mut body).unwrap();
        (len, body)
    }

    #[test]
    fn text_only_body() {
        let form = MultipartForm::new().text("name", "foo").text("sha512sum", "abc");
        let boundary = form.boundary.clone();
        let (len, body) = read_all(form);

        assert_eq!(len as usize, body.len());
        assert!(body.contains("name=\"name\"\r\n\r\nfoo\r\n"));
        assert!(body.contains("name=\"sha512sum\"\r\n\r\nabc\r\n"));
        assert!(body.ends_with(&format!("--{}--\r\n", boundary)));
    }

    #[test]
    fn file_part_streams_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("foo.tar.gz");
        fs::write(&path, "tarball-bytes").unwrap();

        let form = MultipartForm::new()
            .text("name", "foo")
            .file("file", "foo.tar.gz", &path);
        let (len, body) = read_all(form);

        assert_eq!(len as usize, body.len());
        assert!(body.contains("name=\"file\"; filename=\"foo.tar.gz\""));
        assert!(body.contains("\r\n\r\ntarball-bytes\r\n--"));
    }

    #[test]
    fn missing_file_errors() {
        let form = MultipartForm::new().file("file", "x", Path::new("/nonexistent/x"));
        assert!(matches!(form.into_reader(), Err(LookasideError::Io { .. })));
    }
}

//! Multipart form payloads.

use std::borrow::Cow;

use bytes::{BufMut, Bytes, BytesMut};

use crate::argument::BinaryPart;

/// Value of one multipart field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartValue {
    /// Plain text field.
    Text(String),
    /// Binary field, passed through untouched.
    Binary(BinaryPart),
}

/// A `multipart/form-data` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartForm {
    boundary: String,
    parts: Vec<(String, PartValue)>,
}

impl MultipartForm {
    /// Create an empty form with a random boundary.
    pub fn new() -> Self {
        Self::with_boundary(format!("herald-{}", uuid::Uuid::new_v4().simple()))
    }

    /// Create an empty form with a fixed boundary.
    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            parts: Vec::new(),
        }
    }

    /// Get the boundary.
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Value for the `Content-Type` header.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Append a text field.
    pub fn text(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.parts.push((name.into(), PartValue::Text(value.into())));
        self
    }

    /// Append a binary field.
    pub fn binary(&mut self, name: impl Into<String>, part: BinaryPart) -> &mut Self {
        self.parts.push((name.into(), PartValue::Binary(part)));
        self
    }

    /// Get the fields in insertion order.
    pub fn parts(&self) -> &[(String, PartValue)] {
        &self.parts
    }

    /// Get a field by name.
    pub fn get(&self, name: &str) -> Option<&PartValue> {
        self.parts
            .iter()
            .find(|(part_name, _)| part_name == name)
            .map(|(_, value)| value)
    }

    /// Encode the form into its wire representation.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        for (name, value) in &self.parts {
            buf.put_slice(format!("--{}\r\n", self.boundary).as_bytes());
            match value {
                PartValue::Text(text) => {
                    buf.put_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                            escape_quoted(name)
                        )
                        .as_bytes(),
                    );
                    buf.put_slice(text.as_bytes());
                }
                PartValue::Binary(part) => {
                    let file_name = part.file_name.as_deref().unwrap_or(name);
                    let content_type = part
                        .content_type
                        .as_deref()
                        .unwrap_or("application/octet-stream");
                    buf.put_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                            escape_quoted(name),
                            escape_quoted(file_name)
                        )
                        .as_bytes(),
                    );
                    buf.put_slice(
                        format!("Content-Type: {}\r\n\r\n", strip_line_breaks(content_type))
                            .as_bytes(),
                    );
                    buf.put_slice(&part.bytes);
                }
            }
            buf.put_slice(b"\r\n");
        }

        buf.put_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        buf.freeze()
    }
}

/// Percent-encode `"`, CR and LF in a quoted `Content-Disposition` parameter,
/// as browsers do for form field and file names.
fn escape_quoted(value: &str) -> Cow<'_, str> {
    if !value.contains(['"', '\r', '\n']) {
        return Cow::Borrowed(value);
    }

    let mut escaped = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        match c {
            '"' => escaped.push_str("%22"),
            '\r' => escaped.push_str("%0D"),
            '\n' => escaped.push_str("%0A"),
            c => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}

fn strip_line_breaks(value: &str) -> Cow<'_, str> {
    if value.contains(['\r', '\n']) {
        Cow::Owned(value.replace(['\r', '\n'], ""))
    } else {
        Cow::Borrowed(value)
    }
}

impl Default for MultipartForm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_text_and_binary() {
        let mut form = MultipartForm::with_boundary("XYZ");
        form.text("name", "report")
            .binary("file", BinaryPart::new(&b"abc"[..]).file_name("a.txt"));

        let encoded = String::from_utf8(form.encode().to_vec()).unwrap();
        assert!(encoded.starts_with("--XYZ\r\nContent-Disposition: form-data; name=\"name\"\r\n\r\nreport\r\n"));
        assert!(encoded.contains("name=\"file\"; filename=\"a.txt\"\r\nContent-Type: application/octet-stream\r\n\r\nabc\r\n"));
        assert!(encoded.ends_with("--XYZ--\r\n"));
    }

    #[test]
    fn test_names_cannot_break_out_of_disposition() {
        let mut form = MultipartForm::with_boundary("XYZ");
        form.text("a\"\r\nX-Injected: 1\r\n\r\nevil", "v").binary(
            "file",
            BinaryPart::new(&b"abc"[..])
                .file_name("x\".txt\r\nX-Other: 2")
                .content_type("text/plain\r\nX-Type: 3"),
        );

        let encoded = String::from_utf8(form.encode().to_vec()).unwrap();
        assert!(!encoded.contains("\r\nX-Injected: 1\r\n"));
        assert!(!encoded.contains("\r\nX-Other: 2"));
        assert!(!encoded.contains("\r\nX-Type: 3"));
        assert!(encoded.contains("name=\"a%22%0D%0AX-Injected: 1%0D%0A%0D%0Aevil\"\r\n\r\nv\r\n"));
        assert!(encoded.contains("filename=\"x%22.txt%0D%0AX-Other: 2\"\r\n"));
        assert!(encoded.contains("Content-Type: text/plainX-Type: 3\r\n\r\nabc"));
    }

    #[test]
    fn test_random_boundary() {
        let a = MultipartForm::new();
        let b = MultipartForm::new();
        assert_ne!(a.boundary(), b.boundary());
        assert!(a.content_type().starts_with("multipart/form-data; boundary=herald-"));
    }
}

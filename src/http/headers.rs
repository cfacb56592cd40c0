//! Ordered, case-insensitive header fields.
//!
//! # Responsibilities
//! - Keep header fields in wire order, including duplicates
//! - Case-insensitive lookup and mutation
//! - Remember the raw bytes of every untouched field line
//!
//! # Design Decisions
//! - A field parsed off the wire keeps its original line; serializing an
//!   untouched map reproduces the input byte for byte
//! - `set` rewrites the first match in place (keeping its name casing) and
//!   drops later duplicates; `append` always adds a new line at the end
//! - CR and LF in values written by hooks are replaced with spaces

use bytes::Bytes;

use crate::error::ParseError;

/// A single `Name: value` header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    name: String,
    value: String,
    /// Original line (without CRLF) for fields that were never modified.
    raw: Option<Bytes>,
}

impl HeaderField {
    /// Build a field from a name and value supplied by code.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: sanitize(value.into()),
            raw: None,
        }
    }

    /// Parse one header line (without its CRLF).
    pub fn parse(line: &[u8]) -> Result<Self, ParseError> {
        if line.contains(&b'\r') || line.contains(&b'\n') {
            return Err(ParseError::InvalidHeader("stray CR or LF".into()));
        }
        let block = [line, &b"\r\n\r\n"[..]].concat();
        let mut slot = [httparse::EMPTY_HEADER; 1];
        match httparse::parse_headers(&block, &mut slot) {
            Ok(httparse::Status::Complete((_, [field]))) => Ok(Self::from_wire(field, line)),
            Ok(_) => Err(ParseError::InvalidHeader(String::from_utf8_lossy(line).into_owned())),
            Err(err) => Err(ParseError::InvalidHeader(format!(
                "{err}: {}",
                String::from_utf8_lossy(line)
            ))),
        }
    }

    /// A field tokenized by `httparse`, remembering the line it came from.
    pub(crate) fn from_wire(field: &httparse::Header<'_>, line: &[u8]) -> Self {
        Self {
            name: field.name.to_string(),
            value: String::from_utf8_lossy(field.value).into_owned(),
            raw: Some(Bytes::copy_from_slice(line)),
        }
    }

    /// Field name as it appears on the wire.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Field value with surrounding whitespace removed.
    pub fn value(&self) -> &str {
        &self.value
    }

    fn matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        match &self.raw {
            Some(raw) => out.extend_from_slice(raw),
            None => {
                out.extend_from_slice(self.name.as_bytes());
                out.extend_from_slice(b": ");
                out.extend_from_slice(self.value.as_bytes());
            }
        }
        out.extend_from_slice(b"\r\n");
    }
}

/// Header map preserving insertion order and multi-value fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<HeaderField>,
}

impl Headers {
    /// Create an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// First value for `name`, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.matches(name))
            .map(|f| f.value.as_str())
    }

    /// All values for `name`, in wire order.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.matches(name))
            .map(|f| f.value.as_str())
            .collect()
    }

    /// All values for `name` joined with `,`.
    pub fn combined(&self, name: &str) -> Option<String> {
        let values = self.get_all(name);
        if values.is_empty() {
            None
        } else {
            Some(values.join(","))
        }
    }

    /// Returns true if at least one field is named `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.matches(name))
    }

    /// Returns true if any value of `name` contains `needle` (case-insensitive).
    pub fn contains_value(&self, name: &str, needle: &str) -> bool {
        let needle = needle.to_ascii_lowercase();
        self.fields
            .iter()
            .filter(|f| f.matches(name))
            .any(|f| f.value.to_ascii_lowercase().contains(&needle))
    }

    /// Returns true if the comma-separated token list in `name` holds `token`.
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.fields
            .iter()
            .filter(|f| f.matches(name))
            .flat_map(|f| f.value.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }

    /// Replace every `name` field with a single field holding `value`.
    ///
    /// The first existing field keeps its position and name casing.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = sanitize(value.into());
        match self.fields.iter().position(|f| f.matches(name)) {
            Some(first) => {
                let existing = self.fields[first].name.clone();
                self.fields[first] = HeaderField {
                    name: existing,
                    value,
                    raw: None,
                };
                let mut index = 0;
                self.fields.retain(|f| {
                    let keep = index <= first || !f.matches(name);
                    index += 1;
                    keep
                });
            }
            None => self.fields.push(HeaderField {
                name: name.to_string(),
                value,
                raw: None,
            }),
        }
    }

    /// Add a new `name` field after all existing fields.
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        self.fields.push(HeaderField::new(name, value));
    }

    /// Remove every `name` field. Returns true if anything was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.fields.len();
        self.fields.retain(|f| !f.matches(name));
        self.fields.len() < before
    }

    /// Iterate `(name, value)` pairs in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|f| (f.name.as_str(), f.value.as_str()))
    }

    /// Number of field lines.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub(crate) fn push_field(&mut self, field: HeaderField) {
        self.fields.push(field);
    }

    pub(crate) fn write_to(&self, out: &mut Vec<u8>) {
        for field in &self.fields {
            field.write_to(out);
        }
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for Headers {
    fn from_iter<T: IntoIterator<Item = (&'a str, &'a str)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}

fn sanitize(value: String) -> String {
    if value.contains(['\r', '\n']) {
        value.replace(['\r', '\n'], " ")
    } else {
        value
    }
}

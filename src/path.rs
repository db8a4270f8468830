//! Path parsing
//!
//! A path addresses a field inside a stored record:
//!
//! ```text
//! <type-name>/<field>[/<field>...]
//! ```
//!
//! Every `<field>` may carry a bracketed index or map key (`arr[3]`,
//! `m[key]`). The slash form (`arr/3`, `m/key`) is equivalent; the engine
//! decides from the schema whether a bare segment is a field name or an
//! index/key. A path with no fields addresses the whole message.

use std::fmt;

use crate::error::{PbError, Result};

/// Separator between the type prefix and the fields, and between fields
pub const SEPARATOR: char = '/';

/// One `/`-delimited piece of a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    name: String,
    key: Option<String>,
}

impl Segment {
    /// A bare field name (or, after an aggregate, a slash-form index/key)
    pub fn field(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: None,
        }
    }

    /// A field name with a bracketed index or key
    pub fn keyed(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: Some(key.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The bracketed index or key, if any
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(PbError::MalformedPath("empty field".to_string()));
        }

        match raw.find('[') {
            Some(open) => {
                if !raw.ends_with(']') {
                    return Err(PbError::MalformedPath(format!(
                        "unterminated index or key: {}",
                        raw
                    )));
                }
                if open == 0 {
                    return Err(PbError::MalformedPath(format!("empty field: {}", raw)));
                }
                Ok(Self::keyed(&raw[..open], &raw[open + 1..raw.len() - 1]))
            }
            None if raw.ends_with(']') => Err(PbError::MalformedPath(format!(
                "unbalanced ']' in field: {}",
                raw
            ))),
            None => Ok(Self::field(raw)),
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{}[{}]", self.name, key),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A parsed root type plus field segments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    root_type: String,
    segments: Vec<Segment>,
}

impl Path {
    /// Parse `<type>[/<field>...]`
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(PbError::MalformedPath("empty path".to_string()));
        }

        let (type_part, fields) = match raw.find(SEPARATOR) {
            Some(pos) => (&raw[..pos], Some(&raw[pos..])),
            None => (raw, None),
        };

        let root_type = normalize_type_name(type_part);
        if root_type.is_empty() {
            return Err(PbError::MalformedPath("empty type".to_string()));
        }

        let segments = match fields {
            Some(fields) => parse_fields(fields)?,
            None => Vec::new(),
        };

        Ok(Self {
            root_type,
            segments,
        })
    }

    /// Build a path from a separate type name and field string (`/a/b`)
    pub fn from_parts(type_name: &str, fields: &str) -> Result<Self> {
        let root_type = normalize_type_name(type_name);
        if root_type.is_empty() {
            return Err(PbError::MalformedPath("empty type".to_string()));
        }

        Ok(Self {
            root_type,
            segments: parse_fields(fields)?,
        })
    }

    pub fn root_type(&self) -> &str {
        &self.root_type
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// True when the path addresses the whole message
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root_type)?;
        for segment in &self.segments {
            write!(f, "{}{}", SEPARATOR, segment)?;
        }
        Ok(())
    }
}

/// Split `/a/b[k]/c` into segments in one pass.
///
/// Separators inside brackets belong to the key.
fn parse_fields(fields: &str) -> Result<Vec<Segment>> {
    if fields.len() <= 1 {
        return Err(PbError::MalformedPath("empty path".to_string()));
    }

    if !fields.starts_with(SEPARATOR) {
        return Err(PbError::MalformedPath(format!(
            "should begin with {}: {}",
            SEPARATOR, fields
        )));
    }

    let body = &fields[1..];
    let mut segments = Vec::new();
    let mut start = 0;
    let mut in_key = false;

    for (idx, ch) in body.char_indices() {
        match ch {
            '[' if !in_key => in_key = true,
            ']' if in_key => in_key = false,
            SEPARATOR if !in_key => {
                segments.push(Segment::parse(&body[start..idx])?);
                start = idx + 1;
            }
            _ => {}
        }
    }

    if in_key {
        return Err(PbError::MalformedPath(format!(
            "unterminated index or key: {}",
            &body[start..]
        )));
    }

    segments.push(Segment::parse(&body[start..])?);

    Ok(segments)
}

/// Normalize a type name to the schema's `.` namespace separator.
///
/// `a::b::Msg`, `a.b.Msg` and `a::.b..Msg` all become `a.b.Msg`.
pub fn normalize_type_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_separator = false;
    let mut chars = raw.chars().peekable();

    while let Some(ch) = chars.next() {
        let is_separator = match ch {
            '.' => true,
            ':' if chars.peek() == Some(&':') => {
                chars.next();
                true
            }
            _ => false,
        };

        if is_separator {
            pending_separator = true;
            continue;
        }

        if pending_separator && !out.is_empty() {
            out.push('.');
        }
        pending_separator = false;
        out.push(ch);
    }

    out
}

//! Field kinds and schema rendering

use std::fmt::{self, Write};

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use prost_reflect::{Cardinality, FieldDescriptor, Kind, MessageDescriptor};
use serde::{Deserialize, Serialize};

/// Closed set of value kinds a field (or an array/map element) can hold.
///
/// Protobuf wire variants collapse onto their in-memory kind: `sint32`,
/// `sfixed32` and `int32` are all [`ScalarKind::Int32`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarKind {
    Int32,
    Int64,
    Uint32,
    Uint64,
    Float,
    Double,
    Bool,
    Enum,
    String,
    Bytes,
    Message,
}

impl ScalarKind {
    pub fn of(kind: &Kind) -> Self {
        match kind {
            Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => ScalarKind::Int32,
            Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => ScalarKind::Int64,
            Kind::Uint32 | Kind::Fixed32 => ScalarKind::Uint32,
            Kind::Uint64 | Kind::Fixed64 => ScalarKind::Uint64,
            Kind::Float => ScalarKind::Float,
            Kind::Double => ScalarKind::Double,
            Kind::Bool => ScalarKind::Bool,
            Kind::Enum(_) => ScalarKind::Enum,
            Kind::String => ScalarKind::String,
            Kind::Bytes => ScalarKind::Bytes,
            Kind::Message(_) => ScalarKind::Message,
        }
    }

    /// Name used in coercion errors (`not int32`)
    pub fn name(&self) -> &'static str {
        match self {
            ScalarKind::Int32 => "int32",
            ScalarKind::Int64 => "int64",
            ScalarKind::Uint32 => "uint32",
            ScalarKind::Uint64 => "uint64",
            ScalarKind::Float => "float",
            ScalarKind::Double => "double",
            ScalarKind::Bool => "bool",
            ScalarKind::Enum => "enum",
            ScalarKind::String => "string",
            ScalarKind::Bytes => "bytes",
            ScalarKind::Message => "message",
        }
    }

    pub fn is_string_like(&self) -> bool {
        matches!(self, ScalarKind::String | ScalarKind::Bytes)
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind of the values a field stores: the element kind for arrays, the
/// value kind for maps.
pub fn element_kind(field: &FieldDescriptor) -> Kind {
    if field.is_map() {
        if let Kind::Message(entry) = field.kind() {
            return entry.map_entry_value_field().kind();
        }
    }
    field.kind()
}

/// Key kind of a map field
pub fn map_key_kind(field: &FieldDescriptor) -> Option<Kind> {
    if !field.is_map() {
        return None;
    }
    match field.kind() {
        Kind::Message(entry) => Some(entry.map_entry_key_field().kind()),
        _ => None,
    }
}

/// Best fuzzy candidate for a misspelled type or field name
pub(crate) fn closest_match<I, S>(query: &str, candidates: I) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let matcher = SkimMatcherV2::default();
    candidates
        .into_iter()
        .filter_map(|candidate| {
            let candidate = candidate.as_ref();
            matcher
                .fuzzy_match(candidate, query)
                .map(|score| (score, candidate.to_string()))
        })
        .max_by_key(|(score, _)| *score)
        .map(|(_, name)| name)
}

/// Render a message type as `.proto`-like text.
///
/// Nested messages and enums declared inside the type are rendered inline;
/// map entry types are folded into `map<K, V>` fields.
pub fn render_message(desc: &MessageDescriptor) -> String {
    let mut out = String::new();
    write_message(&mut out, desc, 0);
    out
}

fn write_message(out: &mut String, desc: &MessageDescriptor, depth: usize) {
    let indent = "  ".repeat(depth);
    let _ = writeln!(out, "{}message {} {{", indent, desc.name());

    for nested in desc.child_messages().filter(|m| !m.is_map_entry()) {
        write_message(out, &nested, depth + 1);
    }

    for nested in desc.child_enums() {
        let inner = "  ".repeat(depth + 1);
        let _ = writeln!(out, "{}enum {} {{", inner, nested.name());
        for value in nested.values() {
            let _ = writeln!(out, "{}  {} = {};", inner, value.name(), value.number());
        }
        let _ = writeln!(out, "{}}}", inner);
    }

    for field in desc.fields() {
        let _ = writeln!(
            out,
            "{}  {}{} {} = {};",
            indent,
            label(&field),
            type_label(&field),
            field.name(),
            field.number()
        );
    }

    let _ = writeln!(out, "{}}}", indent);
}

fn label(field: &FieldDescriptor) -> &'static str {
    if field.is_map() {
        return "";
    }
    match field.cardinality() {
        Cardinality::Repeated => "repeated ",
        Cardinality::Required => "required ",
        Cardinality::Optional if field.field_descriptor_proto().proto3_optional() => "optional ",
        Cardinality::Optional => "",
    }
}

fn type_label(field: &FieldDescriptor) -> String {
    if field.is_map() {
        if let Kind::Message(entry) = field.kind() {
            return format!(
                "map<{}, {}>",
                kind_label(&entry.map_entry_key_field().kind()),
                kind_label(&entry.map_entry_value_field().kind())
            );
        }
    }
    kind_label(&field.kind())
}

fn kind_label(kind: &Kind) -> String {
    match kind {
        Kind::Double => "double".to_string(),
        Kind::Float => "float".to_string(),
        Kind::Int32 => "int32".to_string(),
        Kind::Int64 => "int64".to_string(),
        Kind::Uint32 => "uint32".to_string(),
        Kind::Uint64 => "uint64".to_string(),
        Kind::Sint32 => "sint32".to_string(),
        Kind::Sint64 => "sint64".to_string(),
        Kind::Fixed32 => "fixed32".to_string(),
        Kind::Fixed64 => "fixed64".to_string(),
        Kind::Sfixed32 => "sfixed32".to_string(),
        Kind::Sfixed64 => "sfixed64".to_string(),
        Kind::Bool => "bool".to_string(),
        Kind::String => "string".to_string(),
        Kind::Bytes => "bytes".to_string(),
        Kind::Message(m) => m.full_name().to_string(),
        Kind::Enum(e) => e.full_name().to_string(),
    }
}

//! Path-addressed field references
//!
//! Resolution runs in two passes. The plan pass walks a shared borrow of the
//! root message, checks every field name, index and map key, and records one
//! [`Step`] per segment. Only then does a write cursor descend mutably, so a
//! bad path or a bad value never leaves a partial write behind.
//!
//! ```text
//! Msg/sub/arr[2]      Msg/m/key/s      Msg/arr/0
//! ```

use std::borrow::Cow;
use std::fmt;

use prost::Message;
use prost_reflect::{
    DynamicMessage, FieldDescriptor, Kind, MapKey, MessageDescriptor, ReflectMessage, Value,
};
use tracing::debug;

use crate::codec;
use crate::coerce;
use crate::error::{PbError, Result};
use crate::path::{Path, Segment};
use crate::schema::{closest_match, element_kind, map_key_kind, ScalarKind};

/// What a resolved cursor addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorKind {
    WholeMessage,
    WholeArray,
    ArrayElement,
    WholeMap,
    MapElement,
    MessageField,
    ScalarField,
}

impl fmt::Display for CursorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CursorKind::WholeMessage => "whole message",
            CursorKind::WholeArray => "whole array",
            CursorKind::ArrayElement => "array element",
            CursorKind::WholeMap => "whole map",
            CursorKind::MapElement => "map element",
            CursorKind::MessageField => "message field",
            CursorKind::ScalarField => "scalar field",
        };
        f.write_str(name)
    }
}

/// Whether the walk may create missing map entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

#[derive(Debug, Clone)]
enum Selector {
    None,
    Index(usize),
    Key(MapKey),
}

/// One validated hop: a field plus the optional element inside it
#[derive(Debug, Clone)]
struct Step {
    field: FieldDescriptor,
    selector: Selector,
}

impl Step {
    fn is_aggregate(&self) -> bool {
        self.field.is_list() || self.field.is_map()
    }

    fn kind(&self) -> CursorKind {
        match (&self.selector, self.field.is_map(), self.field.is_list()) {
            (Selector::Key(_), _, _) => CursorKind::MapElement,
            (Selector::Index(_), _, _) => CursorKind::ArrayElement,
            (Selector::None, true, _) => CursorKind::WholeMap,
            (Selector::None, _, true) => CursorKind::WholeArray,
            _ if matches!(self.field.kind(), Kind::Message(_)) => CursorKind::MessageField,
            _ => CursorKind::ScalarField,
        }
    }

    fn default_value(&self) -> Value {
        match self.selector {
            Selector::None => Value::default_value_for_field(&self.field),
            _ => Value::default_value(&element_kind(&self.field)),
        }
    }
}

fn field_value<'a>(msg: &'a DynamicMessage, field: &FieldDescriptor) -> Option<&'a Value> {
    match msg.get_field(field) {
        Cow::Borrowed(value) => Some(value),
        Cow::Owned(_) => None,
    }
}

fn select<'a>(value: &'a Value, selector: &Selector) -> Option<&'a Value> {
    match (selector, value) {
        (Selector::None, value) => Some(value),
        (Selector::Index(i), Value::List(list)) => list.get(*i),
        (Selector::Key(key), Value::Map(map)) => map.get(key),
        _ => None,
    }
}

fn child_message<'a>(msg: &'a DynamicMessage, step: &Step) -> Option<&'a DynamicMessage> {
    match field_value(msg, &step.field).and_then(|v| select(v, &step.selector)) {
        Some(Value::Message(sub)) => Some(sub),
        _ => None,
    }
}

fn lookup_field(desc: &MessageDescriptor, name: &str) -> Result<FieldDescriptor> {
    desc.get_field_by_name(name)
        .ok_or_else(|| PbError::FieldNotFound {
            name: name.to_string(),
            suggestion: closest_match(name, desc.fields().map(|f| f.name().to_string())),
        })
}

/// Turn an index or key literal into a selector for `step`, checking it
/// against the current contents (`existing`).
fn make_selector(
    step: &Step,
    raw: &str,
    existing: Option<&Value>,
    access: Access,
) -> Result<Selector> {
    let field = &step.field;

    if field.is_map() {
        let key_kind = map_key_kind(field)
            .ok_or_else(|| PbError::InvalidPath(format!("{} is not a map", field.name())))?;
        let key = coerce::to_map_key(&key_kind, raw)?;

        let present = matches!(existing, Some(Value::Map(map)) if map.contains_key(&key));
        if !present && access == Access::Read {
            return Err(PbError::MapKeyNotFound(raw.to_string()));
        }
        return Ok(Selector::Key(key));
    }

    if field.is_list() {
        let len = match existing {
            Some(Value::List(list)) => list.len(),
            _ => 0,
        };
        return match raw.parse::<usize>() {
            Ok(index) if index < len => Ok(Selector::Index(index)),
            _ => Err(PbError::IndexOutOfRange {
                index: raw.to_string(),
                len,
            }),
        };
    }

    Err(PbError::InvalidPath(format!(
        "{} is neither an array nor a map",
        field.name()
    )))
}

/// Validate `path` against `root` and record the steps to its target
fn plan(root: &DynamicMessage, path: &Path, access: Access) -> Result<Vec<Step>> {
    let root_desc = root.descriptor();
    if root_desc.full_name() != path.root_type() {
        return Err(PbError::TypeMismatch {
            expected: path.root_type().to_string(),
            actual: root_desc.full_name().to_string(),
        });
    }

    let mut steps: Vec<Step> = Vec::with_capacity(path.segments().len());
    // The message the next field is looked up on; `None` once below an
    // unset sub-message, where every value is its default.
    let mut view: Option<&DynamicMessage> = Some(root);
    let mut desc = root_desc;

    for segment in path.segments() {
        if let Some(last) = steps.last_mut() {
            if last.is_aggregate() && matches!(last.selector, Selector::None) {
                // slash form: `arr/0`, `m/key`
                if segment.key().is_some() {
                    return Err(PbError::InvalidPath(format!(
                        "expected an index or key after {}, got {}",
                        last.field.name(),
                        segment
                    )));
                }
                let existing = view.and_then(|m| field_value(m, &last.field));
                last.selector = make_selector(last, segment.name(), existing, access)?;
                continue;
            }

            desc = match element_kind(&last.field) {
                Kind::Message(sub) => sub,
                _ => {
                    return Err(PbError::InvalidPath(format!(
                        "cannot descend into {} {}",
                        last.kind(),
                        last.field.name()
                    )))
                }
            };
            view = view.and_then(|m| child_message(m, last));
        }

        steps.push(resolve_segment(&desc, segment, view, access)?);
    }

    debug!(path = %path, steps = steps.len(), "resolved path");
    Ok(steps)
}

fn resolve_segment(
    desc: &MessageDescriptor,
    segment: &Segment,
    view: Option<&DynamicMessage>,
    access: Access,
) -> Result<Step> {
    let mut step = Step {
        field: lookup_field(desc, segment.name())?,
        selector: Selector::None,
    };

    if let Some(raw) = segment.key() {
        let existing = view.and_then(|m| field_value(m, &step.field));
        step.selector = make_selector(&step, raw, existing, access)?;
    }

    Ok(step)
}

fn classify(steps: &[Step]) -> CursorKind {
    steps
        .last()
        .map(Step::kind)
        .unwrap_or(CursorKind::WholeMessage)
}

/// Resolve `path` for reading
pub fn resolve<'a>(root: &'a DynamicMessage, path: &Path) -> Result<FieldRef<'a>> {
    let steps = plan(root, path, Access::Read)?;
    Ok(FieldRef {
        kind: classify(&steps),
        root,
        steps,
    })
}

/// Resolve `path` for writing. Missing map keys along the way are accepted
/// and inserted when the cursor writes.
pub fn resolve_mut<'a>(root: &'a mut DynamicMessage, path: &Path) -> Result<FieldRefMut<'a>> {
    let steps = plan(root, path, Access::Write)?;
    Ok(FieldRefMut {
        kind: classify(&steps),
        root,
        steps,
    })
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Bool(_) => "bool",
        Value::I32(_) => "int32",
        Value::I64(_) => "int64",
        Value::U32(_) => "uint32",
        Value::U64(_) => "uint64",
        Value::F32(_) => "float",
        Value::F64(_) => "double",
        Value::String(_) => "string",
        Value::Bytes(_) => "bytes",
        Value::EnumNumber(_) => "enum",
        Value::Message(_) => "message",
        Value::List(_) => "array",
        Value::Map(_) => "map",
    }
}

fn mismatch(expected: &str, actual: &Value) -> PbError {
    PbError::TypeMismatch {
        expected: expected.to_string(),
        actual: kind_name(actual).to_string(),
    }
}

/// Read-only cursor
#[derive(Debug)]
pub struct FieldRef<'a> {
    root: &'a DynamicMessage,
    steps: Vec<Step>,
    kind: CursorKind,
}

impl<'a> FieldRef<'a> {
    pub fn kind(&self) -> CursorKind {
        self.kind
    }

    /// The addressed field; `None` for the whole message
    pub fn field(&self) -> Option<&FieldDescriptor> {
        self.steps.last().map(|s| &s.field)
    }

    pub fn key(&self) -> Option<&MapKey> {
        match self.steps.last().map(|s| &s.selector) {
            Some(Selector::Key(key)) => Some(key),
            _ => None,
        }
    }

    /// Kind of the addressed value, element kind for arrays and maps
    pub fn value_kind(&self) -> ScalarKind {
        match self.steps.last() {
            Some(step) => ScalarKind::of(&element_kind(&step.field)),
            None => ScalarKind::Message,
        }
    }

    /// The addressed value, borrowed when it is set and defaulted otherwise
    pub fn value(&self) -> Cow<'a, Value> {
        let Some((last, parents)) = self.steps.split_last() else {
            return Cow::Owned(Value::Message(self.root.clone()));
        };

        let mut msg = Some(self.root);
        for step in parents {
            msg = msg.and_then(|m| child_message(m, step));
        }

        match msg
            .and_then(|m| field_value(m, &last.field))
            .and_then(|v| select(v, &last.selector))
        {
            Some(value) => Cow::Borrowed(value),
            None => Cow::Owned(last.default_value()),
        }
    }

    /// Materialize the addressed value
    pub fn get(&self) -> Value {
        self.value().into_owned()
    }

    pub fn get_message(&self) -> Result<DynamicMessage> {
        match self.value().as_ref() {
            Value::Message(msg) => Ok(msg.clone()),
            other => Err(mismatch("message", other)),
        }
    }

    /// Serialized length for messages, byte length for strings, element
    /// count for whole arrays and maps
    pub fn len(&self) -> Result<usize> {
        match (self.kind, self.value().as_ref()) {
            (CursorKind::WholeMessage, _) => Ok(codec::encoded_len(self.root)),
            (CursorKind::MessageField, Value::Message(msg)) => Ok(codec::encoded_len(msg)),
            (CursorKind::WholeArray, Value::List(list)) => Ok(list.len()),
            (CursorKind::WholeMap, Value::Map(map)) => Ok(map.len()),
            (CursorKind::ScalarField, Value::String(s)) => Ok(s.len()),
            (CursorKind::ScalarField, Value::Bytes(b)) => Ok(b.len()),
            (kind, value) => Err(PbError::Unsupported(format!(
                "len of {} ({})",
                kind,
                kind_name(value)
            ))),
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.len().map(|len| len == 0)
    }
}

/// Mutable cursor. Holds the exclusive borrow of the root for one operation.
#[derive(Debug)]
pub struct FieldRefMut<'a> {
    root: &'a mut DynamicMessage,
    steps: Vec<Step>,
    kind: CursorKind,
}

fn select_mut<'v>(value: &'v mut Value, step: &Step) -> Result<&'v mut Value> {
    match (&step.selector, value) {
        (Selector::None, value) => Ok(value),
        (Selector::Index(i), Value::List(list)) => {
            let len = list.len();
            list.get_mut(*i).ok_or_else(|| PbError::IndexOutOfRange {
                index: i.to_string(),
                len,
            })
        }
        (Selector::Key(key), Value::Map(map)) => Ok(map
            .entry(key.clone())
            .or_insert_with(|| Value::default_value(&element_kind(&step.field)))),
        (_, other) => Err(mismatch(
            if step.field.is_map() { "map" } else { "array" },
            other,
        )),
    }
}

fn descend_mut<'m>(msg: &'m mut DynamicMessage, step: &Step) -> Result<&'m mut DynamicMessage> {
    match select_mut(msg.get_field_mut(&step.field), step)? {
        Value::Message(sub) => Ok(sub),
        other => Err(mismatch("message", other)),
    }
}

impl<'a> FieldRefMut<'a> {
    pub fn kind(&self) -> CursorKind {
        self.kind
    }

    /// Read-only view of the same target
    pub fn view(&self) -> FieldRef<'_> {
        FieldRef {
            root: &*self.root,
            steps: self.steps.clone(),
            kind: self.kind,
        }
    }

    fn last_step(&self) -> Result<&Step> {
        self.steps
            .last()
            .ok_or_else(|| PbError::InvalidOperation("path addresses the whole message".to_string()))
    }

    /// Message holding the addressed field, creating intermediate values
    fn parent_mut(&mut self) -> Result<&mut DynamicMessage> {
        let steps = &self.steps;
        let mut msg: &mut DynamicMessage = &mut *self.root;
        if let Some((_, parents)) = steps.split_last() {
            for step in parents {
                msg = descend_mut(msg, step)?;
            }
        }
        Ok(msg)
    }

    /// The addressed value slot
    fn slot(&mut self) -> Result<&mut Value> {
        let last = self.last_step()?.clone();
        let parent = self.parent_mut()?;
        select_mut(parent.get_field_mut(&last.field), &last)
    }

    /// Coerce raw request bytes into a value for the addressed slot
    fn coerce(&self, raw: &[u8]) -> Result<Value> {
        match self.steps.last() {
            None => Ok(Value::Message(codec::decode(&self.root.descriptor(), raw)?)),
            Some(step) => match element_kind(&step.field) {
                Kind::Message(desc) => Ok(Value::Message(codec::decode(&desc, raw)?)),
                kind => coerce::to_value(&kind, raw),
            },
        }
    }

    fn check_element(&self, value: &Value) -> Result<()> {
        let kind = match self.steps.last() {
            Some(step) => element_kind(&step.field),
            None => Kind::Message(self.root.descriptor()),
        };
        let valid = match (&kind, value) {
            (Kind::Message(desc), Value::Message(msg)) => {
                msg.descriptor().full_name() == desc.full_name()
            }
            _ => value.is_valid(&kind),
        };

        if valid {
            Ok(())
        } else {
            Err(PbError::TypeMismatch {
                expected: match &kind {
                    Kind::Message(desc) => desc.full_name().to_string(),
                    other => ScalarKind::of(other).to_string(),
                },
                actual: match value {
                    Value::Message(msg) => msg.descriptor().full_name().to_string(),
                    other => kind_name(other).to_string(),
                },
            })
        }
    }

    /// Overwrite the addressed value
    pub fn set_value(&mut self, value: Value) -> Result<()> {
        match self.kind {
            CursorKind::WholeArray | CursorKind::WholeMap => {
                return Err(PbError::InvalidOperation(format!("cannot set a {}", self.kind)))
            }
            CursorKind::WholeMessage => {
                self.check_element(&value)?;
                if let Value::Message(msg) = value {
                    *self.root = msg;
                }
                return Ok(());
            }
            _ => {}
        }

        self.check_element(&value)?;
        *self.slot()? = value;
        Ok(())
    }

    /// Parse `raw` per the addressed kind and overwrite the value
    pub fn set_raw(&mut self, raw: &[u8]) -> Result<()> {
        if matches!(self.kind, CursorKind::WholeArray | CursorKind::WholeMap) {
            return Err(PbError::InvalidOperation(format!("cannot set a {}", self.kind)));
        }
        let value = self.coerce(raw)?;
        self.set_value(value)
    }

    fn require_whole_array(&self) -> Result<()> {
        match self.kind {
            CursorKind::WholeArray => Ok(()),
            CursorKind::WholeMap => Err(PbError::Unsupported("append to a map".to_string())),
            kind => Err(PbError::InvalidOperation(format!(
                "cannot add an element to a {}",
                kind
            ))),
        }
    }

    /// Push one element onto a whole-array cursor; returns the new length
    pub fn add_value(&mut self, value: Value) -> Result<usize> {
        self.require_whole_array()?;
        self.check_element(&value)?;
        match self.slot()? {
            Value::List(list) => {
                list.push(value);
                Ok(list.len())
            }
            other => Err(mismatch("array", other)),
        }
    }

    pub fn add_raw(&mut self, raw: &[u8]) -> Result<usize> {
        self.require_whole_array()?;
        let value = self.coerce(raw)?;
        self.add_value(value)
    }

    /// Append every value: to a whole array as new elements (returns the
    /// element count), or to a string/bytes value as concatenated text
    /// (returns the byte length).
    pub fn append<V: AsRef<[u8]>>(&mut self, values: &[V]) -> Result<usize> {
        match self.kind {
            CursorKind::WholeArray => {
                // coerce everything before the first push
                let coerced = values
                    .iter()
                    .map(|raw| self.coerce(raw.as_ref()))
                    .collect::<Result<Vec<_>>>()?;
                let mut len = self.view().len()?;
                for value in coerced {
                    len = self.add_value(value)?;
                }
                Ok(len)
            }
            CursorKind::WholeMap => Err(PbError::Unsupported("append to a map".to_string())),
            CursorKind::ScalarField | CursorKind::ArrayElement | CursorKind::MapElement
                if self.view().value_kind().is_string_like() =>
            {
                self.append_text(values)
            }
            kind => Err(PbError::InvalidOperation(format!(
                "cannot append to a {} of {}",
                kind,
                self.view().value_kind()
            ))),
        }
    }

    fn append_text<V: AsRef<[u8]>>(&mut self, values: &[V]) -> Result<usize> {
        let text = match self.view().value_kind() {
            ScalarKind::String => Some(
                values
                    .iter()
                    .map(|raw| coerce::to_string(raw.as_ref()))
                    .collect::<Result<String>>()?,
            ),
            _ => None,
        };

        match (self.slot()?, text) {
            (Value::String(s), Some(text)) => {
                s.push_str(&text);
                Ok(s.len())
            }
            (Value::Bytes(b), _) => {
                let mut buf = b.to_vec();
                for raw in values {
                    buf.extend_from_slice(raw.as_ref());
                }
                let len = buf.len();
                *b = buf.into();
                Ok(len)
            }
            (other, _) => Err(mismatch("string", other)),
        }
    }

    /// Remove the addressed array element, keeping the order of the rest
    pub fn del(&mut self) -> Result<()> {
        let index = match (self.kind, self.steps.last().map(|s| &s.selector)) {
            (CursorKind::ArrayElement, Some(Selector::Index(i))) => *i,
            (kind, _) => return Err(PbError::Unsupported(format!("delete a {}", kind))),
        };

        let field = self.last_step()?.field.clone();
        match self.parent_mut()?.get_field_mut(&field) {
            Value::List(list) if index < list.len() => {
                list.remove(index);
                Ok(())
            }
            Value::List(list) => Err(PbError::IndexOutOfRange {
                index: index.to_string(),
                len: list.len(),
            }),
            other => Err(mismatch("array", other)),
        }
    }

    /// Reset the addressed value to its default
    pub fn clear(&mut self) -> Result<()> {
        match self.kind {
            CursorKind::WholeMessage => {
                Message::clear(&mut *self.root);
                Ok(())
            }
            CursorKind::MessageField | CursorKind::ScalarField | CursorKind::WholeArray => {
                let field = self.last_step()?.field.clone();
                self.parent_mut()?.clear_field(&field);
                Ok(())
            }
            kind => Err(PbError::Unsupported(format!("clear a {}", kind))),
        }
    }

    /// Merge `src` into the addressed message: last write wins per leaf,
    /// repeated fields concatenate
    pub fn merge(&mut self, src: &DynamicMessage) -> Result<()> {
        match self.kind {
            CursorKind::WholeMessage => codec::merge_into(self.root, src),
            CursorKind::MessageField => {
                let expected = element_kind(&self.last_step()?.field);
                if let Kind::Message(desc) = expected {
                    if desc.full_name() != src.descriptor().full_name() {
                        return Err(PbError::TypeMismatch {
                            expected: desc.full_name().to_string(),
                            actual: src.descriptor().full_name().to_string(),
                        });
                    }
                }
                match self.slot()? {
                    Value::Message(dst) => codec::merge_into(dst, src),
                    other => Err(mismatch("message", other)),
                }
            }
            kind => Err(PbError::InvalidOperation(format!("cannot merge into a {}", kind))),
        }
    }

    pub fn merge_raw(&mut self, raw: &[u8]) -> Result<()> {
        if !matches!(self.kind, CursorKind::WholeMessage | CursorKind::MessageField) {
            return Err(PbError::InvalidOperation(format!(
                "cannot merge into a {}",
                self.kind
            )));
        }
        match self.coerce(raw)? {
            Value::Message(src) => self.merge(&src),
            other => Err(mismatch("message", &other)),
        }
    }

    pub fn set_message(&mut self, msg: DynamicMessage) -> Result<()> {
        self.set_value(Value::Message(msg))
    }

    pub fn add_message(&mut self, msg: DynamicMessage) -> Result<usize> {
        self.add_value(Value::Message(msg))
    }
}

macro_rules! typed_accessors {
    ($($get:ident, $set:ident, $add:ident, $ty:ty, $variant:ident, $name:literal;)*) => {
        impl<'a> FieldRef<'a> {
            $(
                pub fn $get(&self) -> Result<$ty> {
                    match self.value().as_ref() {
                        Value::$variant(v) => Ok(v.clone()),
                        other => Err(mismatch($name, other)),
                    }
                }
            )*
        }

        impl<'a> FieldRefMut<'a> {
            $(
                pub fn $set(&mut self, value: $ty) -> Result<()> {
                    self.set_value(Value::$variant(value))
                }

                pub fn $add(&mut self, value: $ty) -> Result<usize> {
                    self.add_value(Value::$variant(value))
                }
            )*
        }
    };
}

typed_accessors! {
    get_i32, set_i32, add_i32, i32, I32, "int32";
    get_i64, set_i64, add_i64, i64, I64, "int64";
    get_u32, set_u32, add_u32, u32, U32, "uint32";
    get_u64, set_u64, add_u64, u64, U64, "uint64";
    get_f32, set_f32, add_f32, f32, F32, "float";
    get_f64, set_f64, add_f64, f64, F64, "double";
    get_bool, set_bool, add_bool, bool, Bool, "bool";
    get_enum, set_enum, add_enum, i32, EnumNumber, "enum";
    get_string, set_string, add_string, String, String, "string";
    get_bytes, set_bytes, add_bytes, prost::bytes::Bytes, Bytes, "bytes";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SchemaRegistry;
    use tempfile::TempDir;

    const PROTO: &str = r#"syntax = "proto3";

enum Color {
  RED = 0;
  GREEN = 1;
  BLUE = 2;
}

message SubMsg {
  string s = 1;
  int32 i = 2;
  repeated int32 arr = 3;
}

message Msg {
  int32 i = 1;
  string s = 2;
  SubMsg sub = 3;
  repeated int32 arr = 4;
  map<string, SubMsg> m = 5;
  map<int32, string> names = 6;
  repeated SubMsg subs = 7;
  bool flag = 8;
  Color color = 9;
  repeated Color colors = 10;
  bytes raw = 11;
  uint64 big = 12;
}
"#;

    fn registry() -> (TempDir, SchemaRegistry) {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("msg.proto"), PROTO).unwrap();
        let registry = SchemaRegistry::load_directory(dir.path()).unwrap();
        (dir, registry)
    }

    fn path(raw: &str) -> Path {
        Path::parse(raw).unwrap()
    }

    fn msg(registry: &SchemaRegistry, json: &str) -> DynamicMessage {
        registry.create_from("Msg", json.as_bytes()).unwrap()
    }

    #[test]
    fn test_classification() {
        let (_dir, registry) = registry();
        let root = msg(&registry, r#"{"arr": [1, 2], "m": {"k": {"s": "v"}}, "names": {"3": "c"}}"#);

        let cases = [
            ("Msg", CursorKind::WholeMessage),
            ("Msg/arr", CursorKind::WholeArray),
            ("Msg/arr[1]", CursorKind::ArrayElement),
            ("Msg/arr/1", CursorKind::ArrayElement),
            ("Msg/m", CursorKind::WholeMap),
            ("Msg/m[k]", CursorKind::MapElement),
            ("Msg/names/3", CursorKind::MapElement),
            ("Msg/sub", CursorKind::MessageField),
            ("Msg/i", CursorKind::ScalarField),
            ("Msg/m/k/s", CursorKind::ScalarField),
        ];
        for (raw, kind) in cases {
            assert_eq!(resolve(&root, &path(raw)).unwrap().kind(), kind, "{}", raw);
        }
    }

    #[test]
    fn test_resolution_errors() {
        let (_dir, registry) = registry();
        let root = msg(&registry, r#"{"arr": [1, 2], "m": {"k": {}}}"#);

        assert!(matches!(
            resolve(&root, &path("SubMsg/s")),
            Err(PbError::TypeMismatch { .. })
        ));
        assert!(matches!(
            resolve(&root, &path("Msg/nope")),
            Err(PbError::FieldNotFound { .. })
        ));

        let err = resolve(&root, &path("Msg/arr[2]")).unwrap_err();
        assert_eq!(err.to_string(), "array index is out-of-range: 2 : 2");
        assert!(matches!(
            resolve(&root, &path("Msg/arr/x")),
            Err(PbError::IndexOutOfRange { .. })
        ));
        assert!(matches!(
            resolve(&root, &path("Msg/arr[-1]")),
            Err(PbError::IndexOutOfRange { .. })
        ));

        assert!(matches!(
            resolve(&root, &path("Msg/m[missing]")),
            Err(PbError::MapKeyNotFound(_))
        ));
        assert!(matches!(
            resolve(&root, &path("Msg/i/x")),
            Err(PbError::InvalidPath(_))
        ));
        assert!(matches!(
            resolve(&root, &path("Msg/i[0]")),
            Err(PbError::InvalidPath(_))
        ));
        assert!(matches!(
            resolve(&root, &path("Msg/names[abc]")),
            Err(PbError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_field_suggestion() {
        let (_dir, registry) = registry();
        let root = registry.create("Msg").unwrap();
        match resolve(&root, &path("Msg/clrs")) {
            Err(PbError::FieldNotFound { suggestion, .. }) => {
                assert_eq!(suggestion.as_deref(), Some("colors"));
            }
            other => panic!("unexpected: {:?}", other.map(|r| r.kind())),
        }
    }

    #[test]
    fn test_set_get_round_trip() {
        let (_dir, registry) = registry();
        let mut root = registry.create("Msg").unwrap();

        resolve_mut(&mut root, &path("Msg/i")).unwrap().set_raw(b"42").unwrap();
        resolve_mut(&mut root, &path("Msg/s")).unwrap().set_string("hi".to_string()).unwrap();
        resolve_mut(&mut root, &path("Msg/sub/i")).unwrap().set_i32(-3).unwrap();
        resolve_mut(&mut root, &path("Msg/flag")).unwrap().set_raw(b"1").unwrap();
        resolve_mut(&mut root, &path("Msg/big")).unwrap().set_raw(b"18446744073709551615").unwrap();
        resolve_mut(&mut root, &path("Msg/color")).unwrap().set_raw(b"2").unwrap();

        assert_eq!(resolve(&root, &path("Msg/i")).unwrap().get_i32().unwrap(), 42);
        assert_eq!(resolve(&root, &path("Msg/s")).unwrap().get_string().unwrap(), "hi");
        assert_eq!(resolve(&root, &path("Msg/sub/i")).unwrap().get_i32().unwrap(), -3);
        assert!(resolve(&root, &path("Msg/flag")).unwrap().get_bool().unwrap());
        assert_eq!(resolve(&root, &path("Msg/big")).unwrap().get_u64().unwrap(), u64::MAX);
        assert_eq!(resolve(&root, &path("Msg/color")).unwrap().get_enum().unwrap(), 2);
    }

    #[test]
    fn test_failed_write_leaves_message_untouched() {
        let (_dir, registry) = registry();
        let mut root = msg(&registry, r#"{"i": 1, "arr": [1]}"#);
        let before = root.clone();

        let err = resolve_mut(&mut root, &path("Msg/i")).unwrap().set_raw(b"abc").unwrap_err();
        assert_eq!(err.to_string(), "not int32");
        assert!(resolve_mut(&mut root, &path("Msg/arr[5]")).is_err());

        let mut cursor = resolve_mut(&mut root, &path("Msg/m/k/i")).unwrap();
        assert!(cursor.set_raw(b"nope").is_err());
        assert_eq!(root, before);

        let err = resolve_mut(&mut root, &path("Msg/i")).unwrap().set_u32(1).unwrap_err();
        assert!(matches!(err, PbError::TypeMismatch { .. }));
        assert_eq!(root, before);
    }

    #[test]
    fn test_map_write_inserts_key() {
        let (_dir, registry) = registry();
        let mut root = registry.create("Msg").unwrap();

        resolve_mut(&mut root, &path("Msg/m/alpha/s")).unwrap().set_raw(b"x").unwrap();
        resolve_mut(&mut root, &path("Msg/names[7]")).unwrap().set_raw(b"seven").unwrap();

        assert_eq!(resolve(&root, &path("Msg/m[alpha]/s")).unwrap().get_string().unwrap(), "x");
        assert_eq!(resolve(&root, &path("Msg/names/7")).unwrap().get_string().unwrap(), "seven");

        let cursor = resolve(&root, &path("Msg/names[7]")).unwrap();
        assert_eq!(cursor.key(), Some(&MapKey::I32(7)));
        assert_eq!(cursor.field().map(|f| f.name()), Some("names"));
        assert_eq!(resolve(&root, &path("Msg/m")).unwrap().len().unwrap(), 1);
    }

    #[test]
    fn test_whole_aggregate_set_is_invalid() {
        let (_dir, registry) = registry();
        let mut root = registry.create("Msg").unwrap();
        assert!(matches!(
            resolve_mut(&mut root, &path("Msg/arr")).unwrap().set_raw(b"1"),
            Err(PbError::InvalidOperation(_))
        ));
        assert!(matches!(
            resolve_mut(&mut root, &path("Msg/m")).unwrap().set_raw(b"{}"),
            Err(PbError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_add_and_index() {
        let (_dir, registry) = registry();
        let mut root = registry.create("Msg").unwrap();

        for (n, v) in [5, 6, 7].iter().enumerate() {
            let len = resolve_mut(&mut root, &path("Msg/arr")).unwrap().add_i32(*v).unwrap();
            assert_eq!(len, n + 1);
        }

        let arr = resolve(&root, &path("Msg/arr")).unwrap();
        assert_eq!(arr.len().unwrap(), 3);
        assert_eq!(resolve(&root, &path("Msg/arr[2]")).unwrap().get_i32().unwrap(), 7);
        assert!(matches!(
            resolve(&root, &path("Msg/arr[3]")),
            Err(PbError::IndexOutOfRange { .. })
        ));

        // element cursors and maps do not take adds
        assert!(matches!(
            resolve_mut(&mut root, &path("Msg/arr[0]")).unwrap().add_i32(1),
            Err(PbError::InvalidOperation(_))
        ));
        assert!(matches!(
            resolve_mut(&mut root, &path("Msg/names")).unwrap().add_raw(b"x"),
            Err(PbError::Unsupported(_))
        ));
    }

    #[test]
    fn test_add_message_element() {
        let (_dir, registry) = registry();
        let mut root = registry.create("Msg").unwrap();
        let sub = registry.create_from("SubMsg", br#"{"s": "a"}"#).unwrap();

        let len = resolve_mut(&mut root, &path("Msg/subs")).unwrap().add_message(sub).unwrap();
        assert_eq!(len, 1);
        let len = resolve_mut(&mut root, &path("Msg/subs")).unwrap().add_raw(br#"{"s": "b"}"#).unwrap();
        assert_eq!(len, 2);
        assert_eq!(resolve(&root, &path("Msg/subs/1/s")).unwrap().get_string().unwrap(), "b");

        let wrong = registry.create("Msg").unwrap();
        assert!(matches!(
            resolve_mut(&mut root, &path("Msg/subs")).unwrap().add_message(wrong),
            Err(PbError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_enum_elements_as_integers() {
        let (_dir, registry) = registry();
        let mut root = registry.create("Msg").unwrap();

        resolve_mut(&mut root, &path("Msg/colors")).unwrap().append(&["1", "2"]).unwrap();
        let first = resolve(&root, &path("Msg/colors[0]")).unwrap();
        assert_eq!(first.value_kind(), ScalarKind::Enum);
        assert_eq!(first.get_enum().unwrap(), 1);

        resolve_mut(&mut root, &path("Msg/colors[0]")).unwrap().set_enum(0).unwrap();
        assert_eq!(resolve(&root, &path("Msg/colors/0")).unwrap().get_enum().unwrap(), 0);
    }

    #[test]
    fn test_append_string_concatenates() {
        let (_dir, registry) = registry();
        let mut root = msg(&registry, r#"{"i": 1}"#);

        assert_eq!(resolve_mut(&mut root, &path("Msg/s")).unwrap().append(&["abc"]).unwrap(), 3);
        assert_eq!(resolve_mut(&mut root, &path("Msg/s")).unwrap().append(&["123"]).unwrap(), 6);
        assert_eq!(resolve(&root, &path("Msg/s")).unwrap().get_string().unwrap(), "abc123");

        resolve_mut(&mut root, &path("Msg/names/1")).unwrap().append(&["x", "y"]).unwrap();
        assert_eq!(resolve(&root, &path("Msg/names/1")).unwrap().get_string().unwrap(), "xy");
    }

    #[test]
    fn test_append_array_and_rejections() {
        let (_dir, registry) = registry();
        let mut root = msg(&registry, r#"{"arr": [1, 2]}"#);

        let len = resolve_mut(&mut root, &path("Msg/arr")).unwrap().append(&["3", "4"]).unwrap();
        assert_eq!(len, 4);
        assert_eq!(resolve(&root, &path("Msg/arr/0")).unwrap().get_i32().unwrap(), 1);

        // one bad value means nothing is appended
        assert!(resolve_mut(&mut root, &path("Msg/arr")).unwrap().append(&["5", "x"]).is_err());
        assert_eq!(resolve(&root, &path("Msg/arr")).unwrap().len().unwrap(), 4);

        assert!(matches!(
            resolve_mut(&mut root, &path("Msg/i")).unwrap().append(&["1"]),
            Err(PbError::InvalidOperation(_))
        ));
        assert!(matches!(
            resolve_mut(&mut root, &path("Msg/m")).unwrap().append(&["{}"]),
            Err(PbError::Unsupported(_))
        ));
    }

    #[test]
    fn test_del_preserves_order() {
        let (_dir, registry) = registry();
        let mut root = msg(&registry, r#"{"arr": [10, 20, 30, 40]}"#);

        resolve_mut(&mut root, &path("Msg/arr[1]")).unwrap().del().unwrap();

        let arr = resolve(&root, &path("Msg/arr")).unwrap().get();
        assert_eq!(
            arr,
            Value::List(vec![Value::I32(10), Value::I32(30), Value::I32(40)])
        );

        for raw in ["Msg/arr", "Msg/m", "Msg/i", "Msg"] {
            assert!(matches!(
                resolve_mut(&mut root, &path(raw)).unwrap().del(),
                Err(PbError::Unsupported(_))
            ), "{}", raw);
        }
    }

    #[test]
    fn test_clear_rules() {
        let (_dir, registry) = registry();
        let mut root = msg(
            &registry,
            r#"{"i": 5, "s": "x", "sub": {"i": 1}, "arr": [1, 2], "m": {"k": {}}}"#,
        );

        resolve_mut(&mut root, &path("Msg/arr")).unwrap().clear().unwrap();
        assert_eq!(resolve(&root, &path("Msg/arr")).unwrap().len().unwrap(), 0);

        resolve_mut(&mut root, &path("Msg/sub")).unwrap().clear().unwrap();
        assert_eq!(resolve(&root, &path("Msg/sub/i")).unwrap().get_i32().unwrap(), 0);

        for raw in ["Msg/m", "Msg/m/k"] {
            assert!(matches!(
                resolve_mut(&mut root, &path(raw)).unwrap().clear(),
                Err(PbError::Unsupported(_))
            ));
        }

        resolve_mut(&mut root, &path("Msg")).unwrap().clear().unwrap();
        assert_eq!(resolve(&root, &path("Msg/i")).unwrap().get_i32().unwrap(), 0);
        assert_eq!(resolve(&root, &path("Msg/s")).unwrap().get_string().unwrap(), "");
        assert_eq!(resolve(&root, &path("Msg/m")).unwrap().len().unwrap(), 0);
    }

    #[test]
    fn test_merge_concatenates_repeated() {
        let (_dir, registry) = registry();
        let mut root = msg(&registry, r#"{"i": 1, "arr": [1, 2], "sub": {"s": "a", "arr": [1]}}"#);

        resolve_mut(&mut root, &path("Msg"))
            .unwrap()
            .merge_raw(br#"{"arr": [3]}"#)
            .unwrap();
        resolve_mut(&mut root, &path("Msg/sub"))
            .unwrap()
            .merge_raw(br#"{"i": 9, "arr": [2]}"#)
            .unwrap();

        assert_eq!(resolve(&root, &path("Msg/i")).unwrap().get_i32().unwrap(), 1);
        assert_eq!(resolve(&root, &path("Msg/arr")).unwrap().len().unwrap(), 3);
        assert_eq!(resolve(&root, &path("Msg/sub/s")).unwrap().get_string().unwrap(), "a");
        assert_eq!(resolve(&root, &path("Msg/sub/i")).unwrap().get_i32().unwrap(), 9);
        assert_eq!(resolve(&root, &path("Msg/sub/arr")).unwrap().len().unwrap(), 2);

        assert!(matches!(
            resolve_mut(&mut root, &path("Msg/i")).unwrap().merge_raw(b"{}"),
            Err(PbError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_len_rules() {
        let (_dir, registry) = registry();
        let root = msg(&registry, r#"{"s": "hello", "sub": {"i": 1}, "arr": [1, 2, 3]}"#);

        let whole = resolve(&root, &path("Msg")).unwrap();
        assert_eq!(whole.len().unwrap(), codec::encoded_len(&root));
        assert_eq!(resolve(&root, &path("Msg/s")).unwrap().len().unwrap(), 5);
        assert_eq!(resolve(&root, &path("Msg/arr")).unwrap().len().unwrap(), 3);
        // field 2, varint 1
        assert_eq!(resolve(&root, &path("Msg/sub")).unwrap().len().unwrap(), 2);

        for raw in ["Msg/i", "Msg/arr[0]"] {
            assert!(matches!(
                resolve(&root, &path(raw)).unwrap().len(),
                Err(PbError::Unsupported(_))
            ));
        }
    }

    #[test]
    fn test_replace_whole_message() {
        let (_dir, registry) = registry();
        let mut root = msg(&registry, r#"{"i": 1, "s": "old"}"#);
        let replacement = msg(&registry, r#"{"s": "new"}"#);

        resolve_mut(&mut root, &path("Msg")).unwrap().set_message(replacement.clone()).unwrap();
        assert_eq!(root, replacement);

        let other = registry.create("SubMsg").unwrap();
        assert!(matches!(
            resolve_mut(&mut root, &path("Msg")).unwrap().set_message(other),
            Err(PbError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_unset_values_read_as_defaults() {
        let (_dir, registry) = registry();
        let root = registry.create("Msg").unwrap();

        assert_eq!(resolve(&root, &path("Msg/sub/s")).unwrap().get_string().unwrap(), "");
        assert_eq!(resolve(&root, &path("Msg/sub/arr")).unwrap().len().unwrap(), 0);
        assert!(resolve(&root, &path("Msg/sub")).unwrap().get_message().is_ok());
    }
}

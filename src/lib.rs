//! pbstore
//!
//! Schema-typed protobuf records for a key-value store, with path-addressed
//! reads and writes into single fields and a runtime schema registry.
//!
//! ## Features
//!
//! - **Runtime Schemas**: `.proto` files are compiled at startup and can be
//!   imported later without a restart
//! - **Field Paths**: `Type/field/arr[0]/m[key]` addresses any value inside a
//!   stored record
//! - **Typed Access**: get/set/append/delete/clear/merge/len on scalars,
//!   nested messages, repeated fields and maps
//! - **JSON and Binary**: payloads are accepted and returned in canonical
//!   protobuf JSON or the binary wire format
//!
//! ## Architecture
//!
//! ```text
//! request ──► path ──► field_ref ──► DynamicMessage (owned by the host store)
//!                          │
//!                          ▼
//!                 registry ◄── importer (background thread)
//!                    │
//!                    ▼
//!               proto_dir/*.proto
//! ```

pub mod checksum;
pub mod codec;
pub mod coerce;
pub mod commands;
pub mod config;
pub mod error;
pub mod field_ref;
pub mod importer;
pub mod path;
pub mod persist;
pub mod registry;
pub mod schema;

pub use checksum::Checksum;
pub use commands::{Format, Reply};
pub use config::StoreConfig;
pub use error::{PbError, Result, SchemaDiagnostic};
pub use field_ref::{resolve, resolve_mut, CursorKind, FieldRef, FieldRefMut};
pub use importer::ImportStatus;
pub use path::{Path, Segment};
pub use registry::{LoadedSchema, SchemaOrigin, SchemaRegistry};
pub use schema::ScalarKind;

pub use prost_reflect::{DynamicMessage, MapKey, ReflectMessage, Value};

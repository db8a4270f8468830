//! Schema registry
//!
//! Owns every known message descriptor. The descriptor pool lives in an
//! immutable snapshot; an import builds a new pool from a clone of the
//! current one and swaps the snapshot in whole, so a lookup sees either the
//! old type set or the new one and never a partially-registered file.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use miette::{Diagnostic, LabeledSpan, SourceCode};
use parking_lot::{Mutex, RwLock};
use prost_reflect::{DescriptorPool, DynamicMessage, MessageDescriptor};
use prost_types::FileDescriptorSet;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::checksum::Checksum;
use crate::codec;
use crate::config::StoreConfig;
use crate::error::{PbError, Result, SchemaDiagnostic};
use crate::importer::{ImportStatus, Importer};
use crate::path::normalize_type_name;
use crate::schema::{closest_match, render_message};

/// How a schema file entered the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaOrigin {
    Startup,
    Import,
}

/// A schema file the registry has accepted
#[derive(Debug, Clone, Serialize)]
pub struct LoadedSchema {
    pub filename: String,
    pub checksum: Checksum,
    pub loaded_at: DateTime<Utc>,
    pub origin: SchemaOrigin,
}

/// One published version of the type set
struct Snapshot {
    pool: DescriptorPool,
    cache: RwLock<HashMap<String, MessageDescriptor>>,
}

impl Snapshot {
    fn new(pool: DescriptorPool) -> Self {
        Self {
            pool,
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn lookup(&self, name: &str) -> Option<MessageDescriptor> {
        if let Some(desc) = self.cache.read().get(name) {
            return Some(desc.clone());
        }

        let desc = self.pool.get_message_by_name(name)?;
        debug!(type_name = name, "descriptor cache miss");
        self.cache.write().insert(name.to_string(), desc.clone());
        Some(desc)
    }

    fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .pool
            .all_messages()
            .filter(|m| !m.is_map_entry())
            .map(|m| m.full_name().to_string())
            .collect();
        names.sort();
        names
    }
}

/// State shared between the registry handle and the import worker
pub(crate) struct RegistryInner {
    root: PathBuf,
    filename_pattern: Regex,
    snapshot: RwLock<Arc<Snapshot>>,
    loaded: Mutex<BTreeMap<String, LoadedSchema>>,
}

impl RegistryInner {
    /// Compile every schema file under `root`. Any error fails the whole load.
    pub(crate) fn load(root: &Path, extension: &str) -> Result<Self> {
        if !root.is_dir() {
            return Err(PbError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("schema directory not found: {}", root.display()),
            )));
        }

        let filename_pattern = Regex::new(&format!(
            r"^[\w.\-]+(/[\w.\-]+)*\.{}$",
            regex::escape(extension)
        ))
        .map_err(|e| PbError::InvalidFilename(e.to_string()))?;

        let inner = Self {
            root: root.to_path_buf(),
            filename_pattern,
            snapshot: RwLock::new(Arc::new(Snapshot::new(DescriptorPool::new()))),
            loaded: Mutex::new(BTreeMap::new()),
        };

        let files = schema_files(root, extension)?;
        if !files.is_empty() {
            inner.register(&files)?;
        }

        for file in &files {
            let text = fs::read_to_string(root.join(file))?;
            inner.mark_loaded(file, &text, SchemaOrigin::Startup);
        }

        info!(
            root = %root.display(),
            files = files.len(),
            types = inner.current().type_names().len(),
            "loaded schema directory"
        );

        Ok(inner)
    }

    fn current(&self) -> Arc<Snapshot> {
        self.snapshot.read().clone()
    }

    fn mark_loaded(&self, filename: &str, text: &str, origin: SchemaOrigin) {
        let entry = LoadedSchema {
            filename: filename.to_string(),
            checksum: Checksum::of_text(text),
            loaded_at: Utc::now(),
            origin,
        };
        debug!(file = filename, checksum = entry.checksum.short(), "schema file accepted");
        self.loaded.lock().insert(filename.to_string(), entry);
    }

    /// Compile `files` (relative to the root) and publish a snapshot holding
    /// the current types plus every file not yet in the pool. Only the
    /// startup path and the single import worker call this, so builds never
    /// race each other.
    fn register(&self, files: &[String]) -> Result<()> {
        let set = compile(&self.root, files).map_err(PbError::SchemaLoad)?;

        let mut pool = self.current().pool.clone();
        let fresh: Vec<_> = set
            .file
            .into_iter()
            .filter(|file| pool.get_file_by_name(file.name()).is_none())
            .collect();

        pool.add_file_descriptor_set(FileDescriptorSet { file: fresh })
            .map_err(|e| {
                PbError::SchemaLoad(vec![SchemaDiagnostic {
                    file: files.join(","),
                    line: 0,
                    column: 0,
                    message: e.to_string(),
                }])
            })?;

        *self.snapshot.write() = Arc::new(Snapshot::new(pool));
        Ok(())
    }

    fn validate_filename(&self, filename: &str) -> Result<()> {
        let has_dot_component = filename.split('/').any(|c| c == "." || c == "..");
        if has_dot_component || !self.filename_pattern.is_match(filename) {
            return Err(PbError::InvalidFilename(filename.to_string()));
        }
        Ok(())
    }

    /// Write, compile and publish one imported file. The file must not exist
    /// yet. On failure the written file and any directories created for it
    /// are removed before returning.
    pub(crate) fn import_file(&self, filename: &str, text: &str) -> Result<()> {
        self.validate_filename(filename)?;

        if self.loaded.lock().contains_key(filename) {
            return Err(PbError::AlreadyImported(filename.to_string()));
        }

        let path = self.root.join(filename);
        let created_dirs = create_parent_dirs(&self.root, &path)?;

        if let Err(e) = write_new_file(&path, text) {
            remove_dirs(&created_dirs);
            return Err(match e.kind() {
                std::io::ErrorKind::AlreadyExists => PbError::FileExists(filename.to_string()),
                _ => PbError::Io(e),
            });
        }

        match self.register(&[filename.to_string()]) {
            Ok(()) => {
                self.mark_loaded(filename, text, SchemaOrigin::Import);
                Ok(())
            }
            Err(e) => {
                if let Err(rm) = fs::remove_file(&path) {
                    warn!(file = %path.display(), error = %rm, "failed to remove rejected schema file");
                }
                remove_dirs(&created_dirs);
                Err(e)
            }
        }
    }
}

/// Create the missing directories between `root` and `path`'s parent.
/// Returns the ones created, deepest first.
fn create_parent_dirs(root: &Path, path: &Path) -> Result<Vec<PathBuf>> {
    let mut missing: Vec<PathBuf> = path
        .ancestors()
        .skip(1)
        .take_while(|dir| *dir != root && !dir.exists())
        .map(Path::to_path_buf)
        .collect();

    if let Some(deepest) = missing.first() {
        fs::create_dir_all(deepest)?;
    }
    Ok(missing)
}

fn write_new_file(path: &Path, text: &str) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    file.write_all(text.as_bytes())
}

fn remove_dirs(dirs: &[PathBuf]) {
    for dir in dirs {
        if let Err(e) = fs::remove_dir(dir) {
            warn!(dir = %dir.display(), error = %e, "failed to remove schema directory");
        }
    }
}

/// Relative paths (with `/` separators) of every schema file under `root`,
/// sorted.
fn schema_files(root: &Path, extension: &str) -> Result<Vec<String>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };

        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        files.push(name);
    }

    files.sort();
    Ok(files)
}

/// Run the schema compiler over `files`, collecting every diagnostic rather
/// than stopping at the first bad file.
fn compile(
    root: &Path,
    files: &[String],
) -> std::result::Result<FileDescriptorSet, Vec<SchemaDiagnostic>> {
    let mut compiler = protox::Compiler::new([root]).map_err(|e| diagnostics("", &e))?;
    compiler.include_imports(true);

    let mut errors = Vec::new();
    for file in files {
        if let Err(e) = compiler.open_file(root.join(file)) {
            errors.extend(diagnostics(file, &e));
        }
    }

    if errors.is_empty() {
        Ok(compiler.file_descriptor_set())
    } else {
        Err(errors)
    }
}

fn diagnostics(file: &str, err: &dyn Diagnostic) -> Vec<SchemaDiagnostic> {
    let mut out = Vec::new();
    collect_diagnostics(file, err, None, &mut out);
    out
}

fn collect_diagnostics<'a>(
    file: &str,
    diag: &'a dyn Diagnostic,
    inherited: Option<&'a dyn SourceCode>,
    out: &mut Vec<SchemaDiagnostic>,
) {
    let source = diag.source_code().or(inherited);
    let label = diag.labels().and_then(|mut labels| labels.next());
    let related: Vec<&'a dyn Diagnostic> = diag
        .related()
        .map(|related| related.collect())
        .unwrap_or_default();

    // Wrapper errors without a position only group their related errors.
    if label.is_some() || related.is_empty() {
        let (name, line, column) = position(file, source, label.as_ref());
        out.push(SchemaDiagnostic {
            file: name,
            line,
            column,
            message: diag.to_string(),
        });
    }

    for child in related {
        collect_diagnostics(file, child, source, out);
    }
}

fn position(
    file: &str,
    source: Option<&dyn SourceCode>,
    label: Option<&LabeledSpan>,
) -> (String, usize, usize) {
    let (Some(source), Some(label)) = (source, label) else {
        return (file.to_string(), 0, 0);
    };

    match source.read_span(label.inner(), 0, 0) {
        Ok(span) => (
            span.name().unwrap_or(file).to_string(),
            span.line() + 1,
            span.column() + 1,
        ),
        Err(_) => (file.to_string(), 0, 0),
    }
}

/// The schema registry service
pub struct SchemaRegistry {
    inner: Arc<RegistryInner>,
    importer: Option<Importer>,
}

impl SchemaRegistry {
    /// Load the configured schema directory and start the import worker
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let root = config.proto_dir();
        let inner = Arc::new(RegistryInner::load(&root, &config.registry.extension)?);

        let importer = if config.import.enabled {
            Some(Importer::spawn(&config.import.worker_name, Arc::clone(&inner))?)
        } else {
            None
        };

        Ok(Self { inner, importer })
    }

    /// Load `dir` with default settings
    pub fn load_directory(dir: impl AsRef<Path>) -> Result<Self> {
        let mut config = StoreConfig::default();
        config.registry.proto_dir = dir.as_ref().to_path_buf();
        Self::open(&config)
    }

    /// Schema root directory
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Resolve a message type by full name (`pkg.Msg` or `pkg::Msg`)
    pub fn resolve(&self, type_name: &str) -> Result<MessageDescriptor> {
        let name = normalize_type_name(type_name);
        let snapshot = self.inner.current();

        snapshot.lookup(&name).ok_or_else(|| PbError::UnknownType {
            suggestion: closest_match(&name, snapshot.type_names()),
            name,
        })
    }

    /// A zero-valued message of the given type
    pub fn create(&self, type_name: &str) -> Result<DynamicMessage> {
        Ok(DynamicMessage::new(self.resolve(type_name)?))
    }

    /// A message of the given type decoded from a JSON or binary payload
    pub fn create_from(&self, type_name: &str, payload: &[u8]) -> Result<DynamicMessage> {
        let desc = self.resolve(type_name)?;
        codec::decode(&desc, payload)
    }

    /// Every registered message type, sorted
    pub fn type_names(&self) -> Vec<String> {
        self.inner.current().type_names()
    }

    /// `.proto`-like text of a type, or `None` when it is unknown
    pub fn schema_text(&self, type_name: &str) -> Option<String> {
        self.resolve(type_name).ok().map(|desc| render_message(&desc))
    }

    pub fn loaded_files(&self) -> Vec<LoadedSchema> {
        self.inner.loaded.lock().values().cloned().collect()
    }

    /// Queue `text` to be written as `filename` and registered in the
    /// background. Outcomes are reported by [`Self::drain_import_status`].
    pub fn import(&self, filename: &str, text: &str) -> Result<()> {
        let importer = self
            .importer
            .as_ref()
            .ok_or_else(|| PbError::Unsupported("schema import is disabled".to_string()))?;

        debug!(file = filename, bytes = text.len(), "schema import queued");
        importer.submit(filename, text);
        Ok(())
    }

    /// Take every import outcome recorded since the previous drain
    pub fn drain_import_status(&self) -> BTreeMap<String, ImportStatus> {
        self.importer
            .as_ref()
            .map(Importer::drain)
            .unwrap_or_default()
    }
}

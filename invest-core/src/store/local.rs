//! Local persisted store: one encoded record per key.
//!
//! Layout: `{root}/{entity}/{field}.{ext}`
//!
//! - Atomic writes (write to `.tmp`, rename into place)
//! - Entity directories are created on first write and never removed
//! - Corrupt records are reported, never silently dropped

use super::KvStore;
use crate::codec::{Codec, RecordCodec};
use crate::error::{CacheError, Result};
use crate::key::{IntoKey, KeyTemplate, StructuredKey};
use crate::value::FieldValue;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// What to do when the store root does not exist yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootPolicy {
    /// Create it silently.
    #[default]
    Create,
    /// Ask on stdin (default answer: yes).
    Prompt,
    /// Never create it.
    Require,
}

/// Files on disk, addressed by structured keys.
///
/// A store whose root was declined or forbidden is *detached*: reads see an
/// empty store and writes fail with [`CacheError::DirectoryUnavailable`].
#[derive(Debug, Clone)]
pub struct LocalStore<C = RecordCodec> {
    root: PathBuf,
    template: KeyTemplate,
    codec: C,
    attached: bool,
}

impl LocalStore<RecordCodec> {
    /// Open a store with the default record codec.
    pub fn open(root: impl Into<PathBuf>, policy: RootPolicy) -> Result<Self> {
        Self::with_codec(root, policy, RecordCodec)
    }
}

impl<C: Codec<FieldValue>> LocalStore<C> {
    pub fn with_codec(root: impl Into<PathBuf>, policy: RootPolicy, codec: C) -> Result<Self> {
        let root = root.into();
        let attached = attach_root(&root, policy)?;
        let template = KeyTemplate::local(codec.extension());
        Ok(Self {
            root,
            template,
            codec,
            attached,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn template(&self) -> &KeyTemplate {
        &self.template
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// False when the root was declined or forbidden at open time.
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Where a key's record lives (whether or not it exists).
    pub fn path_for(&self, key: &StructuredKey) -> PathBuf {
        self.root.join(self.template.relative_path(key))
    }

    pub fn get(&self, key: impl IntoKey) -> Result<FieldValue> {
        let key = key.into_key()?;
        if !self.attached {
            return Err(not_found(&key));
        }

        let path = self.path_for(&key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(not_found(&key)),
            Err(e) => return Err(CacheError::io(path, e)),
        };

        self.codec
            .decode(&bytes)
            .map_err(|e| CacheError::CorruptRecord {
                path,
                reason: e.to_string(),
            })
    }

    /// Write a record, replacing any existing one.
    pub fn set(&self, key: impl IntoKey, value: &FieldValue) -> Result<()> {
        let key = key.into_key()?;
        if !self.attached {
            return Err(CacheError::DirectoryUnavailable {
                path: self.root.clone(),
            });
        }

        let dir = self.root.join(key.entity());
        fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;

        let bytes = self
            .codec
            .encode(value)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;

        let path = self.path_for(&key);
        let tmp_path = path.with_extension(format!("{}.tmp", self.codec.extension()));
        fs::write(&tmp_path, &bytes).map_err(|e| CacheError::io(&tmp_path, e))?;

        // Atomic rename
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            CacheError::io(&path, e)
        })?;

        debug!(%key, bytes = bytes.len(), "record written");
        Ok(())
    }

    /// Remove a record. The entity directory is left in place.
    pub fn delete(&self, key: impl IntoKey) -> Result<()> {
        let key = key.into_key()?;
        if !self.attached {
            return Err(not_found(&key));
        }

        let path = self.path_for(&key);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(%key, "record deleted");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(not_found(&key)),
            Err(e) => Err(CacheError::io(path, e)),
        }
    }

    pub fn contains(&self, key: impl IntoKey) -> Result<bool> {
        let key = key.into_key()?;
        Ok(self.attached && self.path_for(&key).is_file())
    }

    /// Lazily walk stored keys. Each call starts a fresh walk.
    pub fn keys(&self) -> Keys<'_> {
        let entities = if self.attached {
            match fs::read_dir(&self.root) {
                Ok(rd) => Some(rd),
                Err(e) => {
                    warn!(root = %self.root.display(), error = %e, "cannot list store root");
                    None
                }
            }
        } else {
            None
        };
        Keys {
            template: &self.template,
            entities,
            current: None,
        }
    }

    pub fn len(&self) -> usize {
        self.keys().count()
    }

    pub fn is_empty(&self) -> bool {
        self.keys().next().is_none()
    }
}

fn not_found(key: &StructuredKey) -> CacheError {
    CacheError::KeyNotFound {
        key: key.to_string(),
    }
}

fn attach_root(root: &Path, policy: RootPolicy) -> Result<bool> {
    if root.is_dir() {
        return Ok(true);
    }
    if root.exists() {
        return Err(CacheError::DirectoryUnavailable {
            path: root.to_path_buf(),
        });
    }

    let create = match policy {
        RootPolicy::Create => true,
        RootPolicy::Prompt => confirm_create(root),
        RootPolicy::Require => false,
    };

    if !create {
        warn!(root = %root.display(), "store root missing and not created; store is detached");
        return Ok(false);
    }

    fs::create_dir_all(root).map_err(|e| CacheError::io(root, e))?;
    debug!(root = %root.display(), "created store root");
    Ok(true)
}

fn confirm_create(root: &Path) -> bool {
    eprint!("Directory {} doesn't exist. Create it? ([Y]/n) ", root.display());
    let _ = io::stderr().flush();

    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "" | "y" | "yes")
}

/// Iterator over the keys of a [`LocalStore`], two directory levels deep.
///
/// Temp files, foreign extensions and unknown field names are skipped.
pub struct Keys<'a> {
    template: &'a KeyTemplate,
    entities: Option<fs::ReadDir>,
    current: Option<(String, fs::ReadDir)>,
}

impl Iterator for Keys<'_> {
    type Item = StructuredKey;

    fn next(&mut self) -> Option<StructuredKey> {
        loop {
            if let Some((entity, files)) = &mut self.current {
                for entry in files.by_ref().flatten() {
                    let Ok(name) = entry.file_name().into_string() else {
                        continue;
                    };
                    if !entry.file_type().is_ok_and(|t| t.is_file()) {
                        continue;
                    }
                    match self.template.parse(&format!("{entity}/{name}")) {
                        Ok(key) => return Some(key),
                        Err(e) => debug!(entity = %entity, file = %name, error = %e, "skipping file"),
                    }
                }
                self.current = None;
            }

            let entry = self.entities.as_mut()?.next()?;
            let Ok(entry) = entry else {
                continue;
            };
            if !entry.file_type().is_ok_and(|t| t.is_dir()) {
                continue;
            }
            let Ok(entity) = entry.file_name().into_string() else {
                continue;
            };
            match fs::read_dir(entry.path()) {
                Ok(files) => self.current = Some((entity, files)),
                Err(e) => warn!(entity = %entity, error = %e, "cannot list entity directory"),
            }
        }
    }
}

impl<C: Codec<FieldValue>> KvStore for LocalStore<C> {
    fn name(&self) -> &'static str {
        "local store"
    }

    fn get(&self, key: &StructuredKey) -> Result<FieldValue> {
        LocalStore::<C>::get(self, key)
    }

    fn set(&self, key: &StructuredKey, value: &FieldValue) -> Result<()> {
        LocalStore::<C>::set(self, key, value)
    }

    fn delete(&self, key: &StructuredKey) -> Result<()> {
        LocalStore::<C>::delete(self, key)
    }

    fn contains(&self, key: &StructuredKey) -> Result<bool> {
        LocalStore::<C>::contains(self, key)
    }

    fn is_available(&self) -> bool {
        self.attached
    }
}

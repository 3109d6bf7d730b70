//! Definition loaders: one JSON file per definition, or in memory.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::defs::{AgentDef, CronDef, Definition, SkillDef, validate_id};
use crate::error::DefinitionError;

/// Source of definitions of one kind.
#[async_trait]
pub trait DefinitionLoader<T: Definition>: Send + Sync {
    /// Load one definition. Fails with `DefinitionError::NotFound` if absent.
    async fn load(&self, id: &str) -> Result<T, DefinitionError>;

    /// All valid definitions, sorted by id. Invalid ones are logged and skipped.
    async fn discover(&self) -> Result<Vec<T>, DefinitionError>;

    /// Create or replace a definition.
    async fn save(&self, def: &T) -> Result<(), DefinitionError>;

    /// Remove a definition. Missing ids are not an error.
    async fn delete(&self, id: &str) -> Result<(), DefinitionError>;
}

/// Loader of agent definitions.
pub trait AgentLoader: DefinitionLoader<AgentDef> {}
impl<L: DefinitionLoader<AgentDef> + ?Sized> AgentLoader for L {}

/// Loader of cron definitions.
pub trait CronLoader: DefinitionLoader<CronDef> {}
impl<L: DefinitionLoader<CronDef> + ?Sized> CronLoader for L {}

/// Loader of skill definitions.
pub trait SkillLoader: DefinitionLoader<SkillDef> {}
impl<L: DefinitionLoader<SkillDef> + ?Sized> SkillLoader for L {}

// ── On-disk ─────────────────────────────────────────────────────────

/// Directory of `<id>.json` files.
pub struct DefinitionDir<T> {
    root: PathBuf,
    _kind: PhantomData<fn() -> T>,
}

impl<T: Definition> DefinitionDir<T> {
    /// Open (and create if needed) a definition directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, DefinitionError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            _kind: PhantomData,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    async fn read_file(path: &Path) -> Result<T, DefinitionError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let def: T = serde_json::from_str(&raw).map_err(|e| DefinitionError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        def.validate()?;
        Ok(def)
    }
}

#[async_trait]
impl<T: Definition> DefinitionLoader<T> for DefinitionDir<T> {
    async fn load(&self, id: &str) -> Result<T, DefinitionError> {
        validate_id(T::KIND, id)?;
        let path = self.path_for(id);
        match Self::read_file(&path).await {
            Ok(def) if def.id() == id => Ok(def),
            Ok(def) => Err(DefinitionError::invalid(
                T::KIND,
                id,
                format!("file declares id '{}'", def.id()),
            )),
            Err(DefinitionError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(DefinitionError::not_found(T::KIND, id))
            }
            Err(e) => Err(e),
        }
    }

    async fn discover(&self) -> Result<Vec<T>, DefinitionError> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut found = BTreeMap::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_file(&path).await {
                Ok(def) => {
                    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
                    if stem != def.id() {
                        tracing::warn!(
                            kind = T::KIND,
                            path = %path.display(),
                            "Skipping definition whose id does not match its file name"
                        );
                        continue;
                    }
                    found.insert(def.id().to_string(), def);
                }
                Err(e) => {
                    tracing::warn!(
                        kind = T::KIND,
                        path = %path.display(),
                        "Skipping definition: {}",
                        e
                    );
                }
            }
        }

        Ok(found.into_values().collect())
    }

    async fn save(&self, def: &T) -> Result<(), DefinitionError> {
        def.validate()?;
        let json = serde_json::to_string_pretty(def).map_err(|e| DefinitionError::Parse {
            path: self.path_for(def.id()).display().to_string(),
            reason: e.to_string(),
        })?;
        let path = self.path_for(def.id());
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), DefinitionError> {
        validate_id(T::KIND, id)?;
        match tokio::fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ── In-memory ───────────────────────────────────────────────────────

/// In-memory definitions, for embedding and tests.
pub struct MemoryDefinitions<T> {
    defs: RwLock<BTreeMap<String, T>>,
}

impl<T: Definition> MemoryDefinitions<T> {
    pub fn new() -> Self {
        Self {
            defs: RwLock::new(BTreeMap::new()),
        }
    }

    /// Seed with definitions. Invalid ones are skipped with a warning.
    pub fn with(defs: impl IntoIterator<Item = T>) -> Self {
        let store = Self::new();
        if let Ok(mut map) = store.defs.write() {
            for def in defs {
                match def.validate() {
                    Ok(()) => {
                        map.insert(def.id().to_string(), def);
                    }
                    Err(e) => tracing::warn!(kind = T::KIND, "Skipping definition: {}", e),
                }
            }
        }
        store
    }

    pub fn len(&self) -> usize {
        self.defs.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.defs.read().map(|m| m.contains_key(id)).unwrap_or(false)
    }
}

impl<T: Definition> Default for MemoryDefinitions<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Definition> DefinitionLoader<T> for MemoryDefinitions<T> {
    async fn load(&self, id: &str) -> Result<T, DefinitionError> {
        self.defs
            .read()
            .ok()
            .and_then(|m| m.get(id).cloned())
            .ok_or_else(|| DefinitionError::not_found(T::KIND, id))
    }

    async fn discover(&self) -> Result<Vec<T>, DefinitionError> {
        Ok(self
            .defs
            .read()
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn save(&self, def: &T) -> Result<(), DefinitionError> {
        def.validate()?;
        if let Ok(mut map) = self.defs.write() {
            map.insert(def.id().to_string(), def.clone());
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), DefinitionError> {
        if let Ok(mut map) = self.defs.write() {
            map.remove(id);
        }
        Ok(())
    }
}

use rustc_hash::FxHashMap;

use crate::config::{ConfigError, ModelsConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasEntry {
    pub alias: String,
    pub upstream_model: String,
    pub inline_reasoning_tags: bool,
}

/// Static mapping from human-facing model names to upstream model ids.
#[derive(Debug)]
pub struct AliasTable {
    entries: Vec<AliasEntry>,
    index: FxHashMap<String, usize>,
    default_index: usize,
}

/// Result of resolving a requested alias.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedModel<'a> {
    pub entry: &'a AliasEntry,
    /// The requested alias was missing or unknown and the default was used.
    pub fell_back: bool,
}

impl AliasTable {
    /// Build the table from config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] when no aliases are configured or the
    /// default alias is not among them.
    pub fn from_config(models: &ModelsConfig) -> Result<Self, ConfigError> {
        let entries: Vec<AliasEntry> = models
            .aliases
            .iter()
            .map(|entry| AliasEntry {
                alias: entry.alias.trim().to_string(),
                upstream_model: entry.upstream_model.trim().to_string(),
                inline_reasoning_tags: entry.inline_reasoning_tags,
            })
            .collect();
        let mut index = FxHashMap::default();
        for (position, entry) in entries.iter().enumerate() {
            index.entry(entry.alias.clone()).or_insert(position);
        }
        let default_index = index
            .get(models.default_alias.trim())
            .copied()
            .ok_or_else(|| {
                ConfigError::Validation(format!(
                    "models.default_alias '{}' is not one of the configured aliases",
                    models.default_alias
                ))
            })?;
        Ok(Self {
            entries,
            index,
            default_index,
        })
    }

    /// Resolve `alias`, falling back to the default for a missing or unknown name.
    #[must_use]
    pub fn resolve(&self, alias: Option<&str>) -> ResolvedModel<'_> {
        let found = alias
            .map(str::trim)
            .filter(|alias| !alias.is_empty())
            .and_then(|alias| self.index.get(alias).copied());
        match found {
            Some(position) => ResolvedModel {
                entry: &self.entries[position],
                fell_back: false,
            },
            None => ResolvedModel {
                entry: self.default_entry(),
                fell_back: alias.is_some_and(|alias| !alias.trim().is_empty()),
            },
        }
    }

    #[must_use]
    pub fn default_entry(&self) -> &AliasEntry {
        &self.entries[self.default_index]
    }

    #[must_use]
    pub fn entries(&self) -> &[AliasEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

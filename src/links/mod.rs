//! Change detection for link expansion.
//!
//! Other content items embed a few fields of the items they link to (title,
//! base path and the like) in their expanded links. When an edition changes
//! one of those fields, every item linking to it must be re-sent downstream
//! even though its own content did not change.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::ExpansionConfig;
use crate::model::{DocumentSnapshot, Edition};

/// Fields embedded for every document type.
pub const DEFAULT_EXPANSION_FIELDS: &[&str] = &[
    "base_path",
    "description",
    "document_type",
    "phase",
    "public_updated_at",
    "schema_name",
    "title",
];

/// Extra fields embedded for specific document types.
const TYPE_EXPANSION_FIELDS: &[(&str, &[&str])] = &[
    ("organisation", &["details"]),
    ("person", &["details"]),
    ("role", &["details"]),
    ("taxon", &["details"]),
    ("topical_event", &["details"]),
    ("world_location", &["details"]),
];

/// Which top-level fields of each document type other items embed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpansionRules {
    defaults: BTreeSet<String>,
    per_type: BTreeMap<String, BTreeSet<String>>,
}

impl Default for ExpansionRules {
    fn default() -> Self {
        let mut per_type: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (document_type, fields) in TYPE_EXPANSION_FIELDS {
            per_type
                .entry(document_type.to_string())
                .or_default()
                .extend(fields.iter().map(|f| f.to_string()));
        }
        Self {
            defaults: DEFAULT_EXPANSION_FIELDS.iter().map(|f| f.to_string()).collect(),
            per_type,
        }
    }
}

impl ExpansionRules {
    /// Built-in rules extended with configured per-type fields.
    pub fn from_config(config: &ExpansionConfig) -> Self {
        let mut rules = Self::default();
        for (document_type, fields) in &config.fields {
            rules
                .per_type
                .entry(document_type.clone())
                .or_default()
                .extend(fields.iter().cloned());
        }
        rules
    }

    /// Fields of `document_type` that may appear in another item's expanded links.
    pub fn potential_expansion_fields(&self, document_type: &str) -> BTreeSet<&str> {
        self.defaults
            .iter()
            .chain(self.per_type.get(document_type).into_iter().flatten())
            .map(String::as_str)
            .collect()
    }
}

/// Top-level fields that differ between an edition and its predecessor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditionDiff {
    document_type: String,
    changed: BTreeSet<String>,
}

impl EditionDiff {
    /// Compare `current` with `previous`; with no predecessor every field counts as changed.
    ///
    /// A field is changed when its `(name, value)` pair is on one side only.
    pub fn between(current: &Edition, previous: Option<&Edition>) -> Self {
        let current_fields = current.fields();
        let previous_fields = previous.map(Edition::fields).unwrap_or_default();

        let changed = current_fields
            .keys()
            .chain(previous_fields.keys())
            .filter(|field| current_fields.get(*field) != previous_fields.get(*field))
            .cloned()
            .collect();

        Self {
            document_type: current.document_type().to_string(),
            changed,
        }
    }

    /// Compare `edition` with the edition one user-facing version below it.
    pub fn for_edition(snapshot: &DocumentSnapshot, edition: &Edition) -> Self {
        let previous = snapshot
            .edition_at(edition.user_facing_version - 1)
            .filter(|e| e.id != edition.id);
        Self::between(edition, previous)
    }

    /// Every changed field, sorted.
    pub fn changed_fields(&self) -> Vec<String> {
        self.changed.iter().cloned().collect()
    }

    /// Changed fields that other items embed.
    pub fn field_diff(&self, rules: &ExpansionRules) -> Vec<String> {
        let relevant = rules.potential_expansion_fields(&self.document_type);
        self.changed
            .iter()
            .filter(|field| relevant.contains(field.as_str()))
            .cloned()
            .collect()
    }

    pub fn should_update_dependencies(&self, rules: &ExpansionRules) -> bool {
        !self.field_diff(rules).is_empty()
    }
}

//! Editions: versioned snapshots of a document's content.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ParseEnumError;

/// Lifecycle state of an edition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditionState {
    Draft,
    Published,
    Superseded,
    Unpublished,
}

impl EditionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EditionState::Draft => "draft",
            EditionState::Published => "published",
            EditionState::Superseded => "superseded",
            EditionState::Unpublished => "unpublished",
        }
    }

    /// Published and unpublished editions share the single "live" slot of a document.
    pub fn is_live(&self) -> bool {
        matches!(self, EditionState::Published | EditionState::Unpublished)
    }
}

impl fmt::Display for EditionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EditionState {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(EditionState::Draft),
            "published" => Ok(EditionState::Published),
            "superseded" => Ok(EditionState::Superseded),
            "unpublished" => Ok(EditionState::Unpublished),
            other => Err(ParseEnumError::new("edition state", other)),
        }
    }
}

/// How significant a content change is to readers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateType {
    #[default]
    Major,
    Minor,
    Republish,
}

impl UpdateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateType::Major => "major",
            UpdateType::Minor => "minor",
            UpdateType::Republish => "republish",
        }
    }
}

impl fmt::Display for UpdateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Route matching mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteType {
    Exact,
    Prefix,
}

/// A path served by an edition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub path: String,
    #[serde(rename = "type")]
    pub route_type: RouteType,
}

impl Route {
    pub fn exact(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            route_type: RouteType::Exact,
        }
    }

    pub fn prefix(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            route_type: RouteType::Prefix,
        }
    }
}

/// A path an edition redirects elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redirect {
    pub path: String,
    #[serde(rename = "type")]
    pub route_type: RouteType,
    pub destination: String,
}

impl Redirect {
    pub fn exact(path: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            route_type: RouteType::Exact,
            destination: destination.into(),
        }
    }
}

/// Caller-supplied content of an edition.
///
/// Everything here is replaced wholesale by `put_content`; the surrounding
/// [`Edition`] carries the bookkeeping the store owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditionContent {
    pub base_path: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub document_type: String,
    pub schema_name: String,
    pub publishing_app: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rendering_app: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default)]
    pub details: serde_json::Value,
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default)]
    pub redirects: Vec<Redirect>,
    #[serde(default)]
    pub update_type: UpdateType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_updated_at: Option<DateTime<Utc>>,
}

/// One versioned snapshot of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edition {
    pub id: Uuid,
    pub document_id: Uuid,
    pub user_facing_version: i64,
    pub state: EditionState,
    #[serde(flatten)]
    pub content: EditionContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_published_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    pub last_edited_at: DateTime<Utc>,
}

impl Edition {
    pub fn base_path(&self) -> &str {
        &self.content.base_path
    }

    pub fn document_type(&self) -> &str {
        &self.content.document_type
    }

    pub fn publishing_app(&self) -> &str {
        &self.content.publishing_app
    }

    /// Top-level content fields keyed by name, as compared by edition diffs.
    pub fn fields(&self) -> BTreeMap<String, serde_json::Value> {
        match serde_json::to_value(&self.content) {
            Ok(serde_json::Value::Object(map)) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        }
    }
}

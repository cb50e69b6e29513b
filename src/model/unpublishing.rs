//! Unpublishing records and the tagged request that creates them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ParseEnumError;

/// Why a live edition was withdrawn from service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnpublishingType {
    Withdrawal,
    Redirect,
    Gone,
    Vanish,
    Substitute,
}

impl UnpublishingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnpublishingType::Withdrawal => "withdrawal",
            UnpublishingType::Redirect => "redirect",
            UnpublishingType::Gone => "gone",
            UnpublishingType::Vanish => "vanish",
            UnpublishingType::Substitute => "substitute",
        }
    }
}

impl fmt::Display for UnpublishingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnpublishingType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "withdrawal" => Ok(UnpublishingType::Withdrawal),
            "redirect" => Ok(UnpublishingType::Redirect),
            "gone" => Ok(UnpublishingType::Gone),
            "vanish" => Ok(UnpublishingType::Vanish),
            "substitute" => Ok(UnpublishingType::Substitute),
            other => Err(ParseEnumError::new("unpublishing type", other)),
        }
    }
}

/// Requested unpublishing, one variant per type with the fields that type uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum UnpublishingSpec {
    Withdrawal {
        explanation: String,
    },
    Redirect {
        alternative_path: String,
    },
    Gone {
        #[serde(default)]
        alternative_path: Option<String>,
        #[serde(default)]
        explanation: Option<String>,
    },
    Vanish,
    Substitute,
}

impl UnpublishingSpec {
    pub fn kind(&self) -> UnpublishingType {
        match self {
            UnpublishingSpec::Withdrawal { .. } => UnpublishingType::Withdrawal,
            UnpublishingSpec::Redirect { .. } => UnpublishingType::Redirect,
            UnpublishingSpec::Gone { .. } => UnpublishingType::Gone,
            UnpublishingSpec::Vanish => UnpublishingType::Vanish,
            UnpublishingSpec::Substitute => UnpublishingType::Substitute,
        }
    }

    pub fn explanation(&self) -> Option<&str> {
        match self {
            UnpublishingSpec::Withdrawal { explanation } => Some(explanation),
            UnpublishingSpec::Gone { explanation, .. } => explanation.as_deref(),
            _ => None,
        }
    }

    pub fn alternative_path(&self) -> Option<&str> {
        match self {
            UnpublishingSpec::Redirect { alternative_path } => Some(alternative_path),
            UnpublishingSpec::Gone {
                alternative_path, ..
            } => alternative_path.as_deref(),
            _ => None,
        }
    }
}

/// Persisted unpublishing, one per unpublished edition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unpublishing {
    pub edition_id: Uuid,
    #[serde(rename = "type")]
    pub kind: UnpublishingType,
    pub explanation: Option<String>,
    pub alternative_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Unpublishing {
    pub fn from_spec(edition_id: Uuid, spec: &UnpublishingSpec, created_at: DateTime<Utc>) -> Self {
        Self {
            edition_id,
            kind: spec.kind(),
            explanation: spec.explanation().map(str::to_string),
            alternative_path: spec.alternative_path().map(str::to_string),
            created_at,
        }
    }
}

//! Content model.
//!
//! A [`Document`] is the identity of one `(content_id, locale)` pair and owns
//! an ordered chain of [`Edition`]s. Everything else here hangs off that pair:
//! the [`Unpublishing`] of a withdrawn edition, the [`PathReservation`] that
//! lets an edition claim its base path, the [`LinkSet`] of outgoing links, and
//! the [`Event`]/[`Action`] audit trail every mutation leaves behind.

mod document;
mod edition;
mod event;
mod link;
mod reservation;
mod unpublishing;

pub use document::{Document, DocumentKey, DocumentSnapshot};
pub use edition::{Edition, EditionContent, EditionState, Redirect, Route, RouteType, UpdateType};
pub use event::{Action, ActionKind, ActionTarget, AuditRecord, Event};
pub use link::{LinkSet, Links};
pub use reservation::{PathReservation, ReservationOutcome, ReservationRequest};
pub use unpublishing::{Unpublishing, UnpublishingSpec, UnpublishingType};

/// Locale used when a request does not name one.
pub const DEFAULT_LOCALE: &str = "en";

/// Error returned when parsing one of the model's string-backed enums.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests;

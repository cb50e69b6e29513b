//! Structural validation of incoming content and unpublishing requests.
//!
//! Every check records field-level messages in [`ValidationErrors`] rather
//! than stopping at the first failure, so callers can correct all of their
//! input in one round trip.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::model::{Edition, EditionContent, UnpublishingSpec};

/// Length limits for validated fields.
pub mod limits {
    /// Maximum base path or route path length.
    pub const MAX_PATH_LENGTH: usize = 512;
    /// Maximum locale length (e.g., "en", "zh-tw").
    pub const MAX_LOCALE_LENGTH: usize = 16;
}

/// Error constants for validation failures.
pub mod errmsg {
    pub const PATH_EMPTY: &str = "must not be empty";
    pub const PATH_NOT_ABSOLUTE: &str = "must be an absolute path";
    pub const PATH_TOO_LONG: &str = "exceeds maximum path length";
    pub const PATH_INVALID_CHARS: &str = "contains whitespace or empty segments";
    pub const PATH_TRAILING_SLASH: &str = "must not end with a slash";

    pub const REQUIRED: &str = "is required";

    pub const ROUTES_MISSING_BASE_PATH: &str = "must include the base path";
    pub const ROUTE_NOT_BELOW_BASE_PATH: &str = "is not below the base path";
    pub const ROUTE_DUPLICATE: &str = "is duplicated across routes and redirects";
    pub const REDIRECT_TO_SELF: &str = "redirects to itself";
    pub const REDIRECT_BAD_DESTINATION: &str = "destination must be an absolute path or https URL";

    pub const LOCALE_INVALID: &str = "is not a valid locale";

    pub const EXPLANATION_REQUIRED: &str = "is required for a withdrawal";
    pub const ALTERNATIVE_PATH_REQUIRED: &str = "is required for a redirect";
    pub const ALTERNATIVE_PATH_IS_BASE_PATH: &str = "must differ from the base path";
    pub const ALTERNATIVE_PATH_IS_OWN_ROUTE: &str = "points back at a route of the same content";
}

/// Field-level validation failures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    fields: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-field error.
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.fields
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &BTreeMap<String, Vec<String>> {
        &self.fields
    }

    pub fn messages_for(&self, field: &str) -> &[String] {
        self.fields.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.fields {
            for message in messages {
                if !first {
                    f.write_str("; ")?;
                }
                write!(f, "{} {}", field, message)?;
                first = false;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Validate an absolute URL path such as a base path or route path.
pub fn validate_path(field: &str, path: &str, errors: &mut ValidationErrors) {
    if path.is_empty() {
        errors.add(field, errmsg::PATH_EMPTY);
        return;
    }
    if !path.starts_with('/') {
        errors.add(field, errmsg::PATH_NOT_ABSOLUTE);
        return;
    }
    if path.len() > limits::MAX_PATH_LENGTH {
        errors.add(
            field,
            format!(
                "{} (max: {}, got: {})",
                errmsg::PATH_TOO_LONG,
                limits::MAX_PATH_LENGTH,
                path.len()
            ),
        );
    }
    if path.chars().any(char::is_whitespace) || path.contains("//") {
        errors.add(field, errmsg::PATH_INVALID_CHARS);
    }
    if path.len() > 1 && path.ends_with('/') {
        errors.add(field, errmsg::PATH_TRAILING_SLASH);
    }
}

/// Validate a locale tag: lowercase letters, optionally followed by `-` segments.
pub fn validate_locale(locale: &str, errors: &mut ValidationErrors) {
    let mut segments = locale.split('-');
    let primary_ok = segments
        .next()
        .map(|s| (2..=3).contains(&s.len()) && s.chars().all(|c| c.is_ascii_lowercase()))
        .unwrap_or(false);
    let rest_ok = segments.all(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric()));

    if !primary_ok || !rest_ok || locale.len() > limits::MAX_LOCALE_LENGTH {
        errors.add("locale", errmsg::LOCALE_INVALID);
    }
}

fn is_below(path: &str, base_path: &str) -> bool {
    path == base_path
        || base_path == "/"
        || (path.starts_with(base_path) && path[base_path.len()..].starts_with('/'))
}

fn is_valid_destination(destination: &str) -> bool {
    destination.starts_with("https://") || (destination.starts_with('/') && !destination.starts_with("//"))
}

/// Validate routes and redirects against the base path they serve.
///
/// Routes must all sit at or below the base path, the base path itself must
/// be routed or redirected, and no path may appear twice.
pub fn validate_routes(content: &EditionContent, errors: &mut ValidationErrors) {
    let base_path = content.base_path.as_str();
    let mut seen = HashSet::new();
    let mut covers_base_path = false;

    for (i, route) in content.routes.iter().enumerate() {
        let field = format!("routes[{}].path", i);
        validate_path(&field, &route.path, errors);
        if !is_below(&route.path, base_path) {
            errors.add(&field, errmsg::ROUTE_NOT_BELOW_BASE_PATH);
        }
        if !seen.insert(route.path.as_str()) {
            errors.add(&field, errmsg::ROUTE_DUPLICATE);
        }
        covers_base_path |= route.path == base_path;
    }

    for (i, redirect) in content.redirects.iter().enumerate() {
        let field = format!("redirects[{}].path", i);
        validate_path(&field, &redirect.path, errors);
        if !is_below(&redirect.path, base_path) {
            errors.add(&field, errmsg::ROUTE_NOT_BELOW_BASE_PATH);
        }
        if !seen.insert(redirect.path.as_str()) {
            errors.add(&field, errmsg::ROUTE_DUPLICATE);
        }
        if redirect.destination == redirect.path {
            errors.add(format!("redirects[{}].destination", i), errmsg::REDIRECT_TO_SELF);
        } else if !is_valid_destination(&redirect.destination) {
            errors.add(
                format!("redirects[{}].destination", i),
                errmsg::REDIRECT_BAD_DESTINATION,
            );
        }
        covers_base_path |= redirect.path == base_path;
    }

    if !covers_base_path {
        errors.add("routes", errmsg::ROUTES_MISSING_BASE_PATH);
    }
}

/// Validate the content of a `put_content` request.
pub fn validate_content(content: &EditionContent) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();

    validate_path("base_path", &content.base_path, &mut errors);
    for (field, value) in [
        ("document_type", &content.document_type),
        ("schema_name", &content.schema_name),
        ("publishing_app", &content.publishing_app),
    ] {
        if value.trim().is_empty() {
            errors.add(field, errmsg::REQUIRED);
        }
    }
    if errors.messages_for("base_path").is_empty() {
        validate_routes(content, &mut errors);
    }

    errors.into_result()
}

/// Validate an unpublishing request against the edition it will withdraw.
///
/// A redirect must lead somewhere other than the content's own paths, or the
/// downstream router would loop.
pub fn validate_unpublishing(spec: &UnpublishingSpec, edition: &Edition) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();

    match spec {
        UnpublishingSpec::Withdrawal { explanation } if explanation.trim().is_empty() => {
            errors.add("explanation", errmsg::EXPLANATION_REQUIRED);
        }
        UnpublishingSpec::Redirect { alternative_path } if alternative_path.trim().is_empty() => {
            errors.add("alternative_path", errmsg::ALTERNATIVE_PATH_REQUIRED);
        }
        _ => {}
    }

    if let Some(alternative_path) = spec.alternative_path().filter(|p| !p.trim().is_empty()) {
        if !is_valid_destination(alternative_path) {
            errors.add("alternative_path", errmsg::REDIRECT_BAD_DESTINATION);
        } else if alternative_path == edition.base_path() {
            errors.add("alternative_path", errmsg::ALTERNATIVE_PATH_IS_BASE_PATH);
        } else if edition
            .content
            .routes
            .iter()
            .map(|r| r.path.as_str())
            .chain(edition.content.redirects.iter().map(|r| r.path.as_str()))
            .any(|p| p == alternative_path)
        {
            errors.add("alternative_path", errmsg::ALTERNATIVE_PATH_IS_OWN_ROUTE);
        }
    }

    errors.into_result()
}

#[cfg(test)]
mod tests;

use super::*;
use crate::model::{Redirect, Route, UnpublishingSpec};
use crate::test_utils::{content, edition_from};

#[test]
fn test_valid_content_passes() {
    assert!(validate_content(&content("/vat-rates")).is_ok());
}

#[test]
fn test_base_path_must_be_absolute() {
    let mut c = content("/vat-rates");
    c.base_path = "vat-rates".to_string();
    let errors = validate_content(&c).unwrap_err();
    assert_eq!(errors.messages_for("base_path"), [errmsg::PATH_NOT_ABSOLUTE]);
}

#[test]
fn test_route_outside_base_path_rejected() {
    let mut c = content("/vat-rates");
    c.routes.push(Route::exact("/vat-rates-old"));
    let errors = validate_content(&c).unwrap_err();
    assert_eq!(
        errors.messages_for("routes[1].path"),
        [errmsg::ROUTE_NOT_BELOW_BASE_PATH]
    );
}

#[test]
fn test_duplicate_route_paths_rejected() {
    let mut c = content("/vat-rates");
    c.redirects.push(Redirect::exact("/vat-rates", "/elsewhere"));
    let errors = validate_content(&c).unwrap_err();
    assert_eq!(errors.messages_for("redirects[0].path"), [errmsg::ROUTE_DUPLICATE]);
}

#[test]
fn test_routes_must_cover_base_path() {
    let mut c = content("/vat-rates");
    c.routes = vec![Route::prefix("/vat-rates/2024")];
    let errors = validate_content(&c).unwrap_err();
    assert_eq!(errors.messages_for("routes"), [errmsg::ROUTES_MISSING_BASE_PATH]);
}

#[test]
fn test_missing_required_fields_reported_together() {
    let mut c = content("/vat-rates");
    c.document_type = String::new();
    c.publishing_app = " ".to_string();
    let errors = validate_content(&c).unwrap_err();
    assert_eq!(errors.fields().len(), 2);
    assert!(errors.to_string().contains("document_type is required"));
}

#[test]
fn test_locale_validation() {
    for ok in ["en", "cy", "zh-tw", "es-419"] {
        let mut errors = ValidationErrors::new();
        validate_locale(ok, &mut errors);
        assert!(errors.is_empty(), "{} should be valid", ok);
    }
    for bad in ["", "EN", "english", "en-"] {
        let mut errors = ValidationErrors::new();
        validate_locale(bad, &mut errors);
        assert!(!errors.is_empty(), "{} should be invalid", bad);
    }
}

#[test]
fn test_withdrawal_requires_explanation() {
    let edition = edition_from(content("/vat-rates"));
    let spec = UnpublishingSpec::Withdrawal {
        explanation: "  ".to_string(),
    };
    let errors = validate_unpublishing(&spec, &edition).unwrap_err();
    assert_eq!(errors.messages_for("explanation"), [errmsg::EXPLANATION_REQUIRED]);
}

#[test]
fn test_redirect_requires_alternative_path() {
    let edition = edition_from(content("/vat-rates"));
    let spec = UnpublishingSpec::Redirect {
        alternative_path: String::new(),
    };
    let errors = validate_unpublishing(&spec, &edition).unwrap_err();
    assert_eq!(
        errors.messages_for("alternative_path"),
        [errmsg::ALTERNATIVE_PATH_REQUIRED]
    );
}

#[test]
fn test_redirect_to_own_base_path_rejected() {
    let edition = edition_from(content("/vat-rates"));
    let spec = UnpublishingSpec::Redirect {
        alternative_path: "/vat-rates".to_string(),
    };
    let errors = validate_unpublishing(&spec, &edition).unwrap_err();
    assert_eq!(
        errors.messages_for("alternative_path"),
        [errmsg::ALTERNATIVE_PATH_IS_BASE_PATH]
    );
}

#[test]
fn test_redirect_through_own_route_rejected() {
    let mut c = content("/vat-rates");
    c.routes.push(Route::exact("/vat-rates/rates"));
    let edition = edition_from(c);
    let spec = UnpublishingSpec::Redirect {
        alternative_path: "/vat-rates/rates".to_string(),
    };
    let errors = validate_unpublishing(&spec, &edition).unwrap_err();
    assert_eq!(
        errors.messages_for("alternative_path"),
        [errmsg::ALTERNATIVE_PATH_IS_OWN_ROUTE]
    );
}

#[test]
fn test_gone_without_fields_is_valid() {
    let edition = edition_from(content("/vat-rates"));
    let spec = UnpublishingSpec::Gone {
        alternative_path: None,
        explanation: None,
    };
    assert!(validate_unpublishing(&spec, &edition).is_ok());
}

//! Attribute and URL safety gate.
//!
//! Run before building a mutation that writes an attribute. The gate is
//! synchronous and independent of the scheduler: a rejected write never turns
//! into a queued task, so the target is never left half-mutated.
//!
//! Rules:
//! - attribute names starting with `on` (any case) are inline event handlers
//!   and always rejected;
//! - `mailto:` and `tel:` values are always accepted;
//! - values without `://` are not absolute URLs and are accepted;
//! - anything else is resolved against the gate's base and rejected if its
//!   scheme is `http`, `https` or `ftp`. A value that fails to parse is
//!   accepted.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::error::ValidationError;

/// Base used by [`SafetyGate::default`] to resolve relative references.
pub const DEFAULT_BASE: &str = "http://localhost/";

/// Schemes a value may not resolve to.
pub const DENIED_SCHEMES: [&str; 3] = ["http", "https", "ftp"];

static EVENT_HANDLER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^on").expect("event handler pattern is valid"));

static CONTACT_SCHEME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(mailto|tel):").expect("contact scheme pattern is valid"));

/// True unless `name` is an event-handler attribute.
pub fn is_safe_attribute(name: &str) -> bool {
    !EVENT_HANDLER.is_match(name)
}

/// True unless `value`, resolved against `base`, uses a denied scheme.
pub fn is_safe_url(value: &str, base: &Url) -> bool {
    if CONTACT_SCHEME.is_match(value) || !value.contains("://") {
        return true;
    }
    match base.join(value) {
        Ok(url) => !DENIED_SCHEMES.contains(&url.scheme()),
        Err(_) => true,
    }
}

/// Reject event-handler attribute names.
pub fn check_attribute(name: &str) -> Result<(), ValidationError> {
    if is_safe_attribute(name) {
        Ok(())
    } else {
        Err(ValidationError::UnsafeAttribute {
            name: name.to_owned(),
        })
    }
}

/// Reject values for `attribute` that resolve to a denied scheme.
pub fn check_url(attribute: &str, value: &str, base: &Url) -> Result<(), ValidationError> {
    if is_safe_url(value, base) {
        Ok(())
    } else {
        Err(ValidationError::UnsafeUrl {
            attribute: attribute.to_owned(),
            value: value.to_owned(),
        })
    }
}

/// Validator for attribute writes, bound to the origin relative references
/// resolve against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SafetyGate {
    base: Url,
}

impl Default for SafetyGate {
    fn default() -> Self {
        Self::new(Url::parse(DEFAULT_BASE).expect("default base URL is valid"))
    }
}

impl SafetyGate {
    /// A gate resolving relative references against `base`.
    pub fn new(base: Url) -> Self {
        Self { base }
    }

    /// A gate for the given origin, e.g. `https://app.example`.
    pub fn from_origin(origin: &str) -> Result<Self, url::ParseError> {
        Url::parse(origin).map(Self::new)
    }

    /// The base URL.
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Check an attribute write: the name first, then the value.
    pub fn validate(&self, attribute: &str, value: &str) -> Result<(), ValidationError> {
        check_attribute(attribute)?;
        check_url(attribute, value, &self.base)
    }
}

//! Operation tags: the write-slot names within one target.
//!
//! Mutations that end in the same visible state for a target share a tag, so a
//! later submission replaces an earlier one. Setting, removing and toggling an
//! attribute all share `a:<name>`; the other helpers each own a single slot.

use std::borrow::Cow;
use std::fmt;

/// Discriminator of a write slot within a target's scope.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct Tag(Cow<'static, str>);

impl Tag {
    /// An arbitrary tag.
    pub fn new(tag: impl Into<Cow<'static, str>>) -> Self {
        Self(tag.into())
    }

    /// Appending a freshly created child element.
    pub const fn element_created() -> Self {
        Self(Cow::Borrowed("e"))
    }

    /// Detaching the target from its parent.
    pub const fn removed() -> Self {
        Self(Cow::Borrowed("r"))
    }

    /// Replacing the target's text content.
    pub const fn text() -> Self {
        Self(Cow::Borrowed("t"))
    }

    /// Replacing the target's inner HTML.
    pub const fn inner_html() -> Self {
        Self(Cow::Borrowed("h"))
    }

    /// Setting, removing or toggling the attribute `name`.
    pub fn attribute(name: &str) -> Self {
        Self(Cow::Owned(format!("a:{name}")))
    }

    /// Toggling the class `token`.
    pub fn class(token: &str) -> Self {
        Self(Cow::Owned(format!("c:{token}")))
    }

    /// Setting or removing the style property `property`.
    pub fn style(property: &str) -> Self {
        Self(Cow::Owned(format!("s:{property}")))
    }

    /// The tag text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for Tag {
    fn from(tag: &'static str) -> Self {
        Self(Cow::Borrowed(tag))
    }
}

impl From<String> for Tag {
    fn from(tag: String) -> Self {
        Self(Cow::Owned(tag))
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helper_tags_match_slot_names() {
        assert_eq!(Tag::element_created().as_str(), "e");
        assert_eq!(Tag::removed().as_str(), "r");
        assert_eq!(Tag::text().as_str(), "t");
        assert_eq!(Tag::inner_html().as_str(), "h");
        assert_eq!(Tag::attribute("href").as_str(), "a:href");
        assert_eq!(Tag::class("active").as_str(), "c:active");
        assert_eq!(Tag::style("color").as_str(), "s:color");
    }

    #[test]
    fn borrowed_and_owned_tags_compare_by_text() {
        assert_eq!(Tag::from("a:href"), Tag::attribute("href"));
        assert_eq!(Tag::from(String::from("t")), Tag::text());
        assert_ne!(Tag::attribute("href"), Tag::style("href"));
    }

    #[test]
    fn display_prints_raw_tag() {
        assert_eq!(Tag::class("open").to_string(), "c:open");
    }
}

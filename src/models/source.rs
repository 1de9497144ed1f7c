//! Raw URL collections as they appear on disk.
//!
//! Upstream files come in several shapes. They are parsed into
//! [`RawCollection`] and flattened into a list of [`RawEntry`] values, which
//! is the only form the merger works with.

use serde::Deserialize;
use serde_json::{Map, Value};

/// One entry of a raw collection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawEntry {
    /// A URL, a site-relative path, or a bare id
    Text(String),
    /// A bare numeric id
    Number(u64),
    /// An object carrying a `url` field
    Object(UrlObject),
    /// Anything else; always malformed
    Other(Value),
}

/// Object entry; only `url` matters, every other key is ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UrlObject {
    #[serde(default)]
    pub url: Option<String>,
}

impl RawEntry {
    /// Raw text to feed to URL normalization, if the entry has any.
    pub fn candidate(&self) -> Option<String> {
        match self {
            RawEntry::Text(text) => Some(text.clone()),
            RawEntry::Number(n) => Some(n.to_string()),
            RawEntry::Object(obj) => obj.url.clone().filter(|u| !u.trim().is_empty()),
            RawEntry::Other(_) => None,
        }
    }
}

/// The accepted top-level shapes of a source file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawCollection {
    /// `["https://…?ad=1", "2", {"url": "/alert_result?ad=3"}]`
    List(Vec<RawEntry>),
    /// `{"urls": [...]}`
    Wrapped { urls: Vec<RawEntry> },
    /// `{"123": "https://…", "456": {"url": "…"}}`
    Keyed(Map<String, Value>),
}

impl RawCollection {
    /// Parse a source file's contents.
    pub fn parse(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// Flatten into entries, preserving file order.
    ///
    /// For keyed objects the value's `url` wins; when the value carries no
    /// URL at all the key itself is used as a bare id.
    pub fn into_entries(self) -> Vec<RawEntry> {
        match self {
            RawCollection::List(entries) | RawCollection::Wrapped { urls: entries } => entries,
            RawCollection::Keyed(map) => map
                .into_iter()
                .map(|(key, value)| {
                    let entry = serde_json::from_value(value.clone())
                        .unwrap_or(RawEntry::Other(value));
                    match entry {
                        RawEntry::Object(UrlObject { url: None }) => RawEntry::Text(key),
                        other => other,
                    }
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(json: &str) -> Vec<RawEntry> {
        RawCollection::parse(json.as_bytes()).unwrap().into_entries()
    }

    #[test]
    fn test_list_of_strings_and_ids() {
        let parsed = entries(r#"["123", "https://site/?ad=456", 789]"#);
        let candidates: Vec<Option<String>> = parsed.iter().map(RawEntry::candidate).collect();
        assert_eq!(
            candidates,
            vec![
                Some("123".to_string()),
                Some("https://site/?ad=456".to_string()),
                Some("789".to_string())
            ]
        );
    }

    #[test]
    fn test_list_of_objects() {
        let parsed = entries(r#"[{"id": 456, "url": "u"}, {"id": 7}]"#);
        assert_eq!(parsed[0].candidate(), Some("u".to_string()));
        assert_eq!(parsed[1].candidate(), None);
    }

    #[test]
    fn test_wrapped_urls() {
        let parsed = entries(r#"{"urls": ["/alert_result?ad=5"]}"#);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].candidate(), Some("/alert_result?ad=5".to_string()));
    }

    #[test]
    fn test_keyed_object() {
        let parsed = entries(r#"{"11": {"url": "https://site/?ad=11"}, "12": "https://site/?ad=12", "13": {"prix": 1}}"#);
        let candidates: Vec<Option<String>> = parsed.iter().map(RawEntry::candidate).collect();
        assert_eq!(
            candidates,
            vec![
                Some("https://site/?ad=11".to_string()),
                Some("https://site/?ad=12".to_string()),
                Some("13".to_string())
            ]
        );
    }

    #[test]
    fn test_odd_entries_are_kept_as_other() {
        let parsed = entries(r#"[null, true, [1], 1.5]"#);
        assert_eq!(parsed.len(), 4);
        assert!(parsed.iter().all(|e| e.candidate().is_none()));
    }

    #[test]
    fn test_scalar_document_is_rejected() {
        assert!(RawCollection::parse(b"42").is_err());
        assert!(RawCollection::parse(b"not json").is_err());
    }
}

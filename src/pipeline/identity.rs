//! Listing identity: canonical URLs and the ids they carry.

use url::Url;

use crate::error::Result;
use crate::models::{IdentityConfig, ListingId};

/// Resolves listing ids from URLs and canonicalizes raw URL values.
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    base: Url,
    id_param: String,
    template: String,
}

impl IdentityResolver {
    /// Build a resolver from configuration.
    pub fn new(config: &IdentityConfig) -> Result<Self> {
        Ok(Self {
            base: Url::parse(&config.base_url)?,
            id_param: config.id_param.clone(),
            template: config.listing_template.replace("{token}", &config.token),
        })
    }

    /// Extract the listing id from a URL's query string.
    ///
    /// Returns `None` when the URL does not parse, has no id parameter, or
    /// the parameter is not numeric.
    ///
    /// # Examples
    /// ```
    /// use reconciler::models::{IdentityConfig, ListingId};
    /// use reconciler::pipeline::IdentityResolver;
    ///
    /// let resolver = IdentityResolver::new(&IdentityConfig::default()).unwrap();
    /// assert_eq!(
    ///     resolver.extract_id("https://www.jinka.fr/alert_result?ad=81234&from=mail"),
    ///     Some(ListingId::from("81234"))
    /// );
    /// assert_eq!(resolver.extract_id("https://www.jinka.fr/"), None);
    /// ```
    pub fn extract_id(&self, url: &str) -> Option<ListingId> {
        let parsed = Url::parse(url.trim()).ok()?;
        parsed
            .query_pairs()
            .find(|(key, _)| key == self.id_param.as_str())
            .map(|(_, value)| value.into_owned())
            .filter(|value| !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()))
            .map(ListingId::from)
    }

    /// Canonicalize a raw value.
    ///
    /// - a bare numeric id becomes the templated listing URL
    /// - a site-relative path is joined onto the base URL
    /// - an absolute `http(s)` URL is returned unchanged
    /// - anything else yields `None`
    pub fn normalize_url(&self, raw: &str) -> Option<String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        if raw.bytes().all(|b| b.is_ascii_digit()) {
            return Some(self.template.replace("{id}", raw));
        }

        if raw.starts_with('/') {
            return self.base.join(raw).ok().map(String::from);
        }

        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Some(raw.to_string());
        }

        None
    }

    /// Normalize then extract, the way every merge entry is resolved.
    pub fn resolve(&self, raw: &str) -> Option<(ListingId, String)> {
        let url = self.normalize_url(raw)?;
        let id = self.extract_id(&url)?;
        Some((id, url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> IdentityResolver {
        IdentityResolver::new(&IdentityConfig {
            token: "tok".to_string(),
            ..IdentityConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_extract_id_from_query() {
        let r = resolver();
        assert_eq!(
            r.extract_id("https://site/?ad=456"),
            Some(ListingId::from("456"))
        );
        assert_eq!(
            r.extract_id("https://www.jinka.fr/alert_result?token=x&ad=789&from=dashboard_card"),
            Some(ListingId::from("789"))
        );
    }

    #[test]
    fn test_extract_id_requires_exact_numeric_param() {
        let r = resolver();
        assert_eq!(r.extract_id("https://site/?load=456"), None);
        assert_eq!(r.extract_id("https://site/?ad=abc"), None);
        assert_eq!(r.extract_id("https://site/?ad="), None);
        assert_eq!(r.extract_id("/alert_result?ad=1"), None);
    }

    #[test]
    fn test_normalize_bare_id() {
        let url = resolver().normalize_url("123").unwrap();
        assert_eq!(
            url,
            "https://www.jinka.fr/alert_result?token=tok&ad=123&from=dashboard_card&from_alert_filter=all&from_alert_page=1"
        );
    }

    #[test]
    fn test_normalize_relative_path() {
        assert_eq!(
            resolver().normalize_url("/alert_result?ad=55"),
            Some("https://www.jinka.fr/alert_result?ad=55".to_string())
        );
    }

    #[test]
    fn test_normalize_absolute_unchanged() {
        assert_eq!(
            resolver().normalize_url("https://site/?ad=456"),
            Some("https://site/?ad=456".to_string())
        );
    }

    #[test]
    fn test_normalize_rejects_other_shapes() {
        let r = resolver();
        assert_eq!(r.normalize_url("u"), None);
        assert_eq!(r.normalize_url(""), None);
        assert_eq!(r.normalize_url("   "), None);
        assert_eq!(r.normalize_url("ftp://site/?ad=1"), None);
    }

    #[test]
    fn test_resolve_round_trip() {
        let (id, url) = resolver().resolve(" 42 ").unwrap();
        assert_eq!(id, ListingId::from("42"));
        assert_eq!(resolver().extract_id(&url), Some(id));
    }
}

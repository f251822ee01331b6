//! Request context parsing for `name?key=value` resource strings.
//!
//! Paths handed to the asset tree may carry a query suffix understood by the
//! factory that builds the resource, e.g. `prices?segments=4&replicated=true`.
//! Keys not recognized by a factory are ignored; the grammar of the values is
//! factory-specific.

/// A parsed resource request: a name plus query parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Resource name, without the query suffix.
    pub name: String,
    /// Query parameters in the order they appeared.
    pub params: Vec<(String, String)>,
}

impl RequestContext {
    /// Parse a `name?key=value&key=value` string.
    ///
    /// Absent query and empty pairs are fine; `a?` parses to name `a` with
    /// no parameters.
    #[must_use]
    pub fn parse(input: &str) -> Self {
        match input.split_once('?') {
            Some((name, query)) => Self {
                name: name.to_string(),
                params: parse_query(query),
            },
            None => Self {
                name: input.to_string(),
                params: Vec::new(),
            },
        }
    }

    /// Parse a bare query string (no name component).
    #[must_use]
    pub fn from_query(query: &str) -> Self {
        Self {
            name: String::new(),
            params: parse_query(query),
        }
    }

    /// Look up the last value for a key, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Whether a registering subscriber wants existing state replayed.
    ///
    /// Defaults to `true` when unspecified.
    #[must_use]
    pub fn bootstrap(&self) -> bool {
        self.get("bootstrap") != Some("false")
    }

    /// Requested segment count for a store factory.
    #[must_use]
    pub fn segments(&self) -> Option<usize> {
        self.get("segments").and_then(|v| v.parse().ok())
    }

    /// Whether the store factory should build a replicated store.
    #[must_use]
    pub fn replicated(&self) -> bool {
        self.get("replicated") == Some("true")
    }

    /// Local node identifier for a replicated store.
    #[must_use]
    pub fn identifier(&self) -> Option<u8> {
        self.get("identifier").and_then(|v| v.parse().ok())
    }
}

fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_and_query_split() {
        let rc = RequestContext::parse("prices?segments=4&replicated=true");
        assert_eq!(rc.name, "prices");
        assert_eq!(rc.segments(), Some(4));
        assert!(rc.replicated());
    }

    #[test]
    fn name_only() {
        let rc = RequestContext::parse("prices");
        assert_eq!(rc.name, "prices");
        assert!(rc.params.is_empty());
        assert!(rc.bootstrap());
    }

    #[test]
    fn bootstrap_false_honored() {
        let rc = RequestContext::from_query("bootstrap=false");
        assert!(!rc.bootstrap());
    }

    #[test]
    fn unknown_keys_ignored() {
        let rc = RequestContext::parse("a?codec=text&bootstrap=true");
        assert_eq!(rc.name, "a");
        assert!(rc.bootstrap());
        assert_eq!(rc.get("codec"), Some("text"));
        assert_eq!(rc.segments(), None);
    }

    #[test]
    fn last_value_wins() {
        let rc = RequestContext::from_query("segments=2&segments=8");
        assert_eq!(rc.segments(), Some(8));
    }
}

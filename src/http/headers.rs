//! Ordered HTTP header map.
//!
//! Header order and duplicates are kept exactly as received so the proxy can
//! relay them faithfully. Lookups are case-insensitive.

/// An ordered list of header fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header, keeping any existing fields with the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replaces every field named `name` with a single one.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.entries.push((name, value.into()));
    }

    /// Returns the first value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Removes every field named `name`, returning how many were dropped.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        before - self.entries.len()
    }

    /// Checks whether a comma-separated header (e.g. `Connection`) lists `token`.
    ///
    /// All fields with that name are considered, and the comparison ignores
    /// ASCII case and surrounding whitespace.
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name)
            .flat_map(|v| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case_and_keeps_duplicates() {
        let headers: Headers = [("Set-Cookie", "a=1"), ("set-cookie", "b=2"), ("Host", "x")]
            .into_iter()
            .collect();

        assert_eq!(headers.get("SET-COOKIE"), Some("a=1"));
        assert_eq!(headers.get_all("set-cookie").collect::<Vec<_>>(), vec!["a=1", "b=2"]);
        assert_eq!(headers.len(), 3);
    }

    #[test]
    fn connection_tokens() {
        let headers: Headers = [("Connection", "keep-alive, Upgrade")].into_iter().collect();

        assert!(headers.has_token("connection", "upgrade"));
        assert!(headers.has_token("Connection", "KEEP-ALIVE"));
        assert!(!headers.has_token("Connection", "close"));
    }

    #[test]
    fn set_replaces_all_fields() {
        let mut headers: Headers = [("Host", "a"), ("Accept", "*/*"), ("host", "b")]
            .into_iter()
            .collect();

        headers.set("Host", "c");

        assert_eq!(headers.get_all("host").collect::<Vec<_>>(), vec!["c"]);
        assert_eq!(headers.iter().next(), Some(("Accept", "*/*")));
    }
}

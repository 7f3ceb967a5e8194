//! Request header lists and header-value token parsing.

use crate::base::neterror::NetError;
use http::header::{HeaderName, HeaderValue};
use std::str::FromStr;

/// An ordered, case-preserving header list with case-insensitive lookup.
///
/// Order matters on the wire, so this is a plain list rather than a map.
/// Duplicate names are allowed (`append`); `insert` replaces the first
/// same-named entry in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<Entry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    name: HeaderName,
    /// Spelling written on the wire.
    wire: String,
    value: HeaderValue,
}

impl Entry {
    fn parse(name: &str, value: &str) -> Result<Self, NetError> {
        let header_name = HeaderName::from_str(name).map_err(|_| NetError::InvalidHeader)?;
        let header_value = HeaderValue::from_str(value).map_err(|_| NetError::InvalidHeader)?;
        Ok(Self {
            name: header_name,
            wire: name.to_string(),
            value: header_value,
        })
    }

    fn value_str(&self) -> &str {
        // from_str only admits visible ASCII, so this never falls back.
        self.value.to_str().unwrap_or_default()
    }
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &HeaderName) -> Option<usize> {
        self.entries.iter().position(|e| e.name == *name)
    }

    fn put(&mut self, entry: Entry) {
        match self.position(&entry.name) {
            Some(idx) => self.entries[idx] = entry,
            None => self.entries.push(entry),
        }
    }

    /// Replace the first header named `name`, or append. The replaced
    /// entry keeps its position but takes the new spelling.
    pub fn insert(&mut self, name: &str, value: &str) -> Result<(), NetError> {
        let entry = Entry::parse(name, value)?;
        match self.position(&entry.name) {
            Some(idx) => self.entries[idx].value = entry.value,
            None => self.entries.push(entry),
        }
        Ok(())
    }

    /// Append without replacing.
    pub fn append(&mut self, name: &str, value: &str) -> Result<(), NetError> {
        self.entries.push(Entry::parse(name, value)?);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) {
        if let Ok(target) = HeaderName::from_str(name) {
            self.entries.retain(|e| e.name != target);
        }
    }

    /// First value named `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        let target = HeaderName::from_str(name).ok()?;
        self.entries
            .iter()
            .find(|e| e.name == target)
            .map(Entry::value_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|e| (e.wire.as_str(), e.value_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `defaults` overlaid with `specific`: each specific header replaces
    /// the first same-named default in place, or is appended. Content-Length
    /// never survives; the sender computes it.
    pub fn merged(defaults: &Headers, specific: &Headers) -> Headers {
        let mut out = defaults.without("Content-Length");
        for entry in &specific.entries {
            if entry.name != http::header::CONTENT_LENGTH {
                out.put(entry.clone());
            }
        }
        out
    }

    /// Copy of this list with every `name` header removed.
    pub fn without(&self, name: &str) -> Headers {
        let mut out = self.clone();
        out.remove(name);
        out
    }
}

/// One element of a comma-separated header value, e.g. `max=5` in
/// `Keep-Alive: timeout=15, max=5`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderElement {
    pub name: String,
    pub value: Option<String>,
    pub params: Vec<(String, Option<String>)>,
}

fn split_outside_quotes(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            c if c == sep && !in_quotes => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

fn name_value(s: &str) -> (String, Option<String>) {
    match s.split_once('=') {
        Some((n, v)) => (
            n.trim().to_string(),
            Some(v.trim().trim_matches('"').to_string()),
        ),
        None => (s.trim().to_string(), None),
    }
}

/// Parse a header value into its comma-separated elements.
pub fn parse_elements(value: &str) -> Vec<HeaderElement> {
    split_outside_quotes(value, ',')
        .into_iter()
        .filter(|e| !e.trim().is_empty())
        .map(|element| {
            let mut pieces = split_outside_quotes(element, ';').into_iter();
            let (name, value) = name_value(pieces.next().unwrap_or_default());
            let params = pieces
                .filter(|p| !p.trim().is_empty())
                .map(name_value)
                .collect();
            HeaderElement {
                name,
                value,
                params,
            }
        })
        .collect()
}

/// Whether `value` lists `token` (case-insensitive).
pub fn has_token(value: &str, token: &str) -> bool {
    parse_elements(value)
        .iter()
        .any(|e| e.name.eq_ignore_ascii_case(token))
}

/// `value` with every `token` element removed.
pub fn remove_token(value: &str, token: &str) -> String {
    split_outside_quotes(value, ',')
        .into_iter()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .filter(|e| {
            let first = split_outside_quotes(e, ';')[0];
            !name_value(first).0.eq_ignore_ascii_case(token)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Value of `name=value` within a header value, e.g. `max` in `Keep-Alive`.
pub fn element_value(value: &str, name: &str) -> Option<String> {
    parse_elements(value)
        .into_iter()
        .find(|e| e.name.eq_ignore_ascii_case(name))
        .and_then(|e| e.value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "application/json").unwrap();
        assert_eq!(headers.get("content-type"), Some("application/json"));
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let mut headers = Headers::new();
        headers.insert("Host", "example.com").unwrap();
        headers.insert("Accept", "*/*").unwrap();
        headers.insert("HOST", "updated.com").unwrap();

        let names: Vec<_> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Host", "Accept"]);
        assert_eq!(headers.get("host"), Some("updated.com"));
    }

    #[test]
    fn test_append_keeps_duplicates() {
        let mut headers = Headers::new();
        headers.append("Via", "1.0 a").unwrap();
        headers.append("Via", "1.1 b").unwrap();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("via"), Some("1.0 a"));
    }

    #[test]
    fn test_invalid_header_rejected() {
        let mut headers = Headers::new();
        assert!(headers.insert("Invalid Header", "value").is_err());
        assert!(headers.insert("Valid", "bad\r\nvalue").is_err());
    }

    #[test]
    fn test_control_bytes_rejected() {
        let mut headers = Headers::new();
        assert!(headers.insert("X-A", "a\x7fb").is_err());
        assert!(headers.insert("X-A", "a\x01b").is_err());
        assert!(headers.append("X-A", "caf\u{e9}").is_err());
        assert!(headers.insert("X[A]", "v").is_err());
        assert!(headers.insert("", "v").is_err());
        assert!(headers.is_empty());
        headers.insert("X-A", "tab\tand space").unwrap();
        assert_eq!(headers.get("x-a"), Some("tab\tand space"));
    }

    #[test]
    fn test_lookup_with_invalid_name_misses() {
        let mut headers = Headers::new();
        headers.insert("Accept", "*/*").unwrap();
        assert_eq!(headers.get("Acc ept"), None);
        headers.remove("Acc ept");
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_merge_overrides_and_strips_content_length() {
        let mut defaults = Headers::new();
        defaults.insert("Accept", "*/*").unwrap();
        defaults.insert("Content-Length", "99").unwrap();
        defaults.insert("User-Agent", "default").unwrap();

        let mut specific = Headers::new();
        specific.insert("user-agent", "mine").unwrap();
        specific.insert("Content-length", "5").unwrap();
        specific.insert("X-Extra", "1").unwrap();

        let merged = Headers::merged(&defaults, &specific);
        let pairs: Vec<_> = merged.iter().collect();
        assert_eq!(
            pairs,
            vec![("Accept", "*/*"), ("user-agent", "mine"), ("X-Extra", "1")]
        );
    }

    #[test]
    fn test_merge_is_deterministic() {
        let mut defaults = Headers::new();
        defaults.insert("Accept", "*/*").unwrap();
        let mut specific = Headers::new();
        specific.insert("Accept", "text/html").unwrap();

        assert_eq!(
            Headers::merged(&defaults, &specific),
            Headers::merged(&defaults, &specific)
        );
    }

    #[test]
    fn test_tokens() {
        assert!(has_token("Keep-Alive, TE", "keep-alive"));
        assert!(has_token("close", "Close"));
        assert!(!has_token("keep-alive-ish", "keep-alive"));
        assert!(has_token("100-continue; foo=\"a,b\"", "100-continue"));
    }

    #[test]
    fn test_remove_token() {
        assert_eq!(remove_token("100-continue, x-thing", "100-continue"), "x-thing");
        assert_eq!(remove_token("100-continue", "100-continue"), "");
    }

    #[test]
    fn test_element_value() {
        assert_eq!(
            element_value("timeout=15, max=2", "max"),
            Some("2".to_string())
        );
        assert_eq!(element_value("timeout=15", "max"), None);
    }

    #[test]
    fn test_parse_elements_params() {
        let elements = parse_elements("gzip;q=1.0, identity; q=0.5");
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[1].name, "identity");
        assert_eq!(
            elements[1].params,
            vec![("q".to_string(), Some("0.5".to_string()))]
        );
    }
}

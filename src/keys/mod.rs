use regex::Regex;
use thiserror::Error;

/// Placeholder substituted for segments that look like identifiers.
pub const WILDCARD: &str = "{id}";

/// Errors raised by key and prefix arithmetic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("key {key} is not a child of prefix {prefix}")]
    NotAChild { key: String, prefix: String },

    #[error("key {key} is exactly the prefix")]
    ExactMatch { key: String },

    #[error("segment is empty")]
    EmptySegment,

    #[error("key is empty")]
    EmptyKey,
}

/// Ordered sequence of key segments. The empty key is the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Key(Vec<String>);

impl Key {
    /// The root key (no segments).
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Builds a key from already-split segments.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the key with its last segment removed.
    pub fn pop(&self) -> Result<Key, KeyError> {
        match self.0.split_last() {
            Some((_, rest)) => Ok(Self(rest.to_vec())),
            None => Err(KeyError::EmptyKey),
        }
    }

    /// Joins the segments with the given delimiter.
    pub fn join(&self, delimiter: &str) -> String {
        self.0.join(delimiter)
    }
}

/// Splits raw keys into segments and groups identifier-like segments.
///
/// Stateless beyond its delimiter and pattern list, so one parser is shared
/// by every fold and by prefix navigation.
#[derive(Debug, Clone)]
pub struct KeyParser {
    delimiter: String,
    id_patterns: Vec<Regex>,
}

impl KeyParser {
    pub fn new(delimiter: impl Into<String>, id_patterns: Vec<Regex>) -> Self {
        Self {
            delimiter: delimiter.into(),
            id_patterns,
        }
    }

    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    fn matches_pattern(&self, segment: &str) -> bool {
        self.id_patterns.iter().any(|re| re.is_match(segment))
    }

    fn collapse(&self, segment: &str, infer_ids: bool) -> String {
        if infer_ids && self.matches_pattern(segment) {
            WILDCARD.to_string()
        } else {
            segment.to_string()
        }
    }

    /// Splits a raw key by the delimiter, optionally collapsing identifier
    /// segments into [`WILDCARD`]. The empty string is the root key.
    pub fn tokenize(&self, raw: &str, infer_ids: bool) -> Key {
        if raw.is_empty() {
            return Key::root();
        }

        Key(raw
            .split(self.delimiter.as_str())
            .map(|segment| self.collapse(segment, infer_ids))
            .collect())
    }

    /// Whether every prefix segment matches the corresponding key segment.
    ///
    /// A wildcard prefix segment accepts either a collapsed key segment or a
    /// raw segment matching one of the id patterns.
    pub fn is_prefix_of(&self, key: &Key, prefix: &Key) -> bool {
        if prefix.len() > key.len() {
            return false;
        }

        prefix
            .segments()
            .iter()
            .zip(key.segments())
            .all(|(p, k)| p == k || (p == WILDCARD && self.matches_pattern(k)))
    }

    /// Returns the immediate child segment of `key` below `prefix`.
    pub fn namespace_of(&self, key: &Key, prefix: &Key, infer_ids: bool) -> Result<String, KeyError> {
        if !self.is_prefix_of(key, prefix) {
            return Err(KeyError::NotAChild {
                key: key.join(&self.delimiter),
                prefix: prefix.join(&self.delimiter),
            });
        }

        match key.segments().get(prefix.len()) {
            Some(segment) => Ok(self.collapse(segment, infer_ids)),
            None => Err(KeyError::ExactMatch {
                key: key.join(&self.delimiter),
            }),
        }
    }

    /// Returns `prefix` extended by one segment, collapsed if it looks like an id.
    pub fn append(&self, prefix: &Key, segment: &str) -> Result<Key, KeyError> {
        if segment.is_empty() {
            return Err(KeyError::EmptySegment);
        }

        let mut segments = prefix.segments().to_vec();
        segments.push(self.collapse(segment, true));
        Ok(Key(segments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser(delimiter: &str) -> KeyParser {
        KeyParser::new(delimiter, Vec::new())
    }

    fn id_parser() -> KeyParser {
        KeyParser::new(
            ":",
            vec![
                Regex::new("^[0-9]+$").expect("valid regex"),
                Regex::new("^[0-9a-f]{8}-[0-9a-f]{4}$").expect("valid regex"),
            ],
        )
    }

    #[test]
    fn test_tokenize_without_delimiter() {
        let key = parser(":").tokenize("mykey", false);
        assert_eq!(key, Key::from_segments(["mykey"]));
    }

    #[test]
    fn test_tokenize_multiple_segments() {
        let key = parser(":").tokenize("user:123:profile:settings", false);
        assert_eq!(key, Key::from_segments(["user", "123", "profile", "settings"]));
    }

    #[test]
    fn test_tokenize_custom_delimiter() {
        let key = parser("-").tokenize("user-123-profile", false);
        assert_eq!(key, Key::from_segments(["user", "123", "profile"]));
    }

    #[test]
    fn test_tokenize_multi_char_delimiter() {
        let key = parser("::").tokenize("a::b::c", false);
        assert_eq!(key, Key::from_segments(["a", "b", "c"]));
    }

    #[test]
    fn test_tokenize_empty_is_root() {
        assert!(parser(":").tokenize("", true).is_empty());
    }

    #[test]
    fn test_tokenize_infers_ids() {
        let kp = id_parser();
        assert_eq!(
            kp.tokenize("user:42:profile", true),
            Key::from_segments(["user", WILDCARD, "profile"])
        );
        assert_eq!(
            kp.tokenize("user:42:profile", false),
            Key::from_segments(["user", "42", "profile"])
        );
        assert_eq!(
            kp.tokenize("session:deadbeef-0a1b", true),
            Key::from_segments(["session", WILDCARD])
        );
    }

    #[test]
    fn test_tokenize_round_trip() {
        for delimiter in [":", "/", "::", "."] {
            let kp = parser(delimiter);
            let segments = ["orders", "eu", "pending", "x"];
            let raw = segments.join(delimiter);
            let key = kp.tokenize(&raw, true);
            assert_eq!(key.segments(), &segments);
            assert_eq!(kp.tokenize(&key.join(delimiter), true), key);
        }
    }

    #[test]
    fn test_empty_prefix_matches_everything() {
        let kp = id_parser();
        for raw in ["a", "a:b", "user:1:c", ""] {
            assert!(kp.is_prefix_of(&kp.tokenize(raw, false), &Key::root()));
        }
    }

    #[test]
    fn test_longer_prefix_never_matches() {
        let kp = id_parser();
        let key = Key::from_segments(["user"]);
        let prefix = Key::from_segments(["user", "1"]);
        assert!(!kp.is_prefix_of(&key, &prefix));
    }

    #[test]
    fn test_wildcard_prefix_matches_ids() {
        let kp = id_parser();
        let prefix = Key::from_segments(["user", WILDCARD]);
        assert!(kp.is_prefix_of(&Key::from_segments(["user", "42", "x"]), &prefix));
        assert!(kp.is_prefix_of(&Key::from_segments(["user", WILDCARD, "x"]), &prefix));
        assert!(!kp.is_prefix_of(&Key::from_segments(["user", "bob", "x"]), &prefix));
    }

    #[test]
    fn test_namespace_of_root() {
        let kp = id_parser();
        let key = kp.tokenize("user:1", true);
        assert_eq!(kp.namespace_of(&key, &Key::root(), true), Ok("user".to_string()));
    }

    #[test]
    fn test_namespace_of_collapses_ids() {
        let kp = id_parser();
        let key = kp.tokenize("user:1:name", false);
        let prefix = Key::from_segments(["user"]);
        assert_eq!(kp.namespace_of(&key, &prefix, true), Ok(WILDCARD.to_string()));
        assert_eq!(kp.namespace_of(&key, &prefix, false), Ok("1".to_string()));
    }

    #[test]
    fn test_namespace_of_exact_match() {
        let kp = id_parser();
        let key = Key::from_segments(["user", "profile"]);
        let err = kp.namespace_of(&key, &key, true).unwrap_err();
        assert!(matches!(err, KeyError::ExactMatch { .. }));
    }

    #[test]
    fn test_namespace_of_not_a_child() {
        let kp = id_parser();
        let key = Key::from_segments(["order", "1"]);
        let prefix = Key::from_segments(["user"]);
        let err = kp.namespace_of(&key, &prefix, true).unwrap_err();
        assert!(matches!(err, KeyError::NotAChild { .. }));

        let short = Key::from_segments(["user"]);
        let long = Key::from_segments(["user", "a", "b"]);
        let err = kp.namespace_of(&short, &long, true).unwrap_err();
        assert!(matches!(err, KeyError::NotAChild { .. }));
    }

    #[test]
    fn test_append() {
        let kp = id_parser();
        let prefix = kp.append(&Key::root(), "user").expect("non-empty");
        assert_eq!(prefix, Key::from_segments(["user"]));

        let prefix = kp.append(&prefix, "77").expect("non-empty");
        assert_eq!(prefix, Key::from_segments(["user", WILDCARD]));

        assert_eq!(kp.append(&prefix, ""), Err(KeyError::EmptySegment));
    }

    #[test]
    fn test_pop() {
        let key = Key::from_segments(["a", "b"]);
        let popped = key.pop().expect("non-empty");
        assert_eq!(popped, Key::from_segments(["a"]));
        assert!(popped.pop().expect("non-empty").is_empty());
        assert_eq!(Key::root().pop(), Err(KeyError::EmptyKey));
    }
}

//! Request-URI decoding: `+` to space, percent-decoding and query strings.

use percent_encoding::percent_decode_str;

/// Decodes a path or query component.
///
/// `+` becomes a space first, then every `%xy` with two hex digits becomes the
/// byte `0xxy`. A `%` that is not followed by two hex digits is kept as is, so
/// decoding never fails. Decoded bytes that are not valid UTF-8 are replaced
/// with U+FFFD.
///
/// # Examples
///
/// ```
/// use mhttpd::http::decode::unquote;
///
/// assert_eq!(unquote("a+b%20c"), "a b c");
/// assert_eq!(unquote("100%"), "100%");
/// assert_eq!(unquote("%zz"), "%zz");
/// ```
pub fn unquote(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

/// Decoded query parameters in the order they appeared.
///
/// Duplicate keys are all kept; [`Params::get`] returns the last one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    pairs: Vec<(String, String)>,
}

impl Params {
    /// Parses a raw query string (`k=v&k2=v2`, without the leading `?`).
    ///
    /// A segment without `=` yields an empty value.
    pub fn parse(query: &str) -> Self {
        let pairs = query
            .split('&')
            .map(|segment| match segment.split_once('=') {
                Some((key, value)) => (unquote(key), unquote(value)),
                None => (unquote(segment), String::new()),
            })
            .collect();
        Self { pairs }
    }

    /// Returns the value of the last occurrence of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Number of pairs, duplicates included.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Returns `true` when the query had no pairs.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Iterates over every `(key, value)` pair in query order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};

    #[test]
    fn decodes_hex_escapes() {
        assert_eq!(unquote("/a%2Fb"), "/a/b");
        assert_eq!(unquote("%41%62c"), "Abc");
    }

    #[test]
    fn plus_becomes_space() {
        assert_eq!(unquote("/my+file.txt"), "/my file.txt");
        assert_eq!(unquote("%2B"), "+");
    }

    #[test]
    fn malformed_escapes_pass_through() {
        assert_eq!(unquote("%"), "%");
        assert_eq!(unquote("%4"), "%4");
        assert_eq!(unquote("%g1x"), "%g1x");
        assert_eq!(unquote("50%off"), "50%off");
    }

    #[test]
    fn decodes_utf8_sequences() {
        assert_eq!(unquote("caf%C3%A9"), "café");
    }

    #[test]
    fn encode_then_decode_is_identity() {
        for s in ["hello world", "a/b?c=d&e", "ünïcødé ✓", "tab\there", "~*'()!"] {
            let encoded = utf8_percent_encode(s, NON_ALPHANUMERIC).to_string();
            assert_eq!(unquote(&encoded), s, "encoded as {encoded}");
        }
    }

    #[test]
    fn query_pairs() {
        let params = Params::parse("q=rust+lang&page=2&flag");
        assert_eq!(params.get("q"), Some("rust lang"));
        assert_eq!(params.get("page"), Some("2"));
        assert_eq!(params.get("flag"), Some(""));
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn query_value_keeps_extra_equals() {
        let params = Params::parse("expr=a%3Db=c");
        assert_eq!(params.get("expr"), Some("a=b=c"));
    }

    #[test]
    fn duplicate_keys_last_wins_but_order_kept() {
        let params = Params::parse("k=1&x=0&k=2");
        assert_eq!(params.get("k"), Some("2"));
        let keys: Vec<_> = params.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["k", "x", "k"]);
    }

    #[test]
    fn decodes_keys_too() {
        let params = Params::parse("first%20name=Ada");
        assert_eq!(params.get("first name"), Some("Ada"));
    }
}

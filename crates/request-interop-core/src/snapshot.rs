//! The ambient request snapshot
//!
//! A [`Snapshot`] is everything the hosting environment knows about one
//! incoming request: cookies, the raw upload encoding, query params, posted
//! form fields, server metadata, and where the body bytes come from. It is
//! passed explicitly to the request factory; nothing in this crate reads
//! process-global state except [`Snapshot::from_cgi_env`].

use crate::body::BodySource;
use crate::value::{Key, Value, ValueMap};
use indexmap::IndexMap;
use std::io;

/// Flat, ordered map of server metadata (`REQUEST_METHOD`, `HTTP_HOST`, ...)
///
/// Keys keep their original casing.
pub type ServerParams = IndexMap<String, Value>;

/// Raw, loosely-typed description of one incoming request
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Cookie values, possibly nested
    pub cookies: ValueMap,
    /// Raw upload encoding
    pub files: ValueMap,
    /// Query params, possibly nested
    pub query: ValueMap,
    /// Pre-parsed form fields
    pub post: ValueMap,
    /// Server metadata
    pub server: ServerParams,
    /// Where the body bytes are read from
    pub body: BodySource,
}

impl Snapshot {
    /// Create an empty snapshot reading its body from stdin
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cookies
    pub fn cookies(mut self, cookies: ValueMap) -> Self {
        self.cookies = cookies;
        self
    }

    /// Set the raw upload encoding
    pub fn files(mut self, files: ValueMap) -> Self {
        self.files = files;
        self
    }

    /// Set the query params
    pub fn query(mut self, query: ValueMap) -> Self {
        self.query = query;
        self
    }

    /// Set the pre-parsed form fields
    pub fn post(mut self, post: ValueMap) -> Self {
        self.post = post;
        self
    }

    /// Replace the server metadata
    pub fn server(mut self, server: ServerParams) -> Self {
        self.server = server;
        self
    }

    /// Add one server metadata field
    pub fn server_var(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.server.insert(name.into(), value.into());
        self
    }

    /// Set the body source
    pub fn body(mut self, source: impl Into<BodySource>) -> Self {
        self.body = source.into();
        self
    }

    /// Load the snapshot of a CGI request from the process environment
    ///
    /// Form-encoded bodies are read from stdin and parsed into `post`; the
    /// bytes stay available as the request body. At most `CONTENT_LENGTH`
    /// bytes are read.
    pub fn from_cgi_env() -> io::Result<Self> {
        Self::from_cgi(std::env::vars(), BodySource::default())
    }

    /// Build the snapshot of a CGI request from RFC 3875 meta-variables
    ///
    /// Every variable becomes a server field. `QUERY_STRING` and
    /// `HTTP_COOKIE` are parsed with bracket nesting (`a[b][]=1`). When
    /// `CONTENT_TYPE` is `application/x-www-form-urlencoded` the body is read
    /// and parsed into `post`. An unbounded stdin source is capped at
    /// `CONTENT_LENGTH`, or at nothing when that is absent.
    pub fn from_cgi<I, K, V>(vars: I, body: BodySource) -> io::Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let server: ServerParams = vars
            .into_iter()
            .map(|(k, v)| (k.into(), Value::String(v.into())))
            .collect();

        let query = server
            .get("QUERY_STRING")
            .and_then(Value::as_str)
            .map(parse_form)
            .unwrap_or_default();

        let cookies = server
            .get("HTTP_COOKIE")
            .and_then(Value::as_str)
            .map(parse_cookies)
            .unwrap_or_default();

        let is_form = server
            .get("CONTENT_TYPE")
            .and_then(Value::as_str)
            .and_then(|ct| ct.split(';').next())
            .is_some_and(|ct| {
                ct.trim()
                    .eq_ignore_ascii_case("application/x-www-form-urlencoded")
            });

        let body = match body {
            BodySource::Stdin { limit: None } => BodySource::Stdin {
                limit: Some(content_length(&server).unwrap_or(0)),
            },
            body => body,
        };

        let mut snapshot = Snapshot {
            cookies,
            query,
            server,
            body,
            ..Snapshot::default()
        };

        if is_form {
            let bytes = snapshot
                .body
                .open(crate::body::DEFAULT_SPOOL_THRESHOLD)?
                .read_all()?;
            snapshot.post = parse_form(&String::from_utf8_lossy(&bytes));
            snapshot.body = BodySource::Bytes(bytes.into());
        }

        Ok(snapshot)
    }
}

/// Body size announced by the `CONTENT_LENGTH` server field
pub(crate) fn content_length(server: &ServerParams) -> Option<u64> {
    server
        .get("CONTENT_LENGTH")
        .and_then(Value::coerce_int)
        .and_then(|n| u64::try_from(n).ok())
}

/// Parse a form-encoded string into a nested map
///
/// Field names use bracket nesting: `a[b]=1` nests under `a`, `a[]=1`
/// appends at the next integer index.
pub fn parse_form(input: &str) -> ValueMap {
    let mut map = ValueMap::new();

    let pairs: Vec<(String, String)> = match serde_urlencoded::from_str(input) {
        Ok(pairs) => pairs,
        Err(_err) => {
            crate::trace_warn!(error = %_err, "ignoring malformed form data");
            return map;
        }
    };

    for (name, value) in pairs {
        insert_bracketed(&mut map, &name, Value::String(value));
    }
    map
}

fn parse_cookies(header: &str) -> ValueMap {
    let mut map = ValueMap::new();
    for cookie in cookie::Cookie::split_parse(header).flatten() {
        let value = urlencoding::decode(cookie.value())
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| cookie.value().to_string());
        insert_bracketed(&mut map, cookie.name(), Value::String(value));
    }
    map
}

/// Insert `value` under a bracket-nested field name
pub(crate) fn insert_bracketed(map: &mut ValueMap, name: &str, value: Value) {
    let mut segments: Vec<Option<&str>> = Vec::new();

    let base_end = name.find('[').unwrap_or(name.len());
    let (base, mut rest) = name.split_at(base_end);
    if base.is_empty() {
        return;
    }

    while let Some(inner) = rest.strip_prefix('[') {
        match inner.find(']') {
            Some(end) => {
                let segment = &inner[..end];
                segments.push(Some(segment).filter(|s| !s.is_empty()));
                rest = &inner[end + 1..];
            }
            None => break,
        }
    }

    // an unmatched bracket makes the whole name a plain key
    if segments.is_empty() {
        map.insert(Key::from(name), value);
        return;
    }

    let mut path = vec![Some(base)];
    path.extend(segments);
    insert_path(map, &path, value);
}

fn insert_path(map: &mut ValueMap, path: &[Option<&str>], value: Value) {
    let Some((first, rest)) = path.split_first() else {
        return;
    };

    let key = match first {
        Some(name) => Key::from(*name),
        None => next_index(map),
    };

    if rest.is_empty() {
        map.insert(key, value);
        return;
    }

    let child = map
        .entry(key)
        .or_insert_with(|| Value::Map(ValueMap::new()));
    if !matches!(child, Value::Map(_)) {
        *child = Value::Map(ValueMap::new());
    }
    if let Value::Map(child) = child {
        insert_path(child, rest, value);
    }
}

fn next_index(map: &ValueMap) -> Key {
    let next = map
        .keys()
        .filter_map(Key::as_index)
        .max()
        .map_or(0, |max| max + 1);
    Key::Index(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::lookup;
    use crate::value_map;
    use bytes::Bytes;

    #[test]
    fn test_from_cgi_caps_stdin_at_content_length() {
        let snapshot = Snapshot::from_cgi(
            [("REQUEST_METHOD", "POST"), ("CONTENT_LENGTH", "12")],
            BodySource::default(),
        )
        .unwrap();
        assert_eq!(snapshot.body, BodySource::Stdin { limit: Some(12) });

        let snapshot = Snapshot::from_cgi([("REQUEST_METHOD", "GET")], BodySource::default())
            .unwrap();
        assert_eq!(snapshot.body, BodySource::Stdin { limit: Some(0) });

        let snapshot = Snapshot::from_cgi(
            [("CONTENT_LENGTH", "12")],
            BodySource::Stdin { limit: Some(4) },
        )
        .unwrap();
        assert_eq!(snapshot.body, BodySource::Stdin { limit: Some(4) });
    }

    #[test]
    fn test_parse_form_nesting() {
        let map = parse_form("a=1&b[c]=2&b[d][]=x&b[d][]=y&list[]=p&list[]=q");

        assert_eq!(lookup(&map, "a"), Some(&Value::from("1")));
        let b = lookup(&map, "b").unwrap();
        assert_eq!(b.get("c"), Some(&Value::from("2")));
        assert_eq!(b.get("d").and_then(|d| d.get(1)), Some(&Value::from("y")));
        let list = lookup(&map, "list").unwrap().as_map().unwrap();
        assert_eq!(list.keys().cloned().collect::<Vec<_>>(), vec![Key::Index(0), Key::Index(1)]);
    }

    #[test]
    fn test_parse_form_decodes_plus_and_percent() {
        let map = parse_form("greeting=hello+world&sym=%26%3D");
        assert_eq!(lookup(&map, "greeting"), Some(&Value::from("hello world")));
        assert_eq!(lookup(&map, "sym"), Some(&Value::from("&=")));
    }

    #[test]
    fn test_unmatched_bracket_is_plain_key() {
        let map = parse_form("a[b=1");
        assert_eq!(lookup(&map, "a[b"), Some(&Value::from("1")));
    }

    #[test]
    fn test_from_cgi_parses_query_and_cookies() {
        let vars = vec![
            ("REQUEST_METHOD", "GET"),
            ("QUERY_STRING", "page=2&tags[]=rust"),
            ("HTTP_COOKIE", "session=abc%20123; prefs[theme]=dark"),
        ];
        let snapshot = Snapshot::from_cgi(vars, BodySource::default()).unwrap();

        assert_eq!(snapshot.server.get("REQUEST_METHOD"), Some(&Value::from("GET")));
        assert_eq!(lookup(&snapshot.query, "page"), Some(&Value::from("2")));
        assert_eq!(
            lookup(&snapshot.query, "tags").and_then(|t| t.get(0)),
            Some(&Value::from("rust"))
        );
        assert_eq!(lookup(&snapshot.cookies, "session"), Some(&Value::from("abc 123")));
        assert_eq!(
            lookup(&snapshot.cookies, "prefs").and_then(|p| p.get("theme")),
            Some(&Value::from("dark"))
        );
        assert!(snapshot.post.is_empty());
    }

    #[test]
    fn test_from_cgi_reads_form_body() {
        let vars = vec![
            ("REQUEST_METHOD", "POST"),
            ("CONTENT_TYPE", "application/x-www-form-urlencoded; charset=UTF-8"),
        ];
        let body = BodySource::Bytes(Bytes::from_static(b"name=calvin&friend=hobbes"));
        let snapshot = Snapshot::from_cgi(vars, body).unwrap();

        assert_eq!(
            snapshot.post,
            value_map! { "name" => "calvin", "friend" => "hobbes" }
        );
        assert_eq!(
            snapshot.body,
            BodySource::Bytes(Bytes::from_static(b"name=calvin&friend=hobbes"))
        );
    }
}

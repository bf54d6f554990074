//! Content-type parsing and body decoding
//!
//! Decoding never fails loudly: malformed or non-container documents decode
//! to `None`, and callers fall back to an empty map.

use crate::value::{Key, Value, ValueMap};
use quick_xml::events::{BytesStart, Event};
use serde::Deserialize;
use quick_xml::reader::Reader;

/// Extract the media type from a `Content-Type` value
///
/// Parameters after `;` are dropped. The remainder must be exactly
/// `token/token` (no surrounding whitespace) and is lowercased.
///
/// ```
/// use request_interop_core::decode::media_type;
///
/// assert_eq!(media_type("Application/JSON; charset=utf-8").as_deref(), Some("application/json"));
/// assert_eq!(media_type("not a media type"), None);
/// ```
pub fn media_type(content_type: &str) -> Option<String> {
    let essence = content_type.split(';').next().unwrap_or_default();
    let (kind, subtype) = essence.split_once('/')?;

    if is_token(kind) && is_token(subtype) {
        Some(essence.to_ascii_lowercase())
    } else {
        None
    }
}

fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_alphanumeric()
                || matches!(
                    b,
                    b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^'
                        | b'_' | b'`' | b'|' | b'~'
                )
        })
}

/// Decode a JSON body into a map
///
/// Arrays become integer-keyed maps. Scalars, malformed documents, and
/// documents nested deeper than `max_depth` yield `None`. The nesting is
/// measured before parsing, so `max_depth` is the only depth limit applied.
pub fn json(bytes: &[u8], max_depth: usize) -> Option<ValueMap> {
    if json_depth(bytes) > max_depth {
        crate::trace_warn!(max_depth, "ignoring JSON body nested too deeply");
        return None;
    }

    let mut deserializer = serde_json::Deserializer::from_slice(bytes);
    deserializer.disable_recursion_limit();
    let document = serde_json::Value::deserialize(&mut deserializer)
        .and_then(|document| deserializer.end().map(|()| document));

    let document = match document {
        Ok(document) => document,
        Err(_err) => {
            crate::trace_warn!(error = %_err, "ignoring malformed JSON body");
            return None;
        }
    };

    match Value::from(document) {
        Value::Map(map) => Some(map),
        _ => None,
    }
}

/// Deepest array or object nesting in a JSON text, ignoring string contents
fn json_depth(bytes: &[u8]) -> usize {
    let mut depth = 0usize;
    let mut deepest = 0;
    let mut in_string = false;
    let mut escaped = false;

    for &b in bytes {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'[' | b'{' => {
                depth += 1;
                deepest = deepest.max(depth);
            }
            b']' | b'}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }

    deepest
}

/// Decode an XML body into a map
///
/// The root element becomes the map. Child elements are keyed by tag name;
/// repeated siblings collect into an integer-keyed map. Attributes go under
/// `@attributes`. Text-only elements become strings and empty elements
/// become empty maps.
///
/// ```
/// use request_interop_core::decode::xml;
///
/// let map = xml(b"<doc><foo>bar</foo></doc>", 512).unwrap();
/// assert_eq!(map.get::<request_interop_core::Key>(&"foo".into()).and_then(|v| v.as_str()), Some("bar"));
/// ```
pub fn xml(bytes: &[u8], max_depth: usize) -> Option<ValueMap> {
    let root = match parse_xml(bytes, max_depth) {
        Ok(root) => root,
        Err(_err) => {
            crate::trace_warn!(error = %_err, "ignoring malformed XML body");
            return None;
        }
    };

    match root.into_value() {
        Value::Map(map) => Some(map),
        text => {
            let mut map = ValueMap::new();
            map.insert(Key::Index(0), text);
            Some(map)
        }
    }
}

#[derive(Debug, Default)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
    text: String,
}

impl Element {
    fn start(start: &BytesStart<'_>) -> Result<Self, String> {
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| e.to_string())?;
            let value = attr.unescape_value().map_err(|e| e.to_string())?;
            attributes.push((
                String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
                value.into_owned(),
            ));
        }

        Ok(Self {
            name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
            attributes,
            ..Self::default()
        })
    }

    fn into_value(self) -> Value {
        let has_text = !self.text.trim().is_empty();

        if self.children.is_empty() && self.attributes.is_empty() {
            return if has_text {
                Value::String(self.text)
            } else {
                Value::Map(ValueMap::new())
            };
        }

        let mut map = ValueMap::new();

        if !self.attributes.is_empty() {
            let attributes = self
                .attributes
                .into_iter()
                .map(|(k, v)| (Key::from(k), Value::String(v)))
                .collect();
            map.insert(Key::from("@attributes"), Value::Map(attributes));
        }

        if self.children.is_empty() {
            if has_text {
                map.insert(Key::Index(0), Value::String(self.text));
            }
            return Value::Map(map);
        }

        let mut groups: indexmap::IndexMap<String, Vec<Value>> = indexmap::IndexMap::new();
        for child in self.children {
            let name = child.name.clone();
            groups.entry(name).or_default().push(child.into_value());
        }

        for (name, mut values) in groups {
            let value = if values.len() == 1 {
                values.pop().unwrap_or_default()
            } else {
                Value::Map(
                    values
                        .into_iter()
                        .enumerate()
                        .map(|(i, v)| (Key::from(i), v))
                        .collect(),
                )
            };
            map.insert(Key::from(name), value);
        }

        Value::Map(map)
    }
}

fn parse_xml(bytes: &[u8], max_depth: usize) -> Result<Element, String> {
    let mut reader = Reader::from_reader(bytes);
    let mut buf = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(start)) => {
                if root.is_some() {
                    return Err("content after the root element".to_string());
                }
                if stack.len() >= max_depth {
                    return Err(format!("nesting deeper than {}", max_depth));
                }
                stack.push(Element::start(&start)?);
            }
            Ok(Event::Empty(start)) => {
                let element = Element::start(&start)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None if root.is_none() => root = Some(element),
                    None => return Err("content after the root element".to_string()),
                }
            }
            Ok(Event::End(_)) => {
                let element = stack.pop().ok_or("unbalanced end tag")?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => root = Some(element),
                }
            }
            Ok(Event::Text(text)) => {
                if let Some(current) = stack.last_mut() {
                    let text = text.unescape().map_err(|e| e.to_string())?;
                    current.text.push_str(&text);
                }
            }
            Ok(Event::CData(data)) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(data.as_ref()));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(e.to_string()),
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err("unclosed element".to_string());
    }
    root.ok_or_else(|| "document has no root element".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::lookup;
    use crate::value_map;

    #[test]
    fn test_media_type() {
        assert_eq!(media_type("application/json").as_deref(), Some("application/json"));
        assert_eq!(media_type("TEXT/XML;charset=utf-8").as_deref(), Some("text/xml"));
        assert_eq!(
            media_type("application/vnd.api+json").as_deref(),
            Some("application/vnd.api+json")
        );
        assert_eq!(media_type("text/plain ; charset=utf-8"), None);
        assert_eq!(media_type("text"), None);
        assert_eq!(media_type("/json"), None);
        assert_eq!(media_type("text/plain/extra"), None);
        assert_eq!(media_type(""), None);
    }

    #[test]
    fn test_json_object() {
        let map = json(br#"{"foo":"bar","n":1,"nested":{"list":[1,2]}}"#, 512).unwrap();
        assert_eq!(lookup(&map, "foo"), Some(&Value::from("bar")));
        assert_eq!(lookup(&map, "n"), Some(&Value::Int(1)));
        assert_eq!(
            lookup(&map, "nested").and_then(|n| n.get("list")).and_then(|l| l.get(1)),
            Some(&Value::Int(2))
        );
    }

    #[test]
    fn test_json_array_is_index_map() {
        let map = json(b"[\"a\",\"b\"]", 512).unwrap();
        assert_eq!(map, value_map! { 0 => "a", 1 => "b" });
    }

    #[test]
    fn test_json_failures() {
        assert_eq!(json(b"{\"foo\":", 512), None);
        assert_eq!(json(b"\"scalar\"", 512), None);
        assert_eq!(json(b"", 512), None);
        assert_eq!(json(b"[[[1]]]", 2), None);
        assert!(json(b"[[[1]]]", 3).is_some());
        assert_eq!(json(b"{\"a\":1} trailing", 512), None);
    }

    #[test]
    fn test_json_depth_beyond_parser_default() {
        let deep = format!("{}1{}", "[".repeat(200), "]".repeat(200));
        let map = json(deep.as_bytes(), 1000).unwrap();
        assert!(map.contains_key(&Key::Index(0)));
        assert_eq!(json(deep.as_bytes(), 199), None);
        assert!(json(deep.as_bytes(), 200).is_some());
    }

    #[test]
    fn test_json_depth_ignores_brackets_in_strings() {
        assert_eq!(json_depth(br#"{"a":"[[[{{{","b":"\"]"}"#), 1);
        assert_eq!(json_depth(br#"[{"a":[1]},[]]"#), 3);
    }

    #[test]
    fn test_xml_children_and_repeats() {
        let map = xml(
            b"<?xml version=\"1.0\"?><doc><foo>bar</foo><item>a</item><item>b</item><empty/></doc>",
            512,
        )
        .unwrap();

        assert_eq!(lookup(&map, "foo"), Some(&Value::from("bar")));
        assert_eq!(
            lookup(&map, "item"),
            Some(&Value::Map(value_map! { 0 => "a", 1 => "b" }))
        );
        assert_eq!(lookup(&map, "empty"), Some(&Value::Map(ValueMap::new())));
    }

    #[test]
    fn test_xml_attributes() {
        let map = xml(b"<doc id=\"7\"><name lang=\"en\">Bob &amp; co</name></doc>", 512).unwrap();

        assert_eq!(
            lookup(&map, "@attributes"),
            Some(&Value::Map(value_map! { "id" => "7" }))
        );
        let name = lookup(&map, "name").unwrap();
        assert_eq!(name.get(0), Some(&Value::from("Bob & co")));
        assert_eq!(name.get("@attributes").and_then(|a| a.get("lang")), Some(&Value::from("en")));
    }

    #[test]
    fn test_xml_text_root() {
        assert_eq!(xml(b"<doc>bar</doc>", 512), Some(value_map! { 0 => "bar" }));
    }

    #[test]
    fn test_xml_failures() {
        assert_eq!(xml(b"<doc><foo></doc>", 512), None);
        assert_eq!(xml(b"<doc>", 512), None);
        assert_eq!(xml(b"not xml", 512), None);
        assert_eq!(xml(b"", 512), None);
        assert_eq!(xml(b"<a><b><c/></b></a>", 1), None);
    }
}

//! JSON text for structured replies.
//!
//! Replies use `", "` between elements and `": "` after keys, e.g.
//! `{"code": 0, "msg": "hello"}`. Keys come out in the order the value was
//! built (`serde_json` is compiled with `preserve_order`).

use std::io;

use bytes::Bytes;
use serde::Serialize;
use serde_json::ser::Formatter;

#[derive(Debug, Clone, Copy, Default)]
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

/// Serializes `value` to JSON text.
///
/// # Examples
///
/// ```
/// let body = mhttpd::http::json::to_bytes(&serde_json::json!({"code": 0, "msg": "hello"})).unwrap();
/// assert_eq!(&body[..], br#"{"code": 0, "msg": "hello"}"#);
/// ```
pub fn to_bytes<T>(value: &T) -> Result<Bytes, serde_json::Error>
where
    T: ?Sized + Serialize,
{
    let mut out = Vec::with_capacity(128);
    let mut ser = serde_json::Serializer::with_formatter(&mut out, SpacedFormatter);
    value.serialize(&mut ser)?;
    Ok(Bytes::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text(value: serde_json::Value) -> String {
        String::from_utf8(to_bytes(&value).unwrap().to_vec()).unwrap()
    }

    #[test]
    fn keys_keep_construction_order() {
        assert_eq!(text(json!({"msg": "up", "code": 0})), r#"{"msg": "up", "code": 0}"#);
    }

    #[test]
    fn nested_values() {
        assert_eq!(
            text(json!({"code": 0, "data": {"x": [1, 2]}, "empty": {}})),
            r#"{"code": 0, "data": {"x": [1, 2]}, "empty": {}}"#
        );
    }

    #[test]
    fn scalars_and_null() {
        assert_eq!(text(json!(null)), "null");
        assert_eq!(text(json!([true, "a\"b"])), r#"[true, "a\"b"]"#);
    }
}

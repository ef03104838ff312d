//! The uniform response envelope.
//!
//! Every invocation, successful or not, yields a `{statusCode, body}` pair
//! where `body` is JSON text. Downstream consumers of this API were written
//! against a Python implementation, so the body text uses Python's `json.dumps`
//! separators (`", "` and `": "`) rather than serde_json's compact ones.

use serde::Serialize;
use serde_json::{
    json,
    ser::{Formatter, Serializer},
};
use std::io;

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ResponseEnvelope {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: String,
}

/// A 200 envelope wrapping `body`.
pub fn success<T: Serialize + ?Sized>(body: &T) -> ResponseEnvelope {
    ResponseEnvelope {
        status_code: 200,
        body: to_json_text(body),
    }
}

/// An error envelope with body `{"error": message}`.
pub fn error<M: AsRef<str>>(status_code: u16, message: M) -> ResponseEnvelope {
    ResponseEnvelope {
        status_code,
        body: to_json_text(&json!({ "error": message.as_ref() })),
    }
}

/// Serialize a value with spaced separators.
///
/// This never fails for the values we hand it (JSON values, maps with string
/// keys, plain structs); if a serializer error does come up we fall back to
/// `null` rather than let the formatter raise.
pub fn to_json_text<T: Serialize + ?Sized>(value: &T) -> String {
    let mut buf = Vec::with_capacity(128);
    let mut ser = Serializer::with_formatter(&mut buf, SpacedFormatter);

    if value.serialize(&mut ser).is_err() {
        return "null".to_owned();
    }

    // serde_json only ever emits valid UTF-8.
    String::from_utf8(buf).unwrap_or_else(|_| "null".to_owned())
}

struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }
}

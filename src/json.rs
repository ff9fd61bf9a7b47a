//! JSON body decoding with client-facing error text.
//!
//! Parse failures are reported as `malformed or unexpected json: offset N:
//! reason`, where `N` is the number of bytes consumed up to and including
//! the offending one.

use serde::de::DeserializeOwned;
use serde_json::error::Category;

use crate::error::ApiError;

pub(crate) fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| {
        let offset = byte_offset(body, e.line(), e.column());
        ApiError::bad_request(format!(
            "malformed or unexpected json: offset {offset}: {}",
            describe(&e, body, offset)
        ))
    })
}

/// Converts serde_json's 1-based line and byte column into an offset.
fn byte_offset(body: &[u8], line: usize, column: usize) -> usize {
    if line <= 1 {
        return column;
    }
    let line_start = body
        .iter()
        .enumerate()
        .filter(|&(_, b)| *b == b'\n')
        .nth(line - 2)
        .map_or(0, |(i, _)| i + 1);
    line_start + column
}

fn describe(err: &serde_json::Error, body: &[u8], offset: usize) -> String {
    let text = without_position(err);
    match err.classify() {
        Category::Eof => "unexpected end of JSON input".to_owned(),
        Category::Syntax => {
            let context = match text.as_str() {
                "expected value" => "looking for beginning of value",
                "expected `:`" => "after object key",
                "expected `,` or `}`" => "after object key:value pair",
                "expected `,` or `]`" => "after array element",
                "key must be a string" => "looking for beginning of object key string",
                "trailing characters" => "after top-level value",
                "trailing comma" if offending(body, offset) == Some(b'}') => {
                    "looking for beginning of object key string"
                }
                "trailing comma" => "looking for beginning of value",
                "expected ident" => return literal_error(body, offset).unwrap_or(text),
                _ => return text,
            };
            match offending(body, offset) {
                Some(byte) => format!("invalid character {} {context}", quote_byte(byte)),
                None => text,
            }
        }
        Category::Data | Category::Io => text,
    }
}

fn offending(body: &[u8], offset: usize) -> Option<u8> {
    body.get(offset.checked_sub(1)?).copied()
}

/// `invalid character 'x' in literal true (expecting 'e')`
fn literal_error(body: &[u8], offset: usize) -> Option<String> {
    let bad = offset.checked_sub(1)?;
    let byte = *body.get(bad)?;
    let start = body[..bad]
        .iter()
        .rposition(|b| !b.is_ascii_alphabetic())
        .map_or(0, |i| i + 1);
    let literal = match body.get(start)? {
        b't' => "true",
        b'f' => "false",
        b'n' => "null",
        _ => return None,
    };
    let expecting = *literal.as_bytes().get(bad - start)?;
    Some(format!(
        "invalid character {} in literal {literal} (expecting {})",
        quote_byte(byte),
        quote_byte(expecting)
    ))
}

fn without_position(err: &serde_json::Error) -> String {
    let mut text = err.to_string();
    if let Some(at) = text.rfind(" at line ") {
        text.truncate(at);
    }
    text
}

fn quote_byte(byte: u8) -> String {
    match byte {
        b'\'' => r"'\''".to_owned(),
        b'"' => r#"'"'"#.to_owned(),
        0x20..=0x7e => format!("'{}'", byte as char),
        _ => format!(r"'\x{byte:02x}'"),
    }
}

//! Bencode codec.
//!
//! nREPL frames messages as bencode dictionaries. The decoder is streaming:
//! fed a partial buffer it answers `NeedMore` instead of failing, and on
//! success reports how many bytes it consumed so the caller can advance its
//! buffer. Dictionary keys encode in sorted order.

use std::collections::BTreeMap;

/// A bencode value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Integer.
    Int(i64),
    /// UTF-8 string (bencode byte strings; decoded lossily).
    Str(String),
    /// List.
    List(Vec<Value>),
    /// Dictionary with sorted keys.
    Dict(Dict),
}

/// Dictionary payload; `BTreeMap` keeps keys sorted for encoding.
pub type Dict = BTreeMap<String, Value>;

impl Value {
    /// String payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integer payload, if this is an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// List payload, if this is a list.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Dictionary payload, if this is a dictionary.
    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            Value::Dict(dict) => Some(dict),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

/// A list of strings, the shape `status` and friends use.
pub fn list_of_strings<I, S>(items: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Value::List(items.into_iter().map(|s| Value::Str(s.into())).collect())
}

/// Decoder outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    /// A complete value was decoded.
    Ok,
    /// The buffer holds a prefix of a valid value; feed more bytes.
    NeedMore,
    /// The buffer cannot be a bencode value.
    Error,
}

/// Result of one decode attempt.
#[derive(Debug)]
pub struct Decoded {
    /// Outcome.
    pub state: ParseState,
    /// The value, when `state` is `Ok`.
    pub value: Option<Value>,
    /// Bytes consumed, when `state` is `Ok`.
    pub consumed: usize,
    /// Error description, when `state` is `Error`.
    pub error: String,
}

enum ParseErr {
    NeedMore,
    Invalid(String),
}

fn parse(input: &[u8], pos: usize) -> Result<(Value, usize), ParseErr> {
    let Some(&first) = input.get(pos) else {
        return Err(ParseErr::NeedMore);
    };

    match first {
        b'i' => {
            let end = find_byte(input, pos + 1, b'e').ok_or(ParseErr::NeedMore)?;
            let text = std::str::from_utf8(&input[pos + 1..end])
                .map_err(|_| ParseErr::Invalid("non-ASCII integer".to_string()))?;
            let value: i64 = text
                .parse()
                .map_err(|_| ParseErr::Invalid(format!("invalid integer: {}", text)))?;
            Ok((Value::Int(value), end + 1))
        }
        b'0'..=b'9' => {
            let colon = find_byte(input, pos, b':').ok_or(ParseErr::NeedMore)?;
            let len_text = std::str::from_utf8(&input[pos..colon])
                .map_err(|_| ParseErr::Invalid("invalid length".to_string()))?;
            let len: usize = len_text
                .parse()
                .map_err(|_| ParseErr::Invalid(format!("invalid length: {}", len_text)))?;
            let start = colon + 1;
            if input.len() < start + len {
                return Err(ParseErr::NeedMore);
            }
            let text = String::from_utf8_lossy(&input[start..start + len]).into_owned();
            Ok((Value::Str(text), start + len))
        }
        b'l' => {
            let mut items = Vec::new();
            let mut cursor = pos + 1;
            loop {
                match input.get(cursor) {
                    None => return Err(ParseErr::NeedMore),
                    Some(b'e') => return Ok((Value::List(items), cursor + 1)),
                    Some(_) => {
                        let (item, next) = parse(input, cursor)?;
                        items.push(item);
                        cursor = next;
                    }
                }
            }
        }
        b'd' => {
            let mut dict = Dict::new();
            let mut cursor = pos + 1;
            loop {
                match input.get(cursor) {
                    None => return Err(ParseErr::NeedMore),
                    Some(b'e') => return Ok((Value::Dict(dict), cursor + 1)),
                    Some(_) => {
                        let (key, after_key) = parse(input, cursor)?;
                        let Value::Str(key) = key else {
                            return Err(ParseErr::Invalid("dict key must be a string".to_string()));
                        };
                        let (value, next) = parse(input, after_key)?;
                        dict.insert(key, value);
                        cursor = next;
                    }
                }
            }
        }
        other => Err(ParseErr::Invalid(format!(
            "unexpected byte 0x{:02x}",
            other
        ))),
    }
}

fn find_byte(input: &[u8], from: usize, needle: u8) -> Option<usize> {
    input[from.min(input.len())..]
        .iter()
        .position(|&b| b == needle)
        .map(|i| from + i)
}

/// Decode one value from the front of `input`.
pub fn decode(input: &[u8]) -> Decoded {
    match parse(input, 0) {
        Ok((value, consumed)) => Decoded {
            state: ParseState::Ok,
            value: Some(value),
            consumed,
            error: String::new(),
        },
        Err(ParseErr::NeedMore) => Decoded {
            state: ParseState::NeedMore,
            value: None,
            consumed: 0,
            error: String::new(),
        },
        Err(ParseErr::Invalid(error)) => Decoded {
            state: ParseState::Error,
            value: None,
            consumed: 0,
            error,
        },
    }
}

/// Encode a value, appending to `out`.
pub fn encode_value(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Int(i) => {
            out.extend_from_slice(format!("i{}e", i).as_bytes());
        }
        Value::Str(s) => {
            out.extend_from_slice(format!("{}:", s.len()).as_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        Value::List(items) => {
            out.push(b'l');
            for item in items {
                encode_value(item, out);
            }
            out.push(b'e');
        }
        Value::Dict(dict) => {
            out.push(b'd');
            for (key, item) in dict {
                encode_value(&Value::Str(key.clone()), out);
                encode_value(item, out);
            }
            out.push(b'e');
        }
    }
}

/// Encode a dictionary to bytes.
pub fn encode_dict(dict: &Dict) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    encode_value(&Value::Dict(dict.clone()), &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_ok(input: &[u8]) -> (Value, usize) {
        let decoded = decode(input);
        assert_eq!(decoded.state, ParseState::Ok, "error: {}", decoded.error);
        (decoded.value.unwrap(), decoded.consumed)
    }

    #[test]
    fn test_round_trip_dict() {
        let mut dict = Dict::new();
        dict.insert("op".to_string(), "eval".into());
        dict.insert("code".to_string(), "(+ 1 2)".into());
        dict.insert("n".to_string(), Value::Int(-7));
        dict.insert(
            "status".to_string(),
            list_of_strings(["done", "error"]),
        );

        let encoded = encode_dict(&dict);
        let (value, consumed) = decode_ok(&encoded);
        assert_eq!(consumed, encoded.len());
        assert_eq!(value, Value::Dict(dict));
    }

    #[test]
    fn test_keys_encode_sorted() {
        let mut dict = Dict::new();
        dict.insert("zz".to_string(), Value::Int(1));
        dict.insert("aa".to_string(), Value::Int(2));
        let encoded = encode_dict(&dict);
        let text = String::from_utf8(encoded).unwrap();
        assert!(text.find("aa").unwrap() < text.find("zz").unwrap());
    }

    #[test]
    fn test_partial_input_needs_more() {
        let full = b"d2:op4:evale";
        for cut in 1..full.len() {
            let decoded = decode(&full[..cut]);
            assert_eq!(
                decoded.state,
                ParseState::NeedMore,
                "prefix of length {} should need more",
                cut
            );
        }
        let (value, _) = decode_ok(full);
        assert_eq!(
            value.as_dict().unwrap().get("op").unwrap().as_str(),
            Some("eval")
        );
    }

    #[test]
    fn test_trailing_bytes_reported_via_consumed() {
        let input = b"i42ed2:op4:pinge";
        let (value, consumed) = decode_ok(input);
        assert_eq!(value, Value::Int(42));
        assert_eq!(consumed, 4);
        let (next, _) = decode_ok(&input[consumed..]);
        assert!(next.as_dict().is_some());
    }

    #[test]
    fn test_invalid_input_is_error() {
        assert_eq!(decode(b"x").state, ParseState::Error);
        assert_eq!(decode(b"ixyze").state, ParseState::Error);
    }

    #[test]
    fn test_negative_integer() {
        let (value, _) = decode_ok(b"i-12e");
        assert_eq!(value, Value::Int(-12));
    }

    #[test]
    fn test_nested_structures() {
        let (value, _) = decode_ok(b"d4:listl1:a1:be1:md1:k1:vee");
        let dict = value.as_dict().unwrap();
        assert_eq!(dict.get("list").unwrap().as_list().unwrap().len(), 2);
        assert!(dict.get("m").unwrap().as_dict().is_some());
    }
}

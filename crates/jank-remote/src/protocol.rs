//! Wire protocol for the compile server.
//!
//! Newline-delimited UTF-8 JSON objects over a single TCP stream. Message
//! shapes are fixed, so fields are read with a key-by-key scanner instead
//! of a general JSON parser: a key is a quoted string followed by a colon,
//! which is what keeps key searches from matching string values. Object
//! payloads are base64; decoding is permissive (padding optional, scan
//! stops at the first non-alphabet character) so truncated payloads degrade
//! predictably.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

/// Default compile-server port.
pub const DEFAULT_COMPILE_PORT: u16 = 5559;

/// Failure classification carried in `error` responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Socket failed to open, dropped mid-exchange, or timed out.
    Connection,
    /// Analyzer, codegen, or toolchain rejection.
    Compile,
    /// Evaluation failure on the peer.
    Runtime,
    /// Malformed message, id mismatch, unknown op.
    Protocol,
}

impl ErrorKind {
    /// Wire label.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Compile => "compile",
            ErrorKind::Runtime => "runtime",
            ErrorKind::Protocol => "protocol",
        }
    }

    /// Parse a wire label; unknown labels classify as runtime.
    pub fn parse(label: &str) -> Self {
        match label {
            "connection" => ErrorKind::Connection,
            "compile" => ErrorKind::Compile,
            "protocol" => ErrorKind::Protocol,
            _ => ErrorKind::Runtime,
        }
    }
}

/// Response to a `compile` request.
#[derive(Debug, Clone, Default)]
pub struct CompileResponse {
    /// Echoed request id.
    pub id: i64,
    /// Whether compilation succeeded.
    pub success: bool,
    /// Entry symbol of the compiled object.
    pub entry_symbol: String,
    /// Relocatable object bytes.
    pub object_data: Vec<u8>,
    /// Error message on failure.
    pub error: String,
    /// Failure classification.
    pub error_type: Option<ErrorKind>,
}

/// One compiled module in a `required` response.
#[derive(Debug, Clone, Default)]
pub struct CompiledModule {
    /// Module name.
    pub name: String,
    /// Entry symbol.
    pub entry_symbol: String,
    /// Object bytes.
    pub object_data: Vec<u8>,
}

/// Response to a `require` request.
#[derive(Debug, Clone, Default)]
pub struct RequireResponse {
    /// Echoed request id.
    pub id: i64,
    /// Whether the namespace loaded.
    pub success: bool,
    /// Compiled modules, dependency-first.
    pub modules: Vec<CompiledModule>,
    /// Error message on failure.
    pub error: String,
    /// Failure classification.
    pub error_type: Option<ErrorKind>,
}

/// Response to a `native-source` request.
#[derive(Debug, Clone, Default)]
pub struct NativeSourceResponse {
    /// Echoed request id.
    pub id: i64,
    /// Whether generation succeeded.
    pub success: bool,
    /// Generated native source.
    pub source: String,
    /// Error message on failure.
    pub error: String,
}

/// Escape a string for inclusion in a JSON string literal.
pub fn escape_json(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 16);
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out
}

/// Position just past `"key"` when it appears as a key (followed by a
/// colon), not as a string value.
fn find_key(json: &str, key: &str) -> Option<usize> {
    let needle = format!("\"{}\"", key);
    let bytes = json.as_bytes();
    let mut from = 0;
    while let Some(at) = json[from..].find(&needle) {
        let mut after = from + at + needle.len();
        while after < bytes.len() && (bytes[after] == b' ' || bytes[after] == b'\t') {
            after += 1;
        }
        if after < bytes.len() && bytes[after] == b':' {
            return Some(after + 1);
        }
        from += at + 1;
    }
    None
}

/// Extract a string field, decoding the `\n \r \t \" \\` escapes. Returns
/// an empty string when the key is absent.
pub fn json_str(json: &str, key: &str) -> String {
    let Some(after_colon) = find_key(json, key) else {
        return String::new();
    };
    let bytes = json.as_bytes();
    let Some(open) = json[after_colon..].find('"').map(|i| after_colon + i) else {
        return String::new();
    };

    let mut out = String::new();
    let mut i = open + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => break,
            b'\\' if i + 1 < bytes.len() => {
                match bytes[i + 1] {
                    b'n' => out.push('\n'),
                    b'r' => out.push('\r'),
                    b't' => out.push('\t'),
                    b'"' => out.push('"'),
                    b'\\' => out.push('\\'),
                    other => {
                        out.push('\\');
                        out.push(other as char);
                    }
                }
                i += 2;
                continue;
            }
            _ => {
                // Multi-byte UTF-8 sequences pass through untouched.
                let ch_start = i;
                let mut ch_end = i + 1;
                while ch_end < bytes.len() && !json.is_char_boundary(ch_end) {
                    ch_end += 1;
                }
                out.push_str(&json[ch_start..ch_end]);
                i = ch_end;
                continue;
            }
        }
    }
    out
}

/// Extract an integer field; absent or malformed keys read as 0.
pub fn json_int(json: &str, key: &str) -> i64 {
    let Some(after_colon) = find_key(json, key) else {
        return 0;
    };
    let rest = json[after_colon..].trim_start();
    let end = rest
        .char_indices()
        .take_while(|(i, c)| c.is_ascii_digit() || (*i == 0 && *c == '-'))
        .map(|(i, c)| i + c.len_utf8())
        .last()
        .unwrap_or(0);
    rest[..end].parse().unwrap_or(0)
}

/// Extract the raw text of an array field (content between brackets).
pub fn json_array_body<'a>(json: &'a str, key: &str) -> Option<&'a str> {
    let after_colon = find_key(json, key)?;
    let open = json[after_colon..].find('[')? + after_colon;
    let close = json.rfind(']')?;
    (close > open).then(|| &json[open + 1..close])
}

/// Encode bytes as RFC 4648 §4 base64.
pub fn base64_encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

const fn build_decode_table() -> [i8; 256] {
    let mut table = [-1i8; 256];
    let alphabet = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut i = 0;
    while i < 64 {
        table[alphabet[i] as usize] = i as i8;
        i += 1;
    }
    table
}

static DECODE_TABLE: [i8; 256] = build_decode_table();

/// Decode base64 permissively: padding is optional and scanning stops at
/// the first non-alphabet character.
pub fn base64_decode(encoded: &str) -> Vec<u8> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len() / 4 * 3);

    let mut i = 0;
    while i + 3 < bytes.len() {
        let a = DECODE_TABLE[bytes[i] as usize];
        let b = DECODE_TABLE[bytes[i + 1] as usize];
        let c = DECODE_TABLE[bytes[i + 2] as usize];
        let d = DECODE_TABLE[bytes[i + 3] as usize];

        if a < 0 || b < 0 {
            break;
        }
        out.push(((a as u8) << 2) | ((b as u8) >> 4));
        if c >= 0 {
            out.push((((b as u8) & 0x0f) << 4) | ((c as u8) >> 2));
            if d >= 0 {
                out.push((((c as u8) & 0x03) << 6) | (d as u8));
            }
        }
        i += 4;
    }

    // Unpadded tail group.
    let tail = &bytes[i..];
    if tail.len() >= 2 {
        let a = DECODE_TABLE[tail[0] as usize];
        let b = DECODE_TABLE[tail[1] as usize];
        if a >= 0 && b >= 0 {
            out.push(((a as u8) << 2) | ((b as u8) >> 4));
            if tail.len() >= 3 {
                let c = DECODE_TABLE[tail[2] as usize];
                if c >= 0 {
                    out.push((((b as u8) & 0x0f) << 4) | ((c as u8) >> 2));
                }
            }
        }
    }

    out
}

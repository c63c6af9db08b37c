//! Lenient JSON repair for model-emitted tool arguments.
//!
//! Models produce almost-JSON: unterminated strings, trailing prose after
//! the closing brace, single quotes, Python literals. The pipeline applies
//! structural fixes, then standard JSON, then JSON5, then keyword fixes.
//! It is conservative: argument *content* is never rewritten, and an input
//! that already parses is returned untouched.

use serde_json::Value;

/// Parse a raw argument string, repairing common model mistakes.
///
/// Returns the parsed value, or the last parse error message when every
/// strategy fails.
pub fn robust_parse(raw: &str) -> Result<Value, String> {
    let pre = preprocess(raw);

    match serde_json::from_str(&pre) {
        Ok(v) => return Ok(v),
        Err(e) => {
            tracing::debug!(error = %e, "standard JSON parse failed, trying JSON5");
        }
    }

    // JSON5 tolerates single quotes, unquoted keys, and trailing commas.
    match json5::from_str(&pre) {
        Ok(v) => return Ok(v),
        Err(e) => {
            tracing::debug!(error = %e, "JSON5 parse failed, trying keyword fixes");
        }
    }

    // Python literals leaking through: None/True/False at word boundaries.
    let fixed = fix_python_keywords(&pre);
    if let Ok(v) = serde_json::from_str(&fixed) {
        return Ok(v);
    }
    json5::from_str(&fixed).map_err(|e| e.to_string())
}

/// Structural preprocessing: close unterminated string values, then cut
/// trailing garbage after the first balanced top-level value.
pub fn preprocess(raw: &str) -> String {
    let fixed = fix_unterminated_strings(raw);
    smart_truncate(&fixed)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Structural fixes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Truncate at the end of the first complete top-level `{...}` or `[...]`,
/// ignoring braces inside strings. Non-object inputs pass through.
fn smart_truncate(s: &str) -> String {
    let bytes = s.as_bytes();
    let start = match bytes.iter().position(|b| !b.is_ascii_whitespace()) {
        Some(i) => i,
        None => return s.to_string(),
    };

    let (open, close) = match bytes[start] {
        b'{' => (b'{', b'}'),
        b'[' => (b'[', b']'),
        _ => return s.to_string(),
    };

    let mut depth = 0i64;
    let mut in_string = false;
    let mut escape = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if escape {
            escape = false;
            continue;
        }
        match b {
            b'\\' => escape = true,
            b'"' => in_string = !in_string,
            _ if in_string => {}
            _ if b == open => depth += 1,
            _ if b == close => {
                depth -= 1;
                if depth == 0 {
                    return s[..=i].to_string();
                }
            }
            _ => {}
        }
    }
    s.to_string()
}

/// Close a string value that runs to the end of input.
///
/// Looks for `"key": "` openings whose value never finds an unescaped
/// closing quote positioned before `,`, `}` or `]`. When found, a quote is
/// inserted before the trailing close brace/bracket (plus any missing
/// closers), or appended as `"}` when no closer exists.
fn fix_unterminated_strings(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut i = 0usize;

    while i < bytes.len() {
        // Find the next `"key"` `:` `"` opening.
        let Some(value_start) = find_value_opening(bytes, i) else {
            return s.to_string();
        };

        // Scan the value for a properly positioned closing quote.
        let mut j = value_start;
        let mut escape = false;
        let mut closed = false;
        while j < bytes.len() {
            let b = bytes[j];
            if escape {
                escape = false;
            } else if b == b'\\' {
                escape = true;
            } else if b == b'"' {
                let mut k = j + 1;
                while k < bytes.len() && bytes[k].is_ascii_whitespace() {
                    k += 1;
                }
                if k >= bytes.len() || matches!(bytes[k], b',' | b'}' | b']') {
                    closed = true;
                    break;
                }
                // Embedded quote followed by prose; keep scanning.
            }
            j += 1;
        }

        if closed {
            i = j + 1;
            continue;
        }

        // Unterminated value: close it at the best position available.
        let mut end = s.len();
        while end > 0 && bytes[end - 1].is_ascii_whitespace() {
            end -= 1;
        }
        if end > 0 && matches!(bytes[end - 1], b'}' | b']') {
            let mut fixed = format!("{}\"{}", &s[..end - 1], &s[end - 1..]);
            balance_closers(&mut fixed);
            return fixed;
        }
        let mut tail = end;
        while tail > value_start && bytes[tail - 1].is_ascii_whitespace() {
            tail -= 1;
        }
        return format!("{}\"}}", &s[..tail]);
    }

    s.to_string()
}

/// Byte offset just past the opening quote of the next string *value*
/// (`"key" : "` pattern), starting the search at `from`.
fn find_value_opening(bytes: &[u8], from: usize) -> Option<usize> {
    let mut i = from;
    while i < bytes.len() {
        if bytes[i] != b'"' {
            i += 1;
            continue;
        }
        // Parse a quoted key.
        let mut j = i + 1;
        let mut escape = false;
        while j < bytes.len() {
            let b = bytes[j];
            if escape {
                escape = false;
            } else if b == b'\\' {
                escape = true;
            } else if b == b'"' {
                break;
            }
            j += 1;
        }
        if j >= bytes.len() {
            return None;
        }
        // Expect `: "` after the key.
        let mut k = j + 1;
        while k < bytes.len() && bytes[k].is_ascii_whitespace() {
            k += 1;
        }
        if k < bytes.len() && bytes[k] == b':' {
            k += 1;
            while k < bytes.len() && bytes[k].is_ascii_whitespace() {
                k += 1;
            }
            if k < bytes.len() && bytes[k] == b'"' {
                return Some(k + 1);
            }
        }
        i = j + 1;
    }
    None
}

/// Append missing `}` / `]` so the brace counts balance (outside strings).
fn balance_closers(s: &mut String) {
    let mut curly = 0i64;
    let mut square = 0i64;
    let mut in_string = false;
    let mut escape = false;
    for b in s.bytes() {
        if escape {
            escape = false;
            continue;
        }
        match b {
            b'\\' => escape = true,
            b'"' => in_string = !in_string,
            _ if in_string => {}
            b'{' => curly += 1,
            b'}' => curly -= 1,
            b'[' => square += 1,
            b']' => square -= 1,
            _ => {}
        }
    }
    for _ in 0..curly.max(0) {
        s.push('}');
    }
    for _ in 0..square.max(0) {
        s.push(']');
    }
}

fn fix_python_keywords(s: &str) -> String {
    use std::sync::OnceLock;
    static NONE: OnceLock<regex::Regex> = OnceLock::new();
    static TRUE: OnceLock<regex::Regex> = OnceLock::new();
    static FALSE: OnceLock<regex::Regex> = OnceLock::new();

    let none = NONE.get_or_init(|| regex::Regex::new(r"\bNone\b").unwrap());
    let tru = TRUE.get_or_init(|| regex::Regex::new(r"\bTrue\b").unwrap());
    let fls = FALSE.get_or_init(|| regex::Regex::new(r"\bFalse\b").unwrap());

    let s = none.replace_all(s, "null");
    let s = tru.replace_all(&s, "true");
    fls.replace_all(&s, "false").into_owned()
}

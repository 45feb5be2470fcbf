//! Provenance tree <-> key
//!
//! `.` binds a trailing join id to everything on its left and `:` binds a
//! leading aggregation id to everything on its right. Parentheses appear only
//! where the derivation type changes, so long single-type chains stay short:
//!
//! | tree                          | key        |
//! |-------------------------------|------------|
//! | root 2                        | `2`        |
//! | join 0 of root 2              | `2.0`      |
//! | aggregation 1 of root 2       | `1:2`      |
//! | join 3 of aggregation `1:2`   | `(1:2).3`  |
//! | aggregation 4 of join `2.0`   | `4:(2.0)`  |

use contracts::{ProvenanceKind, ProvenanceNode, UNKNOWN_ID};

use crate::error::KeyError;

/// Extensions that may trail a stored key
const EXTENSIONS: [&str; 2] = [".json", ".gz"];

/// Root id spelling for `UNKNOWN_ID`
const UNKNOWN_LITERAL: &str = "None";

/// Encode a provenance tree as a key
pub fn encode(node: &ProvenanceNode) -> String {
    let mut out = String::new();
    write_node(node, &mut out);
    out
}

fn write_node(node: &ProvenanceNode, out: &mut String) {
    let Some(derivation) = &node.derivation else {
        write_id(node.id, out);
        return;
    };

    let grouped = derivation
        .source
        .kind()
        .is_some_and(|source_kind| source_kind != derivation.kind);

    match derivation.kind {
        ProvenanceKind::Join => {
            write_source(&derivation.source, grouped, out);
            out.push('.');
            write_id(node.id, out);
        }
        ProvenanceKind::Aggregation => {
            write_id(node.id, out);
            out.push(':');
            write_source(&derivation.source, grouped, out);
        }
    }
}

fn write_source(source: &ProvenanceNode, grouped: bool, out: &mut String) {
    if grouped {
        out.push('(');
        write_node(source, out);
        out.push(')');
    } else {
        write_node(source, out);
    }
}

fn write_id(id: i64, out: &mut String) {
    if id == UNKNOWN_ID {
        out.push_str(UNKNOWN_LITERAL);
    } else {
        out.push_str(&id.to_string());
    }
}

/// Drop a trailing storage extension (`12.3.json` -> `12.3`)
pub fn strip_extension(key: &str) -> &str {
    EXTENSIONS
        .iter()
        .filter_map(|ext| key.find(ext))
        .min()
        .map_or(key, |pos| &key[..pos])
}

/// Decode a key into its provenance tree
///
/// # Errors
/// `KeyError` if the key is not something `encode` could have produced
/// (modulo a trailing extension and redundant outer parentheses).
pub fn decode(key: &str) -> Result<ProvenanceNode, KeyError> {
    let text = strip_extension(key);
    parse(text, key)
}

fn parse(text: &str, key: &str) -> Result<ProvenanceNode, KeyError> {
    if text.is_empty() {
        return Err(KeyError::empty_segment(key));
    }

    if let Some(inner) = enclosed(text, key)? {
        return parse(inner, key);
    }

    let delimiters = scan_top_level(text, key)?;

    if let Some(pos) = delimiters.first_colon {
        let id = parse_id(&text[..pos], key)?;
        let source = parse(&text[pos + 1..], key)?;
        return Ok(ProvenanceNode::derived(
            id,
            ProvenanceKind::Aggregation,
            source,
        ));
    }

    if let Some(pos) = delimiters.last_dot {
        let source = parse(&text[..pos], key)?;
        let id = parse_id(&text[pos + 1..], key)?;
        return Ok(ProvenanceNode::derived(id, ProvenanceKind::Join, source));
    }

    parse_id(text, key).map(ProvenanceNode::root)
}

/// Inner text if `text` is one parenthesized group
fn enclosed<'a>(text: &'a str, key: &str) -> Result<Option<&'a str>, KeyError> {
    if !text.starts_with('(') {
        return Ok(None);
    }

    let mut depth = 0usize;
    for (pos, byte) in text.bytes().enumerate() {
        match byte {
            b'(' => depth += 1,
            b')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| KeyError::unbalanced(key))?;
                if depth == 0 {
                    return Ok((pos == text.len() - 1).then(|| &text[1..pos]));
                }
            }
            _ => {}
        }
    }
    Err(KeyError::unbalanced(key))
}

struct TopLevel {
    first_colon: Option<usize>,
    last_dot: Option<usize>,
}

/// Delimiter positions outside any parentheses
fn scan_top_level(text: &str, key: &str) -> Result<TopLevel, KeyError> {
    let mut depth = 0usize;
    let mut found = TopLevel {
        first_colon: None,
        last_dot: None,
    };

    for (pos, byte) in text.bytes().enumerate() {
        match byte {
            b'(' => depth += 1,
            b')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| KeyError::unbalanced(key))?;
            }
            b':' if depth == 0 => {
                found.first_colon.get_or_insert(pos);
            }
            b'.' if depth == 0 => found.last_dot = Some(pos),
            _ => {}
        }
    }

    if depth != 0 {
        return Err(KeyError::unbalanced(key));
    }
    Ok(found)
}

fn parse_id(text: &str, key: &str) -> Result<i64, KeyError> {
    if text.is_empty() {
        return Err(KeyError::empty_segment(key));
    }
    if text == UNKNOWN_LITERAL {
        return Ok(UNKNOWN_ID);
    }

    let digits = text.strip_prefix('-').unwrap_or(text);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(KeyError::invalid_id(key, text));
    }
    text.parse().map_err(|_| KeyError::invalid_id(key, text))
}

/// Key of the record this one was derived from, `None` for a root
///
/// # Errors
/// `KeyError` if `key` does not decode.
pub fn parent_key(key: &str) -> Result<Option<String>, KeyError> {
    Ok(decode(key)?.source().map(encode))
}

/// Id of the last derivation step
///
/// # Errors
/// `KeyError` if `key` does not decode.
pub fn child_id(key: &str) -> Result<i64, KeyError> {
    Ok(decode(key)?.id)
}

/// Minimal structural check for keys entering the pipeline
///
/// # Errors
/// `KeyError` if `key` does not decode.
pub fn validate(key: &str) -> Result<(), KeyError> {
    decode(key).map(|_| ())
}

/// Whether `key` is `ancestor` or was derived from it
///
/// Keys that do not decode never match.
pub fn derives_from(key: &str, ancestor: &str) -> bool {
    let ancestor = strip_extension(ancestor);
    let Ok(node) = decode(key) else {
        return false;
    };

    let mut current = Some(&node);
    while let Some(step) = current {
        if encode(step) == ancestor {
            return true;
        }
        current = step.source();
    }
    false
}

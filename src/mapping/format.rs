//! Mapping resource format
//!
//! The mapping is stored as `.properties` text with one group of keys per
//! project: `project.<N>.name` and `project.<N>.path`. Groups are re-derived
//! by pattern on every load and visited in numeric index order, which decides
//! who keeps a duplicated name.

use super::PathMapping;
use crate::types::folder_prefix;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::warn;

const HEADER: &str = "# Project path mapping. Generated; edits are overwritten on the next save.";

fn project_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^project\.(\d+)\.\w+$").expect("valid project key pattern"))
}

/// Parse `.properties` text into ordered key/value pairs.
///
/// Supports `#`/`!` comments, `=`, `:` or whitespace separators, line
/// continuations and the usual backslash escapes. Later keys win.
pub fn parse_properties(text: &str) -> BTreeMap<String, String> {
    let mut props = BTreeMap::new();
    let mut lines = text.lines();
    while let Some(line) = lines.next() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
            continue;
        }

        let mut logical = trimmed.to_string();
        while ends_with_continuation(&logical) {
            logical.pop();
            match lines.next() {
                Some(next) => logical.push_str(next.trim_start()),
                None => break,
            }
        }

        let (key, value) = split_key_value(&logical);
        props.insert(unescape(key), unescape(value));
    }
    props
}

fn ends_with_continuation(line: &str) -> bool {
    line.chars().rev().take_while(|c| *c == '\\').count() % 2 == 1
}

fn split_key_value(line: &str) -> (&str, &str) {
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '=' | ':' => return (&line[..i], line[i + 1..].trim_start()),
            c if c.is_whitespace() => {
                let rest = line[i..].trim_start();
                let rest = rest
                    .strip_prefix('=')
                    .or_else(|| rest.strip_prefix(':'))
                    .unwrap_or(rest);
                return (&line[..i], rest.trim_start());
            }
            _ => {}
        }
    }
    (line, "")
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\u{000C}'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push_str("\\u");
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

fn escape(raw: &str, is_key: bool) -> String {
    let mut out = String::with_capacity(raw.len());
    for (i, c) in raw.chars().enumerate() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '=' | ':' => {
                out.push('\\');
                out.push(c);
            }
            '#' | '!' if i == 0 => {
                out.push('\\');
                out.push(c);
            }
            ' ' if is_key || i == 0 => out.push_str("\\ "),
            c => out.push(c),
        }
    }
    out
}

/// Render ordered key/value pairs as `.properties` text
pub fn write_properties<'a>(
    header: Option<&str>,
    pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> String {
    let mut out = String::new();
    if let Some(header) = header {
        out.push_str(header);
        out.push('\n');
    }
    for (key, value) in pairs {
        out.push_str(&escape(key, true));
        out.push('=');
        out.push_str(&escape(value, false));
        out.push('\n');
    }
    out
}

/// Decode a mapping resource. External names are placed under `base_folder`.
pub fn decode_mapping(text: &str, base_folder: &str) -> PathMapping {
    let base = folder_prefix(base_folder);
    let props = parse_properties(text);
    // Keyed by the numeric index so project.10 sorts after project.2
    let mut groups = BTreeMap::new();
    for key in props.keys() {
        if let Some(captures) = project_key_pattern().captures(key) {
            if let Ok(index) = captures[1].parse::<u64>() {
                groups.insert(index, captures[1].to_string());
            }
        }
    }

    let mut mapping = PathMapping::new();
    for digits in groups.into_values() {
        let name = props.get(&format!("project.{}.name", digits));
        let path = props.get(&format!("project.{}.path", digits));
        if let (Some(name), Some(path)) = (name, path) {
            let path = path.strip_suffix('/').unwrap_or(path);
            mapping.insert_unique(&format!("{}{}", base, name), path);
        }
    }
    mapping
}

/// Encode a mapping resource, writing names relative to `base_folder`
pub fn encode_mapping(mapping: &PathMapping, base_folder: &str) -> String {
    let base = folder_prefix(base_folder);
    let mut keys = Vec::new();
    let mut index = 1;
    for (external, internal) in mapping.iter() {
        let name = match external.strip_prefix(base.as_str()) {
            Some(name) if !name.is_empty() => name,
            _ => {
                warn!("Skip mapping for {} to {}", external, internal);
                continue;
            }
        };
        keys.push((format!("project.{}.name", index), name.to_string()));
        keys.push((format!("project.{}.path", index), internal.to_string()));
        index += 1;
    }
    write_properties(
        Some(HEADER),
        keys.iter().map(|(k, v)| (k.as_str(), v.as_str())),
    )
}

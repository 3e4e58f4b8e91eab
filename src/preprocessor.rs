//! Preprocessor shim.
//!
//! Supports exactly two directive shapes, the ones the corpus uses:
//! `#include "path"` (textual splice, relative to the including file's
//! directory, with a cycle guard) and a single-line function-like
//! `#define NAME(p1, p2, ...) body` with the `#param` stringify operator.
//! Anything fancier (object macros, `#ifdef`, token pasting) is simply not
//! recognized as a directive and passes through unchanged, which is fine:
//! nothing in scope ever emits one.

use crate::error::{CompileError, Result};
use crate::lexer::{is_ident_continue, is_ident_start};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

struct Macro {
    params: Vec<String>,
    body: String,
}

/// Reads `path` and returns the fully include-expanded, macro-expanded
/// source text, ready for the scanner.
pub fn preprocess(path: &Path) -> Result<String> {
    let mut macros = HashMap::new();
    let mut stack = Vec::new();
    let mut out = String::new();
    expand_file(path, &mut macros, &mut stack, &mut out)?;
    Ok(out)
}

fn expand_file(
    path: &Path,
    macros: &mut HashMap<String, Macro>,
    stack: &mut Vec<PathBuf>,
    out: &mut String,
) -> Result<()> {
    let canonical = path
        .canonicalize()
        .map_err(|e| CompileError::io(path, e.to_string()))?;
    if stack.contains(&canonical) {
        return Err(CompileError::io(path, "circular #include"));
    }
    let text =
        std::fs::read_to_string(path).map_err(|e| CompileError::io(path, e.to_string()))?;
    stack.push(canonical);

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    for line in text.lines() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("#include") {
            let included = parse_include_path(rest)
                .ok_or_else(|| CompileError::io(path, "malformed #include directive"))?;
            expand_file(&dir.join(included), macros, stack, out)?;
        } else if let Some(rest) = trimmed.strip_prefix("#define") {
            let (name, mac) = parse_define(rest)
                .ok_or_else(|| CompileError::io(path, "malformed #define directive"))?;
            macros.insert(name, mac);
            out.push('\n');
        } else {
            out.push_str(&expand_invocations(line, macros));
            out.push('\n');
        }
    }

    stack.pop();
    Ok(())
}

fn parse_include_path(rest: &str) -> Option<&str> {
    let rest = rest.trim_start();
    let rest = rest.strip_prefix('"')?;
    let end = rest.find('"')?;
    Some(&rest[..end])
}

/// Parses `NAME(p1, p2) body` (the text after `#define`) into a macro
/// name and definition.
fn parse_define(rest: &str) -> Option<(String, Macro)> {
    let rest = rest.trim_start();
    let name_end = rest.find(|c: char| !is_ident_continue(c as u8))?;
    let name = rest[..name_end].to_string();
    let rest = rest[name_end..].trim_start();
    let rest = rest.strip_prefix('(')?;
    let close = rest.find(')')?;
    let params: Vec<String> = rest[..close]
        .split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    let body = rest[close + 1..].trim().to_string();
    Some((name, Macro { params, body }))
}

/// Finds every call-shaped use of a registered macro in `line` and expands
/// it. Runs to a fixed point so a macro body that itself names another
/// macro (not exercised by the corpus, but cheap to support) also expands.
fn expand_invocations(line: &str, macros: &HashMap<String, Macro>) -> String {
    let mut current = line.to_string();
    loop {
        let (expanded, changed) = expand_once(&current, macros);
        if !changed {
            return expanded;
        }
        current = expanded;
    }
}

fn expand_once(line: &str, macros: &HashMap<String, Macro>) -> (String, bool) {
    let bytes = line.as_bytes();
    let mut out = String::new();
    let mut i = 0;
    let mut changed = false;
    while i < bytes.len() {
        let c = bytes[i];
        if is_ident_start(c) {
            let start = i;
            while i < bytes.len() && is_ident_continue(bytes[i]) {
                i += 1;
            }
            let name = &line[start..i];
            let mut j = i;
            while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                j += 1;
            }
            if let (Some(mac), true) = (macros.get(name), bytes.get(j) == Some(&b'(')) {
                if let Some((args, after)) = split_call_args(line, j) {
                    if args.len() == mac.params.len() {
                        out.push_str(&substitute(&mac.body, &mac.params, &args));
                        i = after;
                        changed = true;
                        continue;
                    }
                }
            }
            out.push_str(name);
        } else {
            out.push(c as char);
            i += 1;
        }
    }
    (out, changed)
}

/// Given `line[open_paren..]` starting at an opening `(`, returns the
/// top-level comma-separated argument texts and the index just past the
/// matching `)`. Tracks nested parens/brackets and skips over string and
/// character literals so commas inside them are not treated as
/// separators.
fn split_call_args(line: &str, open_paren: usize) -> Option<(Vec<String>, usize)> {
    let bytes = line.as_bytes();
    debug_assert_eq!(bytes.get(open_paren), Some(&b'('));
    let mut depth = 0i32;
    let mut i = open_paren;
    let mut arg_start = open_paren + 1;
    let mut args = Vec::new();
    while i < bytes.len() {
        match bytes[i] {
            b'(' | b'[' => depth += 1,
            b')' | b']' => {
                depth -= 1;
                if depth == 0 {
                    args.push(line[arg_start..i].trim().to_string());
                    return Some((args, i + 1));
                }
            }
            b',' if depth == 1 => {
                args.push(line[arg_start..i].trim().to_string());
                arg_start = i + 1;
            }
            b'"' | b'\'' => {
                let quote = bytes[i];
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Substitutes `params` with `args` in `body`, honoring the `#param`
/// stringify operator (raw argument text, internal whitespace collapsed
/// to single spaces, no escape processing).
fn substitute(body: &str, params: &[String], args: &[String]) -> String {
    let bytes = body.as_bytes();
    let mut out = String::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'#' && bytes.get(i + 1).is_some_and(|&c| is_ident_start(c)) {
            let start = i + 1;
            let mut j = start;
            while j < bytes.len() && is_ident_continue(bytes[j]) {
                j += 1;
            }
            let word = &body[start..j];
            if let Some(idx) = params.iter().position(|p| p == word) {
                out.push('"');
                out.push_str(&collapse_whitespace(&args[idx]));
                out.push('"');
                i = j;
                continue;
            }
        }
        if is_ident_start(bytes[i]) {
            let start = i;
            while i < bytes.len() && is_ident_continue(bytes[i]) {
                i += 1;
            }
            let word = &body[start..i];
            if let Some(idx) = params.iter().position(|p| p == word) {
                out.push_str(&args[idx]);
            } else {
                out.push_str(word);
            }
            continue;
        }
        out.push(bytes[i] as char);
        i += 1;
    }
    out
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_assert_macro() {
        let mut macros = HashMap::new();
        macros.insert(
            "ASSERT".to_string(),
            Macro {
                params: vec!["expect".to_string(), "expr".to_string()],
                body: "assert(expect, expr, #expr)".to_string(),
            },
        );
        let (out, changed) = expand_once("ASSERT(0, 0);", &macros);
        assert!(changed);
        assert_eq!(out, "assert(0, 0, \"0\");");
    }

    #[test]
    fn expansion_handles_nested_parens_in_arg() {
        let mut macros = HashMap::new();
        macros.insert(
            "ASSERT".to_string(),
            Macro {
                params: vec!["expect".to_string(), "expr".to_string()],
                body: "assert(expect, expr, #expr)".to_string(),
            },
        );
        let (out, _) = expand_once("ASSERT(7, (4+3)*(2-1));", &macros);
        assert_eq!(out, "assert(7, (4+3)*(2-1), \"(4+3)*(2-1)\");");
    }

    #[test]
    fn parses_define_directive() {
        let (name, mac) = parse_define(" ASSERT(expect, expr) assert(expect, expr, #expr)").unwrap();
        assert_eq!(name, "ASSERT");
        assert_eq!(mac.params, vec!["expect", "expr"]);
        assert_eq!(mac.body, "assert(expect, expr, #expr)");
    }
}

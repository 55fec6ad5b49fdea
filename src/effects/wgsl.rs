//! Token-level helpers for effect shader text.
//!
//! Effects declare their symbols explicitly; these helpers only check those declarations and
//! rewrite identifiers. They never guess at symbols. Comments are skipped, and an identifier that
//! directly follows a `.` is a member access and is left alone.

use std::collections::{BTreeSet, HashMap};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    Ident,
    Space,
    Comment,
    Other,
}

#[derive(Clone, Copy, Debug)]
struct Token<'a> {
    kind: Kind,
    text: &'a str,
}

impl Token<'_> {
    fn is_trivia(&self) -> bool {
        matches!(self.kind, Kind::Space | Kind::Comment)
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn tokenize(src: &str) -> Vec<Token<'_>> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let start = i;
        let c = src[i..].chars().next().unwrap_or('\0');
        let kind = if src[i..].starts_with("//") {
            i = src[i..].find('\n').map_or(bytes.len(), |n| i + n);
            Kind::Comment
        } else if src[i..].starts_with("/*") {
            // WGSL block comments nest.
            let mut depth = 0usize;
            while i < bytes.len() {
                if src[i..].starts_with("/*") {
                    depth += 1;
                    i += 2;
                } else if src[i..].starts_with("*/") {
                    depth -= 1;
                    i += 2;
                    if depth == 0 {
                        break;
                    }
                } else {
                    i += 1;
                }
            }
            Kind::Comment
        } else if c.is_whitespace() {
            while i < bytes.len() && src[i..].starts_with(|c: char| c.is_whitespace()) {
                i += src[i..].chars().next().map_or(1, char::len_utf8);
            }
            Kind::Space
        } else if is_ident_start(c) {
            while i < bytes.len() && is_ident_continue(bytes[i] as char) {
                i += 1;
            }
            Kind::Ident
        } else if c.is_ascii_digit() {
            while i < bytes.len() && (is_ident_continue(bytes[i] as char) || bytes[i] == b'.') {
                i += 1;
            }
            Kind::Other
        } else {
            i += c.len_utf8();
            Kind::Other
        };
        tokens.push(Token {
            kind,
            text: &src[start..i],
        });
    }
    tokens
}

/// Indices of non-trivia tokens.
fn significant(tokens: &[Token<'_>]) -> Vec<usize> {
    tokens
        .iter()
        .enumerate()
        .filter(|(_, t)| !t.is_trivia())
        .map(|(i, _)| i)
        .collect()
}

/// Replaces every free occurrence of the identifiers in `renames`.
pub fn rename_identifiers(src: &str, renames: &HashMap<String, String>) -> String {
    if renames.is_empty() {
        return src.to_string();
    }
    let tokens = tokenize(src);
    let mut out = String::with_capacity(src.len() + src.len() / 4);
    let mut previous: Option<&str> = None;
    for token in &tokens {
        match token.kind {
            Kind::Ident if previous != Some(".") => {
                out.push_str(renames.get(token.text).map_or(token.text, String::as_str));
            }
            _ => out.push_str(token.text),
        }
        if !token.is_trivia() {
            previous = Some(token.text);
        }
    }
    out
}

/// `true` if `keyword name` occurs, e.g. `declares(src, "fn", "main_image")`.
pub fn declares(src: &str, keyword: &str, name: &str) -> bool {
    let tokens = tokenize(src);
    let sig = significant(&tokens);
    sig.windows(2)
        .any(|w| tokens[w[0]].text == keyword && tokens[w[1]].text == name)
}

/// `true` if `name` is referenced anywhere outside member accesses and comments.
pub fn references(src: &str, name: &str) -> bool {
    let tokens = tokenize(src);
    let sig = significant(&tokens);
    sig.iter().enumerate().any(|(n, &i)| {
        tokens[i].kind == Kind::Ident
            && tokens[i].text == name
            && (n == 0 || tokens[sig[n - 1]].text != ".")
    })
}

/// Fields accessed on `base`, e.g. `data.depth` yields `depth`.
pub fn member_accesses(src: &str, base: &str) -> BTreeSet<String> {
    let tokens = tokenize(src);
    let sig = significant(&tokens);
    let mut fields = BTreeSet::new();
    for n in 0..sig.len().saturating_sub(2) {
        let (a, dot, field) = (tokens[sig[n]], tokens[sig[n + 1]], tokens[sig[n + 2]]);
        let free = n == 0 || tokens[sig[n - 1]].text != ".";
        if free && a.text == base && dot.text == "." && field.kind == Kind::Ident {
            fields.insert(field.text.to_string());
        }
    }
    fields
}

/// A function parameter as written in source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub ty: String,
}

/// Parameters of `fn name(...)`, or `None` if the function is not defined.
pub fn function_parameters(src: &str, name: &str) -> Option<Vec<Parameter>> {
    let tokens = tokenize(src);
    let sig = significant(&tokens);
    let open = sig.windows(3).find_map(|w| {
        (tokens[w[0]].text == "fn" && tokens[w[1]].text == name && tokens[w[2]].text == "(")
            .then_some(w[2])
    })?;

    let mut params = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    for token in &tokens[open + 1..] {
        if token.kind == Kind::Comment {
            continue;
        }
        match token.text {
            "(" | "<" => depth += 1,
            ")" if depth == 0 => break,
            ")" | ">" => depth -= 1,
            "," if depth == 0 => {
                params.extend(parse_parameter(&current));
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push_str(token.text);
    }
    params.extend(parse_parameter(&current));
    Some(params)
}

fn parse_parameter(text: &str) -> Option<Parameter> {
    let (name, ty) = text.split_once(':')?;
    // Attributes such as `@builtin(position)` may precede the name.
    let name = name.split_whitespace().last()?.trim();
    Some(Parameter {
        name: name.to_string(),
        ty: ty.split_whitespace().collect::<Vec<_>>().join(" "),
    })
}

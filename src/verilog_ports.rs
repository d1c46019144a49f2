// SPDX-License-Identifier: Apache-2.0

//! Reads module headers out of flat Verilog: module names, parameter values
//! and the ordered port list with resolved widths.
//!
//! This is not a Verilog parser. It understands exactly what canonical
//! artifacts contain: ANSI or non-ANSI port declarations with packed ranges
//! whose bounds are integer expressions over module parameters.

use std::collections::{BTreeMap, HashMap};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::interface::Direction;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    pub name: String,
    pub width: u32,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleHeader {
    pub name: String,
    /// Parameters whose values evaluated to integers, in declaration order.
    pub parameters: Vec<(String, i64)>,
    /// Names of every `parameter` (not `localparam`) an instance may override.
    pub overridable: Vec<String>,
    pub ports: Vec<PortInfo>,
}

static MODULE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:module|macromodule)\s+(?:(?:automatic|static)\s+)?([A-Za-z_][A-Za-z0-9_$]*)")
        .unwrap()
});
static ENDMODULE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bendmodule\b").unwrap());
static BODY_PARAM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(parameter|localparam)\b([^;]*);").unwrap());
static PARAM_KEYWORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:parameter|localparam)\b").unwrap());
static BODY_PORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(input|output|inout)\b([^;]*);").unwrap());

/// Removes comments, attribute instances and compiler directive lines.
pub fn strip_comments(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    let bytes = src.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let rest = &src[i..];
        if rest.starts_with("//") {
            let end = rest.find('\n').unwrap_or(rest.len());
            i += end;
        } else if rest.starts_with("/*") {
            let end = rest[2..].find("*/").map(|e| e + 4).unwrap_or(rest.len());
            out.push(' ');
            i += end;
        } else if rest.starts_with("(*") && !rest.starts_with("(*)") {
            let end = rest[2..].find("*)").map(|e| e + 4).unwrap_or(rest.len());
            out.push(' ');
            i += end;
        } else if rest.starts_with('`') {
            let end = rest.find('\n').unwrap_or(rest.len());
            i += end;
        } else {
            let ch = rest.chars().next().unwrap_or(' ');
            out.push(ch);
            i += ch.len_utf8();
        }
    }
    out
}

/// Names of all modules declared in `src`, in order.
pub fn module_names(src: &str) -> Vec<String> {
    let text = strip_comments(src);
    MODULE_RE
        .captures_iter(&text)
        .map(|c| c[1].to_string())
        .collect()
}

/// Finds module `top` in `src` and reads its header. Returns `Ok(None)` when
/// the module is not declared in `src`.
pub fn parse_module(
    src: &str,
    top: &str,
    overrides: &BTreeMap<String, i64>,
) -> Result<Option<ModuleHeader>, String> {
    let text = strip_comments(src);
    for caps in MODULE_RE.captures_iter(&text) {
        if &caps[1] != top {
            continue;
        }
        let after_name = caps.get(0).map(|m| m.end()).unwrap_or(0);
        return parse_header(&text, top, after_name, overrides).map(Some);
    }
    Ok(None)
}

fn skip_ws(text: &str, mut pos: usize) -> usize {
    let bytes = text.as_bytes();
    while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    pos
}

/// `text[open]` must be `(`. Returns the enclosed text and the index just
/// past the matching `)`.
fn balanced(text: &str, open: usize) -> Result<(&str, usize), String> {
    let mut depth = 0usize;
    for (i, b) in text.as_bytes().iter().enumerate().skip(open) {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&text[open + 1..i], i + 1));
                }
            }
            _ => {}
        }
    }
    Err("unbalanced parentheses in module header".to_string())
}

/// Splits on commas that are not nested inside brackets.
fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, ch) in s.char_indices() {
        match ch {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts.into_iter().filter(|p| !p.trim().is_empty()).collect()
}

fn find_top_level(s: &str, needle: char) -> Option<usize> {
    let mut depth = 0i32;
    for (i, ch) in s.char_indices() {
        if ch == needle && depth == 0 {
            return Some(i);
        }
        match ch {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            _ => {}
        }
    }
    None
}

struct ParamEnv<'a> {
    values: HashMap<String, i64>,
    order: Vec<(String, i64)>,
    overridable: Vec<String>,
    overrides: &'a BTreeMap<String, i64>,
}

impl<'a> ParamEnv<'a> {
    fn declare(&mut self, items: &str, overridable: bool) {
        for item in split_top_level(items) {
            let Some(eq) = find_top_level(item, '=') else {
                continue;
            };
            let Some(name) = item[..eq]
                .split(|c: char| c.is_whitespace() || c == ']')
                .filter(|w| !w.is_empty())
                .last()
            else {
                continue;
            };
            if overridable {
                self.overridable.push(name.to_string());
            }
            let value = match self.overrides.get(name) {
                Some(v) if overridable => Some(*v),
                _ => eval_expr(&item[eq + 1..], &self.values).ok(),
            };
            match value {
                Some(v) => {
                    self.values.insert(name.to_string(), v);
                    self.order.push((name.to_string(), v));
                }
                None => log::debug!("parameter {name} is not an integer; ignoring"),
            }
        }
    }
}

fn parse_header(
    text: &str,
    top: &str,
    after_name: usize,
    overrides: &BTreeMap<String, i64>,
) -> Result<ModuleHeader, String> {
    let mut env = ParamEnv {
        values: HashMap::new(),
        order: Vec::new(),
        overridable: Vec::new(),
        overrides,
    };
    let mut pos = skip_ws(text, after_name);
    if text[pos..].starts_with('#') {
        pos = skip_ws(text, pos + 1);
        if !text[pos..].starts_with('(') {
            return Err(format!("module {top}: expected `(` after `#`"));
        }
        let (params, end) = balanced(text, pos)?;
        let params = PARAM_KEYWORD_RE.replace_all(params, " ");
        env.declare(&params, true);
        pos = skip_ws(text, end);
    }
    let port_list = if text[pos..].starts_with('(') {
        let (list, end) = balanced(text, pos)?;
        pos = skip_ws(text, end);
        list
    } else {
        ""
    };
    if !text[pos..].starts_with(';') {
        return Err(format!("module {top}: expected `;` after the port list"));
    }
    let body_start = pos + 1;
    let body_end = ENDMODULE_RE
        .find(&text[body_start..])
        .map(|m| body_start + m.start())
        .ok_or_else(|| format!("module {top}: missing endmodule"))?;
    let body = &text[body_start..body_end];

    for caps in BODY_PARAM_RE.captures_iter(body) {
        env.declare(&caps[2], &caps[1] == "parameter");
    }

    let items = split_top_level(port_list);
    let ansi = items
        .first()
        .map(|i| starts_with_direction(i))
        .unwrap_or(false);
    let ports = if ansi {
        parse_ansi_ports(&items, &env.values)?
    } else {
        parse_non_ansi_ports(&items, body, &env.values)?
    };
    Ok(ModuleHeader {
        name: top.to_string(),
        parameters: env.order,
        overridable: env.overridable,
        ports,
    })
}

fn starts_with_direction(item: &str) -> bool {
    matches!(
        item.split_whitespace().next(),
        Some("input" | "output" | "inout")
    )
}

#[derive(Clone)]
struct DeclType {
    direction: Option<Direction>,
    width: u32,
}

struct DeclItem {
    /// Set when the item spelled out a direction, net type or range.
    decl: Option<DeclType>,
    name: String,
}

fn base_width(word: &str) -> Option<u32> {
    match word {
        "byte" => Some(8),
        "shortint" => Some(16),
        "int" | "integer" => Some(32),
        "longint" => Some(64),
        _ => None,
    }
}

fn is_net_keyword(word: &str) -> bool {
    matches!(
        word,
        "wire" | "reg" | "logic" | "var" | "tri" | "tri0" | "tri1" | "wand" | "wor" | "uwire"
            | "bit" | "signed" | "unsigned"
    )
}

fn range_width(range: &str, env: &HashMap<String, i64>) -> Result<u32, String> {
    let colon = find_top_level(range, ':')
        .ok_or_else(|| format!("unsupported range `[{range}]`"))?;
    let msb = eval_expr(&range[..colon], env)?;
    let lsb = eval_expr(&range[colon + 1..], env)?;
    msb.checked_sub(lsb)
        .and_then(i64::checked_abs)
        .and_then(|span| span.checked_add(1))
        .and_then(|width| u32::try_from(width).ok())
        .ok_or_else(|| format!("range `[{range}]` is too wide"))
}

fn parse_decl_item(item: &str, env: &HashMap<String, i64>) -> Result<DeclItem, String> {
    let item = match find_top_level(item, '=') {
        Some(eq) => &item[..eq],
        None => item,
    };
    let mut direction = None;
    let mut saw_type = false;
    let mut width: u64 = 1;
    let mut name: Option<String> = None;
    let mut rest = item.trim();
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('[') {
            let close = find_top_level(after, ']')
                .ok_or_else(|| format!("unterminated range in `{item}`"))?;
            if name.is_some() {
                return Err(format!("unpacked array port `{}` is not supported", item.trim()));
            }
            width = width
                .checked_mul(u64::from(range_width(&after[..close], env)?))
                .ok_or_else(|| format!("port in `{}` is too wide", item.trim()))?;
            saw_type = true;
            rest = after[close + 1..].trim_start();
            continue;
        }
        let end = rest
            .find(|c: char| c.is_whitespace() || c == '[')
            .unwrap_or(rest.len());
        let word = &rest[..end];
        rest = rest[end..].trim_start();
        match word {
            "input" => direction = Some(Direction::In),
            "output" => direction = Some(Direction::Out),
            "inout" => direction = Some(Direction::InOut),
            w if is_net_keyword(w) => saw_type = true,
            w if base_width(w).is_some() => {
                width = width
                    .checked_mul(u64::from(base_width(w).unwrap_or(1)))
                    .ok_or_else(|| format!("port in `{}` is too wide", item.trim()))?;
                saw_type = true;
            }
            w => {
                if let Some(previous) = name.replace(w.to_string()) {
                    return Err(format!(
                        "port `{w}` uses unsupported type `{previous}`"
                    ));
                }
            }
        }
    }
    let name = name.ok_or_else(|| format!("no port name in `{}`", item.trim()))?;
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$') {
        return Err(format!("unsupported port declaration `{}`", item.trim()));
    }
    let width = u32::try_from(width).map_err(|_| format!("port `{name}` is too wide"))?;
    let decl = if direction.is_some() || saw_type {
        Some(DeclType { direction, width })
    } else {
        None
    };
    Ok(DeclItem { decl, name })
}

/// Applies Verilog's inheritance rule: a bare name inherits the previous
/// item's declaration, a type or range without a direction inherits only
/// the direction.
fn resolve_items(
    items: &[&str],
    env: &HashMap<String, i64>,
    mut previous: Option<DeclType>,
) -> Result<Vec<PortInfo>, String> {
    let mut ports = Vec::new();
    for item in items {
        let parsed = parse_decl_item(item, env)?;
        let decl = match (parsed.decl, &previous) {
            (Some(d), _) if d.direction.is_some() => d,
            (Some(d), Some(prev)) => DeclType {
                direction: prev.direction,
                width: d.width,
            },
            (None, Some(prev)) => prev.clone(),
            (_, None) => {
                return Err(format!("port `{}` has no direction", parsed.name));
            }
        };
        let direction = decl
            .direction
            .ok_or_else(|| format!("port `{}` has no direction", parsed.name))?;
        ports.push(PortInfo {
            name: parsed.name,
            width: decl.width,
            direction,
        });
        previous = Some(decl);
    }
    Ok(ports)
}

fn parse_ansi_ports(items: &[&str], env: &HashMap<String, i64>) -> Result<Vec<PortInfo>, String> {
    resolve_items(items, env, None)
}

fn parse_non_ansi_ports(
    items: &[&str],
    body: &str,
    env: &HashMap<String, i64>,
) -> Result<Vec<PortInfo>, String> {
    let mut declared: HashMap<String, PortInfo> = HashMap::new();
    for caps in BODY_PORT_RE.captures_iter(body) {
        let decl = format!("{} {}", &caps[1], &caps[2]);
        let decl_items = split_top_level(&decl);
        for port in resolve_items(&decl_items, env, None)? {
            declared.insert(port.name.clone(), port);
        }
    }
    items
        .iter()
        .map(|item| {
            let name = item.trim();
            declared
                .remove(name)
                .ok_or_else(|| format!("port `{name}` has no input/output declaration"))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(i64),
    Ident(String),
    Op(&'static str),
}

static BASED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d*)\s*'[sS]?([dDhHbBoO])\s*([0-9a-fA-F_xXzZ?]+)").unwrap());

fn tokenize(expr: &str) -> Result<Vec<Tok>, String> {
    const OPS: &[&str] = &["**", "<<", ">>", "+", "-", "*", "/", "%", "(", ")"];
    let mut toks = Vec::new();
    let mut rest = expr.trim_start();
    'outer: while !rest.is_empty() {
        if let Some(caps) = BASED_RE.captures(rest) {
            let radix = match caps[2].to_ascii_lowercase().as_str() {
                "d" => 10,
                "h" => 16,
                "b" => 2,
                _ => 8,
            };
            let digits = caps[3].replace('_', "");
            let value = i64::from_str_radix(&digits, radix)
                .map_err(|_| format!("unsupported literal `{}`", &caps[0]))?;
            toks.push(Tok::Num(value));
            rest = rest[caps[0].len()..].trim_start();
            continue;
        }
        let first = rest.chars().next().unwrap_or(' ');
        if first.is_ascii_digit() {
            let end = rest
                .find(|c: char| !(c.is_ascii_digit() || c == '_'))
                .unwrap_or(rest.len());
            let value = rest[..end]
                .replace('_', "")
                .parse::<i64>()
                .map_err(|e| format!("bad number `{}`: {e}", &rest[..end]))?;
            toks.push(Tok::Num(value));
            rest = rest[end..].trim_start();
            continue;
        }
        if first.is_ascii_alphabetic() || first == '_' || first == '$' {
            let end = rest
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '$'))
                .unwrap_or(rest.len());
            toks.push(Tok::Ident(rest[..end].to_string()));
            rest = rest[end..].trim_start();
            continue;
        }
        for op in OPS {
            if let Some(after) = rest.strip_prefix(op) {
                toks.push(Tok::Op(op));
                rest = after.trim_start();
                continue 'outer;
            }
        }
        return Err(format!("unsupported token in `{}`", expr.trim()));
    }
    Ok(toks)
}

struct ExprParser<'a> {
    toks: Vec<Tok>,
    pos: usize,
    env: &'a HashMap<String, i64>,
}

impl<'a> ExprParser<'a> {
    fn peek_op(&self) -> Option<&'static str> {
        match self.toks.get(self.pos) {
            Some(Tok::Op(op)) => Some(op),
            _ => None,
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<(), String> {
        if self.peek_op() == Some(op) {
            self.pos += 1;
            Ok(())
        } else {
            Err(format!("expected `{op}`"))
        }
    }

    fn binary(
        &mut self,
        ops: &[&'static str],
        next: fn(&mut Self) -> Result<i64, String>,
    ) -> Result<i64, String> {
        let mut lhs = next(self)?;
        while let Some(op) = self.peek_op().filter(|op| ops.contains(op)) {
            self.pos += 1;
            let rhs = next(self)?;
            lhs = match op {
                "+" => lhs.checked_add(rhs),
                "-" => lhs.checked_sub(rhs),
                "*" => lhs.checked_mul(rhs),
                "/" => lhs.checked_div(rhs),
                "%" => lhs.checked_rem(rhs),
                "<<" => u32::try_from(rhs).ok().and_then(|r| lhs.checked_shl(r)),
                ">>" => u32::try_from(rhs).ok().and_then(|r| lhs.checked_shr(r)),
                _ => None,
            }
            .ok_or_else(|| format!("arithmetic error evaluating `{op}`"))?;
        }
        Ok(lhs)
    }

    fn shift(&mut self) -> Result<i64, String> {
        self.binary(&["<<", ">>"], Self::additive)
    }

    fn additive(&mut self) -> Result<i64, String> {
        self.binary(&["+", "-"], Self::term)
    }

    fn term(&mut self) -> Result<i64, String> {
        self.binary(&["*", "/", "%"], Self::power)
    }

    fn power(&mut self) -> Result<i64, String> {
        let base = self.unary()?;
        if self.peek_op() == Some("**") {
            self.pos += 1;
            let exp = self.unary()?;
            let exp = u32::try_from(exp).map_err(|_| "negative exponent".to_string())?;
            return base
                .checked_pow(exp)
                .ok_or_else(|| "arithmetic overflow in `**`".to_string());
        }
        Ok(base)
    }

    fn unary(&mut self) -> Result<i64, String> {
        match self.peek_op() {
            Some("-") => {
                self.pos += 1;
                self.unary()?
                    .checked_neg()
                    .ok_or_else(|| "arithmetic overflow in unary `-`".to_string())
            }
            Some("+") => {
                self.pos += 1;
                self.unary()
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<i64, String> {
        let tok = self
            .toks
            .get(self.pos)
            .cloned()
            .ok_or_else(|| "unexpected end of expression".to_string())?;
        self.pos += 1;
        match tok {
            Tok::Num(n) => Ok(n),
            Tok::Op("(") => {
                let v = self.shift()?;
                self.expect_op(")")?;
                Ok(v)
            }
            Tok::Ident(name) if name == "$clog2" => {
                self.expect_op("(")?;
                let v = self.shift()?;
                self.expect_op(")")?;
                Ok(clog2(v))
            }
            Tok::Ident(name) => self
                .env
                .get(&name)
                .copied()
                .ok_or_else(|| format!("unknown parameter `{name}`")),
            Tok::Op(op) => Err(format!("unexpected `{op}`")),
        }
    }
}

fn clog2(v: i64) -> i64 {
    if v <= 1 {
        0
    } else {
        64 - i64::from((v - 1).leading_zeros())
    }
}

/// Evaluates an integer constant expression over `env`.
pub fn eval_expr(expr: &str, env: &HashMap<String, i64>) -> Result<i64, String> {
    let mut parser = ExprParser {
        toks: tokenize(expr)?,
        pos: 0,
        env,
    };
    let value = parser.shift()?;
    if parser.pos != parser.toks.len() {
        return Err(format!("trailing tokens in `{}`", expr.trim()));
    }
    Ok(value)
}

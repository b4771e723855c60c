//! Recursive-descent parser and evaluator for the expression grammar
//! (spec §4.A). Tokenizing and evaluating are kept in one file since the
//! grammar is small enough that splitting further would scatter one
//! concept across files for no benefit.

use super::EvalContext;
use super::ast::Expr;
use wfl_types::{ExpressionKind, Value};

pub fn parse(source: &str) -> Result<Expr, ExpressionKind> {
    let mut tokens = tokenize(source)?;
    tokens.reverse(); // pop() from the back == consume from the front
    let mut p = Parser { tokens };
    let expr = p.parse_statement()?;
    Ok(expr)
}

pub fn eval(expr: &Expr, ctx: &EvalContext) -> Result<Value, ExpressionKind> {
    match expr {
        Expr::Null => Ok(Value::Null),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Int(i) => Ok(Value::Int(*i)),
        Expr::Float(f) => Ok(Value::Float(*f)),
        Expr::Str(s) => Ok(Value::String(s.clone())),
        Expr::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(eval(item, ctx)?);
            }
            Ok(Value::List(out))
        }
        Expr::Object(pairs) => {
            let mut map = indexmap::IndexMap::new();
            for (key, value_expr) in pairs {
                map.insert(key.clone(), eval(value_expr, ctx)?);
            }
            Ok(Value::Mapping(map))
        }
        Expr::Ident(name) => resolve_ident(name, ctx),
        Expr::Member(base, prop) => {
            let base_value = eval(base, ctx)?;
            if prop == "length" {
                if let Value::Mapping(map) = &base_value {
                    return map.get("length").cloned().ok_or(ExpressionKind::LengthNotDefined);
                }
                return base_value.length().map(|n| Value::Int(n as i64)).ok_or(ExpressionKind::LengthNotDefined);
            }
            get_member(&base_value, prop).ok_or_else(|| ExpressionKind::Undefined(prop.clone()))
        }
        Expr::Index(base, index_expr) => {
            let base_value = eval(base, ctx)?;
            let index_value = eval(index_expr, ctx)?;
            get_index(&base_value, &index_value).ok_or_else(|| ExpressionKind::Undefined(format!("[{index_value}]")))
        }
        Expr::Eq(lhs, rhs) => Ok(Value::Bool(eval(lhs, ctx)? == eval(rhs, ctx)?)),
        Expr::Ne(lhs, rhs) => Ok(Value::Bool(eval(lhs, ctx)? != eval(rhs, ctx)?)),
        Expr::Return(inner) => eval(inner, ctx),
    }
}

fn resolve_ident(name: &str, ctx: &EvalContext) -> Result<Value, ExpressionKind> {
    match name {
        "inputs" => Ok(Value::Mapping(ctx.inputs.clone())),
        "self" => Ok(ctx.self_value.clone()),
        "runtime" => {
            let mut runtime = ctx.runtime.clone();
            if !ctx.in_output_eval {
                runtime.shift_remove("exitCode");
            }
            Ok(Value::Mapping(runtime))
        }
        "null" => Ok(Value::Null),
        "true" => Ok(Value::Bool(true)),
        "false" => Ok(Value::Bool(false)),
        other => Err(ExpressionKind::Undefined(other.to_string())),
    }
}

fn get_member(base: &Value, prop: &str) -> Option<Value> {
    match base {
        Value::Mapping(map) => map.get(prop).cloned(),
        Value::File(file) => match prop {
            "class" => Some(Value::String(file.class.clone())),
            "location" => Some(Value::String(file.location.clone())),
            "path" => Some(Value::String(file.path.clone())),
            "basename" => Some(Value::String(file.basename.clone())),
            "dirname" => Some(Value::String(file.dirname.clone())),
            "nameroot" => Some(Value::String(file.nameroot.clone())),
            "nameext" => Some(Value::String(file.nameext.clone())),
            "size" => file.size.map(|s| Value::Int(s as i64)),
            "checksum" => file.checksum.clone().map(Value::String),
            "contents" => file.contents.clone().map(Value::String),
            "format" => file.format.clone().map(Value::String),
            "secondaryFiles" => Some(Value::List(file.secondary_files.clone())),
            _ => None,
        },
        Value::Directory(dir) => match prop {
            "class" => Some(Value::String(dir.class.clone())),
            "location" => Some(Value::String(dir.location.clone())),
            "path" => Some(Value::String(dir.path.clone())),
            "basename" => Some(Value::String(dir.basename.clone())),
            "listing" => Some(Value::List(dir.listing.clone())),
            _ => None,
        },
        _ => None,
    }
}

fn get_index(base: &Value, index: &Value) -> Option<Value> {
    match (base, index) {
        (Value::List(items), Value::Int(i)) => {
            let idx = if *i < 0 { items.len().checked_sub((-*i) as usize)? } else { *i as usize };
            items.get(idx).cloned()
        }
        (Value::Mapping(map), Value::String(key)) => map.get(key).cloned(),
        _ => None,
    }
}

// --- Tokenizer ---

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    Dot,
    Comma,
    Colon,
    Semi,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    EqEq,
    NotEq,
    Return,
    Minus,
}

fn tokenize(source: &str) -> Result<Vec<Tok>, ExpressionKind> {
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0usize;
    let mut toks = Vec::new();
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '.' => {
                toks.push(Tok::Dot);
                i += 1;
            }
            ',' => {
                toks.push(Tok::Comma);
                i += 1;
            }
            ':' => {
                toks.push(Tok::Colon);
                i += 1;
            }
            ';' => {
                toks.push(Tok::Semi);
                i += 1;
            }
            '(' => {
                toks.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                toks.push(Tok::RParen);
                i += 1;
            }
            '[' => {
                toks.push(Tok::LBracket);
                i += 1;
            }
            ']' => {
                toks.push(Tok::RBracket);
                i += 1;
            }
            '{' => {
                toks.push(Tok::LBrace);
                i += 1;
            }
            '}' => {
                toks.push(Tok::RBrace);
                i += 1;
            }
            '-' => {
                toks.push(Tok::Minus);
                i += 1;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                toks.push(Tok::EqEq);
                i += 2;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                toks.push(Tok::NotEq);
                i += 2;
            }
            '\'' | '"' => {
                let quote = c;
                i += 1;
                let mut s = String::new();
                while i < chars.len() && chars[i] != quote {
                    if chars[i] == '\\' && i + 1 < chars.len() {
                        i += 1;
                    }
                    s.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(ExpressionKind::EvaluationFailed(format!("unterminated string literal in `{source}`")));
                }
                i += 1; // closing quote
                toks.push(Tok::Str(s));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                if text.contains('.') {
                    let value: f64 = text.parse().map_err(|_| ExpressionKind::EvaluationFailed(format!("bad number `{text}`")))?;
                    toks.push(Tok::Float(value));
                } else {
                    let value: i64 = text.parse().map_err(|_| ExpressionKind::EvaluationFailed(format!("bad number `{text}`")))?;
                    toks.push(Tok::Int(value));
                }
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                if text == "return" {
                    toks.push(Tok::Return);
                } else {
                    toks.push(Tok::Ident(text));
                }
            }
            other => {
                return Err(ExpressionKind::EvaluationFailed(format!("unexpected character `{other}` in `{source}`")));
            }
        }
    }
    Ok(toks)
}

struct Parser {
    tokens: Vec<Tok>,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.last()
    }

    fn next(&mut self) -> Option<Tok> {
        self.tokens.pop()
    }

    fn expect(&mut self, tok: Tok) -> Result<(), ExpressionKind> {
        match self.next() {
            Some(t) if t == tok => Ok(()),
            other => Err(ExpressionKind::EvaluationFailed(format!("expected {tok:?}, found {other:?}"))),
        }
    }

    fn parse_statement(&mut self) -> Result<Expr, ExpressionKind> {
        if matches!(self.peek(), Some(Tok::Return)) {
            self.next();
            let expr = self.parse_equality()?;
            if matches!(self.peek(), Some(Tok::Semi)) {
                self.next();
            }
            return Ok(Expr::Return(Box::new(expr)));
        }
        let expr = self.parse_equality()?;
        if matches!(self.peek(), Some(Tok::Semi)) {
            self.next();
        }
        if self.peek().is_some() {
            return Err(ExpressionKind::EvaluationFailed("trailing tokens after expression".to_string()));
        }
        Ok(expr)
    }

    fn parse_equality(&mut self) -> Result<Expr, ExpressionKind> {
        let lhs = self.parse_postfix()?;
        match self.peek() {
            Some(Tok::EqEq) => {
                self.next();
                let rhs = self.parse_postfix()?;
                Ok(Expr::Eq(Box::new(lhs), Box::new(rhs)))
            }
            Some(Tok::NotEq) => {
                self.next();
                let rhs = self.parse_postfix()?;
                Ok(Expr::Ne(Box::new(lhs), Box::new(rhs)))
            }
            _ => Ok(lhs),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, ExpressionKind> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(Tok::Dot) => {
                    self.next();
                    match self.next() {
                        Some(Tok::Ident(name)) => expr = Expr::Member(Box::new(expr), name),
                        other => return Err(ExpressionKind::EvaluationFailed(format!("expected property name, found {other:?}"))),
                    }
                }
                Some(Tok::LBracket) => {
                    self.next();
                    let index = self.parse_equality()?;
                    self.expect(Tok::RBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ExpressionKind> {
        match self.next() {
            Some(Tok::Int(i)) => Ok(Expr::Int(i)),
            Some(Tok::Float(f)) => Ok(Expr::Float(f)),
            Some(Tok::Str(s)) => Ok(Expr::Str(s)),
            Some(Tok::Minus) => match self.next() {
                Some(Tok::Int(i)) => Ok(Expr::Int(-i)),
                Some(Tok::Float(f)) => Ok(Expr::Float(-f)),
                other => Err(ExpressionKind::EvaluationFailed(format!("expected number after `-`, found {other:?}"))),
            },
            Some(Tok::Ident(name)) => match name.as_str() {
                "null" => Ok(Expr::Null),
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                _ => Ok(Expr::Ident(name)),
            },
            Some(Tok::LParen) => {
                let inner = self.parse_equality()?;
                self.expect(Tok::RParen)?;
                Ok(inner)
            }
            Some(Tok::LBracket) => {
                let mut items = Vec::new();
                if !matches!(self.peek(), Some(Tok::RBracket)) {
                    loop {
                        items.push(self.parse_equality()?);
                        if matches!(self.peek(), Some(Tok::Comma)) {
                            self.next();
                            continue;
                        }
                        break;
                    }
                }
                self.expect(Tok::RBracket)?;
                Ok(Expr::List(items))
            }
            Some(Tok::LBrace) => {
                let mut pairs = Vec::new();
                if !matches!(self.peek(), Some(Tok::RBrace)) {
                    loop {
                        let key = match self.next() {
                            Some(Tok::Str(s)) => s,
                            Some(Tok::Ident(s)) => s,
                            other => return Err(ExpressionKind::EvaluationFailed(format!("expected object key, found {other:?}"))),
                        };
                        self.expect(Tok::Colon)?;
                        let value = self.parse_equality()?;
                        pairs.push((key, value));
                        if matches!(self.peek(), Some(Tok::Comma)) {
                            self.next();
                            continue;
                        }
                        break;
                    }
                }
                self.expect(Tok::RBrace)?;
                Ok(Expr::Object(pairs))
            }
            other => Err(ExpressionKind::EvaluationFailed(format!("unexpected token {other:?}"))),
        }
    }
}

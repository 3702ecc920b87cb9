// src/shell/arith.rs

//! Shell arithmetic: `$(( ))`, `(( ))`, `let` and array subscripts
//!
//! 64-bit signed integers with wrapping semantics, C operator precedence,
//! and short-circuit evaluation for `&&`, `||` and `?:`.

/// Variable access during evaluation
pub trait ArithEnv {
    fn get(&mut self, name: &str, index: Option<i64>) -> Result<i64, String>;
    fn set(&mut self, name: &str, index: Option<i64>, value: i64) -> Result<(), String>;
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(i64),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    LBracket,
    RBracket,
}

const OPERATORS: &[&str] = &[
    "<<=", ">>=", "**", "++", "--", "<<", ">>", "<=", ">=", "==", "!=", "&&", "||", "+=", "-=",
    "*=", "/=", "%=", "&=", "^=", "|=", "+", "-", "*", "/", "%", "<", ">", "=", "!", "~", "&",
    "^", "|", "?", ":", ",",
];

fn parse_number(text: &str) -> Result<i64, String> {
    let invalid = || format!("{}: invalid number", text);
    if let Some((base, digits)) = text.split_once('#') {
        let base: u32 = base.parse().map_err(|_| invalid())?;
        if !(2..=36).contains(&base) {
            return Err(format!("{}: invalid arithmetic base", text));
        }
        return i64::from_str_radix(digits, base).map_err(|_| invalid());
    }
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).map_err(|_| invalid());
    }
    if text.len() > 1 && text.starts_with('0') {
        return i64::from_str_radix(&text[1..], 8).map_err(|_| invalid());
    }
    text.parse::<i64>().map_err(|_| invalid())
}

fn tokenize(src: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '#' || chars[i] == '_') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            tokens.push(Token::Num(parse_number(&text)?));
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }
        match c {
            '(' => tokens.push(Token::LParen),
            ')' => tokens.push(Token::RParen),
            '[' => tokens.push(Token::LBracket),
            ']' => tokens.push(Token::RBracket),
            _ => {
                let rest: String = chars[i..].iter().take(3).collect();
                let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(**op)) else {
                    return Err(format!("syntax error: invalid arithmetic operator (error token is \"{}\")", c));
                };
                tokens.push(Token::Op(*op));
                i += op.len();
                continue;
            }
        }
        i += 1;
    }
    Ok(tokens)
}

#[derive(Debug, Clone)]
enum Expr {
    Num(i64),
    Var(String, Option<Box<Expr>>),
    Unary(&'static str, Box<Expr>),
    Binary(&'static str, Box<Expr>, Box<Expr>),
    Assign(&'static str, String, Option<Box<Expr>>, Box<Expr>),
    IncDec { name: String, index: Option<Box<Expr>>, delta: i64, prefix: bool },
    Cond(Box<Expr>, Box<Expr>, Box<Expr>),
}

struct ExprParser {
    tokens: Vec<Token>,
    pos: usize,
}

fn binary_precedence(op: &str) -> Option<u8> {
    Some(match op {
        "||" => 1,
        "&&" => 2,
        "|" => 3,
        "^" => 4,
        "&" => 5,
        "==" | "!=" => 6,
        "<" | "<=" | ">" | ">=" => 7,
        "<<" | ">>" => 8,
        "+" | "-" => 9,
        "*" | "/" | "%" => 10,
        "**" => 11,
        _ => return None,
    })
}

impl ExprParser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_op(&self) -> Option<&'static str> {
        match self.peek() {
            Some(Token::Op(op)) => Some(op),
            _ => None,
        }
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expect(&mut self, want: Token) -> Result<(), String> {
        match self.next() {
            Some(t) if t == want => Ok(()),
            _ => Err(format!("syntax error: expected {:?}", want)),
        }
    }

    fn comma(&mut self) -> Result<Expr, String> {
        let mut expr = self.assignment()?;
        while self.peek_op() == Some(",") {
            self.pos += 1;
            let right = self.assignment()?;
            expr = Expr::Binary(",", Box::new(expr), Box::new(right));
        }
        Ok(expr)
    }

    fn assignment(&mut self) -> Result<Expr, String> {
        let start = self.pos;
        if let Some(Token::Ident(name)) = self.peek().cloned() {
            self.pos += 1;
            let index = self.subscript()?;
            if let Some(op) = self.peek_op() {
                if matches!(op, "=" | "+=" | "-=" | "*=" | "/=" | "%=" | "<<=" | ">>=" | "&=" | "^=" | "|=") {
                    self.pos += 1;
                    let value = self.assignment()?;
                    return Ok(Expr::Assign(op, name, index, Box::new(value)));
                }
            }
            self.pos = start;
        }
        self.conditional()
    }

    fn conditional(&mut self) -> Result<Expr, String> {
        let cond = self.binary(1)?;
        if self.peek_op() == Some("?") {
            self.pos += 1;
            let then = self.assignment()?;
            if self.peek_op() != Some(":") {
                return Err("syntax error: expected ':' in conditional expression".to_string());
            }
            self.pos += 1;
            let otherwise = self.assignment()?;
            return Ok(Expr::Cond(Box::new(cond), Box::new(then), Box::new(otherwise)));
        }
        Ok(cond)
    }

    fn binary(&mut self, min_prec: u8) -> Result<Expr, String> {
        let mut left = self.unary()?;
        while let Some(op) = self.peek_op() {
            let Some(prec) = binary_precedence(op) else { break };
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            // `**` is right-associative
            let next_min = if op == "**" { prec } else { prec + 1 };
            let right = self.binary(next_min)?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, String> {
        match self.peek_op() {
            Some(op @ ("!" | "~" | "-" | "+")) => {
                self.pos += 1;
                Ok(Expr::Unary(op, Box::new(self.unary()?)))
            }
            Some(op @ ("++" | "--")) => {
                self.pos += 1;
                let Some(Token::Ident(name)) = self.next() else {
                    return Err(format!("syntax error: operand expected after '{}'", op));
                };
                let index = self.subscript()?;
                Ok(Expr::IncDec {
                    name,
                    index,
                    delta: if op == "++" { 1 } else { -1 },
                    prefix: true,
                })
            }
            _ => self.postfix(),
        }
    }

    fn postfix(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Num(n)) => Ok(Expr::Num(n)),
            Some(Token::LParen) => {
                let e = self.comma()?;
                self.expect(Token::RParen)?;
                Ok(e)
            }
            Some(Token::Ident(name)) => {
                let index = self.subscript()?;
                if let Some(op @ ("++" | "--")) = self.peek_op() {
                    self.pos += 1;
                    return Ok(Expr::IncDec {
                        name,
                        index,
                        delta: if op == "++" { 1 } else { -1 },
                        prefix: false,
                    });
                }
                Ok(Expr::Var(name, index))
            }
            Some(t) => Err(format!("syntax error: operand expected (error token is {:?})", t)),
            None => Err("syntax error: operand expected".to_string()),
        }
    }

    fn subscript(&mut self) -> Result<Option<Box<Expr>>, String> {
        if self.peek() != Some(&Token::LBracket) {
            return Ok(None);
        }
        self.pos += 1;
        let e = self.comma()?;
        self.expect(Token::RBracket)?;
        Ok(Some(Box::new(e)))
    }
}

fn eval_index(env: &mut dyn ArithEnv, index: &Option<Box<Expr>>) -> Result<Option<i64>, String> {
    match index {
        Some(e) => Ok(Some(eval_expr(e, env)?)),
        None => Ok(None),
    }
}

fn apply_binary(op: &str, a: i64, b: i64) -> Result<i64, String> {
    Ok(match op {
        "+" => a.wrapping_add(b),
        "-" => a.wrapping_sub(b),
        "*" => a.wrapping_mul(b),
        "/" | "%" if b == 0 => return Err("division by 0".to_string()),
        "/" => a.wrapping_div(b),
        "%" => a.wrapping_rem(b),
        "**" => {
            if b < 0 {
                return Err("exponent less than 0".to_string());
            }
            a.wrapping_pow(u32::try_from(b).unwrap_or(u32::MAX))
        }
        "<<" => a.wrapping_shl(b as u32),
        ">>" => a.wrapping_shr(b as u32),
        "<" => (a < b) as i64,
        "<=" => (a <= b) as i64,
        ">" => (a > b) as i64,
        ">=" => (a >= b) as i64,
        "==" => (a == b) as i64,
        "!=" => (a != b) as i64,
        "&" => a & b,
        "^" => a ^ b,
        "|" => a | b,
        "," => b,
        other => return Err(format!("unknown operator {}", other)),
    })
}

fn eval_expr(expr: &Expr, env: &mut dyn ArithEnv) -> Result<i64, String> {
    match expr {
        Expr::Num(n) => Ok(*n),
        Expr::Var(name, index) => {
            let idx = eval_index(env, index)?;
            env.get(name, idx)
        }
        Expr::Unary(op, e) => {
            let v = eval_expr(e, env)?;
            Ok(match *op {
                "!" => (v == 0) as i64,
                "~" => !v,
                "-" => v.wrapping_neg(),
                _ => v,
            })
        }
        Expr::Binary("&&", a, b) => {
            Ok((eval_expr(a, env)? != 0 && eval_expr(b, env)? != 0) as i64)
        }
        Expr::Binary("||", a, b) => {
            Ok((eval_expr(a, env)? != 0 || eval_expr(b, env)? != 0) as i64)
        }
        Expr::Binary(op, a, b) => {
            let a = eval_expr(a, env)?;
            let b = eval_expr(b, env)?;
            apply_binary(op, a, b)
        }
        Expr::Assign(op, name, index, value) => {
            let idx = eval_index(env, index)?;
            let rhs = eval_expr(value, env)?;
            let result = if *op == "=" {
                rhs
            } else {
                let current = env.get(name, idx)?;
                apply_binary(op.trim_end_matches('='), current, rhs)?
            };
            env.set(name, idx, result)?;
            Ok(result)
        }
        Expr::IncDec {
            name,
            index,
            delta,
            prefix,
        } => {
            let idx = eval_index(env, index)?;
            let old = env.get(name, idx)?;
            let new = old.wrapping_add(*delta);
            env.set(name, idx, new)?;
            Ok(if *prefix { new } else { old })
        }
        Expr::Cond(c, a, b) => {
            if eval_expr(c, env)? != 0 {
                eval_expr(a, env)
            } else {
                eval_expr(b, env)
            }
        }
    }
}

/// Evaluate an arithmetic expression; empty input evaluates to 0
pub fn eval(src: &str, env: &mut dyn ArithEnv) -> Result<i64, String> {
    let tokens = tokenize(src)?;
    if tokens.is_empty() {
        return Ok(0);
    }
    let mut parser = ExprParser { tokens, pos: 0 };
    let expr = parser.comma()?;
    if parser.pos < parser.tokens.len() {
        return Err(format!("{}: syntax error in expression", src.trim()));
    }
    eval_expr(&expr, env)
}

/// Parse a string as a plain integer literal, as used for variable values
pub fn parse_literal(text: &str) -> Option<i64> {
    let t = text.trim();
    let (neg, digits) = match t.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, t.strip_prefix('+').unwrap_or(t)),
    };
    if digits.is_empty() || !digits.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        return None;
    }
    parse_number(digits).ok().map(|n| if neg { -n } else { n })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MapEnv(HashMap<String, i64>);

    impl ArithEnv for MapEnv {
        fn get(&mut self, name: &str, _index: Option<i64>) -> Result<i64, String> {
            Ok(self.0.get(name).copied().unwrap_or(0))
        }

        fn set(&mut self, name: &str, _index: Option<i64>, value: i64) -> Result<(), String> {
            self.0.insert(name.to_string(), value);
            Ok(())
        }
    }

    fn calc(src: &str) -> i64 {
        eval(src, &mut MapEnv::default()).unwrap()
    }

    #[test]
    fn test_precedence() {
        assert_eq!(calc("1 + 2 * 3"), 7);
        assert_eq!(calc("(1 + 2) * 3"), 9);
        assert_eq!(calc("2 ** 3 ** 2"), 512);
        assert_eq!(calc("-2 + 5"), 3);
        assert_eq!(calc("7 % 3 == 1 && 1"), 1);
        assert_eq!(calc("1 ? 10 : 20"), 10);
        assert_eq!(calc("0x10 + 010 + 2#11"), 16 + 8 + 3);
    }

    #[test]
    fn test_assignment_and_increment() {
        let mut env = MapEnv::default();
        assert_eq!(eval("i = 5", &mut env).unwrap(), 5);
        assert_eq!(eval("i++", &mut env).unwrap(), 5);
        assert_eq!(eval("++i", &mut env).unwrap(), 7);
        assert_eq!(eval("i += 3", &mut env).unwrap(), 10);
        assert_eq!(eval("i <<= 1", &mut env).unwrap(), 20);
    }

    #[test]
    fn test_short_circuit() {
        let mut env = MapEnv::default();
        eval("0 && (x = 1)", &mut env).unwrap();
        assert!(!env.0.contains_key("x"));
        eval("1 || (x = 1)", &mut env).unwrap();
        assert!(!env.0.contains_key("x"));
    }

    #[test]
    fn test_errors() {
        let mut env = MapEnv::default();
        assert!(eval("1 / 0", &mut env).is_err());
        assert!(eval("1 +", &mut env).is_err());
        assert!(eval("1 2", &mut env).is_err());
        assert_eq!(eval("", &mut env).unwrap(), 0);
    }

    #[test]
    fn test_parse_literal() {
        assert_eq!(parse_literal("42"), Some(42));
        assert_eq!(parse_literal("-3"), Some(-3));
        assert_eq!(parse_literal("abc"), None);
    }
}

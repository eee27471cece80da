//! Tokenizer and recursive-descent parser for condition expressions.
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! or         := and ( "||" and )*
//! and        := unary ( "&&" unary )*
//! unary      := "!" unary | comparison
//! comparison := operand ( ("==" | "!=" | "<" | "<=" | ">" | ">=") operand )?
//! operand    := "(" or ")" | literal | path | "{{" path "}}"
//! literal    := 'string' | "string" | number | true | false | null
//! ```
//!
//! Comparisons do not chain. Identifiers followed by `(` are rejected, as is any character
//! outside the grammar.

use serde_json::{Number, Value};

pub(crate) const MAX_EXPRESSION_LENGTH: usize = 1024;
pub(crate) const MAX_NESTING_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

/// Parsed condition expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Dotted path into the template context, bare or written as a placeholder.
    Path(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    And,
    Or,
    Not,
    Op(CompareOp),
    Literal(Value),
    Path(String),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::LParen => "'('".into(),
            Token::RParen => "')'".into(),
            Token::And => "'&&'".into(),
            Token::Or => "'||'".into(),
            Token::Not => "'!'".into(),
            Token::Op(op) => format!("'{}'", op.symbol()),
            Token::Literal(value) => format!("literal {value}"),
            Token::Path(path) => format!("path '{path}'"),
        }
    }
}

/// Parses `input` into an [`Expr`], returning a human readable reason on failure.
pub fn parse_expression(input: &str) -> Result<Expr, String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err("condition expression is empty".into());
    }
    if trimmed.len() > MAX_EXPRESSION_LENGTH {
        return Err(format!("condition expression exceeds {MAX_EXPRESSION_LENGTH} characters"));
    }

    let tokens = tokenize(trimmed)?;
    let mut parser = Parser { tokens, position: 0, depth: 0 };
    let expression = parser.parse_or()?;
    if let Some(token) = parser.peek() {
        return Err(format!("unexpected {} after end of expression", token.describe()));
    }
    Ok(expression)
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut index = 0;

    while index < chars.len() {
        let current = chars[index];
        let next = chars.get(index + 1).copied();

        match current {
            c if c.is_whitespace() => index += 1,
            '(' => {
                tokens.push(Token::LParen);
                index += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                index += 1;
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                index += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                index += 2;
            }
            '=' if next == Some('=') => {
                tokens.push(Token::Op(CompareOp::Eq));
                index += 2;
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Op(CompareOp::Ne));
                index += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                index += 1;
            }
            '<' | '>' => {
                let inclusive = next == Some('=');
                let op = match (current, inclusive) {
                    ('<', true) => CompareOp::Le,
                    ('<', false) => CompareOp::Lt,
                    (_, true) => CompareOp::Ge,
                    (_, false) => CompareOp::Gt,
                };
                tokens.push(Token::Op(op));
                index += if inclusive { 2 } else { 1 };
            }
            '\'' | '"' => {
                let (literal, consumed) = read_string(&chars[index..], current)?;
                tokens.push(Token::Literal(Value::String(literal)));
                index += consumed;
            }
            '{' if next == Some('{') => {
                let start = index + 2;
                let Some(offset) = find_placeholder_end(&chars[start..]) else {
                    return Err("unclosed '{{' placeholder in condition".into());
                };
                let path: String = chars[start..start + offset].iter().collect();
                let path = path.trim();
                if !is_path(path) {
                    return Err(format!("invalid placeholder path '{path}' in condition"));
                }
                tokens.push(Token::Path(path.to_string()));
                index = start + offset + 2;
            }
            c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let start = index;
                index += 1;
                while index < chars.len() && (chars[index].is_ascii_digit() || chars[index] == '.') {
                    index += 1;
                }
                let text: String = chars[start..index].iter().collect();
                tokens.push(Token::Literal(parse_number(&text)?));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = index;
                while index < chars.len()
                    && (chars[index].is_ascii_alphanumeric() || matches!(chars[index], '_' | '.' | '-'))
                {
                    index += 1;
                }
                let word: String = chars[start..index].iter().collect();
                let following = chars[index..].iter().find(|c| !c.is_whitespace());
                if following == Some(&'(') {
                    return Err(format!("function calls are not allowed in conditions ('{word}')"));
                }
                tokens.push(keyword_or_path(&word)?);
            }
            other => return Err(format!("unexpected character '{other}' in condition")),
        }
    }

    Ok(tokens)
}

fn read_string(chars: &[char], quote: char) -> Result<(String, usize), String> {
    let mut literal = String::new();
    let mut index = 1;
    while index < chars.len() {
        match chars[index] {
            '\\' if index + 1 < chars.len() => {
                literal.push(chars[index + 1]);
                index += 2;
            }
            c if c == quote => return Ok((literal, index + 1)),
            c => {
                literal.push(c);
                index += 1;
            }
        }
    }
    Err("unterminated string literal in condition".into())
}

fn find_placeholder_end(chars: &[char]) -> Option<usize> {
    chars.windows(2).position(|pair| pair == ['}', '}'])
}

fn parse_number(text: &str) -> Result<Value, String> {
    if let Ok(integer) = text.parse::<i64>() {
        return Ok(Value::Number(integer.into()));
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| format!("invalid number '{text}' in condition"))
}

fn keyword_or_path(word: &str) -> Result<Token, String> {
    match word.to_ascii_lowercase().as_str() {
        "true" => Ok(Token::Literal(Value::Bool(true))),
        "false" => Ok(Token::Literal(Value::Bool(false))),
        "null" => Ok(Token::Literal(Value::Null)),
        _ if word.contains('.') && is_path(word) => Ok(Token::Path(word.to_string())),
        _ => Err(format!("unknown identifier '{word}' in condition; use a dotted path such as Request.Input.Name")),
    }
}

fn is_path(candidate: &str) -> bool {
    !candidate.is_empty()
        && candidate.split('.').all(|segment| {
            !segment.is_empty() && segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        })
        && candidate.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn enter(&mut self) -> Result<(), String> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(format!("condition nesting exceeds {MAX_NESTING_DEPTH} levels"));
        }
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            self.enter()?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, String> {
        let left = self.parse_operand()?;
        let Some(Token::Op(op)) = self.peek().cloned() else {
            return Ok(left);
        };
        self.advance();
        let right = self.parse_operand()?;
        if let Some(Token::Op(next)) = self.peek() {
            return Err(format!(
                "comparisons cannot be chained ('{}' followed by '{}'); use parentheses and '&&'",
                op.symbol(),
                next.symbol()
            ));
        }
        Ok(Expr::Compare(op, Box::new(left), Box::new(right)))
    }

    fn parse_operand(&mut self) -> Result<Expr, String> {
        match self.advance() {
            Some(Token::LParen) => {
                self.enter()?;
                let inner = self.parse_or()?;
                self.depth -= 1;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    Some(token) => Err(format!("expected ')' but found {}", token.describe())),
                    None => Err("missing closing ')'".into()),
                }
            }
            Some(Token::Literal(value)) => Ok(Expr::Literal(value)),
            Some(Token::Path(path)) => Ok(Expr::Path(path)),
            Some(token) => Err(format!("expected a value but found {}", token.describe())),
            None => Err("unexpected end of expression".into()),
        }
    }
}

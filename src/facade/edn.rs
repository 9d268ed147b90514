//! Reader for structured request bodies
//!
//! Bank requests arrive as small EDN-style literals:
//!
//! ```text
//! {:accounts [0 1 2 3], :total-amount 100}
//! {:from 1, :to 3, :amount 5}
//! ```
//!
//! The grammar is the subset those bodies use: maps, vectors, lists,
//! keywords, integers, strings, `nil`, booleans and bare symbols. Commas
//! are whitespace.

use crate::common::{Error, Result};

/// Deepest nesting of collections the reader accepts.
pub const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Form {
    Nil,
    Bool(bool),
    Int(i64),
    Str(String),
    Keyword(String),
    Symbol(String),
    Vector(Vec<Form>),
    List(Vec<Form>),
    Map(Vec<(Form, Form)>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Open(char),
    Close(char),
    Str(String),
    Atom(String),
}

/// Read exactly one form from `input`.
pub fn read(input: &str) -> Result<Form> {
    let tokens = tokenize(input)?;
    let mut reader = Reader {
        tokens,
        pos: 0,
        depth: 0,
    };
    let form = reader.form()?;
    if reader.pos != reader.tokens.len() {
        return Err(malformed("trailing input after form"));
    }
    Ok(form)
}

fn malformed(msg: impl Into<String>) -> Error {
    Error::MalformedRequest(msg.into())
}

fn is_delimiter(c: char) -> bool {
    matches!(c, '[' | ']' | '{' | '}' | '(' | ')' | '"' | ',') || c.is_whitespace()
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() || c == ',' => {
                chars.next();
            }
            '[' | '{' | '(' => {
                tokens.push(Token::Open(c));
                chars.next();
            }
            ']' | '}' | ')' => {
                tokens.push(Token::Close(c));
                chars.next();
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            Some((_, 'n')) => s.push('\n'),
                            Some((_, 't')) => s.push('\t'),
                            Some((_, other)) => s.push(other),
                            None => break,
                        },
                        other => s.push(other),
                    }
                }
                if !closed {
                    return Err(malformed("unterminated string"));
                }
                tokens.push(Token::Str(s));
            }
            _ => {
                let mut end = input.len();
                while let Some(&(i, c)) = chars.peek() {
                    if is_delimiter(c) {
                        end = i;
                        break;
                    }
                    chars.next();
                }
                tokens.push(Token::Atom(input[start..end].to_string()));
            }
        }
    }

    Ok(tokens)
}

struct Reader {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Reader {
    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn form(&mut self) -> Result<Form> {
        match self.next() {
            None => Err(malformed("unexpected end of input")),
            Some(Token::Open('[')) => Ok(Form::Vector(self.seq(']')?)),
            Some(Token::Open('(')) => Ok(Form::List(self.seq(')')?)),
            Some(Token::Open(_)) => {
                let items = self.seq('}')?;
                if items.len() % 2 != 0 {
                    return Err(malformed("map literal needs an even number of forms"));
                }
                let mut it = items.into_iter();
                let mut pairs = Vec::new();
                while let (Some(k), Some(v)) = (it.next(), it.next()) {
                    pairs.push((k, v));
                }
                Ok(Form::Map(pairs))
            }
            Some(Token::Close(c)) => Err(malformed(format!("unexpected '{}'", c))),
            Some(Token::Str(s)) => Ok(Form::Str(s)),
            Some(Token::Atom(atom)) => atom_form(atom),
        }
    }

    fn seq(&mut self, close: char) -> Result<Vec<Form>> {
        if self.depth >= MAX_DEPTH {
            return Err(malformed("nesting too deep"));
        }
        self.depth += 1;
        let items = self.items(close);
        self.depth -= 1;
        items
    }

    fn items(&mut self, close: char) -> Result<Vec<Form>> {
        let mut items = Vec::new();
        loop {
            match self.tokens.get(self.pos) {
                None => return Err(malformed(format!("missing '{}'", close))),
                Some(Token::Close(c)) if *c == close => {
                    self.pos += 1;
                    return Ok(items);
                }
                Some(Token::Close(c)) => {
                    return Err(malformed(format!("expected '{}', found '{}'", close, c)))
                }
                Some(_) => items.push(self.form()?),
            }
        }
    }
}

fn atom_form(atom: String) -> Result<Form> {
    match atom.as_str() {
        "nil" => return Ok(Form::Nil),
        "true" => return Ok(Form::Bool(true)),
        "false" => return Ok(Form::Bool(false)),
        _ => {}
    }
    if let Some(name) = atom.strip_prefix(':') {
        if name.is_empty() {
            return Err(malformed("empty keyword"));
        }
        return Ok(Form::Keyword(name.to_string()));
    }
    let first = atom.chars().next().unwrap_or(' ');
    let numeric = first.is_ascii_digit()
        || ((first == '-' || first == '+') && atom[1..].starts_with(|c: char| c.is_ascii_digit()));
    if numeric {
        return atom
            .parse::<i64>()
            .map(Form::Int)
            .map_err(|_| malformed(format!("invalid integer {}", atom)));
    }
    Ok(Form::Symbol(atom))
}

impl Form {
    pub fn type_name(&self) -> &'static str {
        match self {
            Form::Nil => "nil",
            Form::Bool(_) => "boolean",
            Form::Int(_) => "integer",
            Form::Str(_) => "string",
            Form::Keyword(_) => "keyword",
            Form::Symbol(_) => "symbol",
            Form::Vector(_) => "vector",
            Form::List(_) => "list",
            Form::Map(_) => "map",
        }
    }

    pub fn as_int(&self) -> Result<i64> {
        match self {
            Form::Int(v) => Ok(*v),
            other => Err(malformed(format!("expected integer, got {}", other.type_name()))),
        }
    }

    /// Elements of a vector or list.
    pub fn as_seq(&self) -> Result<&[Form]> {
        match self {
            Form::Vector(items) | Form::List(items) => Ok(items),
            other => Err(malformed(format!("expected vector, got {}", other.type_name()))),
        }
    }

    pub fn as_map(&self) -> Result<&[(Form, Form)]> {
        match self {
            Form::Map(pairs) => Ok(pairs),
            other => Err(malformed(format!("expected map, got {}", other.type_name()))),
        }
    }

    /// Value under `:keyword` in a map.
    pub fn get(&self, keyword: &str) -> Result<Option<&Form>> {
        Ok(self.as_map()?.iter().find_map(|(k, v)| match k {
            Form::Keyword(name) if name == keyword => Some(v),
            _ => None,
        }))
    }

    /// Value under `:keyword`, which must be present.
    pub fn require(&self, keyword: &str) -> Result<&Form> {
        self.get(keyword)?
            .ok_or_else(|| malformed(format!("missing :{}", keyword)))
    }
}

//! Forgiving parser for JSON text that is still being generated.
//!
//! The parser accepts any prefix of a valid JSON document and returns the
//! value that prefix describes so far: open strings are closed, open objects
//! and arrays are closed, partial literals are completed and object keys
//! without a value are dropped. Anything that cannot be the prefix of valid
//! JSON is a failed parse.

use serde_json::{Map, Number, Value};

/// How the returned value was obtained.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseState {
    /// No input yet.
    UndefinedInput,
    /// The text is complete, valid JSON.
    SuccessfulParse,
    /// The text is an incomplete prefix that was closed off.
    RepairedParse,
    /// The text cannot be the prefix of valid JSON.
    FailedParse,
}

/// Best-effort value plus parse confidence.
#[derive(Clone, Debug, PartialEq)]
pub struct PartialParse {
    pub value: Option<Value>,
    pub state: ParseState,
}

impl PartialParse {
    fn new(value: Option<Value>, state: ParseState) -> Self {
        Self { value, state }
    }

    /// The value is usable for streaming emission.
    pub fn is_usable(&self) -> bool {
        self.value.is_some()
            && matches!(
                self.state,
                ParseState::SuccessfulParse | ParseState::RepairedParse
            )
    }
}

/// Parses complete or truncated JSON text.
pub fn parse_partial_json(text: &str) -> PartialParse {
    if text.trim().is_empty() {
        return PartialParse::new(None, ParseState::UndefinedInput);
    }
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return PartialParse::new(Some(value), ParseState::SuccessfulParse);
    }
    let mut parser = Parser::new(text);
    match parser.document() {
        Ok(Some(value)) => PartialParse::new(Some(value), ParseState::RepairedParse),
        Ok(None) | Err(Invalid) => PartialParse::new(None, ParseState::FailedParse),
    }
}

/// Strict parse used for final validation.
pub fn parse_complete_json(text: &str) -> Option<Value> {
    serde_json::from_str(text).ok()
}

#[derive(Debug)]
struct Invalid;

enum Parsed {
    Complete(Value),
    /// Input ended inside the value. `None` means nothing usable was read yet.
    Truncated(Option<Value>),
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if matches!(c, ' ' | '\t' | '\n' | '\r') {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn document(&mut self) -> Result<Option<Value>, Invalid> {
        match self.value()? {
            Parsed::Complete(value) => {
                self.skip_ws();
                if self.at_end() {
                    Ok(Some(value))
                } else {
                    Err(Invalid)
                }
            }
            Parsed::Truncated(value) => Ok(value),
        }
    }

    fn value(&mut self) -> Result<Parsed, Invalid> {
        self.skip_ws();
        match self.peek() {
            None => Ok(Parsed::Truncated(None)),
            Some('{') => self.object(),
            Some('[') => self.array(),
            Some('"') => Ok(match self.string()? {
                (text, true) => Parsed::Complete(Value::String(text)),
                (text, false) => Parsed::Truncated(Some(Value::String(text))),
            }),
            Some('-' | '0'..='9') => self.number(),
            Some('t' | 'f' | 'n') => self.literal(),
            Some(_) => Err(Invalid),
        }
    }

    fn object(&mut self) -> Result<Parsed, Invalid> {
        self.bump();
        let mut map = Map::new();
        let mut expect_key = false;
        loop {
            self.skip_ws();
            match self.peek() {
                None => return Ok(Parsed::Truncated(Some(Value::Object(map)))),
                Some('}') if !expect_key => {
                    self.bump();
                    return Ok(Parsed::Complete(Value::Object(map)));
                }
                Some('"') => {}
                Some(_) => return Err(Invalid),
            }

            let (key, closed) = self.string()?;
            if !closed {
                return Ok(Parsed::Truncated(Some(Value::Object(map))));
            }
            self.skip_ws();
            match self.bump() {
                None => return Ok(Parsed::Truncated(Some(Value::Object(map)))),
                Some(':') => {}
                Some(_) => return Err(Invalid),
            }
            match self.value()? {
                Parsed::Complete(value) => {
                    map.insert(key, value);
                }
                Parsed::Truncated(value) => {
                    if let Some(value) = value {
                        map.insert(key, value);
                    }
                    return Ok(Parsed::Truncated(Some(Value::Object(map))));
                }
            }

            self.skip_ws();
            match self.bump() {
                None => return Ok(Parsed::Truncated(Some(Value::Object(map)))),
                Some(',') => expect_key = true,
                Some('}') => return Ok(Parsed::Complete(Value::Object(map))),
                Some(_) => return Err(Invalid),
            }
        }
    }

    fn array(&mut self) -> Result<Parsed, Invalid> {
        self.bump();
        let mut items = Vec::new();
        let mut expect_item = false;
        loop {
            self.skip_ws();
            match self.peek() {
                None => return Ok(Parsed::Truncated(Some(Value::Array(items)))),
                Some(']') if !expect_item => {
                    self.bump();
                    return Ok(Parsed::Complete(Value::Array(items)));
                }
                Some(']') => return Err(Invalid),
                Some(_) => {}
            }

            match self.value()? {
                Parsed::Complete(value) => items.push(value),
                Parsed::Truncated(value) => {
                    items.extend(value);
                    return Ok(Parsed::Truncated(Some(Value::Array(items))));
                }
            }

            self.skip_ws();
            match self.bump() {
                None => return Ok(Parsed::Truncated(Some(Value::Array(items)))),
                Some(',') => expect_item = true,
                Some(']') => return Ok(Parsed::Complete(Value::Array(items))),
                Some(_) => return Err(Invalid),
            }
        }
    }

    /// Returns the decoded text and whether the closing quote was seen.
    fn string(&mut self) -> Result<(String, bool), Invalid> {
        self.bump();
        let mut out = String::new();
        loop {
            let Some(c) = self.bump() else {
                return Ok((out, false));
            };
            match c {
                '"' => return Ok((out, true)),
                '\\' => {
                    let Some(escaped) = self.bump() else {
                        return Ok((out, false));
                    };
                    match escaped {
                        '"' => out.push('"'),
                        '\\' => out.push('\\'),
                        '/' => out.push('/'),
                        'b' => out.push('\u{0008}'),
                        'f' => out.push('\u{000C}'),
                        'n' => out.push('\n'),
                        'r' => out.push('\r'),
                        't' => out.push('\t'),
                        'u' => match self.unicode_escape()? {
                            Some(decoded) => out.push(decoded),
                            None => return Ok((out, false)),
                        },
                        _ => return Err(Invalid),
                    }
                }
                c if (c as u32) < 0x20 => return Err(Invalid),
                c => out.push(c),
            }
        }
    }

    /// Decodes the digits after `\u`. `None` when the input ends first.
    fn unicode_escape(&mut self) -> Result<Option<char>, Invalid> {
        let Some(high) = self.hex4()? else {
            return Ok(None);
        };
        if !(0xD800..0xDC00).contains(&high) {
            return char::from_u32(high).map(Some).ok_or(Invalid);
        }
        match (self.bump(), self.bump()) {
            (Some('\\'), Some('u')) => {}
            (None, _) | (Some('\\'), None) => return Ok(None),
            _ => return Err(Invalid),
        }
        let Some(low) = self.hex4()? else {
            return Ok(None);
        };
        if !(0xDC00..0xE000).contains(&low) {
            return Err(Invalid);
        }
        let code = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
        char::from_u32(code).map(Some).ok_or(Invalid)
    }

    fn hex4(&mut self) -> Result<Option<u32>, Invalid> {
        let mut code = 0u32;
        for _ in 0..4 {
            let Some(c) = self.bump() else {
                return Ok(None);
            };
            code = code * 16 + c.to_digit(16).ok_or(Invalid)?;
        }
        Ok(Some(code))
    }

    fn number(&mut self) -> Result<Parsed, Invalid> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, '0'..='9' | '-' | '+' | '.' | 'e' | 'E') {
                self.pos += 1;
            } else {
                break;
            }
        }
        let raw = &self.src[start..self.pos];
        if !self.at_end() {
            return parse_number(raw).map(Parsed::Complete).ok_or(Invalid);
        }
        // The number may still grow; report the longest valid prefix.
        let trimmed = raw.trim_end_matches(['-', '+', '.', 'e', 'E']);
        Ok(Parsed::Truncated(parse_number(trimmed)))
    }

    fn literal(&mut self) -> Result<Parsed, Invalid> {
        let rest = &self.src[self.pos..];
        for (word, value) in [
            ("true", Value::Bool(true)),
            ("false", Value::Bool(false)),
            ("null", Value::Null),
        ] {
            if rest.starts_with(word) {
                self.pos += word.len();
                return Ok(Parsed::Complete(value));
            }
            if word.starts_with(rest) {
                self.pos = self.src.len();
                return Ok(Parsed::Truncated(Some(value)));
            }
        }
        Err(Invalid)
    }
}

fn parse_number(raw: &str) -> Option<Value> {
    if raw.is_empty() {
        return None;
    }
    match serde_json::from_str::<Number>(raw) {
        Ok(number) => Some(Value::Number(number)),
        Err(_) => None,
    }
}

//! Reading-state metadata stored in a bundle.
//!
//! KOReader writes `metadata.<ext>.lua` as a Lua table literal:
//!
//! ```lua
//! -- we can read Lua syntax here!
//! return {
//!     ["doc_pages"] = 238,
//!     ["last_page"] = 38,
//!     ["percent_finished"] = 0.15966386554622,
//!     ["summary"] = { ["status"] = "reading" },
//! }
//! ```
//!
//! The literal is parsed into [`LuaValue`] once and then mapped onto the
//! typed [`BundleMetadata`]; unknown keys are ignored.

use crate::error::{Result, SyncError};

/// A parsed Lua value. Only the literal subset KOReader emits is supported.
#[derive(Debug, Clone, PartialEq)]
pub enum LuaValue {
    /// `nil`.
    Nil,
    /// `true` / `false`.
    Bool(bool),
    /// Any number (Lua 5.1 numbers are doubles).
    Number(f64),
    /// String literal.
    String(String),
    /// Table constructor.
    Table(LuaTable),
}

/// Key of a table field.
#[derive(Debug, Clone, PartialEq)]
pub enum LuaKey {
    /// `["name"] = v` or `name = v`.
    Name(String),
    /// `[1] = v` or a positional value.
    Index(i64),
}

/// Table constructor contents in source order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LuaTable {
    /// Fields in source order.
    pub fields: Vec<(LuaKey, LuaValue)>,
}

impl LuaTable {
    /// Value of a named field.
    pub fn get(&self, name: &str) -> Option<&LuaValue> {
        self.fields.iter().find_map(|(k, v)| match k {
            LuaKey::Name(n) if n == name => Some(v),
            _ => None,
        })
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl LuaValue {
    /// Numeric value, if any.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            LuaValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// String value, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            LuaValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Table value, if any.
    pub fn as_table(&self) -> Option<&LuaTable> {
        match self {
            LuaValue::Table(t) => Some(t),
            _ => None,
        }
    }
}

/// Typed view of a bundle's metadata entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BundleMetadata {
    /// Last page read (paged documents), 0 when absent.
    pub last_page: u64,
    /// Fraction read, clamped to `[0, 1]`, 0 when absent.
    pub percent_finished: f64,
    /// Page count of the document.
    pub doc_pages: Option<u64>,
    /// Path of the document on the device that wrote the entry.
    pub doc_path: Option<String>,
    /// Reading status from the summary (`reading`, `complete`, ...).
    pub status: Option<String>,
    /// Number of highlights/annotations.
    pub highlight_count: usize,
    /// Number of bookmarks.
    pub bookmark_count: usize,
}

impl BundleMetadata {
    /// Parse the contents of a metadata entry.
    pub fn parse(source: &str) -> Result<Self> {
        Ok(Self::from_lua(&parse(source)?))
    }

    /// Map a parsed table onto the typed schema.
    pub fn from_lua(value: &LuaValue) -> Self {
        let Some(table) = value.as_table() else {
            return Self::default();
        };

        let number = |key: &str| table.get(key).and_then(LuaValue::as_number);
        let count = |key: &str| table.get(key).and_then(LuaValue::as_table).map_or(0, |t| t.len());

        let last_page = number("last_page")
            .filter(|n| n.is_finite() && *n >= 0.0)
            .map_or(0, |n| n as u64);
        let percent_finished = number("percent_finished")
            .filter(|n| n.is_finite())
            .map_or(0.0, |n| n.clamp(0.0, 1.0));

        // Newer KOReader versions keep highlights in "annotations"
        let highlight_count = count("annotations").max(count("highlight"));

        Self {
            last_page,
            percent_finished,
            doc_pages: number("doc_pages")
                .filter(|n| n.is_finite() && *n >= 0.0)
                .map(|n| n as u64),
            doc_path: table
                .get("doc_path")
                .and_then(LuaValue::as_str)
                .map(str::to_string),
            status: table
                .get("summary")
                .and_then(LuaValue::as_table)
                .and_then(|s| s.get("status"))
                .and_then(LuaValue::as_str)
                .map(str::to_string),
            highlight_count,
            bookmark_count: count("bookmarks"),
        }
    }
}

/// Parse a Lua chunk of the form `[return] <value>`.
pub fn parse(source: &str) -> Result<LuaValue> {
    let mut parser = Parser::new(source);
    parser.skip_trivia();
    if parser.eat_word("return") {
        parser.skip_trivia();
    }
    let value = parser.value(0)?;
    parser.skip_trivia();
    parser.eat(b';');
    parser.skip_trivia();
    if !parser.at_end() {
        return Err(parser.error("trailing content after value"));
    }
    Ok(value)
}

/// Tables nested deeper than this are rejected.
const MAX_DEPTH: usize = 64;

struct Parser<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            src: source.as_bytes(),
            pos: 0,
        }
    }

    fn error(&self, message: &str) -> SyncError {
        let line = self.src[..self.pos.min(self.src.len())]
            .iter()
            .filter(|&&b| b == b'\n')
            .count()
            + 1;
        SyncError::Decode(format!("metadata line {}: {}", line, message))
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn eat(&mut self, byte: u8) -> bool {
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, byte: u8) -> Result<()> {
        if self.eat(byte) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", byte as char)))
        }
    }

    /// Consume `word` if it appears as a whole identifier.
    fn eat_word(&mut self, word: &str) -> bool {
        let end = self.pos + word.len();
        if self.src.get(self.pos..end) == Some(word.as_bytes())
            && !self.src.get(end).is_some_and(|b| is_ident_byte(*b))
        {
            self.pos = end;
            true
        } else {
            false
        }
    }

    /// Skip whitespace and `--` comments, including `--[[ ]]` blocks.
    fn skip_trivia(&mut self) {
        loop {
            while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
                self.pos += 1;
            }
            if self.peek() == Some(b'-') && self.peek_at(1) == Some(b'-') {
                self.pos += 2;
                if let Some(level) = self.long_bracket_level() {
                    // Unterminated comments run to the end of input
                    if self.long_bracket_body(level).is_err() {
                        self.pos = self.src.len();
                    }
                } else {
                    while self.peek().is_some_and(|b| b != b'\n') {
                        self.pos += 1;
                    }
                }
                continue;
            }
            break;
        }
    }

    fn value(&mut self, depth: usize) -> Result<LuaValue> {
        self.skip_trivia();
        match self.peek() {
            None => Err(self.error("unexpected end of input")),
            Some(b'{') => self.table(depth),
            Some(b'"') | Some(b'\'') => self.quoted_string().map(LuaValue::String),
            Some(b'[') if self.long_bracket_level().is_some() => {
                let level = self.long_bracket_level().unwrap_or(0);
                self.long_string(level).map(LuaValue::String)
            }
            Some(b) if b == b'-' || b == b'.' || b.is_ascii_digit() => {
                self.number().map(LuaValue::Number)
            }
            Some(_) => {
                if self.eat_word("true") {
                    Ok(LuaValue::Bool(true))
                } else if self.eat_word("false") {
                    Ok(LuaValue::Bool(false))
                } else if self.eat_word("nil") {
                    Ok(LuaValue::Nil)
                } else {
                    Err(self.error("unexpected token"))
                }
            }
        }
    }

    fn table(&mut self, depth: usize) -> Result<LuaValue> {
        if depth >= MAX_DEPTH {
            return Err(self.error("tables nested too deeply"));
        }
        self.expect(b'{')?;

        let mut table = LuaTable::default();
        let mut next_index = 1i64;

        loop {
            self.skip_trivia();
            if self.eat(b'}') {
                break;
            }

            let key = if self.peek() == Some(b'[') && self.long_bracket_level().is_none() {
                self.pos += 1;
                let key = match self.value(depth + 1)? {
                    LuaValue::String(s) => LuaKey::Name(s),
                    LuaValue::Number(n) if n.fract() == 0.0 => LuaKey::Index(n as i64),
                    _ => return Err(self.error("unsupported table key")),
                };
                self.skip_trivia();
                self.expect(b']')?;
                self.skip_trivia();
                self.expect(b'=')?;
                Some(key)
            } else if let Some(name) = self.identifier_assignment() {
                Some(LuaKey::Name(name))
            } else {
                None
            };

            let value = self.value(depth + 1)?;
            let key = key.unwrap_or_else(|| {
                let index = next_index;
                next_index += 1;
                LuaKey::Index(index)
            });
            table.fields.push((key, value));

            self.skip_trivia();
            if self.eat(b',') || self.eat(b';') {
                continue;
            }
            self.skip_trivia();
            self.expect(b'}')?;
            break;
        }

        Ok(LuaValue::Table(table))
    }

    /// `name =` (but not `name ==`); restores the position otherwise.
    fn identifier_assignment(&mut self) -> Option<String> {
        let start = self.pos;
        if !self.peek().is_some_and(|b| b.is_ascii_alphabetic() || b == b'_') {
            return None;
        }
        while self.peek().is_some_and(is_ident_byte) {
            self.pos += 1;
        }
        let name = String::from_utf8_lossy(&self.src[start..self.pos]).to_string();
        if matches!(name.as_str(), "true" | "false" | "nil") {
            self.pos = start;
            return None;
        }

        self.skip_trivia();
        if self.peek() == Some(b'=') && self.peek_at(1) != Some(b'=') {
            self.pos += 1;
            Some(name)
        } else {
            self.pos = start;
            None
        }
    }

    fn number(&mut self) -> Result<f64> {
        let start = self.pos;
        let negative = self.eat(b'-');
        self.skip_trivia();

        if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x') | Some(b'X')) {
            self.pos += 2;
            let digits_start = self.pos;
            while self.peek().is_some_and(|b| b.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            let digits = std::str::from_utf8(&self.src[digits_start..self.pos])
                .map_err(|_| self.error("invalid number"))?;
            let value =
                u64::from_str_radix(digits, 16).map_err(|_| self.error("invalid hex number"))?;
            let value = value as f64;
            return Ok(if negative { -value } else { value });
        }

        let digits_start = self.pos;
        while self
            .peek()
            .is_some_and(|b| b.is_ascii_digit() || b == b'.')
        {
            self.pos += 1;
        }
        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            self.pos += 1;
            if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                self.pos += 1;
            }
            while self.peek().is_some_and(|b| b.is_ascii_digit()) {
                self.pos += 1;
            }
        }

        let parsed = std::str::from_utf8(&self.src[digits_start..self.pos])
            .ok()
            .and_then(|text| text.parse::<f64>().ok());
        let Some(value) = parsed else {
            self.pos = start;
            return Err(self.error("invalid number"));
        };
        Ok(if negative { -value } else { value })
    }

    fn quoted_string(&mut self) -> Result<String> {
        let quote = self.peek().ok_or_else(|| self.error("expected string"))?;
        self.pos += 1;
        let mut out = Vec::new();

        loop {
            let b = self
                .peek()
                .ok_or_else(|| self.error("unterminated string"))?;
            self.pos += 1;
            match b {
                b if b == quote => break,
                b'\n' => return Err(self.error("newline in string")),
                b'\\' => {
                    let escaped = self
                        .peek()
                        .ok_or_else(|| self.error("unterminated string"))?;
                    self.pos += 1;
                    match escaped {
                        b'n' => out.push(b'\n'),
                        b't' => out.push(b'\t'),
                        b'r' => out.push(b'\r'),
                        b'a' => out.push(0x07),
                        b'b' => out.push(0x08),
                        b'f' => out.push(0x0c),
                        b'v' => out.push(0x0b),
                        b'\n' => out.push(b'\n'),
                        b'0'..=b'9' => {
                            // \ddd, up to three decimal digits
                            let mut value = u32::from(escaped - b'0');
                            for _ in 0..2 {
                                match self.peek() {
                                    Some(d) if d.is_ascii_digit() => {
                                        value = value * 10 + u32::from(d - b'0');
                                        self.pos += 1;
                                    }
                                    _ => break,
                                }
                            }
                            let byte =
                                u8::try_from(value).map_err(|_| self.error("escape too large"))?;
                            out.push(byte);
                        }
                        other => out.push(other),
                    }
                }
                other => out.push(other),
            }
        }

        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// Level of a long bracket `[==[` at the cursor, without consuming it.
    fn long_bracket_level(&self) -> Option<usize> {
        if self.peek() != Some(b'[') {
            return None;
        }
        let mut level = 0;
        while self.peek_at(1 + level) == Some(b'=') {
            level += 1;
        }
        (self.peek_at(1 + level) == Some(b'[')).then_some(level)
    }

    fn long_string(&mut self, level: usize) -> Result<String> {
        let body = self.long_bracket_body(level)?;
        // A newline right after the opening bracket is skipped
        let trimmed = body
            .strip_prefix("\r\n")
            .or_else(|| body.strip_prefix('\n'))
            .unwrap_or(&body);
        Ok(trimmed.to_string())
    }

    /// Consume `[=*[ ... ]=*]` and return its body.
    fn long_bracket_body(&mut self, level: usize) -> Result<String> {
        self.pos += level + 2;
        let start = self.pos;
        let mut closing = Vec::with_capacity(level + 2);
        closing.push(b']');
        closing.extend(std::iter::repeat_n(b'=', level));
        closing.push(b']');

        while self.pos + closing.len() <= self.src.len() {
            if self.src[self.pos..].starts_with(&closing) {
                let body = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
                self.pos += closing.len();
                return Ok(body);
            }
            self.pos += 1;
        }

        Err(self.error("unterminated long bracket"))
    }
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"-- we can read Lua syntax here!
return {
    ["bookmarks"] = {
        [1] = {
            ["notes"] = "Chapter 3",
            ["page"] = 12,
        },
    },
    ["doc_pages"] = 238,
    ["doc_path"] = "/mnt/onboard/Books/Dune.pdf",
    ["highlight"] = {},
    ["last_page"] = 38,
    ["percent_finished"] = 0.15966386554622,
    ["summary"] = {
        ["modified"] = "2024-01-20",
        ["status"] = "reading",
    },
    ["copt_font_size"] = 22,
    ["hinting"] = true,
}
"#;

    #[test]
    fn parses_koreader_metadata() {
        let meta = BundleMetadata::parse(SAMPLE).unwrap();
        assert_eq!(meta.last_page, 38);
        assert!((meta.percent_finished - 0.15966386554622).abs() < 1e-12);
        assert_eq!(meta.doc_pages, Some(238));
        assert_eq!(meta.doc_path.as_deref(), Some("/mnt/onboard/Books/Dune.pdf"));
        assert_eq!(meta.status.as_deref(), Some("reading"));
        assert_eq!(meta.bookmark_count, 1);
        assert_eq!(meta.highlight_count, 0);
    }

    #[test]
    fn missing_fields_use_defaults() {
        let meta = BundleMetadata::parse("return { [\"doc_pages\"] = 10 }").unwrap();
        assert_eq!(meta.last_page, 0);
        assert_eq!(meta.percent_finished, 0.0);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let meta =
            BundleMetadata::parse("return { last_page = -4, percent_finished = 1.7 }").unwrap();
        assert_eq!(meta.last_page, 0);
        assert_eq!(meta.percent_finished, 1.0);
    }

    #[test]
    fn parses_strings_and_positional_values() {
        let value = parse(r#"{ "a\"b", 'c\65', [[long
text]], -1.5e2, 0x10, nil, false }"#)
        .unwrap();
        let table = value.as_table().unwrap();
        let values: Vec<&LuaValue> = table.fields.iter().map(|(_, v)| v).collect();
        assert_eq!(values[0], &LuaValue::String("a\"b".to_string()));
        assert_eq!(values[1], &LuaValue::String("cA".to_string()));
        assert_eq!(values[2], &LuaValue::String("long\ntext".to_string()));
        assert_eq!(values[3], &LuaValue::Number(-150.0));
        assert_eq!(values[4], &LuaValue::Number(16.0));
        assert_eq!(values[5], &LuaValue::Nil);
        assert_eq!(values[6], &LuaValue::Bool(false));
        assert_eq!(table.fields[6].0, LuaKey::Index(7));
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(parse("return { [\"a\"] = }").is_err());
        assert!(parse("return { \"unterminated }").is_err());
        assert!(parse("return {} garbage").is_err());
    }

    #[test]
    fn skips_block_comments() {
        let value = parse("--[[ header\n comment ]] return { x = 1 } -- trailing").unwrap();
        assert_eq!(
            value.as_table().unwrap().get("x"),
            Some(&LuaValue::Number(1.0))
        );
    }
}

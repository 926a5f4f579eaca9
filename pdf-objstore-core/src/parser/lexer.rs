//! PDF Lexer
//!
//! Tokenizes PDF syntax according to ISO 32000-1 Section 7.2.
//!
//! The lexer works over an in-memory byte slice (an owned buffer or a memory
//! map) and exposes its cursor through [`Lexer::position`] and
//! [`Lexer::set_position`], so callers can seek to an xref offset, parse,
//! and backtrack freely.

use super::{ParseError, ParseResult};

/// PDF Token types
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Boolean: true or false
    Boolean(bool),

    /// Integer number
    Integer(i64),

    /// Real number
    Real(f64),

    /// String (literal or hexadecimal)
    String(Vec<u8>),

    /// Name object (e.g., /Type)
    Name(String),

    /// Left square bracket [
    ArrayStart,

    /// Right square bracket ]
    ArrayEnd,

    /// Dictionary start <<
    DictStart,

    /// Dictionary end >>
    DictEnd,

    /// Stream keyword
    Stream,

    /// Endstream keyword
    EndStream,

    /// Obj keyword
    Obj,

    /// Endobj keyword
    EndObj,

    /// R keyword of an indirect reference
    R,

    /// Xref keyword
    XRef,

    /// Trailer keyword
    Trailer,

    /// StartXRef keyword
    StartXRef,

    /// Null object
    Null,

    /// Any other bare word
    Keyword(String),

    /// Comment (usually ignored)
    Comment(Vec<u8>),

    /// End of file
    Eof,
}

/// PDF whitespace characters (ISO 32000-1 Table 1)
pub fn is_whitespace(byte: u8) -> bool {
    matches!(byte, b'\0' | b'\t' | b'\n' | b'\x0C' | b'\r' | b' ')
}

/// PDF delimiter characters (ISO 32000-1 Table 2)
pub fn is_delimiter(byte: u8) -> bool {
    matches!(
        byte,
        b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
    )
}

fn is_regular(byte: u8) -> bool {
    !is_whitespace(byte) && !is_delimiter(byte)
}

/// PDF Lexer for tokenizing PDF content
#[derive(Debug, Clone)]
pub struct Lexer<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer positioned at the start of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Create a new lexer positioned at `position`
    pub fn at(data: &'a [u8], position: usize) -> Self {
        Self {
            data,
            position: position.min(data.len()),
        }
    }

    /// Current byte offset of the cursor
    pub fn position(&self) -> usize {
        self.position
    }

    /// Move the cursor; positions past the end clamp to the end
    pub fn set_position(&mut self, position: usize) {
        self.position = position.min(self.data.len());
    }

    /// The underlying bytes
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn is_eof(&self) -> bool {
        self.position >= self.data.len()
    }

    /// Peek at the next byte without consuming it
    pub fn peek_byte(&self) -> Option<u8> {
        self.data.get(self.position).copied()
    }

    fn consume_byte(&mut self) -> Option<u8> {
        let byte = self.peek_byte()?;
        self.position += 1;
        Some(byte)
    }

    /// Get the next token, skipping comments
    pub fn next_token(&mut self) -> ParseResult<Token> {
        loop {
            match self.next_raw_token()? {
                Token::Comment(_) => continue,
                token => return Ok(token),
            }
        }
    }

    /// Peek the next token without consuming it
    pub fn peek_token(&mut self) -> ParseResult<Token> {
        let saved = self.position;
        let token = self.next_token();
        self.position = saved;
        token
    }

    /// Get the next token, including comments
    pub fn next_raw_token(&mut self) -> ParseResult<Token> {
        self.skip_whitespace();

        let ch = match self.peek_byte() {
            Some(ch) => ch,
            None => return Ok(Token::Eof),
        };

        match ch {
            b'%' => Ok(self.read_comment()),
            b'/' => Ok(self.read_name()),
            b'(' => self.read_literal_string(),
            b'<' => self.read_angle_bracket(),
            b'>' => {
                self.consume_byte();
                if self.peek_byte() == Some(b'>') {
                    self.consume_byte();
                    Ok(Token::DictEnd)
                } else {
                    Err(ParseError::syntax(self.position, "Expected '>' after '>'"))
                }
            }
            b'[' => {
                self.consume_byte();
                Ok(Token::ArrayStart)
            }
            b']' => {
                self.consume_byte();
                Ok(Token::ArrayEnd)
            }
            b'+' | b'-' | b'0'..=b'9' | b'.' => self.read_number(),
            b')' | b'{' | b'}' => Err(ParseError::syntax(
                self.position,
                format!("Unexpected character: {}", ch as char),
            )),
            _ => Ok(self.read_keyword()),
        }
    }

    /// Skip whitespace and return the number of bytes skipped
    pub fn skip_whitespace(&mut self) -> usize {
        let start = self.position;
        while let Some(ch) = self.peek_byte() {
            if !is_whitespace(ch) {
                break;
            }
            self.position += 1;
        }
        self.position - start
    }

    /// Skip the end-of-line marker that follows the `stream` keyword
    pub fn skip_stream_eol(&mut self) {
        // Tolerate trailing spaces before the EOL
        while self.peek_byte() == Some(b' ') {
            self.position += 1;
        }
        match self.peek_byte() {
            Some(b'\r') => {
                self.position += 1;
                if self.peek_byte() == Some(b'\n') {
                    self.position += 1;
                }
            }
            Some(b'\n') => self.position += 1,
            _ => {}
        }
    }

    /// Take `len` raw bytes starting at the cursor
    pub fn take_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.position.checked_add(len)?;
        let bytes = self.data.get(self.position..end)?;
        self.position = end;
        Some(bytes)
    }

    /// Find the next occurrence of `needle` at or after the cursor
    pub fn find(&self, needle: &[u8]) -> Option<usize> {
        find_bytes(&self.data[self.position..], needle).map(|i| i + self.position)
    }

    /// Whether the bytes at the cursor (after whitespace) start with `prefix`
    pub fn lookahead_is(&self, prefix: &[u8]) -> bool {
        let mut pos = self.position;
        while pos < self.data.len() && is_whitespace(self.data[pos]) {
            pos += 1;
        }
        self.data[pos..].starts_with(prefix)
    }

    fn read_comment(&mut self) -> Token {
        self.consume_byte(); // '%'
        let start = self.position;
        while let Some(ch) = self.peek_byte() {
            if ch == b'\n' || ch == b'\r' {
                break;
            }
            self.position += 1;
        }
        Token::Comment(self.data[start..self.position].to_vec())
    }

    /// Read a name object (e.g., /Type)
    fn read_name(&mut self) -> Token {
        self.consume_byte(); // '/'
        let mut name = Vec::new();

        while let Some(ch) = self.peek_byte() {
            if !is_regular(ch) {
                break;
            }
            self.position += 1;

            // Hex codes in names (e.g., /A#20B means /A B)
            if ch == b'#' {
                let hex = self
                    .data
                    .get(self.position..self.position + 2)
                    .and_then(|pair| std::str::from_utf8(pair).ok())
                    .and_then(|pair| u8::from_str_radix(pair, 16).ok());
                match hex {
                    Some(value) => {
                        name.push(value);
                        self.position += 2;
                    }
                    // Malformed escapes are kept literally
                    None => name.push(ch),
                }
            } else {
                name.push(ch);
            }
        }

        Token::Name(String::from_utf8_lossy(&name).into_owned())
    }

    /// Read a literal string (parentheses)
    fn read_literal_string(&mut self) -> ParseResult<Token> {
        self.consume_byte(); // '('
        let mut string = Vec::new();
        let mut paren_depth = 1;

        loop {
            let ch = self
                .consume_byte()
                .ok_or_else(|| ParseError::syntax(self.position, "Unterminated string"))?;

            match ch {
                b'\\' => {
                    let escaped = self
                        .consume_byte()
                        .ok_or_else(|| ParseError::syntax(self.position, "Unterminated string"))?;
                    match escaped {
                        b'n' => string.push(b'\n'),
                        b'r' => string.push(b'\r'),
                        b't' => string.push(b'\t'),
                        b'b' => string.push(b'\x08'),
                        b'f' => string.push(b'\x0C'),
                        b'0'..=b'7' => {
                            let mut value = u32::from(escaped - b'0');
                            for _ in 0..2 {
                                match self.peek_byte() {
                                    Some(next @ b'0'..=b'7') => {
                                        self.position += 1;
                                        value = value * 8 + u32::from(next - b'0');
                                    }
                                    _ => break,
                                }
                            }
                            string.push(value as u8);
                        }
                        // Line continuation
                        b'\r' => {
                            if self.peek_byte() == Some(b'\n') {
                                self.position += 1;
                            }
                        }
                        b'\n' => {}
                        other => string.push(other),
                    }
                }
                b'(' => {
                    paren_depth += 1;
                    string.push(ch);
                }
                b')' => {
                    paren_depth -= 1;
                    if paren_depth == 0 {
                        break;
                    }
                    string.push(ch);
                }
                _ => string.push(ch),
            }
        }

        Ok(Token::String(string))
    }

    /// Read angle bracket tokens (hex strings or dict markers)
    fn read_angle_bracket(&mut self) -> ParseResult<Token> {
        self.consume_byte(); // '<'

        if self.peek_byte() == Some(b'<') {
            self.consume_byte();
            return Ok(Token::DictStart);
        }

        let mut digits = Vec::new();
        loop {
            let ch = self
                .consume_byte()
                .ok_or_else(|| ParseError::syntax(self.position, "Unterminated hex string"))?;
            match ch {
                b'>' => break,
                _ if ch.is_ascii_hexdigit() => digits.push(ch),
                _ if is_whitespace(ch) => {}
                _ => {
                    return Err(ParseError::syntax(
                        self.position,
                        "Invalid character in hex string",
                    ))
                }
            }
        }

        // Pad with 0 if odd number of digits
        if digits.len() % 2 != 0 {
            digits.push(b'0');
        }

        let bytes = digits
            .chunks(2)
            .map(|pair| (hex_value(pair[0]) << 4) | hex_value(pair[1]))
            .collect();

        Ok(Token::String(bytes))
    }

    /// Read a number (integer or real)
    fn read_number(&mut self) -> ParseResult<Token> {
        let start = self.position;
        let mut has_dot = false;

        if matches!(self.peek_byte(), Some(b'+' | b'-')) {
            self.position += 1;
        }

        while let Some(ch) = self.peek_byte() {
            match ch {
                b'0'..=b'9' => self.position += 1,
                b'.' if !has_dot => {
                    has_dot = true;
                    self.position += 1;
                }
                _ => break,
            }
        }

        let text = std::str::from_utf8(&self.data[start..self.position])
            .map_err(|_| ParseError::syntax(start, "Invalid number"))?;

        if matches!(text, "+" | "-" | "." | "+." | "-.") {
            // A lone sign or dot reads as zero, like most viewers do
            return Ok(Token::Integer(0));
        }

        if has_dot {
            let value = text
                .parse::<f64>()
                .map_err(|_| ParseError::syntax(start, format!("Invalid real number: '{text}'")))?;
            Ok(Token::Real(value))
        } else {
            match text.parse::<i64>() {
                Ok(value) => Ok(Token::Integer(value)),
                // Out of range integers degrade to reals
                Err(_) => text
                    .parse::<f64>()
                    .map(Token::Real)
                    .map_err(|_| ParseError::syntax(start, format!("Invalid integer: '{text}'"))),
            }
        }
    }

    /// Read a bare word and classify it
    fn read_keyword(&mut self) -> Token {
        let start = self.position;
        while let Some(ch) = self.peek_byte() {
            if !is_regular(ch) {
                break;
            }
            self.position += 1;
        }
        let word = &self.data[start..self.position];
        match word {
            b"true" => Token::Boolean(true),
            b"false" => Token::Boolean(false),
            b"null" => Token::Null,
            b"obj" => Token::Obj,
            b"endobj" => Token::EndObj,
            b"stream" => Token::Stream,
            b"endstream" => Token::EndStream,
            b"R" => Token::R,
            b"xref" => Token::XRef,
            b"trailer" => Token::Trailer,
            b"startxref" => Token::StartXRef,
            _ => Token::Keyword(String::from_utf8_lossy(word).into_owned()),
        }
    }
}

fn hex_value(ch: u8) -> u8 {
    match ch {
        b'0'..=b'9' => ch - b'0',
        b'A'..=b'F' => ch - b'A' + 10,
        b'a'..=b'f' => ch - b'a' + 10,
        _ => 0,
    }
}

/// Find the first occurrence of `needle` in `haystack`
pub fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Find the last occurrence of `needle` in `haystack`
pub fn rfind_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(input: &[u8]) -> Vec<Token> {
        let mut lexer = Lexer::new(input);
        let mut out = Vec::new();
        loop {
            match lexer.next_token().unwrap() {
                Token::Eof => break,
                token => out.push(token),
            }
        }
        out
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            tokens(b"42 -17 +3 3.14 -.5 0."),
            vec![
                Token::Integer(42),
                Token::Integer(-17),
                Token::Integer(3),
                Token::Real(3.14),
                Token::Real(-0.5),
                Token::Real(0.0),
            ]
        );
    }

    #[test]
    fn test_object_header_keywords() {
        assert_eq!(
            tokens(b"12 0 obj\nnull\nendobj"),
            vec![
                Token::Integer(12),
                Token::Integer(0),
                Token::Obj,
                Token::Null,
                Token::EndObj,
            ]
        );
    }

    #[test]
    fn test_reference_tokens() {
        assert_eq!(
            tokens(b"5 0 R"),
            vec![Token::Integer(5), Token::Integer(0), Token::R]
        );
    }

    #[test]
    fn test_names_with_hex_escapes() {
        assert_eq!(
            tokens(b"/Type/A#20B /Bad#zz"),
            vec![
                Token::Name("Type".to_string()),
                Token::Name("A B".to_string()),
                Token::Name("Bad#zz".to_string()),
            ]
        );
    }

    #[test]
    fn test_literal_string_escapes() {
        assert_eq!(
            tokens(b"(a\\(b\\)c \\101 (nested) line\\\ncont)"),
            vec![Token::String(b"a(b)c A (nested) linecont".to_vec())]
        );
    }

    #[test]
    fn test_unterminated_string() {
        let mut lexer = Lexer::new(b"(never ends");
        assert!(lexer.next_token().is_err());
    }

    #[test]
    fn test_hex_string_odd_digits() {
        assert_eq!(
            tokens(b"<48 65 6C6C 6>"),
            vec![Token::String(b"Hell`".to_vec())]
        );
    }

    #[test]
    fn test_dictionary_delimiters_and_comments() {
        assert_eq!(
            tokens(b"<< /Size 3 % comment\n>> [ true false ]"),
            vec![
                Token::DictStart,
                Token::Name("Size".to_string()),
                Token::Integer(3),
                Token::DictEnd,
                Token::ArrayStart,
                Token::Boolean(true),
                Token::Boolean(false),
                Token::ArrayEnd,
            ]
        );
    }

    #[test]
    fn test_position_and_peek() {
        let mut lexer = Lexer::new(b"xref trailer");
        assert_eq!(lexer.peek_token().unwrap(), Token::XRef);
        assert_eq!(lexer.position(), 0);
        assert_eq!(lexer.next_token().unwrap(), Token::XRef);
        assert_eq!(lexer.position(), 4);
        lexer.set_position(0);
        assert_eq!(lexer.next_token().unwrap(), Token::XRef);
        lexer.set_position(1000);
        assert!(lexer.is_eof());
    }

    #[test]
    fn test_stream_eol_handling() {
        let mut lexer = Lexer::new(b"stream\r\nDATA");
        assert_eq!(lexer.next_token().unwrap(), Token::Stream);
        lexer.skip_stream_eol();
        assert_eq!(lexer.take_bytes(4), Some(&b"DATA"[..]));
        assert_eq!(lexer.take_bytes(1), None);
    }

    #[test]
    fn test_find_helpers() {
        assert_eq!(find_bytes(b"abcabc", b"bc"), Some(1));
        assert_eq!(rfind_bytes(b"abcabc", b"bc"), Some(4));
        assert_eq!(find_bytes(b"ab", b"abc"), None);
        let mut lexer = Lexer::new(b"xx endstream");
        lexer.set_position(1);
        assert_eq!(lexer.find(b"endstream"), Some(3));
        assert!(lexer.lookahead_is(b"x "));
    }
}

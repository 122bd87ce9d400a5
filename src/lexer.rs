use serde::ser::SerializeTuple;
use serde::{Serialize, Serializer};

use crate::options::LexOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Identifier,
    Keyword,
    Label,     // `name:` at statement start
    Range,     // to, til
    RangeStep, // by
    From,
    String,
    Number,
    Native,    // `...` passthrough
    Compare,
    CAssign,   // += -= *= /= %= ^=
    Assign,
    ParenOpen,
    ParenClose,
    BlockOpen,
    BlockClose,
    ArrOpen,
    ArrClose,
    Delimiter,
    Math,
    Terminator,
    Literal,
    Whitespace,
}

impl Tag {
    pub fn name(self) -> &'static str {
        match self {
            Tag::Identifier => "IDENTIFIER",
            Tag::Keyword => "KEYWORD",
            Tag::Label => "LABEL",
            Tag::Range => "RANGE",
            Tag::RangeStep => "RANGESTEP",
            Tag::From => "FROM",
            Tag::String => "STRING",
            Tag::Number => "NUMBER",
            Tag::Native => "NATIVE",
            Tag::Compare => "COMPARE",
            Tag::CAssign => "C_ASSIGN",
            Tag::Assign => "ASSIGN",
            Tag::ParenOpen => "PAREN_OPEN",
            Tag::ParenClose => "PAREN_CLOSE",
            Tag::BlockOpen => "BLOCK_OPEN",
            Tag::BlockClose => "BLOCK_CLOSE",
            Tag::ArrOpen => "ARR_OPEN",
            Tag::ArrClose => "ARR_CLOSE",
            Tag::Delimiter => "DELIMITER",
            Tag::Math => "MATH",
            Tag::Terminator => "TERMINATOR",
            Tag::Literal => "LITERAL",
            Tag::Whitespace => "WHITESPACE",
        }
    }

    pub fn is_open(self) -> bool {
        matches!(self, Tag::ParenOpen | Tag::BlockOpen | Tag::ArrOpen)
    }

    pub fn is_close(self) -> bool {
        matches!(self, Tag::ParenClose | Tag::BlockClose | Tag::ArrClose)
    }

    /// The closing tag for an opening bracket.
    pub fn closer(self) -> Option<Tag> {
        match self {
            Tag::ParenOpen => Some(Tag::ParenClose),
            Tag::BlockOpen => Some(Tag::BlockClose),
            Tag::ArrOpen => Some(Tag::ArrClose),
            _ => None,
        }
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Tag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

const KEYWORDS: &[&str] = &[
    "unless", "if", "else", "while", "until", "for", "foreach", "return", "switch", "case",
    "default", "exit", "die", "in", "function", "const",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub tag: Tag,
    pub text: String,
    pub line: usize,
}

impl Token {
    pub fn new(tag: Tag, text: impl Into<String>, line: usize) -> Self {
        Self {
            tag,
            text: text.into(),
            line,
        }
    }

    /// Keyword comparison is case-insensitive.
    pub fn is_keyword(&self, word: &str) -> bool {
        self.tag == Tag::Keyword && self.text.eq_ignore_ascii_case(word)
    }
}

/// Serialized as the `(tag, text, line)` triple.
impl Serialize for Token {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(3)?;
        tuple.serialize_element(&self.tag)?;
        tuple.serialize_element(&self.text)?;
        tuple.serialize_element(&self.line)?;
        tuple.end()
    }
}

pub fn lex(source: &str, options: &LexOptions) -> Vec<Token> {
    Lexer::new(source, options).tokenize()
}

/// Result of matching one rule at an offset.
struct Scan {
    consumed: usize,
    tokens: Vec<Token>,
    newlines: usize,
}

impl Scan {
    fn skip(consumed: usize, newlines: usize) -> Self {
        Self {
            consumed,
            tokens: Vec::new(),
            newlines,
        }
    }

    fn one(consumed: usize, token: Token) -> Self {
        Self {
            consumed,
            tokens: vec![token],
            newlines: 0,
        }
    }
}

pub struct Lexer {
    source: String,
    pos: usize,
    line: usize,
    preserve: bool,
    tokens: Vec<Token>,
}

impl Lexer {
    pub fn new(source: &str, options: &LexOptions) -> Self {
        let cleaned: String = source.chars().filter(|&c| c != '\r').collect();
        Self {
            source: cleaned.trim_end().to_string(),
            pos: 0,
            line: 1,
            preserve: options.preserve,
            tokens: Vec::new(),
        }
    }

    pub fn tokenize(mut self) -> Vec<Token> {
        while self.pos < self.source.len() {
            let scan = self.scan_at(self.pos);
            self.pos += scan.consumed.max(1);
            self.line += scan.newlines;
            self.tokens.extend(scan.tokens);
        }
        self.tokens
    }

    /// The first token produced at `offset`, without recording it.
    fn peek(&self, offset: usize) -> Option<Token> {
        if offset >= self.source.len() {
            return None;
        }
        self.scan_at(offset).tokens.into_iter().next()
    }

    fn scan_at(&self, offset: usize) -> Scan {
        let rest = &self.source[offset..];
        if let Some(scan) = self.lex_identifier(rest, offset) {
            return scan;
        }
        if let Some(len) = match_comment(rest) {
            return Scan::skip(len, 0);
        }
        if let Some(len) = match_whitespace(rest) {
            let text = &rest[..len];
            let newlines = text.matches('\n').count();
            if self.preserve {
                return Scan {
                    consumed: len,
                    tokens: vec![Token::new(Tag::Whitespace, text, self.line)],
                    newlines,
                };
            }
            return Scan::skip(len, newlines);
        }
        for quote in ['"', '\''] {
            if let Some(len) = match_quoted(rest, quote) {
                return Scan::one(len, Token::new(Tag::String, &rest[..len], self.line));
            }
        }
        if let Some(len) = match_number(rest) {
            return Scan::one(len, Token::new(Tag::Number, &rest[..len], self.line));
        }
        if let Some(len) = match_quoted(rest, '`') {
            let content = rest.get(1..len - 1).unwrap_or_default();
            return Scan::one(len, Token::new(Tag::Native, content, self.line));
        }
        self.lex_literal(rest)
    }

    // ── Rules ──────────────────────────────────────────────────────

    fn lex_identifier(&self, rest: &str, offset: usize) -> Option<Scan> {
        let len = match_identifier(rest)?;
        let text = &rest[..len];
        let lower = text.to_ascii_lowercase();
        let tag = match lower.as_str() {
            "to" | "til" => return Some(Scan::one(len, Token::new(Tag::Range, lower, self.line))),
            "by" => return Some(Scan::one(len, Token::new(Tag::RangeStep, lower, self.line))),
            "from" => return Some(Scan::one(len, Token::new(Tag::From, lower, self.line))),
            word if KEYWORDS.contains(&word) => Tag::Keyword,
            _ => Tag::Identifier,
        };

        if tag == Tag::Identifier {
            let gap = match_inline_space(&rest[len..]);
            let colon = offset + len + gap;
            let is_colon = self
                .peek(colon)
                .is_some_and(|t| t.tag == Tag::Literal && t.text == ":");
            if is_colon && !self.source[colon..].starts_with("::") {
                return Some(Scan::one(len + gap + 1, Token::new(Tag::Label, text, self.line)));
            }
        }
        Some(Scan::one(len, Token::new(tag, text, self.line)))
    }

    fn lex_literal(&self, rest: &str) -> Scan {
        let two: String = rest.chars().take(2).collect();
        match two.as_str() {
            "==" | "!=" | "&&" | "||" | ">=" | "<=" => {
                return Scan::one(2, Token::new(Tag::Compare, two, self.line));
            }
            "+=" | "-=" | "*=" | "/=" | "%=" | "^=" => {
                return Scan::one(2, Token::new(Tag::CAssign, two, self.line));
            }
            "++" | "--" => {
                let op = if two == "++" { "+=" } else { "-=" };
                return Scan {
                    consumed: 2,
                    tokens: vec![
                        Token::new(Tag::CAssign, op, self.line),
                        Token::new(Tag::Number, "1", self.line),
                    ],
                    newlines: 0,
                };
            }
            _ => {}
        }

        let Some(ch) = rest.chars().next() else {
            return Scan::skip(0, 0);
        };
        let tag = match ch {
            '(' => Tag::ParenOpen,
            ')' => Tag::ParenClose,
            '{' => Tag::BlockOpen,
            '}' => Tag::BlockClose,
            '[' => Tag::ArrOpen,
            ']' => Tag::ArrClose,
            ',' => Tag::Delimiter,
            '=' => Tag::Assign,
            '>' | '<' => Tag::Compare,
            ';' => Tag::Terminator,
            '+' | '-' | '*' | '/' | '%' | '^' => Tag::Math,
            _ => Tag::Literal,
        };
        Scan::one(ch.len_utf8(), Token::new(tag, ch.to_string(), self.line))
    }
}

// ── Matchers ───────────────────────────────────────────────────────
// Each returns the byte length of the match at the start of `rest`.

fn match_identifier(rest: &str) -> Option<usize> {
    let bytes = rest.as_bytes();
    let first = *bytes.first()?;
    if !(first.is_ascii_alphabetic() || first == b'_') {
        return None;
    }
    Some(
        bytes
            .iter()
            .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_')
            .count(),
    )
}

fn match_comment(rest: &str) -> Option<usize> {
    if !rest.starts_with("//") {
        return None;
    }
    Some(rest.find('\n').unwrap_or(rest.len()))
}

fn match_whitespace(rest: &str) -> Option<usize> {
    let len: usize = rest
        .chars()
        .take_while(|c| c.is_whitespace())
        .map(char::len_utf8)
        .sum();
    (len > 0).then_some(len)
}

fn match_inline_space(rest: &str) -> usize {
    rest.chars()
        .take_while(|c| c.is_whitespace() && *c != '\n')
        .map(char::len_utf8)
        .sum()
}

/// A `quote`-delimited run where backslash escapes the next character.
fn match_quoted(rest: &str, quote: char) -> Option<usize> {
    let mut chars = rest.char_indices();
    if chars.next()?.1 != quote {
        return None;
    }
    while let Some((i, c)) = chars.next() {
        if c == '\\' {
            chars.next();
        } else if c == quote {
            return Some(i + c.len_utf8());
        }
    }
    None
}

fn count_from(bytes: &[u8], from: usize, pred: impl Fn(u8) -> bool) -> usize {
    bytes
        .get(from..)
        .map_or(0, |tail| tail.iter().take_while(|b| pred(**b)).count())
}

/// `0x..`, `NrDIGITS`, `0o..`, `0b..`, then decimal with optional exponent,
/// tried in that order.
fn match_number(rest: &str) -> Option<usize> {
    let bytes = rest.as_bytes();
    let digit = |b: u8| b.is_ascii_digit();

    if rest.starts_with("0x") {
        let n = count_from(bytes, 2, |b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if n > 0 {
            return Some(2 + n);
        }
    }

    let leading = count_from(bytes, 0, digit);
    for prefix in [2, 1] {
        if leading >= prefix && bytes.get(prefix) == Some(&b'r') {
            let n = count_from(bytes, prefix + 1, |b| b.is_ascii_digit() || b.is_ascii_lowercase());
            if n > 0 {
                return Some(prefix + 1 + n);
            }
        }
    }

    if rest.starts_with("0o") {
        let n = count_from(bytes, 2, |b| (b'0'..=b'7').contains(&b));
        if n > 0 {
            return Some(2 + n);
        }
    }
    if rest.starts_with("0b") {
        let n = count_from(bytes, 2, |b| b == b'0' || b == b'1');
        if n > 0 {
            return Some(2 + n);
        }
    }

    let mut len = leading;
    if bytes.get(leading) == Some(&b'.') {
        let frac = count_from(bytes, leading + 1, digit);
        if frac > 0 {
            len = leading + 1 + frac;
        }
    }
    if len == 0 {
        return None;
    }
    if bytes.get(len) == Some(&b'e') {
        let mut at = len + 1;
        if matches!(bytes.get(at), Some(b'+' | b'-')) {
            at += 1;
        }
        let exp = count_from(bytes, at, digit);
        if exp > 0 {
            len = at + exp;
        }
    }
    Some(len)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn tok(s: &str) -> Vec<(Tag, String)> {
        lex(s, &LexOptions::default())
            .into_iter()
            .map(|t| (t.tag, t.text))
            .collect()
    }

    fn t(tag: Tag, text: &str) -> (Tag, String) {
        (tag, text.to_string())
    }

    #[test]
    fn simple_assignment() {
        let tokens = lex("a = 1;", &LexOptions::default());
        assert_eq!(tokens, vec![
            Token::new(Tag::Identifier, "a", 1),
            Token::new(Tag::Assign, "=", 1),
            Token::new(Tag::Number, "1", 1),
            Token::new(Tag::Terminator, ";", 1),
        ]);
    }

    #[test]
    fn range_words_and_keywords() {
        assert_eq!(tok("for i from 1 TO 10 by 2"), vec![
            t(Tag::Keyword, "for"),
            t(Tag::Identifier, "i"),
            t(Tag::From, "from"),
            t(Tag::Number, "1"),
            t(Tag::Range, "to"),
            t(Tag::Number, "10"),
            t(Tag::RangeStep, "by"),
            t(Tag::Number, "2"),
        ]);
        assert_eq!(tok("0 til n"), vec![
            t(Tag::Number, "0"),
            t(Tag::Range, "til"),
            t(Tag::Identifier, "n"),
        ]);
    }

    #[test]
    fn keyword_case_is_preserved() {
        let tokens = lex("While x", &LexOptions::default());
        assert_eq!(tokens[0].tag, Tag::Keyword);
        assert_eq!(tokens[0].text, "While");
        assert!(tokens[0].is_keyword("while"));
    }

    #[test]
    fn compound_assignment_and_increment() {
        assert_eq!(tok("a += 2; b++"), vec![
            t(Tag::Identifier, "a"),
            t(Tag::CAssign, "+="),
            t(Tag::Number, "2"),
            t(Tag::Terminator, ";"),
            t(Tag::Identifier, "b"),
            t(Tag::CAssign, "+="),
            t(Tag::Number, "1"),
        ]);
        assert_eq!(tok("c--")[1..].to_vec(), vec![t(Tag::CAssign, "-="), t(Tag::Number, "1")]);
    }

    #[test]
    fn comparison_operators() {
        assert_eq!(tok("a <= b && c != d > e"), vec![
            t(Tag::Identifier, "a"),
            t(Tag::Compare, "<="),
            t(Tag::Identifier, "b"),
            t(Tag::Compare, "&&"),
            t(Tag::Identifier, "c"),
            t(Tag::Compare, "!="),
            t(Tag::Identifier, "d"),
            t(Tag::Compare, ">"),
            t(Tag::Identifier, "e"),
        ]);
    }

    #[test]
    fn brackets_and_punctuation() {
        assert_eq!(tok("f([1,2]){}"), vec![
            t(Tag::Identifier, "f"),
            t(Tag::ParenOpen, "("),
            t(Tag::ArrOpen, "["),
            t(Tag::Number, "1"),
            t(Tag::Delimiter, ","),
            t(Tag::Number, "2"),
            t(Tag::ArrClose, "]"),
            t(Tag::ParenClose, ")"),
            t(Tag::BlockOpen, "{"),
            t(Tag::BlockClose, "}"),
        ]);
    }

    #[test]
    fn comments_are_dropped_and_lines_counted() {
        let tokens = lex("a = 1 // one\n\nb = 2", &LexOptions::default());
        assert_eq!(tokens.len(), 6);
        assert_eq!(tokens[2].line, 1);
        assert_eq!(tokens[3].text, "b");
        assert_eq!(tokens[3].line, 3);
    }

    #[test]
    fn strings_keep_quotes_and_escapes() {
        assert_eq!(tok(r#"print "say \"hi\"", 'it''"#), vec![
            t(Tag::Identifier, "print"),
            t(Tag::String, r#""say \"hi\"""#),
            t(Tag::Delimiter, ","),
            t(Tag::String, "'it'"),
            t(Tag::Literal, "'"),
        ]);
    }

    #[test]
    fn number_forms() {
        assert_eq!(tok("0x1f 16rff 0b101 0o17 1.5e3 .5 2e"), vec![
            t(Tag::Number, "0x1f"),
            t(Tag::Number, "16rff"),
            t(Tag::Number, "0b101"),
            t(Tag::Number, "0o17"),
            t(Tag::Number, "1.5e3"),
            t(Tag::Number, ".5"),
            t(Tag::Number, "2"),
            t(Tag::Identifier, "e"),
        ]);
    }

    #[test]
    fn binary_prefix_without_digits_falls_back_to_decimal() {
        assert_eq!(tok("0b2"), vec![t(Tag::Number, "0"), t(Tag::Identifier, "b2")]);
    }

    #[test]
    fn native_block_is_verbatim() {
        assert_eq!(tok("`Output(1,1,\"HI\")`"), vec![t(Tag::Native, "Output(1,1,\"HI\")")]);
    }

    #[test]
    fn unknown_characters_become_literals() {
        assert_eq!(tok("@ !a"), vec![
            t(Tag::Literal, "@"),
            t(Tag::Literal, "!"),
            t(Tag::Identifier, "a"),
        ]);
    }

    #[test]
    fn labels_are_distinct() {
        assert_eq!(tok("start: a = 1"), vec![
            t(Tag::Label, "start"),
            t(Tag::Identifier, "a"),
            t(Tag::Assign, "="),
            t(Tag::Number, "1"),
        ]);
        assert_eq!(tok("a::b")[0], t(Tag::Identifier, "a"));
    }

    #[test]
    fn preserve_keeps_whitespace() {
        let opts = LexOptions { preserve: true, exact: true };
        let tokens = lex("a\n b", &opts);
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[1].tag, Tag::Whitespace);
        assert_eq!(tokens[1].text, "\n ");
        assert_eq!(tokens[2].line, 2);
    }

    #[test]
    fn carriage_returns_and_trailing_space_are_stripped() {
        let tokens = lex("a = 1\r\nb = 2   \r\n\t", &LexOptions::default());
        assert_eq!(tokens.len(), 6);
        assert_eq!(tokens[5].line, 2);
    }

    #[test]
    fn peek_does_not_consume() {
        let lexer = Lexer::new("foo = 1", &LexOptions::default());
        assert_eq!(lexer.peek(0).unwrap().text, "foo");
        assert_eq!(lexer.peek(4).unwrap().tag, Tag::Assign);
        assert!(lexer.peek(3).is_none());
        assert!(lexer.peek(40).is_none());
        let tokens = lexer.tokenize();
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[0].text, "foo");
    }

    #[test]
    fn tokens_serialize_as_triples() {
        let tokens = lex("x;", &LexOptions::default());
        let json = serde_json::to_string(&tokens).unwrap();
        assert_eq!(json, r#"[["IDENTIFIER","x",1],["TERMINATOR",";",1]]"#);
    }
}

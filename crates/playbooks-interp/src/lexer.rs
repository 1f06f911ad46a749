//! Lexer for the mini language.
//!
//! Produces a flat token stream with Python-style `Indent`/`Dedent` tokens
//! derived from leading whitespace.  Newlines inside brackets are ignored
//! (implicit line joining); blank lines and comment-only lines produce no
//! tokens at all.

use crate::error::{InterpError, Result};

/// A raw f-string piece: literal text or unparsed expression source.
#[derive(Debug, Clone, PartialEq)]
pub enum RawFPart {
    Text(String),
    ExprSrc(String),
}

/// One token.
#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    FString(Vec<RawFPart>),

    Newline,
    Indent,
    Dedent,

    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,

    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,

    Plus,
    Minus,
    Star,
    Slash,
    DoubleSlash,
    Percent,
    DoubleStar,

    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,

    KwTrue,
    KwFalse,
    KwNone,
    KwAnd,
    KwOr,
    KwNot,
    KwIf,
    KwElif,
    KwElse,
    KwWhile,
    KwFor,
    KwIn,
    KwAwait,
    KwPass,
    KwBreak,
    KwContinue,

    Eof,
}

fn keyword(name: &str) -> Option<Tok> {
    Some(match name {
        "True" => Tok::KwTrue,
        "False" => Tok::KwFalse,
        "None" => Tok::KwNone,
        "and" => Tok::KwAnd,
        "or" => Tok::KwOr,
        "not" => Tok::KwNot,
        "if" => Tok::KwIf,
        "elif" => Tok::KwElif,
        "else" => Tok::KwElse,
        "while" => Tok::KwWhile,
        "for" => Tok::KwFor,
        "in" => Tok::KwIn,
        "await" => Tok::KwAwait,
        "pass" => Tok::KwPass,
        "break" => Tok::KwBreak,
        "continue" => Tok::KwContinue,
        _ => return None,
    })
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    tokens: Vec<Tok>,
    indents: Vec<usize>,
    bracket_depth: usize,
    at_line_start: bool,
}

/// Tokenize `source` into a token stream ending with [`Tok::Eof`].
pub fn tokenize(source: &str) -> Result<Vec<Tok>> {
    let mut lexer = Lexer {
        chars: source.chars().collect(),
        pos: 0,
        tokens: Vec::new(),
        indents: vec![0],
        bracket_depth: 0,
        at_line_start: true,
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

impl Lexer {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn run(&mut self) -> Result<()> {
        while self.pos < self.chars.len() {
            if self.at_line_start && self.bracket_depth == 0 {
                self.handle_line_start()?;
                continue;
            }

            let c = match self.peek() {
                Some(c) => c,
                None => break,
            };

            match c {
                '\n' => {
                    self.pos += 1;
                    if self.bracket_depth == 0 {
                        self.tokens.push(Tok::Newline);
                        self.at_line_start = true;
                    }
                }
                ' ' | '\t' | '\r' => {
                    self.pos += 1;
                }
                '#' => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.pos += 1;
                    }
                }
                '"' | '\'' => {
                    let token = self.lex_string(false)?;
                    self.tokens.push(token);
                }
                c if c.is_ascii_digit() => {
                    let token = self.lex_number()?;
                    self.tokens.push(token);
                }
                c if c.is_alphabetic() || c == '_' => {
                    self.lex_name()?;
                }
                _ => {
                    self.lex_punct()?;
                }
            }
        }

        // Terminate the final logical line and close open blocks.
        if !self.at_line_start && !matches!(self.tokens.last(), Some(Tok::Newline) | None) {
            self.tokens.push(Tok::Newline);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.tokens.push(Tok::Dedent);
        }
        self.tokens.push(Tok::Eof);
        Ok(())
    }

    fn handle_line_start(&mut self) -> Result<()> {
        let mut indent = 0usize;
        while let Some(c) = self.peek() {
            match c {
                ' ' => {
                    indent += 1;
                    self.pos += 1;
                }
                '\t' => {
                    indent += 4;
                    self.pos += 1;
                }
                _ => break,
            }
        }

        match self.peek() {
            // Blank or comment-only line: no tokens, no indent changes.
            None => return Ok(()),
            Some('\n') => {
                self.pos += 1;
                return Ok(());
            }
            Some('\r') => {
                self.pos += 1;
                return Ok(());
            }
            Some('#') => {
                while self.peek().is_some_and(|c| c != '\n') {
                    self.pos += 1;
                }
                return Ok(());
            }
            Some(_) => {}
        }

        let current = *self.indents.last().expect("indent stack never empty");
        if indent > current {
            self.indents.push(indent);
            self.tokens.push(Tok::Indent);
        } else if indent < current {
            while *self.indents.last().expect("indent stack never empty") > indent {
                self.indents.pop();
                self.tokens.push(Tok::Dedent);
            }
            if *self.indents.last().expect("indent stack never empty") != indent {
                return Err(InterpError::syntax(format!(
                    "unindent to column {indent} does not match any outer block"
                )));
            }
        }

        self.at_line_start = false;
        Ok(())
    }

    fn lex_number(&mut self) -> Result<Tok> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '_') {
            self.pos += 1;
        }
        let mut is_float = false;
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            self.pos += 1;
            while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '_') {
                self.pos += 1;
            }
        }
        if self.peek().is_some_and(|c| c == 'e' || c == 'E') {
            let mut lookahead = 1;
            if self
                .peek_at(1)
                .is_some_and(|c| c == '+' || c == '-')
            {
                lookahead = 2;
            }
            if self.peek_at(lookahead).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                self.pos += lookahead;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
        }

        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        if is_float {
            text.parse::<f64>()
                .map(Tok::Float)
                .map_err(|_| InterpError::syntax(format!("invalid float literal `{text}`")))
        } else {
            text.parse::<i64>()
                .map(Tok::Int)
                .map_err(|_| InterpError::syntax(format!("invalid int literal `{text}`")))
        }
    }

    fn lex_name(&mut self) -> Result<()> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_')
        {
            self.pos += 1;
        }
        let name: String = self.chars[start..self.pos].iter().collect();

        // f-string prefix.
        if name == "f" && self.peek().is_some_and(|c| c == '"' || c == '\'') {
            let token = self.lex_string(true)?;
            self.tokens.push(token);
            return Ok(());
        }

        match keyword(&name) {
            Some(tok) => self.tokens.push(tok),
            None => self.tokens.push(Tok::Name(name)),
        }
        Ok(())
    }

    fn lex_string(&mut self, is_fstring: bool) -> Result<Tok> {
        let quote = self.bump().expect("caller checked quote");
        let triple = self.peek() == Some(quote) && self.peek_at(1) == Some(quote);
        if triple {
            self.pos += 2;
        }

        let mut raw = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(InterpError::syntax("unterminated string literal"));
            };
            if c == '\\' {
                self.pos += 1;
                let Some(escaped) = self.bump() else {
                    return Err(InterpError::syntax("unterminated string literal"));
                };
                raw.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '\\' => '\\',
                    '\'' => '\'',
                    '"' => '"',
                    '0' => '\0',
                    other => other,
                });
                continue;
            }
            if c == quote {
                if triple {
                    if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                        self.pos += 3;
                        break;
                    }
                    raw.push(c);
                    self.pos += 1;
                    continue;
                }
                self.pos += 1;
                break;
            }
            if c == '\n' && !triple {
                return Err(InterpError::syntax("unterminated string literal"));
            }
            raw.push(c);
            self.pos += 1;
        }

        if is_fstring {
            Ok(Tok::FString(split_fstring(&raw)?))
        } else {
            Ok(Tok::Str(raw))
        }
    }

    fn lex_punct(&mut self) -> Result<()> {
        let c = self.bump().expect("caller checked char");
        let next = self.peek();
        let token = match (c, next) {
            ('(', _) => {
                self.bracket_depth += 1;
                Tok::LParen
            }
            (')', _) => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
                Tok::RParen
            }
            ('[', _) => {
                self.bracket_depth += 1;
                Tok::LBracket
            }
            (']', _) => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
                Tok::RBracket
            }
            ('{', _) => {
                self.bracket_depth += 1;
                Tok::LBrace
            }
            ('}', _) => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
                Tok::RBrace
            }
            (',', _) => Tok::Comma,
            (':', _) => Tok::Colon,
            ('.', _) => Tok::Dot,
            ('=', Some('=')) => {
                self.pos += 1;
                Tok::Eq
            }
            ('=', _) => Tok::Assign,
            ('!', Some('=')) => {
                self.pos += 1;
                Tok::NotEq
            }
            ('<', Some('=')) => {
                self.pos += 1;
                Tok::LtEq
            }
            ('<', _) => Tok::Lt,
            ('>', Some('=')) => {
                self.pos += 1;
                Tok::GtEq
            }
            ('>', _) => Tok::Gt,
            ('+', Some('=')) => {
                self.pos += 1;
                Tok::PlusAssign
            }
            ('+', _) => Tok::Plus,
            ('-', Some('=')) => {
                self.pos += 1;
                Tok::MinusAssign
            }
            ('-', _) => Tok::Minus,
            ('*', Some('*')) => {
                self.pos += 1;
                Tok::DoubleStar
            }
            ('*', Some('=')) => {
                self.pos += 1;
                Tok::StarAssign
            }
            ('*', _) => Tok::Star,
            ('/', Some('/')) => {
                self.pos += 1;
                Tok::DoubleSlash
            }
            ('/', Some('=')) => {
                self.pos += 1;
                Tok::SlashAssign
            }
            ('/', _) => Tok::Slash,
            ('%', _) => Tok::Percent,
            (other, _) => {
                return Err(InterpError::syntax(format!(
                    "unexpected character `{other}`"
                )));
            }
        };
        self.tokens.push(token);
        Ok(())
    }
}

/// Split f-string content into text and expression-source parts.
///
/// `{{` and `}}` escape literal braces; nested braces inside an expression
/// are tracked by depth.
fn split_fstring(raw: &str) -> Result<Vec<RawFPart>> {
    let chars: Vec<char> = raw.chars().collect();
    let mut parts = Vec::new();
    let mut text = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '{' if chars.get(i + 1) == Some(&'{') => {
                text.push('{');
                i += 2;
            }
            '}' if chars.get(i + 1) == Some(&'}') => {
                text.push('}');
                i += 2;
            }
            '{' => {
                if !text.is_empty() {
                    parts.push(RawFPart::Text(std::mem::take(&mut text)));
                }
                let mut depth = 1;
                let mut src = String::new();
                i += 1;
                while i < chars.len() {
                    let inner = chars[i];
                    if inner == '{' {
                        depth += 1;
                    } else if inner == '}' {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                    }
                    src.push(inner);
                    i += 1;
                }
                if depth != 0 {
                    return Err(InterpError::syntax("unterminated `{` in f-string"));
                }
                i += 1;
                parts.push(RawFPart::ExprSrc(src));
            }
            '}' => {
                return Err(InterpError::syntax("single `}` in f-string"));
            }
            _ => {
                text.push(c);
                i += 1;
            }
        }
    }

    if !text.is_empty() {
        parts.push(RawFPart::Text(text));
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_call_line() {
        let tokens = tokenize("await Say(\"user\", \"hi\")\n").expect("tokenize");
        assert_eq!(
            tokens,
            vec![
                Tok::KwAwait,
                Tok::Name("Say".into()),
                Tok::LParen,
                Tok::Str("user".into()),
                Tok::Comma,
                Tok::Str("hi".into()),
                Tok::RParen,
                Tok::Newline,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn indentation_produces_indent_dedent() {
        let tokens = tokenize("if x:\n    pass\ny = 1\n").expect("tokenize");
        assert!(tokens.contains(&Tok::Indent));
        assert!(tokens.contains(&Tok::Dedent));
        let dedent_pos = tokens.iter().position(|t| *t == Tok::Dedent).expect("dedent");
        assert_eq!(tokens[dedent_pos + 1], Tok::Name("y".into()));
    }

    #[test]
    fn newlines_inside_brackets_are_joined() {
        let tokens = tokenize("x = [1,\n    2,\n    3]\n").expect("tokenize");
        assert_eq!(
            tokens.iter().filter(|t| **t == Tok::Newline).count(),
            1,
            "only the final newline survives"
        );
        assert!(!tokens.contains(&Tok::Indent));
    }

    #[test]
    fn blank_and_comment_lines_produce_nothing() {
        let tokens = tokenize("x = 1\n\n# comment\ny = 2\n").expect("tokenize");
        let names: Vec<&Tok> = tokens
            .iter()
            .filter(|t| matches!(t, Tok::Name(_)))
            .collect();
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn string_escapes() {
        let tokens = tokenize(r#"s = "a\nb\"c""#).expect("tokenize");
        assert!(tokens.contains(&Tok::Str("a\nb\"c".into())));
    }

    #[test]
    fn triple_quoted_string_spans_lines() {
        let tokens = tokenize("s = \"\"\"line1\nline2\"\"\"\n").expect("tokenize");
        assert!(tokens.contains(&Tok::Str("line1\nline2".into())));
    }

    #[test]
    fn fstring_splits_text_and_exprs() {
        let tokens = tokenize("s = f\"Hello {name}!\"\n").expect("tokenize");
        let fstring = tokens
            .iter()
            .find_map(|t| match t {
                Tok::FString(parts) => Some(parts.clone()),
                _ => None,
            })
            .expect("fstring token");
        assert_eq!(
            fstring,
            vec![
                RawFPart::Text("Hello ".into()),
                RawFPart::ExprSrc("name".into()),
                RawFPart::Text("!".into()),
            ]
        );
    }

    #[test]
    fn unterminated_string_is_an_error() {
        assert!(tokenize("s = \"oops\n").is_err());
    }

    #[test]
    fn numbers() {
        let tokens = tokenize("a = 42\nb = 3.5\n").expect("tokenize");
        assert!(tokens.contains(&Tok::Int(42)));
        assert!(tokens.contains(&Tok::Float(3.5)));
    }

    #[test]
    fn operators() {
        let tokens = tokenize("x = a ** 2 // b != c\n").expect("tokenize");
        assert!(tokens.contains(&Tok::DoubleStar));
        assert!(tokens.contains(&Tok::DoubleSlash));
        assert!(tokens.contains(&Tok::NotEq));
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

/// Token types produced by the GROQ lexer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Token {
    /// A string literal.
    String(String),
    /// An integer literal.
    Integer(i64),
    /// A floating-point literal.
    Float(f64),
    /// A boolean literal.
    Bool(bool),
    /// The null literal.
    Null,

    /// An identifier.
    Ident(String),
    /// A parameter reference (`$name`).
    Param(String),

    /// The equality operator.
    Eq, // ==
    /// The inequality operator.
    Neq, // !=
    /// The less-than operator.
    Lt, // <
    /// The greater-than operator.
    Gt, // >
    /// The less-than-or-equal operator.
    Lte, // <=
    /// The greater-than-or-equal operator.
    Gte, // >=
    /// The logical and operator.
    And, // &&
    /// The logical or operator.
    Or, // ||
    /// The asc keyword.
    Asc, // asc
    /// The desc keyword.
    Desc, // desc

    /// The asterisk operator.
    Star, // *
    /// The dot operator.
    Dot, // .
    /// The comma operator.
    Comma, // ,
    /// The colon operator.
    Colon, // :
    /// The pipe operator.
    Pipe, // |
    /// The arrow operator.
    Arrow, // ->
    /// The at symbol.
    At, // @

    /// The left parenthesis.
    LParen, // (
    /// The right parenthesis.
    RParen, // )
    /// The left bracket.
    LBracket, // [
    /// The right bracket.
    RBracket, // ]
    /// The left brace.
    LBrace, // {
    /// The right brace.
    RBrace, // }

    /// The end of the input.
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::String(s) => write!(f, "\"{s}\""),
            Token::Integer(n) => write!(f, "{n}"),
            Token::Float(n) => write!(f, "{n}"),
            Token::Bool(b) => write!(f, "{b}"),
            Token::Null => write!(f, "null"),
            Token::Ident(s) => write!(f, "{s}"),
            Token::Param(s) => write!(f, "${s}"),
            Token::Eq => write!(f, "=="),
            Token::Neq => write!(f, "!="),
            Token::Lt => write!(f, "<"),
            Token::Gt => write!(f, ">"),
            Token::Lte => write!(f, "<="),
            Token::Gte => write!(f, ">="),
            Token::And => write!(f, "&&"),
            Token::Or => write!(f, "||"),
            Token::Asc => write!(f, "asc"),
            Token::Desc => write!(f, "desc"),
            Token::Star => write!(f, "*"),
            Token::Dot => write!(f, "."),
            Token::Comma => write!(f, ","),
            Token::Colon => write!(f, ":"),
            Token::Pipe => write!(f, "|"),
            Token::Arrow => write!(f, "->"),
            Token::At => write!(f, "@"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::Eof => write!(f, "EOF"),
        }
    }
}

/// Position in source code for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A token with its source position.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

/// Lexer error.
#[derive(Debug, thiserror::Error)]
pub enum LexError {
    #[error("unexpected character '{0}' at position {1}")]
    UnexpectedChar(char, usize),
    #[error("unterminated string starting at position {0}")]
    UnterminatedString(usize),
    #[error("expected parameter name after '$' at position {0}")]
    MissingParamName(usize),
}

impl LexError {
    /// Byte offset of the offending character.
    pub fn offset(&self) -> usize {
        match self {
            LexError::UnexpectedChar(_, at)
            | LexError::UnterminatedString(at)
            | LexError::MissingParamName(at) => *at,
        }
    }
}

/// Tokenize a GROQ query string into a sequence of tokens.
pub fn tokenize(input: &str) -> Result<Vec<SpannedToken>, LexError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut pos = 0;

    while pos < chars.len() {
        let ch = chars[pos];

        // Skip whitespace
        if ch.is_whitespace() {
            pos += 1;
            continue;
        }

        // Skip single-line comments
        if ch == '/' && pos + 1 < chars.len() && chars[pos + 1] == '/' {
            while pos < chars.len() && chars[pos] != '\n' {
                pos += 1;
            }
            continue;
        }

        let start = pos;

        let token = match ch {
            '*' => {
                pos += 1;
                Token::Star
            }
            '.' => {
                pos += 1;
                Token::Dot
            }
            ',' => {
                pos += 1;
                Token::Comma
            }
            ':' => {
                pos += 1;
                Token::Colon
            }
            '@' => {
                pos += 1;
                Token::At
            }
            '(' => {
                pos += 1;
                Token::LParen
            }
            ')' => {
                pos += 1;
                Token::RParen
            }
            '[' => {
                pos += 1;
                Token::LBracket
            }
            ']' => {
                pos += 1;
                Token::RBracket
            }
            '{' => {
                pos += 1;
                Token::LBrace
            }
            '}' => {
                pos += 1;
                Token::RBrace
            }
            '=' => {
                if pos + 1 < chars.len() && chars[pos + 1] == '=' {
                    pos += 2;
                    Token::Eq
                } else {
                    return Err(LexError::UnexpectedChar(ch, pos));
                }
            }
            '!' => {
                if pos + 1 < chars.len() && chars[pos + 1] == '=' {
                    pos += 2;
                    Token::Neq
                } else {
                    return Err(LexError::UnexpectedChar(ch, pos));
                }
            }
            '<' => {
                if pos + 1 < chars.len() && chars[pos + 1] == '=' {
                    pos += 2;
                    Token::Lte
                } else {
                    pos += 1;
                    Token::Lt
                }
            }
            '>' => {
                if pos + 1 < chars.len() && chars[pos + 1] == '=' {
                    pos += 2;
                    Token::Gte
                } else {
                    pos += 1;
                    Token::Gt
                }
            }
            '&' => {
                if pos + 1 < chars.len() && chars[pos + 1] == '&' {
                    pos += 2;
                    Token::And
                } else {
                    return Err(LexError::UnexpectedChar(ch, pos));
                }
            }
            '|' => {
                if pos + 1 < chars.len() && chars[pos + 1] == '|' {
                    pos += 2;
                    Token::Or
                } else {
                    pos += 1;
                    Token::Pipe
                }
            }
            '-' => {
                if pos + 1 < chars.len() && chars[pos + 1] == '>' {
                    pos += 2;
                    Token::Arrow
                } else if pos + 1 < chars.len() && chars[pos + 1].is_ascii_digit() {
                    pos += 1;
                    match lex_number(&chars, &mut pos) {
                        Token::Integer(n) => Token::Integer(-n),
                        Token::Float(n) => Token::Float(-n),
                        other => other,
                    }
                } else {
                    return Err(LexError::UnexpectedChar(ch, pos));
                }
            }
            '$' => {
                pos += 1;
                let name_start = pos;
                while pos < chars.len() && (chars[pos].is_alphanumeric() || chars[pos] == '_') {
                    pos += 1;
                }
                if pos == name_start {
                    return Err(LexError::MissingParamName(start));
                }
                Token::Param(chars[name_start..pos].iter().collect())
            }
            '"' | '\'' => {
                let quote = ch;
                pos += 1;
                let mut s = String::new();
                loop {
                    match chars.get(pos) {
                        None => return Err(LexError::UnterminatedString(start)),
                        Some(&c) if c == quote => {
                            pos += 1;
                            break;
                        }
                        Some('\\') => {
                            pos += 1;
                            match chars.get(pos) {
                                None => return Err(LexError::UnterminatedString(start)),
                                Some('n') => s.push('\n'),
                                Some('t') => s.push('\t'),
                                Some('r') => s.push('\r'),
                                Some(&c) => s.push(c),
                            }
                            pos += 1;
                        }
                        Some(&c) => {
                            s.push(c);
                            pos += 1;
                        }
                    }
                }
                Token::String(s)
            }
            c if c.is_ascii_digit() => lex_number(&chars, &mut pos),
            c if c.is_alphabetic() || c == '_' => {
                while pos < chars.len() && (chars[pos].is_alphanumeric() || chars[pos] == '_') {
                    pos += 1;
                }
                let word: String = chars[start..pos].iter().collect();
                match word.as_str() {
                    "true" => Token::Bool(true),
                    "false" => Token::Bool(false),
                    "null" => Token::Null,
                    "asc" => Token::Asc,
                    "desc" => Token::Desc,
                    _ => Token::Ident(word),
                }
            }
            _ => return Err(LexError::UnexpectedChar(ch, pos)),
        };

        tokens.push(SpannedToken {
            token,
            span: Span { start, end: pos },
        });
    }

    tokens.push(SpannedToken {
        token: Token::Eof,
        span: Span {
            start: pos,
            end: pos,
        },
    });

    Ok(tokens)
}

fn lex_number(chars: &[char], pos: &mut usize) -> Token {
    let start = *pos;
    let mut is_float = false;
    while *pos < chars.len() && chars[*pos].is_ascii_digit() {
        *pos += 1;
    }
    // A dot only belongs to the number when a digit follows; `1.name` is
    // an access chain on the integer 1.
    if *pos + 1 < chars.len() && chars[*pos] == '.' && chars[*pos + 1].is_ascii_digit() {
        is_float = true;
        *pos += 1;
        while *pos < chars.len() && chars[*pos].is_ascii_digit() {
            *pos += 1;
        }
    }
    let num_str: String = chars[start..*pos].iter().collect();
    if is_float {
        Token::Float(num_str.parse().unwrap_or(0.0))
    } else {
        Token::Integer(num_str.parse().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tok(input: &str) -> Vec<Token> {
        tokenize(input)
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    #[test]
    fn tokenize_simple_filter() {
        let tokens = tok("*[_type == \"post\"]");
        assert_eq!(tokens[0], Token::Star);
        assert_eq!(tokens[1], Token::LBracket);
        assert_eq!(tokens[2], Token::Ident("_type".into()));
        assert_eq!(tokens[3], Token::Eq);
        assert_eq!(tokens[4], Token::String("post".into()));
        assert_eq!(tokens[5], Token::RBracket);
        assert_eq!(tokens[6], Token::Eof);
    }

    #[test]
    fn tokenize_projection() {
        let tokens = tok("{title, \"slug\": slug.current}");
        assert_eq!(tokens[0], Token::LBrace);
        assert_eq!(tokens[1], Token::Ident("title".into()));
        assert_eq!(tokens[2], Token::Comma);
        assert_eq!(tokens[3], Token::String("slug".into()));
        assert_eq!(tokens[4], Token::Colon);
        assert_eq!(tokens[5], Token::Ident("slug".into()));
        assert_eq!(tokens[6], Token::Dot);
        assert_eq!(tokens[7], Token::Ident("current".into()));
        assert_eq!(tokens[8], Token::RBrace);
    }

    #[test]
    fn tokens_display_as_source_text() {
        let rendered: Vec<String> = tok("*[n >= 2]{a}|-> @,: <")
            .iter()
            .map(Token::to_string)
            .collect();
        assert_eq!(
            rendered,
            ["*", "[", "n", ">=", "2", "]", "{", "a", "}", "|", "->", "@", ",", ":", "<", "EOF"]
        );
    }

    #[test]
    fn tokenize_numbers() {
        let tokens = tok("42 3.125 -7");
        assert_eq!(tokens[0], Token::Integer(42));
        assert_eq!(tokens[1], Token::Float(3.125));
        assert_eq!(tokens[2], Token::Integer(-7));
    }

    #[test]
    fn tokenize_comparison_operators() {
        let tokens = tok("< > <= >= == !=");
        assert_eq!(tokens[0], Token::Lt);
        assert_eq!(tokens[1], Token::Gt);
        assert_eq!(tokens[2], Token::Lte);
        assert_eq!(tokens[3], Token::Gte);
        assert_eq!(tokens[4], Token::Eq);
        assert_eq!(tokens[5], Token::Neq);
    }

    #[test]
    fn tokenize_keywords() {
        let tokens = tok("true false null asc desc");
        assert_eq!(tokens[0], Token::Bool(true));
        assert_eq!(tokens[1], Token::Bool(false));
        assert_eq!(tokens[2], Token::Null);
        assert_eq!(tokens[3], Token::Asc);
        assert_eq!(tokens[4], Token::Desc);
    }

    #[test]
    fn tokenize_dereference() {
        let tokens = tok("author->name");
        assert_eq!(tokens[0], Token::Ident("author".into()));
        assert_eq!(tokens[1], Token::Arrow);
        assert_eq!(tokens[2], Token::Ident("name".into()));
    }

    #[test]
    fn tokenize_parameter() {
        let tokens = tok("name == $name");
        assert_eq!(tokens[0], Token::Ident("name".into()));
        assert_eq!(tokens[1], Token::Eq);
        assert_eq!(tokens[2], Token::Param("name".into()));
    }

    #[test]
    fn tokenize_single_quoted_string_with_escape() {
        let tokens = tok("'it\\'s'");
        assert_eq!(tokens[0], Token::String("it's".into()));
    }

    #[test]
    fn tokenize_spans() {
        let spanned = tokenize("* [name]").unwrap();
        assert_eq!(spanned[0].span, Span { start: 0, end: 1 });
        assert_eq!(spanned[1].span, Span { start: 2, end: 3 });
        assert_eq!(spanned[2].span, Span { start: 3, end: 7 });
    }

    #[test]
    fn unterminated_string_error() {
        let result = tokenize("\"hello");
        assert!(result.is_err());
    }

    #[test]
    fn lone_dollar_error() {
        assert!(matches!(tokenize("$"), Err(LexError::MissingParamName(0))));
    }
}

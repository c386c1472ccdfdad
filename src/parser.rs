use crate::ast::{CompareOp, Expr, PipeArg, ProjectionField, SortDirection};
use crate::lexer::{tokenize, LexError, SpannedToken, Token};

/// Parser error types. Every variant reports the byte offset of the
/// offending token.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("lex error: {0}")]
    Lex(#[from] LexError),
    #[error("unexpected token {found} at position {at}, expected {expected}")]
    UnexpectedToken {
        found: String,
        expected: String,
        at: usize,
    },
    #[error("unexpected end of input at position {at}")]
    UnexpectedEof { at: usize },
    #[error("projection entry at position {at} needs an explicit \"alias\":")]
    InvalidProjectionField { at: usize },
}

impl ParseError {
    /// Byte offset the error points at.
    pub fn offset(&self) -> usize {
        match self {
            ParseError::Lex(e) => e.offset(),
            ParseError::UnexpectedToken { at, .. }
            | ParseError::UnexpectedEof { at }
            | ParseError::InvalidProjectionField { at } => *at,
        }
    }
}

/// Parse a GROQ query string into an AST.
pub fn parse(input: &str) -> Result<Expr, ParseError> {
    tracing::trace!(query = input, "parsing query");
    let tokens = tokenize(input)?;
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_pipe()?;
    match parser.peek() {
        Token::Eof => Ok(expr),
        other => Err(ParseError::UnexpectedToken {
            found: other.to_string(),
            expected: "end of input".into(),
            at: parser.offset(),
        }),
    }
}

struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<SpannedToken>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, ahead: usize) -> &Token {
        self.tokens
            .get(self.pos + ahead)
            .map(|t| &t.token)
            .unwrap_or(&Token::Eof)
    }

    /// Byte offset of the current token.
    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|t| t.span.start)
            .unwrap_or_else(|| self.tokens.last().map(|t| t.span.end).unwrap_or(0))
    }

    fn advance(&mut self) -> Token {
        let token = self
            .tokens
            .get(self.pos)
            .map(|t| t.token.clone())
            .unwrap_or(Token::Eof);
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ParseError> {
        let at = self.offset();
        let found = self.advance();
        if &found == expected {
            Ok(())
        } else if found == Token::Eof {
            Err(ParseError::UnexpectedEof { at })
        } else {
            Err(ParseError::UnexpectedToken {
                found: found.to_string(),
                expected: expected.to_string(),
                at,
            })
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, ParseError> {
        let at = self.offset();
        match self.advance() {
            Token::Ident(name) => Ok(name),
            Token::Eof => Err(ParseError::UnexpectedEof { at }),
            other => Err(ParseError::UnexpectedToken {
                found: other.to_string(),
                expected: what.into(),
                at,
            }),
        }
    }

    /// `|` — lowest precedence, left-associative.
    fn parse_pipe(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_or()?;
        while self.peek() == &Token::Pipe {
            self.advance();
            let func = self.expect_ident("pipe function name")?;
            self.expect(&Token::LParen)?;
            let mut args = Vec::new();
            if self.peek() != &Token::RParen {
                args.push(self.parse_pipe_arg()?);
                while self.peek() == &Token::Comma {
                    self.advance();
                    args.push(self.parse_pipe_arg()?);
                }
            }
            self.expect(&Token::RParen)?;
            expr = Expr::Pipe {
                base: Box::new(expr),
                func,
                args,
            };
        }
        Ok(expr)
    }

    fn parse_pipe_arg(&mut self) -> Result<PipeArg, ParseError> {
        let expr = self.parse_or()?;
        let direction = match self.peek() {
            Token::Asc => {
                self.advance();
                SortDirection::Asc
            }
            Token::Desc => {
                self.advance();
                SortDirection::Desc
            }
            _ => SortDirection::Asc,
        };
        Ok(PipeArg { expr, direction })
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_and()?;
        while self.peek() == &Token::Or {
            self.advance();
            let right = self.parse_and()?;
            expr = Expr::Or(Box::new(expr), Box::new(right));
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_comparison()?;
        while self.peek() == &Token::And {
            self.advance();
            let right = self.parse_comparison()?;
            expr = Expr::And(Box::new(expr), Box::new(right));
        }
        Ok(expr)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_postfix()?;
        let op = match self.peek() {
            Token::Eq => CompareOp::Eq,
            Token::Neq => CompareOp::Neq,
            Token::Lt => CompareOp::Lt,
            Token::Lte => CompareOp::Lte,
            Token::Gt => CompareOp::Gt,
            Token::Gte => CompareOp::Gte,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_postfix()?;
        Ok(Expr::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    /// Postfix chain: `.prop`, `[...]`, `{...}`, `->`, left-associative and
    /// highest precedence.
    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Token::Dot => {
                    self.advance();
                    let field = self.expect_ident("property name")?;
                    expr = Expr::Attr(Box::new(expr), field);
                }
                Token::Arrow => {
                    self.advance();
                    expr = Expr::Deref(Box::new(expr));
                    // `->name` reaches through the reference without a dot.
                    if let Token::Ident(_) = self.peek() {
                        let field = self.expect_ident("property name")?;
                        expr = Expr::Attr(Box::new(expr), field);
                    }
                }
                Token::LBracket => {
                    self.advance();
                    expr = self.parse_bracket(expr)?;
                }
                Token::LBrace => {
                    self.advance();
                    let fields = self.parse_fields()?;
                    self.expect(&Token::RBrace)?;
                    expr = Expr::Projection(Box::new(expr), fields);
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    /// The part after a postfix `[`: empty (array expand), an integer index,
    /// an integer slice, or a filter predicate.
    fn parse_bracket(&mut self, base: Expr) -> Result<Expr, ParseError> {
        if self.peek() == &Token::RBracket {
            self.advance();
            return Ok(Expr::ArrayExpand(Box::new(base)));
        }
        if let &Token::Integer(n) = self.peek() {
            match self.peek_at(1) {
                Token::RBracket => {
                    self.advance();
                    self.advance();
                    return Ok(Expr::Index(Box::new(base), n));
                }
                Token::Colon => {
                    self.advance();
                    self.advance();
                    let at = self.offset();
                    let to = match self.advance() {
                        Token::Integer(to) => to,
                        Token::Eof => return Err(ParseError::UnexpectedEof { at }),
                        other => {
                            return Err(ParseError::UnexpectedToken {
                                found: other.to_string(),
                                expected: "slice upper bound".into(),
                                at,
                            })
                        }
                    };
                    self.expect(&Token::RBracket)?;
                    return Ok(Expr::Slice {
                        base: Box::new(base),
                        from: n,
                        to,
                    });
                }
                _ => {}
            }
        }
        let predicate = self.parse_or()?;
        self.expect(&Token::RBracket)?;
        Ok(Expr::Filter(Box::new(base), Box::new(predicate)))
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let at = self.offset();
        match self.peek().clone() {
            Token::Star => {
                self.advance();
                Ok(Expr::Everything)
            }
            Token::At => {
                self.advance();
                Ok(Expr::This)
            }
            Token::String(s) => {
                self.advance();
                Ok(Expr::StringLiteral(s))
            }
            Token::Integer(n) => {
                self.advance();
                Ok(Expr::IntLiteral(n))
            }
            Token::Float(n) => {
                self.advance();
                Ok(Expr::FloatLiteral(n))
            }
            Token::Bool(b) => {
                self.advance();
                Ok(Expr::BoolLiteral(b))
            }
            Token::Null => {
                self.advance();
                Ok(Expr::Null)
            }
            Token::Param(name) => {
                self.advance();
                Ok(Expr::Param(name))
            }
            Token::Ident(name) => {
                self.advance();
                if self.peek() == &Token::LParen {
                    self.advance();
                    let mut args = Vec::new();
                    if self.peek() != &Token::RParen {
                        args.push(self.parse_or()?);
                        while self.peek() == &Token::Comma {
                            self.advance();
                            args.push(self.parse_or()?);
                        }
                    }
                    self.expect(&Token::RParen)?;
                    Ok(Expr::FuncCall(name, args))
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            Token::LParen => {
                self.advance();
                let expr = self.parse_pipe()?;
                self.expect(&Token::RParen)?;
                Ok(expr)
            }
            Token::LBracket => {
                self.advance();
                let mut items = Vec::new();
                if self.peek() != &Token::RBracket {
                    items.push(self.parse_or()?);
                    while self.peek() == &Token::Comma {
                        self.advance();
                        items.push(self.parse_or()?);
                    }
                }
                self.expect(&Token::RBracket)?;
                Ok(Expr::ArrayLiteral(items))
            }
            Token::LBrace => {
                self.advance();
                let fields = self.parse_fields()?;
                self.expect(&Token::RBrace)?;
                Ok(Expr::ObjectLiteral(fields))
            }
            Token::Eof => Err(ParseError::UnexpectedEof { at }),
            other => Err(ParseError::UnexpectedToken {
                found: other.to_string(),
                expected: "expression".into(),
                at,
            }),
        }
    }

    /// Entries of a projection or object literal: `"alias": expr`,
    /// `ident: expr`, or a bare access expression whose trailing identifier
    /// becomes the key.
    fn parse_fields(&mut self) -> Result<Vec<ProjectionField>, ParseError> {
        let mut fields = Vec::new();
        while self.peek() != &Token::RBrace {
            let at = self.offset();
            let field = match self.peek().clone() {
                Token::String(alias) => {
                    self.advance();
                    self.expect(&Token::Colon)?;
                    let expr = self.parse_or()?;
                    ProjectionField { key: alias, expr }
                }
                Token::Ident(name) if self.peek_at(1) == &Token::Colon => {
                    self.advance();
                    self.advance();
                    let expr = self.parse_or()?;
                    ProjectionField { key: name, expr }
                }
                _ => {
                    let expr = self.parse_or()?;
                    let key = trailing_key(&expr)
                        .ok_or(ParseError::InvalidProjectionField { at })?;
                    ProjectionField { key, expr }
                }
            };
            fields.push(field);
            match self.peek() {
                Token::Comma => {
                    self.advance();
                }
                Token::RBrace => break,
                Token::Eof => return Err(ParseError::UnexpectedEof { at: self.offset() }),
                other => {
                    return Err(ParseError::UnexpectedToken {
                        found: other.to_string(),
                        expected: "',' or '}'".into(),
                        at: self.offset(),
                    })
                }
            }
        }
        Ok(fields)
    }
}

/// Implicit projection key of a bare access expression: the last identifier
/// in the chain (`author->name` keys as `name`, `person->` as `person`).
fn trailing_key(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Ident(name) => Some(name.clone()),
        Expr::Attr(_, name) => Some(name.clone()),
        Expr::Deref(base)
        | Expr::ArrayExpand(base)
        | Expr::Filter(base, _)
        | Expr::Index(base, _)
        | Expr::Slice { base, .. }
        | Expr::Projection(base, _) => trailing_key(base),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_everything() {
        let expr = parse("*").unwrap();
        assert!(matches!(expr, Expr::Everything));
    }

    #[test]
    fn parse_simple_filter() {
        let expr = parse("*[_type == \"post\"]").unwrap();
        match expr {
            Expr::Filter(base, predicate) => {
                assert!(matches!(*base, Expr::Everything));
                match *predicate {
                    Expr::Compare { op, left, right } => {
                        assert_eq!(op, CompareOp::Eq);
                        assert!(matches!(*left, Expr::Ident(n) if n == "_type"));
                        assert!(matches!(*right, Expr::StringLiteral(s) if s == "post"));
                    }
                    other => panic!("expected Compare, got {other:?}"),
                }
            }
            other => panic!("expected Filter, got {other:?}"),
        }
    }

    #[test]
    fn parse_boolean_logic() {
        let expr = parse("*[_type == \"post\" && published == true]").unwrap();
        match expr {
            Expr::Filter(_, predicate) => {
                assert!(matches!(*predicate, Expr::And(_, _)));
            }
            other => panic!("expected Filter, got {other:?}"),
        }
    }

    #[test]
    fn parse_dot_access() {
        let expr = parse("slug.current").unwrap();
        match expr {
            Expr::Attr(base, field) => {
                assert!(matches!(*base, Expr::Ident(n) if n == "slug"));
                assert_eq!(field, "current");
            }
            other => panic!("expected Attr, got {other:?}"),
        }
    }

    #[test]
    fn parse_index_vs_filter() {
        assert!(matches!(parse("*[0]").unwrap(), Expr::Index(_, 0)));
        assert!(matches!(parse("*[-1]").unwrap(), Expr::Index(_, -1)));
        assert!(matches!(
            parse("*[1:3]").unwrap(),
            Expr::Slice { from: 1, to: 3, .. }
        ));
        // A bare non-integer expression in brackets is a filter predicate.
        assert!(matches!(parse("*[name]").unwrap(), Expr::Filter(_, _)));
        assert!(matches!(parse("*[true]").unwrap(), Expr::Filter(_, _)));
    }

    #[test]
    fn parse_array_expand() {
        let expr = parse("*[name == $name][].name").unwrap();
        match expr {
            Expr::Attr(base, field) => {
                assert_eq!(field, "name");
                assert!(matches!(*base, Expr::ArrayExpand(_)));
            }
            other => panic!("expected Attr, got {other:?}"),
        }
    }

    #[test]
    fn parse_deref_followed_by_attribute() {
        // `->name` carries no dot; the identifier belongs to the chain.
        let expr = parse("father->name").unwrap();
        assert!(matches!(&expr, Expr::Attr(base, n)
            if n == "name" && matches!(base.as_ref(), Expr::Deref(_))));
        // A bare `->` still ends the chain.
        assert!(matches!(parse("father->").unwrap(), Expr::Deref(_)));
    }

    #[test]
    fn parse_chained_postfix() {
        // Filter, then index, then attribute — left-associative.
        let expr = parse("*[father->name == \"Michael\"][0].name").unwrap();
        match expr {
            Expr::Attr(base, field) => {
                assert_eq!(field, "name");
                match *base {
                    Expr::Index(inner, 0) => {
                        assert!(matches!(*inner, Expr::Filter(_, _)));
                    }
                    other => panic!("expected Index, got {other:?}"),
                }
            }
            other => panic!("expected Attr, got {other:?}"),
        }
    }

    #[test]
    fn parse_projection_fields() {
        let expr = parse("*[type == \"book\"][0]{name, \"author\": author->name}").unwrap();
        match expr {
            Expr::Projection(_, fields) => {
                assert_eq!(fields.len(), 2);
                assert_eq!(fields[0].key, "name");
                assert_eq!(fields[1].key, "author");
                assert!(matches!(&fields[1].expr, Expr::Attr(base, n)
                    if n == "name" && matches!(base.as_ref(), Expr::Deref(_))));
            }
            other => panic!("expected Projection, got {other:?}"),
        }
    }

    #[test]
    fn parse_projection_deref_key() {
        let expr = parse("@{person->}").unwrap();
        match expr {
            Expr::Projection(_, fields) => {
                assert_eq!(fields[0].key, "person");
            }
            other => panic!("expected Projection, got {other:?}"),
        }
    }

    #[test]
    fn parse_pipe_order() {
        let expr = parse("[[1, 2], [1, 4]] | order(@[0], @[1] desc)").unwrap();
        match expr {
            Expr::Pipe { base, func, args } => {
                assert!(matches!(*base, Expr::ArrayLiteral(_)));
                assert_eq!(func, "order");
                assert_eq!(args.len(), 2);
                assert_eq!(args[0].direction, SortDirection::Asc);
                assert_eq!(args[1].direction, SortDirection::Desc);
            }
            other => panic!("expected Pipe, got {other:?}"),
        }
    }

    #[test]
    fn parse_pipe_is_lowest_precedence() {
        let expr = parse("* | order(name) | order(age desc)").unwrap();
        match expr {
            Expr::Pipe { base, func, .. } => {
                assert_eq!(func, "order");
                assert!(matches!(*base, Expr::Pipe { .. }));
            }
            other => panic!("expected Pipe, got {other:?}"),
        }
    }

    #[test]
    fn parse_function_call() {
        let expr = parse("count(*)").unwrap();
        match expr {
            Expr::FuncCall(name, args) => {
                assert_eq!(name, "count");
                assert_eq!(args.len(), 1);
            }
            other => panic!("expected FuncCall, got {other:?}"),
        }
    }

    #[test]
    fn parse_errors_carry_offsets() {
        let err = parse("*[name").unwrap_err();
        assert_eq!(err.offset(), 6);

        let err = parse("*{name:}").unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedToken { .. }));

        let err = parse("* *").unwrap_err();
        assert_eq!(err.offset(), 2);
    }

    #[test]
    fn parse_rejects_bad_projection_entry() {
        let err = parse("*{1}").unwrap_err();
        assert!(matches!(err, ParseError::InvalidProjectionField { at: 2 }));
    }
}

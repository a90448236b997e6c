//! Lexer for constraint predicates and constraint DDL.

use logos::Logos;

use super::error::{ParseError, Span};

/// Token types.
///
/// Keywords are lexed as identifiers and recognized case-insensitively by the
/// parser, so quoted identifiers can never collide with them.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum Token {
    // Comparison operators
    #[token("=")]
    Eq,
    #[token("<>")]
    #[token("!=")]
    Ne,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,

    // Arithmetic
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,

    // Punctuation
    #[token(".")]
    Dot,
    #[token(",")]
    Comma,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,

    // Bare identifier or keyword
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_$]*", |lex| lex.slice().to_string())]
    Ident(String),

    // Quoted identifier
    #[regex(r#""([^"]|"")*""#, |lex| unquote(lex.slice(), '"'))]
    QuotedIdent(String),

    // String literal
    #[regex(r"'([^']|'')*'", |lex| unquote(lex.slice(), '\''))]
    Str(String),

    // Binary literal
    #[regex(r"[xX]'([0-9a-fA-F][0-9a-fA-F])*'", |lex| {
        let s = lex.slice();
        hex::decode(&s[2..s.len() - 1]).ok()
    })]
    Bytes(Vec<u8>),

    // Integer literal
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    // Float literal
    #[regex(r"[0-9]+\.[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),
}

/// Strip the surrounding quotes and collapse doubled quote characters.
fn unquote(s: &str, quote: char) -> String {
    let inner = &s[1..s.len() - 1];
    let doubled: String = [quote, quote].iter().collect();
    inner.replace(&doubled, &quote.to_string())
}

/// A token with its span in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

/// Tokenize a source string, failing on the first unrecognized input.
pub fn tokenize(source: &str) -> Result<Vec<SpannedToken>, ParseError> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    while let Some(result) = lexer.next() {
        match result {
            Ok(token) => tokens.push(SpannedToken {
                token,
                span: lexer.span().into(),
            }),
            Err(()) => {
                return Err(ParseError::new(
                    format!("unexpected input '{}'", lexer.slice()),
                    lexer.span().into(),
                ))
            }
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    #[test]
    fn test_predicate_tokens() {
        assert_eq!(
            kinds(r#""PRICE" >= 10.5 AND qty <> 0"#),
            vec![
                Token::QuotedIdent("PRICE".into()),
                Token::Ge,
                Token::Float(10.5),
                Token::Ident("AND".into()),
                Token::Ident("qty".into()),
                Token::Ne,
                Token::Int(0),
            ]
        );
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(
            kinds(r#"'it''s' "a""b" X'00ff'"#),
            vec![
                Token::Str("it's".into()),
                Token::QuotedIdent("a\"b".into()),
                Token::Bytes(vec![0x00, 0xff]),
            ]
        );
    }

    #[test]
    fn test_unexpected_input() {
        let err = tokenize("A # B").unwrap_err();
        assert_eq!(err.span, Span::new(2, 3));
    }
}

//! Tokenization using logos

use logos::Logos;

/// Byte range into the source string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum TokenKind {
    // Keywords
    #[token("null")]
    Null,
    #[token("true")]
    True,
    #[token("false")]
    False,

    // Literals
    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", priority = 3)]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+", priority = 3)]
    Float,
    #[regex(r"[0-9]+", priority = 2)]
    Int,
    #[regex(r"'([^'\\]|\\.)*'")]
    #[regex(r#""([^"\\]|\\.)*""#)]
    String,
    #[regex(r"[A-Za-z_][A-Za-z0-9_@]*")]
    Ident,

    // Comparison
    #[token("=")]
    Eq,
    #[token("!=")]
    Ne,
    #[token("<")]
    Lt,
    #[token("<=")]
    Le,
    #[token(">")]
    Gt,
    #[token(">=")]
    Ge,

    // Boolean
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("!")]
    Bang,

    // Arithmetic
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,

    // Delimiters
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,

    Error,
    Eof,
}

impl TokenKind {
    /// Human-readable token description for error messages
    pub fn describe(&self) -> &'static str {
        match self {
            TokenKind::Null => "'null'",
            TokenKind::True => "'true'",
            TokenKind::False => "'false'",
            TokenKind::Float => "float",
            TokenKind::Int => "integer",
            TokenKind::String => "string",
            TokenKind::Ident => "identifier",
            TokenKind::Eq => "'='",
            TokenKind::Ne => "'!='",
            TokenKind::Lt => "'<'",
            TokenKind::Le => "'<='",
            TokenKind::Gt => "'>'",
            TokenKind::Ge => "'>='",
            TokenKind::Amp => "'&'",
            TokenKind::Pipe => "'|'",
            TokenKind::Bang => "'!'",
            TokenKind::Plus => "'+'",
            TokenKind::Minus => "'-'",
            TokenKind::Star => "'*'",
            TokenKind::Slash => "'/'",
            TokenKind::Percent => "'%'",
            TokenKind::LParen => "'('",
            TokenKind::RParen => "')'",
            TokenKind::LBracket => "'['",
            TokenKind::RBracket => "']'",
            TokenKind::Comma => "','",
            TokenKind::Dot => "'.'",
            TokenKind::Error => "invalid token",
            TokenKind::Eof => "end of input",
        }
    }

    /// Infix operator name for comparison tokens
    pub fn comparison_op(&self) -> Option<&'static str> {
        match self {
            TokenKind::Eq => Some("eq"),
            TokenKind::Ne => Some("ne"),
            TokenKind::Lt => Some("lt"),
            TokenKind::Le => Some("le"),
            TokenKind::Gt => Some("gt"),
            TokenKind::Ge => Some("ge"),
            _ => None,
        }
    }
}

/// A token with its span
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.span.start..self.span.end]
    }
}

/// Tokenize a source string; always ends with an `Eof` token
pub fn tokenize(source: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut lexer = TokenKind::lexer(source);

    while let Some(result) = lexer.next() {
        let span = Span::new(lexer.span().start, lexer.span().end);
        let kind = result.unwrap_or(TokenKind::Error);
        tokens.push(Token { kind, span });
    }

    let end = source.len();
    tokens.push(Token {
        kind: TokenKind::Eof,
        span: Span::new(end, end),
    });

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_keywords_before_identifiers() {
        assert_eq!(
            kinds("null true false nullable"),
            vec![
                TokenKind::Null,
                TokenKind::True,
                TokenKind::False,
                TokenKind::Ident,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("42"), vec![TokenKind::Int, TokenKind::Eof]);
        assert_eq!(kinds("4.2"), vec![TokenKind::Float, TokenKind::Eof]);
        assert_eq!(kinds("1e20"), vec![TokenKind::Float, TokenKind::Eof]);
        assert_eq!(
            kinds("-1"),
            vec![TokenKind::Minus, TokenKind::Int, TokenKind::Eof]
        );
    }

    #[test]
    fn test_strings() {
        let source = r#"'a\'b' "c""#;
        let tokens = tokenize(source);
        assert_eq!(tokens[0].kind, TokenKind::String);
        assert_eq!(tokens[0].text(source), r"'a\'b'");
        assert_eq!(tokens[1].kind, TokenKind::String);
    }

    #[test]
    fn test_language_suffix_is_part_of_identifier() {
        let source = "title@lt";
        let tokens = tokenize(source);
        assert_eq!(tokens[0].kind, TokenKind::Ident);
        assert_eq!(tokens[0].text(source), "title@lt");
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("= != < <= > >= & | !"),
            vec![
                TokenKind::Eq,
                TokenKind::Ne,
                TokenKind::Lt,
                TokenKind::Le,
                TokenKind::Gt,
                TokenKind::Ge,
                TokenKind::Amp,
                TokenKind::Pipe,
                TokenKind::Bang,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_unterminated_string_is_error() {
        assert!(kinds("'open").contains(&TokenKind::Error));
    }
}

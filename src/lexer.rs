pub use logos::Span;
use logos::{Lexer as RawLexer, Logos};

use crate::{error::Error, stage::Stage};

/// Longest token the host-side compiler can buffer.
pub const STAGE0_MAX_TOKEN_LEN: usize = 255;

fn unescape(lexer: &mut RawLexer<Token>) -> Result<Box<str>, LexerError> {
    let slice = lexer.slice();
    let mut string = String::with_capacity(slice.len());

    // Skip the quotes on both ends
    let mut chars = slice[1..slice.len() - 1].chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('n') => string.push('\n'),
                Some('t') => string.push('\t'),
                Some('r') => string.push('\r'),
                Some('0') => string.push('\0'),
                Some(c @ ('\\' | '"' | '\'')) => string.push(c),
                Some(c) => Err(LexerError::MalformedEscape(c))?,
                None => Err(LexerError::UnterminatedString)?,
            },
            c => string.push(c),
        }
    }

    Ok(Box::from(string.as_str()))
}

fn unterminated(_lexer: &mut RawLexer<Token>) -> Result<Box<str>, LexerError> {
    Err(LexerError::UnterminatedString)
}

#[derive(thiserror::Error, Debug, PartialEq, Clone, Default)]
pub enum LexerError {
    #[default]
    #[error("invalid token encountered")]
    Invalid,
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("unknown escape sequence `\\{0}`")]
    MalformedEscape(char),
    #[error("token is {0} bytes long, the limit is 255")]
    TokenTooLong(usize),
    #[error("number literal does not fit in 32 bits")]
    NumberTooBig,
}

/// Raw tokens, as recognized by logos. Keywords come out as identifiers and
/// negative literals as a minus followed by a number; [`Lexer`] resolves both.
#[derive(Debug, Clone, PartialEq, Logos)]
#[logos(error = LexerError)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"//[^\n]*")]
pub enum Token {
    #[regex("[0-9]+", |l| Box::from(l.slice()))]
    Number(Box<str>),
    #[regex(r#""([^"\\]|\\.)*""#, unescape)]
    #[regex(r#""([^"\\]|\\.)*"#, unterminated)]
    String(Box<str>),
    #[regex(r"[a-zA-Z_$][a-zA-Z0-9_$]*", |l| Box::from(l.slice()))]
    Identifier(Box<str>),

    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(";")]
    Semicolon,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token(":")]
    Colon,
    #[token("=")]
    Assign,
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
    #[token("<")]
    Less,
    #[token(">")]
    Greater,
    #[token("!")]
    Bang,
    #[token("==")]
    EqualEqual,
    #[token("!=")]
    BangEqual,
    #[token("<=")]
    LessEqual,
    #[token(">=")]
    GreaterEqual,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("**")]
    StarStar,
}

impl Token {
    pub fn lexer(source: &str) -> RawLexer<Self> {
        <Self as Logos>::lexer(source)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Keyword {
    Fn = 4,
    Let,
    If,
    Else,
    While,
    Return,
    Break,
    Continue,
    Class,
    Import,
    New,
}

impl Keyword {
    const ALL: [Keyword; 11] = [
        Keyword::Fn,
        Keyword::Let,
        Keyword::If,
        Keyword::Else,
        Keyword::While,
        Keyword::Return,
        Keyword::Break,
        Keyword::Continue,
        Keyword::Class,
        Keyword::Import,
        Keyword::New,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Keyword::Fn => "fn",
            Keyword::Let => "let",
            Keyword::If => "if",
            Keyword::Else => "else",
            Keyword::While => "while",
            Keyword::Return => "return",
            Keyword::Break => "break",
            Keyword::Continue => "continue",
            Keyword::Class => "class",
            Keyword::Import => "import",
            Keyword::New => "new",
        }
    }

    /// Earliest stage reserving this word.
    pub fn stage(self) -> Stage {
        match self {
            Keyword::Class | Keyword::Import | Keyword::New => Stage::Two,
            _ => Stage::Zero,
        }
    }

    /// Exact-match lookup in the keyword table of `stage`.
    pub fn lookup(text: &str, stage: Stage) -> Option<Keyword> {
        Self::ALL
            .into_iter()
            .find(|keyword| keyword.as_str() == text && keyword.stage() <= stage)
    }
}

/// Operators, numbered after their first character, plus 128 for the two
/// character ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Operator {
    LBrace = b'{' as u32,
    RBrace = b'}' as u32,
    LParen = b'(' as u32,
    RParen = b')' as u32,
    LBracket = b'[' as u32,
    RBracket = b']' as u32,
    Semicolon = b';' as u32,
    Comma = b',' as u32,
    Dot = b'.' as u32,
    Colon = b':' as u32,
    Assign = b'=' as u32,
    Plus = b'+' as u32,
    Minus = b'-' as u32,
    Star = b'*' as u32,
    Slash = b'/' as u32,
    Percent = b'%' as u32,
    Less = b'<' as u32,
    Greater = b'>' as u32,
    Bang = b'!' as u32,
    EqualEqual = b'=' as u32 + 128,
    BangEqual = b'!' as u32 + 128,
    LessEqual = b'<' as u32 + 128,
    GreaterEqual = b'>' as u32 + 128,
    AndAnd = b'&' as u32 + 128,
    OrOr = b'|' as u32 + 128,
    StarStar = b'*' as u32 + 128,
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::LBrace => "{",
            Operator::RBrace => "}",
            Operator::LParen => "(",
            Operator::RParen => ")",
            Operator::LBracket => "[",
            Operator::RBracket => "]",
            Operator::Semicolon => ";",
            Operator::Comma => ",",
            Operator::Dot => ".",
            Operator::Colon => ":",
            Operator::Assign => "=",
            Operator::Plus => "+",
            Operator::Minus => "-",
            Operator::Star => "*",
            Operator::Slash => "/",
            Operator::Percent => "%",
            Operator::Less => "<",
            Operator::Greater => ">",
            Operator::Bang => "!",
            Operator::EqualEqual => "==",
            Operator::BangEqual => "!=",
            Operator::LessEqual => "<=",
            Operator::GreaterEqual => ">=",
            Operator::AndAnd => "&&",
            Operator::OrOr => "||",
            Operator::StarStar => "**",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    End,
    Number,
    String,
    Identifier,
    Keyword(Keyword),
    Operator(Operator),
}

impl TokenKind {
    /// Numeric token type shared with the runtime token protocol.
    pub fn code(self) -> u32 {
        match self {
            TokenKind::End => 0,
            TokenKind::Number => 1,
            TokenKind::String => 2,
            TokenKind::Identifier => 3,
            TokenKind::Keyword(keyword) => keyword as u32,
            TokenKind::Operator(operator) => operator as u32,
        }
    }

    /// Whether a `-` right after this token is a binary minus.
    fn ends_operand(self) -> bool {
        matches!(
            self,
            TokenKind::Number
                | TokenKind::Identifier
                | TokenKind::Operator(Operator::RParen | Operator::RBracket)
        )
    }
}

/// A resolved token. `value` holds the number digits, the unescaped string,
/// the identifier or the operator text; it is empty at the end of input.
#[derive(Debug, Clone, PartialEq)]
pub struct Lexeme {
    pub kind: TokenKind,
    pub value: Box<str>,
    pub span: Span,
}

impl Lexeme {
    pub fn is(&self, kind: TokenKind) -> bool {
        self.kind == kind
    }
}

/// Position of a [`Lexer`] that can be stored and resumed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LexerState {
    offset: usize,
    previous: Option<TokenKind>,
}

impl LexerState {
    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// Token cursor over a source text for a given stage.
#[derive(Debug, Clone)]
pub struct Lexer<'s> {
    source: &'s str,
    stage: Stage,
    state: LexerState,
}

impl<'s> Lexer<'s> {
    pub fn new(source: &'s str, stage: Stage) -> Self {
        Self::resume(source, stage, LexerState::default())
    }

    pub fn resume(source: &'s str, stage: Stage, state: LexerState) -> Self {
        Self {
            source,
            stage,
            state,
        }
    }

    pub fn state(&self) -> LexerState {
        self.state
    }

    pub fn source(&self) -> &'s str {
        self.source
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Produces the next token, and an [`TokenKind::End`] token forever once
    /// the input is exhausted.
    pub fn next_token(&mut self) -> Result<Lexeme, Error> {
        let offset = self.state.offset;
        let mut raw = Token::lexer(&self.source[offset..]);
        let shift = |span: Span| span.start + offset..span.end + offset;

        let Some(token) = raw.next() else {
            let end = self.source.len();
            self.state.offset = end;
            return Ok(Lexeme {
                kind: TokenKind::End,
                value: Box::from(""),
                span: end..end,
            });
        };
        let mut span = shift(raw.span());
        let token = token.map_err(|error| Error::Lex {
            error,
            span: span.clone(),
        })?;

        let (kind, value) = match token {
            Token::Minus if self.folds_negative(span.end) => match raw.next() {
                Some(Ok(Token::Number(digits))) => {
                    span.end = shift(raw.span()).end;
                    (TokenKind::Number, Box::from(format!("-{digits}")))
                }
                _ => self.resolve(Token::Minus),
            },
            other => self.resolve(other),
        };

        if self.stage == Stage::Zero && span.len() > STAGE0_MAX_TOKEN_LEN {
            return Err(Error::Lex {
                error: LexerError::TokenTooLong(span.len()),
                span,
            });
        }
        if kind == TokenKind::Number && value.parse::<i64>().map_or(true, |n| !fits_i32(n)) {
            return Err(Error::Lex {
                error: LexerError::NumberTooBig,
                span,
            });
        }

        self.state = LexerState {
            offset: span.end,
            previous: Some(kind),
        };
        Ok(Lexeme { kind, value, span })
    }

    fn folds_negative(&self, minus_end: usize) -> bool {
        let digit_follows = self.source.as_bytes().get(minus_end).is_some_and(u8::is_ascii_digit);
        digit_follows && !self.state.previous.is_some_and(TokenKind::ends_operand)
    }

    fn resolve(&self, token: Token) -> (TokenKind, Box<str>) {
        let operator = match token {
            Token::Number(digits) => return (TokenKind::Number, digits),
            Token::String(text) => return (TokenKind::String, text),
            Token::Identifier(name) => {
                let kind = Keyword::lookup(&name, self.stage)
                    .map_or(TokenKind::Identifier, TokenKind::Keyword);
                return (kind, name);
            }
            Token::LBrace => Operator::LBrace,
            Token::RBrace => Operator::RBrace,
            Token::LParen => Operator::LParen,
            Token::RParen => Operator::RParen,
            Token::LBracket => Operator::LBracket,
            Token::RBracket => Operator::RBracket,
            Token::Semicolon => Operator::Semicolon,
            Token::Comma => Operator::Comma,
            Token::Dot => Operator::Dot,
            Token::Colon => Operator::Colon,
            Token::Assign => Operator::Assign,
            Token::Plus => Operator::Plus,
            Token::Minus => Operator::Minus,
            Token::Star => Operator::Star,
            Token::Slash => Operator::Slash,
            Token::Percent => Operator::Percent,
            Token::Less => Operator::Less,
            Token::Greater => Operator::Greater,
            Token::Bang => Operator::Bang,
            Token::EqualEqual => Operator::EqualEqual,
            Token::BangEqual => Operator::BangEqual,
            Token::LessEqual => Operator::LessEqual,
            Token::GreaterEqual => Operator::GreaterEqual,
            Token::AndAnd => Operator::AndAnd,
            Token::OrOr => Operator::OrOr,
            Token::StarStar => Operator::StarStar,
        };
        (TokenKind::Operator(operator), Box::from(operator.as_str()))
    }
}

/// i32 literals, plus the unsigned range the target accepts for `i32.const`.
fn fits_i32(n: i64) -> bool {
    (i64::from(i32::MIN)..=i64::from(u32::MAX)).contains(&n)
}

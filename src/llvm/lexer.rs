use once_cell::sync::Lazy;

use std::collections::HashMap;
use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    /// c"..."
    StringLit,
    IntLit,
    I1,
    I8,
    I32,
    I64,
    /// *
    Star,
    /// ,
    Comma,
    /// x, as in `[4 x i64]`
    Cross,
    /// :
    Colon,
    /// =
    Equals,
    /// (
    LParen,
    /// )
    RParen,
    /// {
    LBrace,
    /// }
    RBrace,
    /// [
    LBracket,
    /// ]
    RBracket,
    To,
    Br,
    Eq,
    Ne,
    Or,
    And,
    Add,
    Sub,
    Mul,
    Xor,
    Slt,
    Sle,
    Sgt,
    Sge,
    Shl,
    Ret,
    Lshr,
    Ashr,
    /// getelementptr
    Gep,
    Type,
    Null,
    Call,
    Icmp,
    Void,
    Load,
    Store,
    Entry,
    Label,
    Global,
    Define,
    Declare,
    External,
    Alloca,
    Bitcast,
    MmPtr,
    MmArrayPtr,
    /// `%name`
    Uid,
    /// `@name`
    Gid,
    /// a bare word that is not a keyword, only valid as a block label
    Lbl,
}

static KEYWORDS: Lazy<HashMap<&'static str, TokenKind>> = Lazy::new(|| {
    use TokenKind::*;
    [
        ("i1", I1),
        ("i8", I8),
        ("i32", I32),
        ("i64", I64),
        ("x", Cross),
        ("to", To),
        ("br", Br),
        ("eq", Eq),
        ("ne", Ne),
        ("or", Or),
        ("and", And),
        ("add", Add),
        ("sub", Sub),
        ("mul", Mul),
        ("xor", Xor),
        ("slt", Slt),
        ("sle", Sle),
        ("sgt", Sgt),
        ("sge", Sge),
        ("shl", Shl),
        ("lshr", Lshr),
        ("ashr", Ashr),
        ("ret", Ret),
        ("getelementptr", Gep),
        ("type", Type),
        ("null", Null),
        ("call", Call),
        ("icmp", Icmp),
        ("void", Void),
        ("load", Load),
        ("store", Store),
        ("entry", Entry),
        ("label", Label),
        ("global", Global),
        ("define", Define),
        ("declare", Declare),
        ("external", External),
        ("alloca", Alloca),
        ("bitcast", Bitcast),
        ("mmptr", MmPtr),
        ("mmarrayptr", MmArrayPtr),
    ]
    .into_iter()
    .collect()
});

/// One based line and column of a token
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Loc {
    pub line: u32,
    pub col: u32,
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

#[derive(Clone, Debug)]
enum TokenData {
    Int(i64),
    String(Box<str>),
    None,
}

#[derive(Clone, Debug)]
pub struct Token {
    pub kind: TokenKind,
    pub loc: Loc,
    start: usize,
    end: usize,
    data: TokenData,
}

impl Token {
    pub fn get_int(&self) -> i64 {
        let TokenData::Int(i) = self.data else { unreachable!("{self:?}") };
        i
    }

    pub fn get_string(&self) -> String {
        let TokenData::String(ref s) = self.data else { unreachable!("{self:?}") };
        s.to_string()
    }

    /// The name of an identifier or label, without its sigil
    pub fn get_id<'i>(&self, input: &'i str) -> &'i str {
        let start = match self.kind {
            TokenKind::Uid | TokenKind::Gid => self.start + 1,
            _ => self.start,
        };
        &input[start..self.end]
    }
}

#[derive(Clone, Debug, thiserror::Error)]
#[error("{loc}: {msg}")]
pub struct LexerError {
    loc: Loc,
    msg: String,
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

pub struct Lexer<'input> {
    input: &'input str,
    chars: Peekable<CharIndices<'input>>,
    line: u32,
    line_start: usize,
}

impl<'input> Lexer<'input> {
    pub fn new(input: &'input str) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
            line: 1,
            line_start: 0,
        }
    }

    fn loc(&self, offset: usize) -> Loc {
        Loc { line: self.line, col: (offset - self.line_start) as u32 + 1 }
    }

    fn error(&self, offset: usize, msg: impl Into<String>) -> LexerError {
        LexerError { loc: self.loc(offset), msg: msg.into() }
    }

    fn token(&self, kind: TokenKind, start: usize, end: usize, data: TokenData) -> Token {
        Token { kind, loc: self.loc(start), start, end, data }
    }

    fn single(&self, ix: usize, kind: TokenKind) -> Result<Token, LexerError> {
        Ok(self.token(kind, ix, ix + 1, TokenData::None))
    }

    fn peek_is(&mut self, pred: impl Fn(char) -> bool) -> bool {
        self.chars.peek().is_some_and(|&(_, c)| pred(c))
    }

    /// Consumes characters while `pred` holds, returning the offset just past them
    fn eat_while(&mut self, pred: impl Fn(char) -> bool) -> usize {
        while let Some(&(ix, c)) = self.chars.peek() {
            if !pred(c) {
                return ix;
            }
            self.chars.next();
        }
        self.input.len()
    }

    fn word(&mut self, start: usize) -> Token {
        let end = self.eat_while(is_ident_char);
        let kind = KEYWORDS.get(&self.input[start..end]).copied().unwrap_or(TokenKind::Lbl);
        self.token(kind, start, end, TokenData::None)
    }

    fn integer(&mut self, start: usize) -> Result<Token, LexerError> {
        let end = self.eat_while(|c| c.is_ascii_digit());
        let text = &self.input[start..end];
        let n = text.parse().map_err(|_| self.error(start, format!("integer literal {text} out of range")))?;
        Ok(self.token(TokenKind::IntLit, start, end, TokenData::Int(n)))
    }

    fn ident(&mut self, start: usize, kind: TokenKind) -> Result<Token, LexerError> {
        let end = self.eat_while(is_ident_char);
        if end == start + 1 {
            return Err(self.error(start, "empty identifier"));
        }
        Ok(self.token(kind, start, end, TokenData::None))
    }

    // only the \\, \" and \00 escapes are understood
    fn string(&mut self, start: usize) -> Result<Token, LexerError> {
        // opening quote
        self.chars.next();
        let mut out = String::new();
        let end = loop {
            let Some((ix, c)) = self.chars.next() else {
                return Err(self.error(start, "unterminated string literal"));
            };
            match c {
                '"' => break ix + 1,
                '\\' => {
                    let escaped = match self.chars.next() {
                        Some((_, '\\')) => '\\',
                        Some((_, '"')) => '"',
                        Some((_, '0')) if self.peek_is(|c| c == '0') => {
                            self.chars.next();
                            '\0'
                        }
                        _ => return Err(self.error(ix, "unsupported escape in string literal")),
                    };
                    out.push(escaped);
                }
                '\n' => return Err(self.error(ix, "newline in string literal")),
                c => out.push(c),
            }
        };

        // the printer appends the terminator itself
        if out.ends_with('\0') {
            out.pop();
        }
        Ok(self.token(TokenKind::StringLit, start, end, TokenData::String(out.into())))
    }

    pub fn lex(&mut self) -> Option<Result<Token, LexerError>> {
        loop {
            let (ix, c) = self.chars.next()?;
            let token = match c {
                '\n' => {
                    self.line += 1;
                    self.line_start = ix + 1;
                    continue;
                }
                ' ' | '\t' | '\r' => continue,
                ';' => {
                    self.eat_while(|c| c != '\n');
                    continue;
                }
                '*' => self.single(ix, TokenKind::Star),
                ',' => self.single(ix, TokenKind::Comma),
                ':' => self.single(ix, TokenKind::Colon),
                '=' => self.single(ix, TokenKind::Equals),
                '(' => self.single(ix, TokenKind::LParen),
                ')' => self.single(ix, TokenKind::RParen),
                '{' => self.single(ix, TokenKind::LBrace),
                '}' => self.single(ix, TokenKind::RBrace),
                '[' => self.single(ix, TokenKind::LBracket),
                ']' => self.single(ix, TokenKind::RBracket),
                '%' => self.ident(ix, TokenKind::Uid),
                '@' => self.ident(ix, TokenKind::Gid),
                'c' if self.peek_is(|c| c == '"') => self.string(ix),
                '-' if self.peek_is(|c| c.is_ascii_digit()) => self.integer(ix),
                '0'..='9' => self.integer(ix),
                c if c.is_ascii_alphabetic() || c == '_' => Ok(self.word(ix)),
                c => Err(self.error(ix, format!("unexpected character {c:?}"))),
            };
            return Some(token);
        }
    }
}

pub fn lex(input: &str) -> Result<Vec<Token>, LexerError> {
    let mut lexer = Lexer::new(input);
    std::iter::from_fn(|| lexer.lex()).collect()
}

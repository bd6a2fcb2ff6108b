//! Token definitions

use logos::Logos;

/// Source token. Newlines are kept so that semicolons can be inserted
/// the way Go does it; see [`super::tokenize`].
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\f]+")]
#[logos(skip r"//[^\n]*")]
pub enum Token {
    // Declarations
    #[token("package")]
    Package,
    #[token("import")]
    Import,
    #[token("type")]
    Type,
    #[token("struct")]
    Struct,
    #[token("func")]
    Func,
    #[token("var")]
    Var,

    // Specification keywords
    #[token("ghost")]
    Ghost,
    #[token("pure")]
    Pure,
    #[token("requires")]
    Requires,
    #[token("ensures")]
    Ensures,
    #[token("preserves")]
    Preserves,
    #[token("invariant")]
    Invariant,
    #[token("assert")]
    Assert,
    #[token("assume")]
    Assume,
    #[token("old")]
    Old,
    #[token("acc")]
    Acc,

    // Control flow
    #[token("return")]
    Return,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("for")]
    For,

    // Literals
    #[token("true")]
    True,
    #[token("false")]
    False,

    // Collections
    #[token("set")]
    Set,
    #[token("mset")]
    Mset,
    #[token("union")]
    Union,
    #[token("intersection")]
    Intersection,
    #[token("setminus")]
    Setminus,
    #[token("subset")]
    Subset,
    #[token("in")]
    In,

    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok(), priority = 2)]
    IntLit(i64),

    #[regex(r#""([^"\\]|\\.)*""#, |lex| {
        let s = lex.slice();
        s[1..s.len() - 1].replace("\\\"", "\"").replace("\\\\", "\\")
    })]
    StringLit(String),

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string(), priority = 1)]
    Ident(String),

    // Operators
    #[token("==>")]
    Implies,
    #[token("||")]
    PipePipe,
    #[token("&&")]
    AmpAmp,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<=")]
    LtEq,
    #[token(">=")]
    GtEq,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
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
    #[token("!")]
    Bang,
    #[token("&")]
    Ampersand,
    #[token("#")]
    Hash,
    #[token("|")]
    Pipe,
    #[token(":=")]
    ColonEq,
    #[token("=")]
    Eq,

    // Delimiters
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(";")]
    Semi,
    #[token(":")]
    Colon,
    #[token(".")]
    Dot,

    #[token("\n")]
    Newline,
    /// `/* ... */`; true when the comment spans a line break
    #[token("/*", block_comment)]
    BlockComment(bool),
}

/// Consume a block comment up to the closing `*/`. Unterminated comments
/// are lexer errors.
fn block_comment(lex: &mut logos::Lexer<'_, Token>) -> Option<bool> {
    let end = lex.remainder().find("*/")?;
    let multiline = lex.remainder()[..end].contains('\n');
    lex.bump(end + 2);
    Some(multiline)
}

impl Token {
    /// Go inserts a semicolon at a newline that follows one of these tokens.
    pub fn ends_statement(&self) -> bool {
        matches!(
            self,
            Token::Ident(_)
                | Token::IntLit(_)
                | Token::StringLit(_)
                | Token::True
                | Token::False
                | Token::Return
                | Token::RParen
                | Token::RBracket
                | Token::RBrace
                | Token::Pipe
        )
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Token::Package => "package",
            Token::Import => "import",
            Token::Type => "type",
            Token::Struct => "struct",
            Token::Func => "func",
            Token::Var => "var",
            Token::Ghost => "ghost",
            Token::Pure => "pure",
            Token::Requires => "requires",
            Token::Ensures => "ensures",
            Token::Preserves => "preserves",
            Token::Invariant => "invariant",
            Token::Assert => "assert",
            Token::Assume => "assume",
            Token::Old => "old",
            Token::Acc => "acc",
            Token::Return => "return",
            Token::If => "if",
            Token::Else => "else",
            Token::For => "for",
            Token::True => "true",
            Token::False => "false",
            Token::Set => "set",
            Token::Mset => "mset",
            Token::Union => "union",
            Token::Intersection => "intersection",
            Token::Setminus => "setminus",
            Token::Subset => "subset",
            Token::In => "in",
            Token::IntLit(n) => return write!(f, "{n}"),
            Token::StringLit(s) => return write!(f, "{s:?}"),
            Token::Ident(s) => return write!(f, "{s}"),
            Token::Implies => "==>",
            Token::PipePipe => "||",
            Token::AmpAmp => "&&",
            Token::EqEq => "==",
            Token::NotEq => "!=",
            Token::LtEq => "<=",
            Token::GtEq => ">=",
            Token::Lt => "<",
            Token::Gt => ">",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Bang => "!",
            Token::Ampersand => "&",
            Token::Hash => "#",
            Token::Pipe => "|",
            Token::ColonEq => ":=",
            Token::Eq => "=",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::Comma => ",",
            Token::Semi => ";",
            Token::Colon => ":",
            Token::Dot => ".",
            Token::Newline => "newline",
            Token::BlockComment(_) => "comment",
        };
        write!(f, "{text}")
    }
}

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // Keywords
    Digraph,
    Graph,
    Node,
    Edge,
    Subgraph,
    True,
    False,

    // Literals
    Identifier,
    String,
    Integer,
    Float,
    Duration,

    // Punctuation
    Arrow,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Equals,
    Comma,
    Semicolon,
    Dot,

    Eof,
}

impl TokenKind {
    /// Keyword kind for an identifier-shaped word, if it is reserved.
    pub fn keyword(word: &str) -> Option<TokenKind> {
        match word {
            "digraph" => Some(TokenKind::Digraph),
            "graph" => Some(TokenKind::Graph),
            "node" => Some(TokenKind::Node),
            "edge" => Some(TokenKind::Edge),
            "subgraph" => Some(TokenKind::Subgraph),
            "true" => Some(TokenKind::True),
            "false" => Some(TokenKind::False),
            _ => None,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            TokenKind::Digraph => "'digraph'",
            TokenKind::Graph => "'graph'",
            TokenKind::Node => "'node'",
            TokenKind::Edge => "'edge'",
            TokenKind::Subgraph => "'subgraph'",
            TokenKind::True => "'true'",
            TokenKind::False => "'false'",
            TokenKind::Identifier => "identifier",
            TokenKind::String => "string",
            TokenKind::Integer => "integer",
            TokenKind::Float => "float",
            TokenKind::Duration => "duration",
            TokenKind::Arrow => "'->'",
            TokenKind::LBrace => "'{'",
            TokenKind::RBrace => "'}'",
            TokenKind::LBracket => "'['",
            TokenKind::RBracket => "']'",
            TokenKind::Equals => "'='",
            TokenKind::Comma => "','",
            TokenKind::Semicolon => "';'",
            TokenKind::Dot => "'.'",
            TokenKind::Eof => "end of input",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// A lexed token. `value` holds the literal text; string tokens hold the
/// unescaped contents. Positions are 1-based.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn new(kind: TokenKind, value: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            kind,
            value: value.into(),
            line,
            column,
        }
    }
}

use trellis_types::{Result, TrellisError};

use crate::ast::{AttributeValue, Attributes, Edge, Graph, Node};
use crate::duration::parse_duration;
use crate::lexer::tokenize;
use crate::tokens::{Token, TokenKind};

/// Tokenize and parse source text into a [`Graph`].
pub fn parse(source: &str) -> Result<Graph> {
    let tokens = tokenize(source)?;
    parse_tokens(&tokens)
}

/// Parse a token stream produced by [`tokenize`]. The stream must end with
/// an `Eof` token.
pub fn parse_tokens(tokens: &[Token]) -> Result<Graph> {
    match tokens.last() {
        Some(last) if last.kind == TokenKind::Eof => {}
        Some(last) => {
            return Err(TrellisError::Parse {
                message: "Token stream is missing end of input".into(),
                line: last.line,
                column: last.column,
            })
        }
        None => {
            return Err(TrellisError::Parse {
                message: "Expected 'digraph', got end of input".into(),
                line: 1,
                column: 1,
            })
        }
    }
    TokenParser::new(tokens).parse_graph()
}

/// Defaults in effect for one `{ ... }` block. Subgraphs start from a copy of
/// the enclosing scope.
#[derive(Debug, Clone, Default)]
struct Scope {
    node_defaults: Attributes,
    edge_defaults: Attributes,
}

struct TokenParser<'t> {
    tokens: &'t [Token],
    pos: usize,
    graph: Graph,
    scopes: Vec<Scope>,
}

fn describe(token: &Token) -> String {
    match token.kind {
        TokenKind::Identifier
        | TokenKind::String
        | TokenKind::Integer
        | TokenKind::Float
        | TokenKind::Duration => format!("{} '{}'", token.kind, token.value),
        kind => kind.to_string(),
    }
}

impl<'t> TokenParser<'t> {
    fn new(tokens: &'t [Token]) -> Self {
        Self {
            tokens,
            pos: 0,
            graph: Graph::default(),
            scopes: vec![Scope::default()],
        }
    }

    fn peek(&self) -> &'t Token {
        let tokens = self.tokens;
        &tokens[self.pos.min(tokens.len() - 1)]
    }

    fn peek_kind_at(&self, offset: usize) -> TokenKind {
        let tokens = self.tokens;
        tokens[(self.pos + offset).min(tokens.len() - 1)].kind
    }

    fn advance(&mut self) -> &'t Token {
        let token = self.peek();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn error_at(&self, token: &Token, message: impl Into<String>) -> TrellisError {
        TrellisError::Parse {
            message: message.into(),
            line: token.line,
            column: token.column,
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<&'t Token> {
        let token = self.peek();
        if token.kind != kind {
            return Err(self.error_at(token, format!("Expected {kind}, got {}", describe(token))));
        }
        Ok(self.advance())
    }

    fn scope(&self) -> &Scope {
        // The root scope is never popped.
        &self.scopes[self.scopes.len() - 1]
    }

    fn scope_mut(&mut self) -> &mut Scope {
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    fn in_subgraph(&self) -> bool {
        self.scopes.len() > 1
    }

    fn parse_graph(mut self) -> Result<Graph> {
        self.expect(TokenKind::Digraph)?;
        let name = self.peek();
        match name.kind {
            TokenKind::Identifier | TokenKind::String => {
                self.graph.name = name.value.clone();
                self.advance();
            }
            _ => {
                return Err(self.error_at(name, format!("Expected graph name, got {}", describe(name))))
            }
        }
        self.expect(TokenKind::LBrace)?;
        self.parse_statements()?;
        self.expect(TokenKind::RBrace)?;

        let trailing = self.peek();
        if trailing.kind != TokenKind::Eof {
            return Err(self.error_at(
                trailing,
                format!("Unexpected content after graph body: {}", describe(trailing)),
            ));
        }
        tracing::debug!(
            graph = %self.graph.name,
            nodes = self.graph.nodes.len(),
            edges = self.graph.edges.len(),
            "parsed graph"
        );
        Ok(self.graph)
    }

    /// Statements up to (not including) the closing brace.
    fn parse_statements(&mut self) -> Result<()> {
        loop {
            let token = self.peek();
            match token.kind {
                TokenKind::RBrace => return Ok(()),
                TokenKind::Eof => {
                    return Err(self.error_at(token, "Expected '}', got end of input"))
                }
                TokenKind::Semicolon | TokenKind::Comma => {
                    self.advance();
                }
                _ => self.parse_statement()?,
            }
        }
    }

    fn parse_statement(&mut self) -> Result<()> {
        let token = self.peek();
        match token.kind {
            TokenKind::Graph => {
                self.advance();
                let attrs = self.parse_attr_list()?;
                self.merge_graph_attrs(attrs);
            }
            TokenKind::Node => {
                self.advance();
                let attrs = self.parse_attr_list()?;
                self.scope_mut().node_defaults.extend(attrs);
            }
            TokenKind::Edge => {
                self.advance();
                let attrs = self.parse_attr_list()?;
                self.scope_mut().edge_defaults.extend(attrs);
            }
            TokenKind::Subgraph => {
                self.advance();
                if matches!(self.peek().kind, TokenKind::Identifier | TokenKind::String) {
                    self.advance();
                }
                self.parse_subgraph_body()?;
            }
            TokenKind::LBrace => self.parse_subgraph_body()?,
            TokenKind::Identifier
                if matches!(self.peek_kind_at(1), TokenKind::Equals | TokenKind::Dot) =>
            {
                let key = self.parse_key()?;
                self.expect(TokenKind::Equals)?;
                let value = self.parse_value()?;
                self.merge_graph_attrs(Attributes::from([(key, value)]));
            }
            TokenKind::Identifier | TokenKind::String => self.parse_node_or_edge()?,
            _ => {
                return Err(self.error_at(
                    token,
                    format!("Unexpected token {} in statement", describe(token)),
                ))
            }
        }
        Ok(())
    }

    fn merge_graph_attrs(&mut self, attrs: Attributes) {
        if self.in_subgraph() {
            tracing::debug!(keys = attrs.len(), "ignoring graph attributes inside subgraph");
            return;
        }
        self.graph.attributes.extend(attrs);
    }

    fn parse_subgraph_body(&mut self) -> Result<()> {
        self.expect(TokenKind::LBrace)?;
        let inner = self.scope().clone();
        self.scopes.push(inner);
        let body = self.parse_statements();
        self.scopes.pop();
        body?;
        self.expect(TokenKind::RBrace)?;
        Ok(())
    }

    fn parse_node_id(&mut self) -> Result<String> {
        let token = self.peek();
        match token.kind {
            TokenKind::Identifier | TokenKind::String => {
                self.advance();
                Ok(token.value.clone())
            }
            _ => Err(self.error_at(token, format!("Expected node id, got {}", describe(token)))),
        }
    }

    /// `a [attrs]` or `a -> b -> c [attrs]`.
    fn parse_node_or_edge(&mut self) -> Result<()> {
        let first = self.parse_node_id()?;

        if self.peek().kind != TokenKind::Arrow {
            self.ensure_node(&first);
            if self.peek().kind == TokenKind::LBracket {
                let attrs = self.parse_attr_list()?;
                if let Some(node) = self.graph.nodes.get_mut(&first) {
                    node.attributes.extend(attrs);
                }
            }
            return Ok(());
        }

        let mut chain = vec![first];
        while self.peek().kind == TokenKind::Arrow {
            self.advance();
            chain.push(self.parse_node_id()?);
        }
        let attrs = if self.peek().kind == TokenKind::LBracket {
            self.parse_attr_list()?
        } else {
            Attributes::new()
        };

        for id in &chain {
            self.ensure_node(id);
        }
        for pair in chain.windows(2) {
            let mut edge_attrs = self.scope().edge_defaults.clone();
            edge_attrs.extend(attrs.clone());
            self.graph.edges.push(Edge {
                from: pair[0].clone(),
                to: pair[1].clone(),
                attributes: edge_attrs,
            });
        }
        Ok(())
    }

    /// Register `id` with the current node defaults unless it already exists.
    fn ensure_node(&mut self, id: &str) {
        if self.graph.nodes.contains_key(id) {
            return;
        }
        let attributes = self.scopes[self.scopes.len() - 1].node_defaults.clone();
        self.graph.nodes.insert(
            id.to_string(),
            Node {
                id: id.to_string(),
                attributes,
            },
        );
    }

    fn parse_attr_list(&mut self) -> Result<Attributes> {
        self.expect(TokenKind::LBracket)?;
        let mut attrs = Attributes::new();
        loop {
            let token = self.peek();
            match token.kind {
                TokenKind::RBracket => {
                    self.advance();
                    return Ok(attrs);
                }
                TokenKind::Comma | TokenKind::Semicolon => {
                    self.advance();
                }
                TokenKind::Identifier | TokenKind::String => {
                    let key = self.parse_key()?;
                    self.expect(TokenKind::Equals)?;
                    let value = self.parse_value()?;
                    attrs.insert(key, value);
                }
                _ => {
                    return Err(self.error_at(
                        token,
                        format!("Expected attribute name, got {}", describe(token)),
                    ))
                }
            }
        }
    }

    /// `ident ( '.' ident )*` or a quoted string.
    fn parse_key(&mut self) -> Result<String> {
        let first = self.peek();
        if first.kind == TokenKind::String {
            self.advance();
            return Ok(first.value.clone());
        }
        let mut key = self.expect(TokenKind::Identifier)?.value.clone();
        while self.peek().kind == TokenKind::Dot {
            self.advance();
            key.push('.');
            key.push_str(&self.expect(TokenKind::Identifier)?.value);
        }
        Ok(key)
    }

    fn parse_value(&mut self) -> Result<AttributeValue> {
        let token = self.peek();
        let value = match token.kind {
            TokenKind::String => AttributeValue::String(token.value.clone()),
            TokenKind::True => AttributeValue::Boolean(true),
            TokenKind::False => AttributeValue::Boolean(false),
            TokenKind::Integer => match token.value.parse::<i64>() {
                Ok(n) => AttributeValue::Integer(n),
                Err(_) => {
                    return Err(self.error_at(
                        token,
                        format!("Invalid integer literal: {}", token.value),
                    ))
                }
            },
            TokenKind::Float => match token.value.parse::<f64>() {
                Ok(x) => AttributeValue::Float(x),
                Err(_) => {
                    return Err(
                        self.error_at(token, format!("Invalid float literal: {}", token.value))
                    )
                }
            },
            TokenKind::Duration => match parse_duration(&token.value) {
                Ok(ms) => AttributeValue::Duration(ms),
                Err(e) => return Err(self.error_at(token, e.to_string())),
            },
            // A bare identifier value is its literal text, dots included.
            TokenKind::Identifier => return Ok(AttributeValue::String(self.parse_key()?)),
            _ => {
                return Err(self.error_at(
                    token,
                    format!("Expected attribute value, got {}", describe(token)),
                ))
            }
        };
        self.advance();
        Ok(value)
    }
}

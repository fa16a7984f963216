//! Structural devicetree parser for `.keymap` files.
//!
//! This is the authoritative parse backend. It tokenizes the source, builds a
//! small node tree, and leaves interpretation (which nodes are layers, combos,
//! hold-taps) to the caller. Preprocessor lines are collected separately since
//! devicetree proper does not know about them.

use crate::error::{Error, Result};

/// A parsed `#include` / `#define` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Include(String),
    Define { name: String, value: String },
}

/// One token inside a `< ... >` cell list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    Number(i64),
    /// Bare word or behavior reference (`Q`, `&kp`, `LC(A)`).
    Word(String),
}

/// A property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    /// `prop;` with no value.
    Flag,
    /// `prop = "text";`
    Text(String),
    /// `prop = <...>, <...>;` with one inner vec per angle-bracket group.
    CellGroups(Vec<Vec<Cell>>),
}

/// A devicetree node.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DtNode {
    /// Optional label, e.g. `hm` in `hm: hm { ... }`.
    pub label: Option<String>,
    /// Node name; `/` for the root, `&ref` for reference overrides.
    pub name: String,
    pub properties: Vec<(String, PropertyValue)>,
    pub children: Vec<DtNode>,
    /// 1-based source line of the opening brace, for diagnostics.
    pub line: usize,
}

impl DtNode {
    /// Looks up a property by name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// String property value, if present.
    #[must_use]
    pub fn text_property(&self, name: &str) -> Option<&str> {
        match self.property(name) {
            Some(PropertyValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    /// Flattened cells of a cell-group property.
    #[must_use]
    pub fn cells_property(&self, name: &str) -> Option<Vec<Cell>> {
        match self.property(name) {
            Some(PropertyValue::CellGroups(groups)) => {
                Some(groups.iter().flatten().cloned().collect())
            }
            _ => None,
        }
    }

    /// Depth-first search over this node and its children.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a DtNode)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }
}

/// A parsed `.keymap` source file.
#[derive(Debug, Clone, Default)]
pub struct DtDocument {
    pub directives: Vec<Directive>,
    /// Top-level nodes: the root `/` node(s) and any `&ref` overrides.
    pub nodes: Vec<DtNode>,
}

impl DtDocument {
    /// All includes, formatted back as directive lines.
    #[must_use]
    pub fn include_lines(&self) -> Vec<String> {
        self.directives
            .iter()
            .filter_map(|d| match d {
                Directive::Include(path) => Some(format!("#include {path}")),
                Directive::Define { .. } => None,
            })
            .collect()
    }

    /// Finds every node (at any depth) whose `compatible` matches.
    #[must_use]
    pub fn find_compatible(&self, compatible: &str) -> Vec<&DtNode> {
        let mut found = Vec::new();
        for node in &self.nodes {
            node.walk(&mut |n| {
                if n.text_property("compatible") == Some(compatible) {
                    found.push(n);
                }
            });
        }
        found
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Text(String),
    LBrace,
    RBrace,
    Semi,
    Equals,
    Lt,
    Gt,
    Comma,
    Colon,
    Slash,
}

struct Tokenizer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '#' | '&' | '@' | '.' | '(' | ')' | '+' | '*')
}

impl<'a> Tokenizer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            line: 1,
        }
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::ParseFailed {
            line: self.line,
            message: message.into(),
        }
    }

    fn next_token(&mut self) -> Result<Option<(Token, usize)>> {
        loop {
            let Some(&c) = self.chars.peek() else {
                return Ok(None);
            };
            match c {
                '\n' => {
                    self.line += 1;
                    self.chars.next();
                }
                c if c.is_whitespace() => {
                    self.chars.next();
                }
                '/' => {
                    self.chars.next();
                    match self.chars.peek() {
                        Some('/') => {
                            // Line comment.
                            for cc in self.chars.by_ref() {
                                if cc == '\n' {
                                    self.line += 1;
                                    break;
                                }
                            }
                        }
                        Some('*') => {
                            self.chars.next();
                            let mut prev = ' ';
                            loop {
                                match self.chars.next() {
                                    Some('\n') => {
                                        self.line += 1;
                                        prev = '\n';
                                    }
                                    Some('/') if prev == '*' => break,
                                    Some(cc) => prev = cc,
                                    None => return Err(self.error("unterminated comment")),
                                }
                            }
                        }
                        _ => return Ok(Some((Token::Slash, self.line))),
                    }
                }
                '"' => {
                    self.chars.next();
                    let mut text = String::new();
                    loop {
                        match self.chars.next() {
                            Some('"') => break,
                            Some('\\') => {
                                if let Some(escaped) = self.chars.next() {
                                    text.push(escaped);
                                }
                            }
                            Some('\n') => return Err(self.error("unterminated string")),
                            Some(cc) => text.push(cc),
                            None => return Err(self.error("unterminated string")),
                        }
                    }
                    return Ok(Some((Token::Text(text), self.line)));
                }
                '{' => {
                    self.chars.next();
                    return Ok(Some((Token::LBrace, self.line)));
                }
                '}' => {
                    self.chars.next();
                    return Ok(Some((Token::RBrace, self.line)));
                }
                ';' => {
                    self.chars.next();
                    return Ok(Some((Token::Semi, self.line)));
                }
                '=' => {
                    self.chars.next();
                    return Ok(Some((Token::Equals, self.line)));
                }
                '<' => {
                    self.chars.next();
                    return Ok(Some((Token::Lt, self.line)));
                }
                '>' => {
                    self.chars.next();
                    return Ok(Some((Token::Gt, self.line)));
                }
                ',' => {
                    self.chars.next();
                    return Ok(Some((Token::Comma, self.line)));
                }
                ':' => {
                    self.chars.next();
                    return Ok(Some((Token::Colon, self.line)));
                }
                c if is_word_char(c) => {
                    let mut word = String::new();
                    while let Some(&wc) = self.chars.peek() {
                        if is_word_char(wc) {
                            word.push(wc);
                            self.chars.next();
                        } else {
                            break;
                        }
                    }
                    return Ok(Some((Token::Word(word), self.line)));
                }
                other => return Err(self.error(format!("unexpected character '{other}'"))),
            }
        }
    }
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    position: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position).map(|(t, _)| t)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.position.min(self.tokens.len().saturating_sub(1)))
            .map_or(0, |(_, l)| *l)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).map(|(t, _)| t.clone());
        self.position += 1;
        token
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::ParseFailed {
            line: self.line(),
            message: message.into(),
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        match self.next() {
            Some(token) if token == *expected => Ok(()),
            Some(token) => Err(self.error(format!("expected {expected:?}, found {token:?}"))),
            None => Err(self.error(format!("expected {expected:?}, found end of input"))),
        }
    }

    fn parse_document(&mut self) -> Result<Vec<DtNode>> {
        let mut nodes = Vec::new();
        while let Some(token) = self.peek() {
            match token {
                Token::Slash => {
                    let line = self.line();
                    self.next();
                    self.expect(&Token::LBrace)?;
                    let mut root = self.parse_node_body("/".to_string(), None, line)?;
                    root.line = line;
                    nodes.push(root);
                    self.expect(&Token::Semi)?;
                }
                Token::Word(name) if name.starts_with('&') => {
                    let name = name.clone();
                    let line = self.line();
                    self.next();
                    self.expect(&Token::LBrace)?;
                    let node = self.parse_node_body(name, None, line)?;
                    nodes.push(node);
                    self.expect(&Token::Semi)?;
                }
                Token::Semi => {
                    self.next();
                }
                other => {
                    return Err(self.error(format!("unexpected top-level token {other:?}")));
                }
            }
        }
        Ok(nodes)
    }

    /// Parses the interior of a node after its opening brace.
    fn parse_node_body(
        &mut self,
        name: String,
        label: Option<String>,
        line: usize,
    ) -> Result<DtNode> {
        let mut node = DtNode {
            label,
            name,
            line,
            ..DtNode::default()
        };

        loop {
            match self.peek() {
                Some(Token::RBrace) => {
                    self.next();
                    return Ok(node);
                }
                Some(Token::Word(_)) => {
                    let Some(Token::Word(word)) = self.next() else {
                        unreachable!()
                    };
                    match self.peek() {
                        // `label: name { ... };`
                        Some(Token::Colon) => {
                            self.next();
                            let Some(Token::Word(child_name)) = self.next() else {
                                return Err(self.error("expected node name after label"));
                            };
                            let child_line = self.line();
                            self.expect(&Token::LBrace)?;
                            let child =
                                self.parse_node_body(child_name, Some(word), child_line)?;
                            node.children.push(child);
                            self.expect(&Token::Semi)?;
                        }
                        // `name { ... };`
                        Some(Token::LBrace) => {
                            let child_line = self.line();
                            self.next();
                            let child = self.parse_node_body(word, None, child_line)?;
                            node.children.push(child);
                            self.expect(&Token::Semi)?;
                        }
                        // `prop = ...;`
                        Some(Token::Equals) => {
                            self.next();
                            let value = self.parse_property_value()?;
                            node.properties.push((word, value));
                            self.expect(&Token::Semi)?;
                        }
                        // `prop;`
                        Some(Token::Semi) => {
                            self.next();
                            node.properties.push((word, PropertyValue::Flag));
                        }
                        other => {
                            return Err(
                                self.error(format!("unexpected token after '{word}': {other:?}"))
                            );
                        }
                    }
                }
                other => {
                    return Err(self.error(format!("unexpected token in node body: {other:?}")));
                }
            }
        }
    }

    fn parse_property_value(&mut self) -> Result<PropertyValue> {
        match self.peek() {
            Some(Token::Text(_)) => {
                let Some(Token::Text(text)) = self.next() else {
                    unreachable!()
                };
                Ok(PropertyValue::Text(text))
            }
            Some(Token::Lt) => {
                let mut groups = Vec::new();
                loop {
                    self.expect(&Token::Lt)?;
                    let mut cells = Vec::new();
                    loop {
                        match self.next() {
                            Some(Token::Gt) => break,
                            Some(Token::Word(word)) => {
                                let cell = parse_number(&word)
                                    .map_or_else(|| Cell::Word(word), Cell::Number);
                                cells.push(cell);
                            }
                            Some(other) => {
                                return Err(
                                    self.error(format!("unexpected cell token {other:?}"))
                                );
                            }
                            None => return Err(self.error("unterminated cell list")),
                        }
                    }
                    groups.push(cells);
                    if self.peek() == Some(&Token::Comma) {
                        self.next();
                    } else {
                        break;
                    }
                }
                Ok(PropertyValue::CellGroups(groups))
            }
            other => Err(self.error(format!("unexpected property value {other:?}"))),
        }
    }
}

fn parse_number(word: &str) -> Option<i64> {
    if let Some(hex) = word.strip_prefix("0x").or_else(|| word.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()
    } else {
        word.parse().ok()
    }
}

/// Strips preprocessor lines, recording them as directives.
fn extract_directives(source: &str) -> (String, Vec<Directive>) {
    let mut directives = Vec::new();
    let mut remaining = String::with_capacity(source.len());

    for line in source.lines() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("#include") {
            directives.push(Directive::Include(rest.trim().to_string()));
            remaining.push('\n');
        } else if let Some(rest) = trimmed.strip_prefix("#define") {
            let rest = rest.trim();
            let (name, value) = rest
                .split_once(char::is_whitespace)
                .map_or((rest, ""), |(n, v)| (n, v.trim()));
            directives.push(Directive::Define {
                name: name.to_string(),
                value: value.to_string(),
            });
            remaining.push('\n');
        } else {
            remaining.push_str(line);
            remaining.push('\n');
        }
    }
    (remaining, directives)
}

/// Parses `.keymap` source into a document tree.
pub fn parse_dt(source: &str) -> Result<DtDocument> {
    let (stripped, directives) = extract_directives(source);

    let mut tokenizer = Tokenizer::new(&stripped);
    let mut tokens = Vec::new();
    while let Some(token) = tokenizer.next_token()? {
        tokens.push(token);
    }

    let mut parser = Parser {
        tokens,
        position: 0,
    };
    let nodes = parser.parse_document()?;
    Ok(DtDocument { directives, nodes })
}

//! Tokenizer and parser for the `CREATE TABLE` statements returned by MySQL's
//! `SHOW CREATE TABLE`.
//!
//! Only the column definition list is interpreted. Index, key and constraint lines are skipped
//! except for `PRIMARY KEY`, and table options after the closing parenthesis are ignored.

use crate::bail;
use crate::error::{ErrorKind, EtlResult};

/// Lexical token of a `CREATE TABLE` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    /// A backtick quoted identifier, unescaped.
    QuotedIdent(String),
    /// A bare keyword or identifier.
    Word(String),
    Number(String),
    /// A single or double quoted string literal, unescaped.
    Str(String),
    LParen,
    RParen,
    Comma,
    Symbol(char),
}

fn tokenize(sql: &str) -> EtlResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = sql.chars().peekable();

    while let Some(&ch) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            '`' => {
                chars.next();
                let mut ident = String::new();
                loop {
                    match chars.next() {
                        Some('`') if chars.peek() == Some(&'`') => {
                            chars.next();
                            ident.push('`');
                        }
                        Some('`') => break,
                        Some(c) => ident.push(c),
                        None => bail!(
                            ErrorKind::SchemaTransformationError,
                            "Unterminated identifier in CREATE TABLE statement",
                            format!("identifier starting with `{ident}` is never closed")
                        ),
                    }
                }
                tokens.push(Token::QuotedIdent(ident));
            }
            '\'' | '"' => {
                let quote = ch;
                chars.next();
                let mut literal = String::new();
                loop {
                    match chars.next() {
                        Some('\\') => {
                            if let Some(escaped) = chars.next() {
                                literal.push(escaped);
                            }
                        }
                        Some(c) if c == quote && chars.peek() == Some(&quote) => {
                            chars.next();
                            literal.push(quote);
                        }
                        Some(c) if c == quote => break,
                        Some(c) => literal.push(c),
                        None => bail!(
                            ErrorKind::SchemaTransformationError,
                            "Unterminated string literal in CREATE TABLE statement",
                            format!("literal starting with {quote}{literal} is never closed")
                        ),
                    }
                }
                tokens.push(Token::Str(literal));
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            c if c.is_ascii_digit() => {
                let mut number = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        number.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Number(number));
            }
            c if c.is_alphanumeric() || c == '_' || c == '$' => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' || c == '$' {
                        word.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Word(word));
            }
            c => {
                chars.next();
                tokens.push(Token::Symbol(c));
            }
        }
    }

    Ok(tokens)
}

/// A column definition extracted from a `CREATE TABLE` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: String,
    /// Lowercase base type, for example `varchar` or `tinyint`.
    pub data_type: String,
    /// Text between the parentheses following the type with whitespace removed, for example
    /// `10,2`.
    pub params: Option<String>,
    pub unsigned: bool,
    /// Everything after the type, rendered back to SQL.
    pub modifiers: String,
}

impl ColumnDefinition {
    /// Returns the type as MySQL prints it, for example `decimal(10,2) unsigned`.
    pub fn full_type(&self) -> String {
        let mut full_type = self.data_type.clone();
        if let Some(params) = &self.params {
            full_type.push('(');
            full_type.push_str(params);
            full_type.push(')');
        }
        if self.unsigned {
            full_type.push_str(" unsigned");
        }

        full_type
    }

    pub fn is_not_null(&self) -> bool {
        self.modifiers.to_uppercase().contains("NOT NULL")
    }
}

/// The parts of a `CREATE TABLE` statement used for schema conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTable {
    pub table_name: String,
    pub columns: Vec<ColumnDefinition>,
    pub primary_key: Vec<String>,
}

/// Parses a `CREATE TABLE` statement.
///
/// A statement that parses but defines no columns is returned as is; callers decide whether an
/// empty column list is an error.
pub fn parse_create_table(sql: &str) -> EtlResult<ParsedTable> {
    let tokens = tokenize(sql)?;
    let mut parser = Parser { tokens, position: 0 };

    parser.parse_create_table()
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }

        token
    }

    fn next_is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(word)) if word.eq_ignore_ascii_case(keyword))
    }

    fn expect_keyword(&mut self, keyword: &'static str) -> EtlResult<()> {
        match self.next() {
            Some(Token::Word(word)) if word.eq_ignore_ascii_case(keyword) => Ok(()),
            other => bail!(
                ErrorKind::SchemaTransformationError,
                "Unexpected token in CREATE TABLE statement",
                format!("expected `{keyword}`, found {other:?}")
            ),
        }
    }

    fn parse_identifier(&mut self) -> EtlResult<String> {
        match self.next() {
            Some(Token::QuotedIdent(ident)) | Some(Token::Word(ident)) => Ok(ident),
            other => bail!(
                ErrorKind::SchemaTransformationError,
                "Unexpected token in CREATE TABLE statement",
                format!("expected an identifier, found {other:?}")
            ),
        }
    }

    fn parse_create_table(&mut self) -> EtlResult<ParsedTable> {
        self.expect_keyword("CREATE")?;
        if self.next_is_keyword("TEMPORARY") {
            self.next();
        }
        self.expect_keyword("TABLE")?;
        if self.next_is_keyword("IF") {
            self.expect_keyword("IF")?;
            self.expect_keyword("NOT")?;
            self.expect_keyword("EXISTS")?;
        }

        let mut table_name = self.parse_identifier()?;
        if self.peek() == Some(&Token::Symbol('.')) {
            self.next();
            table_name = self.parse_identifier()?;
        }

        match self.next() {
            Some(Token::LParen) => {}
            other => bail!(
                ErrorKind::SchemaTransformationError,
                "CREATE TABLE statement has no column definition block",
                format!("expected `(` after table `{table_name}`, found {other:?}")
            ),
        }

        let mut columns = Vec::new();
        let mut primary_key = Vec::new();

        loop {
            let definition = self.take_definition(&table_name)?;
            let closed = matches!(self.next(), Some(Token::RParen));

            if let Some(first) = definition.first() {
                match first {
                    Token::QuotedIdent(_) => columns.push(parse_column(&definition)?),
                    Token::Word(word) => {
                        let word = word.to_uppercase();
                        match word.as_str() {
                            "PRIMARY" => primary_key = parse_key_columns(&definition),
                            "CONSTRAINT" => {
                                if definition.iter().any(
                                    |token| matches!(token, Token::Word(w) if w.eq_ignore_ascii_case("PRIMARY")),
                                ) {
                                    primary_key = parse_key_columns(&definition);
                                }
                            }
                            "KEY" | "INDEX" | "UNIQUE" | "FULLTEXT" | "SPATIAL" | "FOREIGN"
                            | "CHECK" => {}
                            _ => columns.push(parse_column(&definition)?),
                        }
                    }
                    _ => {}
                }
            }

            if closed {
                break;
            }
        }

        Ok(ParsedTable {
            table_name,
            columns,
            primary_key,
        })
    }

    /// Consumes tokens up to, but excluding, the comma or parenthesis that ends the current
    /// definition.
    fn take_definition(&mut self, table_name: &str) -> EtlResult<Vec<Token>> {
        let mut definition = Vec::new();
        let mut depth = 0usize;

        loop {
            match self.peek() {
                None => bail!(
                    ErrorKind::SchemaTransformationError,
                    "CREATE TABLE statement is truncated",
                    format!("column definition block of `{table_name}` is never closed")
                ),
                Some(Token::Comma) if depth == 0 => return Ok(definition),
                Some(Token::RParen) if depth == 0 => return Ok(definition),
                Some(Token::LParen) => depth += 1,
                Some(Token::RParen) => depth -= 1,
                _ => {}
            }

            if let Some(token) = self.next() {
                definition.push(token);
            }
        }
    }
}

fn parse_column(definition: &[Token]) -> EtlResult<ColumnDefinition> {
    let name = match definition.first() {
        Some(Token::QuotedIdent(name)) | Some(Token::Word(name)) => name.clone(),
        other => bail!(
            ErrorKind::SchemaTransformationError,
            "Column definition has no name",
            format!("found {other:?}")
        ),
    };

    let data_type = match definition.get(1) {
        Some(Token::Word(data_type)) => data_type.to_lowercase(),
        other => bail!(
            ErrorKind::SchemaTransformationError,
            "Column definition has no type",
            format!("column `{name}` is followed by {other:?}")
        ),
    };

    let mut rest = &definition[2..];

    let mut params = None;
    if rest.first() == Some(&Token::LParen) {
        let mut depth = 0usize;
        let mut end = 0;
        for (index, token) in rest.iter().enumerate() {
            match token {
                Token::LParen => depth += 1,
                Token::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        end = index;
                        break;
                    }
                }
                _ => {}
            }
        }
        params = Some(render_compact(&rest[1..end]));
        rest = &rest[end + 1..];
    }

    let mut unsigned = false;
    while let Some(Token::Word(word)) = rest.first() {
        if word.eq_ignore_ascii_case("UNSIGNED") {
            unsigned = true;
        } else if !word.eq_ignore_ascii_case("ZEROFILL") {
            break;
        }
        rest = &rest[1..];
    }

    Ok(ColumnDefinition {
        name,
        data_type,
        params,
        unsigned,
        modifiers: render_spaced(rest),
    })
}

/// Collects the column names of a `PRIMARY KEY (...)` clause, dropping index prefix lengths
/// such as `(10)` in `` `Name`(10) ``.
fn parse_key_columns(definition: &[Token]) -> Vec<String> {
    let Some(start) = definition.iter().position(|token| *token == Token::LParen) else {
        return Vec::new();
    };

    let mut columns = Vec::new();
    let mut depth = 0usize;
    for token in &definition[start..] {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            Token::QuotedIdent(name) | Token::Word(name) if depth == 1 => {
                columns.push(name.clone())
            }
            _ => {}
        }
    }

    columns
}

fn render_token(token: &Token) -> String {
    match token {
        Token::QuotedIdent(ident) => format!("`{}`", ident.replace('`', "``")),
        Token::Word(word) | Token::Number(word) => word.clone(),
        Token::Str(literal) => format!("'{}'", literal.replace('\'', "''")),
        Token::LParen => "(".to_string(),
        Token::RParen => ")".to_string(),
        Token::Comma => ",".to_string(),
        Token::Symbol(symbol) => symbol.to_string(),
    }
}

fn render_compact(tokens: &[Token]) -> String {
    tokens.iter().map(render_token).collect()
}

fn render_spaced(tokens: &[Token]) -> String {
    tokens
        .iter()
        .map(render_token)
        .collect::<Vec<_>>()
        .join(" ")
}

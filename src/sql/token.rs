//! SQL Tokens - the atomic units of SQL output.
//!
//! Tokens are dialect-agnostic representations that serialize
//! to dialect-specific strings. Parameters travel through the stream as
//! tokens and are numbered only when the whole stream is rendered, so the
//! placeholder order always matches the textual order.

use super::dialect::{Dialect, SqlDialect};
use super::statement::{Parameter, Statement};
use crate::value::Value;

/// SQL Token - every element the compiler emits.
///
/// Adding a new variant here will cause compile errors everywhere
/// it needs to be handled (exhaustive matching).
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // === Keywords ===
    Select,
    From,
    Where,
    And,
    Or,
    As,
    On,
    Join,
    Inner,
    Left,
    GroupBy,
    Having,
    OrderBy,
    Asc,
    Desc,
    Limit,
    Offset,
    Fetch,
    Next,
    Rows,
    Only,
    Top,
    Case,
    When,
    Then,
    Else,
    End,
    In,
    Not,
    Like,
    NotLike,
    IsNull,
    IsNotNull,
    Distinct,
    With,
    Null,
    ForJsonPath,
    WithoutArrayWrapper,
    IncludeNullValues,

    // === Punctuation ===
    Comma,
    Dot,
    Star,
    LParen,
    RParen,

    // === Operators ===
    Eq,
    Ne,
    Lt,
    Gt,
    Lte,
    Gte,

    // === Whitespace / Formatting ===
    Space,
    Newline,
    Indent(usize),

    // === Dynamic Content ===
    /// Simple identifier (table, column, alias)
    Ident(String),
    /// Qualified identifier: schema.table or just table
    QualifiedIdent {
        schema: Option<String>,
        name: String,
    },
    /// Integer literal
    LitInt(i64),
    /// String literal
    LitString(String),
    /// Bound parameter; rendered as a dialect placeholder.
    Param {
        value: Value,
        sql_type: Option<String>,
    },

    // === Function Names ===
    /// Function name, remapped per dialect where the names differ.
    FunctionName(String),
}

impl Token {
    /// Serialize this token to a string for the given dialect.
    ///
    /// A lone `Param` serializes as the first placeholder; use
    /// [`TokenStream::render`] to number parameters.
    pub fn serialize(&self, dialect: Dialect) -> String {
        match self {
            // Keywords
            Token::Select => "SELECT".into(),
            Token::From => "FROM".into(),
            Token::Where => "WHERE".into(),
            Token::And => "AND".into(),
            Token::Or => "OR".into(),
            Token::As => "AS".into(),
            Token::On => "ON".into(),
            Token::Join => "JOIN".into(),
            Token::Inner => "INNER".into(),
            Token::Left => "LEFT".into(),
            Token::GroupBy => "GROUP BY".into(),
            Token::Having => "HAVING".into(),
            Token::OrderBy => "ORDER BY".into(),
            Token::Asc => "ASC".into(),
            Token::Desc => "DESC".into(),
            Token::Limit => "LIMIT".into(),
            Token::Offset => "OFFSET".into(),
            Token::Fetch => "FETCH".into(),
            Token::Next => "NEXT".into(),
            Token::Rows => "ROWS".into(),
            Token::Only => "ONLY".into(),
            Token::Top => "TOP".into(),
            Token::Case => "CASE".into(),
            Token::When => "WHEN".into(),
            Token::Then => "THEN".into(),
            Token::Else => "ELSE".into(),
            Token::End => "END".into(),
            Token::In => "IN".into(),
            Token::Not => "NOT".into(),
            Token::Like => "LIKE".into(),
            Token::NotLike => "NOT LIKE".into(),
            Token::IsNull => "IS NULL".into(),
            Token::IsNotNull => "IS NOT NULL".into(),
            Token::Distinct => "DISTINCT".into(),
            Token::With => "WITH".into(),
            Token::Null => "NULL".into(),
            Token::ForJsonPath => "FOR JSON PATH".into(),
            Token::WithoutArrayWrapper => "WITHOUT_ARRAY_WRAPPER".into(),
            Token::IncludeNullValues => "INCLUDE_NULL_VALUES".into(),

            // Punctuation
            Token::Comma => ",".into(),
            Token::Dot => ".".into(),
            Token::Star => "*".into(),
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),

            // Operators
            Token::Eq => "=".into(),
            Token::Ne => "<>".into(),
            Token::Lt => "<".into(),
            Token::Gt => ">".into(),
            Token::Lte => "<=".into(),
            Token::Gte => ">=".into(),

            // Whitespace
            Token::Space => " ".into(),
            Token::Newline => "\n".into(),
            Token::Indent(n) => "  ".repeat(*n),

            // Dynamic - dialect-specific formatting
            Token::Ident(name) => dialect.quote_identifier(name),
            Token::QualifiedIdent { schema, name } => match schema {
                Some(s) => format!(
                    "{}.{}",
                    dialect.quote_identifier(s),
                    dialect.quote_identifier(name)
                ),
                None => dialect.quote_identifier(name),
            },
            Token::LitInt(n) => n.to_string(),
            Token::LitString(s) => dialect.quote_string(s),
            Token::Param { .. } => dialect.placeholder(0),

            // Function names with dialect-specific remapping
            Token::FunctionName(name) => match dialect.remap_function(name) {
                Some(remapped) => remapped.to_uppercase(),
                None => name.to_uppercase(),
            },
        }
    }
}

/// A stream of tokens that can be serialized to SQL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenStream {
    tokens: Vec<Token>,
}

impl TokenStream {
    /// Create an empty token stream.
    pub fn new() -> Self {
        Self { tokens: vec![] }
    }

    /// Push a single token.
    pub fn push(&mut self, token: Token) -> &mut Self {
        self.tokens.push(token);
        self
    }

    /// Extend with multiple tokens.
    pub fn extend(&mut self, tokens: impl IntoIterator<Item = Token>) -> &mut Self {
        self.tokens.extend(tokens);
        self
    }

    /// Append another token stream.
    pub fn append(&mut self, other: &TokenStream) -> &mut Self {
        self.tokens.extend(other.tokens.iter().cloned());
        self
    }

    /// Render the stream into SQL text plus its ordered parameter list.
    pub fn render(&self, dialect: Dialect) -> Statement {
        let mut sql = String::new();
        let mut params: Vec<Parameter> = Vec::new();

        for token in &self.tokens {
            match token {
                Token::Param { value, sql_type } => {
                    let index = params.len();
                    sql.push_str(&dialect.placeholder(index));
                    params.push(Parameter {
                        name: format!("p{}", index),
                        value: value.clone(),
                        sql_type: sql_type.clone(),
                    });
                }
                other => sql.push_str(&other.serialize(dialect)),
            }
        }

        Statement { sql, params }
    }

    /// Serialize all tokens to a SQL string, discarding parameter values.
    pub fn serialize(&self, dialect: Dialect) -> String {
        self.render(dialect).sql
    }

    /// Number of parameter tokens in the stream.
    pub fn param_count(&self) -> usize {
        self.tokens
            .iter()
            .filter(|t| matches!(t, Token::Param { .. }))
            .count()
    }

    // Convenience methods for common tokens
    pub fn space(&mut self) -> &mut Self {
        self.push(Token::Space)
    }
    pub fn newline(&mut self) -> &mut Self {
        self.push(Token::Newline)
    }
    pub fn indent(&mut self, n: usize) -> &mut Self {
        self.push(Token::Indent(n))
    }
    pub fn comma(&mut self) -> &mut Self {
        self.push(Token::Comma)
    }
    pub fn lparen(&mut self) -> &mut Self {
        self.push(Token::LParen)
    }
    pub fn rparen(&mut self) -> &mut Self {
        self.push(Token::RParen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_serialize() {
        assert_eq!(Token::Select.serialize(Dialect::PostgreSql), "SELECT");
        assert_eq!(Token::GroupBy.serialize(Dialect::SqlServer), "GROUP BY");
        assert_eq!(Token::NotLike.serialize(Dialect::MySql), "NOT LIKE");
    }

    #[test]
    fn test_ident_serialize() {
        let tok = Token::Ident("orders".into());
        assert_eq!(tok.serialize(Dialect::PostgreSql), "\"orders\"");
        assert_eq!(tok.serialize(Dialect::SqlServer), "[orders]");
        assert_eq!(tok.serialize(Dialect::MySql), "`orders`");
    }

    #[test]
    fn test_qualified_ident() {
        let tok = Token::QualifiedIdent {
            schema: Some("sales".into()),
            name: "orders".into(),
        };
        assert_eq!(tok.serialize(Dialect::SqlServer), "[sales].[orders]");
    }

    #[test]
    fn test_render_numbers_params_in_order() {
        let mut ts = TokenStream::new();
        ts.push(Token::Ident("qty".into()))
            .space()
            .push(Token::Gt)
            .space()
            .push(Token::Param {
                value: Value::Int(10),
                sql_type: Some("int".into()),
            })
            .space()
            .push(Token::And)
            .space()
            .push(Token::Ident("sku".into()))
            .space()
            .push(Token::Eq)
            .space()
            .push(Token::Param {
                value: Value::Text("A-1".into()),
                sql_type: None,
            });

        let pg = ts.render(Dialect::PostgreSql);
        assert_eq!(pg.sql, "\"qty\" > $1 AND \"sku\" = $2");
        assert_eq!(pg.params.len(), 2);
        assert_eq!(pg.params[0].name, "p0");
        assert_eq!(pg.params[0].value, Value::Int(10));
        assert_eq!(pg.params[0].sql_type.as_deref(), Some("int"));
        assert_eq!(pg.params[1].value, Value::Text("A-1".into()));

        let ms = ts.render(Dialect::SqlServer);
        assert_eq!(ms.sql, "[qty] > @p0 AND [sku] = @p1");

        let my = ts.render(Dialect::MySql);
        assert_eq!(my.sql, "`qty` > ? AND `sku` = ?");
        assert_eq!(ts.param_count(), 2);
    }

    #[test]
    fn test_function_remap() {
        assert_eq!(
            Token::FunctionName("length".into()).serialize(Dialect::SqlServer),
            "LEN"
        );
        assert_eq!(
            Token::FunctionName("length".into()).serialize(Dialect::PostgreSql),
            "LENGTH"
        );
    }
}

use std::fmt::{self, Write};

mod scanner;

use scanner::{
    State, closes_dollar_quote, is_block_comment_end, is_block_comment_start,
    is_line_comment_start, is_marker_start, is_property_path, scan_marker, try_start_dollar_quote,
};

use crate::error::SqlBatcherError;
use crate::mapping::{BoundStatement, ParamObject, StatementId};
use crate::types::DatabaseType;

/// Positional placeholder style written in place of `#{property}` markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// PostgreSQL-style placeholders like `$1`.
    Postgres,
    /// SQLite-style placeholders like `?1`.
    Sqlite,
}

impl From<DatabaseType> for PlaceholderStyle {
    fn from(db_type: DatabaseType) -> Self {
        match db_type {
            DatabaseType::Postgres => PlaceholderStyle::Postgres,
            DatabaseType::Sqlite => PlaceholderStyle::Sqlite,
        }
    }
}

/// SQL template after marker substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedSql {
    pub sql: String,
    /// Property paths in placeholder order; a property used twice appears twice.
    pub properties: Vec<String>,
}

/// Produces a [`BoundStatement`] for a statement template and a parameter object.
///
/// Implementations must be deterministic: identical inputs must render identical SQL text, since
/// text equality decides whether an update may join the open batch.
pub trait SqlRenderer: Send + Sync + fmt::Debug {
    /// Render `sql` against `parameter`.
    ///
    /// # Errors
    /// Returns `SqlBatcherError::ParameterError` when the template is malformed or references a
    /// property the parameter object does not have.
    fn render(
        &self,
        statement_id: &StatementId,
        sql: &str,
        parameter: &ParamObject,
    ) -> Result<BoundStatement, SqlBatcherError>;
}

/// Default renderer: `#{property}` markers become positional placeholders.
#[derive(Debug, Clone, Copy)]
pub struct PlaceholderRenderer {
    style: PlaceholderStyle,
}

impl PlaceholderRenderer {
    #[must_use]
    pub fn new(style: PlaceholderStyle) -> Self {
        Self { style }
    }

    #[must_use]
    pub fn style(&self) -> PlaceholderStyle {
        self.style
    }
}

impl SqlRenderer for PlaceholderRenderer {
    fn render(
        &self,
        statement_id: &StatementId,
        sql: &str,
        parameter: &ParamObject,
    ) -> Result<BoundStatement, SqlBatcherError> {
        let rendered = render_markers(sql, self.style)?;
        let bind_values = rendered
            .properties
            .iter()
            .map(|property| {
                parameter.get(property).ok_or_else(|| {
                    SqlBatcherError::ParameterError(format!(
                        "{statement_id}: parameter object has no property '{property}'"
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(BoundStatement::new(
            rendered.sql,
            statement_id.clone(),
            bind_values,
            parameter.clone(),
        ))
    }
}

/// Replace `#{property}` markers with positional placeholders.
///
/// Markers inside quoted strings, dollar-quoted blocks, and comments are left alone. The scanner
/// is a lightweight state machine, not a SQL parser.
///
/// # Errors
/// Returns `SqlBatcherError::ParameterError` for unterminated or empty markers.
pub fn render_markers(sql: &str, style: PlaceholderStyle) -> Result<RenderedSql, SqlBatcherError> {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut properties = Vec::new();
    let mut state = State::Normal;
    let mut copied_to = 0;
    let mut idx = 0;

    while idx < bytes.len() {
        let b = bytes[idx];
        match state {
            State::Normal => match b {
                b'\'' => state = State::SingleQuoted,
                b'"' => state = State::DoubleQuoted,
                _ if is_line_comment_start(bytes, idx) => state = State::LineComment,
                _ if is_block_comment_start(bytes, idx) => {
                    state = State::BlockComment(1);
                    idx += 1;
                }
                b'$' => {
                    if let Some((tag, close)) = try_start_dollar_quote(bytes, idx) {
                        state = State::DollarQuoted(tag);
                        idx = close;
                    }
                }
                _ if is_marker_start(bytes, idx) => {
                    let (property, close) = scan_marker(sql, idx + 2).ok_or_else(|| {
                        SqlBatcherError::ParameterError(format!(
                            "unterminated parameter marker at byte {idx}"
                        ))
                    })?;
                    if !is_property_path(property) {
                        return Err(SqlBatcherError::ParameterError(format!(
                            "invalid parameter marker '#{{{property}}}' at byte {idx}"
                        )));
                    }
                    out.push_str(&sql[copied_to..idx]);
                    properties.push(property.to_owned());
                    let position = properties.len();
                    // Writing into a String cannot fail.
                    let _ = match style {
                        PlaceholderStyle::Postgres => write!(out, "${position}"),
                        PlaceholderStyle::Sqlite => write!(out, "?{position}"),
                    };
                    idx = close;
                    copied_to = close + 1;
                }
                _ => {}
            },
            State::SingleQuoted => {
                if b == b'\'' {
                    if bytes.get(idx + 1) == Some(&b'\'') {
                        idx += 1;
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::DoubleQuoted => {
                if b == b'"' {
                    if bytes.get(idx + 1) == Some(&b'"') {
                        idx += 1;
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::LineComment => {
                if b == b'\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment(depth) => {
                if is_block_comment_start(bytes, idx) {
                    state = State::BlockComment(depth + 1);
                    idx += 1;
                } else if is_block_comment_end(bytes, idx) {
                    state = if depth == 1 {
                        State::Normal
                    } else {
                        State::BlockComment(depth - 1)
                    };
                    idx += 1;
                }
            }
            State::DollarQuoted(ref tag) => {
                if closes_dollar_quote(bytes, idx, tag) {
                    idx += tag.len() + 1;
                    state = State::Normal;
                }
            }
        }
        idx += 1;
    }

    out.push_str(&sql[copied_to..]);
    Ok(RenderedSql {
        sql: out,
        properties,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RowValues;

    #[test]
    fn renders_sqlite_and_postgres_placeholders() {
        let sql = "insert into users (id, name) values (#{id}, #{name})";
        let sqlite = render_markers(sql, PlaceholderStyle::Sqlite).unwrap();
        assert_eq!(sqlite.sql, "insert into users (id, name) values (?1, ?2)");
        assert_eq!(sqlite.properties, vec!["id", "name"]);

        let pg = render_markers(sql, PlaceholderStyle::Postgres).unwrap();
        assert_eq!(pg.sql, "insert into users (id, name) values ($1, $2)");
    }

    #[test]
    fn repeated_property_gets_two_positions() {
        let rendered = render_markers(
            "select * from t where a = #{v} or b = #{v}",
            PlaceholderStyle::Postgres,
        )
        .unwrap();
        assert_eq!(rendered.sql, "select * from t where a = $1 or b = $2");
        assert_eq!(rendered.properties, vec!["v", "v"]);
    }

    #[test]
    fn skips_literals_comments_and_dollar_blocks() {
        let sql = "select '#{a}', \"#{b}\" -- #{c}\n/* #{d} /* nested */ */ $q$ #{e} $q$ from t where x = #{x}";
        let rendered = render_markers(sql, PlaceholderStyle::Sqlite).unwrap();
        assert_eq!(rendered.properties, vec!["x"]);
        assert!(rendered.sql.ends_with("where x = ?1"));
        assert!(rendered.sql.contains("'#{a}'"));
        assert!(rendered.sql.contains("$q$ #{e} $q$"));
    }

    #[test]
    fn ignores_marker_options_and_keeps_utf8() {
        let rendered = render_markers(
            "update t set label = 'café' where id = #{id,jdbcType=BIGINT}",
            PlaceholderStyle::Sqlite,
        )
        .unwrap();
        assert_eq!(rendered.sql, "update t set label = 'café' where id = ?1");
    }

    #[test]
    fn malformed_markers_are_parameter_errors() {
        assert!(matches!(
            render_markers("select #{id", PlaceholderStyle::Sqlite),
            Err(SqlBatcherError::ParameterError(_))
        ));
        assert!(matches!(
            render_markers("select #{}", PlaceholderStyle::Sqlite),
            Err(SqlBatcherError::ParameterError(_))
        ));
    }

    #[test]
    fn renderer_reads_values_in_marker_order() {
        let id = StatementId::parse("users.insert").unwrap();
        let param = ParamObject::new().with("name", "ann").with("id", 3_i64);
        let bound = PlaceholderRenderer::new(PlaceholderStyle::Sqlite)
            .render(&id, "insert into u values (#{id}, #{name})", &param)
            .unwrap();
        assert_eq!(
            bound.bind_values(),
            &[RowValues::Int(3), RowValues::Text("ann".into())]
        );
        assert!(bound.parameter().same_object(&param));
    }

    #[test]
    fn renderer_reports_missing_property() {
        let id = StatementId::parse("users.insert").unwrap();
        let err = PlaceholderRenderer::new(PlaceholderStyle::Sqlite)
            .render(&id, "insert into u values (#{id})", &ParamObject::new())
            .unwrap_err();
        assert!(err.to_string().contains("'id'"));
    }
}

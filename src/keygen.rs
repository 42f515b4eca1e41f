use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{KeyReconciliationFailure, SqlBatcherError};
use crate::mapping::{MappedStatement, ParamObject, StatementId};
use crate::rendering::SqlRenderer;
use crate::results::DbRow;
use crate::store::{KeyCapture, StoreConnection};

/// How store-generated identifiers reach the caller's parameter objects.
///
/// Fixed per statement at configuration time. JSON form:
/// ```json
/// {"kind": "none"}
/// {"kind": "read_after_execute", "properties": ["id"], "columns": ["id"]}
/// {"kind": "pre_fetch", "sql": "select nextval('user_ids')", "property": "id"}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KeyGenerator {
    #[default]
    #[serde(rename = "none")]
    NoOp,
    /// Read the generated key row of every execution and copy it into the parameter object of the
    /// same execution position. Without `columns` the row's values are taken positionally.
    ReadAfterExecute {
        properties: Vec<String>,
        #[serde(default)]
        columns: Vec<String>,
    },
    /// Run `sql` before a single execution and store its first value in `property`.
    ///
    /// Cannot be batched: the executor flushes pending groups and runs these statements one at a
    /// time.
    #[serde(rename = "pre_fetch")]
    PreFetchBeforeExecute { sql: String, property: String },
}

impl KeyGenerator {
    #[must_use]
    pub fn key_capture(&self) -> KeyCapture {
        match self {
            KeyGenerator::ReadAfterExecute { .. } => KeyCapture::Collect,
            _ => KeyCapture::Skip,
        }
    }

    #[must_use]
    pub fn supports_batching(&self) -> bool {
        !matches!(self, KeyGenerator::PreFetchBeforeExecute { .. })
    }

    /// Check the definition is usable.
    ///
    /// # Errors
    /// Returns a description of the problem.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            KeyGenerator::NoOp => Ok(()),
            KeyGenerator::ReadAfterExecute {
                properties,
                columns,
            } => {
                if properties.is_empty() {
                    Err("read_after_execute needs at least one property".into())
                } else if !columns.is_empty() && columns.len() != properties.len() {
                    Err(format!(
                        "read_after_execute maps {} properties onto {} columns",
                        properties.len(),
                        columns.len()
                    ))
                } else {
                    Ok(())
                }
            }
            KeyGenerator::PreFetchBeforeExecute { sql, property } => {
                if sql.trim().is_empty() || property.is_empty() {
                    Err("pre_fetch needs both sql and property".into())
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Fetch the key ahead of a single execution.
    ///
    /// # Errors
    /// Store and rendering errors propagate; a key query without rows is a
    /// `KeyReconciliation` error.
    pub async fn process_before(
        &self,
        renderer: &dyn SqlRenderer,
        statement: &MappedStatement,
        connection: &mut dyn StoreConnection,
        timeout: Option<Duration>,
        parameter: &ParamObject,
    ) -> Result<(), SqlBatcherError> {
        let KeyGenerator::PreFetchBeforeExecute { sql, property } = self else {
            return Ok(());
        };
        let bound = renderer.render(statement.id(), sql, parameter)?;
        let mut handle = connection.prepare(bound.sql(), timeout).await?;
        let fetched = async {
            handle.set_parameters(bound.bind_values())?;
            handle.execute_query().await
        }
        .await;
        let closed = handle.close().await;
        let rows = fetched?;
        closed?;

        let value = rows
            .first()
            .and_then(|row| row.get_by_index(0))
            .cloned()
            .ok_or_else(|| {
                KeyReconciliationFailure::new(statement.id().clone(), "key query returned no rows")
            })?;
        debug!(statement = %statement.id(), property = %property, "pre-fetched key");
        parameter.set(property, value);
        Ok(())
    }

    /// Copy the generated key of a single execution into `parameter`.
    ///
    /// # Errors
    /// Fails when keys were expected but none (or too few) came back.
    pub fn process_after(
        &self,
        statement_id: &StatementId,
        parameter: &ParamObject,
        generated: Option<&DbRow>,
    ) -> Result<(), KeyReconciliationFailure> {
        let KeyGenerator::ReadAfterExecute {
            properties,
            columns,
        } = self
        else {
            return Ok(());
        };
        let row = generated.ok_or_else(|| {
            KeyReconciliationFailure::new(statement_id.clone(), "no generated key was returned")
        })?;
        write_keys(statement_id, properties, columns, row, parameter)
    }

    /// Copy generated keys of a batch into its parameter objects by execution order.
    ///
    /// # Errors
    /// Fails on the first execution position without a usable key row. Keys written before that
    /// position stay written.
    pub fn process_batch(
        &self,
        statement_id: &StatementId,
        parameters: &[ParamObject],
        generated: &[Option<DbRow>],
    ) -> Result<(), KeyReconciliationFailure> {
        let KeyGenerator::ReadAfterExecute {
            properties,
            columns,
        } = self
        else {
            return Ok(());
        };
        for (position, parameter) in parameters.iter().enumerate() {
            let row = generated.get(position).and_then(Option::as_ref).ok_or_else(|| {
                KeyReconciliationFailure::new(
                    statement_id.clone(),
                    format!("no generated key for execution #{}", position + 1),
                )
            })?;
            write_keys(statement_id, properties, columns, row, parameter)?;
        }
        Ok(())
    }
}

fn write_keys(
    statement_id: &StatementId,
    properties: &[String],
    columns: &[String],
    row: &DbRow,
    parameter: &ParamObject,
) -> Result<(), KeyReconciliationFailure> {
    let mut values = Vec::with_capacity(properties.len());
    for (position, property) in properties.iter().enumerate() {
        let value = match columns.get(position) {
            Some(column) => row.get(column).ok_or_else(|| {
                KeyReconciliationFailure::new(
                    statement_id.clone(),
                    format!("generated key row has no column '{column}'"),
                )
            })?,
            None => row.get_by_index(position).ok_or_else(|| {
                KeyReconciliationFailure::new(
                    statement_id.clone(),
                    format!(
                        "generated key row has {} value(s) but {} properties expect keys",
                        row.len(),
                        properties.len()
                    ),
                )
            })?,
        };
        values.push((property, value.clone()));
    }
    for (property, value) in values {
        parameter.set(property, value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RowValues;

    fn id() -> StatementId {
        StatementId::parse("users.insert").unwrap()
    }

    fn after(properties: &[&str], columns: &[&str]) -> KeyGenerator {
        KeyGenerator::ReadAfterExecute {
            properties: properties.iter().map(|s| (*s).to_string()).collect(),
            columns: columns.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    #[test]
    fn batch_keys_follow_execution_order() {
        let keygen = after(&["id"], &[]);
        let params = vec![ParamObject::new(), ParamObject::new(), ParamObject::new()];
        let rows = (10..13)
            .map(|k| Some(DbRow::single("rowid", RowValues::Int(k))))
            .collect::<Vec<_>>();
        keygen.process_batch(&id(), &params, &rows).unwrap();
        let ids = params
            .iter()
            .map(|p| p.get("id").unwrap())
            .collect::<Vec<_>>();
        assert_eq!(
            ids,
            vec![RowValues::Int(10), RowValues::Int(11), RowValues::Int(12)]
        );
    }

    #[test]
    fn missing_key_row_names_position() {
        let keygen = after(&["id"], &[]);
        let params = vec![ParamObject::new(), ParamObject::new()];
        let rows = vec![Some(DbRow::single("rowid", RowValues::Int(1))), None];
        let err = keygen.process_batch(&id(), &params, &rows).unwrap_err();
        assert!(err.reason().contains("#2"));
        assert_eq!(params[0].get("id"), Some(RowValues::Int(1)));
        assert!(!params[1].contains("id"));
    }

    #[test]
    fn named_columns_are_matched_by_name() {
        let keygen = after(&["user_id"], &["id"]);
        let param = ParamObject::new();
        let row = DbRow::single("id", RowValues::Int(5));
        keygen.process_after(&id(), &param, Some(&row)).unwrap();
        assert_eq!(param.get("user_id"), Some(RowValues::Int(5)));

        let wrong = DbRow::single("other", RowValues::Int(5));
        assert!(keygen.process_after(&id(), &param, Some(&wrong)).is_err());
    }

    #[test]
    fn noop_ignores_missing_keys() {
        let param = ParamObject::new();
        KeyGenerator::NoOp.process_after(&id(), &param, None).unwrap();
        assert!(param.is_empty());
        assert_eq!(KeyGenerator::NoOp.key_capture(), KeyCapture::Skip);
    }

    #[test]
    fn parses_json_definitions() {
        let none: KeyGenerator = serde_json::from_str(r#"{"kind":"none"}"#).unwrap();
        assert_eq!(none, KeyGenerator::NoOp);
        let read: KeyGenerator =
            serde_json::from_str(r#"{"kind":"read_after_execute","properties":["id"]}"#).unwrap();
        assert_eq!(read, after(&["id"], &[]));
        let pre: KeyGenerator =
            serde_json::from_str(r#"{"kind":"pre_fetch","sql":"select 1","property":"id"}"#)
                .unwrap();
        assert!(!pre.supports_batching());
        assert!(after(&["a", "b"], &["x"]).validate().is_err());
    }
}

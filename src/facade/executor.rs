//! Atomic execution of append batches

use crate::common::{complete_tx, Database, Query, Result, Statement, Transaction, Value};
use crate::facade::commands::{parse_batch, Op};

/// Parse and execute one batch document, returning the rendered result.
pub async fn append(db: &dyn Database, document: &str) -> Result<String> {
    let ops = parse_batch(document)?;
    execute_batch(db, &ops).await
}

/// Run `ops` in a single transaction. Any failure rolls back the whole
/// batch.
pub async fn execute_batch(db: &dyn Database, ops: &[Op]) -> Result<String> {
    let mut tx = db.begin().await?;
    let result = run_ops(tx.as_mut(), ops).await;
    complete_tx(tx, result).await
}

async fn run_ops(tx: &mut dyn Transaction, ops: &[Op]) -> Result<String> {
    let mut rendered = Vec::with_capacity(ops.len());

    for op in ops {
        match op {
            Op::Read { key } => {
                let entries = tx.query(&Query::ByKey(Value::from(key.as_str()))).await?;
                let values: Vec<String> = entries.iter().map(|e| e.value.to_string()).collect();
                rendered.push(format!("[:r {} [{}]]", key, values.join(" ")));
            }
            Op::Append { key, value } => {
                tx.exec(&Statement::Insert {
                    key: Value::from(key.as_str()),
                    value: Value::from(value.as_str()),
                })
                .await?;
                rendered.push(format!("[:append {} {}]", key, value));
            }
        }
    }

    tracing::debug!(ops = ops.len(), "batch executed");
    Ok(format!("[{}]", rendered.join(" ")))
}

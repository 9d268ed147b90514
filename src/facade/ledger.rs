//! Bank and set workloads
//!
//! Accounts live in `map` as one row per account id. Initialization is
//! first-writer-wins across the cluster; transfers move an amount between
//! two accounts in one transaction, without existence or funds checks.

use crate::common::{
    complete_tx, Database, Entry, Error, Query, Result, Statement, Transaction, Value,
};
use crate::facade::edn::{self, Form};

/// `{:accounts [id ...], :total-amount N}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitRequest {
    pub accounts: Vec<i64>,
    pub total_amount: i64,
}

impl InitRequest {
    pub fn parse(body: &str) -> Result<Self> {
        let form = edn::read(body)?;
        let accounts = form
            .require("accounts")?
            .as_seq()?
            .iter()
            .map(Form::as_int)
            .collect::<Result<Vec<_>>>()?;
        if accounts.is_empty() {
            return Err(Error::MalformedRequest("no accounts given".into()));
        }
        let total_amount = form.require("total-amount")?.as_int()?;
        Ok(Self {
            accounts,
            total_amount,
        })
    }

    /// Even split of the total, rounded down.
    pub fn balance(&self) -> i64 {
        self.total_amount.div_euclid(self.accounts.len() as i64)
    }
}

/// `{:from id, :to id, :amount N}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRequest {
    pub from: i64,
    pub to: i64,
    pub amount: i64,
}

impl TransferRequest {
    pub fn parse(body: &str) -> Result<Self> {
        let form = edn::read(body)?;
        Ok(Self {
            from: form.require("from")?.as_int()?,
            to: form.require("to")?.as_int()?,
            amount: form.require("amount")?.as_int()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// Accounts were created by this call
    Created(usize),
    /// Some rows already existed; nothing was written
    AlreadyInitialized,
    /// The engine reported a lock conflict; the call may or may not have
    /// raced with a successful initialization elsewhere
    Contended,
}

/// Create the accounts unless any row exists yet.
///
/// A lock conflict is not an error here: it is reported as
/// [`InitOutcome::Contended`] and the caller decides whether to mask it.
pub async fn initialize_accounts(db: &dyn Database, req: &InitRequest) -> Result<InitOutcome> {
    let mut tx = db.begin().await?;
    let result = insert_accounts(tx.as_mut(), req).await;
    match complete_tx(tx, result).await {
        Err(Error::Contention) => {
            tracing::warn!(
                accounts = req.accounts.len(),
                retryable = true,
                "account initialization hit a locked database"
            );
            Ok(InitOutcome::Contended)
        }
        other => other,
    }
}

async fn insert_accounts(tx: &mut dyn Transaction, req: &InitRequest) -> Result<InitOutcome> {
    if !tx.query(&Query::All).await?.is_empty() {
        return Ok(InitOutcome::AlreadyInitialized);
    }
    let balance = req.balance();
    for id in &req.accounts {
        tx.exec(&Statement::Insert {
            key: Value::from(*id),
            value: Value::from(balance),
        })
        .await?;
    }
    tracing::info!(accounts = req.accounts.len(), balance, "accounts initialized");
    Ok(InitOutcome::Created(req.accounts.len()))
}

/// Move `amount` from one account to another. Balances may go negative.
pub async fn transfer(db: &dyn Database, req: &TransferRequest) -> Result<()> {
    let mut tx = db.begin().await?;
    let result = apply_transfer(tx.as_mut(), req).await;
    complete_tx(tx, result).await
}

async fn apply_transfer(tx: &mut dyn Transaction, req: &TransferRequest) -> Result<()> {
    tx.exec(&Statement::Debit {
        key: Value::from(req.from),
        amount: Value::from(req.amount),
    })
    .await?;
    tx.exec(&Statement::Credit {
        key: Value::from(req.to),
        amount: Value::from(req.amount),
    })
    .await?;
    Ok(())
}

/// All accounts, rendered `{id balance, id balance}`.
pub async fn balances(db: &dyn Database) -> Result<String> {
    let entries = db.query(&Query::All).await?;
    let accounts: Vec<String> = entries
        .iter()
        .map(|e| format!("{} {}", render_key(e), e.value))
        .collect();
    Ok(format!("{{{}}}", accounts.join(", ")))
}

fn render_key(entry: &Entry) -> String {
    entry
        .key
        .map(|k| k.to_string())
        .unwrap_or_else(|| "nil".to_string())
}

/// Add one element to the set and echo it back.
pub async fn set_add(db: &dyn Database, value: &str) -> Result<String> {
    let value = value.trim();
    db.exec(&Statement::Insert {
        key: Value::Null,
        value: Value::from(value),
    })
    .await?;
    Ok(value.to_string())
}

/// Every element of the set, rendered `[v1 v2 ...]`.
pub async fn set_read(db: &dyn Database) -> Result<String> {
    let values: Vec<String> = db
        .query(&Query::All)
        .await?
        .iter()
        .map(|e| e.value.to_string())
        .collect();
    Ok(format!("[{}]", values.join(" ")))
}

//! HTTP client for the node API

use std::time::Duration;

use crate::common::{Error, Result};

/// Prefix of every failed reply.
const ERROR_PREFIX: &str = "Error: ";

#[derive(Debug, Clone)]
pub struct Client {
    base_url: String,
    http: reqwest::Client,
}

impl Client {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<String>,
    ) -> Result<String> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.request(method.clone(), &url);
        if let Some(body) = body {
            request = request.body(body);
        }
        let text = request.send().await?.error_for_status()?.text().await?;
        tracing::debug!(%method, %url, reply = %text, "request done");
        parse_reply(text)
    }

    /// Run an append batch, e.g. `[[:append 1 10][:r 1 nil]]`.
    pub async fn append(&self, batch: &str) -> Result<String> {
        self.send(reqwest::Method::POST, "/append", Some(batch.to_string()))
            .await
    }

    pub async fn balances(&self) -> Result<String> {
        self.send(reqwest::Method::GET, "/bank", None).await
    }

    pub async fn init_accounts(&self, accounts: &[i64], total_amount: i64) -> Result<String> {
        let ids: Vec<String> = accounts.iter().map(|a| a.to_string()).collect();
        let body = format!(
            "{{:accounts [{}], :total-amount {}}}",
            ids.join(" "),
            total_amount
        );
        self.send(reqwest::Method::PUT, "/bank", Some(body)).await
    }

    pub async fn transfer(&self, from: i64, to: i64, amount: i64) -> Result<String> {
        let body = format!("{{:from {}, :to {}, :amount {}}}", from, to, amount);
        self.send(reqwest::Method::POST, "/bank", Some(body)).await
    }

    pub async fn set_read(&self) -> Result<String> {
        self.send(reqwest::Method::GET, "/set", None).await
    }

    pub async fn set_add(&self, value: &str) -> Result<String> {
        self.send(reqwest::Method::POST, "/set", Some(value.to_string()))
            .await
    }

    pub async fn leader(&self) -> Result<String> {
        self.send(reqwest::Method::GET, "/leader", None).await
    }

    pub async fn members(&self) -> Result<String> {
        self.send(reqwest::Method::GET, "/members", None).await
    }

    pub async fn remove(&self, identity: &str) -> Result<String> {
        self.send(reqwest::Method::DELETE, "/members", Some(identity.to_string()))
            .await
    }

    pub async fn ready(&self) -> Result<String> {
        self.send(reqwest::Method::GET, "/ready", None).await
    }
}

/// Turn an `Error: ...` body back into an error.
pub fn parse_reply(text: String) -> Result<String> {
    match text.strip_prefix(ERROR_PREFIX) {
        Some(msg) => Err(Error::Other(msg.to_string())),
        None => Ok(text),
    }
}

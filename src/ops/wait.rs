//! Wait for a cluster to settle

use std::time::Duration;

use crate::common::{Error, Result};
use crate::ops::Client;

/// Poll `/ready` until it answers `nil` or `attempts` polls have failed.
pub async fn wait_ready(client: &Client, attempts: u32, interval: Duration) -> Result<()> {
    let mut last = Error::Other("no attempt made".into());
    for attempt in 1..=attempts {
        match client.ready().await {
            Ok(_) => {
                tracing::info!(attempt, "cluster ready");
                return Ok(());
            }
            Err(e) => {
                tracing::debug!(attempt, error = %e, "cluster not ready yet");
                last = e;
            }
        }
        if attempt < attempts {
            tokio::time::sleep(interval).await;
        }
    }
    Err(Error::Timeout(format!(
        "cluster not ready after {} attempts: {}",
        attempts, last
    )))
}

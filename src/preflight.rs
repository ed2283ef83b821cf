//! HTTP reachability check run before a browser is launched.

use thiserror::Error;
use tokio::time::{Duration, Instant, sleep};

use crate::config::SuiteConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum PreflightError {
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("{url} unreachable after {attempts} attempts: {last_error}")]
    Unreachable {
        url: String,
        attempts: u32,
        last_error: String,
    },
}

/// Poll `{base_url}/web/login` until it answers with a non-server-error
/// status or `budget` runs out. Returns the final HTTP status.
pub async fn check_login_page(config: &SuiteConfig, budget: Duration) -> Result<u16, PreflightError> {
    let url = config.login_url();
    let client = reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(PreflightError::Client)?;

    let start = Instant::now();
    let mut attempts = 0;
    let mut last_error = String::from("no attempt made");

    loop {
        attempts += 1;
        match client.get(&url).send().await {
            Ok(resp) if !resp.status().is_server_error() => {
                log::info!("{url} answered {}", resp.status());
                return Ok(resp.status().as_u16());
            }
            Ok(resp) => {
                log::warn!("{url} returned {}", resp.status());
                last_error = format!("status {}", resp.status());
            }
            Err(err) => {
                if !err.is_connect() {
                    log::warn!("preflight request failed: {err}");
                }
                last_error = err.to_string();
            }
        }

        if start.elapsed() >= budget {
            return Err(PreflightError::Unreachable {
                url,
                attempts,
                last_error,
            });
        }
        sleep(RETRY_DELAY).await;
    }
}

//! HTTP transport with host failover.
//!
//! Hosts are tried in priority order. Each host gets `retries` attempts with a
//! short linear back-off before the next host is tried.

use std::time::Duration;

use async_trait::async_trait;
use cronsentry_core::config::PingConfig;
use tracing::{debug, info, warn};

use crate::{
    error::{PingError, Result},
    types::Ping,
    Pinger,
};

/// At most a primary and one fallback host are used.
const MAX_HOSTS: usize = 2;

pub struct HttpPinger {
    client: reqwest::Client,
    api_key: String,
    hosts: Vec<String>,
    retries: u32,
}

impl HttpPinger {
    pub fn new(api_key: impl Into<String>, hosts: Vec<String>, retries: u32, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("cronsentry/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            api_key: api_key.into(),
            hosts: hosts
                .into_iter()
                .map(|h| h.trim_end_matches('/').to_string())
                .take(MAX_HOSTS)
                .collect(),
            retries: retries.max(1),
        }
    }

    /// `None` when no API key is configured.
    pub fn from_config(config: &PingConfig) -> Option<Self> {
        let api_key = config.api_key.as_deref().filter(|k| !k.is_empty())?;
        Some(Self::new(
            api_key,
            config.hosts.clone(),
            config.retries,
            Duration::from_secs(config.timeout_secs),
        ))
    }

    fn ping_url(&self, host: &str, monitor_key: &str) -> String {
        format!("{host}/p/{}/{monitor_key}", self.api_key)
    }

    fn log_url(&self, host: &str, monitor_key: &str) -> String {
        format!("{host}/logs/{}/{monitor_key}", self.api_key)
    }

    /// Run `build` against each host until one request succeeds.
    async fn deliver<F>(&self, what: &str, build: F) -> Result<()>
    where
        F: Fn(&str) -> reqwest::RequestBuilder,
    {
        let mut attempts = 0;
        let mut last_err: Option<PingError> = None;

        for host in &self.hosts {
            for attempt in 0..self.retries {
                attempts += 1;
                match send_checked(build(host)).await {
                    Ok(()) => {
                        if attempts > 1 {
                            info!(%host, attempt, what, "delivered after retry");
                        }
                        return Ok(());
                    }
                    Err(e) => {
                        warn!(%host, attempt, what, err = %e, "delivery failed");
                        last_err = Some(e);
                        if attempt + 1 < self.retries {
                            tokio::time::sleep(Duration::from_millis(200 * (attempt as u64 + 1)))
                                .await;
                        }
                    }
                }
            }
            debug!(%host, what, "host exhausted, trying next host");
        }

        Err(PingError::Exhausted {
            attempts,
            last: last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no hosts configured".to_string()),
        })
    }
}

async fn send_checked(req: reqwest::RequestBuilder) -> Result<()> {
    let resp = req.send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(PingError::Api {
            status: status.as_u16(),
        });
    }
    Ok(())
}

#[async_trait]
impl Pinger for HttpPinger {
    async fn send(&self, ping: &Ping) -> Result<()> {
        let query = ping.query();
        self.deliver(ping.state.as_str(), |host| {
            self.client
                .get(self.ping_url(host, &ping.monitor_key))
                .query(&query)
        })
        .await
    }

    async fn upload_log(&self, monitor_key: &str, series: &str, log: String) -> Result<()> {
        self.deliver("log", |host| {
            self.client
                .post(self.log_url(host, monitor_key))
                .query(&[("series", series)])
                .header("content-type", "text/plain; charset=utf-8")
                .body(log.clone())
        })
        .await
    }
}

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle event reported for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PingState {
    Run,
    Complete,
    Fail,
}

impl PingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PingState::Run => "run",
            PingState::Complete => "complete",
            PingState::Fail => "fail",
        }
    }
}

impl std::fmt::Display for PingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One status event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ping {
    pub state: PingState,
    pub monitor_key: String,
    /// Correlates the run/complete/fail events of a single execution.
    pub series: String,
    /// Seconds since the Unix epoch, millisecond precision.
    pub stamp: f64,
    pub message: Option<String>,
    /// Run time in seconds.
    pub duration: Option<f64>,
    pub exit_code: Option<i32>,
    /// `(name, value)` pairs such as `("length", 5120)`.
    pub metrics: Vec<(String, u64)>,
    pub host: Option<String>,
}

impl Ping {
    pub fn new(state: PingState, monitor_key: impl Into<String>, series: impl Into<String>) -> Self {
        Self {
            state,
            monitor_key: monitor_key.into(),
            series: series.into(),
            stamp: Utc::now().timestamp_millis() as f64 / 1000.0,
            message: None,
            duration: None,
            exit_code: None,
            metrics: Vec::new(),
            host: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration = Some(secs);
        self
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: u64) -> Self {
        self.metrics.push((name.into(), value));
        self
    }

    pub fn with_host(mut self, host: Option<String>) -> Self {
        self.host = host;
        self
    }

    /// Query parameters in the order the endpoint documents them.
    pub fn query(&self) -> Vec<(&'static str, String)> {
        let mut q = vec![
            ("state", self.state.to_string()),
            ("series", self.series.clone()),
            ("stamp", format!("{:.3}", self.stamp)),
        ];
        if let Some(msg) = &self.message {
            q.push(("msg", msg.clone()));
        }
        if let Some(d) = self.duration {
            q.push(("duration", format!("{d:.3}")));
        }
        if let Some(code) = self.exit_code {
            q.push(("status_code", code.to_string()));
        }
        for (name, value) in &self.metrics {
            q.push(("metric", format!("{name}:{value}")));
        }
        if let Some(host) = &self.host {
            q.push(("host", host.clone()));
        }
        q
    }
}

/// A fresh series identifier.
pub fn new_series() -> String {
    Uuid::new_v4().to_string()
}

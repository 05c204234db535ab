use std::time::Duration;

/// Outcome of one liveness probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthStatus {
    pub healthy: bool,
    pub detail: String,
}

impl HealthStatus {
    pub fn healthy(detail: impl Into<String>) -> Self {
        Self {
            healthy: true,
            detail: detail.into(),
        }
    }

    pub fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            healthy: false,
            detail: detail.into(),
        }
    }
}

pub trait HealthProbe: Send + Sync {
    fn check(&self, target: &str, timeout: Duration) -> HealthStatus;
}

/// One GET against the target; only a 2xx answer counts as healthy.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpHealthProbe;

impl HealthProbe for HttpHealthProbe {
    fn check(&self, target: &str, timeout: Duration) -> HealthStatus {
        let client = match reqwest::blocking::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
        {
            Ok(client) => client,
            Err(err) => return HealthStatus::unhealthy(format!("probe client unavailable: {err}")),
        };

        match client.get(target).send() {
            Ok(response) if response.status().is_success() => {
                HealthStatus::healthy(format!("HTTP {}", response.status().as_u16()))
            }
            Ok(response) => HealthStatus::unhealthy(format!("HTTP {}", response.status().as_u16())),
            Err(err) if err.is_timeout() => {
                HealthStatus::unhealthy(format!("timed out after {}s", timeout.as_secs()))
            }
            Err(err) => HealthStatus::unhealthy(format!("request failed: {err}")),
        }
    }
}

//! HTTP collector client
//!
//! `POST {collector}/reports` with the JSON report, `GET {collector}/health`
//! as the availability probe.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::debug;

use super::sender::{ReportSender, SendError};

/// Sends reports to a remote collector over HTTP.
#[derive(Clone)]
pub struct HttpReportSender {
    http: reqwest::Client,
    collector_url: String,
    device_id: String,
}

impl HttpReportSender {
    pub fn new(
        collector_url: &str,
        device_id: &str,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            collector_url: collector_url.trim_end_matches('/').to_string(),
            device_id: device_id.to_string(),
        })
    }

    pub fn collector_url(&self) -> &str {
        &self.collector_url
    }
}

/// Which failures are worth trying again next cycle
fn classify(status: StatusCode) -> SendError {
    let detail = format!("collector returned {status}");
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        SendError::Recoverable(detail)
    } else {
        SendError::Unresolvable(detail)
    }
}

#[async_trait]
impl<R: Serialize + Sync> ReportSender<R> for HttpReportSender {
    async fn is_receiver_available(&self) -> bool {
        match self
            .http
            .get(format!("{}/health", self.collector_url))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(error = %e, "Collector health probe failed");
                false
            }
        }
    }

    async fn send(&self, report: &R) -> Result<(), SendError> {
        let resp = self
            .http
            .post(format!("{}/reports", self.collector_url))
            .header("X-Device-ID", &self.device_id)
            .json(report)
            .send()
            .await
            .map_err(|e| SendError::Recoverable(e.to_string()))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(classify(resp.status()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_statuses_are_recoverable() {
        for status in [
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::REQUEST_TIMEOUT,
            StatusCode::TOO_MANY_REQUESTS,
        ] {
            assert!(matches!(classify(status), SendError::Recoverable(_)), "{status}");
        }
    }

    #[test]
    fn client_errors_are_unresolvable() {
        for status in [StatusCode::BAD_REQUEST, StatusCode::UNAUTHORIZED, StatusCode::NOT_FOUND] {
            assert!(matches!(classify(status), SendError::Unresolvable(_)), "{status}");
        }
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let sender =
            HttpReportSender::new("http://collector:8080/", "dev", Duration::from_secs(5)).unwrap();
        assert_eq!(sender.collector_url(), "http://collector:8080");
    }

    #[tokio::test]
    async fn unreachable_collector_is_unavailable_and_recoverable() {
        // Port 9 (discard) on localhost is closed in test environments.
        let sender =
            HttpReportSender::new("http://127.0.0.1:9", "dev", Duration::from_millis(500)).unwrap();
        assert!(!ReportSender::<u32>::is_receiver_available(&sender).await);
        assert!(matches!(
            sender.send(&1u32).await,
            Err(SendError::Recoverable(_))
        ));
    }
}

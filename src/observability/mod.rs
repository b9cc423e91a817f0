//! Delivery metrics and timing.
//!
//! Logging goes through `tracing` directly; this module only keeps counters
//! the hosting service can poll.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::errors::DeliveryErrorKind;

/// Delivery counters, shared across sends.
#[derive(Debug, Default)]
pub struct DeliveryMetrics {
    /// Messages accepted by the server.
    pub emails_sent: AtomicU64,
    /// Connect failures.
    pub connect_failures: AtomicU64,
    /// Greeting or STARTTLS failures.
    pub handshake_failures: AtomicU64,
    /// Authentication failures.
    pub auth_failures: AtomicU64,
    /// Refused MAIL/RCPT/DATA.
    pub protocol_failures: AtomicU64,
    /// Everything else.
    pub other_failures: AtomicU64,
    /// Successful TLS upgrades.
    pub tls_upgrades: AtomicU64,
    /// Recipients handed to the server on successful sends.
    pub recipients_delivered: AtomicU64,
}

impl DeliveryMetrics {
    /// Creates a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a successful send.
    pub fn record_send_success(&self, recipients: usize) {
        self.emails_sent.fetch_add(1, Ordering::Relaxed);
        self.recipients_delivered
            .fetch_add(recipients as u64, Ordering::Relaxed);
    }

    /// Records a failed send.
    pub fn record_send_failure(&self, kind: DeliveryErrorKind) {
        let counter = match kind {
            DeliveryErrorKind::Connect => &self.connect_failures,
            DeliveryErrorKind::Handshake => &self.handshake_failures,
            DeliveryErrorKind::Auth => &self.auth_failures,
            DeliveryErrorKind::Protocol => &self.protocol_failures,
            DeliveryErrorKind::Other => &self.other_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a TLS upgrade.
    pub fn record_tls_upgrade(&self) {
        self.tls_upgrades.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            emails_sent: self.emails_sent.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            handshake_failures: self.handshake_failures.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            protocol_failures: self.protocol_failures.load(Ordering::Relaxed),
            other_failures: self.other_failures.load(Ordering::Relaxed),
            tls_upgrades: self.tls_upgrades.load(Ordering::Relaxed),
            recipients_delivered: self.recipients_delivered.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Messages accepted by the server.
    pub emails_sent: u64,
    /// Connect failures.
    pub connect_failures: u64,
    /// Greeting or STARTTLS failures.
    pub handshake_failures: u64,
    /// Authentication failures.
    pub auth_failures: u64,
    /// Refused MAIL/RCPT/DATA.
    pub protocol_failures: u64,
    /// Everything else.
    pub other_failures: u64,
    /// Successful TLS upgrades.
    pub tls_upgrades: u64,
    /// Recipients handed to the server on successful sends.
    pub recipients_delivered: u64,
}

impl MetricsSnapshot {
    /// Returns the total failed sends.
    pub fn emails_failed(&self) -> u64 {
        self.connect_failures
            + self.handshake_failures
            + self.auth_failures
            + self.protocol_failures
            + self.other_failures
    }

    /// Returns the email success rate.
    pub fn success_rate(&self) -> f64 {
        let total = self.emails_sent + self.emails_failed();
        if total == 0 {
            1.0
        } else {
            self.emails_sent as f64 / total as f64
        }
    }
}

/// Timer for measuring operation duration.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    name: &'static str,
}

impl Timer {
    /// Creates and starts a new timer.
    pub fn start(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
        }
    }

    /// Stops the timer and returns the duration.
    pub fn stop(self) -> Duration {
        let elapsed = self.start.elapsed();
        debug!(timer = self.name, duration_ms = elapsed.as_millis() as u64, "Timer stopped");
        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics() {
        let metrics = DeliveryMetrics::new();

        metrics.record_send_success(3);
        metrics.record_send_success(1);
        metrics.record_send_failure(DeliveryErrorKind::Auth);
        metrics.record_tls_upgrade();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.emails_sent, 2);
        assert_eq!(snapshot.recipients_delivered, 4);
        assert_eq!(snapshot.auth_failures, 1);
        assert_eq!(snapshot.emails_failed(), 1);
        assert_eq!(snapshot.tls_upgrades, 1);
        assert!((snapshot.success_rate() - 0.666).abs() < 0.01);
    }

    #[test]
    fn test_failures_counted_per_kind() {
        let metrics = DeliveryMetrics::new();
        for kind in [
            DeliveryErrorKind::Connect,
            DeliveryErrorKind::Handshake,
            DeliveryErrorKind::Protocol,
            DeliveryErrorKind::Other,
            DeliveryErrorKind::Other,
        ] {
            metrics.record_send_failure(kind);
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connect_failures, 1);
        assert_eq!(snapshot.handshake_failures, 1);
        assert_eq!(snapshot.protocol_failures, 1);
        assert_eq!(snapshot.other_failures, 2);
        assert_eq!(snapshot.success_rate(), 0.0);
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = DeliveryMetrics::new().snapshot();
        assert_eq!(snapshot.success_rate(), 1.0);
        assert_eq!(
            serde_json::to_value(&snapshot).unwrap()["emails_sent"],
            serde_json::json!(0)
        );
    }

    #[test]
    fn test_timer() {
        let timer = Timer::start("test");
        std::thread::sleep(Duration::from_millis(10));
        let duration = timer.stop();
        assert!(duration >= Duration::from_millis(10));
    }
}

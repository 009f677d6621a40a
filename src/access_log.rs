//! Access Log Publisher — emits one [`AccessLogEvent`] per inbound request
//! to a Kafka topic via `rdkafka::producer::FutureProducer`, keyed by
//! client IP so a given client's events land on one partition and are
//! observed in order by any consumer.
//!
//! Publishing is fire-and-forget from the proxy pipeline's point of view:
//! [`AccessLogPublisher::publish`] spawns a task that awaits the delivery
//! future and logs a warning on failure, never blocking the request that
//! generated the event.

use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use serde::{Deserialize, Serialize};

/// Immutable record of one proxied (or rejected) request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessLogEvent {
    pub timestamp: DateTime<Utc>,
    pub client_ip: IpAddr,
    pub method: String,
    pub path: String,
    pub target_url: Option<String>,
    pub status_code: u16,
    pub latency_ms: u64,
    pub rate_limited: bool,
}

pub struct AccessLogPublisher {
    producer: FutureProducer,
    topic: String,
}

impl AccessLogPublisher {
    pub fn new(brokers: &str, topic: impl Into<String>) -> anyhow::Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;
        Ok(Self { producer, topic: topic.into() })
    }

    /// Serialize `event` and hand it to the producer, keyed by client IP.
    /// Returns immediately; delivery (or failure) is observed from a
    /// spawned task so the caller never waits on the Kafka round-trip.
    pub fn publish(&self, event: AccessLogEvent) {
        let producer = self.producer.clone();
        let topic = self.topic.clone();

        tokio::spawn(async move {
            let payload = match serde_json::to_vec(&event) {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to serialize access log event, dropping");
                    return;
                }
            };
            let key = event.client_ip.to_string();

            let record = FutureRecord::to(&topic).key(&key).payload(&payload);
            if let Err((err, _msg)) = producer.send(record, Duration::from_secs(0)).await {
                tracing::warn!(error = %err, key = %key, "access log publish failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_with_null_target_url_for_unmatched_requests() {
        let event = AccessLogEvent {
            timestamp: Utc::now(),
            client_ip: "127.0.0.1".parse().unwrap(),
            method: "GET".into(),
            path: "/unknown".into(),
            target_url: None,
            status_code: 404,
            latency_ms: 1,
            rate_limited: false,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert!(json["target_url"].is_null());
        assert_eq!(json["status_code"], 404);
    }

    #[test]
    fn event_round_trips_through_json() {
        let event = AccessLogEvent {
            timestamp: Utc::now(),
            client_ip: "10.0.0.5".parse().unwrap(),
            method: "POST".into(),
            path: "/api/widgets".into(),
            target_url: Some("http://backend".into()),
            status_code: 200,
            latency_ms: 42,
            rate_limited: false,
        };
        let json = serde_json::to_string(&event).unwrap();
        let decoded: AccessLogEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.client_ip, event.client_ip);
        assert_eq!(decoded.latency_ms, 42);
    }
}

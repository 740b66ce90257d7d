//! Bus client wrapping NATS: connect with bounded retry, publish, subscribe
//! (including trailing-wildcard patterns), close.

use std::time::Duration;

use futures::StreamExt;
use rand::Rng;
use tracing::{info, warn};

use crate::envelope::Envelope;
use crate::error::{MarketError, Result};
use crate::topics::{to_bus_pattern, to_bus_subject, from_bus_subject};

#[derive(Debug, Clone)]
pub struct BusConfig {
    pub url: String,
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".to_string(),
            max_attempts: 10,
            base_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(20),
        }
    }
}

impl BusConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("MARKET_BUS_URL") {
            if !v.is_empty() {
                cfg.url = v;
            }
        }
        if let Ok(v) = std::env::var("MARKET_BUS_MAX_ATTEMPTS") {
            if let Ok(n) = v.parse() {
                cfg.max_attempts = n;
            }
        }
        cfg
    }
}

/// A single delivered message: topic in `/`-form plus raw payload bytes.
/// Kept undecoded so callers (the Governor, in particular) can run
/// structural validation before committing to a typed [`Envelope`].
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

pub struct Subscription {
    inner: async_nats::Subscriber,
}

impl Subscription {
    /// Receive the next message on this subscription, in arrival order.
    /// Returns `None` once the subscription has been torn down.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        let msg = self.inner.next().await?;
        Some(BusMessage {
            topic: from_bus_subject(&msg.subject),
            payload: msg.payload.to_vec(),
        })
    }
}

pub struct BusClient {
    client: async_nats::Client,
}

impl BusClient {
    /// Connect with bounded, doubling backoff. Gives up after
    /// `cfg.max_attempts` and surfaces a fatal [`MarketError::Connect`].
    pub async fn connect(cfg: &BusConfig) -> Result<Self> {
        let mut attempt = 0u32;
        let mut backoff = cfg.base_backoff;
        loop {
            attempt += 1;
            match async_nats::connect(&cfg.url).await {
                Ok(client) => {
                    info!(url = %cfg.url, attempt, "connected to bus");
                    return Ok(Self { client });
                }
                Err(e) => {
                    if attempt >= cfg.max_attempts {
                        return Err(MarketError::Connect {
                            url: cfg.url.clone(),
                            attempts: attempt,
                            source: e,
                        });
                    }
                    warn!(attempt, error = %e, backoff_secs = backoff.as_secs(), "bus connect failed, retrying");
                    let jitter: u64 = rand::thread_rng().gen_range(0..250);
                    tokio::time::sleep(backoff + Duration::from_millis(jitter)).await;
                    backoff = (backoff * 2).min(cfg.max_backoff);
                }
            }
        }
    }

    pub async fn publish(&self, topic: &str, envelope: &Envelope) -> Result<()> {
        let subject = to_bus_subject(topic);
        let bytes = envelope.to_json()?;
        self.client.publish(subject, bytes.into()).await?;
        Ok(())
    }

    /// Subscribe to a topic or topic pattern (`/market/>` etc). A single
    /// subscription's messages are delivered to `recv()` in arrival order;
    /// draining multiple subscriptions concurrently is the caller's job.
    pub async fn subscribe(&self, pattern: &str) -> Result<Subscription> {
        let subject = to_bus_pattern(pattern);
        let inner = self.client.subscribe(subject).await?;
        Ok(Subscription { inner })
    }

    pub async fn close(self) -> Result<()> {
        self.client.flush().await?;
        Ok(())
    }
}

//! Crate-wide error type for the library boundary.
//!
//! Handler-local business rejections (bad offer, rate limited, no account...)
//! are plain reason strings published back onto the bus, not `MarketError`
//! values — they are protocol data, not failures of this process.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MarketError {
    #[error("failed to connect to bus at {url} after {attempts} attempts: {source}")]
    Connect {
        url: String,
        attempts: u32,
        #[source]
        source: async_nats::ConnectError,
    },

    #[error("bus publish failed: {0}")]
    Publish(#[from] async_nats::client::PublishError),

    #[error("bus subscribe failed: {0}")]
    Subscribe(#[from] async_nats::SubscribeError),

    #[error("envelope codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("not connected to bus")]
    NotConnected,

    #[error("failed to flush bus connection: {0}")]
    Flush(#[from] async_nats::client::FlushError),
}

pub type Result<T> = std::result::Result<T, MarketError>;

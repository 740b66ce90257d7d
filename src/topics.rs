//! Topic path conventions and item-to-topic routing.
//!
//! Topics are addressed with `/` on the wire surface and user-facing code;
//! the bus itself is NATS, which is `.`-delimited. Conversion is a pure,
//! allocation-light transform in both directions.

use crate::catalogue::Category;

pub const SYSTEM_TICK: &str = "/system/tick";
pub const WORLD_NATURE: &str = "/world/nature";
pub const MARKET_SQUARE: &str = "/market/square";
pub const MARKET_GOVERNANCE: &str = "/market/governance";
pub const MARKET_BANK: &str = "/market/bank";
pub const MARKET_RAW_GOODS: &str = "/market/raw-goods";
pub const MARKET_FOOD: &str = "/market/food";
pub const MARKET_MATERIALS: &str = "/market/materials";
pub const MARKET_HOUSING: &str = "/market/housing";
pub const MARKET_GENERAL: &str = "/market/general";

pub const MARKET_WILDCARD: &str = "/market/>";
pub const WORLD_WILDCARD: &str = "/world/>";

pub fn agent_inbox(agent_id: &str) -> String {
    format!("/agent/{agent_id}/inbox")
}

/// `/market/raw-goods` -> `market.raw-goods`.
pub fn to_bus_subject(topic: &str) -> String {
    topic.trim_start_matches('/').replace('/', ".")
}

/// `market.raw-goods` -> `/market/raw-goods`. Inverse of [`to_bus_subject`].
pub fn from_bus_subject(subject: &str) -> String {
    format!("/{}", subject.replace('.', "/"))
}

/// A NATS-style subject pattern for the given `/`-separated topic pattern.
/// The trailing `>` wildcard carries through unchanged (NATS supports it
/// natively), so this is the same transform as [`to_bus_subject`].
pub fn to_bus_pattern(pattern: &str) -> String {
    to_bus_subject(pattern)
}

#[derive(Debug, thiserror::Error)]
#[error("item category {0:?} has no market topic")]
pub struct UnroutableCategory(pub Category);

/// Route a catalogue category to its canonical market topic.
pub fn topic_for_category(category: Category) -> Result<&'static str, UnroutableCategory> {
    match category {
        Category::Raw => Ok(MARKET_RAW_GOODS),
        Category::Food => Ok(MARKET_FOOD),
        Category::Material => Ok(MARKET_MATERIALS),
        Category::Housing => Ok(MARKET_HOUSING),
    }
}

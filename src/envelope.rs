//! Wire envelope and the tagged-union of message payloads.
//!
//! `Envelope` round-trips through JSON byte-for-byte: the `from` field is
//! aliased on the wire (Rust callers use `from_agent`), and `type`/`payload`
//! are produced by `serde`'s adjacent tagging flattened into the envelope
//! object, matching the `{ id, from, topic, timestamp, tick, type, payload }`
//! shape exactly.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OfferPayload {
    pub item: String,
    pub quantity: u32,
    pub price_per_unit: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_tick: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BidPayload {
    pub item: String,
    pub quantity: u32,
    pub max_price_per_unit: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AcceptPayload {
    pub reference_msg_id: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CounterPayload {
    pub reference_msg_id: String,
    pub proposed_price: f64,
    pub quantity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CraftStartPayload {
    pub recipe: String,
    pub inputs: HashMap<String, u32>,
    pub estimated_ticks: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CraftCompletePayload {
    pub recipe: String,
    pub output: HashMap<String, u32>,
    pub agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JoinPayload {
    pub agent_id: String,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeartbeatPayload {
    pub agent_id: String,
    pub wallet: f64,
    pub inventory_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TickPayload {
    pub tick_number: u64,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpawnPayload {
    pub spawn_id: String,
    pub tick: u64,
    pub items: HashMap<String, u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatherPayload {
    pub spawn_id: String,
    pub item: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatherResultPayload {
    pub reference_msg_id: String,
    pub spawn_id: String,
    pub agent_id: String,
    pub item: String,
    pub quantity: u32,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SettlementPayload {
    pub reference_msg_id: String,
    pub buyer: String,
    pub seller: String,
    pub item: String,
    pub quantity: u32,
    pub total_price: f64,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationResultPayload {
    pub reference_msg_id: String,
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Payload {
    Offer(OfferPayload),
    Bid(BidPayload),
    Accept(AcceptPayload),
    Counter(CounterPayload),
    CraftStart(CraftStartPayload),
    CraftComplete(CraftCompletePayload),
    Join(JoinPayload),
    Heartbeat(HeartbeatPayload),
    Tick(TickPayload),
    Spawn(SpawnPayload),
    Gather(GatherPayload),
    GatherResult(GatherResultPayload),
    Settlement(SettlementPayload),
    ValidationResult(ValidationResultPayload),
}

impl Payload {
    /// The wire `type` string, e.g. `"craft_start"`.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Offer(_) => "offer",
            Payload::Bid(_) => "bid",
            Payload::Accept(_) => "accept",
            Payload::Counter(_) => "counter",
            Payload::CraftStart(_) => "craft_start",
            Payload::CraftComplete(_) => "craft_complete",
            Payload::Join(_) => "join",
            Payload::Heartbeat(_) => "heartbeat",
            Payload::Tick(_) => "tick",
            Payload::Spawn(_) => "spawn",
            Payload::Gather(_) => "gather",
            Payload::GatherResult(_) => "gather_result",
            Payload::Settlement(_) => "settlement",
            Payload::ValidationResult(_) => "validation_result",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(default = "new_id")]
    pub id: String,
    #[serde(rename = "from")]
    pub from_agent: String,
    pub topic: String,
    #[serde(default = "now_secs")]
    pub timestamp: f64,
    #[serde(default)]
    pub tick: u64,
    #[serde(flatten)]
    pub payload: Payload,
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn now_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

impl Envelope {
    pub fn new(from_agent: impl Into<String>, topic: impl Into<String>, tick: u64, payload: Payload) -> Self {
        Self {
            id: new_id(),
            from_agent: from_agent.into(),
            topic: topic.into(),
            timestamp: now_secs(),
            tick,
            payload,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// A loosely-typed envelope used for structural validation before the
/// payload is known to match its kind's schema. `kind`/`payload` are kept
/// as raw JSON so the Governor can report a reason string instead of
/// failing to deserialize at all.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEnvelope {
    #[serde(default = "new_id")]
    pub id: String,
    #[serde(rename = "from", default)]
    pub from_agent: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default = "now_secs")]
    pub timestamp: f64,
    #[serde(default)]
    pub tick: u64,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

pub const KNOWN_KINDS: &[&str] = &[
    "offer",
    "bid",
    "accept",
    "counter",
    "craft_start",
    "craft_complete",
    "join",
    "heartbeat",
    "tick",
    "spawn",
    "gather",
    "gather_result",
    "settlement",
    "validation_result",
];

/// Parse a raw envelope's payload against the schema implied by its `kind`.
pub fn parse_payload(kind: &str, payload: &serde_json::Value) -> Result<Payload, serde_json::Error> {
    let tagged = serde_json::json!({ "type": kind, "payload": payload });
    serde_json::from_value(tagged)
}

impl RawEnvelope {
    /// Promote to a strongly-typed [`Envelope`] once its payload is known
    /// to match `kind`'s schema.
    pub fn into_envelope(self, payload: Payload) -> Envelope {
        Envelope {
            id: self.id,
            from_agent: self.from_agent,
            topic: self.topic,
            timestamp: self.timestamp,
            tick: self.tick,
            payload,
        }
    }
}

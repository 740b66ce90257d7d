//! Governor: admission control. Structural and business-rule validation,
//! per-tick rate limiting, heartbeat liveness, crafting state machine.
//!
//! Advisory only: the Governor never gates delivery to the Banker. It
//! publishes a `ValidationResult` for every market message it sees.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::bus::BusClient;
use crate::catalogue::{is_valid_item, recipe};
use crate::envelope::{
    parse_payload, Envelope, Payload, RawEnvelope, ValidationResultPayload,
};
use crate::error::Result;
use crate::topics::{MARKET_GOVERNANCE, MARKET_WILDCARD, SYSTEM_TICK};
use crate::validation::validate_message;

pub const GOVERNOR_AGENT_ID: &str = "governor";

#[derive(Debug, Clone)]
pub struct GovernorConfig {
    pub max_actions_per_tick: u32,
    pub heartbeat_timeout_ticks: u64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            max_actions_per_tick: 5,
            heartbeat_timeout_ticks: 10,
        }
    }
}

impl GovernorConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("GOVERNOR_MAX_ACTIONS_PER_TICK") {
            if let Ok(n) = v.parse() {
                cfg.max_actions_per_tick = n;
            }
        }
        if let Ok(v) = std::env::var("GOVERNOR_HEARTBEAT_TIMEOUT_TICKS") {
            if let Ok(n) = v.parse() {
                cfg.heartbeat_timeout_ticks = n;
            }
        }
        cfg
    }
}

#[derive(Debug, Clone)]
struct ActiveCraft {
    #[allow(dead_code)]
    recipe: String,
    #[allow(dead_code)]
    started_tick: u64,
    #[allow(dead_code)]
    estimated_ticks: u32,
}

#[derive(Debug, Default)]
pub struct GovernorState {
    current_tick: u64,
    actions_this_tick: HashMap<String, u32>,
    last_heartbeat_tick: HashMap<String, u64>,
    active_crafts: HashMap<String, ActiveCraft>,
    known_agents: HashSet<String>,
}

impl GovernorState {
    pub fn advance_tick(&mut self, tick: u64) {
        self.current_tick = tick;
        self.actions_this_tick.clear();
    }

    fn action_count(&self, agent_id: &str) -> u32 {
        *self.actions_this_tick.get(agent_id).unwrap_or(&0)
    }

    fn record_action(&mut self, agent_id: &str) {
        *self.actions_this_tick.entry(agent_id.to_string()).or_insert(0) += 1;
    }

    fn is_rate_limited(&self, agent_id: &str, max_actions: u32) -> bool {
        self.action_count(agent_id) >= max_actions
    }

    fn is_inactive(&self, agent_id: &str, timeout_ticks: u64) -> bool {
        match self.last_heartbeat_tick.get(agent_id) {
            None => false,
            Some(&last) => self.current_tick.saturating_sub(last) > timeout_ticks,
        }
    }

    fn is_crafting(&self, agent_id: &str) -> bool {
        self.active_crafts.contains_key(agent_id)
    }

    fn start_craft(&mut self, agent_id: &str, recipe_name: &str, estimated_ticks: u32) {
        self.active_crafts.insert(
            agent_id.to_string(),
            ActiveCraft {
                recipe: recipe_name.to_string(),
                started_tick: self.current_tick,
                estimated_ticks,
            },
        );
    }

    fn complete_craft(&mut self, agent_id: &str) {
        self.active_crafts.remove(agent_id);
    }

    fn register_agent(&mut self, agent_id: &str) {
        self.known_agents.insert(agent_id.to_string());
    }

    fn record_heartbeat(&mut self, agent_id: &str) {
        self.last_heartbeat_tick.insert(agent_id.to_string(), self.current_tick);
    }
}

/// Business rules beyond the purely structural ones, per §4.3 steps 2-4.
/// Mutates `state` (rate-limit/liveness are read-only here; per-kind craft
/// and join/heartbeat bookkeeping mutate on success).
fn validate_business_rules(payload: &Payload, agent_id: &str, state: &mut GovernorState, cfg: &GovernorConfig) -> Vec<String> {
    if state.is_rate_limited(agent_id, cfg.max_actions_per_tick) {
        return vec!["Rate limited".to_string()];
    }

    let mut errors = Vec::new();
    if state.is_inactive(agent_id, cfg.heartbeat_timeout_ticks) {
        errors.push("inactive".to_string());
    }

    match payload {
        Payload::Offer(p) => {
            if !is_valid_item(&p.item) {
                errors.push(format!("unknown item: {}", p.item));
            }
        }
        Payload::Bid(p) => {
            if !is_valid_item(&p.item) {
                errors.push(format!("unknown item: {}", p.item));
            }
        }
        Payload::Accept(p) => {
            if p.reference_msg_id.is_empty() {
                errors.push("reference_msg_id is required".to_string());
            }
        }
        Payload::Counter(p) => {
            if p.reference_msg_id.is_empty() {
                errors.push("reference_msg_id is required".to_string());
            }
        }
        Payload::CraftStart(p) => {
            match recipe(&p.recipe) {
                None => errors.push(format!("unknown recipe: {}", p.recipe)),
                Some(r) => {
                    if p.inputs != r.inputs {
                        errors.push("inputs do not match recipe".to_string());
                    }
                    if p.estimated_ticks != r.ticks {
                        errors.push("estimated_ticks does not match recipe".to_string());
                    }
                    if state.is_crafting(agent_id) {
                        errors.push("agent already has an active craft".to_string());
                    }
                }
            }
            if errors.is_empty() {
                state.start_craft(agent_id, &p.recipe, p.estimated_ticks);
            }
        }
        Payload::CraftComplete(_) => {
            if !state.is_crafting(agent_id) {
                errors.push("no active craft to complete".to_string());
            } else {
                state.complete_craft(agent_id);
            }
        }
        Payload::Join(p) => {
            let id = if p.agent_id.is_empty() { agent_id } else { &p.agent_id };
            state.register_agent(id);
        }
        Payload::Heartbeat(_) => {
            state.record_heartbeat(agent_id);
        }
        _ => {}
    }

    errors
}

/// Process one message observed on `/market/>`. Returns the `ValidationResult`
/// envelope to publish, or `None` when the message should be silently
/// skipped (the Governor's own echoes).
pub fn process_market_message(state: &mut GovernorState, cfg: &GovernorConfig, raw: &RawEnvelope) -> Option<Envelope> {
    if raw.kind == "validation_result" && raw.from_agent == GOVERNOR_AGENT_ID {
        return None;
    }

    let structural_errors = validate_message(raw);
    if !structural_errors.is_empty() {
        state.record_action(&raw.from_agent);
        return Some(build_result(raw, false, Some(structural_errors.join("; "))));
    }

    let payload = match parse_payload(&raw.kind, &raw.payload) {
        Ok(p) => p,
        Err(e) => {
            state.record_action(&raw.from_agent);
            return Some(build_result(raw, false, Some(format!("payload: {e}"))));
        }
    };

    let business_errors = validate_business_rules(&payload, &raw.from_agent, state, cfg);
    state.record_action(&raw.from_agent);

    let valid = business_errors.is_empty();
    let reason = (!valid).then(|| business_errors.join("; "));
    Some(build_result(raw, valid, reason))
}

fn build_result(raw: &RawEnvelope, valid: bool, reason: Option<String>) -> Envelope {
    Envelope::new(
        GOVERNOR_AGENT_ID,
        MARKET_GOVERNANCE,
        0,
        Payload::ValidationResult(ValidationResultPayload {
            reference_msg_id: raw.id.clone(),
            valid,
            reason,
            action: Some(raw.kind.clone()),
        }),
    )
}

/// Drive the Governor's two subscriptions until the bus connection drops.
pub async fn run(bus: BusClient, cfg: GovernorConfig) -> Result<()> {
    let mut state = GovernorState::default();
    let mut market_sub = bus.subscribe(MARKET_WILDCARD).await?;
    let mut tick_sub = bus.subscribe(SYSTEM_TICK).await?;

    loop {
        tokio::select! {
            msg = market_sub.recv() => {
                let Some(msg) = msg else { break };
                let Ok(raw) = serde_json::from_slice::<RawEnvelope>(&msg.payload) else {
                    debug!("dropping unparseable market message");
                    continue;
                };
                if let Some(result) = process_market_message(&mut state, &cfg, &raw) {
                    if let Err(e) = bus.publish(MARKET_GOVERNANCE, &result).await {
                        warn!(error = %e, "failed to publish validation result");
                    }
                }
            }
            msg = tick_sub.recv() => {
                let Some(msg) = msg else { break };
                if let Ok(env) = Envelope::from_json(&msg.payload) {
                    if let Payload::Tick(t) = env.payload {
                        state.advance_tick(t.tick_number);
                    }
                }
            }
        }
    }
    Ok(())
}

//! Agent runtime: an optimistic local mirror of wallet/inventory plus a
//! pluggable [`Strategy`], driven by the bus's tick/market/nature streams.
//!
//! Trades are never guessed locally — a buyer/seller's wallet and inventory
//! only move once the corresponding `Settlement` arrives from the Banker.
//! Gathering is the same: a `Gather` action doesn't touch inventory until
//! the World Engine's `GatherResult` is observed. Crafting has no such
//! confirmation channel, so it's applied locally the moment the action is
//! issued — the local mirror can drift from the Banker's truth there, same
//! as upstream.

use std::collections::HashMap;

use tracing::{info, warn};

use crate::bus::BusClient;
use crate::catalogue::item;
use crate::envelope::{
    CraftCompletePayload, Envelope, GatherPayload, GatherResultPayload, HeartbeatPayload,
    JoinPayload, Payload, SettlementPayload, SpawnPayload, TickPayload,
};
use crate::error::Result;
use crate::topics::{
    topic_for_category, MARKET_GENERAL, MARKET_SQUARE, MARKET_WILDCARD, SYSTEM_TICK,
    WORLD_NATURE, WORLD_WILDCARD,
};

/// Mirrors the Governor's own budget constant. The two are independent
/// copies by design — services share no memory and no config channel.
pub const MAX_ACTIONS_PER_TICK: u32 = 5;

/// Starting wallet balance for a newly joined agent. Kept in sync with the
/// Banker's own default by convention, not by any shared state.
pub const DEFAULT_STARTING_WALLET: f64 = 100.0;

/// Ticks between heartbeats. An agent that heartbeats more often than this
/// just burns its own action budget for nothing.
pub const HEARTBEAT_INTERVAL: u64 = 5;

/// Subtract `qty` from `inventory[item]`, removing the entry entirely once
/// it hits zero rather than leaving a stale zero-count key behind.
fn debit(inventory: &mut HashMap<String, u32>, item: &str, qty: u32) {
    if let Some(held) = inventory.get_mut(item) {
        let new = held.saturating_sub(qty);
        if new == 0 {
            inventory.remove(item);
        } else {
            *held = new;
        }
    }
}

#[derive(Debug, Clone)]
pub struct SpawnSnapshot {
    pub spawn_id: String,
    pub items: HashMap<String, u32>,
}

/// An offer or bid seen from another agent this tick. Cleared every tick —
/// it's a snapshot for `decide()` to react to, not a standing order book.
#[derive(Debug, Clone)]
pub struct ObservedOffer {
    pub reference_msg_id: String,
    pub from_agent: String,
    pub item: String,
    pub quantity: u32,
    pub price_per_unit: f64,
    pub is_bid: bool,
}

/// A crafting job the runtime itself is tracking to completion. Owned here,
/// not by a strategy — any strategy that calls `CraftStart` gets the
/// matching `CraftComplete` for free once `ready_tick` is reached.
#[derive(Debug, Clone)]
pub struct ActiveCraft {
    pub recipe: String,
    pub ready_tick: u64,
}

/// One of this agent's own resting orders, tracked so it can be dropped the
/// moment a `Settlement` confirms it. Not cleared on tick — it lives until
/// observed settled (or forgotten, if it expires or is never matched).
#[derive(Debug, Clone)]
pub struct PendingOrder {
    pub item: String,
    pub is_bid: bool,
}

#[derive(Debug, Clone)]
pub struct AgentState {
    pub agent_id: String,
    pub wallet: f64,
    pub inventory: HashMap<String, u32>,
    pub current_tick: u64,
    pub active_spawn: Option<SpawnSnapshot>,
    pub observed_offers: Vec<ObservedOffer>,
    pub active_craft: Option<ActiveCraft>,
    pub pending_offers: HashMap<String, PendingOrder>,
    actions_this_tick: u32,
    last_heartbeat_tick: Option<u64>,
}

impl AgentState {
    pub fn new(agent_id: impl Into<String>, starting_wallet: f64) -> Self {
        Self {
            agent_id: agent_id.into(),
            wallet: starting_wallet,
            inventory: HashMap::new(),
            current_tick: 0,
            active_spawn: None,
            observed_offers: Vec::new(),
            active_craft: None,
            pending_offers: HashMap::new(),
            actions_this_tick: 0,
            last_heartbeat_tick: None,
        }
    }

    /// Whether at least [`HEARTBEAT_INTERVAL`] ticks have passed since the
    /// last heartbeat (or none has ever been sent).
    pub fn needs_heartbeat(&self, interval: u64) -> bool {
        match self.last_heartbeat_tick {
            None => true,
            Some(last) => self.current_tick.saturating_sub(last) >= interval,
        }
    }

    pub fn record_heartbeat(&mut self) {
        self.last_heartbeat_tick = Some(self.current_tick);
    }

    pub fn apply_tick(&mut self, tick: &TickPayload) {
        self.current_tick = tick.tick_number;
        self.actions_this_tick = 0;
        self.observed_offers.clear();
    }

    pub fn observe_offer(&mut self, msg_id: &str, from_agent: &str, item: &str, quantity: u32, price_per_unit: f64, is_bid: bool) {
        self.observed_offers.push(ObservedOffer {
            reference_msg_id: msg_id.to_string(),
            from_agent: from_agent.to_string(),
            item: item.to_string(),
            quantity,
            price_per_unit,
            is_bid,
        });
    }

    pub fn apply_spawn(&mut self, spawn: &SpawnPayload) {
        self.active_spawn = Some(SpawnSnapshot { spawn_id: spawn.spawn_id.clone(), items: spawn.items.clone() });
    }

    pub fn apply_settlement(&mut self, settlement: &SettlementPayload) {
        if settlement.status != "completed" {
            return;
        }
        self.pending_offers.remove(&settlement.reference_msg_id);
        if settlement.buyer == self.agent_id {
            self.wallet -= settlement.total_price;
            *self.inventory.entry(settlement.item.clone()).or_insert(0) += settlement.quantity;
        } else if settlement.seller == self.agent_id {
            self.wallet += settlement.total_price;
            debit(&mut self.inventory, &settlement.item, settlement.quantity);
        }
    }

    pub fn apply_gather_result(&mut self, result: &GatherResultPayload) {
        if result.agent_id == self.agent_id && result.success {
            *self.inventory.entry(result.item.clone()).or_insert(0) += result.quantity;
        }
    }

    fn debit_inputs(&mut self, inputs: &HashMap<String, u32>) {
        for (name, qty) in inputs {
            debit(&mut self.inventory, name, *qty);
        }
    }

    fn credit_output(&mut self, output: &HashMap<String, u32>) {
        for (name, qty) in output {
            *self.inventory.entry(name.clone()).or_insert(0) += qty;
        }
    }

    fn try_reserve_action(&mut self, max_actions: u32) -> bool {
        if self.actions_this_tick >= max_actions {
            return false;
        }
        self.actions_this_tick += 1;
        true
    }
}

/// Behavior an agent process wires in. `on_tick` is where an agent decides
/// what to publish this tick; `on_settlement`/`on_gather_result` are
/// observation hooks for strategies that want to react to fills.
pub trait Strategy: Send {
    fn agent_id(&self) -> &str;
    fn display_name(&self) -> &str;
    fn description(&self) -> &str;

    fn on_tick(&mut self, state: &AgentState) -> Vec<Payload>;

    fn on_settlement(&mut self, _state: &AgentState, _settlement: &SettlementPayload) {}
    fn on_gather_result(&mut self, _state: &AgentState, _result: &GatherResultPayload) {}
}

fn topic_for_action(payload: &Payload) -> &'static str {
    match payload {
        Payload::Offer(p) => item(&p.item).and_then(|i| topic_for_category(i.category).ok()).unwrap_or(MARKET_GENERAL),
        Payload::Bid(p) => item(&p.item).and_then(|i| topic_for_category(i.category).ok()).unwrap_or(MARKET_GENERAL),
        Payload::Gather(_) => WORLD_NATURE,
        // Falls back to the canonical square when a strategy doesn't care.
        Payload::Accept(_) | Payload::Join(_) | Payload::Heartbeat(_) => MARKET_SQUARE,
        _ => MARKET_GENERAL,
    }
}

async fn execute_action(bus: &BusClient, state: &mut AgentState, mut payload: Payload) -> Result<()> {
    if !state.try_reserve_action(MAX_ACTIONS_PER_TICK) {
        warn!(agent = %state.agent_id, "per-tick action budget exhausted, dropping action");
        return Ok(());
    }

    // Captured before the payload moves into the envelope below, so the
    // order can be tracked under the envelope id the Banker will reference.
    let pending_order = match &payload {
        Payload::Offer(o) => Some(PendingOrder { item: o.item.clone(), is_bid: false }),
        Payload::Bid(b) => Some(PendingOrder { item: b.item.clone(), is_bid: true }),
        _ => None,
    };

    match &mut payload {
        // A strategy may omit spawn_id and let the runtime fill in the
        // currently known pool.
        Payload::Gather(g) if g.spawn_id.is_empty() => {
            if let Some(spawn) = &state.active_spawn {
                g.spawn_id = spawn.spawn_id.clone();
            }
        }
        Payload::CraftStart(p) => {
            if let Some(r) = crate::catalogue::recipe(&p.recipe) {
                state.debit_inputs(&r.inputs);
                state.active_craft = Some(ActiveCraft { recipe: p.recipe.clone(), ready_tick: state.current_tick + r.ticks as u64 });
            }
        }
        Payload::CraftComplete(p) => state.credit_output(&p.output),
        _ => {}
    }

    let topic = topic_for_action(&payload);
    let env = Envelope::new(state.agent_id.clone(), topic, state.current_tick, payload);
    if let Some(order) = pending_order {
        state.pending_offers.insert(env.id.clone(), order);
    }
    bus.publish(topic, &env).await
}

/// Auto-complete a craft the runtime started tracking once its ready tick
/// arrives, regardless of which strategy issued the original `CraftStart`.
async fn maybe_complete_craft(bus: &BusClient, state: &mut AgentState) -> Result<()> {
    let Some(craft) = state.active_craft.take() else { return Ok(()) };
    if state.current_tick < craft.ready_tick {
        state.active_craft = Some(craft);
        return Ok(());
    }
    if let Some(r) = crate::catalogue::recipe(&craft.recipe) {
        let output = HashMap::from([(r.output.clone(), r.output_quantity)]);
        let payload = Payload::CraftComplete(CraftCompletePayload { recipe: craft.recipe, output, agent: state.agent_id.clone() });
        execute_action(bus, state, payload).await?;
    }
    Ok(())
}

async fn send_heartbeat(bus: &BusClient, state: &mut AgentState) -> Result<()> {
    state.try_reserve_action(MAX_ACTIONS_PER_TICK);
    state.record_heartbeat();
    let inventory_count: u32 = state.inventory.values().sum();
    let payload = Payload::Heartbeat(HeartbeatPayload {
        agent_id: state.agent_id.clone(),
        wallet: state.wallet,
        inventory_count,
    });
    let env = Envelope::new(state.agent_id.clone(), MARKET_SQUARE, state.current_tick, payload);
    bus.publish(MARKET_SQUARE, &env).await
}

/// Drive one agent process: joins once, then reacts to ticks, market
/// traffic and nature (spawn/gather) traffic until the bus drops.
pub async fn run(bus: BusClient, starting_wallet: f64, mut strategy: Box<dyn Strategy>) -> Result<()> {
    let agent_id = strategy.agent_id().to_string();
    let mut state = AgentState::new(agent_id.clone(), starting_wallet);

    let join = Envelope::new(
        agent_id.clone(),
        MARKET_SQUARE,
        0,
        Payload::Join(JoinPayload {
            agent_id: agent_id.clone(),
            name: strategy.display_name().to_string(),
            description: strategy.description().to_string(),
            api_url: None,
        }),
    );
    bus.publish(MARKET_SQUARE, &join).await?;
    info!(agent = %agent_id, "joined the market");

    let mut market_sub = bus.subscribe(MARKET_WILDCARD).await?;
    let mut nature_sub = bus.subscribe(WORLD_WILDCARD).await?;
    let mut tick_sub = bus.subscribe(SYSTEM_TICK).await?;

    loop {
        tokio::select! {
            msg = tick_sub.recv() => {
                let Some(msg) = msg else { break };
                let Ok(env) = Envelope::from_json(&msg.payload) else { continue };
                let Payload::Tick(t) = env.payload else { continue };
                state.apply_tick(&t);

                maybe_complete_craft(&bus, &mut state).await?;

                for action in strategy.on_tick(&state) {
                    execute_action(&bus, &mut state, action).await?;
                }
                if state.needs_heartbeat(HEARTBEAT_INTERVAL) {
                    send_heartbeat(&bus, &mut state).await?;
                }
            }
            msg = market_sub.recv() => {
                let Some(msg) = msg else { break };
                let Ok(env) = Envelope::from_json(&msg.payload) else { continue };
                if env.from_agent == agent_id {
                    continue;
                }
                match &env.payload {
                    Payload::Settlement(s) => {
                        if s.buyer == agent_id || s.seller == agent_id {
                            state.apply_settlement(s);
                            strategy.on_settlement(&state, s);
                        }
                    }
                    Payload::Offer(o) => {
                        state.observe_offer(&env.id, &env.from_agent, &o.item, o.quantity, o.price_per_unit, false);
                    }
                    Payload::Bid(b) => {
                        state.observe_offer(&env.id, &env.from_agent, &b.item, b.quantity, b.max_price_per_unit, true);
                    }
                    _ => {}
                }
            }
            msg = nature_sub.recv() => {
                let Some(msg) = msg else { break };
                let Ok(env) = Envelope::from_json(&msg.payload) else { continue };
                match &env.payload {
                    Payload::Spawn(s) => state.apply_spawn(s),
                    Payload::GatherResult(g) if g.agent_id == agent_id => {
                        state.apply_gather_result(g);
                        strategy.on_gather_result(&state, g);
                    }
                    _ => {}
                }
            }
        }
    }
    Ok(())
}

/// Build a `Gather` action against the agent's currently known spawn, if any.
pub fn gather_action(state: &AgentState, item_name: &str, quantity: u32) -> Option<Payload> {
    let spawn = state.active_spawn.as_ref()?;
    Some(Payload::Gather(GatherPayload { spawn_id: spawn.spawn_id.clone(), item: item_name.to_string(), quantity }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settlement_only_moves_wallet_for_the_involved_side() {
        let mut state = AgentState::new("farmer-1", 100.0);
        let settlement = SettlementPayload {
            reference_msg_id: "m1".into(),
            buyer: "chef-1".into(),
            seller: "farmer-1".into(),
            item: "potato".into(),
            quantity: 5,
            total_price: 10.0,
            status: "completed".into(),
        };
        state.apply_settlement(&settlement);
        assert_eq!(state.wallet, 110.0);
        assert!(state.inventory.get("potato").is_none());
    }

    #[test]
    fn settlement_drops_the_matching_pending_offer() {
        let mut state = AgentState::new("farmer-1", 100.0);
        state.inventory.insert("potato".into(), 5);
        state.pending_offers.insert("m1".into(), PendingOrder { item: "potato".into(), is_bid: false });
        let settlement = SettlementPayload {
            reference_msg_id: "m1".into(),
            buyer: "chef-1".into(),
            seller: "farmer-1".into(),
            item: "potato".into(),
            quantity: 5,
            total_price: 10.0,
            status: "completed".into(),
        };
        state.apply_settlement(&settlement);
        assert!(state.pending_offers.is_empty());
    }

    #[test]
    fn debiting_to_zero_removes_the_inventory_key() {
        let mut state = AgentState::new("chef-1", 100.0);
        state.inventory.insert("potato".into(), 2);
        state.debit_inputs(&HashMap::from([("potato".to_string(), 2)]));
        assert!(state.inventory.get("potato").is_none());
    }

    #[test]
    fn heartbeat_is_gated_by_interval() {
        let mut state = AgentState::new("farmer-1", 100.0);
        assert!(state.needs_heartbeat(HEARTBEAT_INTERVAL));
        state.record_heartbeat();
        assert!(!state.needs_heartbeat(HEARTBEAT_INTERVAL));
        state.current_tick = HEARTBEAT_INTERVAL - 1;
        assert!(!state.needs_heartbeat(HEARTBEAT_INTERVAL));
        state.current_tick = HEARTBEAT_INTERVAL;
        assert!(state.needs_heartbeat(HEARTBEAT_INTERVAL));
    }

    #[test]
    fn rejected_settlement_is_ignored() {
        let mut state = AgentState::new("farmer-1", 100.0);
        let settlement = SettlementPayload {
            reference_msg_id: "m1".into(),
            buyer: "chef-1".into(),
            seller: "farmer-1".into(),
            item: "potato".into(),
            quantity: 5,
            total_price: 10.0,
            status: "rejected".into(),
        };
        state.apply_settlement(&settlement);
        assert_eq!(state.wallet, 100.0);
    }

    #[test]
    fn gather_result_credits_only_the_named_agent() {
        let mut state = AgentState::new("farmer-1", 100.0);
        let result = GatherResultPayload {
            reference_msg_id: "g1".into(),
            spawn_id: "s1".into(),
            agent_id: "farmer-1".into(),
            item: "potato".into(),
            quantity: 3,
            success: true,
            reason: None,
        };
        state.apply_gather_result(&result);
        assert_eq!(*state.inventory.get("potato").unwrap(), 3);
    }

    #[test]
    fn action_budget_caps_at_max_per_tick() {
        let mut state = AgentState::new("farmer-1", 100.0);
        for _ in 0..MAX_ACTIONS_PER_TICK {
            assert!(state.try_reserve_action(MAX_ACTIONS_PER_TICK));
        }
        assert!(!state.try_reserve_action(MAX_ACTIONS_PER_TICK));
    }

    #[test]
    fn action_budget_resets_on_tick() {
        let mut state = AgentState::new("farmer-1", 100.0);
        for _ in 0..MAX_ACTIONS_PER_TICK {
            state.try_reserve_action(MAX_ACTIONS_PER_TICK);
        }
        state.apply_tick(&TickPayload { tick_number: 1, timestamp: 0.0 });
        assert!(state.try_reserve_action(MAX_ACTIONS_PER_TICK));
    }

    #[test]
    fn gather_action_requires_known_spawn() {
        let state = AgentState::new("farmer-1", 100.0);
        assert!(gather_action(&state, "potato", 1).is_none());
    }

    #[test]
    fn observed_offers_are_cleared_every_tick() {
        let mut state = AgentState::new("farmer-1", 100.0);
        state.observe_offer("m1", "chef-1", "potato", 5, 2.0, false);
        assert_eq!(state.observed_offers.len(), 1);
        state.apply_tick(&TickPayload { tick_number: 1, timestamp: 0.0 });
        assert!(state.observed_offers.is_empty());
    }

    #[test]
    fn accept_and_join_route_to_market_square() {
        let accept = Payload::Accept(crate::envelope::AcceptPayload {
            reference_msg_id: "m1".into(),
            quantity: 1,
        });
        assert_eq!(topic_for_action(&accept), MARKET_SQUARE);
    }

    #[test]
    fn topic_for_offer_routes_by_item_category() {
        let offer = Payload::Offer(crate::envelope::OfferPayload {
            item: "potato".into(),
            quantity: 1,
            price_per_unit: 1.0,
            expires_tick: None,
        });
        assert_eq!(topic_for_action(&offer), crate::topics::MARKET_RAW_GOODS);
    }
}

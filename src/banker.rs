//! Banker: accounts, the resting order book, trade settlement, crafting
//! custody. The only service that mutates wallets and inventories, and it
//! trusts nothing the Governor has already approved — every economic
//! precondition is re-checked here.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::bus::BusClient;
use crate::catalogue::recipe;
use crate::envelope::{Envelope, Payload, RawEnvelope, SettlementPayload};
use crate::error::Result;
use crate::topics::{MARKET_BANK, MARKET_WILDCARD, SYSTEM_TICK, WORLD_WILDCARD};

pub const BANKER_AGENT_ID: &str = "banker";

#[derive(Debug, Clone)]
pub struct BankerConfig {
    pub starting_wallet: f64,
}

impl Default for BankerConfig {
    fn default() -> Self {
        Self { starting_wallet: 100.0 }
    }
}

impl BankerConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("BANKER_STARTING_WALLET") {
            if let Ok(f) = v.parse() {
                cfg.starting_wallet = f;
            }
        }
        cfg
    }
}

#[derive(Debug, Clone, Default)]
pub struct Account {
    pub wallet: f64,
    pub inventory: HashMap<String, u32>,
}

#[derive(Debug, Clone)]
struct OfferRecord {
    from_agent: String,
    item: String,
    price_per_unit: f64,
    remaining: u32,
    expires_tick: Option<u64>,
}

#[derive(Debug, Clone)]
struct BidRecord {
    from_agent: String,
    item: String,
    max_price_per_unit: f64,
    remaining: u32,
}

/// Subtract `qty` from `inventory[item]`, removing the entry entirely once
/// it hits zero rather than leaving a stale zero-count key behind.
fn debit(inventory: &mut HashMap<String, u32>, item: &str, qty: u32) {
    if let Some(held) = inventory.get_mut(item) {
        *held -= qty;
        if *held == 0 {
            inventory.remove(item);
        }
    }
}

#[derive(Debug, Default)]
pub struct BankerState {
    current_tick: u64,
    accounts: HashMap<String, Account>,
    offers: HashMap<String, OfferRecord>,
    bids: HashMap<String, BidRecord>,
}

impl BankerState {
    /// Advance the clock and purge offers past their `expires_tick`. Bids
    /// carry no expiry field on the wire, so they never age out here.
    pub fn advance_tick(&mut self, tick: u64) {
        self.current_tick = tick;
        self.offers.retain(|_, o| o.expires_tick.map_or(true, |exp| exp > tick));
    }

    pub fn account(&self, agent_id: &str) -> Option<&Account> {
        self.accounts.get(agent_id)
    }

    /// Idempotent: re-joining an already-known agent preserves its state.
    pub fn join(&mut self, agent_id: &str, starting_wallet: f64) {
        self.accounts.entry(agent_id.to_string()).or_insert_with(|| Account { wallet: starting_wallet, inventory: HashMap::new() });
    }

    pub fn record_offer(&mut self, msg_id: &str, from_agent: &str, item: &str, quantity: u32, price_per_unit: f64, expires_tick: Option<u64>) -> std::result::Result<(), String> {
        let Some(acct) = self.accounts.get(from_agent) else {
            return Err("no account".to_string());
        };
        if acct.inventory.get(item).copied().unwrap_or(0) < quantity {
            return Err(format!("insufficient {item} to offer"));
        }
        self.offers.insert(
            msg_id.to_string(),
            OfferRecord { from_agent: from_agent.to_string(), item: item.to_string(), price_per_unit, remaining: quantity, expires_tick },
        );
        Ok(())
    }

    pub fn record_bid(&mut self, msg_id: &str, from_agent: &str, item: &str, quantity: u32, max_price_per_unit: f64) -> std::result::Result<(), String> {
        let Some(acct) = self.accounts.get(from_agent) else {
            return Err("no account".to_string());
        };
        if acct.wallet < quantity as f64 * max_price_per_unit {
            return Err("insufficient wallet to bid".to_string());
        }
        self.bids.insert(
            msg_id.to_string(),
            BidRecord { from_agent: from_agent.to_string(), item: item.to_string(), max_price_per_unit, remaining: quantity },
        );
        Ok(())
    }

    /// Resolve an ACCEPT against the book and settle. `trade_qty` is
    /// clamped to the order's remaining quantity — an over-accept never
    /// over-fills, it just fills what's left. Returns `None` (with nothing
    /// published) on any rejection; state is left untouched on failure.
    pub fn settle_accept(&mut self, accepter: &str, reference_msg_id: &str, quantity: u32) -> Option<SettlementPayload> {
        let (buyer, seller, item, price_per_unit, remaining) = if let Some(offer) = self.offers.get(reference_msg_id) {
            (accepter.to_string(), offer.from_agent.clone(), offer.item.clone(), offer.price_per_unit, offer.remaining)
        } else if let Some(bid) = self.bids.get(reference_msg_id) {
            (bid.from_agent.clone(), accepter.to_string(), bid.item.clone(), bid.max_price_per_unit, bid.remaining)
        } else {
            debug!(reference_msg_id, "accept references unknown order");
            return None;
        };

        if buyer == seller {
            warn!(agent = %buyer, "rejecting self-trade");
            return None;
        }

        let trade_qty = quantity.min(remaining);
        if trade_qty == 0 {
            return None;
        }
        let total_price = trade_qty as f64 * price_per_unit;

        let buyer_ok = self.accounts.get(&buyer).is_some_and(|a| a.wallet >= total_price);
        let seller_ok = self.accounts.get(&seller).is_some_and(|a| a.inventory.get(&item).copied().unwrap_or(0) >= trade_qty);
        if !buyer_ok || !seller_ok {
            warn!(%buyer, %seller, "accept rejected: insufficient funds or stock");
            return None;
        }

        {
            let buyer_acct = self.accounts.get_mut(&buyer).unwrap();
            buyer_acct.wallet -= total_price;
            *buyer_acct.inventory.entry(item.clone()).or_insert(0) += trade_qty;
        }
        {
            let seller_acct = self.accounts.get_mut(&seller).unwrap();
            seller_acct.wallet += total_price;
            debit(&mut seller_acct.inventory, &item, trade_qty);
        }

        if let Some(offer) = self.offers.get_mut(reference_msg_id) {
            offer.remaining -= trade_qty;
            if offer.remaining == 0 {
                self.offers.remove(reference_msg_id);
            }
        }
        if let Some(bid) = self.bids.get_mut(reference_msg_id) {
            bid.remaining -= trade_qty;
            if bid.remaining == 0 {
                self.bids.remove(reference_msg_id);
            }
        }

        Some(SettlementPayload { reference_msg_id: reference_msg_id.to_string(), buyer, seller, item, quantity: trade_qty, total_price, status: "completed".to_string() })
    }

    /// Debit every recipe input at once, or reject (collecting every
    /// missing/insufficient input, not just the first). Does not track the
    /// craft itself — it trusts a matching `craft_complete` will follow.
    pub fn start_craft(&mut self, agent_id: &str, recipe_name: &str) {
        let Some(r) = recipe(recipe_name) else {
            warn!(recipe_name, "craft_start references unknown recipe");
            return;
        };
        let Some(acct) = self.accounts.get(agent_id) else {
            warn!(agent_id, "craft_start from unknown account");
            return;
        };
        let missing: Vec<&str> = r
            .inputs
            .iter()
            .filter(|(input, needed)| acct.inventory.get(*input).copied().unwrap_or(0) < **needed)
            .map(|(input, _)| input.as_str())
            .collect();
        if !missing.is_empty() {
            warn!(agent_id, ?missing, "insufficient inputs to start craft");
            return;
        }
        let acct = self.accounts.get_mut(agent_id).unwrap();
        for (input, needed) in &r.inputs {
            debit(&mut acct.inventory, input, *needed);
        }
    }

    /// Credit the declared output to the agent. Deliberately does not check
    /// that a matching `craft_start` preceded this (preserved upstream
    /// quirk, not a bug to fix here).
    pub fn complete_craft(&mut self, agent_id: &str, output: &HashMap<String, u32>) {
        let Some(acct) = self.accounts.get_mut(agent_id) else {
            warn!(agent_id, "craft_complete from unknown account");
            return;
        };
        for (item, qty) in output {
            *acct.inventory.entry(item.clone()).or_insert(0) += qty;
        }
    }

    /// The one place an account is auto-created outside JOIN: a successful
    /// gather result must be creditable even if JOIN was lost in transit.
    pub fn credit_gathered(&mut self, agent_id: &str, item: &str, quantity: u32, starting_wallet: f64) {
        if quantity == 0 || agent_id.is_empty() {
            warn!(agent_id, quantity, "dropping malformed gather result credit");
            return;
        }
        let acct = self.accounts.entry(agent_id.to_string()).or_insert_with(|| Account { wallet: starting_wallet, inventory: HashMap::new() });
        *acct.inventory.entry(item.to_string()).or_insert(0) += quantity;
    }
}

pub async fn run(bus: BusClient, cfg: BankerConfig) -> Result<()> {
    let mut state = BankerState::default();
    let mut market_sub = bus.subscribe(MARKET_WILDCARD).await?;
    let mut nature_sub = bus.subscribe(WORLD_WILDCARD).await?;
    let mut tick_sub = bus.subscribe(SYSTEM_TICK).await?;

    loop {
        tokio::select! {
            msg = market_sub.recv() => {
                let Some(msg) = msg else { break };
                if let Some(settlement) = handle_market_message(&mut state, &cfg, &msg.payload) {
                    let env = Envelope::new(BANKER_AGENT_ID, MARKET_BANK, state.current_tick, Payload::Settlement(settlement));
                    if let Err(e) = bus.publish(MARKET_BANK, &env).await {
                        warn!(error = %e, "failed to publish settlement");
                    }
                }
            }
            msg = nature_sub.recv() => {
                let Some(msg) = msg else { break };
                handle_nature_message(&mut state, &cfg, &msg.payload);
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

fn handle_market_message(state: &mut BankerState, cfg: &BankerConfig, payload: &[u8]) -> Option<SettlementPayload> {
    let raw: RawEnvelope = serde_json::from_slice(payload).ok()?;
    if raw.from_agent == BANKER_AGENT_ID {
        return None;
    }
    let parsed = crate::envelope::parse_payload(&raw.kind, &raw.payload).ok()?;

    match parsed {
        Payload::Offer(p) => {
            if let Err(reason) = state.record_offer(&raw.id, &raw.from_agent, &p.item, p.quantity, p.price_per_unit, p.expires_tick) {
                warn!(from = %raw.from_agent, reason, "offer rejected");
            }
            None
        }
        Payload::Bid(p) => {
            if let Err(reason) = state.record_bid(&raw.id, &raw.from_agent, &p.item, p.quantity, p.max_price_per_unit) {
                warn!(from = %raw.from_agent, reason, "bid rejected");
            }
            None
        }
        Payload::Accept(p) => state.settle_accept(&raw.from_agent, &p.reference_msg_id, p.quantity),
        Payload::CraftStart(p) => {
            state.start_craft(&raw.from_agent, &p.recipe);
            None
        }
        Payload::CraftComplete(p) => {
            state.complete_craft(&p.agent, &p.output);
            None
        }
        Payload::Join(p) => {
            let id = if p.agent_id.is_empty() { raw.from_agent.clone() } else { p.agent_id.clone() };
            state.join(&id, cfg.starting_wallet);
            None
        }
        _ => None,
    }
}

fn handle_nature_message(state: &mut BankerState, cfg: &BankerConfig, payload: &[u8]) {
    let Ok(env) = Envelope::from_json(payload) else { return };
    if env.from_agent == crate::world::WORLD_AGENT_ID {
        if let Payload::GatherResult(g) = env.payload {
            if g.success {
                state.credit_gathered(&g.agent_id, &g.item, g.quantity, cfg.starting_wallet);
                info!(agent = %g.agent_id, item = %g.item, quantity = g.quantity, "credited gathered goods");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WALLET: f64 = 100.0;

    #[test]
    fn offer_then_accept_settles_and_moves_goods() {
        let mut state = BankerState::default();
        state.join("farmer-1", WALLET);
        state.join("chef-1", WALLET);
        state.accounts.get_mut("farmer-1").unwrap().inventory.insert("potato".into(), 10);

        state.record_offer("o1", "farmer-1", "potato", 5, 2.0, None).unwrap();
        let settlement = state.settle_accept("chef-1", "o1", 5).unwrap();

        assert_eq!(settlement.status, "completed");
        assert_eq!(settlement.buyer, "chef-1");
        assert_eq!(settlement.seller, "farmer-1");
        assert_eq!(settlement.total_price, 10.0);
        assert_eq!(state.account("chef-1").unwrap().wallet, WALLET - 10.0);
        assert_eq!(state.account("farmer-1").unwrap().wallet, WALLET + 10.0);
        assert_eq!(*state.account("chef-1").unwrap().inventory.get("potato").unwrap(), 5);
    }

    #[test]
    fn bid_side_reverses_buyer_and_seller() {
        let mut state = BankerState::default();
        state.join("chef-1", WALLET);
        state.join("farmer-1", WALLET);
        state.accounts.get_mut("farmer-1").unwrap().inventory.insert("onion".into(), 3);

        state.record_bid("b1", "chef-1", "onion", 3, 2.5).unwrap();
        let settlement = state.settle_accept("farmer-1", "b1", 3).unwrap();

        assert_eq!(settlement.buyer, "chef-1");
        assert_eq!(settlement.seller, "farmer-1");
        assert_eq!(settlement.total_price, 7.5);
    }

    #[test]
    fn self_trade_is_rejected_and_nothing_is_published() {
        let mut state = BankerState::default();
        state.join("farmer-1", WALLET);
        state.accounts.get_mut("farmer-1").unwrap().inventory.insert("potato".into(), 5);
        state.record_offer("o1", "farmer-1", "potato", 5, 2.0, None).unwrap();

        assert!(state.settle_accept("farmer-1", "o1", 5).is_none());
        assert_eq!(state.offers.get("o1").unwrap().remaining, 5);
    }

    #[test]
    fn insufficient_funds_rejects_without_mutating() {
        let mut state = BankerState::default();
        state.join("farmer-1", WALLET);
        state.join("chef-1", 1.0);
        state.accounts.get_mut("farmer-1").unwrap().inventory.insert("potato".into(), 5);
        state.record_offer("o1", "farmer-1", "potato", 5, 2.0, None).unwrap();

        assert!(state.settle_accept("chef-1", "o1", 5).is_none());
        assert_eq!(state.account("chef-1").unwrap().wallet, 1.0);
        assert_eq!(state.account("farmer-1").unwrap().inventory.get("potato").copied().unwrap_or(0), 5);
    }

    #[test]
    fn offer_without_account_is_rejected() {
        let mut state = BankerState::default();
        let err = state.record_offer("o1", "farmer-1", "potato", 5, 2.0, None).unwrap_err();
        assert_eq!(err, "no account");
        assert!(state.offers.is_empty());
    }

    #[test]
    fn offer_without_enough_stock_is_rejected() {
        let mut state = BankerState::default();
        state.join("farmer-1", WALLET);
        assert!(state.record_offer("o1", "farmer-1", "potato", 5, 2.0, None).is_err());
    }

    #[test]
    fn over_accept_clamps_to_remaining_quantity() {
        let mut state = BankerState::default();
        state.join("farmer-1", WALLET);
        state.join("chef-1", WALLET);
        state.accounts.get_mut("farmer-1").unwrap().inventory.insert("potato".into(), 10);
        state.record_offer("o1", "farmer-1", "potato", 4, 2.0, None).unwrap();

        let settlement = state.settle_accept("chef-1", "o1", 999).unwrap();
        assert_eq!(settlement.quantity, 4);
        assert!(state.offers.get("o1").is_none());
    }

    #[test]
    fn partial_accept_leaves_remainder_open() {
        let mut state = BankerState::default();
        state.join("farmer-1", WALLET);
        state.join("chef-1", WALLET);
        state.accounts.get_mut("farmer-1").unwrap().inventory.insert("potato".into(), 10);
        state.record_offer("o1", "farmer-1", "potato", 10, 2.0, None).unwrap();

        let first = state.settle_accept("chef-1", "o1", 4).unwrap();
        assert_eq!(first.quantity, 4);
        assert_eq!(state.offers.get("o1").unwrap().remaining, 6);

        let second = state.settle_accept("chef-1", "o1", 6).unwrap();
        assert_eq!(second.quantity, 6);
        assert!(state.offers.get("o1").is_none());
    }

    #[test]
    fn dangling_reference_resolves_to_none() {
        let mut state = BankerState::default();
        assert!(state.settle_accept("chef-1", "nonexistent", 1).is_none());
    }

    #[test]
    fn expired_offer_is_purged_on_tick() {
        let mut state = BankerState::default();
        state.join("farmer-1", WALLET);
        state.accounts.get_mut("farmer-1").unwrap().inventory.insert("potato".into(), 5);
        state.record_offer("o1", "farmer-1", "potato", 5, 2.0, Some(3)).unwrap();

        state.advance_tick(2);
        assert!(state.offers.contains_key("o1"));
        state.advance_tick(3);
        assert!(!state.offers.contains_key("o1"));
    }

    #[test]
    fn craft_start_debits_inputs_and_complete_credits_output_without_linking() {
        let mut state = BankerState::default();
        state.join("chef-1", WALLET);
        state.accounts.get_mut("chef-1").unwrap().inventory.insert("potato".into(), 2);
        state.accounts.get_mut("chef-1").unwrap().inventory.insert("onion".into(), 1);

        state.start_craft("chef-1", "soup");
        assert!(state.account("chef-1").unwrap().inventory.get("potato").is_none());
        assert!(state.account("chef-1").unwrap().inventory.get("onion").is_none());

        let output = HashMap::from([("soup".to_string(), 1)]);
        state.complete_craft("chef-1", &output);
        assert_eq!(*state.account("chef-1").unwrap().inventory.get("soup").unwrap(), 1);
    }

    #[test]
    fn craft_complete_without_prior_start_still_credits() {
        let mut state = BankerState::default();
        state.join("chef-1", WALLET);
        let output = HashMap::from([("soup".to_string(), 1)]);
        state.complete_craft("chef-1", &output);
        assert_eq!(*state.account("chef-1").unwrap().inventory.get("soup").unwrap(), 1);
    }

    #[test]
    fn craft_complete_without_account_is_dropped() {
        let mut state = BankerState::default();
        let output = HashMap::from([("soup".to_string(), 1)]);
        state.complete_craft("ghost", &output);
        assert!(state.account("ghost").is_none());
    }

    #[test]
    fn craft_start_with_insufficient_inputs_does_not_debit() {
        let mut state = BankerState::default();
        state.join("chef-1", WALLET);
        state.start_craft("chef-1", "soup");
        assert!(state.account("chef-1").unwrap().inventory.is_empty());
    }

    #[test]
    fn join_is_idempotent() {
        let mut state = BankerState::default();
        state.join("farmer-1", 50.0);
        state.accounts.get_mut("farmer-1").unwrap().wallet = 42.0;
        state.join("farmer-1", 50.0);
        assert_eq!(state.account("farmer-1").unwrap().wallet, 42.0);
    }

    #[test]
    fn gather_result_auto_creates_account_and_credits_inventory() {
        let mut state = BankerState::default();
        state.credit_gathered("farmer-1", "wood", 4, WALLET);
        assert_eq!(state.account("farmer-1").unwrap().wallet, WALLET);
        assert_eq!(*state.account("farmer-1").unwrap().inventory.get("wood").unwrap(), 4);
    }

    #[test]
    fn zero_quantity_gather_credit_is_dropped() {
        let mut state = BankerState::default();
        state.credit_gathered("farmer-1", "wood", 0, WALLET);
        assert!(state.account("farmer-1").is_none());
    }
}

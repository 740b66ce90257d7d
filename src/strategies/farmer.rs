//! Farmer: gathers raw goods from the World Engine's spawn pools and
//! offers the surplus on the market.

use crate::agent::{gather_action, AgentState, Strategy};
use crate::catalogue::item;
use crate::envelope::{AcceptPayload, GatherResultPayload, OfferPayload, Payload, SettlementPayload};

/// Items to gather, in priority order, and the target quantity to hold of
/// each before moving on to the next.
const GATHER_PLAN: &[(&str, u32)] = &[("potato", 10), ("onion", 8)];

/// Never offer below this many units of an item — keeps enough on hand to
/// gather towards the next plan target without going to zero.
const KEEP_RESERVE: u32 = 2;

/// Offer price as a multiple of catalogue base price.
const SELL_MULTIPLIER: f64 = 1.2;

pub struct Farmer {
    agent_id: String,
}

impl Farmer {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self { agent_id: agent_id.into() }
    }

    fn next_gather_target(&self, state: &AgentState) -> Option<(&'static str, u32)> {
        for &(name, target) in GATHER_PLAN {
            let held = *state.inventory.get(name).unwrap_or(&0);
            if held < target {
                return Some((name, target - held));
            }
        }
        None
    }
}

impl Strategy for Farmer {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn display_name(&self) -> &str {
        "Farmer"
    }

    fn description(&self) -> &str {
        "Gathers potatoes and onions, sells the surplus"
    }

    fn on_tick(&mut self, state: &AgentState) -> Vec<Payload> {
        let mut actions = Vec::new();

        // Accept any bid for our own goods that clears base price, same as
        // selling at or above what we'd ask for ourselves.
        for bid in &state.observed_offers {
            if !bid.is_bid {
                continue;
            }
            if !GATHER_PLAN.iter().any(|&(name, _)| name == bid.item) {
                continue;
            }
            let Some(catalogue_item) = item(&bid.item) else { continue };
            if bid.price_per_unit < catalogue_item.base_price {
                continue;
            }
            let held = *state.inventory.get(&bid.item).unwrap_or(&0);
            if held <= KEEP_RESERVE {
                continue;
            }
            let surplus = held - KEEP_RESERVE;
            let quantity = bid.quantity.min(surplus);
            if quantity == 0 {
                continue;
            }
            actions.push(Payload::Accept(AcceptPayload { reference_msg_id: bid.reference_msg_id.clone(), quantity }));
        }

        if let Some((name, quantity)) = self.next_gather_target(state) {
            if let Some(action) = gather_action(state, name, quantity) {
                actions.push(action);
            }
        }

        for &(name, _target) in GATHER_PLAN {
            let held = *state.inventory.get(name).unwrap_or(&0);
            if held <= KEEP_RESERVE {
                continue;
            }
            let surplus = held - KEEP_RESERVE;
            let Some(catalogue_item) = item(name) else { continue };
            actions.push(Payload::Offer(OfferPayload {
                item: name.to_string(),
                quantity: surplus,
                price_per_unit: catalogue_item.base_price * SELL_MULTIPLIER,
                expires_tick: None,
            }));
        }

        actions
    }

    fn on_settlement(&mut self, _state: &AgentState, _settlement: &SettlementPayload) {}

    fn on_gather_result(&mut self, _state: &AgentState, _result: &GatherResultPayload) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn state_with(inventory: &[(&str, u32)]) -> AgentState {
        let mut state = AgentState::new("farmer-1", 100.0);
        for &(name, qty) in inventory {
            state.inventory.insert(name.to_string(), qty);
        }
        state
    }

    #[test]
    fn gathers_potato_first_when_below_target() {
        let mut farmer = Farmer::new("farmer-1");
        let mut state = state_with(&[]);
        state.active_spawn = Some(crate::agent::SpawnSnapshot {
            spawn_id: "s1".into(),
            items: HashMap::from([("potato".to_string(), 20)]),
        });
        let actions = farmer.on_tick(&state);
        assert!(actions.iter().any(|a| matches!(a, Payload::Gather(g) if g.item == "potato")));
    }

    #[test]
    fn offers_surplus_above_reserve() {
        let mut farmer = Farmer::new("farmer-1");
        let state = state_with(&[("potato", 15), ("onion", 8)]);
        let actions = farmer.on_tick(&state);
        assert!(actions.iter().any(|a| matches!(a, Payload::Offer(o) if o.item == "potato" && o.quantity > 0)));
    }

    #[test]
    fn does_not_offer_when_at_or_below_reserve() {
        let mut farmer = Farmer::new("farmer-1");
        let state = state_with(&[("potato", 2)]);
        let actions = farmer.on_tick(&state);
        assert!(!actions.iter().any(|a| matches!(a, Payload::Offer(o) if o.item == "potato")));
    }

    #[test]
    fn accepts_bid_at_or_above_base_price_for_its_own_goods() {
        let mut farmer = Farmer::new("farmer-1");
        let mut state = state_with(&[("potato", 10)]);
        state.observe_offer("bid-1", "chef-1", "potato", 3, 2.0, true);
        let actions = farmer.on_tick(&state);
        assert!(actions.iter().any(|a| matches!(a, Payload::Accept(acc) if acc.reference_msg_id == "bid-1" && acc.quantity == 3)));
    }

    #[test]
    fn ignores_bid_below_base_price() {
        let mut farmer = Farmer::new("farmer-1");
        let mut state = state_with(&[("potato", 10)]);
        state.observe_offer("bid-1", "chef-1", "potato", 3, 1.0, true);
        let actions = farmer.on_tick(&state);
        assert!(!actions.iter().any(|a| matches!(a, Payload::Accept(_))));
    }

    #[test]
    fn ignores_bids_for_items_it_does_not_sell() {
        let mut farmer = Farmer::new("farmer-1");
        let mut state = state_with(&[("potato", 10)]);
        state.observe_offer("bid-1", "chef-1", "soup", 1, 50.0, true);
        let actions = farmer.on_tick(&state);
        assert!(!actions.iter().any(|a| matches!(a, Payload::Accept(_))));
    }
}

//! Chef: buys raw ingredients, crafts soup, sells the output. Crafting
//! progress itself is owned by the agent runtime, not the strategy — this
//! only decides what to start.

use crate::agent::{AgentState, Strategy};
use crate::catalogue::{item, recipe};
use crate::envelope::{AcceptPayload, BidPayload, CraftStartPayload, GatherResultPayload, OfferPayload, Payload, SettlementPayload};

const RECIPE: &str = "soup";

/// Never bid above this multiple of catalogue base price for an ingredient.
const MAX_BUY_MULTIPLIER: f64 = 1.5;

/// Bid price as a multiple of catalogue base price, capped by [`MAX_BUY_MULTIPLIER`].
const BID_MULTIPLIER: f64 = 1.3;

const SOUP_SELL_PRICE: f64 = 10.0;

pub struct Chef {
    agent_id: String,
}

impl Chef {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self { agent_id: agent_id.into() }
    }

    fn has_ingredients(state: &AgentState, inputs: &std::collections::HashMap<String, u32>) -> bool {
        inputs.iter().all(|(name, qty)| state.inventory.get(name).copied().unwrap_or(0) >= *qty)
    }
}

impl Strategy for Chef {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn display_name(&self) -> &str {
        "Chef"
    }

    fn description(&self) -> &str {
        "Buys potatoes and onions, crafts and sells soup"
    }

    fn on_tick(&mut self, state: &AgentState) -> Vec<Payload> {
        let mut actions = Vec::new();
        let Some(r) = recipe(RECIPE) else { return actions };

        // Step 1: accept the cheapest observed offer within ceiling for
        // each ingredient we're still short of.
        let mut covered_by_accept = std::collections::HashSet::new();
        for (name, needed) in &r.inputs {
            let held = state.inventory.get(name).copied().unwrap_or(0);
            if held >= *needed {
                continue;
            }
            let Some(catalogue_item) = item(name) else { continue };
            let ceiling = catalogue_item.base_price * MAX_BUY_MULTIPLIER;
            let cheapest = state
                .observed_offers
                .iter()
                .filter(|o| !o.is_bid && &o.item == name && o.price_per_unit <= ceiling)
                .min_by(|a, b| a.price_per_unit.partial_cmp(&b.price_per_unit).unwrap());
            if let Some(offer) = cheapest {
                let quantity = (needed - held).min(offer.quantity);
                actions.push(Payload::Accept(AcceptPayload { reference_msg_id: offer.reference_msg_id.clone(), quantity }));
                covered_by_accept.insert(name.clone());
            }
        }

        // The runtime owns crafting progress once started; don't start a
        // second batch while one is already in flight.
        if state.active_craft.is_none() {
            if Self::has_ingredients(state, &r.inputs) {
                actions.push(Payload::CraftStart(CraftStartPayload {
                    recipe: RECIPE.to_string(),
                    inputs: r.inputs.clone(),
                    estimated_ticks: r.ticks,
                }));
            } else {
                for (name, needed) in &r.inputs {
                    let held = state.inventory.get(name).copied().unwrap_or(0);
                    if held >= *needed || covered_by_accept.contains(name) {
                        continue;
                    }
                    // Only bid when no sell offer for this ingredient was observed.
                    let sell_offer_seen = state.observed_offers.iter().any(|o| !o.is_bid && &o.item == name);
                    if sell_offer_seen {
                        continue;
                    }
                    let Some(catalogue_item) = item(name) else { continue };
                    let price = (catalogue_item.base_price * BID_MULTIPLIER).min(catalogue_item.base_price * MAX_BUY_MULTIPLIER);
                    actions.push(Payload::Bid(BidPayload {
                        item: name.clone(),
                        quantity: needed - held,
                        max_price_per_unit: price,
                        target_agent: None,
                    }));
                }
            }
        }

        let soup_held = state.inventory.get(&r.output).copied().unwrap_or(0);
        if soup_held > 0 {
            actions.push(Payload::Offer(OfferPayload {
                item: r.output.clone(),
                quantity: soup_held,
                price_per_unit: SOUP_SELL_PRICE,
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

    fn state_with(inventory: &[(&str, u32)], tick: u64) -> AgentState {
        let mut state = AgentState::new("chef-1", 100.0);
        for &(name, qty) in inventory {
            state.inventory.insert(name.to_string(), qty);
        }
        state.current_tick = tick;
        state
    }

    #[test]
    fn starts_craft_once_ingredients_are_held() {
        let mut chef = Chef::new("chef-1");
        let state = state_with(&[("potato", 2), ("onion", 1)], 0);
        let actions = chef.on_tick(&state);
        assert!(actions.iter().any(|a| matches!(a, Payload::CraftStart(c) if c.recipe == "soup")));
    }

    #[test]
    fn does_not_start_a_second_craft_while_one_is_active() {
        let mut chef = Chef::new("chef-1");
        let mut state = state_with(&[("potato", 2), ("onion", 1)], 0);
        state.active_craft = Some(crate::agent::ActiveCraft { recipe: "soup".into(), ready_tick: 2 });
        let actions = chef.on_tick(&state);
        assert!(!actions.iter().any(|a| matches!(a, Payload::CraftStart(_))));
    }

    #[test]
    fn accepts_cheapest_observed_offer_within_ceiling() {
        let mut chef = Chef::new("chef-1");
        let mut state = state_with(&[], 0);
        state.observe_offer("o1", "farmer-1", "potato", 5, 2.5, false);
        state.observe_offer("o2", "farmer-2", "potato", 5, 1.9, false);
        let actions = chef.on_tick(&state);
        assert!(actions.iter().any(|a| matches!(a, Payload::Accept(acc) if acc.reference_msg_id == "o2")));
        assert!(!actions.iter().any(|a| matches!(a, Payload::Bid(b) if b.item == "potato")));
    }

    #[test]
    fn does_not_bid_when_a_sell_offer_is_observed() {
        let mut chef = Chef::new("chef-1");
        let mut state = state_with(&[], 0);
        // Above ceiling, so it won't be accepted, but it's still a sell
        // offer on the wire and should suppress the bid.
        state.observe_offer("o1", "farmer-1", "potato", 5, 100.0, false);
        let actions = chef.on_tick(&state);
        assert!(!actions.iter().any(|a| matches!(a, Payload::Bid(b) if b.item == "potato")));
    }

    #[test]
    fn bids_for_missing_ingredients_when_no_offers_observed() {
        let mut chef = Chef::new("chef-1");
        let state = state_with(&[], 0);
        let actions = chef.on_tick(&state);
        assert!(actions.iter().any(|a| matches!(a, Payload::Bid(b) if b.item == "potato")));
        assert!(actions.iter().any(|a| matches!(a, Payload::Bid(b) if b.item == "onion")));
    }

    #[test]
    fn offers_soup_once_held() {
        let mut chef = Chef::new("chef-1");
        let state = state_with(&[("soup", 3)], 0);
        let actions = chef.on_tick(&state);
        assert!(actions.iter().any(|a| matches!(a, Payload::Offer(o) if o.item == "soup" && o.quantity == 3)));
    }
}

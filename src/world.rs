//! World Engine: tick clock, spawn pools, FCFS gather protocol.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::BusClient;
use crate::envelope::{Envelope, GatherPayload, Payload, SpawnPayload, TickPayload};
use crate::error::Result;
use crate::topics::{SYSTEM_TICK, WORLD_NATURE};

pub const WORLD_AGENT_ID: &str = "world";

#[derive(Debug, Clone)]
pub struct WorldConfig {
    pub tick_interval: Duration,
    pub spawn_table: HashMap<String, u32>,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs_f64(5.0),
            spawn_table: HashMap::from([
                ("potato".to_string(), 20),
                ("onion".to_string(), 15),
                ("wood".to_string(), 15),
                ("nails".to_string(), 10),
                ("stone".to_string(), 10),
            ]),
        }
    }
}

impl WorldConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("WORLD_TICK_INTERVAL") {
            if let Ok(secs) = v.parse::<f64>() {
                cfg.tick_interval = Duration::from_secs_f64(secs);
            } else {
                warn!(value = %v, "WORLD_TICK_INTERVAL unparsable, keeping default");
            }
        }
        cfg
    }
}

#[derive(Debug, Clone)]
pub struct SpawnPool {
    pub spawn_id: String,
    pub tick: u64,
    pub remaining: HashMap<String, u32>,
}

#[derive(Debug, Default)]
pub struct WorldState {
    pub current_tick: u64,
    pub active_spawn: Option<SpawnPool>,
}

impl WorldState {
    pub fn advance_tick(&mut self) -> u64 {
        self.current_tick += 1;
        self.current_tick
    }

    pub fn create_spawn(&mut self, spawn_table: &HashMap<String, u32>) -> &SpawnPool {
        let pool = SpawnPool {
            spawn_id: Uuid::new_v4().to_string(),
            tick: self.current_tick,
            remaining: spawn_table.clone(),
        };
        self.active_spawn = Some(pool);
        self.active_spawn.as_ref().unwrap()
    }

    /// FCFS gather with partial fulfillment. Returns `(granted, reason)`;
    /// `reason` is `Some` on rejection or partial grant, `None` on a full grant.
    pub fn try_gather(&mut self, spawn_id: &str, item: &str, quantity: u32) -> (u32, Option<String>) {
        if spawn_id.is_empty() {
            return (0, Some("Missing spawn_id".to_string()));
        }
        if item.is_empty() {
            return (0, Some("Missing item".to_string()));
        }
        if quantity == 0 {
            return (0, Some("Quantity must be positive".to_string()));
        }

        let Some(pool) = self.active_spawn.as_mut() else {
            return (0, Some("No active spawn".to_string()));
        };
        if pool.spawn_id != spawn_id {
            return (0, Some("Spawn expired or not found".to_string()));
        }

        let available = pool.remaining.get(item).copied().unwrap_or(0);
        if available == 0 {
            return (0, Some(format!("No {item} remaining in spawn")));
        }

        let granted = quantity.min(available);
        pool.remaining.insert(item.to_string(), available - granted);
        let reason = if granted < quantity {
            Some(format!("Partial: only {granted} remaining"))
        } else {
            None
        };
        (granted, reason)
    }
}

/// Run the tick loop and the `/world/nature` gather handler until the bus
/// connection is dropped. Each branch of the `select!` runs to completion
/// before the next is considered, preserving per-subscription ordering.
pub async fn run(bus: BusClient, cfg: WorldConfig) -> Result<()> {
    let mut state = WorldState::default();
    let mut nature_sub = bus.subscribe(WORLD_NATURE).await?;
    let mut ticker = tokio::time::interval(cfg.tick_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                do_tick(&bus, &mut state, &cfg).await?;
            }
            msg = nature_sub.recv() => {
                let Some(msg) = msg else { break };
                if let Err(e) = on_nature_message(&bus, &mut state, &msg.payload).await {
                    warn!(error = %e, "failed to handle gather message");
                }
            }
        }
    }
    Ok(())
}

async fn do_tick(bus: &BusClient, state: &mut WorldState, cfg: &WorldConfig) -> Result<()> {
    let tick_number = state.advance_tick();
    let pool = state.create_spawn(&cfg.spawn_table).clone();
    info!(tick = tick_number, spawn_id = %pool.spawn_id, "world tick");

    let tick_env = Envelope::new(
        WORLD_AGENT_ID,
        SYSTEM_TICK,
        tick_number,
        Payload::Tick(TickPayload {
            tick_number,
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs_f64(),
        }),
    );
    bus.publish(SYSTEM_TICK, &tick_env).await?;

    let spawn_env = Envelope::new(
        WORLD_AGENT_ID,
        WORLD_NATURE,
        tick_number,
        Payload::Spawn(SpawnPayload {
            spawn_id: pool.spawn_id,
            tick: pool.tick,
            items: pool.remaining,
        }),
    );
    bus.publish(WORLD_NATURE, &spawn_env).await
}

async fn on_nature_message(bus: &BusClient, state: &mut WorldState, payload: &[u8]) -> Result<()> {
    let Ok(env) = Envelope::from_json(payload) else {
        debug!("dropping unparseable nature message");
        return Ok(());
    };
    if env.from_agent == WORLD_AGENT_ID {
        return Ok(());
    }
    let Payload::Gather(gather) = &env.payload else {
        return Ok(());
    };

    handle_gather(bus, state, &env, gather).await
}

async fn handle_gather(
    bus: &BusClient,
    state: &mut WorldState,
    env: &Envelope,
    gather: &GatherPayload,
) -> Result<()> {
    let (granted, reason) = state.try_gather(&gather.spawn_id, &gather.item, gather.quantity);
    let success = granted > 0;

    let result = Envelope::new(
        WORLD_AGENT_ID,
        WORLD_NATURE,
        state.current_tick,
        Payload::GatherResult(crate::envelope::GatherResultPayload {
            reference_msg_id: env.id.clone(),
            spawn_id: gather.spawn_id.clone(),
            agent_id: env.from_agent.clone(),
            item: gather.item.clone(),
            quantity: granted,
            success,
            reason,
        }),
    );
    bus.publish(WORLD_NATURE, &result).await
}

//! Shared per-minute budget for smart routing.
//!
//! The budget caps requests and estimated spend per fixed one-minute window, both globally and per
//! API key. A routing decision must [`reserve`](BudgetLimiter::reserve) before calling a candidate;
//! the reservation is checked and recorded under one lock, so two concurrent decisions can never
//! both pass on the same remaining budget. After the call the reservation is
//! [`settle`](BudgetLimiter::settle)d with the actual cost.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::time::Instant;

use crate::config::BudgetConfig;
use crate::types::ApiKeyId;

const WINDOW: Duration = Duration::from_secs(60);

/// Usage within the current window.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct Usage {
    requests: u32,
    spend: Decimal,
}

#[derive(Debug)]
struct BudgetState {
    window_started: Instant,
    /// Incremented on every window reset so stale reservations are not settled into a new window
    window_id: u64,
    global: Usage,
    per_key: HashMap<ApiKeyId, Usage>,
}

/// Why a reservation was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetExceeded {
    pub reason: String,
}

/// Capacity held for one in-flight call.
#[must_use]
#[derive(Debug)]
pub struct Reservation {
    window_id: u64,
    api_key_id: Option<ApiKeyId>,
    estimated: Decimal,
}

#[derive(Debug)]
pub struct BudgetLimiter {
    config: BudgetConfig,
    state: Mutex<BudgetState>,
}

impl BudgetLimiter {
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BudgetState {
                window_started: Instant::now(),
                window_id: 0,
                global: Usage::default(),
                per_key: HashMap::new(),
            }),
        }
    }

    /// Atomically check every cap and, if all pass, record the request and its estimated cost.
    pub fn reserve(&self, api_key_id: Option<ApiKeyId>, estimated: Decimal) -> Result<Reservation, BudgetExceeded> {
        let mut state = self.state.lock();
        roll_window(&mut state);

        check(&state.global, estimated, self.config.requests_per_minute, self.config.spend_per_minute, "global")?;
        if let Some(key) = api_key_id {
            let usage = state.per_key.get(&key).copied().unwrap_or_default();
            check(
                &usage,
                estimated,
                self.config.key_requests_per_minute,
                self.config.key_spend_per_minute,
                "api key",
            )?;
        }

        state.global.requests += 1;
        state.global.spend += estimated;
        if let Some(key) = api_key_id {
            let usage = state.per_key.entry(key).or_default();
            usage.requests += 1;
            usage.spend += estimated;
        }

        Ok(Reservation {
            window_id: state.window_id,
            api_key_id,
            estimated,
        })
    }

    /// Replace the reserved estimate with the actual cost.
    pub fn settle(&self, reservation: Reservation, actual: Decimal) {
        let mut state = self.state.lock();
        if state.window_id != reservation.window_id {
            return;
        }
        let delta = actual - reservation.estimated;
        state.global.spend = (state.global.spend + delta).max(Decimal::ZERO);
        if let Some(key) = reservation.api_key_id
            && let Some(usage) = state.per_key.get_mut(&key)
        {
            usage.spend = (usage.spend + delta).max(Decimal::ZERO);
        }
    }
}

fn roll_window(state: &mut BudgetState) {
    let now = Instant::now();
    if now.duration_since(state.window_started) >= WINDOW {
        state.window_started = now;
        state.window_id += 1;
        state.global = Usage::default();
        state.per_key.clear();
    }
}

fn check(usage: &Usage, estimated: Decimal, max_requests: Option<u32>, max_spend: Option<Decimal>, scope: &str) -> Result<(), BudgetExceeded> {
    if let Some(max) = max_requests
        && usage.requests >= max
    {
        return Err(BudgetExceeded {
            reason: format!("{scope} request budget of {max} per minute exhausted"),
        });
    }
    if let Some(max) = max_spend
        && usage.spend + estimated > max
    {
        return Err(BudgetExceeded {
            reason: format!("{scope} spend budget of {max} per minute would be exceeded"),
        });
    }
    Ok(())
}

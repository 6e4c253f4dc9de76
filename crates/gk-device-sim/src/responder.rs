//! Command handling as the controller firmware does it: decide the ack,
//! enforce the relay cooldown, and swallow re-deliveries.

use std::collections::VecDeque;
use std::ops::RangeInclusive;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use uuid::Uuid;

use gk_protocol::{AckMessage, CommandMessage, GateCommand};

use crate::config::{AckMode, SimConfig};

pub const ERR_SIM_FAIL: &str = "SIM_FAIL";
pub const ERR_COOLDOWN: &str = "COOLDOWN";
pub const ERR_UNKNOWN_COMMAND: &str = "UNKNOWN_COMMAND";

/// Request ids remembered for re-delivery detection.
pub const DEDUPE_CAPACITY: usize = 16;

pub const JITTER_RANGE_MS: RangeInclusive<u64> = 100..=6000;

#[derive(Debug, Clone)]
pub struct ResponderConfig {
    pub mode: AckMode,
    pub ack_delay: Duration,
    pub cooldown: Duration,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            mode: AckMode::Success,
            ack_delay: Duration::from_millis(100),
            cooldown: Duration::from_millis(3000),
        }
    }
}

impl From<&SimConfig> for ResponderConfig {
    fn from(config: &SimConfig) -> Self {
        Self {
            mode: config.ack_mode,
            ack_delay: config.ack_delay(),
            cooldown: config.cooldown(),
        }
    }
}

/// What to send back for one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ack { ack: AckMessage, delay: Duration },
    /// Say nothing; the backend will hit its deadline.
    Silent,
}

#[derive(Debug, Default)]
struct RelayState {
    last_open: Option<Instant>,
    recent: VecDeque<Uuid>,
    opens: u64,
}

pub struct Responder {
    config: ResponderConfig,
    state: Mutex<RelayState>,
}

impl Responder {
    pub fn new(config: ResponderConfig) -> Self {
        Self {
            config,
            state: Mutex::new(RelayState::default()),
        }
    }

    pub fn config(&self) -> &ResponderConfig {
        &self.config
    }

    /// How many times the relay actually fired.
    pub fn opens(&self) -> u64 {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).opens
    }

    pub fn respond(&self, cmd: &CommandMessage) -> Reply {
        self.respond_at(cmd, Instant::now())
    }

    pub fn respond_at(&self, cmd: &CommandMessage, now: Instant) -> Reply {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let id = cmd.request_id;
        let ack = |ack: AckMessage| Reply::Ack {
            ack,
            delay: self.config.ack_delay,
        };

        if state.recent.contains(&id) {
            tracing::info!(request_id = %id, "re-delivered command, acking without opening");
            return ack(AckMessage::success(id));
        }

        if cmd.command != GateCommand::Open {
            tracing::warn!(request_id = %id, "unknown command");
            return ack(AckMessage::failure(id, ERR_UNKNOWN_COMMAND));
        }

        match self.config.mode {
            AckMode::Timeout => {
                tracing::info!(request_id = %id, "timeout mode, not acking");
                return Reply::Silent;
            }
            AckMode::Fail => {
                tracing::info!(request_id = %id, "fail mode, rejecting");
                return ack(AckMessage::failure(id, ERR_SIM_FAIL));
            }
            AckMode::Success | AckMode::Jitter => {}
        }

        if let Some(last) = state.last_open {
            if now.saturating_duration_since(last) < self.config.cooldown {
                tracing::info!(request_id = %id, "relay cooling down");
                return ack(AckMessage::failure(id, ERR_COOLDOWN));
            }
        }

        state.last_open = Some(now);
        state.opens += 1;
        if state.recent.len() == DEDUPE_CAPACITY {
            state.recent.pop_front();
        }
        state.recent.push_back(id);
        tracing::info!(request_id = %id, user_id = %cmd.user_id, "gate opened");

        let delay = match self.config.mode {
            AckMode::Jitter => {
                Duration::from_millis(rand::thread_rng().gen_range(JITTER_RANGE_MS))
            }
            _ => self.config.ack_delay,
        };
        Reply::Ack {
            ack: AckMessage::success(id),
            delay,
        }
    }
}

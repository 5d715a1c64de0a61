//! Bot registrations and the lookup seam the dispatch pipeline depends on.
//!
//! Registrations come from configuration here; a persistence-backed directory
//! is an external collaborator behind the same trait. Selection is always
//! explicit and deterministic, never "whichever row the store yields first".

use anyhow::{bail, Result};
use serde::Deserialize;

/// One Telegram bot owned by one coach.
#[derive(Debug, Clone, Deserialize)]
pub struct BotRegistration {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub username: String,
    pub token: String,
    #[serde(default = "default_active")]
    pub active: bool,
    pub coach_id: i64,
}

fn default_active() -> bool {
    true
}

/// Injected bot lookup.
///
/// `select(None)` must be deterministic: the active registration with the
/// lowest id. No active registration is a fatal configuration error, the one
/// case the callers abort on instead of degrading.
pub trait BotDirectory: Send + Sync {
    fn by_id(&self, bot_id: i64) -> Option<BotRegistration>;

    fn all(&self) -> Vec<BotRegistration>;

    fn active(&self) -> Vec<BotRegistration>;

    fn select(&self, bot_id: Option<i64>) -> Result<BotRegistration> {
        match bot_id {
            Some(id) => {
                let Some(bot) = self.by_id(id) else {
                    bail!("no bot registration with id {id}");
                };
                if !bot.active {
                    bail!("bot {id} ({}) is not active", bot.name);
                }
                Ok(bot)
            }
            None => {
                let Some(bot) = self.active().into_iter().min_by_key(|bot| bot.id) else {
                    bail!("no active bot registration; add one under [[bots]]");
                };
                Ok(bot)
            }
        }
    }
}

/// Directory over the config-declared registration list.
#[derive(Debug)]
pub struct StaticBotDirectory {
    bots: Vec<BotRegistration>,
}

impl StaticBotDirectory {
    pub fn new(bots: Vec<BotRegistration>) -> Result<Self> {
        let mut seen = std::collections::HashSet::new();
        for bot in &bots {
            if !seen.insert(bot.id) {
                bail!("duplicate bot id {} in [[bots]]", bot.id);
            }
            if bot.token.trim().is_empty() {
                bail!("bot {} ({}) has an empty token", bot.id, bot.name);
            }
        }
        Ok(Self { bots })
    }
}

impl BotDirectory for StaticBotDirectory {
    fn by_id(&self, bot_id: i64) -> Option<BotRegistration> {
        self.bots.iter().find(|bot| bot.id == bot_id).cloned()
    }

    fn all(&self) -> Vec<BotRegistration> {
        self.bots.clone()
    }

    fn active(&self) -> Vec<BotRegistration> {
        self.bots.iter().filter(|bot| bot.active).cloned().collect()
    }
}

//! Update routing with per-update failure isolation.
//!
//! Both delivery paths (webhook requests and the poll session) call into
//! [`UpdateRouter`]. A handler error is logged here, with bot and update ids,
//! and becomes a [`DispatchOutcome::Failed`]; it never crosses back into the
//! delivery path.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, warn};

use cg_telegram::{DispatchOutcome, Update, UpdateDispatcher, UpdateKind};

use crate::handlers::UpdateHandler;
use crate::registry::BotDirectory;

/// Update ids remembered per bot. Covers webhook redelivery and poll
/// re-fetch after a cursor reset within one process lifetime; durable
/// cross-process de-duplication belongs to the persistence collaborator.
const SEEN_WINDOW_CAPACITY: usize = 512;

#[derive(Default)]
struct SeenWindow {
    order: VecDeque<i64>,
    set: HashSet<i64>,
}

impl SeenWindow {
    /// Returns false when the id was already present.
    fn remember(&mut self, update_id: i64, capacity: usize) -> bool {
        if !self.set.insert(update_id) {
            return false;
        }
        self.order.push_back(update_id);
        while self.order.len() > capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.set.remove(&evicted);
            }
        }
        true
    }
}

pub struct UpdateRouter {
    directory: Arc<dyn BotDirectory>,
    handlers: HashMap<UpdateKind, Arc<dyn UpdateHandler>>,
    seen: DashMap<i64, SeenWindow>,
    seen_capacity: usize,
}

impl UpdateRouter {
    pub fn new(directory: Arc<dyn BotDirectory>) -> Self {
        Self {
            directory,
            handlers: HashMap::new(),
            seen: DashMap::new(),
            seen_capacity: SEEN_WINDOW_CAPACITY,
        }
    }

    pub fn with_handler(mut self, kind: UpdateKind, handler: Arc<dyn UpdateHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    #[cfg(test)]
    pub fn with_seen_capacity(mut self, capacity: usize) -> Self {
        self.seen_capacity = capacity.max(1);
        self
    }
}

#[async_trait]
impl UpdateDispatcher for UpdateRouter {
    async fn dispatch(&self, bot_id: i64, update: Update) -> DispatchOutcome {
        let update_id = update.update_id;
        let Some(bot) = self.directory.by_id(bot_id) else {
            debug!(bot_id, update_id, "update for unknown bot skipped");
            return DispatchOutcome::Skipped;
        };
        if !bot.active {
            debug!(bot_id, update_id, "update for inactive bot skipped");
            return DispatchOutcome::Skipped;
        }

        // Recorded before the handler runs: redelivery of the same
        // (bot_id, update_id) is a duplicate, not a retry.
        let first_sighting = self
            .seen
            .entry(bot_id)
            .or_default()
            .remember(update_id, self.seen_capacity);
        if !first_sighting {
            debug!(bot_id, update_id, "duplicate update dropped");
            return DispatchOutcome::Duplicate;
        }

        let kind = update.kind();
        let Some(handler) = self.handlers.get(&kind) else {
            debug!(
                bot_id,
                update_id,
                kind = kind.as_str(),
                "no handler for update kind; skipped"
            );
            return DispatchOutcome::Skipped;
        };

        match handler.handle(&bot, &update).await {
            Ok(()) => DispatchOutcome::Handled,
            Err(error) => {
                warn!(
                    bot_id,
                    update_id,
                    kind = kind.as_str(),
                    error = format!("{error:#}"),
                    "update handler failed"
                );
                DispatchOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{UpdateHandler, UpdateRouter};
    use crate::registry::{BotRegistration, StaticBotDirectory};
    use async_trait::async_trait;
    use cg_telegram::{DispatchOutcome, Update, UpdateDispatcher, UpdateKind};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    struct RecordingHandler {
        handled: Mutex<Vec<(i64, i64)>>,
        fail: bool,
    }

    impl RecordingHandler {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                handled: Mutex::new(Vec::new()),
                fail,
            })
        }

        fn handled(&self) -> Vec<(i64, i64)> {
            self.handled.lock().expect("handled lock").clone()
        }
    }

    #[async_trait]
    impl UpdateHandler for RecordingHandler {
        async fn handle(&self, bot: &BotRegistration, update: &Update) -> anyhow::Result<()> {
            self.handled
                .lock()
                .expect("handled lock")
                .push((bot.id, update.update_id));
            if self.fail {
                anyhow::bail!("handler blew up");
            }
            Ok(())
        }
    }

    fn bot(id: i64, active: bool) -> BotRegistration {
        BotRegistration {
            id,
            name: format!("bot-{id}"),
            username: String::new(),
            token: format!("{id}:token"),
            active,
            coach_id: 1,
        }
    }

    fn message_update(update_id: i64) -> Update {
        serde_json::from_value(json!({
            "update_id": update_id,
            "message": {
                "message_id": 1,
                "chat": {"id": 5, "type": "private"},
                "text": "lunch"
            }
        }))
        .expect("update fixture decodes")
    }

    fn router(handler: Arc<RecordingHandler>, bots: Vec<BotRegistration>) -> UpdateRouter {
        let directory = Arc::new(StaticBotDirectory::new(bots).expect("directory builds"));
        UpdateRouter::new(directory).with_handler(UpdateKind::Message, handler)
    }

    #[tokio::test]
    async fn known_active_bot_routes_to_the_handler() {
        let handler = RecordingHandler::new(false);
        let router = router(handler.clone(), vec![bot(1, true)]);

        let outcome = router.dispatch(1, message_update(10)).await;

        assert_eq!(outcome, DispatchOutcome::Handled);
        assert_eq!(handler.handled(), vec![(1, 10)]);
    }

    #[tokio::test]
    async fn unknown_and_inactive_bots_are_skipped_without_handling() {
        let handler = RecordingHandler::new(false);
        let router = router(handler.clone(), vec![bot(1, false)]);

        assert_eq!(
            router.dispatch(9, message_update(10)).await,
            DispatchOutcome::Skipped
        );
        assert_eq!(
            router.dispatch(1, message_update(10)).await,
            DispatchOutcome::Skipped
        );
        assert!(handler.handled().is_empty());
    }

    #[tokio::test]
    async fn handler_failure_is_contained_and_later_updates_still_run() {
        let handler = RecordingHandler::new(true);
        let router = router(handler.clone(), vec![bot(1, true)]);

        assert_eq!(
            router.dispatch(1, message_update(10)).await,
            DispatchOutcome::Failed
        );
        assert_eq!(
            router.dispatch(1, message_update(11)).await,
            DispatchOutcome::Failed
        );
        assert_eq!(handler.handled(), vec![(1, 10), (1, 11)]);
    }

    #[tokio::test]
    async fn redelivered_update_is_a_duplicate_and_runs_no_handler() {
        let handler = RecordingHandler::new(false);
        let router = router(handler.clone(), vec![bot(1, true)]);

        assert_eq!(
            router.dispatch(1, message_update(10)).await,
            DispatchOutcome::Handled
        );
        assert_eq!(
            router.dispatch(1, message_update(10)).await,
            DispatchOutcome::Duplicate
        );
        assert_eq!(handler.handled(), vec![(1, 10)]);
    }

    #[tokio::test]
    async fn seen_windows_are_per_bot() {
        let handler = RecordingHandler::new(false);
        let router = router(handler.clone(), vec![bot(1, true), bot(2, true)]);

        assert_eq!(
            router.dispatch(1, message_update(10)).await,
            DispatchOutcome::Handled
        );
        assert_eq!(
            router.dispatch(2, message_update(10)).await,
            DispatchOutcome::Handled
        );
        assert_eq!(handler.handled(), vec![(1, 10), (2, 10)]);
    }

    #[tokio::test]
    async fn a_failed_update_is_not_retried_on_redelivery() {
        let handler = RecordingHandler::new(true);
        let router = router(handler.clone(), vec![bot(1, true)]);

        assert_eq!(
            router.dispatch(1, message_update(10)).await,
            DispatchOutcome::Failed
        );
        assert_eq!(
            router.dispatch(1, message_update(10)).await,
            DispatchOutcome::Duplicate
        );
        assert_eq!(handler.handled().len(), 1);
    }

    #[tokio::test]
    async fn window_overflow_evicts_the_oldest_ids() {
        let handler = RecordingHandler::new(false);
        let directory =
            Arc::new(StaticBotDirectory::new(vec![bot(1, true)]).expect("directory builds"));
        let router = UpdateRouter::new(directory)
            .with_handler(UpdateKind::Message, handler.clone())
            .with_seen_capacity(2);

        for id in [10, 11, 12] {
            router.dispatch(1, message_update(id)).await;
        }
        // 10 was evicted, so a replay of it is handled again.
        assert_eq!(
            router.dispatch(1, message_update(10)).await,
            DispatchOutcome::Handled
        );
        assert_eq!(
            router.dispatch(1, message_update(12)).await,
            DispatchOutcome::Duplicate
        );
    }

    #[tokio::test]
    async fn update_kind_without_a_handler_is_skipped_after_dedup() {
        let handler = RecordingHandler::new(false);
        let router = router(handler.clone(), vec![bot(1, true)]);

        let callback: Update = serde_json::from_value(json!({
            "update_id": 20,
            "callback_query": {
                "id": "cbq",
                "from": {"id": 5, "first_name": "Dana"},
                "data": "log_meal"
            }
        }))
        .expect("update fixture decodes");

        assert_eq!(router.dispatch(1, callback).await, DispatchOutcome::Skipped);
        assert!(handler.handled().is_empty());
    }
}

//! Long-polling loop over `getUpdates`.
//!
//! Updates of one batch are handled sequentially and in order, so two
//! messages from the same user never race to open a topic. Handler failures
//! are logged and skipped; transport failures back off exponentially.

use crate::{
    routes::updates::{ALLOWED_UPDATES, dispatch},
    state::AppState,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Exponential delay between failed `getUpdates` calls.
#[derive(Debug)]
struct Backoff {
    current: Duration,
}

impl Backoff {
    fn new() -> Self {
        Self {
            current: INITIAL_BACKOFF,
        }
    }

    /// Delay to wait now; doubles the next one up to [`MAX_BACKOFF`].
    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(MAX_BACKOFF);
        delay
    }

    fn reset(&mut self) {
        self.current = INITIAL_BACKOFF;
    }
}

pub struct PollingService {
    state: AppState,
    timeout_secs: u32,
}

impl PollingService {
    pub fn new(state: AppState, timeout_secs: u32) -> Self {
        Self {
            state,
            timeout_secs,
        }
    }

    /// Poll until `shutdown` fires. Returns the next offset to request.
    pub async fn run(&self, shutdown: CancellationToken) -> i64 {
        let mut offset = 0;
        let mut backoff = Backoff::new();
        info!("Polling for updates: {:?}", ALLOWED_UPDATES);

        loop {
            let batch = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                batch = self.state.bot.get_updates(offset, self.timeout_secs, ALLOWED_UPDATES) => batch,
            };

            let updates = match batch {
                Ok(updates) => {
                    backoff.reset();
                    updates
                }
                Err(err) => {
                    // Flood control may ask for longer than the current step.
                    let delay = backoff
                        .next_delay()
                        .max(err.retry_after().unwrap_or_default());
                    warn!("getUpdates failed, retrying in {:?}: {}", delay, err);
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                let span = info_span!("update", update_id = update.update_id);
                if let Err(err) = dispatch(&self.state, &update).instrument(span).await {
                    error!(update_id = update.update_id, "Failed to handle update: {}", err);
                }
            }
        }

        self.acknowledge(offset).await;
        info!("Polling stopped");
        offset
    }

    /// Confirm handled updates so a restart does not receive them again.
    async fn acknowledge(&self, offset: i64) {
        if offset == 0 {
            return;
        }
        if let Err(err) = self.state.bot.get_updates(offset, 0, ALLOWED_UPDATES).await {
            warn!("Could not acknowledge updates up to {}: {}", offset, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::telegram::Update,
        services::telegram_service::{Call, TelegramError},
        state::testing::{GROUP_ID, harness, user},
    };

    fn topic_update(update_id: i64, thread: i64, message_id: i64) -> Update {
        serde_json::from_value(serde_json::json!({
            "update_id": update_id,
            "message": {
                "message_id": message_id,
                "message_thread_id": thread,
                "is_topic_message": true,
                "from": { "id": 7, "is_bot": false, "first_name": "Agent" },
                "chat": { "id": GROUP_ID, "type": "supergroup" },
                "text": "reply"
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn advances_offset_and_survives_handler_errors() {
        let mut u = user(42);
        u.message_thread_id = Some(300);
        let h = harness(vec![u]);

        // The first copy fails with a non-recoverable error; the loop must go on.
        h.bot
            .fail_next_copy(TelegramError::api(400, "Bad Request: message to copy not found"));
        h.bot.push_updates(Ok(vec![topic_update(10, 300, 1), topic_update(11, 300, 2)]));
        h.bot.push_updates(Err(TelegramError::api(502, "Bad Gateway")));
        h.bot.push_updates(Ok(vec![topic_update(12, 300, 3)]));

        let poller = PollingService::new(h.state.clone(), 0);
        let shutdown = CancellationToken::new();
        let stopper = shutdown.clone();
        let bot = h.bot.clone();
        tokio::spawn(async move {
            loop {
                let copies = bot
                    .calls()
                    .iter()
                    .filter(|c| matches!(c, Call::CopyMessage { .. }))
                    .count();
                if copies == 3 {
                    stopper.cancel();
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        let offset = tokio::time::timeout(Duration::from_secs(10), poller.run(shutdown))
            .await
            .expect("poller stopped");
        assert_eq!(offset, 13);

        let offsets: Vec<i64> = h
            .bot
            .calls()
            .iter()
            .filter_map(|c| match c {
                Call::GetUpdates { offset } => Some(*offset),
                _ => None,
            })
            .collect();
        assert_eq!(&offsets[..3], &[0, 12, 12]);
        assert_eq!(offsets.last(), Some(&13));
    }

    #[test]
    fn backoff_doubles_up_to_the_cap_and_resets() {
        let mut backoff = Backoff::new();
        let delays: Vec<u64> = (0..7).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);

        backoff.reset();
        assert_eq!(backoff.next_delay(), INITIAL_BACKOFF);
    }

    /// Runs the poller until `get_updates` was called `calls` times and
    /// returns the virtual time that took.
    async fn elapsed_until_calls(h: &crate::state::testing::Harness, calls: usize) -> Duration {
        let poller = PollingService::new(h.state.clone(), 0);
        let shutdown = CancellationToken::new();
        let stopper = shutdown.clone();
        let bot = h.bot.clone();
        let start = tokio::time::Instant::now();
        let watcher = tokio::spawn(async move {
            loop {
                let polls = bot
                    .calls()
                    .iter()
                    .filter(|c| matches!(c, Call::GetUpdates { .. }))
                    .count();
                if polls >= calls {
                    stopper.cancel();
                    return start.elapsed();
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        });

        poller.run(shutdown).await;
        watcher.await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_back_off_and_reset_after_success() {
        let h = harness(vec![]);
        for _ in 0..7 {
            h.bot.push_updates(Err(TelegramError::api(502, "Bad Gateway")));
        }
        h.bot.push_updates(Ok(vec![]));
        h.bot.push_updates(Err(TelegramError::api(502, "Bad Gateway")));

        // 1 + 2 + 4 + 8 + 16 + 30 + 30 s, then a success, then 1 s again.
        let elapsed = elapsed_until_calls(&h, 10).await;
        assert!(elapsed >= Duration::from_secs(92), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(93), "{:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn flood_control_wait_overrides_short_backoff() {
        let h = harness(vec![]);
        h.bot.push_updates(Err(TelegramError::Api {
            code: 429,
            description: "Too Many Requests: retry after 10".into(),
            retry_after: Some(10),
        }));

        let elapsed = elapsed_until_calls(&h, 2).await;
        assert!(elapsed >= Duration::from_secs(10), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(11), "{:?}", elapsed);
    }

    #[tokio::test]
    async fn cancelled_before_start_makes_no_calls() {
        let h = harness(vec![]);
        let poller = PollingService::new(h.state.clone(), 0);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        assert_eq!(poller.run(shutdown).await, 0);
        assert!(h.bot.calls().is_empty());
    }
}

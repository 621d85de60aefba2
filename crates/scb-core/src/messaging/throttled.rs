use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::{ChatId, MessageRef},
    messaging::{
        port::ChatTransport,
        types::{
            FileRef, InlineKeyboard, MenuCommand, MenuScope, MessagingCapabilities, TextFormat,
        },
    },
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Minimum spacing between *any* Telegram API calls (global flood control).
    pub global_min_interval: Duration,
    /// Minimum spacing between calls per chat (Telegram 1 msg/sec style limits).
    pub per_chat_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(40), // ~25/sec
            per_chat_min_interval: Duration::from_millis(1050), // ~0.95/sec
        }
    }
}

/// New chats between two sweeps of the per-chat limiters.
const CHAT_PRUNE_EVERY: usize = 256;

#[derive(Debug)]
struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Reserve the next slot and return the wait duration required before executing.
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let start = if now >= self.next { now } else { self.next };
        self.next = start + self.interval;
        start.saturating_duration_since(now)
    }

    fn is_idle(&self, now: Instant) -> bool {
        self.next <= now
    }
}

#[derive(Debug, Default)]
struct ChatLimiters {
    by_chat: HashMap<i64, Arc<Mutex<IntervalLimiter>>>,
    added_since_prune: usize,
}

impl ChatLimiters {
    /// Drop limiters whose last slot has passed and that nobody holds.
    fn prune_idle(&mut self, now: Instant) -> usize {
        let before = self.by_chat.len();
        self.by_chat.retain(|_, lim| {
            if Arc::strong_count(lim) > 1 {
                return true;
            }
            match lim.try_lock() {
                Ok(guard) => !guard.is_idle(now),
                Err(_) => true,
            }
        });
        before - self.by_chat.len()
    }
}

/// ChatTransport decorator that rate-limits outbound calls.
///
/// Broadcast fan-out is the heavy user here: hundreds of sends in a burst.
/// This keeps us under Telegram's global limit; 429s that still happen are
/// handled by the adapter's RetryAfter retry.
pub struct ThrottledTransport {
    inner: Arc<dyn ChatTransport>,
    cfg: ThrottleConfig,
    global: Mutex<IntervalLimiter>,
    per_chat: Mutex<ChatLimiters>,
}

impl ThrottledTransport {
    pub fn new(inner: Arc<dyn ChatTransport>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            global: Mutex::new(IntervalLimiter::new(cfg.global_min_interval)),
            per_chat: Mutex::new(ChatLimiters::default()),
        }
    }

    async fn limiter_for_chat(&self, chat_id: i64) -> Arc<Mutex<IntervalLimiter>> {
        let mut limiters = self.per_chat.lock().await;
        if let Some(lim) = limiters.by_chat.get(&chat_id) {
            return lim.clone();
        }

        limiters.added_since_prune += 1;
        if limiters.added_since_prune >= CHAT_PRUNE_EVERY {
            limiters.added_since_prune = 0;
            let pruned = limiters.prune_idle(Instant::now());
            if pruned > 0 {
                tracing::debug!(pruned, tracked = limiters.by_chat.len(), "per-chat throttles pruned");
            }
        }

        let lim = Arc::new(Mutex::new(IntervalLimiter::new(
            self.cfg.per_chat_min_interval,
        )));
        limiters.by_chat.insert(chat_id, lim.clone());
        lim
    }

    async fn throttle_chat(&self, chat_id: ChatId) {
        let global_wait = { self.global.lock().await.reserve() };
        let chat_wait = {
            let lim = self.limiter_for_chat(chat_id.0).await;
            let mut guard = lim.lock().await;
            guard.reserve()
        };

        let wait = global_wait.max(chat_wait);
        if wait > Duration::ZERO {
            sleep(wait).await;
        }
    }

    async fn throttle_global(&self) {
        let wait = { self.global.lock().await.reserve() };
        if wait > Duration::ZERO {
            sleep(wait).await;
        }
    }
}

#[async_trait::async_trait]
impl ChatTransport for ThrottledTransport {
    fn capabilities(&self) -> MessagingCapabilities {
        self.inner.capabilities()
    }

    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        format: TextFormat,
    ) -> Result<MessageRef> {
        self.throttle_chat(chat_id).await;
        self.inner.send_text(chat_id, text, format).await
    }

    async fn send_file(
        &self,
        chat_id: ChatId,
        file: &FileRef,
        caption: Option<&str>,
    ) -> Result<MessageRef> {
        self.throttle_chat(chat_id).await;
        self.inner.send_file(chat_id, file, caption).await
    }

    async fn send_choice(
        &self,
        chat_id: ChatId,
        prompt: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        self.throttle_chat(chat_id).await;
        self.inner.send_choice(chat_id, prompt, keyboard).await
    }

    async fn send_poll(
        &self,
        chat_id: ChatId,
        question: &str,
        options: &[String],
    ) -> Result<MessageRef> {
        self.throttle_chat(chat_id).await;
        self.inner.send_poll(chat_id, question, options).await
    }

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        // No chat_id available here; apply global throttling only.
        self.throttle_global().await;
        self.inner.answer_callback(callback_id, text).await
    }

    async fn resolve_file_link(&self, file: &FileRef) -> Result<String> {
        self.throttle_global().await;
        self.inner.resolve_file_link(file).await
    }

    async fn set_command_menu(&self, scope: MenuScope, commands: &[MenuCommand]) -> Result<()> {
        self.throttle_global().await;
        self.inner.set_command_menu(scope, commands).await
    }
}

//! Best-effort delivery of one payload to many chats.

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use tokio::{sync::Semaphore, task::JoinSet, time::timeout};

use crate::{
    domain::ChatId,
    errors::Error,
    messaging::{
        port::ChatTransport,
        types::{FileRef, TextFormat},
    },
    store::{collections, DocumentStore},
    Result,
};

#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Text { text: String, format: TextFormat },
    File { file: FileRef, caption: Option<String> },
    Poll { question: String, options: Vec<String> },
}

impl Payload {
    pub fn html(text: impl Into<String>) -> Self {
        Payload::Text {
            text: text.into(),
            format: TextFormat::Html,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Payload::Text { .. } => "text",
            Payload::File { .. } => "file",
            Payload::Poll { .. } => "poll",
        }
    }
}

/// Delivery tally of one fan-out.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub succeeded: usize,
    pub failed: usize,
    pub failed_chats: Vec<ChatId>,
}

impl FanOutReport {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }

    /// "✅ Delivered to 3 of 4 chats (1 failed)."
    pub fn summary(&self) -> String {
        if self.failed == 0 {
            format!("✅ Delivered to {} of {} chats.", self.succeeded, self.total())
        } else {
            format!(
                "✅ Delivered to {} of {} chats ({} failed).",
                self.succeeded,
                self.total(),
                self.failed
            )
        }
    }
}

#[derive(Clone)]
pub struct FanOut {
    transport: Arc<dyn ChatTransport>,
    per_recipient_timeout: Duration,
    concurrency: usize,
}

impl FanOut {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        per_recipient_timeout: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            transport,
            per_recipient_timeout,
            concurrency: concurrency.max(1),
        }
    }

    /// Deliver `payload` to every distinct chat in `recipients`.
    ///
    /// Each recipient is independent: an error or a timeout is logged and
    /// counted, and never stops delivery to the others.
    pub async fn fan_out(
        &self,
        recipients: impl IntoIterator<Item = ChatId>,
        payload: &Payload,
    ) -> FanOutReport {
        let recipients: BTreeSet<ChatId> = recipients.into_iter().collect();
        let payload = Arc::new(payload.clone());
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for chat_id in recipients {
            let transport = self.transport.clone();
            let payload = payload.clone();
            let semaphore = semaphore.clone();
            let limit = self.per_recipient_timeout;

            tasks.spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => match timeout(limit, deliver(&*transport, chat_id, &payload)).await {
                        Ok(res) => res,
                        Err(_) => Err(Error::Transport(format!(
                            "delivery timed out after {}ms",
                            limit.as_millis()
                        ))),
                    },
                    Err(e) => Err(Error::External(format!("fan-out semaphore closed: {e}"))),
                };
                (chat_id, outcome)
            });
        }

        let mut report = FanOutReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => report.succeeded += 1,
                Ok((chat_id, Err(e))) => {
                    tracing::warn!(
                        chat_id = chat_id.0,
                        kind = payload.kind(),
                        error = %e,
                        "fan-out delivery failed"
                    );
                    report.failed += 1;
                    report.failed_chats.push(chat_id);
                }
                Err(e) => {
                    tracing::error!(error = %e, "fan-out task panicked");
                    report.failed += 1;
                }
            }
        }
        report.failed_chats.sort();

        tracing::info!(
            kind = payload.kind(),
            succeeded = report.succeeded,
            failed = report.failed,
            "fan-out finished"
        );
        report
    }
}

async fn deliver(transport: &dyn ChatTransport, chat_id: ChatId, payload: &Payload) -> Result<()> {
    match payload {
        Payload::Text { text, format } => {
            transport.send_text(chat_id, text, *format).await?;
        }
        Payload::File { file, caption } => {
            transport.send_file(chat_id, file, caption.as_deref()).await?;
        }
        Payload::Poll { question, options } => {
            transport.send_poll(chat_id, question, options).await?;
        }
    }
    Ok(())
}

/// Chat ids of every registered user. User records are keyed by user id,
/// which equals the private chat id.
pub async fn all_user_chats(store: &dyn DocumentStore) -> Result<Vec<ChatId>> {
    let keys = store.list_keys(collections::USERS).await?;
    Ok(keys
        .iter()
        .filter_map(|k| {
            let parsed = ChatId::parse_key(k);
            if parsed.is_none() {
                tracing::warn!(key = %k, "ignoring non-numeric users key");
            }
            parsed
        })
        .collect())
}

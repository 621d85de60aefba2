use std::sync::Arc;

use serde_json::{json, Value};

use crate::{
    domain::ChatId,
    store::{collections, DocumentStore, Record},
    Result,
};

/// Admin check backed by `admins/<chat id>`.
///
/// Nothing is cached: promotions made at runtime (by `/make_admin` or by
/// editing the database) apply to the very next update.
#[derive(Clone)]
pub struct RoleGate {
    store: Arc<dyn DocumentStore>,
}

impl RoleGate {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn is_privileged(&self, chat_id: ChatId) -> Result<bool> {
        let record = self
            .store
            .get_record(collections::ADMINS, &chat_id.key())
            .await?;
        Ok(record.as_ref().map(grants_privilege).unwrap_or(false))
    }

    pub async fn grant(&self, chat_id: ChatId) -> Result<()> {
        let mut record = Record::new();
        record.insert("value".to_string(), json!(true));
        self.store
            .put_record(collections::ADMINS, &chat_id.key(), record)
            .await?;
        tracing::info!(chat_id = chat_id.0, "admin role granted");
        Ok(())
    }

    /// Every chat currently holding the role.
    pub async fn privileged_chats(&self) -> Result<Vec<ChatId>> {
        let mut out = Vec::new();
        for key in self.store.list_keys(collections::ADMINS).await? {
            let Some(chat_id) = ChatId::parse_key(&key) else {
                tracing::warn!(key = %key, "ignoring non-numeric admins key");
                continue;
            };
            if self.is_privileged(chat_id).await? {
                out.push(chat_id);
            }
        }
        Ok(out)
    }
}

/// `admins/<id> = true` is stored as `{"value": true}`. Any other record
/// counts as a grant unless it carries an explicit `false`.
fn grants_privilege(record: &Record) -> bool {
    !matches!(record.get("value"), Some(Value::Bool(false)))
}

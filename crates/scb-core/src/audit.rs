use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::Utc;
use serde::Serialize;

use crate::{domain::ChatId, errors::Error, messaging::types::Sender, Result};

const AUDIT_MAX_TEXT: usize = 500;

/// One line of the audit trail: admin actions, completed flows, refusals
/// and failures.
#[derive(Clone, Debug, Default, Serialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<f64>,
}

impl AuditEvent {
    fn base(event: &str, chat_id: ChatId, sender: &Sender) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            event: event.to_string(),
            chat_id: Some(chat_id.0),
            user_id: Some(sender.user_id.0),
            username: sender.username.clone(),
            ..Default::default()
        }
    }

    pub fn command(chat_id: ChatId, sender: &Sender, token: &str, args: &str) -> Self {
        Self {
            action: Some(token.to_string()),
            detail: (!args.is_empty()).then(|| args.to_string()),
            ..Self::base("command", chat_id, sender)
        }
    }

    pub fn flow_completed(chat_id: ChatId, sender: &Sender, flow: &str, detail: &str) -> Self {
        Self {
            action: Some(flow.to_string()),
            detail: Some(detail.to_string()),
            ..Self::base("flow_completed", chat_id, sender)
        }
    }

    pub fn unauthorized(chat_id: ChatId, sender: &Sender, action: &str) -> Self {
        Self {
            action: Some(action.to_string()),
            ..Self::base("unauthorized", chat_id, sender)
        }
    }

    pub fn failure(chat_id: ChatId, sender: &Sender, action: &str, error: &str) -> Self {
        Self {
            action: Some(action.to_string()),
            error: Some(error.to_string()),
            ..Self::base("failure", chat_id, sender)
        }
    }

    pub fn rate_limit(chat_id: ChatId, sender: &Sender, retry_after: f64) -> Self {
        Self {
            retry_after: Some(retry_after),
            ..Self::base("rate_limit", chat_id, sender)
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuditLogger {
    path: PathBuf,
    json: bool,
}

impl AuditLogger {
    pub fn new(path: impl Into<PathBuf>, json: bool) -> Self {
        Self {
            path: path.into(),
            json,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, mut event: AuditEvent) -> Result<()> {
        if let Some(s) = &event.detail {
            event.detail = Some(truncate_text(s, AUDIT_MAX_TEXT));
        }
        if let Some(s) = &event.error {
            event.error = Some(truncate_text(s, AUDIT_MAX_TEXT));
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        if self.json {
            let line = serde_json::to_string(&event)?;
            writeln!(file, "{line}")?;
            return Ok(());
        }

        let mut out = String::new();
        out.push('\n');
        out.push_str(&"=".repeat(60));

        let value = serde_json::to_value(&event)?;
        let Some(obj) = value.as_object() else {
            return Err(Error::External(
                "audit event is not a JSON object".to_string(),
            ));
        };
        for (k, v) in obj {
            out.push('\n');
            out.push_str(k);
            out.push_str(": ");
            out.push_str(&json_value_to_display(v));
        }
        out.push('\n');

        file.write_all(out.as_bytes())?;
        Ok(())
    }

    /// `write`, logging instead of returning the error. Audit failures never
    /// affect the update being handled.
    pub fn record(&self, event: AuditEvent) {
        if let Err(e) = self.write(event) {
            tracing::warn!(path = %self.path.display(), error = %e, "audit write failed");
        }
    }
}

pub fn truncate_text(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let mut out = s.chars().take(max_len).collect::<String>();
    out.push_str("...");
    out
}

fn json_value_to_display(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::Null => "null".to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.to_string(),
        other => serde_json::to_string(other).unwrap_or_else(|_| "<unprintable>".to_string()),
    }
}

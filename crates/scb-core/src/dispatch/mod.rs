//! Inbound dispatcher: the single entry point for every update.
//!
//! Priority, per update:
//! 1. per-user rate limit;
//! 2. self-contained callback actions (timetable, poll type, older announcements);
//! 3. the chat's active session, if any (flows win over commands);
//! 4. the command registry, then the plain-text acknowledgment.
//!
//! The chat's session slot stays locked while its update is handled, so one
//! chat's updates are processed in order and other chats are not held up.

mod commands;
mod completion;
#[cfg(test)]
mod tests;

use std::{borrow::Cow, sync::Arc, time::Duration};

use tokio::sync::Mutex;

use crate::{
    audit::{AuditEvent, AuditLogger},
    config::Config,
    domain::ChatId,
    errors::Error,
    fanout::FanOut,
    flows::{Capture, Expect, FlowKind, StepInput, STEP_CALLBACK_PREFIX},
    formatting::escape_html,
    messaging::{
        port::ChatTransport,
        types::{
            CallbackQuery, IncomingUpdate, InlineButton, InlineKeyboard, MenuScope, Sender,
            TextFormat,
        },
    },
    ratelimit::RateLimiter,
    registry::{CommandRegistry, Immediate, Resolution, Role, StartAction},
    roles::RoleGate,
    session::{Captured, Session, SessionSlot, SessionStore},
    store::DocumentStore,
    Result,
};

pub(crate) const GENERIC_FAILURE: &str =
    "⚠️ Something went wrong on our side. Please try again in a moment.";
const EXPIRED_BUTTON: &str = "This button has expired.";

/// What the dispatcher did with one update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// An immediate command or self-contained button ran.
    Immediate(Immediate),
    /// A new session was created at step 0.
    Started(FlowKind),
    /// The active session moved to `step`.
    Advanced { flow: FlowKind, step: usize },
    /// The input did not satisfy the current step; nothing changed.
    Rejected,
    /// The last step was captured and the completion action ran.
    Completed(FlowKind),
    Cancelled,
    /// A collaborator failed; the user got the generic failure message.
    Failed,
    Unauthorized,
    NotFound,
    UnknownCommand,
    /// Plain text outside any flow.
    Passthrough,
    Ignored,
    RateLimited,
}

#[derive(Clone, Debug)]
pub struct DispatchSettings {
    pub registration_observer: Option<ChatId>,
    pub announcement_page_size: usize,
    pub button_label_max_length: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            registration_observer: None,
            announcement_page_size: 10,
            button_label_max_length: 30,
        }
    }
}

impl From<&Config> for DispatchSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            registration_observer: cfg.registration_observer_chat_id.map(ChatId),
            announcement_page_size: cfg.announcement_page_size,
            button_label_max_length: cfg.button_label_max_length,
        }
    }
}

pub struct Dispatcher {
    transport: Arc<dyn ChatTransport>,
    store: Arc<dyn DocumentStore>,
    sessions: Arc<SessionStore>,
    registry: CommandRegistry,
    roles: RoleGate,
    fanout: FanOut,
    rate_limiter: Mutex<RateLimiter>,
    audit: Option<AuditLogger>,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        store: Arc<dyn DocumentStore>,
        sessions: Arc<SessionStore>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            fanout: FanOut::new(transport.clone(), Duration::from_secs(5), 8),
            roles: RoleGate::new(store.clone()),
            registry: CommandRegistry::standard(),
            rate_limiter: Mutex::new(RateLimiter::disabled()),
            audit: None,
            transport,
            store,
            sessions,
            settings,
        }
    }

    /// Wire everything the way `cfg` describes.
    pub fn from_config(
        cfg: &Config,
        transport: Arc<dyn ChatTransport>,
        store: Arc<dyn DocumentStore>,
        sessions: Arc<SessionStore>,
    ) -> Self {
        let fanout = FanOut::new(
            transport.clone(),
            cfg.fanout_recipient_timeout,
            cfg.fanout_concurrency,
        );
        Self::new(transport, store, sessions, DispatchSettings::from(cfg))
            .with_fanout(fanout)
            .with_rate_limiter(RateLimiter::new(
                cfg.rate_limit_enabled,
                cfg.rate_limit_requests,
                cfg.rate_limit_window,
            ))
            .with_audit(AuditLogger::new(cfg.audit_log_path.clone(), cfg.audit_log_json))
    }

    pub fn with_fanout(mut self, fanout: FanOut) -> Self {
        self.fanout = fanout;
        self
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.rate_limiter = Mutex::new(limiter);
        self
    }

    pub fn with_audit(mut self, audit: AuditLogger) -> Self {
        self.audit = Some(audit);
        self
    }

    #[cfg(test)]
    pub(crate) fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    #[cfg(test)]
    pub(crate) fn roles(&self) -> &RoleGate {
        &self.roles
    }

    /// Install the public command menu, then the admin menu of every
    /// current admin. Returns how many admin menus were set.
    pub async fn publish_command_menus(&self) -> Result<usize> {
        self.transport
            .set_command_menu(MenuScope::Default, &self.registry.menu(Role::Any))
            .await?;

        let mut installed = 0usize;
        for chat_id in self.roles.privileged_chats().await? {
            if self.publish_admin_menu(chat_id).await {
                installed += 1;
            }
        }
        tracing::info!(admins = installed, "command menus published");
        Ok(installed)
    }

    /// Failures are only logged; `/admin` still lists the commands.
    pub(crate) async fn publish_admin_menu(&self, chat_id: ChatId) -> bool {
        let menu = self.registry.menu(Role::Admin);
        match self
            .transport
            .set_command_menu(MenuScope::Chat(chat_id), &menu)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(chat_id = chat_id.0, error = %e, "admin command menu not set");
                false
            }
        }
    }

    /// Handle one inbound update. Never fails: every error is turned into a
    /// message to the acting chat and an `Outcome`.
    pub async fn handle(&self, update: IncomingUpdate) -> Outcome {
        let chat_id = update.chat_id();
        let sender = update.sender().clone();

        if let Some(outcome) = self.enforce_rate_limit(&update).await {
            return outcome;
        }

        let result = match &update {
            IncomingUpdate::Callback(q) => self.handle_callback(q).await,
            _ => self.handle_message(&update).await,
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => self.report_error(chat_id, &sender, update.kind(), e).await,
        };

        tracing::debug!(
            chat_id = chat_id.0,
            kind = update.kind(),
            outcome = ?outcome,
            "update handled"
        );
        outcome
    }

    async fn enforce_rate_limit(&self, update: &IncomingUpdate) -> Option<Outcome> {
        let sender = update.sender();
        let verdict = { self.rate_limiter.lock().await.check(sender.user_id) };
        let Err(retry_after) = verdict else {
            return None;
        };

        let chat_id = update.chat_id();
        tracing::info!(
            chat_id = chat_id.0,
            user_id = sender.user_id.0,
            retry_after_secs = retry_after.as_secs_f64(),
            "rate limited"
        );
        self.audit(AuditEvent::rate_limit(chat_id, sender, retry_after.as_secs_f64()));

        let text = format!(
            "⏳ Slow down a little. Try again in {}s.",
            retry_after.as_secs().max(1)
        );
        match update {
            IncomingUpdate::Callback(q) => self.answer(&q.callback_id, Some(&text)).await,
            _ => self.reply(chat_id, &text).await,
        }
        Some(Outcome::RateLimited)
    }

    async fn report_error(&self, chat_id: ChatId, sender: &Sender, kind: &str, e: Error) -> Outcome {
        match e {
            Error::Unauthorized(msg) => {
                self.reply(chat_id, &msg).await;
                Outcome::Unauthorized
            }
            Error::NotFound(msg) => {
                self.reply(chat_id, &msg).await;
                Outcome::NotFound
            }
            Error::Validation(msg) => {
                self.reply(chat_id, &msg).await;
                Outcome::Rejected
            }
            other => {
                tracing::error!(chat_id = chat_id.0, kind, error = %other, "update failed");
                self.audit(AuditEvent::failure(chat_id, sender, kind, &other.to_string()));
                self.reply(chat_id, GENERIC_FAILURE).await;
                Outcome::Failed
            }
        }
    }

    // ============== Callbacks ==============

    async fn handle_callback(&self, q: &CallbackQuery) -> Result<Outcome> {
        let (prefix, value) = q.data.split_once(':').unwrap_or((q.data.as_str(), ""));

        let result = match prefix {
            "timetable" => self.send_timetable(q.chat_id, value).await,
            "ann" => match value.strip_prefix("older:").and_then(|v| v.parse::<i64>().ok()) {
                Some(before) => self.send_announcements(q.chat_id, Some(before)).await,
                None => Ok(Outcome::Ignored),
            },
            "poll" => self.start_poll_flow(q.chat_id, &q.sender, value).await,
            p if p == STEP_CALLBACK_PREFIX => {
                let mut slot = self.sessions.lock(q.chat_id).await;
                if slot.is_active() {
                    self.continue_flow(&mut slot, q.chat_id, &q.sender, StepInput::Choice(value))
                        .await
                } else {
                    Ok(Outcome::Ignored)
                }
            }
            _ => Ok(Outcome::Ignored),
        };

        let note = match &result {
            Ok(Outcome::Ignored) => Some(EXPIRED_BUTTON),
            _ => None,
        };
        self.answer(&q.callback_id, note).await;
        result
    }

    async fn start_poll_flow(&self, chat_id: ChatId, sender: &Sender, kind: &str) -> Result<Outcome> {
        let flow = match kind {
            "yes_no" => FlowKind::YesNoPoll,
            "multiple_choice" => FlowKind::MultipleChoicePoll,
            _ => return Ok(Outcome::Ignored),
        };
        self.require_admin(chat_id, sender, "create_poll").await?;

        let mut slot = self.sessions.lock(chat_id).await;
        if slot.is_active() {
            return Err(Error::Validation(
                "You're in the middle of something. Finish it or send /cancel first.".to_string(),
            ));
        }
        self.start_flow(&mut slot, chat_id, sender, flow, Captured::new())
            .await
    }

    // ============== Messages ==============

    async fn handle_message(&self, update: &IncomingUpdate) -> Result<Outcome> {
        let chat_id = update.chat_id();
        let sender = update.sender();
        let mut slot = self.sessions.lock(chat_id).await;

        if slot.is_active() {
            let input = match update {
                IncomingUpdate::Text(m) => StepInput::Text(&m.text),
                IncomingUpdate::Photo(m) => StepInput::Photo { file: &m.file },
                IncomingUpdate::Document(m) => StepInput::Document {
                    file: &m.file,
                    file_name: m.file_name.as_deref(),
                },
                IncomingUpdate::Callback(_) => return Ok(Outcome::Ignored),
            };
            return self.continue_flow(&mut slot, chat_id, sender, input).await;
        }

        match update {
            IncomingUpdate::Text(m) => self.run_command(&mut slot, chat_id, sender, &m.text).await,
            _ => Ok(Outcome::Ignored),
        }
    }

    async fn run_command(
        &self,
        slot: &mut SessionSlot,
        chat_id: ChatId,
        sender: &Sender,
        text: &str,
    ) -> Result<Outcome> {
        let (entry, args) = match self.registry.resolve(text) {
            Resolution::Command { entry, args } => (entry, args),
            Resolution::Unknown(token) => {
                self.reply(
                    chat_id,
                    &format!(
                        "🤔 I don't know /{}. Send /help to see what I can do.",
                        escape_html(&token)
                    ),
                )
                .await;
                return Ok(Outcome::UnknownCommand);
            }
            Resolution::NotACommand => {
                self.reply(chat_id, "Received your message").await;
                return Ok(Outcome::Passthrough);
            }
        };

        if entry.role == Role::Admin {
            self.require_admin(chat_id, sender, entry.token).await?;
            self.audit(AuditEvent::command(chat_id, sender, entry.token, &args));
        }
        tracing::info!(chat_id = chat_id.0, command = entry.token, "command");

        match entry.action {
            StartAction::Flow(kind) => {
                self.start_flow(slot, chat_id, sender, kind, Captured::new())
                    .await
            }
            StartAction::Immediate(cmd) => self.run_immediate(cmd, chat_id, sender, &args).await,
        }
    }

    async fn require_admin(&self, chat_id: ChatId, sender: &Sender, action: &str) -> Result<()> {
        if self.roles.is_privileged(chat_id).await? {
            return Ok(());
        }
        tracing::info!(chat_id = chat_id.0, action, "admin command refused");
        self.audit(AuditEvent::unauthorized(chat_id, sender, action));
        Err(Error::Unauthorized(
            "⛔ Sorry, this command is only available to council admins.".to_string(),
        ))
    }

    // ============== Flows ==============

    async fn start_flow(
        &self,
        slot: &mut SessionSlot,
        chat_id: ChatId,
        sender: &Sender,
        kind: FlowKind,
        captured: Captured,
    ) -> Result<Outcome> {
        if kind == FlowKind::ProfileUpdate && self.load_profile(sender).await?.is_none() {
            return Err(Error::NotFound(
                "You're not registered yet. Send /start to register first.".to_string(),
            ));
        }

        let session = Session::start_with(chat_id, kind, captured);
        let prompt = self.prompt_for(&session);
        let keyboard = session
            .current_step()
            .keyboard(self.settings.button_label_max_length);
        slot.put(session);

        if let Err(e) = self.send_prompt(chat_id, &prompt, keyboard).await {
            slot.take();
            return Err(e);
        }
        tracing::info!(chat_id = chat_id.0, flow = kind.name(), "flow started");
        Ok(Outcome::Started(kind))
    }

    async fn continue_flow(
        &self,
        slot: &mut SessionSlot,
        chat_id: ChatId,
        sender: &Sender,
        input: StepInput<'_>,
    ) -> Result<Outcome> {
        let Some(session) = slot.get_mut() else {
            return Ok(Outcome::Ignored);
        };
        let step = session.current_step();

        match step.capture(input) {
            Capture::Cancel => {
                if let Some(s) = slot.take() {
                    tracing::info!(chat_id = chat_id.0, flow = s.flow().name(), "flow cancelled");
                }
                self.reply(chat_id, "❌ Cancelled. Send /help to see what I can do.")
                    .await;
                Ok(Outcome::Cancelled)
            }
            Capture::Invalid(msg) => {
                match step.keyboard(self.settings.button_label_max_length) {
                    Some(kb) if matches!(step.expects, Expect::Choice { .. }) => {
                        if let Err(e) = self.transport.send_choice(chat_id, &msg, kb).await {
                            tracing::warn!(chat_id = chat_id.0, error = %e, "re-prompt failed");
                        }
                    }
                    _ => self.reply(chat_id, &msg).await,
                }
                Ok(Outcome::Rejected)
            }
            Capture::Value(value) => {
                session.capture(value);

                if !session.is_last_step() {
                    session.advance();
                    let flow = session.flow();
                    let step_index = session.step_index();
                    let prompt = self.prompt_for(session);
                    let keyboard = session
                        .current_step()
                        .keyboard(self.settings.button_label_max_length);

                    if let Err(e) = self.send_prompt(chat_id, &prompt, keyboard).await {
                        slot.take();
                        return Err(e);
                    }
                    return Ok(Outcome::Advanced {
                        flow,
                        step: step_index,
                    });
                }

                // Cleared before completion runs: a failed completion must not
                // leave the chat stuck on the last step.
                let Some(done) = slot.take() else {
                    return Ok(Outcome::Ignored);
                };
                let flow = done.flow();
                match self.complete(&done, sender).await {
                    Ok(detail) => {
                        tracing::info!(chat_id = chat_id.0, flow = flow.name(), "flow completed");
                        self.audit(AuditEvent::flow_completed(chat_id, sender, flow.name(), &detail));
                        Ok(Outcome::Completed(flow))
                    }
                    Err(e) => {
                        tracing::warn!(
                            chat_id = chat_id.0,
                            flow = flow.name(),
                            error = %e,
                            "flow completion failed; session cleared"
                        );
                        Err(e)
                    }
                }
            }
        }
    }

    fn prompt_for(&self, session: &Session) -> Cow<'static, str> {
        let step = session.current_step();
        if session.flow() == FlowKind::ProfileUpdate && step.field == "value" {
            let first = &session.definition().steps[0];
            if let Some(label) = session.text(first.field).and_then(|v| first.label_of(v)) {
                return Cow::Owned(format!("Send your new <b>{}</b>:", label.to_lowercase()));
            }
        }
        Cow::Borrowed(step.prompt)
    }

    async fn send_prompt(
        &self,
        chat_id: ChatId,
        prompt: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<()> {
        match keyboard {
            Some(kb) => self.transport.send_choice(chat_id, prompt, kb).await?,
            None => self.transport.send_text(chat_id, prompt, TextFormat::Html).await?,
        };
        Ok(())
    }

    // ============== Helpers ==============

    /// Best-effort HTML reply; a failed send is logged.
    pub(crate) async fn reply(&self, chat_id: ChatId, text: &str) {
        if let Err(e) = self.transport.send_text(chat_id, text, TextFormat::Html).await {
            tracing::warn!(chat_id = chat_id.0, error = %e, "reply failed");
        }
    }

    async fn answer(&self, callback_id: &str, text: Option<&str>) {
        if let Err(e) = self.transport.answer_callback(callback_id, text).await {
            tracing::warn!(error = %e, "answer_callback failed");
        }
    }

    fn audit(&self, event: AuditEvent) {
        if let Some(audit) = &self.audit {
            audit.record(event);
        }
    }

    fn keyboard(&self, prefix: &str, options: &[(&str, &str)]) -> InlineKeyboard {
        InlineKeyboard::one_per_row(prefix, options, self.settings.button_label_max_length)
    }

    fn single_button(label: &str, data: String) -> InlineKeyboard {
        InlineKeyboard::new(vec![InlineButton::new(label, data)])
    }
}

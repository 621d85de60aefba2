//! Completion actions: what each flow does once its last step is captured.

use chrono::Utc;
use serde_json::Value;

use crate::{
    domain::ChatId,
    errors::Error,
    fanout::{all_user_chats, FanOutReport, Payload},
    flows::{split_poll_options, FlowKind, PROFILE_FIELDS, TIMETABLE_KINDS},
    formatting::escape_html,
    messaging::types::{Sender, TextFormat},
    records::{Announcement, Event, Faq, LostItem, StoredFile, Suggestion, UserProfile},
    session::{CapturedValue, Session},
    store::{collections, from_record, to_record, Record},
    Result,
};

use super::Dispatcher;

impl Dispatcher {
    /// Run the completion action of a finished session. Returns a short
    /// detail line for the audit log.
    pub(super) async fn complete(&self, session: &Session, sender: &Sender) -> Result<String> {
        let chat_id = session.chat_id();
        match session.flow() {
            FlowKind::Registration => self.complete_registration(chat_id, session, sender).await,
            FlowKind::ProfileUpdate => self.complete_profile_update(chat_id, session, sender).await,
            FlowKind::Contact => self.complete_contact(chat_id, session, sender).await,
            FlowKind::AddEvent => self.complete_add_event(chat_id, session).await,
            FlowKind::AddFaq => self.complete_add_faq(chat_id, session).await,
            FlowKind::FileUpload => self.complete_file_upload(chat_id, session, sender).await,
            FlowKind::Broadcast => self.complete_broadcast(chat_id, session, sender).await,
            FlowKind::LostAndFound => self.complete_lost_and_found(chat_id, session, sender).await,
            FlowKind::YesNoPoll | FlowKind::MultipleChoicePoll => {
                self.complete_poll(chat_id, session).await
            }
            FlowKind::Suggestion => self.complete_suggestion(chat_id, session).await,
        }
    }

    pub(super) async fn load_profile(&self, sender: &Sender) -> Result<Option<UserProfile>> {
        let Some(record) = self
            .store
            .get_record(collections::USERS, &sender.user_id.key())
            .await?
        else {
            return Ok(None);
        };
        Ok(Some(from_record(record)?))
    }

    async fn complete_registration(
        &self,
        chat_id: ChatId,
        session: &Session,
        sender: &Sender,
    ) -> Result<String> {
        let user = UserProfile {
            first_name: field(session, "first_name")?,
            last_name: field(session, "last_name")?,
            matric_number: field(session, "matric_number")?,
            level: field(session, "level")?,
            username: sender.username.clone().unwrap_or_default(),
            is_bot: sender.is_bot,
            joined_at: Utc::now().to_rfc3339(),
        };
        self.store
            .put_record(collections::USERS, &sender.user_id.key(), to_record(&user)?)
            .await?;

        self.reply(
            chat_id,
            &format!(
                "✅ Registration complete!\n\nWelcome <b>{}</b>!",
                escape_html(&user.first_name)
            ),
        )
        .await;

        if let Some(observer) = self.settings.registration_observer {
            let note = format!(
                "🆕 New registration: <b>{}</b> ({}, level {})",
                escape_html(&user.full_name()),
                escape_html(&user.matric_number),
                escape_html(&user.level)
            );
            if let Err(e) = self
                .transport
                .send_text(observer, &note, TextFormat::Html)
                .await
            {
                tracing::warn!(observer = observer.0, error = %e, "observer notification failed");
            }
        }

        let hint = match self.roles.is_privileged(chat_id).await {
            Ok(true) => {
                self.publish_admin_menu(chat_id).await;
                "🔐 Welcome Admin! You now have access to admin commands. Send /admin to see them."
            }
            Ok(false) => "👋 Use /help to explore what I can do.",
            Err(e) => {
                tracing::warn!(chat_id = chat_id.0, error = %e, "role check after registration failed");
                "👋 Use /help to explore what I can do."
            }
        };
        self.reply(chat_id, hint).await;

        Ok(format!("user {} registered", sender.user_id.0))
    }

    async fn complete_profile_update(
        &self,
        chat_id: ChatId,
        session: &Session,
        sender: &Sender,
    ) -> Result<String> {
        let name = field(session, "field")?;
        let value = field(session, "value")?;
        let Some((_, label)) = PROFILE_FIELDS.iter().find(|(f, _)| *f == name) else {
            return Err(Error::External(format!("unknown profile field {name}")));
        };

        let mut patch = Record::new();
        patch.insert(name.clone(), Value::String(value.clone()));
        self.store
            .patch_record(collections::USERS, &sender.user_id.key(), patch)
            .await?;

        self.reply(
            chat_id,
            &format!("✅ Your {} is now <b>{}</b>.", label.to_lowercase(), escape_html(&value)),
        )
        .await;
        Ok(format!("updated {name}"))
    }

    async fn complete_contact(
        &self,
        chat_id: ChatId,
        session: &Session,
        sender: &Sender,
    ) -> Result<String> {
        let message = field(session, "message")?;
        let identity = field(session, "identity")?;

        let signature = if identity == "attributed" {
            let (first, last, matric) = match self.load_profile(sender).await? {
                Some(p) => (p.first_name, p.last_name, p.matric_number),
                None => (
                    sender.first_name.clone(),
                    sender.last_name.clone().unwrap_or_default(),
                    "not registered".to_string(),
                ),
            };
            format!(
                "<b>From:</b> {} {} ({})",
                escape_html(&first),
                escape_html(&last),
                escape_html(&matric)
            )
        } else {
            "<i>Sent anonymously</i>".to_string()
        };
        let text = format!(
            "✉️ <b>New message to the council</b>\n\n{}\n\n{}",
            escape_html(&message),
            signature
        );

        let admins = self.roles.privileged_chats().await?;
        let report = self.fanout.fan_out(admins, &Payload::html(text)).await;

        let ack = if report.succeeded > 0 {
            "📨 Your message has been sent to the Student Council."
        } else {
            "⚠️ No council member could be reached right now. Please try again later."
        };
        self.reply(chat_id, ack).await;
        Ok(format!("{identity}; {}", tally(&report)))
    }

    async fn complete_add_event(&self, chat_id: ChatId, session: &Session) -> Result<String> {
        let event = Event {
            title: field(session, "title")?,
            description: field(session, "description")?,
            date: field(session, "date")?,
            created_at: Utc::now().timestamp_millis(),
        };
        self.store
            .push_record(collections::EVENTS, to_record(&event)?)
            .await?;

        let text = format!(
            "📅 <b>New event: {}</b>\n🗓 {}\n\n{}",
            escape_html(&event.title),
            escape_html(&event.date),
            escape_html(&event.description)
        );
        let users = all_user_chats(self.store.as_ref()).await?;
        let report = self.fanout.fan_out(users, &Payload::html(text)).await;

        self.reply(chat_id, &format!("✅ Event saved.\n{}", report.summary()))
            .await;
        Ok(format!("{} on {}; {}", event.title, event.date, tally(&report)))
    }

    async fn complete_add_faq(&self, chat_id: ChatId, session: &Session) -> Result<String> {
        let faq = Faq {
            question: field(session, "question")?,
            answer: field(session, "answer")?,
            created_at: Utc::now().timestamp_millis(),
        };
        self.store
            .push_record(collections::FAQS, to_record(&faq)?)
            .await?;
        self.reply(chat_id, "✅ FAQ added.").await;
        Ok(faq.question)
    }

    async fn complete_file_upload(
        &self,
        chat_id: ChatId,
        session: &Session,
        sender: &Sender,
    ) -> Result<String> {
        let kind = field(session, "kind")?;
        let Some((file, file_name)) = session.captured().get("file").and_then(|v| match v {
            CapturedValue::File { file, file_name } => Some((file, file_name)),
            _ => None,
        }) else {
            return Err(Error::External("file upload finished without a file".to_string()));
        };

        let stored = StoredFile {
            file_id: file.file_id.clone(),
            kind: file.kind.as_str().to_string(),
            file_name: file_name.clone(),
            uploaded_by: sender.user_id.0,
            uploaded_at: Utc::now().timestamp_millis(),
        };
        self.store
            .put_record(collections::FILES, &kind, to_record(&stored)?)
            .await?;

        let label = TIMETABLE_KINDS
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, l)| *l)
            .unwrap_or("Timetable");
        self.reply(chat_id, &format!("✅ {label} uploaded.")).await;
        Ok(format!("files/{kind}"))
    }

    async fn complete_broadcast(
        &self,
        chat_id: ChatId,
        session: &Session,
        sender: &Sender,
    ) -> Result<String> {
        let now = Utc::now();
        let announcement = Announcement {
            message: field(session, "message")?,
            date: now.format("%Y-%m-%d").to_string(),
            timestamp: now.timestamp_millis(),
            posted_by: Some(sender.user_id.0),
        };
        self.store
            .push_record(collections::ANNOUNCEMENTS, to_record(&announcement)?)
            .await?;

        let text = format!(
            "📣 <b>Announcement:</b>\n\n{}",
            escape_html(&announcement.message)
        );
        let users = all_user_chats(self.store.as_ref()).await?;
        let report = self.fanout.fan_out(users, &Payload::html(text)).await;

        let ack = if report.total() == 0 {
            "⚠️ Announcement saved, but no users are registered yet.".to_string()
        } else {
            format!("📣 Announcement sent.\n{}", report.summary())
        };
        self.reply(chat_id, &ack).await;
        Ok(tally(&report))
    }

    async fn complete_lost_and_found(
        &self,
        chat_id: ChatId,
        session: &Session,
        sender: &Sender,
    ) -> Result<String> {
        let Some(photo) = session.captured().get("photo").and_then(|v| v.as_file()) else {
            return Err(Error::External("lost-and-found report finished without a photo".to_string()));
        };
        let description = field(session, "description")?;

        let item = LostItem {
            photo_file_id: photo.file_id.clone(),
            description: description.clone(),
            reported_by: sender.user_id.0,
            timestamp: Utc::now().timestamp_millis(),
        };
        let key = self
            .store
            .push_record(collections::LOST_AND_FOUND, to_record(&item)?)
            .await?;

        let reporter = sender
            .username
            .as_deref()
            .map(|u| format!("@{u}"))
            .unwrap_or_else(|| sender.first_name.clone());
        let caption = format!(
            "🔎 Lost &amp; found report from {}:\n\n{}",
            escape_html(&reporter),
            escape_html(&description)
        );
        let admins = self.roles.privileged_chats().await?;
        let report = self
            .fanout
            .fan_out(
                admins,
                &Payload::File {
                    file: photo.clone(),
                    caption: Some(caption),
                },
            )
            .await;

        self.reply(
            chat_id,
            "✅ Thanks! Your report has been passed on to the council.",
        )
        .await;
        Ok(format!("{key}; {}", tally(&report)))
    }

    async fn complete_poll(&self, chat_id: ChatId, session: &Session) -> Result<String> {
        let question = field(session, "question")?;
        let options = match session.flow() {
            FlowKind::YesNoPoll => vec![field(session, "option_1")?, field(session, "option_2")?],
            _ => split_poll_options(&field(session, "options")?),
        };

        let users = all_user_chats(self.store.as_ref()).await?;
        let report = self
            .fanout
            .fan_out(
                users,
                &Payload::Poll {
                    question: question.clone(),
                    options,
                },
            )
            .await;

        self.reply(chat_id, &format!("🗳 Poll sent.\n{}", report.summary()))
            .await;
        Ok(format!("{question}; {}", tally(&report)))
    }

    async fn complete_suggestion(&self, chat_id: ChatId, session: &Session) -> Result<String> {
        let suggestion = Suggestion {
            message: field(session, "message")?,
            chat_id: chat_id.0,
            timestamp: Utc::now().timestamp_millis(),
        };
        self.store
            .push_record(collections::SUGGESTIONS, to_record(&suggestion)?)
            .await?;
        self.reply(chat_id, "💡 Thanks for the suggestion!").await;
        Ok("suggestion saved".to_string())
    }
}

fn field(session: &Session, name: &str) -> Result<String> {
    session
        .text(name)
        .map(|s| s.to_string())
        .ok_or_else(|| Error::External(format!("session finished without field {name}")))
}

fn tally(report: &FanOutReport) -> String {
    format!("{} delivered, {} failed", report.succeeded, report.failed)
}

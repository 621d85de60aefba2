//! Immediate commands and self-contained button actions.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::{
    domain::ChatId,
    errors::Error,
    flows::TIMETABLE_KINDS,
    formatting::{
        escape_html, join_within, render_announcement, render_contact, render_event, render_faq,
        render_help, render_profile, render_suggestion,
    },
    messaging::types::{FileKind, FileRef, Sender, TextFormat},
    records::{Announcement, Contact, Event, Faq, StoredFile, Suggestion, UserProfile},
    registry::{CommandEntry, Immediate, Role},
    store::{collections, from_record, Keyed},
    Result,
};

use super::{Dispatcher, Outcome};

const LIST_LIMIT: usize = 30;
const POLL_TYPES: &[(&str, &str)] = &[
    ("yes_no", "✅ Yes / No"),
    ("multiple_choice", "🔢 Multiple choice"),
];

impl Dispatcher {
    pub(super) async fn run_immediate(
        &self,
        cmd: Immediate,
        chat_id: ChatId,
        sender: &Sender,
        args: &str,
    ) -> Result<Outcome> {
        match cmd {
            Immediate::Help => {
                let entries: Vec<&CommandEntry> = self.registry.listed(Role::Any).collect();
                let text = render_help(
                    "👋 <b>Welcome to the Student Council Bot!</b>\n\nHere are the commands you can use:",
                    &entries,
                    "<i>Student Council</i>",
                );
                self.reply(chat_id, &text).await;
            }
            Immediate::AdminHelp => {
                let entries: Vec<&CommandEntry> = self.registry.listed(Role::Admin).collect();
                self.reply(chat_id, &render_help("🔐 <b>Admin commands:</b>", &entries, ""))
                    .await;
            }
            Immediate::ViewInfo => {
                let Some(user) = self.load_profile(sender).await? else {
                    return Err(Error::NotFound(
                        "You're not registered yet. Send /start to register.".to_string(),
                    ));
                };
                self.reply(chat_id, &render_profile(&user)).await;
            }
            Immediate::Contacts => {
                let rows = self
                    .store
                    .query_ordered_range(collections::CONTACTS, "name", LIST_LIMIT, None)
                    .await?;
                let contacts: Vec<Contact> = decode_rows(collections::CONTACTS, rows);
                let text = if contacts.is_empty() {
                    "📇 No contacts have been published yet.".to_string()
                } else {
                    let items: Vec<String> = contacts.iter().map(render_contact).collect();
                    self.fit("📇 <b>Council contacts</b>\n\n", &items)
                };
                self.reply(chat_id, &text).await;
            }
            Immediate::Announcements => {
                return self.send_announcements(chat_id, None).await;
            }
            Immediate::Events => {
                let rows = self
                    .store
                    .query_ordered_range(collections::EVENTS, "date", LIST_LIMIT, None)
                    .await?;
                let events: Vec<Event> = decode_rows(collections::EVENTS, rows);
                let text = if events.is_empty() {
                    "📅 No events have been announced yet.".to_string()
                } else {
                    let items: Vec<String> = events.iter().map(render_event).collect();
                    self.fit("📅 <b>Events</b>\n\n", &items)
                };
                self.reply(chat_id, &text).await;
            }
            Immediate::Faq => {
                let rows = self
                    .store
                    .query_ordered_range(collections::FAQS, "created_at", LIST_LIMIT, None)
                    .await?;
                let faqs: Vec<Faq> = decode_rows(collections::FAQS, rows);
                let text = if faqs.is_empty() {
                    "❓ No FAQs yet.".to_string()
                } else {
                    let items: Vec<String> = faqs.iter().map(render_faq).collect();
                    self.fit("❓ <b>Frequently asked questions</b>\n\n", &items)
                };
                self.reply(chat_id, &text).await;
            }
            Immediate::Timetable => {
                let kb = self.keyboard("timetable", TIMETABLE_KINDS);
                self.transport
                    .send_choice(chat_id, "Which timetable would you like to view?", kb)
                    .await?;
            }
            Immediate::CreatePoll => {
                let kb = self.keyboard("poll", POLL_TYPES);
                self.transport
                    .send_choice(chat_id, "What type of poll would you like to create?", kb)
                    .await?;
            }
            Immediate::Users => {
                let n = self.store.list_keys(collections::USERS).await?.len();
                self.reply(chat_id, &format!("👥 Registered users: <b>{n}</b>"))
                    .await;
            }
            Immediate::MakeAdmin => self.make_admin(chat_id, args).await?,
            Immediate::ViewSuggestions => {
                let rows = self
                    .store
                    .query_ordered_range(collections::SUGGESTIONS, "timestamp", 10, None)
                    .await?;
                let mut suggestions: Vec<Suggestion> = decode_rows(collections::SUGGESTIONS, rows);
                suggestions.reverse();
                let text = if suggestions.is_empty() {
                    "💡 No suggestions yet.".to_string()
                } else {
                    let items: Vec<String> = suggestions.iter().map(render_suggestion).collect();
                    self.fit("💡 <b>Latest suggestions</b>\n\n", &items)
                };
                self.reply(chat_id, &text).await;
            }
            Immediate::Cancel => {
                self.reply(chat_id, "Nothing to cancel.").await;
            }
            Immediate::Echo => {
                if args.is_empty() {
                    return Err(Error::Validation("Usage: /echo &lt;text&gt;".to_string()));
                }
                self.transport
                    .send_text(chat_id, args, TextFormat::Plain)
                    .await?;
            }
        }
        Ok(Outcome::Immediate(cmd))
    }

    /// One page of announcements, newest first. `before` pages backwards
    /// from a timestamp (exclusive).
    pub(super) async fn send_announcements(
        &self,
        chat_id: ChatId,
        before: Option<i64>,
    ) -> Result<Outcome> {
        let page_size = self.settings.announcement_page_size;
        let boundary = before.map(|ts| json!(ts));
        // One row past the page tells whether anything older exists.
        let mut rows = self
            .store
            .query_ordered_range(
                collections::ANNOUNCEMENTS,
                "timestamp",
                page_size + 1,
                boundary.as_ref(),
            )
            .await?;
        rows.reverse();
        let has_older = rows.len() > page_size;
        rows.truncate(page_size);

        let oldest = rows
            .last()
            .and_then(|r| r.record.get("timestamp"))
            .and_then(Value::as_i64);
        let announcements: Vec<Announcement> = decode_rows(collections::ANNOUNCEMENTS, rows);

        if announcements.is_empty() {
            let text = if before.is_some() {
                "That's everything: there are no older announcements."
            } else {
                "⚠️ No announcements found."
            };
            self.reply(chat_id, text).await;
            return Ok(Outcome::Immediate(Immediate::Announcements));
        }

        let items: Vec<String> = announcements.iter().map(render_announcement).collect();
        let heading = if before.is_some() {
            "📢 <b>Older announcements</b>\n\n"
        } else {
            "📢 <b>Latest announcements</b>\n\n"
        };
        let text = self.fit(heading, &items);

        match oldest.filter(|_| has_older) {
            Some(ts) => {
                let kb = Self::single_button("⬅️ Older", format!("ann:older:{ts}"));
                self.transport.send_choice(chat_id, &text, kb).await?;
            }
            None => {
                self.transport
                    .send_text(chat_id, &text, TextFormat::Html)
                    .await?;
            }
        }
        Ok(Outcome::Immediate(Immediate::Announcements))
    }

    pub(super) async fn send_timetable(&self, chat_id: ChatId, kind: &str) -> Result<Outcome> {
        let Some((_, label)) = TIMETABLE_KINDS.iter().find(|(k, _)| *k == kind) else {
            return Ok(Outcome::Ignored);
        };

        let Some(record) = self.store.get_record(collections::FILES, kind).await? else {
            return Err(Error::NotFound(format!(
                "⚠️ The {} hasn't been uploaded yet.",
                label.trim_start_matches(|c: char| !c.is_ascii_alphabetic()).to_lowercase()
            )));
        };
        let stored: StoredFile = from_record(record)?;
        let file = FileRef {
            file_id: stored.file_id,
            kind: FileKind::parse(&stored.kind).unwrap_or(FileKind::Document),
        };
        self.transport
            .send_file(chat_id, &file, Some(label))
            .await?;
        Ok(Outcome::Immediate(Immediate::Timetable))
    }

    async fn make_admin(&self, chat_id: ChatId, args: &str) -> Result<()> {
        let matric = args.trim();
        if matric.is_empty() {
            return Err(Error::Validation(
                "Usage: /make_admin &lt;matric number&gt;".to_string(),
            ));
        }

        let hits = self
            .store
            .query_by_field(collections::USERS, "matric_number", &json!(matric))
            .await?;
        let target = match hits.as_slice() {
            [] => {
                return Err(Error::NotFound(format!(
                    "No registered user has matric number <b>{}</b>.",
                    escape_html(matric)
                )))
            }
            [one] => one,
            _ => {
                return Err(Error::Validation(format!(
                    "Several users share matric number <b>{}</b>; fix the records first.",
                    escape_html(matric)
                )))
            }
        };

        let Some(target_chat) = ChatId::parse_key(&target.key) else {
            return Err(Error::External(format!("user key {} is not a chat id", target.key)));
        };
        self.roles.grant(target_chat).await?;
        self.publish_admin_menu(target_chat).await;

        let user: UserProfile = from_record(target.record.clone())?;
        self.reply(
            chat_id,
            &format!(
                "✅ <b>{}</b> ({}) is now an admin.",
                escape_html(&user.full_name()),
                escape_html(matric)
            ),
        )
        .await;
        self.reply(
            target_chat,
            "🔐 You've been made an admin. Send /admin to see your commands.",
        )
        .await;
        Ok(())
    }

    fn fit(&self, heading: &str, items: &[String]) -> String {
        let max = self.transport.capabilities().max_message_len;
        join_within(heading, items, "\n\n", max)
    }
}

/// Decode rows, skipping (and logging) records that don't fit `T`.
fn decode_rows<T: DeserializeOwned>(collection: &str, rows: Vec<Keyed>) -> Vec<T> {
    rows.into_iter()
        .filter_map(|row| match from_record::<T>(row.record) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(collection, key = %row.key, error = %e, "skipping malformed record");
                None
            }
        })
        .collect()
}

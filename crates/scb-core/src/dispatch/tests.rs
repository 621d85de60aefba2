use std::{sync::Arc, time::Duration};

use serde_json::json;

use super::*;
use crate::{
    domain::UserId,
    messaging::{
        testing::{RecordingTransport, Sent},
        types::{DocumentMessage, FileKind, FileRef, PhotoMessage, TextMessage},
    },
    records::UserProfile,
    store::{collections, memory::MemoryStore, to_record, Record},
};

const OBSERVER: ChatId = ChatId(999);
const ADMIN: ChatId = ChatId(100);

struct Harness {
    store: Arc<MemoryStore>,
    transport: Arc<RecordingTransport>,
    dispatcher: Dispatcher,
}

impl Harness {
    fn new() -> Self {
        Self::with_idle_timeout(None)
    }

    fn with_idle_timeout(idle: Option<Duration>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(RecordingTransport::default());
        let settings = DispatchSettings {
            registration_observer: Some(OBSERVER),
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(
            transport.clone(),
            store.clone(),
            Arc::new(SessionStore::new(idle)),
            settings,
        )
        .with_fanout(FanOut::new(transport.clone(), Duration::from_millis(200), 4));
        Self {
            store,
            transport,
            dispatcher,
        }
    }

    async fn text(&self, chat: i64, body: &str) -> Outcome {
        self.dispatcher
            .handle(IncomingUpdate::Text(TextMessage {
                chat_id: ChatId(chat),
                sender: sender(chat),
                text: body.to_string(),
            }))
            .await
    }

    async fn press(&self, chat: i64, data: &str) -> Outcome {
        self.dispatcher
            .handle(IncomingUpdate::Callback(CallbackQuery {
                chat_id: ChatId(chat),
                sender: sender(chat),
                callback_id: format!("cb-{chat}-{data}"),
                data: data.to_string(),
                message: None,
            }))
            .await
    }

    async fn photo(&self, chat: i64, file_id: &str) -> Outcome {
        self.dispatcher
            .handle(IncomingUpdate::Photo(PhotoMessage {
                chat_id: ChatId(chat),
                sender: sender(chat),
                file: FileRef {
                    file_id: file_id.to_string(),
                    kind: FileKind::Photo,
                },
                caption: None,
            }))
            .await
    }

    async fn document(&self, chat: i64, file_id: &str, name: &str) -> Outcome {
        self.dispatcher
            .handle(IncomingUpdate::Document(DocumentMessage {
                chat_id: ChatId(chat),
                sender: sender(chat),
                file: FileRef {
                    file_id: file_id.to_string(),
                    kind: FileKind::Document,
                },
                file_name: Some(name.to_string()),
                mime_type: Some("application/pdf".to_string()),
                caption: None,
            }))
            .await
    }

    async fn session(&self, chat: i64) -> Option<Session> {
        self.dispatcher.sessions().get(ChatId(chat)).await
    }

    async fn grant(&self, chat: ChatId) {
        self.dispatcher.roles().grant(chat).await.unwrap();
    }

    async fn seed_user(&self, chat: i64, first: &str, last: &str, matric: &str, level: &str) {
        let user = UserProfile {
            first_name: first.to_string(),
            last_name: last.to_string(),
            matric_number: matric.to_string(),
            level: level.to_string(),
            ..Default::default()
        };
        self.store
            .put_record(collections::USERS, &chat.to_string(), to_record(&user).unwrap())
            .await
            .unwrap();
    }

    async fn user(&self, chat: i64) -> Option<Record> {
        self.store
            .get_record(collections::USERS, &chat.to_string())
            .await
            .unwrap()
    }

    async fn count(&self, collection: &str) -> usize {
        self.store.list_keys(collection).await.unwrap().len()
    }

    fn texts(&self, chat: i64) -> Vec<String> {
        self.transport.texts_to(ChatId(chat))
    }

    fn last_text(&self, chat: i64) -> String {
        self.transport.last_text_to(ChatId(chat)).unwrap_or_default()
    }

    fn last_keyboard(&self, chat: i64) -> Option<InlineKeyboard> {
        self.transport
            .sent_to(ChatId(chat))
            .into_iter()
            .rev()
            .find_map(|s| match s {
                Sent::Choice { keyboard, .. } => Some(keyboard),
                _ => None,
            })
    }
}

fn sender(id: i64) -> Sender {
    Sender {
        user_id: UserId(id),
        username: Some(format!("user{id}")),
        first_name: format!("Tg{id}"),
        last_name: None,
        is_bot: false,
    }
}

// ============== Registration ==============

#[tokio::test]
async fn registration_walks_four_steps_and_persists_the_profile() {
    let h = Harness::new();

    assert_eq!(h.text(1, "/start").await, Outcome::Started(FlowKind::Registration));
    let s = h.session(1).await.unwrap();
    assert_eq!((s.flow(), s.step_index()), (FlowKind::Registration, 0));

    assert_eq!(
        h.text(1, "Ada").await,
        Outcome::Advanced {
            flow: FlowKind::Registration,
            step: 1
        }
    );
    h.text(1, "Lovelace").await;
    h.text(1, "CU/2021/001").await;
    assert_eq!(h.text(1, "300").await, Outcome::Completed(FlowKind::Registration));

    assert!(h.session(1).await.is_none());
    let user = h.user(1).await.unwrap();
    assert_eq!(user["first_name"], json!("Ada"));
    assert_eq!(user["last_name"], json!("Lovelace"));
    assert_eq!(user["matric_number"], json!("CU/2021/001"));
    assert_eq!(user["level"], json!("300"));
    assert_eq!(user["username"], json!("user1"));

    assert!(h
        .texts(1)
        .iter()
        .any(|t| t.contains("Registration complete") && t.contains("Ada")));
    assert_eq!(h.last_text(1), "👋 Use /help to explore what I can do.");
    assert!(h.last_text(OBSERVER.0).contains("Ada Lovelace"));
}

#[tokio::test]
async fn registering_admin_gets_the_admin_hint() {
    let h = Harness::new();
    h.grant(ChatId(7)).await;

    h.text(7, "/join").await;
    for answer in ["Grace", "Hopper", "CU/2020/010", "400"] {
        h.text(7, answer).await;
    }
    assert!(h.last_text(7).contains("Welcome Admin"));
    let menu = h.transport.menu_for(MenuScope::Chat(ChatId(7))).unwrap();
    assert!(menu.contains(&"send_announcement".to_string()));
}

#[tokio::test]
async fn commands_are_swallowed_while_a_flow_is_active() {
    let h = Harness::new();
    h.text(1, "/start").await;
    h.text(1, "Ada").await;

    assert_eq!(h.text(1, "/help").await, Outcome::Rejected);
    let s = h.session(1).await.unwrap();
    assert_eq!((s.flow(), s.step_index()), (FlowKind::Registration, 1));
    assert!(!h.texts(1).iter().any(|t| t.contains("Here are the commands")));
}

#[tokio::test]
async fn cancel_ends_the_flow_without_side_effects() {
    let h = Harness::new();
    h.text(1, "/start").await;
    h.text(1, "Ada").await;

    assert_eq!(h.text(1, "/cancel").await, Outcome::Cancelled);
    assert!(h.session(1).await.is_none());
    assert!(h.user(1).await.is_none());

    assert_eq!(h.text(1, "/cancel").await, Outcome::Immediate(Immediate::Cancel));
    assert_eq!(h.last_text(1), "Nothing to cancel.");
}

#[tokio::test]
async fn failed_prompt_delivery_does_not_leave_a_session() {
    let h = Harness::new();
    h.transport.fail_for(ChatId(1));
    assert_eq!(h.text(1, "/start").await, Outcome::Failed);
    assert!(h.session(1).await.is_none());
}

// ============== ProfileUpdate ==============

#[tokio::test]
async fn profile_update_patches_only_the_chosen_field() {
    let h = Harness::new();
    h.seed_user(1, "Ada", "Lovelace", "CU/2021/001", "300").await;
    let before = h.user(1).await.unwrap();

    assert_eq!(h.text(1, "/update_info").await, Outcome::Started(FlowKind::ProfileUpdate));
    assert!(h.last_keyboard(1).is_some());
    h.press(1, "step:level").await;
    assert!(h.last_text(1).contains("level"));
    assert_eq!(h.text(1, "400").await, Outcome::Completed(FlowKind::ProfileUpdate));

    let after = h.user(1).await.unwrap();
    assert_eq!(after["level"], json!("400"));
    for (k, v) in &before {
        if k != "level" {
            assert_eq!(after.get(k), Some(v), "{k} changed");
        }
    }
    assert_eq!(after.len(), before.len());
}

#[tokio::test]
async fn profile_update_accepts_typed_field_label() {
    let h = Harness::new();
    h.seed_user(1, "Ada", "Lovelace", "CU/2021/001", "300").await;

    h.text(1, "/update_info").await;
    assert_eq!(
        h.text(1, "Level").await,
        Outcome::Advanced {
            flow: FlowKind::ProfileUpdate,
            step: 1
        }
    );
    h.text(1, "500").await;
    assert_eq!(h.user(1).await.unwrap()["level"], json!("500"));
}

#[tokio::test]
async fn profile_update_without_registration_is_guidance_only() {
    let h = Harness::new();
    assert_eq!(h.text(1, "/update_info").await, Outcome::NotFound);
    assert!(h.session(1).await.is_none());
    assert!(h.last_text(1).contains("/start"));
}

// ============== Contact ==============

async fn contact_harness() -> Harness {
    let h = Harness::new();
    h.grant(ADMIN).await;
    h.grant(ChatId(101)).await;
    h.seed_user(1, "Ada", "Lovelace", "CU/2021/001", "300").await;
    h
}

#[tokio::test]
async fn anonymous_contact_reaches_every_admin_without_identity() {
    let h = contact_harness().await;

    h.text(1, "/contact").await;
    h.text(1, "The library is too cold").await;
    assert_eq!(h.press(1, "step:anonymous").await, Outcome::Completed(FlowKind::Contact));

    for admin in [ADMIN.0, 101] {
        let msg = h.last_text(admin);
        assert!(msg.contains("The library is too cold"));
        assert!(!msg.contains("Ada"));
        assert!(!msg.contains("Lovelace"));
        assert!(!msg.contains("CU/2021/001"));
    }
    assert!(h.last_text(1).contains("sent to the Student Council"));
}

#[tokio::test]
async fn attributed_contact_includes_name_and_matric() {
    let h = contact_harness().await;

    h.text(1, "/contact").await;
    h.text(1, "Thanks for the new benches").await;
    h.press(1, "step:attributed").await;

    let msg = h.last_text(ADMIN.0);
    assert!(msg.contains("Ada"));
    assert!(msg.contains("Lovelace"));
    assert!(msg.contains("CU/2021/001"));
}

#[tokio::test]
async fn identity_must_be_chosen_with_a_button() {
    let h = contact_harness().await;
    h.text(1, "/contact").await;
    h.text(1, "hello").await;

    assert_eq!(h.text(1, "anonymous").await, Outcome::Rejected);
    assert_eq!(h.session(1).await.unwrap().step_index(), 1);
    assert!(h.last_keyboard(1).is_some());
    assert!(h.transport.texts_to(ADMIN).is_empty());
}

// ============== AddEvent and admin gating ==============

#[tokio::test]
async fn add_event_rejects_impossible_date_and_keeps_the_step() {
    let h = Harness::new();
    h.grant(ADMIN).await;
    h.seed_user(1, "Ada", "Lovelace", "CU/2021/001", "300").await;

    h.text(ADMIN.0, "/add_event").await;
    h.text(ADMIN.0, "Freshers' Night").await;
    h.text(ADMIN.0, "Music and food").await;
    let before = h.session(ADMIN.0).await.unwrap();

    assert_eq!(h.text(ADMIN.0, "2025-13-40").await, Outcome::Rejected);
    let after = h.session(ADMIN.0).await.unwrap();
    assert_eq!(after.step_index(), 2);
    assert_eq!(after.captured(), before.captured());
    assert_eq!(h.count(collections::EVENTS).await, 0);
    assert!(h.last_text(ADMIN.0).contains("YYYY-MM-DD"));

    assert_eq!(h.text(ADMIN.0, "2025-10-03").await, Outcome::Completed(FlowKind::AddEvent));
    assert_eq!(h.count(collections::EVENTS).await, 1);
    assert!(h.last_text(1).contains("New event: Freshers' Night"));
}

#[tokio::test]
async fn admin_commands_refuse_ordinary_users_without_a_session() {
    let h = Harness::new();
    for cmd in ["/add_event", "/send_announcement", "/add_faq", "/upload_timetable", "/users"] {
        assert_eq!(h.text(1, cmd).await, Outcome::Unauthorized, "{cmd}");
        assert!(h.session(1).await.is_none());
        assert!(h.last_text(1).contains("only available to council admins"));
    }
    assert_eq!(h.count(collections::EVENTS).await, 0);
}

#[tokio::test]
async fn promotion_applies_on_the_next_update() {
    let h = Harness::new();
    h.seed_user(2, "Alan", "Turing", "CU/2021/002", "200").await;
    h.grant(ADMIN).await;

    assert_eq!(h.text(2, "/users").await, Outcome::Unauthorized);
    assert_eq!(
        h.text(ADMIN.0, "/make_admin CU/2021/002").await,
        Outcome::Immediate(Immediate::MakeAdmin)
    );
    assert!(h.last_text(ADMIN.0).contains("Alan Turing"));
    assert!(h.transport.menu_for(MenuScope::Chat(ChatId(2))).is_some());
    assert_eq!(h.text(2, "/users").await, Outcome::Immediate(Immediate::Users));

    assert_eq!(h.text(ADMIN.0, "/make_admin CU/0000").await, Outcome::NotFound);
    assert_eq!(h.text(ADMIN.0, "/make_admin").await, Outcome::Rejected);
}

#[tokio::test]
async fn command_menus_follow_the_registry() {
    let h = Harness::new();
    h.grant(ADMIN).await;
    h.grant(ChatId(5)).await;
    h.transport.fail_for(ChatId(5));

    assert_eq!(h.dispatcher.publish_command_menus().await.unwrap(), 1);

    let public = h.transport.menu_for(MenuScope::Default).unwrap();
    assert_eq!(public[0], "start");
    assert!(public.contains(&"timetable".to_string()));
    assert!(!public.contains(&"make_admin".to_string()));
    assert!(!public.contains(&"join".to_string()));

    let admin = h.transport.menu_for(MenuScope::Chat(ADMIN)).unwrap();
    assert_eq!(&admin[..public.len()], &public[..]);
    assert!(admin.contains(&"make_admin".to_string()));
    assert!(h.transport.menu_for(MenuScope::Chat(ChatId(5))).is_none());
}

// ============== Failures ==============

#[tokio::test]
async fn store_failure_on_the_last_step_clears_the_session() {
    let h = Harness::new();
    h.grant(ADMIN).await;
    h.text(ADMIN.0, "/add_faq").await;
    h.text(ADMIN.0, "When do exams start?").await;

    h.store.set_unavailable(true);
    assert_eq!(h.text(ADMIN.0, "In May").await, Outcome::Failed);
    assert!(h.session(ADMIN.0).await.is_none());
    assert_eq!(h.last_text(ADMIN.0), GENERIC_FAILURE);

    h.store.set_unavailable(false);
    assert_eq!(h.count(collections::FAQS).await, 0);
}

#[tokio::test]
async fn store_failure_while_starting_is_reported() {
    let h = Harness::new();
    h.store.set_unavailable(true);
    assert_eq!(h.text(1, "/add_event").await, Outcome::Failed);
    assert!(h.session(1).await.is_none());
}

// ============== Broadcast ==============

#[tokio::test]
async fn broadcast_reports_delivery_tally() {
    let h = Harness::new();
    h.grant(ADMIN).await;
    for chat in 1..=5 {
        h.seed_user(chat, "U", "Ser", &format!("CU/{chat}"), "100").await;
    }
    h.transport.fail_for(ChatId(3));
    h.transport.fail_for(ChatId(5));

    assert_eq!(h.text(ADMIN.0, "/send_announcement").await, Outcome::Started(FlowKind::Broadcast));
    assert_eq!(
        h.text(ADMIN.0, "Hello <all>").await,
        Outcome::Completed(FlowKind::Broadcast)
    );

    for ok in [1, 2, 4] {
        assert_eq!(h.texts(ok), vec!["📣 <b>Announcement:</b>\n\nHello &lt;all&gt;"]);
    }
    assert!(h.last_text(ADMIN.0).contains("3 of 5 chats (2 failed)"));
    assert_eq!(h.count(collections::ANNOUNCEMENTS).await, 1);
}

// ============== Announcements paging ==============

#[tokio::test]
async fn announcement_pages_never_overlap() {
    let h = Harness::new();
    for i in 0..25i64 {
        let rec = to_record(&json!({
            "message": format!("notice {i:02}"),
            "date": "2025-01-01",
            "timestamp": 1_000 + i,
        }))
        .unwrap();
        h.store.push_record(collections::ANNOUNCEMENTS, rec).await.unwrap();
    }

    let page = |text: &str| -> Vec<i64> {
        (0..25).filter(|i| text.contains(&format!("notice {i:02}"))).collect()
    };

    h.text(1, "/announcements").await;
    let first = page(&h.last_text(1));
    assert_eq!(first, (15..25).collect::<Vec<_>>());
    let text = h.last_text(1);
    assert!(text.find("notice 24").unwrap() < text.find("notice 15").unwrap());
    let kb = h.last_keyboard(1).unwrap();
    assert_eq!(kb.buttons[0].callback_data, "ann:older:1015");

    h.transport.clear();
    h.press(1, "ann:older:1015").await;
    let second = page(&h.last_text(1));
    assert_eq!(second, (5..15).collect::<Vec<_>>());
    assert!(second.iter().all(|i| !first.contains(i)));

    h.transport.clear();
    h.press(1, "ann:older:1005").await;
    assert_eq!(page(&h.last_text(1)), (0..5).collect::<Vec<_>>());
    assert!(h.last_keyboard(1).is_none());
}

#[tokio::test]
async fn older_button_only_when_older_announcements_exist() {
    let h = Harness::new();
    let post = |i: i64| {
        to_record(&json!({
            "message": format!("notice {i:02}"),
            "date": "2025-01-01",
            "timestamp": 2_000 + i,
        }))
        .unwrap()
    };
    for i in 0..10i64 {
        h.store.push_record(collections::ANNOUNCEMENTS, post(i)).await.unwrap();
    }

    // Exactly one page: nothing to page back to.
    h.text(1, "/announcements").await;
    assert!(h.last_text(1).contains("notice 00"));
    assert!(h.last_keyboard(1).is_none());

    h.store.push_record(collections::ANNOUNCEMENTS, post(10)).await.unwrap();
    h.text(1, "/announcements").await;
    assert!(!h.last_text(1).contains("notice 00"));
    let kb = h.last_keyboard(1).unwrap();
    assert_eq!(kb.buttons[0].callback_data, "ann:older:2001");
}

// ============== Idle timeout ==============

#[tokio::test(start_paused = true)]
async fn idle_session_is_dropped_silently() {
    let h = Harness::with_idle_timeout(Some(Duration::from_secs(60)));
    h.text(1, "/start").await;

    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(h.text(1, "Ada").await, Outcome::Passthrough);
    assert_eq!(h.last_text(1), "Received your message");
    assert!(h.user(1).await.is_none());
}

// ============== Polls ==============

#[tokio::test]
async fn multiple_choice_poll_reaches_every_user() {
    let h = Harness::new();
    h.grant(ADMIN).await;
    h.seed_user(1, "Ada", "L", "CU/1", "100").await;
    h.seed_user(2, "Alan", "T", "CU/2", "100").await;

    h.text(ADMIN.0, "/create_poll").await;
    let kb = h.last_keyboard(ADMIN.0).unwrap();
    assert_eq!(kb.buttons.len(), 2);

    assert_eq!(
        h.press(ADMIN.0, "poll:multiple_choice").await,
        Outcome::Started(FlowKind::MultipleChoicePoll)
    );
    h.text(ADMIN.0, "Favourite meal?").await;
    assert_eq!(h.text(ADMIN.0, "Rice").await, Outcome::Rejected);
    assert_eq!(
        h.text(ADMIN.0, "Rice, Beans, Yam").await,
        Outcome::Completed(FlowKind::MultipleChoicePoll)
    );

    for user in [1, 2] {
        assert!(matches!(
            h.transport.sent_to(ChatId(user)).as_slice(),
            [Sent::Poll { question, options, .. }]
                if question == "Favourite meal?" && options.len() == 3
        ));
    }
}

#[tokio::test]
async fn yes_no_poll_button_is_admin_only() {
    let h = Harness::new();
    assert_eq!(h.press(1, "poll:yes_no").await, Outcome::Unauthorized);
    assert!(h.session(1).await.is_none());
}

// ============== Timetables ==============

#[tokio::test]
async fn uploaded_timetable_is_served_by_button() {
    let h = Harness::new();
    h.grant(ADMIN).await;

    h.text(ADMIN.0, "/upload_timetable").await;
    h.press(ADMIN.0, "step:exam").await;
    assert_eq!(h.photo(ADMIN.0, "p-1").await, Outcome::Rejected);
    assert_eq!(
        h.document(ADMIN.0, "doc-42", "exams.pdf").await,
        Outcome::Completed(FlowKind::FileUpload)
    );
    let stored = h.store.get_record(collections::FILES, "exam").await.unwrap().unwrap();
    assert_eq!(stored["file_id"], json!("doc-42"));

    h.text(1, "/timetable").await;
    assert!(h.last_keyboard(1).is_some());
    assert_eq!(h.press(1, "timetable:exam").await, Outcome::Immediate(Immediate::Timetable));
    assert!(h.transport.sent_to(ChatId(1)).iter().any(|s| matches!(
        s,
        Sent::File { file, .. } if file.file_id == "doc-42"
    )));

    assert_eq!(h.press(1, "timetable:semester").await, Outcome::NotFound);
    assert!(h.last_text(1).contains("semester timetable"));
}

// ============== Lost and found, suggestions ==============

#[tokio::test]
async fn lost_item_photo_is_forwarded_to_admins() {
    let h = Harness::new();
    h.grant(ADMIN).await;

    h.text(1, "/lost_found").await;
    assert_eq!(h.text(1, "a wallet").await, Outcome::Rejected);
    h.photo(1, "photo-9").await;
    assert_eq!(
        h.text(1, "Black wallet near the chapel").await,
        Outcome::Completed(FlowKind::LostAndFound)
    );

    assert_eq!(h.count(collections::LOST_AND_FOUND).await, 1);
    assert!(h.transport.sent_to(ADMIN).iter().any(|s| matches!(
        s,
        Sent::File { file, caption: Some(c), .. }
            if file.file_id == "photo-9" && c.contains("Black wallet")
    )));
}

#[tokio::test]
async fn suggestions_are_stored_and_listed_for_admins() {
    let h = Harness::new();
    h.grant(ADMIN).await;

    h.text(1, "/suggest").await;
    assert_eq!(h.text(1, "More benches").await, Outcome::Completed(FlowKind::Suggestion));

    h.text(ADMIN.0, "/view_suggestions").await;
    assert!(h.last_text(ADMIN.0).contains("More benches"));
}

// ============== Everything else ==============

#[tokio::test]
async fn plain_text_and_unknown_commands() {
    let h = Harness::new();
    assert_eq!(h.text(1, "good morning").await, Outcome::Passthrough);
    assert_eq!(h.last_text(1), "Received your message");

    assert_eq!(h.text(1, "/fun").await, Outcome::UnknownCommand);
    assert!(h.last_text(1).contains("/help"));

    assert_eq!(h.text(1, "/<script>").await, Outcome::UnknownCommand);
    assert_eq!(
        h.last_text(1),
        "🤔 I don't know /&lt;script&gt;. Send /help to see what I can do."
    );

    assert_eq!(h.photo(1, "p").await, Outcome::Ignored);
}

#[tokio::test]
async fn stale_step_button_is_answered_as_expired() {
    let h = Harness::new();
    assert_eq!(h.press(1, "step:anonymous").await, Outcome::Ignored);
    assert!(h.transport.sent().iter().any(|s| matches!(
        s,
        Sent::CallbackAnswer { text: Some(t), .. } if t == "This button has expired."
    )));
}

#[tokio::test]
async fn help_lists_public_commands_only() {
    let h = Harness::new();
    h.text(1, "/help").await;
    let help = h.last_text(1);
    assert!(help.contains("/announcements"));
    assert!(!help.contains("/make_admin"));
    assert!(!help.contains("/join"));
}

#[tokio::test]
async fn rate_limit_stops_floods() {
    let h = Harness::new();
    let dispatcher = h
        .dispatcher
        .with_rate_limiter(RateLimiter::new(true, 2, Duration::from_secs(60)));

    let msg = |body: &str| {
        IncomingUpdate::Text(TextMessage {
            chat_id: ChatId(1),
            sender: sender(1),
            text: body.to_string(),
        })
    };
    assert_eq!(dispatcher.handle(msg("a")).await, Outcome::Passthrough);
    assert_eq!(dispatcher.handle(msg("b")).await, Outcome::Passthrough);
    assert_eq!(dispatcher.handle(msg("c")).await, Outcome::RateLimited);
    assert!(h.transport.last_text_to(ChatId(1)).unwrap().contains("Slow down"));
}

#[tokio::test(start_paused = true)]
async fn rate_limiter_forgets_users_who_went_quiet() {
    let h = Harness::new();
    let dispatcher = h
        .dispatcher
        .with_rate_limiter(RateLimiter::new(true, 5, Duration::from_secs(60)));

    let msg = |chat: i64| {
        IncomingUpdate::Text(TextMessage {
            chat_id: ChatId(chat),
            sender: sender(chat),
            text: "hello".to_string(),
        })
    };
    let crowd = crate::ratelimit::PRUNE_EVERY as i64 - 1;
    for chat in 1..=crowd {
        assert_eq!(dispatcher.handle(msg(chat)).await, Outcome::Passthrough);
    }
    assert_eq!(
        dispatcher.rate_limiter.lock().await.tracked_users(),
        crowd as usize
    );

    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(dispatcher.handle(msg(10_000)).await, Outcome::Passthrough);
    assert_eq!(dispatcher.rate_limiter.lock().await.tracked_users(), 1);
}

//! Command registry: command token -> start action.
//!
//! Built once at startup and read-only afterwards.

use crate::{flows::FlowKind, messaging::types::MenuCommand};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Any,
    Admin,
}

/// Commands that run to completion within the update that triggered them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Immediate {
    Help,
    AdminHelp,
    ViewInfo,
    Contacts,
    Announcements,
    Events,
    Faq,
    Timetable,
    CreatePoll,
    Users,
    MakeAdmin,
    ViewSuggestions,
    Cancel,
    Echo,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartAction {
    Flow(FlowKind),
    Immediate(Immediate),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandEntry {
    pub token: &'static str,
    pub role: Role,
    pub action: StartAction,
    pub description: &'static str,
    /// Hidden entries work but are left out of the help listings.
    pub listed: bool,
}

/// Outcome of matching one text message against the registry.
#[derive(Debug, PartialEq)]
pub enum Resolution<'a> {
    Command {
        entry: &'a CommandEntry,
        args: String,
    },
    Unknown(String),
    NotACommand,
}

#[derive(Clone, Debug)]
pub struct CommandRegistry {
    entries: Vec<CommandEntry>,
}

impl CommandRegistry {
    pub fn new(entries: Vec<CommandEntry>) -> Self {
        Self { entries }
    }

    /// The council bot's command set.
    pub fn standard() -> Self {
        use Immediate as I;
        use StartAction::{Flow, Immediate as Run};

        let any = |token: &'static str, action: StartAction, description: &'static str| CommandEntry {
            token,
            role: Role::Any,
            action,
            description,
            listed: true,
        };
        let admin = |token: &'static str, action: StartAction, description: &'static str| CommandEntry {
            token,
            role: Role::Admin,
            action,
            description,
            listed: true,
        };
        let hidden = |entry: CommandEntry| CommandEntry {
            listed: false,
            ..entry
        };

        Self::new(vec![
            any("start", Flow(FlowKind::Registration), "Register with the Student Council"),
            hidden(any("join", Flow(FlowKind::Registration), "Register with the Student Council")),
            any("help", Run(I::Help), "Show this help message"),
            any("view_info", Run(I::ViewInfo), "View your registered details"),
            any("update_info", Flow(FlowKind::ProfileUpdate), "Update your registered details"),
            any("announcements", Run(I::Announcements), "Latest updates from the Student Council"),
            any("events", Run(I::Events), "Upcoming school events and activities"),
            hidden(any("view_events", Run(I::Events), "Upcoming school events and activities")),
            any("faq", Run(I::Faq), "Answers to common questions"),
            any("timetable", Run(I::Timetable), "Get a timetable"),
            any("contact", Flow(FlowKind::Contact), "Message the Student Council (you can stay anonymous)"),
            any("contacts", Run(I::Contacts), "Council contact directory"),
            any("suggest", Flow(FlowKind::Suggestion), "Share a suggestion or idea"),
            any("lost_found", Flow(FlowKind::LostAndFound), "Report a lost or found item"),
            any("cancel", Run(I::Cancel), "Stop what you're doing"),
            hidden(any("echo", Run(I::Echo), "Echo text back")),
            admin("admin", Run(I::AdminHelp), "Admin commands"),
            admin("send_announcement", Flow(FlowKind::Broadcast), "Send an announcement to every user"),
            admin("add_event", Flow(FlowKind::AddEvent), "Add an event and notify every user"),
            admin("add_faq", Flow(FlowKind::AddFaq), "Add a FAQ entry"),
            admin("upload_timetable", Flow(FlowKind::FileUpload), "Upload a timetable"),
            admin("create_poll", Run(I::CreatePoll), "Send a poll to every user"),
            admin("users", Run(I::Users), "Number of registered users"),
            admin("make_admin", Run(I::MakeAdmin), "Promote a user: /make_admin <matric number>"),
            admin("view_suggestions", Run(I::ViewSuggestions), "Latest suggestions"),
        ])
    }

    #[cfg(test)]
    pub(crate) fn entries(&self) -> &[CommandEntry] {
        &self.entries
    }

    pub fn get(&self, token: &str) -> Option<&CommandEntry> {
        self.entries.iter().find(|e| e.token == token)
    }

    /// Match `/token`, `/token args` or `/token@botname args`.
    pub fn resolve(&self, text: &str) -> Resolution<'_> {
        let Some((token, args)) = parse_command(text) else {
            return Resolution::NotACommand;
        };
        match self.get(&token) {
            Some(entry) => Resolution::Command { entry, args },
            None => Resolution::Unknown(token),
        }
    }

    /// Listed entries for `role`, in registration order.
    pub fn listed(&self, role: Role) -> impl Iterator<Item = &CommandEntry> {
        self.entries
            .iter()
            .filter(move |e| e.listed && e.role == role)
    }

    /// The messenger's command menu for `role`. Admins get the public
    /// commands followed by their own.
    pub fn menu(&self, role: Role) -> Vec<MenuCommand> {
        let public = self.listed(Role::Any);
        let entries: Vec<&CommandEntry> = match role {
            Role::Any => public.collect(),
            Role::Admin => public.chain(self.listed(Role::Admin)).collect(),
        };
        entries
            .into_iter()
            .map(|e| MenuCommand::new(e.token, e.description))
            .collect()
    }
}

/// Split a command message into `(token, args)`; `None` when `text` is not
/// a command. The token is lowercased and stripped of `/` and `@botname`.
pub fn parse_command(text: &str) -> Option<(String, String)> {
    let text = text.trim();
    if !text.starts_with('/') {
        return None;
    }

    let mut parts = text.splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();
    if cmd.is_empty() {
        return None;
    }

    Some((cmd, rest))
}

//! Flow definitions.
//!
//! A flow is plain data: an ordered list of steps, each naming the field it
//! captures, the prompt that asks for it, what kind of input it accepts and
//! how that input is validated. The dispatcher walks these tables; nothing
//! here knows about sessions or the store.

use chrono::NaiveDate;

use crate::{
    messaging::types::{FileRef, InlineKeyboard},
    session::CapturedValue,
};

/// Callback-data prefix of buttons that answer a choice step.
pub const STEP_CALLBACK_PREFIX: &str = "step";

pub const MAX_POLL_OPTIONS: usize = 10;
const MAX_POLL_OPTION_LEN: usize = 100;
const MAX_POLL_QUESTION_LEN: usize = 300;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowKind {
    Registration,
    ProfileUpdate,
    Contact,
    AddEvent,
    AddFaq,
    FileUpload,
    Broadcast,
    LostAndFound,
    YesNoPoll,
    MultipleChoicePoll,
    Suggestion,
}

impl FlowKind {
    pub const ALL: [FlowKind; 11] = [
        FlowKind::Registration,
        FlowKind::ProfileUpdate,
        FlowKind::Contact,
        FlowKind::AddEvent,
        FlowKind::AddFaq,
        FlowKind::FileUpload,
        FlowKind::Broadcast,
        FlowKind::LostAndFound,
        FlowKind::YesNoPoll,
        FlowKind::MultipleChoicePoll,
        FlowKind::Suggestion,
    ];

    pub fn name(&self) -> &'static str {
        self.definition().name
    }

    pub fn definition(&self) -> &'static FlowDefinition {
        match self {
            FlowKind::Registration => &REGISTRATION,
            FlowKind::ProfileUpdate => &PROFILE_UPDATE,
            FlowKind::Contact => &CONTACT,
            FlowKind::AddEvent => &ADD_EVENT,
            FlowKind::AddFaq => &ADD_FAQ,
            FlowKind::FileUpload => &FILE_UPLOAD,
            FlowKind::Broadcast => &BROADCAST,
            FlowKind::LostAndFound => &LOST_AND_FOUND,
            FlowKind::YesNoPoll => &YES_NO_POLL,
            FlowKind::MultipleChoicePoll => &MULTIPLE_CHOICE_POLL,
            FlowKind::Suggestion => &SUGGESTION,
        }
    }
}

#[derive(Debug)]
pub struct FlowDefinition {
    pub kind: FlowKind,
    pub name: &'static str,
    pub steps: &'static [Step],
}

/// Text validator: the normalized value, or the message to re-prompt with.
pub type Validator = fn(&str) -> Result<String, String>;

pub struct Step {
    pub field: &'static str,
    pub prompt: &'static str,
    pub expects: Expect,
    pub validate: Validator,
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("field", &self.field)
            .field("expects", &self.expects)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Copy, Debug)]
pub enum Expect {
    Text,
    Photo,
    Document,
    /// `(value, label)` pairs offered as buttons. With `allow_typed`, the
    /// label (or value) may also be typed.
    Choice {
        options: &'static [(&'static str, &'static str)],
        allow_typed: bool,
    },
}

/// What the user sent, reduced to what a step can consume.
#[derive(Clone, Copy, Debug)]
pub enum StepInput<'a> {
    Text(&'a str),
    Photo {
        file: &'a FileRef,
    },
    Document {
        file: &'a FileRef,
        file_name: Option<&'a str>,
    },
    /// Value part of a `step:<value>` button.
    Choice(&'a str),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Capture {
    Value(CapturedValue),
    Invalid(String),
    Cancel,
}

impl Step {
    pub fn capture(&self, input: StepInput<'_>) -> Capture {
        if let StepInput::Text(text) = input {
            if is_cancel_keyword(text) {
                return Capture::Cancel;
            }
        }

        match (self.expects, input) {
            (Expect::Text, StepInput::Text(text)) => match (self.validate)(text) {
                Ok(v) => Capture::Value(CapturedValue::Text(v)),
                Err(msg) => Capture::Invalid(msg),
            },
            (Expect::Photo, StepInput::Photo { file }) => Capture::Value(CapturedValue::File {
                file: file.clone(),
                file_name: None,
            }),
            (Expect::Document, StepInput::Document { file, file_name }) => {
                Capture::Value(CapturedValue::File {
                    file: file.clone(),
                    file_name: file_name.map(|s| s.to_string()),
                })
            }
            (Expect::Choice { options, .. }, StepInput::Choice(value)) => {
                match options.iter().find(|(v, _)| *v == value) {
                    Some((v, _)) => Capture::Value(CapturedValue::Text(v.to_string())),
                    None => Capture::Invalid(choose_prompt()),
                }
            }
            (
                Expect::Choice {
                    options,
                    allow_typed: true,
                },
                StepInput::Text(text),
            ) => {
                let typed = text.trim();
                match options.iter().find(|(v, label)| {
                    v.eq_ignore_ascii_case(typed) || label.eq_ignore_ascii_case(typed)
                }) {
                    Some((v, _)) => Capture::Value(CapturedValue::Text(v.to_string())),
                    None => Capture::Invalid(choose_prompt()),
                }
            }
            (Expect::Choice { .. }, _) => Capture::Invalid(choose_prompt()),
            (Expect::Text, _) => Capture::Invalid("Please reply with a text message.".to_string()),
            (Expect::Photo, _) => Capture::Invalid("Please send a photo.".to_string()),
            (Expect::Document, _) => {
                Capture::Invalid("Please send the file as a document.".to_string())
            }
        }
    }

    /// Buttons for a choice step, `None` for every other step.
    pub fn keyboard(&self, max_label_len: usize) -> Option<InlineKeyboard> {
        match self.expects {
            Expect::Choice { options, .. } => Some(InlineKeyboard::one_per_row(
                STEP_CALLBACK_PREFIX,
                options,
                max_label_len,
            )),
            _ => None,
        }
    }

    pub fn label_of(&self, value: &str) -> Option<&'static str> {
        match self.expects {
            Expect::Choice { options, .. } => options
                .iter()
                .find(|(v, _)| *v == value)
                .map(|(_, label)| *label),
            _ => None,
        }
    }
}

fn choose_prompt() -> String {
    "Please pick one of the buttons above.".to_string()
}

/// `/cancel`, `/cancel@bot` or a bare `cancel`, any case.
pub fn is_cancel_keyword(text: &str) -> bool {
    let t = text.trim().to_lowercase();
    let t = t.split('@').next().unwrap_or_default();
    t == "/cancel" || t == "cancel"
}

// ============== Validators ==============

fn any_input(s: &str) -> Result<String, String> {
    Ok(s.to_string())
}

pub fn required_text(s: &str) -> Result<String, String> {
    let t = s.trim();
    if t.is_empty() {
        return Err("This can't be empty. Please try again.".to_string());
    }
    if t.starts_with('/') {
        return Err(
            "Commands are paused until you finish here. Reply to the question above, or send /cancel to stop."
                .to_string(),
        );
    }
    Ok(t.to_string())
}

/// `YYYY-MM-DD` naming a real calendar day.
pub fn iso_date(s: &str) -> Result<String, String> {
    let t = required_text(s)?;
    let ok = t.len() == 10 && NaiveDate::parse_from_str(&t, "%Y-%m-%d").is_ok();
    if !ok {
        return Err(format!(
            "\"{t}\" is not a valid date. Please use the format YYYY-MM-DD (e.g. 2025-03-14)."
        ));
    }
    Ok(t)
}

pub fn poll_question(s: &str) -> Result<String, String> {
    let t = required_text(s)?;
    if t.chars().count() > MAX_POLL_QUESTION_LEN {
        return Err(format!(
            "Poll questions are limited to {MAX_POLL_QUESTION_LEN} characters."
        ));
    }
    Ok(t)
}

pub fn poll_option(s: &str) -> Result<String, String> {
    let t = required_text(s)?;
    if t.chars().count() > MAX_POLL_OPTION_LEN {
        return Err(format!(
            "Poll options are limited to {MAX_POLL_OPTION_LEN} characters."
        ));
    }
    Ok(t)
}

/// Comma-separated list of 2 to 10 non-empty options, normalized to `a,b,c`.
pub fn poll_options(s: &str) -> Result<String, String> {
    let t = required_text(s)?;
    let options = split_poll_options(&t);
    if options.iter().any(|o| o.is_empty()) {
        return Err("One of the options is empty. Send them again, separated by commas.".to_string());
    }
    if options.len() < 2 || options.len() > MAX_POLL_OPTIONS {
        return Err(format!(
            "Please send between 2 and {MAX_POLL_OPTIONS} options separated by commas (e.g. Red, Green, Blue)."
        ));
    }
    for o in &options {
        poll_option(o)?;
    }
    Ok(options.join(","))
}

pub fn split_poll_options(s: &str) -> Vec<String> {
    s.split(',').map(|o| o.trim().to_string()).collect()
}

// ============== Definitions ==============

pub const PROFILE_FIELDS: &[(&str, &str)] = &[
    ("first_name", "First name"),
    ("last_name", "Last name"),
    ("matric_number", "Matric number"),
    ("level", "Level"),
];

pub const CONTACT_IDENTITY: &[(&str, &str)] = &[
    ("anonymous", "🙈 Stay anonymous"),
    ("attributed", "🙋 Include my name"),
];

pub const TIMETABLE_KINDS: &[(&str, &str)] = &[
    ("academic", "📘 Academic timetable"),
    ("semester", "📗 Semester timetable"),
    ("exam", "📕 Exam timetable"),
];

const fn text(field: &'static str, prompt: &'static str, validate: Validator) -> Step {
    Step {
        field,
        prompt,
        expects: Expect::Text,
        validate,
    }
}

const fn choice(
    field: &'static str,
    prompt: &'static str,
    options: &'static [(&'static str, &'static str)],
    allow_typed: bool,
) -> Step {
    Step {
        field,
        prompt,
        expects: Expect::Choice {
            options,
            allow_typed,
        },
        validate: any_input,
    }
}

static REGISTRATION: FlowDefinition = FlowDefinition {
    kind: FlowKind::Registration,
    name: "registration",
    steps: &[
        text(
            "first_name",
            "👋 Hi! Let's get you registered.\n\nWhat is your <b>first name</b>?",
            required_text,
        ),
        text("last_name", "Great! Now what's your <b>last name</b>?", required_text),
        text("matric_number", "📚 Please enter your <b>matric number</b>:", required_text),
        text(
            "level",
            "🎓 Finally, what level are you in? (e.g., 100, 200, etc.)",
            required_text,
        ),
    ],
};

static PROFILE_UPDATE: FlowDefinition = FlowDefinition {
    kind: FlowKind::ProfileUpdate,
    name: "profile_update",
    steps: &[
        choice(
            "field",
            "✏️ Which detail would you like to update?",
            PROFILE_FIELDS,
            true,
        ),
        text("value", "Send the new value:", required_text),
    ],
};

static CONTACT: FlowDefinition = FlowDefinition {
    kind: FlowKind::Contact,
    name: "contact",
    steps: &[
        text(
            "message",
            "✉️ What would you like to tell the Student Council?",
            required_text,
        ),
        choice(
            "identity",
            "How should we send it?",
            CONTACT_IDENTITY,
            false,
        ),
    ],
};

static ADD_EVENT: FlowDefinition = FlowDefinition {
    kind: FlowKind::AddEvent,
    name: "add_event",
    steps: &[
        text("title", "📅 What is the <b>title</b> of the event?", required_text),
        text("description", "📝 Describe the event:", required_text),
        text(
            "date",
            "🗓 When is it? Send the date as <b>YYYY-MM-DD</b>.",
            iso_date,
        ),
    ],
};

static ADD_FAQ: FlowDefinition = FlowDefinition {
    kind: FlowKind::AddFaq,
    name: "add_faq",
    steps: &[
        text("question", "❓ Send the <b>question</b>:", required_text),
        text("answer", "💬 Now send the <b>answer</b>:", required_text),
    ],
};

static FILE_UPLOAD: FlowDefinition = FlowDefinition {
    kind: FlowKind::FileUpload,
    name: "file_upload",
    steps: &[
        choice(
            "kind",
            "Which timetable are you uploading?",
            TIMETABLE_KINDS,
            false,
        ),
        Step {
            field: "file",
            prompt: "📎 Send the timetable as a document.",
            expects: Expect::Document,
            validate: any_input,
        },
    ],
};

static BROADCAST: FlowDefinition = FlowDefinition {
    kind: FlowKind::Broadcast,
    name: "announcement_broadcast",
    steps: &[text(
        "message",
        "📣 Send the announcement you want every registered user to receive:",
        required_text,
    )],
};

static LOST_AND_FOUND: FlowDefinition = FlowDefinition {
    kind: FlowKind::LostAndFound,
    name: "lost_and_found",
    steps: &[
        Step {
            field: "photo",
            prompt: "📷 Send a photo of the item.",
            expects: Expect::Photo,
            validate: any_input,
        },
        text(
            "description",
            "🔎 Describe the item and where it was found or lost:",
            required_text,
        ),
    ],
};

static YES_NO_POLL: FlowDefinition = FlowDefinition {
    kind: FlowKind::YesNoPoll,
    name: "yes_no_poll",
    steps: &[
        text("question", "Please send me the question for your poll.", poll_question),
        text("option_1", "Please send the first option (e.g., 'Yes').", poll_option),
        text("option_2", "Please send the second option (e.g., 'No').", poll_option),
    ],
};

static MULTIPLE_CHOICE_POLL: FlowDefinition = FlowDefinition {
    kind: FlowKind::MultipleChoicePoll,
    name: "multiple_choice_poll",
    steps: &[
        text("question", "Please send me the question for your poll.", poll_question),
        text(
            "options",
            "Send the options separated by commas (2 to 10), e.g. <i>Red, Green, Blue</i>.",
            poll_options,
        ),
    ],
};

static SUGGESTION: FlowDefinition = FlowDefinition {
    kind: FlowKind::Suggestion,
    name: "suggestion",
    steps: &[text(
        "message",
        "💡 What's your suggestion?",
        required_text,
    )],
};

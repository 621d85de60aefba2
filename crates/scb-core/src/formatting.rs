//! Telegram-HTML rendering of listings and records.

use chrono::{TimeZone, Utc};

use crate::{
    records::{Announcement, Contact, Event, Faq, Suggestion, UserProfile},
    registry::CommandEntry,
};

/// Escape text for Telegram HTML (`<b>`, `<i>`, `<code>`, `<a>`).
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn truncate_one_line(text: &str, max_len: usize) -> String {
    let cleaned = text.replace('\n', " ").trim().to_string();
    if cleaned.chars().count() <= max_len {
        return cleaned;
    }
    format!("{}...", cleaned.chars().take(max_len).collect::<String>())
}

/// `YYYY-MM-DD` (UTC) of a millisecond timestamp.
pub fn date_of_millis(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "unknown date".to_string())
}

/// `heading` followed by as many `items` as fit in `max_len` characters.
///
/// Items are never cut in half: a partial HTML item could leave a tag open.
pub fn join_within(heading: &str, items: &[String], sep: &str, max_len: usize) -> String {
    const MORE: &str = "\n\n…";
    let mut out = heading.to_string();
    for (i, item) in items.iter().enumerate() {
        let extra = if i == 0 { 0 } else { sep.chars().count() };
        let projected = out.chars().count() + extra + item.chars().count() + MORE.chars().count();
        if projected > max_len {
            out.push_str(MORE);
            break;
        }
        if i > 0 {
            out.push_str(sep);
        }
        out.push_str(item);
    }
    out
}

pub fn render_help(heading: &str, entries: &[&CommandEntry], footer: &str) -> String {
    let mut out = format!("{heading}\n\n");
    for e in entries {
        out.push_str(&format!("/{} - {}\n", e.token, escape_html(e.description)));
    }
    if !footer.is_empty() {
        out.push('\n');
        out.push_str(footer);
    }
    out
}

pub fn render_profile(user: &UserProfile) -> String {
    format!(
        "👤 <b>Your details</b>\n\n\
         First name: {}\n\
         Last name: {}\n\
         Matric number: {}\n\
         Level: {}",
        escape_html(&user.first_name),
        escape_html(&user.last_name),
        escape_html(&user.matric_number),
        escape_html(&user.level),
    )
}

pub fn render_announcement(a: &Announcement) -> String {
    let date = if a.date.is_empty() {
        date_of_millis(a.timestamp)
    } else {
        a.date.clone()
    };
    format!("🗓 <i>{}</i>\n{}", escape_html(&date), escape_html(&a.message))
}

pub fn render_event(e: &Event) -> String {
    let mut out = format!("📅 <b>{}</b> ({})", escape_html(&e.title), escape_html(&e.date));
    if !e.description.is_empty() {
        out.push('\n');
        out.push_str(&escape_html(&e.description));
    }
    out
}

pub fn render_faq(f: &Faq) -> String {
    format!("❓ <b>{}</b>\n{}", escape_html(&f.question), escape_html(&f.answer))
}

pub fn render_contact(c: &Contact) -> String {
    let mut out = format!("<b>{}</b>", escape_html(&c.name));
    for (label, value) in [("Office", &c.office), ("Email", &c.email), ("Phone", &c.phone)] {
        if let Some(v) = value.as_deref().filter(|v| !v.trim().is_empty()) {
            out.push_str(&format!("\n{label}: {}", escape_html(v)));
        }
    }
    out
}

pub fn render_suggestion(s: &Suggestion) -> String {
    format!(
        "💡 <i>{}</i>\n{}",
        date_of_millis(s.timestamp),
        escape_html(&s.message)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_html() {
        let s = r#"<a href="x&y">"#;
        assert_eq!(escape_html(s), "&lt;a href=&quot;x&amp;y&quot;&gt;");
    }

    #[test]
    fn date_of_millis_is_utc_day() {
        assert_eq!(date_of_millis(0), "1970-01-01");
        assert_eq!(date_of_millis(1_741_910_400_000), "2025-03-14");
    }

    #[test]
    fn join_within_keeps_whole_items() {
        let items = vec!["a".repeat(10), "b".repeat(10), "c".repeat(10)];
        let out = join_within("H\n", &items, "\n", 30);
        assert!(out.starts_with("H\naaaaaaaaaa\nbbbbbbbbbb"));
        assert!(out.ends_with('…'));
        assert!(!out.contains('c'));

        let all = join_within("H\n", &items, "\n", 4096);
        assert!(all.ends_with(&"c".repeat(10)));
    }

    #[test]
    fn announcement_falls_back_to_timestamp_date_and_escapes() {
        let a = Announcement {
            message: "Exams <moved>".to_string(),
            date: String::new(),
            timestamp: 0,
            posted_by: None,
        };
        assert_eq!(
            render_announcement(&a),
            "🗓 <i>1970-01-01</i>\nExams &lt;moved&gt;"
        );
    }

    #[test]
    fn contact_skips_missing_fields() {
        let c = Contact {
            name: "Welfare Director".to_string(),
            office: None,
            email: Some("welfare@council.edu".to_string()),
            phone: Some("  ".to_string()),
        };
        assert_eq!(
            render_contact(&c),
            "<b>Welfare Director</b>\nEmail: welfare@council.edu"
        );
    }

    #[test]
    fn truncate_one_line_flattens_newlines() {
        assert_eq!(truncate_one_line("a\nb", 10), "a b");
        assert_eq!(truncate_one_line("abcdef", 3), "abc...");
    }
}

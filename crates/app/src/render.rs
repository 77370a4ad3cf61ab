use chrono::{DateTime, Local, TimeZone};
use murmur_session::{DeletePrompt, FeedStatus, SessionSnapshot, SessionState};
use murmur_storage::MessageRecord;

/// `HH:MM` in the local timezone.
pub fn format_time(created_at_unix_millis: i64) -> String {
    format_time_in(created_at_unix_millis, &Local)
}

pub fn format_time_in<Tz>(created_at_unix_millis: i64, timezone: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    DateTime::from_timestamp_millis(created_at_unix_millis)
        .map(|instant| instant.with_timezone(timezone).format("%H:%M").to_string())
        .unwrap_or_else(|| "--:--".to_string())
}

/// Numbered lines in view order, starting at 1.
pub fn message_lines(messages: &[MessageRecord]) -> Vec<String> {
    messages
        .iter()
        .enumerate()
        .map(|(index, message)| {
            format!(
                "{:>3}. [{}] {}",
                index + 1,
                format_time(message.created_at_unix_millis),
                message.text
            )
        })
        .collect()
}

pub fn status_line(snapshot: &SessionSnapshot) -> String {
    let state = match &snapshot.state {
        SessionState::Idle => "ready".to_string(),
        SessionState::Sending(_) => "sending...".to_string(),
        SessionState::Editing(edit) => format!("editing: {}", edit.draft_text),
        SessionState::EditingSaving { edit, .. } => format!("saving: {}", edit.draft_text),
    };

    match &snapshot.feed {
        FeedStatus::Live => state,
        FeedStatus::Disconnected { reason } => format!("{state} (offline: {reason})"),
    }
}

pub fn prompt_lines(prompt: &DeletePrompt) -> Vec<String> {
    let choices = prompt
        .choices()
        .iter()
        .map(|choice| choice.label())
        .collect::<Vec<_>>()
        .join(" / ");
    vec![
        prompt.title.to_string(),
        format!("{}? [y/n] ({choices})", prompt.body),
    ]
}

#[cfg(test)]
mod tests {
    use chrono::{FixedOffset, Utc};
    use murmur_storage::MessageId;

    use super::*;

    #[test]
    fn times_render_as_hours_and_minutes() {
        // 2024-01-01T13:05:00Z
        let created_at = 1_704_114_300_000;
        assert_eq!(format_time_in(created_at, &Utc), "13:05");
        let plus_two = FixedOffset::east_opt(2 * 3600).expect("valid offset");
        assert_eq!(format_time_in(created_at, &plus_two), "15:05");
    }

    #[test]
    fn prompt_shows_title_body_and_choices() {
        let prompt = DeletePrompt::new(MessageId::parse("1").expect("id"));
        let lines = prompt_lines(&prompt);
        assert_eq!(lines[0], "Delete Message");
        assert_eq!(
            lines[1],
            "Are you sure you want to delete this message? [y/n] (Cancel / Yes)"
        );
    }

    #[test]
    fn lines_are_numbered_from_one() {
        let messages = vec![
            MessageRecord::new(MessageId::parse("b").expect("id"), "second", 2_000),
            MessageRecord::new(MessageId::parse("a").expect("id"), "first", 1_000),
        ];
        let lines = message_lines(&messages);
        assert!(lines[0].starts_with("  1. ["));
        assert!(lines[0].ends_with("second"));
        assert!(lines[1].ends_with("first"));
    }
}

// Plain-text view of a chat room and the command line that drives it

use chrono::{DateTime, Utc};
use koschat::models::ChatMessage;
use textwrap::wrap;

/// One line of user input, parsed.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Send(String),
    BeginEdit(String),
    SaveEdit(String),
    CancelEdit,
    Delete(String),
    Reconnect,
    SwitchRoom(String),
    Help,
    Quit,
    Empty,
    Invalid(String),
}

pub fn parse_command(line: &str) -> Command {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Command::Empty;
    }
    if !line.starts_with('/') {
        return Command::Send(line.to_string());
    }

    let (name, rest) = match line.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (line, ""),
    };
    match (name, rest.is_empty()) {
        ("/edit", false) => Command::BeginEdit(rest.to_string()),
        ("/save", false) => Command::SaveEdit(rest.to_string()),
        ("/delete", false) => Command::Delete(rest.to_string()),
        ("/room", false) => Command::SwitchRoom(rest.to_string()),
        ("/cancel", true) => Command::CancelEdit,
        ("/reconnect", true) => Command::Reconnect,
        ("/help", _) => Command::Help,
        ("/quit", _) | ("/exit", _) => Command::Quit,
        _ => Command::Invalid(line.to_string()),
    }
}

pub const HELP: &str = "\
Commands:
  <text>             send a message
  /edit <id>         edit one of your messages
  /save <text>       save the edit in progress
  /cancel            cancel the edit in progress
  /delete <id>       delete one of your messages
  /reconnect         reopen the current room
  /room <id>         switch to another room
  /quit              leave";

pub fn initials(user_id: &str) -> String {
    let initials: String = user_id.chars().take(2).collect();
    if initials.is_empty() {
        "U".to_string()
    } else {
        initials.to_uppercase()
    }
}

/// "just now", "5 minutes ago", "in 2 hours" and so on.
pub fn relative_time(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = now.signed_duration_since(at);
    let (seconds, future) = if delta.num_seconds() < 0 {
        (-delta.num_seconds(), true)
    } else {
        (delta.num_seconds(), false)
    };

    let phrase = match seconds {
        0..=44 => return "just now".to_string(),
        45..=89 => "1 minute".to_string(),
        90..=2_699 => format!("{} minutes", (seconds + 30) / 60),
        2_700..=5_399 => "about 1 hour".to_string(),
        5_400..=86_399 => format!("about {} hours", (seconds + 1_800) / 3_600),
        86_400..=172_799 => "1 day".to_string(),
        172_800..=2_591_999 => format!("{} days", (seconds + 43_200) / 86_400),
        2_592_000..=31_535_999 => {
            let months = (seconds + 1_296_000) / 2_592_000;
            if months == 1 { "about 1 month".to_string() } else { format!("{} months", months) }
        }
        _ => {
            let years = seconds / 31_536_000;
            if years == 1 { "about 1 year".to_string() } else { format!("about {} years", years) }
        }
    };

    if future {
        format!("in {}", phrase)
    } else {
        format!("{} ago", phrase)
    }
}

/// Render the room transcript. Own messages are right aligned, bubbles take at
/// most 70% of the width.
pub fn render_messages(
    messages: &[ChatMessage],
    me: &str,
    editing: Option<&str>,
    width: usize,
    now: DateTime<Utc>,
) -> Vec<String> {
    if messages.is_empty() {
        return vec!["No messages yet. Start the conversation!".to_string()];
    }

    let bubble_width = (width * 7 / 10).max(20);
    let mut lines = Vec::new();

    for m in messages {
        let mine = m.is_from(me);
        let mut bubble: Vec<String> = Vec::new();

        if m.deleted {
            bubble.push("Message deleted".to_string());
        } else {
            if !mine {
                bubble.push(format!("[{}] {}", initials(&m.sender_user_id), short_id(&m.sender_user_id)));
            }
            bubble.extend(wrap(&m.content, bubble_width).into_iter().map(|l| l.into_owned()));

            let mut footer = relative_time(m.created_at, now);
            if m.edited {
                footer.push_str(" (edited)");
            }
            if mine {
                footer.push_str(&format!("  #{}", m.message_id));
            }
            if editing == Some(m.message_id.as_str()) {
                footer.push_str("  [editing]");
            }
            bubble.push(footer);
        }

        for line in bubble {
            if mine {
                lines.push(format!("{:>width$}", line, width = width));
            } else {
                lines.push(line);
            }
        }
        lines.push(String::new());
    }
    lines.pop();
    lines
}

fn short_id(id: &str) -> String {
    if id.chars().count() > 8 {
        format!("{}...", id.chars().take(8).collect::<String>())
    } else {
        id.to_string()
    }
}

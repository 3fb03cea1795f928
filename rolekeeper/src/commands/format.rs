//! Reply text helpers.

use chrono::Duration;

/// Discord rejects message content longer than this.
pub const MAX_MESSAGE_LEN: usize = 2000;

/// `1d 2h 3m 4s`, clamped at zero.
pub fn remaining(d: Duration) -> String {
    let secs = d.num_seconds().max(0);
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    format!("{days}d {hours}h {minutes}m {seconds}s")
}

/// Join a header and bullet lines, cutting the list short if it would not
/// fit in one message.
pub fn bulleted(header: &str, lines: &[String]) -> String {
    let mut out = header.to_string();
    for (i, line) in lines.iter().enumerate() {
        let more = format!("\n… and {} more", lines.len() - i);
        if out.len() + 1 + line.len() + more.len() > MAX_MESSAGE_LEN {
            out.push_str(&more);
            break;
        }
        out.push('\n');
        out.push_str(line);
    }
    out
}

/// " for N days" suffix, empty for permanent grants.
pub fn for_days(days: Option<i64>) -> String {
    match days {
        Some(d) if d > 0 => format!(" for {d} days"),
        _ => String::new(),
    }
}

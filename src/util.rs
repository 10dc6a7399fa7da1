use std::time::Duration;

const URGENT_THRESHOLD: Duration = Duration::from_secs(10 * 60);

/// Countdown text shown above the questions, e.g. `1:59:07`.
pub fn format_remaining(remaining: Duration) -> String {
    let secs = remaining.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// The countdown turns red in the last ten minutes.
pub fn is_urgent(remaining: Duration) -> bool {
    remaining < URGENT_THRESHOLD
}

/// Long form used on the results screen.
pub fn format_total(secs: u64) -> String {
    format!("{} minutes {} seconds", secs / 60, secs % 60)
}

/// Compact form used in submission listings.
pub fn format_short(secs: u64) -> String {
    format!("{}m {}s", secs / 60, secs % 60)
}

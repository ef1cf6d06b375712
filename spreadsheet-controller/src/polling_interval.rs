use regex::Regex;
use std::sync::LazyLock;
use tokio::time::Duration;

static HOURS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)h").unwrap());
static MINUTES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)m").unwrap());

fn leading_number(re: &Regex, text: &str) -> u64 {
    re.captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
        .unwrap_or(0)
}

/// Parse a polling interval like `1h30m`, `45m` or `2h` into minutes.
///
/// The number in front of the first `h` counts as hours and the number in front
/// of the first `m` as minutes, a missing unit counts as zero. Text without any
/// of them yields `0`, no error is raised.
pub(crate) fn parse_minutes(text: &str) -> u64 {
    let hours = leading_number(&HOURS, text);
    let minutes = leading_number(&MINUTES, text);
    hours.saturating_mul(60).saturating_add(minutes)
}

pub(crate) fn parse_polling_interval(text: &str) -> Duration {
    Duration::from_secs(parse_minutes(text).saturating_mul(60))
}

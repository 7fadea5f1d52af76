//! Compact duration parsing and formatting (`30s`, `10m`, `2h`, `1d`, `1w`)

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;
const WEEK: u64 = 7 * DAY;

/// Parse a duration like `90`, `30s`, `10m`, `1h30m` or `1w` into seconds.
///
/// A bare number is seconds and may only appear alone. Zero, overflow and
/// unknown units yield `None`.
#[must_use]
pub fn parse_duration(raw: &str) -> Option<u64> {
    let compact: String = raw.chars().filter(|ch| !ch.is_whitespace()).collect();
    if compact.is_empty() {
        return None;
    }

    if let Ok(seconds) = compact.parse::<u64>() {
        return (seconds > 0).then_some(seconds);
    }

    let mut total = 0_u64;
    let mut number = String::new();
    for ch in compact.chars() {
        if ch.is_ascii_digit() {
            number.push(ch);
            continue;
        }

        let value = number.parse::<u64>().ok()?;
        number.clear();
        let multiplier = match ch.to_ascii_lowercase() {
            's' => 1,
            'm' => MINUTE,
            'h' => HOUR,
            'd' => DAY,
            'w' => WEEK,
            _ => return None,
        };
        total = total.checked_add(value.checked_mul(multiplier)?)?;
    }

    // Trailing digits without a unit, as in `1h30`
    if !number.is_empty() {
        return None;
    }

    (total > 0).then_some(total)
}

/// Format seconds as a compact duration, keeping the two largest units
#[must_use]
pub fn format_duration(total_seconds: u64) -> String {
    let units = [
        (WEEK, "w"),
        (DAY, "d"),
        (HOUR, "h"),
        (MINUTE, "m"),
        (1, "s"),
    ];

    let mut remaining = total_seconds;
    let mut parts = Vec::with_capacity(2);
    for (size, suffix) in units {
        let amount = remaining / size;
        if amount > 0 {
            parts.push(format!("{amount}{suffix}"));
            remaining %= size;
        }
        if parts.len() == 2 {
            break;
        }
    }

    if parts.is_empty() {
        "0s".to_string()
    } else {
        parts.join(" ")
    }
}

/// Seconds as a chrono duration, saturating instead of panicking
#[must_use]
pub fn to_chrono(seconds: u64) -> chrono::Duration {
    i64::try_from(seconds)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

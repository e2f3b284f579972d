//! Time layout directives for dated log group and stream names
//!
//! Log groups that roll over daily or hourly are configured with a pattern
//! such as `/app/%Y-%m-%d`. Each poll cycle formats the pattern against the
//! current time to get the concrete name to query.
//!
//! | directive | component |
//! |---|---|
//! | `%Y` | 4-digit year |
//! | `%y` | 2-digit year |
//! | `%m` | 2-digit month |
//! | `%q` | month, no padding |
//! | `%b`, `%h` | abbreviated month name |
//! | `%B` | full month name |
//! | `%d` | 2-digit day of month |
//! | `%g` | day of month, no padding |
//! | `%a` | abbreviated weekday |
//! | `%A` | full weekday |
//! | `%H` | 2-digit hour (00-23) |
//! | `%M` | 2-digit minute |
//! | `%S` | 2-digit second |
//!
//! Each directive is substituted at its first occurrence only. Later
//! occurrences of the same directive stay in the output as literal text.
//! Unknown `%` sequences pass through untouched.

use chrono::{Datelike, Timelike};

const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

const WEEKDAYS: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

const DIRECTIVES: &[char] = &[
    'Y', 'y', 'm', 'q', 'b', 'h', 'B', 'd', 'g', 'a', 'A', 'H', 'M', 'S',
];

fn render<T: Datelike + Timelike>(directive: char, at: &T) -> Option<String> {
    let month = MONTHS[at.month0() as usize];
    let weekday = WEEKDAYS[at.weekday().num_days_from_sunday() as usize];

    let rendered = match directive {
        'Y' => format!("{:04}", at.year()),
        'y' => format!("{:02}", at.year().rem_euclid(100)),
        'm' => format!("{:02}", at.month()),
        'q' => at.month().to_string(),
        'b' | 'h' => month[..3].to_string(),
        'B' => month.to_string(),
        'd' => format!("{:02}", at.day()),
        'g' => at.day().to_string(),
        'a' => weekday[..3].to_string(),
        'A' => weekday.to_string(),
        'H' => format!("{:02}", at.hour()),
        'M' => format!("{:02}", at.minute()),
        'S' => format!("{:02}", at.second()),
        _ => return None,
    };
    Some(rendered)
}

/// Substitute the directives in `pattern` with components of `at`.
///
/// # Examples
///
/// ```rust
/// use chrono::{TimeZone, Utc};
/// use cloudwatch_log_poller::layout;
///
/// let at = Utc.timestamp_opt(1620843711, 0).unwrap();
/// assert_eq!(layout::format("/app/%Y-%m-%d", &at), "/app/2021-05-12");
/// assert_eq!(layout::format("%Y %Y", &at), "2021 %Y");
/// ```
pub fn format<T: Datelike + Timelike>(pattern: &str, at: &T) -> String {
    let mut out = String::with_capacity(pattern.len() + 16);
    let mut used: Vec<char> = Vec::new();
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }

        // The character after '%' is only consumed when it forms a directive
        // that gets substituted, so "%%Y" still substitutes the trailing "%Y".
        match chars.peek().copied() {
            Some(directive) if !used.contains(&directive) => match render(directive, at) {
                Some(rendered) => {
                    chars.next();
                    used.push(directive);
                    out.push_str(&rendered);
                }
                None => out.push('%'),
            },
            _ => out.push('%'),
        }
    }

    out
}

/// Whether `pattern` contains any recognised directive
pub fn has_directives(pattern: &str) -> bool {
    pattern
        .as_bytes()
        .windows(2)
        .any(|w| w[0] == b'%' && DIRECTIVES.contains(&(w[1] as char)))
}

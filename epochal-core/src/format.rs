//! Small display helpers.

use std::time::Duration;

const COUNT_LABELS: [&str; 5] = ["", "K", "M", "B", "T"];

/// Abbreviate a count: `1234567` becomes `"1.23 M"`, `512` stays `"512"`.
///
/// Counts beyond trillions keep the `T` label with a grouped integer part
/// (`"1,234 T"`). The fractional part is dropped when it is below 0.01.
pub fn human_readable_count(number: u64, precision: usize) -> String {
    let digits = if number == 0 { 1 } else { number.ilog10() as usize + 1 };
    let groups = digits.div_ceil(3).min(COUNT_LABELS.len());
    let scaled = number as f64 / 10f64.powi(3 * (groups as i32 - 1));

    let body = if precision > 0 && scaled.fract() > 0.01 {
        let text = format!("{scaled:.precision$}");
        match text.split_once('.') {
            Some((int, frac)) => format!("{}.{frac}", group_thousands(int)),
            None => text,
        }
    } else {
        group_thousands(&(scaled.trunc() as u64).to_string())
    };

    match COUNT_LABELS[groups - 1] {
        "" => body,
        label => format!("{body} {label}"),
    }
}

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// `HH:MM:SS`, with hours allowed to exceed 24.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_readable_count() {
        assert_eq!(human_readable_count(0, 2), "0");
        assert_eq!(human_readable_count(512, 2), "512");
        assert_eq!(human_readable_count(1_000, 2), "1 K");
        assert_eq!(human_readable_count(1_234_567, 2), "1.23 M");
        assert_eq!(human_readable_count(25_557_032, 1), "25.6 M");
        assert_eq!(human_readable_count(3_000_000_000, 2), "3 B");
        assert_eq!(human_readable_count(1_234_000_000_000_000, 0), "1,234 T");
    }

    #[test]
    fn test_precision_zero_truncates() {
        assert_eq!(human_readable_count(1_900, 0), "1 K");
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_secs(62)), "00:01:02");
        assert_eq!(format_elapsed(Duration::from_secs(90_061)), "25:01:01");
        assert_eq!(format_elapsed(Duration::from_millis(999)), "00:00:00");
    }
}

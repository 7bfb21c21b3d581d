// Duration formatting
//
// Human readable durations for the metrics and profile sections of a response.

use std::time::Duration;

/// Render a duration the way the response document reports times:
/// `"0s"`, `"850ns"`, `"12.5µs"`, `"1.5ms"`, `"2.25s"`, `"1m30s"`, `"1h0m5s"`.
pub fn format_duration(d: Duration) -> String {
    let nanos = d.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }
    if nanos < 1_000 {
        return format!("{}ns", nanos);
    }
    if nanos < 1_000_000 {
        return format!("{}µs", fractional(nanos, 1_000));
    }
    if nanos < 1_000_000_000 {
        return format!("{}ms", fractional(nanos, 1_000_000));
    }

    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let second_nanos = nanos % 60_000_000_000;

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{}h", hours));
    }
    if hours > 0 || minutes > 0 {
        out.push_str(&format!("{}m", minutes));
    }
    out.push_str(&fractional(second_nanos, 1_000_000_000));
    out.push('s');
    out
}

fn fractional(value: u128, unit: u128) -> String {
    let whole = value / unit;
    let frac = value % unit;
    if frac == 0 {
        return whole.to_string();
    }
    let width = unit.to_string().len() - 1;
    let digits = format!("{:0width$}", frac, width = width);
    format!("{}.{}", whole, digits.trim_end_matches('0'))
}

//! Encoder log parsing: turns ffmpeg status lines into percent and ETA.

use serde::Serialize;

const TIME_MARKER: &str = "time=";
const SPEED_MARKER: &str = "speed=";

/// How far past the expected duration a timestamp may run as-is. The encoder
/// overshoots by up to one output frame; anything later means the probed
/// duration was short, and the sample is pinned to the end.
pub const OVERSHOOT_TOLERANCE_SECS: f64 = 10.0;

/// Progress derived from one encoder log line
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressSample {
    /// Media time encoded so far
    pub elapsed_secs: f64,
    /// Encoding speed relative to realtime, when the line reports one
    pub speed: Option<f64>,
    /// Clamped to [0, 100] and never lower than the previous sample
    pub percent: f64,
    /// Only present when speed is known
    pub eta_secs: Option<f64>,
}

impl ProgressSample {
    /// Percent rounded to one decimal, as shown to the user
    pub fn display_percent(&self) -> f64 {
        (self.percent * 10.0).round() / 10.0
    }

    pub fn status_line(&self) -> String {
        match self.eta_secs {
            Some(eta) => format!("Processing... {:.1}% | ETA: {}", self.percent, format_eta(eta)),
            None => format!("Processing... {:.1}%", self.percent),
        }
    }
}

/// Stateless parser for encoder log lines
pub struct ProgressMonitor;

impl ProgressMonitor {
    /// Parse one log line into a sample.
    ///
    /// Lines without a usable timestamp yield `None` and leave the caller's
    /// previous progress untouched. When `previous` is given, the reported
    /// elapsed time and percent never move backwards.
    pub fn ingest(
        line: &str,
        total_duration_secs: f64,
        previous: Option<&ProgressSample>,
    ) -> Option<ProgressSample> {
        if !(total_duration_secs > 0.0) {
            return None;
        }

        let mut elapsed = extract_value(line, TIME_MARKER).and_then(|v| parse_timestamp(&v))?;
        if elapsed > total_duration_secs + OVERSHOOT_TOLERANCE_SECS {
            elapsed = total_duration_secs;
        }

        if let Some(prev) = previous {
            elapsed = elapsed.max(prev.elapsed_secs);
        }

        let speed = extract_value(line, SPEED_MARKER).and_then(|v| parse_speed(&v));
        let eta_secs = speed.map(|s| (total_duration_secs - elapsed).max(0.0) / s);

        let mut pct = percent(elapsed, total_duration_secs);
        if let Some(prev) = previous {
            pct = pct.max(prev.percent);
        }

        Some(ProgressSample {
            elapsed_secs: elapsed,
            speed,
            percent: pct,
            eta_secs,
        })
    }
}

/// Share of the total encoded so far, clamped to [0, 100]
pub fn percent(elapsed_secs: f64, total_duration_secs: f64) -> f64 {
    if !(total_duration_secs > 0.0) {
        return 0.0;
    }
    (100.0 * elapsed_secs / total_duration_secs).clamp(0.0, 100.0)
}

/// Parse an `H:MM:SS.ss` timestamp into seconds
pub fn parse_timestamp(value: &str) -> Option<f64> {
    let mut parts = value.split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || !seconds.is_finite() || seconds < 0.0 {
        return None;
    }

    Some(hours as f64 * 3600.0 + minutes as f64 * 60.0 + seconds)
}

/// Parse a speed multiplier such as `2.0x`
fn parse_speed(value: &str) -> Option<f64> {
    let speed: f64 = value.strip_suffix('x').unwrap_or(value).parse().ok()?;
    if speed.is_finite() && speed > 0.0 {
        Some(speed)
    } else {
        None
    }
}

/// Human-readable remaining time: `1h 5m` above an hour, `4m 10s` below
pub fn format_eta(secs: f64) -> String {
    let secs = (if secs.is_finite() { secs.max(0.0) } else { 0.0 }) as u64;
    let h = secs / 3600;
    let m = (secs % 3600) / 60;
    let s = secs % 60;
    if h > 0 {
        format!("{}h {}m", h, m)
    } else {
        format!("{}m {}s", m, s)
    }
}

/// Value following `key` up to the next whitespace; tolerates padding after `=`
fn extract_value(line: &str, key: &str) -> Option<String> {
    let start = line.find(key)?;
    let after_key = &line[start + key.len()..];
    let value_part = after_key.trim_start();
    let end = value_part.find(char::is_whitespace).unwrap_or(value_part.len());
    if end == 0 {
        return None;
    }
    Some(value_part[..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const LINE: &str = "frame=  480 fps=0.8 q=-1.0 size=  10240kB time=00:10:00.00 bitrate= 139.8kbits/s speed=2.0x";

    #[test]
    fn test_extract_value() {
        assert_eq!(extract_value(LINE, "time="), Some("00:10:00.00".to_string()));
        assert_eq!(extract_value(LINE, "bitrate="), Some("139.8kbits/s".to_string()));
        assert_eq!(extract_value(LINE, "speed="), Some("2.0x".to_string()));
        assert_eq!(extract_value("speed= 1.5x", "speed="), Some("1.5x".to_string()));
        assert_eq!(extract_value(LINE, "missing="), None);
        assert_eq!(extract_value("time=", "time="), None);
    }

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(parse_timestamp("00:10:00.00"), Some(600.0));
        let t = parse_timestamp("01:30:45.50").unwrap();
        assert!((t - 5445.5).abs() < 1e-9);
        assert_eq!(parse_timestamp("N/A"), None);
        assert_eq!(parse_timestamp("-00:00:00.02"), None);
        assert_eq!(parse_timestamp("12.5"), None);
        assert_eq!(parse_timestamp("00:00:01:00"), None);
    }

    #[test]
    fn test_ingest_reports_percent_and_eta() {
        let sample = ProgressMonitor::ingest(LINE, 3600.0, None).unwrap();
        assert_eq!(sample.elapsed_secs, 600.0);
        assert_eq!(sample.display_percent(), 16.7);
        assert_eq!(sample.speed, Some(2.0));
        assert_eq!(sample.eta_secs, Some(1500.0));
        assert_eq!(sample.status_line(), "Processing... 16.7% | ETA: 25m 0s");
    }

    #[test]
    fn test_ingest_without_speed_omits_eta() {
        let sample = ProgressMonitor::ingest("size=  1kB time=00:30:00.00 bitrate=N/A speed=N/A", 3600.0, None).unwrap();
        assert_eq!(sample.percent, 50.0);
        assert_eq!(sample.speed, None);
        assert_eq!(sample.eta_secs, None);
        assert_eq!(sample.status_line(), "Processing... 50.0%");
    }

    #[test]
    fn test_uninformative_lines_yield_nothing() {
        assert!(ProgressMonitor::ingest("Input #0, mp3, from 'input.mp3':", 3600.0, None).is_none());
        assert!(ProgressMonitor::ingest("frame=0 time=N/A speed=N/A", 3600.0, None).is_none());
        assert!(ProgressMonitor::ingest(LINE, 0.0, None).is_none());
        assert!(ProgressMonitor::ingest(LINE, f64::NAN, None).is_none());
    }

    #[test]
    fn test_overshoot_is_clamped() {
        let near = ProgressMonitor::ingest("time=01:00:03.00 speed=1.0x", 3600.0, None).unwrap();
        assert_eq!(near.percent, 100.0);
        assert_eq!(near.eta_secs, Some(0.0));

        // Probe underestimated the length: the bar sits at the end
        let far = ProgressMonitor::ingest("time=02:00:00.00 speed=1.0x", 3600.0, None).unwrap();
        assert_eq!(far.elapsed_secs, 3600.0);
        assert_eq!(far.percent, 100.0);
        assert_eq!(far.eta_secs, Some(0.0));

        let after = ProgressMonitor::ingest("time=02:00:05.00 speed=1.0x", 3600.0, Some(&near)).unwrap();
        assert!(after.elapsed_secs >= near.elapsed_secs);
        assert_eq!(after.percent, 100.0);
    }

    #[test]
    fn test_out_of_order_line_does_not_regress() {
        let first = ProgressMonitor::ingest("time=00:30:00.00 speed=1.0x", 3600.0, None).unwrap();
        let second = ProgressMonitor::ingest("time=00:10:00.00 speed=4.0x", 3600.0, Some(&first)).unwrap();
        assert_eq!(second.percent, 50.0);
        assert_eq!(second.elapsed_secs, 1800.0);
        assert_eq!(second.eta_secs, Some(450.0));
    }

    #[test]
    fn test_format_eta() {
        assert_eq!(format_eta(1500.0), "25m 0s");
        assert_eq!(format_eta(3725.0), "1h 2m");
        assert_eq!(format_eta(59.9), "0m 59s");
        assert_eq!(format_eta(-5.0), "0m 0s");
        assert_eq!(format_eta(f64::INFINITY), "0m 0s");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn test_percent_is_clamped(
            elapsed in 0.0f64..1.0e6,
            total in 0.001f64..1.0e5,
        ) {
            let p = percent(elapsed, total);
            prop_assert!((0.0..=100.0).contains(&p));
        }

        #[test]
        fn test_reported_percent_never_decreases(
            times in prop::collection::vec(0u32..4000, 1..20),
        ) {
            let mut previous: Option<ProgressSample> = None;
            for t in times {
                let line = format!("time={:02}:{:02}:{:02}.00 speed=1.0x", t / 3600, (t % 3600) / 60, t % 60);
                if let Some(sample) = ProgressMonitor::ingest(&line, 3600.0, previous.as_ref()) {
                    if let Some(prev) = &previous {
                        prop_assert!(sample.percent >= prev.percent);
                    }
                    prop_assert!(sample.percent <= 100.0);
                    previous = Some(sample);
                }
            }
        }
    }
}

use std::io::{self, Write};
use std::time::Instant;

use crate::pipeline::translator::Outcome;
use crate::session::TranslationReport;

const ROW_PROGRESS_EVERY: usize = 10;

/// Human-oriented progress lines on stderr, separate from the tracing log.
pub struct ConsoleProgress {
    enabled: bool,
    t0: Instant,
}

impl ConsoleProgress {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            t0: Instant::now(),
        }
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        if !self.enabled {
            return;
        }
        let ts = fmt_elapsed(self.t0.elapsed().as_secs_f64());
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "[{ts}] {}", msg.as_ref());
    }

    pub fn progress(&self, label: &str, current: usize, total: usize) {
        if !self.enabled {
            return;
        }
        let total = total.max(1);
        let current = current.min(total);
        let pct = (current as f64 / total as f64) * 100.0;
        let ts = fmt_elapsed(self.t0.elapsed().as_secs_f64());
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "[{ts}] {label} {current}/{total} ({pct:5.1}%)");
    }

    pub fn row_done(&self, report: &TranslationReport, total: usize) {
        let done = report.row + 1;
        if report.outcome == Outcome::Exhausted {
            let reason = report
                .last_error
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default();
            self.info(format!(
                "{} row {}: kept source after {} attempts ({reason})",
                report.language, report.row, report.attempts
            ));
        }
        if done % ROW_PROGRESS_EVERY == 0 || done == total {
            self.progress(&format!("translate {}", report.language), done, total);
        }
    }
}

fn fmt_elapsed(seconds: f64) -> String {
    let seconds = seconds.max(0.0) as u64;
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    if h > 0 {
        format!("{h:02}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_formats_with_optional_hours() {
        assert_eq!(fmt_elapsed(5.4), "00:05");
        assert_eq!(fmt_elapsed(125.0), "02:05");
        assert_eq!(fmt_elapsed(3725.0), "01:02:05");
        assert_eq!(fmt_elapsed(-1.0), "00:00");
    }
}

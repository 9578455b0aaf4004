//! Terminal output for srintake.
//!
//! Uses `console` styles: green for success, red for failures, yellow for
//! duplicates and warnings. Logging goes to stderr; these summaries go to stdout.

use console::Style;

use crate::orchestrator::ScanReport;

/// Styled printer for operator-facing summaries.
pub struct Printer {
    green: Style,
    red: Style,
    yellow: Style,
    dim: Style,
}

impl Default for Printer {
    fn default() -> Self {
        Self {
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            dim: Style::new().dim(),
        }
    }
}

impl Printer {
    /// One-line summary of a scan pass, or nothing when the inbox was empty.
    pub fn scan_report(&self, report: &ScanReport) {
        if report.seen == 0 && !report.interrupted {
            return;
        }
        println!("{}", self.format_report(report));
    }

    pub fn format_report(&self, report: &ScanReport) -> String {
        let mut parts = vec![
            format!("{} {} succeeded", self.green.apply_to("✓"), report.succeeded),
            format!("{} {} failed", self.red.apply_to("✗"), report.failed),
            format!("{} {} invalid", self.red.apply_to("✗"), report.invalid),
            format!("{} {} duplicate", self.yellow.apply_to("="), report.duplicates),
        ];
        if report.sync_warnings > 0 {
            parts.push(format!(
                "{} {} sync warnings",
                self.yellow.apply_to("!"),
                report.sync_warnings
            ));
        }
        if report.archive_errors > 0 {
            parts.push(format!(
                "{} {} archive errors",
                self.red.apply_to("!"),
                report.archive_errors
            ));
        }
        if report.interrupted {
            parts.push(self.dim.apply_to("(interrupted)").to_string());
        }
        format!("Scanned {} file(s): {}", report.seen, parts.join("  "))
    }

    /// Processed SR numbers, one per line, followed by the count.
    pub fn processed_list(&self, entries: &[String]) {
        for sr in entries {
            println!("{sr}");
        }
        println!("{}", self.dim.apply_to(format!("Total: {}", entries.len())));
    }

    pub fn reset_done(&self, sr_number: &str) {
        println!(
            "{} {sr_number} removed from processed log",
            self.green.apply_to("✓")
        );
    }

    pub fn cleanup_done(&self, removed: usize, retention_days: u64) {
        println!(
            "{} removed {removed} archive entr{} older than {retention_days} days",
            self.green.apply_to("✓"),
            if removed == 1 { "y" } else { "ies" }
        );
    }

    pub fn error(&self, message: &str) {
        eprintln!("{} {message}", self.red.apply_to("error:"));
    }
}

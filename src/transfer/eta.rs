//! Remaining-time estimation and display helpers
//!
//! Speed samples are smoothed by the executor before they reach us; this
//! module only turns what it is given into something displayable.

use std::fmt;
use std::time::Duration;

/// Estimated time remaining for a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eta {
    /// Total size unknown, or no throughput to extrapolate from
    Indeterminate,
    Remaining(Duration),
}

impl Eta {
    pub fn as_secs(&self) -> Option<u64> {
        match self {
            Eta::Indeterminate => None,
            Eta::Remaining(d) => Some(d.as_secs()),
        }
    }
}

/// `ceil((total - transferred) / speed)` seconds, or [`Eta::Indeterminate`]
pub fn estimate_eta(transferred: u64, total: Option<u64>, speed: Option<u64>) -> Eta {
    match (total, speed) {
        (Some(total), Some(speed)) if speed > 0 => {
            let remaining = total.saturating_sub(transferred);
            Eta::Remaining(Duration::from_secs(remaining.div_ceil(speed)))
        }
        _ => Eta::Indeterminate,
    }
}

impl fmt::Display for Eta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = match self {
            Eta::Indeterminate => return f.write_str("--"),
            Eta::Remaining(d) => d.as_secs(),
        };
        if secs >= 3600 {
            write!(f, "{}h {:02}m", secs / 3600, (secs % 3600) / 60)
        } else if secs >= 60 {
            write!(f, "{}m {:02}s", secs / 60, secs % 60)
        } else {
            write!(f, "{}s", secs)
        }
    }
}

/// Format a byte count as a human-readable string (B, KB, MB, GB)
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format bytes/second for display
pub fn format_speed(bytes_per_sec: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec))
}

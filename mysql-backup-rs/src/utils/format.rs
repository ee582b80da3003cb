use chrono::{DateTime, Local};
use std::time::SystemTime;

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// `dd/mm/YYYY HH:MM` in local time.
pub fn format_local(time: SystemTime) -> String {
    DateTime::<Local>::from(time).format("%d/%m/%Y %H:%M").to_string()
}

/*
 * This file is part of Foodlog.
 *
 * Copyright (C) 2025 Foodlog contributors
 *
 * Foodlog is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Foodlog is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Foodlog. If not, see <https://www.gnu.org/licenses/>.
 */

//! Plain-text rendering of daemon responses for the one-shot commands

use std::fmt::Write;

use fl_protocol::{ControllerStatusInfo, RecentEntry};

pub fn format_status(status: &ControllerStatusInfo) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Cage:            {}", status.cage_id);
    let _ = writeln!(out, "Loop:            {}", if status.running { "running" } else { "stopped" });
    let _ = writeln!(out, "Sensor:          {}", status.sensor);
    let _ = writeln!(out, "Offset:          {} mm (since {})", status.offset_mm, status.calibrated_at);
    let _ = writeln!(
        out,
        "Last reading:    {}",
        status
            .last_value_mm
            .map(|v| format!("{} mm", v))
            .unwrap_or_else(|| "-".to_string())
    );
    let _ = writeln!(out, "Partition:       {}", status.current_partition.as_deref().unwrap_or("-"));
    let _ = write!(
        out,
        "Ticks:           {} ({} sensor faults, {} storage errors)",
        status.ticks, status.sensor_faults, status.storage_errors
    );
    out
}

/// `Timestamp,Distance (mm)` table, oldest first
pub fn format_recent(entries: &[RecentEntry]) -> String {
    if entries.is_empty() {
        return "No readings yet".to_string();
    }
    let mut out = format!("{:<20} {:>14}", "Timestamp", "Distance (mm)");
    for e in entries {
        let _ = write!(out, "\n{:<20} {:>14}", e.timestamp, e.data);
    }
    out
}

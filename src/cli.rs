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

//! Command Line Interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "foodlog")]
#[command(version)]
#[command(about = "Foodlog - control and inspect the food sensor daemon")]
#[command(long_about = "Foodlog - control and inspect the food sensor daemon

Talks to foodlogd over its Unix socket.

EXAMPLES:
    foodlog status                 Show loop state, offset and counters
    foodlog calibrate 150          Calibrate against a known 150 mm distance
    foodlog recent --json          Print the last readings as JSON
    foodlog watch                  Live table of recent readings

ENVIRONMENT VARIABLES:
    FOODLOG_SOCKET         Daemon socket (default /run/foodlog.sock)")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Daemon socket path
    #[arg(long, global = true, env = "FOODLOG_SOCKET")]
    pub socket: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Show the sampling loop status
    Status,

    /// Start the sampling loop
    Start,

    /// Stop the sampling loop after the current tick
    Stop,

    /// Calibrate against a known ground-truth distance
    Calibrate {
        /// Distance to the target in millimeters
        #[arg(allow_negative_numbers = true)]
        known_distance_mm: f64,
    },

    /// Print the most recent readings, oldest first
    Recent {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Live view of the recent readings
    Watch {
        /// Refresh interval in milliseconds
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
    },
}

impl Cli {
    /// `--socket`, `$FOODLOG_SOCKET` or the default path
    pub fn socket_path(&self) -> PathBuf {
        self.socket
            .clone()
            .unwrap_or_else(fl_core::constants::paths::socket_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_calibrate_negative() {
        let cli = Cli::try_parse_from(["foodlog", "calibrate", "-12.5"]).unwrap();
        assert_eq!(cli.command, Commands::Calibrate { known_distance_mm: -12.5 });
    }

    #[test]
    fn test_parse_recent_json_and_socket() {
        let cli = Cli::try_parse_from(["foodlog", "recent", "--json", "--socket", "/tmp/f.sock"]).unwrap();
        assert_eq!(cli.command, Commands::Recent { json: true });
        assert_eq!(cli.socket_path(), PathBuf::from("/tmp/f.sock"));
    }

    #[test]
    fn test_watch_default_interval() {
        let cli = Cli::try_parse_from(["foodlog", "watch"]).unwrap();
        assert_eq!(cli.command, Commands::Watch { interval_ms: 1000 });
    }

    #[test]
    fn test_command_required() {
        assert!(Cli::try_parse_from(["foodlog"]).is_err());
    }
}

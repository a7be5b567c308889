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

//! State of the `watch` view

use std::path::PathBuf;
use std::time::{Duration, Instant};

use fl_protocol::{ControllerStatusInfo, RecentEntry};

use crate::client::DaemonClient;

pub struct App {
    pub socket_path: PathBuf,
    pub status: Option<ControllerStatusInfo>,
    pub recent: Vec<RecentEntry>,
    pub last_error: Option<String>,
    pub refresh_interval: Duration,
    pub last_refresh: Instant,
    client: Option<DaemonClient>,
}

impl App {
    pub fn new(socket_path: PathBuf, refresh_interval: Duration) -> Self {
        Self {
            socket_path,
            status: None,
            recent: Vec::new(),
            last_error: None,
            refresh_interval,
            last_refresh: Instant::now(),
            client: None,
        }
    }

    /// Fetch status and readings, reconnecting if the last attempt failed
    pub fn refresh(&mut self) {
        self.last_refresh = Instant::now();

        if self.client.is_none() {
            match DaemonClient::connect(&self.socket_path) {
                Ok(c) => self.client = Some(c),
                Err(e) => {
                    self.last_error = Some(e.to_string());
                    return;
                }
            }
        }

        let Some(client) = self.client.as_mut() else {
            return;
        };
        let result = client.status().and_then(|s| client.recent().map(|r| (s, r)));
        match result {
            Ok((status, recent)) => {
                self.status = Some(status);
                self.recent = recent;
                self.last_error = None;
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                self.client = None;
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }
}

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

//! Foodlog - command-line client for the food sensor daemon
//!
//! One-shot commands (status, start, stop, calibrate, recent) and a live
//! terminal view of the most recent readings.

pub mod app;
pub mod cli;
pub mod client;
pub mod events;
pub mod report;
pub mod ui;

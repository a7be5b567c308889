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

use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph, Row, Table};

use crate::app::App;

/// Render the watch view: header | readings | status bar
pub fn ui(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(5),
            Constraint::Length(1),
        ])
        .split(f.area());

    render_header(f, app, chunks[0]);
    render_readings(f, app, chunks[1]);
    render_status_bar(f, app, chunks[2]);
}

fn render_header(f: &mut Frame, app: &App, area: Rect) {
    let header_cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(75), Constraint::Percentage(25)])
        .split(area);

    let header_text = match &app.status {
        Some(s) => format!(
            " Cage: {}    |    Offset: {} mm    |    Partition: {} ",
            s.cage_id,
            s.offset_mm,
            s.current_partition.as_deref().unwrap_or("-")
        ),
        None => " Waiting for daemon... ".to_string(),
    };
    f.render_widget(
        Paragraph::new(header_text).style(Style::default().fg(Color::Yellow)),
        header_cols[0],
    );

    let (label, color) = match &app.status {
        Some(s) if s.running => ("RUNNING", Color::Green),
        Some(_) => ("STOPPED", Color::Red),
        None => ("OFFLINE", Color::Gray),
    };
    f.render_widget(
        Paragraph::new(label)
            .alignment(Alignment::Right)
            .style(Style::default().fg(color).add_modifier(Modifier::BOLD)),
        header_cols[1],
    );
}

fn render_readings(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title(format!(" RECENT READINGS ({}) ", app.recent.len()))
        .border_style(Style::default().fg(Color::Cyan));

    let header_style = Style::default().fg(Color::Gray).add_modifier(Modifier::BOLD | Modifier::UNDERLINED);
    let header = Row::new(vec!["Timestamp", "Distance (mm)"]).style(header_style);

    // Newest on top
    let rows: Vec<Row> = app
        .recent
        .iter()
        .rev()
        .map(|e| {
            let style = if e.data == 0.0 {
                Style::default().fg(Color::Red)
            } else {
                Style::default()
            };
            Row::new(vec![e.timestamp.clone(), format!("{:>10}", e.data)]).style(style)
        })
        .collect();

    let table = Table::new(rows, [Constraint::Length(22), Constraint::Min(14)])
        .header(header)
        .block(block);
    f.render_widget(table, area);
}

fn render_status_bar(f: &mut Frame, app: &App, area: Rect) {
    let text = match (&app.last_error, &app.status) {
        (Some(e), _) => format!(" Error: {} ", e),
        (None, Some(s)) => format!(
            " ticks {}  faults {}  storage errors {}  |  q/Esc quit  r refresh ",
            s.ticks, s.sensor_faults, s.storage_errors
        ),
        (None, None) => " q/Esc quit  r refresh ".to_string(),
    };
    let style = if app.last_error.is_some() {
        Style::default().fg(Color::Red)
    } else {
        Style::default().fg(Color::Gray)
    };
    f.render_widget(Paragraph::new(text).style(style), area);
}

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

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::app::App;

/// Handle a key in the watch view. Returns `true` to quit.
pub fn handle_key_event(app: &mut App, key: KeyEvent) -> bool {
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => true,
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => true,
        KeyCode::Char('r') => {
            app.refresh();
            false
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_quit_keys() {
        let mut app = App::new("/nonexistent.sock".into(), Duration::from_secs(1));
        assert!(handle_key_event(&mut app, KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE)));
        assert!(handle_key_event(&mut app, KeyEvent::new(KeyCode::Esc, KeyModifiers::NONE)));
        assert!(handle_key_event(&mut app, KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)));
        assert!(!handle_key_event(&mut app, KeyEvent::new(KeyCode::Char('x'), KeyModifiers::NONE)));
    }

    #[test]
    fn test_refresh_key_records_connection_error() {
        let mut app = App::new("/nonexistent/foodlog.sock".into(), Duration::from_secs(1));
        assert!(!handle_key_event(&mut app, KeyEvent::new(KeyCode::Char('r'), KeyModifiers::NONE)));
        assert!(app.last_error.as_deref().unwrap().contains("not available"));
        assert!(!app.is_connected());
    }
}

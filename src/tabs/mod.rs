// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Per-tab view models
//!
//! Each tab keeps its own state, changes it only through `update(msg)` with
//! messages produced by its [`TaskRunner`](crate::task::TaskRunner), and is
//! drawn by plain render functions.

pub mod chat;
pub mod placeholder;
pub mod sort;

pub use chat::{ChatController, ChatMsg, ChatTab};
pub use placeholder::PlaceholderTab;
pub use sort::{SortController, SortMsg, SortTab};

/// Application window title
pub const APP_TITLE: &str = "RPA4YOU - Developed by RPA Team";

/// Tabs of the assistant, in display order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tab {
    Chat,
    Sort,
    Placeholder,
}

impl Tab {
    pub const ALL: [Tab; 3] = [Tab::Chat, Tab::Sort, Tab::Placeholder];

    pub fn title(&self) -> &'static str {
        match self {
            Tab::Chat => "💬 Chat",
            Tab::Sort => "📸 Sort Pictures",
            Tab::Placeholder => "⚙️ Placeholder",
        }
    }
}

/// Tab bar with the active tab in brackets
pub fn render_tab_bar(active: Tab) -> String {
    Tab::ALL
        .iter()
        .map(|tab| {
            if *tab == active {
                format!("[{}]", tab.title())
            } else {
                format!(" {} ", tab.title())
            }
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tab_bar_marks_active() {
        let bar = render_tab_bar(Tab::Sort);
        assert!(bar.contains("[📸 Sort Pictures]"));
        assert!(!bar.contains("[💬 Chat]"));
    }
}

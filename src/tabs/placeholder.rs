// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Reserved tab with static content

/// Static "Coming Soon" tab
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderTab;

impl PlaceholderTab {
    pub const ICON: &'static str = "⚙️";
    pub const TITLE: &'static str = "Placeholder";
    pub const SUBTITLE: &'static str = "Coming Soon";
    pub const DESCRIPTION: &'static str = "This is just a placeholder.";
}

pub fn render_placeholder(_tab: &PlaceholderTab) -> Vec<String> {
    vec![
        PlaceholderTab::ICON.to_string(),
        PlaceholderTab::TITLE.to_string(),
        PlaceholderTab::SUBTITLE.to_string(),
        String::new(),
        PlaceholderTab::DESCRIPTION.to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_texts() {
        let lines = render_placeholder(&PlaceholderTab);
        assert_eq!(lines[1], "Placeholder");
        assert_eq!(lines[2], "Coming Soon");
        assert_eq!(lines.last().unwrap(), "This is just a placeholder.");
    }
}

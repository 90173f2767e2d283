//! Theme system

use crate::parser::Level;
use ratatui::style::Color;

/// Complete color palette for TUI rendering
#[derive(Debug, Clone, Copy)]
pub struct ThemeColors {
    // Backgrounds
    pub bg_primary: Color,
    pub bg_highlight: Color,

    // Borders
    pub border_default: Color,
    pub border_focus: Color,

    // Text
    pub text_primary: Color,
    pub text_secondary: Color,
    pub text_muted: Color,

    // Status
    pub success: Color,
    pub warning: Color,
    pub error: Color,
    pub info: Color,

    // Accents
    pub accent_blue: Color,
    pub accent_cyan: Color,
    pub accent_magenta: Color,
    pub accent_yellow: Color,
}

impl ThemeColors {
    /// Default theme
    pub const DEFAULT: Self = Self {
        // Backgrounds
        bg_primary: Color::Rgb(22, 24, 38),
        bg_highlight: Color::Rgb(50, 54, 72),

        // Borders
        border_default: Color::Rgb(130, 135, 160),
        border_focus: Color::Rgb(120, 220, 170),

        // Text
        text_primary: Color::Rgb(230, 233, 248),
        text_secondary: Color::Rgb(185, 190, 210),
        text_muted: Color::Rgb(140, 145, 168),

        // Status
        success: Color::Rgb(110, 220, 120),
        warning: Color::Rgb(245, 175, 100),
        error: Color::Rgb(250, 120, 130),
        info: Color::Rgb(110, 200, 245),

        // Accents
        accent_blue: Color::Rgb(120, 170, 250),
        accent_cyan: Color::Rgb(100, 215, 235),
        accent_magenta: Color::Rgb(210, 150, 235),
        accent_yellow: Color::Rgb(235, 195, 100),
    };

    /// Log level badge color
    #[inline]
    pub const fn level(&self, level: Level) -> Color {
        match level {
            Level::Info => self.info,
            Level::Warn => self.warning,
            Level::Error => self.error,
            Level::Debug => self.text_muted,
        }
    }

    /// Stable color per agent name, so one agent keeps its color across panels
    pub fn agent_color(&self, name: &str) -> Color {
        const COLORS: [Color; 6] = [
            Color::Rgb(100, 210, 225),
            Color::Rgb(200, 150, 225),
            Color::Rgb(110, 200, 120),
            Color::Rgb(225, 190, 100),
            Color::Rgb(120, 165, 240),
            Color::Rgb(235, 140, 175),
        ];
        let hash = name
            .bytes()
            .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
        COLORS[hash % COLORS.len()]
    }
}

/// Theme container providing access to color palette
#[derive(Debug, Clone, Copy, Default)]
pub struct Theme;

impl Theme {
    #[inline]
    pub const fn colors(&self) -> ThemeColors {
        ThemeColors::DEFAULT
    }
}

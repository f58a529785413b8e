#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use ratatui::style::Color;
use serde::{Deserialize, Serialize};

use crate::error::ToolhubError;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

impl Theme {
    #[must_use]
    pub fn toggle(self) -> Self {
        match self {
            Self::Dark => Self::Light,
            Self::Light => Self::Dark,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dark => "dark",
            Self::Light => "light",
        }
    }

    #[must_use]
    pub fn palette(self) -> Palette {
        match self {
            Self::Dark => Palette {
                fg: Color::White,
                bg: Color::Reset,
                muted: Color::DarkGray,
                accent: Color::Cyan,
                highlight_fg: Color::Black,
                success: Color::Green,
                danger: Color::Red,
                info: Color::Blue,
                progress: Color::Yellow,
            },
            Self::Light => Palette {
                fg: Color::Black,
                bg: Color::White,
                muted: Color::Gray,
                accent: Color::Blue,
                highlight_fg: Color::White,
                success: Color::Green,
                danger: Color::Red,
                info: Color::Blue,
                progress: Color::Magenta,
            },
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Theme {
    type Err = ToolhubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dark" => Ok(Self::Dark),
            "light" => Ok(Self::Light),
            other => Err(ToolhubError::Validation(format!(
                "unknown theme '{other}' (expected dark or light)"
            ))),
        }
    }
}

/// Colors the dashboard draws with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub fg: Color,
    pub bg: Color,
    pub muted: Color,
    pub accent: Color,
    pub highlight_fg: Color,
    pub success: Color,
    pub danger: Color,
    pub info: Color,
    pub progress: Color,
}

/// Flips `ui.theme` in the config file and returns the new value.
pub fn toggle_persisted() -> anyhow::Result<Theme> {
    let (cfg, _paths) = crate::config::load()?;
    let next = cfg.ui.theme.toggle();
    crate::config::set_value_string("ui.theme", next.as_str())?;
    Ok(next)
}

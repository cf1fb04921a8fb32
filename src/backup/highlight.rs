use crossterm::style::{Color, Stylize};
use serde::Deserialize;

/// Display color a location is highlighted with in plan and transfer output.
#[derive(Clone, Copy, Default, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HighlightColor {
    Black,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
    #[default]
    Default,
    LightBlack,
    LightRed,
    LightGreen,
    LightYellow,
    LightBlue,
    LightMagenta,
    LightCyan,
    LightWhite,
    #[serde(alias = "grey")]
    Gray,
}

impl HighlightColor {
    pub fn color(self) -> Option<Color> {
        Some(match self {
            HighlightColor::Default => return None,
            HighlightColor::Black => Color::Black,
            HighlightColor::Red => Color::DarkRed,
            HighlightColor::Green => Color::DarkGreen,
            HighlightColor::Yellow => Color::DarkYellow,
            HighlightColor::Blue => Color::DarkBlue,
            HighlightColor::Magenta => Color::DarkMagenta,
            HighlightColor::Cyan => Color::DarkCyan,
            HighlightColor::White => Color::Grey,
            HighlightColor::LightBlack | HighlightColor::Gray => Color::DarkGrey,
            HighlightColor::LightRed => Color::Red,
            HighlightColor::LightGreen => Color::Green,
            HighlightColor::LightYellow => Color::Yellow,
            HighlightColor::LightBlue => Color::Blue,
            HighlightColor::LightMagenta => Color::Magenta,
            HighlightColor::LightCyan => Color::Cyan,
            HighlightColor::LightWhite => Color::White,
        })
    }

    pub fn paint<S: AsRef<str>>(self, text: S, enabled: bool) -> String {
        paint(text, self.color(), enabled)
    }
}

/// Colors `text` when `enabled` and a color is given, otherwise returns it
/// untouched.
pub fn paint<S: AsRef<str>>(text: S, color: Option<Color>, enabled: bool) -> String {
    match color {
        Some(color) if enabled => text.as_ref().with(color).to_string(),
        _ => text.as_ref().to_string(),
    }
}

pub fn bold<S: AsRef<str>>(text: S, enabled: bool) -> String {
    if enabled {
        text.as_ref().bold().to_string()
    } else {
        text.as_ref().to_string()
    }
}

/// Section headings of a run.
pub fn heading<S: AsRef<str>>(text: S, enabled: bool) -> String {
    if enabled {
        text.as_ref().cyan().bold().to_string()
    } else {
        text.as_ref().to_string()
    }
}

//! Minimal ANSI styling for terminal output.
//!
//! Output is styled through a [`Palette`], which is either enabled or plain so
//! that callers can honour `--no-color` without branching at every call site.

#![no_std]

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    DarkGray,
    Red,
    Green,
    Yellow,
    Blue,
    Cyan,
}

impl Color {
    fn fg(self) -> u8 {
        match self {
            Self::DarkGray => 90,
            Self::Red => 31,
            Self::Green => 32,
            Self::Yellow => 33,
            Self::Blue => 34,
            Self::Cyan => 36,
        }
    }
}

/// Chooses whether values are wrapped in escape sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    enabled: bool,
}

impl Default for Palette {
    fn default() -> Self {
        Self::COLORED
    }
}

impl Palette {
    pub const COLORED: Self = Self { enabled: true };
    pub const PLAIN: Self = Self { enabled: false };

    #[must_use]
    pub const fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Wraps `value` so that it is displayed bold in `color`.
    pub fn paint<T>(self, color: Color, value: T) -> Paint<T> {
        Paint {
            color: self.enabled.then_some(color),
            value,
        }
    }
}

/// A value displayed with an optional foreground color.
pub struct Paint<T> {
    color: Option<Color>,
    value: T,
}

impl<T> fmt::Display for Paint<T>
where
    T: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = &self.value;
        match self.color {
            Some(color) => write!(f, "\x1B[{};1m{value}\x1B[0m", color.fg()),
            None => write!(f, "{value}"),
        }
    }
}

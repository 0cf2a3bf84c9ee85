//! Terminal colouring for progress lines

/// ANSI colour of a console line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Green,
    Yellow,
    Red,
    Cyan,
}

impl Color {
    fn code(self) -> u8 {
        match self {
            Color::Red => 31,
            Color::Green => 32,
            Color::Yellow => 33,
            Color::Cyan => 36,
        }
    }
}

/// Wrap text in an ANSI colour sequence
pub fn colorize(text: &str, color: Color) -> String {
    format!("\x1b[{}m{}\x1b[0m", color.code(), text)
}

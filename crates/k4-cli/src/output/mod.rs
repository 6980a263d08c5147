//! Terminal output helpers
//!
//! Everything here goes to stderr; stdout is reserved for `k4wd -e`.

use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

/// Print an error message in red with an X prefix
pub fn print_error(msg: &str) {
    print_prefixed(Color::Red, "✗ ", msg);
}

/// Print a warning message in yellow with a warning symbol prefix
pub fn print_warning(msg: &str) {
    print_prefixed(Color::Yellow, "⚠ ", msg);
}

fn print_prefixed(color: Color, prefix: &str, msg: &str) {
    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(color),
        Print(prefix),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

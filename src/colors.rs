//! Color support honouring `NO_COLOR` (https://no-color.org/), `CLICOLOR` and
//! `CLICOLOR_FORCE`. Colors are off when stdout is not a terminal unless forced.

use colored::control;
use std::io::IsTerminal;

/// Configure `colored` for the whole process. Call early in `main`.
pub fn init_colors() {
    let enabled = colors_enabled(
        std::env::var_os("NO_COLOR").is_some(),
        std::env::var("CLICOLOR").ok().as_deref(),
        std::env::var("CLICOLOR_FORCE").ok().as_deref(),
        std::io::stdout().is_terminal(),
    );
    control::set_override(enabled);
}

fn colors_enabled(
    no_color: bool,
    clicolor: Option<&str>,
    clicolor_force: Option<&str>,
    is_tty: bool,
) -> bool {
    if no_color {
        return false;
    }
    if clicolor_force.is_some_and(|v| v != "0") {
        return true;
    }
    if clicolor == Some("0") {
        return false;
    }
    is_tty
}

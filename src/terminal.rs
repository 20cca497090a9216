//! Terminal handle detection.
//!
//! A terminal handle identifies the pane/window an agent session lives in and
//! stays stable while session handles come and go (crash, restart, resume).
//! Identity recovery keys off it, and the wake queue targets it.

/// Environment probes, in precedence order. Each yields a handle with a
/// multiplexer/emulator prefix so handles from different sources never collide.
const PROBES: [(&str, &str); 4] = [
    ("TMUX_PANE", "tmux"),
    ("KITTY_WINDOW_ID", "kitty"),
    ("WEZTERM_PANE", "wezterm"),
    ("ITERM_SESSION_ID", "iterm"),
];

/// Detect the terminal handle for the current process.
///
/// `CREW_TERMINAL` overrides everything (used by tests and wrapper scripts).
/// Returns `None` when no known terminal environment is present; identity
/// resolution then falls back to session-handle matching alone.
pub fn detect_handle() -> Option<String> {
    if let Ok(explicit) = std::env::var("CREW_TERMINAL")
        && !explicit.is_empty()
    {
        return Some(explicit);
    }
    for (var, prefix) in PROBES {
        if let Ok(value) = std::env::var(var)
            && !value.is_empty()
        {
            return Some(format!("{}:{}", prefix, value));
        }
    }
    None
}

/// Reduce a terminal handle to a filesystem-safe token for cache file names.
pub fn sanitize_handle(handle: &str) -> String {
    handle
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_separator_noise() {
        assert_eq!(sanitize_handle("tmux:%12"), "tmux--12");
        assert_eq!(sanitize_handle("kitty:7"), "kitty-7");
        assert_eq!(sanitize_handle("plain"), "plain");
    }
}

//! Console rendering of `run` progress notifications.

use crate::config::{EnvConfig, DEFAULT_CONSOLE_WIDTH};
use crate::ipc::ProgressUpdate;
use std::io::IsTerminal;

/// `Running [ i/N] at line L:  <first significant line of the cell>`, fitted to `columns`.
pub fn render_progress_line(update: &ProgressUpdate, columns: usize) -> String {
    let total = update.n_chunks.to_string();
    let prefix = format!(
        "Running [{:>width$}/{}] at line {}:  ",
        update.chunk_index,
        total,
        update.line,
        width = total.len()
    );
    let available = columns.saturating_sub(prefix.chars().count());
    format!("{}{}", prefix, first_significant_line(&update.source, available))
}

/// First line of `source` that is neither blank nor a `#|` cell option,
/// trimmed and cut to `max_chars` with a trailing ellipsis.
pub fn first_significant_line(source: &str, max_chars: usize) -> String {
    let Some(line) = source
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with("#|"))
    else {
        return String::new();
    };

    if line.chars().count() <= max_chars {
        return line.to_string();
    }
    let mut cut: String = line.chars().take(max_chars.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

/// Width of the terminal behind stderr, else `COLUMNS`, else 80.
pub fn console_columns() -> usize {
    let terminal = if std::io::stderr().is_terminal() {
        crossterm::terminal::size().ok().map(|(columns, _)| columns)
    } else {
        None
    };
    resolve_columns(terminal, std::env::var(EnvConfig::COLUMNS).ok().as_deref())
}

fn resolve_columns(terminal: Option<u16>, env: Option<&str>) -> usize {
    terminal
        .map(usize::from)
        .filter(|columns| *columns > 0)
        .or_else(|| env.and_then(|value| value.trim().parse().ok()))
        .filter(|columns| *columns > 0)
        .unwrap_or(DEFAULT_CONSOLE_WIDTH)
}

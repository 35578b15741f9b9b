pub mod extend;
pub mod show;
pub mod verify;

const BOX_WIDTH: usize = 59;

pub(crate) fn print_banner(title: &str) {
    println!("\n{}", "═".repeat(BOX_WIDTH + 2));
    println!("  {}", title);
    println!("{}\n", "═".repeat(BOX_WIDTH + 2));
}

pub(crate) fn box_top(title: &str) {
    println!("┌{}┐", "─".repeat(BOX_WIDTH + 1));
    box_line(title);
    println!("├{}┤", "─".repeat(BOX_WIDTH + 1));
}

pub(crate) fn box_line(content: &str) {
    println!("│ {}│", truncate_string(content, BOX_WIDTH));
}

pub(crate) fn box_bottom() {
    println!("└{}┘\n", "─".repeat(BOX_WIDTH + 1));
}

/// Pad or truncate to exactly `max_len` characters, marking truncation with "..."
pub(crate) fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        format!("{:<width$}", s, width = max_len)
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

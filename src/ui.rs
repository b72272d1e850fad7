use crate::engine::PassSummary;
use colored::Colorize;

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Print the outcome of one pass
pub fn pass_summary(summary: &PassSummary) {
    header("Pass summary");
    kv("changed", &summary.changed.to_string());
    kv("unchanged", &summary.no_change.to_string());
    kv("pruned", &summary.pruned.to_string());

    if summary.is_success() {
        success(&format!("{} change(s) applied", summary.total_changes()));
        return;
    }
    for (category, count) in summary.failures_by_category() {
        kv(&category.to_string(), &format!("{count} failed").red().to_string());
    }
    for failure in &summary.failures {
        error(&failure.to_string());
    }
}

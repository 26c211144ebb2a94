use crate::model::{Advisory, Level, ScanResult};
use anyhow::Result;
use std::fmt::Write;
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
struct AdvisoryRow {
    #[tabled(rename = "Level")]
    level: String,
    #[tabled(rename = "Package")]
    package: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Aliases")]
    aliases: String,
    #[tabled(rename = "Message")]
    message: String,
    #[tabled(rename = "URL")]
    url: String,
}

pub fn print_cli_table(result: &ScanResult) -> Result<()> {
    println!("{}", render_table(result));
    Ok(())
}

pub(super) fn render_table(result: &ScanResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Scan completed at: {}",
        result.scan_time.format("%Y-%m-%d %H:%M:%S UTC")
    );
    let _ = writeln!(out);

    if result.advisories.is_empty() {
        let _ = writeln!(out, "No advisories found.");
    } else {
        let _ = writeln!(out, "Found {} advisories:", result.advisories.len());
        let _ = writeln!(out);

        // Fatal first, otherwise keep merge order.
        let mut advisories: Vec<&Advisory> = result.advisories.iter().collect();
        advisories.sort_by_key(|a| std::cmp::Reverse(a.level));

        let rows: Vec<AdvisoryRow> = advisories
            .into_iter()
            .map(|a| AdvisoryRow {
                level: format_level(a.level),
                package: truncate(&a.package, 40),
                id: a.id.clone(),
                aliases: if a.aliases.is_empty() {
                    "-".to_string()
                } else {
                    truncate(&a.aliases.join(", "), 40)
                },
                message: truncate(&a.message, 50),
                url: a.url.clone().unwrap_or_else(|| "-".to_string()),
            })
            .collect();

        let table = Table::new(rows).with(Style::rounded()).to_string();
        let _ = writeln!(out, "{}", table);
    }

    let _ = writeln!(out);
    write_summary(&mut out, result);
    out
}

fn format_level(level: Level) -> String {
    match level {
        Level::Fatal => "\x1b[31mFATAL\x1b[0m".to_string(),
        Level::Warn => "\x1b[33mWARN\x1b[0m".to_string(),
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

fn write_summary(out: &mut String, result: &ScanResult) {
    let _ = writeln!(out, "Summary:");
    let _ = writeln!(out, "  Total packages: {}", result.packages.len());
    let _ = writeln!(
        out,
        "  Advisories: {} fatal, {} warn",
        result.count(Level::Fatal),
        result.count(Level::Warn)
    );
}

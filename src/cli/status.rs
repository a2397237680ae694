use super::ui::{self, StyleType};
use crate::AppContext;
use crate::core::cache::EntrySummary;
use anyhow::Result;
use comfy_table::{Cell, Table};
use futures::try_join;

fn entries_table(entries: &[EntrySummary]) -> Table {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Key"),
        ui::header_cell("Date"),
        ui::header_cell("Fetched At"),
        ui::header_cell("Checkpoint"),
    ]);
    for entry in entries {
        table.add_row(vec![
            Cell::new(&entry.key),
            Cell::new(entry.fetch_record.date),
            Cell::new(&entry.fetch_record.fetched_at),
            ui::format_optional_cell(entry.fetch_record.checkpoint_index, |i| {
                format!("#{}", i + 1)
            }),
        ]);
    }
    table
}

/// Prints the schedule, the fund quota and what is cached.
pub async fn run(ctx: &AppContext) -> Result<()> {
    let now = ctx.clock.now();
    let window = ctx.config.schedule.window()?;
    let checkpoints: Vec<String> = window.checkpoints().iter().map(|c| c.to_string()).collect();

    println!(
        "{} {} ({})",
        ui::style_text("Now:", StyleType::Title),
        now.format("%Y-%m-%d %H:%M"),
        ctx.config.timezone
    );
    println!(
        "Checkpoints: {} {}",
        checkpoints.join(", "),
        ui::style_text(
            &format!("±{} min", window.tolerance_minutes()),
            StyleType::Subtle
        )
    );

    let quota = ctx.funds.quota_status(now).await?;
    println!("\n{}", ui::style_text("Fund API quota", StyleType::Title));
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Date"),
        ui::header_cell("Used"),
        ui::header_cell("Remaining"),
        ui::header_cell("Limit"),
        ui::header_cell("Last Request"),
    ]);
    table.add_row(vec![
        Cell::new(quota.date),
        Cell::new(quota.request_count),
        ui::remaining_cell(quota.remaining),
        Cell::new(quota.daily_limit),
        ui::format_optional_cell(quota.last_request_at.clone(), |t| t),
    ]);
    println!("{table}");

    let (stocks, currencies, funds) = try_join!(
        ctx.stocks.summaries(),
        ctx.currencies.summaries(),
        ctx.funds.cached_funds()
    )?;
    let sections = [
        ("Stocks", stocks),
        ("Currencies", currencies),
        ("Funds", funds),
    ];
    for (title, entries) in sections {
        println!("\n{}", ui::style_text(title, StyleType::Title));
        if entries.is_empty() {
            println!("{}", ui::style_text("Nothing cached", StyleType::Subtle));
        } else {
            println!("{}", entries_table(&entries));
        }
    }
    Ok(())
}

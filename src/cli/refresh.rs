use super::ui::{self, StyleType};
use crate::core::ServiceResult;
use crate::resource::{Served, Source};
use crate::{AppContext, RefreshTarget};
use anyhow::Result;

/// Runs the normal fetch-or-serve flow once and reports the outcome.
pub async fn run(ctx: &AppContext, target: &RefreshTarget) -> Result<()> {
    let now = ctx.clock.now();
    let spinner = ui::new_spinner(&format!("Refreshing {}", describe(target)));

    let outcome = match target {
        RefreshTarget::Stocks => summarize(ctx.stocks.serve(now).await, |s| {
            format!("{} stocks from {}", s.stocks.len(), s.source)
        }),
        RefreshTarget::Currencies => summarize(ctx.currencies.serve(now).await, |s| {
            format!(
                "{} currencies, {} gold, {} crypto from {}",
                s.currencies.len(),
                s.gold.len(),
                s.crypto.len(),
                s.source
            )
        }),
        RefreshTarget::Fund(code) => summarize(ctx.funds.detail(code, None, now).await, |d| {
            let price = d
                .last_price
                .map_or_else(|| "no quoted price".to_string(), |p| format!("last price {p}"));
            format!("{}: {} series points, {}", d.code, d.series.len(), price)
        }),
    };
    spinner.finish_and_clear();

    match outcome {
        Ok(lines) => {
            for line in lines {
                println!("{line}");
            }
            Ok(())
        }
        Err(e) => {
            println!("{}", ui::style_text(&e.to_string(), StyleType::Error));
            Err(e.into())
        }
    }
}

fn describe(target: &RefreshTarget) -> String {
    match target {
        RefreshTarget::Stocks => "stocks".to_string(),
        RefreshTarget::Currencies => "currencies".to_string(),
        RefreshTarget::Fund(code) => format!("fund {}", code.trim().to_uppercase()),
    }
}

fn summarize<T>(
    result: ServiceResult<Served<T>>,
    describe_data: impl Fn(&T) -> String,
) -> ServiceResult<Vec<String>> {
    let served = result?;
    let origin = match served.source {
        Source::Api => ui::style_text("fetched from upstream", StyleType::Good),
        Source::Cache => ui::style_text("served from cache", StyleType::Subtle),
    };
    let mut lines = vec![
        format!("{} ({origin})", describe_data(&served.data)),
        format!("Data date {}, fetched at {}", served.date, served.fetched_at),
    ];
    if let Some(warning) = &served.warning {
        lines.push(ui::style_text(warning, StyleType::Warning));
    }
    if let Some(quota) = &served.quota {
        lines.push(format!(
            "Fund quota: {}/{} used, {} remaining",
            quota.request_count, quota.daily_limit, quota.remaining
        ));
    }
    Ok(lines)
}

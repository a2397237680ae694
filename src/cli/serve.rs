use crate::AppContext;
use crate::server;
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

pub async fn run(ctx: Arc<AppContext>) -> Result<()> {
    let window = ctx.config.schedule.window()?;
    let checkpoints: Vec<String> = window.checkpoints().iter().map(|c| c.to_string()).collect();
    info!(
        timezone = %ctx.config.timezone,
        checkpoints = %checkpoints.join(", "),
        fund_quota = ctx.funds.daily_limit(),
        "Starting finpulse server"
    );
    server::serve(ctx).await
}

//! Currency and stock endpoints backed by the scheduled resources.

use super::AppState;
use super::error::{ApiError, ApiResult};
use super::response::Envelope;
use crate::core::market::{ExchangeRates, GoldPrices, RateSnapshot, StockSnapshot};
use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use chrono::NaiveDate;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct DateQuery {
    pub date: Option<String>,
}

/// `YYYY-MM-DD`, blank treated as absent.
pub fn parse_date(raw: Option<&str>) -> ApiResult<Option<NaiveDate>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| ApiError::bad_request(format!("Invalid date '{s}', expected YYYY-MM-DD"))),
    }
}

async fn getmain(State(state): State<AppState>) -> ApiResult<Json<Envelope<RateSnapshot>>> {
    let served = state.currencies.serve(state.clock.now()).await?;
    Ok(Json(served.into()))
}

async fn exchange_rates(
    State(state): State<AppState>,
) -> ApiResult<Json<Envelope<ExchangeRates>>> {
    let served = state.currencies.serve(state.clock.now()).await?;
    Ok(Json(served.map(|s| s.exchange_rates()).into()))
}

async fn gold_prices(State(state): State<AppState>) -> ApiResult<Json<Envelope<GoldPrices>>> {
    let served = state.currencies.serve(state.clock.now()).await?;
    Ok(Json(served.map(|s| s.gold_prices()).into()))
}

async fn borsa(State(state): State<AppState>) -> ApiResult<Json<Envelope<StockSnapshot>>> {
    let served = state.stocks.serve(state.clock.now()).await?;
    Ok(Json(served.into()))
}

async fn borsa_list(
    State(state): State<AppState>,
    Query(query): Query<DateQuery>,
) -> ApiResult<Json<Envelope<StockSnapshot>>> {
    let now = state.clock.now();
    let date = parse_date(query.date.as_deref())?.unwrap_or(now.date());
    let served = state.stocks.serve_for_date(date, now).await?;
    Ok(Json(served.into()))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/getmain/", get(getmain))
        .route("/exchange-rates/", get(exchange_rates))
        .route("/gold-prices/", get(gold_prices))
        .route("/borsa/", get(borsa))
        .route("/borsa/list/", get(borsa_list))
}

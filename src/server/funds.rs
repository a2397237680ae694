use super::AppState;
use super::error::ApiResult;
use super::market::parse_date;
use super::response::{DataResponse, Envelope};
use crate::core::QuotaStatus;
use crate::core::market::FundDetail;
use crate::funds::{CatalogEntry, PriceCheck};
use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
struct FundQuery {
    fund_code: Option<String>,
    date: Option<String>,
}

async fn list_funds(
    State(state): State<AppState>,
) -> ApiResult<Json<DataResponse<Vec<CatalogEntry>>>> {
    Ok(Json(DataResponse::new(state.funds.catalog().await?)))
}

async fn fund_detail(
    State(state): State<AppState>,
    Query(query): Query<FundQuery>,
) -> ApiResult<Json<Envelope<FundDetail>>> {
    let date = parse_date(query.date.as_deref())?;
    let code = query.fund_code.unwrap_or_default();
    let served = state.funds.detail(&code, date, state.clock.now()).await?;
    Ok(Json(served.into()))
}

async fn fund_quota(State(state): State<AppState>) -> ApiResult<Json<DataResponse<QuotaStatus>>> {
    let status = state.funds.quota_status(state.clock.now()).await?;
    Ok(Json(DataResponse::new(status)))
}

async fn fund_price_check(
    State(state): State<AppState>,
    Query(query): Query<FundQuery>,
) -> ApiResult<Json<DataResponse<PriceCheck>>> {
    let date = parse_date(query.date.as_deref())?;
    let code = query.fund_code.unwrap_or_default();
    let check = state.funds.price_check(&code, date, state.clock.now()).await?;
    Ok(Json(DataResponse::new(check)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/funds/", get(list_funds))
        .route("/fund-detail/", get(fund_detail))
        .route("/fund-quota/", get(fund_quota))
        .route("/fund-price-check/", get(fund_price_check))
}

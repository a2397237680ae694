use super::AppState;
use super::auth::AuthUser;
use super::error::ApiResult;
use super::response::DataResponse;
use crate::records::{
    Investment, InvestmentTransaction, NewInvestment, NewInvestmentTransaction, NewTransaction,
    Transaction, TransactionFilter,
};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get},
};

async fn list_transactions(
    State(state): State<AppState>,
    AuthUser(uid): AuthUser,
    Query(filter): Query<TransactionFilter>,
) -> ApiResult<Json<DataResponse<Vec<Transaction>>>> {
    let items = state.records.list_transactions(&uid, &filter).await?;
    Ok(Json(DataResponse::new(items)))
}

async fn create_transaction(
    State(state): State<AppState>,
    AuthUser(uid): AuthUser,
    Json(input): Json<NewTransaction>,
) -> ApiResult<(StatusCode, Json<DataResponse<Transaction>>)> {
    let tx = state
        .records
        .create_transaction(&uid, input, state.clock.now())
        .await?;
    Ok((StatusCode::CREATED, Json(DataResponse::new(tx))))
}

async fn delete_transaction(
    State(state): State<AppState>,
    AuthUser(uid): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.records.delete_transaction(&uid, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_investments(
    State(state): State<AppState>,
    AuthUser(uid): AuthUser,
) -> ApiResult<Json<DataResponse<Vec<Investment>>>> {
    Ok(Json(DataResponse::new(
        state.records.list_investments(&uid).await?,
    )))
}

async fn create_investment(
    State(state): State<AppState>,
    AuthUser(uid): AuthUser,
    Json(input): Json<NewInvestment>,
) -> ApiResult<(StatusCode, Json<DataResponse<Investment>>)> {
    let investment = state
        .records
        .create_investment(&uid, input, state.clock.now())
        .await?;
    Ok((StatusCode::CREATED, Json(DataResponse::new(investment))))
}

async fn delete_investment(
    State(state): State<AppState>,
    AuthUser(uid): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.records.delete_investment(&uid, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_investment_transactions(
    State(state): State<AppState>,
    AuthUser(uid): AuthUser,
    Path(investment_id): Path<String>,
) -> ApiResult<Json<DataResponse<Vec<InvestmentTransaction>>>> {
    let items = state
        .records
        .list_investment_transactions(&uid, &investment_id)
        .await?;
    Ok(Json(DataResponse::new(items)))
}

async fn create_investment_transaction(
    State(state): State<AppState>,
    AuthUser(uid): AuthUser,
    Path(investment_id): Path<String>,
    Json(input): Json<NewInvestmentTransaction>,
) -> ApiResult<(StatusCode, Json<DataResponse<InvestmentTransaction>>)> {
    let tx = state
        .records
        .create_investment_transaction(&uid, &investment_id, input, state.clock.now())
        .await?;
    Ok((StatusCode::CREATED, Json(DataResponse::new(tx))))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/transactions/",
            get(list_transactions).post(create_transaction),
        )
        .route("/transactions/{id}/", delete(delete_transaction))
        .route(
            "/investments/",
            get(list_investments).post(create_investment),
        )
        .route("/investments/{id}/", delete(delete_investment))
        .route(
            "/investments/{id}/transactions/",
            get(list_investment_transactions).post(create_investment_transaction),
        )
}

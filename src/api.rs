//! Thin HTTP/WebSocket wiring.
//!
//! No business logic lives here: handlers validate nothing beyond shape and
//! delegate to the stores. The auth collaborator (out of scope) supplies the
//! user identity; here it arrives as a plain field.

use crate::error::{as_engine_error, EngineError};
use crate::ledger::{Ledger, TxKind};
use crate::models::Currency;
use crate::notifier::{Notifier, WsEvent};
use crate::presence::PresenceTracker;
use crate::rounds::RoundStore;
use crate::settlement::Settler;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, warn};

#[derive(Clone)]
pub struct AppState {
    pub ledger: Ledger,
    pub rounds: RoundStore,
    pub settler: Settler,
    pub presence: PresenceTracker,
    pub notifier: Notifier,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket_handler))
        .route("/api/wallet/:user_id", get(get_wallet))
        .route("/api/wallet/:user_id/transactions", get(get_transactions))
        .route("/api/wallet/:user_id/adjust", post(post_adjust))
        .route("/api/wallet/deposit", post(post_deposit))
        .route("/api/bets", post(post_place_bet))
        .route("/api/bets/:id/edit", post(post_edit_bet))
        .route("/api/bets/:id/cancel", post(post_cancel_bet))
        .route("/api/streams", post(post_create_stream))
        .route("/api/rounds", post(post_create_round))
        .route("/api/rounds/:id", get(get_round))
        .route("/api/rounds/:id/open", post(post_open_round))
        .route("/api/rounds/:id/lock", post(post_lock_round))
        .route("/api/rounds/:id/settle", post(post_settle_round))
        .route("/api/rounds/:id/cancel", post(post_cancel_round))
        .route("/api/rounds/:id/report", get(get_report))
        .route("/api/rounds/:id/summaries", get(get_round_summaries))
        .route("/api/rounds/:id/bets/:user_id", get(get_user_round_bets))
        .route("/api/users/:user_id/disconnect", post(post_disconnect_user))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Map a rejection to a status code: validation 400, conflicts 409,
/// missing entities 404, everything else 500.
fn error_response(err: anyhow::Error) -> Response {
    let (status, message) = match as_engine_error(&err) {
        Some(
            EngineError::InvalidAmount { .. }
            | EngineError::InsufficientFunds { .. }
            | EngineError::BetNotEditable { .. }
            | EngineError::WinnerNotInRound { .. },
        ) => (StatusCode::BAD_REQUEST, err.to_string()),
        Some(
            EngineError::RoundNotOpen { .. }
            | EngineError::RoundNotLocked { .. }
            | EngineError::AlreadySettled { .. },
        ) => (StatusCode::CONFLICT, err.to_string()),
        Some(EngineError::NotFound { .. }) => (StatusCode::NOT_FOUND, err.to_string()),
        None => {
            warn!(error = %err, "Request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            )
        }
    };
    (status, Json(json!({ "error": message }))).into_response()
}

async fn get_wallet(State(state): State<AppState>, Path(user_id): Path<String>) -> Response {
    match state.ledger.balances(&user_id).await {
        Ok(w) => Json(w).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
struct TransactionsQuery {
    #[serde(default = "default_tx_limit")]
    limit: u32,
}

fn default_tx_limit() -> u32 {
    50
}

async fn get_transactions(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<TransactionsQuery>,
) -> Response {
    match state
        .ledger
        .transactions_for_user(&user_id, query.limit)
        .await
    {
        Ok(txs) => Json(txs).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
struct AdjustRequest {
    currency: Currency,
    /// Signed: positive credits, negative debits.
    amount: f64,
}

/// Admin balance adjustment.
async fn post_adjust(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(req): Json<AdjustRequest>,
) -> Response {
    let result = if req.amount >= 0.0 {
        state
            .ledger
            .deposit(&user_id, req.currency, req.amount, TxKind::AdminCredit)
            .await
    } else {
        state
            .ledger
            .admin_debit(&user_id, req.currency, -req.amount)
            .await
    };
    match result {
        Ok(balance) => {
            state.notifier.send_to_user(
                &user_id,
                &WsEvent::BalanceUpdated {
                    user_id: user_id.clone(),
                    currency: req.currency,
                    balance,
                },
            );
            Json(json!({ "balance": balance })).into_response()
        }
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
struct DepositRequest {
    user_id: String,
    currency: Currency,
    amount: f64,
}

/// Funds on-ramp entry point: the payments collaborator calls this after a
/// successful checkout.
async fn post_deposit(State(state): State<AppState>, Json(req): Json<DepositRequest>) -> Response {
    match state
        .ledger
        .deposit(&req.user_id, req.currency, req.amount, TxKind::Deposit)
        .await
    {
        Ok(balance) => {
            state.notifier.send_to_user(
                &req.user_id,
                &WsEvent::BalanceUpdated {
                    user_id: req.user_id.clone(),
                    currency: req.currency,
                    balance,
                },
            );
            Json(json!({ "balance": balance })).into_response()
        }
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
struct PlaceBetRequest {
    user_id: String,
    variable_id: String,
    currency: Currency,
    amount: f64,
}

async fn post_place_bet(
    State(state): State<AppState>,
    Json(req): Json<PlaceBetRequest>,
) -> Response {
    let bet = match state
        .rounds
        .place_bet(&req.user_id, &req.variable_id, req.currency, req.amount)
        .await
    {
        Ok(bet) => bet,
        Err(e) => return error_response(e),
    };
    if let Ok(round) = state.rounds.round_by_id(&bet.round_id).await {
        state.presence.mark_participant(&round.stream_id, &bet.user_id);
    }
    Json(bet).into_response()
}

#[derive(Deserialize)]
struct EditBetRequest {
    user_id: String,
    amount: f64,
}

async fn post_edit_bet(
    State(state): State<AppState>,
    Path(bet_id): Path<String>,
    Json(req): Json<EditBetRequest>,
) -> Response {
    match state.rounds.edit_bet(&bet_id, &req.user_id, req.amount).await {
        Ok(bet) => Json(bet).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
struct CancelBetRequest {
    user_id: String,
}

async fn post_cancel_bet(
    State(state): State<AppState>,
    Path(bet_id): Path<String>,
    Json(req): Json<CancelBetRequest>,
) -> Response {
    match state.rounds.cancel_bet(&bet_id, &req.user_id).await {
        Ok(bet) => Json(bet).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
struct CreateStreamRequest {
    title: String,
    creator_user_id: Option<String>,
    #[serde(default)]
    creator_rev_share_pct: f64,
}

async fn post_create_stream(
    State(state): State<AppState>,
    Json(req): Json<CreateStreamRequest>,
) -> Response {
    match state
        .rounds
        .create_stream(
            &req.title,
            req.creator_user_id.as_deref(),
            req.creator_rev_share_pct,
        )
        .await
    {
        Ok(stream) => Json(stream).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
struct CreateRoundRequest {
    stream_id: String,
    name: String,
    category: String,
    lock_at: Option<chrono::DateTime<chrono::Utc>>,
    variables: Vec<String>,
}

async fn post_create_round(
    State(state): State<AppState>,
    Json(req): Json<CreateRoundRequest>,
) -> Response {
    let names: Vec<&str> = req.variables.iter().map(String::as_str).collect();
    match state
        .rounds
        .create_round(&req.stream_id, &req.name, &req.category, req.lock_at, &names)
        .await
    {
        Ok((round, variables)) => {
            Json(json!({ "round": round, "variables": variables })).into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn get_round(State(state): State<AppState>, Path(round_id): Path<String>) -> Response {
    let round = match state.rounds.round_by_id(&round_id).await {
        Ok(round) => round,
        Err(e) => return error_response(e),
    };
    match state.rounds.variables_for_round(&round_id).await {
        Ok(variables) => Json(json!({ "round": round, "variables": variables })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn post_open_round(State(state): State<AppState>, Path(round_id): Path<String>) -> Response {
    if let Err(e) = state.rounds.open_round(&round_id).await {
        return error_response(e);
    }
    match state.rounds.round_by_id(&round_id).await {
        Ok(round) => {
            state.notifier.broadcast_to_stream(
                &round.stream_id,
                &WsEvent::RoundOpened {
                    round_id: round.id.clone(),
                    stream_id: round.stream_id.clone(),
                    name: round.name.clone(),
                },
            );
            Json(round).into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn post_lock_round(State(state): State<AppState>, Path(round_id): Path<String>) -> Response {
    match state.rounds.lock_round(&round_id).await {
        Ok(transitioned) => {
            if transitioned {
                if let Ok(round) = state.rounds.round_by_id(&round_id).await {
                    state.notifier.broadcast_to_stream(
                        &round.stream_id,
                        &WsEvent::RoundLocked {
                            round_id: round_id.clone(),
                            stream_id: round.stream_id.clone(),
                        },
                    );
                }
            }
            Json(json!({ "locked": true })).into_response()
        }
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
struct SettleRequest {
    winning_variable_id: String,
}

async fn post_settle_round(
    State(state): State<AppState>,
    Path(round_id): Path<String>,
    Json(req): Json<SettleRequest>,
) -> Response {
    match state
        .settler
        .settle_round(&round_id, &req.winning_variable_id)
        .await
    {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => error_response(e),
    }
}

async fn post_cancel_round(
    State(state): State<AppState>,
    Path(round_id): Path<String>,
) -> Response {
    match state.settler.cancel_round(&round_id).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_report(State(state): State<AppState>, Path(round_id): Path<String>) -> Response {
    match state.settler.payout_report(&round_id).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_round_summaries(
    State(state): State<AppState>,
    Path(round_id): Path<String>,
) -> Response {
    match state.settler.round_summaries(&round_id).await {
        Ok(summaries) => Json(summaries).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_user_round_bets(
    State(state): State<AppState>,
    Path((round_id, user_id)): Path<(String, String)>,
) -> Response {
    match state.rounds.bets_for_user_in_round(&round_id, &user_id).await {
        Ok(bets) => Json(bets).into_response(),
        Err(e) => error_response(e),
    }
}

/// Policy enforcement hook: force-close every live connection of one user.
async fn post_disconnect_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Response {
    let dropped = state.notifier.disconnect_user(&user_id);
    Json(json!({ "dropped": dropped })).into_response()
}

#[derive(Deserialize)]
struct WsQuery {
    user_id: String,
    stream_id: String,
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.user_id, query.stream_id))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, user_id: String, stream_id: String) {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let conn_id = state.notifier.register(&user_id, &stream_id, tx);
    let count = state.presence.connect(&stream_id, &user_id);
    state.notifier.broadcast_to_stream(
        &stream_id,
        &WsEvent::ViewerCount {
            stream_id: stream_id.clone(),
            count,
        },
    );

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                let msg = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
                if socket.send(Message::Text(msg)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = socket.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(conn_id, error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    state.notifier.unregister(conn_id);
    let count = state.presence.disconnect(&stream_id, &user_id);
    state.notifier.broadcast_to_stream(
        &stream_id,
        &WsEvent::ViewerCount {
            stream_id: stream_id.clone(),
            count,
        },
    );
}

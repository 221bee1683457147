use std::collections::HashMap;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        RawQuery, State,
    },
    response::Response,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::{error::ApiError, state::AppState, ws_connection};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket_upgrade))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "state_version": state.engine.state().version,
    }))
}

/// 先校验会话再升级：无效会话得到 401，不会建立 WebSocket
async fn websocket_upgrade(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    let session_id = session_id_from_query(query.as_deref())
        .ok_or_else(|| ApiError::unauthorized("missing session id"))?;

    if !state.engine.verify_session(&session_id).await? {
        debug!("拒绝无效会话");
        return Err(ApiError::unauthorized("invalid session"));
    }

    let ws = ws.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    info!("WebSocket 升级请求已通过会话校验");

    let engine = state.engine.clone();
    Ok(ws.on_upgrade(move |socket| ws_connection::serve(socket, engine, session_id)))
}

/// 客户端有时会把整个 `/?sessionId=...` 作为查询串发送，这里先去掉前缀再按表单编码解码
fn session_id_from_query(query: Option<&str>) -> Option<String> {
    let cleaned = query?.trim_start_matches("/?").trim_start_matches('?');
    let params: HashMap<String, String> = serde_urlencoded::from_str(cleaned).ok()?;
    params
        .get("sessionId")
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_from_query() {
        assert_eq!(
            session_id_from_query(Some("sessionId=abc")).as_deref(),
            Some("abc")
        );
        assert_eq!(
            session_id_from_query(Some("/?sessionId=abc&x=1")).as_deref(),
            Some("abc")
        );
        assert_eq!(
            session_id_from_query(Some("x=1&sessionId=def")).as_deref(),
            Some("def")
        );
        assert_eq!(
            session_id_from_query(Some("sessionId=abc%2Bdef%3D%3D")).as_deref(),
            Some("abc+def==")
        );
        assert_eq!(
            session_id_from_query(Some("/?sessionId=a%2Fb%25c")).as_deref(),
            Some("a/b%c")
        );
        assert_eq!(session_id_from_query(Some("sessionId=")), None);
        assert_eq!(session_id_from_query(Some("other=1")), None);
        assert_eq!(session_id_from_query(None), None);
    }
}

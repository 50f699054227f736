//! Plain-text handlers for every hub endpoint. Recoverable failures become
//! short status strings in the body; HTTP status stays 200 so the thin
//! producer clients only ever parse the body.

use axum::body::Bytes;
use axum::extract::{Multipart, Query, State};
use axum::http::HeaderMap;
use serde::Deserialize;
use tracing::error;

use crate::api::state::AppState;
use crate::fleet::protocol::QuantEvent;
use crate::intel::types::{Intel, IntelMenu};
use crate::notify::notice::Notice;

// #region intel

pub async fn intel_new(State(state): State<AppState>, body: Bytes) -> String {
    match serde_json::from_slice::<Intel>(&body) {
        Ok(intel) => {
            state.intel.process_intel(intel).await;
            "ok".to_string()
        }
        Err(e) => {
            error!("parse intel body error, err={}", e);
            "internal error".to_string()
        }
    }
}

pub async fn intel_menu(State(state): State<AppState>, body: Bytes) -> String {
    match serde_json::from_slice::<IntelMenu>(&body) {
        Ok(menu) => {
            state.intel.handle_menu(menu);
            "ok".to_string()
        }
        Err(e) => {
            error!("parse menu body error, err={}", e);
            "internal error".to_string()
        }
    }
}

pub async fn dingbot_message_assist(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> String {
    state.intel.handle_ding_msg(&headers, &body).await
}

// #endregion

// #region fleet

pub async fn dingbot_strategy(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> String {
    state.fleet.handle_ding_msg(&headers, &body).await
}

pub async fn quantevent_new(State(state): State<AppState>, body: Bytes) -> String {
    match serde_json::from_slice::<QuantEvent>(&body) {
        Ok(event) => {
            state.fleet.send_quant_event(&event.name, event.params).await;
            "ok".to_string()
        }
        Err(e) => {
            error!("parse quantevent body error, err={}", e);
            "internal error".to_string()
        }
    }
}

// #endregion

// #region notify

pub async fn notify_send(State(state): State<AppState>, body: Bytes) -> String {
    match serde_json::from_slice::<Notice>(&body) {
        Ok(ntf) => state.notify.submit(ntf).await,
        Err(e) => {
            error!("parse notify body error, err={}", e);
            "internal error".to_string()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct NotifyStartQuery {
    #[serde(default)]
    name: String,
    #[serde(default)]
    specmob: String,
}

pub async fn notify_start(
    State(state): State<AppState>,
    Query(q): Query<NotifyStartQuery>,
) -> String {
    state.notify.start_or_alive(&q.name, &q.specmob).await
}

#[derive(Debug, Deserialize)]
pub struct NotifyNameQuery {
    #[serde(default)]
    name: String,
}

pub async fn notify_stop(
    State(state): State<AppState>,
    Query(q): Query<NotifyNameQuery>,
) -> String {
    state.notify.stop(&q.name).await
}

pub async fn notify_status(State(state): State<AppState>) -> String {
    state.notify.status_dump(&state.kv_addr).await
}

// #endregion

// #region active status

#[derive(Debug, Deserialize)]
pub struct ActiveUpdateQuery {
    #[serde(default)]
    guid: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    code: String,
    #[serde(default)]
    max_stuck: String,
}

pub async fn active_status_update(
    State(state): State<AppState>,
    Query(q): Query<ActiveUpdateQuery>,
) -> String {
    if q.guid.is_empty() {
        return "missing guid".to_string();
    }
    if q.name.is_empty() {
        return "missing name".to_string();
    }
    if q.code.is_empty() {
        return "missing code".to_string();
    }
    if q.max_stuck.is_empty() {
        return "missing max_stuck".to_string();
    }
    let Ok(code) = q.code.parse::<i64>() else {
        return "can't convert code to int".to_string();
    };
    let Ok(max_stuck) = q.max_stuck.parse::<i64>() else {
        return "can't convert max_stuck to int".to_string();
    };
    state.active_status.refresh(&q.guid, &q.name, code, max_stuck).await;
    "ok".to_string()
}

#[derive(Debug, Deserialize)]
pub struct ActiveQuitQuery {
    #[serde(default)]
    guid: String,
}

pub async fn active_status_quit(
    State(state): State<AppState>,
    Query(q): Query<ActiveQuitQuery>,
) -> String {
    if q.guid.is_empty() {
        return "missing guid".to_string();
    }
    state.active_status.clear(&q.guid).await;
    "ok".to_string()
}

pub async fn active_status_list(State(state): State<AppState>) -> String {
    state.active_status.list_dump().await
}

// #endregion

// #region files

pub async fn files_upload(State(state): State<AppState>, mut multipart: Multipart) -> String {
    let mut main_folder = String::new();
    let mut sub_folder = String::new();
    let mut file: Option<(String, Vec<u8>)> = None;

    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                let field_name = field.name().unwrap_or("").to_string();
                match field_name.as_str() {
                    "main_folder" => main_folder = field.text().await.unwrap_or_default(),
                    "sub_folder" => sub_folder = field.text().await.unwrap_or_default(),
                    "file" => {
                        let name = field.file_name().unwrap_or("").to_string();
                        match field.bytes().await {
                            Ok(bytes) => file = Some((name, bytes.to_vec())),
                            Err(e) => {
                                error!("upload read error: {}", e);
                                return "read file failed".to_string();
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(None) => break,
            Err(e) => {
                error!("multipart parse error: {}", e);
                return "internal error".to_string();
            }
        }
    }

    let Some((name, bytes)) = file else {
        return "missing file".to_string();
    };
    state
        .files
        .save_upload(&main_folder, &sub_folder, &name, &bytes)
        .await
}

#[derive(Debug, Deserialize)]
pub struct FileDeleteQuery {
    #[serde(default)]
    file_name: String,
    #[serde(default)]
    main_folder: String,
    #[serde(default)]
    sub_folder: String,
}

pub async fn files_delete(
    State(state): State<AppState>,
    Query(q): Query<FileDeleteQuery>,
) -> String {
    state
        .files
        .delete(&q.main_folder, &q.sub_folder, &q.file_name)
        .await
}

// #endregion

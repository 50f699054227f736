use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::api::{handlers, state::AppState};

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // intel bus
        .route("/intel/new", post(handlers::intel_new))
        .route("/intel/menu", post(handlers::intel_menu))
        .route("/dingbots/message_assist", post(handlers::dingbot_message_assist))
        // strategy coordination
        .route("/dingbots/stratergy", post(handlers::dingbot_strategy))
        .route("/quantevent/new", post(handlers::quantevent_new))
        // notification engine
        .route("/ant/notify/send", post(handlers::notify_send))
        .route("/ant/notify/start", get(handlers::notify_start))
        .route("/ant/notify/alive", get(handlers::notify_start))
        .route("/ant/notify/stop", get(handlers::notify_stop))
        .route("/ant/notify/status", get(handlers::notify_status))
        // stuck detector
        .route("/active_status/update", get(handlers::active_status_update))
        .route("/active_status/quit", get(handlers::active_status_quit))
        .route("/active_status/list", get(handlers::active_status_list))
        // file mirror
        .route("/files/upload", post(handlers::files_upload))
        .route("/files/delete", delete(handlers::files_delete))
        .with_state(state)
        .layer(cors)
}

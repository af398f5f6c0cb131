//! HTTP and WebSocket surface.
//!
//! Thin edge over the core: room creation and listing over REST, session and
//! lobby signaling over WebSocket upgrades.

use std::sync::Arc;

use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, warn};
use uuid::Uuid;

use parlor_core::lobby::LobbySignaling;
use parlor_core::registry::RoomRegistry;
use parlor_core::room::Room;
use parlor_core::rtc::RtcPeer;
use parlor_core::session::Session;
use parlor_core::Config;

use crate::ws;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<RoomRegistry>,
    pub lobby: Arc<LobbySignaling>,
}

pub fn router(state: AppState) -> Router {
    // Signaling is meant to be reachable from pages served elsewhere, so the
    // surface is deliberately permissive about origins.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/create/room", post(create_room))
        .route("/room/:roomid/webSocket", get(join_room))
        .route("/roomsinfo/webSocket", get(lobby_socket))
        .route("/getRoomsID", get(get_rooms))
        .layer(cors)
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct RoomInfo {
    #[serde(rename = "roomID")]
    room_id: Uuid,
    #[serde(rename = "roomURL")]
    room_url: String,
    #[serde(rename = "roomWebsocketURL")]
    room_websocket_url: String,
    #[serde(rename = "created_time")]
    created_time: DateTime<Utc>,
}

fn room_info(config: &Config, room: &Room) -> RoomInfo {
    let domain = &config.server.public_domain;
    let id = room.id();
    RoomInfo {
        room_id: id,
        room_url: format!("https://{domain}/room/{id}"),
        room_websocket_url: format!("wss://{domain}/room/{id}/webSocket"),
        created_time: room.created_at(),
    }
}

async fn create_room(State(state): State<AppState>) -> Json<RoomInfo> {
    let room = state.registry.create().await;
    Json(room_info(&state.config, &room))
}

async fn get_rooms(State(state): State<AppState>) -> Json<Vec<RoomInfo>> {
    let mut rooms: Vec<RoomInfo> = state
        .registry
        .rooms()
        .await
        .iter()
        .map(|room| room_info(&state.config, room))
        .collect();
    rooms.sort_by_key(|info| info.created_time);
    Json(rooms)
}

/// Session signaling endpoint. Room validation happens before the upgrade so
/// an unknown room is an HTTP 400, and a media-stack construction failure an
/// HTTP 500, not a WebSocket that dies immediately.
async fn join_room(
    State(state): State<AppState>,
    Path(roomid): Path<String>,
    upgrade: WebSocketUpgrade,
) -> Response {
    let room_id = match Uuid::parse_str(&roomid) {
        Ok(id) => id,
        Err(e) => {
            warn!(roomid = %roomid, error = %e, "malformed room id");
            return (StatusCode::BAD_REQUEST, "malformed room id").into_response();
        }
    };

    let Some(room) = state.registry.lookup(room_id).await else {
        warn!(room = %room_id, "room does not exist");
        return (
            StatusCode::BAD_REQUEST,
            format!("room {room_id} doesn't exist"),
        )
            .into_response();
    };

    let (peer, events) = match RtcPeer::connect(&state.config.webrtc).await {
        Ok(pair) => pair,
        Err(e) => {
            error!(room = %room_id, error = %e, "peer connection construction failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "peer connection setup failed",
            )
                .into_response();
        }
    };

    let config = Arc::clone(&state.config);
    upgrade.on_upgrade(move |socket| async move {
        let (sink, stream) = ws::split(socket);
        let session = Session::new(room, peer, sink);
        session.run(events, stream, &config.room).await;
    })
}

/// Lobby signaling endpoint.
async fn lobby_socket(State(state): State<AppState>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| async move {
        let (sink, stream) = ws::split(socket);
        state
            .lobby
            .run_subscriber(&state.registry, sink, stream)
            .await;
    })
}

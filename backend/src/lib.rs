use std::env;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use draw_core::{
    encode_state, shared_draw, DrawError, DrawResult, Participant, Roster, RosterError,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Flavor text shown next to a revealed assignment. External generators plug
// in here; the bundled grinch answers immediately, so the reveal flow never
// blocks on a third party.
pub trait PoemSource: Send + Sync {
    fn poem(&self, giver: &str, receiver: &str) -> String;
}

pub struct GrinchPoet;

impl PoemSource for GrinchPoet {
    fn poem(&self, giver: &str, receiver: &str) -> String {
        format!("¡Oye tú, {giver}! Te toca darle un regalo a {receiver}. ¡No seas tacaño!")
    }
}

// The server keeps no draw state: everything lives in the share token.
#[derive(Clone)]
pub struct ServerState {
    poet: Arc<dyn PoemSource>,
}

impl Default for ServerState {
    fn default() -> Self {
        Self {
            poet: Arc::new(GrinchPoet),
        }
    }
}

impl ServerState {
    pub fn with_poet(poet: Arc<dyn PoemSource>) -> Self {
        Self { poet }
    }
}

pub fn app(state: ServerState) -> Router {
    Router::new()
        .route("/draw", post(create_draw))
        .route("/reveal/:token", get(reveal_roster))
        .route("/reveal/:token/:participant_id", get(reveal_assignment))
        .with_state(state)
}

fn admin_password() -> String {
    env::var("ADMIN_PASSWORD").unwrap_or_else(|_| "navidad2025".to_string())
}

fn public_base_url() -> String {
    env::var("PUBLIC_BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string())
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[derive(Deserialize)]
struct DrawRequest {
    participants: Vec<ParticipantInput>,
}

#[derive(Deserialize)]
struct ParticipantInput {
    id: Option<String>,
    name: String,
    #[serde(default)]
    exclusions: Vec<String>,
}

#[derive(Deserialize)]
struct DrawParams {
    seed: Option<u64>,
}

#[derive(Serialize)]
struct DrawResponse {
    token: String,
    share_url: String,
    timestamp: u64,
    draw: DrawResult,
}

#[derive(Debug, thiserror::Error)]
enum DrawRequestError {
    #[error("at least 2 participants required")]
    TooFewParticipants,
    #[error("{0}")]
    Roster(#[from] RosterError),
    #[error("constraints too strict, relax some exclusions")]
    Infeasible(#[from] DrawError),
    #[error("failed to encode share state")]
    Encoding,
}

impl DrawRequestError {
    fn status(&self) -> StatusCode {
        match self {
            Self::TooFewParticipants | Self::Roster(_) => StatusCode::BAD_REQUEST,
            Self::Infeasible(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Encoding => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

async fn create_draw(
    Query(params): Query<DrawParams>,
    headers: HeaderMap,
    Json(payload): Json<DrawRequest>,
) -> impl IntoResponse {
    let expected = admin_password();
    let provided = headers
        .get("x-admin-password")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if provided != expected {
        return (StatusCode::UNAUTHORIZED, "invalid admin password").into_response();
    }

    match run_draw(payload, params.seed) {
        Ok(body) => (StatusCode::CREATED, Json(body)).into_response(),
        Err(err) => (err.status(), err.to_string()).into_response(),
    }
}

fn run_draw(payload: DrawRequest, seed: Option<u64>) -> Result<DrawResponse, DrawRequestError> {
    if payload.participants.len() < 2 {
        return Err(DrawRequestError::TooFewParticipants);
    }

    let participants: Vec<Participant> = payload
        .participants
        .into_iter()
        .map(|p| Participant {
            id: p.id.unwrap_or_else(short_id),
            name: p.name.trim().to_string(),
            exclusions: p.exclusions,
        })
        .collect();
    let mut roster = Roster::from_participants(participants)?;

    let mut rng = seed
        .map(ChaCha8Rng::seed_from_u64)
        .unwrap_or_else(ChaCha8Rng::from_entropy);
    let draw = roster.perform_draw(&mut rng)?;

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let token = encode_state(&roster.to_state(timestamp));
    if token.is_empty() {
        return Err(DrawRequestError::Encoding);
    }
    let share_url = format!("{}/#{token}", public_base_url());

    Ok(DrawResponse {
        token,
        share_url,
        timestamp,
        draw,
    })
}

#[derive(Serialize)]
struct RosterEntry {
    id: String,
    name: String,
}

#[derive(Serialize)]
struct RevealRoster {
    participants: Vec<RosterEntry>,
    timestamp: u64,
}

// Identification step of the reveal flow: just the names for the picker,
// never the assignments or exclusions.
async fn reveal_roster(Path(token): Path<String>) -> impl IntoResponse {
    let Some(share) = shared_draw(&token) else {
        return (StatusCode::NOT_FOUND, "no draw behind this link").into_response();
    };

    let mut participants: Vec<RosterEntry> = share
        .participants
        .iter()
        .map(|p| RosterEntry {
            id: p.id.clone(),
            name: p.name.clone(),
        })
        .collect();
    participants.sort_by(|a, b| a.name.cmp(&b.name));

    (
        StatusCode::OK,
        Json(RevealRoster {
            participants,
            timestamp: share.timestamp,
        }),
    )
        .into_response()
}

#[derive(Serialize)]
struct RevealResponse {
    giver: String,
    receiver: String,
    poem: String,
}

async fn reveal_assignment(
    State(state): State<ServerState>,
    Path((token, participant_id)): Path<(String, String)>,
) -> impl IntoResponse {
    let Some(share) = shared_draw(&token) else {
        return (StatusCode::NOT_FOUND, "no draw behind this link").into_response();
    };
    let Some(draw) = &share.draw else {
        return (StatusCode::NOT_FOUND, "no draw behind this link").into_response();
    };

    let Some(giver) = share.participants.iter().find(|p| p.id == participant_id) else {
        return (StatusCode::NOT_FOUND, "participant not found").into_response();
    };
    let receiver = draw
        .get(&giver.id)
        .and_then(|receiver_id| share.participants.iter().find(|p| &p.id == receiver_id));
    let Some(receiver) = receiver else {
        return (StatusCode::NOT_FOUND, "participant not found").into_response();
    };

    let poem = state.poet.poem(&giver.name, &receiver.name);
    (
        StatusCode::OK,
        Json(RevealResponse {
            giver: giver.name.clone(),
            receiver: receiver.name.clone(),
            poem,
        }),
    )
        .into_response()
}

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use curio_core::frames::SequencedFrame;
use curio_core::ids::{GenerationId, MessageId};
use curio_core::validate::TriggerRequest;
use curio_store::conversations::ConversationRepo;
use curio_store::generations::GenerationRepo;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{error, warn};

use crate::error::ApiError;
use crate::server::AppState;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResponse {
    pub generation_id: GenerationId,
    pub assistant_message_id: MessageId,
}

/// POST /api/assist. Validates, records the user turn, kicks off a
/// background generation, and replies immediately with its ids.
pub async fn trigger(
    State(state): State<AppState>,
    Json(request): Json<TriggerRequest>,
) -> Result<(StatusCode, Json<TriggerResponse>), ApiError> {
    let params = request.validate()?;
    let conversations = ConversationRepo::new(state.db.clone());
    conversations.ensure(&params.conversation_id)?;
    if !conversations.can_write(&params.conversation_id)? {
        return Err(ApiError::Forbidden("conversation is archived"));
    }
    state.metrics.counter_inc("http.triggers.total", &[], 1);
    let receipt = state.orchestrator.trigger(params).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerResponse {
            generation_id: receipt.generation_id,
            assistant_message_id: receipt.assistant_message_id,
        }),
    ))
}

/// GET /api/assist/{generation_id}/stream. Replays the persisted frame log,
/// then follows the live broadcast until the terminal frame.
pub async fn stream(
    State(state): State<AppState>,
    Path(generation_id): Path<String>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let generation_id = GenerationId::from_raw(generation_id);
    GenerationRepo::new(state.db.clone()).get(&generation_id)?;

    // Subscribe before reading the log so nothing published in between is
    // lost; the sequence filter drops the overlap.
    let live = state.orchestrator.subscribe(&generation_id);
    let after = last_event_id(&headers);
    let replay: Vec<SequencedFrame> = state
        .frames
        .list_after_sequence(&generation_id, after)?
        .into_iter()
        .map(|row| row.sequenced())
        .collect();

    let events = merged_frames(after, replay, live).map(|frame| Ok::<_, Infallible>(frame_event(frame)));
    Ok(Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(KEEPALIVE_INTERVAL)
            .text("keep-alive"),
    ))
}

/// GET /api/assist/{generation_id}/export. Read-only snapshot of a finished
/// or in-flight generation. Raw error details and the thinking trace stay
/// out of the public payload.
pub async fn export(
    State(state): State<AppState>,
    Path(generation_id): Path<String>,
) -> Result<Response, ApiError> {
    let generation_id = GenerationId::from_raw(generation_id);
    let row = GenerationRepo::new(state.db.clone()).get(&generation_id)?;
    let payload = json!({
        "generationId": row.id,
        "conversationId": row.conversation_id,
        "assistantMessageId": row.assistant_message_id,
        "state": row.state,
        "content": row.content,
        "sources": row.sources,
        "createdAt": row.created_at,
        "updatedAt": row.updated_at,
    });

    if let Some(signer) = &state.signer {
        let signed = signer.sign(&payload.to_string());
        if signer.verify(&signed) {
            return Ok(Json(signed).into_response());
        }
        // A signature that does not check out is never served.
        error!(generation_id = %generation_id, "export signature failed self-verification");
    }
    Ok(Json(payload).into_response())
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

fn last_event_id(headers: &HeaderMap) -> i64 {
    headers
        .get("last-event-id")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(-1)
}

/// Replay followed by live frames, deduplicated by sequence number and cut
/// off inclusively at the first terminal frame. The stream ends there, so a
/// finished generation serves a plain bounded response body.
fn merged_frames(
    after: i64,
    replay: Vec<SequencedFrame>,
    live: Option<broadcast::Receiver<SequencedFrame>>,
) -> impl Stream<Item = SequencedFrame> {
    let live: BoxStream<'static, SequencedFrame> = match live {
        Some(rx) => BroadcastStream::new(rx)
            .filter_map(|item| {
                futures::future::ready(match item {
                    Ok(frame) => Some(frame),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(skipped, "sse subscriber lagged");
                        None
                    }
                })
            })
            .boxed(),
        None => futures::stream::empty().boxed(),
    };
    futures::stream::iter(replay)
        .chain(live)
        .scan((after, false), |(last_seen, finished), frame| {
            let step = if *finished {
                None
            } else if frame.sequence <= *last_seen {
                Some(None)
            } else {
                *last_seen = frame.sequence;
                *finished = frame.frame.is_terminal();
                Some(Some(frame))
            };
            futures::future::ready(step)
        })
        .filter_map(futures::future::ready)
}

fn frame_event(frame: SequencedFrame) -> Event {
    let event = Event::default()
        .id(frame.sequence.to_string())
        .event(frame.frame.frame_type());
    match serde_json::to_string(&frame) {
        Ok(data) => event.data(data),
        Err(err) => {
            error!(sequence = frame.sequence, error = %err, "frame failed to serialize");
            event.data("{}")
        }
    }
}

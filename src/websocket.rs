//! # WebSocket Audio Streaming Handler
//!
//! Transport for transcription sessions. Clients connect to `/ws` (or
//! `/api/v1/ws`), send one JSON text message per audio fragment and get one
//! JSON result back per fragment, in order.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: optional query parameters `decoder`, `language`, `model`
//!    pick the session's decoder; the session limit is checked before the upgrade
//! 2. **Fragments**: `{"fragmentId": "...", "audioData": "<base64 WAV>"}`
//!    (`chunkId` is accepted as an alias for `fragmentId`)
//! 3. **Results**: `{"chunkId": "...", "response": "success" | "error", "status": ...}`
//!    plus the transcript fields
//! 4. **Termination**: a session-fatal error is answered with an error result,
//!    then a close frame with the policy-violation code
//! 5. **Heartbeat**: the server pings periodically and drops silent clients
//!
//! ## Concurrency Model:
//! The actor only moves messages. The session itself runs in a separate tokio
//! task that owns the `SessionController`, pulls fragments from a bounded
//! backlog and posts results back to the actor. Stopping the actor aborts that task.
//!
//! ## Backpressure:
//! When decoding falls behind, at most `audio.max_buffer_seconds` of audio
//! waits in the backlog. A fragment beyond that is answered at once with
//! `status: "backlogged"`, possibly ahead of results for fragments still queued.

use crate::audio::backlog::{
    fragment_backlog, BacklogReceiver, BacklogSender, DEFAULT_MAX_MESSAGES,
};
use crate::audio::session::{
    run_session, AudioFragment, FragmentStatus, FragmentTransport, Inbound, OutboundResult,
    ResultError, SessionController,
};
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::transcription::{DecoderSpec, IncrementalTranscriber, ModelSize};

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// One inbound fragment message.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    #[serde(alias = "chunkId")]
    pub fragment_id: String,
    /// Base64-encoded WAV fragment.
    pub audio_data: String,
}

/// One outbound result message.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkResponse {
    pub chunk_id: String,
    /// "success" or "error"
    pub response: &'static str,
    pub status: FragmentStatus,
    pub committed_delta: String,
    pub tentative_text: String,
    pub committed_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResultError>,
    pub buffered_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub energy_db: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dropped_samples: Option<usize>,
}

impl From<OutboundResult> for ChunkResponse {
    fn from(result: OutboundResult) -> Self {
        Self {
            chunk_id: result.fragment_id,
            response: if result.status.is_success() {
                "success"
            } else {
                "error"
            },
            status: result.status,
            committed_delta: result.committed_delta,
            tentative_text: result.tentative_text,
            committed_text: result.committed_text,
            error: result.error,
            buffered_seconds: result.buffered_seconds,
            energy_db: result.energy_db,
            dropped_samples: result.dropped_samples,
        }
    }
}

/// Turn one text frame into a fragment, or explain why it is not one.
///
/// When the JSON is unusable the fragment id is still recovered if present, so
/// the client can match the error to what it sent.
pub fn parse_text(text: &str) -> Inbound {
    match serde_json::from_str::<InboundMessage>(text) {
        Ok(msg) => match BASE64.decode(msg.audio_data.trim()) {
            Ok(bytes) => Inbound::Fragment(AudioFragment::new(msg.fragment_id, bytes)),
            Err(err) => Inbound::Malformed {
                fragment_id: Some(msg.fragment_id),
                reason: format!("invalid base64 audio data: {}", err),
            },
        },
        Err(err) => {
            let fragment_id = serde_json::from_str::<serde_json::Value>(text)
                .ok()
                .and_then(|v| {
                    v.get("fragmentId")
                        .or_else(|| v.get("chunkId"))
                        .and_then(|id| id.as_str())
                        .map(str::to_string)
                });
            Inbound::Malformed {
                fragment_id,
                reason: format!("invalid message: {}", err),
            }
        }
    }
}

#[derive(Message)]
#[rtype(result = "()")]
struct SendResult(OutboundResult);

#[derive(Message)]
#[rtype(result = "()")]
struct CloseSession(String);

/// Session side of the actor: reads the inbound channel, answers through the actor's mailbox.
struct ActorTransport {
    inbound: BacklogReceiver,
    addr: Addr<AudioWebSocket>,
    state: AppState,
}

#[async_trait]
impl FragmentTransport for ActorTransport {
    async fn next_fragment(&mut self) -> Option<Inbound> {
        self.inbound.recv().await
    }

    fn send_result(&mut self, result: OutboundResult) {
        self.state.record_fragment(&result);
        self.addr.do_send(SendResult(result));
    }

    fn terminate(&mut self, reason: &str) {
        self.addr.do_send(CloseSession(reason.to_string()));
    }
}

/// One WebSocket connection = one transcription session.
pub struct AudioWebSocket {
    session_id: String,
    state: AppState,
    /// Moved into the session task when the actor starts.
    controller: Option<SessionController>,
    inbound: Option<BacklogSender>,
    max_backlog_secs: f64,
    /// Last result sent, repeated in answers to refused fragments.
    last_result: Option<OutboundResult>,
    session_task: Option<tokio::task::JoinHandle<()>>,
    last_heartbeat: Instant,
    heartbeat_interval: Duration,
    client_timeout: Duration,
}

impl AudioWebSocket {
    pub fn new(
        session_id: String,
        controller: SessionController,
        state: AppState,
        config: &AppConfig,
    ) -> Self {
        let performance = &config.performance;
        Self {
            session_id,
            state,
            controller: Some(controller),
            inbound: None,
            max_backlog_secs: config.audio.max_buffer_seconds,
            last_result: None,
            session_task: None,
            last_heartbeat: Instant::now(),
            heartbeat_interval: Duration::from_secs(performance.heartbeat_interval_secs),
            client_timeout: Duration::from_secs(performance.client_timeout_secs),
        }
    }

    fn forward(&mut self, inbound: Inbound, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(backlog) = &self.inbound else {
            return;
        };
        let Err(refused) = backlog.try_push(inbound) else {
            return;
        };

        let Some(err) = refused.to_fragment_error() else {
            debug!(session_id = %self.session_id, "session task gone, dropping message");
            return;
        };
        warn!(
            session_id = %self.session_id,
            fragment_id = refused.inbound().fragment_id().unwrap_or_default(),
            queued_seconds = backlog.queued_seconds(),
            "decoding is behind, refusing fragment"
        );

        let result = OutboundResult::backlogged(
            refused.inbound().fragment_id().unwrap_or_default(),
            &err,
            self.last_result.as_ref(),
        );
        self.state.record_fragment(&result);
        self.send(result, ctx);
    }

    fn send(&mut self, result: OutboundResult, ctx: &mut ws::WebsocketContext<Self>) {
        if result.status != FragmentStatus::Backlogged {
            self.last_result = Some(result.clone());
        }
        match serde_json::to_string(&ChunkResponse::from(result)) {
            Ok(json) => ctx.text(json),
            Err(err) => error!(session_id = %self.session_id, error = %err, "failed to encode result"),
        }
    }
}

impl Actor for AudioWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(session_id = %self.session_id, "WebSocket session started");

        if let Some(controller) = self.controller.take() {
            let (tx, rx) = fragment_backlog(self.max_backlog_secs, DEFAULT_MAX_MESSAGES);
            let mut transport = ActorTransport {
                inbound: rx,
                addr: ctx.address(),
                state: self.state.clone(),
            };
            self.inbound = Some(tx);
            self.session_task = Some(tokio::spawn(async move {
                run_session(controller, &mut transport).await;
            }));
        }

        ctx.run_interval(self.heartbeat_interval, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > act.client_timeout {
                warn!(session_id = %act.session_id, "WebSocket heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        // Dropping the sender ends the session loop; aborting abandons an in-flight pass.
        self.inbound = None;
        if let Some(task) = self.session_task.take() {
            task.abort();
        }
        self.state.sessions.remove(&self.session_id);
        info!(session_id = %self.session_id, "WebSocket session stopped");
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for AudioWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                self.forward(parse_text(&text), ctx);
            }
            Ok(ws::Message::Binary(_)) => {
                self.last_heartbeat = Instant::now();
                self.forward(
                    Inbound::Malformed {
                        fragment_id: None,
                        reason: "binary frames are not supported, send JSON text messages"
                            .to_string(),
                    },
                    ctx,
                );
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(session_id = %self.session_id, ?reason, "WebSocket closed by client");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(session_id = %self.session_id, "unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(session_id = %self.session_id, error = %err, "WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}

impl Handler<SendResult> for AudioWebSocket {
    type Result = ();

    fn handle(&mut self, msg: SendResult, ctx: &mut Self::Context) {
        self.send(msg.0, ctx);
    }
}

impl Handler<CloseSession> for AudioWebSocket {
    type Result = ();

    fn handle(&mut self, msg: CloseSession, ctx: &mut Self::Context) {
        warn!(session_id = %self.session_id, reason = %msg.0, "terminating session");
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::Policy,
            description: Some(msg.0),
        }));
        ctx.stop();
    }
}

/// Per-connection decoder overrides.
#[derive(Debug, Default, Deserialize)]
pub struct SessionQuery {
    pub decoder: Option<String>,
    pub language: Option<String>,
    pub model: Option<String>,
}

/// Merge configured defaults with the connection's query parameters.
fn session_spec(config: &AppConfig, query: &SessionQuery) -> AppResult<DecoderSpec> {
    let kind = query.decoder.as_deref().unwrap_or(&config.decoder.kind).trim();
    let language = query.language.as_deref().unwrap_or(&config.decoder.language).trim();
    let model = query.model.as_deref().unwrap_or(&config.decoder.model_size);

    if language.is_empty() {
        return Err(AppError::BadRequest("language cannot be empty".to_string()));
    }

    Ok(DecoderSpec {
        kind: kind.to_string(),
        language: language.to_string(),
        model_size: model.parse::<ModelSize>()?,
    })
}

/// WebSocket endpoint handler.
///
/// ## Before the upgrade:
/// - unknown decoder or model size: 400
/// - session limit reached: 503
pub async fn audio_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    query: web::Query<SessionQuery>,
) -> actix_web::Result<HttpResponse> {
    let config = state.get_config();
    let spec = session_spec(&config, &query)?;
    let decoder = state.decoders.create(&spec).map_err(AppError::from)?;
    let session_id = state.sessions.register(&spec.kind, &spec.language)?;

    let transcriber =
        IncrementalTranscriber::new(decoder).with_max_buffer_secs(config.audio.max_buffer_seconds);
    let mut controller = SessionController::new(session_id.clone(), transcriber);
    if let Some(rate) = config.audio.sample_rate {
        controller = controller.with_sample_rate(rate);
    }

    let actor = AudioWebSocket::new(
        session_id.clone(),
        controller,
        state.get_ref().clone(),
        &config,
    );

    match ws::start(actor, &req, stream) {
        Ok(response) => {
            state.record_session_started();
            info!(
                session_id = %session_id,
                peer = ?req.connection_info().peer_addr(),
                decoder = %spec.kind,
                language = %spec.language,
                model_size = %spec.model_size,
                "WebSocket upgrade accepted"
            );
            Ok(response)
        }
        Err(err) => {
            state.sessions.remove(&session_id);
            Err(err)
        }
    }
}

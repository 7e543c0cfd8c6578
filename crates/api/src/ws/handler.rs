use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use bytes::Bytes;
use ffstage_core::transcode::{ProgressSender, TranscodeError, TranscodeJob, Transcoder};
use futures::future::OptionFuture;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::state::AppState;
use crate::ws::manager::SessionSender;
use crate::ws::protocol::{parse_client_message, ClientMessage, ServerMessage};

/// How long a terminated session waits for the client to answer its Close
/// frame, and how long the outbound task may take to flush.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle of one session. There is exactly one transition into
/// `Terminated`, and it coincides with sending the terminal message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingJob,
    Running,
    Terminated,
}

type JobHandle = JoinHandle<Result<Bytes, TranscodeError>>;

/// HTTP handler that upgrades the connection to a session WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drive a single session after upgrade.
///
/// Splits the socket into a sink (fed by a forwarding task) and a stream,
/// sends `ready`, then multiplexes inbound frames, progress updates and job
/// completion until the session terminates or the client goes away.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let session_id = uuid::Uuid::new_v4().to_string();
    let span = tracing::info_span!("session", session_id = %session_id);
    run_session(socket, state, session_id).instrument(span).await;
}

async fn run_session(socket: WebSocket, state: AppState, session_id: String) {
    tracing::info!("Session connected");

    let cancel = CancellationToken::new();
    let (outbound, mut rx) = state.sessions.add(session_id.clone(), cancel.clone()).await;
    let (mut sink, mut stream) = socket.split();

    // Sender task: forward channel frames to the sink, stopping after Close.
    let send_task = tokio::spawn(
        async move {
            while let Some(msg) = rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if sink.send(msg).await.is_err() {
                    tracing::debug!("Session sink closed");
                    break;
                }
                if closing {
                    break;
                }
            }
        }
        .in_current_span(),
    );

    let (updates_tx, mut updates_rx) = mpsc::unbounded_channel();
    let mut session_state = SessionState::AwaitingJob;
    let mut job: Option<JobHandle> = None;
    let mut close_deadline: Option<Instant> = None;

    send(&outbound, &ServerMessage::Ready);

    loop {
        tokio::select! {
            inbound = stream.next() => {
                let text = match inbound {
                    Some(Ok(Message::Text(text))) => text.as_str().to_string(),
                    Some(Ok(Message::Binary(data))) => String::from_utf8_lossy(&data).into_owned(),
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "Session receive error");
                        break;
                    }
                };

                match parse_client_message(&text) {
                    Ok(ClientMessage::Run(request)) => match session_state {
                        SessionState::AwaitingJob => {
                            job = Some(spawn_job(
                                Arc::clone(&state.transcoder),
                                request.into_job(),
                                updates_tx.clone(),
                                cancel.clone(),
                            ));
                            session_state = SessionState::Running;
                        }
                        SessionState::Running => {
                            tracing::warn!("Rejected run while a job is in flight");
                            send(&outbound, &ServerMessage::Rejected {
                                detail: "a job is already running on this session".into(),
                            });
                        }
                        SessionState::Terminated => {
                            tracing::debug!("Ignoring run after session terminated");
                        }
                    },
                    Ok(ClientMessage::Ignored(kind)) => {
                        tracing::debug!(kind = ?kind, "Ignoring session message");
                    }
                    Err(e) if session_state == SessionState::AwaitingJob => {
                        tracing::warn!(error = %e, "Malformed run message");
                        terminate(&outbound, ServerMessage::Error { detail: e.to_string() });
                        session_state = SessionState::Terminated;
                        close_deadline = Some(Instant::now() + CLOSE_GRACE);
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "Ignoring malformed run message");
                    }
                }
            }

            Some(update) = updates_rx.recv(), if job.is_some() => {
                send(&outbound, &ServerMessage::Update { update });
            }

            Some(result) = OptionFuture::from(job.as_mut()), if job.is_some() => {
                job = None;
                // Every update was queued before the job returned; flush them
                // ahead of the terminal message.
                while let Ok(update) = updates_rx.try_recv() {
                    send(&outbound, &ServerMessage::Update { update });
                }
                terminate(&outbound, terminal_message(result));
                session_state = SessionState::Terminated;
                close_deadline = Some(Instant::now() + CLOSE_GRACE);
            }

            () = sleep_until(close_deadline.unwrap_or_else(Instant::now)), if close_deadline.is_some() => {
                tracing::debug!("Client did not answer Close in time, dropping session");
                break;
            }

            () = cancel.cancelled(), if job.is_none() => break,
        }
    }

    if let Some(handle) = job.take() {
        // Client left mid-job: kill the tool and wait for staged buffers to
        // be released before tearing the session down.
        tracing::info!("Session closed mid-job, cancelling");
        cancel.cancel();
        match handle.await {
            Ok(Err(TranscodeError::Cancelled { .. })) => {}
            Ok(Ok(_)) | Ok(Err(_)) => tracing::debug!("Job finished before cancellation took effect"),
            Err(e) => tracing::error!(error = %e, "Job task panicked"),
        }
    }

    state.sessions.remove(&session_id).await;
    drop(outbound);
    if tokio::time::timeout(CLOSE_GRACE, send_task).await.is_err() {
        tracing::debug!("Session sink did not drain in time");
    }
    tracing::info!(state = ?session_state, "Session disconnected");
}

fn spawn_job(
    transcoder: Arc<Transcoder>,
    job: TranscodeJob,
    updates: ProgressSender,
    cancel: CancellationToken,
) -> JobHandle {
    tracing::info!(
        inputs = job.inputs.len(),
        out_ext = ?job.out_ext,
        stream_updates = job.stream_updates,
        "Job started",
    );
    tokio::spawn(async move { transcoder.run(job, &updates, &cancel).await }.in_current_span())
}

fn terminal_message(result: Result<Result<Bytes, TranscodeError>, JoinError>) -> ServerMessage {
    match result {
        Ok(Ok(output)) => {
            tracing::info!(bytes = output.len(), "Job done");
            ServerMessage::done(&output)
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Job failed");
            ServerMessage::Error { detail: e.detail() }
        }
        Err(e) => {
            tracing::error!(error = %e, "Job task panicked");
            ServerMessage::Error {
                detail: format!("job task failed: {e}"),
            }
        }
    }
}

fn send(outbound: &SessionSender, message: &ServerMessage) {
    if outbound.send(Message::Text(message.to_json().into())).is_err() {
        tracing::debug!("Session outbound channel closed");
    }
}

/// Send the terminal message followed by a normal-closure Close frame.
fn terminate(outbound: &SessionSender, message: ServerMessage) {
    debug_assert!(message.is_terminal());
    send(outbound, &message);
    let _ = outbound.send(Message::Close(Some(CloseFrame {
        code: close_code::NORMAL,
        reason: Utf8Bytes::from_static(""),
    })));
}

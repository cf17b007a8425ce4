// The /ws-execute channel: typed frames between the client and an
// interactive session.

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::AppState;
use crate::session::strip_ansi;
use crucible_common::types::Language;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
enum ClientFrame {
    StartSession {
        session_id: Uuid,
    },
    UpsertFiles {
        files: HashMap<String, String>,
        #[serde(default)]
        is_java: bool,
    },
    StartProgram {
        language: Language,
        #[serde(default)]
        main_class_name: Option<String>,
    },
    SendInput {
        text: String,
    },
    Disconnect,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
enum ServerFrame {
    Output(String),
    ProgramStarted(String),
    FilesUpdated(String),
    Error(String),
}

pub async fn ws_execute(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sink, mut stream) = socket.split();

    let (frames, frames_rx) = mpsc::channel::<ServerFrame>(32);
    let writer = tokio::spawn(write_frames(sink, frames_rx));

    let Some(session_id) = await_session_start(&mut stream, &frames, &state).await else {
        drop(frames);
        let _ = writer.await;
        return;
    };

    // Bridge the container's TTY onto the client, stripped of ANSI noise.
    let output_task = match state.sessions.output_stream(session_id).await {
        Ok(output) => {
            let frames = frames.clone();
            tokio::spawn(async move {
                let mut output = Box::pin(output);
                while let Some(chunk) = output.next().await {
                    match chunk {
                        Ok(log) => {
                            let text = strip_ansi(&String::from_utf8_lossy(&log.into_bytes()));
                            if text.is_empty() {
                                continue;
                            }
                            if frames.send(ServerFrame::Output(text)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            debug!(error = %e, "session output stream ended");
                            break;
                        }
                    }
                }
            })
        }
        Err(e) => {
            let _ = frames.send(ServerFrame::Error(e.to_string())).await;
            drop(frames);
            let _ = writer.await;
            return;
        }
    };

    let mut disconnected = false;
    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };
        let frame = match serde_json::from_str::<ClientFrame>(&text) {
            Ok(frame) => frame,
            Err(e) => {
                let _ = frames
                    .send(ServerFrame::Error(format!("unrecognized frame: {e}")))
                    .await;
                continue;
            }
        };

        match frame {
            ClientFrame::StartSession { .. } => {
                let _ = frames
                    .send(ServerFrame::Error("session already attached".to_string()))
                    .await;
            }
            ClientFrame::UpsertFiles { files, is_java } => {
                let reply = match state.sessions.upsert_files(session_id, &files, is_java).await {
                    Ok(()) => ServerFrame::FilesUpdated(format!("{} file(s) updated", files.len())),
                    Err(e) => ServerFrame::Error(e.to_string()),
                };
                let _ = frames.send(reply).await;
            }
            ClientFrame::StartProgram {
                language,
                main_class_name,
            } => {
                let reply = match state
                    .sessions
                    .start_program(session_id, language, main_class_name.as_deref())
                    .await
                {
                    Ok(()) => ServerFrame::ProgramStarted("program started".to_string()),
                    Err(e) => ServerFrame::Error(e.to_string()),
                };
                let _ = frames.send(reply).await;
            }
            ClientFrame::SendInput { text } => {
                if let Err(e) = state.sessions.send_input(session_id, &text).await {
                    let _ = frames.send(ServerFrame::Error(e.to_string())).await;
                }
            }
            ClientFrame::Disconnect => {
                if let Err(e) = state.sessions.disconnect(session_id).await {
                    warn!(session = %session_id, error = %e, "disconnect failed");
                }
                disconnected = true;
                break;
            }
        }
    }

    // A vanished client tears the session down the same way an explicit
    // disconnect does.
    if !disconnected {
        let _ = state.sessions.disconnect(session_id).await;
    }

    output_task.abort();
    drop(frames);
    let _ = writer.await;
}

/// The first frame on a fresh connection must name an existing session.
async fn await_session_start(
    stream: &mut SplitStream<WebSocket>,
    frames: &mpsc::Sender<ServerFrame>,
    state: &AppState,
) -> Option<Uuid> {
    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        };
        match serde_json::from_str::<ClientFrame>(&text) {
            Ok(ClientFrame::StartSession { session_id }) => {
                if state.sessions.contains(session_id) {
                    return Some(session_id);
                }
                let _ = frames
                    .send(ServerFrame::Error(format!("unknown session {session_id}")))
                    .await;
                return None;
            }
            Ok(_) => {
                let _ = frames
                    .send(ServerFrame::Error(
                        "startSession must be the first frame".to_string(),
                    ))
                    .await;
            }
            Err(e) => {
                let _ = frames
                    .send(ServerFrame::Error(format!("unrecognized frame: {e}")))
                    .await;
            }
        }
    }
    None
}

async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    mut frames: mpsc::Receiver<ServerFrame>,
) {
    while let Some(frame) = frames.recv().await {
        let payload = match serde_json::to_string(&frame) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "failed to serialize server frame");
                continue;
            }
        };
        if sink.send(Message::Text(payload)).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}

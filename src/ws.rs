use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::state::AppState;

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

#[derive(Debug, Deserialize)]
struct JoinFrame {
    event: String,
    student_id: Uuid,
}

/// First well-formed `join` frame names the student whose events this
/// socket wants. Anything else before that is ignored.
fn parse_join(text: &str) -> Option<Uuid> {
    serde_json::from_str::<JoinFrame>(text)
        .ok()
        .filter(|frame| frame.event == "join")
        .map(|frame| frame.student_id)
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let student_id = loop {
        match socket.recv().await {
            Some(Ok(Message::Text(text))) => {
                if let Some(student_id) = parse_join(&text) {
                    break student_id;
                }
            }
            Some(Ok(Message::Close(_))) | None => return,
            Some(Ok(_)) => continue,
            Some(Err(err)) => {
                debug!("socket error before join: {err}");
                return;
            }
        }
    };

    debug!("socket joined room for student {student_id}");
    let mut events = state.notifier.subscribe(student_id).await;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let Ok(text) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    // No replay contract; the client re-fetches on reconnect.
                    warn!("socket for student {student_id} lagged, dropped {skipped} events");
                }
                Err(RecvError::Closed) => break,
            },
            message = socket.recv() => match message {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(err)) => {
                    debug!("socket error for student {student_id}: {err}");
                    break;
                }
            },
        }
    }

    drop(events);
    state.notifier.prune(student_id).await;
    debug!("socket left room for student {student_id}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_frame_yields_student_id() {
        let id = Uuid::new_v4();
        let text = format!(r#"{{"event":"join","student_id":"{id}"}}"#);
        assert_eq!(parse_join(&text), Some(id));
    }

    #[test]
    fn non_join_frames_are_ignored() {
        let id = Uuid::new_v4();
        let text = format!(r#"{{"event":"leave","student_id":"{id}"}}"#);
        assert_eq!(parse_join(&text), None);
        assert_eq!(parse_join("not json"), None);
        assert_eq!(parse_join(r#"{"event":"join"}"#), None);
    }
}

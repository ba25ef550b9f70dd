use crate::api::types::*;
use crate::api::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use tokio::sync::broadcast::error::RecvError;

pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Forward every hub event until the client goes away
async fn handle_websocket(mut socket: WebSocket, state: AppState) {
    let mut updates = state.hub.subscribe();

    loop {
        tokio::select! {
            update = updates.recv() => {
                let msg = match update {
                    Ok(event) => WebSocketMessage::from(event),
                    Err(RecvError::Lagged(skipped)) => WebSocketMessage::Lagged { skipped },
                    Err(RecvError::Closed) => break,
                };

                if let Ok(json) = serde_json::to_string(&msg) {
                    if socket.send(Message::Text(json)).await.is_err() {
                        return;
                    }
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = if text == "ping" {
                            "pong".to_string()
                        } else {
                            let msg = WebSocketMessage::Error(ErrorResponse {
                                error: format!("unsupported message: {text}"),
                                code: "BAD_REQUEST".to_string(),
                            });
                            match serde_json::to_string(&msg) {
                                Ok(json) => json,
                                Err(_) => continue,
                            }
                        };
                        if socket.send(Message::Text(reply)).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break;
                    }
                    _ => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::{Direction, HubEvent, ProgressUpdate, TransferOutcome};

    #[test]
    fn test_progress_message_serialization() {
        let msg = WebSocketMessage::TransferProgress(ProgressUpdate {
            session_id: "test-123".to_string(),
            file_name: "a.bin".to_string(),
            percent_complete: 50.0,
        });

        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"TransferProgress\""));
        assert!(json.contains("\"sessionId\":\"test-123\""));
        assert!(json.contains("\"percentComplete\":50.0"));
    }

    #[test]
    fn test_lagged_message() {
        let json = serde_json::to_string(&WebSocketMessage::Lagged { skipped: 3 }).unwrap();
        assert!(json.contains("Lagged"));
        assert!(json.contains("\"skipped\":3"));
    }

    #[test]
    fn test_failed_outcome_carries_reconciliation() {
        let outcome = TransferOutcome {
            session_id: "s9".to_string(),
            direction: Direction::Upload,
            file_name: "big.iso".to_string(),
            transfer_id: Some("orphan".to_string()),
            error: Some("completion failed".to_string()),
            error_kind: Some("reconciliation".to_string()),
            needs_reconciliation: true,
        };

        let msg = WebSocketMessage::from(HubEvent::Finished(outcome));
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"TransferFailed\""));
        assert!(json.contains("\"needsReconciliation\":true"));
        assert!(json.contains("\"transferId\":\"orphan\""));
        assert!(json.contains("\"direction\":\"upload\""));
    }

    #[test]
    fn test_completed_outcome() {
        let outcome = TransferOutcome {
            session_id: "s1".to_string(),
            direction: Direction::Download,
            file_name: "a.bin".to_string(),
            transfer_id: Some("t1".to_string()),
            error: None,
            error_kind: None,
            needs_reconciliation: false,
        };
        assert!(matches!(
            WebSocketMessage::from(HubEvent::Finished(outcome)),
            WebSocketMessage::TransferCompleted(_)
        ));
    }
}

pub mod manager;
pub use manager::WebSocketManager;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;

/// Broadcast a domain event on `topic` as a JSON frame.
///
/// Frame shape: `{"type":"event","event":...,"topic":...,"payload":...,"ts":...}`.
/// Serialization failures and absent subscribers are both silent; emitters
/// must never depend on delivery.
pub async fn emit<T: Serialize>(ws: &WebSocketManager, topic: &str, event: &str, payload: &T) {
    let frame = json!({
        "type": "event",
        "event": event,
        "topic": topic,
        "payload": payload,
        "ts": Utc::now().to_rfc3339(),
    });
    ws.broadcast(topic, frame.to_string()).await;
}

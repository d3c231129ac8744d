//! End-to-end checks against a real WebSocket server on a loopback port.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use alertdesk_client::{
    handler, ClientError, ConnectionManager, ConnectionState, ErrorKind, RealtimeConfig,
    ReconnectConfig, StaticToken,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

const WAIT: Duration = Duration::from_secs(10);

fn fast_reconnect(max_attempts: u32) -> ReconnectConfig {
    ReconnectConfig {
        max_attempts,
        base_delay: Duration::from_millis(20),
        max_delay: None,
    }
}

/// Accept one socket and return it with the request target it asked for.
async fn accept(listener: &TcpListener) -> (WebSocketStream<TcpStream>, String) {
    let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    let target = Arc::new(Mutex::new(String::new()));
    let seen = target.clone();
    let ws = tokio_tungstenite::accept_hdr_async(stream, move |req: &Request, resp: Response| {
        *seen.lock().unwrap() = req.uri().to_string();
        Ok::<_, ErrorResponse>(resp)
    })
    .await
    .unwrap();
    let target = target.lock().unwrap().clone();
    (ws, target)
}

fn watch_states(mgr: &ConnectionManager) -> mpsc::UnboundedReceiver<ConnectionState> {
    let (tx, rx) = mpsc::unbounded_channel();
    let _ = mgr.on_state_change(move |state| {
        let _ = tx.send(state);
    });
    rx
}

async fn wait_for(rx: &mut mpsc::UnboundedReceiver<ConnectionState>, target: ConnectionState) {
    timeout(WAIT, async {
        while let Some(state) = rx.recv().await {
            if state == target {
                return;
            }
        }
        panic!("state stream ended before {target}");
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {target}"));
}

#[tokio::test]
async fn delivers_frames_both_ways_and_recovers_from_server_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = RealtimeConfig::new(&format!("http://{addr}"))
        .unwrap()
        .with_reconnect(fast_reconnect(5));
    let mgr = ConnectionManager::new(config, StaticToken::new("tok-live")).unwrap();

    let mut states = watch_states(&mgr);
    let errors = Arc::new(Mutex::new(Vec::<ClientError>::new()));
    {
        let errors = errors.clone();
        let _ = mgr.on_error(move |e| errors.lock().unwrap().push(e.clone()));
    }
    let (alerts_tx, mut alerts) = mpsc::unbounded_channel::<Value>();
    mgr.subscribe(
        "alert.new",
        handler(move |data| {
            let _ = alerts_tx.send(data.clone());
        }),
    );

    mgr.connect();
    let (mut server, target) = accept(&listener).await;
    assert_eq!(target, "/api/ws?token=tok-live");
    wait_for(&mut states, ConnectionState::Connected).await;

    server
        .send(Message::Text(
            json!({"type": "alert.new", "data": {"id": "a-1", "area": "north"}})
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
    let alert = timeout(WAIT, alerts.recv()).await.unwrap().unwrap();
    assert_eq!(alert, json!({"id": "a-1", "area": "north"}));

    mgr.send("alert.ack", &json!({"id": "a-1"}));
    let frame = timeout(WAIT, server.next()).await.unwrap().unwrap().unwrap();
    let Message::Text(text) = frame else {
        panic!("expected a text frame, got {frame:?}");
    };
    let sent: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(sent, json!({"type": "alert.ack", "data": {"id": "a-1"}}));

    server.close(None).await.unwrap();
    wait_for(&mut states, ConnectionState::Reconnecting).await;

    let (mut server, _) = accept(&listener).await;
    wait_for(&mut states, ConnectionState::Connected).await;
    assert_eq!(mgr.attempt(), 0);

    server
        .send(Message::Text("{broken".to_string().into()))
        .await
        .unwrap();
    server
        .send(Message::Text(
            json!({"type": "alert.new", "data": 2}).to_string().into(),
        ))
        .await
        .unwrap();
    assert_eq!(timeout(WAIT, alerts.recv()).await.unwrap(), Some(json!(2)));
    assert!(errors
        .lock()
        .unwrap()
        .iter()
        .any(|e| e.kind() == ErrorKind::Decode));

    mgr.disconnect();
    assert_eq!(mgr.state(), ConnectionState::Disconnected);
    // The server sees the client's close frame, then the end of the stream.
    let closing = timeout(WAIT, async {
        while let Some(Ok(msg)) = server.next().await {
            if msg.is_close() {
                return true;
            }
        }
        false
    })
    .await
    .unwrap();
    assert!(closing);
}

#[tokio::test]
async fn unreachable_server_exhausts_the_retry_budget() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let config = RealtimeConfig::new(&format!("127.0.0.1:{port}"))
        .unwrap()
        .with_reconnect(fast_reconnect(2));
    let mgr = ConnectionManager::new(config, StaticToken::new("tok")).unwrap();
    let mut states = watch_states(&mgr);
    let transport_errors = Arc::new(Mutex::new(0));
    {
        let count = transport_errors.clone();
        let _ = mgr.on_error(move |e| {
            if e.kind() == ErrorKind::Transport {
                *count.lock().unwrap() += 1;
            }
        });
    }

    mgr.connect();
    wait_for(&mut states, ConnectionState::Failed).await;

    assert_eq!(mgr.attempt(), 2);
    assert_eq!(*transport_errors.lock().unwrap(), 3);
}

//! Runs shards and clients against an in-process gateway over plain `ws://`.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
    time::{sleep, timeout},
};
use tokio_tungstenite::{
    accept_async,
    tungstenite::protocol::{frame::coding::CloseCode, CloseFrame, Message},
    WebSocketStream,
};

use hata::{
    config::{ClientConfig, ReconnectConfig},
    gateway::{payload::Ready, GatewayEvent, KokoroConfig, Shard, DEFAULT_LATENCY},
    registry::ClientRegistry,
    Client, Error, EventHandler, Identified, Snowflake,
};

const LIMIT: Duration = Duration::from_secs(5);
const USER_ID: u64 = 80351110224678912;

type Socket = WebSocketStream<TcpStream>;

async fn listen() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    (listener, url)
}

async fn accept(listener: &TcpListener) -> Socket {
    let (stream, _) = listener.accept().await.unwrap();
    accept_async(stream).await.unwrap()
}

async fn send(socket: &mut Socket, value: Value) {
    socket.send(Message::Text(value.to_string().into())).await.unwrap();
}

async fn next_payload(socket: &mut Socket) -> Value {
    loop {
        match socket.next().await.unwrap().unwrap() {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Close(frame) => panic!("unexpected close: {frame:?}"),
            _ => continue,
        }
    }
}

async fn next_close_code(socket: &mut Socket) -> u16 {
    loop {
        match socket.next().await {
            Some(Ok(Message::Close(Some(frame)))) => return u16::from(frame.code),
            Some(Ok(_)) => continue,
            other => panic!("expected a close frame, got {other:?}"),
        }
    }
}

async fn hello(socket: &mut Socket, interval_ms: u64) {
    send(socket, json!({"op": 10, "d": {"heartbeat_interval": interval_ms}})).await;
}

async fn ready(socket: &mut Socket, resume_url: &str, seq: u64) {
    send(
        socket,
        json!({
            "op": 0,
            "s": seq,
            "t": "READY",
            "d": {
                "session_id": "session",
                "resume_gateway_url": resume_url,
                "user": {"id": USER_ID.to_string(), "username": "nelly"},
                "guilds": []
            }
        }),
    )
    .await;
}

fn config(url: &str) -> ClientConfig {
    ClientConfig::builder()
        .token("token")
        .gateway_url(url)
        .kokoro(KokoroConfig::builder().first_beat_jitter(false).build())
        .build()
}

/// Retries once after a 10ms pause, then gives up.
fn retry_once(url: &str) -> ClientConfig {
    let mut config = config(url);
    config.reconnect = ReconnectConfig {
        max_attempts: 1,
        initial_delay_ms: 10,
        max_delay_ms: 10,
        jitter: 0.0,
    };
    config
}

async fn close_with(socket: &mut Socket, code: u16) {
    socket
        .close(Some(CloseFrame {
            code: CloseCode::from(code),
            reason: "".into(),
        }))
        .await
        .unwrap();
}

async fn next_event(events: &mut mpsc::Receiver<GatewayEvent>) -> GatewayEvent {
    timeout(LIMIT, events.recv()).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_identify_heartbeat_and_dispatch() {
    let (listener, url) = listen().await;
    let server_url = url.clone();
    let server = tokio::spawn(async move {
        let mut socket = accept(&listener).await;
        hello(&mut socket, 100).await;

        let identify = next_payload(&mut socket).await;
        assert_eq!(identify["op"], 2);
        assert_eq!(identify["d"]["token"], "token");

        ready(&mut socket, &server_url, 1).await;

        let beat = next_payload(&mut socket).await;
        assert_eq!(beat, json!({"op": 1, "d": 1}));
        send(&mut socket, json!({"op": 11})).await;
        send(
            &mut socket,
            json!({"op": 0, "s": 2, "t": "MESSAGE_CREATE", "d": {"content": "hi"}}),
        )
        .await;

        // keep the connection healthy until the shard closes it
        loop {
            match socket.next().await {
                Some(Ok(Message::Text(_))) => send(&mut socket, json!({"op": 11})).await,
                Some(Ok(Message::Close(Some(frame)))) => return u16::from(frame.code),
                Some(Ok(_)) => continue,
                other => panic!("expected a close frame, got {other:?}"),
            }
        }
    });

    let (events_tx, mut events) = mpsc::channel(16);
    let (shard, handle) = Shard::new(config(&url), events_tx);
    let runner = tokio::spawn(shard.run());

    assert!(matches!(next_event(&mut events).await, GatewayEvent::Ready(r) if r.user.id == USER_ID));
    assert!(matches!(next_event(&mut events).await, GatewayEvent::Dispatch { name, .. } if name == "READY"));
    match next_event(&mut events).await {
        GatewayEvent::Dispatch { name, data } => {
            assert_eq!(name, "MESSAGE_CREATE");
            assert_eq!(data["content"], "hi");
        }
        other => panic!("unexpected event {other:?}"),
    }

    timeout(LIMIT, async {
        while handle.latency() == DEFAULT_LATENCY {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert!(handle.latency() < Duration::from_secs(1));

    handle.shutdown();
    timeout(LIMIT, runner).await.unwrap().unwrap().unwrap();
    assert_eq!(timeout(LIMIT, server).await.unwrap().unwrap(), 1000);
}

#[tokio::test]
async fn test_zombied_connection_resumes() {
    let (listener, url) = listen().await;
    let server_url = url.clone();
    let server = tokio::spawn(async move {
        let mut first = accept(&listener).await;
        hello(&mut first, 100).await;
        assert_eq!(next_payload(&mut first).await["op"], 2);
        ready(&mut first, &server_url, 7).await;

        // never acknowledge the heartbeat
        assert_eq!(next_payload(&mut first).await["op"], 1);
        let zombie_code = next_close_code(&mut first).await;

        let mut second = accept(&listener).await;
        hello(&mut second, 100).await;
        let resume = next_payload(&mut second).await;
        send(&mut second, json!({"op": 0, "s": 8, "t": "RESUMED", "d": {}})).await;
        (zombie_code, resume)
    });

    let (events_tx, mut events) = mpsc::channel(16);
    let (shard, handle) = Shard::new(config(&url), events_tx);
    let runner = tokio::spawn(shard.run());

    assert!(matches!(next_event(&mut events).await, GatewayEvent::Ready(_)));
    assert!(matches!(next_event(&mut events).await, GatewayEvent::Dispatch { .. }));
    assert!(matches!(next_event(&mut events).await, GatewayEvent::Resumed));

    let (zombie_code, resume) = timeout(LIMIT, server).await.unwrap().unwrap();
    assert_eq!(zombie_code, 4000);
    assert_eq!(resume["op"], 6);
    assert_eq!(resume["d"]["session_id"], "session");
    assert_eq!(resume["d"]["seq"], 7);

    handle.shutdown();
    timeout(LIMIT, runner).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn test_fatal_close_code_stops_shard() {
    let (listener, url) = listen().await;
    let server = tokio::spawn(async move {
        let mut socket = accept(&listener).await;
        hello(&mut socket, 10_000).await;
        assert_eq!(next_payload(&mut socket).await["op"], 2);
        socket
            .close(Some(CloseFrame {
                code: CloseCode::from(4004),
                reason: "Authentication failed.".into(),
            }))
            .await
            .unwrap();
    });

    let (events_tx, _events) = mpsc::channel(16);
    let (shard, handle) = Shard::new(config(&url), events_tx);

    let result = timeout(LIMIT, shard.run()).await.unwrap();
    assert!(matches!(result, Err(Error::Closed { code: 4004, .. })));
    assert!(handle.kokoro().wait_for(hata::gateway::KokoroState::Idle).await.is_ok());
    server.await.unwrap();
}

struct ReadyRecorder {
    ready: mpsc::Sender<Snowflake>,
}

#[async_trait]
impl EventHandler for ReadyRecorder {
    async fn ready(&self, client: Arc<Client>, ready: Ready) {
        assert_eq!(client.id(), ready.user.id);
        self.ready.send(ready.user.id).await.unwrap();
    }
}

#[tokio::test]
async fn test_client_registers_while_running() {
    let (listener, url) = listen().await;
    let server_url = url.clone();
    let server = tokio::spawn(async move {
        let mut socket = accept(&listener).await;
        hello(&mut socket, 10_000).await;
        assert_eq!(next_payload(&mut socket).await["op"], 2);
        ready(&mut socket, &server_url, 1).await;
        next_close_code(&mut socket).await
    });

    let client = Arc::new(Client::new(config(&url)).unwrap());
    let registry = ClientRegistry::new();
    let (ready_tx, mut ready_rx) = mpsc::channel(1);

    let runner = tokio::spawn({
        let client = Arc::clone(&client);
        let registry = registry.clone();
        async move { client.run(&registry, ReadyRecorder { ready: ready_tx }).await }
    });

    let id = timeout(LIMIT, ready_rx.recv()).await.unwrap().unwrap();
    assert_eq!(id, USER_ID);
    assert!(client.is_running());
    assert_eq!(client.user_name(), Some("nelly"));
    assert!(Arc::ptr_eq(&registry.get_or_first(None).unwrap(), &client));

    client.shutdown();
    timeout(LIMIT, runner).await.unwrap().unwrap().unwrap();
    assert!(registry.is_empty());
    assert!(!client.is_running());
    assert_eq!(timeout(LIMIT, server).await.unwrap().unwrap(), 1000);
}

#[tokio::test]
async fn test_reconnect_request_resumes() {
    let (listener, url) = listen().await;
    let server_url = url.clone();
    let server = tokio::spawn(async move {
        let mut first = accept(&listener).await;
        hello(&mut first, 10_000).await;
        assert_eq!(next_payload(&mut first).await["op"], 2);
        ready(&mut first, &server_url, 3).await;
        send(&mut first, json!({"op": 7, "d": null})).await;
        let reconnect_code = next_close_code(&mut first).await;

        let mut second = accept(&listener).await;
        hello(&mut second, 10_000).await;
        let resume = next_payload(&mut second).await;
        send(&mut second, json!({"op": 0, "s": 4, "t": "RESUMED", "d": {}})).await;
        (reconnect_code, resume)
    });

    let (events_tx, mut events) = mpsc::channel(16);
    let (shard, handle) = Shard::new(config(&url), events_tx);
    let runner = tokio::spawn(shard.run());

    assert!(matches!(next_event(&mut events).await, GatewayEvent::Ready(_)));
    assert!(matches!(next_event(&mut events).await, GatewayEvent::Dispatch { .. }));
    assert!(matches!(next_event(&mut events).await, GatewayEvent::Resumed));

    let (reconnect_code, resume) = timeout(LIMIT, server).await.unwrap().unwrap();
    assert_eq!(reconnect_code, 4000);
    assert_eq!(resume["op"], 6);
    assert_eq!(resume["d"]["session_id"], "session");
    assert_eq!(resume["d"]["seq"], 3);

    handle.shutdown();
    timeout(LIMIT, runner).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn test_ready_resets_reconnect_attempts() {
    let (listener, url) = listen().await;
    let server_url = url.clone();
    let server = tokio::spawn(async move {
        // uses up the only retry
        let mut first = accept(&listener).await;
        hello(&mut first, 10_000).await;
        assert_eq!(next_payload(&mut first).await["op"], 2);
        close_with(&mut first, 4000).await;

        let mut second = accept(&listener).await;
        hello(&mut second, 10_000).await;
        assert_eq!(next_payload(&mut second).await["op"], 2);
        ready(&mut second, &server_url, 1).await;
        close_with(&mut second, 4000).await;

        // only reached if READY gave the retry back
        let mut third = accept(&listener).await;
        hello(&mut third, 10_000).await;
        next_payload(&mut third).await
    });

    let (events_tx, mut events) = mpsc::channel(16);
    let (shard, handle) = Shard::new(retry_once(&url), events_tx);
    let runner = tokio::spawn(shard.run());

    assert!(matches!(next_event(&mut events).await, GatewayEvent::Ready(_)));
    let resume = timeout(LIMIT, server).await.unwrap().unwrap();
    assert_eq!(resume["op"], 6);
    assert_eq!(resume["d"]["seq"], 1);

    handle.shutdown();
    timeout(LIMIT, runner).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn test_retry_limit_without_ready() {
    let (listener, url) = listen().await;
    let server = tokio::spawn(async move {
        for _ in 0..2 {
            let mut socket = accept(&listener).await;
            hello(&mut socket, 10_000).await;
            assert_eq!(next_payload(&mut socket).await["op"], 2);
            close_with(&mut socket, 4000).await;
        }
    });

    let (events_tx, _events) = mpsc::channel(16);
    let (shard, _handle) = Shard::new(retry_once(&url), events_tx);

    let result = timeout(LIMIT, shard.run()).await.unwrap();
    assert!(matches!(result, Err(Error::ReconnectExhausted { attempts: 1 })));
    server.await.unwrap();
}

#[tokio::test]
async fn test_silent_socket_is_replaced() {
    let (listener, url) = listen().await;
    let server = tokio::spawn(async move {
        // accepts the websocket but never says hello
        let _silent = accept(&listener).await;

        let mut second = accept(&listener).await;
        hello(&mut second, 10_000).await;
        let identify = next_payload(&mut second).await;
        (identify, second)
    });

    let mut config = retry_once(&url);
    config.hello_timeout_ms = 100;
    let (events_tx, _events) = mpsc::channel(16);
    let (shard, handle) = Shard::new(config, events_tx);
    let runner = tokio::spawn(shard.run());

    let (identify, _second) = timeout(LIMIT, server).await.unwrap().unwrap();
    assert_eq!(identify["op"], 2);

    handle.shutdown();
    timeout(LIMIT, runner).await.unwrap().unwrap().unwrap();
}

//! Drives a [`gemini_live::Client`] against an in-process websocket server to
//! exercise the session lifecycle end to end: setup frame first, inbound
//! classification, reconnection teardown and idempotent disconnect.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use gemini_live::types::Part;
use gemini_live::{Client, Config, EventRx, LiveEvent};

type ServerWs = WebSocketStream<TcpStream>;

async fn local_server() -> (TcpListener, Config) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = Config::builder()
        .with_base_url(&format!("ws://{}", listener.local_addr().unwrap()))
        .with_api_key("test-key")
        .with_connect_timeout(Duration::from_secs(2))
        .build();
    (listener, config)
}

async fn accept(listener: &TcpListener) -> ServerWs {
    let (stream, _) = listener.accept().await.unwrap();
    tokio_tungstenite::accept_async(stream).await.unwrap()
}

async fn next_json(ws: &mut ServerWs) -> serde_json::Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("server timed out waiting for a frame")
            .expect("client closed the connection")
            .unwrap();
        match message {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Binary(bin) => return serde_json::from_slice(&bin).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame from client: {:?}", other),
        }
    }
}

async fn wait_for<F>(events: &mut EventRx, mut pred: F) -> LiveEvent
where
    F: FnMut(&LiveEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if pred(&event) {
                        return event;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event channel closed: {:?}", e),
            }
        }
    })
    .await
    .expect("expected event never arrived")
}

#[tokio::test]
async fn session_lifecycle_and_classification() {
    let (listener, config) = local_server().await;
    let mut client = Client::new(config);
    let mut events = client.events();

    let (connected, mut server) = tokio::join!(
        client.connect(gemini_live::types::LiveConfig::builder().build()),
        accept(&listener),
    );
    connected.unwrap();
    assert!(client.is_connected());

    // the setup frame is the first thing on the wire and names the model
    let setup = next_json(&mut server).await;
    assert_eq!(setup["setup"]["model"], "models/gemini-2.0-flash-exp");

    wait_for(&mut events, |event| {
        matches!(event, LiveEvent::Connected(true))
    })
    .await;

    server
        .send(Message::Text(r#"{"setupComplete":{}}"#.to_string()))
        .await
        .unwrap();
    wait_for(&mut events, |event| {
        matches!(event, LiveEvent::SetupComplete)
    })
    .await;

    // caller order is wire order
    client
        .send(vec![Part::from_text("hello")], true)
        .await
        .unwrap();
    let content = next_json(&mut server).await;
    assert_eq!(content["clientContent"]["turnComplete"], true);
    assert_eq!(
        content["clientContent"]["turns"][0]["parts"][0]["text"],
        "hello"
    );

    // a mixed model turn surfaces only its non-audio parts
    let frame = r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAAAAA=="}},{"text":"hi there"}]}}}"#;
    server.send(Message::Text(frame.to_string())).await.unwrap();
    let event = wait_for(&mut events, |event| {
        matches!(event, LiveEvent::Content(_))
    })
    .await;
    let LiveEvent::Content(turn) = event else {
        unreachable!()
    };
    assert_eq!(turn.parts().len(), 1);
    assert_eq!(turn.parts()[0].text(), Some("hi there"));

    // barge-in reaches subscribers
    server
        .send(Message::Text(
            r#"{"serverContent":{"interrupted":true}}"#.to_string(),
        ))
        .await
        .unwrap();
    wait_for(&mut events, |event| {
        matches!(event, LiveEvent::Interrupted)
    })
    .await;

    // unknown frames are logged, never fatal
    server
        .send(Message::Text(r#"{"usageMetadata":{}}"#.to_string()))
        .await
        .unwrap();
    wait_for(&mut events, |event| {
        matches!(event, LiveEvent::Log(log) if log.kind() == "server.unmatched")
    })
    .await;

    client.disconnect();
    assert!(!client.is_connected());
    wait_for(&mut events, |event| {
        matches!(event, LiveEvent::Connected(false))
    })
    .await;

    // the server sees the socket close
    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match server.next().await {
                None | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => continue,
                Some(Err(_)) => break,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "server never observed the close");

    // disconnecting twice leaves the same end state
    client.disconnect();
    assert!(!client.is_connected());
}

#[tokio::test]
async fn reconnect_tears_down_the_previous_session_first() {
    let (listener, config) = local_server().await;
    let mut client = Client::new(config);

    let live_config = gemini_live::types::LiveConfig::builder().build();
    let (connected, mut first_server) = tokio::join!(client.connect(live_config.clone()), accept(&listener));
    connected.unwrap();
    next_json(&mut first_server).await; // setup frame

    let (reconnected, mut second_server) =
        tokio::join!(client.connect(live_config), accept(&listener));
    reconnected.unwrap();
    assert!(client.is_connected());

    // the first connection is gone before the second is in use
    let first_closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match first_server.next().await {
                None | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => continue,
                Some(Err(_)) => break,
            }
        }
    })
    .await;
    assert!(first_closed.is_ok(), "first connection never closed");

    // and the second gets its own fresh setup frame
    let setup = next_json(&mut second_server).await;
    assert!(setup.get("setup").is_some());

    client.disconnect();
}

#[tokio::test]
async fn refused_connections_surface_as_connection_errors() {
    // bind-then-drop to get a port with nothing listening
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let config = Config::builder()
        .with_base_url(&format!("ws://127.0.0.1:{port}"))
        .with_api_key("test-key")
        .with_connect_timeout(Duration::from_secs(2))
        .build();
    let mut client = Client::new(config);
    match client
        .connect(gemini_live::types::LiveConfig::builder().build())
        .await
    {
        Err(gemini_live::LiveError::Connection(_)) => {}
        other => panic!("expected Connection error, got {:?}", other.map(|_| ())),
    }
    assert!(!client.is_connected());
}

#[tokio::test]
async fn unanswered_handshakes_time_out() {
    // accept TCP but never answer the websocket upgrade
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = Config::builder()
        .with_base_url(&format!("ws://{}", listener.local_addr().unwrap()))
        .with_api_key("test-key")
        .with_connect_timeout(Duration::from_millis(300))
        .build();
    let _hold = tokio::spawn(async move {
        let mut sockets = Vec::new();
        loop {
            match listener.accept().await {
                Ok((stream, _)) => sockets.push(stream),
                Err(_) => break,
            }
        }
    });

    let mut client = Client::new(config);
    match client
        .connect(gemini_live::types::LiveConfig::builder().build())
        .await
    {
        Err(gemini_live::LiveError::Timeout(_)) => {}
        other => panic!("expected Timeout error, got {:?}", other.map(|_| ())),
    }
    assert!(!client.is_connected());
}

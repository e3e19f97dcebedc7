//! WebSocket relay through a real bridge.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{
    client::IntoClientRequest, protocol::frame::coding::CloseCode, Error as WsError, Message,
};

mod common;

async fn next_message<S>(stream: &mut S) -> Message
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("no message within 5s")
        .expect("stream ended")
        .expect("websocket error")
}

#[tokio::test]
async fn ping_pong_and_echo_in_order() {
    let public = 28801;
    let upstream_addr: SocketAddr = "127.0.0.1:28802".parse().unwrap();
    let _upstream = common::start_upstream(upstream_addr).await;
    let bridge = common::start_bridge(common::bridge_config(public, upstream_addr.port())).await;

    let (mut socket, _) = connect_async(format!("ws://127.0.0.1:{}/ws", public))
        .await
        .unwrap();

    socket.send(Message::Text("ping".into())).await.unwrap();
    assert_eq!(next_message(&mut socket).await, Message::Text("pong".into()));

    for i in 0..5 {
        socket.send(Message::Text(format!("mood-{}", i).into())).await.unwrap();
    }
    for i in 0..5 {
        assert_eq!(
            next_message(&mut socket).await,
            Message::Text(format!("mood-{}", i).into())
        );
    }

    socket.send(Message::Binary(vec![1u8, 2, 3].into())).await.unwrap();
    assert_eq!(
        next_message(&mut socket).await,
        Message::Binary(vec![1u8, 2, 3].into())
    );

    socket.close(None).await.unwrap();
    bridge.stop().await.unwrap();
}

#[tokio::test]
async fn subprotocol_is_negotiated_with_upstream() {
    let public = 28811;
    let upstream_addr: SocketAddr = "127.0.0.1:28812".parse().unwrap();
    let _upstream = common::start_upstream(upstream_addr).await;
    let bridge = common::start_bridge(common::bridge_config(public, upstream_addr.port())).await;

    let mut request = format!("ws://127.0.0.1:{}/ws", public)
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert("sec-websocket-protocol", "mood.v1".parse().unwrap());

    let (mut socket, response) = connect_async(request).await.unwrap();
    assert_eq!(response.headers()["sec-websocket-protocol"], "mood.v1");

    socket.close(None).await.unwrap();
    bridge.stop().await.unwrap();
}

#[tokio::test]
async fn upgrade_refused_while_upstream_down() {
    let public = 28821;
    let bridge = common::start_bridge(common::bridge_config(public, 28822)).await;

    let err = connect_async(format!("ws://127.0.0.1:{}/ws", public))
        .await
        .unwrap_err();
    match err {
        WsError::Http(response) => assert_eq!(response.status(), 503),
        other => panic!("expected HTTP refusal, got {:?}", other),
    }

    bridge.stop().await.unwrap();
}

#[tokio::test]
async fn shutdown_closes_open_sessions() {
    let public = 28831;
    let upstream_addr: SocketAddr = "127.0.0.1:28832".parse().unwrap();
    let _upstream = common::start_upstream(upstream_addr).await;
    let bridge = common::start_bridge(common::bridge_config(public, upstream_addr.port())).await;

    let (mut socket, _) = connect_async(format!("ws://127.0.0.1:{}/ws", public))
        .await
        .unwrap();
    socket.send(Message::Text("ping".into())).await.unwrap();
    assert_eq!(next_message(&mut socket).await, Message::Text("pong".into()));

    let shutdown = bridge.shutdown.clone();
    let stopping = tokio::spawn(bridge.stop());
    shutdown.trigger();

    match next_message(&mut socket).await {
        Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Away),
        other => panic!("expected close frame, got {:?}", other),
    }

    stopping.await.unwrap().unwrap();
}

#[tokio::test]
async fn client_close_reaches_upstream() {
    let public = 28841;
    let upstream_addr: SocketAddr = "127.0.0.1:28842".parse().unwrap();
    let upstream = common::start_upstream(upstream_addr).await;
    let bridge = common::start_bridge(common::bridge_config(public, upstream_addr.port())).await;

    let (mut socket, _) = connect_async(format!("ws://127.0.0.1:{}/ws", public))
        .await
        .unwrap();
    socket.send(Message::Text("ping".into())).await.unwrap();
    assert_eq!(next_message(&mut socket).await, Message::Text("pong".into()));

    socket.close(None).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while upstream.ws_closes() == 0 {
        assert!(tokio::time::Instant::now() < deadline, "upstream never saw the close");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(upstream.ws_closes(), 1);

    bridge.stop().await.unwrap();
}

#[tokio::test]
async fn upstream_close_reaches_client() {
    let public = 28851;
    let upstream_addr: SocketAddr = "127.0.0.1:28852".parse().unwrap();
    let _upstream = common::start_upstream(upstream_addr).await;
    let bridge = common::start_bridge(common::bridge_config(public, upstream_addr.port())).await;

    let (mut socket, _) = connect_async(format!("ws://127.0.0.1:{}/ws/once", public))
        .await
        .unwrap();
    socket.send(Message::Text("hi".into())).await.unwrap();
    assert_eq!(next_message(&mut socket).await, Message::Text("hi".into()));

    match next_message(&mut socket).await {
        Message::Close(Some(frame)) => {
            assert_eq!(frame.code, CloseCode::Normal);
            assert_eq!(frame.reason.as_str(), "done");
        }
        other => panic!("expected close frame, got {:?}", other),
    }

    bridge.stop().await.unwrap();
}

#[tokio::test]
async fn control_ping_is_answered_once_by_the_bridge() {
    let public = 28861;
    let upstream_addr: SocketAddr = "127.0.0.1:28862".parse().unwrap();
    let _upstream = common::start_upstream(upstream_addr).await;
    let bridge = common::start_bridge(common::bridge_config(public, upstream_addr.port())).await;

    let (mut socket, _) = connect_async(format!("ws://127.0.0.1:{}/ws", public))
        .await
        .unwrap();

    socket.send(Message::Ping(b"x".to_vec().into())).await.unwrap();
    assert_eq!(next_message(&mut socket).await, Message::Pong(b"x".to_vec().into()));

    // A relayed upstream pong would show up ahead of the echo.
    socket.send(Message::Text("ping".into())).await.unwrap();
    assert_eq!(next_message(&mut socket).await, Message::Text("pong".into()));

    socket.close(None).await.unwrap();
    bridge.stop().await.unwrap();
}

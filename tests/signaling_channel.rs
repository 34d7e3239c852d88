use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use telecall::peer::SessionDescription;
use telecall::signaling::{
    CallStatusValue, ChannelState, CloseReason, SignalingChannel, SignalingError,
    SignalingMessage,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

const GOOD_TOKEN: &str = "secret";
const WAIT: Duration = Duration::from_secs(5);

async fn listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, format!("ws://{addr}/ws/video/"))
}

/// Accepts one client, refusing any token other than [`GOOD_TOKEN`].
async fn accept(listener: &TcpListener) -> Option<WebSocketStream<TcpStream>> {
    let (stream, _) = listener.accept().await.unwrap();
    let check = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        let authorized = req
            .uri()
            .query()
            .is_some_and(|q| q == format!("token={GOOD_TOKEN}"));
        if authorized {
            Ok(resp)
        } else {
            let mut denied = ErrorResponse::new(Some("bad token".into()));
            *denied.status_mut() = StatusCode::UNAUTHORIZED;
            Err(denied)
        }
    };
    tokio_tungstenite::accept_hdr_async(stream, check).await.ok()
}

fn offer() -> SignalingMessage {
    SignalingMessage::CallOffer {
        call_session_id: "abc123".into(),
        from_party: "d1".into(),
        to_party: "p1".into(),
        payload: SessionDescription::offer("v=0\r\n"),
    }
}

#[tokio::test]
async fn rejected_token_is_an_auth_error() {
    let (listener, url) = listener().await;
    let server = tokio::spawn(async move { accept(&listener).await.is_none() });

    let channel = SignalingChannel::new(&url).unwrap();
    assert_eq!(channel.connect("wrong").await, Err(SignalingError::Auth));
    assert_eq!(channel.state(), ChannelState::Disconnected);
    assert!(server.await.unwrap());
}

#[tokio::test]
async fn messages_flow_both_ways() {
    let (listener, url) = listener().await;
    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await.unwrap();
        let received = match ws.next().await {
            Some(Ok(Message::Text(text))) => text,
            other => panic!("expected text frame, got {other:?}"),
        };
        ws.send(Message::Text(offer().encode().unwrap()))
            .await
            .unwrap();
        // keep the socket open until the client is done
        let _ = ws.next().await;
        received
    });

    let channel = SignalingChannel::new(&url).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _sub = channel.on_message(move |m| {
        let _ = tx.send(m.clone());
    });
    channel.connect(GOOD_TOKEN).await.unwrap();
    assert_eq!(channel.state(), ChannelState::Open);

    let status = SignalingMessage::CallStatus {
        call_session_id: "abc123".into(),
        from_party: "p1".into(),
        to_party: None,
        payload: CallStatusValue::Active,
    };
    channel.send(&status).unwrap();

    let inbound = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(inbound, offer());

    channel.close();
    let sent = timeout(WAIT, server).await.unwrap().unwrap();
    assert_eq!(SignalingMessage::decode(&sent).unwrap(), status);
}

#[tokio::test]
async fn malformed_frames_are_dropped() {
    let (listener, url) = listener().await;
    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await.unwrap();
        ws.send(Message::Text("{not json".into())).await.unwrap();
        ws.send(Message::Text(r#"{"type":"call-user","userId":4}"#.into()))
            .await
            .unwrap();
        ws.send(Message::Binary(vec![1, 2, 3])).await.unwrap();
        ws.send(Message::Text(offer().encode().unwrap()))
            .await
            .unwrap();
        let _ = ws.next().await;
    });

    let channel = SignalingChannel::new(&url).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _sub = channel.on_message(move |m| {
        let _ = tx.send(m.clone());
    });
    channel.connect(GOOD_TOKEN).await.unwrap();

    let first = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(first, offer());
    assert!(rx.try_recv().is_err());
    assert_eq!(channel.state(), ChannelState::Open);

    channel.close();
    let _ = timeout(WAIT, server).await;
}

#[tokio::test]
async fn relay_close_is_reported() {
    let (listener, url) = listener().await;
    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await.unwrap();
        ws.close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "bye".into(),
        }))
        .await
        .unwrap();
        while ws.next().await.is_some() {}
    });

    let channel = SignalingChannel::new(&url).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _sub = channel.on_close(move |reason| {
        let _ = tx.send(reason.clone());
    });
    channel.connect(GOOD_TOKEN).await.unwrap();

    let reason = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(
        reason,
        CloseReason::Remote {
            code: 1000,
            reason: "bye".into()
        }
    );
    assert_eq!(channel.state(), ChannelState::Closed);
    assert_eq!(
        channel.send(&offer()),
        Err(SignalingError::ChannelNotReady)
    );
    let _ = timeout(WAIT, server).await;
}

#[tokio::test]
async fn local_close_reports_once() {
    let (listener, url) = listener().await;
    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await.unwrap();
        while ws.next().await.is_some() {}
    });

    let channel = SignalingChannel::new(&url).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _sub = channel.on_close(move |reason| {
        let _ = tx.send(reason.clone());
    });
    channel.connect(GOOD_TOKEN).await.unwrap();
    channel.close();
    channel.close();

    assert_eq!(
        timeout(WAIT, rx.recv()).await.unwrap(),
        Some(CloseReason::Local)
    );
    let _ = timeout(WAIT, server).await;
    assert!(rx.try_recv().is_err());
}

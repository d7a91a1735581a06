//! Websocket upgrade through the full serving stack.

mod common;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use gale::config::ServerConfig;
use gale::http::{handler_fn, Incoming};
use gale::routing::RouteTable;
use gale::ServerContext;
use tokio_tungstenite::tungstenite::Message;

fn echo_context() -> std::sync::Arc<ServerContext> {
    let mut config = ServerConfig::default();
    config.websocket.subprotocols = vec!["echo.v1".to_string()];

    let routes = RouteTable::new().get(
        "/ws",
        handler_fn(|_req, res| {
            Box::pin(async move {
                let mut socket = res.websocket().await?;
                while let Some(message) = socket.receive().await? {
                    match message {
                        Incoming::Text(text) => socket.send_text(text.to_uppercase()).await?,
                        Incoming::Binary(data) => socket.send_binary(data).await?,
                    }
                }
                Ok(())
            })
        }),
    );
    ServerContext::builder(config).router(routes).build()
}

#[tokio::test]
async fn echoes_frames_and_answers_pings() {
    let (_server, addr) = common::start(echo_context()).await;

    let (mut ws, response) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws")).await.unwrap();
    assert_eq!(response.status(), 101);

    ws.send(Message::Text("hello".into())).await.unwrap();
    assert_eq!(ws.next().await.unwrap().unwrap(), Message::Text("HELLO".into()));

    ws.send(Message::Binary(Bytes::from_static(&[1, 2, 3]))).await.unwrap();
    assert_eq!(
        ws.next().await.unwrap().unwrap(),
        Message::Binary(Bytes::from_static(&[1, 2, 3]))
    );

    ws.send(Message::Ping(Bytes::from_static(b"beat"))).await.unwrap();
    assert_eq!(ws.next().await.unwrap().unwrap(), Message::Pong(Bytes::from_static(b"beat")));

    ws.close(None).await.unwrap();
    while let Some(Ok(message)) = ws.next().await {
        if message.is_close() {
            break;
        }
    }
}

#[tokio::test]
async fn negotiates_a_configured_subprotocol() {
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;

    let (_server, addr) = common::start(echo_context()).await;

    let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("sec-websocket-protocol", "chat, echo.v1".parse().unwrap());
    let (_ws, response) = tokio_tungstenite::connect_async(request).await.unwrap();
    assert_eq!(response.headers()["sec-websocket-protocol"], "echo.v1");
}

#[tokio::test]
async fn plain_get_is_refused() {
    let (_server, addr) = common::start(echo_context()).await;

    let res = common::client().get(format!("http://{addr}/ws")).send().await.unwrap();
    assert_eq!(res.status(), 400);
}

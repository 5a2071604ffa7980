//! Integration tests for the WebSocket link.
//!
//! These tests run a tiny broker on a real TCP socket, using
//! `tokio-tungstenite` directly on the server side, and drive it through
//! `WebSocketLink` and the `Dispatcher` on the client side.

#[cfg(feature = "websocket")]
mod websocket {
    use futures_util::{SinkExt, StreamExt};
    use sightwire_protocol::{Action, ActionType, Frame, ReturnCode, Value};
    use sightwire_transport::{Dispatcher, Link, TransportError, WebSocketLink};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;

    /// Binds on an OS-assigned port and answers every binary frame with a
    /// reply carrying `rc` and the request's session id.
    async fn spawn_broker(rc: ReturnCode) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("should bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("should accept");
            let mut ws = tokio_tungstenite::accept_async(stream)
                .await
                .expect("handshake");
            while let Some(Ok(msg)) = ws.next().await {
                let Message::Binary(data) = msg else { continue };
                let request = Frame::decode(&data).expect("valid frame");
                let id = i32::try_from(request.session_id).expect("small id");
                let reply = Frame::reply(&request, rc, vec![Value::Int(id)]);
                let bytes = reply.encode().expect("encodable");
                if ws.send(Message::Binary(bytes.into())).await.is_err() {
                    break;
                }
            }
        });
        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn test_websocket_link_request_round_trip() {
        let url = spawn_broker(ReturnCode::OK).await;
        let link = WebSocketLink::connect(&url).await.expect("should connect");
        assert!(link.id().into_inner() > 0);
        assert_eq!(link.peer(), url);

        let dispatcher = Dispatcher::spawn(link);
        let mut action = Action::new(ActionType::CreateProducer, 17);
        action.put_byte(1).unwrap();
        action.put_str(Some("orders")).unwrap();
        action.set_header_count(2);

        dispatcher.request(&mut action, true).await.expect("request");

        assert!(action.return_code().is_ok());
        assert_eq!(action.response_int(0), Some(17));
    }

    #[tokio::test]
    async fn test_websocket_link_carries_return_code() {
        let url = spawn_broker(ReturnCode::NOT_AUTHORIZED).await;
        let link = WebSocketLink::connect(&url).await.expect("should connect");
        let dispatcher = Dispatcher::spawn(link);

        let mut action = Action::new(ActionType::CreateSession, 0);
        dispatcher.request(&mut action, true).await.expect("request");

        assert_eq!(action.return_code(), ReturnCode::NOT_AUTHORIZED);
    }

    #[tokio::test]
    async fn test_websocket_connect_refused() {
        // Bind then drop to find a port with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let result = WebSocketLink::connect(&format!("ws://{addr}")).await;
        assert!(matches!(result, Err(TransportError::ConnectFailed(_))));
    }
}

//! WebSocket forwarding for preview servers (live reload, HMR).

use axum::extract::ws::{CloseFrame as AxumCloseFrame, Message as AxumMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use log::debug;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header::SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::protocol::CloseFrame as TungsteniteCloseFrame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::api::error::{ApiError, ApiResult};

pub(crate) type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open the upstream socket, offering the client's subprotocols.
///
/// Returns the socket and the subprotocol the upstream selected.
pub(crate) async fn connect_upstream(
    target_url: &str,
    protocols: Option<&str>,
) -> ApiResult<(UpstreamSocket, Option<String>)> {
    let mut request = target_url
        .into_client_request()
        .map_err(|e| ApiError::internal(format!("invalid upstream url {target_url}: {e}")))?;
    if let Some(protocols) = protocols {
        let value = HeaderValue::from_str(protocols)
            .map_err(|_| ApiError::bad_request("invalid sec-websocket-protocol header"))?;
        request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
    }

    debug!("Connecting preview WebSocket upstream {}", target_url);
    let (socket, response) = connect_async(request)
        .await
        .map_err(|e| ApiError::bad_gateway(format!("preview server unreachable: {e}")))?;

    let selected = response
        .headers()
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    Ok((socket, selected))
}

fn to_upstream(msg: AxumMessage) -> TungsteniteMessage {
    match msg {
        AxumMessage::Text(text) => TungsteniteMessage::Text(text.to_string().into()),
        AxumMessage::Binary(data) => TungsteniteMessage::Binary(data),
        AxumMessage::Ping(data) => TungsteniteMessage::Ping(data),
        AxumMessage::Pong(data) => TungsteniteMessage::Pong(data),
        AxumMessage::Close(frame) => TungsteniteMessage::Close(frame.map(|f| {
            TungsteniteCloseFrame {
                code: f.code.into(),
                reason: f.reason.to_string().into(),
            }
        })),
    }
}

fn to_client(msg: TungsteniteMessage) -> Option<AxumMessage> {
    Some(match msg {
        TungsteniteMessage::Text(text) => AxumMessage::Text(text.to_string().into()),
        TungsteniteMessage::Binary(data) => AxumMessage::Binary(data),
        TungsteniteMessage::Ping(data) => AxumMessage::Ping(data),
        TungsteniteMessage::Pong(data) => AxumMessage::Pong(data),
        TungsteniteMessage::Close(frame) => AxumMessage::Close(frame.map(|f| AxumCloseFrame {
            code: f.code.into(),
            reason: f.reason.to_string().into(),
        })),
        TungsteniteMessage::Frame(_) => return None,
    })
}

/// Relay frames both ways until either side closes.
pub(crate) async fn relay(client: WebSocket, upstream: UpstreamSocket) -> anyhow::Result<()> {
    let (mut client_tx, mut client_rx) = client.split();
    let (mut server_tx, mut server_rx) = upstream.split();

    let client_to_server = async {
        while let Some(msg) = client_rx.next().await {
            let msg = to_upstream(msg?);
            let closing = matches!(msg, TungsteniteMessage::Close(_));
            server_tx.send(msg).await?;
            if closing {
                break;
            }
        }
        Ok::<(), anyhow::Error>(())
    };

    let server_to_client = async {
        while let Some(msg) = server_rx.next().await {
            let Some(msg) = to_client(msg?) else {
                continue;
            };
            let closing = matches!(msg, AxumMessage::Close(_));
            client_tx.send(msg).await?;
            if closing {
                break;
            }
        }
        Ok::<(), anyhow::Error>(())
    };

    tokio::select! {
        result = client_to_server => result?,
        result = server_to_client => result?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::Utf8Bytes;

    #[test]
    fn close_frames_keep_their_code() {
        let msg = to_upstream(AxumMessage::Close(Some(AxumCloseFrame {
            code: 1001,
            reason: Utf8Bytes::from_static("going away"),
        })));
        match msg {
            TungsteniteMessage::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), 1001);
                assert_eq!(frame.reason.as_str(), "going away");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn text_frames_reach_the_client() {
        let text = to_client(TungsteniteMessage::Text(
            tokio_tungstenite::tungstenite::Utf8Bytes::from_static("hi"),
        )).unwrap();
        assert!(matches!(text, AxumMessage::Text(t) if t.as_str() == "hi"));
    }
}

use crate::error::ChannelError;
use crate::feed::connection::ReconnectDirective;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message as Frame;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;

pub type ChannelStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Transition hooks of the live channel. The driver calls them in
/// lifecycle order; implementors own the connection state and decide
/// whether a dropped channel is re-opened.
pub trait LiveChannelHooks {
    /// An open attempt is about to be issued.
    fn on_connecting(&mut self);

    fn on_open(&mut self);

    /// One text or binary frame, in arrival order.
    fn on_message(&mut self, payload: Vec<u8>);

    fn on_close(&mut self, error: ChannelError) -> ReconnectDirective;
}

pub async fn connect_channel(endpoint: &Url) -> Result<ChannelStream, ChannelError> {
    let ws_config = WebSocketConfig {
        max_message_size: Some(16 << 20),
        max_frame_size: Some(4 << 20),
        ..Default::default()
    };

    let (stream, _) = connect_async_with_config(endpoint.as_str(), Some(ws_config), true)
        .await
        .map_err(ChannelError::connect)?;
    Ok(stream)
}

/// Keeps the channel open against `endpoint` until the token is
/// cancelled or the hooks give up. The same endpoint is used for every
/// attempt.
pub async fn run_live_channel<H: LiveChannelHooks>(
    endpoint: &Url,
    hooks: &mut H,
    cancel_token: &CancellationToken,
) -> Result<(), ChannelError> {
    while !cancel_token.is_cancelled() {
        hooks.on_connecting();

        let connected = tokio::select! {
            _ = cancel_token.cancelled() => break,
            result = connect_channel(endpoint) => result,
        };

        let failure = match connected {
            Ok(mut stream) => {
                hooks.on_open();
                match pump_frames(&mut stream, hooks, cancel_token).await {
                    Some(error) => error,
                    None => break,
                }
            }
            Err(error) => error,
        };

        match hooks.on_close(failure) {
            ReconnectDirective::RetryAfter(delay) => {
                tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            ReconnectDirective::GiveUp { attempts } => {
                return Err(ChannelError::RetriesExhausted { attempts });
            }
        }
    }

    Ok(())
}

/// Returns `None` on cancellation, otherwise the reason the stream ended.
async fn pump_frames<H: LiveChannelHooks>(
    stream: &mut ChannelStream,
    hooks: &mut H,
    cancel_token: &CancellationToken,
) -> Option<ChannelError> {
    loop {
        let frame = tokio::select! {
            _ = cancel_token.cancelled() => {
                if let Err(error) = stream.close(None).await {
                    tracing::debug!(%error, "live channel close handshake failed");
                }
                return None;
            }
            next_frame = stream.next() => next_frame,
        };

        let Some(frame_result) = frame else {
            return Some(ChannelError::Closed(None));
        };

        match frame_result {
            Ok(Frame::Text(text)) => hooks.on_message(text.into_bytes()),
            Ok(Frame::Binary(bytes)) => hooks.on_message(bytes),
            Ok(Frame::Close(close_frame)) => {
                let reason = close_frame
                    .map(|close_frame| close_frame.reason.to_string())
                    .filter(|reason| !reason.is_empty());
                return Some(ChannelError::Closed(reason));
            }
            Ok(_) => {}
            Err(error) => return Some(ChannelError::frame(error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::SinkExt;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;

    #[derive(Debug, PartialEq)]
    enum Recorded {
        Connecting,
        Open,
        Message(String),
        Close(String),
    }

    struct RecordingHooks {
        events: Vec<Recorded>,
        directives: Vec<ReconnectDirective>,
        cancel_on_message: Option<CancellationToken>,
    }

    impl RecordingHooks {
        fn new(directives: Vec<ReconnectDirective>) -> Self {
            Self {
                events: Vec::new(),
                directives,
                cancel_on_message: None,
            }
        }
    }

    impl LiveChannelHooks for RecordingHooks {
        fn on_connecting(&mut self) {
            self.events.push(Recorded::Connecting);
        }

        fn on_open(&mut self) {
            self.events.push(Recorded::Open);
        }

        fn on_message(&mut self, payload: Vec<u8>) {
            self.events
                .push(Recorded::Message(String::from_utf8_lossy(&payload).into_owned()));
            if let Some(token) = &self.cancel_on_message {
                token.cancel();
            }
        }

        fn on_close(&mut self, error: ChannelError) -> ReconnectDirective {
            let label = match error {
                ChannelError::Connect(_) => "connect".to_string(),
                ChannelError::Closed(reason) => format!("closed:{}", reason.unwrap_or_default()),
                other => other.to_string(),
            };
            self.events.push(Recorded::Close(label));
            if self.directives.is_empty() {
                ReconnectDirective::GiveUp { attempts: 0 }
            } else {
                self.directives.remove(0)
            }
        }
    }

    async fn local_endpoint(listener: &TcpListener) -> Url {
        let address = listener.local_addr().expect("listener should have an address");
        Url::parse(&format!("ws://{address}/live")).expect("loopback url should parse")
    }

    #[tokio::test]
    async fn forwards_text_and_binary_frames_then_reports_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = local_endpoint(&listener).await;

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            ws.send(Frame::Text("first".to_string())).await.unwrap();
            ws.send(Frame::Binary(b"second".to_vec())).await.unwrap();
            ws.close(Some(CloseFrame {
                code: CloseCode::Away,
                reason: "maintenance".into(),
            }))
            .await
            .unwrap();
            while ws.next().await.is_some() {}
        });

        let mut hooks = RecordingHooks::new(Vec::new());
        let token = CancellationToken::new();
        let result = run_live_channel(&endpoint, &mut hooks, &token).await;

        assert!(matches!(result, Err(ChannelError::RetriesExhausted { .. })));
        assert_eq!(
            hooks.events,
            vec![
                Recorded::Connecting,
                Recorded::Open,
                Recorded::Message("first".to_string()),
                Recorded::Message("second".to_string()),
                Recorded::Close("closed:maintenance".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn reopens_the_same_endpoint_after_a_drop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = local_endpoint(&listener).await;

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            drop(ws);

            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            ws.send(Frame::Text("after reconnect".to_string())).await.unwrap();
            while ws.next().await.is_some() {}
        });

        let token = CancellationToken::new();
        let mut hooks = RecordingHooks::new(vec![ReconnectDirective::RetryAfter(Duration::ZERO)]);
        hooks.cancel_on_message = Some(token.clone());

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            run_live_channel(&endpoint, &mut hooks, &token),
        )
        .await
        .expect("driver should stop once cancelled");

        assert!(result.is_ok());
        assert_eq!(hooks.events[0], Recorded::Connecting);
        assert_eq!(hooks.events[1], Recorded::Open);
        assert!(matches!(hooks.events[2], Recorded::Close(_)));
        assert_eq!(
            &hooks.events[3..],
            &[
                Recorded::Connecting,
                Recorded::Open,
                Recorded::Message("after reconnect".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn connect_failure_goes_through_on_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = local_endpoint(&listener).await;
        drop(listener);

        let mut hooks = RecordingHooks::new(Vec::new());
        let token = CancellationToken::new();
        let result = run_live_channel(&endpoint, &mut hooks, &token).await;

        assert!(matches!(result, Err(ChannelError::RetriesExhausted { attempts: 0 })));
        assert_eq!(
            hooks.events,
            vec![Recorded::Connecting, Recorded::Close("connect".to_string())]
        );
    }

    #[tokio::test]
    async fn cancelled_token_never_connects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = local_endpoint(&listener).await;

        let mut hooks = RecordingHooks::new(Vec::new());
        let token = CancellationToken::new();
        token.cancel();

        let result = run_live_channel(&endpoint, &mut hooks, &token).await;
        assert!(result.is_ok());
        assert!(hooks.events.is_empty());
    }
}

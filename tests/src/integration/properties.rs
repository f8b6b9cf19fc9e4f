//! # Relay Properties
//!
//! Bounds the relay guarantees regardless of timing:
//!
//! | Property | Test |
//! |----------|------|
//! | Never more than `max_attempts` sends | `test_attempts_never_exceed_max` |
//! | Transient failures retried at least once | `test_transient_failure_retried_before_failing` |
//! | N pending calls → exactly N `ChannelClosed` | `test_disconnect_rejects_exactly_pending_calls` |
//! | One terminal per call | `test_nothing_after_terminal` |

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use relay_runtime::{DemoHandler, COUNTER_SERVICE, ECHO_SERVICE};
    use relay_transport::adapters::NO_RECEIVER;
    use relay_transport::{
        AllowAllOrigins, ChannelLabel, ForwardingConnector, MemoryHost, Payload, RelayClient,
        SessionManager, TransportError,
    };
    use serde_json::json;
    use tokio_stream::StreamExt;

    use crate::integration::fixtures::{
        fast_config, topology, wait_until, within, CountingConnector, HOLD_SERVICE, PAGE_ORIGIN,
    };

    /// Page client over a counting connector and a host nobody listens on.
    fn unreachable_client(max_attempts: u32) -> (RelayClient, Arc<CountingConnector>) {
        let host = MemoryHost::new();
        let connector = CountingConnector::new(Arc::new(ForwardingConnector::new(Arc::new(
            host.document(PAGE_ORIGIN),
        ))));
        let client = RelayClient::builder(&fast_config(max_attempts))
            .context("page")
            .label(ChannelLabel::ContentScript)
            .connector(connector.clone())
            .build();
        (client, connector)
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_never_exceed_max() {
        for max_attempts in [1, 2, 5, 10] {
            let (client, connector) = unreachable_client(max_attempts);

            let result = client.unary(ECHO_SERVICE, Payload::Empty).await;

            assert_eq!(
                result,
                Err(TransportError::RetriesExhausted {
                    attempts: max_attempts,
                    last: Box::new(TransportError::unavailable(NO_RECEIVER)),
                })
            );
            assert_eq!(connector.attempts(), max_attempts);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retried_before_failing() {
        let (client, connector) = unreachable_client(2);

        let result = client.unary(ECHO_SERVICE, Payload::Empty).await;

        assert!(result.is_err());
        assert!(connector.attempts() >= 2);
    }

    #[tokio::test]
    async fn test_transient_failure_then_success_sends_once_delivered() {
        // Arrange: background comes up after the first attempt failed
        let host = MemoryHost::new();
        let connector = CountingConnector::new(Arc::new(ForwardingConnector::new(Arc::new(
            host.document(PAGE_ORIGIN),
        ))));
        let client = RelayClient::builder(&fast_config(5))
            .context("page")
            .label(ChannelLabel::ContentScript)
            .connector(connector.clone())
            .build();
        let sessions = SessionManager::new(Arc::new(DemoHandler::new()), Arc::new(AllowAllOrigins));

        let listener = {
            let host = host.clone();
            let sessions = sessions.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                sessions.serve(host.listen()).await;
            })
        };

        // Act
        let reply = within(client.unary(ECHO_SERVICE, Payload::json("late"))).await;

        // Assert
        assert_eq!(reply, Ok(Payload::json("late")));
        assert!(connector.attempts() >= 2);
        assert_eq!(sessions.session_count(), 1);
        listener.abort();
    }

    #[tokio::test]
    async fn test_disconnect_rejects_exactly_pending_calls() {
        const PENDING: usize = 4;

        // Arrange
        let (topology, handler) = topology(5);
        let mut streams = Vec::new();
        for _ in 0..PENDING {
            streams.push(
                within(topology.page().server_stream(HOLD_SERVICE, Payload::Empty))
                    .await
                    .unwrap(),
            );
        }
        wait_until(|| handler.held() == PENDING).await;
        assert_eq!(topology.page().pending(HOLD_SERVICE), PENDING);

        // Act
        topology.stop_background();

        // Assert: every caller sees ChannelClosed, exactly once, nothing else
        for stream in &mut streams {
            assert_eq!(
                within(stream.next()).await,
                Some(Err(TransportError::channel_closed(HOLD_SERVICE)))
            );
            assert_eq!(stream.next().await, None);
        }
        wait_until(|| handler.released() == PENDING).await;
    }

    #[tokio::test]
    async fn test_nothing_after_terminal() {
        let (topology, _handler) = topology(5);

        let mut stream = within(
            topology
                .page()
                .server_stream(COUNTER_SERVICE, Payload::json(json!({"to": 2}))),
        )
        .await
        .unwrap();

        let mut items = Vec::new();
        while let Some(item) = within(stream.next()).await {
            items.push(item);
        }
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(Result::is_ok));

        for _ in 0..3 {
            assert_eq!(stream.next().await, None);
        }
        assert_eq!(topology.page().pending(COUNTER_SERVICE), 0);
    }
}

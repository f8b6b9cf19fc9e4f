//! # Background Worker Restart
//!
//! The host may suspend the background worker at any time. In-flight calls
//! fail with `ChannelClosed`; new calls back off until the worker listens
//! again.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use relay_runtime::ECHO_SERVICE;
    use relay_transport::{Payload, TransportError};
    use tokio_stream::StreamExt;

    use crate::integration::fixtures::{topology, wait_until, within, HOLD_SERVICE};

    #[tokio::test]
    async fn test_in_flight_call_fails_when_worker_stops() {
        // Arrange
        let (topology, handler) = topology(5);
        let mut stream = within(topology.page().server_stream(HOLD_SERVICE, Payload::Empty))
            .await
            .unwrap();
        wait_until(|| handler.held() == 1).await;

        // Act
        assert_eq!(topology.stop_background(), 1);

        // Assert
        assert_eq!(
            within(stream.next()).await,
            Some(Err(TransportError::channel_closed(HOLD_SERVICE)))
        );
        assert_eq!(stream.next().await, None);
        wait_until(|| !topology.page().is_attached(HOLD_SERVICE)).await;
        wait_until(|| handler.released() == 1).await;
    }

    #[tokio::test]
    async fn test_call_recovers_after_worker_restart() {
        // Arrange: one successful call, then the worker goes away
        let (topology, _handler) = topology(10);
        let topology = Arc::new(topology);
        within(topology.page().unary(ECHO_SERVICE, Payload::json("before")))
            .await
            .unwrap();
        topology.stop_background();
        wait_until(|| !topology.page().is_attached(ECHO_SERVICE)).await;

        // Act: the worker comes back while the caller is backing off
        let restarter = topology.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            restarter.start_background();
        });
        let reply = within(topology.page().unary(ECHO_SERVICE, Payload::json("after"))).await;

        // Assert
        assert_eq!(reply, Ok(Payload::json("after")));
        assert!(topology.is_background_running());
        assert_eq!(topology.sessions().session_count(), 1);
    }

    #[tokio::test]
    async fn test_call_while_suspended_exhausts_retries() {
        let (topology, _handler) = topology(3);
        topology.stop_background();

        let result = within(topology.page().unary(ECHO_SERVICE, Payload::Empty)).await;

        let Err(TransportError::RetriesExhausted { attempts, last }) = result else {
            panic!("expected retries to be exhausted, got {result:?}");
        };
        assert_eq!(attempts, 3);
        assert!(matches!(*last, TransportError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_repeated_restarts() {
        let (topology, _handler) = topology(10);

        for round in 0..3 {
            let reply = within(topology.page().unary(ECHO_SERVICE, Payload::json(round))).await;
            assert_eq!(reply, Ok(Payload::json(round)));

            topology.stop_background();
            wait_until(|| !topology.page().is_attached(ECHO_SERVICE)).await;
            topology.start_background();
        }
    }
}

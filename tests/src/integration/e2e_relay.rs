//! # End-to-End Relay Flows
//!
//! page → content script → background and back, over the memory host.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use relay_runtime::{Topology, COUNTER_SERVICE, ECHO_SERVICE};
    use relay_transport::{
        ChannelLabel, ForwardingConnector, Payload, RelayClient, RelayOrigin, TransportError,
    };
    use serde_json::json;
    use tokio_stream::StreamExt;

    use crate::integration::fixtures::{
        fast_config, topology, topology_approving, wait_until, within, HOLD_SERVICE, PAGE_ORIGIN,
    };

    #[tokio::test]
    async fn test_unary_echo_across_contexts() {
        // Arrange
        let (topology, handler) = topology(5);

        // Act
        let reply = within(
            topology
                .page()
                .unary(ECHO_SERVICE, Payload::json(json!({"hello": "relay"}))),
        )
        .await;

        // Assert
        assert_eq!(reply, Ok(Payload::json(json!({"hello": "relay"}))));
        assert_eq!(handler.calls(), 1);
        assert_eq!(topology.sessions().session_count(), 1);
    }

    #[tokio::test]
    async fn test_stream_chunks_arrive_in_order_then_complete() {
        // Arrange
        let (topology, _handler) = topology(5);

        // Act
        let mut stream = within(
            topology
                .page()
                .server_stream(COUNTER_SERVICE, Payload::json(json!({"to": 3}))),
        )
        .await
        .unwrap();
        let mut items = Vec::new();
        while let Some(item) = within(stream.next()).await {
            items.push(item);
        }

        // Assert: [1, 2, 3] then completion, no error
        assert_eq!(
            items,
            vec![
                Ok(Payload::json(1)),
                Ok(Payload::json(2)),
                Ok(Payload::json(3))
            ]
        );
        assert!(stream.is_finished());
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_channel_reused_across_calls() {
        let (topology, handler) = topology(5);

        for n in 0..5 {
            let reply = within(topology.page().unary(ECHO_SERVICE, Payload::json(n))).await;
            assert_eq!(reply, Ok(Payload::json(n)));
        }

        assert_eq!(handler.calls(), 5);
        assert_eq!(topology.sessions().session_count(), 1);
        assert_eq!(topology.page().services(), vec![ECHO_SERVICE.to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_calls_resolve_independently() {
        let (topology, _handler) = topology(5);
        let topology = Arc::new(topology);

        let calls: Vec<_> = (0..10)
            .map(|n| {
                let topology = topology.clone();
                tokio::spawn(async move {
                    topology
                        .page()
                        .unary(ECHO_SERVICE, Payload::json(n))
                        .await
                })
            })
            .collect();

        for (n, call) in calls.into_iter().enumerate() {
            let reply = within(call).await.unwrap();
            assert_eq!(reply, Ok(Payload::json(n)));
        }
    }

    #[tokio::test]
    async fn test_application_error_reaches_caller_untouched() {
        let (topology, _handler) = topology(5);

        let mut stream = within(
            topology
                .page()
                .server_stream(COUNTER_SERVICE, Payload::json("three")),
        )
        .await
        .unwrap();

        let Some(Err(TransportError::Application(payload))) = within(stream.next()).await else {
            panic!("expected an application error");
        };
        assert_eq!(
            payload.as_json().and_then(|v| v.get("code")),
            Some(&json!("invalid_argument"))
        );
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_unknown_service_is_an_application_error() {
        let (topology, _handler) = topology(5);

        let reply = within(topology.page().unary("relay.test.v1.Missing", Payload::Empty)).await;

        assert!(matches!(reply, Err(TransportError::Application(_))));
    }

    #[tokio::test]
    async fn test_dropping_stream_stops_background_producer() {
        // Arrange
        let (topology, handler) = topology(5);
        let stream = within(topology.page().server_stream(HOLD_SERVICE, Payload::Empty))
            .await
            .unwrap();
        wait_until(|| handler.held() == 1).await;
        assert_eq!(handler.released(), 0);

        // Act
        drop(stream);

        // Assert: the abort crosses both hops and the producer is dropped
        wait_until(|| handler.released() == 1).await;
        assert_eq!(topology.page().pending(HOLD_SERVICE), 0);
    }

    #[tokio::test]
    async fn test_unapproved_origin_never_reaches_handler() {
        // Arrange
        let (topology, handler) = topology_approving(2, "https://other.example");

        // Act
        let result = within(topology.page().unary(ECHO_SERVICE, Payload::json(1))).await;

        // Assert: refused by the background, either mid-call or on every retry
        assert!(
            matches!(
                result,
                Err(TransportError::ChannelClosed { .. } | TransportError::RetriesExhausted { .. })
            ),
            "unexpected result: {result:?}"
        );
        assert_eq!(handler.calls(), 0);
        wait_until(|| topology.sessions().session_count() == 0).await;
    }

    #[tokio::test]
    async fn test_page_claiming_another_origin_is_refused() {
        // Arrange: the background trusts the bank; the page lives elsewhere
        let (topology, handler) = topology_approving(2, "https://bank.example");
        let mut config = fast_config(2);
        config.origin = RelayOrigin("https://bank.example".to_string());
        let spoofer = RelayClient::builder(&config)
            .context("page")
            .label(ChannelLabel::ContentScript)
            .connector(Arc::new(ForwardingConnector::new(Arc::new(
                topology.host().document(PAGE_ORIGIN),
            ))))
            .build();

        // Act
        let result = within(spoofer.unary(ECHO_SERVICE, Payload::json(1))).await;

        // Assert
        assert!(
            matches!(
                result,
                Err(TransportError::ChannelClosed { .. } | TransportError::RetriesExhausted { .. })
            ),
            "unexpected result: {result:?}"
        );
        assert_eq!(handler.calls(), 0);
        assert_eq!(topology.sessions().session_count(), 0);
    }

    #[tokio::test]
    async fn test_independent_topologies_do_not_share_channels() {
        let first = Topology::new(
            &fast_config(3),
            Arc::new(relay_runtime::DemoHandler::new()),
            Arc::new(relay_transport::AllowAllOrigins),
        );
        let second = Topology::new(
            &fast_config(3),
            Arc::new(relay_runtime::DemoHandler::new()),
            Arc::new(relay_transport::AllowAllOrigins),
        );
        first.start_background();
        second.start_background();

        within(first.page().unary(ECHO_SERVICE, Payload::Empty))
            .await
            .unwrap();

        assert!(first.page().is_attached(ECHO_SERVICE));
        assert!(!second.page().is_attached(ECHO_SERVICE));
        assert_eq!(second.sessions().session_count(), 0);
    }
}

//! # Relay Client Integration Tests
//!
//! Drives a `RelayClient` against a scripted remote end that reads raw
//! envelopes and writes replies by hand, so every wire-level edge case can
//! be produced on demand.

use std::sync::Arc;
use std::time::Duration;

use relay_transport::{
    Endpoint, Envelope, EnvelopeKind, Jitter, MemoryHost, MemoryPort, Payload, PortEvent,
    RelayClient, RelayConfig, RetryPolicy, TransportError,
};
use serde_json::json;
use tokio::time::timeout;
use tokio_stream::StreamExt;

const SERVICE: &str = "penumbra.view.v1.ViewService";

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_delay: Duration::from_millis(10),
        multiplier: 2.0,
        max_delay: None,
        jitter: Jitter::None,
    }
}

fn client() -> RelayClient {
    RelayClient::builder(&RelayConfig::default())
        .context("page")
        .retry_policy(fast_retry(3))
        .build()
}

/// Client with a channel for `SERVICE` attached; returns the remote end.
fn attached_client() -> (RelayClient, Endpoint) {
    let client = client();
    let (local, remote) = MemoryPort::pair(SERVICE);
    client.attach(SERVICE, local).expect("attach");
    (client, remote)
}

async fn next_envelope(remote: &mut Endpoint) -> Envelope {
    match timeout(Duration::from_secs(1), remote.events.recv())
        .await
        .expect("timeout")
    {
        Some(PortEvent::Message(message)) => Envelope::decode(&message).expect("envelope"),
        other => panic!("expected a message, got {other:?}"),
    }
}

fn reply(remote: &Endpoint, envelope: Envelope) {
    remote
        .port
        .post_message(envelope.encode().expect("encode"))
        .expect("post");
}

#[tokio::test]
async fn test_unary_round_trip() {
    let (client, mut remote) = attached_client();

    let call = {
        let client = client.clone();
        tokio::spawn(async move { client.unary(SERVICE, Payload::json(json!({"q": 1}))).await })
    };

    let request = next_envelope(&mut remote).await;
    assert_eq!(request.kind, EnvelopeKind::Request);
    assert_eq!(request.payload, Payload::json(json!({"q": 1})));
    reply(
        &remote,
        Envelope::response(request.correlation_id, Payload::json("ok")),
    );

    let result = timeout(Duration::from_secs(1), call)
        .await
        .expect("timeout")
        .expect("join");
    assert_eq!(result, Ok(Payload::json("ok")));
    assert_eq!(client.pending(SERVICE), 0);
}

/// Chunks 1, 2, 3 then streamEnd: the caller sees exactly [1, 2, 3].
#[tokio::test]
async fn test_server_stream_chunks_then_end() {
    let (client, mut remote) = attached_client();

    let mut stream = client
        .server_stream(SERVICE, Payload::Empty)
        .await
        .expect("stream");
    let request = next_envelope(&mut remote).await;
    assert_eq!(&request.correlation_id, stream.correlation_id());

    for n in 1..=3 {
        reply(
            &remote,
            Envelope::chunk(request.correlation_id.clone(), Payload::json(n)),
        );
    }
    reply(&remote, Envelope::end(request.correlation_id.clone()));

    let mut items = Vec::new();
    while let Some(item) = timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("timeout")
    {
        items.push(item.expect("chunk"));
    }
    assert_eq!(
        items,
        vec![Payload::json(1), Payload::json(2), Payload::json(3)]
    );
}

#[tokio::test]
async fn test_late_chunk_after_end_is_dropped() {
    let (client, mut remote) = attached_client();

    let stream = client
        .server_stream(SERVICE, Payload::Empty)
        .await
        .expect("stream");
    let request = next_envelope(&mut remote).await;
    let id = request.correlation_id;

    reply(&remote, Envelope::chunk(id.clone(), Payload::json(1)));
    reply(&remote, Envelope::end(id.clone()));
    reply(&remote, Envelope::chunk(id.clone(), Payload::json(2)));

    let items: Vec<_> = timeout(Duration::from_secs(1), stream.collect::<Vec<_>>())
        .await
        .expect("timeout");
    assert_eq!(items, vec![Ok(Payload::json(1))]);

    // The channel keeps working after the late chunk.
    let call = {
        let client = client.clone();
        tokio::spawn(async move { client.unary(SERVICE, Payload::Empty).await })
    };
    let request = next_envelope(&mut remote).await;
    reply(
        &remote,
        Envelope::response(request.correlation_id, Payload::json("still here")),
    );
    let result = timeout(Duration::from_secs(1), call)
        .await
        .expect("timeout")
        .expect("join");
    assert_eq!(result, Ok(Payload::json("still here")));
}

#[tokio::test]
async fn test_disconnect_rejects_every_pending_call() {
    let (client, mut remote) = attached_client();

    let calls: Vec<_> = (0..3)
        .map(|n| {
            let client = client.clone();
            tokio::spawn(async move { client.unary(SERVICE, Payload::json(n)).await })
        })
        .collect();
    for _ in 0..3 {
        next_envelope(&mut remote).await;
    }

    remote.port.disconnect();

    for call in calls {
        let result = timeout(Duration::from_secs(1), call)
            .await
            .expect("timeout")
            .expect("join");
        assert_eq!(result, Err(TransportError::channel_closed(SERVICE)));
    }
    assert!(!client.is_attached(SERVICE));
}

/// A reply posted just before the remote went away still reaches its caller,
/// even when a replacement channel is attached before the old one drains.
#[tokio::test]
async fn test_reply_before_disconnect_survives_reattach() {
    // Arrange
    let (client, mut remote) = attached_client();
    let call = {
        let client = client.clone();
        tokio::spawn(async move { client.unary(SERVICE, Payload::json("a")).await })
    };
    let request = next_envelope(&mut remote).await;

    // Act: answer, hang up, and re-attach without yielding in between
    reply(
        &remote,
        Envelope::response(request.correlation_id, Payload::json("answer-a")),
    );
    remote.port.disconnect();
    let (local, _fresh_remote) = MemoryPort::pair(SERVICE);
    client.attach(SERVICE, local).expect("replace dead channel");

    // Assert
    let result = timeout(Duration::from_secs(1), call)
        .await
        .expect("timeout")
        .expect("join");
    assert_eq!(result, Ok(Payload::json("answer-a")));

    // The old channel's late disconnect leaves the replacement in place.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(client.is_attached(SERVICE));
}

#[tokio::test]
async fn test_application_error_passes_through() {
    let (client, mut remote) = attached_client();

    let call = {
        let client = client.clone();
        tokio::spawn(async move { client.unary(SERVICE, Payload::Empty).await })
    };
    let request = next_envelope(&mut remote).await;
    let reason = Payload::json(json!({"code": "not_found", "message": "no such note"}));
    reply(
        &remote,
        Envelope::abort(request.correlation_id, reason.clone()),
    );

    let result = timeout(Duration::from_secs(1), call)
        .await
        .expect("timeout")
        .expect("join");
    assert_eq!(result, Err(TransportError::Application(reason)));
}

#[tokio::test]
async fn test_dropping_stream_sends_abort() {
    let (client, mut remote) = attached_client();

    let mut stream = client
        .server_stream(SERVICE, Payload::Empty)
        .await
        .expect("stream");
    let request = next_envelope(&mut remote).await;
    reply(
        &remote,
        Envelope::chunk(request.correlation_id.clone(), Payload::json(1)),
    );
    let first = timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("timeout");
    assert_eq!(first, Some(Ok(Payload::json(1))));

    drop(stream);

    let abort = next_envelope(&mut remote).await;
    assert_eq!(abort.kind, EnvelopeKind::StreamAbort);
    assert_eq!(abort.correlation_id, request.correlation_id);
    assert_eq!(client.pending(SERVICE), 0);
}

#[tokio::test]
async fn test_malformed_messages_are_ignored() {
    let (client, mut remote) = attached_client();

    let call = {
        let client = client.clone();
        tokio::spawn(async move { client.unary(SERVICE, Payload::Empty).await })
    };
    let request = next_envelope(&mut remote).await;

    remote.port.post_message(json!("garbage")).expect("post");
    remote
        .port
        .post_message(json!({"kind": "response"}))
        .expect("post");
    reply(
        &remote,
        Envelope::chunk("someone-else".into(), Payload::json(0)),
    );
    reply(
        &remote,
        Envelope::response(request.correlation_id, Payload::json("ok")),
    );

    let result = timeout(Duration::from_secs(1), call)
        .await
        .expect("timeout")
        .expect("join");
    assert_eq!(result, Ok(Payload::json("ok")));
}

#[tokio::test(start_paused = true)]
async fn test_retry_until_channel_attached() {
    let client = RelayClient::builder(&RelayConfig::default())
        .retry_policy(fast_retry(5))
        .build();

    let call = {
        let client = client.clone();
        tokio::spawn(async move { client.unary(SERVICE, Payload::Empty).await })
    };

    // First attempt at 0ms and retry at 10ms both fail; the channel appears
    // at 15ms and the retry at 30ms succeeds.
    tokio::time::sleep(Duration::from_millis(15)).await;
    let (local, mut remote) = MemoryPort::pair(SERVICE);
    client.attach(SERVICE, local).expect("attach");

    let request = next_envelope(&mut remote).await;
    reply(
        &remote,
        Envelope::response(request.correlation_id, Payload::json("late but fine")),
    );

    let result = call.await.expect("join");
    assert_eq!(result, Ok(Payload::json("late but fine")));
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted_without_channel() {
    let client = client();

    let result = client.unary(SERVICE, Payload::Empty).await;

    assert_eq!(
        result,
        Err(TransportError::RetriesExhausted {
            attempts: 3,
            last: Box::new(TransportError::ChannelUnavailable {
                service: SERVICE.into()
            }),
        })
    );
}

#[tokio::test]
async fn test_connector_opens_and_reopens_channels() {
    let host = MemoryHost::new();
    let mut incoming = host.listen();
    let client = RelayClient::builder(&RelayConfig::default())
        .retry_policy(fast_retry(3))
        .connector(Arc::new(host.document(RelayConfig::default().origin.as_str())))
        .build();

    for round in 0..2 {
        let call = {
            let client = client.clone();
            tokio::spawn(async move { client.unary(SERVICE, Payload::json(round)).await })
        };

        let mut remote = timeout(Duration::from_secs(1), incoming.recv())
            .await
            .expect("timeout")
            .expect("endpoint");
        assert!(remote.port.name().ends_with(SERVICE));

        let request = next_envelope(&mut remote).await;
        reply(
            &remote,
            Envelope::response(request.correlation_id, Payload::json(round)),
        );
        let result = timeout(Duration::from_secs(1), call)
            .await
            .expect("timeout")
            .expect("join");
        assert_eq!(result, Ok(Payload::json(round)));

        // Drop the channel; the next round must open a fresh one.
        remote.port.disconnect();
        timeout(Duration::from_secs(1), async {
            while client.is_attached(SERVICE) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("timeout");
    }
}

#[tokio::test]
async fn test_connector_unavailable_is_retried_then_exhausted() {
    let host = MemoryHost::new();
    let client = RelayClient::builder(&RelayConfig::default())
        .retry_policy(fast_retry(2))
        .connector(Arc::new(host.document(RelayConfig::default().origin.as_str())))
        .build();

    let result = client.unary(SERVICE, Payload::Empty).await;

    match result {
        Err(TransportError::RetriesExhausted { attempts, last }) => {
            assert_eq!(attempts, 2);
            assert!(matches!(*last, TransportError::Unavailable { .. }));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_stream_idle_timeout_aborts() {
    let mut config = RelayConfig::default();
    config.stream.idle_timeout_ms = 50;
    let client = RelayClient::builder(&config).build();
    let (local, mut remote) = MemoryPort::pair(SERVICE);
    client.attach(SERVICE, local).expect("attach");

    let mut stream = client
        .server_stream(SERVICE, Payload::Empty)
        .await
        .expect("stream");
    let request = next_envelope(&mut remote).await;

    let item = stream.next().await;
    assert_eq!(item, Some(Err(TransportError::Timeout { timeout_ms: 50 })));
    assert_eq!(stream.next().await, None);

    let abort = next_envelope(&mut remote).await;
    assert_eq!(abort.kind, EnvelopeKind::StreamAbort);
    assert_eq!(abort.correlation_id, request.correlation_id);
}

#[tokio::test]
async fn test_detach_rejects_pending_and_frees_name() {
    let (client, mut remote) = attached_client();

    let call = {
        let client = client.clone();
        tokio::spawn(async move { client.unary(SERVICE, Payload::Empty).await })
    };
    next_envelope(&mut remote).await;

    assert_eq!(client.detach(SERVICE), Some(1));
    let result = timeout(Duration::from_secs(1), call)
        .await
        .expect("timeout")
        .expect("join");
    assert_eq!(result, Err(TransportError::channel_closed(SERVICE)));

    // The remote end observes the disconnect.
    assert_eq!(
        timeout(Duration::from_secs(1), remote.events.recv())
            .await
            .expect("timeout"),
        Some(PortEvent::Disconnected)
    );

    // A fresh channel can take the name.
    let (local, _remote) = MemoryPort::pair(SERVICE);
    assert!(client.attach(SERVICE, local).is_ok());
}

#[tokio::test]
async fn test_attach_twice_is_refused() {
    let (client, _remote) = attached_client();
    let (second, mut second_remote) = MemoryPort::pair(SERVICE);

    assert_eq!(
        client.attach(SERVICE, second),
        Err(TransportError::AlreadyRegistered {
            service: SERVICE.into()
        })
    );
    assert_eq!(
        timeout(Duration::from_secs(1), second_remote.events.recv())
            .await
            .expect("timeout"),
        Some(PortEvent::Disconnected)
    );
    assert_eq!(client.services(), vec![SERVICE.to_string()]);
}

//! # Relay Benchmarks
//!
//! | Path | What is measured |
//! |------|------------------|
//! | Envelope codec | encode + decode of each kind |
//! | Multiplexer | open, three chunks, end, drain |
//! | Channel names | format + parse |

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use relay_transport::{
    ChannelLabel, ChannelName, CorrelationId, Envelope, Payload, StreamMultiplexer,
};
use serde_json::json;

fn bench_envelope_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope-codec");
    let id = CorrelationId::from("bench-0001");
    let payload = Payload::json(json!({"account": 0, "filter": {"asset": "upenumbra"}}));
    let envelopes = [
        ("request", Envelope::request(id.clone(), payload.clone())),
        ("response", Envelope::response(id.clone(), payload.clone())),
        ("chunk", Envelope::chunk(id.clone(), payload.clone())),
        ("end", Envelope::end(id.clone())),
        ("abort", Envelope::abort(id, payload)),
    ];

    group.throughput(Throughput::Elements(1));
    for (kind, envelope) in &envelopes {
        group.bench_function(*kind, |b| {
            b.iter(|| {
                let wire = envelope.encode().ok();
                black_box(wire.and_then(|value| Envelope::decode(&value).ok()))
            });
        });
    }
    group.finish();
}

fn bench_multiplexer_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("multiplexer");
    let mux = StreamMultiplexer::new("relay.bench.v1.Service");
    let mut next = 0u64;

    group.throughput(Throughput::Elements(4));
    group.bench_function("open-3-chunks-end", |b| {
        b.iter(|| {
            next += 1;
            let id = CorrelationId::from(format!("call-{next}"));
            let Ok(mut events) = mux.open(id.clone()) else {
                return;
            };
            for n in 1..=3 {
                black_box(mux.dispatch(Envelope::chunk(id.clone(), Payload::json(n))));
            }
            black_box(mux.dispatch(Envelope::end(id)));
            while let Ok(event) = events.try_recv() {
                black_box(event);
            }
        });
    });
    group.finish();
}

fn bench_channel_names(c: &mut Criterion) {
    let name = ChannelName::new(
        ChannelLabel::ContentScript,
        "https://app.example",
        Some("penumbra.view.v1.ViewService"),
    )
    .ok();
    let Some(name) = name else {
        return;
    };
    let raw = name.to_string();

    c.bench_function("channel-name-parse", |b| {
        b.iter(|| black_box(ChannelName::parse(black_box(&raw)).ok()));
    });
}

criterion_group!(
    benches,
    bench_envelope_codec,
    bench_multiplexer_dispatch,
    bench_channel_names
);
criterion_main!(benches);

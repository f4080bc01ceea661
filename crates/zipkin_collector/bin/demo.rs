//! Zipkin Collector Demo
//!
//! Generates random RPC traces, encodes them in every supported wire format
//! and feeds them through one collector the way separate transports would.
//!
//! Usage:
//!   cargo run --bin demo                     # keep every trace, v2 storage
//!   cargo run --bin demo -- --rate 0.25      # keep roughly a quarter
//!   cargo run --bin demo -- --v1-storage     # storage without a v2 consumer
//!   RUST_LOG=zipkin_collector=trace cargo run --bin demo

use anyhow::{bail, Context};
use rand::Rng;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use zipkin_collector::v1::{Annotation, BinaryAnnotation};
use zipkin_collector::{
    constants, convert, v1, Collector, CollectorConfig, CollectorError, CollectorSampler,
    DetectingDecoder, Endpoint, InMemoryCollectorMetrics, InMemoryStorage, JsonV1Encoder,
    JsonV2Encoder, SpanEncoder, ThriftEncoder, TraceId,
};

const TRANSPORTS: [&str; 3] = ["thrift", "json-v1", "json-v2"];

struct Args {
    rate: f64,
    v1_storage: bool,
    traces: usize,
    batch_size: usize,
}

impl Args {
    fn parse(mut args: impl Iterator<Item = String>) -> anyhow::Result<Self> {
        let mut parsed = Self {
            rate: 1.0,
            v1_storage: false,
            traces: 100,
            batch_size: 10,
        };
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--rate" => {
                    let value = args.next().context("--rate needs a value")?;
                    parsed.rate = value.parse().with_context(|| format!("bad rate {value}"))?;
                }
                "--traces" => {
                    let value = args.next().context("--traces needs a value")?;
                    parsed.traces = value.parse().with_context(|| format!("bad count {value}"))?;
                }
                "--batch-size" => {
                    let value = args.next().context("--batch-size needs a value")?;
                    parsed.batch_size =
                        value.parse().with_context(|| format!("bad batch size {value}"))?;
                }
                "--v1-storage" => parsed.v1_storage = true,
                other => bail!("unknown argument {other}"),
            }
        }
        if parsed.batch_size == 0 {
            bail!("--batch-size must be positive");
        }
        Ok(parsed)
    }
}

/// A client span and the matching server span of one RPC, as two hosts
/// would report them.
fn rpc(rng: &mut impl Rng, now: u64) -> [v1::Span; 2] {
    let trace_id = TraceId::new(rng.gen(), rng.gen());
    let span_id: u64 = rng.gen();
    let frontend = Endpoint::new("frontend").with_ipv4([172, 17, 0, 13].into());
    let backend = Endpoint::new("backend")
        .with_ipv4([172, 17, 0, 9].into())
        .with_port(9411);

    let latency = rng.gen_range(1_000..50_000);
    let server_time = latency / 2;
    let server_start = now + (latency - server_time) / 2;

    let client = v1::Span::builder(trace_id, span_id)
        .name("get /api")
        .annotation(Annotation::new(now, constants::CLIENT_SEND, Some(frontend.clone())))
        .annotation(Annotation::new(
            now + latency,
            constants::CLIENT_RECV,
            Some(frontend.clone()),
        ))
        .binary_annotation(BinaryAnnotation::new("http.path", "/api", Some(frontend)))
        .binary_annotation(BinaryAnnotation::address(constants::SERVER_ADDR, backend.clone()))
        .build();
    let server = v1::Span::builder(trace_id, span_id)
        .name("get /api")
        .annotation(Annotation::new(
            server_start,
            constants::SERVER_RECV,
            Some(backend.clone()),
        ))
        .annotation(Annotation::new(
            server_start + server_time,
            constants::SERVER_SEND,
            Some(backend),
        ))
        .build();
    [client, server]
}

fn encode(transport: &str, spans: &[v1::Span]) -> Vec<u8> {
    match transport {
        "thrift" => ThriftEncoder.encode_list(spans),
        "json-v1" => JsonV1Encoder.encode_list(spans),
        _ => {
            let spans: Vec<_> = spans.iter().flat_map(convert::to_v2).collect();
            JsonV2Encoder.encode_list(&spans)
        }
    }
}

async fn send(
    collector: &Collector,
    payload: &[u8],
) -> anyhow::Result<Result<(), CollectorError>> {
    let (tx, rx) = oneshot::channel();
    collector.accept_spans(payload, &DetectingDecoder, Box::new(tx));
    rx.await.context("collector dropped the callback")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse(std::env::args().skip(1))?;
    let sampler = CollectorSampler::create(args.rate)?;
    let storage = if args.v1_storage {
        InMemoryStorage::v1_only()
    } else {
        InMemoryStorage::new()
    };
    let metrics = InMemoryCollectorMetrics::new();

    info!(
        rate = args.rate,
        v1_storage = args.v1_storage,
        traces = args.traces,
        batch_size = args.batch_size,
        "starting demo"
    );

    let mut rng = rand::thread_rng();
    let start = Instant::now();
    let mut failures = 0usize;

    for transport in TRANSPORTS {
        let collector = Collector::new(CollectorConfig {
            sampler: Some(Arc::new(sampler.clone())),
            metrics: Some(Arc::new(metrics.scoped(transport))),
            storage: Some(Arc::new(storage.clone())),
            ..Default::default()
        })?;

        let mut now = 1_700_000_000_000_000u64;
        let spans: Vec<v1::Span> = (0..args.traces)
            .flat_map(|_| {
                now += 100_000;
                rpc(&mut rng, now)
            })
            .collect();

        for batch in spans.chunks(args.batch_size) {
            if let Err(error) = send(&collector, &encode(transport, batch)).await? {
                warn!(transport, %error, "batch failed");
                failures += 1;
            }
        }

        // A payload no decoder recognizes counts as a dropped message.
        if let Err(error) = send(&collector, b"foo").await? {
            info!(transport, %error, "garbage payload rejected");
        }
    }

    println!("\nZipkin collector demo finished in {:.2?}\n", start.elapsed());
    println!(
        "{:<10} {:>9} {:>9} {:>11} {:>9} {:>9}",
        "transport", "messages", "dropped", "bytes", "spans", "sampled out"
    );
    for transport in TRANSPORTS {
        let counters = metrics.scoped(transport);
        println!(
            "{:<10} {:>9} {:>9} {:>11} {:>9} {:>9}",
            transport,
            counters.messages(),
            counters.messages_dropped(),
            counters.bytes(),
            counters.spans(),
            counters.spans_dropped(),
        );
    }
    println!(
        "\nstored {} spans ({} storage), {} failed batches",
        storage.span_count(),
        if args.v1_storage { "v1" } else { "v2" },
        failures
    );

    Ok(())
}

//! Matcher throughput benchmarks.
//!
//! ```bash
//! cargo bench -p a76xx-at
//! ```
//!
//! - `wait_response_N` - Scan an N-byte response to its `OK`
//! - `wait_with_handlers_N` - The same with N idle URC handlers registered

use std::time::Duration;

use a76xx_at::mock::MockTransport;
use a76xx_at::{EngineConfig, ModemSerial, NotificationHandler, UrcEvent};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn response(len: usize) -> Vec<u8> {
    let mut data: Vec<u8> = (0..len).map(|i| b'a' + (i % 26) as u8).collect();
    data.extend_from_slice(b"\r\nOK\r\n");
    data
}

fn engine() -> (ModemSerial<MockTransport>, MockTransport) {
    let mock = MockTransport::new();
    let config = EngineConfig {
        poll_interval_ms: 0,
        ..EngineConfig::default()
    };
    (ModemSerial::with_config(mock.clone(), config), mock)
}

fn bench_wait_response(c: &mut Criterion) {
    let mut group = c.benchmark_group("wait_response");
    for len in [64usize, 1024, 16 * 1024] {
        let data = response(len);
        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(len), &data, |b, data| {
            let (mut modem, mock) = engine();
            b.iter(|| {
                mock.feed(data);
                black_box(modem.wait(&["+NEVER: "], Duration::from_secs(1), true, true))
            });
        });
    }
    group.finish();
}

fn bench_wait_with_handlers(c: &mut Criterion) {
    let mut group = c.benchmark_group("wait_with_handlers");
    let data = response(1024);
    for handlers in [1usize, 8, 16] {
        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(handlers), &handlers, |b, &count| {
            let (mut modem, mock) = engine();
            for i in 0..count {
                modem
                    .register(Box::new(NotificationHandler::new(
                        format!("+URC{}: ", i),
                        UrcEvent::MqttNoNet,
                    )))
                    .unwrap();
            }
            b.iter(|| {
                mock.feed(&data);
                black_box(modem.wait(&[], Duration::from_secs(1), true, true))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_wait_response, bench_wait_with_handlers);
criterion_main!(benches);

//! Offer throughput benchmarks
//!
//! Measures single-producer offer and try_claim into an anonymous log,
//! cleaning terms inline whenever rotation is blocked on them.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::time::Duration;

use wolfstream::logbuffer::{clean_term, initialise_tails, LogBuffers, LogLayout, PARTITION_COUNT};
use wolfstream::publication::{LocalConductor, Publication, PublicationLimit};
use wolfstream::OfferError;

const TERM_LENGTH: usize = 1024 * 1024;

fn publication() -> Publication {
    let buffers = LogBuffers::map_anon(LogLayout::new(TERM_LENGTH).unwrap()).unwrap();
    initialise_tails(&buffers.acquire().unwrap(), 0);
    Publication::new(
        Arc::new(LocalConductor::new(Duration::from_secs(5))),
        "ipc",
        1,
        Arc::new(PublicationLimit::new(i64::MAX)),
        Arc::new(buffers),
    )
    .unwrap()
}

fn clean_all(publication: &Publication) {
    let region = publication.log_buffers().acquire().unwrap();
    for partition in 0..PARTITION_COUNT {
        clean_term(&region, partition);
    }
}

fn bench_offer(c: &mut Criterion) {
    let mut group = c.benchmark_group("offer");
    group.throughput(Throughput::Elements(1));

    for size in [0usize, 32, 256, 1024] {
        let publication = publication();
        let payload = vec![0xA5u8; size];
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| loop {
                match publication.offer(black_box(payload)) {
                    Ok(position) => break black_box(position),
                    Err(OfferError::AdminAction) => clean_all(&publication),
                    Err(e) => panic!("offer failed: {}", e),
                }
            })
        });
    }

    group.finish();
}

fn bench_try_claim(c: &mut Criterion) {
    let mut group = c.benchmark_group("try_claim");
    group.throughput(Throughput::Elements(1));

    let publication = publication();
    group.bench_function("claim_commit_64", |b| {
        b.iter(|| loop {
            match publication.try_claim(64) {
                Ok(mut claim) => {
                    claim.buffer_mut().fill(0x3C);
                    let position = claim.position();
                    claim.commit();
                    break black_box(position);
                }
                Err(OfferError::AdminAction) => clean_all(&publication),
                Err(e) => panic!("try_claim failed: {}", e),
            }
        })
    });

    group.finish();
}

criterion_group!(benches, bench_offer, bench_try_claim);
criterion_main!(benches);

//! # DPOS Consensus Benchmarks
//!
//! Hot paths of one consensus height:
//!
//! | Path | Runs | Target |
//! |------|------|--------|
//! | Leader rotation | every turn and reelection round | < 10µs |
//! | Stake quorum check | every incoming vote | < 5ms at 21 validators |
//! | Vote pool insert | every early vote | < 100µs |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use qc_08_dpos_consensus::domain::{BroadcastInterval, LeaderCalculator};
use qc_08_dpos_consensus::ports::{QuorumChecker, SignatureService, SystemTimeSource};
use qc_08_dpos_consensus::{K256Signer, StakeQuorum, VotePool};
use qc_tests::network::StaticElection;
use rand::Rng;
use shared_types::{Address, Hash, Signature};
use std::sync::Arc;
use std::time::Duration;

fn signers(count: u8) -> Vec<Arc<K256Signer>> {
    (0..count)
        .map(|i| Arc::new(K256Signer::from_slice(&[i + 1; 32]).unwrap()))
        .collect()
}

fn random_hash() -> Hash {
    let mut hash = [0u8; 32];
    rand::thread_rng().fill(&mut hash);
    hash
}

// ============================================================================
// Leader rotation
// ============================================================================

fn bench_leader_rotation(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-08-leader-rotation");

    for size in [4u8, 21, 101] {
        let validators: Vec<Address> = (0..size)
            .map(|i| {
                let mut address = [0u8; 20];
                address[19] = i;
                address
            })
            .collect();
        let mut calc = LeaderCalculator::new(42, validators.clone(), BroadcastInterval::default());
        calc.set_pre_leader(validators[size as usize / 2], false).unwrap();

        group.bench_with_input(BenchmarkId::new("get_leader", size), &calc, |b, calc| {
            b.iter(|| {
                for turn in 0..8 {
                    black_box(calc.get_leader(black_box(turn)).unwrap());
                }
            })
        });
    }

    group.finish();
}

// ============================================================================
// Stake quorum
// ============================================================================

fn bench_stake_quorum(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-08-stake-quorum");
    group.measurement_time(Duration::from_secs(10));

    for size in [4u8, 21] {
        let keys = signers(size);
        let addresses: Vec<Address> = keys.iter().map(|k| k.address()).collect();
        let election = Arc::new(StaticElection::new(&addresses));
        let quorum = StakeQuorum::new(election, keys[0].clone(), 67);

        let hash = random_hash();
        let parent_hash = random_hash();
        let signatures: Vec<Signature> = keys.iter().map(|k| k.sign(&hash).unwrap()).collect();

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(
            BenchmarkId::new("check_quorum", size),
            &signatures,
            |b, signatures| {
                b.iter(|| black_box(quorum.check_quorum(&hash, signatures, &parent_hash).is_ok()))
            },
        );
    }

    group.finish();
}

// ============================================================================
// Vote pool
// ============================================================================

fn bench_vote_pool(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-08-vote-pool");

    let keys = signers(21);
    let votes: Vec<(Hash, Signature, Address)> = (0..64)
        .map(|i| {
            let key = &keys[i % keys.len()];
            let hash = random_hash();
            (hash, key.sign(&hash).unwrap(), key.address())
        })
        .collect();

    group.throughput(Throughput::Elements(votes.len() as u64));
    group.bench_function("add_64_votes", |b| {
        b.iter(|| {
            let pool = VotePool::new(55_000, 5, keys[0].clone(), Arc::new(SystemTimeSource));
            for (hash, signature, from) in &votes {
                black_box(pool.add_vote(*hash, *signature, *from, 42, true).is_ok());
            }
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_leader_rotation,
    bench_stake_quorum,
    bench_vote_pool
);
criterion_main!(benches);

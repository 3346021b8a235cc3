//! Benchmarks du protocole de débogage (Criterion)
//!
//! Suites :
//!   - protocol/encode → réponse `get-context` de N frames
//!   - protocol/decode → relecture des mêmes messages
//!   - protocol/pair   → aller-retour sur une paire de canaux
//!
//! Lancement :
//!   cargo bench -p gmscript-benches --bench protocol

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use gmscript_benches::context_reply;
use gmscript_debugger::{channel_pair, Command, Event, Transport};

const DEPTHS: &[u32] = &[1, 16, 128];

fn bench_codec(c: &mut Criterion) {
    let mut encode = c.benchmark_group("protocol/encode");
    for &depth in DEPTHS {
        let events = context_reply(depth);
        encode.throughput(Throughput::Elements(events.len() as u64));
        encode.bench_with_input(BenchmarkId::from_parameter(depth), &events, |b, events| {
            b.iter(|| events.iter().map(|e| e.to_bytes().len()).sum::<usize>());
        });
    }
    encode.finish();

    let mut decode = c.benchmark_group("protocol/decode");
    for &depth in DEPTHS {
        let wire: Vec<Vec<u8>> = context_reply(depth).iter().map(Event::to_bytes).collect();
        decode.throughput(Throughput::Elements(wire.len() as u64));
        decode.bench_with_input(BenchmarkId::from_parameter(depth), &wire, |b, wire| {
            b.iter(|| {
                for m in wire {
                    black_box(Event::decode(m).expect("valid event"));
                }
            });
        });
    }
    decode.finish();
}

fn bench_pair(c: &mut Criterion) {
    let (mut vm, dbg) = channel_pair();
    c.bench_function("protocol/pair", |b| {
        b.iter(|| {
            dbg.send(&Command::GetContext { thread: 1, frame: 0 }).expect("connected");
            let msg = vm.try_recv().expect("connected").expect("queued");
            black_box(Command::decode(&msg).expect("valid command"));
            vm.send(Event::EndContext.to_bytes()).expect("connected");
            black_box(dbg.try_event().expect("connected"));
        });
    });
}

criterion_group!(benches, bench_codec, bench_pair);
criterion_main!(benches);

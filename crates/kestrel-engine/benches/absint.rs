use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kestrel_bytecode::{BinaryOperator, BytecodeUnit, Kind, Opcode, UnitBuilder};
use kestrel_engine::jit::analysis::{build_cfg, infer};
use kestrel_engine::jit::graph::build_graph;

/// `loops` consecutive `for i in range(n): total = total + i` loops
fn loop_unit(loops: usize) -> BytecodeUnit {
    let mut b = UnitBuilder::new("loops").args(1).locals(3);
    b.load_int(0);
    b.store_fast(1);
    for _ in 0..loops {
        let top = b.new_label();
        let done = b.new_label();
        b.load_global("range");
        b.load_fast(0);
        b.call(1);
        b.emit(Opcode::GetIter, 0);
        b.bind(top).unwrap();
        b.jump(Opcode::ForIter, done);
        b.store_fast(2);
        b.load_fast(1);
        b.load_fast(2);
        b.binary(BinaryOperator::Add);
        b.store_fast(1);
        b.jump(Opcode::JumpAbsolute, top);
        b.bind(done).unwrap();
    }
    b.load_fast(1);
    b.return_value();
    b.build().unwrap()
}

fn bench_fixpoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("fixpoint");
    for loops in [1, 8, 32] {
        let unit = loop_unit(loops);
        let cfg = build_cfg(&unit).unwrap();
        group.bench_with_input(BenchmarkId::new("loops", loops), &unit, |b, unit| {
            b.iter(|| infer(black_box(unit), &cfg, &[Some(Kind::Integer)], None).unwrap());
        });
    }
    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let unit = loop_unit(8);
    c.bench_function("cfg_infer_graph", |b| {
        b.iter(|| {
            let cfg = build_cfg(black_box(&unit)).unwrap();
            let states = infer(&unit, &cfg, &[Some(Kind::Integer)], None).unwrap();
            build_graph(&unit, &cfg, &states, true)
        });
    });
}

criterion_group!(benches, bench_fixpoint, bench_pipeline);
criterion_main!(benches);

mod engine;

use criterion::criterion_main;

criterion_main!(engine::benches);

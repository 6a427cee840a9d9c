//! Benchmark-only crate; see `benches/allocator_bench.rs`.

//! `poireau` is a sampling heap-allocation profiler that stands in for the
//! process's `malloc` family.
//!
//! It intercepts every general-purpose allocation call via dynamic-linker
//! symbol interposition, Poisson-samples a small fraction of requested bytes
//! (roughly one sample per 32 MiB by default), and routes sampled
//! allocations through an instrumented path that emits USDT probes at
//! allocation, reallocation, and release. The overwhelming majority of
//! requests are forwarded straight to the underlying allocator.
//!
//! This crate is meant to be built as a `cdylib` and loaded with
//! `LD_PRELOAD=libpoireau.so`, not linked into a binary directly. The `rlib`
//! target exists so the sampler and registry can be unit-tested in process.

#![warn(missing_docs)]

pub mod config;
pub mod probes;
pub mod registry;
pub mod sampler;
pub mod shim;

pub use config::sample_period_bytes;
pub use registry::{TrackedInfo, TrackedRegistry, ADDRESS_SPACE_MAX, TRACKING_ALIGNMENT};
pub use sampler::Sampler;

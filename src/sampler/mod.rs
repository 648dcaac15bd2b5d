//! Per-thread Poisson sampling of allocation byte volume.
//!
//! Every thread owns one [`SampleState`] (spec.md section 3): a countdown of
//! "debt" in bytes until the next sample is due, backed by a xoshiro256+
//! generator used only to draw the exponential inter-arrival times between
//! samples. The hot path, [`SampleState::test`], is one subtract and one
//! borrow check; everything involving the RNG lives behind
//! [`SampleState::reset`], which only runs once per sample.

mod rng;

use std::cell::RefCell;

/// One thread's Poisson-sampling state.
///
/// Zero-initialized (spec.md section 3: "zero-initialized at thread
/// creation; never shared"). The all-zero `rng_state` doubles as the
/// "unseeded" sentinel: a thread that never samples never touches the RNG.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SampleState {
    rng_state: rng::RawState,
    /// Bytes of allocation debt remaining before the next sample fires.
    pub bytes_until_next_sample: usize,
}

impl SampleState {
    /// Hot-path sampling test: subtracts `request` from the remaining debt
    /// and reports whether that subtraction borrowed or landed exactly on
    /// zero, i.e. whether `request >= bytes_until_next_sample` before the
    /// subtraction. The field is updated with the wrapped result
    /// unconditionally, matching the inline-asm fast path in
    /// `original_source/src/sample.h`.
    #[inline(always)]
    pub fn test(&mut self, request: usize) -> bool {
        let (remaining, borrowed) = self.bytes_until_next_sample.overflowing_sub(request);
        self.bytes_until_next_sample = remaining;
        borrowed || remaining == 0
    }

    /// Cold path: called after `test` returns `true`. Draws a fresh debt
    /// from the exponential distribution with mean `period`. Returns `true`
    /// iff this call performed the thread's first-ever RNG seeding, in
    /// which case the caller must NOT treat the request that triggered this
    /// reset as sampled (spec.md section 4.1): otherwise every thread's
    /// first allocation would be sampled with certainty, biasing the
    /// estimator.
    pub fn reset(&mut self, period: f64) -> bool {
        loop {
            let (u, newly_initialized) = self.uniform();
            let draw = (-period * u.ln()).ceil();
            self.bytes_until_next_sample = draw as usize;

            if newly_initialized {
                return true;
            }
            if self.bytes_until_next_sample != 0 {
                return false;
            }
            // A zero draw (subnormal underflow in `-period * u.ln()`) would
            // violate the memoryless property if we just re-sampled in
            // place; redraw instead.
        }
    }

    /// Returns a uniform variate in `(0, 1]`, seeding the generator from the
    /// OS on first use. The second element of the tuple is `true` iff this
    /// call performed that seeding.
    ///
    /// Exposed primarily for testing; the hot allocation paths never call
    /// this directly, only through `reset`.
    pub fn uniform(&mut self) -> (f64, bool) {
        let mut newly_initialized = false;

        let mut bits = rng::next(&mut self.rng_state);
        if bits == 0 {
            // Either the state was all-zero (first use on this thread) or
            // we drew an honest-to-goodness zero output; either way, loop
            // on the cold path until we have both a seeded generator and a
            // nonzero draw.
            loop {
                if rng::maybe_seed(&mut self.rng_state) {
                    newly_initialized = true;
                }
                bits = rng::next(&mut self.rng_state);
                if bits != 0 {
                    break;
                }
            }
        }

        // OR the top 52 bits into the mantissa of 1.0: this produces a
        // value uniformly distributed in [1.0, 2.0), from which subtracting
        // 1.0 gives (0, 1] (1.0 is attainable only if bits == 0, which we've
        // excluded above, so the result is never exactly 0.0).
        let float_bits = 1.0f64.to_bits() | bits;
        (f64::from_bits(float_bits) - 1.0, newly_initialized)
    }
}

thread_local! {
    static STATE: RefCell<SampleState> = RefCell::new(SampleState::default());
}

/// The current thread's sampling decision engine.
///
/// A zero-sized handle onto the thread-local [`SampleState`]; every method
/// is `#[inline]` so the hot path compiles down to a thread-local access
/// plus the subtract-and-test in [`SampleState::test`].
pub struct Sampler;

impl Sampler {
    /// Returns whether `request` bytes should be sampled, per
    /// [`SampleState::test`] on the calling thread's state.
    #[inline]
    pub fn test(request: usize) -> bool {
        STATE.with(|state| state.borrow_mut().test(request))
    }

    /// Resets the calling thread's debt after a positive `test`. See
    /// [`SampleState::reset`] for the return value's meaning.
    #[inline]
    pub fn reset() -> bool {
        let period = crate::config::sample_period_bytes();
        STATE.with(|state| state.borrow_mut().reset(period))
    }
}

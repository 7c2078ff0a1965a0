/*
[INPUT]:  Inclusive integer bounds
[OUTPUT]: Uniform random draws from the closed range
[POS]:    Utility layer - randomized delays for breaks and settle ticks
[UPDATE]: When a different distribution is needed
*/

use rand::Rng;

/// Closed integer range `[from, to]` to draw uniform samples from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RandomInterval {
    from: i64,
    to: i64,
}

impl RandomInterval {
    /// `None` when `from > to`
    pub fn new(from: i64, to: i64) -> Option<Self> {
        (from <= to).then_some(Self { from, to })
    }

    /// Interval that always yields `value`
    pub const fn fixed(value: i64) -> Self {
        Self {
            from: value,
            to: value,
        }
    }

    pub fn from(&self) -> i64 {
        self.from
    }

    pub fn to(&self) -> i64 {
        self.to
    }

    pub fn sample(&self) -> i64 {
        self.sample_with(&mut rand::thread_rng())
    }

    pub fn sample_with<R: Rng + ?Sized>(&self, rng: &mut R) -> i64 {
        rng.gen_range(self.from..=self.to)
    }
}

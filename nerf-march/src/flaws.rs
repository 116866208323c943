use core::fmt;

bitflags::bitflags! {
    /// Ways in which a trace or training step produced a less than exact result.
    ///
    /// None of these are errors; the affected rays still produce output.
    ///
    /// It is a [`bitflags`] generated bit-flag type. *Note: We make no guarantees that
    /// the numeric value of flags will stay the same across versions*; please treat this
    /// as a set of named values only.
    ///
    /// The [empty](Self::empty) set means no flaws are present.
    #[derive(Clone, Copy, Debug, Hash, Eq, Ord, PartialEq, PartialOrd)]
    pub struct TraceFlaws: u8 {
        /// At least one ray ran out of its step budget before leaving the volume or
        /// becoming opaque, so its color is only partially accumulated.
        const STEP_BUDGET_EXHAUSTED = 1 << 0;

        /// The radiance field produced NaN or negative densities, which were replaced by zero.
        const CLAMPED_NUMERICS = 1 << 1;

        /// Tracing stopped at the iteration limit while rays were still alive.
        const ITERATION_LIMIT = 1 << 2;

        /// Samples were dropped because a batch buffer was full.
        const BATCH_OVERFLOW = 1 << 3;
    }
}

impl Default for TraceFlaws {
    /// Equivalent to [`Self::empty()`].
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Display for TraceFlaws {
    /// Displays the flags as text like “`STEP_BUDGET_EXHAUSTED | CLAMPED_NUMERICS`".
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(TraceFlaws::default().to_string(), "");
        assert_eq!(
            TraceFlaws::STEP_BUDGET_EXHAUSTED.to_string(),
            "STEP_BUDGET_EXHAUSTED"
        );
        assert_eq!(
            (TraceFlaws::CLAMPED_NUMERICS | TraceFlaws::BATCH_OVERFLOW).to_string(),
            "CLAMPED_NUMERICS | BATCH_OVERFLOW"
        );
    }
}

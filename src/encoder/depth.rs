//! Recursion depth counter

/// How deep the encoder is inside nested collections.
///
/// Starts at `zero` for every encoding root and only ever grows: each
/// descent into a list or map works on a new, incremented copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct SerializationDepth(usize);

impl SerializationDepth {
    pub fn zero() -> Self {
        Self(0)
    }

    /// A depth one level deeper than `self`.
    #[must_use]
    pub fn increment(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// True iff this depth is at or beyond `limit`.
    pub fn exceeds_limit(self, limit: usize) -> bool {
        self.0 >= limit
    }

    pub fn get(self) -> usize {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_and_limit() {
        let d = SerializationDepth::zero();
        assert_eq!(d.get(), 0);
        assert!(!d.exceeds_limit(1));
        let d = d.increment();
        assert_eq!(d.get(), 1);
        assert!(d.exceeds_limit(1));
        assert!(d.increment() > d);
    }

    #[test]
    fn test_zero_limit_is_always_exceeded() {
        assert!(SerializationDepth::zero().exceeds_limit(0));
    }
}

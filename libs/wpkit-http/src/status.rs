use http::StatusCode;
use std::ops::RangeInclusive;

/// Set of status codes a caller treats as non-failure outcomes.
///
/// Defaults to `200..=299`. Widen it to receive meaningful client-error
/// payloads as successes:
///
/// ```ignore
/// let acceptable = AcceptableStatus::default().with(400..=499);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptableStatus {
    ranges: Vec<RangeInclusive<u16>>,
}

impl AcceptableStatus {
    /// Build a set from explicit ranges. An empty set accepts nothing.
    #[must_use]
    pub fn new(ranges: impl IntoIterator<Item = RangeInclusive<u16>>) -> Self {
        Self {
            ranges: ranges.into_iter().collect(),
        }
    }

    /// Add a range to the set.
    #[must_use]
    pub fn with(mut self, range: RangeInclusive<u16>) -> Self {
        self.ranges.push(range);
        self
    }

    #[must_use]
    pub fn contains(&self, status: StatusCode) -> bool {
        let code = status.as_u16();
        self.ranges.iter().any(|range| range.contains(&code))
    }

    #[must_use]
    pub fn ranges(&self) -> &[RangeInclusive<u16>] {
        &self.ranges
    }
}

impl Default for AcceptableStatus {
    fn default() -> Self {
        Self::new([200..=299])
    }
}

impl From<RangeInclusive<u16>> for AcceptableStatus {
    fn from(range: RangeInclusive<u16>) -> Self {
        Self::new([range])
    }
}

impl<const N: usize> From<[RangeInclusive<u16>; N]> for AcceptableStatus {
    fn from(ranges: [RangeInclusive<u16>; N]) -> Self {
        Self::new(ranges)
    }
}

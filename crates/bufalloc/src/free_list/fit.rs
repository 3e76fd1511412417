use core::{fmt, str::FromStr};

use snafu::Snafu;
use snafu_utils::Location;

/// Strategy for choosing a free chunk to satisfy an allocation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FitPolicy {
    /// Take the lowest-addressed free chunk that is large enough.
    #[default]
    FirstFit,
    /// Take the smallest free chunk that is large enough.
    ///
    /// Ties go to the lowest-addressed candidate.
    BestFit,
}

impl FitPolicy {
    /// Selects a candidate that can hold `size` bytes.
    ///
    /// `candidates` yields `(key, length)` pairs in ascending address order.
    /// Returns the key of the chosen candidate, or `None` if none is large
    /// enough.
    ///
    /// # Examples
    ///
    /// ```
    /// use bufalloc::free_list::FitPolicy;
    ///
    /// let chunks = [("a", 32), ("b", 12), ("c", 16), ("d", 12)];
    /// assert_eq!(FitPolicy::FirstFit.find(chunks, 12), Some("a"));
    /// assert_eq!(FitPolicy::BestFit.find(chunks, 12), Some("b"));
    /// assert_eq!(FitPolicy::BestFit.find(chunks, 14), Some("c"));
    /// assert_eq!(FitPolicy::BestFit.find(chunks, 33), None);
    /// ```
    pub fn find<K, I>(self, candidates: I, size: usize) -> Option<K>
    where
        I: IntoIterator<Item = (K, usize)>,
    {
        let mut fitting = candidates
            .into_iter()
            .filter(|&(_, length)| length >= size);
        match self {
            Self::FirstFit => fitting.next().map(|(key, _)| key),
            Self::BestFit => {
                let mut best: Option<(K, usize)> = None;
                for (key, length) in fitting {
                    if length == size {
                        return Some(key);
                    }
                    if best.as_ref().is_none_or(|&(_, best_len)| length < best_len) {
                        best = Some((key, length));
                    }
                }
                best.map(|(key, _)| key)
            }
        }
    }
}

impl fmt::Display for FitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::FirstFit => "first-fit",
            Self::BestFit => "best-fit",
        };
        f.pad(s)
    }
}

#[derive(Debug, Snafu)]
#[snafu(display("unknown fit policy `{input}`, expected `first` or `best`"))]
pub struct ParseFitPolicyError {
    input: alloc::string::String,
    #[snafu(implicit)]
    location: Location,
}

impl FromStr for FitPolicy {
    type Err = ParseFitPolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first" | "first-fit" => Ok(Self::FirstFit),
            "best" | "best-fit" => Ok(Self::BestFit),
            _ => ParseFitPolicySnafu { input: s }.fail(),
        }
    }
}

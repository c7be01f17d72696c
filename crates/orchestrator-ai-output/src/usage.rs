use std::collections::BTreeMap;
use std::ops::{Add, AddAssign};

pub const INPUT_TOKENS: &str = "input_tokens";
pub const OUTPUT_TOKENS: &str = "output_tokens";
pub const REASONING_TOKENS: &str = "reasoning_tokens";
pub const CACHED_INPUT_TOKENS: &str = "cached_input_tokens";
pub const TOTAL_TOKENS: &str = "total_tokens";

/// Token counts keyed by category name.
///
/// Producers may report any category. Counters merge additively, and the total
/// is always derived from the categories rather than read from a reported
/// `total` field.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct UsageCounters(BTreeMap<String, u64>);

impl UsageCounters {
    /// Creates empty counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter for a single category.
    pub fn with(mut self, category: impl Into<String>, tokens: u64) -> Self {
        self.0.insert(category.into(), tokens);
        self
    }

    /// Creates counters from prompt and completion tokens.
    pub fn from_tokens(input: u64, output: u64) -> Self {
        Self::new().with(INPUT_TOKENS, input).with(OUTPUT_TOKENS, output)
    }

    /// Returns the running total for a category.
    pub fn get(&self, category: &str) -> Option<u64> {
        self.0.get(category).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn input_tokens(&self) -> u64 {
        self.get(INPUT_TOKENS).unwrap_or(0)
    }

    pub fn output_tokens(&self) -> u64 {
        self.get(OUTPUT_TOKENS).unwrap_or(0)
    }

    pub fn reasoning_tokens(&self) -> u64 {
        self.get(REASONING_TOKENS).unwrap_or(0)
    }

    pub fn cached_input_tokens(&self) -> u64 {
        self.get(CACHED_INPUT_TOKENS).unwrap_or(0)
    }

    /// Sum of every category except totals and cached counts.
    pub fn derived_total(&self) -> u64 {
        self.0
            .iter()
            .filter(|(category, _)| counts_toward_total(category))
            .fold(0u64, |sum, (_, tokens)| sum.saturating_add(*tokens))
    }

    /// Copy of the counters with `total_tokens` replaced by the derived total.
    pub fn with_derived_total(&self) -> Self {
        let total = self.derived_total();
        let mut out = self.clone();
        out.0.insert(TOTAL_TOKENS.to_string(), total);
        out
    }
}

fn counts_toward_total(category: &str) -> bool {
    !(category.starts_with("total") || category.starts_with("cached"))
}

impl AddAssign<&UsageCounters> for UsageCounters {
    fn add_assign(&mut self, rhs: &UsageCounters) {
        for (category, tokens) in &rhs.0 {
            let slot = self.0.entry(category.clone()).or_default();
            *slot = slot.saturating_add(*tokens);
        }
    }
}

impl AddAssign for UsageCounters {
    fn add_assign(&mut self, rhs: UsageCounters) {
        *self += &rhs;
    }
}

impl Add for UsageCounters {
    type Output = UsageCounters;

    fn add(mut self, rhs: UsageCounters) -> UsageCounters {
        self += &rhs;
        self
    }
}

impl FromIterator<(String, u64)> for UsageCounters {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sums_elementwise_across_steps() {
        let steps = [(10, 5), (20, 7), (3, 1)];
        let mut total = UsageCounters::new();
        for (p, c) in steps {
            total += UsageCounters::from_tokens(p, c);
        }
        assert_eq!(total.input_tokens(), 33);
        assert_eq!(total.output_tokens(), 13);
        assert_eq!(total.derived_total(), 46);
    }

    #[test]
    fn derived_total_ignores_reported_total_and_cached() {
        let usage = UsageCounters::from_tokens(100, 40)
            .with(REASONING_TOKENS, 10)
            .with(CACHED_INPUT_TOKENS, 80)
            .with(TOTAL_TOKENS, 9999)
            .with("total", 1);
        assert_eq!(usage.derived_total(), 150);
        assert_eq!(usage.with_derived_total().get(TOTAL_TOKENS), Some(150));
    }

    #[test]
    fn unknown_categories_are_kept_and_counted() {
        let usage = UsageCounters::new().with("audio_tokens", 4) + UsageCounters::from_tokens(1, 1);
        assert_eq!(usage.get("audio_tokens"), Some(4));
        assert_eq!(usage.derived_total(), 6);
    }

    #[test]
    fn counters_saturate_instead_of_overflowing() {
        let mut usage = UsageCounters::from_tokens(u64::MAX - 1, 5);
        usage += UsageCounters::from_tokens(10, 0);
        assert_eq!(usage.get("input_tokens"), Some(u64::MAX));
        assert_eq!(usage.derived_total(), u64::MAX);
    }

    #[test]
    fn serializes_as_flat_map() {
        let usage = UsageCounters::from_tokens(1, 2);
        let value = serde_json::to_value(&usage).expect("serialize");
        assert_eq!(value, serde_json::json!({"input_tokens": 1, "output_tokens": 2}));
    }
}

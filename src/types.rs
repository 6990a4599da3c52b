use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(String);

impl ModelId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn claude_sonnet() -> Self {
        Self::new("claude-sonnet-4-20250514")
    }

    pub fn gpt_4o() -> Self {
        Self::new("gpt-4o")
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Step number in its `step_N` wire form.
///
/// Ordering is numeric, so maps keyed by `StepKey` enumerate `step_2` before
/// `step_10`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepKey(u32);

impl StepKey {
    pub const PREFIX: &'static str = "step_";

    pub fn new(step_number: u32) -> Self {
        Self(step_number)
    }

    pub fn number(self) -> u32 {
        self.0
    }
}

impl From<u32> for StepKey {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for StepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", Self::PREFIX, self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidStepKey(pub String);

impl fmt::Display for InvalidStepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid step key '{}', expected step_<number>", self.0)
    }
}

impl std::error::Error for InvalidStepKey {}

impl FromStr for StepKey {
    type Err = InvalidStepKey;

    /// Only the canonical `step_<n>` spelling is accepted, so two keys can
    /// never name the same step (`step_01`, `step_+1` are rejected).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix(Self::PREFIX)
            .filter(|digits| {
                digits.bytes().all(|b| b.is_ascii_digit())
                    && (*digits == "0" || !digits.starts_with('0'))
            })
            .and_then(|digits| digits.parse::<u32>().ok())
            .map(Self)
            .ok_or_else(|| InvalidStepKey(s.to_string()))
    }
}

impl Serialize for StepKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for StepKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

//! Aging policy: non-elite members at or past `max_age` generations retire

/// Decides which members are retired for stagnation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgingPolicy {
    max_age: u32,
}

impl AgingPolicy {
    pub fn new(max_age: u32) -> Self {
        Self { max_age }
    }

    pub fn max_age(&self) -> u32 {
        self.max_age
    }

    /// Elites are exempt
    pub fn should_retire(&self, age: u32, is_elite: bool) -> bool {
        !is_elite && age >= self.max_age
    }
}

//! Sequential page learning.
//!
//! The operator touches the tag of page 1, then page 2, up to the last page;
//! each accepted tag is mapped to the page being learned.

use std::collections::HashSet;
use std::fmt;

use tracing::info;

use crate::mapping::{MappingError, MappingStore};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LearningState {
    #[default]
    Idle,
    Learning {
        /// Page the next tag is assigned to (1-based).
        next_page: u32,
        /// UIDs assigned during this pass.
        assigned: HashSet<String>,
    },
}

impl fmt::Display for LearningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LearningState::Idle => write!(f, "Idle"),
            LearningState::Learning { next_page, .. } => write!(f, "Learning (page {})", next_page),
        }
    }
}

/// What a detection did to the learning pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LearnOutcome {
    /// Not learning; the detection is left to navigation.
    NotLearning,
    /// Tag mapped; waiting for `next_page`.
    Assigned { page: u32, next_page: u32 },
    /// Tag mapped to the last page; back to idle.
    Complete { page: u32, total_pages: u32 },
    /// Tag was already assigned to `page` in this pass; no advance.
    Duplicate { uid: String, page: u32 },
    /// Store refused the page.
    Rejected(MappingError),
}

/// Idle → Learning(1) → … → Learning(N) → Idle.
#[derive(Debug, Default)]
pub struct LearningMachine {
    state: LearningState,
}

impl LearningMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &LearningState {
        &self.state
    }

    pub fn is_learning(&self) -> bool {
        matches!(self.state, LearningState::Learning { .. })
    }

    /// Page awaiting a tag, if learning.
    pub fn next_page(&self) -> Option<u32> {
        match &self.state {
            LearningState::Learning { next_page, .. } => Some(*next_page),
            LearningState::Idle => None,
        }
    }

    /// Begin (or restart) a pass at page 1.
    pub fn start(&mut self) {
        info!(from = %self.state, "Learning started");
        self.state = LearningState::Learning {
            next_page: 1,
            assigned: HashSet::new(),
        };
    }

    /// Abandon the pass. Mappings made so far stay. Returns the page that was
    /// awaiting a tag.
    pub fn stop(&mut self) -> Option<u32> {
        let pending = self.next_page();
        if pending.is_some() {
            info!(pending = ?pending, "Learning stopped");
        }
        self.state = LearningState::Idle;
        pending
    }

    /// Feed one accepted detection.
    pub fn accept(&mut self, uid_hex: &str, store: &mut MappingStore) -> LearnOutcome {
        let LearningState::Learning { next_page, assigned } = &mut self.state else {
            return LearnOutcome::NotLearning;
        };

        if assigned.contains(uid_hex) {
            let page = store.resolve(uid_hex).unwrap_or(*next_page);
            return LearnOutcome::Duplicate {
                uid: uid_hex.to_string(),
                page,
            };
        }

        let page = *next_page;
        if let Err(e) = store.add(page, uid_hex) {
            return LearnOutcome::Rejected(e);
        }
        assigned.insert(uid_hex.to_string());

        let total_pages = store.total_pages();
        if page >= total_pages {
            self.state = LearningState::Idle;
            info!(total_pages, "Learning complete");
            LearnOutcome::Complete { page, total_pages }
        } else {
            *next_page = page + 1;
            LearnOutcome::Assigned {
                page,
                next_page: page + 1,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_learning_completes_after_last_page() {
        let mut store = MappingStore::in_memory(3);
        let mut machine = LearningMachine::new();
        machine.start();

        assert_eq!(
            machine.accept("aa", &mut store),
            LearnOutcome::Assigned {
                page: 1,
                next_page: 2
            }
        );
        assert_eq!(
            machine.accept("bb", &mut store),
            LearnOutcome::Assigned {
                page: 2,
                next_page: 3
            }
        );
        assert_eq!(
            machine.accept("cc", &mut store),
            LearnOutcome::Complete {
                page: 3,
                total_pages: 3
            }
        );

        assert!(!machine.is_learning());
        assert_eq!(
            store.iter().collect::<Vec<_>>(),
            vec![(1, "aa"), (2, "bb"), (3, "cc")]
        );
        assert_eq!(machine.accept("dd", &mut store), LearnOutcome::NotLearning);
    }

    #[test]
    fn test_duplicate_uid_does_not_advance() {
        let mut store = MappingStore::in_memory(3);
        let mut machine = LearningMachine::new();
        machine.start();
        machine.accept("aa", &mut store);

        assert_eq!(
            machine.accept("aa", &mut store),
            LearnOutcome::Duplicate {
                uid: "aa".to_string(),
                page: 1
            }
        );
        assert_eq!(machine.next_page(), Some(2));
        assert_eq!(store.resolve("aa"), Some(1));
    }

    #[test]
    fn test_restart_begins_at_page_one() {
        let mut store = MappingStore::in_memory(5);
        let mut machine = LearningMachine::new();
        machine.start();
        machine.accept("aa", &mut store);
        machine.accept("bb", &mut store);

        machine.start();
        assert_eq!(machine.next_page(), Some(1));
        // A tag from the previous pass may be learned again.
        assert_eq!(
            machine.accept("bb", &mut store),
            LearnOutcome::Assigned {
                page: 1,
                next_page: 2
            }
        );
        assert_eq!(store.resolve("aa"), None);
    }

    #[test]
    fn test_stop_keeps_mappings() {
        let mut store = MappingStore::in_memory(5);
        let mut machine = LearningMachine::new();
        assert_eq!(machine.stop(), None);

        machine.start();
        machine.accept("aa", &mut store);
        assert_eq!(machine.stop(), Some(2));
        assert_eq!(machine.state(), &LearningState::Idle);
        assert_eq!(store.resolve("aa"), Some(1));
    }
}

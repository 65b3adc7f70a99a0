//! Controller state machines.

pub mod learning;

pub use learning::{LearnOutcome, LearningMachine, LearningState};

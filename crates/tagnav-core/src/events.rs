//! Event system for UI decoupling.
//!
//! The navigation session reports what it does through [`NavObserver`]; the
//! CLI prints operator messages, tests record them.

use std::fmt;

use crate::arbitration::Strategy;
use crate::tag::SignalStrength;

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// One tag of a multi-tag detection, as shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedTag {
    pub uid: String,
    pub page: Option<u32>,
    pub signal: SignalStrength,
}

impl fmt::Display for DetectedTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.page {
            Some(page) => write!(f, "{} -> page {} ({})", self.uid, page, self.signal),
            None => write!(f, "{} -> unmapped ({})", self.uid, self.signal),
        }
    }
}

/// Events emitted by the navigation session.
#[derive(Debug, Clone, PartialEq)]
pub enum NavEvent {
    /// Reader initialised.
    ReaderReady { port: String, firmware: String },
    /// Poll loop started.
    Started {
        total_pages: u32,
        max_tags: u8,
        strategy: Strategy,
    },
    /// More than one tag in the field.
    TagsDetected { tags: Vec<DetectedTag> },
    /// A mapped tag was touched and a navigation event emitted.
    Navigated {
        page: u32,
        uid: String,
        total_tags: usize,
    },
    /// Unmapped tag whose content named a page.
    AutoMapped { page: u32, uid: String },
    /// Unmapped tag with no readable page content.
    UnknownTag { uid: String },
    LearningStarted { total_pages: u32 },
    LearningProgress {
        page: u32,
        uid: String,
        next_page: u32,
    },
    LearningDuplicate { uid: String, page: u32 },
    LearningComplete { total_pages: u32 },
    LearningStopped { pending_page: Option<u32> },
    MappingAdded { page: u32, uid: String },
    MappingRemoved { page: u32, uid: Option<String> },
    StrategyChanged { strategy: Strategy },
    /// Multi-line text answering an operator query.
    Report { title: String, body: String },
    /// Log message.
    Log { level: LogLevel, message: String },
    /// Poll loop ended.
    Stopped,
}

/// Observer trait for receiving navigation events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait NavObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &NavEvent);
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl NavObserver for TracingObserver {
    fn on_event(&self, event: &NavEvent) {
        match event {
            NavEvent::ReaderReady { port, firmware } => {
                tracing::info!(port = %port, firmware = %firmware, "Reader ready");
            }
            NavEvent::Started {
                total_pages,
                max_tags,
                strategy,
            } => {
                tracing::info!(total_pages, max_tags, strategy = %strategy, "Navigation started");
            }
            NavEvent::TagsDetected { tags } => {
                tracing::debug!(count = tags.len(), "Multiple tags detected");
                for tag in tags {
                    tracing::debug!("  {}", tag);
                }
            }
            NavEvent::Navigated {
                page,
                uid,
                total_tags,
            } => {
                tracing::info!(page, uid = %uid, total_tags, "Navigate");
            }
            NavEvent::AutoMapped { page, uid } => {
                tracing::info!(page, uid = %uid, "Auto-mapped from tag content");
            }
            NavEvent::UnknownTag { uid } => {
                tracing::warn!(uid = %uid, "Unknown tag; map it with: add_mapping {} <page>", uid);
            }
            NavEvent::LearningStarted { total_pages } => {
                tracing::info!(total_pages, "Learning: touch the tag of page 1");
            }
            NavEvent::LearningProgress {
                page,
                uid,
                next_page,
            } => {
                tracing::info!(page, uid = %uid, next_page, "Learned page");
            }
            NavEvent::LearningDuplicate { uid, page } => {
                tracing::warn!(uid = %uid, page, "Tag already learned in this pass");
            }
            NavEvent::LearningComplete { total_pages } => {
                tracing::info!(total_pages, "Learning complete");
            }
            NavEvent::LearningStopped { pending_page } => {
                tracing::info!(pending_page = ?pending_page, "Learning stopped");
            }
            NavEvent::MappingAdded { page, uid } => {
                tracing::info!(page, uid = %uid, "Mapping added");
            }
            NavEvent::MappingRemoved { page, uid } => {
                tracing::info!(page, uid = ?uid, "Mapping removed");
            }
            NavEvent::StrategyChanged { strategy } => {
                tracing::info!(strategy = %strategy, "Strategy changed");
            }
            NavEvent::Report { title, body } => {
                tracing::info!("{}\n{}", title, body);
            }
            NavEvent::Log { level, message } => match level {
                LogLevel::Trace => tracing::trace!("{}", message),
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
            NavEvent::Stopped => {
                tracing::info!("Navigation stopped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detected_tag_display() {
        let mapped = DetectedTag {
            uid: "aa".into(),
            page: Some(5),
            signal: SignalStrength::Strong,
        };
        assert_eq!(mapped.to_string(), "aa -> page 5 (strong)");
        let unmapped = DetectedTag {
            page: None,
            signal: SignalStrength::Weak,
            ..mapped
        };
        assert_eq!(unmapped.to_string(), "aa -> unmapped (weak)");
    }
}

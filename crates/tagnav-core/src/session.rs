//! Navigation session - the poll loop tying reader, mappings and events together.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::arbitration::{Debouncer, MULTI_TAG_COOLDOWN, SINGLE_TAG_COOLDOWN, Strategy, select};
use crate::console::ConsoleCommand;
use crate::detect::TagSource;
use crate::emitter::{
    DEFAULT_SOURCE, DEFAULT_UDP_TARGET, NavigationEvent, NavigationSink, Recognition, TagData,
};
use crate::events::{DetectedTag, LogLevel, NavEvent, NavObserver, TracingObserver};
use crate::mapping::{DEFAULT_MAPPING_FILE, MappingStore};
use crate::protocol::constants::{DEFAULT_BAUD_RATE, MAX_TARGETS, USER_DATA_BLOCK};
use crate::reader::ExchangeError;
use crate::state::{LearnOutcome, LearningMachine};
use crate::stats::{
    DetectionEntry, DetectionHistory, NavigationStats, render_history, render_stats,
};
use crate::tag::{TagRecord, parse_page_content};

/// Configuration for a navigation session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Serial port; discovered when unset.
    pub port: Option<String>,
    pub baud_rate: u32,
    pub total_pages: u32,
    /// Viewer address (`host:port`).
    pub udp_target: String,
    /// `source` field of navigation events.
    pub source: String,
    pub mapping_file: PathBuf,
    pub strategy: Strategy,
    /// Tags detected per poll (1 or 2).
    pub max_tags: u8,
    pub single_tag_cooldown_ms: u64,
    pub multi_tag_cooldown_ms: u64,
    pub poll_interval_ms: u64,
    pub read_timeout_ms: u64,
    /// Map unknown tags whose content names a page.
    pub auto_map: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            total_pages: 10,
            udp_target: DEFAULT_UDP_TARGET.to_string(),
            source: DEFAULT_SOURCE.to_string(),
            mapping_file: PathBuf::from(DEFAULT_MAPPING_FILE),
            strategy: Strategy::Closest,
            max_tags: 2,
            single_tag_cooldown_ms: SINGLE_TAG_COOLDOWN.as_millis() as u64,
            multi_tag_cooldown_ms: MULTI_TAG_COOLDOWN.as_millis() as u64,
            poll_interval_ms: 100,
            read_timeout_ms: 1000,
            auto_map: true,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: SessionConfig = toml::from_str(&content)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        config.validate()
    }

    /// Reject settings the session cannot run with and clamp `max_tags`
    /// to what the reader supports.
    pub fn validate(mut self) -> Result<Self> {
        if self.total_pages == 0 {
            anyhow::bail!("total_pages must be at least 1");
        }
        let clamped = self.max_tags.clamp(1, MAX_TARGETS);
        if clamped != self.max_tags {
            warn!(max_tags = self.max_tags, using = clamped, "max_tags out of range");
            self.max_tags = clamped;
        }
        Ok(self)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Repeat-suppression window for the configured tag limit.
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(if self.max_tags > 1 {
            self.multi_tag_cooldown_ms
        } else {
            self.single_tag_cooldown_ms
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Owns the tag source and every piece of mutable controller state.
///
/// Console intents reach it only through the command channel given to
/// [`run`](Self::run).
pub struct NavigationSession<S: TagSource, N: NavigationSink, O: NavObserver> {
    config: SessionConfig,
    source: S,
    sink: N,
    observer: Arc<O>,
    mappings: MappingStore,
    learning: LearningMachine,
    debouncer: Debouncer,
    strategy: Strategy,
    stats: NavigationStats,
    history: DetectionHistory,
}

impl<S: TagSource, N: NavigationSink> NavigationSession<S, N, TracingObserver> {
    /// Create a new session with default tracing observer.
    pub fn new(config: SessionConfig, source: S, sink: N, mappings: MappingStore) -> Self {
        Self::with_observer(config, source, sink, mappings, Arc::new(TracingObserver))
    }
}

impl<S: TagSource, N: NavigationSink, O: NavObserver> NavigationSession<S, N, O> {
    /// Create a new session with a custom observer.
    pub fn with_observer(
        config: SessionConfig,
        source: S,
        sink: N,
        mappings: MappingStore,
        observer: Arc<O>,
    ) -> Self {
        Self {
            debouncer: Debouncer::new(config.cooldown()),
            strategy: config.strategy,
            config,
            source,
            sink,
            observer,
            mappings,
            learning: LearningMachine::new(),
            stats: NavigationStats::new(),
            history: DetectionHistory::new(),
        }
    }

    pub fn mappings(&self) -> &MappingStore {
        &self.mappings
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn learning(&self) -> &LearningMachine {
        &self.learning
    }

    pub fn stats(&self) -> &NavigationStats {
        &self.stats
    }

    pub fn history(&self) -> &DetectionHistory {
        &self.history
    }

    pub fn sink(&self) -> &N {
        &self.sink
    }

    /// Poll until `running` clears, `quit` arrives, or the reader is lost.
    ///
    /// Mappings are flushed on every exit path.
    #[instrument(skip_all, fields(total_pages = self.mappings.total_pages()))]
    pub fn run(&mut self, commands: &Receiver<ConsoleCommand>, running: &AtomicBool) -> Result<()> {
        self.observer.on_event(&NavEvent::Started {
            total_pages: self.mappings.total_pages(),
            max_tags: self.config.max_tags,
            strategy: self.strategy,
        });

        let interval = self.config.poll_interval();
        let result = loop {
            for command in commands.try_iter() {
                self.apply_command(command, running);
            }
            if !running.load(Ordering::SeqCst) {
                break Ok(());
            }

            if let Err(e) = self.poll_once() {
                break Err(e).context("Tag reader lost");
            }

            if !interval.is_zero() {
                thread::sleep(interval);
            }
        };

        self.shutdown();
        result
    }

    /// One detect cycle. Only a lost channel is returned as an error.
    pub fn poll_once(&mut self) -> Result<(), ExchangeError> {
        let tags = match self.source.detect(self.config.max_tags) {
            Ok(tags) => tags,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                debug!(error = %e, "Detect cycle failed");
                return Ok(());
            }
        };
        self.handle_detections(&tags, Instant::now())
    }

    /// Arbitrate, debounce and dispatch one poll's tags.
    pub fn handle_detections(
        &mut self,
        tags: &[TagRecord],
        now: Instant,
    ) -> Result<(), ExchangeError> {
        if tags.is_empty() {
            return Ok(());
        }

        if tags.len() > 1 {
            let detected = tags
                .iter()
                .map(|t| DetectedTag {
                    uid: t.uid_hex.clone(),
                    page: self.mappings.resolve(&t.uid_hex),
                    signal: t.signal,
                })
                .collect();
            self.observer.on_event(&NavEvent::TagsDetected { tags: detected });
        }

        let strategy = if self.learning.is_learning() {
            Strategy::Closest
        } else {
            self.strategy
        };
        let Some(winner) = select(strategy, tags, &self.mappings) else {
            return Ok(());
        };
        if !self.debouncer.accept(&winner.uid_hex, now) {
            return Ok(());
        }

        self.history.push(DetectionEntry {
            timestamp: chrono::Local::now(),
            total_tags: tags.len(),
            selected_uid: winner.uid_hex.clone(),
            all_uids: tags.iter().map(|t| t.uid_hex.clone()).collect(),
        });

        if self.learning.is_learning() {
            self.learn(&winner.uid_hex);
            Ok(())
        } else {
            self.navigate(winner, tags.len(), strategy)
        }
    }

    fn learn(&mut self, uid: &str) {
        match self.learning.accept(uid, &mut self.mappings) {
            LearnOutcome::Assigned { page, next_page } => {
                self.observer.on_event(&NavEvent::LearningProgress {
                    page,
                    uid: uid.to_string(),
                    next_page,
                });
            }
            LearnOutcome::Complete { total_pages, .. } => {
                self.observer.on_event(&NavEvent::LearningComplete { total_pages });
                self.report_mappings();
            }
            LearnOutcome::Duplicate { uid, page } => {
                self.observer.on_event(&NavEvent::LearningDuplicate { uid, page });
            }
            LearnOutcome::Rejected(e) => self.log(LogLevel::Warn, e.to_string()),
            LearnOutcome::NotLearning => {}
        }
    }

    fn navigate(
        &mut self,
        tag: &TagRecord,
        total_tags: usize,
        strategy: Strategy,
    ) -> Result<(), ExchangeError> {
        if let Some(page) = self.mappings.resolve(&tag.uid_hex) {
            let data = TagData::from_tag(tag).selected(tag, total_tags, strategy);
            self.emit(page, data);
            self.observer.on_event(&NavEvent::Navigated {
                page,
                uid: tag.uid_hex.clone(),
                total_tags,
            });
            return Ok(());
        }

        match self.page_from_content(tag)? {
            Some(page) => {
                if let Err(e) = self.mappings.add(page, &tag.uid_hex) {
                    self.log(LogLevel::Warn, e.to_string());
                    return Ok(());
                }
                self.observer.on_event(&NavEvent::AutoMapped {
                    page,
                    uid: tag.uid_hex.clone(),
                });
                self.emit(page, TagData::from_tag(tag).recognized_by(Recognition::Content));
                self.observer.on_event(&NavEvent::Navigated {
                    page,
                    uid: tag.uid_hex.clone(),
                    total_tags,
                });
            }
            None => self.observer.on_event(&NavEvent::UnknownTag {
                uid: tag.uid_hex.clone(),
            }),
        }
        Ok(())
    }

    /// Page encoded in the tag's user block, if auto-mapping is on.
    fn page_from_content(&mut self, tag: &TagRecord) -> Result<Option<u32>, ExchangeError> {
        if !self.config.auto_map {
            return Ok(None);
        }
        match self.source.read_block(tag.target, USER_DATA_BLOCK) {
            Ok(block) => Ok(parse_page_content(&block, self.mappings.total_pages())),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                debug!(uid = %tag.uid_hex, error = %e, "Could not read tag content");
                Ok(None)
            }
        }
    }

    fn emit(&mut self, page: u32, data: TagData) {
        let total_pages = self.mappings.total_pages();
        let event = NavigationEvent::goto_page(page, total_pages, &self.config.source, data);
        if let Err(e) = self.sink.send(&event) {
            warn!(error = %e, page, "Navigation event not delivered");
        }
        self.stats.record(page);
    }

    /// Apply one operator intent.
    pub fn apply_command(&mut self, command: ConsoleCommand, running: &AtomicBool) {
        debug!(?command, "Console command");
        match command {
            ConsoleCommand::Learn => {
                self.learning.start();
                // The tag used to navigate just now may be page 1.
                self.debouncer.reset();
                self.observer.on_event(&NavEvent::LearningStarted {
                    total_pages: self.mappings.total_pages(),
                });
            }
            ConsoleCommand::StopLearning => {
                let pending_page = self.learning.stop();
                self.observer.on_event(&NavEvent::LearningStopped { pending_page });
                self.report_mappings();
            }
            ConsoleCommand::ShowMappings => self.report_mappings(),
            ConsoleCommand::ShowStats => {
                let body = render_stats(&self.stats, &self.history, chrono::Local::now());
                self.report("Statistics", body);
            }
            ConsoleCommand::SetStrategy(None) => {
                let mut body = format!("Current strategy: {}\n", self.strategy);
                for (i, s) in Strategy::SELECTABLE.iter().enumerate() {
                    let _ = writeln!(body, "{}. {} - {}", i + 1, s, s.description());
                }
                body.push_str("Change with: strategy <name|1-3>\n");
                self.report("Strategy", body);
            }
            ConsoleCommand::SetStrategy(Some(strategy)) => {
                self.strategy = strategy;
                self.observer.on_event(&NavEvent::StrategyChanged { strategy });
            }
            ConsoleCommand::ShowHistory => {
                let body = render_history(&self.history);
                self.report("History", body);
            }
            ConsoleCommand::AddMapping { uid, page } => match self.mappings.add(page, &uid) {
                Ok(_) => self.observer.on_event(&NavEvent::MappingAdded { page, uid }),
                Err(e) => self.log(LogLevel::Warn, e.to_string()),
            },
            ConsoleCommand::RemoveMapping { page } => {
                let uid = self.mappings.remove(page);
                self.observer.on_event(&NavEvent::MappingRemoved { page, uid });
            }
            ConsoleCommand::Quit => running.store(false, Ordering::SeqCst),
        }
    }

    fn report_mappings(&self) {
        let mut body = String::new();
        if self.mappings.is_empty() {
            body.push_str("  no mappings\n");
        }
        for (page, uid) in self.mappings.iter() {
            let used = self.stats.usage(page);
            let _ = writeln!(body, "  page {:>2}: {} (used {} times)", page, uid, used);
        }
        let title = format!(
            "Page mappings ({} of {})",
            self.mappings.len(),
            self.mappings.total_pages()
        );
        self.report(&title, body);
    }

    fn report(&self, title: &str, body: String) {
        self.observer.on_event(&NavEvent::Report {
            title: title.to_string(),
            body,
        });
    }

    fn log(&self, level: LogLevel, message: String) {
        self.observer.on_event(&NavEvent::Log { level, message });
    }

    /// Flush mappings. Called on every exit path of [`run`](Self::run).
    pub fn shutdown(&mut self) {
        self.learning.stop();
        if let Err(e) = self.mappings.save() {
            warn!(error = %e, "Failed to flush mappings at shutdown");
        }
        self.observer.on_event(&NavEvent::Stopped);
    }
}

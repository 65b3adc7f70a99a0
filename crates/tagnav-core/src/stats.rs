//! Navigation statistics and detection history.

use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write as _;

use chrono::{DateTime, Local};

/// History is trimmed once it grows past this many entries...
pub const HISTORY_CAPACITY: usize = 100;
/// ...down to the newest this many.
pub const HISTORY_RETAIN: usize = 50;

const TOP_PAGES: usize = 5;
const RECENT_HISTORY: usize = 10;

#[derive(Debug, Clone)]
pub struct NavigationStats {
    pub session_start: DateTime<Local>,
    pub total_navigations: u64,
    pub last_page: Option<u32>,
    page_usage: BTreeMap<u32, u64>,
}

impl Default for NavigationStats {
    fn default() -> Self {
        Self::new()
    }
}

impl NavigationStats {
    pub fn new() -> Self {
        Self {
            session_start: Local::now(),
            total_navigations: 0,
            last_page: None,
            page_usage: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, page: u32) {
        self.total_navigations += 1;
        *self.page_usage.entry(page).or_default() += 1;
        self.last_page = Some(page);
    }

    pub fn usage(&self, page: u32) -> u64 {
        self.page_usage.get(&page).copied().unwrap_or(0)
    }

    /// Most used pages, highest count first; ties by page number.
    pub fn top_pages(&self, n: usize) -> Vec<(u32, u64)> {
        let mut pages: Vec<(u32, u64)> = self.page_usage.iter().map(|(&p, &c)| (p, c)).collect();
        pages.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        pages.truncate(n);
        pages
    }

    pub fn session_minutes(&self, now: DateTime<Local>) -> f64 {
        (now - self.session_start).num_milliseconds().max(0) as f64 / 60_000.0
    }
}

/// One accepted detection.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionEntry {
    pub timestamp: DateTime<Local>,
    pub total_tags: usize,
    pub selected_uid: String,
    pub all_uids: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DetectionHistory {
    entries: VecDeque<DetectionEntry>,
}

impl DetectionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: DetectionEntry) {
        self.entries.push_back(entry);
        if self.entries.len() > HISTORY_CAPACITY {
            let excess = self.entries.len() - HISTORY_RETAIN;
            self.entries.drain(..excess);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &DetectionEntry> {
        self.entries.iter()
    }

    /// Newest `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &DetectionEntry> {
        self.entries.iter().skip(self.entries.len().saturating_sub(n))
    }

    pub fn single_tag_count(&self) -> usize {
        self.entries.iter().filter(|e| e.total_tags == 1).count()
    }

    pub fn multi_tag_count(&self) -> usize {
        self.entries.iter().filter(|e| e.total_tags > 1).count()
    }

    /// Average and maximum simultaneous tags over multi-tag detections.
    pub fn multi_tag_summary(&self) -> Option<(f64, usize)> {
        let multi: Vec<usize> = self
            .entries
            .iter()
            .map(|e| e.total_tags)
            .filter(|&n| n > 1)
            .collect();
        let max = *multi.iter().max()?;
        let avg = multi.iter().sum::<usize>() as f64 / multi.len() as f64;
        Some((avg, max))
    }
}

/// Text for the `stats` command.
pub fn render_stats(
    stats: &NavigationStats,
    history: &DetectionHistory,
    now: DateTime<Local>,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== Navigation statistics ===");
    let _ = writeln!(out, "Session time: {:.1} min", stats.session_minutes(now));
    let _ = writeln!(out, "Total navigations: {}", stats.total_navigations);
    match stats.last_page {
        Some(page) => {
            let _ = writeln!(out, "Current page: {}", page);
        }
        None => {
            let _ = writeln!(out, "Current page: none");
        }
    }
    let top = stats.top_pages(TOP_PAGES);
    if !top.is_empty() {
        let _ = writeln!(out, "Most used pages:");
        for (page, count) in top {
            let _ = writeln!(out, "  page {:>2}: {} times", page, count);
        }
    }

    let _ = writeln!(out, "=== Multi-tag statistics ===");
    if history.is_empty() {
        let _ = writeln!(out, "No detections yet");
    } else {
        let _ = writeln!(out, "Detections: {}", history.len());
        let _ = writeln!(out, "Single-tag: {}", history.single_tag_count());
        let _ = writeln!(out, "Multi-tag: {}", history.multi_tag_count());
        if let Some((avg, max)) = history.multi_tag_summary() {
            let _ = writeln!(out, "Average simultaneous tags: {:.1}", avg);
            let _ = writeln!(out, "Most simultaneous tags: {}", max);
        }
    }
    out
}

/// Text for the `history` command.
pub fn render_history(history: &DetectionHistory) -> String {
    let mut out = String::from("=== Recent detections ===\n");
    if history.is_empty() {
        out.push_str("No detections yet\n");
        return out;
    }
    for (i, entry) in history.recent(RECENT_HISTORY).enumerate() {
        let short: String = entry.selected_uid.chars().take(8).collect();
        let _ = writeln!(
            out,
            "{:2}. {} - selected {}... ({} tag{})",
            i + 1,
            entry.timestamp.format("%H:%M:%S"),
            short,
            entry.total_tags,
            if entry.total_tags == 1 { "" } else { "s" }
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(total_tags: usize, uid: &str) -> DetectionEntry {
        DetectionEntry {
            timestamp: Local::now(),
            total_tags,
            selected_uid: uid.to_string(),
            all_uids: vec![uid.to_string(); total_tags],
        }
    }

    #[test]
    fn test_record_and_top_pages() {
        let mut stats = NavigationStats::new();
        for page in [3, 1, 3, 2, 3, 1] {
            stats.record(page);
        }
        assert_eq!(stats.total_navigations, 6);
        assert_eq!(stats.last_page, Some(1));
        assert_eq!(stats.usage(3), 3);
        assert_eq!(stats.usage(9), 0);
        assert_eq!(stats.top_pages(2), vec![(3, 3), (1, 2)]);
    }

    #[test]
    fn test_history_trims_to_newest() {
        let mut history = DetectionHistory::new();
        for i in 0..HISTORY_CAPACITY {
            history.push(entry(1, &format!("{:08x}", i)));
        }
        assert_eq!(history.len(), HISTORY_CAPACITY);

        history.push(entry(1, "last"));
        assert_eq!(history.len(), HISTORY_RETAIN);
        assert_eq!(history.iter().next_back().unwrap().selected_uid, "last");
        assert_eq!(
            history.iter().next().unwrap().selected_uid,
            format!("{:08x}", HISTORY_CAPACITY + 1 - HISTORY_RETAIN)
        );
    }

    #[test]
    fn test_multi_tag_summary() {
        let mut history = DetectionHistory::new();
        assert_eq!(history.multi_tag_summary(), None);
        history.push(entry(1, "aa"));
        history.push(entry(2, "bb"));
        history.push(entry(2, "cc"));
        assert_eq!(history.single_tag_count(), 1);
        assert_eq!(history.multi_tag_count(), 2);
        assert_eq!(history.multi_tag_summary(), Some((2.0, 2)));
    }

    #[test]
    fn test_render_history_shows_last_ten() {
        let mut history = DetectionHistory::new();
        for i in 0..12 {
            history.push(entry(1, &format!("uid{:02}abcdef", i)));
        }
        let text = render_history(&history);
        assert!(!text.contains("uid01abc"));
        assert!(text.contains(" 1. "));
        assert!(text.contains("selected uid02abc..."));
        assert!(text.contains("10. "));
    }

    #[test]
    fn test_render_stats() {
        let mut stats = NavigationStats::new();
        stats.record(4);
        let text = render_stats(&stats, &DetectionHistory::new(), Local::now());
        assert!(text.contains("Total navigations: 1"));
        assert!(text.contains("Current page: 4"));
        assert!(text.contains("page  4: 1 times"));
        assert!(text.contains("No detections yet"));
    }
}

//! Choosing one tag per poll when several are in the field.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::mapping::MappingStore;
use crate::tag::TagRecord;

/// Cooldown when a single tag is polled at a time.
pub const SINGLE_TAG_COOLDOWN: Duration = Duration::from_millis(500);
/// Cooldown when several tags may be in the field together.
pub const MULTI_TAG_COOLDOWN: Duration = Duration::from_millis(1000);

/// Tag selection policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Highest SENS_RES; first in detection order wins ties.
    #[default]
    Closest,
    /// Most recent detection time.
    Newest,
    /// Smallest mapped page; unmapped tags fall back to `Closest`.
    Specific,
    /// First in detection order.
    First,
}

impl Strategy {
    pub const SELECTABLE: [Strategy; 3] = [Strategy::Closest, Strategy::Newest, Strategy::Specific];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Closest => "closest",
            Strategy::Newest => "newest",
            Strategy::Specific => "specific",
            Strategy::First => "first",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Strategy::Closest => "pick the tag with the strongest response",
            Strategy::Newest => "pick the most recently detected tag",
            Strategy::Specific => "pick the tag mapped to the lowest page",
            Strategy::First => "pick the first tag reported",
        }
    }

    /// Parse a strategy name or its menu number (1-3). Unknown names map to
    /// [`Strategy::First`].
    pub fn from_name(name: &str) -> Self {
        name.parse().unwrap_or(Strategy::First)
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "closest" | "1" => Ok(Strategy::Closest),
            "newest" | "2" => Ok(Strategy::Newest),
            "specific" | "3" => Ok(Strategy::Specific),
            "first" => Ok(Strategy::First),
            other => Err(format!("unknown strategy '{}'", other)),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick the winning tag. `None` only for an empty slice.
pub fn select<'a>(
    strategy: Strategy,
    tags: &'a [TagRecord],
    mappings: &MappingStore,
) -> Option<&'a TagRecord> {
    match strategy {
        Strategy::Closest => closest(tags.iter()),
        Strategy::Newest => {
            // max_by_key keeps the last maximum; scan in reverse so the
            // earliest-detected tag wins ties.
            tags.iter().rev().max_by_key(|t| t.detected_at)
        }
        Strategy::Specific => {
            let mapped = tags
                .iter()
                .filter_map(|t| mappings.resolve(&t.uid_hex).map(|page| (page, t)))
                .min_by_key(|&(page, _)| page)
                .map(|(_, t)| t);
            mapped.or_else(|| closest(tags.iter()))
        }
        Strategy::First => tags.first(),
    }
}

fn closest<'a>(tags: impl DoubleEndedIterator<Item = &'a TagRecord>) -> Option<&'a TagRecord> {
    tags.rev().max_by_key(|t| t.sens_res)
}

/// Suppresses repeat triggers from a tag resting on the reader.
#[derive(Debug, Clone)]
pub struct Debouncer {
    cooldown: Duration,
    last: Option<(String, Instant)>,
}

impl Debouncer {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last: None,
        }
    }

    /// Default cooldown for the given per-poll tag limit.
    pub fn for_max_tags(max_tags: u8) -> Self {
        Self::new(if max_tags > 1 {
            MULTI_TAG_COOLDOWN
        } else {
            SINGLE_TAG_COOLDOWN
        })
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Accept `uid` unless it repeats the last accepted UID within the
    /// cooldown. Only accepted detections move the window.
    pub fn accept(&mut self, uid: &str, now: Instant) -> bool {
        if let Some((last_uid, at)) = &self.last
            && last_uid == uid
            && now.saturating_duration_since(*at) < self.cooldown
        {
            return false;
        }
        self.last = Some((uid.to_string(), now));
        true
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(uid: u8, sens_res: u16, at: Instant) -> TagRecord {
        TagRecord::new(1, sens_res, 0x00, &[uid, 0, 0, 0], at)
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!(Strategy::from_name("closest"), Strategy::Closest);
        assert_eq!(Strategy::from_name("NEWEST"), Strategy::Newest);
        assert_eq!(Strategy::from_name("3"), Strategy::Specific);
        assert_eq!(Strategy::from_name("bogus"), Strategy::First);
        assert!("bogus".parse::<Strategy>().is_err());
    }

    #[test]
    fn test_closest_scenario_b() {
        // X mapped to 5 (0x0044, strong), Y mapped to 6 (0x0020, weak).
        let now = Instant::now();
        let tags = vec![tag(0xA1, 0x0044, now), tag(0xB2, 0x0020, now)];
        let mut store = MappingStore::in_memory(10);
        store.add(5, &tags[0].uid_hex).unwrap();
        store.add(6, &tags[1].uid_hex).unwrap();

        let winner = select(Strategy::Closest, &tags, &store).unwrap();
        assert_eq!(store.resolve(&winner.uid_hex), Some(5));

        // Same under `specific`: page 5 < 6.
        let winner = select(Strategy::Specific, &tags, &store).unwrap();
        assert_eq!(store.resolve(&winner.uid_hex), Some(5));
    }

    #[test]
    fn test_closest_tie_keeps_detection_order() {
        let now = Instant::now();
        let tags = vec![tag(1, 0x0044, now), tag(2, 0x0044, now)];
        let store = MappingStore::in_memory(10);
        assert_eq!(select(Strategy::Closest, &tags, &store).unwrap().uid[0], 1);
        assert_eq!(select(Strategy::Newest, &tags, &store).unwrap().uid[0], 1);
    }

    #[test]
    fn test_newest() {
        let t0 = Instant::now();
        let tags = vec![tag(1, 0x0044, t0 + Duration::from_millis(5)), tag(2, 0x0004, t0)];
        let store = MappingStore::in_memory(10);
        assert_eq!(select(Strategy::Newest, &tags, &store).unwrap().uid[0], 1);
    }

    #[test]
    fn test_specific_prefers_lowest_page_then_closest() {
        let now = Instant::now();
        let tags = vec![tag(1, 0x0044, now), tag(2, 0x0004, now), tag(3, 0x0020, now)];
        let mut store = MappingStore::in_memory(10);
        store.add(7, &tags[2].uid_hex).unwrap();
        store.add(4, &tags[1].uid_hex).unwrap();
        assert_eq!(select(Strategy::Specific, &tags, &store).unwrap().uid[0], 2);

        let empty = MappingStore::in_memory(10);
        assert_eq!(select(Strategy::Specific, &tags, &empty).unwrap().uid[0], 1);
    }

    #[test]
    fn test_first_and_empty() {
        let now = Instant::now();
        let tags = vec![tag(1, 0x0004, now), tag(2, 0x0044, now)];
        let store = MappingStore::in_memory(10);
        assert_eq!(select(Strategy::First, &tags, &store).unwrap().uid[0], 1);
        for strategy in [Strategy::Closest, Strategy::Newest, Strategy::Specific, Strategy::First] {
            assert!(select(strategy, &[], &store).is_none());
        }
    }

    #[test]
    fn test_debounce_window() {
        let t0 = Instant::now();
        let mut debouncer = Debouncer::for_max_tags(1);
        assert_eq!(debouncer.cooldown(), SINGLE_TAG_COOLDOWN);

        assert!(debouncer.accept("aa", t0));
        assert!(!debouncer.accept("aa", t0 + Duration::from_millis(200)));
        assert!(!debouncer.accept("aa", t0 + Duration::from_millis(499)));
        assert!(debouncer.accept("aa", t0 + Duration::from_millis(500)));
    }

    #[test]
    fn test_debounce_rejections_do_not_extend_window() {
        let t0 = Instant::now();
        let mut debouncer = Debouncer::for_max_tags(2);
        assert!(debouncer.accept("aa", t0));
        assert!(!debouncer.accept("aa", t0 + Duration::from_millis(900)));
        assert!(debouncer.accept("aa", t0 + Duration::from_millis(1000)));
    }

    #[test]
    fn test_closest_scenario_b_unmapped() {
        let now = Instant::now();
        let tags = vec![tag(0xB2, 0x0020, now), tag(0xA1, 0x0044, now)];
        let store = MappingStore::in_memory(10);
        assert_eq!(select(Strategy::Closest, &tags, &store).unwrap().uid[0], 0xA1);
    }

    #[test]
    fn test_debounce_reset_forgets_last_tag() {
        let t0 = Instant::now();
        let mut debouncer = Debouncer::for_max_tags(1);
        assert!(debouncer.accept("aa", t0));
        debouncer.reset();
        assert!(debouncer.accept("aa", t0 + Duration::from_millis(10)));
    }

    #[test]
    fn test_debounce_other_uid_passes() {
        let t0 = Instant::now();
        let mut debouncer = Debouncer::for_max_tags(1);
        assert!(debouncer.accept("aa", t0));
        assert!(debouncer.accept("bb", t0 + Duration::from_millis(10)));
        assert!(debouncer.accept("aa", t0 + Duration::from_millis(20)));
    }
}

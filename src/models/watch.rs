//! Watch cache: last observed modification time per watched path.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Modification time in fractional seconds since the Unix epoch.
pub type Mtime = f64;

/// Convert a filesystem timestamp into an [`Mtime`].
pub fn mtime_of(time: SystemTime) -> Mtime {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs_f64(),
        Err(_) => 0.0,
    }
}

/// Observation state of one watched target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TargetState {
    Unseen,
    Seen(Mtime),
}

/// Last observed mtime of every watched path.
///
/// Serialized as plain text, one `path:mtime` line per target. The last `:`
/// on a line separates the two, so paths may themselves contain colons.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WatchState {
    entries: BTreeMap<PathBuf, Mtime>,
}

impl WatchState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target(&self, path: &Path) -> TargetState {
        match self.entries.get(path) {
            Some(mtime) => TargetState::Seen(*mtime),
            None => TargetState::Unseen,
        }
    }

    /// Record an mtime, returning true when it is newer than what was known.
    pub fn record(&mut self, path: &Path, mtime: Mtime) -> bool {
        let newer = match self.target(path) {
            TargetState::Unseen => true,
            TargetState::Seen(previous) => mtime > previous,
        };
        self.entries.insert(path.to_path_buf(), mtime);
        newer
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse the text cache format. Unreadable lines are ignored.
    pub fn parse(text: &str) -> Self {
        let entries = text
            .lines()
            .filter_map(|line| {
                let (path, mtime) = line.trim().rsplit_once(':')?;
                let mtime: Mtime = mtime.trim().parse().ok()?;
                if path.is_empty() || !mtime.is_finite() {
                    return None;
                }
                Some((PathBuf::from(path), mtime))
            })
            .collect();
        Self { entries }
    }

    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|(path, mtime)| format!("{}:{}\n", path.display(), mtime))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_reports_newer_mtimes() {
        let mut state = WatchState::new();
        let path = Path::new("data/scores/all_apartments_scores.json");

        assert_eq!(state.target(path), TargetState::Unseen);
        assert!(state.record(path, 10.0));
        assert!(!state.record(path, 10.0));
        assert!(!state.record(path, 9.5));
        assert!(state.record(path, 11.25));
        assert_eq!(state.target(path), TargetState::Seen(11.25));
    }

    #[test]
    fn test_text_format_round_trip() {
        let mut state = WatchState::new();
        state.record(Path::new("data/scraped_apartments.json"), 1760000000.123456);
        state.record(Path::new("C:/weird:name.json"), 5.0);

        let text = state.render();
        assert!(text.contains("data/scraped_apartments.json:1760000000.123456\n"));
        assert_eq!(WatchState::parse(&text), state);
    }

    #[test]
    fn test_parse_skips_garbage() {
        let state = WatchState::parse("no separator\n:12\nfile.json:abc\nok.json:3\n\n");
        assert_eq!(state.len(), 1);
        assert_eq!(state.target(Path::new("ok.json")), TargetState::Seen(3.0));
    }
}

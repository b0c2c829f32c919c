//! Viewer/Participant Tracker
//!
//! Per-stream viewer counts and the set of users who placed bets, used for
//! broadcast fan-out and post-round summary construction.
//!
//! Every compound mutation (increment-and-touch, decrement-and-prune) runs
//! inside one mutex critical section, which gives the same guarantee the
//! scripted atomic counter ops would: two concurrent connects or disconnects
//! can never interleave a read-modify-write on the same count.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
struct PresenceInner {
    /// stream_id → user_id → open connection count.
    viewers: HashMap<String, HashMap<String, u32>>,
    /// stream_id → user_id → time the user was marked a bettor.
    participants: HashMap<String, HashMap<String, DateTime<Utc>>>,
}

#[derive(Clone)]
pub struct PresenceTracker {
    inner: Arc<Mutex<PresenceInner>>,
    /// How long a participant mark survives before it is pruned.
    retention: Duration,
}

impl PresenceTracker {
    pub fn new(retention_secs: i64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PresenceInner::default())),
            retention: Duration::seconds(retention_secs),
        }
    }

    /// A connection for `user_id` opened on `stream_id`. Returns the unique
    /// viewer count after the increment.
    pub fn connect(&self, stream_id: &str, user_id: &str) -> usize {
        let mut inner = self.inner.lock();
        let per_stream = inner.viewers.entry(stream_id.to_string()).or_default();
        *per_stream.entry(user_id.to_string()).or_insert(0) += 1;
        per_stream.len()
    }

    /// A connection closed. Removes the user once their last connection is
    /// gone and the stream entry once it is empty. Returns the unique viewer
    /// count after the decrement.
    pub fn disconnect(&self, stream_id: &str, user_id: &str) -> usize {
        let mut inner = self.inner.lock();
        let Some(per_stream) = inner.viewers.get_mut(stream_id) else {
            return 0;
        };
        if let Some(count) = per_stream.get_mut(user_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                per_stream.remove(user_id);
            }
        }
        let remaining = per_stream.len();
        if remaining == 0 {
            inner.viewers.remove(stream_id);
        }
        remaining
    }

    /// Unique viewers currently connected to the stream.
    pub fn viewer_count(&self, stream_id: &str) -> usize {
        self.inner
            .lock()
            .viewers
            .get(stream_id)
            .map(|m| m.len())
            .unwrap_or(0)
    }

    /// Record that a user placed a bet in the stream.
    pub fn mark_participant(&self, stream_id: &str, user_id: &str) {
        let mut inner = self.inner.lock();
        inner
            .participants
            .entry(stream_id.to_string())
            .or_default()
            .insert(user_id.to_string(), Utc::now());
    }

    /// Users who bet in this stream within the retention window. Expired
    /// marks are pruned on read.
    pub fn participants(&self, stream_id: &str) -> Vec<String> {
        let cutoff = Utc::now() - self.retention;
        let mut inner = self.inner.lock();
        let Some(per_stream) = inner.participants.get_mut(stream_id) else {
            return Vec::new();
        };
        per_stream.retain(|_, marked_at| *marked_at >= cutoff);
        let mut users: Vec<String> = per_stream.keys().cloned().collect();
        if per_stream.is_empty() {
            inner.participants.remove(stream_id);
        }
        users.sort();
        users
    }

    /// Drop the participant set once the post-round summaries consumed it.
    pub fn clear_participants(&self, stream_id: &str) {
        self.inner.lock().participants.remove(stream_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn connect_disconnect_prunes() {
        let tracker = PresenceTracker::new(3600);

        assert_eq!(tracker.connect("s1", "alice"), 1);
        assert_eq!(tracker.connect("s1", "alice"), 1); // second tab, still one viewer
        assert_eq!(tracker.connect("s1", "bob"), 2);

        assert_eq!(tracker.disconnect("s1", "alice"), 2); // one tab left
        assert_eq!(tracker.disconnect("s1", "alice"), 1);
        assert_eq!(tracker.viewer_count("s1"), 1);

        assert_eq!(tracker.disconnect("s1", "bob"), 0);
        assert_eq!(tracker.viewer_count("s1"), 0);
        // Disconnect on an empty stream is harmless.
        assert_eq!(tracker.disconnect("s1", "carol"), 0);
    }

    #[test]
    fn concurrent_connects_and_disconnects_count_exactly() {
        let tracker = PresenceTracker::new(3600);
        let n = 64;
        let m = 24;

        let handles: Vec<_> = (0..n)
            .map(|i| {
                let t = tracker.clone();
                thread::spawn(move || {
                    t.connect("s1", &format!("user{i}"));
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(tracker.viewer_count("s1"), n);

        let handles: Vec<_> = (0..m)
            .map(|i| {
                let t = tracker.clone();
                thread::spawn(move || {
                    t.disconnect("s1", &format!("user{i}"));
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(tracker.viewer_count("s1"), n - m);
    }

    #[test]
    fn participants_expire_and_clear() {
        let tracker = PresenceTracker::new(3600);
        tracker.mark_participant("s1", "alice");
        tracker.mark_participant("s1", "bob");
        tracker.mark_participant("s1", "alice"); // re-mark refreshes, no duplicate
        assert_eq!(tracker.participants("s1"), vec!["alice", "bob"]);

        tracker.clear_participants("s1");
        assert!(tracker.participants("s1").is_empty());

        // Zero retention: marks are expired by the time they are read.
        let expired = PresenceTracker::new(0);
        expired.mark_participant("s1", "alice");
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(expired.participants("s1").is_empty());
    }
}

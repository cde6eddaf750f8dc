//! Episodic liveness tracking
//!
//! An [`Activity`] remembers when an entity was first and last seen and
//! whether it is currently active. Each touch re-arms a TTL timer; once
//! the TTL elapses without another touch, the activity flips inactive and
//! an [`Expired`] notice is sent on the channel supplied at construction.
//!
//! The timer and the touching task coordinate through one mutex, so a
//! touch racing a near-due expiry resolves cleanly: whichever side locks
//! first wins. A winning touch moves the deadline and the timer re-sleeps;
//! a winning expiry flips the activity inactive and the next touch starts
//! a fresh episode.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Notice that an [`Activity`] went its full TTL without a touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expired<K> {
    pub key: K,
    /// Length of the episode that just ended.
    pub up: Duration,
}

#[derive(Debug, Default)]
struct State {
    is_active: bool,
    first_seen: Option<Instant>,
    first_seen_episode: Option<Instant>,
    last_seen: Option<Instant>,
    /// When the pending expiry fires; `None` while inactive.
    deadline: Option<Instant>,
    /// Whether a timer task currently owns the deadline.
    timer_armed: bool,
    timer: Option<JoinHandle<()>>,
}

/// Episodic liveness for one tracked entity.
pub struct Activity<K: Clone + Send + 'static> {
    shared: Arc<Mutex<State>>,
    ttl: Duration,
    key: K,
    expired_tx: mpsc::Sender<Expired<K>>,
}

impl<K: Clone + Send + 'static> Activity<K> {
    /// Construct inactive. No timer is armed until the first touch, so an
    /// untouched activity can never expire.
    pub fn new(ttl: Duration, key: K, expired_tx: mpsc::Sender<Expired<K>>) -> Self {
        Self {
            shared: Arc::new(Mutex::new(State::default())),
            ttl,
            key,
            expired_tx,
        }
    }

    /// Mark the entity as alive at `now`, re-arming its expiry for `ttl`
    /// from now. Returns whether it was already active.
    pub fn touch(&self, now: Instant) -> bool {
        let mut st = self.shared.lock();
        let was_active = st.is_active;
        if st.first_seen.is_none() {
            st.first_seen = Some(now);
        }
        if !was_active {
            st.first_seen_episode = Some(now);
        }
        st.last_seen = Some(now);
        st.is_active = true;
        st.deadline = Some(now + self.ttl);
        if !st.timer_armed {
            st.timer_armed = true;
            st.timer = Some(self.spawn_timer());
        }
        was_active
    }

    pub fn is_active(&self) -> bool {
        self.shared.lock().is_active
    }

    pub fn first_seen(&self) -> Option<Instant> {
        self.shared.lock().first_seen
    }

    pub fn first_seen_episode(&self) -> Option<Instant> {
        self.shared.lock().first_seen_episode
    }

    pub fn last_seen(&self) -> Option<Instant> {
        self.shared.lock().last_seen
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Time since the entity was first seen, active or not.
    pub fn age(&self, now: Instant) -> Duration {
        self.first_seen()
            .map(|t| now.saturating_duration_since(t))
            .unwrap_or_default()
    }

    /// Time since the current episode began.
    pub fn up(&self, now: Instant) -> Duration {
        self.first_seen_episode()
            .map(|t| now.saturating_duration_since(t))
            .unwrap_or_default()
    }

    fn spawn_timer(&self) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let tx = self.expired_tx.clone();
        let key = self.key.clone();
        tokio::spawn(async move {
            loop {
                let deadline = {
                    let mut st = shared.lock();
                    match st.deadline {
                        Some(d) => d,
                        None => {
                            // Disarm under the lock, so a concurrent touch
                            // either sees the deadline or spawns a new timer.
                            st.timer_armed = false;
                            return;
                        }
                    }
                };
                tokio::time::sleep_until(deadline).await;
                let expired = {
                    let mut st = shared.lock();
                    match st.deadline {
                        // Touched while we slept.
                        Some(d) if d > Instant::now() => None,
                        _ => {
                            st.is_active = false;
                            st.deadline = None;
                            let up = st
                                .first_seen_episode
                                .map(|t| Instant::now().saturating_duration_since(t))
                                .unwrap_or_default();
                            Some(Expired {
                                key: key.clone(),
                                up,
                            })
                        }
                    }
                };
                if let Some(notice) = expired {
                    if tx.send(notice).await.is_err() {
                        // Receiver gone; the pipeline is shutting down.
                        shared.lock().timer_armed = false;
                        return;
                    }
                }
            }
        })
    }
}

impl<K: Clone + Send + 'static> Drop for Activity<K> {
    fn drop(&mut self) {
        if let Some(timer) = self.shared.lock().timer.take() {
            timer.abort();
        }
    }
}

impl<K: Clone + Send + 'static> std::fmt::Debug for Activity<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.shared.lock();
        f.debug_struct("Activity")
            .field("is_active", &st.is_active)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

//! Per-user write turns.
//!
//! A change is published after its store write returns. Two writers for the
//! same user could otherwise finish their writes in one order and publish in
//! the other. Holding the user's turn across write and publish makes each
//! user's stream follow write order. Different users never wait on each
//! other.

use crate::domain::notification::UserId;
use ahash::RandomState;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type Turns = DashMap<UserId, Arc<Mutex<()>>, RandomState>;

/// Hands out one turn per user at a time, in arrival order.
#[derive(Debug, Clone)]
pub struct UserSequencer {
    turns: Arc<Turns>,
}

impl Default for UserSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl UserSequencer {
    pub fn new() -> Self {
        Self {
            turns: Arc::new(DashMap::with_hasher(RandomState::new())),
        }
    }

    /// Wait for `user`'s turn. The turn ends when the guard drops.
    pub async fn turn(&self, user: &UserId) -> UserTurn {
        let lock = self
            .turns
            .entry(user.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;

        UserTurn {
            user: user.clone(),
            guard: Some(guard),
            turns: Arc::clone(&self.turns),
        }
    }

    /// Users with a turn held or awaited.
    pub fn active_users(&self) -> usize {
        self.turns.len()
    }
}

/// Exclusive right to write and publish for one user.
#[derive(Debug)]
pub struct UserTurn {
    user: UserId,
    guard: Option<OwnedMutexGuard<()>>,
    turns: Arc<Turns>,
}

impl UserTurn {
    pub fn user(&self) -> &UserId {
        &self.user
    }
}

impl Drop for UserTurn {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map itself still refers to the lock: nobody is waiting.
        self.turns
            .remove_if(&self.user, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_turns_are_exclusive_per_user() {
        let sequencer = UserSequencer::new();
        let alice = UserId::new("alice");

        let first = sequencer.turn(&alice).await;
        let waiting = tokio::time::timeout(Duration::from_millis(20), sequencer.turn(&alice)).await;
        assert!(waiting.is_err());

        // Another user is not held up.
        let bob = tokio::time::timeout(
            Duration::from_millis(20),
            sequencer.turn(&UserId::new("bob")),
        )
        .await;
        assert!(bob.is_ok());

        drop(first);
        assert!(sequencer.turn(&alice).await.user() == &alice);
    }

    #[tokio::test]
    async fn test_idle_users_are_forgotten() {
        let sequencer = UserSequencer::new();
        let turn = sequencer.turn(&UserId::new("alice")).await;
        assert_eq!(sequencer.active_users(), 1);
        drop(turn);
        assert_eq!(sequencer.active_users(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_turns_follow_arrival_order_under_contention() {
        let sequencer = UserSequencer::new();
        let alice = UserId::new("alice");
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..20)
            .map(|n| {
                let sequencer = sequencer.clone();
                let alice = alice.clone();
                let log = log.clone();
                tokio::spawn(async move {
                    let _turn = sequencer.turn(&alice).await;
                    log.lock().unwrap().push(("start", n));
                    tokio::task::yield_now().await;
                    log.lock().unwrap().push(("end", n));
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let log = log.lock().unwrap();
        // Every start is immediately followed by its own end.
        for pair in log.chunks(2) {
            assert_eq!(pair[0].0, "start");
            assert_eq!(pair[1], ("end", pair[0].1));
        }
        assert_eq!(sequencer.active_users(), 0);
    }
}

// Ownership of the single active search and of the submit lock

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{api::SearchApi, types::SearchToken};

#[derive(Debug)]
struct ActiveSearch {
    generation: u64,
    selection: String,
    // None until the remote start call has answered
    token: Option<SearchToken>,
    cancel: CancellationToken,
}

/// Handle held by the task running one search.
#[derive(Debug, Clone)]
pub struct SearchTicket {
    generation: u64,
    cancel: CancellationToken,
}

impl SearchTicket {
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[derive(Debug, Default)]
struct LockState {
    last_id: u64,
    held: Option<(u64, String)>,
}

pub struct CancellationController {
    api: Arc<dyn SearchApi>,
    slot: Mutex<Option<ActiveSearch>>,
    generation: Mutex<u64>,
    lock: Mutex<LockState>,
    lock_releases: AtomicUsize,
}

impl CancellationController {
    pub fn new(api: Arc<dyn SearchApi>) -> Self {
        Self {
            api,
            slot: Mutex::new(None),
            generation: Mutex::new(0),
            lock: Mutex::new(LockState::default()),
            lock_releases: AtomicUsize::new(0),
        }
    }

    fn take_signalled(&self) -> Option<ActiveSearch> {
        let retired = self.slot.lock().take();
        if let Some(search) = &retired {
            search.cancel.cancel();
        }
        retired
    }

    async fn notify_stop(&self, retired: ActiveSearch) {
        tracing::info!(
            selection = %retired.selection,
            token = ?retired.token.as_ref().map(SearchToken::as_str),
            "search superseded"
        );
        if let Some(token) = retired.token {
            self.stop_quietly(&token).await;
        }
    }

    /// Asks the server to drop `token`. Failures are logged and ignored.
    pub async fn stop_quietly(&self, token: &SearchToken) {
        if let Err(err) = self.api.stop(token).await {
            tracing::warn!(%token, error = %err, "ignoring failed stop request");
        }
    }

    /// Cancels the active search, if any, and tells the server to stop it.
    /// Returns whether there was anything to retire.
    pub async fn retire_active(&self) -> bool {
        match self.take_signalled() {
            Some(retired) => {
                self.notify_stop(retired).await;
                true
            }
            None => false,
        }
    }

    /// Retires whatever is active and makes a fresh slot for `selection`.
    ///
    /// The previous slot's cancel handle is always signalled before the new
    /// slot exists, even if another call raced in while `stop` was pending.
    pub async fn supersede(&self, selection: &str) -> SearchTicket {
        self.retire_active().await;

        let cancel = CancellationToken::new();
        let generation = {
            let mut counter = self.generation.lock();
            *counter += 1;
            *counter
        };

        let displaced = {
            let mut slot = self.slot.lock();
            let displaced = slot.take();
            if let Some(search) = &displaced {
                search.cancel.cancel();
            }
            *slot = Some(ActiveSearch {
                generation,
                selection: selection.to_string(),
                token: None,
                cancel: cancel.clone(),
            });
            displaced
        };

        if let Some(search) = displaced {
            self.notify_stop(search).await;
        }

        SearchTicket { generation, cancel }
    }

    /// Records the server token for the ticket's slot. Fails if the slot has
    /// been retired or replaced since the ticket was issued.
    pub fn install(&self, ticket: &SearchTicket, token: SearchToken) -> bool {
        let mut slot = self.slot.lock();
        match slot.as_mut() {
            Some(search) if search.generation == ticket.generation && !ticket.is_cancelled() => {
                search.token = Some(token);
                true
            }
            _ => false,
        }
    }

    #[cfg(test)]
    fn is_current(&self, ticket: &SearchTicket, token: &SearchToken) -> bool {
        let slot = self.slot.lock();
        matches!(
            slot.as_ref(),
            Some(search) if search.generation == ticket.generation && search.token.as_ref() == Some(token)
        )
    }

    /// Runs `commit` and clears the slot, but only while `token` is still the
    /// active token. The check and the commit happen under the slot lock.
    pub fn complete_if_current<F: FnOnce()>(
        &self,
        ticket: &SearchTicket,
        token: &SearchToken,
        commit: F,
    ) -> bool {
        let mut slot = self.slot.lock();
        let current = matches!(
            slot.as_ref(),
            Some(search) if search.generation == ticket.generation && search.token.as_ref() == Some(token)
        );
        if current {
            commit();
            *slot = None;
        }
        current
    }

    /// Drops a slot that never got a token. No-op if it was already replaced.
    pub fn abandon_pending(&self, ticket: &SearchTicket) -> bool {
        let mut slot = self.slot.lock();
        match slot.as_ref() {
            Some(search) if search.generation == ticket.generation => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    pub fn active_token(&self) -> Option<SearchToken> {
        self.slot.lock().as_ref().and_then(|s| s.token.clone())
    }

    #[cfg(test)]
    fn active_selection(&self) -> Option<String> {
        self.slot.lock().as_ref().map(|s| s.selection.clone())
    }

    // Submit lock

    pub fn acquire_submit_lock(&self, selection: &str) -> u64 {
        let mut lock = self.lock.lock();
        lock.last_id += 1;
        lock.held = Some((lock.last_id, selection.to_string()));
        lock.last_id
    }

    /// Releases the lock if `lock_id` is still the current holder.
    pub fn release_submit_lock(&self, lock_id: u64) -> bool {
        let mut lock = self.lock.lock();
        match &lock.held {
            Some((held, _)) if *held == lock_id => {
                lock.held = None;
                self.lock_releases.fetch_add(1, Ordering::SeqCst);
                true
            }
            _ => false,
        }
    }

    pub fn held_lock(&self) -> Option<(u64, String)> {
        self.lock.lock().held.clone()
    }

    pub fn is_locked(&self) -> bool {
        self.lock.lock().held.is_some()
    }

    pub fn lock_releases(&self) -> usize {
        self.lock_releases.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_server::{MockCall, MockSearchApi};

    fn controller() -> (Arc<MockSearchApi>, CancellationController) {
        let api = Arc::new(MockSearchApi::new());
        let controller = CancellationController::new(api.clone());
        (api, controller)
    }

    #[tokio::test]
    async fn test_retire_is_idempotent() {
        let (api, controller) = controller();

        assert!(!controller.retire_active().await);

        let ticket = controller.supersede("7").await;
        assert!(controller.install(&ticket, SearchToken::from("abc")));

        assert!(controller.retire_active().await);
        assert!(!controller.retire_active().await);
        assert!(ticket.is_cancelled());
        assert_eq!(controller.active_token(), None);
        assert_eq!(
            api.calls(),
            vec![MockCall::Stop {
                token: "abc".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_failed_stop_still_clears_slot() {
        let (api, controller) = controller();
        api.fail_stops(true);

        let ticket = controller.supersede("7").await;
        controller.install(&ticket, SearchToken::from("abc"));

        assert!(controller.retire_active().await);
        assert_eq!(controller.active_selection(), None);
        assert!(ticket.is_cancelled());
    }

    #[tokio::test]
    async fn test_supersede_signals_previous_first() {
        let (api, controller) = controller();

        let first = controller.supersede("7").await;
        controller.install(&first, SearchToken::from("a"));
        let second = controller.supersede("9").await;

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_eq!(controller.active_selection().as_deref(), Some("9"));
        assert_eq!(controller.active_token(), None);
        assert!(!controller.install(&first, SearchToken::from("late")));
        assert!(controller.install(&second, SearchToken::from("b")));
        assert_eq!(api.count(|c| matches!(c, MockCall::Stop { .. })), 1);
    }

    #[tokio::test]
    async fn test_pending_slot_without_token_is_not_stopped_remotely() {
        let (api, controller) = controller();

        let ticket = controller.supersede("7").await;
        assert!(controller.retire_active().await);

        assert!(ticket.is_cancelled());
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_commit_only_while_current() {
        let (_api, controller) = controller();
        let token = SearchToken::from("abc");

        let ticket = controller.supersede("7").await;
        controller.install(&ticket, token.clone());
        assert!(controller.is_current(&ticket, &token));
        assert!(!controller.is_current(&ticket, &SearchToken::from("other")));

        let mut committed = false;
        assert!(controller.complete_if_current(&ticket, &token, || committed = true));
        assert!(committed);
        assert_eq!(controller.active_token(), None);

        let mut committed_again = false;
        assert!(!controller.complete_if_current(&ticket, &token, || committed_again = true));
        assert!(!committed_again);
    }

    #[tokio::test]
    async fn test_abandon_pending_ignores_replaced_slot() {
        let (_api, controller) = controller();

        let old = controller.supersede("7").await;
        let new = controller.supersede("9").await;

        assert!(!controller.abandon_pending(&old));
        assert_eq!(controller.active_selection().as_deref(), Some("9"));
        assert!(controller.abandon_pending(&new));
        assert_eq!(controller.active_selection(), None);
    }

    #[test]
    fn test_stale_lock_holder_cannot_release() {
        let api: Arc<dyn SearchApi> = Arc::new(MockSearchApi::new());
        let controller = CancellationController::new(api);

        let first = controller.acquire_submit_lock("7");
        let second = controller.acquire_submit_lock("9");
        assert!(second > first);

        assert!(!controller.release_submit_lock(first));
        assert!(controller.is_locked());
        assert_eq!(controller.held_lock(), Some((second, "9".to_string())));

        assert!(controller.release_submit_lock(second));
        assert!(!controller.release_submit_lock(second));
        assert!(!controller.is_locked());
        assert_eq!(controller.lock_releases(), 1);
    }
}

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::capabilities::{ApiError, ModApiClient, UserDataStore, MAX_PAGE_SIZE};
use crate::error::CoreResult;
use crate::local_user::{AuthenticationState, LocalUser};
use crate::model::{GameId, ModId, ModProfile, UserProfile};

#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Page size used when paginating the remote subscription list.
    /// Clamped to `1..=MAX_PAGE_SIZE` at service construction.
    pub page_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: MAX_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Default)]
pub struct SyncMetrics {
    pushes_applied: AtomicU64,
    pushes_reclassified: AtomicU64,
    push_failures: AtomicU64,
    pulls_completed: AtomicU64,
    new_remote_subscriptions: AtomicU64,
    invariant_warnings: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncMetricsSnapshot {
    pub pushes_applied: u64,
    pub pushes_reclassified: u64,
    pub push_failures: u64,
    pub pulls_completed: u64,
    pub new_remote_subscriptions: u64,
    pub invariant_warnings: u64,
}

impl SyncMetrics {
    fn snapshot(&self) -> SyncMetricsSnapshot {
        SyncMetricsSnapshot {
            pushes_applied: self.pushes_applied.load(Ordering::Relaxed),
            pushes_reclassified: self.pushes_reclassified.load(Ordering::Relaxed),
            push_failures: self.push_failures.load(Ordering::Relaxed),
            pulls_completed: self.pulls_completed.load(Ordering::Relaxed),
            new_remote_subscriptions: self.new_remote_subscriptions.load(Ordering::Relaxed),
            invariant_warnings: self.invariant_warnings.load(Ordering::Relaxed),
        }
    }
}

/// A 400 means the desired end state already holds on the server; a 404
/// means the mod is gone and the desired state is unreachable. Either way
/// there is nothing left to push for that id.
fn is_effectively_pushed(error: &ApiError) -> bool {
    matches!(error.status(), Some(400 | 404))
}

/// Local subscription state and its reconciliation with the remote
/// service.
///
/// The user record is loaded once at construction and persisted wholesale
/// after every mutating operation. Operations serialize on an internal
/// lock; interleaving whole push/pull operations against each other is the
/// caller's single-writer responsibility.
pub struct SubscriptionService {
    api: Arc<dyn ModApiClient>,
    store: Arc<dyn UserDataStore>,
    game_id: GameId,
    config: SyncConfig,
    user: Mutex<LocalUser>,
    metrics: SyncMetrics,
}

impl SubscriptionService {
    #[must_use]
    pub fn new(
        api: Arc<dyn ModApiClient>,
        store: Arc<dyn UserDataStore>,
        game_id: GameId,
        mut config: SyncConfig,
    ) -> Self {
        config.page_size = config.page_size.clamp(1, MAX_PAGE_SIZE);

        let user = match store.load() {
            Ok(Some(user)) => user,
            Ok(None) => LocalUser::default(),
            Err(e) => {
                warn!(error = %e, "failed to load user data, starting fresh");
                LocalUser::default()
            }
        };

        for id in user.invariant_violations() {
            warn!(mod_id = %id, "loaded user data has an active subscription in the unsubscribe queue");
        }

        Self {
            api,
            store,
            game_id,
            config,
            user: Mutex::new(user),
            metrics: SyncMetrics::default(),
        }
    }

    /// Snapshot of the current user record.
    #[must_use]
    pub fn user(&self) -> LocalUser {
        self.user.lock().clone()
    }

    #[must_use]
    pub fn authentication_state(&self) -> AuthenticationState {
        self.user.lock().authentication_state()
    }

    /// Stores a fresh session token (clearing any previous rejection) and
    /// the profile it belongs to.
    pub fn authenticate(
        &self,
        token: impl Into<String>,
        profile: Option<UserProfile>,
    ) -> CoreResult<()> {
        let mut user = self.user.lock();
        user.authenticate(token);
        if profile.is_some() {
            user.profile = profile;
        }
        self.store.save(&user)?;
        Ok(())
    }

    /// Resets the user record to its default. Callers also reset their
    /// caches so no per-user data survives.
    pub fn log_out(&self) -> CoreResult<()> {
        let mut user = self.user.lock();
        user.log_out();
        self.store.save(&user)?;
        info!("logged out");
        Ok(())
    }

    /// Records a local subscribe intent; returns whether state changed.
    pub fn subscribe(&self, id: ModId) -> CoreResult<bool> {
        let mut user = self.user.lock();
        if !user.subscribe(id) {
            return Ok(false);
        }
        self.store.save(&user)?;
        Ok(true)
    }

    /// Records a local unsubscribe intent; returns whether state changed.
    pub fn unsubscribe(&self, id: ModId) -> CoreResult<bool> {
        let mut user = self.user.lock();
        if !user.unsubscribe(id) {
            return Ok(false);
        }
        self.store.save(&user)?;
        Ok(true)
    }

    pub fn enable_mod(&self, id: ModId) -> CoreResult<bool> {
        let mut user = self.user.lock();
        if !user.enable_mod(id) {
            return Ok(false);
        }
        self.store.save(&user)?;
        Ok(true)
    }

    pub fn disable_mod(&self, id: ModId) -> CoreResult<bool> {
        let mut user = self.user.lock();
        if !user.disable_mod(id) {
            return Ok(false);
        }
        self.store.save(&user)?;
        Ok(true)
    }

    #[must_use]
    pub fn enabled_mods(&self) -> Vec<ModId> {
        self.user.lock().enabled_mod_ids.clone()
    }

    #[must_use]
    pub fn subscribed_mods(&self) -> BTreeSet<ModId> {
        self.user.lock().subscribed_mod_ids.clone()
    }

    #[must_use]
    pub fn metrics(&self) -> SyncMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Pushes every queued subscribe/unsubscribe to the server, all calls
    /// concurrently.
    ///
    /// Per-call outcomes are independent: one failure never aborts its
    /// siblings. HTTP 400 and 404 count as applied (the desired end state
    /// already holds or is unreachable) and clear their queue entry without
    /// recording an error. Queue mutation and persistence happen exactly
    /// once, after the whole batch has completed; the last outright failure
    /// is returned, leaving its id queued for the next push.
    #[instrument(skip(self))]
    pub async fn push_subscription_changes(&self) -> CoreResult<()> {
        let (queued_subs, queued_unsubs) = {
            let user = self.user.lock();
            if user.authentication_state() != AuthenticationState::Active {
                debug!("skipping push: not authenticated");
                return Ok(());
            }
            (
                user.queued_subscribes.iter().copied().collect::<Vec<_>>(),
                user.queued_unsubscribes.iter().copied().collect::<Vec<_>>(),
            )
        };

        if queued_subs.is_empty() && queued_unsubs.is_empty() {
            return Ok(());
        }

        let mut calls: Vec<BoxFuture<'static, (ModId, bool, Result<(), ApiError>)>> =
            Vec::with_capacity(queued_subs.len() + queued_unsubs.len());
        for id in &queued_subs {
            let api = Arc::clone(&self.api);
            let id = *id;
            calls.push(Box::pin(async move { (id, true, api.subscribe(id).await) }));
        }
        for id in &queued_unsubs {
            let api = Arc::clone(&self.api);
            let id = *id;
            calls.push(Box::pin(
                async move { (id, false, api.unsubscribe(id).await) },
            ));
        }

        let outcomes = join_all(calls).await;

        let mut pushed_subs = Vec::new();
        let mut pushed_unsubs = Vec::new();
        let mut token_rejected = false;
        let mut last_error: Option<ApiError> = None;

        for (id, was_subscribe, outcome) in outcomes {
            let pushed = match outcome {
                Ok(()) => {
                    self.metrics.pushes_applied.fetch_add(1, Ordering::Relaxed);
                    true
                }
                Err(e) if is_effectively_pushed(&e) => {
                    self.metrics
                        .pushes_reclassified
                        .fetch_add(1, Ordering::Relaxed);
                    debug!(mod_id = %id, error = %e, "push already applied server-side");
                    true
                }
                Err(e) => {
                    self.metrics.push_failures.fetch_add(1, Ordering::Relaxed);
                    if e.is_auth_rejection() {
                        token_rejected = true;
                    }
                    warn!(mod_id = %id, subscribe = was_subscribe, error = %e, "push failed");
                    last_error = Some(e);
                    false
                }
            };

            if pushed {
                if was_subscribe {
                    pushed_subs.push(id);
                } else {
                    pushed_unsubs.push(id);
                }
            }
        }

        {
            let mut user = self.user.lock();
            for id in &pushed_subs {
                user.queued_subscribes.remove(id);
            }
            for id in &pushed_unsubs {
                user.queued_unsubscribes.remove(id);
            }
            if token_rejected {
                user.mark_token_rejected();
            }
            self.store.save(&user)?;
        }

        info!(
            applied = pushed_subs.len() + pushed_unsubs.len(),
            failed = u64::from(last_error.is_some()),
            "subscription push finished"
        );

        match last_error {
            None => Ok(()),
            Some(e) => Err(e.into()),
        }
    }

    /// Pulls the server's authoritative subscription list for the game and
    /// reconciles it with local state.
    ///
    /// Returns the profiles that are genuinely new remote subscriptions:
    /// ids that were neither subscribed locally, queued locally, nor
    /// pending an unsubscribe. Confirmed queued subscribes are folded into
    /// the subscription set without appearing in the result.
    #[instrument(skip(self))]
    pub async fn pull_subscription_changes(&self) -> CoreResult<Vec<ModProfile>> {
        if self.authentication_state() != AuthenticationState::Active {
            debug!("skipping pull: not authenticated");
            return Ok(Vec::new());
        }

        let page_size = self.config.page_size;
        let mut remote = Vec::new();
        let mut offset = 0;
        loop {
            let page = match self
                .api
                .fetch_subscriptions_page(self.game_id, offset, page_size)
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    if e.is_auth_rejection() {
                        let mut user = self.user.lock();
                        user.mark_token_rejected();
                        if let Err(save_err) = self.store.save(&user) {
                            warn!(error = %save_err, "failed to persist token rejection");
                        }
                    }
                    return Err(e.into());
                }
            };

            let is_tail = page.is_tail();
            remote.extend(page.items);
            if is_tail {
                break;
            }
            offset += page.size;
        }

        let fresh = {
            let mut user = self.user.lock();
            let (fresh, warnings) = reconcile_remote(&mut user, remote);
            self.metrics
                .invariant_warnings
                .fetch_add(warnings, Ordering::Relaxed);
            self.store.save(&user)?;
            fresh
        };

        self.metrics.pulls_completed.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .new_remote_subscriptions
            .fetch_add(fresh.len() as u64, Ordering::Relaxed);
        info!(new_subscriptions = fresh.len(), "subscription pull finished");

        Ok(fresh)
    }
}

/// Merges the remote subscription list into the local record.
///
/// Local intent wins over stale remote state: a pending unsubscribe keeps
/// its id out of the subscription set even when the server still lists it,
/// and a pending subscribe keeps its id in even when the server does not
/// list it yet. Returns the genuinely new remote profiles and the number
/// of invariant warnings raised.
fn reconcile_remote(
    user: &mut LocalUser,
    remote: Vec<ModProfile>,
) -> (Vec<ModProfile>, u64) {
    let mut local_only: BTreeSet<ModId> = user.subscribed_mod_ids.clone();
    let mut warnings = 0;

    // An id in both the subscription set and the unsubscribe queue should
    // not occur; the unsubscribe intent is authoritative.
    for id in user.queued_unsubscribes.clone() {
        if local_only.remove(&id) {
            warn!(mod_id = %id, "active subscription found in the unsubscribe queue, removing");
            user.subscribed_mod_ids.remove(&id);
            warnings += 1;
        }
    }

    let mut seen = BTreeSet::new();
    let mut fresh: Vec<ModProfile> = Vec::new();
    for profile in remote {
        let id = profile.id;
        if !seen.insert(id) {
            continue;
        }

        if user.queued_subscribes.remove(&id) {
            // The queued subscribe has round-tripped; nothing new here.
            user.subscribed_mod_ids.insert(id);
            local_only.remove(&id);
            continue;
        }
        if user.queued_unsubscribes.contains(&id) {
            continue;
        }
        if local_only.remove(&id) {
            continue;
        }
        fresh.push(profile);
    }

    // Whatever the server no longer lists is gone, unless a subscribe for
    // it is still waiting to be pushed.
    for id in local_only {
        if !user.queued_subscribes.contains(&id) {
            user.subscribed_mod_ids.remove(&id);
        }
    }

    for profile in &fresh {
        user.subscribed_mod_ids.insert(profile.id);
    }

    (fresh, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GameId;

    fn profile(id: u32) -> ModProfile {
        ModProfile {
            id: ModId(id),
            game_id: GameId(1),
            name: format!("mod-{id}"),
            logo_url: None,
            date_updated: 0,
        }
    }

    fn user_with(
        subscribed: &[u32],
        queued_subs: &[u32],
        queued_unsubs: &[u32],
    ) -> LocalUser {
        let mut user = LocalUser::default();
        user.authenticate("token");
        user.subscribed_mod_ids = subscribed.iter().map(|i| ModId(*i)).collect();
        user.queued_subscribes = queued_subs.iter().map(|i| ModId(*i)).collect();
        user.queued_unsubscribes = queued_unsubs.iter().map(|i| ModId(*i)).collect();
        user
    }

    #[test]
    fn reclassification_covers_conflict_and_gone() {
        assert!(is_effectively_pushed(&ApiError::from_status(
            400,
            "already subscribed"
        )));
        assert!(is_effectively_pushed(&ApiError::from_status(
            404,
            "mod unavailable"
        )));
        assert!(!is_effectively_pushed(&ApiError::from_status(500, "oops")));
        assert!(!is_effectively_pushed(&ApiError::connection("down")));
    }

    #[test]
    fn reconcile_confirms_queued_subscribe_without_reporting_it() {
        let mut user = user_with(&[1, 2], &[3], &[2]);

        let (fresh, warnings) =
            reconcile_remote(&mut user, vec![profile(1), profile(3)]);

        assert!(fresh.is_empty());
        assert_eq!(warnings, 1);
        assert_eq!(
            user.subscribed_mod_ids,
            [ModId(1), ModId(3)].into_iter().collect()
        );
        assert!(user.queued_subscribes.is_empty());
        assert_eq!(
            user.queued_unsubscribes,
            [ModId(2)].into_iter().collect()
        );
    }

    #[test]
    fn reconcile_reports_only_genuinely_new_subscriptions() {
        let mut user = user_with(&[1], &[], &[]);

        let (fresh, _) = reconcile_remote(&mut user, vec![profile(1), profile(9)]);

        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].id, ModId(9));
        assert_eq!(
            user.subscribed_mod_ids,
            [ModId(1), ModId(9)].into_iter().collect()
        );
    }

    #[test]
    fn reconcile_drops_local_subscriptions_the_server_no_longer_lists() {
        let mut user = user_with(&[1, 2], &[], &[]);

        let (fresh, _) = reconcile_remote(&mut user, vec![profile(1)]);

        assert!(fresh.is_empty());
        assert_eq!(user.subscribed_mod_ids, [ModId(1)].into_iter().collect());
    }

    #[test]
    fn reconcile_keeps_optimistic_subscribes_missing_remotely() {
        // The subscribe for 5 has not round-tripped yet; an empty remote
        // list must not delete it.
        let mut user = user_with(&[5], &[5], &[]);

        let (fresh, _) = reconcile_remote(&mut user, Vec::new());

        assert!(fresh.is_empty());
        assert_eq!(user.subscribed_mod_ids, [ModId(5)].into_iter().collect());
        assert_eq!(user.queued_subscribes, [ModId(5)].into_iter().collect());
    }

    #[test]
    fn reconcile_lets_pending_unsubscribe_win_over_stale_remote() {
        let mut user = user_with(&[], &[], &[4]);

        let (fresh, _) = reconcile_remote(&mut user, vec![profile(4)]);

        assert!(fresh.is_empty());
        assert!(!user.is_subscribed(ModId(4)));
        assert_eq!(
            user.queued_unsubscribes,
            [ModId(4)].into_iter().collect()
        );
    }

    #[test]
    fn reconcile_ignores_duplicate_remote_entries() {
        let mut user = user_with(&[], &[], &[]);

        let (fresh, _) =
            reconcile_remote(&mut user, vec![profile(7), profile(7), profile(7)]);

        assert_eq!(fresh.len(), 1);
        assert_eq!(user.subscribed_mod_ids, [ModId(7)].into_iter().collect());
    }
}

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::model::{ModId, UserProfile};

pub const USER_DATA_SCHEMA_VERSION: u32 = 1;

/// Where the session currently stands with the remote service.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AuthenticationState {
    /// No session credential at all.
    NoToken,
    /// A credential exists but the server has rejected it; only a fresh
    /// authentication clears this.
    RejectedToken,
    Active,
}

/// The persisted record for the local user.
///
/// `subscribed_mod_ids` is the local belief of the remote subscription set;
/// the two queues hold intents not yet confirmed against the server. A mod
/// id is never in both queues at once: queueing one side cancels the other.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalUser {
    pub schema_version: u32,
    pub oauth_token: Option<String>,
    pub was_token_rejected: bool,
    pub profile: Option<UserProfile>,
    /// Ordered for persistence stability; membership is what matters.
    pub enabled_mod_ids: Vec<ModId>,
    pub subscribed_mod_ids: BTreeSet<ModId>,
    pub queued_subscribes: BTreeSet<ModId>,
    pub queued_unsubscribes: BTreeSet<ModId>,
}

impl Default for LocalUser {
    fn default() -> Self {
        Self {
            schema_version: USER_DATA_SCHEMA_VERSION,
            oauth_token: None,
            was_token_rejected: false,
            profile: None,
            enabled_mod_ids: Vec::new(),
            subscribed_mod_ids: BTreeSet::new(),
            queued_subscribes: BTreeSet::new(),
            queued_unsubscribes: BTreeSet::new(),
        }
    }
}

impl LocalUser {
    #[must_use]
    pub fn authentication_state(&self) -> AuthenticationState {
        match &self.oauth_token {
            None => AuthenticationState::NoToken,
            Some(_) if self.was_token_rejected => AuthenticationState::RejectedToken,
            Some(_) => AuthenticationState::Active,
        }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.authentication_state() == AuthenticationState::Active
    }

    pub fn authenticate(&mut self, token: impl Into<String>) {
        self.oauth_token = Some(token.into());
        self.was_token_rejected = false;
    }

    pub fn mark_token_rejected(&mut self) {
        if self.oauth_token.is_some() {
            self.was_token_rejected = true;
        }
    }

    pub fn log_out(&mut self) {
        *self = Self::default();
    }

    #[must_use]
    pub fn is_subscribed(&self, id: ModId) -> bool {
        self.subscribed_mod_ids.contains(&id)
    }

    /// Records a local subscribe intent. Returns `false` when already
    /// subscribed (no state change).
    ///
    /// A pending unsubscribe for the same id is cancelled instead of
    /// queueing a subscribe: the server still believes the subscription
    /// exists, so there is nothing left to push.
    pub fn subscribe(&mut self, id: ModId) -> bool {
        if !self.subscribed_mod_ids.insert(id) {
            return false;
        }

        if !self.queued_unsubscribes.remove(&id) {
            self.queued_subscribes.insert(id);
        }
        true
    }

    /// Records a local unsubscribe intent. Returns `false` when not
    /// subscribed (no state change). Mirrors [`Self::subscribe`].
    pub fn unsubscribe(&mut self, id: ModId) -> bool {
        if !self.subscribed_mod_ids.remove(&id) {
            return false;
        }

        if !self.queued_subscribes.remove(&id) {
            self.queued_unsubscribes.insert(id);
        }
        true
    }

    #[must_use]
    pub fn has_queued_changes(&self) -> bool {
        !self.queued_subscribes.is_empty() || !self.queued_unsubscribes.is_empty()
    }

    pub fn enable_mod(&mut self, id: ModId) -> bool {
        if self.enabled_mod_ids.contains(&id) {
            return false;
        }
        self.enabled_mod_ids.push(id);
        true
    }

    pub fn disable_mod(&mut self, id: ModId) -> bool {
        let before = self.enabled_mod_ids.len();
        self.enabled_mod_ids.retain(|enabled| *enabled != id);
        self.enabled_mod_ids.len() != before
    }

    /// Ids violating the rule that a queued unsubscribe never coexists with
    /// an active subscription. Non-empty only after a bug or a torn write;
    /// callers report these as warnings and clean them up during a pull.
    #[must_use]
    pub fn invariant_violations(&self) -> Vec<ModId> {
        self.subscribed_mod_ids
            .intersection(&self.queued_unsubscribes)
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn subscribe_then_unsubscribe_restores_clean_state() {
        let mut user = LocalUser::default();

        assert!(user.subscribe(ModId(7)));
        assert!(user.unsubscribe(ModId(7)));

        assert_eq!(user, LocalUser::default());
    }

    #[test]
    fn subscribe_queues_a_push() {
        let mut user = LocalUser::default();
        user.subscribe(ModId(1));

        assert!(user.is_subscribed(ModId(1)));
        assert!(user.queued_subscribes.contains(&ModId(1)));
        assert!(user.queued_unsubscribes.is_empty());
    }

    #[test]
    fn subscribe_is_idempotent() {
        let mut user = LocalUser::default();
        assert!(user.subscribe(ModId(1)));
        assert!(!user.subscribe(ModId(1)));
        assert_eq!(user.queued_subscribes.len(), 1);
    }

    #[test]
    fn unsubscribing_a_confirmed_subscription_queues_an_unsubscribe() {
        let mut user = LocalUser::default();
        // Simulate a subscription already confirmed by the server.
        user.subscribed_mod_ids.insert(ModId(4));

        assert!(user.unsubscribe(ModId(4)));
        assert!(!user.is_subscribed(ModId(4)));
        assert!(user.queued_unsubscribes.contains(&ModId(4)));
    }

    #[test]
    fn resubscribing_cancels_a_pending_unsubscribe_without_queueing() {
        let mut user = LocalUser::default();
        user.subscribed_mod_ids.insert(ModId(4));
        user.unsubscribe(ModId(4));

        assert!(user.subscribe(ModId(4)));
        assert!(user.is_subscribed(ModId(4)));
        assert!(user.queued_subscribes.is_empty());
        assert!(user.queued_unsubscribes.is_empty());
    }

    #[test]
    fn unsubscribing_an_unknown_mod_is_a_noop() {
        let mut user = LocalUser::default();
        assert!(!user.unsubscribe(ModId(99)));
        assert_eq!(user, LocalUser::default());
    }

    #[test]
    fn enabled_mods_stay_ordered_and_unique() {
        let mut user = LocalUser::default();
        assert!(user.enable_mod(ModId(3)));
        assert!(user.enable_mod(ModId(1)));
        assert!(!user.enable_mod(ModId(3)));
        assert_eq!(user.enabled_mod_ids, vec![ModId(3), ModId(1)]);

        assert!(user.disable_mod(ModId(3)));
        assert!(!user.disable_mod(ModId(3)));
        assert_eq!(user.enabled_mod_ids, vec![ModId(1)]);
    }

    #[test]
    fn token_rejection_lifecycle() {
        let mut user = LocalUser::default();
        assert_eq!(user.authentication_state(), AuthenticationState::NoToken);

        // Rejection without a token is meaningless and must not stick.
        user.mark_token_rejected();
        assert_eq!(user.authentication_state(), AuthenticationState::NoToken);

        user.authenticate("tok-1");
        assert_eq!(user.authentication_state(), AuthenticationState::Active);

        user.mark_token_rejected();
        assert_eq!(
            user.authentication_state(),
            AuthenticationState::RejectedToken
        );

        user.authenticate("tok-2");
        assert_eq!(user.authentication_state(), AuthenticationState::Active);
        assert!(!user.was_token_rejected);
    }

    proptest! {
        // The two queues are mutually exclusive under any call sequence,
        // and a queued unsubscribe never coexists with a subscription.
        #[test]
        fn queues_stay_mutually_exclusive(
            ops in proptest::collection::vec((any::<bool>(), 0u32..8), 0..64)
        ) {
            let mut user = LocalUser::default();
            for (subscribe, raw_id) in ops {
                let id = ModId(raw_id);
                if subscribe {
                    user.subscribe(id);
                } else {
                    user.unsubscribe(id);
                }

                prop_assert!(user
                    .queued_subscribes
                    .intersection(&user.queued_unsubscribes)
                    .next()
                    .is_none());
                prop_assert!(user.invariant_violations().is_empty());
            }
        }

        #[test]
        fn toggle_roundtrip_from_clean_state(raw_id in 0u32..1000) {
            let mut user = LocalUser::default();
            user.subscribe(ModId(raw_id));
            user.unsubscribe(ModId(raw_id));
            prop_assert_eq!(user, LocalUser::default());
        }
    }
}

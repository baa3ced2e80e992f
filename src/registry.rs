//! In-process job registry.
//!
//! Guarantees at-most-one concurrent sync per configuration via exclusive
//! claims, tracks heartbeats for the stale sweep, and detects
//! instance-pair conflicts so two mirrors referencing the same pair of
//! instances in opposite roles do not run simultaneously. Pair conflicts are
//! advisory throttling only; the loop-prevention label is what guarantees
//! data correctness.
//!
//! The claim mutex guards in-memory state only and is never held across an
//! await point.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// Normalized (instance, instance) key: both directions of a mirror pair map
/// to the same key.
pub type PairKey = (Uuid, Uuid);

pub fn pair_key(a: Uuid, b: Uuid) -> PairKey {
    if a <= b { (a, b) } else { (b, a) }
}

/// An exclusive claim held by one running job.
#[derive(Debug, Clone)]
pub struct Claim {
    pub job_id: Uuid,
    pub pair: PairKey,
    pub claimed_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    /// Another job already holds the claim for this configuration.
    AlreadyClaimed,
    /// A mirror over the same instance pair is currently running.
    PairBusy,
}

#[derive(Default)]
pub struct JobRegistry {
    claims: Mutex<HashMap<Uuid, Claim>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt to claim exclusive execution for `config_id`.
    pub fn try_claim(
        &self,
        config_id: Uuid,
        job_id: Uuid,
        pair: PairKey,
        now: DateTime<Utc>,
    ) -> ClaimOutcome {
        let mut claims = self.lock();
        if claims.contains_key(&config_id) {
            return ClaimOutcome::AlreadyClaimed;
        }
        if claims.values().any(|claim| claim.pair == pair) {
            return ClaimOutcome::PairBusy;
        }
        claims.insert(
            config_id,
            Claim {
                job_id,
                pair,
                claimed_at: now,
                heartbeat_at: now,
            },
        );
        ClaimOutcome::Claimed
    }

    /// Release the claim, provided `job_id` still owns it. A claim that was
    /// force-released and re-acquired by a newer job is left alone.
    pub fn release(&self, config_id: Uuid, job_id: Uuid) {
        let mut claims = self.lock();
        if claims
            .get(&config_id)
            .is_some_and(|claim| claim.job_id == job_id)
        {
            claims.remove(&config_id);
        }
    }

    /// Refresh the claim's heartbeat.
    pub fn heartbeat(&self, config_id: Uuid, now: DateTime<Utc>) {
        let mut claims = self.lock();
        if let Some(claim) = claims.get_mut(&config_id) {
            claim.heartbeat_at = now;
        }
    }

    pub fn is_claimed(&self, config_id: Uuid) -> bool {
        self.lock().contains_key(&config_id)
    }

    /// Claims whose heartbeat is older than `max_age`.
    pub fn stale_claims(&self, now: DateTime<Utc>, max_age: Duration) -> Vec<(Uuid, Claim)> {
        let claims = self.lock();
        claims
            .iter()
            .filter(|(_, claim)| now - claim.heartbeat_at > max_age)
            .map(|(config_id, claim)| (*config_id, claim.clone()))
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Claim>> {
        self.claims.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claims_are_exclusive_per_config() {
        let registry = JobRegistry::new();
        let config_id = Uuid::new_v4();
        let pair = pair_key(Uuid::new_v4(), Uuid::new_v4());
        let now = Utc::now();

        assert_eq!(
            registry.try_claim(config_id, Uuid::new_v4(), pair, now),
            ClaimOutcome::Claimed
        );
        assert_eq!(
            registry.try_claim(config_id, Uuid::new_v4(), pair, now),
            ClaimOutcome::AlreadyClaimed
        );
    }

    #[test]
    fn opposite_direction_mirrors_conflict() {
        let registry = JobRegistry::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let now = Utc::now();

        assert_eq!(
            registry.try_claim(Uuid::new_v4(), Uuid::new_v4(), pair_key(a, b), now),
            ClaimOutcome::Claimed
        );
        // The reverse direction normalizes to the same pair key.
        assert_eq!(
            registry.try_claim(Uuid::new_v4(), Uuid::new_v4(), pair_key(b, a), now),
            ClaimOutcome::PairBusy
        );
        // An unrelated pair is unaffected.
        assert_eq!(
            registry.try_claim(
                Uuid::new_v4(),
                Uuid::new_v4(),
                pair_key(Uuid::new_v4(), Uuid::new_v4()),
                now
            ),
            ClaimOutcome::Claimed
        );
    }

    #[test]
    fn release_requires_the_owning_job() {
        let registry = JobRegistry::new();
        let config_id = Uuid::new_v4();
        let job_id = Uuid::new_v4();
        let pair = pair_key(Uuid::new_v4(), Uuid::new_v4());
        let now = Utc::now();

        registry.try_claim(config_id, job_id, pair, now);
        registry.release(config_id, Uuid::new_v4());
        assert!(registry.is_claimed(config_id));

        registry.release(config_id, job_id);
        assert!(!registry.is_claimed(config_id));
    }

    #[test]
    fn stale_claims_are_found_by_heartbeat_age() {
        let registry = JobRegistry::new();
        let config_id = Uuid::new_v4();
        let job_id = Uuid::new_v4();
        let pair = pair_key(Uuid::new_v4(), Uuid::new_v4());
        let claimed = Utc::now();

        registry.try_claim(config_id, job_id, pair, claimed);

        let later = claimed + Duration::minutes(90);
        let stale = registry.stale_claims(later, Duration::hours(1));
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].0, config_id);

        // A heartbeat refresh rescues the claim.
        registry.heartbeat(config_id, later);
        assert!(
            registry
                .stale_claims(later + Duration::minutes(30), Duration::hours(1))
                .is_empty()
        );
    }
}

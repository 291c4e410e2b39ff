//! Follow recommendations.
//!
//! Three strategies are tried in order and the first one that applies
//! answers the request:
//!
//! | Tier | Applies when | Result |
//! |------|--------------|--------|
//! | Cold start | requester follows nobody | newest registered profiles |
//! | Active users | nobody else follows the requester's followings | most recently active profiles not yet followed |
//! | Weighted | otherwise | users followed by co-followers, ranked by how many co-followers follow them |
//!
//! Any adapter failure discards the partial result and surfaces as
//! [`Error::RecommendationUnavailable`].

use crate::models::{Profile, UserCandidate, UserId};
use crate::storage::traits::GraphAccess;
use crate::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::instrument;

/// The strategy that produced a recommendation list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecommendationTier {
    /// The requester follows nobody.
    ColdStart,
    /// The requester's followings have no other followers.
    ActiveUsers,
    /// Co-follow weighting.
    Weighted,
}

impl RecommendationTier {
    /// Returns the tier name used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ColdStart => "cold_start",
            Self::ActiveUsers => "active_users",
            Self::Weighted => "weighted",
        }
    }
}

impl fmt::Display for RecommendationTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Computes ranked follow suggestions from the follow graph.
pub struct RecommendationService {
    graph: Arc<dyn GraphAccess>,
}

impl RecommendationService {
    /// Creates a new recommendation service.
    #[must_use]
    pub fn new(graph: Arc<dyn GraphAccess>) -> Self {
        Self { graph }
    }

    /// Recommends up to `limit` users for `requester` to follow.
    ///
    /// Candidates are ordered by weight descending; equal weights keep the
    /// order in which the candidates were first discovered. The requester
    /// and everyone they already follow are never included.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RecommendationUnavailable`] wrapping the first
    /// adapter failure.
    #[instrument(skip(self), fields(requester = %requester))]
    pub async fn recommend(&self, requester: &UserId, limit: usize) -> Result<Vec<UserCandidate>> {
        match self.recommend_with_tier(requester, limit).await {
            Ok((tier, candidates)) => {
                tracing::debug!(tier = %tier, count = candidates.len(), "Computed recommendations");
                metrics::counter!("recommendation_requests_total", "tier" => tier.as_str())
                    .increment(1);
                Ok(candidates)
            },
            Err(e) => {
                tracing::warn!(error = %e, "Recommendation failed");
                metrics::counter!("recommendation_failures_total").increment(1);
                Err(Error::RecommendationUnavailable(Box::new(e)))
            },
        }
    }

    /// Like [`Self::recommend`] but also reports which tier answered and
    /// returns adapter errors unwrapped.
    ///
    /// # Errors
    ///
    /// Returns the first adapter error.
    pub async fn recommend_with_tier(
        &self,
        requester: &UserId,
        limit: usize,
    ) -> Result<(RecommendationTier, Vec<UserCandidate>)> {
        let followings = self.graph.followings_of(requester).await?;
        if followings.is_empty() {
            let candidates = self.cold_start(requester, limit).await?;
            return Ok((RecommendationTier::ColdStart, candidates));
        }

        let co_followers = self.graph.users_following(&followings, requester).await?;
        if co_followers.is_empty() {
            let candidates = self.active_users(requester, &followings, limit).await?;
            return Ok((RecommendationTier::ActiveUsers, candidates));
        }

        let candidates = self
            .weighted(requester, &followings, &co_followers, limit)
            .await?;
        Ok((RecommendationTier::Weighted, candidates))
    }

    /// Newest registered profiles, unweighted.
    async fn cold_start(&self, requester: &UserId, limit: usize) -> Result<Vec<UserCandidate>> {
        let profiles = self.graph.recent_profiles(requester, limit).await?;
        Ok(unweighted(profiles, requester, &[], limit))
    }

    /// Most recently active profiles not already followed, unweighted.
    async fn active_users(
        &self,
        requester: &UserId,
        followings: &[UserId],
        limit: usize,
    ) -> Result<Vec<UserCandidate>> {
        let profiles = self
            .graph
            .active_profiles(requester, followings, limit)
            .await?;
        Ok(unweighted(profiles, requester, followings, limit))
    }

    /// Users followed by co-followers, weighted by co-follower count.
    async fn weighted(
        &self,
        requester: &UserId,
        followings: &[UserId],
        co_followers: &[UserId],
        limit: usize,
    ) -> Result<Vec<UserCandidate>> {
        let mut seen = HashSet::new();
        let distinct: Vec<&UserId> = co_followers
            .iter()
            .filter(|u| seen.insert(u.as_str()))
            .collect();

        let mut excluded: HashSet<&UserId> = followings.iter().collect();
        excluded.insert(requester);

        let mut tally = WeightTally::default();
        for co_follower in distinct {
            let targets = self.graph.followings_of(co_follower).await?;
            tally.add_from(&targets, &excluded);
        }

        let ranked = tally.ranked();
        if ranked.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<UserId> = ranked.iter().map(|(id, _)| id.clone()).collect();
        let profiles: HashMap<UserId, Profile> = self
            .graph
            .profiles(&ids)
            .await?
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();

        Ok(ranked
            .into_iter()
            .filter_map(|(user_id, weight)| {
                let profile = profiles.get(&user_id)?;
                Some(UserCandidate {
                    user_id,
                    profile: profile.summary(),
                    weight,
                })
            })
            .take(limit)
            .collect())
    }
}

/// Converts fallback profiles to candidates, dropping duplicates and
/// anything the adapter should not have returned.
fn unweighted(
    profiles: Vec<Profile>,
    requester: &UserId,
    followings: &[UserId],
    limit: usize,
) -> Vec<UserCandidate> {
    let mut seen = HashSet::new();
    profiles
        .iter()
        .filter(|p| &p.id != requester && !followings.contains(&p.id))
        .filter(|p| seen.insert(p.id.clone()))
        .map(UserCandidate::unweighted)
        .take(limit)
        .collect()
}

/// Per-target co-follower counts in first-seen order.
#[derive(Debug, Default)]
struct WeightTally {
    order: Vec<UserId>,
    weights: HashMap<UserId, u32>,
}

impl WeightTally {
    /// Adds one co-follower's followings.
    ///
    /// A co-follower contributes at most one to each target, however many
    /// times the target appears in its list.
    fn add_from(&mut self, targets: &[UserId], excluded: &HashSet<&UserId>) {
        let mut counted = HashSet::new();
        for target in targets {
            if excluded.contains(target) || !counted.insert(target) {
                continue;
            }
            let weight = self.weights.entry(target.clone()).or_insert_with(|| {
                self.order.push(target.clone());
                0
            });
            *weight += 1;
        }
    }

    /// Targets by weight descending; ties keep first-seen order.
    fn ranked(self) -> Vec<(UserId, u32)> {
        let mut ranked: Vec<(UserId, u32)> = self
            .order
            .into_iter()
            .map(|id| {
                let weight = self.weights.get(&id).copied().unwrap_or_default();
                (id, weight)
            })
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked
    }
}

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::debug;

use curio_core::ids::ConversationId;
use curio_core::plan::ResearchPlan;

/// How long a cached plan stays valid.
pub const PLAN_TTL_SECS: i64 = 300;
/// Upper bound on cached plans before eviction kicks in.
pub const PLAN_CACHE_CAPACITY: usize = 512;

struct CachedPlan {
    conversation_id: ConversationId,
    plan: ResearchPlan,
}

/// TTL cache for research plans, keyed by fingerprint.
///
/// The current time is passed in by callers, so expiry is testable without
/// sleeping. At capacity the entry with the oldest `cached_at` goes first.
pub struct PlanCache {
    entries: DashMap<u64, CachedPlan>,
    ttl: Duration,
    capacity: usize,
}

impl Default for PlanCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanCache {
    pub fn new() -> Self {
        Self::with_limits(Duration::seconds(PLAN_TTL_SECS), PLAN_CACHE_CAPACITY)
    }

    pub fn with_limits(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            capacity,
        }
    }

    /// Fresh cached plan for this fingerprint, if any. An expired entry is
    /// removed on the way out.
    pub fn get(&self, fingerprint: u64, now: DateTime<Utc>) -> Option<ResearchPlan> {
        let (fresh, plan) = {
            let entry = self.entries.get(&fingerprint)?;
            let fresh = now.signed_duration_since(entry.plan.cached_at) <= self.ttl;
            (fresh, fresh.then(|| entry.plan.clone()))
        };
        if !fresh {
            self.entries.remove(&fingerprint);
        }
        plan
    }

    /// Cache a plan under its own fingerprint.
    pub fn insert(&self, conversation_id: &ConversationId, plan: ResearchPlan) {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&plan.fingerprint) {
            self.evict_oldest();
        }
        self.entries.insert(
            plan.fingerprint,
            CachedPlan {
                conversation_id: conversation_id.clone(),
                plan,
            },
        );
    }

    /// Drop every cached plan for one conversation.
    pub fn invalidate(&self, conversation_id: &ConversationId) {
        self.entries
            .retain(|_, cached| cached.conversation_id != *conversation_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.plan.cached_at)
            .map(|entry| *entry.key());
        if let Some(fingerprint) = oldest {
            debug!(fingerprint, "plan cache full, evicting oldest entry");
            self.entries.remove(&fingerprint);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_at(fingerprint: u64, cached_at: DateTime<Utc>) -> ResearchPlan {
        ResearchPlan {
            should_search: true,
            queries: vec!["rust release schedule".into()],
            confidence: 0.8,
            context_summary: String::new(),
            fingerprint,
            cached_at,
        }
    }

    #[test]
    fn fresh_entry_hits() {
        let cache = PlanCache::new();
        let conversation = ConversationId::new();
        let now = Utc::now();
        cache.insert(&conversation, plan_at(7, now));

        let hit = cache.get(7, now + Duration::seconds(10)).unwrap();
        assert_eq!(hit.fingerprint, 7);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn ttl_boundary_is_inclusive() {
        let cache = PlanCache::new();
        let conversation = ConversationId::new();
        let now = Utc::now();
        cache.insert(&conversation, plan_at(7, now));

        assert!(cache.get(7, now + Duration::seconds(PLAN_TTL_SECS)).is_some());
    }

    #[test]
    fn expired_entry_is_dropped() {
        let cache = PlanCache::new();
        let conversation = ConversationId::new();
        let now = Utc::now();
        cache.insert(&conversation, plan_at(7, now));

        let later = now + Duration::seconds(PLAN_TTL_SECS + 1);
        assert!(cache.get(7, later).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn capacity_evicts_the_oldest() {
        let cache = PlanCache::with_limits(Duration::seconds(PLAN_TTL_SECS), 2);
        let conversation = ConversationId::new();
        let now = Utc::now();
        cache.insert(&conversation, plan_at(1, now - Duration::seconds(30)));
        cache.insert(&conversation, plan_at(2, now - Duration::seconds(20)));
        cache.insert(&conversation, plan_at(3, now - Duration::seconds(10)));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(1, now).is_none());
        assert!(cache.get(2, now).is_some());
        assert!(cache.get(3, now).is_some());
    }

    #[test]
    fn reinserting_a_cached_fingerprint_evicts_nothing() {
        let cache = PlanCache::with_limits(Duration::seconds(PLAN_TTL_SECS), 2);
        let conversation = ConversationId::new();
        let now = Utc::now();
        cache.insert(&conversation, plan_at(1, now - Duration::seconds(30)));
        cache.insert(&conversation, plan_at(2, now - Duration::seconds(20)));
        cache.insert(&conversation, plan_at(2, now));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(1, now).is_some());
        assert_eq!(cache.get(2, now).unwrap().cached_at, now);
    }

    #[test]
    fn invalidate_only_touches_one_conversation() {
        let cache = PlanCache::new();
        let ours = ConversationId::new();
        let theirs = ConversationId::new();
        let now = Utc::now();
        cache.insert(&ours, plan_at(1, now));
        cache.insert(&ours, plan_at(2, now));
        cache.insert(&theirs, plan_at(3, now));

        cache.invalidate(&ours);
        assert!(cache.get(1, now).is_none());
        assert!(cache.get(2, now).is_none());
        assert!(cache.get(3, now).is_some());
    }
}

//! Content-addressed, indexed, watchable policy store (module C).
//!
//! Policies live in memory behind concurrent maps; every mutation recomputes
//! the affected indexes under a single coarse lock so readers always observe
//! a consistent, already-committed snapshot (lock-free against that
//! snapshot once acquired, matching the read-mostly contract in the spec).
//! Subscribers receive change events over a bounded channel; a full channel
//! drops the event rather than block the writer.

pub mod types;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use sentra_core::pattern::glob_matches;
use sentra_core::policy::validator::{validate_policy, ValidationError};
use sentra_core::policy::PolicyKind;
use sentra_core::{AuthzError, Result};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

pub use types::{BulkPutOutcome, ChangeEvent, ChangeEventType, QueryFilter, SortDirection, SortField, StoredPolicy};

const SUBSCRIPTION_CHANNEL_CAPACITY: usize = 256;

fn content_hash(policy: &PolicyKind) -> String {
    let canonical = serde_json::to_vec(policy).unwrap_or_default();
    let digest = Sha256::digest(&canonical);
    hex::encode(&digest[..16])
}

/// Handle returned by `watch`; dropping it (or calling `unwatch`) stops
/// delivery to this subscription.
pub struct Subscription {
    id: u64,
    store: Arc<PolicyStoreInner>,
}

impl Subscription {
    pub fn unwatch(self) {
        self.store.subscribers.remove(&self.id);
    }
}

struct PolicyStoreInner {
    policies: DashMap<String, StoredPolicy>,
    by_kind: DashMap<String, HashSet<String>>,
    by_resource_kind: DashMap<String, HashSet<String>>,
    by_name_kind: DashMap<(String, String), String>,
    by_principal: DashMap<String, String>,
    subscribers: DashMap<u64, mpsc::Sender<ChangeEvent>>,
    next_sub_id: AtomicU64,
    write_lock: RwLock<()>,
}

/// In-memory policy store. Cloning is cheap (shares the same inner state).
#[derive(Clone)]
pub struct PolicyStore {
    inner: Arc<PolicyStoreInner>,
}

impl PolicyStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PolicyStoreInner {
                policies: DashMap::new(),
                by_kind: DashMap::new(),
                by_resource_kind: DashMap::new(),
                by_name_kind: DashMap::new(),
                by_principal: DashMap::new(),
                subscribers: DashMap::new(),
                next_sub_id: AtomicU64::new(1),
                write_lock: RwLock::new(()),
            }),
        }
    }

    /// Upsert by `(kind, name)`. Recomputes the content hash; preserves
    /// `createdAt` on update; emits `created` or `updated`.
    pub fn put(&self, policy: PolicyKind, source: Option<String>, labels: std::collections::BTreeMap<String, String>) -> Result<StoredPolicy> {
        validate_policy(&policy).map_err(validation_to_authz_err)?;

        let kind = policy.store_kind().to_string();
        let name = policy.name();
        let id = StoredPolicy::make_id(&kind, &name);
        let new_hash = content_hash(&policy);

        let _guard = self.inner.write_lock.write();
        let now = Utc::now();

        let version = policy_version(&policy);

        let (stored, event_type, previous_hash) =
            if let Some(mut existing) = self.inner.policies.get_mut(&id) {
                let previous_hash = existing.content_hash.clone();
                existing.policy = policy;
                existing.content_hash = new_hash.clone();
                existing.version = version;
                existing.updated_at = now;
                existing.source = source;
                existing.labels = labels;
                (existing.clone(), ChangeEventType::Updated, Some(previous_hash))
            } else {
                let stored = StoredPolicy {
                    id: id.clone(),
                    kind: kind.clone(),
                    name: name.clone(),
                    policy,
                    content_hash: new_hash.clone(),
                    version,
                    disabled: false,
                    created_at: now,
                    updated_at: now,
                    source,
                    labels,
                };
                self.inner.policies.insert(id.clone(), stored.clone());
                (stored, ChangeEventType::Created, None)
            };

        self.reindex(&id, &kind, &stored);
        self.broadcast(ChangeEvent {
            event_type,
            policy_id: id,
            policy_name: name,
            policy_kind: kind,
            previous_hash,
            new_hash: Some(new_hash),
            timestamp: now,
        });

        Ok(stored)
    }

    fn reindex(&self, id: &str, kind: &str, stored: &StoredPolicy) {
        self.inner
            .by_kind
            .entry(kind.to_string())
            .or_default()
            .insert(id.to_string());
        self.inner
            .by_name_kind
            .insert((stored.name.clone(), kind.to_string()), id.to_string());

        if let PolicyKind::ResourcePolicy(rp) = &stored.policy {
            self.inner
                .by_resource_kind
                .entry(rp.resource.clone())
                .or_default()
                .insert(id.to_string());
        }
        if let PolicyKind::PrincipalPolicy(pp) = &stored.policy {
            self.inner.by_principal.insert(pp.principal.clone(), id.to_string());
        }
    }

    pub fn get(&self, id: &str) -> Option<StoredPolicy> {
        self.inner.policies.get(id).map(|r| r.clone())
    }

    pub fn get_by_name(&self, name: &str, kind: &str) -> Option<StoredPolicy> {
        let id = self.inner.by_name_kind.get(&(name.to_string(), kind.to_string()))?;
        self.get(&id)
    }

    pub fn query(&self, filter: &QueryFilter) -> Vec<StoredPolicy> {
        let mut results: Vec<StoredPolicy> = self
            .inner
            .policies
            .iter()
            .map(|r| r.clone())
            .filter(|p| filter.kinds.as_ref().map(|ks| ks.iter().any(|k| k == &p.kind)).unwrap_or(true))
            .filter(|p| {
                filter
                    .resource_kind
                    .as_ref()
                    .map(|rk| matches!(&p.policy, PolicyKind::ResourcePolicy(rp) if &rp.resource == rk))
                    .unwrap_or(true)
            })
            .filter(|p| filter.name_glob.as_ref().map(|g| glob_matches(&p.name, g)).unwrap_or(true))
            .filter(|p| filter.disabled.map(|d| p.disabled == d).unwrap_or(true))
            .filter(|p| filter.labels.iter().all(|(k, v)| p.labels.get(k) == Some(v)))
            .collect();

        if let Some(field) = filter.sort_by {
            results.sort_by(|a, b| match field {
                SortField::Name => a.name.cmp(&b.name),
                SortField::CreatedAt => a.created_at.cmp(&b.created_at),
                SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            });
            if filter.sort_direction == SortDirection::Descending {
                results.reverse();
            }
        }

        let offset = filter.offset.min(results.len());
        let end = match filter.limit {
            Some(limit) => (offset + limit).min(results.len()),
            None => results.len(),
        };
        results[offset..end].to_vec()
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let _guard = self.inner.write_lock.write();
        let removed = self
            .inner
            .policies
            .remove(id)
            .ok_or_else(|| AuthzError::NotFound(id.to_string()))?
            .1;
        self.unindex(id, &removed);
        self.broadcast(ChangeEvent {
            event_type: ChangeEventType::Deleted,
            policy_id: id.to_string(),
            policy_name: removed.name,
            policy_kind: removed.kind,
            previous_hash: Some(removed.content_hash),
            new_hash: None,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    fn unindex(&self, id: &str, stored: &StoredPolicy) {
        if let Some(mut set) = self.inner.by_kind.get_mut(&stored.kind) {
            set.remove(id);
        }
        self.inner.by_name_kind.remove(&(stored.name.clone(), stored.kind.clone()));
        if let PolicyKind::ResourcePolicy(rp) = &stored.policy {
            if let Some(mut set) = self.inner.by_resource_kind.get_mut(&rp.resource) {
                set.remove(id);
            }
        }
        if let PolicyKind::PrincipalPolicy(pp) = &stored.policy {
            self.inner.by_principal.remove(&pp.principal);
        }
    }

    pub fn disable(&self, id: &str) -> Result<()> {
        self.set_disabled(id, true, ChangeEventType::Disabled)
    }

    pub fn enable(&self, id: &str) -> Result<()> {
        self.set_disabled(id, false, ChangeEventType::Enabled)
    }

    fn set_disabled(&self, id: &str, disabled: bool, event_type: ChangeEventType) -> Result<()> {
        let _guard = self.inner.write_lock.write();
        let mut entry = self
            .inner
            .policies
            .get_mut(id)
            .ok_or_else(|| AuthzError::NotFound(id.to_string()))?;
        if entry.disabled == disabled {
            // No-op idempotence: do not emit a duplicate event.
            return Ok(());
        }
        entry.disabled = disabled;
        entry.updated_at = Utc::now();
        let name = entry.name.clone();
        let kind = entry.kind.clone();
        let hash = entry.content_hash.clone();
        drop(entry);

        self.broadcast(ChangeEvent {
            event_type,
            policy_id: id.to_string(),
            policy_name: name,
            policy_kind: kind,
            previous_hash: Some(hash.clone()),
            new_hash: Some(hash),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Fast-path: all enabled `ResourcePolicy` documents for `kind`.
    pub fn get_policies_for_resource(&self, kind: &str) -> Vec<StoredPolicy> {
        self.inner
            .by_resource_kind
            .get(kind)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.get(id))
                    .filter(|p| !p.disabled)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Fast-path: all enabled `DerivedRoles` documents.
    pub fn get_derived_roles(&self) -> Vec<StoredPolicy> {
        self.inner
            .by_kind
            .get("DerivedRoles")
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.get(id))
                    .filter(|p| !p.disabled)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Fast-path: the enabled `PrincipalPolicy` for `principal_id`, if any.
    pub fn get_principal_policy(&self, principal_id: &str) -> Option<StoredPolicy> {
        let id = self.inner.by_principal.get(principal_id)?;
        self.get(&id).filter(|p| !p.disabled)
    }

    /// Validates and applies every policy in-memory: either all succeed or
    /// none are applied.
    pub fn bulk_put(&self, policies: Vec<PolicyKind>) -> Result<BulkPutOutcome> {
        for (i, policy) in policies.iter().enumerate() {
            if let Err(e) = validate_policy(policy) {
                return Err(AuthzError::InvalidPolicy(format!("item {i}: {e}")));
            }
        }

        let mut outcome = BulkPutOutcome::default();
        for policy in policies {
            let name = policy.name();
            match self.put(policy, None, Default::default()) {
                Ok(stored) => outcome.put.push(stored.id),
                Err(e) => outcome.errors.push((outcome.put.len(), format!("{name}: {e}"))),
            }
        }
        Ok(outcome)
    }

    /// Register an in-process listener. Delivery is via a bounded channel;
    /// a full channel drops the event rather than block `put`/`delete`.
    pub fn watch(&self) -> (Subscription, mpsc::Receiver<ChangeEvent>) {
        let id = self.inner.next_sub_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CHANNEL_CAPACITY);
        self.inner.subscribers.insert(id, tx);
        (
            Subscription {
                id,
                store: self.inner.clone(),
            },
            rx,
        )
    }

    fn broadcast(&self, event: ChangeEvent) {
        for entry in self.inner.subscribers.iter() {
            if let Err(mpsc::error::TrySendError::Full(_)) = entry.value().try_send(event.clone()) {
                tracing::warn!(policy_id = %event.policy_id, "policy store subscription queue full, dropping event");
            }
        }
    }
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

fn validation_to_authz_err(e: ValidationError) -> AuthzError {
    AuthzError::InvalidPolicy(e.to_string())
}

fn policy_version(policy: &PolicyKind) -> String {
    match policy {
        PolicyKind::ResourcePolicy(p) => p.version.clone(),
        PolicyKind::PrincipalPolicy(p) => p.version.clone(),
        PolicyKind::DerivedRoles(_) => "v1".to_string(),
    }
}

mod hex {
    pub fn encode(bytes: &[u8]) -> String {
        let mut s = String::with_capacity(bytes.len() * 2);
        for b in bytes {
            s.push_str(&format!("{b:02x}"));
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentra_core::policy::types::{Rule, RuleEffect};

    fn resource_policy(resource: &str, rules: Vec<Rule>) -> PolicyKind {
        PolicyKind::ResourcePolicy(sentra_core::policy::ResourcePolicy {
            resource: resource.to_string(),
            version: "default".to_string(),
            scope: None,
            rules,
        })
    }

    fn allow_rule() -> Rule {
        Rule {
            actions: vec!["read".into()],
            effect: RuleEffect::Allow,
            roles: Some(vec!["viewer".into()]),
            derived_roles: None,
            condition: None,
            name: None,
        }
    }

    #[test]
    fn put_then_get_round_trips() {
        let store = PolicyStore::new();
        let policy = resource_policy("document", vec![allow_rule()]);
        let stored = store.put(policy.clone(), None, Default::default()).unwrap();
        let fetched = store.get(&stored.id).unwrap();
        assert_eq!(fetched.policy, policy);
    }

    #[test]
    fn identical_documents_hash_equal_single_bit_change_differs() {
        let a = resource_policy("document", vec![allow_rule()]);
        let mut b_rule = allow_rule();
        b_rule.actions.push("write".into());
        let b = resource_policy("document", vec![b_rule]);
        assert_eq!(content_hash(&a), content_hash(&a));
        assert_ne!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn put_preserves_created_at_on_update() {
        let store = PolicyStore::new();
        let policy = resource_policy("document", vec![allow_rule()]);
        let first = store.put(policy.clone(), None, Default::default()).unwrap();
        let second = store.put(policy, None, Default::default()).unwrap();
        assert_eq!(first.created_at, second.created_at);
    }

    #[test]
    fn cyclic_derived_roles_rejected_without_mutating_store() {
        let store = PolicyStore::new();
        let cyclic = PolicyKind::DerivedRoles(sentra_core::policy::DerivedRolesPolicy {
            name: "common_roles".into(),
            definitions: vec![
                sentra_core::policy::DerivedRoleDef {
                    name: "a".into(),
                    parent_roles: vec!["b".into()],
                    condition: None,
                },
                sentra_core::policy::DerivedRoleDef {
                    name: "b".into(),
                    parent_roles: vec!["a".into()],
                    condition: None,
                },
            ],
        });
        assert!(store.put(cyclic, None, Default::default()).is_err());
        assert!(store.query(&QueryFilter::default()).is_empty());
    }

    #[test]
    fn disable_is_idempotent_and_disabled_policies_excluded_from_fast_path() {
        let store = PolicyStore::new();
        let policy = resource_policy("document", vec![allow_rule()]);
        let stored = store.put(policy, None, Default::default()).unwrap();
        store.disable(&stored.id).unwrap();
        store.disable(&stored.id).unwrap();
        assert!(store.get_policies_for_resource("document").is_empty());
        store.enable(&stored.id).unwrap();
        assert_eq!(store.get_policies_for_resource("document").len(), 1);
    }

    #[tokio::test]
    async fn watch_receives_change_events_in_order() {
        let store = PolicyStore::new();
        let (_sub, mut rx) = store.watch();
        let policy = resource_policy("document", vec![allow_rule()]);
        let stored = store.put(policy, None, Default::default()).unwrap();
        store.disable(&stored.id).unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.event_type, ChangeEventType::Created);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.event_type, ChangeEventType::Disabled);
    }
}

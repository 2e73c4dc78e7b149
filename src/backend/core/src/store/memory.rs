//! Process-local [`SharedStore`] on a `DashMap`.
//!
//! Each key is guarded by its shard lock, so every operation is atomic per
//! key. Expiry is lazy: an expired slot is treated as absent and dropped the
//! next time it is touched.

use super::{SetMember, SharedStore};
use crate::clock::{expires_at, until, SharedClock, SystemClock};
use crate::error::{ErrorCode, JobgateError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Set(HashMap<String, DateTime<Utc>>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Slot {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

fn wrong_type(key: &str) -> JobgateError {
    JobgateError::with_internal(
        ErrorCode::StoreError,
        "Operation against a key holding the wrong kind of value",
        format!("WRONGTYPE {}", key),
    )
}

/// In-memory shared store.
pub struct InMemoryStore {
    slots: DashMap<String, Slot>,
    clock: SharedClock,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            slots: DashMap::new(),
            clock,
        }
    }

    /// Run `f` against a live slot. Expired slots read as absent and are dropped.
    fn read<T>(&self, key: &str, f: impl FnOnce(&Slot) -> Result<T>) -> Result<Option<T>> {
        let now = self.clock.now();
        let result = match self.slots.get(key) {
            Some(slot) if !slot.is_expired(now) => Some(f(&slot)?),
            Some(_) => None,
            None => return Ok(None),
        };

        if result.is_none() {
            self.slots.remove_if(key, |_, slot| slot.is_expired(now));
        }
        Ok(result)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SharedStore for InMemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn set_add(&self, key: &str, member: &str, ttl: Duration) -> Result<bool> {
        let now = self.clock.now();
        let mut slot = self.slots.entry(key.to_string()).or_insert_with(|| Slot {
            value: Value::Set(HashMap::new()),
            expires_at: None,
        });
        let slot = slot.value_mut();

        if slot.is_expired(now) {
            slot.value = Value::Set(HashMap::new());
        }

        match &mut slot.value {
            Value::Set(members) => {
                let added = !members.contains_key(member);
                if added {
                    members.insert(member.to_string(), now);
                }
                slot.expires_at = expires_at(now, ttl);
                Ok(added)
            }
            Value::Str(_) => Err(wrong_type(key)),
        }
    }

    async fn set_remove(&self, key: &str, members: &[String]) -> Result<u64> {
        let now = self.clock.now();
        let removed = match self.slots.get_mut(key) {
            Some(mut slot) if !slot.is_expired(now) => match &mut slot.value_mut().value {
                Value::Set(set) => members
                    .iter()
                    .filter(|member| set.remove(member.as_str()).is_some())
                    .count() as u64,
                Value::Str(_) => return Err(wrong_type(key)),
            },
            _ => 0,
        };

        self.slots.remove_if(key, |_, slot| {
            slot.is_expired(now) || matches!(&slot.value, Value::Set(set) if set.is_empty())
        });
        Ok(removed)
    }

    async fn set_count(&self, key: &str) -> Result<u64> {
        let count = self.read(key, |slot| match &slot.value {
            Value::Set(set) => Ok(set.len() as u64),
            Value::Str(_) => Err(wrong_type(key)),
        })?;
        Ok(count.unwrap_or(0))
    }

    async fn set_members(&self, key: &str) -> Result<Vec<SetMember>> {
        let members = self.read(key, |slot| match &slot.value {
            Value::Set(set) => {
                let mut members: Vec<SetMember> = set
                    .iter()
                    .map(|(member, added_at)| SetMember {
                        member: member.clone(),
                        added_at: *added_at,
                    })
                    .collect();
                members.sort_by(|a, b| {
                    a.added_at.cmp(&b.added_at).then_with(|| a.member.cmp(&b.member))
                });
                Ok(members)
            }
            Value::Str(_) => Err(wrong_type(key)),
        })?;
        Ok(members.unwrap_or_default())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let now = self.clock.now();
        let slot = Slot {
            value: Value::Str(value.to_string()),
            expires_at: expires_at(now, ttl),
        };

        match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(slot);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(slot);
                Ok(true)
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.read(key, |slot| match &slot.value {
            Value::Str(value) => Ok(value.clone()),
            Value::Set(_) => Err(wrong_type(key)),
        })
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let now = self.clock.now();
        let ttl = self.read(key, |slot| Ok(slot.expires_at.map(|at| until(now, at))))?;
        Ok(ttl.flatten())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = self.clock.now();
        Ok(self
            .slots
            .remove(key)
            .map_or(false, |(_, slot)| !slot.is_expired(now)))
    }

    async fn delete_if_eq(&self, key: &str, expected: &str) -> Result<bool> {
        let now = self.clock.now();
        let removed = self.slots.remove_if(key, |_, slot| {
            !slot.is_expired(now) && matches!(&slot.value, Value::Str(v) if v == expected)
        });
        Ok(removed.is_some())
    }

    async fn expire_if_eq(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool> {
        let now = self.clock.now();
        match self.slots.get_mut(key) {
            Some(mut slot) if !slot.is_expired(now) => {
                let slot = slot.value_mut();
                if matches!(&slot.value, Value::Str(v) if v == expected) {
                    slot.expires_at = expires_at(now, ttl);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};

    fn store() -> (Arc<ManualClock>, InMemoryStore) {
        let clock = Arc::new(ManualClock::starting_now());
        let store = InMemoryStore::with_clock(clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn test_set_if_absent_respects_ttl() {
        let (clock, store) = store();

        assert!(store.set_if_absent("k", "a", Duration::from_secs(10)).await.unwrap());
        assert!(!store.set_if_absent("k", "b", Duration::from_secs(10)).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some("a".to_string()));

        clock.advance(Duration::from_secs(10));
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.set_if_absent("k", "b", Duration::from_secs(10)).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some("b".to_string()));
    }

    #[tokio::test]
    async fn test_set_add_is_idempotent() {
        let (clock, store) = store();
        let ttl = Duration::from_secs(60);

        assert!(store.set_add("running", "a", ttl).await.unwrap());
        let first = clock.now();
        clock.advance(Duration::from_secs(5));
        assert!(!store.set_add("running", "a", ttl).await.unwrap());
        assert!(store.set_add("running", "b", ttl).await.unwrap());

        let members = store.set_members("running").await.unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].member, "a");
        assert_eq!(members[0].added_at, first);
        assert_eq!(store.set_count("running").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_set_ttl_refreshed_on_add() {
        let (clock, store) = store();
        let ttl = Duration::from_secs(60);

        store.set_add("running", "a", ttl).await.unwrap();
        clock.advance(Duration::from_secs(50));
        store.set_add("running", "b", ttl).await.unwrap();
        clock.advance(Duration::from_secs(50));

        assert_eq!(store.set_count("running").await.unwrap(), 2);

        clock.advance(Duration::from_secs(10));
        assert_eq!(store.set_count("running").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_set_remove_ignores_absent() {
        let (_, store) = store();
        let ttl = Duration::from_secs(60);

        store.set_add("running", "a", ttl).await.unwrap();
        let removed = store
            .set_remove("running", &["a".to_string(), "zzz".to_string()])
            .await
            .unwrap();

        assert_eq!(removed, 1);
        assert_eq!(store.set_count("running").await.unwrap(), 0);
        assert_eq!(store.set_remove("missing", &["a".to_string()]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_compare_and_delete() {
        let (_, store) = store();

        store.set_if_absent("lease", "token-a", Duration::from_secs(60)).await.unwrap();

        assert!(!store.delete_if_eq("lease", "token-b").await.unwrap());
        assert!(store.get("lease").await.unwrap().is_some());
        assert!(store.delete_if_eq("lease", "token-a").await.unwrap());
        assert!(store.get("lease").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_compare_and_expire() {
        let (clock, store) = store();

        store.set_if_absent("lease", "token-a", Duration::from_secs(10)).await.unwrap();
        assert!(!store
            .expire_if_eq("lease", "token-b", Duration::from_secs(100))
            .await
            .unwrap());
        assert!(store
            .expire_if_eq("lease", "token-a", Duration::from_secs(100))
            .await
            .unwrap());

        clock.advance(Duration::from_secs(30));
        assert_eq!(store.ttl("lease").await.unwrap(), Some(Duration::from_secs(70)));
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let (_, store) = store();

        store.set_if_absent("plain", "v", Duration::from_secs(10)).await.unwrap();
        let error = store
            .set_add("plain", "member", Duration::from_secs(10))
            .await
            .unwrap_err();

        assert_eq!(error.code(), ErrorCode::StoreError);
    }

    #[tokio::test]
    async fn test_unrepresentable_ttl_never_expires() {
        let (clock, store) = store();

        assert!(store.set_if_absent("forever", "v", Duration::MAX).await.unwrap());
        assert!(store.set_add("running", "a", Duration::MAX).await.unwrap());
        clock.advance(Duration::from_secs(10 * 365 * 24 * 3600));

        assert_eq!(store.get("forever").await.unwrap(), Some("v".to_string()));
        assert_eq!(store.ttl("forever").await.unwrap(), None);
        assert_eq!(store.set_count("running").await.unwrap(), 1);
        assert!(store.expire_if_eq("forever", "v", Duration::MAX).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete() {
        let (_, store) = store();

        store.set_if_absent("k", "v", Duration::from_secs(10)).await.unwrap();
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
    }
}

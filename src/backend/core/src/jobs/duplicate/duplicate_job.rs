//! Idempotency keys and the dedup record of a single job.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::Duration;

use super::DedupOptions;
use crate::clock::until;
use crate::error::Result;
use crate::jobs::job::{JobDescriptor, JobId};
use crate::store::SharedStore;

/// Recursively sort object keys so equal arguments serialize identically.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// SHA-256 hex of `"{job_kind}:{canonical args}"`.
pub fn idempotency_hash(job_kind: &str, args: &[Value]) -> String {
    let canonical = Value::Array(args.iter().map(canonicalize).collect());
    let mut hasher = Sha256::new();
    hasher.update(job_kind.as_bytes());
    hasher.update(b":");
    hasher.update(canonical.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Store key of the dedup record for this kind and arguments.
pub fn dedup_key(job_kind: &str, args: &[Value]) -> String {
    format!("dedup:{}:{}", job_kind, idempotency_hash(job_kind, args))
}

/// The dedup record as seen from one job.
#[derive(Debug)]
pub struct DuplicateJob<'a> {
    job: &'a JobDescriptor,
    options: &'a DedupOptions,
    key: String,
}

impl<'a> DuplicateJob<'a> {
    pub fn new(job: &'a JobDescriptor, options: &'a DedupOptions) -> Self {
        Self {
            key: dedup_key(&job.job_kind, &job.args),
            job,
            options,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Scheduled jobs only take part when `including_scheduled` is set.
    pub fn applies(&self, now: DateTime<Utc>) -> bool {
        self.options.is_enabled()
            && (self.options.including_scheduled || !self.job.is_scheduled(now))
    }

    /// Record lifetime. A scheduled owner keeps its record until its due
    /// time plus the base TTL.
    pub fn expiry(&self, now: DateTime<Utc>) -> Duration {
        match self.job.scheduled_at {
            Some(at) if self.options.including_scheduled => until(now, at) + self.options.ttl,
            _ => self.options.ttl,
        }
    }

    /// Claim the record, or return the id of the job that already owns it.
    pub async fn check(&self, store: &dyn SharedStore, now: DateTime<Utc>) -> Result<Option<JobId>> {
        let id = self.job.id.as_str();
        let ttl = self.expiry(now);

        // A record can be released between the claim and the read.
        for _ in 0..2 {
            if store.set_if_absent(&self.key, id, ttl).await? {
                return Ok(None);
            }
            if let Some(owner) = store.get(&self.key).await? {
                return Ok((owner != id).then(|| JobId::from(owner)));
            }
        }
        Ok(None)
    }

    /// Delete the record if this job owns it.
    pub async fn release(&self, store: &dyn SharedStore) -> Result<bool> {
        if self.job.is_duplicate() {
            return Ok(false);
        }
        store.delete_if_eq(&self.key, self.job.id.as_str()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use serde_json::json;

    #[test]
    fn test_canonical_hash_ignores_key_order() {
        let a = vec![json!({"b": 1, "a": {"y": 2, "x": 3}}), json!("s")];
        let b = vec![json!({"a": {"x": 3, "y": 2}, "b": 1}), json!("s")];

        assert_eq!(idempotency_hash("export", &a), idempotency_hash("export", &b));
        assert_ne!(idempotency_hash("export", &a), idempotency_hash("import", &a));
        assert_ne!(
            idempotency_hash("export", &[json!(1), json!(2)]),
            idempotency_hash("export", &[json!(2), json!(1)])
        );
    }

    #[test]
    fn test_dedup_key_layout() {
        let key = dedup_key("export", &[json!(1)]);
        assert!(key.starts_with("dedup:export:"));
        assert_eq!(key.len(), "dedup:export:".len() + 64);
    }

    #[test]
    fn test_expiry_for_scheduled_owner() {
        let now = Utc::now();
        let job = JobDescriptor::new("export", vec![]).scheduled_for(now + chrono::Duration::hours(3));

        let plain = DedupOptions::default();
        assert_eq!(DuplicateJob::new(&job, &plain).expiry(now), plain.ttl);

        let scheduled = DedupOptions::default().including_scheduled();
        assert_eq!(
            DuplicateJob::new(&job, &scheduled).expiry(now),
            Duration::from_secs(3 * 3600) + scheduled.ttl
        );
    }

    #[tokio::test]
    async fn test_release_only_by_owner() {
        let store = InMemoryStore::new();
        let options = DedupOptions::default();
        let now = Utc::now();

        let owner = JobDescriptor::new("export", vec![json!(7)]);
        let mut duplicate = JobDescriptor::new("export", vec![json!(7)]);

        assert_eq!(DuplicateJob::new(&owner, &options).check(&store, now).await.unwrap(), None);
        let existing = DuplicateJob::new(&duplicate, &options)
            .check(&store, now)
            .await
            .unwrap();
        assert_eq!(existing, Some(owner.id.clone()));
        duplicate.duplicate_of = existing;

        assert!(!DuplicateJob::new(&duplicate, &options).release(&store).await.unwrap());
        assert!(DuplicateJob::new(&owner, &options).release(&store).await.unwrap());
    }
}

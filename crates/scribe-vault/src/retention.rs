//! Pluggable pruning of archived versions. Nothing prunes implicitly; callers
//! run [`prune`] with whichever policy they choose.

use crate::archive::{VersionArchive, VersionRecord};
use crate::error::Result;
use chrono::{DateTime, Duration, Utc};
use scribe_core::RetentionConfig;
use std::path::Path;
use uuid::Uuid;

const MAX_AGE_DAYS_CAP: i64 = 365_000;

pub trait RetentionPolicy: Send + Sync {
    /// Versions to delete, given records in archive order.
    fn expired(&self, records: &[VersionRecord], now: DateTime<Utc>) -> Vec<Uuid>;
}

pub struct KeepAll;

impl RetentionPolicy for KeepAll {
    fn expired(&self, _records: &[VersionRecord], _now: DateTime<Utc>) -> Vec<Uuid> {
        Vec::new()
    }
}

/// Keeps the newest `n` versions.
pub struct MaxVersions(pub usize);

impl RetentionPolicy for MaxVersions {
    fn expired(&self, records: &[VersionRecord], _now: DateTime<Utc>) -> Vec<Uuid> {
        let excess = records.len().saturating_sub(self.0);
        records[..excess].iter().map(|r| r.version_id).collect()
    }
}

/// Drops versions archived longer ago than the given age.
pub struct MaxAge(pub Duration);

impl RetentionPolicy for MaxAge {
    fn expired(&self, records: &[VersionRecord], now: DateTime<Utc>) -> Vec<Uuid> {
        let cutoff = now - self.0;
        records
            .iter()
            .filter(|r| r.archived_at < cutoff)
            .map(|r| r.version_id)
            .collect()
    }
}

/// A version expires when any inner policy expires it.
pub struct AnyOf(pub Vec<Box<dyn RetentionPolicy>>);

impl RetentionPolicy for AnyOf {
    fn expired(&self, records: &[VersionRecord], now: DateTime<Utc>) -> Vec<Uuid> {
        let mut out: Vec<Uuid> = Vec::new();
        for policy in &self.0 {
            for id in policy.expired(records, now) {
                if !out.contains(&id) {
                    out.push(id);
                }
            }
        }
        let order = |id: &Uuid| records.iter().position(|r| r.version_id == *id);
        out.sort_by_key(order);
        out
    }
}

pub fn policy_from_config(cfg: &RetentionConfig) -> Box<dyn RetentionPolicy> {
    let mut rules: Vec<Box<dyn RetentionPolicy>> = Vec::new();
    if let Some(max) = cfg.max_versions {
        rules.push(Box::new(MaxVersions(max)));
    }
    if let Some(days) = cfg.max_age_days {
        let days = i64::try_from(days).unwrap_or(i64::MAX).min(MAX_AGE_DAYS_CAP);
        rules.push(Box::new(MaxAge(Duration::days(days))));
    }
    match rules.len() {
        0 => Box::new(KeepAll),
        1 => rules.remove(0),
        _ => Box::new(AnyOf(rules)),
    }
}

/// Applies `policy` to the versions of `path`. Returns the removed ids.
pub fn prune(
    archive: &VersionArchive,
    path: &Path,
    policy: &dyn RetentionPolicy,
    now: DateTime<Utc>,
) -> Result<Vec<Uuid>> {
    let records = archive.records(path)?;
    let mut removed = Vec::new();
    for id in policy.expired(&records, now) {
        if archive.remove_version(path, id)? {
            removed.push(id);
        }
    }
    Ok(removed)
}

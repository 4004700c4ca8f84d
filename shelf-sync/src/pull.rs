//! Pull reconciliation against a remote library
//!
//! A pass scans the whole source, builds a fresh snapshot, diffs it against the
//! last committed one and applies only the differences:
//! 1. Load the previous snapshot (none means first sync)
//! 2. Scan every section page by page into a new snapshot
//! 3. Diff old and new version maps
//! 4. Write changed documents, cascade-delete removed entities
//! 5. Download changed media with a bounded worker pool, drop removed kinds
//! 6. Commit the new snapshot by atomic rename
//!
//! An incomplete scan aborts before step 3: with a partial snapshot every
//! unscanned entity would look deleted.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use shelf_index::{
    db_key, media_key, validate_group, validate_group_name, validate_id, DocumentStore, Snapshot,
    UpsertStatus, VersionedSnapshot,
};
use shelf_media::{MediaStore, PutOutcome};

use crate::diff::{DiffStats, MediaChange, SnapshotDiff};
use crate::errors::{Result, SyncError};
use crate::outcome::ApplyOutcome;
use crate::source::{media_version, LibrarySource, SectionInfo};

/// Configuration for a pull pass
#[derive(Debug, Clone)]
pub struct PullConfig {
    /// Items requested per page
    pub page_size: usize,
    /// Concurrent media downloads
    pub media_workers: usize,
    /// A section needing more pages than this is treated as an incomplete scan
    pub max_pages_per_section: usize,
}

impl Default for PullConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            media_workers: 4,
            max_pages_per_section: 10_000,
        }
    }
}

/// Summary of one pull pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullReport {
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sections: usize,
    pub entities: usize,
    pub media_assets: usize,
    pub diff: DiffStats,
    pub documents: ApplyOutcome,
    pub media: ApplyOutcome,
    /// Whether the committed version maps differ from the previous snapshot
    pub snapshot_changed: bool,
}

impl PullReport {
    pub fn is_clean(&self) -> bool {
        self.documents.is_clean() && self.media.is_clean()
    }
}

/// Everything a complete scan produced
struct ScanResult {
    snapshot: Snapshot,
    /// `group:id` -> document payload
    payloads: HashMap<String, Value>,
    /// `group:id:kind` -> download reference
    references: HashMap<String, String>,
}

/// Converges the local store to a remote library.
///
/// Not re-entrant for the same snapshot path: callers serialize passes per
/// target through a [`SingleFlightGuard`](crate::guard::SingleFlightGuard).
pub struct PullReconciler<S: ?Sized> {
    source: Arc<S>,
    documents: DocumentStore,
    media: MediaStore,
    snapshot: VersionedSnapshot,
    config: PullConfig,
}

impl<S: LibrarySource + ?Sized> PullReconciler<S> {
    pub fn new(
        source: Arc<S>,
        documents: DocumentStore,
        media: MediaStore,
        snapshot: VersionedSnapshot,
        config: PullConfig,
    ) -> Self {
        Self {
            source,
            documents,
            media,
            snapshot,
            config,
        }
    }

    /// Run one full pass
    pub async fn run(&self) -> Result<PullReport> {
        let started_at = Utc::now();
        let source_id = self.source.source_id();
        info!("Starting pull from {}", source_id);

        let old = self.snapshot.load().await;
        let scan = self.scan(&source_id).await?;

        let diff = SnapshotDiff::compute(old.as_ref(), &scan.snapshot);
        info!(
            "Pull diff for {}: +{} ~{} -{} entities, +{} ~{} -{} media",
            source_id,
            diff.stats.entities_added,
            diff.stats.entities_modified,
            diff.stats.entities_deleted,
            diff.stats.media_added,
            diff.stats.media_modified,
            diff.stats.media_deleted
        );

        // Failed deltas are rolled back in here so the next pass retries them
        let mut committed = scan.snapshot.clone();

        let documents = self
            .apply_documents(&diff, &scan, old.as_ref(), &mut committed)
            .await?;
        let media = self
            .apply_media(&diff, &scan, old.as_ref(), &mut committed)
            .await;

        let snapshot_changed = old
            .as_ref()
            .map_or(true, |previous| !previous.same_versions(&committed));

        committed.updated_at = Utc::now();
        self.snapshot
            .commit(&committed)
            .await
            .map_err(|e| SyncError::Fatal(format!("Failed to commit snapshot: {}", e)))?;

        let report = PullReport {
            source: source_id,
            started_at,
            finished_at: Utc::now(),
            sections: committed.sections.len(),
            entities: committed.db_versions.len(),
            media_assets: committed.media_versions.len(),
            diff: diff.stats,
            documents,
            media,
            snapshot_changed,
        };

        if report.is_clean() {
            info!(
                "Pull from {} complete: {} documents written, {} media written",
                report.source, report.documents.applied, report.media.applied
            );
        } else {
            warn!(
                "Pull from {} complete with failures: {} document errors, {} media errors",
                report.source,
                report.documents.failed(),
                report.media.failed()
            );
        }

        Ok(report)
    }

    async fn scan(&self, source_id: &str) -> Result<ScanResult> {
        let sections = self
            .source
            .sections()
            .await
            .map_err(|e| SyncError::ScanIncomplete {
                section: "*".to_string(),
                reason: e.to_string(),
            })?;

        let mut scan = ScanResult {
            snapshot: Snapshot::new(source_id),
            payloads: HashMap::new(),
            references: HashMap::new(),
        };

        for section in &sections {
            self.scan_section(section, &mut scan).await?;
        }

        debug!(
            "Scanned {} sections: {} entities, {} media",
            sections.len(),
            scan.snapshot.db_versions.len(),
            scan.snapshot.media_versions.len()
        );

        Ok(scan)
    }

    async fn scan_section(&self, section: &SectionInfo, scan: &mut ScanResult) -> Result<()> {
        validate_group(&section.group)?;

        let group = section.group.as_str();
        let page_size = self.config.page_size.max(1);
        let incomplete = |reason: String| SyncError::ScanIncomplete {
            section: group.to_string(),
            reason,
        };

        {
            let meta = scan.snapshot.sections.entry(group.to_string()).or_default();
            meta.title = section.title.clone();
            meta.kind = section.kind.clone();
        }

        let mut received = 0usize;
        let mut reported_total: u64;
        let mut pages = 0usize;

        loop {
            if pages >= self.config.max_pages_per_section {
                return Err(incomplete(format!("exceeded {} pages", pages)));
            }

            let page = self
                .source
                .list_items(section, received, page_size)
                .await
                .map_err(|e| incomplete(format!("page at {}: {}", received, e)))?;
            pages += 1;

            let count = page.items.len();
            reported_total = page.total_count;
            debug!("Section {} page {}: {} items", group, pages, count);

            for item in page.items {
                if let Err(e) = validate_id(&item.id) {
                    warn!("Skipping item with invalid id in {}: {}", group, e);
                    continue;
                }

                scan.snapshot.record_item(group, &item.id, item.tick);

                for (kind, reference) in item.media {
                    if validate_group_name(&kind).is_err() {
                        warn!("Skipping media kind {:?} of {}:{}", kind, group, item.id);
                        continue;
                    }
                    let version = media_version(&reference);
                    scan.snapshot.record_media(group, &item.id, &kind, version);
                    scan.references
                        .insert(media_key(group, &item.id, &kind), reference);
                }

                scan.payloads.insert(db_key(group, &item.id), item.payload);
            }

            received += count;
            if count < page_size {
                break;
            }
        }

        if (received as u64) < reported_total {
            return Err(incomplete(format!(
                "received {} of {} items",
                received, reported_total
            )));
        }

        Ok(())
    }

    async fn apply_documents(
        &self,
        diff: &SnapshotDiff,
        scan: &ScanResult,
        old: Option<&Snapshot>,
        committed: &mut Snapshot,
    ) -> Result<ApplyOutcome> {
        let mut outcome = ApplyOutcome::default();

        let groups: BTreeSet<&str> = diff
            .entities
            .iter()
            .filter(|c| c.change_type.is_upsert())
            .map(|c| c.group.as_str())
            .collect();
        for group in groups {
            self.documents.ensure_group(group).await.map_err(|e| {
                SyncError::Fatal(format!("Failed to prepare group {}: {}", group, e))
            })?;
        }

        for change in &diff.entities {
            if change.change_type.is_upsert() {
                let Some(payload) = scan.payloads.get(&change.key) else {
                    outcome.record_failure(&change.key, None, "payload missing from scan");
                    restore_version(
                        &mut committed.db_versions,
                        old.map(|s| &s.db_versions),
                        &change.key,
                    );
                    continue;
                };

                match self.documents.upsert(&change.group, &change.id, payload).await {
                    Ok(UpsertStatus::Unchanged) => outcome.record_skipped(),
                    Ok(_) => outcome.record_applied(),
                    Err(e) => {
                        warn!("Failed to write document {}: {}", change.key, e);
                        outcome.record_failure(&change.key, None, &e);
                        restore_version(
                            &mut committed.db_versions,
                            old.map(|s| &s.db_versions),
                            &change.key,
                        );
                    }
                }
            } else {
                match self.remove_entity(&change.group, &change.id).await {
                    Ok(true) => outcome.record_applied(),
                    Ok(false) => outcome.record_skipped(),
                    Err(e) => {
                        warn!("Failed to delete {}: {}", change.key, e);
                        outcome.record_failure(&change.key, None, &e);
                        if let Some(old) = old {
                            restore_entity(committed, old, &change.group, &change.id);
                        }
                    }
                }
            }
        }

        Ok(outcome)
    }

    /// Cascade delete: the document and every media kind of the entity
    async fn remove_entity(&self, group: &str, id: &str) -> Result<bool> {
        let document = self.documents.delete(group, id).await?;
        let media = self.media.remove_entity(group, id).await?;
        debug!("Removed {}:{} (document: {}, media: {})", group, id, document, media);
        Ok(document || media)
    }

    async fn apply_media(
        &self,
        diff: &SnapshotDiff,
        scan: &ScanResult,
        old: Option<&Snapshot>,
        committed: &mut Snapshot,
    ) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();
        let old_media = old.map(|s| &s.media_versions);

        // Media of deleted entities went with the cascade
        let deleted: BTreeSet<&str> = diff.db_deletes();

        let mut fetches: Vec<(&MediaChange, String)> = Vec::new();
        for change in &diff.media {
            if deleted.contains(db_key(&change.group, &change.id).as_str()) {
                continue;
            }

            if change.change_type.is_upsert() {
                match scan.references.get(&change.key) {
                    Some(reference) => fetches.push((change, reference.clone())),
                    None => {
                        outcome.record_failure(&change.key, None, "reference missing from scan");
                        restore_version(&mut committed.media_versions, old_media, &change.key);
                    }
                }
                continue;
            }

            match self
                .media
                .remove_kind(&change.group, &change.id, &change.kind)
                .await
            {
                Ok(0) => outcome.record_skipped(),
                Ok(_) => outcome.record_applied(),
                Err(e) => {
                    warn!("Failed to remove media {}: {}", change.key, e);
                    outcome.record_failure(&change.key, None, &e);
                    restore_version(&mut committed.media_versions, old_media, &change.key);
                }
            }
        }

        let this = self;
        let results: Vec<(&MediaChange, String, Result<PutOutcome>)> = stream::iter(fetches)
            .map(move |(change, reference)| async move {
                let result = this.fetch_media(change, &reference).await;
                (change, reference, result)
            })
            .buffer_unordered(self.config.media_workers.max(1))
            .collect()
            .await;

        for (change, reference, result) in results {
            match result {
                Ok(put) if put.status.wrote() => outcome.record_applied(),
                Ok(_) => outcome.record_skipped(),
                Err(e) => {
                    warn!(
                        "Failed to fetch media {} (group {}, id {}, kind {}) from {}: {}",
                        change.key, change.group, change.id, change.kind, reference, e
                    );
                    outcome.record_failure(&change.key, Some(reference), &e);
                    restore_version(&mut committed.media_versions, old_media, &change.key);
                }
            }
        }

        outcome
    }

    async fn fetch_media(&self, change: &MediaChange, reference: &str) -> Result<PutOutcome> {
        let payload = self.source.download(reference).await?;
        let put = self
            .media
            .put_kind(
                &change.group,
                &change.id,
                &change.kind,
                &payload.content_type,
                &payload.bytes,
            )
            .await?;
        Ok(put)
    }
}

/// Put back the previously committed version of `key`, or drop it if it was new
fn restore_version(
    committed: &mut BTreeMap<String, u64>,
    old: Option<&BTreeMap<String, u64>>,
    key: &str,
) {
    match old.and_then(|versions| versions.get(key)) {
        Some(version) => {
            committed.insert(key.to_string(), *version);
        }
        None => {
            committed.remove(key);
        }
    }
}

/// Re-record an entity whose delete failed, with all of its media
fn restore_entity(committed: &mut Snapshot, old: &Snapshot, group: &str, id: &str) {
    let key = db_key(group, id);
    if let Some(version) = old.db_versions.get(&key) {
        committed.db_versions.insert(key.clone(), *version);
    }

    let prefix = format!("{}:", key);
    for (media, version) in old.media_versions.range(prefix.clone()..) {
        if !media.starts_with(&prefix) {
            break;
        }
        committed.media_versions.insert(media.clone(), *version);
    }
}

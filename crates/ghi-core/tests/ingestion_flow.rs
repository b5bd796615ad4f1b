//! End-to-end ingestion: git origin → clone cache → plan → dedup → index.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use ghi_core::{IncrementalIndexer, IndexingRequest, RemoteSourceCache};
use ghi_db::index::SimpleFileIndex;
use ghi_db::{IndexConfig, IndexQueryPort};
use tempfile::TempDir;

use common::{cache_config, git_available, open_cache, Origin};

fn indexer(
    temp: &TempDir,
) -> IncrementalIndexer<ghi_core::GitCli, SimpleFileIndex> {
    let index_dir = temp.path().join("index");
    std::fs::create_dir_all(&index_dir).unwrap();
    let index = SimpleFileIndex::open(&IndexConfig::new(index_dir)).unwrap();
    let cache: RemoteSourceCache<ghi_core::GitCli> = open_cache(cache_config(temp));
    IncrementalIndexer::new(Arc::new(cache), Arc::new(index))
}

#[test]
fn test_total_target_ingestion_is_incremental() {
    if !git_available() {
        return;
    }
    let temp = TempDir::new().unwrap();
    let origin = Origin::create(temp.path(), 20);
    let indexer = indexer(&temp);
    let source = origin.locator();

    let first = indexer
        .ingest(&IndexingRequest::new(&source).with_limit(10))
        .unwrap();
    assert_eq!(first.plan.skip_offset, 0);
    assert_eq!(first.delivered, 10);

    let second = indexer
        .ingest(&IndexingRequest::new(&source).with_limit(15))
        .unwrap();
    assert_eq!(second.plan.skip_offset, 10);
    assert_eq!(second.plan.resolved_limit, 5);
    assert_eq!(second.delivered, 5);
    assert_eq!(second.already_indexed, 0);
    assert_eq!(indexer.port().count(second.source_key.as_str()).unwrap(), 15);

    let third = indexer
        .ingest(&IndexingRequest::new(&source).with_limit(12))
        .unwrap();
    assert!(third.plan.short_circuit);
    assert_eq!(third.delivered, 0);
}

#[test]
fn test_dedup_skips_indexed_commits() {
    if !git_available() {
        return;
    }
    let temp = TempDir::new().unwrap();
    let mut origin = Origin::create(temp.path(), 8);
    let indexer = indexer(&temp);
    let source = origin.locator();

    indexer
        .ingest(&IndexingRequest::new(&source).with_limit(8))
        .unwrap();
    origin.commit();
    origin.commit();

    // A date window makes the limit an additional count from the tip.
    let since = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
    let outcome = indexer
        .prepare(&IndexingRequest::new(&source).with_limit(10).with_since(since))
        .unwrap();

    assert_eq!(outcome.plan.skip_offset, 0);
    assert_eq!(outcome.already_indexed, 8);
    let new: Vec<&str> = outcome
        .new_candidates
        .iter()
        .map(|c| c.message_summary.as_str())
        .collect();
    assert_eq!(new, vec!["commit 9", "commit 8"]);
}

#[test]
fn test_delivered_ids_are_disjoint_from_existing() {
    if !git_available() {
        return;
    }
    let temp = TempDir::new().unwrap();
    let origin = Origin::create(temp.path(), 12);
    let indexer = indexer(&temp);
    let source = origin.locator();

    let first = indexer
        .prepare(&IndexingRequest::new(&source).with_limit(6))
        .unwrap();
    let existing: HashSet<String> = first.new_candidates.iter().map(|c| c.id.clone()).collect();
    indexer
        .deliver(&first, |c| {
            ghi_core::db_adapter::candidate_document(&first.source_key, c)
        })
        .unwrap();

    let second = indexer
        .prepare(&IndexingRequest::new(&source).with_limit(12).with_offset(0).with_dedup(true))
        .unwrap();
    assert!(second
        .new_candidates
        .iter()
        .all(|c| !existing.contains(&c.id)));
    assert_eq!(second.new_candidates.len(), 6);
}

#[test]
fn test_dedup_disabled_redelivers() {
    if !git_available() {
        return;
    }
    let temp = TempDir::new().unwrap();
    let origin = Origin::create(temp.path(), 5);
    let indexer = indexer(&temp);
    let source = origin.locator();

    indexer
        .ingest(&IndexingRequest::new(&source).with_limit(5))
        .unwrap();
    let again = indexer
        .ingest(&IndexingRequest::new(&source).with_limit(5).with_dedup(false))
        .unwrap();

    assert_eq!(again.delivered, 5);
    assert_eq!(indexer.port().count(again.source_key.as_str()).unwrap(), 5);
}

//! Entity linking for split posts.
//!
//! Some platforms deliver one logical post as a text message plus separate
//! media-only messages sent moments apart. This module links the media-only
//! orphans under the text post so readers see a single parent with children.
//! Matching is restricted to the same source and a symmetric time window
//! around the candidate's own timestamp; the tree is exactly one level deep.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::db::article::CorrelationCandidate;
use crate::db::Database;
use crate::TARGET_DB;

pub fn window_bounds(
    ts: DateTime<Utc>,
    window_secs: i64,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let window = Duration::seconds(window_secs.max(0));
    (ts - window, ts + window)
}

/// Nearest candidate by absolute time distance; ties broken by lowest id.
pub fn pick_nearest(
    candidates: &[CorrelationCandidate],
    ts: DateTime<Utc>,
) -> Option<i64> {
    candidates
        .iter()
        .min_by_key(|candidate| {
            let distance = (candidate.published_at - ts).num_milliseconds().abs();
            (distance, candidate.id)
        })
        .map(|candidate| candidate.id)
}

/// A new text post adopts every unlinked orphan in its window. Returns how
/// many orphans were attached.
pub async fn link_children(
    db: &Database,
    source_id: i64,
    parent_id: i64,
    ts: DateTime<Utc>,
    window_secs: i64,
) -> Result<usize, sqlx::Error> {
    let (from, to) = window_bounds(ts, window_secs);
    let orphans = db.unlinked_orphans_between(source_id, from, to).await?;

    let mut attached = 0;
    for orphan in orphans {
        if db.attach_parent(orphan.id, parent_id).await? {
            debug!(target: TARGET_DB, "Attached orphan {} to article {}", orphan.id, parent_id);
            attached += 1;
        }
    }
    Ok(attached)
}

/// A new orphan attaches to the single nearest text post in its window, if
/// one exists. Returns whether a parent was found.
pub async fn link_parent(
    db: &Database,
    source_id: i64,
    child_id: i64,
    ts: DateTime<Utc>,
    window_secs: i64,
) -> Result<bool, sqlx::Error> {
    let (from, to) = window_bounds(ts, window_secs);
    let candidates = db.parent_candidates_between(source_id, from, to).await?;

    match pick_nearest(&candidates, ts) {
        Some(parent_id) => {
            let attached = db.attach_parent(child_id, parent_id).await?;
            if attached {
                debug!(target: TARGET_DB, "Attached orphan {} to article {}", child_id, parent_id);
            }
            Ok(attached)
        }
        None => Ok(false),
    }
}

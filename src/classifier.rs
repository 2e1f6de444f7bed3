//! Pure classification of state-store entries into sync actions.
//!
//! [`classify`] applies the six categories in phase order and yields the
//! first match, which is the action a freshly snapshotted entry will be
//! picked up for. [`matches`] exposes the individual phase predicates; an
//! entry can satisfy a later predicate once an earlier phase has committed
//! its side effects (a conflict-flagged path is re-observed and then
//! downloads like any other stale local copy).

use crate::models::{Entry, SyncAction};

/// First-match classification in phase order.
pub fn classify(entry: &Entry) -> SyncAction {
    const ORDER: [SyncAction; 5] = [
        SyncAction::Conflict,
        SyncAction::Download,
        SyncAction::Upload,
        SyncAction::DeleteRemote,
        SyncAction::DeleteLocal,
    ];
    ORDER
        .into_iter()
        .find(|action| matches(entry, *action))
        .unwrap_or(SyncAction::NoOp)
}

/// Whether the entry satisfies the predicate of one phase. Mirrors the SQL
/// in the state store; both sides are pinned by the same unit tests.
pub fn matches(entry: &Entry, action: SyncAction) -> bool {
    match action {
        SyncAction::Conflict => {
            entry.exists_remote
                && entry.exists_local
                && entry.remote_mtime.is_some_and(|m| m != entry.remote_mtime_prev)
                && entry.local_mtime.is_some_and(|m| m != entry.local_mtime_prev)
                && entry.remote_mtime_prev != 0
                && entry.local_mtime_prev != 0
        }
        SyncAction::Download => {
            (!entry.exists_local && !entry.synced)
                || (entry.synced && mtime_gt(entry.remote_mtime, entry.local_mtime))
        }
        SyncAction::Upload => {
            (!entry.exists_remote && !entry.synced)
                || (entry.synced && mtime_gt(entry.local_mtime, entry.remote_mtime))
        }
        SyncAction::DeleteRemote => entry.exists_remote && !entry.exists_local && entry.synced,
        SyncAction::DeleteLocal => !entry.exists_remote && entry.synced,
        SyncAction::NoOp => classify(entry) == SyncAction::NoOp,
    }
}

/// SQL-style comparison: a missing mtime never compares greater.
fn mtime_gt(a: Option<i64>, b: Option<i64>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a > b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_700_000_000_000;
    const T1: i64 = 1_700_000_200_000;
    const T2: i64 = 1_700_000_300_000;

    fn entry() -> Entry {
        Entry {
            pair_id: 1,
            path: "a.txt".to_string(),
            remote_mtime: None,
            remote_mtime_prev: 0,
            exists_remote: false,
            local_mtime: None,
            local_mtime_prev: 0,
            exists_local: false,
            synced: false,
            captured_at: 0,
        }
    }

    #[test]
    fn test_fresh_remote_file_downloads() {
        let mut e = entry();
        e.exists_remote = true;
        e.remote_mtime = Some(T0);
        assert_eq!(classify(&e), SyncAction::Download);
    }

    #[test]
    fn test_fresh_local_file_uploads() {
        let mut e = entry();
        e.exists_local = true;
        e.local_mtime = Some(T0);
        assert_eq!(classify(&e), SyncAction::Upload);
    }

    #[test]
    fn test_newer_remote_on_synced_entry_downloads() {
        let mut e = entry();
        e.exists_remote = true;
        e.exists_local = true;
        e.synced = true;
        e.remote_mtime = Some(T1);
        e.remote_mtime_prev = T0;
        e.local_mtime = Some(T0);
        e.local_mtime_prev = T0;
        assert_eq!(classify(&e), SyncAction::Download);
    }

    #[test]
    fn test_newer_local_on_synced_entry_uploads() {
        let mut e = entry();
        e.exists_remote = true;
        e.exists_local = true;
        e.synced = true;
        e.remote_mtime = Some(T0);
        e.remote_mtime_prev = T0;
        e.local_mtime = Some(T1);
        e.local_mtime_prev = T0;
        assert_eq!(classify(&e), SyncAction::Upload);
    }

    #[test]
    fn test_both_sides_changed_is_a_conflict() {
        let mut e = entry();
        e.exists_remote = true;
        e.exists_local = true;
        e.synced = true;
        e.remote_mtime = Some(T2);
        e.remote_mtime_prev = T0;
        e.local_mtime = Some(T1);
        e.local_mtime_prev = T0;
        assert_eq!(classify(&e), SyncAction::Conflict);
        // The download predicate also holds; phase order decides.
        assert!(matches(&e, SyncAction::Download));
    }

    #[test]
    fn test_conflict_needs_nonzero_prior_state() {
        let mut e = entry();
        e.exists_remote = true;
        e.exists_local = true;
        e.synced = true;
        e.remote_mtime = Some(T2);
        e.remote_mtime_prev = 0;
        e.local_mtime = Some(T1);
        e.local_mtime_prev = T0;
        assert_ne!(classify(&e), SyncAction::Conflict);
    }

    #[test]
    fn test_local_only_synced_entry_is_deleted_locally() {
        // The remote copy went away after a successful sync: the remote
        // was authoritative, the local file follows it.
        let mut e = entry();
        e.exists_local = true;
        e.synced = true;
        e.local_mtime = Some(T0);
        e.local_mtime_prev = T0;
        e.remote_mtime = Some(T0);
        e.remote_mtime_prev = T0;
        assert_eq!(classify(&e), SyncAction::DeleteLocal);
    }

    #[test]
    fn test_remote_only_synced_entry_is_deleted_remotely() {
        let mut e = entry();
        e.exists_remote = true;
        e.synced = true;
        e.remote_mtime = Some(T0);
        e.remote_mtime_prev = T0;
        e.local_mtime = Some(T0);
        e.local_mtime_prev = T0;
        assert_eq!(classify(&e), SyncAction::DeleteRemote);
    }

    #[test]
    fn test_equal_mtimes_are_a_noop() {
        let mut e = entry();
        e.exists_remote = true;
        e.exists_local = true;
        e.synced = true;
        e.remote_mtime = Some(T0);
        e.remote_mtime_prev = T0;
        e.local_mtime = Some(T0);
        e.local_mtime_prev = T0;
        assert_eq!(classify(&e), SyncAction::NoOp);
    }
}

//! Revision markers for last-write-wins conflict resolution.
//!
//! A revision is an opaque, totally-ordered marker implemented as a
//! millisecond timestamp. Revisions are compared, never merged: the newer
//! revision wins every conflict, and a tie means "already synced".

use chrono::Utc;
use std::cmp::Ordering;

/// An opaque, totally-ordered version marker (milliseconds since epoch).
pub type Revision = i64;

/// Compare two revisions by the sign of their difference.
///
/// `Greater` means `a` is newer, `Equal` identical, `Less` older.
pub fn compare_revision(a: Revision, b: Revision) -> Ordering {
    a.cmp(&b)
}

/// Revision for the current wall-clock time.
pub fn revision_now() -> Revision {
    Utc::now().timestamp_millis()
}

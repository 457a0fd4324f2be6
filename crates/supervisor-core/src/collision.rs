//! Two-stage collision detection across sibling concurrent runs.
//!
//! Stage one is coarse and cheap: does this run's allowlist pattern set
//! overlap textually with a sibling's? That only ever produces a warning.
//! Stage two is precise: does this run's `files_expected` for the current
//! milestone actually intersect a sibling's owned paths? That stops the
//! run.

use chrono::{DateTime, Duration, Utc};

use crate::scope::{globs_overlap, is_owned};
use crate::types::{Phase, RunId};

/// Collision reports cap their example overlap list at this many entries
/// (spec §4.7) so a pathological pattern set can't blow up event payloads.
const MAX_OVERLAP_EXAMPLES: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollisionKind {
    PatternOverlapWarning,
    FileIntersectionStop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollisionReport {
    pub other_run_id: RunId,
    pub kind: CollisionKind,
    pub overlap: Vec<String>,
    pub phase: Phase,
    pub age: Duration,
}

/// A minimal view of a sibling run, enough to check for collisions
/// without pulling in the full `RunState`.
#[derive(Debug, Clone)]
pub struct SiblingRun {
    pub run_id: RunId,
    pub allowlist: Vec<String>,
    pub owned_paths: Vec<String>,
    pub phase: Phase,
    pub last_progress_at: DateTime<Utc>,
}

/// Coarse stage: does any of my allowlist patterns overlap any of the
/// sibling's, checked by cross-matching each pattern's glob set against
/// the other's compiled globs rather than requiring identical pattern
/// strings. Catches nested globs like `src/**` vs `src/feature/**` that
/// share no pattern text but do overlap on disk.
pub fn coarse_pattern_overlap(mine: &[String], sibling: &[String]) -> Vec<String> {
    mine.iter()
        .filter(|pattern| globs_overlap(std::slice::from_ref(pattern), sibling))
        .cloned()
        .take(MAX_OVERLAP_EXAMPLES)
        .collect()
}

/// Precise stage: do any of `files_expected` fall inside a sibling's
/// owned-path set?
pub fn precise_file_intersection(files_expected: &[String], sibling_owned: &[String]) -> Vec<String> {
    files_expected
        .iter()
        .filter(|f| is_owned(f, sibling_owned))
        .cloned()
        .take(MAX_OVERLAP_EXAMPLES)
        .collect()
}

/// Run both stages against every sibling, returning one report per
/// sibling that has any overlap. Precise intersections are reported in
/// place of (not in addition to) a coarse warning for the same sibling.
/// `now` is used to compute each report's `age` against the sibling's
/// last recorded progress.
pub fn detect_collisions(
    my_allowlist: &[String],
    my_files_expected: &[String],
    siblings: &[SiblingRun],
    now: DateTime<Utc>,
) -> Vec<CollisionReport> {
    let mut reports = Vec::new();
    for sibling in siblings {
        let age = now - sibling.last_progress_at;
        let precise = precise_file_intersection(my_files_expected, &sibling.owned_paths);
        if !precise.is_empty() {
            reports.push(CollisionReport {
                other_run_id: sibling.run_id.clone(),
                kind: CollisionKind::FileIntersectionStop,
                overlap: precise,
                phase: sibling.phase,
                age,
            });
            continue;
        }
        let coarse = coarse_pattern_overlap(my_allowlist, &sibling.allowlist);
        if !coarse.is_empty() {
            reports.push(CollisionReport {
                other_run_id: sibling.run_id.clone(),
                kind: CollisionKind::PatternOverlapWarning,
                overlap: coarse,
                phase: sibling.phase,
                age,
            });
        }
    }
    reports
}

pub fn has_stopping_collision(reports: &[CollisionReport]) -> bool {
    reports.iter().any(|r| r.kind == CollisionKind::FileIntersectionStop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 31, 9, 0, 0).unwrap()
    }

    fn sibling(id: &str, allowlist: &[&str], owned: &[&str]) -> SiblingRun {
        SiblingRun {
            run_id: RunId::from_string(id),
            allowlist: allowlist.iter().map(|s| s.to_string()).collect(),
            owned_paths: owned.iter().map(|s| s.to_string()).collect(),
            phase: Phase::Implement,
            last_progress_at: now(),
        }
    }

    #[test]
    fn no_overlap_produces_no_reports() {
        let siblings = vec![sibling("b", &["docs/**"], &["docs/"])];
        let reports = detect_collisions(&["src/**".into()], &["src/a.rs".into()], &siblings, now());
        assert!(reports.is_empty());
    }

    #[test]
    fn pattern_overlap_produces_warning_not_stop() {
        let siblings = vec![sibling("b", &["src/**"], &["other/"])];
        let reports = detect_collisions(&["src/**".into()], &["src/a.rs".into()], &siblings, now());
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].kind, CollisionKind::PatternOverlapWarning);
        assert!(!has_stopping_collision(&reports));
    }

    #[test]
    fn nested_glob_patterns_are_detected_as_overlapping() {
        let siblings = vec![sibling("b", &["src/feature/**"], &["other/"])];
        let reports = detect_collisions(&["src/**".into()], &["docs/a.md".into()], &siblings, now());
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].kind, CollisionKind::PatternOverlapWarning);
    }

    #[test]
    fn file_intersection_produces_stopping_report() {
        let siblings = vec![sibling("b", &[], &["src/feature/"])];
        let reports = detect_collisions(&[], &["src/feature/mod.rs".into()], &siblings, now());
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].kind, CollisionKind::FileIntersectionStop);
        assert!(has_stopping_collision(&reports));
    }

    #[test]
    fn precise_stage_takes_precedence_over_coarse_for_same_sibling() {
        let siblings = vec![sibling("b", &["src/**"], &["src/feature/"])];
        let reports = detect_collisions(&["src/**".into()], &["src/feature/mod.rs".into()], &siblings, now());
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].kind, CollisionKind::FileIntersectionStop);
    }
}

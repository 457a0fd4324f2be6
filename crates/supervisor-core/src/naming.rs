//! Run identifier and branch-name derivation.
//!
//! Naming is purely deterministic: a timestamp-based run id plus a
//! slugified task title, no external model call (unlike the teacher's
//! Haiku-based naming, which needed a live LLM round trip just to name a
//! run).

use chrono::{DateTime, Utc};

use crate::types::RunId;

pub const MAX_SLUG_LENGTH: usize = 48;

/// Build a run id from the current time.
pub fn generate_run_id(now: DateTime<Utc>) -> RunId {
    RunId::from_timestamp(now)
}

/// Slugify a task title for use in branch names: lowercase, non-alphanumeric
/// runs collapsed to a single `-`, trimmed of leading/trailing `-`, capped
/// at `MAX_SLUG_LENGTH`.
pub fn slugify(title: &str) -> String {
    let mut slug = String::new();
    let mut last_was_dash = false;
    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_was_dash = false;
        } else if !last_was_dash && !slug.is_empty() {
            slug.push('-');
            last_was_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.len() > MAX_SLUG_LENGTH {
        slug.truncate(MAX_SLUG_LENGTH);
        while slug.ends_with('-') {
            slug.pop();
        }
    }
    slug
}

/// Build the full branch name for a run: `{prefix}{run_id}-{slug}`.
pub fn branch_name(prefix: &str, run_id: &RunId, task_title: &str) -> String {
    let slug = slugify(task_title);
    if slug.is_empty() {
        format!("{prefix}{run_id}")
    } else {
        format!("{prefix}{run_id}-{slug}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn slugify_lowercases_and_collapses_punctuation() {
        assert_eq!(slugify("Add JSON Parser!!"), "add-json-parser");
    }

    #[test]
    fn slugify_trims_leading_and_trailing_dashes() {
        assert_eq!(slugify("  --weird--  "), "weird");
    }

    #[test]
    fn slugify_caps_length() {
        let long = "a".repeat(100);
        assert!(slugify(&long).len() <= MAX_SLUG_LENGTH);
    }

    #[test]
    fn slugify_of_empty_title_is_empty() {
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn branch_name_falls_back_to_run_id_when_slug_empty() {
        let run_id = RunId::from_string("20260731090000");
        assert_eq!(branch_name("run/", &run_id, "???"), "run/20260731090000");
    }

    #[test]
    fn branch_name_includes_slug_when_present() {
        let run_id = RunId::from_string("20260731090000");
        assert_eq!(
            branch_name("run/", &run_id, "Add parser"),
            "run/20260731090000-add-parser"
        );
    }

    #[test]
    fn generate_run_id_uses_timestamp_format() {
        let now = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(generate_run_id(now).to_string(), "20260102030405");
    }
}

//! Git ref-name validation for branch names before they are persisted.
//!
//! Branch names recorded here are later handed to git on the command line,
//! so rejection is a security boundary. The rules follow
//! `git check-ref-format` for a branch-level ref, plus a leading `-` ban so
//! a stored name can never be mistaken for a flag.

use crate::error::{Result, StoreError};

/// Check a candidate branch name against git ref-name rules.
pub fn validate_ref_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(StoreError::validation("branch_name", "must not be empty"));
    }
    if name == "@" {
        return Err(StoreError::validation(
            "branch_name",
            "'@' alone is not a valid ref name",
        ));
    }
    if name.starts_with('-') {
        return Err(StoreError::validation(
            "branch_name",
            "must not start with '-'",
        ));
    }
    if name.starts_with('/') || name.ends_with('/') {
        return Err(StoreError::validation(
            "branch_name",
            "must not start or end with '/'",
        ));
    }
    if name.ends_with('.') {
        return Err(StoreError::validation(
            "branch_name",
            "must not end with '.'",
        ));
    }
    if name.contains("..") {
        return Err(StoreError::validation(
            "branch_name",
            "must not contain '..'",
        ));
    }
    if name.contains("//") {
        return Err(StoreError::validation(
            "branch_name",
            "must not contain '//'",
        ));
    }
    if name.contains("@{") {
        return Err(StoreError::validation(
            "branch_name",
            "must not contain '@{'",
        ));
    }

    for ch in name.chars() {
        if ch.is_ascii_control() || ch == ' ' {
            return Err(StoreError::validation(
                "branch_name",
                "must not contain spaces or control characters",
            ));
        }
        if matches!(ch, '~' | '^' | ':' | '?' | '*' | '[' | '\\') {
            return Err(StoreError::validation(
                "branch_name",
                format!("must not contain '{ch}'"),
            ));
        }
    }

    for component in name.split('/') {
        if component.starts_with('.') {
            return Err(StoreError::validation(
                "branch_name",
                "path components must not start with '.'",
            ));
        }
        if component.ends_with(".lock") {
            return Err(StoreError::validation(
                "branch_name",
                "path components must not end with '.lock'",
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accepted(name: &str) {
        assert!(
            validate_ref_name(name).is_ok(),
            "expected {name:?} to be accepted"
        );
    }

    fn rejected(name: &str) {
        assert!(
            validate_ref_name(name).is_err(),
            "expected {name:?} to be rejected"
        );
    }

    #[test]
    fn accepts_typical_branch_names() {
        accepted("main");
        accepted("task/T-001");
        accepted("init/billing-v2/staging");
        accepted("feature/add_metrics");
        accepted("release-1.2.3");
        accepted("hotfix.2024");
    }

    #[test]
    fn rejects_empty_and_bare_at() {
        rejected("");
        rejected("@");
    }

    #[test]
    fn rejects_flag_like_names() {
        rejected("-rf");
        rejected("--force");
        rejected("-");
    }

    #[test]
    fn rejects_whitespace_and_control_characters() {
        rejected("a b");
        rejected("a\tb");
        rejected("a\nb");
        rejected("a\x07b");
    }

    #[test]
    fn rejects_ref_metacharacters() {
        rejected("a?b");
        rejected("a*b");
        rejected("a[b");
        rejected("a\\b");
        rejected("a~b");
        rejected("a^b");
        rejected("a:b");
    }

    #[test]
    fn rejects_dot_rules() {
        rejected("a..b");
        rejected(".hidden");
        rejected("task/.hidden");
        rejected("trailing.");
        rejected("refs.lock");
        rejected("task/T-001.lock");
    }

    #[test]
    fn rejects_slash_rules() {
        rejected("/leading");
        rejected("trailing/");
        rejected("a//b");
    }

    #[test]
    fn rejects_reflog_syntax() {
        rejected("a@{1}");
        rejected("HEAD@{yesterday}");
    }

    #[test]
    fn accepts_at_inside_names() {
        accepted("user@host");
        accepted("v1@2024");
    }
}

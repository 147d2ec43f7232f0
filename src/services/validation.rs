use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use strum::{Display, EnumString};

/// Maximum accepted command fragment length, in characters.
pub const MAX_COMMAND_LENGTH: usize = 1000;

/// Filters a strict-policy fragment may name inside its `-filter:v` clause.
pub const ALLOWED_FILTERS: &[&str] = &[
    "setpts", "fps", "scale", "crop", "rotate", "hflip", "vflip", "fade", "trim", "volume",
    "equalizer", "brightness", "contrast", "saturation", "hue", "drawtext", "overlay",
];

/// Shell metacharacters and command-injection primitives, checked in order.
pub const DENYLIST: &[DenyRule] = &[
    DenyRule::new("statement separator", ";", Matcher::Literal(";")),
    DenyRule::new("pipe", "|", Matcher::Literal("|")),
    DenyRule::new("logical and", "&&", Matcher::Literal("&&")),
    DenyRule::new("command substitution", "$(", Matcher::Literal("$(")),
    DenyRule::new("backtick substitution", "`", Matcher::Literal("`")),
    DenyRule::new("output redirection", ">", Matcher::Literal(">")),
    DenyRule::new("input redirection", "< (not followed by PTS)", Matcher::LessThanExceptPts),
    DenyRule::new("backslash escape", "\\", Matcher::Literal("\\")),
    DenyRule::new("exec keyword", "exec (any case)", Matcher::CaseInsensitive("exec")),
    DenyRule::new("eval keyword", "eval (any case)", Matcher::CaseInsensitive("eval")),
    DenyRule::new("system keyword", "system (any case)", Matcher::CaseInsensitive("system")),
];

static FILTER_CLAUSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"-filter:v\s+"([^"]+)""#).expect("filter clause pattern is valid")
});

/// Which grammar a fragment must satisfy.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ValidationPolicy {
    /// Denylist plus a required `-filter:v "<expr>"` naming an allow-listed filter.
    #[default]
    Strict,
    /// Denylist only.
    DenylistOnly,
}

#[derive(Debug, Clone, Copy)]
pub enum Matcher {
    Literal(&'static str),
    CaseInsensitive(&'static str),
    /// `<` anywhere except as the start of the `<PTS` time token.
    LessThanExceptPts,
}

/// A named denylist entry.
#[derive(Debug, Clone, Copy)]
pub struct DenyRule {
    pub name: &'static str,
    pub pattern: &'static str,
    matcher: Matcher,
}

impl DenyRule {
    const fn new(name: &'static str, pattern: &'static str, matcher: Matcher) -> Self {
        Self {
            name,
            pattern,
            matcher,
        }
    }

    pub fn matches(&self, input: &str) -> bool {
        match self.matcher {
            Matcher::Literal(needle) => input.contains(needle),
            Matcher::CaseInsensitive(needle) => input.to_ascii_lowercase().contains(needle),
            Matcher::LessThanExceptPts => input
                .match_indices('<')
                .any(|(idx, _)| !input[idx + 1..].starts_with("PTS")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Command must be a non-empty string")]
    Empty,

    #[error("Command exceeds maximum length of {max} characters (got {actual})")]
    TooLong { max: usize, actual: usize },

    #[error("Command contains prohibited pattern: {pattern} ({rule})")]
    ProhibitedPattern {
        rule: &'static str,
        pattern: &'static str,
    },

    #[error("Command must contain -filter:v with quoted filter string")]
    MissingFilterClause,

    #[error("Filter must use one of the allowed filters: {}", ALLOWED_FILTERS.join(", "))]
    FilterNotAllowed,
}

/// Gate between untrusted command fragments and the ffmpeg invocation.
///
/// Pure and total: every input yields `Ok(())` or a [`ValidationError`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandValidator {
    policy: ValidationPolicy,
}

impl CommandValidator {
    pub fn new(policy: ValidationPolicy) -> Self {
        Self { policy }
    }

    /// Check a fragment. The first failing rule wins:
    /// emptiness, length, denylist, then (strict only) the filter clause.
    pub fn validate(&self, fragment: &str) -> Result<(), ValidationError> {
        if fragment.is_empty() {
            return Err(ValidationError::Empty);
        }

        let length = fragment.chars().count();
        if length > MAX_COMMAND_LENGTH {
            return Err(ValidationError::TooLong {
                max: MAX_COMMAND_LENGTH,
                actual: length,
            });
        }

        if let Some(rule) = DENYLIST.iter().find(|rule| rule.matches(fragment)) {
            return Err(ValidationError::ProhibitedPattern {
                rule: rule.name,
                pattern: rule.pattern,
            });
        }

        if self.policy == ValidationPolicy::Strict {
            let expr = FILTER_CLAUSE
                .captures(fragment)
                .and_then(|caps| caps.get(1))
                .ok_or(ValidationError::MissingFilterClause)?
                .as_str();

            if !ALLOWED_FILTERS.iter().any(|filter| expr.contains(filter)) {
                return Err(ValidationError::FilterNotAllowed);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strict() -> CommandValidator {
        CommandValidator::new(ValidationPolicy::Strict)
    }

    fn rejection(fragment: &str) -> String {
        strict().validate(fragment).unwrap_err().to_string()
    }

    #[test]
    fn test_accepts_setpts_filter() {
        assert!(strict().validate(r#"-filter:v "setpts=3.0*PTS""#).is_ok());
    }

    #[test]
    fn test_accepts_scale_filter() {
        assert!(strict().validate(r#"-filter:v "scale=1280:720""#).is_ok());
    }

    #[test]
    fn test_rejects_each_denylisted_pattern() {
        let cases = [
            r#"-filter:v "setpts=2.0*PTS"; rm -rf /"#,
            r#"-filter:v "setpts=2.0*PTS" | cat /etc/passwd"#,
            r#"-filter:v "scale=1:1" && id"#,
            r#"-filter:v "setpts=$(whoami)*PTS""#,
            r#"-filter:v "setpts=`whoami`*PTS""#,
            r#"-filter:v "scale=1:1" > /etc/hosts"#,
            r#"-filter:v "scale=1:1" < /etc/hosts"#,
            r#"-filter:v "scale=1:1\n""#,
            r#"-filter:v "scale=1:1" EXEC"#,
            r#"-filter:v "scale=1:1" Eval"#,
            r#"-filter:v "scale=1:1" sYsTeM"#,
        ];

        for fragment in cases {
            let err = rejection(fragment);
            assert!(err.contains("prohibited pattern"), "{fragment}: {err}");
        }
    }

    #[test]
    fn test_denylist_applies_under_loose_policy() {
        let loose = CommandValidator::new(ValidationPolicy::DenylistOnly);
        let err = loose.validate("-an; rm -rf /").unwrap_err();
        assert!(matches!(err, ValidationError::ProhibitedPattern { rule: "statement separator", .. }));
    }

    #[test]
    fn test_less_than_before_pts_is_permitted() {
        assert!(strict().validate(r#"-filter:v "select='lt(t,2)',setpts=N/<PTS""#).is_ok());
    }

    #[test]
    fn test_less_than_rule_checks_every_occurrence() {
        let rule = DENYLIST.iter().find(|r| r.name == "input redirection").unwrap();
        assert!(!rule.matches("<PTS"));
        assert!(rule.matches("<PTS <x"));
        assert!(rule.matches("<pts"));
        assert!(rule.matches("trailing<"));
    }

    #[test]
    fn test_rejects_empty() {
        assert!(rejection("").contains("non-empty string"));
    }

    #[test]
    fn test_length_checked_before_patterns() {
        let long = format!("-filter:v \"{}\"; rm", "setpts=2.0*PTS".repeat(100));
        let err = strict().validate(&long).unwrap_err();
        assert!(matches!(err, ValidationError::TooLong { max: 1000, .. }));
        assert!(err.to_string().contains("maximum length"));
    }

    #[test]
    fn test_exactly_max_length_is_accepted_by_length_rule() {
        let prefix = r#"-filter:v "scale=1:1""#;
        let fragment = format!("{prefix}{}", " ".repeat(MAX_COMMAND_LENGTH - prefix.len()));
        assert_eq!(fragment.chars().count(), MAX_COMMAND_LENGTH);
        assert!(strict().validate(&fragment).is_ok());
    }

    #[test]
    fn test_strict_requires_filter_clause() {
        assert!(rejection("-an -c:v copy").contains("must contain -filter:v"));
        assert!(rejection("-filter:v scale=1:1").contains("must contain -filter:v"));
    }

    #[test]
    fn test_strict_rejects_unlisted_filter() {
        let err = rejection(r#"-filter:v "movie=/etc/passwd""#);
        assert!(err.contains("allowed filters"));
        assert!(err.contains("scale"));
    }

    #[test]
    fn test_loose_policy_skips_filter_clause() {
        let loose = CommandValidator::new(ValidationPolicy::DenylistOnly);
        assert!(loose.validate("-an -c:v copy").is_ok());
    }

    #[test]
    fn test_policy_parses_from_string() {
        assert_eq!("strict".parse::<ValidationPolicy>().unwrap(), ValidationPolicy::Strict);
        assert_eq!(
            "denylist_only".parse::<ValidationPolicy>().unwrap(),
            ValidationPolicy::DenylistOnly
        );
    }
}

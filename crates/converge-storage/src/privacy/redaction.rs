// PII detection and rewriting.
//
// A configurable pattern set runs over message content before the warm
// write; the original text is discarded. Strategies: replace with a
// marker, hash (truncated SHA-256, deterministic), or mask keeping the
// last four characters visible.

use converge_core::{CoreError, PiiSettings, PiiStrategy, Result};
use regex::Regex;
use sha2::{Digest, Sha256};

/// Hex characters kept from the SHA-256 digest under the hash strategy.
const HASH_LEN: usize = 16;

#[derive(Debug)]
struct Rule {
    kind: String,
    regex: Regex,
}

/// Compiled PII pattern set with a rewriting strategy.
#[derive(Debug)]
pub struct Redactor {
    rules: Vec<Rule>,
    strategy: PiiStrategy,
}

fn builtin_pattern(name: &str) -> Option<&'static str> {
    match name {
        "ssn" => Some(r"\b\d{3}-\d{2}-\d{4}\b"),
        "credit_card" => Some(r"\b\d{4}[ -]?\d{4}[ -]?\d{4}[ -]?\d{4}\b"),
        "phone" => Some(r"\b(?:\+1[ .-]?)?\(?\d{3}\)?[ .-]?\d{3}[ .-]?\d{4}\b"),
        "email" => Some(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b"),
        "ip" => Some(r"\b(?:\d{1,3}\.){3}\d{1,3}\b"),
        _ => None,
    }
}

fn mask_keep_last_four(text: &str) -> String {
    let visible = 4usize;
    let alnum_total = text.chars().filter(|c| c.is_alphanumeric()).count();
    let to_mask = alnum_total.saturating_sub(visible);
    let mut masked = 0usize;
    text.chars()
        .map(|c| {
            if c.is_alphanumeric() && masked < to_mask {
                masked += 1;
                '*'
            } else {
                c
            }
        })
        .collect()
}

fn hash_truncated(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    hex::encode(digest)[..HASH_LEN].to_string()
}

impl Redactor {
    /// Compile the configured pattern set.
    pub fn from_settings(settings: &PiiSettings) -> Result<Self> {
        let mut rules = vec![];
        for pattern in &settings.patterns {
            let (kind, raw) = if let Some(custom) = pattern.strip_prefix("custom:") {
                ("custom".to_string(), custom.to_string())
            } else {
                let raw = builtin_pattern(pattern).ok_or_else(|| {
                    CoreError::validation(format!("unknown pii pattern: {pattern}"))
                })?;
                (pattern.clone(), raw.to_string())
            };
            let regex = Regex::new(&raw)
                .map_err(|e| CoreError::validation(format!("invalid pii regex {pattern}: {e}")))?;
            rules.push(Rule { kind, regex });
        }
        Ok(Self {
            rules,
            strategy: settings.strategy,
        })
    }

    /// Rewrite all matches in `text` under the configured strategy.
    pub fn redact(&self, text: &str) -> String {
        let mut output = text.to_string();
        for rule in &self.rules {
            output = rule
                .regex
                .replace_all(&output, |caps: &regex::Captures<'_>| {
                    let matched = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
                    match self.strategy {
                        PiiStrategy::Replace => {
                            format!("[REDACTED_{}]", rule.kind.to_uppercase())
                        }
                        PiiStrategy::Hash => hash_truncated(matched),
                        PiiStrategy::Mask => mask_keep_last_four(matched),
                    }
                })
                .into_owned();
        }
        output
    }

    /// Whether any configured pattern still matches `text`.
    pub fn detects(&self, text: &str) -> bool {
        self.rules.iter().any(|r| r.regex.is_match(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redactor(patterns: &[&str], strategy: PiiStrategy) -> Redactor {
        Redactor::from_settings(&PiiSettings {
            patterns: patterns.iter().map(|s| s.to_string()).collect(),
            strategy,
            encrypt: false,
        })
        .unwrap()
    }

    #[test]
    fn test_ssn_mask_keeps_last_four() {
        let r = redactor(&["ssn"], PiiStrategy::Mask);
        let out = r.redact("SSN 123-45-6789");
        assert!(out.contains("***-**-6789"), "got: {out}");
        assert!(!r.detects(&out));
    }

    #[test]
    fn test_replace_is_idempotent() {
        let r = redactor(&["email"], PiiStrategy::Replace);
        let once = r.redact("contact alice@example.com today");
        assert_eq!(once, "contact [REDACTED_EMAIL] today");
        assert_eq!(r.redact(&once), once);
    }

    #[test]
    fn test_hash_is_deterministic_and_sanitizing() {
        let r = redactor(&["phone"], PiiStrategy::Hash);
        let a = r.redact("call 555-867-5309");
        let b = r.redact("call 555-867-5309");
        assert_eq!(a, b);
        assert!(!r.detects(&a));
        // Different inputs hash differently
        assert_ne!(a, r.redact("call 555-867-5308"));
    }

    #[test]
    fn test_all_builtins_sanitize() {
        let cases = [
            ("ssn", "123-45-6789"),
            ("credit_card", "4111 1111 1111 1111"),
            ("phone", "(415) 555-2671"),
            ("email", "bob@corp.io"),
            ("ip", "10.42.0.17"),
        ];
        for strategy in [PiiStrategy::Replace, PiiStrategy::Hash, PiiStrategy::Mask] {
            for (name, sample) in cases {
                let r = redactor(&[name], strategy);
                let out = r.redact(&format!("value: {sample}"));
                assert!(!r.detects(&out), "{name} under {strategy:?} left: {out}");
            }
        }
    }

    #[test]
    fn test_custom_pattern() {
        let r = redactor(&["custom:ACC-\\d{8}"], PiiStrategy::Replace);
        let out = r.redact("account ACC-12345678 closed");
        assert_eq!(out, "account [REDACTED_CUSTOM] closed");
    }

    #[test]
    fn test_unknown_builtin_rejected() {
        let err = Redactor::from_settings(&PiiSettings {
            patterns: vec!["passport".into()],
            strategy: PiiStrategy::Replace,
            encrypt: false,
        })
        .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_mask_short_value_unchanged_tail() {
        let r = redactor(&["custom:\\bpin \\d{4}\\b"], PiiStrategy::Mask);
        // Only 4 trailing alphanumerics stay visible; "pin" itself is masked
        let out = r.redact("pin 9731");
        assert_eq!(out, "*** 9731");
    }
}

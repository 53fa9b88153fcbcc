//! Security header scoring

use reqwest::header::HeaderMap;
use serde::Serialize;

/// Result of checking one security header
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderCheck {
    /// Canonical header name
    pub name: String,
    pub present: bool,
    /// Present and well-formed
    pub valid: bool,
    pub value: Option<String>,
    /// Points this header contributes when valid
    pub weight: u32,
}

/// Security posture derived from response headers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityHeaders {
    /// One entry per checked header, always in the same order
    pub checks: Vec<HeaderCheck>,
    /// Parsed HSTS max-age, when the header carries one
    pub hsts_max_age: Option<u64>,
    /// Sum of weights of valid headers, out of 100
    pub score: u32,
    pub recommendations: Vec<String>,
}

impl SecurityHeaders {
    pub fn check(&self, name: &str) -> Option<&HeaderCheck> {
        self.checks
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// A one year HSTS max-age, the usual preload minimum
const HSTS_RECOMMENDED_MAX_AGE: u64 = 31_536_000;

const REFERRER_POLICIES: &[&str] = &[
    "no-referrer",
    "no-referrer-when-downgrade",
    "origin",
    "origin-when-cross-origin",
    "same-origin",
    "strict-origin",
    "strict-origin-when-cross-origin",
    "unsafe-url",
];

struct Rule {
    name: &'static str,
    weight: u32,
    validate: fn(&str) -> bool,
    missing: &'static str,
    invalid: &'static str,
}

const RULES: &[Rule] = &[
    Rule {
        name: "Strict-Transport-Security",
        weight: 30,
        validate: |v| parse_hsts_max_age(v).map(|age| age > 0).unwrap_or(false),
        missing: "Add Strict-Transport-Security with max-age=31536000; includeSubDomains",
        invalid: "Fix Strict-Transport-Security: it needs a positive numeric max-age",
    },
    Rule {
        name: "Content-Security-Policy",
        weight: 25,
        validate: |v| !v.trim().is_empty(),
        missing: "Add a Content-Security-Policy that restricts script and frame sources",
        invalid: "Fix Content-Security-Policy: the policy is empty",
    },
    Rule {
        name: "X-Frame-Options",
        weight: 15,
        validate: |v| {
            let v = v.trim();
            v.eq_ignore_ascii_case("DENY") || v.eq_ignore_ascii_case("SAMEORIGIN")
        },
        missing: "Add X-Frame-Options: DENY or SAMEORIGIN to prevent clickjacking",
        invalid: "Fix X-Frame-Options: only DENY and SAMEORIGIN are honoured",
    },
    Rule {
        name: "X-Content-Type-Options",
        weight: 15,
        validate: |v| v.trim().eq_ignore_ascii_case("nosniff"),
        missing: "Add X-Content-Type-Options: nosniff",
        invalid: "Fix X-Content-Type-Options: the only valid value is nosniff",
    },
    Rule {
        name: "Referrer-Policy",
        weight: 15,
        validate: |v| {
            // Browsers use the last policy they understand
            v.split(',')
                .map(|p| p.trim().to_ascii_lowercase())
                .any(|p| REFERRER_POLICIES.contains(&p.as_str()))
        },
        missing: "Add Referrer-Policy: strict-origin-when-cross-origin",
        invalid: "Fix Referrer-Policy: no recognised policy token",
    },
];

/// Scores the security headers of a response
///
/// Deterministic: identical header sets always produce identical output.
pub fn score_security_headers(headers: &HeaderMap) -> SecurityHeaders {
    let mut checks = Vec::with_capacity(RULES.len());
    let mut recommendations = Vec::new();
    let mut score = 0;

    for rule in RULES {
        let value = joined_header(headers, rule.name);
        let valid = value.as_deref().map(rule.validate).unwrap_or(false);

        match (&value, valid) {
            (None, _) => recommendations.push(rule.missing.to_string()),
            (Some(_), false) => recommendations.push(rule.invalid.to_string()),
            (Some(_), true) => score += rule.weight,
        }

        checks.push(HeaderCheck {
            name: rule.name.to_string(),
            present: value.is_some(),
            valid,
            value,
            weight: rule.weight,
        });
    }

    let hsts_max_age = joined_header(headers, "Strict-Transport-Security")
        .as_deref()
        .and_then(parse_hsts_max_age);

    if let Some(age) = hsts_max_age {
        if age > 0 && age < HSTS_RECOMMENDED_MAX_AGE {
            recommendations.push(format!(
                "Raise Strict-Transport-Security max-age from {} to at least {}",
                age, HSTS_RECOMMENDED_MAX_AGE
            ));
        }
    }

    SecurityHeaders {
        checks,
        hsts_max_age,
        score,
        recommendations,
    }
}

/// Joins repeated header values with ", " as HTTP list semantics allow
fn joined_header(headers: &HeaderMap, name: &str) -> Option<String> {
    let values: Vec<&str> = headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();

    if values.is_empty() {
        None
    } else {
        Some(values.join(", "))
    }
}

/// Extracts the numeric max-age directive of an HSTS header
pub fn parse_hsts_max_age(value: &str) -> Option<u64> {
    value.split(';').find_map(|directive| {
        let (key, val) = directive.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("max-age") {
            val.trim().trim_matches('"').parse().ok()
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(value));
        }
        map
    }

    fn hardened() -> HeaderMap {
        headers(&[
            ("strict-transport-security", "max-age=63072000; includeSubDomains; preload"),
            ("content-security-policy", "default-src 'self'"),
            ("x-frame-options", "DENY"),
            ("x-content-type-options", "nosniff"),
            ("referrer-policy", "strict-origin-when-cross-origin"),
        ])
    }

    #[test]
    fn test_all_headers_present_scores_full() {
        let security = score_security_headers(&hardened());
        assert_eq!(security.score, 100);
        assert!(security.recommendations.is_empty());
        assert_eq!(security.hsts_max_age, Some(63_072_000));
        assert!(security.checks.iter().all(|c| c.present && c.valid));
    }

    #[test]
    fn test_no_headers_scores_zero_with_one_recommendation_each() {
        let security = score_security_headers(&HeaderMap::new());
        assert_eq!(security.score, 0);
        assert_eq!(security.checks.len(), 5);
        assert_eq!(security.recommendations.len(), 5);
        assert!(security.checks.iter().all(|c| !c.present));
    }

    #[test]
    fn test_invalid_headers_score_nothing() {
        let security = score_security_headers(&headers(&[
            ("strict-transport-security", "includeSubDomains"),
            ("x-frame-options", "ALLOW-FROM https://example.com"),
            ("x-content-type-options", "sniff"),
        ]));

        assert_eq!(security.score, 0);
        let hsts = security.check("strict-transport-security").unwrap();
        assert!(hsts.present);
        assert!(!hsts.valid);
        assert!(security
            .recommendations
            .iter()
            .any(|r| r.starts_with("Fix Strict-Transport-Security")));
    }

    #[test]
    fn test_partial_score_is_weighted() {
        let security = score_security_headers(&headers(&[
            ("x-frame-options", "sameorigin"),
            ("x-content-type-options", "nosniff"),
        ]));
        assert_eq!(security.score, 30);
        assert_eq!(security.recommendations.len(), 3);
    }

    #[test]
    fn test_short_hsts_max_age_gets_recommendation() {
        let security =
            score_security_headers(&headers(&[("strict-transport-security", "max-age=300")]));
        assert_eq!(security.hsts_max_age, Some(300));
        assert_eq!(security.check("Strict-Transport-Security").unwrap().valid, true);
        assert!(security
            .recommendations
            .iter()
            .any(|r| r.starts_with("Raise Strict-Transport-Security")));
    }

    #[test]
    fn test_hsts_zero_max_age_is_invalid() {
        let security = score_security_headers(&headers(&[("strict-transport-security", "max-age=0")]));
        assert_eq!(security.hsts_max_age, Some(0));
        assert!(!security.check("Strict-Transport-Security").unwrap().valid);
    }

    #[test]
    fn test_referrer_policy_fallback_list() {
        let security = score_security_headers(&headers(&[(
            "referrer-policy",
            "unknown-future-policy, same-origin",
        )]));
        assert!(security.check("Referrer-Policy").unwrap().valid);
    }

    #[test]
    fn test_parse_hsts_max_age() {
        assert_eq!(parse_hsts_max_age("max-age=31536000"), Some(31_536_000));
        assert_eq!(parse_hsts_max_age("includeSubDomains; MAX-AGE=\"600\""), Some(600));
        assert_eq!(parse_hsts_max_age("max-age=soon"), None);
        assert_eq!(parse_hsts_max_age("preload"), None);
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let first = score_security_headers(&hardened());
        let second = score_security_headers(&hardened());
        assert_eq!(first, second);

        let partial = headers(&[("x-frame-options", "DENY")]);
        assert_eq!(
            score_security_headers(&partial),
            score_security_headers(&partial)
        );
    }
}

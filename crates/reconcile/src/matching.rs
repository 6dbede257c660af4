use serde::Serialize;

/// How running instances are attributed to a workload.
///
/// `Prefix` is the compatible rule: an instance belongs to `web` when its name starts with
/// `web-`. It lets `web` claim instances of a workload called `web-api`. `NumericSuffix`
/// additionally requires everything after `web-` to be ASCII digits, which is the shape of
/// every name the reconciler generates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRule {
    #[default]
    Prefix,
    NumericSuffix,
}

impl MatchRule {
    /// `REZN_STRICT_MATCH=1` (or `true`) selects `NumericSuffix`.
    pub fn from_env() -> Self {
        let strict = std::env::var("REZN_STRICT_MATCH")
            .ok()
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if strict { MatchRule::NumericSuffix } else { MatchRule::Prefix }
    }

    pub fn matches(self, workload: &str, instance: &str) -> bool {
        let rest = match instance.strip_prefix(workload).and_then(|r| r.strip_prefix('-')) {
            Some(rest) => rest,
            None => return false,
        };
        match self {
            MatchRule::Prefix => true,
            MatchRule::NumericSuffix => !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_requires_separator() {
        let r = MatchRule::Prefix;
        assert!(r.matches("web", "web-1"));
        assert!(r.matches("web", "web-1712345678901234567"));
        assert!(!r.matches("web", "webserver-1"));
        assert!(!r.matches("web", "web"));
        assert!(!r.matches("web", "api-1"));
    }

    #[test]
    fn prefix_keeps_known_collision() {
        // `web` claims instances of `web-api`; only the strict rule separates them.
        assert!(MatchRule::Prefix.matches("web", "web-api-17"));
        assert!(!MatchRule::NumericSuffix.matches("web", "web-api-17"));
        assert!(MatchRule::NumericSuffix.matches("web-api", "web-api-17"));
    }

    #[test]
    fn strict_rejects_empty_suffix() {
        assert!(!MatchRule::NumericSuffix.matches("web", "web-"));
        assert!(MatchRule::Prefix.matches("web", "web-"));
    }
}

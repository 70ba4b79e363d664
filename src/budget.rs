//! Budget policy — the ordered `email → (limit, days)` lookup used at
//! admission time.
//!
//! Mirrors the first-match-wins list evaluation of an ordered policy table:
//! rules are tried in the order they were declared, and the first one whose
//! criterion matches wins. There is no rule intersection here (unlike a
//! scope-merging policy engine) — a budget rule just yields one pair of
//! numbers.

use crate::config::BUDGET_POLICY;

/// A single budget policy rule.
#[derive(Debug, Clone)]
pub struct BudgetRule {
    criterion: Criterion,
    /// Dollar spend limit over `days`.
    pub limit: f64,
    /// Rolling window size, in UTC calendar days.
    pub days: u32,
}

#[derive(Debug, Clone)]
enum Criterion {
    Email(String),
    Domain(String),
    Wildcard,
}

impl BudgetRule {
    /// A rule matching one exact email address.
    #[must_use]
    pub fn email(email: impl Into<String>, limit: f64, days: u32) -> Self {
        Self {
            criterion: Criterion::Email(email.into().to_lowercase()),
            limit,
            days,
        }
    }

    /// A rule matching every address at one domain (the part after `@`).
    #[must_use]
    pub fn domain(domain: impl Into<String>, limit: f64, days: u32) -> Self {
        Self {
            criterion: Criterion::Domain(domain.into().to_lowercase()),
            limit,
            days,
        }
    }

    /// A rule matching any email (the final fallback before the implicit
    /// `{limit: 0, days: 1}` default).
    #[must_use]
    pub fn wildcard(limit: f64, days: u32) -> Self {
        Self {
            criterion: Criterion::Wildcard,
            limit,
            days,
        }
    }

    fn matches(&self, email: &str, domain: &str) -> bool {
        match &self.criterion {
            Criterion::Email(e) => e == email,
            Criterion::Domain(d) => d == domain,
            Criterion::Wildcard => true,
        }
    }
}

/// The resolved `(limit, days)` pair for one identity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Budget {
    /// Dollar spend limit over `days`.
    pub limit: f64,
    /// Rolling window size, in UTC calendar days.
    pub days: u32,
}

impl Default for Budget {
    /// The implicit fallback when no rule in the policy table matches:
    /// `{limit: 0, days: 1}`. `limit == 0` blocks every request, which is
    /// the deliberately conservative default for an email the operator
    /// never configured.
    fn default() -> Self {
        Self { limit: 0.0, days: 1 }
    }
}

/// Resolve the budget for `email` by walking the policy table in order:
/// exact email, then `@domain`, then `*`, then the implicit default.
#[must_use]
pub fn resolve(email: &str) -> Budget {
    resolve_against(&BUDGET_POLICY, email)
}

fn resolve_against(rules: &[BudgetRule], email: &str) -> Budget {
    let email = email.to_lowercase();
    let domain = email.split('@').next_back().unwrap_or("");

    rules
        .iter()
        .find(|r| r.matches(&email, domain))
        .map(|r| Budget {
            limit: r.limit,
            days: r.days,
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_email_wins_over_domain_and_wildcard() {
        let rules = vec![
            BudgetRule::email("alice@example.com", 25.0, 30),
            BudgetRule::domain("example.com", 5.0, 30),
            BudgetRule::wildcard(1.0, 1),
        ];

        assert_eq!(
            resolve_against(&rules, "alice@example.com"),
            Budget { limit: 25.0, days: 30 }
        );
    }

    #[test]
    fn domain_wins_when_no_exact_email_rule() {
        let rules = vec![
            BudgetRule::email("alice@example.com", 25.0, 30),
            BudgetRule::domain("example.com", 5.0, 30),
            BudgetRule::wildcard(1.0, 1),
        ];

        assert_eq!(
            resolve_against(&rules, "bob@example.com"),
            Budget { limit: 5.0, days: 30 }
        );
    }

    #[test]
    fn wildcard_is_final_fallback_before_implicit_default() {
        let rules = vec![BudgetRule::wildcard(1.0, 1)];

        assert_eq!(
            resolve_against(&rules, "anyone@elsewhere.org"),
            Budget { limit: 1.0, days: 1 }
        );
    }

    #[test]
    fn implicit_default_when_no_rule_matches_at_all() {
        let rules: Vec<BudgetRule> = vec![BudgetRule::domain("example.com", 5.0, 30)];

        assert_eq!(
            resolve_against(&rules, "anyone@elsewhere.org"),
            Budget::default()
        );
        assert_eq!(Budget::default(), Budget { limit: 0.0, days: 1 });
    }

    #[test]
    fn lookup_is_case_insensitive_on_email_and_domain() {
        let rules = vec![BudgetRule::email("alice@example.com", 25.0, 30)];

        assert_eq!(
            resolve_against(&rules, "ALICE@EXAMPLE.COM"),
            Budget { limit: 25.0, days: 30 }
        );
    }
}

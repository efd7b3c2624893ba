//! Condition expression language: parser and evaluator.
//!
//! Grammar:
//! ```text
//! ConditionExpr  ::= Clause ( '&&' Clause )*
//! Clause         ::= Key '!=' Literal | Key '=' Literal | Key
//! Literal        ::= QuotedString | BareText
//! ```
//!
//! A bare `Key` clause holds when the key resolves to a non-empty string.
//! Parsing never fails; empty clauses are dropped and always hold.

use trellis_types::{Context, Outcome};

/// A parsed condition expression consisting of zero or more clauses joined by `&&`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionExpr {
    pub clauses: Vec<Clause>,
}

/// A single comparison clause: `key op value`, or a truthiness test on `key`.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub key: String,
    pub operator: Operator,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
    Truthy,
}

/// Parse a condition string into a [`ConditionExpr`].
pub fn parse_condition(input: &str) -> ConditionExpr {
    let clauses = input
        .split("&&")
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(parse_clause)
        .collect();
    ConditionExpr { clauses }
}

fn parse_clause(clause: &str) -> Clause {
    // `!=` must be found before `=` so `a!=b` is not read as `a!` = `b`.
    if let Some(idx) = clause.find("!=") {
        return Clause {
            key: clause[..idx].trim().to_string(),
            operator: Operator::NotEq,
            value: parse_literal(&clause[idx + 2..]),
        };
    }
    if let Some(idx) = clause.find('=') {
        return Clause {
            key: clause[..idx].trim().to_string(),
            operator: Operator::Eq,
            value: parse_literal(&clause[idx + 1..]),
        };
    }
    Clause {
        key: clause.to_string(),
        operator: Operator::Truthy,
        value: String::new(),
    }
}

/// Double-quoted literals are JSON-unescaped, falling back to the text
/// between the quotes. Anything else is used trimmed.
fn parse_literal(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        return serde_json::from_str::<String>(trimmed)
            .unwrap_or_else(|_| trimmed[1..trimmed.len() - 1].to_string());
    }
    trimmed.to_string()
}

/// Resolve a condition key against the current outcome and context.
///
/// `context.foo` looks up `context.foo` first, then `foo`.
pub fn resolve_key(key: &str, outcome: &Outcome, context: &Context) -> String {
    match key {
        "outcome" => outcome.status.as_str().to_string(),
        "preferred_label" => outcome.preferred_label.clone(),
        _ => {
            if let Some(stripped) = key.strip_prefix("context.") {
                let full = context.get_string(key, "");
                if !full.is_empty() {
                    return full;
                }
                return context.get_string(stripped, "");
            }
            context.get_string(key, "")
        }
    }
}

impl Clause {
    pub fn evaluate(&self, outcome: &Outcome, context: &Context) -> bool {
        let actual = resolve_key(&self.key, outcome, context);
        match self.operator {
            Operator::Eq => actual == self.value,
            Operator::NotEq => actual != self.value,
            Operator::Truthy => !actual.is_empty(),
        }
    }
}

impl ConditionExpr {
    /// True when every clause holds. An expression with no clauses is true.
    pub fn evaluate(&self, outcome: &Outcome, context: &Context) -> bool {
        self.clauses.iter().all(|c| c.evaluate(outcome, context))
    }
}

/// Parse and evaluate `condition` in one step.
pub fn evaluate_condition(condition: &str, outcome: &Outcome, context: &Context) -> bool {
    parse_condition(condition).evaluate(outcome, context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_types::StageStatus;

    fn ctx(pairs: &[(&str, &str)]) -> Context {
        let mut context = Context::new();
        for (k, v) in pairs {
            context.set(*k, *v);
        }
        context
    }

    #[test]
    fn simple_equality() {
        let expr = parse_condition("outcome=success");
        assert_eq!(expr.clauses.len(), 1);
        assert_eq!(expr.clauses[0].key, "outcome");
        assert_eq!(expr.clauses[0].operator, Operator::Eq);
        assert_eq!(expr.clauses[0].value, "success");

        let context = Context::new();
        assert!(expr.evaluate(&Outcome::success(), &context));
        assert!(!expr.evaluate(&Outcome::fail("x"), &context));
    }

    #[test]
    fn not_equal() {
        let expr = parse_condition("outcome!=success");
        assert_eq!(expr.clauses[0].operator, Operator::NotEq);
        let context = Context::new();
        assert!(expr.evaluate(&Outcome::fail("boom"), &context));
        assert!(!expr.evaluate(&Outcome::success(), &context));
    }

    #[test]
    fn compound_condition_is_a_conjunction() {
        let context = ctx(&[("tests_passed", "true")]);
        let cond = "outcome=success && context.tests_passed=true";
        assert!(evaluate_condition(cond, &Outcome::success(), &context));
        assert!(!evaluate_condition(cond, &Outcome::fail("no"), &context));
        let other = ctx(&[("tests_passed", "false")]);
        assert!(!evaluate_condition(cond, &Outcome::success(), &other));
    }

    #[test]
    fn empty_condition_and_empty_clauses_hold() {
        let context = Context::new();
        let outcome = Outcome::fail("x");
        assert!(evaluate_condition("", &outcome, &context));
        assert!(evaluate_condition("   ", &outcome, &context));
        assert!(evaluate_condition("outcome=fail && ", &outcome, &context));
        assert!(evaluate_condition("&&", &outcome, &context));
        assert!(parse_condition(" && ").clauses.is_empty());
    }

    #[test]
    fn bare_key_is_truthiness() {
        let context = ctx(&[("approved", "yes"), ("blank", "")]);
        let outcome = Outcome::success();
        assert!(evaluate_condition("approved", &outcome, &context));
        assert!(!evaluate_condition("blank", &outcome, &context));
        assert!(!evaluate_condition("missing", &outcome, &context));
        assert_eq!(parse_condition("approved").clauses[0].operator, Operator::Truthy);
    }

    #[test]
    fn context_prefix_falls_back_to_stripped_key() {
        let outcome = Outcome::success();
        let plain = ctx(&[("env", "prod")]);
        assert!(evaluate_condition("context.env=prod", &outcome, &plain));

        let both = ctx(&[("context.env", "staging"), ("env", "prod")]);
        assert!(evaluate_condition("context.env=staging", &outcome, &both));

        let neither = Context::new();
        assert!(evaluate_condition("context.unknown!=something", &outcome, &neither));
        assert!(evaluate_condition("context.unknown=", &outcome, &neither));
    }

    #[test]
    fn preferred_label_key() {
        let outcome = Outcome::with_label(StageStatus::Success, "Approve");
        let context = Context::new();
        assert!(evaluate_condition("preferred_label=Approve", &outcome, &context));
        assert!(!evaluate_condition("preferred_label=approve", &outcome, &context));
    }

    #[test]
    fn quoted_literals_are_unescaped() {
        let context = ctx(&[("msg", "say \"hi\""), ("spaced", " padded ")]);
        let outcome = Outcome::success();
        assert!(evaluate_condition(r#"msg="say \"hi\"""#, &outcome, &context));
        assert!(evaluate_condition(r#"spaced=" padded ""#, &outcome, &context));
        let expr = parse_condition(r#"outcome="success""#);
        assert_eq!(expr.clauses[0].value, "success");
        // Not valid JSON: falls back to the raw text between the quotes.
        let expr = parse_condition(r#"k="a\qb""#);
        assert_eq!(expr.clauses[0].value, r"a\qb");
    }

    #[test]
    fn numbers_compare_by_canonical_string() {
        let mut context = Context::new();
        context.set("count", 42i64);
        assert!(evaluate_condition("context.count=42", &Outcome::success(), &context));
        assert!(evaluate_condition("count!=41", &Outcome::success(), &context));
    }

    #[test]
    fn status_strings() {
        let context = Context::new();
        let partial = Outcome::new(StageStatus::PartialSuccess);
        assert!(evaluate_condition("outcome=partial_success", &partial, &context));
        let retry = Outcome::new(StageStatus::Retry);
        assert!(evaluate_condition("outcome=retry", &retry, &context));
    }
}

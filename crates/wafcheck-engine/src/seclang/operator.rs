//! `@operator` matching.

use regex::Regex;

#[derive(Debug, Clone)]
pub enum Operator {
    Rx(Regex),
    Contains(String),
    StrEq(String),
    BeginsWith(String),
    EndsWith(String),
    Within(String),
    Pm(Vec<String>),
    Eq(i64),
    Gt(i64),
    Ge(i64),
    Lt(i64),
    Le(i64),
    Unconditional,
}

/// A parsed operator with its negation flag.
#[derive(Debug, Clone)]
pub struct OperatorSpec {
    pub operator: Operator,
    pub negated: bool,
}

impl OperatorSpec {
    /// Parses the second `SecRule` argument, e.g. `!@contains admin`.
    ///
    /// A bare expression without `@` is a regular expression.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let (negated, rest) = match raw.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };

        let Some(rest) = rest.strip_prefix('@') else {
            return Ok(Self {
                operator: Operator::Rx(compile(rest)?),
                negated,
            });
        };

        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim_start()),
            None => (rest, ""),
        };

        let number = |arg: &str| {
            arg.trim()
                .parse::<i64>()
                .map_err(|_| format!("@{name} expects an integer, got '{arg}'"))
        };

        let operator = match name.to_ascii_lowercase().as_str() {
            "rx" => Operator::Rx(compile(arg)?),
            "contains" => Operator::Contains(arg.to_string()),
            "streq" => Operator::StrEq(arg.to_string()),
            "beginswith" => Operator::BeginsWith(arg.to_string()),
            "endswith" => Operator::EndsWith(arg.to_string()),
            "within" => Operator::Within(arg.to_string()),
            "pm" => Operator::Pm(
                arg.split_whitespace()
                    .map(|p| p.to_ascii_lowercase())
                    .collect(),
            ),
            "eq" => Operator::Eq(number(arg)?),
            "gt" => Operator::Gt(number(arg)?),
            "ge" => Operator::Ge(number(arg)?),
            "lt" => Operator::Lt(number(arg)?),
            "le" => Operator::Le(number(arg)?),
            "unconditionalmatch" => Operator::Unconditional,
            other => return Err(format!("unsupported operator '@{other}'")),
        };

        Ok(Self { operator, negated })
    }

    /// Evaluates against one (already transformed) value.
    pub fn matches(&self, value: &str) -> bool {
        self.operator.matches(value) != self.negated
    }
}

impl Operator {
    fn matches(&self, value: &str) -> bool {
        // Non-numeric values compare as 0.
        let num = || value.trim().parse::<i64>().unwrap_or(0);
        match self {
            Operator::Rx(re) => re.is_match(value),
            Operator::Contains(needle) => value.contains(needle.as_str()),
            Operator::StrEq(s) => value == s,
            Operator::BeginsWith(s) => value.starts_with(s.as_str()),
            Operator::EndsWith(s) => value.ends_with(s.as_str()),
            Operator::Within(haystack) => !value.is_empty() && haystack.contains(value),
            Operator::Pm(phrases) => {
                let lower = value.to_ascii_lowercase();
                phrases.iter().any(|p| lower.contains(p.as_str()))
            }
            Operator::Eq(n) => num() == *n,
            Operator::Gt(n) => num() > *n,
            Operator::Ge(n) => num() >= *n,
            Operator::Lt(n) => num() < *n,
            Operator::Le(n) => num() <= *n,
            Operator::Unconditional => true,
        }
    }
}

fn compile(pattern: &str) -> Result<Regex, String> {
    Regex::new(pattern).map_err(|e| format!("invalid regular expression '{pattern}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_expression_is_regex() {
        let op = OperatorSpec::parse("^/admin").unwrap();
        assert!(op.matches("/admin/panel"));
        assert!(!op.matches("/public"));
    }

    #[test]
    fn test_negated_contains() {
        let op = OperatorSpec::parse("!@contains curl").unwrap();
        assert!(op.matches("Mozilla/5.0"));
        assert!(!op.matches("curl/8.0"));
    }

    #[test]
    fn test_pm_is_case_insensitive() {
        let op = OperatorSpec::parse("@pm nikto sqlmap").unwrap();
        assert!(op.matches("Mozilla (SQLMap)"));
        assert!(!op.matches("firefox"));
    }

    #[test]
    fn test_numeric_operators() {
        assert!(OperatorSpec::parse("@gt 10").unwrap().matches("11"));
        assert!(!OperatorSpec::parse("@gt 10").unwrap().matches("abc"));
        assert!(OperatorSpec::parse("@eq 0").unwrap().matches("abc"));
        assert!(OperatorSpec::parse("@eq ten").is_err());
    }

    #[test]
    fn test_within_rejects_empty_value() {
        let op = OperatorSpec::parse("@within GET POST").unwrap();
        assert!(op.matches("GET"));
        assert!(!op.matches(""));
        assert!(!op.matches("PUT"));
    }

    #[test]
    fn test_unknown_operator() {
        assert!(OperatorSpec::parse("@detectSQLi").is_err());
        assert!(OperatorSpec::parse("@rx (unclosed").is_err());
    }
}

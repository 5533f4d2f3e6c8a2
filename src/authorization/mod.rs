//! Rule-based authorization.
//!
//! Each route owns a [`Policy`]: its rule strings compiled once at startup.
//! A request is allowed only if every rule evaluates to `true`, checked in
//! declaration order and stopping at the first rule that is `false` or fails
//! to evaluate. An empty rule list allows everything.

pub mod context;

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use crate::policy::{self, EvalError, PolicyError, Program, RequestContext};

/// Why a request was denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// The rule evaluated to `false`.
    False,
    /// The rule could not be evaluated.
    Error(EvalError),
}

/// Outcome of evaluating a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny {
        /// Index of the first failing rule
        rule: usize,
        reason: DenyReason,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// A compiled, ordered rule list.
#[derive(Debug, Default)]
pub struct Policy {
    programs: Vec<Program>,
}

impl Policy {
    /// Compile every rule; the first failure names the rule's index.
    pub fn compile<S: AsRef<str>>(rules: &[S]) -> Result<Self, PolicyError> {
        let programs = rules
            .iter()
            .enumerate()
            .map(|(index, rule)| {
                let rule = rule.as_ref();
                policy::compile(rule).map_err(|e| e.in_rule(index, rule))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { programs })
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Evaluate rules in order, stopping at the first that does not hold.
    pub fn evaluate(&self, ctx: &RequestContext) -> Decision {
        for (rule, program) in self.programs.iter().enumerate() {
            match program.evaluate(ctx) {
                Ok(true) => {}
                Ok(false) => {
                    return Decision::Deny {
                        rule,
                        reason: DenyReason::False,
                    };
                }
                Err(e) => {
                    return Decision::Deny {
                        rule,
                        reason: DenyReason::Error(e),
                    };
                }
            }
        }
        Decision::Allow
    }

    fn source(&self, index: usize) -> &str {
        self.programs.get(index).map_or("", Program::source)
    }
}

/// Deny with `403` unless the route's policy allows the request.
pub async fn authorization_middleware(
    State(policy): State<Arc<Policy>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if policy.is_empty() {
        return next.run(request).await;
    }

    let ctx = context::extract(&request);
    match policy.evaluate(&ctx) {
        Decision::Allow => {
            debug!(host = %ctx.host, path = %ctx.path, "Request authorized");
            next.run(request).await
        }
        Decision::Deny {
            rule,
            reason: DenyReason::False,
        } => {
            warn!(
                rule,
                expression = policy.source(rule),
                host = %ctx.host,
                path = %ctx.path,
                ip = %ctx.ip,
                "Request denied by policy"
            );
            StatusCode::FORBIDDEN.into_response()
        }
        Decision::Deny {
            rule,
            reason: DenyReason::Error(e),
        } => {
            warn!(
                rule,
                expression = policy.source(rule),
                error = %e,
                host = %ctx.host,
                path = %ctx.path,
                "Policy evaluation failed, denying"
            );
            StatusCode::FORBIDDEN.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn ctx(host: &str) -> RequestContext {
        RequestContext {
            host: host.to_string(),
            path: "/".to_string(),
            ip: "10.0.0.5".to_string(),
            time: Utc::now(),
        }
    }

    #[test]
    fn empty_policy_allows() {
        let policy = Policy::compile::<&str>(&[]).unwrap();
        assert!(policy.evaluate(&ctx("any")).is_allowed());
    }

    #[test]
    fn all_true_allows() {
        let policy = Policy::compile(&[
            r#"request.host == "a.example.com""#,
            r#"network(request.ip, "10.0.0.0/24")"#,
        ])
        .unwrap();
        assert_eq!(policy.evaluate(&ctx("a.example.com")), Decision::Allow);
    }

    #[test]
    fn first_false_rule_denies_before_erroring_rule() {
        let policy =
            Policy::compile(&["true", "false", "request.path.matches(request.host)"]).unwrap();
        assert_eq!(
            policy.evaluate(&ctx("(")),
            Decision::Deny {
                rule: 1,
                reason: DenyReason::False
            }
        );
    }

    #[test]
    fn evaluation_error_denies() {
        let policy = Policy::compile(&["true", "request.path.matches(request.host)"]).unwrap();
        assert!(matches!(
            policy.evaluate(&ctx("(")),
            Decision::Deny {
                rule: 1,
                reason: DenyReason::Error(EvalError::Execution(_))
            }
        ));
    }

    #[test]
    fn host_mismatch_denies() {
        let policy = Policy::compile(&[r#"request.host == "a.example.com""#]).unwrap();
        assert!(!policy.evaluate(&ctx("b.example.com")).is_allowed());
    }

    #[test]
    fn compile_error_names_rule_index() {
        let err = Policy::compile(&["true", "request.nope == 1"]).unwrap_err();
        assert!(matches!(err, PolicyError::Rule { index: 1, .. }));
        assert!(err.to_string().contains("request.nope"));
    }
}

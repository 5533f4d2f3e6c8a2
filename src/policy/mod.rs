//! Policy expressions.
//!
//! Authorization rules are CEL expressions evaluated against the attributes
//! of a single request:
//!
//! | Attribute      | Type      |
//! |----------------|-----------|
//! | `request.host` | string    |
//! | `request.path` | string    |
//! | `request.ip`   | string    |
//! | `request.time` | timestamp |
//!
//! plus `network(ip, cidr)` (also callable as `ip.network(cidr)`), true iff
//! `ip` falls inside `cidr`. The CEL standard library (`startsWith`,
//! `matches`, `timestamp`, `duration`, `getHours`, ...) is available.
//!
//! [`compile`] parses a rule once at startup and rejects it unless it only
//! references `request` and evaluates to a `bool` against a reference
//! request. The resulting [`Program`] is immutable and can be evaluated
//! concurrently from any number of requests. Evaluation performs no I/O.
//!
//! ```text
//! request.host == "intranet.example.com" && network(request.ip, "10.0.0.0/8")
//! request.path.startsWith("/admin") ? request.time.getHours() < 18 : true
//! ```

pub mod network;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use cel_interpreter::extractors::This;
use cel_interpreter::objects::{Key, Map};
use cel_interpreter::{Context, Value};
use chrono::{DateTime, Utc};

pub use network::in_network;

/// Name of the single variable rules may reference.
const REQUEST_VAR: &str = "request";

/// Policy compile errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    /// The rule is not a well-formed expression.
    #[error("syntax error: {0}")]
    Syntax(String),

    /// The rule parsed but references something undefined or is not boolean.
    #[error("invalid rule: {0}")]
    Invalid(String),

    /// A rule in a rule list failed to compile.
    #[error("rule {index} `{rule}`: {source}")]
    Rule {
        /// Position of the rule in its list
        index: usize,
        /// Rule source text
        rule: String,
        /// Underlying error
        source: Box<PolicyError>,
    },
}

impl PolicyError {
    /// Attach the rule's list position and source text.
    #[must_use]
    pub fn in_rule(self, index: usize, rule: &str) -> Self {
        Self::Rule {
            index,
            rule: rule.to_string(),
            source: Box::new(self),
        }
    }
}

/// Runtime evaluation errors. Every one of them denies the request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    /// The expression failed while executing.
    #[error("{0}")]
    Execution(String),

    /// The expression produced something other than a bool.
    #[error("rule produced {0} instead of bool")]
    NotBool(&'static str),
}

/// Request attributes visible to policy expressions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// `Host` header as received
    pub host: String,
    /// Request URI path and query as received
    pub path: String,
    /// Client address without port; empty when unknown
    pub ip: String,
    /// Instant the request was received
    pub time: DateTime<Utc>,
}

impl RequestContext {
    /// Neutral request every rule is checked against at compile time.
    fn reference() -> Self {
        Self {
            host: "localhost".to_string(),
            path: "/".to_string(),
            ip: "127.0.0.1".to_string(),
            time: DateTime::UNIX_EPOCH,
        }
    }

    fn to_value(&self) -> Value {
        let string = |s: &str| Value::String(Arc::new(s.to_string()));
        let fields = HashMap::from([
            (Key::String(Arc::new("host".to_string())), string(&self.host)),
            (Key::String(Arc::new("path".to_string())), string(&self.path)),
            (Key::String(Arc::new("ip".to_string())), string(&self.ip)),
            (
                Key::String(Arc::new("time".to_string())),
                Value::Timestamp(self.time.fixed_offset()),
            ),
        ]);
        Value::Map(Map {
            map: Arc::new(fields),
        })
    }
}

/// A compiled rule.
pub struct Program {
    source: String,
    program: cel_interpreter::Program,
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl Program {
    /// Rule source text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against one request. The result is deterministic for a given context.
    pub fn evaluate(&self, ctx: &RequestContext) -> Result<bool, EvalError> {
        let mut env = Context::default();
        env.add_function("network", network_predicate);
        env.add_variable_from_value(REQUEST_VAR, ctx.to_value());

        match self.program.execute(&env) {
            Ok(Value::Bool(b)) => Ok(b),
            Ok(other) => Err(EvalError::NotBool(type_name(&other))),
            Err(e) => Err(EvalError::Execution(e.to_string())),
        }
    }
}

/// Compile one rule.
///
/// Besides parsing, the rule must reference no variable other than
/// `request` and must evaluate cleanly to a `bool` against a reference
/// request, which catches unknown attributes, wrong argument counts and
/// non-boolean rules before the gateway starts serving.
pub fn compile(source: &str) -> Result<Program, PolicyError> {
    let program = cel_interpreter::Program::compile(source)
        .map_err(|e| PolicyError::Syntax(e.to_string()))?;

    let references = program.references();
    if let Some(name) = references
        .variables()
        .into_iter()
        .find(|name| *name != REQUEST_VAR)
    {
        return Err(PolicyError::Invalid(format!(
            "undeclared reference to '{name}'"
        )));
    }

    let program = Program {
        source: source.to_string(),
        program,
    };
    program
        .evaluate(&RequestContext::reference())
        .map_err(|e| PolicyError::Invalid(e.to_string()))?;

    Ok(program)
}

/// `network(ip, cidr)` and `ip.network(cidr)`.
fn network_predicate(This(ip): This<Arc<String>>, cidr: Arc<String>) -> bool {
    in_network(&ip, &cidr)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Int(_) => "int",
        Value::UInt(_) => "uint",
        Value::Float(_) => "double",
        Value::String(_) => "string",
        Value::Bytes(_) => "bytes",
        Value::List(_) => "list",
        Value::Map(_) => "map",
        Value::Timestamp(_) => "timestamp",
        Value::Duration(_) => "duration",
        Value::Null => "null",
        _ => "value",
    }
}

//! Procedures and the router that dispatches to them.

use crate::error::{ErrorCode, ProcedureError, Result};
use crate::observable::Observable;

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Kind of procedure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcedureType {
    /// Read-only call answered with one value.
    Query,
    /// State-changing call answered with one value.
    Mutation,
    /// Long-lived call answered with a stream of values.
    Subscription,
}

impl ProcedureType {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
            Self::Subscription => "subscription",
        }
    }
}

impl fmt::Display for ProcedureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One invocation of a procedure.
#[derive(Clone, Debug, PartialEq)]
pub struct ProcedureCall {
    /// Dot-separated procedure path.
    pub path: String,
    /// Type the caller asked for.
    pub procedure_type: ProcedureType,
    /// Raw input.
    pub input: Value,
    /// Caller-supplied context.
    pub context: Option<Value>,
}

impl ProcedureCall {
    /// Decodes the input.
    ///
    /// # Errors
    ///
    /// Returns `BAD_REQUEST` if the input does not match `T`.
    pub fn input<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.input.clone()).map_err(|e| {
            ProcedureError::bad_request(format!("Invalid input for {}: {e}", self.path))
        })
    }
}

/// What a procedure produced.
#[derive(Debug)]
pub enum ProcedureOutput {
    /// A single value, from a query or mutation.
    Data(Value),
    /// A stream of values, from a subscription.
    Stream(Observable<Value, ProcedureError>),
}

type Resolver =
    Arc<dyn Fn(ProcedureCall) -> BoxFuture<'static, Result<ProcedureOutput>> + Send + Sync>;

#[derive(Clone)]
struct Procedure {
    procedure_type: ProcedureType,
    resolver: Resolver,
}

/// Maps procedure paths to resolvers.
///
/// ```ignore
/// let router = Router::new()
///     .query("greet", |call| async move {
///         let name: String = call.input()?;
///         Ok(json!(format!("Hello, {name}")))
///     });
/// ```
#[derive(Clone, Default)]
pub struct Router {
    procedures: HashMap<String, Procedure>,
}

impl Router {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a query.
    #[must_use]
    pub fn query<F, Fut>(self, path: impl Into<String>, resolver: F) -> Self
    where
        F: Fn(ProcedureCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.procedure(path, ProcedureType::Query, move |call| {
            resolver(call).map(|result| result.map(ProcedureOutput::Data))
        })
    }

    /// Adds a mutation.
    #[must_use]
    pub fn mutation<F, Fut>(self, path: impl Into<String>, resolver: F) -> Self
    where
        F: Fn(ProcedureCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.procedure(path, ProcedureType::Mutation, move |call| {
            resolver(call).map(|result| result.map(ProcedureOutput::Data))
        })
    }

    /// Adds a subscription.
    #[must_use]
    pub fn subscription<F, Fut>(self, path: impl Into<String>, resolver: F) -> Self
    where
        F: Fn(ProcedureCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Observable<Value, ProcedureError>>> + Send + 'static,
    {
        self.procedure(path, ProcedureType::Subscription, move |call| {
            resolver(call).map(|result| result.map(ProcedureOutput::Stream))
        })
    }

    /// Adds a procedure whose resolver returns a raw [`ProcedureOutput`].
    #[must_use]
    pub fn procedure<F, Fut>(
        mut self,
        path: impl Into<String>,
        procedure_type: ProcedureType,
        resolver: F,
    ) -> Self
    where
        F: Fn(ProcedureCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ProcedureOutput>> + Send + 'static,
    {
        let path = path.into();
        let resolver: Resolver = Arc::new(move |call| resolver(call).boxed());

        if self
            .procedures
            .insert(
                path.clone(),
                Procedure {
                    procedure_type,
                    resolver,
                },
            )
            .is_some()
        {
            warn!("Procedure {} redefined", path);
        }

        self
    }

    /// Mounts every procedure of `router` under `prefix`.
    #[must_use]
    pub fn merge(mut self, prefix: &str, router: Self) -> Self {
        for (path, procedure) in router.procedures {
            let path = if prefix.is_empty() {
                path
            } else {
                format!("{prefix}.{path}")
            };
            if self.procedures.insert(path.clone(), procedure).is_some() {
                warn!("Procedure {} redefined by merge", path);
            }
        }
        self
    }

    /// Whether a procedure is registered at `path`.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.procedures.contains_key(path)
    }

    /// Registered paths, sorted.
    #[must_use]
    pub fn paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.procedures.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }

    /// Invokes the procedure at `call.path`.
    ///
    /// # Errors
    ///
    /// Returns `NOT_FOUND` if there is no procedure of the requested type at
    /// that path, or whatever the resolver fails with.
    pub async fn call_procedure(&self, call: ProcedureCall) -> Result<ProcedureOutput> {
        let procedure = self
            .procedures
            .get(&call.path)
            .filter(|procedure| procedure.procedure_type == call.procedure_type)
            .ok_or_else(|| {
                ProcedureError::new(
                    ErrorCode::NotFound,
                    format!(
                        "No \"{}\"-procedure on path \"{}\"",
                        call.procedure_type, call.path
                    ),
                )
            })?;

        debug!("Calling {} {}", call.procedure_type, call.path);
        let resolver = Arc::clone(&procedure.resolver);
        resolver(call).await
    }
}

impl Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("paths", &self.paths())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(path: &str, procedure_type: ProcedureType, input: Value) -> ProcedureCall {
        ProcedureCall {
            path: path.to_string(),
            procedure_type,
            input,
            context: None,
        }
    }

    fn data(output: ProcedureOutput) -> Value {
        match output {
            ProcedureOutput::Data(value) => value,
            ProcedureOutput::Stream(_) => panic!("expected data"),
        }
    }

    #[tokio::test]
    async fn test_query_and_mutation_dispatch() {
        let router = Router::new()
            .query("add", |call| async move {
                let (a, b): (i64, i64) = call.input()?;
                Ok::<_, ProcedureError>(json!(a + b))
            })
            .mutation("reset", |_call| async move { Ok(json!("done")) });

        let sum = router
            .call_procedure(call("add", ProcedureType::Query, json!([2, 3])))
            .await
            .unwrap();
        assert_eq!(data(sum), json!(5));

        let reset = router
            .call_procedure(call("reset", ProcedureType::Mutation, Value::Null))
            .await
            .unwrap();
        assert_eq!(data(reset), json!("done"));
    }

    #[tokio::test]
    async fn test_unknown_path_and_wrong_type_are_not_found() {
        let router = Router::new().query("greet", |_call| async move { Ok(json!("hi")) });

        let err = router
            .call_procedure(call("missing", ProcedureType::Query, Value::Null))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
        assert_eq!(err.message, "No \"query\"-procedure on path \"missing\"");

        let err = router
            .call_procedure(call("greet", ProcedureType::Mutation, Value::Null))
            .await
            .unwrap_err();
        assert_eq!(err.message, "No \"mutation\"-procedure on path \"greet\"");
    }

    #[tokio::test]
    async fn test_bad_input_is_bad_request() {
        let router = Router::new().query("square", |call| async move {
            let n: i64 = call.input()?;
            Ok::<_, ProcedureError>(json!(n * n))
        });

        let err = router
            .call_procedure(call("square", ProcedureType::Query, json!("four")))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::BadRequest);
    }

    #[test]
    fn test_merge_prefixes_paths() {
        let users = Router::new()
            .query("get", |_call| async move { Ok(Value::Null) })
            .mutation("rename", |_call| async move { Ok(Value::Null) });
        let router = Router::new()
            .query("health", |_call| async move { Ok(json!("ok")) })
            .merge("user", users);

        assert_eq!(router.paths(), vec!["health", "user.get", "user.rename"]);
        assert!(router.contains("user.get"));
        assert!(!router.contains("get"));
    }

    #[test]
    fn test_procedure_type_wire_names() {
        assert_eq!(
            serde_json::to_value(ProcedureType::Subscription).unwrap(),
            json!("subscription")
        );
        assert_eq!(
            serde_json::from_value::<ProcedureType>(json!("mutation")).unwrap(),
            ProcedureType::Mutation
        );
    }
}

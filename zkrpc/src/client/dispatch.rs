// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Method registry and failure classification.

use super::ClientError;
use faststr::FastStr;
use serde::de::{self, DeserializeOwned, Unexpected};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;
use tarpc::client::RpcError;

/// Transport-level outcome class of a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The endpoint could not be reached or the connection dropped.
    Unavailable,
    /// The transport broke mid-call.
    Internal,
    /// The call outlived its deadline.
    DeadlineExceeded,
    /// The server rejected or failed the request.
    Server(io::ErrorKind),
}

impl Status {
    /// Classifies a tarpc error.
    #[allow(unreachable_patterns)]
    pub fn of(err: &RpcError) -> Self {
        match err {
            RpcError::Shutdown | RpcError::Send(_) => Status::Unavailable,
            RpcError::Channel(_) => Status::Internal,
            RpcError::DeadlineExceeded => Status::DeadlineExceeded,
            RpcError::Server(e) => match e.kind {
                io::ErrorKind::ConnectionRefused
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::NotConnected
                | io::ErrorKind::BrokenPipe => Status::Unavailable,
                kind => Status::Server(kind),
            },
            _ => Status::Internal,
        }
    }

    /// Whether a fresh channel may fix it.
    #[inline]
    pub fn is_transient(self) -> bool {
        matches!(self, Status::Unavailable | Status::Internal)
    }
}

/// Default retry predicate: rebuild and retry on unavailable or internal failures.
pub fn is_transient(err: &RpcError) -> bool {
    Status::of(err).is_transient()
}

/// Builds a request from keyword arguments.
pub type BuildFn<Req> = Arc<dyn Fn(&Value) -> Result<Req, serde_json::Error> + Send + Sync>;

/// One remotely callable method: its name and how to build its request.
pub struct MethodDescriptor<Req> {
    name: FastStr,
    build: BuildFn<Req>,
}

impl<Req> Clone for MethodDescriptor<Req> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            build: self.build.clone(),
        }
    }
}

impl<Req> fmt::Debug for MethodDescriptor<Req> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor").field("name", &self.name).finish_non_exhaustive()
    }
}

impl<Req> MethodDescriptor<Req> {
    /// Method name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Builds the request for `args`.
    pub fn build(&self, args: &Value) -> Result<Req, ClientError> {
        (self.build)(args).map_err(|source| ClientError::InvalidRequest {
            method: self.name.clone(),
            source,
        })
    }
}

/// Static registry of the methods a client exposes, keyed by name.
///
/// Each entry deserializes its request shape from a JSON object of keyword
/// arguments and wraps it into the service request type. Unknown or missing
/// fields are rejected by the shape's own `Deserialize` impl.
///
/// ```
/// use zkrpc::client::MethodTable;
///
/// #[derive(serde::Deserialize)]
/// #[serde(deny_unknown_fields)]
/// struct NumberPair {
///     x: f64,
///     y: f64,
/// }
///
/// enum Request {
///     Add(NumberPair),
/// }
///
/// let methods = MethodTable::new().method("Add", Request::Add);
/// assert!(methods.get("Add").is_some());
/// assert!(methods.get("Sub").is_none());
/// ```
pub struct MethodTable<Req> {
    methods: HashMap<FastStr, MethodDescriptor<Req>>,
}

impl<Req> Default for MethodTable<Req> {
    fn default() -> Self {
        Self { methods: HashMap::new() }
    }
}

impl<Req> Clone for MethodTable<Req> {
    fn clone(&self) -> Self {
        Self { methods: self.methods.clone() }
    }
}

impl<Req> fmt::Debug for MethodTable<Req> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.methods.keys()).finish()
    }
}

impl<Req: 'static> MethodTable<Req> {
    /// Returns an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name`, whose request shape `Shape` is wrapped into the
    /// service request by `wrap`.
    pub fn method<Shape, W>(mut self, name: impl Into<FastStr>, wrap: W) -> Self
    where
        Shape: DeserializeOwned,
        W: Fn(Shape) -> Req + Send + Sync + 'static,
    {
        let name = name.into();
        let build: BuildFn<Req> = Arc::new(move |args: &Value| match args {
            Value::Object(_) => Shape::deserialize(args).map(&wrap),
            // Structs would otherwise accept a JSON array as positional fields.
            _ => Err(<serde_json::Error as de::Error>::invalid_type(unexpected(args), &"keyword arguments")),
        });
        self.methods.insert(name.clone(), MethodDescriptor { name, build });
        self
    }
}

fn unexpected(value: &Value) -> Unexpected<'_> {
    match value {
        Value::Null => Unexpected::Unit,
        Value::Bool(b) => Unexpected::Bool(*b),
        Value::Number(_) => Unexpected::Other("number"),
        Value::String(s) => Unexpected::Str(s),
        Value::Array(_) => Unexpected::Seq,
        Value::Object(_) => Unexpected::Map,
    }
}

impl<Req> MethodTable<Req> {
    /// Looks up a method by name.
    #[inline]
    pub fn get(&self, name: &str) -> Option<&MethodDescriptor<Req>> {
        self.methods.get(name)
    }

    /// Names of all registered methods.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(FastStr::as_str)
    }

    /// Number of registered methods.
    #[inline]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Whether no method is registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{is_transient, MethodTable, Status};
    use crate::client::ClientError;
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::io;
    use tarpc::client::RpcError;
    use tarpc::ServerError;

    #[derive(Debug, PartialEq, serde::Deserialize)]
    #[serde(deny_unknown_fields)]
    struct NumberPair {
        x: i64,
        y: i64,
    }

    #[derive(Debug, PartialEq, serde::Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Number {
        value: f64,
    }

    #[derive(Debug, PartialEq)]
    enum Request {
        Add(NumberPair),
        SquareRoot(Number),
    }

    fn table() -> MethodTable<Request> {
        MethodTable::new().method("Add", Request::Add).method("SquareRoot", Request::SquareRoot)
    }

    #[test]
    fn test_build_request() {
        let methods = table();
        assert_eq!(methods.len(), 2);
        let add = methods.get("Add").unwrap();
        assert_eq!(add.name(), "Add");
        assert_eq!(add.build(&json!({"x": 1, "y": 2})).unwrap(), Request::Add(NumberPair { x: 1, y: 2 }));
        let sqrt = methods.get("SquareRoot").unwrap();
        assert_eq!(sqrt.build(&json!({"value": 16.0})).unwrap(), Request::SquareRoot(Number { value: 16.0 }));
    }

    #[test]
    fn test_shape_rejects_bad_arguments() {
        let methods = table();
        let add = methods.get("Add").unwrap();
        assert_matches!(add.build(&json!({"x": 1})), Err(ClientError::InvalidRequest { method, .. }) if method.as_str() == "Add");
        assert_matches!(add.build(&json!({"x": 1, "y": 2, "z": 3})), Err(ClientError::InvalidRequest { .. }));
        assert_matches!(add.build(&json!("1,2")), Err(ClientError::InvalidRequest { .. }));
    }

    #[test]
    fn test_rejects_positional_arguments() {
        let methods = table();
        let add = methods.get("Add").unwrap();
        assert_matches!(add.build(&json!([1, 2])), Err(ClientError::InvalidRequest { method, .. }) if method.as_str() == "Add");
        assert_matches!(methods.get("SquareRoot").unwrap().build(&json!([16.0])), Err(ClientError::InvalidRequest { .. }));
        assert_matches!(add.build(&json!(null)), Err(ClientError::InvalidRequest { .. }));
    }

    #[test]
    fn test_names() {
        let methods = table();
        let mut names: Vec<_> = methods.names().collect();
        names.sort_unstable();
        assert_eq!(names, ["Add", "SquareRoot"]);
        assert!(MethodTable::<Request>::new().is_empty());
    }

    #[test]
    fn test_status_of() {
        assert_eq!(Status::of(&RpcError::Shutdown), Status::Unavailable);
        assert_eq!(Status::of(&RpcError::DeadlineExceeded), Status::DeadlineExceeded);
        let refused = RpcError::Server(ServerError::new(io::ErrorKind::ConnectionRefused, "refused".into()));
        assert_eq!(Status::of(&refused), Status::Unavailable);
        let invalid = RpcError::Server(ServerError::new(io::ErrorKind::InvalidInput, "bad request".into()));
        assert_eq!(Status::of(&invalid), Status::Server(io::ErrorKind::InvalidInput));
    }

    #[test]
    fn test_is_transient() {
        assert!(is_transient(&RpcError::Shutdown));
        assert!(!is_transient(&RpcError::DeadlineExceeded));
        let invalid = RpcError::Server(ServerError::new(io::ErrorKind::InvalidInput, "bad request".into()));
        assert!(!is_transient(&invalid));
    }
}

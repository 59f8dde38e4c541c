//! Request/response envelope.
//!
//! A [`TypedRequest`] names a server operation and carries its arguments; the
//! type parameter records what the operation returns so the dispatcher can
//! decode the reply into a [`TypedResponse`] of the right shape. Requests are
//! built once through a [`RequestBuilder`] and are immutable afterwards.

use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::{InvalidArgument, PaginationOptions};

/// Synthetic error codes attached by the client, never sent by the server.
pub const TRANSPORT_ERROR: i32 = -32001;
pub const DECODE_ERROR: i32 = -32002;
pub const INTERNAL_ERROR: i32 = -32603;

/// Opaque name of a server-side operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidArgument> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(InvalidArgument::new("operation", "must not be empty"));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered argument map. Names are unique; absent optional arguments are
/// simply not present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments(Vec<(String, Value)>);

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> Result<(), InvalidArgument> {
        let name = name.into();
        if name.is_empty() {
            return Err(InvalidArgument::new(name, "argument name must not be empty"));
        }
        if self.contains(&name) {
            return Err(InvalidArgument::new(name, "argument given more than once"));
        }
        self.0.push((name, value));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|(n, _)| n == name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v))
    }
}

impl Serialize for Arguments {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Static description of a server operation returning `T`.
///
/// ```
/// use trellis_protocol::Operation;
///
/// const GET_NAME: Operation<String> = Operation::new("platform.GetName", &["id"]);
/// let request = GET_NAME.request().arg("id", 7).build().unwrap();
/// assert_eq!(request.operation().as_str(), "platform.GetName");
/// ```
pub struct Operation<T> {
    id: &'static str,
    required: &'static [&'static str],
    _result: PhantomData<fn() -> T>,
}

impl<T> Operation<T> {
    pub const fn new(id: &'static str, required: &'static [&'static str]) -> Self {
        Self {
            id,
            required,
            _result: PhantomData,
        }
    }

    pub fn id(&self) -> &'static str {
        self.id
    }

    pub fn required(&self) -> &'static [&'static str] {
        self.required
    }

    pub fn request(&self) -> RequestBuilder<T> {
        RequestBuilder {
            operation: self.id.to_string(),
            required: self.required,
            arguments: Arguments::new(),
            pagination: None,
            error: None,
            _result: PhantomData,
        }
    }
}

impl<T> Clone for Operation<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Operation<T> {}

impl<T> fmt::Debug for Operation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.id)
            .field("required", &self.required)
            .finish()
    }
}

/// Accumulates arguments for one request.
///
/// Argument errors are remembered and reported by [`RequestBuilder::build`],
/// so call chains stay flat.
pub struct RequestBuilder<T> {
    operation: String,
    required: &'static [&'static str],
    arguments: Arguments,
    pagination: Option<PaginationOptions>,
    error: Option<InvalidArgument>,
    _result: PhantomData<fn() -> T>,
}

impl<T> RequestBuilder<T> {
    /// Builder for an operation only known at runtime.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            required: &[],
            arguments: Arguments::new(),
            pagination: None,
            error: None,
            _result: PhantomData,
        }
    }

    pub fn arg(mut self, name: &str, value: impl Serialize) -> Self {
        if self.error.is_some() {
            return self;
        }
        let outcome = match serde_json::to_value(value) {
            Ok(Value::Null) => Err(InvalidArgument::new(
                name,
                "value is null; leave optional arguments absent instead",
            )),
            Ok(value) => self.arguments.insert(name, value),
            Err(e) => Err(InvalidArgument::new(name, format!("cannot be serialised: {e}"))),
        };
        self.error = outcome.err();
        self
    }

    pub fn opt_arg<V: Serialize>(self, name: &str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.arg(name, value),
            None => self,
        }
    }

    /// Attach every argument of a JSON object, in its iteration order.
    pub fn args_from_object(mut self, object: serde_json::Map<String, Value>) -> Self {
        for (name, value) in object {
            if value.is_null() {
                continue;
            }
            self = self.arg(&name, value);
        }
        self
    }

    pub fn paginate(mut self, options: PaginationOptions) -> Self {
        self.pagination = (!options.is_server_default()).then_some(options);
        self
    }

    pub fn build(self) -> Result<TypedRequest<T>, InvalidArgument> {
        if let Some(error) = self.error {
            return Err(error);
        }
        let operation = OperationId::new(self.operation)?;
        if let Some(missing) = self
            .required
            .iter()
            .find(|name| !self.arguments.contains(name))
        {
            return Err(InvalidArgument::new(
                *missing,
                format!("required by {operation}"),
            ));
        }
        Ok(TypedRequest {
            operation,
            arguments: self.arguments,
            pagination: self.pagination,
            _result: PhantomData,
        })
    }
}

/// An immutable request for an operation returning `T`.
pub struct TypedRequest<T> {
    operation: OperationId,
    arguments: Arguments,
    pagination: Option<PaginationOptions>,
    _result: PhantomData<fn() -> T>,
}

impl<T> TypedRequest<T> {
    pub fn operation(&self) -> &OperationId {
        &self.operation
    }

    pub fn arguments(&self) -> &Arguments {
        &self.arguments
    }

    pub fn pagination(&self) -> Option<&PaginationOptions> {
        self.pagination.as_ref()
    }

    pub fn to_wire(&self) -> WireCall {
        WireCall {
            operation: self.operation.clone(),
            variables: self.arguments.clone(),
            pagination: self.pagination,
        }
    }
}

impl<T> Clone for TypedRequest<T> {
    fn clone(&self) -> Self {
        Self {
            operation: self.operation.clone(),
            arguments: self.arguments.clone(),
            pagination: self.pagination,
            _result: PhantomData,
        }
    }
}

impl<T> fmt::Debug for TypedRequest<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedRequest")
            .field("operation", &self.operation)
            .field("arguments", &self.arguments)
            .field("pagination", &self.pagination)
            .finish()
    }
}

/// What actually goes over the request transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireCall {
    pub operation: OperationId,
    pub variables: Arguments,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<PaginationOptions>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLocation {
    pub line: u32,
    pub column: u32,
}

/// One structured error reported for a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<ErrorLocation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<Value>,
}

impl ResponseError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
            locations: Vec::new(),
            path: Vec::new(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(TRANSPORT_ERROR, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(DECODE_ERROR, message)
    }

    pub fn is_transport(&self) -> bool {
        self.code == Some(TRANSPORT_ERROR)
    }

    pub fn is_decode(&self) -> bool {
        self.code == Some(DECODE_ERROR)
    }
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "[{code}] {}", self.message)?,
            None => f.write_str(&self.message)?,
        }
        if !self.path.is_empty() {
            let path: Vec<String> = self
                .path
                .iter()
                .map(|segment| match segment {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
            write!(f, " at {}", path.join("."))?;
        }
        Ok(())
    }
}

/// Outcome of one call: a result, errors, or both.
///
/// The result is only ever absent when at least one error explains why.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedResponse<T> {
    result: Option<T>,
    errors: Vec<ResponseError>,
}

impl<T> TypedResponse<T> {
    pub fn success(result: T) -> Self {
        Self {
            result: Some(result),
            errors: Vec::new(),
        }
    }

    pub fn partial(result: T, errors: Vec<ResponseError>) -> Self {
        Self {
            result: Some(result),
            errors,
        }
    }

    pub fn failure(mut errors: Vec<ResponseError>) -> Self {
        if errors.is_empty() {
            errors.push(ResponseError::new(
                INTERNAL_ERROR,
                "call failed without an error description",
            ));
        }
        Self {
            result: None,
            errors,
        }
    }

    pub fn from_error(error: ResponseError) -> Self {
        Self::failure(vec![error])
    }

    pub fn result(&self) -> Option<&T> {
        self.result.as_ref()
    }

    pub fn errors(&self) -> &[ResponseError] {
        &self.errors
    }

    pub fn is_success(&self) -> bool {
        self.result.is_some() && self.errors.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// The result if there is one, otherwise the errors.
    pub fn into_result(self) -> Result<T, Vec<ResponseError>> {
        match self.result {
            Some(result) => Ok(result),
            None => Err(self.errors),
        }
    }

    pub fn into_parts(self) -> (Option<T>, Vec<ResponseError>) {
        (self.result, self.errors)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> TypedResponse<U> {
        TypedResponse {
            result: self.result.map(f),
            errors: self.errors,
        }
    }
}

impl<T: DeserializeOwned> TypedResponse<T> {
    /// Decode a reply body of the form `{"data": {"result": …}, "errors": […]}`.
    ///
    /// Malformed bodies and results of the wrong shape become `DECODE_ERROR`
    /// entries; this never fails.
    pub fn decode(body: &str) -> Self {
        let reply: Value = match serde_json::from_str(body) {
            Ok(reply) => reply,
            Err(e) => return Self::from_error(ResponseError::decode(format!("malformed reply: {e}"))),
        };

        let mut errors = match reply.get("errors") {
            None | Some(Value::Null) => Vec::new(),
            Some(raw) => match Vec::<ResponseError>::deserialize(raw) {
                Ok(errors) => errors,
                Err(e) => vec![ResponseError::decode(format!("malformed error list: {e}"))],
            },
        };

        let result = match reply.get("data").and_then(|data| data.get("result")) {
            None => None,
            Some(Value::Null) if !errors.is_empty() => None,
            Some(raw) => match T::deserialize(raw) {
                Ok(result) => Some(result),
                Err(e) => {
                    errors.push(ResponseError::decode(format!(
                        "result does not match the expected shape: {e}"
                    )));
                    None
                }
            },
        };

        match result {
            Some(result) => Self::partial(result, errors),
            None if errors.is_empty() => Self::from_error(ResponseError::decode(
                "reply carries neither a result nor errors",
            )),
            None => Self::failure(errors),
        }
    }
}

use objbridge_rpc::RpcError;

use crate::value::{ErrorValue, Value};

/// `code` property carried by dispatch errors on the wire.
pub const DISPATCH_ERROR_CODE: &str = "EBADRPC";
/// `errno` property carried by dispatch errors on the wire.
pub const DISPATCH_ERRNO: i32 = -72;

/// A dispatcher operation, named as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetRemote,
    GetMember,
    SetMember,
    CallMember,
    MemberConstructor,
    FunctionCall,
    ConstructorCall,
    InvokeCallback,
    Release,
}

impl Operation {
    pub const ALL: [Operation; 9] = [
        Operation::GetRemote,
        Operation::GetMember,
        Operation::SetMember,
        Operation::CallMember,
        Operation::MemberConstructor,
        Operation::FunctionCall,
        Operation::ConstructorCall,
        Operation::InvokeCallback,
        Operation::Release,
    ];

    pub fn method_name(self) -> &'static str {
        match self {
            Operation::GetRemote => "getRemote",
            Operation::GetMember => "getMember",
            Operation::SetMember => "setMember",
            Operation::CallMember => "callMember",
            Operation::MemberConstructor => "memberConstructor",
            Operation::FunctionCall => "functionCall",
            Operation::ConstructorCall => "constructorCall",
            Operation::InvokeCallback => "invokeCallback",
            Operation::Release => "release",
        }
    }

    pub fn from_method_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.method_name() == name)
    }
}

fn dispatch_message(operation: Operation, id: &str, member: Option<&str>) -> String {
    let member = member.unwrap_or_default();
    match operation {
        Operation::GetRemote => format!("Cannot get remote '{id}': nothing is exposed under that name"),
        Operation::GetMember => {
            format!("Cannot get property '{member}' on missing remote object {id}")
        }
        Operation::SetMember => {
            format!("Cannot set property '{member}' on missing remote object {id}")
        }
        Operation::CallMember => {
            format!("Cannot call method '{member}' on missing remote object {id}")
        }
        Operation::MemberConstructor => {
            format!("Cannot call constructor '{member}' on missing remote object {id}")
        }
        Operation::FunctionCall => format!("Cannot call function on missing remote object {id}"),
        Operation::ConstructorCall => {
            format!("Cannot call constructor on missing remote object {id}")
        }
        Operation::InvokeCallback => format!("Cannot invoke missing callback {id}"),
        Operation::Release => format!("Cannot release missing remote object {id}"),
    }
}

fn underlying(cause: &ErrorValue) -> String {
    format!(
        "Underlying error: {}\nUnderlying stack: {}\n",
        cause.message,
        cause.stack.as_deref().unwrap_or_default()
    )
}

/// Errors of the remote object layer.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// The addressed object, callback or exposed name does not exist.
    #[error("{}", dispatch_message(*operation, id, member.as_deref()))]
    Dispatch {
        operation: Operation,
        /// The id as the caller sent it.
        id: String,
        member: Option<String>,
    },

    /// The target threw while the dispatcher invoked it.
    #[error("{message}")]
    Invocation { message: String, cause: ErrorValue },

    /// The peer reported an error thrown on its side.
    #[error("{0}")]
    Thrown(ErrorValue),

    /// A meta or request did not have the expected shape.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Encoding or a remote operation needed a capability this side lacks.
    #[error("cannot serialize: no {0} capability available")]
    MissingCapability(&'static str),

    #[error("cannot set read-only member '{0}'")]
    ReadOnly(String),

    #[error("'{0}' is not callable")]
    NotCallable(String),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RemoteError>;

impl RemoteError {
    pub fn dispatch(operation: Operation, id: impl ToString, member: Option<&str>) -> Self {
        RemoteError::Dispatch {
            operation,
            id: id.to_string(),
            member: member.map(str::to_string),
        }
    }

    pub(crate) fn method_failed(method: &str, cause: ErrorValue) -> Self {
        RemoteError::Invocation {
            message: format!(
                "Could not call remote method '{method}'. Check that the method signature is correct. {}",
                underlying(&cause)
            ),
            cause,
        }
    }

    pub(crate) fn function_failed(name: &str, cause: ErrorValue) -> Self {
        RemoteError::Invocation {
            message: format!(
                "Could not call remote function '{name}'. Check that the function signature is correct. {}",
                underlying(&cause)
            ),
            cause,
        }
    }

    pub(crate) fn constructor_failed(name: &str, cause: ErrorValue) -> Self {
        RemoteError::Invocation {
            message: format!(
                "Could not call remote constructor '{name}'. Check that the constructor signature is correct. {}",
                underlying(&cause)
            ),
            cause,
        }
    }

    pub(crate) fn member_access_failed(verb: &str, name: &str, cause: ErrorValue) -> Self {
        RemoteError::Invocation {
            message: format!("Could not {verb} remote member '{name}'. {}", underlying(&cause)),
            cause,
        }
    }

    /// Whether this is a missing-id dispatch error.
    pub fn is_dispatch(&self) -> bool {
        matches!(self, RemoteError::Dispatch { .. })
    }

    /// The error as a value that can be encoded for the peer.
    pub fn to_error_value(&self) -> ErrorValue {
        match self {
            RemoteError::Dispatch {
                operation,
                id,
                member,
            } => {
                let error = ErrorValue::new(self.to_string())
                    .with_property("code", DISPATCH_ERROR_CODE)
                    .with_property("errno", DISPATCH_ERRNO)
                    .with_property("operation", operation.method_name())
                    .with_property("id", id.as_str());
                match member {
                    Some(member) => error.with_property("member", member.as_str()),
                    None => error,
                }
            }
            RemoteError::Invocation { message, cause } => ErrorValue::new(message.clone())
                .with_property("cause", Value::Error(cause.clone())),
            RemoteError::Thrown(error) => error.clone(),
            other => ErrorValue::new(other.to_string()),
        }
    }

    /// Rebuild an error received from the peer.
    ///
    /// Dispatch errors come back as [`RemoteError::Dispatch`]; anything else
    /// is [`RemoteError::Thrown`].
    pub fn from_error_value(error: ErrorValue) -> Self {
        let text = |name: &str| error.property(name).and_then(Value::as_str);
        if text("code") == Some(DISPATCH_ERROR_CODE) {
            let operation = text("operation").and_then(Operation::from_method_name);
            if let (Some(operation), Some(id)) = (operation, text("id")) {
                return RemoteError::dispatch(operation, id, text("member"));
            }
        }
        RemoteError::Thrown(error)
    }
}

impl From<RemoteError> for ErrorValue {
    fn from(error: RemoteError) -> Self {
        match error {
            RemoteError::Thrown(error) => error,
            other => other.to_error_value(),
        }
    }
}

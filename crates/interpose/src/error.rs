//! Error types for the interpose proxy engine.
//!
//! Errors fall into two families. Configuration errors are raised while a
//! proxy is being built and never deferred to call time. Dispatch errors are
//! raised while a call is running; user failures travel inside them as a
//! [`Fault`], which keeps its identity so callers can tell exactly which error
//! came back out of an interceptor chain.

use std::fmt;
use std::sync::Arc;

/// A failure raised by user code (a target method, interceptor or advice).
///
/// Cloning a `Fault` shares the underlying error; equality is identity, so a
/// fault observed at the outermost caller compares equal to the one the
/// target raised.
#[derive(Clone)]
pub struct Fault(Arc<dyn std::error::Error + Send + Sync>);

#[derive(Debug)]
struct MessageFault(String);

impl fmt::Display for MessageFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for MessageFault {}

impl Fault {
    /// Wraps an arbitrary error value.
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Fault(Arc::new(error))
    }

    /// Creates a fault carrying only a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Fault(Arc::new(MessageFault(message.into())))
    }

    /// Returns true if both faults share the same underlying error.
    pub fn ptr_eq(&self, other: &Fault) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Attempts to view the wrapped error as a concrete type.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.0.downcast_ref::<E>()
    }
}

impl PartialEq for Fault {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Fault {}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fault({:?})", self.0)
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Errors that can occur while building or calling through a proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------
    /// The configuration has neither advisors nor a target.
    NoAdvisorsOrTarget,

    /// The type cannot be seen from the proxy hosting context.
    TypeNotVisible { type_name: String },

    /// The type is sealed and cannot be extended.
    SealedType { type_name: String },

    /// The selected strategy needs a target type and none is known.
    MissingTargetType { strategy: &'static str },

    /// Advice was changed on a frozen configuration.
    FrozenConfiguration,

    /// An introduction delegate does not implement the protocol it introduces.
    IntroductionNotImplemented { protocol: String, delegate: String },

    /// A requested protocol is implemented by neither the target type nor an
    /// introduction.
    UnsatisfiedProtocol { protocol: String, type_name: String },

    /// No adapter can turn this advice into an interceptor.
    UnsupportedAdvice { kind: String },

    /// A method was declared as an override of something that cannot be
    /// overridden.
    CannotOverride { type_name: String, method: String },

    /// Two members with the same signature were declared on one type.
    DuplicateSignature { type_name: String, method: String },

    /// A selector name is empty or malformed.
    InvalidSelector { name: String },

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------
    /// No method with this name accepts the given arguments.
    MethodNotFound { type_name: String, method: String },

    /// An abstract method was called.
    AbstractMethod { method: String },

    /// An abstract type was instantiated.
    AbstractInstantiation { type_name: String },

    /// No constructor accepts the given arguments.
    NoMatchingConstructor { type_name: String },

    /// Argument count mismatch for method signature.
    ArgumentCountMismatch { expected: usize, got: usize },

    /// Argument kind mismatch for method signature.
    ArgumentTypeMismatch {
        index: usize,
        expected: String,
        got: String,
    },

    /// A value could not be converted to the requested kind.
    InvalidCast { expected: String, got: String },

    /// Wrong number of type arguments for a generic method.
    GenericArityMismatch {
        method: String,
        expected: usize,
        got: usize,
    },

    /// A generic method definition was called without type arguments.
    OpenGenericMethod { method: String },

    /// A call reached the end of a chain without a target instance.
    NullTarget { method: String },

    /// The object is not a proxy.
    NotAProxy,

    /// No proxy is exposed on the current thread.
    NoCurrentProxy,

    /// A pooled target source has no free instance.
    PoolExhausted { capacity: usize },

    /// An advisor or introduction index is past the end of the list.
    IndexOutOfRange { index: usize, len: usize },

    /// Proxy state does not match the shape of its generated type.
    StateMismatch { reason: String },

    /// Writing or reading serialized proxy state failed.
    Serialization { reason: String },

    /// A failure raised by user code.
    Fault(Fault),
}

impl Error {
    /// Shorthand for a message-only [`Fault`].
    pub fn fault(message: impl Into<String>) -> Self {
        Error::Fault(Fault::msg(message))
    }

    /// Returns true for errors that are raised while a proxy is being built.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::NoAdvisorsOrTarget
                | Error::TypeNotVisible { .. }
                | Error::SealedType { .. }
                | Error::MissingTargetType { .. }
                | Error::FrozenConfiguration
                | Error::IntroductionNotImplemented { .. }
                | Error::UnsatisfiedProtocol { .. }
                | Error::UnsupportedAdvice { .. }
                | Error::CannotOverride { .. }
                | Error::DuplicateSignature { .. }
                | Error::InvalidSelector { .. }
        )
    }

    /// Returns the user fault carried by this error, if any.
    pub fn as_fault(&self) -> Option<&Fault> {
        match self {
            Error::Fault(fault) => Some(fault),
            _ => None,
        }
    }
}

impl From<Fault> for Error {
    fn from(fault: Fault) -> Self {
        Error::Fault(fault)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NoAdvisorsOrTarget => {
                write!(f, "Configuration has no advisors and no target")
            }
            Error::TypeNotVisible { type_name } => {
                write!(f, "Type '{type_name}' is not visible to generated proxies")
            }
            Error::SealedType { type_name } => {
                write!(f, "Type '{type_name}' is sealed and cannot be proxied by extension")
            }
            Error::MissingTargetType { strategy } => {
                write!(f, "The {strategy} strategy requires a target type")
            }
            Error::FrozenConfiguration => {
                write!(f, "Cannot change advice on a frozen configuration")
            }
            Error::IntroductionNotImplemented { protocol, delegate } => {
                write!(f, "Introduction delegate '{delegate}' does not implement '{protocol}'")
            }
            Error::UnsatisfiedProtocol {
                protocol,
                type_name,
            } => {
                write!(
                    f,
                    "Protocol '{protocol}' is implemented by neither '{type_name}' nor an introduction"
                )
            }
            Error::UnsupportedAdvice { kind } => {
                write!(f, "No adapter supports advice of kind '{kind}'")
            }
            Error::CannotOverride { type_name, method } => {
                write!(f, "'{type_name}' cannot override non-virtual or final method '{method}'")
            }
            Error::DuplicateSignature { type_name, method } => {
                write!(f, "'{type_name}' declares '{method}' more than once")
            }
            Error::InvalidSelector { name } => write!(f, "Invalid selector name {name:?}"),
            Error::MethodNotFound { type_name, method } => {
                write!(f, "'{type_name}' has no method '{method}' accepting these arguments")
            }
            Error::AbstractMethod { method } => {
                write!(f, "Abstract method '{method}' has no implementation")
            }
            Error::AbstractInstantiation { type_name } => {
                write!(f, "Cannot instantiate abstract type '{type_name}'")
            }
            Error::NoMatchingConstructor { type_name } => {
                write!(f, "'{type_name}' has no constructor accepting these arguments")
            }
            Error::ArgumentCountMismatch { expected, got } => {
                write!(f, "Argument count mismatch: expected {expected}, got {got}")
            }
            Error::ArgumentTypeMismatch {
                index,
                expected,
                got,
            } => {
                write!(
                    f,
                    "Argument {index} type mismatch: expected {expected}, got {got}"
                )
            }
            Error::InvalidCast { expected, got } => {
                write!(f, "Invalid cast: expected {expected}, got {got}")
            }
            Error::GenericArityMismatch {
                method,
                expected,
                got,
            } => {
                write!(
                    f,
                    "Generic method '{method}' takes {expected} type arguments, got {got}"
                )
            }
            Error::OpenGenericMethod { method } => {
                write!(f, "Generic method '{method}' must be closed before it is called")
            }
            Error::NullTarget { method } => {
                write!(f, "No target instance to invoke '{method}' on")
            }
            Error::NotAProxy => write!(f, "Object is not a proxy"),
            Error::NoCurrentProxy => {
                write!(f, "No current proxy; enable expose_proxy on the configuration")
            }
            Error::PoolExhausted { capacity } => {
                write!(f, "Target pool exhausted (capacity {capacity})")
            }
            Error::IndexOutOfRange { index, len } => {
                write!(f, "Index {index} out of range for {len} entries")
            }
            Error::StateMismatch { reason } => write!(f, "Proxy state mismatch: {reason}"),
            Error::Serialization { reason } => write!(f, "Serialization failed: {reason}"),
            Error::Fault(fault) => write!(f, "{fault}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Fault(fault) => Some(&*fault.0),
            _ => None,
        }
    }
}

/// Result type for interpose operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Overdrawn(u32);

    impl fmt::Display for Overdrawn {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "overdrawn by {}", self.0)
        }
    }

    impl std::error::Error for Overdrawn {}

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::SealedType {
                type_name: "Vault".into()
            }
            .to_string(),
            "Type 'Vault' is sealed and cannot be proxied by extension"
        );
        assert_eq!(
            Error::ArgumentCountMismatch {
                expected: 2,
                got: 1
            }
            .to_string(),
            "Argument count mismatch: expected 2, got 1"
        );
    }

    #[test]
    fn test_fault_identity() {
        let fault = Fault::new(Overdrawn(7));
        let same = fault.clone();
        let other = Fault::new(Overdrawn(7));

        assert_eq!(Error::Fault(fault.clone()), Error::Fault(same));
        assert_ne!(Error::Fault(fault.clone()), Error::Fault(other));
        assert_eq!(fault.downcast_ref::<Overdrawn>().map(|o| o.0), Some(7));
        assert_eq!(Error::Fault(fault).to_string(), "overdrawn by 7");
    }

    #[test]
    fn test_configuration_classification() {
        assert!(Error::NoAdvisorsOrTarget.is_configuration());
        assert!(Error::FrozenConfiguration.is_configuration());
        assert!(!Error::NotAProxy.is_configuration());
        assert!(!Error::fault("boom").is_configuration());
    }
}

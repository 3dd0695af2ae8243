//! The dynamic object model proxies are generated over.
//!
//! - [`selector`]: interned method names
//! - [`value`]: dynamically typed argument and return values
//! - [`method`]: method descriptors, signatures and dispatch
//! - [`protocol`]: interfaces
//! - [`class`]: classes, inheritance and constructors
//! - [`object`]: instances and message sending
//! - [`serialization`]: the property bag at the serialization boundary

pub mod class;
pub mod method;
pub mod object;
pub mod protocol;
pub mod selector;
pub mod serialization;
pub mod value;

pub use class::{Class, ClassBuilder, Constructor, ConstructorBody, Payload};
pub use method::{
    Attribute, Method, MethodBody, MethodBuilder, MethodFlags, Parameter, PassingMode,
    SERIALIZABLE, Signature, Visibility,
};
pub use object::{Object, WeakObject};
pub use protocol::{PROXY_HOST, Protocol, ProtocolBuilder};
pub use selector::Selector;
pub use serialization::{SerializationHooks, SerializationInfo};
pub use value::{EnumValue, IntRepr, Value, ValueKind};

//! Core data model of the attribute stream broker: attribute values, validated
//! attribute names and the invocation descriptor that identifies one attribute
//! request.

mod invocation;
pub use invocation::{AttributeInvocation, InvocationError, InvocationSettings};

mod name;
pub use name::AttributeName;

mod value;
pub use value::AttributeValue;

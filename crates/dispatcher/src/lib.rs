//! Invocation routing: a write-once registry maps stable module and
//! capability identifiers to handlers; the dispatcher coerces parameters,
//! runs handlers on a bounded worker pool under an ambient timeout, and
//! normalizes every outcome into one result envelope.

pub mod dispatch;
pub mod modules;
pub mod params;
pub mod registry;

pub use dispatch::{Dispatcher, ErrorEnvelope, Invocation, InvocationMeta};
pub use modules::build_registry;
pub use params::{ParamSpec, ParamType, ParamValue, ParamValues};
pub use registry::{CapabilitySpec, Handler, ModuleRegistry};

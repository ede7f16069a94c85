//! The function catalog and the parameter descriptors it is built from.

pub mod params;
pub mod registry;

pub use params::{Params, validate};
pub use registry::{FunctionDef, FunctionDescriptor, FunctionRegistry, ParamKind, ParamSpec};

//! Protocol layer for planstore: the function catalog, the invocation
//! dispatcher, and streaming sessions.

pub mod dispatch;
pub mod functions;
pub mod stream;

pub use dispatch::{DispatchError, Dispatcher, ErrorBody};
pub use functions::FunctionRegistry;
pub use stream::{Invocation, Opening, StreamEvent};

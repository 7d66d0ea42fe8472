pub mod command_stream;
pub mod error;
pub mod interrupt;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

pub use command_stream::{
    is_tool_installed, DuctInvoker, ExecutionResult, Notify, OutputEvent, OutputSink,
    ProcessInvoker,
};
pub use error::{DriverError, Result};

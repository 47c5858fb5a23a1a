//! Domain model (requests, payloads, results, errors).

pub mod command;
pub mod errors;
pub mod result;

pub use self::command::{CommandPayload, CommandRequest, ResponseMessage};
pub use self::errors::{ErrorKind, RelayError};
pub use self::result::ExecutionResult;

//! Background sync daemon: interval scheduler + cycle processor + socket server.

mod error;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use protocol::{
    request_status, request_stop, request_sync, send_request, CycleSummary, DaemonRequest,
    DaemonResponse, DaemonState, DaemonStatus, Stopping,
};
pub use runtime::{init_tracing, run, start_blocking};

pub mod logging;
pub mod trace_context;

pub use logging::init_tracing;
pub use trace_context::{REQUEST_ID_HEADER, TRACEPARENT_HEADER, extract_traceparent, inject_trace_context};

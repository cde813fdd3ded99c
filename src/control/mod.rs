//! Control protocol for bidirectional communication with Claude Code
//!
//! Control traffic shares the transport with conversation messages. The
//! [`ControlRouter`] splits the two:
//!
//! ```text
//! SDK                              CLI
//!  |--- control_request ---------->|   initialize, interrupt, set_permission_mode
//!  |<-- control_response ----------|
//!  |--- user ---------------------->|
//!  |<-- control_request -----------|   can_use_tool, hook_callback, mcp_message
//!  |--- control_response ---------->|
//!  |<-- assistant / system --------|   forwarded to the consumer
//!  |<-- result --------------------|
//! ```
//!
//! Outbound requests are correlated by `req_{n}` ids through a table of
//! pending single-slot channels. Inbound requests are answered by the
//! registered callbacks, each on its own task, so a slow callback never
//! holds up message delivery or other control requests.

mod router;

pub use router::{ControlRouter, Payload};

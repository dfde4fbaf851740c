//! Transport layer implementations, one per wire kind the Server Registry
//! recognises:
//! - subprocess-pipes (`stdio`): line-delimited JSON-RPC over a child
//!   process's stdin/stdout
//! - server-sent-event-stream (`sse`)
//! - streamable-http (`streamable_http`): bidirectional long-poll with
//!   `mcp-session-id`; plain-http is a config-level alias, not a distinct
//!   transport

pub mod sse;
pub mod stdio;
pub mod streamable_http;

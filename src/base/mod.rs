//! Base types and error handling.
//!
//! - [`neterror::NetError`]: Network error codes matching `net_error_list.h`
//! - [`loadstate::LoadState`]: Negotiation and session states of a Connection

pub mod context;
pub mod loadstate;
pub mod neterror;

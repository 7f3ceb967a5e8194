//! HTTP/1.x message handling.
//!
//! - [`assemble`]: request line and header block
//! - [`head`] / [`responsebody`]: response parsing and body framing
//! - [`response`]: lazily-read responses bound to a socket
//! - [`module`]: request/response module hooks
//! - [`retry`]: which send failures are retried

pub mod assemble;
pub mod head;
pub mod headers;
pub mod module;
pub mod request;
pub mod requestbody;
pub mod response;
pub mod responsebody;
pub mod retry;
pub mod version;

pub use assemble::USER_AGENT;
pub use head::ResponseHead;
pub use headers::Headers;
pub use module::{Module, RequestOutcome, ResponseOutcome};
pub use request::{AbortHandle, Request};
pub use requestbody::{BodyWriter, RequestBody};
pub use response::Response;
pub use version::ProtocolVersion;

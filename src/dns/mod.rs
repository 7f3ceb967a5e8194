//! DNS Resolution Module
//!
//! The socket acquirer resolves its target through the [`Resolve`] trait
//! and tries every returned address in order. Two implementations ship:
//! - [`GaiResolver`]: the system resolver (getaddrinfo on the blocking pool)
//! - [`StaticResolver`]: fixed host-to-address table in front of another resolver
//!
//! # Example
//!
//! ```rust,ignore
//! use pipenet::dns::{GaiResolver, Name, Resolve};
//!
//! let addrs = GaiResolver::new().resolve(Name::new("example.com")).await?;
//! for addr in addrs {
//!     println!("Resolved: {}", addr);
//! }
//! ```

mod gai;
mod resolve;

pub use gai::{GaiResolver, IpLiteral};
pub use resolve::{Addrs, Name, Resolve, Resolving, StaticResolver};

//! # pipenet
//!
//! A persistent, pipelining HTTP/1.0 and HTTP/1.1 client connection engine.
//!
//! A [`Connection`] stands for one endpoint. It negotiates the server's
//! protocol version and keep-alive behaviour on the first exchange, then
//! pipelines later requests onto a shared socket whenever that is safe. It
//! stalls senders only where the server's answers must be known first.
//!
//! ## Features
//!
//! - **Pipelining**: responses are handed their bytes strictly in send order
//! - **Keep-alive**: HTTP/1.1 persistence, HTTP/1.0 `Keep-Alive` budgets
//! - **Proxies**: plain HTTP proxies, CONNECT tunnels for `https`, SOCKS 4a/5
//!   (or any pluggable connector), and a non-proxy host list
//! - **Retries**: transient socket failures are retried on a fresh socket
//! - **Modules**: request/response hooks for auth, redirects and the like
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pipenet::{Client, connection::Scheme, http::Request};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), pipenet::NetError> {
//!     let client = Client::builder().build()?;
//!     let conn = client.connect(Scheme::Http, "example.com", 80);
//!
//!     let first = conn.send(Request::get("/a")).await?;
//!     let second = conn.send(Request::get("/b")).await?;
//!     println!("{} {}", first.status().await?, second.status().await?);
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Error codes and state enums
//! - [`dns`] - Pluggable name resolution
//! - [`socket`] - Socket acquisition, demultiplexing, proxies
//! - [`http`] - Requests, responses, header assembly, modules
//! - [`connection`] - Per-endpoint protocol state and the send algorithm
//! - [`client`] - Configuration and the Connection factory

pub mod base;
pub mod client;
pub mod connection;
pub mod dns;
pub mod http;
pub mod socket;

pub use base::neterror::NetError;
pub use client::{Client, ClientBuilder, ClientConfig};
pub use connection::{Connection, ProtocolInfo, Scheme};
pub use http::ProtocolVersion;

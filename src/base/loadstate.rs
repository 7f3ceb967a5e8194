/// Protocol negotiation state of a Connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    /// No request sent yet; server version unknown.
    #[default]
    Fresh,

    /// A request is in flight but the server version or its keep-alive
    /// behaviour is not yet known.
    Negotiating,

    /// Version and keep-alive behaviour are both known.
    Established,
}

/// State of a Connection's socket session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No socket.
    #[default]
    None,

    /// Accepting new requests.
    Open,

    /// Marked for close; still delivering responses already queued.
    Draining,

    /// Closed, either after draining or because of an error.
    Closed,
}

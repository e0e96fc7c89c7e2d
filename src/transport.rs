//! Transport abstraction
//!
//! A transport is a named duplex byte channel. The session is generic over
//! it and is the only writer for the connection lifetime; read readiness is
//! the async poll model, so no explicit arm-for-notification call exists.

use tokio::io::{AsyncRead, AsyncWrite};

/// A duplex byte channel a session can run over
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {
    /// Short transport name, passed to the handler's `init` and used in
    /// log events
    fn name(&self) -> &'static str;
}

impl Transport for tokio::net::TcpStream {
    fn name(&self) -> &'static str {
        "tcp"
    }
}

/// In-memory transport, used by tests and embedders that splice streams
impl Transport for tokio::io::DuplexStream {
    fn name(&self) -> &'static str {
        "mem"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_names() {
        fn assert_transport<T: Transport>() {}
        assert_transport::<tokio::net::TcpStream>();
        assert_transport::<tokio::io::DuplexStream>();

        let (a, _b) = tokio::io::duplex(64);
        assert_eq!(a.name(), "mem");
    }
}

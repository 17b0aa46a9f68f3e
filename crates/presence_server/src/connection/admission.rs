//! What the transport layer tells us about a new connection.
//!
//! Admission only needs two things from the WebSocket upgrade request: where
//! the client really is (`X-Forwarded-For`, falling back to the TCP peer) and
//! whether it asked to join as an observer.

use std::net::{IpAddr, SocketAddr};
use tokio_tungstenite::tungstenite::handshake::server::Request;

/// Header consulted before the raw peer address.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Query parameter that marks a connection as an observer.
pub const OBSERVER_QUERY_KEY: &str = "observer";

/// Admission input captured during the WebSocket handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionRequest {
    /// Raw `X-Forwarded-For` header value, if the request carried one
    pub forwarded_for: Option<String>,

    /// TCP peer address of the connection
    pub peer_addr: SocketAddr,

    /// Observers receive roster and heartbeat traffic but never take a pointer
    pub observer: bool,
}

impl AdmissionRequest {
    /// A participant request with no proxy header.
    pub fn new(peer_addr: SocketAddr) -> Self {
        Self {
            forwarded_for: None,
            peer_addr,
            observer: false,
        }
    }

    pub fn with_forwarded_for(mut self, value: impl Into<String>) -> Self {
        self.forwarded_for = Some(value.into());
        self
    }

    pub fn as_observer(mut self) -> Self {
        self.observer = true;
        self
    }

    /// Builds the admission input from the HTTP upgrade request.
    pub fn from_handshake(request: &Request, peer_addr: SocketAddr) -> Self {
        let forwarded_for = request
            .headers()
            .get(FORWARDED_FOR_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        Self {
            forwarded_for,
            peer_addr,
            observer: is_observer_query(request.uri().query()),
        }
    }

    /// The client address before de-duplication: the first entry of
    /// `X-Forwarded-For`, or the peer IP without its port.
    pub fn base_address(&self) -> String {
        if let Some(first) = self
            .forwarded_for
            .as_deref()
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|first| !first.is_empty())
        {
            return first.to_string();
        }

        match self.peer_addr.ip() {
            IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                Some(v4) => v4.to_string(),
                None => v6.to_string(),
            },
            ip => ip.to_string(),
        }
    }
}

/// Returns true when the query string contains an `observer` flag that is not
/// explicitly switched off (`observer=0` / `observer=false`).
pub fn is_observer_query(query: Option<&str>) -> bool {
    let Some(query) = query else {
        return false;
    };

    query.split('&').any(|pair| {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next().unwrap_or_default();
        let value = parts.next().unwrap_or_default();
        key == OBSERVER_QUERY_KEY && !matches!(value, "0" | "false")
    })
}

/// Makes `base` unique among the addresses of live connections by appending
/// `" (2)"`, `" (3)"`, ... until no live connection uses it.
pub fn disambiguate_address<'a>(base: &str, live: impl IntoIterator<Item = &'a str> + Clone) -> String {
    let taken = |candidate: &str| live.clone().into_iter().any(|address| address == candidate);

    let mut candidate = base.to_string();
    let mut count = 1;
    while taken(&candidate) {
        count += 1;
        candidate = format!("{base} ({count})");
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "10.0.0.7:51234".parse().unwrap()
    }

    #[test]
    fn test_base_address_prefers_first_forwarded_entry() {
        let request = AdmissionRequest::new(peer()).with_forwarded_for(" 1.2.3.4 , 10.0.0.1");
        assert_eq!(request.base_address(), "1.2.3.4");
    }

    #[test]
    fn test_base_address_falls_back_to_peer_ip() {
        assert_eq!(AdmissionRequest::new(peer()).base_address(), "10.0.0.7");

        let blank = AdmissionRequest::new(peer()).with_forwarded_for("  ");
        assert_eq!(blank.base_address(), "10.0.0.7");

        let mapped: SocketAddr = "[::ffff:192.168.1.20]:9000".parse().unwrap();
        assert_eq!(AdmissionRequest::new(mapped).base_address(), "192.168.1.20");
    }

    #[test]
    fn test_observer_query_flag() {
        assert!(is_observer_query(Some("observer")));
        assert!(is_observer_query(Some("room=a&observer=1")));
        assert!(!is_observer_query(Some("observer=0")));
        assert!(!is_observer_query(Some("observer=false")));
        assert!(!is_observer_query(Some("observers")));
        assert!(!is_observer_query(None));
    }

    #[test]
    fn test_from_handshake_reads_header_and_query() {
        let request = Request::builder()
            .uri("/?observer")
            .header("X-Forwarded-For", "5.6.7.8, 9.9.9.9")
            .body(())
            .unwrap();

        let admission = AdmissionRequest::from_handshake(&request, peer());
        assert!(admission.observer);
        assert_eq!(admission.base_address(), "5.6.7.8");
    }

    #[test]
    fn test_disambiguate_address() {
        let live: Vec<&str> = vec![];
        assert_eq!(disambiguate_address("1.2.3.4", live.iter().copied()), "1.2.3.4");

        let live = vec!["1.2.3.4"];
        assert_eq!(disambiguate_address("1.2.3.4", live.iter().copied()), "1.2.3.4 (2)");

        let live = vec!["1.2.3.4", "1.2.3.4 (2)", "5.5.5.5"];
        assert_eq!(disambiguate_address("1.2.3.4", live.iter().copied()), "1.2.3.4 (3)");

        // A freed base address is reused before suffixes
        let live = vec!["1.2.3.4 (2)"];
        assert_eq!(disambiguate_address("1.2.3.4", live.iter().copied()), "1.2.3.4");
    }
}

//! DNS health probe used during reconnection.
//!
//! The probe exists purely to classify an outage for operator alerting:
//! it distinguishes "our network is down" from "the venue is unreachable"
//! and never gates a retry.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpStream, lookup_host};
use tracing::debug;

/// Public resolvers probed when the primary resolution fails.
pub const DEFAULT_FALLBACK_RESOLVERS: [&str; 2] = ["1.1.1.1:53", "8.8.8.8:53"];

/// Outcome of a [`probe_dns`] run.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ProbeVerdict {
    /// The venue host resolves; a connect failure points at the venue.
    HostResolvable,
    /// Resolution failed but a fallback resolver is reachable: local
    /// network is up, name resolution is broken.
    ResolutionFailed,
    /// Nothing is reachable; the local network itself is down.
    NetworkDown,
}

impl ProbeVerdict {
    /// Whether the local network side looks healthy.
    pub fn local_network_ok(&self) -> bool {
        !matches!(self, ProbeVerdict::NetworkDown)
    }
}

/// Resolve `host` (a `host:port` pair) through the system resolver; on
/// failure, attempt TCP reachability of the fallback resolvers to decide
/// whether the local network is at fault. Each step is bounded by
/// `timeout`.
pub async fn probe_dns(
    host: &str,
    fallback_resolvers: &[SocketAddr],
    timeout: Duration,
) -> ProbeVerdict {
    if let Ok(Ok(mut addrs)) = tokio::time::timeout(timeout, lookup_host(host)).await {
        if addrs.next().is_some() {
            debug!(host, "dns probe: host resolvable");
            return ProbeVerdict::HostResolvable;
        }
    }

    for resolver in fallback_resolvers {
        if matches!(
            tokio::time::timeout(timeout, TcpStream::connect(resolver)).await,
            Ok(Ok(_))
        ) {
            debug!(%resolver, "dns probe: resolution failed but resolver reachable");
            return ProbeVerdict::ResolutionFailed;
        }
    }

    debug!(host, "dns probe: no resolver reachable");
    ProbeVerdict::NetworkDown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_probe_localhost_resolves() {
        // Loopback always resolves through the system resolver.
        let verdict = probe_dns("localhost:80", &[], Duration::from_secs(2)).await;
        assert_eq!(verdict, ProbeVerdict::HostResolvable);
        assert!(verdict.local_network_ok());
    }

    #[tokio::test]
    async fn test_probe_unresolvable_without_fallbacks_is_network_down() {
        let verdict = probe_dns(
            "definitely-not-a-real-host.invalid:443",
            &[],
            Duration::from_millis(500),
        )
        .await;
        assert_eq!(verdict, ProbeVerdict::NetworkDown);
        assert!(!verdict.local_network_ok());
    }
}

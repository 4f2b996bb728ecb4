//! Host facts reported at device registration

use std::{
    io,
    net::{IpAddr, Ipv4Addr},
};

use reqwest::Url;
use tokio::net::UdpSocket;
use tracing::warn;

/// Local address of the route towards `backend_url`
///
/// Connecting a UDP socket sends nothing; it only makes the OS pick the
/// interface that reaches the backend, which is the address the backend sees.
pub async fn outbound_ip(backend_url: &str) -> io::Result<IpAddr> {
    let url = Url::parse(backend_url)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let host = url.host_str().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "backend URL has no host")
    })?;
    let port = url.port_or_known_default().unwrap_or(80);

    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.connect((host.trim_matches(['[', ']']), port)).await?;
    Ok(socket.local_addr()?.ip())
}

/// Outbound address, or the unspecified address when it cannot be found
pub async fn outbound_ip_or_unspecified(backend_url: &str) -> IpAddr {
    match outbound_ip(backend_url).await {
        Ok(ip) => ip,
        Err(e) => {
            warn!("Could not determine outbound address to {}: {}", backend_url, e);
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        }
    }
}

pub async fn hostname() -> String {
    for var in ["HOSTNAME", "COMPUTERNAME"] {
        if let Ok(name) = std::env::var(var) {
            if !name.trim().is_empty() {
                return name.trim().to_string();
            }
        }
    }

    match tokio::fs::read_to_string("/etc/hostname").await {
        Ok(name) if !name.trim().is_empty() => name.trim().to_string(),
        _ => "unknown-host".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_loopback_backend_routes_through_loopback() {
        let ip = outbound_ip("http://127.0.0.1:3001").await.unwrap();
        assert!(ip.is_loopback());
    }

    #[tokio::test]
    async fn test_invalid_url_is_an_error() {
        assert!(outbound_ip("not a url").await.is_err());
        assert!(outbound_ip_or_unspecified("not a url").await.is_unspecified());
    }

    #[tokio::test]
    async fn test_hostname_is_never_empty() {
        assert!(!hostname().await.is_empty());
    }
}

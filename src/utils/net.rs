use std::net::SocketAddr;
use std::net::TcpListener;
use std::net::ToSocketAddrs;

use tokio::net::TcpStream;

/// accept ip either like 127.0.0.1 or docker host name: node1
pub(crate) fn address_str(addr: &str) -> String {
    // Strip existing "http://" or "https://" prefixes if duplicated.
    let normalized = addr.trim_start_matches("http://").trim_start_matches("https://");
    format!("http://{}", normalized.trim_end_matches('/'))
}

pub(crate) fn http_base_url(
    host: &str,
    port: u16,
) -> String {
    address_str(&format!("{host}:{port}"))
}

/// Resolves `host:port`, accepting both literal addresses and host names.
pub fn socket_addr(
    host: &str,
    port: u16,
) -> std::io::Result<SocketAddr> {
    (host, port).to_socket_addrs()?.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            format!("{host}:{port} did not resolve"),
        )
    })
}

pub async fn is_server_ready(addr: SocketAddr) -> bool {
    TcpStream::connect(addr).await.is_ok()
}

/// Pick an available local port by binding to port 0.
///
/// The port is released before returning, so another process may grab it in
/// between; callers that cannot tolerate that should use reported ports.
pub fn pick_free_port(host: &str) -> std::io::Result<u16> {
    let listener = TcpListener::bind((host, 0))?;
    Ok(listener.local_addr()?.port())
}

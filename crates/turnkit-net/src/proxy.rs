use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, warn};

const MAX_CONCURRENT_TUNNELS: usize = 100;
const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// A loopback HTTP proxy that enforces a domain allowlist on every
/// outbound connection, used to sandbox tool-initiated network access.
pub struct NetworkFilter {
    allowed_domains: Vec<String>,
    tunnels: Arc<Semaphore>,
    shutdown: Arc<Notify>,
    port: u16,
}

impl NetworkFilter {
    /// Bind to an OS-chosen loopback port. Call [`NetworkFilter::run`] to
    /// start serving.
    pub async fn bind(allowed_domains: Vec<String>) -> anyhow::Result<(Self, TcpListener)> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        Ok((
            Self {
                allowed_domains,
                tunnels: Arc::new(Semaphore::new(MAX_CONCURRENT_TUNNELS)),
                shutdown: Arc::new(Notify::new()),
                port,
            },
            listener,
        ))
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Values suitable for injecting into a spawned tool process as
    /// `HTTP_PROXY`/`HTTPS_PROXY`.
    pub fn proxy_env(&self) -> (String, String) {
        let url = format!("http://127.0.0.1:{}", self.port);
        (url.clone(), url)
    }

    /// Request graceful shutdown: the accept loop stops taking new
    /// connections once this is signalled.
    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    fn is_allowed(&self, host: &str) -> bool {
        self.allowed_domains.iter().any(|d| d == host)
    }

    /// Run the accept loop until [`NetworkFilter::shutdown`] is called.
    pub async fn run(self: Arc<Self>, listener: TcpListener) {
        let shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    debug!("network filter shutting down");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let this = self.clone();
                            tokio::spawn(async move { this.handle(stream).await; });
                        }
                        Err(e) => warn!(error = %e, "accept failed"),
                    }
                }
            }
        }
    }

    async fn handle(&self, mut stream: TcpStream) {
        let mut buf = vec![0u8; 8192];
        let n = match stream.read(&mut buf).await {
            Ok(n) if n > 0 => n,
            _ => return,
        };

        let mut headers = [httparse::EMPTY_HEADER; 32];
        let mut req = httparse::Request::new(&mut headers);
        if req.parse(&buf[..n]).is_err() {
            let _ = stream.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await;
            return;
        }

        let method = req.method.unwrap_or("");
        if method.eq_ignore_ascii_case("CONNECT") {
            self.handle_connect(stream, req.path.unwrap_or("")).await;
        } else {
            self.handle_forward(stream, &req, &buf[..n]).await;
        }
    }

    async fn handle_connect(&self, mut stream: TcpStream, target: &str) {
        let host = extract_host(target);
        if !self.is_allowed(&host) {
            let _ = stream.write_all(b"HTTP/1.1 403 Forbidden\r\n\r\n").await;
            return;
        }

        let permit = match self.tunnels.clone().try_acquire_owned() {
            Ok(p) => p,
            Err(_) => {
                let _ = stream.write_all(b"HTTP/1.1 503 Service Unavailable\r\n\r\n").await;
                return;
            }
        };

        let dial = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(target)).await;
        let mut upstream = match dial {
            Ok(Ok(s)) => s,
            _ => {
                let _ = stream.write_all(b"HTTP/1.1 502 Bad Gateway\r\n\r\n").await;
                return;
            }
        };

        if stream.write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n").await.is_err() {
            return;
        }

        let _ = tokio::io::copy_bidirectional(&mut stream, &mut upstream).await;
        drop(permit);
    }

    async fn handle_forward(&self, mut stream: TcpStream, req: &httparse::Request<'_, '_>, raw: &[u8]) {
        let host = req
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case("host"))
            .map(|h| String::from_utf8_lossy(h.value).into_owned())
            .unwrap_or_default();
        let host = extract_host(&host);

        if !self.is_allowed(&host) {
            let _ = stream.write_all(b"HTTP/1.1 403 Forbidden\r\n\r\n").await;
            return;
        }

        // Minimal reverse relay: reuse the raw request bytes against a
        // fresh connection to the allowed host on port 80.
        let addr = format!("{host}:80");
        match tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(&addr)).await {
            Ok(Ok(mut upstream)) => {
                if upstream.write_all(raw).await.is_ok() {
                    let _ = tokio::io::copy_bidirectional(&mut stream, &mut upstream).await;
                }
            }
            _ => {
                let _ = stream.write_all(b"HTTP/1.1 502 Bad Gateway\r\n\r\n").await;
            }
        }
    }
}

/// Strip a trailing `:port` from a CONNECT target or `Host:` header.
pub fn extract_host(authority: &str) -> String {
    match authority.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host.to_string(),
        _ => authority.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_host_strips_port() {
        assert_eq!(extract_host("example.com:443"), "example.com");
    }

    #[test]
    fn extract_host_without_port_is_unchanged() {
        assert_eq!(extract_host("example.com"), "example.com");
    }

    #[test]
    fn extract_host_ignores_non_numeric_suffix() {
        // A bare IPv6-ish or malformed authority shouldn't be mistaken for host:port.
        assert_eq!(extract_host("example.com:notaport"), "example.com:notaport");
    }

    #[tokio::test]
    async fn connect_to_disallowed_domain_returns_403() {
        let (filter, listener) = NetworkFilter::bind(vec!["example.com".into()]).await.unwrap();
        let port = filter.port();
        let filter = Arc::new(filter);
        let handle = tokio::spawn(filter.clone().run(listener));

        let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        client
            .write_all(b"CONNECT blocked.evil.com:443 HTTP/1.1\r\nHost: blocked.evil.com:443\r\n\r\n")
            .await
            .unwrap();
        let mut resp = [0u8; 64];
        let n = client.read(&mut resp).await.unwrap();
        let text = String::from_utf8_lossy(&resp[..n]);
        assert!(text.starts_with("HTTP/1.1 403"));

        filter.shutdown();
        let _ = handle.await;
    }

    #[test]
    fn proxy_env_points_at_loopback() {
        // Constructed without binding a real port to test the string shape only.
        let filter = NetworkFilter {
            allowed_domains: vec![],
            tunnels: Arc::new(Semaphore::new(1)),
            shutdown: Arc::new(Notify::new()),
            port: 4123,
        };
        let (http, https) = filter.proxy_env();
        assert_eq!(http, "http://127.0.0.1:4123");
        assert_eq!(https, "http://127.0.0.1:4123");
    }
}

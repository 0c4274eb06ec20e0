//! Readiness protocols

use crate::error::{Result, SigilError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::net::TcpStream;

/// How to tell that a service accepts traffic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessProtocol {
    /// A TCP connect to `address` succeeds
    Tcp { address: String },
    /// An HTTP GET of `url` answers with `status`
    Http { url: String, status: u16 },
}

impl ReadinessProtocol {
    /// Run a single check, bounded by `timeout`
    pub async fn check(&self, client: &reqwest::Client, timeout: Duration) -> Result<()> {
        match self {
            ReadinessProtocol::Tcp { address } => {
                match tokio::time::timeout(timeout, TcpStream::connect(address.as_str())).await {
                    Ok(Ok(_)) => Ok(()),
                    Ok(Err(e)) => Err(SigilError::Runtime(format!(
                        "connect to {} failed: {}",
                        address, e
                    ))),
                    Err(_) => Err(SigilError::Runtime(format!(
                        "connect to {} timed out",
                        address
                    ))),
                }
            }
            ReadinessProtocol::Http { url, status } => {
                let response = client
                    .get(url)
                    .timeout(timeout)
                    .send()
                    .await
                    .map_err(|e| SigilError::Runtime(format!("GET {} failed: {}", url, e)))?;

                let actual = response.status().as_u16();
                if actual == *status {
                    Ok(())
                } else {
                    Err(SigilError::Runtime(format!(
                        "GET {} returned {}, expected {}",
                        url, actual, status
                    )))
                }
            }
        }
    }
}

impl std::fmt::Display for ReadinessProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadinessProtocol::Tcp { address } => write!(f, "tcp://{}", address),
            ReadinessProtocol::Http { url, status } => write!(f, "GET {} -> {}", url, status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP status line per connection
    async fn http_server(status_line: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                    status_line
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });

        format!("http://{}/ready", addr)
    }

    #[tokio::test]
    async fn test_tcp_check() {
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let probe = ReadinessProtocol::Tcp {
            address: address.clone(),
        };
        assert!(probe.check(&client, Duration::from_secs(1)).await.is_ok());

        drop(listener);
        assert!(probe.check(&client, Duration::from_secs(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_http_check() {
        let client = reqwest::Client::builder().no_proxy().build().unwrap();

        let ok = ReadinessProtocol::Http {
            url: http_server("200 OK").await,
            status: 200,
        };
        assert!(ok.check(&client, Duration::from_secs(2)).await.is_ok());

        let unavailable = ReadinessProtocol::Http {
            url: http_server("503 Service Unavailable").await,
            status: 200,
        };
        let err = unavailable
            .check(&client, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("returned 503"));
    }

    #[test]
    fn test_display() {
        let tcp = ReadinessProtocol::Tcp {
            address: "127.0.0.1:3100".to_string(),
        };
        assert_eq!(tcp.to_string(), "tcp://127.0.0.1:3100");
    }
}

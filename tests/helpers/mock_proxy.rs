use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

use super::mock_server::{parse_head, read_head};

/// One `CONNECT` request as the proxy saw it.
#[derive(Debug, Clone)]
pub struct ConnectAttempt {
    /// 1-based id of the client connection to the proxy.
    pub connection: usize,
    pub target: String,
    pub authorization: Option<String>,
}

#[derive(Default)]
struct ProxyState {
    connections: AtomicUsize,
    attempts: Mutex<Vec<ConnectAttempt>>,
}

/// How the proxy frames its `407` answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Challenge {
    /// HTTP/1.1 with a `Content-Length` body; the connection stays open.
    KeepAlive,
    /// HTTP/1.1 with `Connection: close`, then hang up.
    Close,
    /// HTTP/1.0 without a `Connection` header, then hang up.
    Http10,
    /// HTTP/1.1 with a chunked body; the connection stays open.
    Chunked,
}

/// Forward proxy that only speaks `CONNECT`, optionally demanding Basic credentials.
pub struct MockProxy {
    listener: TcpListener,
    port: u16,
    required_authorization: Option<String>,
    challenge: Challenge,
    state: Arc<ProxyState>,
}

#[derive(Clone)]
pub struct ProxyHandle {
    state: Arc<ProxyState>,
}

impl ProxyHandle {
    pub fn connection_count(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn attempts(&self) -> Vec<ConnectAttempt> {
        self.state.attempts.lock().unwrap().clone()
    }
}

impl MockProxy {
    pub async fn new() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        Ok(Self {
            listener,
            port,
            required_authorization: None,
            challenge: Challenge::KeepAlive,
            state: Arc::default(),
        })
    }

    /// Answer `407` unless `Proxy-Authorization` equals `value`.
    pub fn require_authorization(mut self, value: &str) -> Self {
        self.required_authorization = Some(value.to_string());
        self
    }

    /// Hang up after sending a `407`.
    pub fn close_after_challenge(mut self) -> Self {
        self.challenge = Challenge::Close;
        self
    }

    /// Answer with an HTTP/1.0 `407` and hang up.
    pub fn http10_challenge(mut self) -> Self {
        self.challenge = Challenge::Http10;
        self
    }

    /// Answer with a `407` whose body is chunked, keeping the connection.
    pub fn chunked_challenge(mut self) -> Self {
        self.challenge = Challenge::Chunked;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn start(self) -> ProxyHandle {
        let handle = ProxyHandle {
            state: Arc::clone(&self.state),
        };
        let required = self.required_authorization.clone();
        let challenge = self.challenge;
        tokio::spawn(async move {
            while let Ok((stream, _)) = self.listener.accept().await {
                let id = self.state.connections.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::spawn(handle_client(
                    stream,
                    id,
                    required.clone(),
                    challenge,
                    Arc::clone(&self.state),
                ));
            }
        });
        handle
    }
}

async fn handle_client(
    mut client: TcpStream,
    id: usize,
    required: Option<String>,
    challenge: Challenge,
    state: Arc<ProxyState>,
) {
    let mut buf = Vec::new();
    loop {
        let Some(head_len) = read_head(&mut client, &mut buf).await else {
            return;
        };
        let (method, target, headers) = parse_head(&buf[..head_len]);
        buf.drain(..head_len);

        let authorization = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("proxy-authorization"))
            .map(|(_, v)| v.clone());
        state.attempts.lock().unwrap().push(ConnectAttempt {
            connection: id,
            target: target.clone(),
            authorization: authorization.clone(),
        });

        if method != "CONNECT" {
            let _ = client
                .write_all(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .await;
            return;
        }

        if required.is_some() && authorization != required {
            let response = match challenge {
                Challenge::KeepAlive => "HTTP/1.1 407 Proxy Authentication Required\r\nProxy-Authenticate: Basic realm=\"mock\"\r\nContent-Length: 6\r\n\r\ndenied",
                Challenge::Close => "HTTP/1.1 407 Proxy Authentication Required\r\nProxy-Authenticate: Basic realm=\"mock\"\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                Challenge::Http10 => "HTTP/1.0 407 Proxy Authentication Required\r\nProxy-Authenticate: Basic realm=\"mock\"\r\n\r\n",
                Challenge::Chunked => "HTTP/1.1 407 Proxy Authentication Required\r\nProxy-Authenticate: Basic realm=\"mock\"\r\nTransfer-Encoding: chunked\r\n\r\n6\r\ndenied\r\n0\r\n\r\n",
            };
            let hang_up = matches!(challenge, Challenge::Close | Challenge::Http10);
            if client.write_all(response.as_bytes()).await.is_err() || hang_up {
                return;
            }
            continue;
        }

        let Ok(mut upstream) = TcpStream::connect(&target).await else {
            let _ = client
                .write_all(b"HTTP/1.1 502 Bad Gateway\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .await;
            return;
        };
        if client
            .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
            .await
            .is_err()
        {
            return;
        }
        if !buf.is_empty() && upstream.write_all(&buf).await.is_err() {
            return;
        }
        let _ = tokio::io::copy_bidirectional(&mut client, &mut upstream).await;
        return;
    }
}

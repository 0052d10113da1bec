use boring::ssl::SslAcceptor;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::timeout;

/// A request as the server saw it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// 1-based id of the TCP connection that carried the request.
    pub connection: usize,
    /// "http/1.1" or "h2".
    pub protocol: &'static str,
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Scripted reply.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub close: bool,
    pub delay: Duration,
}

impl Reply {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
            close: false,
            delay: Duration::ZERO,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            ..Self::ok("")
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Answer with `Connection: close` and hang up.
    pub fn close(mut self) -> Self {
        self.close = true;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn to_h1(&self, close: bool) -> Vec<u8> {
        let mut out = format!("HTTP/1.1 {} {}\r\n", self.status, reason(self.status));
        for (name, value) in &self.headers {
            out.push_str(&format!("{}: {}\r\n", name, value));
        }
        out.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        if close {
            out.push_str("Connection: close\r\n");
        }
        out.push_str("\r\n");
        out.push_str(&self.body);
        out.into_bytes()
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        302 => "Found",
        407 => "Proxy Authentication Required",
        _ => "Status",
    }
}

type Handler = Arc<dyn Fn(&RecordedRequest) -> Reply + Send + Sync>;

#[derive(Default)]
struct State {
    connections: AtomicUsize,
    requests: Mutex<Vec<RecordedRequest>>,
}

/// Mock origin server: HTTP/1.1 on plain TCP, and HTTP/1.1 or h2 (per ALPN) over TLS.
pub struct MockHttpServer {
    listener: TcpListener,
    port: u16,
    handler: Handler,
    state: Arc<State>,
}

/// Inspect a running server.
#[derive(Clone)]
pub struct ServerHandle {
    state: Arc<State>,
}

impl ServerHandle {
    /// Number of TCP connections accepted so far.
    pub fn connection_count(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }
}

impl MockHttpServer {
    /// Create a new mock server bound to a random port. Answers `200 Hello`.
    pub async fn new() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        Ok(Self {
            listener,
            port,
            handler: Arc::new(|_: &RecordedRequest| Reply::ok("Hello")),
            state: Arc::default(),
        })
    }

    /// Answer requests with `handler`.
    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&RecordedRequest) -> Reply + Send + Sync + 'static,
    {
        self.handler = Arc::new(handler);
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn url_tls(&self) -> String {
        format!("https://127.0.0.1:{}", self.port)
    }

    /// Serve plain HTTP/1.1 in a background task.
    pub fn start(self) -> ServerHandle {
        let handle = ServerHandle {
            state: Arc::clone(&self.state),
        };
        tokio::spawn(async move {
            while let Ok((stream, _)) = self.listener.accept().await {
                let _ = stream.set_nodelay(true);
                let id = self.state.connections.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::spawn(serve_h1(
                    stream,
                    id,
                    Arc::clone(&self.handler),
                    Arc::clone(&self.state),
                ));
            }
        });
        handle
    }

    /// Serve TLS in a background task. The protocol follows the ALPN
    /// selection: h2 via hyper, spdy/3.1 is hung up on, anything else is HTTP/1.1.
    pub fn start_tls(self, acceptor: SslAcceptor) -> ServerHandle {
        let handle = ServerHandle {
            state: Arc::clone(&self.state),
        };
        tokio::spawn(async move {
            while let Ok((stream, _)) = self.listener.accept().await {
                let id = self.state.connections.fetch_add(1, Ordering::SeqCst) + 1;
                let acceptor = acceptor.clone();
                let handler = Arc::clone(&self.handler);
                let state = Arc::clone(&self.state);
                tokio::spawn(async move {
                    let stream = match tokio_boring::accept(&acceptor, stream).await {
                        Ok(stream) => stream,
                        Err(_) => return,
                    };
                    let alpn = stream.ssl().selected_alpn_protocol().map(<[u8]>::to_vec);
                    match alpn.as_deref() {
                        Some(b"h2") => serve_h2(stream, id, handler, state).await,
                        Some(b"spdy/3.1") => drop(stream),
                        _ => serve_h1(stream, id, handler, state).await,
                    }
                });
            }
        });
        handle
    }
}

/// Read until a full request head is buffered. Returns the head length, or
/// `None` once the peer is gone or idle for 5s.
pub async fn read_head<S>(stream: &mut S, buf: &mut Vec<u8>) -> Option<usize>
where
    S: AsyncRead + Unpin,
{
    loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            return Some(pos + 4);
        }
        let mut chunk = [0u8; 4096];
        match timeout(Duration::from_secs(5), stream.read(&mut chunk)).await {
            Ok(Ok(n)) if n > 0 => buf.extend_from_slice(&chunk[..n]),
            _ => return None,
        }
    }
}

/// Split a request head into (method, target, headers).
pub fn parse_head(head: &[u8]) -> (String, String, Vec<(String, String)>) {
    let head = String::from_utf8_lossy(head);
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split(' ');
    let method = request_line.next().unwrap_or_default().to_string();
    let target = request_line.next().unwrap_or_default().to_string();
    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();
    (method, target, headers)
}

async fn serve_h1<S>(mut stream: S, id: usize, handler: Handler, state: Arc<State>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    loop {
        let Some(head_len) = read_head(&mut stream, &mut buf).await else {
            return;
        };
        let (method, target, headers) = parse_head(&buf[..head_len]);
        let content_length = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, v)| v.parse::<usize>().ok())
            .unwrap_or(0);

        while buf.len() < head_len + content_length {
            let mut chunk = [0u8; 4096];
            match stream.read(&mut chunk).await {
                Ok(n) if n > 0 => buf.extend_from_slice(&chunk[..n]),
                _ => return,
            }
        }
        let body = buf[head_len..head_len + content_length].to_vec();
        buf.drain(..head_len + content_length);

        let request = RecordedRequest {
            connection: id,
            protocol: "http/1.1",
            method,
            target,
            headers,
            body,
        };
        state.requests.lock().unwrap().push(request.clone());

        let reply = handler(&request);
        if !reply.delay.is_zero() {
            tokio::time::sleep(reply.delay).await;
        }

        let close = reply.close
            || request
                .header("connection")
                .is_some_and(|v| v.eq_ignore_ascii_case("close"));
        if stream.write_all(&reply.to_h1(close)).await.is_err() {
            return;
        }
        let _ = stream.flush().await;
        if close {
            let _ = stream.shutdown().await;
            return;
        }
    }
}

async fn serve_h2<S>(stream: S, id: usize, handler: Handler, state: Arc<State>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
        let handler = Arc::clone(&handler);
        let state = Arc::clone(&state);
        async move {
            let (parts, body) = req.into_parts();
            let body = body
                .collect()
                .await
                .map(|b| b.to_bytes().to_vec())
                .unwrap_or_default();
            let request = RecordedRequest {
                connection: id,
                protocol: "h2",
                method: parts.method.to_string(),
                target: parts.uri.to_string(),
                headers: parts
                    .headers
                    .iter()
                    .map(|(k, v)| (k.to_string(), String::from_utf8_lossy(v.as_bytes()).to_string()))
                    .collect(),
                body,
            };
            state.requests.lock().unwrap().push(request.clone());

            let reply = handler(&request);
            if !reply.delay.is_zero() {
                tokio::time::sleep(reply.delay).await;
            }

            let mut builder = hyper::Response::builder().status(reply.status);
            for (name, value) in &reply.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            Ok::<_, Infallible>(builder.body(Full::new(Bytes::from(reply.body))).unwrap())
        }
    });

    let _ = hyper::server::conn::http2::Builder::new(TokioExecutor::new())
        .serve_connection(TokioIo::new(stream), service)
        .await;
}

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::LOCATION;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;

/// Local upstream that echoes the request body and headers back.
///
/// - `/slow` answers after two seconds
/// - `/redirect` answers 302 to `/elsewhere`
/// - every response carries `x-echo-method` and `x-echo-uri`
pub struct EchoServer {
    pub port: u16,
    hits: Arc<AtomicUsize>,
}

impl EchoServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to address");
        let port = listener.local_addr().unwrap().port();
        let hits = Arc::new(AtomicUsize::new(0));

        let server_hits = hits.clone();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let io = TokioIo::new(stream);
                let hits = server_hits.clone();

                tokio::spawn(async move {
                    let service = service_fn(move |req| {
                        hits.fetch_add(1, Ordering::SeqCst);
                        echo_handler(req)
                    });
                    if let Err(err) = Builder::new(TokioExecutor::new())
                        .serve_connection(io, service)
                        .await
                    {
                        eprintln!("Error serving connection: {:?}", err);
                    }
                });
            }
        });

        Self { port, hits }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn echo_handler(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();

    match parts.uri.path() {
        "/slow" => tokio::time::sleep(Duration::from_secs(2)).await,
        "/redirect" => {
            let mut response = Response::new(Full::new(Bytes::new()));
            *response.status_mut() = StatusCode::FOUND;
            response
                .headers_mut()
                .insert(LOCATION, "/elsewhere".parse().unwrap());
            return Ok(response);
        }
        _ => {}
    }

    let body_bytes = body
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .unwrap_or_else(|_| Bytes::new());

    let mut response = Response::new(Full::new(body_bytes));
    *response.headers_mut() = parts.headers;
    response
        .headers_mut()
        .insert("x-echo-method", parts.method.as_str().parse().unwrap());
    response
        .headers_mut()
        .insert("x-echo-uri", parts.uri.to_string().parse().unwrap());

    Ok(response)
}

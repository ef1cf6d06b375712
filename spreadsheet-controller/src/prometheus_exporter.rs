use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use http_body_util::Full;
use hyper::{
    Request, Response, StatusCode,
    body::{Bytes, Incoming},
    header::{CONTENT_TYPE, HeaderValue},
    server::conn::http1,
    service::service_fn,
};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, Registry, TEXT_FORMAT, TextEncoder};
use tokio::net::TcpListener;

fn render(registry: &Registry) -> Response<Full<Bytes>> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut result = Vec::new();
    match encoder.encode(&metric_families, &mut result) {
        Ok(_) => {
            let mut response = Response::new(Full::new(Bytes::from(result)));
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_FORMAT));
            response
        }
        Err(e) => {
            error!("{}", e);
            let mut response = Response::new(Full::new(Bytes::new()));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    }
}

async fn serve_req(
    _req: Request<Incoming>,
    registry: Arc<Registry>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    Ok(render(registry.as_ref()))
}

pub(crate) async fn start_prometheus_metrics_server(
    addr: SocketAddr,
    registry: Registry,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    debug!("Listening on http://{}", addr);
    let registry = Arc::new(registry);
    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let registry = registry.clone();
        tokio::spawn(async move {
            let handler = service_fn(move |req| serve_req(req, registry.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, handler).await {
                debug!("metrics connection error: {}", e);
            }
        });
    }
}

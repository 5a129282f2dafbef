//! Hyper accept loop.
//!
//! Each inbound request becomes a [`Context`] whose body is the live
//! hyper stream, so request bodies are pulled on demand rather than
//! buffered up front. A failed pipeline never takes the connection task
//! down: the context is force-closed with its synthetic 499 and whatever
//! response state it holds is flushed.

use arbor_http::{BodyStream, Context};
use arbor_routing::Router;
use bytes::Bytes;
use futures::StreamExt;
use http_body_util::BodyStream as IncomingStream;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

pub struct HttpServer {
	router: Arc<Router>,
}

impl HttpServer {
	pub fn new(router: Arc<Router>) -> Self {
		Self { router }
	}

	/// Bind `addr` and serve until the task is dropped.
	pub async fn listen(&self, addr: SocketAddr) -> std::io::Result<()> {
		let listener = TcpListener::bind(addr).await?;
		tracing::info!(%addr, "listening");
		self.serve(listener).await
	}

	/// Serve connections from an already-bound listener.
	pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
		loop {
			let (stream, peer) = listener.accept().await?;
			let router = self.router.clone();

			tokio::spawn(async move {
				let io = TokioIo::new(stream);
				let service = service_fn(move |req| {
					let router = router.clone();
					async move {
						Ok::<_, std::convert::Infallible>(handle_request(router, req).await)
					}
				});

				if let Err(err) = ConnBuilder::new(TokioExecutor::new())
					.serve_connection(io, service)
					.await
				{
					tracing::debug!(peer = %peer, error = %err, "connection closed");
				}
			});
		}
	}
}

async fn handle_request(router: Arc<Router>, req: Request<Incoming>) -> Response<Full<Bytes>> {
	let (parts, body) = req.into_parts();
	let target = parts
		.uri
		.path_and_query()
		.map(|pq| pq.as_str().to_string())
		.unwrap_or_else(|| "/".to_string());

	let stream: BodyStream = Box::pin(IncomingStream::new(body).filter_map(|frame| async move {
		match frame {
			Ok(frame) => frame.into_data().ok().map(Ok),
			Err(err) => Some(Err(Box::new(err) as Box<dyn std::error::Error + Send + Sync>)),
		}
	}));

	let mut ctx = Context::new(parts.method, target)
		.with_http_version(parts.version)
		.with_headers(parts.headers)
		.with_body(stream);

	if let Err(err) = router.process(&mut ctx).await {
		tracing::error!(error = %err, "request processing failed");
		let _ = ctx.force_close().await;
	}

	let reply = ctx.take_response();
	let mut builder = Response::builder().status(reply.status);
	if let Some(headers) = builder.headers_mut() {
		*headers = reply.headers;
	}
	builder.body(Full::new(reply.body)).unwrap_or_default()
}

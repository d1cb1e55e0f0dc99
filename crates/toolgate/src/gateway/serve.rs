// North-side serving
//
// Three listen modes: stdio (the common launcher case), SSE, and
// streamable HTTP. In HTTP mode the rmcp session layer owns the
// `Mcp-Session-Id` round-trip; the axum router adds `/status` and
// `/metrics` next to `/mcp`.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use rmcp::transport::sse_server::SseServer;
use rmcp::transport::stdio;
use rmcp::transport::streamable_http_server::service::StreamableHttpService;
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use rmcp::ServiceExt;

use super::Gateway;
use crate::config::ListenMode;

/// Serve the gateway until shutdown. Returns once the client disconnects
/// (stdio) or ctrl-c arrives (network modes).
pub async fn serve(gateway: Gateway) -> anyhow::Result<()> {
	let mode = gateway.inner.config.mode;
	match mode {
		ListenMode::Stdio => serve_stdio(gateway).await,
		ListenMode::Sse => serve_sse(gateway).await,
		ListenMode::StreamableHttp => serve_http(gateway).await,
	}
}

async fn serve_stdio(gateway: Gateway) -> anyhow::Result<()> {
	tracing::info!(target: "gateway", "serving MCP over stdio");
	let service = gateway.serve(stdio()).await?;
	service.waiting().await?;
	Ok(())
}

async fn serve_sse(gateway: Gateway) -> anyhow::Result<()> {
	let bind: std::net::SocketAddr = gateway.inner.config.bind.parse()?;
	tracing::info!(target: "gateway", %bind, "serving MCP over SSE");
	let server = SseServer::serve(bind).await?;
	let ct = server.with_service(move || gateway.clone());
	tokio::signal::ctrl_c().await?;
	ct.cancel();
	Ok(())
}

async fn serve_http(gateway: Gateway) -> anyhow::Result<()> {
	let bind: std::net::SocketAddr = gateway.inner.config.bind.parse()?;
	tracing::info!(target: "gateway", %bind, "serving MCP over streamable HTTP");

	let handler = gateway.clone();
	let mcp_service = StreamableHttpService::new(
		move || Ok(handler.clone()),
		LocalSessionManager::default().into(),
		Default::default(),
	);

	let router = axum::Router::new()
		.nest_service("/mcp", mcp_service)
		.route("/status", get(status_handler))
		.route("/metrics", get(metrics_handler))
		.with_state(gateway);

	let listener = tokio::net::TcpListener::bind(bind).await?;
	axum::serve(listener, router)
		.with_graceful_shutdown(async {
			let _ = tokio::signal::ctrl_c().await;
		})
		.await?;
	Ok(())
}

async fn status_handler(State(gateway): State<Gateway>) -> impl IntoResponse {
	Json(gateway.status())
}

async fn metrics_handler(State(gateway): State<Gateway>) -> impl IntoResponse {
	gateway.metrics_text()
}

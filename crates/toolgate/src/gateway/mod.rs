// Gateway façade
//
// The MCP server role: clients negotiate capabilities, list the curated
// tool surface, and call virtual tools. Dispatch is a hash lookup into the
// resolved registry, a request transform, one upstream call, and a
// response transform. The advertised surface is assembled once at startup
// and served from a snapshot thereafter.

mod error;
mod serve;

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use itertools::Itertools;
use rmcp::model::{
	CallToolRequestParam, CallToolResult, ErrorData, Implementation, ListToolsResult,
	PaginatedRequestParam, ProtocolVersion, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::RequestContext;
use rmcp::{RoleServer, ServerHandler};
use serde_json::{Map, Value};

pub use error::GatewayError;
pub use serve::serve;

use crate::config::GatewayConfig;
use crate::metrics::Metrics;
use crate::registry::resolve::{ResolvedRegistry, ResolvedTool};
use crate::transform::{transform_request, transform_response};
use crate::upstream::{DisabledTools, DriftValidator, ProgressRouter, SessionManager};

struct GatewayInner {
	registry: Arc<ResolvedRegistry>,
	sessions: SessionManager,
	progress: Arc<ProgressRouter>,
	disabled: DisabledTools,
	config: GatewayConfig,
	deadline: Duration,
	/// Precomputed advertised tool surface, swapped once after startup
	surface: ArcSwap<Vec<Tool>>,
	last_activity: AtomicI64,
	metrics: Metrics,
}

/// The gateway handler. Cheap to clone; one instance serves every client
/// session.
#[derive(Clone)]
pub struct Gateway {
	inner: Arc<GatewayInner>,
}

impl Gateway {
	pub fn new(registry: Arc<ResolvedRegistry>, config: GatewayConfig) -> Self {
		let disabled: DisabledTools = Default::default();
		let validator = Arc::new(DriftValidator::new(
			Arc::clone(&registry),
			Arc::clone(&disabled),
		));
		let progress = ProgressRouter::new();
		let sessions =
			SessionManager::from_registry(&registry, Arc::clone(&progress), Some(validator));
		let deadline = config.call_deadline();

		let gateway = Self {
			inner: Arc::new(GatewayInner {
				registry,
				sessions,
				progress,
				disabled,
				config,
				deadline,
				surface: ArcSwap::new(Arc::new(Vec::new())),
				last_activity: AtomicI64::new(now_epoch_secs()),
				metrics: Metrics::new(),
			}),
		};
		// Surface from declared schemas; enriched again after backends
		// initialize.
		gateway.rebuild_surface();
		gateway
	}

	/// Connect eager backends and assemble the final tool surface.
	pub async fn start(&self) {
		self.inner.sessions.initialize_eager().await;
		self.rebuild_surface();
		tracing::info!(
			target: "gateway",
			tools = self.inner.surface.load().len(),
			backends = self.inner.sessions.backend_count(),
			ready = self.inner.sessions.ready_count(),
			"gateway started"
		);
	}

	/// Assemble the advertised tool surface: declared schemas first, the
	/// upstream-reported schema for base tools that declare none.
	fn rebuild_surface(&self) {
		let inner = &self.inner;
		let mut upstream_by_backend: HashMap<&str, Arc<Vec<Tool>>> = HashMap::new();
		for tool in inner.registry.tools() {
			if !upstream_by_backend.contains_key(tool.backend_name.as_str()) {
				if let Some(cached) = inner
					.sessions
					.session_for(&tool.backend_name)
					.and_then(|s| s.cached_tools())
				{
					upstream_by_backend.insert(tool.backend_name.as_str(), cached);
				}
			}
		}

		let surface = inner
			.registry
			.tools()
			.map(|tool| {
				let upstream = upstream_by_backend
					.get(tool.backend_name.as_str())
					.and_then(|tools| {
						tools
							.iter()
							.find(|t| t.name.as_ref() == tool.upstream_name)
					});
				advertised_entry(tool, upstream)
			})
			.collect_vec();

		inner.surface.store(Arc::new(surface));
	}

	pub fn registry(&self) -> &Arc<ResolvedRegistry> {
		&self.inner.registry
	}

	pub fn sessions(&self) -> &SessionManager {
		&self.inner.sessions
	}

	/// Forwarded to the session manager; used once an external OAuth flow
	/// completes.
	pub fn provide_bearer(&self, server: &str, token: String) -> bool {
		self.inner.sessions.provide_bearer(server, token)
	}

	pub fn status(&self) -> Value {
		serde_json::json!({
			"lastActivity": self.inner.last_activity.load(Ordering::Relaxed),
			"backends": self.inner.sessions.backend_count(),
		})
	}

	pub fn metrics_text(&self) -> String {
		self
			.inner
			.metrics
			.backends_ready
			.set(self.inner.sessions.ready_count() as i64);
		self.inner.metrics.render()
	}

	fn touch(&self) {
		self
			.inner
			.last_activity
			.store(now_epoch_secs(), Ordering::Relaxed);
	}

	/// The advertised surface snapshot (test hook).
	pub fn tool_surface(&self) -> Arc<Vec<Tool>> {
		self.inner.surface.load_full()
	}

	async fn dispatch(
		&self,
		request: CallToolRequestParam,
		ctx: RequestContext<RoleServer>,
	) -> Result<CallToolResult, GatewayError> {
		let inner = &self.inner;
		let name = request.name.as_ref();

		let tool = inner
			.registry
			.get(name)
			.ok_or_else(|| GatewayError::ToolUnknown(name.to_string()))?;
		if inner.disabled.read().contains(name) {
			return Err(GatewayError::ToolDisabled(name.to_string()));
		}

		let args = transform_request(tool, request.arguments, inner.config.merge_policy)?;

		let session = inner
			.sessions
			.session_for(&tool.backend_name)
			.ok_or_else(|| {
				GatewayError::Upstream(crate::upstream::UpstreamError::Unavailable(
					tool.backend_name.clone(),
				))
			})?;

		// Forward upstream progress to this caller for the duration of the
		// call, under the caller's own token.
		let _progress_guard = ctx.meta.get_progress_token().map(|token| {
			inner
				.progress
				.register(session.fingerprint(), ctx.peer.clone(), token)
		});

		tracing::debug!(
			target: "gateway",
			tool = name,
			backend = %tool.backend_name,
			upstream_tool = %tool.upstream_name,
			"dispatching tool call"
		);

		let result = session
			.call_tool(&tool.upstream_name, args, inner.deadline, &ctx.ct)
			.await?;

		Ok(transform_response(
			tool,
			result,
			inner.config.detect_json_in_text,
		))
	}
}

/// Build one advertised `Tool` entry from the resolved definition plus the
/// upstream-reported tool, when the backend has one cached.
fn advertised_entry(resolved: &ResolvedTool, upstream: Option<&Tool>) -> Tool {
	let input_schema: Arc<Map<String, Value>> = match &resolved.advertised_input_schema {
		Some(Value::Object(map)) => Arc::new(map.clone()),
		_ => match upstream {
			Some(up) => {
				let schema = Value::Object(up.input_schema.as_ref().clone());
				let advertised = resolved.advertise_input_schema(&schema);
				Arc::new(advertised.as_object().cloned().unwrap_or_default())
			},
			// Backend not reachable yet (lazy OAuth): permissive placeholder.
			None => {
				let mut map = Map::new();
				map.insert("type".to_string(), Value::String("object".to_string()));
				Arc::new(map)
			},
		},
	};

	let output_schema = resolved
		.advertised_output_schema
		.as_ref()
		.and_then(Value::as_object)
		.cloned()
		.map(Arc::new)
		.or_else(|| upstream.and_then(|u| u.output_schema.clone()));

	Tool {
		name: Cow::Owned(resolved.exposed_name.clone()),
		title: None,
		description: resolved
			.description
			.clone()
			.map(Cow::Owned)
			.or_else(|| upstream.and_then(|u| u.description.clone())),
		input_schema,
		output_schema,
		annotations: upstream.and_then(|u| u.annotations.clone()),
		icons: None,
		meta: None,
	}
}

fn now_epoch_secs() -> i64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_secs() as i64)
		.unwrap_or(0)
}

#[allow(clippy::manual_async_fn)]
impl ServerHandler for Gateway {
	fn get_info(&self) -> ServerInfo {
		ServerInfo {
			protocol_version: ProtocolVersion::default(),
			capabilities: ServerCapabilities::builder().enable_tools().build(),
			server_info: Implementation::from_build_env(),
			instructions: Some(
				"This server is a gateway to a set of MCP servers. Calls to the tools listed \
				 here are translated and forwarded to the backend that provides them."
					.to_string(),
			),
			..Default::default()
		}
	}

	fn list_tools(
		&self,
		_request: Option<PaginatedRequestParam>,
		_ctx: RequestContext<RoleServer>,
	) -> impl std::future::Future<Output = Result<ListToolsResult, ErrorData>> + Send + '_ {
		async move {
			self.touch();
			Ok(ListToolsResult {
				tools: self.inner.surface.load().as_ref().clone(),
				next_cursor: None,
				meta: None,
			})
		}
	}

	fn call_tool(
		&self,
		request: CallToolRequestParam,
		ctx: RequestContext<RoleServer>,
	) -> impl std::future::Future<Output = Result<CallToolResult, ErrorData>> + Send + '_ {
		async move {
			self.touch();
			self.inner.metrics.calls.inc();
			match self.dispatch(request, ctx).await {
				Ok(result) => Ok(result),
				Err(e) => {
					self.inner.metrics.call_errors.inc();
					Err(e.into())
				},
			}
		}
	}

	fn ping(
		&self,
		_ctx: RequestContext<RoleServer>,
	) -> impl std::future::Future<Output = Result<(), ErrorData>> + Send + '_ {
		async { Ok(()) }
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::registry::types::{RegistryDoc, ServerDef, ToolDef};

	fn gateway(tools: Vec<ToolDef>) -> Gateway {
		let registry = ResolvedRegistry::resolve(RegistryDoc {
			schema_version: "1.0".to_string(),
			servers: vec![ServerDef::stdio("weather", "weather-mcp")],
			schemas: Map::new(),
			tools,
		})
		.unwrap();
		Gateway::new(Arc::new(registry), GatewayConfig::default())
	}

	#[test]
	fn test_surface_uses_declared_schema() {
		let gw = gateway(vec![
			ToolDef::base("fetch_forecast", "weather")
				.with_description("hourly forecast")
				.with_input_schema(json!({
					"type": "object",
					"properties": {
						"city": {"type": "string"},
						"api_key": {"type": "string"}
					},
					"required": ["city", "api_key"]
				})),
			ToolDef::derive("get_weather", "fetch_forecast")
				.with_default("api_key", json!("K")),
		]);

		let surface = gw.tool_surface();
		assert_eq!(surface.len(), 2);

		let get_weather = surface
			.iter()
			.find(|t| t.name.as_ref() == "get_weather")
			.unwrap();
		assert!(get_weather.input_schema.contains_key("properties"));
		let props = get_weather.input_schema["properties"].as_object().unwrap();
		assert!(props.contains_key("city"));
		assert!(!props.contains_key("api_key"));
		assert_eq!(get_weather.description.as_deref(), Some("hourly forecast"));
	}

	#[test]
	fn test_surface_placeholder_for_unreachable_backend() {
		let gw = gateway(vec![ToolDef::base("fetch_forecast", "weather")]);
		let surface = gw.tool_surface();
		assert_eq!(surface[0].input_schema["type"], json!("object"));
	}

	#[test]
	fn test_surface_strips_source_field() {
		let gw = gateway(vec![ToolDef::base("t", "weather").with_output_schema(json!({
			"type": "object",
			"properties": {
				"names": {
					"type": "array",
					"source_field": "$.entities[*].name",
					"items": {"type": "string"}
				}
			}
		}))]);

		let surface = gw.tool_surface();
		let rendered = serde_json::to_string(&surface[0].output_schema).unwrap();
		assert!(!rendered.contains("source_field"));
	}

	#[test]
	fn test_status_shape() {
		let gw = gateway(vec![ToolDef::base("t", "weather")]);
		let status = gw.status();
		assert_eq!(status["backends"], json!(1));
		assert!(status["lastActivity"].as_i64().unwrap() > 0);
	}

	#[test]
	fn test_metrics_exposed() {
		let gw = gateway(vec![ToolDef::base("t", "weather")]);
		let text = gw.metrics_text();
		assert!(text.contains("toolgate_calls_total"));
		assert!(text.contains("toolgate_backends_ready"));
	}
}

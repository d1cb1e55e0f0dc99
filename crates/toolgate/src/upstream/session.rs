// Backend sessions
//
// One session per distinct backend definition. The state machine is
// Idle/Connecting -> Ready -> (Degraded | Closed); Closed sessions are
// reconnected on demand with exponential backoff, and calls arriving
// before the backoff elapses fail fast. All callers share one rmcp client
// service per session; request multiplexing over single-stream transports
// rides on MCP request-id correlation inside rmcp.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rmcp::model::{
	CallToolRequestParam, CallToolResult, ProgressNotificationParam, Tool,
};
use rmcp::service::{NotificationContext, Peer, RoleClient, RunningService, ServiceError};
use rmcp::transport::child_process::TokioChildProcess;
use rmcp::transport::sse_client::{SseClientConfig, SseClientTransport};
use rmcp::transport::streamable_http_client::{
	StreamableHttpClientTransport, StreamableHttpClientTransportConfig,
};
use rmcp::{ClientHandler, ServiceExt};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use super::drift::DriftValidator;
use super::error::UpstreamError;
use super::progress::ProgressRouter;
use crate::registry::types::{AuthMode, RemoteTransport, ServerEndpoint, StdioSpec};

const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_CAP_MS: u64 = 30_000;

/// Exponential backoff with equal jitter: half the capped delay is fixed,
/// the other half uniformly random.
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
	let exp = BACKOFF_BASE_MS.saturating_mul(1u64 << attempt.min(10));
	let capped = exp.min(BACKOFF_CAP_MS);
	let jitter = rand::random_range(0..=capped / 2);
	Duration::from_millis(capped / 2 + jitter)
}

struct Live {
	service: RunningService<RoleClient, SessionHandler>,
	tools: Arc<Vec<Tool>>,
}

enum SessionState {
	/// Created, never connected (lazy backends start here)
	Idle,
	Connecting,
	Ready(Live),
	/// Connected but the upstream tool list could not be fetched
	Degraded(Live),
	Closed { attempt: u32, next_attempt: Instant },
}

impl SessionState {
	fn name(&self) -> &'static str {
		match self {
			SessionState::Idle => "idle",
			SessionState::Connecting => "connecting",
			SessionState::Ready(_) => "ready",
			SessionState::Degraded(_) => "degraded",
			SessionState::Closed { .. } => "closed",
		}
	}
}

/// A deduplicated backend session.
pub struct Session {
	/// Canonical fingerprint of the endpoint definition
	fingerprint: String,
	/// Server names sharing this session (first is the display label)
	names: Vec<String>,
	endpoint: ServerEndpoint,
	auth: AuthMode,
	bearer: Mutex<Option<String>>,
	state: Mutex<SessionState>,
	/// Serializes connection attempts; callers queue here while one
	/// connector runs
	connect_lock: tokio::sync::Mutex<()>,
	progress: Arc<ProgressRouter>,
	validator: Option<Arc<DriftValidator>>,
}

/// A cheap handle onto a live session.
pub struct ReadyHandle {
	pub peer: Peer<RoleClient>,
	pub tools: Arc<Vec<Tool>>,
}

impl Session {
	pub fn new(
		fingerprint: String,
		names: Vec<String>,
		endpoint: ServerEndpoint,
		auth: AuthMode,
		progress: Arc<ProgressRouter>,
		validator: Option<Arc<DriftValidator>>,
	) -> Self {
		Self {
			fingerprint,
			names,
			endpoint,
			auth,
			bearer: Mutex::new(None),
			state: Mutex::new(SessionState::Idle),
			connect_lock: tokio::sync::Mutex::new(()),
			progress,
			validator,
		}
	}

	pub fn fingerprint(&self) -> &str {
		&self.fingerprint
	}

	pub fn label(&self) -> &str {
		self.names.first().map(String::as_str).unwrap_or("?")
	}

	pub fn server_names(&self) -> &[String] {
		&self.names
	}

	pub fn requires_oauth(&self) -> bool {
		self.auth == AuthMode::Oauth
	}

	pub fn state_name(&self) -> &'static str {
		self.state.lock().name()
	}

	pub fn is_ready(&self) -> bool {
		matches!(*self.state.lock(), SessionState::Ready(_))
	}

	/// Supply the bearer token for an OAuth backend. Connection happens on
	/// the next demand.
	pub fn provide_bearer(&self, token: String) {
		*self.bearer.lock() = Some(token);
	}

	/// Cached upstream tool list, if the session has one.
	pub fn cached_tools(&self) -> Option<Arc<Vec<Tool>>> {
		match &*self.state.lock() {
			SessionState::Ready(live) => Some(Arc::clone(&live.tools)),
			_ => None,
		}
	}

	/// Get a live handle, connecting if necessary. Fails fast with
	/// `Unavailable` while backoff has not elapsed.
	pub async fn ensure_ready(&self) -> Result<ReadyHandle, UpstreamError> {
		// Fast path without touching the connect lock.
		{
			let state = self.state.lock();
			match &*state {
				SessionState::Ready(live) => {
					return Ok(ReadyHandle {
						peer: live.service.peer().clone(),
						tools: Arc::clone(&live.tools),
					});
				},
				SessionState::Closed { next_attempt, .. } if Instant::now() < *next_attempt => {
					return Err(UpstreamError::Unavailable(self.label().to_string()));
				},
				_ => {},
			}
		}

		if self.requires_oauth() && self.bearer.lock().is_none() {
			tracing::debug!(
				target: "upstream",
				backend = self.label(),
				"oauth backend awaiting token"
			);
			return Err(UpstreamError::Unavailable(self.label().to_string()));
		}

		// Slow path: one connection attempt at a time.
		let _connecting = self.connect_lock.lock().await;

		// Someone may have finished connecting while we queued, or a
		// degraded session may just need its tool list retried.
		let (attempt, retry_list_peer) = {
			let mut state = self.state.lock();
			match &*state {
				SessionState::Ready(live) => {
					return Ok(ReadyHandle {
						peer: live.service.peer().clone(),
						tools: Arc::clone(&live.tools),
					});
				},
				SessionState::Closed { next_attempt, .. } if Instant::now() < *next_attempt => {
					return Err(UpstreamError::Unavailable(self.label().to_string()));
				},
				SessionState::Degraded(live) => (0, Some(live.service.peer().clone())),
				SessionState::Closed { attempt, .. } => {
					let attempt = *attempt;
					*state = SessionState::Connecting;
					(attempt, None)
				},
				SessionState::Idle | SessionState::Connecting => {
					*state = SessionState::Connecting;
					(0, None)
				},
			}
		};

		if let Some(peer) = retry_list_peer {
			return self.retry_tool_list(peer).await;
		}

		tracing::info!(
			target: "upstream",
			backend = self.label(),
			attempt,
			"connecting to backend"
		);

		match self.connect().await {
			Ok(service) => self.finish_initialize(service).await,
			Err(e) => {
				let delay = backoff_delay(attempt);
				let mut state = self.state.lock();
				*state = SessionState::Closed {
					attempt: attempt + 1,
					next_attempt: Instant::now() + delay,
				};
				tracing::warn!(
					target: "upstream",
					backend = self.label(),
					error = %e,
					retry_in_ms = delay.as_millis() as u64,
					"backend connection failed"
				);
				Err(e)
			},
		}
	}

	/// Handshake done; fetch and cache the tool list, then go Ready (or
	/// Degraded when the list is unavailable).
	async fn finish_initialize(
		&self,
		service: RunningService<RoleClient, SessionHandler>,
	) -> Result<ReadyHandle, UpstreamError> {
		let peer = service.peer().clone();
		match service.list_all_tools().await {
			Ok(tools) => {
				let tools = Arc::new(tools);
				tracing::info!(
					target: "upstream",
					backend = self.label(),
					tools = tools.len(),
					"backend ready"
				);
				if let Some(validator) = &self.validator {
					validator.on_ready(&self.fingerprint, &tools);
				}
				let handle = ReadyHandle {
					peer,
					tools: Arc::clone(&tools),
				};
				*self.state.lock() = SessionState::Ready(Live { service, tools });
				Ok(handle)
			},
			Err(e) => {
				tracing::warn!(
					target: "upstream",
					backend = self.label(),
					error = %e,
					"connected, but tool listing failed; session degraded"
				);
				let tools = Arc::new(Vec::new());
				let handle = ReadyHandle {
					peer,
					tools: Arc::clone(&tools),
				};
				*self.state.lock() = SessionState::Degraded(Live { service, tools });
				Ok(handle)
			},
		}
	}

	/// A degraded session retries only the tool list over the existing
	/// connection.
	async fn retry_tool_list(&self, peer: Peer<RoleClient>) -> Result<ReadyHandle, UpstreamError> {
		match peer.list_all_tools().await {
			Ok(tools) => {
				let tools = Arc::new(tools);
				if let Some(validator) = &self.validator {
					validator.on_ready(&self.fingerprint, &tools);
				}
				let mut state = self.state.lock();
				match std::mem::replace(&mut *state, SessionState::Connecting) {
					SessionState::Degraded(live) => {
						*state = SessionState::Ready(Live {
							service: live.service,
							tools: Arc::clone(&tools),
						});
					},
					other => *state = other,
				}
				Ok(ReadyHandle { peer, tools })
			},
			Err(_) => Ok(ReadyHandle {
				peer,
				tools: Arc::new(Vec::new()),
			}),
		}
	}

	async fn connect(&self) -> Result<RunningService<RoleClient, SessionHandler>, UpstreamError> {
		let handler = SessionHandler {
			fingerprint: self.fingerprint.clone(),
			progress: Arc::clone(&self.progress),
		};

		let transport_err = |message: String| UpstreamError::Transport {
			backend: self.label().to_string(),
			message,
		};

		match &self.endpoint {
			ServerEndpoint::Stdio { stdio } => {
				let cmd = build_command(stdio);
				let transport =
					TokioChildProcess::new(cmd).map_err(|e| transport_err(e.to_string()))?;
				handler
					.serve(transport)
					.await
					.map_err(|e| transport_err(e.to_string()))
			},
			ServerEndpoint::Remote {
				url,
				transport: RemoteTransport::Sse,
				..
			} => match self.bearer_client()? {
				Some(client) => {
					let transport = SseClientTransport::start_with_client(
						client,
						SseClientConfig {
							sse_endpoint: url.clone().into(),
							..Default::default()
						},
					)
					.await
					.map_err(|e| transport_err(e.to_string()))?;
					handler
						.serve(transport)
						.await
						.map_err(|e| transport_err(e.to_string()))
				},
				None => {
					let transport = SseClientTransport::start(url.clone())
						.await
						.map_err(|e| transport_err(e.to_string()))?;
					handler
						.serve(transport)
						.await
						.map_err(|e| transport_err(e.to_string()))
				},
			},
			ServerEndpoint::Remote {
				url,
				transport: RemoteTransport::StreamableHttp,
				..
			} => {
				let transport = match self.bearer_client()? {
					Some(client) => StreamableHttpClientTransport::with_client(
						client,
						StreamableHttpClientTransportConfig {
							uri: url.clone().into(),
							..Default::default()
						},
					),
					None => StreamableHttpClientTransport::from_uri(url.clone()),
				};
				handler
					.serve(transport)
					.await
					.map_err(|e| transport_err(e.to_string()))
			},
		}
	}

	/// HTTP client carrying the OAuth bearer, when one is configured.
	fn bearer_client(&self) -> Result<Option<reqwest::Client>, UpstreamError> {
		let Some(token) = self.bearer.lock().clone() else {
			return Ok(None);
		};
		let mut headers = reqwest::header::HeaderMap::new();
		let mut value = reqwest::header::HeaderValue::from_str(&format!("Bearer {token}"))
			.map_err(|e| UpstreamError::Transport {
				backend: self.label().to_string(),
				message: format!("invalid bearer token: {e}"),
			})?;
		value.set_sensitive(true);
		headers.insert(reqwest::header::AUTHORIZATION, value);
		let client = reqwest::Client::builder()
			.default_headers(headers)
			.build()
			.map_err(|e| UpstreamError::Transport {
				backend: self.label().to_string(),
				message: e.to_string(),
			})?;
		Ok(Some(client))
	}

	/// Mark the session lost. The next call re-initializes once the
	/// backoff window elapses.
	pub fn mark_closed(&self) {
		let mut state = self.state.lock();
		if matches!(*state, SessionState::Ready(_) | SessionState::Degraded(_)) {
			let delay = backoff_delay(0);
			tracing::warn!(
				target: "upstream",
				backend = self.label(),
				retry_in_ms = delay.as_millis() as u64,
				"backend session lost"
			);
			*state = SessionState::Closed {
				attempt: 1,
				next_attempt: Instant::now() + delay,
			};
		}
	}

	/// Dispatch one `tools/call`, honoring the deadline and the caller's
	/// cancellation token. Transport failures close the session.
	pub async fn call_tool(
		&self,
		name: &str,
		args: Map<String, Value>,
		deadline: Duration,
		ct: &CancellationToken,
	) -> Result<CallToolResult, UpstreamError> {
		let handle = self.ensure_ready().await?;
		let params = CallToolRequestParam {
			name: name.to_string().into(),
			arguments: Some(args),
		};

		tokio::select! {
			_ = ct.cancelled() => Err(UpstreamError::Cancelled),
			outcome = tokio::time::timeout(deadline, handle.peer.call_tool(params)) => {
				match outcome {
					Err(_) => Err(UpstreamError::Timeout(deadline)),
					Ok(Ok(result)) => Ok(result),
					// Protocol-level error from the upstream server: the
					// session is fine, the error is forwarded verbatim.
					Ok(Err(ServiceError::McpError(e))) => Err(UpstreamError::Rpc(e)),
					Ok(Err(other)) => {
						self.mark_closed();
						Err(UpstreamError::Transport {
							backend: self.label().to_string(),
							message: other.to_string(),
						})
					},
				}
			}
		}
	}
}

fn build_command(stdio: &StdioSpec) -> tokio::process::Command {
	let mut cmd = tokio::process::Command::new(&stdio.command);
	cmd.args(&stdio.args);
	// The child inherits our environment, plus the server's overlay.
	cmd.envs(&stdio.env);
	cmd
}

/// Client-role handler for one backend session. Its only job beyond the
/// defaults is relaying progress notifications downstream.
#[derive(Clone)]
pub struct SessionHandler {
	fingerprint: String,
	progress: Arc<ProgressRouter>,
}

impl ClientHandler for SessionHandler {
	fn on_progress(
		&self,
		params: ProgressNotificationParam,
		_context: NotificationContext<RoleClient>,
	) -> impl std::future::Future<Output = ()> + Send + '_ {
		async move {
			self.progress.forward(&self.fingerprint, params).await;
		}
	}
}

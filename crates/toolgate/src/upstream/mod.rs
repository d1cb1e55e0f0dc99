// Backend session management
//
// Deduplicates backend definitions by canonical fingerprint, owns one
// session per distinct definition, and initializes them eagerly at startup
// (lazily for OAuth backends, which wait for a bearer token).

mod drift;
mod error;
pub mod fingerprint;
mod progress;
mod session;

use std::collections::HashMap;
use std::sync::Arc;

pub use drift::{DisabledTools, DriftValidator};
pub use error::UpstreamError;
pub use progress::{ProgressGuard, ProgressRouter};
pub use session::{ReadyHandle, Session};

use crate::registry::resolve::ResolvedRegistry;
use crate::registry::types::{AuthMode, ServerEndpoint};
use fingerprint::endpoint_fingerprint;

/// The deduplicated session table. The set of sessions is fixed at startup
/// (the registry snapshot never changes); only per-session state mutates.
pub struct SessionManager {
	sessions: Vec<Arc<Session>>,
	by_server: HashMap<String, usize>,
	progress: Arc<ProgressRouter>,
}

impl SessionManager {
	/// Build the session table from the resolved registry, collapsing
	/// identical definitions onto one session.
	pub fn from_registry(
		registry: &ResolvedRegistry,
		progress: Arc<ProgressRouter>,
		validator: Option<Arc<DriftValidator>>,
	) -> Self {
		let mut sessions: Vec<Arc<Session>> = Vec::new();
		let mut by_fingerprint: HashMap<String, usize> = HashMap::new();
		let mut by_server: HashMap<String, usize> = HashMap::new();
		let mut grouped: Vec<(String, Vec<String>, ServerEndpoint, AuthMode)> = Vec::new();

		for server in registry.servers() {
			let fp = endpoint_fingerprint(&server.endpoint);
			match by_fingerprint.get(&fp) {
				Some(&index) => {
					grouped[index].1.push(server.name.clone());
					by_server.insert(server.name.clone(), index);
				},
				None => {
					let index = grouped.len();
					let auth = match &server.endpoint {
						ServerEndpoint::Remote { auth, .. } => *auth,
						ServerEndpoint::Stdio { .. } => AuthMode::None,
					};
					grouped.push((
						fp.clone(),
						vec![server.name.clone()],
						server.endpoint.clone(),
						auth,
					));
					by_fingerprint.insert(fp, index);
					by_server.insert(server.name.clone(), index);
				},
			}
		}

		for (fp, names, endpoint, auth) in grouped {
			if names.len() > 1 {
				tracing::info!(
					target: "upstream",
					session = %names[0],
					aliases = ?&names[1..],
					"identical backend definitions share one session"
				);
			}
			sessions.push(Arc::new(Session::new(
				fp,
				names,
				endpoint,
				auth,
				Arc::clone(&progress),
				validator.clone(),
			)));
		}

		Self {
			sessions,
			by_server,
			progress,
		}
	}

	/// Session serving a given server name.
	pub fn session_for(&self, server: &str) -> Option<Arc<Session>> {
		self
			.by_server
			.get(server)
			.map(|&i| Arc::clone(&self.sessions[i]))
	}

	pub fn sessions(&self) -> impl Iterator<Item = &Arc<Session>> {
		self.sessions.iter()
	}

	/// Distinct backend sessions.
	pub fn backend_count(&self) -> usize {
		self.sessions.len()
	}

	pub fn ready_count(&self) -> usize {
		self.sessions.iter().filter(|s| s.is_ready()).count()
	}

	pub fn progress_router(&self) -> &Arc<ProgressRouter> {
		&self.progress
	}

	/// Connect every non-OAuth backend. Failures are logged and left in
	/// backoff; the gateway still starts.
	pub async fn initialize_eager(&self) {
		let attempts = self
			.sessions
			.iter()
			.filter(|s| !s.requires_oauth())
			.map(|session| {
				let session = Arc::clone(session);
				async move {
					if let Err(e) = session.ensure_ready().await {
						tracing::warn!(
							target: "upstream",
							backend = session.label(),
							error = %e,
							"eager initialization failed"
						);
					}
				}
			});
		futures::future::join_all(attempts).await;
	}

	/// Hand an OAuth backend its bearer token and kick off the deferred
	/// initialization.
	pub fn provide_bearer(&self, server: &str, token: String) -> bool {
		let Some(session) = self.session_for(server) else {
			return false;
		};
		session.provide_bearer(token);
		tokio::spawn(async move {
			if let Err(e) = session.ensure_ready().await {
				tracing::warn!(
					target: "upstream",
					backend = session.label(),
					error = %e,
					"post-oauth initialization failed"
				);
			}
		});
		true
	}
}

// Progress forwarding
//
// Upstream servers emit `notifications/progress` while a call is running.
// The router keeps, per backend session, the set of downstream requesters
// currently in flight; a notification arriving on that session is relayed
// to each of them under the requester's own progress token. Registration
// happens strictly after dispatch begins and the guard drops before the
// final result is returned, which bounds delivery to the call window.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rmcp::model::{ProgressNotificationParam, ProgressToken};
use rmcp::service::{Peer, RoleServer};

#[derive(Clone)]
struct Registrant {
	id: u64,
	peer: Peer<RoleServer>,
	token: ProgressToken,
}

/// Routes upstream progress notifications to in-flight downstream callers.
#[derive(Default)]
pub struct ProgressRouter {
	inner: Mutex<RouterState>,
}

#[derive(Default)]
struct RouterState {
	next_id: u64,
	/// session fingerprint -> in-flight downstream requesters
	by_session: HashMap<String, Vec<Registrant>>,
}

impl ProgressRouter {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Register a downstream requester for the duration of one upstream
	/// call. Dropping the guard deregisters.
	pub fn register(
		self: &Arc<Self>,
		session: &str,
		peer: Peer<RoleServer>,
		token: ProgressToken,
	) -> ProgressGuard {
		let mut state = self.inner.lock();
		state.next_id += 1;
		let id = state.next_id;
		state
			.by_session
			.entry(session.to_string())
			.or_default()
			.push(Registrant { id, peer, token });
		ProgressGuard {
			router: Arc::clone(self),
			session: session.to_string(),
			id,
		}
	}

	/// Forward a notification from a backend session to every registered
	/// requester, rewriting the token.
	pub async fn forward(&self, session: &str, params: ProgressNotificationParam) {
		let targets: Vec<Registrant> = {
			let state = self.inner.lock();
			state
				.by_session
				.get(session)
				.map(|v| v.to_vec())
				.unwrap_or_default()
		};

		for target in targets {
			let forwarded = ProgressNotificationParam {
				progress_token: target.token.clone(),
				..params.clone()
			};
			if let Err(e) = target.peer.notify_progress(forwarded).await {
				tracing::debug!(
					target: "gateway",
					session,
					error = %e,
					"failed to forward progress notification"
				);
			}
		}
	}

	/// Number of in-flight registrations for a session (test hook).
	pub fn in_flight(&self, session: &str) -> usize {
		self
			.inner
			.lock()
			.by_session
			.get(session)
			.map(Vec::len)
			.unwrap_or(0)
	}

	fn deregister(&self, session: &str, id: u64) {
		let mut state = self.inner.lock();
		if let Some(registrants) = state.by_session.get_mut(session) {
			registrants.retain(|r| r.id != id);
			if registrants.is_empty() {
				state.by_session.remove(session);
			}
		}
	}
}

/// RAII registration handle.
pub struct ProgressGuard {
	router: Arc<ProgressRouter>,
	session: String,
	id: u64,
}

impl Drop for ProgressGuard {
	fn drop(&mut self) {
		self.router.deregister(&self.session, self.id);
	}
}

// Upstream call errors

use std::time::Duration;

use rmcp::model::ErrorData;
use thiserror::Error;

/// Errors surfaced by the backend session layer. Protocol-level errors
/// from the upstream server are forwarded verbatim; everything else maps
/// onto the gateway's error taxonomy.
#[derive(Error, Debug)]
pub enum UpstreamError {
	/// Session is Closed and backoff has not elapsed, or (re)connection
	/// failed. Retriable by the client.
	#[error("backend '{0}' is unavailable")]
	Unavailable(String),

	/// Deadline expired awaiting the upstream call.
	#[error("upstream call timed out after {0:?}")]
	Timeout(Duration),

	/// The upstream server returned a JSON-RPC error; forwarded verbatim.
	#[error("upstream error: {}", .0.message)]
	Rpc(ErrorData),

	/// The transport failed mid-call; the session is marked Closed.
	#[error("backend '{backend}' transport failure: {message}")]
	Transport { backend: String, message: String },

	/// The upstream response did not decode as MCP.
	#[error("malformed upstream response: {0}")]
	Malformed(String),

	/// The caller went away; the in-flight upstream call was dropped.
	#[error("call cancelled by client")]
	Cancelled,
}

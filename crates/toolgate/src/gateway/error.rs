// Call-path error taxonomy
//
// Everything a client can see from a failed `tools/call`, mapped onto
// JSON-RPC error data. Upstream protocol errors pass through verbatim.

use rmcp::model::ErrorData;
use thiserror::Error;

use crate::transform::RequestError;
use crate::upstream::UpstreamError;

#[derive(Error, Debug)]
pub enum GatewayError {
	#[error("unknown tool '{0}'")]
	ToolUnknown(String),

	#[error("tool '{0}' is disabled by schema validation")]
	ToolDisabled(String),

	#[error("invalid arguments: {0}")]
	InvalidArguments(String),

	#[error(transparent)]
	Upstream(#[from] UpstreamError),
}

impl From<RequestError> for GatewayError {
	fn from(e: RequestError) -> Self {
		GatewayError::InvalidArguments(e.to_string())
	}
}

impl From<GatewayError> for ErrorData {
	fn from(e: GatewayError) -> Self {
		match e {
			GatewayError::ToolUnknown(name) => {
				ErrorData::invalid_params(format!("unknown tool '{name}'"), None)
			},
			GatewayError::ToolDisabled(name) => ErrorData::invalid_request(
				format!("tool '{name}' is disabled by schema validation"),
				None,
			),
			GatewayError::InvalidArguments(message) => ErrorData::invalid_params(message, None),
			// Forwarded verbatim.
			GatewayError::Upstream(UpstreamError::Rpc(data)) => data,
			GatewayError::Upstream(upstream) => {
				ErrorData::internal_error(upstream.to_string(), None)
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_upstream_rpc_error_forwarded_verbatim() {
		let original = ErrorData::invalid_params("upstream says no", None);
		let gateway_err = GatewayError::Upstream(UpstreamError::Rpc(original.clone()));
		let data: ErrorData = gateway_err.into();
		assert_eq!(data.code, original.code);
		assert_eq!(data.message, original.message);
	}

	#[test]
	fn test_unavailable_maps_to_internal() {
		let data: ErrorData =
			GatewayError::Upstream(UpstreamError::Unavailable("weather".into())).into();
		assert!(data.message.contains("unavailable"));
	}

	#[test]
	fn test_locked_field_maps_to_invalid_params() {
		let data: ErrorData =
			GatewayError::from(RequestError::LockedField("api_key".into())).into();
		assert!(data.message.contains("api_key"));
	}
}

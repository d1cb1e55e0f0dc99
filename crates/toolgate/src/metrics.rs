// Gateway metrics
//
// A small prometheus registry, exposed at /metrics in HTTP mode. Together
// with the session table this is the only global mutable state.

use parking_lot::Mutex;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

pub struct Metrics {
	registry: Mutex<Registry>,
	pub calls: Counter,
	pub call_errors: Counter,
	pub backends_ready: Gauge,
}

impl Default for Metrics {
	fn default() -> Self {
		Self::new()
	}
}

impl Metrics {
	pub fn new() -> Self {
		let mut registry = Registry::default();
		let calls = Counter::default();
		registry.register("toolgate_calls", "Tool calls dispatched", calls.clone());
		let call_errors = Counter::default();
		registry.register(
			"toolgate_call_errors",
			"Tool calls that returned an error",
			call_errors.clone(),
		);
		let backends_ready = Gauge::default();
		registry.register(
			"toolgate_backends_ready",
			"Backend sessions currently ready",
			backends_ready.clone(),
		);
		Self {
			registry: Mutex::new(registry),
			calls,
			call_errors,
			backends_ready,
		}
	}

	/// Render the registry in the text exposition format.
	pub fn render(&self) -> String {
		let mut out = String::new();
		if let Err(e) = encode(&mut out, &self.registry.lock()) {
			tracing::warn!(target: "gateway", error = %e, "metrics encoding failed");
		}
		out
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_counters_render() {
		let metrics = Metrics::new();
		metrics.calls.inc();
		metrics.calls.inc();
		metrics.call_errors.inc();
		metrics.backends_ready.set(3);

		let text = metrics.render();
		assert!(text.contains("toolgate_calls_total 2"));
		assert!(text.contains("toolgate_call_errors_total 1"));
		assert!(text.contains("toolgate_backends_ready 3"));
	}
}

// toolgate binary
//
// Loads the registry, connects eager backends, and serves MCP clients.
// Exit codes: 0 clean shutdown, 1 registry load/validation error, 2 fatal
// I/O error during startup.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use toolgate::{Gateway, GatewayConfig, ListenMode};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "toolgate", about = "MCP gateway with a virtual-tool registry")]
struct Args {
	/// Path to the registry JSON document
	#[arg(long, short = 'r')]
	registry: PathBuf,

	/// Listen mode: stdio, sse, or http (streamable HTTP)
	#[arg(long, default_value = "stdio")]
	mode: String,

	/// Bind address for the sse and http modes
	#[arg(long, default_value = "127.0.0.1:8000")]
	bind: String,

	/// Upstream call deadline, e.g. "30s" or "500ms"
	#[arg(long, default_value = "30s")]
	call_timeout: String,

	/// Collision policy for hidden-and-defaulted fields:
	/// override, client_wins, or reject
	#[arg(long, default_value = "override")]
	merge_policy: String,

	/// Disable promotion of JSON found in text-only responses
	#[arg(long)]
	no_json_detection: bool,
}

fn main() -> ExitCode {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
		.with_writer(std::io::stderr)
		.init();

	let args = Args::parse();

	let config = match build_config(&args) {
		Ok(config) => config,
		Err(message) => {
			tracing::error!(target: "gateway", error = %message, "invalid arguments");
			return ExitCode::from(2);
		},
	};

	let registry = match toolgate::load_registry(&args.registry) {
		Ok(registry) => Arc::new(registry),
		Err(e) => {
			tracing::error!(target: "registry", error = %e, "registry load failed");
			return ExitCode::from(1);
		},
	};

	let runtime = match tokio::runtime::Runtime::new() {
		Ok(runtime) => runtime,
		Err(e) => {
			tracing::error!(target: "gateway", error = %e, "runtime startup failed");
			return ExitCode::from(2);
		},
	};

	let outcome = runtime.block_on(async {
		let gateway = Gateway::new(registry, config);
		gateway.start().await;
		toolgate::serve(gateway).await
	});

	match outcome {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			tracing::error!(target: "gateway", error = %e, "fatal I/O error");
			ExitCode::from(2)
		},
	}
}

fn build_config(args: &Args) -> Result<GatewayConfig, String> {
	let mode = match args.mode.as_str() {
		"stdio" => ListenMode::Stdio,
		"sse" => ListenMode::Sse,
		"http" | "streamable-http" => ListenMode::StreamableHttp,
		other => return Err(format!("unknown mode '{other}'")),
	};
	let merge_policy = serde_policy(&args.merge_policy)?;
	toolgate::config::parse_duration(&args.call_timeout)?;

	Ok(GatewayConfig {
		mode,
		bind: args.bind.clone(),
		call_timeout: args.call_timeout.clone(),
		merge_policy,
		detect_json_in_text: !args.no_json_detection,
	})
}

fn serde_policy(name: &str) -> Result<toolgate::transform::MergePolicy, String> {
	use toolgate::transform::MergePolicy;
	match name {
		"override" => Ok(MergePolicy::Override),
		"client_wins" => Ok(MergePolicy::ClientWins),
		"reject" => Ok(MergePolicy::Reject),
		other => Err(format!("unknown merge policy '{other}'")),
	}
}

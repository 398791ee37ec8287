use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use relaykit_core::{readiness, signal, telemetry, version};
use relaykit_gateway::{config, ApiState, EventHub, ServiceRegistry};
use tracing::info;

/// Rotating proxy gateway: HTTP API + SSE event stream over the rotation
/// service, HTTP link tester, and Cloudflare edge scanner (spec.md §6).
#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
	/// Path to a YAML config file. Absent or empty means "no proxy/tester/
	/// scanner preconfigured"; everything is then driven through the API.
	#[arg(short, long, value_name = "file")]
	file: Option<PathBuf>,

	/// Print the version string and exit.
	#[arg(short = 'V', long = "version")]
	version: bool,
}

fn main() -> anyhow::Result<()> {
	let args = Args::parse();
	if args.version {
		println!("{}", version::BuildInfo::current().version);
		return Ok(());
	}

	tokio::runtime::Builder::new_multi_thread().enable_all().build()?.block_on(run(args))
}

async fn run(args: Args) -> anyhow::Result<()> {
	let contents = match &args.file {
		Some(path) => std::fs::read_to_string(path)?,
		None => String::new(),
	};
	let (cfg, raw) = config::parse_config(&contents)?;

	let _log_guard = telemetry::init(telemetry::Config {
		format: telemetry::LogFormat::Plain,
		file: cfg.log_file.clone(),
	});
	info!(version = %version::BuildInfo::current().version, "starting relaykit gateway");

	let ready = readiness::Ready::new();
	let server_task = ready.register_task("gateway http server");

	let db_pool = match &cfg.db_path {
		Some(path) => Some(relaykit_history::sql::open(&path.to_string_lossy()).await?),
		None => None,
	};

	let hub = Arc::new(EventHub::default());
	let registry = Arc::new(ServiceRegistry::new(hub, db_pool));

	if let Some(proxy_cfg) = &raw.proxy {
		if !proxy_cfg.config_links.is_empty() {
			start_configured_proxy(&registry, proxy_cfg).await?;
		}
	}

	let app = relaykit_gateway::app(ApiState { registry: registry.clone() });

	let listener = tokio::net::TcpListener::bind(cfg.listen_addr).await?;
	info!(addr = %cfg.listen_addr, "listening");
	drop(server_task);

	// The listener task is explicitly awaited below after `drain`, so it
	// does not take its own reservation; `drain`'s deadline only needs to
	// cover components that aren't otherwise joined (spec.md §6 "all
	// services Stop, history flushes, SSE connections drain").
	let (drain_signal, drain_watch) = relaykit_core::drain::new();
	let shutdown = signal::Shutdown::new();

	let serve_handle = tokio::spawn(async move {
		let shutdown_trigger = async move {
			let _guard = drain_watch.signaled().await;
		};
		if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown_trigger).await {
			tracing::warn!(error = %e, "http server exited with error");
		}
	});

	shutdown.wait().await;
	info!("shutdown requested, draining");
	registry.stop_proxy().await.ok();
	registry.stop_http_test().await.ok();
	registry.stop_scan().await.ok();
	drain_signal.drain(std::time::Duration::from_secs(10)).await;
	let _ = serve_handle.await;

	Ok(())
}

async fn start_configured_proxy(registry: &Arc<ServiceRegistry>, proxy_cfg: &config::RotationConfig) -> anyhow::Result<()> {
	let listen_addr: std::net::SocketAddr = proxy_cfg.listen_addr.parse()?;
	let rotation_config = relaykit_rotate::RotationConfig {
		inbound: relaykit_engine::InboundConfig {
			listen_addr,
			protocol: relaykit_engine::InboundProtocol::Socks,
			transport: relaykit_engine::InboundTransport::Tcp,
			tls: None,
		},
		config_links: proxy_cfg.config_links.clone(),
		rotation_interval: config::rotation_interval(proxy_cfg),
		max_delay: config::max_delay(proxy_cfg),
		timeout: config::timeout(proxy_cfg),
	};
	registry.start_proxy(rotation_config).await?;
	Ok(())
}

use pointing_sync::config::AppConfig;
use pointing_sync::remote::{HttpConnectivityProbe, PointingClient};
use pointing_sync::scheduler::{BackgroundScheduler, Registration};
use pointing_sync::storage::{FileStore, KeyValueStore};
use pointing_sync::sync::{SyncEngine, SyncOutcome};

use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::from_default_env()
				.add_directive(tracing::Level::INFO.into()),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	let run_once = std::env::args().nth(1).as_deref() == Some("once");

	let config = match AppConfig::from_env() {
		Ok(config) => config,
		Err(e) => {
			error!("Invalid configuration: {}", e);
			return ExitCode::FAILURE;
		}
	};

	info!(
		"Starting pointing sync against {} (data in {:?})",
		config.base_url, config.data_dir
	);

	let store: Arc<dyn KeyValueStore> = match FileStore::open(&config.data_dir).await {
		Ok(store) => Arc::new(store),
		Err(e) => {
			error!("Failed to open local store: {}", e);
			return ExitCode::FAILURE;
		}
	};

	let client = match PointingClient::new(
		&config.base_url,
		config.sync.request_timeout,
		config.payload_format,
	) {
		Ok(client) => client,
		Err(e) => {
			error!("Failed to create pointing client: {}", e);
			return ExitCode::FAILURE;
		}
	};

	let probe = match HttpConnectivityProbe::new(&config.base_url, config.probe_timeout) {
		Ok(probe) => probe,
		Err(e) => {
			error!("Failed to create connectivity probe: {}", e);
			return ExitCode::FAILURE;
		}
	};

	let engine = Arc::new(SyncEngine::new(
		store.clone(),
		Arc::new(client),
		Arc::new(probe),
		config.sync.clone(),
	));

	if run_once {
		let report = engine.run().await;
		return match report.outcome {
			SyncOutcome::Failed => ExitCode::FAILURE,
			_ => ExitCode::SUCCESS,
		};
	}

	let scheduler = BackgroundScheduler::new(store, engine.clone(), config.max_backoff_interval);

	match scheduler.resume_or_register(config.task.clone()).await {
		Ok(Some(Registration::Registered)) => info!("Background sync successfully registered"),
		Ok(Some(Registration::AlreadyRegistered)) => {}
		Ok(None) => info!("Background sync was registered without start on boot, leaving it off"),
		Err(e) => {
			error!("Background sync registration failed: {}", e);
			return ExitCode::FAILURE;
		}
	}

	// Catch up right away instead of waiting a full interval
	engine.run().await;

	if let Err(e) = tokio::signal::ctrl_c().await {
		error!("Failed to listen for shutdown signal: {}", e);
	}

	info!("Shutting down");
	if let Err(e) = scheduler.terminate().await {
		error!("Failed to stop background sync: {}", e);
		return ExitCode::FAILURE;
	}

	ExitCode::SUCCESS
}

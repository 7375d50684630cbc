//! Process entry point (§5): wires up configuration, the RETS client, and
//! the three long-lived loops — sync engine, photo scheduler, lifecycle
//! reconciler — with SIGINT-triggered graceful shutdown.

use rets_sync::catalog::CatalogStore;
use rets_sync::config::AppConfig;
use rets_sync::lifecycle::LifecycleReconciler;
use rets_sync::photo::{ObjectStore, PhotoScheduler};
use rets_sync::rets::RetsClient;
use rets_sync::sync::{LockoutSet, SyncEngine};
use rets_sync::{db, lookup};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const SYNC_CYCLE_INTERVAL: Duration = Duration::from_secs(60);
const LOOKUP_REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60 * 6);

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.init();

	let config = match AppConfig::from_env() {
		Ok(config) => config,
		Err(e) => {
			error!(error = %e, "fatal: could not load configuration");
			std::process::exit(1);
		}
	};

	if let Err(e) = run(config).await {
		error!(error = %e, "fatal error, exiting");
		std::process::exit(1);
	}
}

async fn run(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
	let client = Arc::new(RetsClient::new(
		config.rets.clone(),
		config.capabilities_cache_path(),
		config.request_timeout,
	)?);
	let catalog_store = Arc::new(CatalogStore::new(config.update_fields_cache_path()));
	let lockout = Arc::new(LockoutSet::load(config.lockout_cache_path()).await);
	let conn = db::connect(&config.mysql.connection_url()).await?;
	let object_store = Arc::new(ObjectStore::new(&config.object_storage, config.photos_dir())?);

	let sync_engine = Arc::new(SyncEngine::new(client.clone(), conn.clone(), catalog_store.clone(), lockout));
	let photo_scheduler = Arc::new(PhotoScheduler::new(
		conn.clone(),
		client.clone(),
		catalog_store.clone(),
		object_store,
		config.photos_dir(),
	));
	photo_scheduler.ensure_tracking_table().await?;
	let lifecycle = Arc::new(LifecycleReconciler::new(client.clone(), catalog_store.clone(), conn.clone()));

	let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

	let sync_task = {
		let engine = sync_engine.clone();
		let mut shutdown = shutdown_rx.clone();
		tokio::spawn(async move {
			loop {
				if let Err(e) = engine.run_cycle().await {
					error!(error = %e, "sync cycle failed, continuing at next tick");
				}
				tokio::select! {
					_ = tokio::time::sleep(SYNC_CYCLE_INTERVAL) => {}
					_ = shutdown.changed() => return,
				}
				if *shutdown.borrow() {
					return;
				}
			}
		})
	};

	let photo_task = {
		let scheduler = photo_scheduler.clone();
		let shutdown = shutdown_rx.clone();
		tokio::spawn(async move { scheduler.run(shutdown).await })
	};

	let lifecycle_task = {
		let reconciler = lifecycle.clone();
		let shutdown = shutdown_rx.clone();
		tokio::spawn(async move { reconciler.run(shutdown).await })
	};

	let lookup_task = {
		let client = client.clone();
		let catalog_store = catalog_store.clone();
		let conn = conn.clone();
		let mut shutdown = shutdown_rx.clone();
		tokio::spawn(async move {
			loop {
				let session = match client.login().await {
					Ok(s) => s,
					Err(e) => {
						error!(error = %e, "login failed, skipping lookup refresh");
						tokio::time::sleep(LOOKUP_REFRESH_INTERVAL).await;
						continue;
					}
				};
				match catalog_store.get_or_refresh(&client, &session).await {
					Ok(catalog) => {
						if let Err(e) = lookup::load_lookups(&client, &session, &catalog, &conn).await {
							error!(error = %e, "lookup refresh failed, continuing at next tick");
						}
					}
					Err(e) => error!(error = %e, "failed to load catalog for lookup refresh"),
				}
				tokio::select! {
					_ = tokio::time::sleep(LOOKUP_REFRESH_INTERVAL) => {}
					_ = shutdown.changed() => return,
				}
				if *shutdown.borrow() {
					return;
				}
			}
		})
	};

	info!("rets-sync started");
	tokio::signal::ctrl_c().await?;
	info!("shutdown signal received, draining in-flight work");
	let _ = shutdown_tx.send(true);

	let _ = tokio::join!(sync_task, photo_task, lifecycle_task, lookup_task);
	client.logout(&client.login().await?).await;
	info!("rets-sync stopped");
	Ok(())
}

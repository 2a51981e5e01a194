use anyhow::Result;
use beautify_core::{Detector, UnloadedDetector};
use beautify_models::OnnxDetector;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use zbus::object_server::SignalEmitter;

mod camera;
mod config;
mod dbus_interface;
mod detection_loop;
mod export;
mod recommend;
mod render_loop;
mod session;
mod snapshot;
#[cfg(test)]
mod testing;

use dbus_interface::{BeautifyService, BUS_NAME, OBJECT_PATH};
use recommend::{DisabledRecommender, GeminiRecommender, Recommender};

fn load_detector(config: &config::Config) -> Arc<dyn Detector> {
    match OnnxDetector::load(&config.model_dir) {
        Ok(detector) => {
            tracing::info!(
                model_dir = %config.model_dir.display(),
                recognizer = detector.has_recognizer(),
                "face models loaded"
            );
            Arc::new(detector)
        }
        Err(e) => {
            tracing::warn!(
                model_dir = %config.model_dir.display(),
                error = %e,
                "face models unavailable, detection disabled"
            );
            Arc::new(UnloadedDetector)
        }
    }
}

fn load_recommender(config: &config::Config) -> Arc<dyn Recommender> {
    match &config.api_key {
        Some(key) => {
            tracing::info!(model = %config.ai_model, "recommendations enabled");
            Arc::new(GeminiRecommender::new(key.clone(), &config.ai_endpoint, &config.ai_model))
        }
        None => {
            tracing::info!("no API key configured, recommendations disabled");
            Arc::new(DisabledRecommender)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("beautifyd starting");

    let config = config::Config::load()?;
    tracing::info!(
        device = %config.camera_device,
        width = config.width,
        height = config.height,
        render_fps = config.render_fps,
        output_dir = %config.output_dir.display(),
        "configuration loaded"
    );

    let detector = load_detector(&config);
    let provider = Arc::new(camera::V4lProvider::new(config.camera_device.clone()));
    let session = session::Session::new(
        provider,
        detector,
        session::SessionSettings::from(&config),
        export::ExportSink::new(config.output_dir.clone()),
    );
    let handle = session::spawn_session(session);

    let ai_enabled = config.api_key.is_some();
    let service = BeautifyService::new(handle.clone(), load_recommender(&config), ai_enabled);

    let conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await?;

    let emitter = SignalEmitter::new(&conn, OBJECT_PATH)?.into_owned();
    let mut faces = handle.snapshot().subscribe();
    tokio::spawn(async move {
        let mut last = 0usize;
        while faces.changed().await.is_ok() {
            let count = faces.borrow_and_update().faces.len();
            if count == last {
                continue;
            }
            last = count;
            if let Err(e) = BeautifyService::faces_changed(&emitter, count as u32).await {
                tracing::warn!(error = %e, "failed to emit faces_changed");
            }
        }
    });

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "beautifyd ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("beautifyd shutting down");

    handle.stop().await?;
    Ok(())
}

use std::{sync::Arc, time::Instant};

use anyhow::{Context, Result, anyhow};
use got_ocr_config::AppConfig;
use got_ocr_core::ModelCache;
use got_ocr_infer::GotModelLoader;
use rocket::{
    Build, Config, Rocket,
    data::{Limits, ToByteUnit},
    fairing::AdHoc,
    figment::Figment,
    tokio::task,
};
use tracing::info;

use crate::{args::Args, cors::Cors, error, routes, service, state::AppState};

/// Assembles the rocket instance around an already constructed cache.
pub fn build_rocket(cache: Arc<ModelCache>, figment: Figment) -> Rocket<Build> {
    let teardown = Arc::clone(&cache);
    rocket::custom(figment)
        .attach(Cors)
        .attach(AdHoc::on_shutdown("Release model", move |_| {
            Box::pin(async move {
                teardown.clear();
                info!("Model released");
            })
        }))
        .manage(AppState::new(cache))
        .mount("/", routes::routes())
        .mount("/service", service::routes())
        .register("/", catchers![error::default_catcher])
}

pub fn upload_limits() -> Limits {
    Limits::default()
        .limit("data-form", 50.megabytes())
        .limit("file", 50.megabytes())
        .limit("string", 50.megabytes())
        .limit("json", 50.megabytes())
}

pub async fn run(args: Args) -> Result<()> {
    let (mut app_config, descriptor) = AppConfig::load(args.config.as_deref())?;
    app_config += &args;
    info!(
        "Using configuration {} (model `{}`)",
        descriptor, app_config.model.source
    );

    let cache = Arc::new(ModelCache::new(GotModelLoader::from_config(&app_config)));
    if app_config.server.preload {
        let started = Instant::now();
        let preload = Arc::clone(&cache);
        task::spawn_blocking(move || preload.acquire())
            .await
            .context("model preload task failed")??;
        info!("Model preloaded in {:.2?}", started.elapsed());
    }

    let figment = Config::figment()
        .merge(("port", app_config.server.port))
        .merge(("address", app_config.server.host.clone()))
        .merge(("limits", upload_limits()));

    info!(
        "Server ready on {}:{}",
        app_config.server.host, app_config.server.port,
    );

    build_rocket(cache, figment)
        .launch()
        .await
        .map_err(|err| anyhow!("rocket failed: {err}"))?;

    Ok(())
}

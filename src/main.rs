//! UltronFX - 7-day crypto forecast runner
//!
//! Loads artifacts, then forecasts the series named on the command line (or
//! every registered series when none are given) and logs the results.

use anyhow::Result;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ultronfx::config::AppConfig;
use ultronfx::service::{BatchOutcome, ForecastService};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_tracing(config.service.log_json);

    info!("🚀 UltronFX starting");
    info!(config = %config.digest(), "Configuration loaded");

    let service = ForecastService::from_config(&config)?;
    let stats = service.stats();
    info!(
        model = %stats.model,
        series = stats.num_series,
        parameters = stats.model_parameters,
        seq_len = stats.seq_len,
        horizon = stats.prediction_len,
        "✅ Forecast service ready"
    );

    if service.mode() == ultronfx::DataMode::Live {
        let health = service.health().await;
        if !health.online {
            warn!(reason = %health.reason, "Live feed offline; requests will fall back to static data");
        }
    }

    let requested: Vec<String> = std::env::args().skip(1).collect();
    if requested.is_empty() {
        for (series, outcome) in service.predict_all().await {
            log_outcome(&series, &outcome);
        }
    } else {
        for series in requested {
            match service.predict(&series, None).await {
                Ok(f) => log_outcome(&series, &BatchOutcome::Forecast(f)),
                Err(e) => error!(series = %series, error = %e, "Forecast failed"),
            }
        }
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn log_outcome(series: &str, outcome: &BatchOutcome) {
    match outcome {
        BatchOutcome::Forecast(f) => info!(
            series = %series,
            source = %f.source,
            pred_7 = ?f.pred_7,
            "📈 7-day forecast"
        ),
        BatchOutcome::Error { error } => warn!(series = %series, error = %error, "No forecast"),
    }
}

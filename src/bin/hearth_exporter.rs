// hearth_exporter - Prometheus metrics exporter for smart home thermostats and local weather
//
// Copyright 2023 The hearth_exporter Authors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use clap::Parser;
use hearth_exporter::exporter::{Exporter, ExporterConfig};
use hearth_exporter::http::{self, RequestContext};
use reqwest::Client;
use std::error::Error;
use std::io;
use std::net::SocketAddr;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::signal::unix::{self, SignalKind};
use tracing::Level;

const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const DEFAULT_BIND_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], 9777);
const DEFAULT_METRICS_PATH: &str = "/metrics";
const DEFAULT_TIMEOUT_MILLIS: u64 = 5000;
const DEFAULT_API_URL: &str = "https://smartdevicemanagement.googleapis.com/v1/";
const DEFAULT_OAUTH_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_WEATHER_URL: &str = "http://api.openweathermap.org/data/2.5/weather";
const DEFAULT_WEATHER_LOCATION: &str = "2759794";

#[derive(Debug, Parser)]
#[clap(name = "hearth_exporter", version = clap::crate_version!())]
struct HearthExporterApplication {
    /// Device access project ID that thermostats are enrolled in
    #[clap(long, default_value_t = String::new())]
    oauth_project_id: String,

    /// OAuth client ID used to refresh API access tokens
    #[clap(long, default_value_t = String::new())]
    oauth_client_id: String,

    /// OAuth client secret used to refresh API access tokens
    #[clap(long, default_value_t = String::new())]
    oauth_client_secret: String,

    /// OAuth refresh token minted by authorizing the client against your home
    #[clap(long, default_value_t = String::new())]
    oauth_refresh_token: String,

    /// Static API access token. When set, the OAuth flags are ignored and this
    /// token is sent as-is with every request until it expires.
    #[clap(long, default_value_t = String::new())]
    token: String,

    /// URL access token refresh requests are sent to
    #[clap(long, default_value_t = DEFAULT_OAUTH_TOKEN_URL.into())]
    oauth_token_url: String,

    /// Base URL for the Smart Device Management API
    #[clap(long, default_value_t = DEFAULT_API_URL.into())]
    api_url: String,

    /// Temperature unit for emitted metrics. Allowed values are 'celsius' and
    /// 'fahrenheit' (case insensitive), defaulting to celsius
    #[clap(long, default_value_t = String::new())]
    unit: String,

    /// OpenWeatherMap API key. Weather metrics are disabled when unset
    #[clap(long, default_value_t = String::new())]
    weather_token: String,

    /// OpenWeatherMap city ID to fetch weather for
    #[clap(long, default_value_t = DEFAULT_WEATHER_LOCATION.into())]
    weather_location: String,

    /// Base URL for the OpenWeatherMap API
    #[clap(long, default_value_t = DEFAULT_WEATHER_URL.into())]
    weather_url: String,

    /// Timeout for thermostat and weather API requests, in milliseconds.
    #[clap(long, default_value_t = DEFAULT_TIMEOUT_MILLIS)]
    timeout_millis: u64,

    /// Path to expose Prometheus metrics under
    #[clap(long, default_value_t = DEFAULT_METRICS_PATH.into())]
    metrics_path: String,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[clap(long, default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,

    /// Address to bind to. By default, hearth_exporter will bind to public address since
    /// the purpose is to expose metrics to an external system (Prometheus or another
    /// agent for ingestion)
    #[clap(long, default_value_t = DEFAULT_BIND_ADDR.into())]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let opts = HearthExporterApplication::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    let timeout = Duration::from_millis(opts.timeout_millis);
    let client = Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
        tracing::error!(message = "unable to initialize HTTP client", error = %e);
        process::exit(1)
    });

    // Collector construction validates unit, URLs, and credentials so that bad
    // configuration fails at startup instead of surfacing as down-gauges on
    // every scrape.
    let exporter = Exporter::new(ExporterConfig {
        handle: Handle::current(),
        client,
        timeout,
        unit: opts.unit,
        api_url: opts.api_url,
        project_id: opts.oauth_project_id,
        token: opts.token,
        oauth_client_id: opts.oauth_client_id,
        oauth_client_secret: opts.oauth_client_secret,
        oauth_refresh_token: opts.oauth_refresh_token,
        oauth_token_url: opts.oauth_token_url,
        weather_url: opts.weather_url,
        weather_token: opts.weather_token,
        weather_location: opts.weather_location,
    })
    .unwrap_or_else(|e| {
        tracing::error!(message = "unable to initialize collectors", error = %e);
        process::exit(1)
    });

    let context = Arc::new(RequestContext::new(exporter.registry(), &opts.metrics_path));
    let app = http::app(context);

    let server = axum::Server::try_bind(&opts.bind).unwrap_or_else(|e| {
        tracing::error!(message = "error binding to address", address = %opts.bind, error = %e);
        process::exit(1)
    });

    tracing::info!(message = "server started", address = %opts.bind);
    server
        .serve(app.into_make_service())
        .with_graceful_shutdown(async {
            // Wait for either SIGTERM or SIGINT to shutdown
            tokio::select! {
                _ = sigterm() => {}
                _ = sigint() => {}
            }
        })
        .await?;

    tracing::info!("server shutdown");
    Ok(())
}

/// Return after the first SIGTERM signal received by this process
async fn sigterm() -> io::Result<()> {
    unix::signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

/// Return after the first SIGINT signal received by this process
async fn sigint() -> io::Result<()> {
    unix::signal(SignalKind::interrupt())?.recv().await;
    Ok(())
}

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

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::Arc;
use tokio::task;
use tower_http::trace::TraceLayer;
use tracing::{span, Instrument, Level};

/// Shared state for HTTP handlers: the registry to gather metrics from and
/// the path the scrape endpoint is served under.
#[derive(Debug)]
pub struct RequestContext {
    registry: Registry,
    metrics_path: String,
}

impl RequestContext {
    pub fn new(registry: Registry, metrics_path: &str) -> Self {
        let metrics_path = if metrics_path.starts_with('/') {
            metrics_path.to_owned()
        } else {
            format!("/{}", metrics_path)
        };

        RequestContext {
            registry,
            metrics_path,
        }
    }

    pub fn metrics_path(&self) -> &str {
        &self.metrics_path
    }

    /// Run every registered collector and return the gathered families.
    ///
    /// Collectors block on upstream API calls, so the gather runs in the
    /// blocking thread pool rather than on a runtime worker.
    pub async fn gather(&self) -> Vec<MetricFamily> {
        let registry = self.registry.clone();

        match task::spawn_blocking(move || registry.gather())
            .instrument(span!(Level::DEBUG, "hearth_gather"))
            .await
        {
            Ok(families) => families,
            Err(e) => {
                tracing::error!(message = "error gathering prometheus metrics", error = %e);
                Vec::new()
            }
        }
    }
}

/// Create the application router: the scrape endpoint at the configured
/// metrics path and an index page linking to it.
pub fn app(context: Arc<RequestContext>) -> Router {
    let mut router = Router::new().route(context.metrics_path(), get(text_metrics));
    if context.metrics_path() != "/" {
        router = router.route("/", get(index));
    }

    router.layer(TraceLayer::new_for_http()).with_state(context)
}

async fn text_metrics(State(context): State<Arc<RequestContext>>) -> Response {
    let families = context.gather().await;
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();

    match encoder.encode(&families, &mut buf) {
        Ok(()) => {
            tracing::debug!(message = "encoded prometheus metrics to text format", num_bytes = buf.len());
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
                buf,
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!(message = "error encoding metrics to text format", error = %e);
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

async fn index(State(context): State<Arc<RequestContext>>) -> Html<String> {
    Html(format!(
        concat!(
            "<html>\n",
            "<head><title>Hearth Exporter</title></head>\n",
            "<body>\n",
            "<h1>Hearth Exporter</h1>\n",
            "<p><a href=\"{path}\">Metrics</a></p>\n",
            "</body>\n",
            "</html>\n"
        ),
        path = context.metrics_path()
    ))
}

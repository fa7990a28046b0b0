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

use crate::collector::{CollectorError, TemperatureUnit};
use crate::thermostat::{ThermostatCollector, ThermostatConfig};
use crate::weather::{WeatherCollector, WeatherConfig};
use prometheus::Registry;
use reqwest::Client;
use std::time::Duration;
use tokio::runtime::Handle;

/// Full configuration surface for the exporter, one field per flag exposed
/// by the binary. An empty weather token disables the weather collector
/// rather than failing.
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    pub handle: Handle,
    pub client: Client,
    pub timeout: Duration,
    pub unit: String,
    pub api_url: String,
    pub project_id: String,
    pub token: String,
    pub oauth_client_id: String,
    pub oauth_client_secret: String,
    pub oauth_refresh_token: String,
    pub oauth_token_url: String,
    pub weather_url: String,
    pub weather_token: String,
    pub weather_location: String,
}

/// The composed set of collectors behind one registry. Construction
/// validates all configuration and registers every enabled collector; any
/// error here is fatal to startup, collectors are never registered in a
/// degraded state.
#[derive(Debug)]
pub struct Exporter {
    registry: Registry,
}

impl Exporter {
    pub fn new(cfg: ExporterConfig) -> Result<Self, CollectorError> {
        let unit = TemperatureUnit::parse(&cfg.unit)?;
        let registry = Registry::new();

        let thermostat = ThermostatCollector::new(ThermostatConfig {
            handle: cfg.handle.clone(),
            timeout: cfg.timeout,
            unit,
            api_url: cfg.api_url.clone(),
            project_id: cfg.project_id.clone(),
            token: cfg.token.clone(),
            oauth_client_id: cfg.oauth_client_id.clone(),
            oauth_client_secret: cfg.oauth_client_secret.clone(),
            oauth_refresh_token: cfg.oauth_refresh_token.clone(),
            oauth_token_url: cfg.oauth_token_url.clone(),
        })?;
        registry
            .register(Box::new(thermostat))
            .map_err(|e| CollectorError::Registration(e.to_string()))?;
        tracing::info!(message = "registered thermostat collector", api_url = %cfg.api_url, unit = unit.suffix());

        if cfg.weather_token.is_empty() {
            tracing::info!("no weather API token configured, weather collector disabled");
        } else {
            let weather = WeatherCollector::new(WeatherConfig {
                handle: cfg.handle.clone(),
                client: cfg.client.clone(),
                unit,
                api_url: cfg.weather_url.clone(),
                token: cfg.weather_token.clone(),
                location: cfg.weather_location.clone(),
            })?;
            registry
                .register(Box::new(weather))
                .map_err(|e| CollectorError::Registration(e.to_string()))?;
            tracing::info!(message = "registered weather collector", api_url = %cfg.weather_url, location = %cfg.weather_location);
        }

        Ok(Exporter { registry })
    }

    /// The registry holding every enabled collector. Clones share the same
    /// underlying collector set.
    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::{Exporter, ExporterConfig};
    use crate::collector::{CollectorError, ErrorKind, TemperatureUnit};
    use crate::thermostat::{ThermostatCollector, ThermostatConfig};
    use prometheus::proto::MetricFamily;
    use prometheus::Registry;
    use reqwest::Client;
    use std::time::Duration;
    use tokio::runtime::Handle;

    fn config() -> ExporterConfig {
        ExporterConfig {
            handle: Handle::current(),
            client: Client::new(),
            timeout: Duration::from_secs(5),
            unit: String::new(),
            api_url: "http://127.0.0.1:1/".to_owned(),
            project_id: "test-project".to_owned(),
            token: "static-token".to_owned(),
            oauth_client_id: String::new(),
            oauth_client_secret: String::new(),
            oauth_refresh_token: String::new(),
            oauth_token_url: "https://example.com/token".to_owned(),
            weather_url: "http://127.0.0.1:1/weather".to_owned(),
            weather_token: String::new(),
            weather_location: "2759794".to_owned(),
        }
    }

    async fn gather(exporter: &Exporter) -> Vec<MetricFamily> {
        let registry = exporter.registry();
        tokio::task::spawn_blocking(move || registry.gather()).await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_weather_disabled_without_token() {
        let exporter = Exporter::new(config()).unwrap();
        let families = gather(&exporter).await;

        let names: Vec<&str> = families.iter().map(|mf| mf.get_name()).collect();
        assert!(names.contains(&"hearth_up"));
        assert!(!names.iter().any(|n| n.starts_with("hearth_weather")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_weather_enabled_with_token() {
        let mut cfg = config();
        cfg.weather_token = "weather-token".to_owned();
        let exporter = Exporter::new(cfg).unwrap();
        let families = gather(&exporter).await;

        let names: Vec<&str> = families.iter().map(|mf| mf.get_name()).collect();
        assert!(names.contains(&"hearth_up"));
        assert!(names.contains(&"hearth_weather_up"));
    }

    #[tokio::test]
    async fn test_invalid_unit_rejected() {
        let mut cfg = config();
        cfg.unit = "furlong".to_owned();
        let err = Exporter::new(cfg).unwrap_err();

        assert_eq!(ErrorKind::Config, err.kind());
        assert!(matches!(err, CollectorError::InvalidUnit(_)));
    }

    #[tokio::test]
    async fn test_missing_credentials_rejected() {
        let mut cfg = config();
        cfg.token = String::new();
        let err = Exporter::new(cfg).unwrap_err();

        assert!(matches!(err, CollectorError::MissingCredentials));
    }

    #[tokio::test]
    async fn test_duplicate_descriptors_rejected() {
        let thermostat_config = ThermostatConfig {
            handle: Handle::current(),
            timeout: Duration::from_secs(5),
            unit: TemperatureUnit::Celsius,
            api_url: "http://127.0.0.1:1/".to_owned(),
            project_id: "test-project".to_owned(),
            token: "static-token".to_owned(),
            oauth_client_id: String::new(),
            oauth_client_secret: String::new(),
            oauth_refresh_token: String::new(),
            oauth_token_url: String::new(),
        };

        let registry = Registry::new();
        let first = ThermostatCollector::new(thermostat_config.clone()).unwrap();
        let second = ThermostatCollector::new(thermostat_config).unwrap();

        registry.register(Box::new(first)).unwrap();
        assert!(registry.register(Box::new(second)).is_err());
    }
}

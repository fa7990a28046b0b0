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

use crate::collector::{desc_gauge, new_desc, CollectorError, TemperatureUnit};
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use tokio::runtime::Handle;

/// Configuration for the weather collector. The location is an ID in the
/// weather API's own city index, not free text.
#[derive(Debug, Clone)]
pub struct WeatherConfig {
    pub handle: Handle,
    pub client: Client,
    pub unit: TemperatureUnit,
    pub api_url: String,
    pub token: String,
    pub location: String,
}

/// Outside conditions at one location at fetch time.
#[derive(Debug, Clone)]
pub struct WeatherReading {
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
}

#[derive(Deserialize, Debug)]
struct WeatherResponse {
    #[serde(alias = "main")]
    main: MainSection,
}

#[derive(Deserialize, Debug)]
struct MainSection {
    #[serde(alias = "temp", default)]
    temp: f64,
    #[serde(alias = "humidity", default)]
    humidity: f64,
    #[serde(alias = "pressure", default)]
    pressure: f64,
}

/// Prometheus collector for local weather conditions. One location per
/// collector, so samples carry no labels. The query URL is built and
/// validated once at construction; each collection cycle performs a single
/// GET against it and reports the outcome through `hearth_weather_up`.
#[derive(Debug)]
pub struct WeatherCollector {
    handle: Handle,
    client: Client,
    query_url: Url,
    up: Desc,
    temperature: Desc,
    humidity: Desc,
    pressure: Desc,
}

impl WeatherCollector {
    pub fn new(cfg: WeatherConfig) -> Result<Self, CollectorError> {
        let query_url = Url::parse_with_params(
            &cfg.api_url,
            &[
                ("id", cfg.location.as_str()),
                ("appid", cfg.token.as_str()),
                ("units", cfg.unit.weather_keyword()),
            ],
        )
        .map_err(|_| CollectorError::InvalidEndpoint(cfg.api_url.clone()))?;

        Ok(WeatherCollector {
            handle: cfg.handle,
            client: cfg.client,
            query_url,
            up: new_desc(
                "hearth_weather_up".to_owned(),
                "Was the last weather API call successful".to_owned(),
                Vec::new(),
            )?,
            temperature: new_desc(
                format!("hearth_weather_temperature_{}", cfg.unit.suffix()),
                format!("Outside temperature in degrees {}", cfg.unit.suffix()),
                Vec::new(),
            )?,
            humidity: new_desc(
                "hearth_weather_humidity_percent".to_owned(),
                "Outside humidity (0-100)".to_owned(),
                Vec::new(),
            )?,
            pressure: new_desc(
                "hearth_weather_pressure_hectopascals".to_owned(),
                "Outside barometric pressure in hectopascals".to_owned(),
                Vec::new(),
            )?,
        })
    }

    async fn fetch(&self) -> Result<WeatherReading, CollectorError> {
        tracing::debug!(message = "making weather request", url = %self.query_url);
        let res = self
            .client
            .get(self.query_url.clone())
            .send()
            .await
            .map_err(CollectorError::Request)?;

        let status = res.status();
        if status != StatusCode::OK {
            return Err(CollectorError::UnexpectedStatus(status, self.query_url.clone()));
        }

        let body = res.text().await.map_err(CollectorError::Request)?;
        let response: WeatherResponse =
            serde_json::from_str(&body).map_err(|e| CollectorError::Malformed(e.to_string()))?;

        Ok(WeatherReading {
            temperature: response.main.temp,
            humidity: response.main.humidity,
            pressure: response.main.pressure,
        })
    }
}

impl Collector for WeatherCollector {
    fn desc(&self) -> Vec<&Desc> {
        vec![&self.up, &self.temperature, &self.humidity, &self.pressure]
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let up = desc_gauge(&self.up);
        let mut mfs = Vec::new();

        match self.handle.block_on(self.fetch()) {
            Ok(reading) => {
                up.set(1.0);

                let temperature = desc_gauge(&self.temperature);
                let humidity = desc_gauge(&self.humidity);
                let pressure = desc_gauge(&self.pressure);
                temperature.set(reading.temperature);
                humidity.set(reading.humidity);
                pressure.set(reading.pressure);

                mfs.extend(up.collect());
                mfs.extend(temperature.collect());
                mfs.extend(humidity.collect());
                mfs.extend(pressure.collect());
            }
            Err(e) => {
                tracing::error!(message = "weather collection failed", kind = e.kind().as_label(), error = %e);
                up.set(0.0);
                mfs.extend(up.collect());
            }
        }

        mfs
    }
}

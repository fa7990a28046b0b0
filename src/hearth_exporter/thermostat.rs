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

use crate::collector::{desc_gauge, desc_gauge_vec, new_desc, sanitize_label, CollectorError, TemperatureUnit};
use crate::transport::{AuthTransport, OAuthConfig, OAuthFlow, TokenSource};
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;
use tokio::runtime::Handle;

const LABEL_ID: &str = "id";
const LABEL_LABEL: &str = "label";

const THERMOSTAT_TYPE: &str = "sdm.devices.types.THERMOSTAT";
const STATUS_ONLINE: &str = "ONLINE";
const STATUS_HEATING: &str = "HEATING";
const MODE_MANUAL_ECO: &str = "MANUAL_ECO";

/// Configuration for the thermostat collector. Credentials are either a
/// static bearer token or an OAuth client id/secret/refresh token; when
/// both are present the static token wins.
#[derive(Debug, Clone)]
pub struct ThermostatConfig {
    pub handle: Handle,
    pub timeout: Duration,
    pub unit: TemperatureUnit,
    pub api_url: String,
    pub project_id: String,
    pub token: String,
    pub oauth_client_id: String,
    pub oauth_client_secret: String,
    pub oauth_refresh_token: String,
    pub oauth_token_url: String,
}

/// State of one thermostat at fetch time. Temperatures are carried in both
/// unit systems as reported upstream; the collector picks one based on its
/// configured unit.
#[derive(Debug, Clone)]
pub struct Thermostat {
    pub id: String,
    pub label: String,
    pub online: bool,
    pub ambient_celsius: f64,
    pub ambient_fahrenheit: f64,
    pub target_celsius: f64,
    pub target_fahrenheit: f64,
    pub humidity: f64,
    pub heating: bool,
    pub eco: bool,
}

impl From<Device> for Thermostat {
    fn from(device: Device) -> Self {
        Thermostat {
            id: device.name,
            label: device.traits.info.custom_name,
            online: device.traits.connectivity.status == STATUS_ONLINE,
            ambient_celsius: device.traits.temperature.ambient_celsius,
            ambient_fahrenheit: device.traits.temperature.ambient_fahrenheit,
            target_celsius: device.traits.setpoint.heat_celsius,
            target_fahrenheit: device.traits.setpoint.heat_fahrenheit,
            humidity: device.traits.humidity.percent,
            heating: device.traits.hvac.status == STATUS_HEATING,
            eco: device.traits.eco.mode == MODE_MANUAL_ECO,
        }
    }
}

#[derive(Deserialize, Debug)]
struct DeviceList {
    #[serde(alias = "devices", default)]
    devices: Vec<serde_json::Value>,
}

#[derive(Deserialize, Debug)]
struct Device {
    #[serde(alias = "name")]
    name: String,
    #[serde(alias = "type")]
    type_: String,
    #[serde(alias = "traits", default)]
    traits: Traits,
}

#[derive(Deserialize, Debug, Default)]
struct Traits {
    #[serde(alias = "sdm.devices.traits.Info", default)]
    info: InfoTrait,
    #[serde(alias = "sdm.devices.traits.Connectivity", default)]
    connectivity: ConnectivityTrait,
    #[serde(alias = "sdm.devices.traits.Temperature", default)]
    temperature: TemperatureTrait,
    #[serde(alias = "sdm.devices.traits.Humidity", default)]
    humidity: HumidityTrait,
    #[serde(alias = "sdm.devices.traits.ThermostatHvac", default)]
    hvac: HvacTrait,
    #[serde(alias = "sdm.devices.traits.ThermostatTemperatureSetpoint", default)]
    setpoint: SetpointTrait,
    #[serde(alias = "sdm.devices.traits.ThermostatEco", default)]
    eco: EcoTrait,
}

#[derive(Deserialize, Debug, Default)]
struct InfoTrait {
    #[serde(alias = "customName", default)]
    custom_name: String,
}

#[derive(Deserialize, Debug, Default)]
struct ConnectivityTrait {
    #[serde(alias = "status", default)]
    status: String,
}

#[derive(Deserialize, Debug, Default)]
struct TemperatureTrait {
    #[serde(alias = "ambientTemperatureCelsius", default)]
    ambient_celsius: f64,
    #[serde(alias = "ambientTemperatureFahrenheit", default)]
    ambient_fahrenheit: f64,
}

#[derive(Deserialize, Debug, Default)]
struct HumidityTrait {
    #[serde(alias = "ambientHumidityPercent", default)]
    percent: f64,
}

#[derive(Deserialize, Debug, Default)]
struct HvacTrait {
    #[serde(alias = "status", default)]
    status: String,
}

#[derive(Deserialize, Debug, Default)]
struct SetpointTrait {
    #[serde(alias = "heatCelsius", default)]
    heat_celsius: f64,
    #[serde(alias = "heatFahrenheit", default)]
    heat_fahrenheit: f64,
}

#[derive(Deserialize, Debug, Default)]
struct EcoTrait {
    #[serde(alias = "mode", default)]
    mode: String,
}

/// Prometheus collector for thermostat telemetry. Each collection cycle
/// fetches the device list from the API, maps every online thermostat to
/// one sample per declared metric, and reports the cycle outcome through
/// the `hearth_up` gauge.
#[derive(Debug)]
pub struct ThermostatCollector {
    handle: Handle,
    unit: TemperatureUnit,
    devices_url: Url,
    transport: AuthTransport,
    up: Desc,
    online: Desc,
    current_temperature: Desc,
    target_temperature: Desc,
    humidity: Desc,
    heating: Desc,
    eco: Desc,
}

impl ThermostatCollector {
    const AUTH_URL: &'static str = "https://accounts.google.com/o/oauth2/auth";
    const OAUTH_SCOPE: &'static str = "https://www.googleapis.com/auth/sdm.service";

    pub fn new(cfg: ThermostatConfig) -> Result<Self, CollectorError> {
        let mut devices_url =
            Url::parse(&cfg.api_url).map_err(|_| CollectorError::InvalidEndpoint(cfg.api_url.clone()))?;
        if !cfg.project_id.is_empty() {
            // push() percent-encodes each segment, the project ID must go in raw.
            let mut segments = devices_url
                .path_segments_mut()
                .map_err(|_| CollectorError::InvalidEndpoint(cfg.api_url.clone()))?;
            segments.pop_if_empty().push("enterprises").push(&cfg.project_id).push("devices");
        }

        let tokens = if !cfg.token.is_empty() {
            TokenSource::Static(cfg.token.clone())
        } else if !cfg.oauth_client_id.is_empty()
            && !cfg.oauth_client_secret.is_empty()
            && !cfg.oauth_refresh_token.is_empty()
        {
            TokenSource::OAuth(OAuthFlow::new(OAuthConfig {
                client_id: cfg.oauth_client_id.clone(),
                client_secret: cfg.oauth_client_secret.clone(),
                refresh_token: cfg.oauth_refresh_token.clone(),
                scope: Self::OAUTH_SCOPE.to_owned(),
                auth_url: Self::AUTH_URL.to_owned(),
                token_url: cfg.oauth_token_url.clone(),
            })?)
        } else {
            return Err(CollectorError::MissingCredentials);
        };

        let labels = vec![LABEL_ID.to_owned(), LABEL_LABEL.to_owned()];

        Ok(ThermostatCollector {
            handle: cfg.handle,
            unit: cfg.unit,
            devices_url,
            transport: AuthTransport::new(cfg.timeout, tokens)?,
            up: new_desc(
                "hearth_up".to_owned(),
                "Was the last thermostat API call successful".to_owned(),
                Vec::new(),
            )?,
            online: new_desc(
                "hearth_online".to_owned(),
                "Whether the thermostat is connected".to_owned(),
                labels.clone(),
            )?,
            current_temperature: new_desc(
                format!("hearth_current_temperature_{}", cfg.unit.suffix()),
                format!("Current ambient temperature in degrees {}", cfg.unit.suffix()),
                labels.clone(),
            )?,
            target_temperature: new_desc(
                format!("hearth_target_temperature_{}", cfg.unit.suffix()),
                format!("Target temperature in degrees {}", cfg.unit.suffix()),
                labels.clone(),
            )?,
            humidity: new_desc(
                "hearth_humidity_percent".to_owned(),
                "Current ambient humidity (0-100)".to_owned(),
                labels.clone(),
            )?,
            heating: new_desc(
                "hearth_heating".to_owned(),
                "Whether the thermostat is actively heating".to_owned(),
                labels.clone(),
            )?,
            eco: new_desc(
                "hearth_eco".to_owned(),
                "Whether energy saving eco mode is active".to_owned(),
                labels,
            )?,
        })
    }

    async fn fetch(&self) -> Result<Vec<Thermostat>, CollectorError> {
        tracing::debug!(message = "making thermostat list request", url = %self.devices_url);
        let body = self.transport.get_json(&self.devices_url).await?;
        let list: DeviceList = serde_json::from_str(&body).map_err(|e| CollectorError::Malformed(e.to_string()))?;

        let mut thermostats = Vec::new();
        for entry in list.devices {
            let device: Device = match serde_json::from_value(entry) {
                Ok(device) => device,
                Err(e) => {
                    tracing::debug!(message = "skipping undecodable device entry", error = %e);
                    continue;
                }
            };
            if device.type_ != THERMOSTAT_TYPE {
                tracing::debug!(message = "skipping non-thermostat device", device = %device.name, device_type = %device.type_);
                continue;
            }

            thermostats.push(Thermostat::from(device));
        }

        if thermostats.is_empty() {
            return Err(CollectorError::Malformed("no usable thermostats in response".to_owned()));
        }

        Ok(thermostats)
    }
}

impl Collector for ThermostatCollector {
    fn desc(&self) -> Vec<&Desc> {
        vec![
            &self.up,
            &self.online,
            &self.current_temperature,
            &self.target_temperature,
            &self.humidity,
            &self.heating,
            &self.eco,
        ]
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let up = desc_gauge(&self.up);
        let mut mfs = Vec::new();

        match self.handle.block_on(self.fetch()) {
            Ok(thermostats) => {
                up.set(1.0);

                let online = desc_gauge_vec(&self.online);
                let current_temperature = desc_gauge_vec(&self.current_temperature);
                let target_temperature = desc_gauge_vec(&self.target_temperature);
                let humidity = desc_gauge_vec(&self.humidity);
                let heating = desc_gauge_vec(&self.heating);
                let eco = desc_gauge_vec(&self.eco);

                for thermostat in &thermostats {
                    let label = sanitize_label(&thermostat.label);
                    let labels = [thermostat.id.as_str(), label.as_str()];

                    online.with_label_values(&labels).set(bool_value(thermostat.online));
                    if !thermostat.online {
                        // Readings from an offline thermostat are stale, report only its presence.
                        continue;
                    }

                    let (ambient, target) = match self.unit {
                        TemperatureUnit::Celsius => (thermostat.ambient_celsius, thermostat.target_celsius),
                        TemperatureUnit::Fahrenheit => (thermostat.ambient_fahrenheit, thermostat.target_fahrenheit),
                    };
                    current_temperature.with_label_values(&labels).set(ambient);
                    target_temperature.with_label_values(&labels).set(target);
                    humidity.with_label_values(&labels).set(thermostat.humidity);
                    heating.with_label_values(&labels).set(bool_value(thermostat.heating));
                    eco.with_label_values(&labels).set(bool_value(thermostat.eco));
                }

                mfs.extend(up.collect());
                mfs.extend(online.collect());
                mfs.extend(current_temperature.collect());
                mfs.extend(target_temperature.collect());
                mfs.extend(humidity.collect());
                mfs.extend(heating.collect());
                mfs.extend(eco.collect());
            }
            Err(e) => {
                tracing::error!(message = "thermostat collection failed", kind = e.kind().as_label(), error = %e);
                up.set(0.0);
                mfs.extend(up.collect());
            }
        }

        // Families with no samples this cycle are dropped entirely so they
        // leave no HELP/TYPE lines in the exposition output.
        mfs.retain(|mf| !mf.get_metric().is_empty());
        mfs
    }
}

fn bool_value(v: bool) -> f64 {
    if v {
        1.0
    } else {
        0.0
    }
}

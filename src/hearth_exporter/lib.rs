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

//! Prometheus metrics exporter for smart home thermostats and local weather
//!
//! ## Features
//!
//! `hearth_exporter` fetches readings from every thermostat in a [Smart Device Management]
//! project and emits them as Prometheus metrics, fetched again on every scrape. Readings
//! from [OpenWeatherMap] for a configurable location can be emitted alongside them for
//! indoor/outdoor comparisons. The following metrics are emitted (temperature metric names
//! match the configured unit).
//!
//! * `hearth_up` - Whether the last thermostat API request succeeded (0 or 1).
//! * `hearth_online{id=$ID, label=$LABEL}` - Whether the thermostat is connected (0 or 1).
//! * `hearth_current_temperature_celsius{id=$ID, label=$LABEL}` - Ambient temperature.
//! * `hearth_target_temperature_celsius{id=$ID, label=$LABEL}` - Heating setpoint.
//! * `hearth_humidity_percent{id=$ID, label=$LABEL}` - Ambient relative humidity (0-100).
//! * `hearth_heating{id=$ID, label=$LABEL}` - Whether the thermostat is calling for heat (0 or 1).
//! * `hearth_eco{id=$ID, label=$LABEL}` - Whether eco mode is active (0 or 1).
//! * `hearth_weather_up` - Whether the last weather API request succeeded (0 or 1).
//! * `hearth_weather_temperature_celsius` - Outdoor temperature.
//! * `hearth_weather_humidity_percent` - Outdoor relative humidity (0-100).
//! * `hearth_weather_pressure_hectopascals` - Atmospheric pressure.
//!
//! [Smart Device Management]: https://developers.google.com/nest/device-access
//! [OpenWeatherMap]: https://openweathermap.org/api
//!
//! ## Build
//!
//! `hearth_exporter` is a Rust program and must be built from source using a
//! [Rust toolchain](https://rustup.rs/).
//!
//! ### Build from source
//!
//! If you want to build from the latest code in the `hearth_exporter` repo, you can build
//! using the following steps.
//!
//! ```text
//! git clone git@github.com:hearthlabs/hearth_exporter.git && cd hearth_exporter
//! cargo build --release
//! ```
//!
//! ### Install via cargo
//!
//! After you have a Rust toolchain, you can also install the latest release directly via
//! `cargo install`
//!
//! ```text
//! cargo install hearth_exporter
//! ```
//!
//! ## Usage
//!
//! ### Thermostat API credentials
//!
//! `hearth_exporter` reads thermostats through the Smart Device Management API, which
//! requires [registering for device access]. Registration gives you a project ID and an
//! OAuth client; authorizing that client against your home produces a refresh token. Pass
//! all of them to the exporter and it will mint and renew access tokens on its own.
//!
//! ```text
//! ./hearth_exporter \
//!     --oauth-project-id 'your-project-id' \
//!     --oauth-client-id 'your-client-id' \
//!     --oauth-client-secret 'your-client-secret' \
//!     --oauth-refresh-token 'your-refresh-token'
//! ```
//!
//! [registering for device access]: https://developers.google.com/nest/device-access/registration
//!
//! Alternately, an already minted access token can be passed with `--token`. This is
//! useful for short-lived testing against the real API or for pointing the exporter at a
//! proxy that handles authentication itself. When `--token` is set the OAuth flags are
//! ignored.
//!
//! ```text
//! ./hearth_exporter --oauth-project-id 'your-project-id' --token "$(get-access-token)"
//! ```
//!
//! ### Weather
//!
//! Weather metrics are disabled unless an [OpenWeatherMap API key] is passed with
//! `--weather-token`. The location to report on is a city ID passed with
//! `--weather-location`, found by searching on openweathermap.org and taking the trailing
//! number of the city page URL.
//!
//! ```text
//! ./hearth_exporter ... --weather-token 'your-api-key' --weather-location 2759794
//! ```
//!
//! [OpenWeatherMap API key]: https://openweathermap.org/appid
//!
//! ### Temperature unit
//!
//! Metrics are emitted in celsius by default. Pass `--unit fahrenheit` to emit
//! `hearth_current_temperature_fahrenheit` and friends instead.
//!
//! ### Prometheus
//!
//! Prometheus metrics are exposed on port `9777` at `/metrics`. Once `hearth_exporter`
//! is running, configure scrapes of it by your Prometheus server. Add the host running
//! `hearth_exporter` as a target under the Prometheus `scrape_configs` section as
//! described by the example below. Every scrape triggers a round of API requests, so
//! scrape intervals below 30 seconds or multiple Prometheus servers scraping one
//! exporter may run into API rate limits.
//!
//! ```yaml
//! # Sample config for Prometheus.
//!
//! global:
//!   scrape_interval:     60s
//!   evaluation_interval: 60s
//!   external_labels:
//!     monitor: 'my_prom'
//!
//! scrape_configs:
//! - job_name: hearth_exporter
//!   static_configs:
//!   - targets: ['example:9777']
//! ```
//!

pub mod collector;
pub mod exporter;
pub mod http;
pub mod thermostat;
pub mod transport;
pub mod weather;

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

use prometheus::core::Desc;
use prometheus::{Gauge, GaugeVec, Opts};
use reqwest::{StatusCode, Url};
use std::collections::HashMap;
use std::error;
use std::fmt;

/// Coarse classification of a `CollectorError`, exposed as a stable label
/// for logging and assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Transport,
    Status,
    Malformed,
}

impl ErrorKind {
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Transport => "transport",
            Self::Status => "status",
            Self::Malformed => "malformed",
        }
    }
}

/// Any failure raised while constructing a collector or running a single
/// collection cycle. Configuration problems surface at construction and
/// abort startup; every other variant is absorbed into the up-gauge for
/// the cycle that hit it.
#[derive(Debug)]
pub enum CollectorError {
    InvalidEndpoint(String),
    InvalidUnit(String),
    MissingCredentials,
    Registration(String),
    Request(reqwest::Error),
    Redirect(Url),
    TokenRefresh(String),
    UnexpectedStatus(StatusCode, Url),
    Malformed(String),
}

impl CollectorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidEndpoint(_) | Self::InvalidUnit(_) | Self::MissingCredentials | Self::Registration(_) => {
                ErrorKind::Config
            }
            Self::Request(_) | Self::Redirect(_) | Self::TokenRefresh(_) => ErrorKind::Transport,
            Self::UnexpectedStatus(_, _) => ErrorKind::Status,
            Self::Malformed(_) => ErrorKind::Malformed,
        }
    }
}

impl fmt::Display for CollectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEndpoint(s) => write!(f, "invalid endpoint {}", s),
            Self::InvalidUnit(s) => write!(f, "invalid temperature unit {}", s),
            Self::MissingCredentials => write!(f, "no API credentials configured"),
            Self::Registration(s) => write!(f, "metric registration failed: {}", s),
            Self::Request(e) => write!(f, "{}", e),
            Self::Redirect(url) => write!(
                f,
                "stopped after {} redirects requesting {}",
                crate::transport::MAX_REDIRECTS,
                url
            ),
            Self::TokenRefresh(s) => write!(f, "token refresh failed: {}", s),
            Self::UnexpectedStatus(status, url) => write!(f, "unexpected status {} for {}", status, url),
            Self::Malformed(s) => write!(f, "unusable response payload: {}", s),
        }
    }
}

impl error::Error for CollectorError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Request(e) => Some(e),
            _ => None,
        }
    }
}

/// Temperature unit selected for the whole exporter. The unit picks which
/// fields are read from upstream responses and which suffix temperature
/// metric names carry, never an arithmetic conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureUnit {
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    /// Resolve a configured unit string. An empty string means Celsius;
    /// any unrecognized non-empty string is a configuration error.
    pub fn parse(unit: &str) -> Result<Self, CollectorError> {
        match unit.to_ascii_lowercase().as_str() {
            "" | "celsius" | "metric" => Ok(Self::Celsius),
            "fahrenheit" | "imperial" => Ok(Self::Fahrenheit),
            _ => Err(CollectorError::InvalidUnit(unit.to_owned())),
        }
    }

    /// Suffix carried by temperature metric names in this unit.
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Celsius => "celsius",
            Self::Fahrenheit => "fahrenheit",
        }
    }

    /// Query keyword understood by the weather API for this unit.
    pub fn weather_keyword(&self) -> &'static str {
        match self {
            Self::Celsius => "metric",
            Self::Fahrenheit => "imperial",
        }
    }
}

/// Make a display name safe for use as a metric label value by replacing
/// every whitespace character with a dash.
pub fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_whitespace() { '-' } else { c })
        .collect()
}

/// Build a metric descriptor, mapping an invalid name or label set to a
/// registration error.
pub(crate) fn new_desc(name: String, help: String, labels: Vec<String>) -> Result<Desc, CollectorError> {
    Desc::new(name, help, labels, HashMap::new()).map_err(|e| CollectorError::Registration(e.to_string()))
}

/// Fresh unlabeled gauge for one collection cycle, shaped by a descriptor
/// that was validated when it was built.
pub(crate) fn desc_gauge(desc: &Desc) -> Gauge {
    Gauge::with_opts(Opts::new(desc.fq_name.clone(), desc.help.clone())).unwrap()
}

/// Fresh labeled gauge vector for one collection cycle, shaped by a
/// descriptor that was validated when it was built.
pub(crate) fn desc_gauge_vec(desc: &Desc) -> GaugeVec {
    let labels: Vec<&str> = desc.variable_labels.iter().map(String::as_str).collect();
    GaugeVec::new(Opts::new(desc.fq_name.clone(), desc.help.clone()), &labels).unwrap()
}

//
// Copyright (c) The chassis-agent Contributors
//
// SPDX-License-Identifier: MIT
//

#![allow(clippy::derivable_impls)]

use serde::Deserialize;

/// The `ovn-*` external-ids surface, read in the real daemon from the
/// integration bridge's own `external_ids` column; modeled here as a typed,
/// validated config file since that transport is out of scope.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub system_id: String,
    pub ovn_bridge: String,
    pub ovn_remote: String,
    pub ovn_monitor_all: bool,
    pub ovn_transport_zones: Vec<String>,
    pub ovn_bridge_datapath_type: String,
    pub remote_probe_interval_ms: u64,
    pub openflow_probe_interval_s: u64,
    pub mac_binding_age_threshold_ms: u64,
    pub unixctl_path: String,
    pub logging: Logging,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Logging {
    pub stdout: LoggingStdout,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingStdout {
    pub enabled: bool,
    pub style: LoggingFmtStyle,
    pub show_thread_id: bool,
    pub show_source: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingFmtStyle {
    Compact,
    Full,
    Json,
    Pretty,
}

impl Config {
    const DFLT_FILEPATH: &'static str = "/etc/chassisd.toml";

    pub(crate) fn load(config_file: Option<&str>) -> Config {
        let config_file = config_file.unwrap_or(Config::DFLT_FILEPATH);

        match std::fs::read_to_string(config_file) {
            Ok(config_str) => {
                toml::from_str(&config_str).expect("failed to parse configuration file")
            }
            Err(err) => {
                eprintln!("failed to load configuration file: {err}");
                eprintln!("falling back to default configuration...");
                Config::default()
            }
        }
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            system_id: "chassis-1".to_owned(),
            ovn_bridge: "br-int".to_owned(),
            ovn_remote: "tcp:127.0.0.1:6642".to_owned(),
            ovn_monitor_all: false,
            ovn_transport_zones: vec!["global".to_owned()],
            ovn_bridge_datapath_type: String::new(),
            remote_probe_interval_ms: 5000,
            openflow_probe_interval_s: 5,
            mac_binding_age_threshold_ms: 0,
            unixctl_path: "/var/run/chassisd.ctl".to_owned(),
            logging: Default::default(),
        }
    }
}

impl Default for LoggingStdout {
    fn default() -> LoggingStdout {
        LoggingStdout {
            enabled: true,
            style: LoggingFmtStyle::Full,
            show_thread_id: false,
            show_source: false,
        }
    }
}

// Copyright 2025 STARGA Inc.
// Licensed under the Apache License, Version 2.0 (the “License”);
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at:
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an “AS IS” BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Part of the pullback derivative-registration library.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use log::LevelFilter;
use serde::Deserialize;

use crate::autodiff::{GradientOptions, MAX_TAPE_CAPACITY};

/// File name searched for by [`Config::discover`].
pub const CONFIG_FILE: &str = "Pullback.toml";

/// Settings from Pullback.toml
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub gradient: GradientConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GradientConfig {
    #[serde(default = "default_tape_capacity")]
    pub tape_capacity: usize,
    #[serde(default)]
    pub max_tape_entries: Option<usize>,
}

impl Default for GradientConfig {
    fn default() -> Self {
        Self {
            tape_capacity: default_tape_capacity(),
            max_tape_entries: None,
        }
    }
}

fn default_tape_capacity() -> usize {
    GradientOptions::default().tape_capacity
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "warn".to_string()
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse configuration")?;
        let gradient = &config.gradient;
        if gradient.max_tape_entries == Some(0) {
            return Err(anyhow!("gradient.max_tape_entries must be positive"));
        }
        if gradient.tape_capacity > MAX_TAPE_CAPACITY {
            return Err(anyhow!(
                "gradient.tape_capacity {} exceeds the maximum of {MAX_TAPE_CAPACITY}",
                gradient.tape_capacity
            ));
        }
        if let Some(limit) = gradient.max_tape_entries {
            if gradient.tape_capacity > limit {
                return Err(anyhow!(
                    "gradient.tape_capacity {} exceeds gradient.max_tape_entries {limit}",
                    gradient.tape_capacity
                ));
            }
        }
        Ok(config)
    }

    /// Load settings from an explicit file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Find Pullback.toml in `start` or any parent and load it.
    ///
    /// Returns `Ok(None)` when no file exists up to the filesystem root.
    pub fn discover(start: &Path) -> Result<Option<(PathBuf, Self)>> {
        let mut current = start.to_path_buf();
        loop {
            let candidate = current.join(CONFIG_FILE);
            if candidate.is_file() {
                let config = Self::load(&candidate)?;
                return Ok(Some((candidate, config)));
            }
            if !current.pop() {
                return Ok(None);
            }
        }
    }

    pub fn gradient_options(&self) -> GradientOptions {
        GradientOptions {
            tape_capacity: self.gradient.tape_capacity,
            max_tape_entries: self.gradient.max_tape_entries,
        }
    }

    pub fn log_level(&self) -> Result<LevelFilter> {
        LevelFilter::from_str(&self.log.level)
            .map_err(|_| anyhow!("Unknown log level `{}`", self.log.level))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.gradient_options(), GradientOptions::default());
        assert_eq!(config.log_level().unwrap(), LevelFilter::Warn);
    }

    #[test]
    fn sections_override_defaults() {
        let config = Config::from_toml_str(
            r#"
            [gradient]
            tape_capacity = 64
            max_tape_entries = 1000

            [log]
            level = "debug"
            "#,
        )
        .unwrap();
        let options = config.gradient_options();
        assert_eq!(options.tape_capacity, 64);
        assert_eq!(options.max_tape_entries, Some(1000));
        assert_eq!(config.log_level().unwrap(), LevelFilter::Debug);
    }

    #[test]
    fn unknown_keys_and_levels_are_errors() {
        assert!(Config::from_toml_str("[gradient]\ntape_size = 3\n").is_err());
        assert!(Config::from_toml_str("[gradient]\nmax_tape_entries = 0\n").is_err());
        let config = Config::from_toml_str("[log]\nlevel = \"loud\"\n").unwrap();
        assert!(config.log_level().is_err());
    }

    #[test]
    fn oversized_tape_capacity_is_rejected() {
        let err = Config::from_toml_str("[gradient]\ntape_capacity = 4611686018427387903\n")
            .unwrap_err();
        assert!(err.to_string().contains("tape_capacity"));
        let err = Config::from_toml_str(
            "[gradient]\ntape_capacity = 64\nmax_tape_entries = 8\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("max_tape_entries"));
        let config =
            Config::from_toml_str(&format!("[gradient]\ntape_capacity = {MAX_TAPE_CAPACITY}\n"))
                .unwrap();
        assert_eq!(config.gradient_options().tape_capacity, MAX_TAPE_CAPACITY);
    }

    #[test]
    fn discover_walks_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "[gradient]\ntape_capacity = 8\n").unwrap();
        let nested = dir.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();

        let (path, config) = Config::discover(&nested).unwrap().unwrap();
        assert_eq!(path, dir.path().join(CONFIG_FILE));
        assert_eq!(config.gradient.tape_capacity, 8);
    }

    #[test]
    fn load_reports_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = Config::load(&missing).unwrap_err();
        assert!(format!("{err:#}").contains("nope.toml"));
    }
}

//! Job configuration grouped by collector module.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::collector::as400::As400Config;
use crate::collector::db2::Db2Config;
use crate::collector::dockerhub::DockerhubConfig;
use crate::collector::hpssa::HpssaConfig;
use crate::collector::isc_dhcpd::IscDhcpdConfig;
use crate::collector::megacli::MegacliConfig;
use crate::collector::nsd::NsdConfig;
use crate::collector::pihole::PiholeConfig;
use crate::collector::postgres::PostgresConfig;
use crate::collector::smartctl::SmartctlConfig;
use crate::collector::storcli::StorcliConfig;
use crate::collector::{CollectorError, JobOptions};

use super::validation::{ConfigError, read_yaml};

/// Jobs keyed by module name. Every list defaults to empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorsConfig {
    pub isc_dhcpd: Vec<IscDhcpdConfig>,
    pub hpssa: Vec<HpssaConfig>,
    pub smartctl: Vec<SmartctlConfig>,
    pub storcli: Vec<StorcliConfig>,
    pub megacli: Vec<MegacliConfig>,
    pub nsd: Vec<NsdConfig>,
    pub dockerhub: Vec<DockerhubConfig>,
    pub pihole: Vec<PiholeConfig>,
    pub postgres: Vec<PostgresConfig>,
    pub as400: Vec<As400Config>,
    pub db2: Vec<Db2Config>,
}

/// Visit `(module, job options, validator)` for every configured job.
macro_rules! for_each_job {
    ($self:expr, |$module:ident, $job:ident, $validate:ident| $body:block) => {
        for_each_job!(@modules $self, |$module, $job, $validate| $body,
            isc_dhcpd, hpssa, smartctl, storcli, megacli, nsd, dockerhub, pihole, postgres,
            as400, db2)
    };
    (@modules $self:expr, |$module:ident, $job:ident, $validate:ident| $body:block, $($field:ident),+) => {
        $(
            for config in &$self.$field {
                let $module: &'static str = stringify!($field);
                let $job: &JobOptions = &config.job;
                let $validate = || -> Result<(), CollectorError> { config.validate() };
                $body
            }
        )+
    };
}

impl CollectorsConfig {
    /// Merge another CollectorsConfig into this one.
    #[must_use]
    pub fn merge(mut self, other: CollectorsConfig) -> Self {
        self.isc_dhcpd.extend(other.isc_dhcpd);
        self.hpssa.extend(other.hpssa);
        self.smartctl.extend(other.smartctl);
        self.storcli.extend(other.storcli);
        self.megacli.extend(other.megacli);
        self.nsd.extend(other.nsd);
        self.dockerhub.extend(other.dockerhub);
        self.pihole.extend(other.pihole);
        self.postgres.extend(other.postgres);
        self.as400.extend(other.as400);
        self.db2.extend(other.db2);
        self
    }

    /// Total number of configured jobs, enabled or not.
    pub fn job_count(&self) -> usize {
        let mut n = 0;
        for_each_job!(self, |_module, _job, _validate| {
            n += 1;
        });
        n
    }

    /// Drop every module except `module`.
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` for an unknown module name.
    pub fn retain_module(&mut self, module: &str) -> Result<(), ConfigError> {
        let kept = std::mem::take(self);
        match module {
            "isc_dhcpd" => self.isc_dhcpd = kept.isc_dhcpd,
            "hpssa" => self.hpssa = kept.hpssa,
            "smartctl" => self.smartctl = kept.smartctl,
            "storcli" => self.storcli = kept.storcli,
            "megacli" => self.megacli = kept.megacli,
            "nsd" => self.nsd = kept.nsd,
            "dockerhub" => self.dockerhub = kept.dockerhub,
            "pihole" => self.pihole = kept.pihole,
            "postgres" => self.postgres = kept.postgres,
            "as400" => self.as400 = kept.as400,
            "db2" => self.db2 = kept.db2,
            other => {
                *self = kept;
                return Err(ConfigError::Invalid(format!(
                    "unknown collector module: '{other}'"
                )));
            }
        }
        Ok(())
    }

    /// Validate every job and reject names used twice, across modules too.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen_names = HashSet::new();
        let mut result = Ok(());

        for_each_job!(self, |module, job, validate| {
            if result.is_err() {
                continue;
            }
            if job.name.trim().is_empty() {
                result = Err(ConfigError::Invalid(format!(
                    "{module} job name cannot be empty"
                )));
                continue;
            }
            if !seen_names.insert(job.name.clone()) {
                result = Err(ConfigError::Invalid(format!(
                    "duplicate job name: '{}'",
                    job.name
                )));
                continue;
            }
            if let Err(e) = validate() {
                result = Err(ConfigError::Invalid(format!(
                    "{module} job '{}': {e}",
                    job.name
                )));
            }
        });

        result
    }

    /// Load job configurations from all YAML files in a directory.
    ///
    /// Files are read in name order so merges are reproducible.
    pub fn load_from_dir(dir_path: &str) -> Result<Self, ConfigError> {
        let dir = Path::new(dir_path);
        if !dir.exists() {
            return Err(ConfigError::Invalid(format!(
                "collector_path '{}' does not exist",
                dir_path
            )));
        }
        if !dir.is_dir() {
            return Err(ConfigError::Invalid(format!(
                "collector_path '{}' is not a directory",
                dir_path
            )));
        }

        let read_err = |source| ConfigError::Read {
            path: dir.to_path_buf(),
            source,
        };
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(read_err)? {
            let path = entry.map_err(read_err)?.path();
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if path.is_file() && (ext == "yaml" || ext == "yml") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut merged = Self::default();
        for path in paths {
            tracing::debug!(path = %path.display(), "Loading job config");
            merged = merged.merge(read_yaml(&path)?);
        }

        Ok(merged)
    }
}

//! Transfer-speed probes
//!
//! A probe decides whether a candidate target share is fast enough to
//! receive a data set. Probes are looked up by name in a registry that is
//! built once at start-up.

use async_trait::async_trait;
use segstore_core::{DataSetRecord, Result, SegStoreError, Share, TargetSpeedProbe, MB};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Probe accepting every share
pub const ACCEPT_ALL: &str = "accept-all";
/// Probe writing a sample file to the share
pub const WRITE_TEST: &str = "write-test";

/// Probe parameters from the configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    /// Minimum accepted write throughput in bytes per second
    pub min_throughput_bytes_per_sec: u64,
    /// Size of the sample file written by the write test
    pub sample_bytes: u64,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            min_throughput_bytes_per_sec: 10 * MB,
            sample_bytes: 4 * MB,
        }
    }
}

/// Accepts every candidate
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllProbe;

#[async_trait]
impl TargetSpeedProbe for AcceptAllProbe {
    fn name(&self) -> &str {
        ACCEPT_ALL
    }

    async fn accepts(&self, _data_set: &DataSetRecord, _candidate: &Share) -> bool {
        true
    }
}

/// Writes and syncs a sample file on the share and measures the throughput
#[derive(Debug, Clone)]
pub struct WriteTestProbe {
    settings: ProbeSettings,
}

impl WriteTestProbe {
    pub fn new(settings: ProbeSettings) -> Self {
        Self { settings }
    }
}

fn write_file(path: &Path, bytes: u64) -> std::io::Result<()> {
    let chunk = vec![0xA5u8; MB as usize];
    let mut file = std::fs::File::create(path)?;
    let mut remaining = bytes;
    while remaining > 0 {
        let n = remaining.min(chunk.len() as u64) as usize;
        file.write_all(&chunk[..n])?;
        remaining -= n as u64;
    }
    file.sync_all()
}

/// Write throughput of the share in bytes per second
fn write_sample(root: &Path, bytes: u64) -> Result<f64> {
    let path = root.join(format!(".segstore-probe-{}", uuid::Uuid::new_v4()));
    let start = Instant::now();
    let written = write_file(&path, bytes);
    let elapsed = start.elapsed().as_secs_f64();
    let removed = std::fs::remove_file(&path);

    written?;
    removed?;
    Ok(bytes as f64 / elapsed.max(f64::EPSILON))
}

#[async_trait]
impl TargetSpeedProbe for WriteTestProbe {
    fn name(&self) -> &str {
        WRITE_TEST
    }

    async fn accepts(&self, data_set: &DataSetRecord, candidate: &Share) -> bool {
        let root = candidate.root.clone();
        let bytes = self.settings.sample_bytes;
        let measured = tokio::task::spawn_blocking(move || write_sample(&root, bytes)).await;

        match measured {
            Ok(Ok(throughput)) => {
                let accepted = throughput >= self.settings.min_throughput_bytes_per_sec as f64;
                debug!(
                    data_set = %data_set.id,
                    share = %candidate.id,
                    throughput_mb_s = throughput / MB as f64,
                    accepted,
                    "Write test finished"
                );
                accepted
            }
            Ok(Err(e)) => {
                warn!(share = %candidate.id, error = %e, "Write test failed");
                false
            }
            Err(e) => {
                warn!(share = %candidate.id, error = %e, "Write test aborted");
                false
            }
        }
    }
}

type ProbeFactory = fn(&ProbeSettings) -> Arc<dyn TargetSpeedProbe>;

fn accept_all(_: &ProbeSettings) -> Arc<dyn TargetSpeedProbe> {
    Arc::new(AcceptAllProbe)
}

fn write_test(settings: &ProbeSettings) -> Arc<dyn TargetSpeedProbe> {
    Arc::new(WriteTestProbe::new(settings.clone()))
}

/// Probe constructors by name
#[derive(Clone)]
pub struct ProbeRegistry {
    factories: BTreeMap<&'static str, ProbeFactory>,
}

impl ProbeRegistry {
    /// Registry with the built-in probes
    pub fn standard() -> Self {
        let mut factories: BTreeMap<&'static str, ProbeFactory> = BTreeMap::new();
        factories.insert(ACCEPT_ALL, accept_all as ProbeFactory);
        factories.insert(WRITE_TEST, write_test as ProbeFactory);
        Self { factories }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    pub fn create(&self, name: &str, settings: &ProbeSettings) -> Result<Arc<dyn TargetSpeedProbe>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            SegStoreError::Configuration(format!(
                "Unknown speed probe '{}' (valid values are {:?})",
                name,
                self.names()
            ))
        })?;
        Ok(factory(settings))
    }
}

impl Default for ProbeRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

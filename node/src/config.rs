use crate::channel::ChannelParams;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use zchannel_primitives::{PartyIndex, ValuePair};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelConfig {
    pub wait_timeout_sec: u64,
    /// Zero disables the derivation cache.
    pub derivation_cache_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            wait_timeout_sec: 30,
            derivation_cache_capacity: 64,
        }
    }
}

/// One scripted balance update.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateConfig {
    pub proposer: PartyIndex,
    pub balances: ValuePair,
}

/// The contents of the config.yaml file. Both parties' files must agree on
/// the initial balances and the update script.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigFile {
    pub party_index: PartyIndex,
    /// Address this party accepts the peer's connection on.
    pub listen_address: String,
    pub peer_address: String,
    pub initial_balances: ValuePair,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub updates: Vec<UpdateConfig>,
    #[serde(default)]
    pub close_actively: bool,
}

impl ConfigFile {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let file = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&file)?;
        Ok(config)
    }

    pub fn write_to_file(&self, path: &Path) -> anyhow::Result<()> {
        std::fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    pub fn channel_params(&self) -> ChannelParams {
        ChannelParams {
            wait_timeout: Duration::from_secs(self.channel.wait_timeout_sec),
            derivation_cache_capacity: self.channel.derivation_cache_capacity,
        }
    }

    /// Checks the script against the initial balances, so that a bad config
    /// fails before any connection is made.
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut latest = self.initial_balances;
        if latest.total().is_none() {
            anyhow::bail!("initial balances {} overflow", latest);
        }
        for (i, update) in self.updates.iter().enumerate() {
            if !latest.conserves(&update.balances) {
                anyhow::bail!(
                    "update {} to {} does not conserve the total of {}",
                    i,
                    update.balances,
                    latest
                );
            }
            latest = update.balances;
        }
        Ok(())
    }
}

pub fn load_config(home_dir: &Path) -> anyhow::Result<ConfigFile> {
    let config_path = home_dir.join("config.yaml");
    let config = ConfigFile::from_file(&config_path).context("Load config.yaml")?;
    config.validate().context("Validate config.yaml")?;
    Ok(config)
}

/// A matching pair of configs for two parties on localhost. Party 0 closes.
/// Uses `base_port` and the port right after it.
pub fn generate_test_configs(base_port: u16) -> anyhow::Result<[ConfigFile; 2]> {
    let peer_port = base_port
        .checked_add(1)
        .with_context(|| format!("Base port {} leaves no room for the second party", base_port))?;
    let addresses = [
        format!("127.0.0.1:{}", base_port),
        format!("127.0.0.1:{}", peer_port),
    ];
    let updates = vec![
        UpdateConfig {
            proposer: PartyIndex::ZERO,
            balances: ValuePair::new(80, 120),
        },
        UpdateConfig {
            proposer: PartyIndex::ONE,
            balances: ValuePair::new(85, 115),
        },
    ];
    Ok(PartyIndex::ALL.map(|party| ConfigFile {
        party_index: party,
        listen_address: addresses[party.as_usize()].clone(),
        peer_address: addresses[party.other().as_usize()].clone(),
        initial_balances: ValuePair::new(100, 100),
        channel: ChannelConfig::default(),
        updates: updates.clone(),
        close_actively: party == PartyIndex::ZERO,
    }))
}

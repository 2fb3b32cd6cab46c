use crate::channel::ZChannel;
use crate::config::{generate_test_configs, load_config, ConfigFile};
use crate::ledger::{Ledger, RelayLedger};
use crate::p2p::new_tcp_transport;
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
pub enum Cli {
    Start(StartCmd),
    /// Generates a matching pair of configurations for two parties on
    /// localhost, under `<output_dir>/party0` and `<output_dir>/party1`.
    GenerateTestConfigs {
        #[arg(long)]
        output_dir: String,
        #[arg(long, default_value = "9000")]
        base_port: u16,
    },
}

/// Opens a channel with the peer named in config.yaml, runs the scripted
/// updates and closes it.
#[derive(Parser, Debug)]
pub struct StartCmd {
    #[arg(long, env("ZCHANNEL_HOME_DIR"))]
    pub home_dir: String,
}

impl StartCmd {
    async fn run(self) -> anyhow::Result<()> {
        let config = load_config(&PathBuf::from(&self.home_dir))?;
        tracing::info!(
            party = %config.party_index,
            listen = %config.listen_address,
            peer = %config.peer_address,
            "starting channel session"
        );
        let transport = new_tcp_transport(&config.listen_address, &config.peer_address).await?;
        let ledger = Arc::new(RelayLedger::new());
        let mut channel = ZChannel::new(
            config.party_index,
            config.channel_params(),
            ledger.clone() as Arc<dyn Ledger>,
        );
        channel
            .init(transport, config.initial_balances)
            .await
            .context("Initialize channel")?;
        let result = run_script(&mut channel, &config).await;
        if result.is_err() {
            channel.abort().await;
        }
        result?;
        for item in ledger.published() {
            tracing::info!(?item, "published by this party");
        }
        Ok(())
    }
}

async fn run_script(channel: &mut ZChannel, config: &ConfigFile) -> anyhow::Result<()> {
    channel.establish().await.context("Establish channel")?;
    for (i, update) in config.updates.iter().enumerate() {
        if update.proposer == config.party_index {
            channel
                .update(update.balances)
                .await
                .with_context(|| format!("Propose update {}", i))?;
        } else {
            let accepted = channel
                .accept_update()
                .await
                .with_context(|| format!("Accept update {}", i))?;
            if accepted != update.balances {
                tracing::warn!(
                    %accepted,
                    expected = %update.balances,
                    "peer proposed balances that differ from the script"
                );
            }
        }
    }
    channel
        .close(config.close_actively)
        .await
        .context("Close channel")?;
    Ok(())
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self {
            Cli::Start(start) => start.run().await,
            Cli::GenerateTestConfigs {
                output_dir,
                base_port,
            } => {
                let output_dir = PathBuf::from(output_dir);
                for config in generate_test_configs(base_port)? {
                    let dir = output_dir.join(format!("party{}", config.party_index));
                    std::fs::create_dir_all(&dir)
                        .with_context(|| format!("Create {}", dir.display()))?;
                    config.write_to_file(&dir.join("config.yaml"))?;
                }
                Ok(())
            }
        }
    }
}

//! Thin CLI entry point: load configuration, bring up identity/UNL/peer
//! registry, start the server, reconnect known peers, then block. The
//! block/transaction state backend is supplied by the rest of the
//! blockchain participant; `NullStateStore` below is a standalone
//! placeholder so this binary links and runs on its own.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use meshnode::announce;
use meshnode::bulk::BulkEngine;
use meshnode::config::NodeConfig;
use meshnode::identity::NodeIdentity;
use meshnode::peer_registry::PeerRegistry;
use meshnode::router::Router;
use meshnode::server::Server;
use meshnode::state::{ConsensusScheduler, CurrentBlockInfo, StateStore, Transaction};
use meshnode::unl::Unl;

#[derive(Parser, Debug)]
#[command(author, version, about = "Peer-to-peer node networking core", long_about = None)]
struct Cli {
    /// Path to the node's TOML configuration file.
    #[arg(long, default_value = "node.toml")]
    config: PathBuf,
}

/// Stands in for the blockchain participant's real state backend. Accepts
/// nothing past the node's own id, so a standalone node never overwrites
/// its own artifacts from an unexpected source.
struct NullStateStore {
    own_id: String,
}

impl StateStore for NullStateStore {
    fn current_block(&self) -> CurrentBlockInfo {
        CurrentBlockInfo {
            sequence_number: 0,
            download_source_id: self.own_id.clone(),
            consensus_timer: Duration::from_secs(30),
        }
    }
    fn save_block(&self) {
        tracing::debug!("save_block (no-op state backend)");
    }
    fn apply_transaction(&self, _tx: &Transaction) -> bool {
        false
    }
    fn change_transaction_fee(&self) {}
    fn mark_newly_received(&self) {}
    fn clear_excluded_validators(&self) {}
    fn in_round_one_precommit(&self) -> bool {
        false
    }
    fn in_round_one_not_two(&self) -> bool {
        false
    }
}

struct NullScheduler;

impl ConsensusScheduler for NullScheduler {
    fn arm(&self, period: Duration) {
        tracing::debug!(?period, "consensus timer armed (no-op scheduler)");
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = NodeConfig::load(&cli.config)?;
    let report = config.validate();
    report.log();
    if !report.is_valid() {
        anyhow::bail!("configuration is invalid, see logged errors");
    }

    let identity = if config.identity_key_path.exists() {
        NodeIdentity::load_from_pem_file(&config.identity_key_path)?
    } else {
        let identity = NodeIdentity::generate()?;
        identity.save_to_pem_file(&config.identity_key_path)?;
        identity
    };
    tracing::info!(id = %identity.id_pem(), "node identity ready");

    let unl = Unl::new(config.load_unl_members()?);
    tracing::info!(unl_size = unl.len(), "loaded UNL");

    let registry = PeerRegistry::new(&config.peer_registry_dir);

    let (block, accounts, blockshash, blockshash_part) = config.stream_paths();
    let bulk = BulkEngine::new(block, accounts, blockshash, blockshash_part);

    let state: Arc<dyn StateStore> = Arc::new(NullStateStore {
        own_id: identity.id_pem().to_string(),
    });
    let scheduler: Arc<dyn ConsensusScheduler> = Arc::new(NullScheduler);
    let router = Router::new(state.clone(), scheduler, bulk);

    let handle = Server::spawn_with_timeouts(
        config.listen_addr.clone(),
        identity,
        unl,
        registry,
        Box::new(router),
        config.connect_timeout(),
        config.handshake_timeout(),
    )?;
    tracing::info!(addr = %config.listen_addr, "listening");

    handle.reconnect_known_peers()?;

    announce::announce_candidate_block(&handle, state.as_ref(), &[]);

    loop {
        std::thread::sleep(Duration::from_secs(60));
    }
}

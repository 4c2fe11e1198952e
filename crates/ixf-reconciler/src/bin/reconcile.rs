//! Demo entry point: reconciles one IXLAN against its feed in dry-run mode
//! using in-memory stores, and prints what it would have done.

use std::collections::HashMap;
use std::sync::Arc;

use ixf_reconciler::config::ReconcilerConfig;
use ixf_reconciler::feed_client::FeedClient;
use ixf_reconciler::importer::Importer;
use ixf_reconciler::mailer::DebugMailer;
use ixf_reconciler::model::{Exchange, Ixlan, Network};
use ixf_reconciler::ticket::MockTicketClient;
use reconciler_common::{
    Asn, ContactEmail, InMemoryArchiveStore, InMemoryAttemptLogStore, InMemoryConnectionStore, InMemoryProposalStore, IxlanId,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = ReconcilerConfig::from_env()?;
    tracing::info!(?config, "starting dry-run reconciliation");

    let mut ixlan = Ixlan {
        id: IxlanId(1),
        exchange_id: 1,
        feed_url: std::env::args().nth(1).unwrap_or_else(|| "https://example.net/ixf.json".to_string()),
        prefixes_v4: vec!["198.51.100.0/24".parse()?],
        prefixes_v6: vec!["2001:db8::/32".parse()?],
        last_error: None,
        last_error_notified_at: None,
    };
    let exchange = Exchange { id: 1, name: "Example-IX".to_string(), tech_contacts: vec![ContactEmail::new("noc@example-ix.net")?] };

    let asn = Asn::new(64500)?;
    let networks = HashMap::from([(
        asn,
        Network {
            asn,
            ipv4_support: true,
            ipv6_support: true,
            active: true,
            allow_ixp_update: false,
            policy_contacts: vec![ContactEmail::new("policy@example-network.net")?],
        },
    )]);

    let importer = Importer {
        feed_client: Arc::new(FeedClient::new(std::time::Duration::from_secs(config.ixf_feed_timeout_secs))),
        connection_store: Arc::new(InMemoryConnectionStore::new()),
        proposal_store: Arc::new(InMemoryProposalStore::new()),
        archive_store: Arc::new(InMemoryArchiveStore::new()),
        attempt_log_store: Arc::new(InMemoryAttemptLogStore::new()),
        mailer: Arc::new(DebugMailer::new()),
        ticket_client: Arc::new(MockTicketClient::new()),
        config,
    };

    match importer.update(&mut ixlan, &exchange, &networks, false, None, chrono::Utc::now()).await {
        Ok(outcome) => {
            println!("would apply:    {}", outcome.applied);
            println!("would propose:  {}", outcome.proposed);
            println!("protocol conflicts: {}", outcome.protocol_conflicts);
            for diag in &outcome.diagnostics {
                println!("note: {diag}");
            }
        }
        Err(err) => {
            eprintln!("run failed: {err}");
            std::process::exit(1);
        }
    }

    Ok(())
}

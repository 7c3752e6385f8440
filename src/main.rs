//! Command line interface for a Relatr server: trust scores, profile search,
//! server status, and editing the account's relay and provider lists.

use std::{fs, path::Path, sync::Arc};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::json;

use relatr_client::{
    config::Settings,
    event::{Event, Identity, KIND_RELAY_LIST},
    relays::{RelaySelection, UserRelayList},
    rpc::{self, RpcClient, SubscriptionAction, WeightingScheme},
    signer::{KeySigner, Signer},
    sync::{RecordSync, RelayMarker, PROVIDER_TAG_PREFIX},
    PublishOutcome,
};

/// Command line interface entry point.
#[derive(Parser)]
#[command(name = "relatr", author, version, about = "Relatr trust score client")]
struct Cli {
    /// Path to the `.env` configuration file.
    #[arg(long, default_value = ".env")]
    env: String,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default `.env` file if none exists.
    Init,
    /// Trust score of one public key.
    Score {
        target: Identity,
        /// Perspective to score from; the server's own key when omitted.
        #[arg(long)]
        source: Option<Identity>,
        #[arg(long, value_enum)]
        scheme: Option<Scheme>,
    },
    /// Trust scores of several public keys.
    Scores {
        #[arg(required = true)]
        targets: Vec<Identity>,
    },
    /// Search profiles ranked by trust.
    Search {
        query: String,
        #[arg(long)]
        limit: Option<u32>,
        /// Also search Nostr relays, not only the server's index.
        #[arg(long)]
        extend: bool,
    },
    /// Server statistics.
    Stats,
    /// Server health.
    Health,
    /// Inspect or change the account's rank subscription.
    Subscription {
        #[arg(value_enum)]
        action: Action,
        /// Relays the server should publish ranks to.
        #[arg(long = "relay")]
        relays: Vec<String>,
    },
    /// Show a user's relay list.
    Relays {
        /// User to look up; the configured account when omitted.
        user: Option<Identity>,
    },
    /// Show a user's trusted assertion providers.
    Providers { user: Option<Identity> },
    /// Edit the account's provider list.
    Provider {
        #[command(subcommand)]
        action: ProviderAction,
    },
    /// Edit the account's relay list.
    Relay {
        #[command(subcommand)]
        action: RelayAction,
    },
    /// Check the id and signature of an event stored as JSON.
    Verify { file: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum Scheme {
    Default,
    Social,
    Validation,
    Strict,
}

impl From<Scheme> for WeightingScheme {
    fn from(s: Scheme) -> Self {
        match s {
            Scheme::Default => WeightingScheme::Default,
            Scheme::Social => WeightingScheme::Social,
            Scheme::Validation => WeightingScheme::Validation,
            Scheme::Strict => WeightingScheme::Strict,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Action {
    Get,
    Subscribe,
    Unsubscribe,
}

impl From<Action> for SubscriptionAction {
    fn from(a: Action) -> Self {
        match a {
            Action::Get => SubscriptionAction::Get,
            Action::Subscribe => SubscriptionAction::Subscribe,
            Action::Unsubscribe => SubscriptionAction::Unsubscribe,
        }
    }
}

#[derive(Subcommand)]
enum ProviderAction {
    /// List a server as rank provider.
    Set { provider: Identity },
    /// Stop listing servers as providers.
    Remove {
        #[arg(required = true)]
        providers: Vec<Identity>,
    },
}

#[derive(Subcommand)]
enum RelayAction {
    /// Add a relay or change its marker.
    Add {
        url: String,
        #[arg(long, conflicts_with = "write")]
        read: bool,
        #[arg(long)]
        write: bool,
    },
    /// Remove relays.
    Remove {
        #[arg(required = true)]
        urls: Vec<String>,
    },
}

/// Execute the selected CLI subcommand.
async fn run(cli: Cli) -> anyhow::Result<()> {
    ensure_env_file(&cli.env)?;
    let cfg = Settings::from_env(&cli.env)?;
    match cli.command {
        Commands::Init => Ok(()),
        Commands::Verify { file } => verify_file(&file),
        Commands::Score {
            target,
            source,
            scheme,
        } => {
            let client = RpcClient::new(cfg.client_config());
            let out = client
                .calculate_trust_score(&target, source.as_ref(), scheme.map(Into::into))
                .await;
            finish(&client, out).await
        }
        Commands::Scores { targets } => {
            let client = RpcClient::new(cfg.client_config());
            let out = client.calculate_trust_scores(&targets).await;
            finish(&client, out).await
        }
        Commands::Search {
            query,
            limit,
            extend,
        } => {
            let client = RpcClient::new(cfg.client_config());
            let out = client.search_profiles(&query, limit, Some(extend)).await;
            finish(&client, out).await
        }
        Commands::Stats => {
            let client = RpcClient::new(cfg.client_config());
            let out = client.stats().await;
            finish(&client, out).await
        }
        Commands::Health => {
            let client = RpcClient::new(cfg.client_config());
            let out = client.health_check().await;
            finish(&client, out).await
        }
        Commands::Subscription { action, relays } => {
            let client = RpcClient::new(cfg.client_config());
            let custom = (!relays.is_empty()).then_some(relays.as_slice());
            let out = client.manage_subscription(action.into(), custom).await;
            finish(&client, out).await
        }
        Commands::Relays { user } => {
            let user = lookup_user(&cfg, user)?;
            let list = record_sync(&cfg, None).user_relays(&user).await;
            print_json(&json!({
                "relays": list.relays,
                "read": list.read,
                "write": list.write,
            }))
        }
        Commands::Providers { user } => {
            let user = lookup_user(&cfg, user)?;
            let sync = record_sync(&cfg, None);
            let list = sync.user_relays(&user).await;
            let found = sync.providers(&user, &list, &selection(&cfg)).await;
            let providers: Vec<_> = found
                .iter()
                .flat_map(|ev| ev.tags())
                .filter(|t| t.key().is_some_and(|k| k.starts_with(PROVIDER_TAG_PREFIX)))
                .map(|t| json!({"tag": t.key(), "provider": t.value(), "relay": t.get(2)}))
                .collect();
            print_json(&providers)
        }
        Commands::Provider { action } => {
            let signer = account(&cfg)?;
            let user = signer.identity();
            let sync = record_sync(&cfg, Some(signer));
            let sel = selection(&cfg);
            let list = sync.user_relays(&user).await;
            let existing = sync.providers(&user, &list, &sel).await;
            let outcome = match action {
                ProviderAction::Set { provider } => {
                    sync.set_provider(&provider, &list, existing.as_ref(), &sel)
                        .await?
                }
                ProviderAction::Remove { providers } => {
                    sync.remove_providers(&providers, &list, existing.as_ref(), &sel)
                        .await?
                }
            };
            print_outcome(&outcome)
        }
        Commands::Relay { action } => {
            let signer = account(&cfg)?;
            let user = signer.identity();
            let sync = record_sync(&cfg, Some(signer));
            let sel = selection(&cfg);
            let existing = sync.relay_list(&user).await;
            let list = UserRelayList::from_event_or(existing.as_ref(), sync.discovery_relays());
            let outcome = match action {
                RelayAction::Add { url, read, write } => {
                    let marker = match (read, write) {
                        (true, _) => RelayMarker::Read,
                        (_, true) => RelayMarker::Write,
                        _ => RelayMarker::Both,
                    };
                    sync.add_relay(&url, marker, &list, existing.as_ref(), &sel)
                        .await?
                }
                RelayAction::Remove { urls } => {
                    if existing.is_none() {
                        bail!("no relay list (kind {KIND_RELAY_LIST}) published for {user}");
                    }
                    sync.remove_relays(&urls, &list, existing.as_ref(), &sel)
                        .await?
                }
            };
            print_outcome(&outcome)
        }
    }
}

/// Print a call's output and release the session either way.
async fn finish<T: Serialize>(
    client: &RpcClient,
    out: relatr_client::Result<T>,
) -> anyhow::Result<()> {
    client.disconnect().await;
    print_json(&out?)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_outcome(outcome: &PublishOutcome) -> anyhow::Result<()> {
    print_json(&json!({
        "id": outcome.event.id(),
        "created_at": outcome.event.created_at(),
        "accepted_by": outcome.accepted_by,
        "rejected": outcome
            .results
            .iter()
            .filter(|r| !r.accepted)
            .map(|r| json!({"relay": r.endpoint, "message": r.message}))
            .collect::<Vec<_>>(),
    }))
}

fn record_sync(cfg: &Settings, signer: Option<Arc<dyn Signer>>) -> RecordSync {
    RecordSync::new(Arc::new(cfg.relay_pool()), signer).with_query_timeout(cfg.query_timeout)
}

fn selection(cfg: &Settings) -> RelaySelection {
    RelaySelection::new(cfg.relays.clone())
}

fn account(cfg: &Settings) -> anyhow::Result<Arc<dyn Signer>> {
    let key = cfg
        .private_key
        .as_deref()
        .context("RELATR_PRIVATE_KEY is required to publish")?;
    Ok(Arc::new(KeySigner::from_hex(key)?))
}

fn lookup_user(cfg: &Settings, user: Option<Identity>) -> anyhow::Result<Identity> {
    match user {
        Some(user) => Ok(user),
        None => Ok(account(cfg)?.identity()),
    }
}

fn verify_file(path: &str) -> anyhow::Result<()> {
    let data = fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    let ev: Event = serde_json::from_str(&data).with_context(|| format!("parsing {path}"))?;
    ev.verify()
        .with_context(|| format!("event {} failed verification", ev.id()))?;
    println!("{} ok", ev.id());
    Ok(())
}

/// Create a default `.env` file if one is not already present at `path`.
fn ensure_env_file(path: &str) -> anyhow::Result<()> {
    let env_path = Path::new(path);
    if env_path.exists() {
        return Ok(());
    }
    if let Some(parent) = env_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut content = String::new();
    content.push_str(&format!("RELATR_SERVER_PUBKEY={}\n", rpc::DEFAULT_SERVER_PUBKEY));
    content.push_str(&format!(
        "RELATR_RELAYS={}\n",
        relatr_client::relays::DEFAULT_RELAYS.join(",")
    ));
    content.push_str("RELATR_PRIVATE_KEY=\n");
    content.push_str("RELATR_CALL_TIMEOUT_MS=30000\n");
    content.push_str("RELATR_QUERY_TIMEOUT_MS=3000\n");
    content.push_str("TOR_SOCKS=\n");
    fs::write(env_path, content)?;
    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run(cli).await
}

use anyhow::{anyhow, Context, Result};
use batch_dropper::events::ExecutionMode;
use batch_dropper::scheduler::build_wallet_groups;
use batch_dropper::{
    AmountStrategy, BatchEngine, ChainFamily, CoinKind, EngineConfig, EngineError, EngineEvent, EventSink,
    ExecStatus, HttpAdapterSettings, HttpChainAdapter, ItemKey, NewTransfer, SessionOutcome, TransferStore,
};
use clap::{Parser, Subcommand};
use csv::Reader;
use indicatif::{ProgressBar, ProgressStyle};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a batch of transfers through the chain adapter
    Execute(ExecuteArgs),
    /// Generate a test transfer list
    GenerateItems(GenerateArgs),
}

#[derive(Parser)]
struct ExecuteArgs {
    /// Input CSV file with transfer items
    #[clap(long)]
    input_csv: PathBuf,

    /// JSON engine configuration; flags below override it
    #[clap(long)]
    config: Option<PathBuf>,

    /// Chain name passed to the adapter (eth, bsc, sol, ...)
    #[clap(long)]
    chain: Option<String>,

    /// Chain family: evm or solana
    #[clap(long)]
    family: Option<String>,

    /// Coin kind: native or token
    #[clap(long)]
    coin: Option<String>,

    /// Coin symbol
    #[clap(long)]
    symbol: Option<String>,

    /// Token contract address
    #[clap(long)]
    contract: Option<String>,

    /// Amount strategy: send-all, fixed, from-item, range, remainder
    #[clap(long)]
    strategy: Option<String>,

    /// Amount for the fixed strategy
    #[clap(long)]
    amount: Option<f64>,

    /// Lower bound for range / remainder strategies
    #[clap(long)]
    min: Option<f64>,

    /// Upper bound for range / remainder strategies
    #[clap(long)]
    max: Option<f64>,

    /// Decimal places for random amounts
    #[clap(long)]
    precision: Option<u32>,

    /// Number of concurrent wallet workers (above 90 switches to fast mode)
    #[clap(long)]
    concurrency: Option<usize>,

    /// Run wallet groups concurrently
    #[clap(long)]
    multi_worker: bool,

    /// Minimum delay between items in seconds
    #[clap(long)]
    delay_min: Option<f64>,

    /// Maximum delay between items in seconds
    #[clap(long)]
    delay_max: Option<f64>,

    /// Also delay between items of the same wallet group
    #[clap(long)]
    delay_in_groups: bool,

    /// Pause all transfers while the fee price is above this value
    #[clap(long)]
    max_fee_price: Option<f64>,

    /// Do not retry failed transfers
    #[clap(long)]
    no_retry: bool,

    /// Chain adapter URL
    #[clap(long, default_value = "http://127.0.0.1:8645")]
    adapter_url: String,

    /// Rate limit (requests per second)
    #[clap(long, default_value = "10")]
    rate_limit: u32,

    /// Adapter request timeout in seconds
    #[clap(long, default_value = "120")]
    request_timeout: u64,

    /// Perform a dry run
    #[clap(long)]
    dry_run: bool,

    /// Skip confirmation prompt
    #[clap(long)]
    yes: bool,

    /// Limit number of items to process (useful for testing)
    #[clap(long)]
    limit: Option<usize>,
}

#[derive(Parser)]
struct GenerateArgs {
    /// Number of items
    #[clap(long)]
    count: usize,

    /// Per-item amount column value
    #[clap(long)]
    amount: Option<f64>,

    /// Number of distinct source wallets
    #[clap(long, default_value = "1")]
    wallets: usize,

    /// Output CSV file
    #[clap(long)]
    output: PathBuf,
}

#[derive(Debug, Deserialize, Serialize)]
struct TransferRecord {
    #[serde(default)]
    address: Option<String>,
    private_key: String,
    to_addr: String,
    #[serde(
        default,
        deserialize_with = "serde_aux::field_attributes::deserialize_option_number_from_string"
    )]
    amount: Option<f64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Execute(args) => execute(args).await,
        Commands::GenerateItems(args) => generate_items(args),
    }
}

fn generate_items(args: GenerateArgs) -> Result<()> {
    if args.wallets == 0 {
        return Err(anyhow!("--wallets must be at least 1"));
    }
    println!("Generating {} items from {} wallets...", args.count, args.wallets);

    let mut rng = rand::thread_rng();
    let wallets: Vec<(String, String)> = (0..args.wallets)
        .map(|_| (random_hex(&mut rng, 20), random_hex(&mut rng, 32)))
        .collect();

    let mut writer = csv::Writer::from_path(&args.output)
        .with_context(|| format!("Failed to create {}", args.output.display()))?;
    for i in 0..args.count {
        let (address, private_key) = &wallets[i % wallets.len()];
        writer.serialize(TransferRecord {
            address: Some(format!("0x{}", address)),
            private_key: private_key.clone(),
            to_addr: format!("0x{}", random_hex(&mut rng, 20)),
            amount: args.amount,
        })?;
    }

    writer.flush()?;
    println!("Generated {} items in {}", args.count, args.output.display());
    Ok(())
}

fn random_hex<R: Rng>(rng: &mut R, bytes: usize) -> String {
    (0..bytes).map(|_| format!("{:02x}", rng.gen::<u8>())).collect()
}

async fn execute(args: ExecuteArgs) -> Result<()> {
    println!("\n🚀 Starting batch transfer...");

    let config = build_config(&args)?;
    config.validate().context("Invalid engine configuration")?;

    let mut items = load_items(&args.input_csv)?;
    if let Some(limit) = args.limit {
        if limit > 0 && items.len() > limit {
            println!("📊 Limiting to {} out of {} items", limit, items.len());
            items.truncate(limit);
        }
    }
    if items.is_empty() {
        println!("No transfer items found in {}", args.input_csv.display());
        return Ok(());
    }

    let store = Arc::new(TransferStore::new());
    let keys = store.extend(items);

    println!("Chain: {} ({:?})", config.chain, config.chain_family);
    println!("Coin: {}", describe_coin(&config.coin));
    println!("Items to process: {}", keys.len());

    if args.dry_run {
        return dry_run_summary(&config, &store, &keys);
    }

    // Confirm before proceeding (unless --yes flag)
    if !args.yes {
        println!("\nReady to execute? [y/N] ");
        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return Ok(());
        }
    } else {
        println!("\nProceeding with execution (--yes flag set)");
    }

    let adapter = HttpChainAdapter::new(HttpAdapterSettings {
        base_url: args.adapter_url.clone(),
        rate_limit: args.rate_limit,
        request_timeout: Duration::from_secs(args.request_timeout),
    })
    .context("Failed to set up the chain adapter client")?;

    let (events, rx) = EventSink::channel();
    let engine = BatchEngine::new(config, store.clone(), Arc::new(adapter)).with_events(events);

    let control = engine.control();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\n⚠️  Stop requested, waiting for in-flight transfers...");
            control.stop();
        }
    });

    let pb = ProgressBar::new(keys.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg} | ETA: {eta}")?
            .progress_chars("##-"),
    );
    let renderer = spawn_progress_renderer(pb.clone(), store.clone(), rx);

    let result = engine.execute(&keys).await;
    drop(engine);
    renderer.await?;

    let report = match result {
        Ok(report) => report,
        Err(EngineError::FeeCeilingExceeded) => {
            pb.abandon_with_message("aborted");
            println!("\n⛔ Fee price exceeded the hard ceiling, batch aborted.");
            println!("   The in-flight item was reset to pending; run again once fees drop.");
            return Err(EngineError::FeeCeilingExceeded.into());
        }
        Err(e) => return Err(e).context("Batch execution failed"),
    };
    pb.finish_with_message(format!("{} succeeded, {} failed", report.success, report.failed));

    println!("\n=== SESSION SUMMARY ===");
    println!("Started: {}", report.started_at.to_rfc3339());
    println!("Succeeded: {}/{}", report.success, report.total);
    println!("Failed: {}", report.failed);
    if report.pending > 0 {
        println!("Not started: {}", report.pending);
    }
    println!("Retry rounds: {}", report.retry_rounds);

    print_failures(&store, &keys);

    match report.outcome {
        SessionOutcome::Completed => println!("\n✅ All transfers completed"),
        SessionOutcome::CompletedWithFailures => println!("\n⚠️  Completed with failures"),
        SessionOutcome::Stopped => println!("\n⏹️  Stopped before completion"),
    }
    Ok(())
}

/// Starts from the JSON file (or defaults) and applies command-line overrides.
fn build_config(args: &ExecuteArgs) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to read engine config from {}", path.display()))?,
        None => EngineConfig::default(),
    };

    if let Some(chain) = &args.chain {
        config.chain = chain.clone();
    }
    if let Some(family) = &args.family {
        config.chain_family = parse_family(family)?;
    }
    if args.coin.is_some() || args.symbol.is_some() || args.contract.is_some() {
        let kind = args
            .coin
            .clone()
            .unwrap_or_else(|| if config.coin.is_native() { "native" } else { "token" }.to_string());
        let symbol = args
            .symbol
            .clone()
            .unwrap_or_else(|| config.coin.symbol().to_string());
        let contract = args
            .contract
            .clone()
            .or_else(|| config.coin.contract_address().map(str::to_string));
        config.coin = CoinKind::from_parts(&kind, &symbol, contract.as_deref())?;
    }
    if let Some(name) = &args.strategy {
        config.strategy = parse_strategy(name, args.amount, args.min, args.max)?;
    }
    if let Some(precision) = args.precision {
        config.precision = precision;
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if args.multi_worker {
        config.multi_worker = true;
    }
    if let Some(min) = args.delay_min {
        config.delay[0] = min;
    }
    if let Some(max) = args.delay_max {
        config.delay[1] = max;
    }
    if args.delay_in_groups {
        config.delay_in_groups = true;
    }
    if args.max_fee_price.is_some() {
        config.max_fee_price = args.max_fee_price;
    }
    if args.no_retry {
        config.error_retry = false;
    }
    Ok(config)
}

fn parse_family(name: &str) -> Result<ChainFamily> {
    match name.trim().to_ascii_lowercase().as_str() {
        "evm" => Ok(ChainFamily::Evm),
        "solana" | "sol" => Ok(ChainFamily::Solana),
        other => Err(anyhow!("Unknown chain family '{}', expected evm or solana", other)),
    }
}

fn parse_strategy(name: &str, amount: Option<f64>, min: Option<f64>, max: Option<f64>) -> Result<AmountStrategy> {
    let range = || -> Result<(f64, f64)> {
        match (min, max) {
            (Some(min), Some(max)) => Ok((min, max)),
            _ => Err(anyhow!("Strategy '{}' requires --min and --max", name)),
        }
    };
    match name.trim().to_ascii_lowercase().as_str() {
        "send-all" | "all" => Ok(AmountStrategy::SendAll),
        "fixed" => {
            let amount = amount.ok_or_else(|| anyhow!("Strategy 'fixed' requires --amount"))?;
            Ok(AmountStrategy::Fixed { amount })
        }
        "from-item" | "item" => Ok(AmountStrategy::FromItem),
        "range" => {
            let (min, max) = range()?;
            Ok(AmountStrategy::RangeRandom { min, max })
        }
        "remainder" => {
            let (min, max) = range()?;
            Ok(AmountStrategy::RemainderRandom { min, max })
        }
        other => Err(anyhow!("Unknown amount strategy '{}'", other)),
    }
}

fn load_items(csv_path: &Path) -> Result<Vec<NewTransfer>> {
    let mut reader = Reader::from_path(csv_path)
        .with_context(|| format!("Failed to open {}", csv_path.display()))?;
    let mut items = Vec::new();

    for (row, result) in reader.deserialize().enumerate() {
        let record: TransferRecord = result.with_context(|| format!("Invalid record on row {}", row + 1))?;
        if record.private_key.trim().is_empty() || record.to_addr.trim().is_empty() {
            return Err(anyhow!("Row {} is missing private_key or to_addr", row + 1));
        }

        let mut item = NewTransfer::new(record.private_key.trim(), record.to_addr.trim());
        if let Some(address) = record.address.filter(|a| !a.trim().is_empty()) {
            item = item.with_address(address.trim());
        }
        if let Some(amount) = record.amount {
            item = item.with_amount(amount);
        }
        items.push(item);
    }

    Ok(items)
}

fn describe_coin(coin: &CoinKind) -> String {
    match coin.contract_address() {
        Some(contract) => format!("{} (token {})", coin.symbol(), contract),
        None => format!("{} (native)", coin.symbol()),
    }
}

/// Total the batch will move, when the strategy makes that knowable up front.
fn estimate_total(strategy: &AmountStrategy, store: &TransferStore, keys: &[ItemKey]) -> Option<(f64, f64)> {
    let n = keys.len() as f64;
    match strategy {
        AmountStrategy::Fixed { amount } => Some((amount * n, amount * n)),
        AmountStrategy::RangeRandom { min, max } => Some((min * n, max * n)),
        AmountStrategy::FromItem => {
            let total = keys
                .iter()
                .filter_map(|key| store.get_by_key(*key))
                .filter_map(|item| item.amount)
                .sum();
            Some((total, total))
        }
        AmountStrategy::SendAll | AmountStrategy::RemainderRandom { .. } => None,
    }
}

fn dry_run_summary(config: &EngineConfig, store: &TransferStore, keys: &[ItemKey]) -> Result<()> {
    let groups = build_wallet_groups(store, keys);
    let mode = ExecutionMode::for_config(config);
    let workers = match mode {
        ExecutionMode::Sequential => 1,
        _ => config.concurrency.min(groups.len()).max(1),
    };

    println!("\n=== DRY RUN SUMMARY ===");
    println!("Items: {}", keys.len());
    println!("Wallet groups: {}", groups.len());
    println!("Execution mode: {:?} ({} workers)", mode, workers);

    match estimate_total(&config.strategy, store, keys) {
        Some((low, high)) if (high - low).abs() < f64::EPSILON => {
            println!("Total to send: {} {}", low, config.coin.symbol());
        }
        Some((low, high)) => {
            println!("Total to send: {} - {} {}", low, high, config.coin.symbol());
        }
        None => println!("Total to send: depends on wallet balances"),
    }

    if let AmountStrategy::FromItem = config.strategy {
        let missing = keys
            .iter()
            .filter_map(|key| store.get_by_key(*key))
            .filter(|item| item.amount.is_none())
            .count();
        if missing > 0 {
            println!("⚠️  {} items have no amount and will fail", missing);
        }
    }

    if let Some(ceiling) = config.max_fee_price {
        println!("Fee ceiling: {} (polled every {}ms)", ceiling, config.fee_poll_interval_ms);
    }
    if mode == ExecutionMode::Sequential {
        println!("Delay between items: {}s - {}s", config.delay[0], config.delay[1]);
    }
    println!(
        "Retry: {}",
        if config.error_retry {
            format!("on, up to {} errors per item", config.error_count_limit)
        } else {
            "off".to_string()
        }
    );

    Ok(())
}

fn spawn_progress_renderer(
    pb: ProgressBar,
    store: Arc<TransferStore>,
    mut rx: UnboundedReceiver<EngineEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut finished: HashMap<ItemKey, ExecStatus> = HashMap::new();
        let render = |pb: &ProgressBar, finished: &HashMap<ItemKey, ExecStatus>| {
            let failed = finished.values().filter(|s| **s == ExecStatus::Failed).count();
            pb.set_position(finished.len() as u64);
            pb.set_message(format!("✅ {} ❌ {}", finished.len() - failed, failed));
        };

        while let Some(event) = rx.recv().await {
            match event {
                EngineEvent::PassStarted { mode, items, workers } => {
                    pb.println(format!("📋 {:?} pass: {} items, {} workers", mode, items, workers));
                }
                EngineEvent::ItemFinished { key, status } => {
                    finished.insert(key, status);
                    render(&pb, &finished);
                }
                EngineEvent::FeeGatePaused { price, ceiling, .. } => match price {
                    Some(price) => pb.println(format!(
                        "⏸️  Fee price {} above ceiling {}, pausing all transfers",
                        price, ceiling
                    )),
                    None => pb.println("⏸️  Fee price unavailable, pausing all transfers"),
                },
                EngineEvent::FeeGateResumed { price } => {
                    pb.println(format!("▶️  Fee price back to {}, resuming", price));
                }
                EngineEvent::RetryRoundStarted { round, candidates } => {
                    pb.println(format!(
                        "🔁 Retry round {}: checking {} failed transfers on chain",
                        round, candidates
                    ));
                }
                EngineEvent::RetryRoundVerified {
                    skipped, resubmitted, ..
                } => {
                    pb.println(format!(
                        "   {} already landed, {} will be resubmitted",
                        skipped, resubmitted
                    ));
                    finished.retain(|key, _| store.status_of(*key).map_or(false, |s| s.is_terminal()));
                    render(&pb, &finished);
                }
                EngineEvent::ItemStarted { .. }
                | EngineEvent::ItemSubmitted { .. }
                | EngineEvent::DelayStarted { .. } => {}
            }
        }
    })
}

fn print_failures(store: &TransferStore, keys: &[ItemKey]) {
    let failures: Vec<_> = keys
        .iter()
        .filter_map(|key| store.get_by_key(*key))
        .filter(|item| item.exec_status == ExecStatus::Failed)
        .collect();
    if failures.is_empty() {
        return;
    }

    println!("\n❌ Failed transfers:");
    for item in failures.iter().take(20) {
        println!("   {} -> {}: {}", item.key, item.to_addr, item.error_msg);
    }
    if failures.len() > 20 {
        println!("   ... and {} more", failures.len() - 20);
    }
}

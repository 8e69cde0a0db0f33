use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use futures_lite::future;
use tracing::{info, warn, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use unpal::driver::{Navigator, UiDriver};
use unpal::{
	Analysis, EngineEvent, EventBus, ObserverState, RemovedStore, ReplayDriver, Session, SortOrder,
	UnfollowEngine, UnpalConfig, WebDriverBackend,
};

fn init_tracing(verbosity: u8, log_file: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
	// Map -q/-v to tracing levels; default INFO
	let level = match verbosity {
		0 => Level::WARN,
		1 => Level::INFO,
		2 => Level::DEBUG,
		_ => Level::TRACE,
	};

	let env_filter = EnvFilter::from_default_env().add_directive(level.into());

	let (file_layer, guard) = match log_file {
		Some(path) => {
			let file = std::fs::File::create(path)
				.with_context(|| format!("cannot create log file {}", path.display()))?;
			let (nb, guard) = tracing_appender::non_blocking(file);
			(Some(fmt::layer().with_writer(nb).with_ansi(false)), Some(guard))
		}
		None => (None, None),
	};

	// Ignore error if already set in tests or env
	let _ = tracing_subscriber::registry()
		.with(env_filter)
		.with(
			fmt::layer()
				.with_writer(std::io::stderr) // logs to stderr
				.with_target(false)
				.with_level(true)
				.compact(),
		)
		.with(file_layer)
		.try_init();
	Ok(guard)
}

fn main() {
	let opts = Opts::parse();
	let verbosity = (1 + opts.verbose).saturating_sub(opts.quiet);
	let _guard = match init_tracing(verbosity, opts.log_file.as_deref()) {
		Ok(guard) => guard,
		Err(e) => {
			eprintln!("error: {e:#}");
			std::process::exit(1);
		}
	};
	smol::block_on(async move {
		if let Err(e) = run(opts).await {
			eprintln!("error: {e:#}");
			std::process::exit(1);
		}
	});
}

async fn run(opts: Opts) -> anyhow::Result<()> {
	let config_path = match &opts.config {
		Some(path) => path.clone(),
		None => unpal::paths::default_config_path().context("no configuration directory on this system")?,
	};
	let removed_path = match &opts.removed {
		Some(path) => path.clone(),
		None => unpal::paths::default_removed_path().context("no data directory on this system")?,
	};

	match opts.command {
		Command::Analyze {
			files,
			sort,
			json,
			followers,
		} => {
			let store = RemovedStore::open(&removed_path)?;
			let analysis = Analysis::from_files(&files, &store.identifiers())?;
			print_analysis(&analysis, sort.into(), json, followers)?;
		}
		Command::Run(args) => {
			let config = UnpalConfig::load(&config_path)?;
			run_targets(args, &config, &removed_path).await?;
		}
		Command::Removed { action } => {
			let mut store = RemovedStore::open(&removed_path)?;
			match action {
				RemovedAction::List => {
					for record in store.records() {
						println!("{}\t{}", record.removed_at.format("%Y-%m-%d %H:%M:%S"), record.identifier);
					}
					println!("{} removed accounts", store.len());
				}
				RemovedAction::Clear => {
					let count = store.len();
					store.clear();
					store.save()?;
					println!("Cleared {count} removed accounts");
				}
			}
		}
		Command::Config { action } => match action {
			ConfigAction::Path => println!("{}", config_path.display()),
			ConfigAction::Show => {
				let config = UnpalConfig::load(&config_path)?;
				println!("{}", serde_json::to_string_pretty(&config)?);
			}
			ConfigAction::Init { force } => {
				if config_path.exists() && !force {
					bail!("{} already exists (use --force to overwrite)", config_path.display());
				}
				UnpalConfig::default().save(&config_path)?;
				println!("Wrote {}", config_path.display());
			}
		},
	}
	Ok(())
}

fn print_analysis(analysis: &Analysis, sort: SortOrder, json: bool, followers: bool) -> anyhow::Result<()> {
	let list = analysis.not_following_back_sorted(sort);
	if json {
		let not_followed_back = followers.then_some(&analysis.not_followed_back);
		let value = serde_json::json!({
			"followers": analysis.followers.len(),
			"following": analysis.following.len(),
			"mutual": analysis.mutual_count(),
			"not_following_back": list,
			"not_followed_back": not_followed_back,
		});
		println!("{}", serde_json::to_string_pretty(&value)?);
		return Ok(());
	}

	println!(
		"Followers: {}  Following: {}  Mutual: {}",
		analysis.followers.len(),
		analysis.following.len(),
		analysis.mutual_count()
	);
	println!("Not following back ({}):", list.len());
	for account in list {
		match account.since {
			Some(since) => println!("  {}  (since {})", account.username, since.format("%Y-%m-%d")),
			None => println!("  {}", account.username),
		}
	}
	if followers {
		println!("Not followed back ({}):", analysis.not_followed_back.len());
		for account in &analysis.not_followed_back {
			println!("  {}", account.username);
		}
	}
	Ok(())
}

/// Neither built-in backend can read a page opened in an external browser,
/// so pairing them with the system navigator would skip every target.
fn check_navigator(backend: Backend, navigator: NavigatorKind) -> anyhow::Result<()> {
	if navigator == NavigatorKind::System {
		bail!(
			"--navigator system needs a backend that reads the native UI tree; the {} backend only sees pages it opens itself",
			backend.name()
		);
	}
	Ok(())
}

async fn run_targets(args: RunArgs, config: &UnpalConfig, removed_path: &Path) -> anyhow::Result<()> {
	let mut store = RemovedStore::open(removed_path)?;

	let mut targets = args.targets.clone();
	if !args.exports.is_empty() {
		let analysis = Analysis::from_files(&args.exports, &store.identifiers())?;
		targets.extend(
			analysis
				.not_following_back_sorted(args.sort.into())
				.into_iter()
				.map(|a| a.username.clone()),
		);
	}
	if let Some(limit) = args.limit {
		targets.truncate(limit);
	}
	if targets.is_empty() {
		bail!("no targets: pass account names or --export files");
	}

	check_navigator(args.backend, args.navigator)?;

	let mut webdriver = None;
	let (driver, navigator): (Arc<dyn UiDriver>, Arc<dyn Navigator>) = match args.backend {
		Backend::Replay => {
			let dir = args
				.replay_dir
				.as_deref()
				.context("--replay-dir is required with --backend replay")?;
			let replay = Arc::new(ReplayDriver::load_dir(dir)?);
			(replay.clone() as Arc<dyn UiDriver>, replay as Arc<dyn Navigator>)
		}
		Backend::Webdriver => {
			let backend = Arc::new(WebDriverBackend::connect(&config.webdriver).await?);
			webdriver = Some(backend.clone());
			(backend.clone() as Arc<dyn UiDriver>, backend as Arc<dyn Navigator>)
		}
	};

	let engine = UnfollowEngine::new(driver, navigator, EventBus::new(), config.engine_settings());
	let session = Session::new(engine);
	let events = session.subscribe();

	if !session.is_automation_permission_granted().await {
		bail!("automation is not permitted by the {} backend", session.engine().driver().name());
	}
	let run_id = session.start(&targets)?;
	info!("Run {run_id}: {} targets; type 'stop' and Enter to halt", targets.len());

	let stopper = session.clone();
	std::thread::spawn(move || {
		for line in std::io::stdin().lines() {
			match line {
				Ok(line) if line.trim().eq_ignore_ascii_case("stop") => {
					stopper.stop();
					break;
				}
				Ok(_) => {}
				Err(_) => break,
			}
		}
	});

	let mut observer = ObserverState::new();
	let record = loop {
		let event = events.recv().await.context("event channel closed")?;
		observer.apply(&event);
		print_event(&event, args.json)?;
		if let EngineEvent::RunComplete(record) = event {
			if record.run_id == run_id {
				break record;
			}
		}
	};

	if record.success {
		let wait = Duration::from_millis(config.engine.return_delay_ms + 500);
		let back = future::or(async { events.recv().await.ok() }, async {
			smol::Timer::after(wait).await;
			None
		})
		.await;
		if let Some(event) = back {
			observer.apply(&event);
			print_event(&event, args.json)?;
		}
	}

	if !args.no_record && !record.completed.is_empty() {
		let added = store.add(&record.completed);
		store.save()?;
		info!("Recorded {added} newly removed accounts in {}", store.path().display());
	}
	if let Some(backend) = webdriver {
		if let Err(e) = backend.close().await {
			warn!("Could not close browser session: {e}");
		}
	}
	Ok(())
}

fn print_event(event: &EngineEvent, json: bool) -> anyhow::Result<()> {
	if json {
		println!("{}", serde_json::to_string(event)?);
		return Ok(());
	}
	match event {
		EngineEvent::ProgressUpdate(p) => println!("[{}/{}] {}", p.index + 1, p.total, p.identifier),
		EngineEvent::RunComplete(r) => {
			println!(
				"Run {} ended ({:?}) at {}/{}: {} confirmed, {} skipped",
				r.run_id,
				r.outcome,
				r.index,
				r.total,
				r.completed.len(),
				r.skipped.len()
			);
			for identifier in &r.skipped {
				println!("  skipped: {identifier}");
			}
			if !r.success {
				println!("  remaining targets were left untouched");
			}
		}
		EngineEvent::ReturnToObserver { .. } => println!("Done. Run `unpal analyze` to review the updated list."),
	}
	Ok(())
}

#[derive(Parser)]
#[command(version, about = "Find accounts that don't follow back and unfollow them")]
pub struct Opts {
	/// Increase verbosity (-v, -vv). Default INFO.
	#[arg(short = 'v', action = clap::ArgAction::Count, global = true)]
	pub verbose: u8,
	/// Decrease verbosity (-q). Each -q reduces level by one step.
	#[arg(short = 'q', action = clap::ArgAction::Count, global = true)]
	pub quiet: u8,
	/// Configuration file (default: platform config dir)
	#[arg(long, global = true)]
	pub config: Option<PathBuf>,
	/// Removed-accounts store (default: platform data dir)
	#[arg(long, global = true)]
	pub removed: Option<PathBuf>,
	/// Also write logs to this file
	#[arg(long, global = true)]
	pub log_file: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
	/// Show who doesn't follow back, from export JSON files
	Analyze {
		/// followers_*.json / following.json files
		#[arg(required = true)]
		files: Vec<PathBuf>,
		#[arg(long, value_enum, default_value_t = Sort::Exported)]
		sort: Sort,
		/// Print JSON instead of text
		#[arg(long)]
		json: bool,
		/// Also list followers you don't follow back
		#[arg(long)]
		followers: bool,
	},
	/// Unfollow accounts by driving a browser or a recorded UI
	Run(RunArgs),
	/// Manage the removed-accounts store
	Removed {
		#[command(subcommand)]
		action: RemovedAction,
	},
	/// Inspect or create the configuration file
	Config {
		#[command(subcommand)]
		action: ConfigAction,
	},
}

#[derive(clap::Args)]
pub struct RunArgs {
	/// Accounts to unfollow, in order
	pub targets: Vec<String>,
	/// Add the not-following-back accounts from these export files
	#[arg(long = "export", num_args = 1..)]
	pub exports: Vec<PathBuf>,
	/// Order of export-derived targets
	#[arg(long, value_enum, default_value_t = Sort::Exported)]
	pub sort: Sort,
	/// Process at most this many targets
	#[arg(long)]
	pub limit: Option<usize>,
	#[arg(long, value_enum, default_value_t = Backend::Webdriver)]
	pub backend: Backend,
	/// Recorded scripts for --backend replay
	#[arg(long)]
	pub replay_dir: Option<PathBuf>,
	/// Who opens profile pages
	#[arg(long, value_enum, default_value_t = NavigatorKind::Backend)]
	pub navigator: NavigatorKind,
	/// Stream events as JSON lines
	#[arg(long)]
	pub json: bool,
	/// Don't record confirmed accounts in the removed store
	#[arg(long)]
	pub no_record: bool,
}

#[derive(Subcommand)]
pub enum RemovedAction {
	List,
	Clear,
}

#[derive(Subcommand)]
pub enum ConfigAction {
	/// Print the configuration file location
	Path,
	/// Print the effective configuration
	Show,
	/// Write a default configuration file
	Init {
		#[arg(long)]
		force: bool,
	},
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
	Webdriver,
	Replay,
}

impl Backend {
	fn name(self) -> &'static str {
		match self {
			Backend::Webdriver => "webdriver",
			Backend::Replay => "replay",
		}
	}
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum NavigatorKind {
	/// The UI backend opens pages itself
	Backend,
	/// Launch an installed browser per target. Only meaningful with a
	/// backend that reads the native UI tree; rejected by `webdriver` and
	/// `replay`.
	System,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Sort {
	Exported,
	Oldest,
	Newest,
}

impl From<Sort> for SortOrder {
	fn from(sort: Sort) -> Self {
		match sort {
			Sort::Exported => SortOrder::AsExported,
			Sort::Oldest => SortOrder::Oldest,
			Sort::Newest => SortOrder::Newest,
		}
	}
}

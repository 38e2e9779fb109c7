use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use console::Emoji;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use url::Url;

use podcatcher::{
    ConnectionType, Episode, EpisodeDownloadListener, EpisodeManager, FailureReason,
    HttpDownloadBackend, LoadProgress, METADATA_FILENAME, OPML_FILENAME, OpmlStore, Podcast,
    PodcastLoadListener, PodcastManager, RemoteLoader, ReqwestClient, SETTINGS_FILENAME, Settings,
    SharedConnectivity, fetch_suggestions, is_url, without_subscribed,
};

// Emoji with fallback for terminals without Unicode support
static MICROPHONE: Emoji<'_, '_> = Emoji("🎙️  ", "");
static SEARCH: Emoji<'_, '_> = Emoji("🔍 ", "[~] ");
static HEADPHONES: Emoji<'_, '_> = Emoji("🎧 ", "[i] ");
static DOWNLOAD: Emoji<'_, '_> = Emoji("📥 ", "[v] ");
static SUCCESS: Emoji<'_, '_> = Emoji("✅ ", "[+] ");
static FAILURE: Emoji<'_, '_> = Emoji("❌ ", "[!] ");
static STAR: Emoji<'_, '_> = Emoji("⭐ ", "[*] ");
static BLANK: Emoji<'_, '_> = Emoji("   ", "    ");
static FOLDER: Emoji<'_, '_> = Emoji("📁 ", "");
static CROSS: Emoji<'_, '_> = Emoji("✗ ", "x ");

/// Subscribe to podcasts, refresh their feeds and download episodes
#[derive(Parser, Debug)]
#[command(name = "podcatcher")]
#[command(about = "Subscribe to podcasts, refresh their feeds and download episodes")]
#[command(version)]
struct Args {
    /// Directory holding the podcast list, settings, metadata and logos
    #[arg(short, long, default_value = ".podcatcher")]
    data_dir: PathBuf,

    /// Directory for downloaded episodes (defaults to <data-dir>/downloads)
    #[arg(short = 'o', long)]
    download_dir: Option<PathBuf>,

    /// Connection to assume; offline serves cached feeds only
    #[arg(short, long, value_enum, default_value = "wifi")]
    network: Network,

    /// Refuse to show podcasts marked explicit
    #[arg(long)]
    block_explicit: bool,

    /// More log output (repeat for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the subscribed podcasts
    List,

    /// Subscribe to the feed at URL
    Add {
        url: String,

        /// Name to use instead of the feed title
        #[arg(long)]
        name: Option<String>,
    },

    /// Unsubscribe from the feed at URL
    Remove { url: String },

    /// Reload every stale feed
    Refresh,

    /// Show the episodes of a podcast
    Episodes { url: String },

    /// Download episodes of a podcast
    Download {
        url: String,

        /// Number of newest episodes to download
        #[arg(short, long, default_value = "1")]
        latest: usize,
    },

    /// Show downloaded episodes
    Downloads,

    /// Delete a downloaded episode by media URL
    Delete { media_url: String },

    /// Show suggested podcasts
    Suggestions {
        /// Include podcasts already subscribed to
        #[arg(long)]
        all: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Network {
    Wifi,
    Ethernet,
    Mobile,
    Offline,
}

impl From<Network> for ConnectionType {
    fn from(network: Network) -> Self {
        match network {
            Network::Wifi => ConnectionType::Wifi,
            Network::Ethernet => ConnectionType::Ethernet,
            Network::Mobile => ConnectionType::Mobile,
            Network::Offline => ConnectionType::Offline,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓░")
}

/// Terminal outcome of a feed load as seen by the CLI
enum LoadOutcome {
    Loaded(Podcast),
    Failed(Podcast, FailureReason),
    Cancelled(Podcast),
}

/// Load listener drawing one progress bar per podcast
struct LoadBars {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
    outcomes: UnboundedSender<LoadOutcome>,
}

impl LoadBars {
    fn new() -> (Arc<Self>, UnboundedReceiver<LoadOutcome>) {
        let (outcomes, rx) = unbounded_channel();
        let bars = Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
            outcomes,
        };
        (Arc::new(bars), rx)
    }

    fn bar(&self, podcast: &Podcast) -> ProgressBar {
        let mut bars = lock(&self.bars);
        bars.entry(podcast.url.to_string())
            .or_insert_with(|| {
                let bar = self.multi.add(ProgressBar::new(100));
                bar.set_style(bar_style(&format!(
                    "  {SEARCH}[{{bar:30.cyan/blue}}] {{pos:>3}}% {{wide_msg}}"
                )));
                bar.set_message(truncate_title(podcast.display_name(), 40));
                bar
            })
            .clone()
    }

    fn finish(&self, podcast: &Podcast, outcome: LoadOutcome) {
        if let Some(bar) = lock(&self.bars).remove(podcast.url.as_str()) {
            bar.finish_and_clear();
        }
        let _ = self.outcomes.send(outcome);
    }
}

impl PodcastLoadListener for LoadBars {
    fn on_podcast_loading(&self, podcast: &Podcast, progress: LoadProgress) {
        let bar = self.bar(podcast);
        match progress {
            LoadProgress::Connecting => bar.set_position(0),
            LoadProgress::Loading { percent } => bar.set_position(percent.unwrap_or(0).into()),
            LoadProgress::Parsing => bar.set_position(100),
        }
    }

    fn on_podcast_loaded(&self, podcast: &Podcast) {
        self.finish(podcast, LoadOutcome::Loaded(podcast.clone()));
    }

    fn on_podcast_load_failed(&self, podcast: &Podcast, reason: FailureReason) {
        self.finish(podcast, LoadOutcome::Failed(podcast.clone(), reason));
    }

    fn on_podcast_load_cancelled(&self, podcast: &Podcast) {
        self.finish(podcast, LoadOutcome::Cancelled(podcast.clone()));
    }
}

/// Download listener drawing one progress bar per episode
struct DownloadBars {
    bars: Mutex<HashMap<String, ProgressBar>>,
    outcomes: UnboundedSender<(String, Result<(), String>)>,
}

impl DownloadBars {
    fn new(
        episodes: &[Episode],
    ) -> (Arc<Self>, UnboundedReceiver<(String, Result<(), String>)>) {
        let multi = MultiProgress::new();
        let mut bars = HashMap::new();
        for episode in episodes {
            let bar = multi.add(ProgressBar::new(100));
            bar.set_style(bar_style(&format!(
                "  {DOWNLOAD}[{{bar:30.cyan/blue}}] {{pos:>3}}% {{wide_msg}}"
            )));
            bar.set_message(truncate_title(episode.display_name(), 40));
            bars.insert(episode.media_url.to_string(), bar);
        }

        let (outcomes, rx) = unbounded_channel();
        let listener = Self {
            bars: Mutex::new(bars),
            outcomes,
        };
        (Arc::new(listener), rx)
    }
}

impl EpisodeDownloadListener for DownloadBars {
    fn on_download_progress(&self, media_url: &str, percent: u8) {
        if let Some(bar) = lock(&self.bars).get(media_url) {
            bar.set_position(percent.into());
        }
    }

    fn on_download_success(&self, media_url: &str) {
        if let Some(bar) = lock(&self.bars).remove(media_url) {
            bar.set_position(100);
            bar.finish_with_message(format!("{SUCCESS}{}", bar.message().green()));
        }
        let _ = self.outcomes.send((media_url.to_string(), Ok(())));
    }

    fn on_download_failed(&self, media_url: &str, reason: &str) {
        if let Some(bar) = lock(&self.bars).remove(media_url) {
            bar.abandon_with_message(format!("{FAILURE}{}", bar.message().red()));
        }
        let _ = self
            .outcomes
            .send((media_url.to_string(), Err(reason.to_string())));
    }
}

fn truncate_title(title: &str, max_len: usize) -> String {
    if title.chars().count() <= max_len {
        title.to_string()
    } else {
        let head: String = title.chars().take(max_len.saturating_sub(3)).collect();
        format!("{head}...")
    }
}

/// Everything the subcommands work with
struct Client {
    settings: Settings,
    loader: RemoteLoader,
    podcasts: PodcastManager,
    episodes: EpisodeManager,
    download_dir: PathBuf,
}

impl Client {
    async fn open(args: &Args) -> Result<Self> {
        tokio::fs::create_dir_all(&args.data_dir)
            .await
            .with_context(|| format!("Cannot create data directory {}", args.data_dir.display()))?;

        let mut settings = Settings::load(&args.data_dir.join(SETTINGS_FILENAME))
            .context("Failed to read settings")?;
        settings.block_explicit |= args.block_explicit;

        let http = ReqwestClient::new(&settings.network).context("Failed to create HTTP client")?;
        let loader = RemoteLoader::new(Arc::new(http));
        let connectivity = SharedConnectivity::new(args.network.into());

        let podcasts = PodcastManager::new(
            loader.clone(),
            Arc::new(OpmlStore::new(args.data_dir.join(OPML_FILENAME))),
            Arc::new(connectivity),
            &settings,
            args.data_dir.join("logos"),
        );
        podcasts.load_podcast_list().await;

        let download_dir = args
            .download_dir
            .clone()
            .unwrap_or_else(|| args.data_dir.join("downloads"));
        let backend = HttpDownloadBackend::new(loader.clone(), download_dir.clone());
        let episodes = EpisodeManager::new(args.data_dir.join(METADATA_FILENAME), Arc::new(backend));

        Ok(Self {
            settings,
            loader,
            podcasts,
            episodes,
            download_dir,
        })
    }

    async fn close(&self) -> Result<()> {
        self.podcasts.shutdown();
        self.podcasts
            .save_podcast_list()
            .await
            .context("Failed to save podcast list")?;
        self.episodes
            .save()
            .await
            .context("Failed to save episode metadata")?;
        Ok(())
    }

    fn subscribed(&self, url: &str) -> Result<Podcast> {
        self.podcasts
            .find_podcast(url)
            .with_context(|| format!("Not subscribed to {url}"))
    }

    /// Load one podcast and wait for the outcome
    async fn load(&self, podcast: &Podcast) -> Result<Podcast> {
        let (bars, mut outcomes) = LoadBars::new();
        self.podcasts.load(podcast, bars);

        match outcomes.recv().await {
            Some(LoadOutcome::Loaded(podcast)) => Ok(podcast),
            Some(LoadOutcome::Failed(podcast, FailureReason::ExplicitContentBlocked)) => {
                bail!("{} is explicit and explicit content is blocked", podcast.display_name())
            }
            Some(LoadOutcome::Failed(podcast, FailureReason::LoadFailed)) => {
                bail!("Failed to load {}", podcast.url)
            }
            Some(LoadOutcome::Cancelled(_)) | None => bail!("Load was cancelled"),
        }
    }
}

fn list(client: &Client) {
    let podcasts = client.podcasts.podcasts();
    if podcasts.is_empty() {
        println!("No podcasts yet. Add one with {}", "podcatcher add <url>".cyan());
        return;
    }
    for podcast in podcasts {
        println!(
            "{HEADPHONES}{} {}",
            podcast.display_name().bold(),
            podcast.url.as_str().dimmed()
        );
    }
}

async fn add(client: &Client, url: &str, name: Option<String>) -> Result<()> {
    if !is_url(url) {
        bail!("{url} is not an http(s) URL");
    }
    let url = Url::parse(url).with_context(|| format!("Invalid feed URL {url}"))?;
    if client.podcasts.find_podcast(url.as_str()).is_some() {
        bail!("Already subscribed to {url}");
    }

    let loaded = client.load(&Podcast::new(name.clone(), url)).await?;
    let mut podcast = Podcast::new(name.or(loaded.name.clone()), loaded.url.clone());
    podcast.description = loaded.description.clone();
    podcast.logo_url = loaded.logo_url.clone();

    client
        .podcasts
        .add_podcast(podcast)
        .with_context(|| format!("Cannot add {}", loaded.url))?;
    println!(
        "{SUCCESS}Subscribed to {} ({} episodes)",
        loaded.display_name().bold().green(),
        loaded.episodes.len().to_string().cyan()
    );
    Ok(())
}

fn remove(client: &Client, url: &str) -> Result<()> {
    let removed = client
        .podcasts
        .remove_podcast(url)
        .with_context(|| format!("Not subscribed to {url}"))?;
    println!("{CROSS}Unsubscribed from {}", removed.display_name().bold());
    Ok(())
}

/// Load every podcast; returns the number of failures
async fn refresh(client: &Client) -> usize {
    let podcasts = client.podcasts.podcasts();
    let (bars, mut outcomes) = LoadBars::new();
    for podcast in &podcasts {
        client.podcasts.load(podcast, bars.clone());
    }

    let mut failed = 0;
    for _ in 0..podcasts.len() {
        match outcomes.recv().await {
            Some(LoadOutcome::Loaded(podcast)) => println!(
                "{SUCCESS}{} {} episodes",
                podcast.display_name().green(),
                podcast.episodes.len().to_string().cyan()
            ),
            Some(LoadOutcome::Failed(podcast, reason)) => {
                failed += 1;
                let why = match reason {
                    FailureReason::LoadFailed => "load failed",
                    FailureReason::ExplicitContentBlocked => "explicit content blocked",
                };
                println!("{FAILURE}{} {}", podcast.display_name().red(), why.dimmed());
            }
            Some(LoadOutcome::Cancelled(podcast)) => {
                println!("{CROSS}{} cancelled", podcast.display_name().yellow());
            }
            None => break,
        }
    }
    failed
}

async fn episodes(client: &Client, url: &str) -> Result<()> {
    let podcast = client.load(&client.subscribed(url)?).await?;
    println!(
        "{HEADPHONES}{} {}\n",
        podcast.display_name().bold().green(),
        format!("{} episodes", podcast.episodes.len()).dimmed()
    );

    for episode in &podcast.episodes {
        let marker = if client.episodes.is_downloaded(episode) {
            "●".green()
        } else {
            "○".dimmed()
        };
        let date = episode
            .pub_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "          ".to_string());
        println!(
            "{marker} {} {} {}",
            date.cyan(),
            episode.display_name(),
            episode.duration.as_deref().unwrap_or("").dimmed()
        );
    }
    Ok(())
}

/// Download the newest episodes of a podcast; returns the number of failures
async fn download(client: &Client, url: &str, latest: usize) -> Result<usize> {
    let podcast = client.load(&client.subscribed(url)?).await?;
    let mut newest = podcast.episodes.clone();
    newest.sort_by(Episode::newest_first);
    let wanted: Vec<Episode> = newest
        .into_iter()
        .take(latest)
        .filter(|e| !client.episodes.is_downloaded(e) && !client.episodes.is_downloading(e))
        .collect();

    if wanted.is_empty() {
        println!("{SUCCESS}Nothing new to download");
        return Ok(0);
    }

    let (bars, mut outcomes) = DownloadBars::new(&wanted);
    let listener: Arc<dyn EpisodeDownloadListener> = bars;
    client.episodes.add_listener(Arc::clone(&listener));
    for episode in &wanted {
        client.episodes.download(episode);
    }

    let mut failures = Vec::new();
    for _ in 0..wanted.len() {
        match outcomes.recv().await {
            Some((_, Ok(()))) => {}
            Some((media_url, Err(reason))) => failures.push((media_url, reason)),
            None => break,
        }
    }
    client.episodes.remove_listener(&listener);

    for (media_url, reason) in &failures {
        println!("  {CROSS}{} - {}", media_url.yellow(), reason.dimmed());
    }
    println!(
        "\n{FOLDER}Output: {}",
        client.download_dir.display().to_string().cyan()
    );
    Ok(failures.len())
}

fn downloads(client: &Client) {
    let downloaded = client.episodes.downloads(&client.podcasts);
    if downloaded.is_empty() {
        println!("No downloaded episodes");
        return;
    }
    for episode in downloaded {
        let path = client
            .episodes
            .local_path(&episode)
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        println!(
            "{DOWNLOAD}{} {} {}",
            episode.podcast_name.as_deref().unwrap_or("").cyan(),
            episode.display_name().bold(),
            path.dimmed()
        );
    }
}

async fn delete(client: &Client, media_url: &str) -> Result<()> {
    let episode = client
        .episodes
        .downloads(&client.podcasts)
        .into_iter()
        .find(|e| e.media_url.as_str() == media_url)
        .with_context(|| format!("{media_url} is not downloaded"))?;

    if !client.episodes.delete_download(&episode).await {
        bail!("Failed to delete {}", episode.display_name());
    }
    println!("{CROSS}Deleted {}", episode.display_name().bold());
    Ok(())
}

async fn suggestions(client: &Client, all: bool) -> Result<()> {
    let url = Url::parse(&client.settings.network.suggestions_url)
        .context("Invalid suggestions URL in settings")?;
    let suggestions = fetch_suggestions(
        &client.loader,
        &url,
        client.settings.network.suggestions_max_bytes,
        &CancellationToken::new(),
    )
    .await
    .context("Failed to load suggestions")?;

    let suggestions = if all {
        suggestions
    } else {
        without_subscribed(suggestions, &client.podcasts)
    };
    for suggestion in suggestions {
        let podcast = &suggestion.podcast;
        let star = if suggestion.featured { &STAR } else { &BLANK };
        println!(
            "{star}{} {}",
            podcast.display_name().bold(),
            podcast.url.as_str().dimmed()
        );
        if let Some(description) = &podcast.description {
            println!("     {}", truncate_title(description, 72).dimmed());
        }
    }
    Ok(())
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "podcatcher=info",
        1 => "podcatcher=debug",
        _ => "podcatcher=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    println!(
        "\n{}{} {}\n",
        MICROPHONE,
        "podcatcher".bold().magenta(),
        "- Podcast Client".dimmed()
    );

    let client = Client::open(&args).await?;
    let result = match &args.command {
        Command::List => {
            list(&client);
            Ok(0)
        }
        Command::Add { url, name } => add(&client, url, name.clone()).await.map(|_| 0),
        Command::Remove { url } => remove(&client, url).map(|_| 0),
        Command::Refresh => Ok(refresh(&client).await),
        Command::Episodes { url } => episodes(&client, url).await.map(|_| 0),
        Command::Download { url, latest } => download(&client, url, *latest).await,
        Command::Downloads => {
            downloads(&client);
            Ok(0)
        }
        Command::Delete { media_url } => delete(&client, media_url).await.map(|_| 0),
        Command::Suggestions { all } => suggestions(&client, *all).await.map(|_| 0),
    };

    client.close().await?;
    let failed = result?;
    println!();

    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

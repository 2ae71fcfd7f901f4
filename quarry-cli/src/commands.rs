//! Command handlers for the Quarry CLI.

use anyhow::{Context, bail};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use quarry_core::config::{
    QuarryConfig, load_config, workspace_config_path, write_default_config,
};
use quarry_core::research::{
    AiSearchOptions, AiSearcher, CancelLevel, ResearchCancellation, ResearchController,
    ResearchResult,
};
use quarry_core::search::{MergeStrategy, SearchEngine, SearchOptions};
use quarry_core::{CitationLedger, OpenAiCompatibleModel, SearchAggregator, SourceCache, WebFetcher};

use crate::progress::ConsoleProgress;
use crate::{Commands, ConfigAction};

/// Platform data directory for logs and saved sessions.
pub fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "quarry", "quarry")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".quarry"))
}

pub async fn handle_command(command: Commands, workspace: &Path, quiet: bool) -> anyhow::Result<()> {
    match command {
        Commands::Research {
            query,
            depth,
            breadth,
            output,
            ledger,
            engines,
            dynamic,
            no_cache,
            thoughts,
        } => {
            let config = load(workspace)?;
            let depth = depth.unwrap_or(config.research.default_depth);
            let breadth = breadth.unwrap_or(config.research.default_breadth);
            let engines = parse_engines(&engines)?;
            let dynamic = dynamic || config.research.dynamic_fetch;

            let search = Arc::new(build_search(&config, no_cache)?);
            let fetcher = Arc::new(build_fetcher(&config, no_cache, dynamic).await?);
            let model = Arc::new(OpenAiCompatibleModel::new(&config.llm)?);
            let ledger_handle = Arc::new(Mutex::new(CitationLedger::new()));
            let cancellation = ResearchCancellation::new();

            let controller = ResearchController::new(model, search, fetcher, config.research.clone())
                .with_ledger(Arc::clone(&ledger_handle))
                .with_cancellation(cancellation.clone())
                .with_callback(Arc::new(ConsoleProgress::new(quiet)))
                .with_engines(engines)
                .with_dynamic(dynamic);

            let interrupt = tokio::spawn(watch_interrupts(cancellation, quiet));
            let result = controller.run(&query, depth, breadth).await;
            interrupt.abort();
            let result = result?;

            let markdown = result.to_markdown(thoughts);
            println!("{markdown}");

            if let Some(path) = output {
                std::fs::write(&path, &markdown)
                    .with_context(|| format!("writing report to {}", path.display()))?;
                info!(path = %path.display(), "Report written");
            }

            match result.save(&data_dir()) {
                Ok(path) => info!(path = %path.display(), id = %result.id, "Session saved"),
                Err(e) => warn!(error = %e, "Failed to save research session"),
            }

            if let Some(path) = ledger {
                let ledger = ledger_handle.lock().unwrap_or_else(|e| e.into_inner());
                ledger
                    .export_to_file(&path)
                    .with_context(|| format!("exporting ledger to {}", path.display()))?;
                info!(path = %path.display(), "Citation ledger exported");
            }

            if !quiet {
                print_summary(&result);
            }
            Ok(())
        }
        Commands::Search {
            query,
            engines,
            max,
            strategy,
        } => {
            let config = load(workspace)?;
            let search = build_search(&config, false)?;
            let mut engines = parse_engines(&engines)?;
            if engines.is_empty() {
                engines = search.default_engines().to_vec();
            }
            let defaults = search.default_options();
            let options = SearchOptions {
                max_results: max.unwrap_or(defaults.max_results),
                strategy: match strategy {
                    Some(s) => s.parse::<MergeStrategy>().map_err(anyhow::Error::msg)?,
                    None => defaults.strategy,
                },
            };

            let results = search.search_with(&query, &engines, &options).await;
            if results.is_empty() {
                println!("No results for \"{query}\".");
                return Ok(());
            }
            for (i, result) in results.iter().enumerate() {
                println!("{}. {}", i + 1, result.to_markdown());
            }
            Ok(())
        }
        Commands::Aisearch {
            query,
            engines,
            max,
            output,
            detailed,
            no_scrape,
            json,
        } => {
            let config = load(workspace)?;
            let dynamic = config.research.dynamic_fetch;
            let search = Arc::new(build_search(&config, false)?);
            let model = Arc::new(OpenAiCompatibleModel::new(&config.llm)?);
            let mut searcher = AiSearcher::new(model, search);
            if !no_scrape {
                searcher = searcher.with_fetcher(Arc::new(build_fetcher(&config, false, dynamic).await?));
            }
            let options = AiSearchOptions {
                engines: parse_engines(&engines)?,
                max_results: max,
                detailed,
                scrape: !no_scrape,
                dynamic,
                ..Default::default()
            };

            let result = searcher.search(&query, &options).await?;
            let rendered = if json {
                serde_json::to_string_pretty(&result)?
            } else {
                result.to_markdown()
            };
            println!("{rendered}");

            if let Some(path) = output {
                std::fs::write(&path, &rendered)
                    .with_context(|| format!("writing search summary to {}", path.display()))?;
                info!(path = %path.display(), "Search summary written");
            }
            Ok(())
        }
        Commands::Fetch { url, dynamic, refresh } => {
            let config = load(workspace)?;
            let fetcher = build_fetcher(&config, false, dynamic).await?;
            let page = fetcher.fetch(&url, dynamic, refresh).await;
            if let Some(error) = &page.error {
                bail!("fetch failed for {url}: {error}");
            }
            println!("# {}\n", page.display_title());
            println!("{}", page.text);
            if !quiet {
                eprintln!(
                    "\n{} chars in {}ms, reliability of {} is {:.2}",
                    page.text.chars().count(),
                    page.fetch_duration_ms,
                    page.domain(),
                    fetcher.reliability(&page.domain())
                );
            }
            Ok(())
        }
        Commands::Sessions => {
            let sessions = ResearchResult::list(&data_dir());
            if sessions.is_empty() {
                println!("No saved research sessions.");
                return Ok(());
            }
            for s in sessions {
                println!(
                    "{}  {}  {:>3} sources{}  {}",
                    s.id,
                    s.timestamp.format("%Y-%m-%d %H:%M"),
                    s.sources,
                    if s.interrupted { " (interrupted)" } else { "" },
                    s.query
                );
            }
            Ok(())
        }
        Commands::Clean { cache_only } => {
            let config = load(workspace)?;
            let report = clean(&config, &data_dir(), cache_only)?;
            if !quiet {
                println!(
                    "Removed {} expired cache entries and {} saved sessions.",
                    report.cache_entries, report.sessions
                );
            }
            Ok(())
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let config = load(workspace)?;
                println!("{}", toml::to_string_pretty(&config)?);
                Ok(())
            }
            ConfigAction::Init => {
                let path = workspace_config_path(workspace);
                if path.exists() {
                    println!("Config already exists at {}", path.display());
                } else {
                    write_default_config(&path)?;
                    println!("Created config at {}", path.display());
                }
                Ok(())
            }
        },
    }
}

fn load(workspace: &Path) -> anyhow::Result<QuarryConfig> {
    let config = load_config(Some(workspace), None).map_err(|e| anyhow::anyhow!("{e}"))?;
    config.validate()?;
    Ok(config)
}

fn parse_engines(names: &[String]) -> anyhow::Result<Vec<SearchEngine>> {
    names
        .iter()
        .map(|n| n.parse::<SearchEngine>().map_err(anyhow::Error::msg))
        .collect()
}

fn open_cache(config: &QuarryConfig, bypass: bool, name: &str, ttl_secs: u64) -> Arc<SourceCache> {
    if bypass || !config.cache.enabled {
        return Arc::new(SourceCache::disabled());
    }
    let dir = config.cache.resolved_dir().join(name);
    match SourceCache::filesystem(&dir, std::time::Duration::from_secs(ttl_secs)) {
        Ok(cache) => Arc::new(cache),
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Cache unavailable, continuing without it");
            Arc::new(SourceCache::disabled())
        }
    }
}

fn build_search(config: &QuarryConfig, no_cache: bool) -> anyhow::Result<SearchAggregator> {
    let cache = open_cache(config, no_cache, "search", config.search.cache_ttl_secs);
    Ok(SearchAggregator::from_config(&config.search, cache)?)
}

async fn build_fetcher(config: &QuarryConfig, no_cache: bool, dynamic: bool) -> anyhow::Result<WebFetcher> {
    let cache = open_cache(config, no_cache, "pages", config.fetch.cache_ttl_secs);
    let fetcher = WebFetcher::from_config(&config.fetch, cache)?;

    #[cfg(feature = "browser")]
    if dynamic {
        let renderer = quarry_core::fetch::ChromiumRenderer::launch(None).await?;
        return Ok(fetcher.with_renderer(Arc::new(renderer)));
    }

    #[cfg(not(feature = "browser"))]
    if dynamic {
        warn!("Built without the `browser` feature; dynamic pages fall back to static fetches");
    }

    Ok(fetcher)
}

/// First Ctrl-C finishes the run with what has been gathered, the second
/// stops immediately.
async fn watch_interrupts(cancellation: ResearchCancellation, quiet: bool) {
    while tokio::signal::ctrl_c().await.is_ok() {
        match cancellation.request() {
            CancelLevel::Graceful => {
                if !quiet {
                    eprintln!("\nInterrupted: writing report from current findings (Ctrl-C again to abort)");
                }
            }
            CancelLevel::Abort | CancelLevel::None => {
                if !quiet {
                    eprintln!("\nAborting");
                }
                break;
            }
        }
    }
}

#[derive(Debug, Default, PartialEq)]
struct CleanReport {
    cache_entries: usize,
    sessions: usize,
}

/// Purge expired entries from the search and page caches and, unless
/// `cache_only`, delete saved sessions under `data_dir`.
fn clean(config: &QuarryConfig, data_dir: &Path, cache_only: bool) -> anyhow::Result<CleanReport> {
    let root = config.cache.resolved_dir();
    let mut report = CleanReport::default();
    for (name, ttl_secs) in [
        ("search", config.search.cache_ttl_secs),
        ("pages", config.fetch.cache_ttl_secs),
    ] {
        let dir = root.join(name);
        if !dir.is_dir() {
            continue;
        }
        let cache = SourceCache::filesystem(&dir, std::time::Duration::from_secs(ttl_secs))?;
        let removed = cache.purge_expired();
        info!(cache = name, removed, "Purged expired cache entries");
        report.cache_entries += removed;
    }
    if !cache_only {
        report.sessions = ResearchResult::remove_all(data_dir)
            .with_context(|| format!("removing sessions under {}", data_dir.display()))?;
        info!(removed = report.sessions, "Removed saved research sessions");
    }
    Ok(report)
}

fn print_summary(result: &ResearchResult) {
    let stats = &result.research_stats;
    eprintln!(
        "\n{} sources found, {} fetched, {} sub-queries, depth {} in {}{}",
        stats.sources_found,
        stats.fetched_sources,
        stats.subqueries,
        stats.depth_reached,
        stats.elapsed_display(),
        if result.interrupted { " (interrupted)" } else { "" }
    );
}

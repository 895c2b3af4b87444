use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use snaptrans::cancellation::TaskGeneration;
use snaptrans::config::{self, Settings};
use snaptrans::scheduler::{ChannelSink, Delivery, HotkeyJob, Pipeline};
use snaptrans::translate::language::{self, LANGUAGES};
use snaptrans::translate::TranslationRequest;
use snaptrans::App;

#[derive(Parser, Debug)]
#[command(name = "snaptrans")]
#[command(version)]
#[command(about = "Select text anywhere, press a hotkey, read the translation", long_about = None)]
struct Cli {
    /// Path to a configuration file (TOML)
    #[arg(short, long, env = "SNAPTRANS_CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Print per-stage timings (JSON, stderr) when the command finishes
    #[arg(long)]
    timings: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Translate text given on the command line
    Translate {
        text: String,
        /// Source language tag, or `auto`
        #[arg(long)]
        from: Option<String>,
        /// Target language tag
        #[arg(long)]
        to: Option<String>,
    },
    /// Capture the current selection once and translate it (bind to an OS hotkey)
    Capture {
        #[arg(long)]
        to: Option<String>,
    },
    /// Treat each stdin line as a hotkey press; a non-empty line overrides the target language
    Listen,
    /// Detect the language of some text
    Detect { text: String },
    /// List supported languages
    Languages,
    /// Inspect or reset the translation cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Show recent translations
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Delete all history instead of listing it
        #[arg(long)]
        clear: bool,
    },
    /// Show usage statistics
    Stats,
    /// Print the effective configuration
    Config,
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    Stats,
    Clear,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose { "snaptrans=debug" } else { "snaptrans=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn render(delivery: &Delivery, format: OutputFormat) -> Result<()> {
    if let OutputFormat::Json = format {
        return print_json(delivery);
    }
    match delivery {
        Delivery::NothingCaptured { capture, .. } => {
            println!(
                "nothing to translate ({})",
                capture.error_message.as_deref().unwrap_or("no selection")
            );
        }
        Delivery::Translated { result, .. } if result.success => {
            println!("{}", result.translated_text);
            if let Some(method) = &result.method {
                eprintln!(
                    "[{} -> {} via {method}, {:.0} ms]",
                    result.resolved_source_lang, result.target_lang, result.elapsed_ms
                );
            }
        }
        Delivery::Translated { result, .. } => {
            println!(
                "translation failed: {}",
                result.error_message.as_deref().unwrap_or("unknown error")
            );
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let settings = config::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Languages => {
            for (code, name) in LANGUAGES {
                println!("{code:<8} {name}");
            }
            Ok(())
        }
        Commands::Config => print_json(&masked(settings)),
        command => run(command, settings, cli.format, cli.timings).await,
    }
}

/// Settings with credentials hidden, for display.
fn masked(mut settings: Settings) -> Settings {
    for key in [&mut settings.api_key, &mut settings.libre_api_key] {
        if key.is_some() {
            *key = Some("********".into());
        }
    }
    settings
}

async fn run(
    command: Commands,
    settings: Settings,
    format: OutputFormat,
    timings: bool,
) -> Result<()> {
    let mut app = App::build(settings)?;
    let outcome = dispatch(command, &mut app, format).await;
    if timings {
        match serde_json::to_string_pretty(&app.metrics.summary()) {
            Ok(json) => eprintln!("{json}"),
            Err(e) => warn!(error = %e, "rendering timings failed"),
        }
    }
    app.shutdown().await;
    outcome
}

async fn dispatch(command: Commands, app: &mut App, format: OutputFormat) -> Result<()> {
    match command {
        Commands::Translate { text, from, to } => {
            let (source, target) = {
                let s = app.settings.read();
                (
                    from.unwrap_or_else(|| s.source_lang.clone()),
                    to.unwrap_or_else(|| s.target_lang.clone()),
                )
            };
            check_tags(&source, &target)?;
            let request = TranslationRequest::new(text.clone(), source, target);
            let result = app.orchestrator.translate(&request).await;
            let success = result.success;
            render(
                &Delivery::Translated {
                    request_id: request.request_id,
                    source_text: text,
                    result,
                },
                format,
            )?;
            if !success {
                bail!("translation failed");
            }
            Ok(())
        }
        Commands::Capture { to } => {
            if let Some(tag) = &to {
                check_tags(language::AUTO, tag)?;
            }
            let (sink, mut rx) = ChannelSink::new();
            let pipeline = Pipeline::new(
                app.system_capture(),
                Arc::clone(&app.orchestrator),
                Arc::new(sink),
                app.settings.clone(),
                Arc::clone(&app.metrics),
            );
            pipeline
                .run(HotkeyJob::new(to), TaskGeneration::new().advance())
                .await;
            drop(pipeline);
            while let Some(delivery) = rx.recv().await {
                render(&delivery, format)?;
            }
            Ok(())
        }
        Commands::Listen => listen(app, format).await,
        Commands::Detect { text } => {
            let (resolved, detected) = app.orchestrator.detect_source(&text).await;
            match format {
                OutputFormat::Json => print_json(&serde_json::json!({
                    "language": resolved,
                    "name": language::language_name(&resolved),
                    "from_provider": detected.is_some(),
                })),
                OutputFormat::Text => {
                    println!("{resolved} ({})", language::language_name(&resolved));
                    Ok(())
                }
            }
        }
        Commands::Cache { action } => match action {
            CacheAction::Stats => {
                let stats = app.cache.stats();
                match format {
                    OutputFormat::Json => print_json(&stats),
                    OutputFormat::Text => {
                        println!("entries: {}", stats.entries);
                        println!("hits:    {}", stats.hits);
                        println!("misses:  {}", stats.misses);
                        Ok(())
                    }
                }
            }
            CacheAction::Clear => {
                app.cache.clear();
                if let Some(store) = &app.cache_store {
                    let removed = store.clear()?;
                    info!(removed, "persistent cache cleared");
                }
                println!("cache cleared");
                Ok(())
            }
        },
        Commands::History { limit, clear } => {
            let Some(history) = &app.history else {
                bail!("history is unavailable without a data directory");
            };
            if clear {
                let removed = history.clear()?;
                println!("removed {removed} entries");
                return Ok(());
            }
            let rows = history.recent(limit)?;
            match format {
                OutputFormat::Json => print_json(&rows),
                OutputFormat::Text => {
                    for r in rows {
                        println!(
                            "[{}->{}] {} => {}",
                            r.source_lang, r.target_lang, r.source_text, r.translated_text
                        );
                    }
                    Ok(())
                }
            }
        }
        Commands::Stats => {
            let data = app.stats.snapshot();
            match format {
                OutputFormat::Json => print_json(&data),
                OutputFormat::Text => {
                    let today = chrono::Local::now().date_naive();
                    println!("translations: {}", data.total_translations);
                    println!("success rate: {:.1}%", data.success_rate());
                    println!("characters:   {}", data.total_characters);
                    println!("today:        {}", data.translations_on(today));
                    println!("this week:    {}", data.translations_this_week(today));
                    println!("this month:   {}", data.translations_this_month(today));
                    println!(
                        "top pair:     {}",
                        data.most_used_pair().unwrap_or("none")
                    );
                    Ok(())
                }
            }
        }
        Commands::Languages | Commands::Config => Ok(()),
    }
}

fn check_tags(source: &str, target: &str) -> Result<()> {
    for tag in [source, target] {
        if !language::is_valid_language(tag) {
            bail!("unknown language tag '{tag}' (see `snaptrans languages`)");
        }
    }
    if target == language::AUTO {
        bail!("target language cannot be 'auto'");
    }
    Ok(())
}

async fn listen(app: &mut App, format: OutputFormat) -> Result<()> {
    let (sink, mut rx) = ChannelSink::new();
    let capture = app.system_capture();
    let scheduler = app.start_hotkeys(capture, Arc::new(sink));
    let printer = tokio::spawn(async move {
        while let Some(delivery) = rx.recv().await {
            if let Err(e) = render(&delivery, format) {
                warn!(error = %e, "render failed");
            }
        }
    });

    info!("listening: one line on stdin per hotkey press, EOF or Ctrl-C to stop");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => break,
        };
        let Some(line) = line else { break };
        let target = Some(line.trim().to_string()).filter(|t| !t.is_empty());
        if let Some(tag) = &target {
            if !language::is_valid_language(tag) || tag == language::AUTO {
                warn!(tag = %tag, "ignoring press with invalid target language");
                continue;
            }
        }
        if let Err(e) = scheduler.trigger(target) {
            warn!(error = %e, "hotkey press rejected");
        }
    }

    // Closing the queue lets in-flight presses deliver before shutdown.
    drop(scheduler);
    app.drain_hotkeys().await;
    if let Err(e) = printer.await {
        warn!(error = %e, "printer task failed");
    }
    Ok(())
}

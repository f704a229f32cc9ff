use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use config_collector::{
    logging::{init_logging, level_for, LogFormat},
    ConfigExtractor, FetcherConfig, GeoConfig, LabelPolicy, OutputConfig, Pipeline,
    PipelineConfig, ProbeBackend, ScraperConfig, ValidatorConfig,
};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Collects proxy configs from public channels, validates them and writes subscriptions
#[derive(Parser)]
#[command(name = "config-collector")]
#[command(about = "Collects proxy configs from public channels, validates them and writes subscriptions")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// File listing sources, one per line
    #[arg(short, long, global = true, default_value = "channels.txt")]
    sources: PathBuf,

    /// Directory for raw scraped configs
    #[arg(long, global = true, default_value = "v2ray_configs")]
    raw_dir: PathBuf,

    /// Directory for validated outputs
    #[arg(long, global = true, default_value = "validated_configs")]
    validated_dir: PathBuf,

    /// Number of sources scraped concurrently
    #[arg(long, global = true, default_value = "10")]
    scrape_workers: usize,

    /// Number of configs validated concurrently
    #[arg(long, global = true, default_value = "15")]
    validate_workers: usize,

    /// HTTP request timeout in seconds
    #[arg(long, global = true, default_value = "10")]
    timeout: u64,

    /// Retries for transient HTTP failures
    #[arg(long, global = true, default_value = "5")]
    retries: u32,

    /// URL template for sources, `{source}` is replaced by the source name
    #[arg(long, global = true, default_value = "https://t.me/s/{source}")]
    url_template: String,

    /// Probe timeout in seconds
    #[arg(long, global = true, default_value = "15")]
    probe_timeout: u64,

    /// Maximum acceptable latency in milliseconds
    #[arg(long, global = true, default_value = "3000")]
    max_latency: u64,

    /// Probe backend (command, tcp)
    #[arg(long, global = true, default_value = "command")]
    probe: String,

    /// Executable used by the command probe backend
    #[arg(long, global = true, default_value = "xray")]
    probe_program: String,

    /// Extra argument for the probe executable, placed before the config (repeatable)
    #[arg(long = "probe-arg", global = true, allow_hyphen_values = true)]
    probe_args: Vec<String>,

    /// Geo lookup URL, `{ip}` is replaced by the server IP
    #[arg(
        long,
        global = true,
        default_value = "http://ip-api.com/json/{ip}?fields=status,country,countryCode,isp"
    )]
    geo_url: String,

    /// Offline MaxMind database used instead of the geo lookup URL
    #[arg(long, global = true)]
    mmdb: Option<PathBuf>,

    /// What to do with labels configs already carry (replace, preserve)
    #[arg(long, global = true, default_value = "replace")]
    label_policy: String,

    /// Log format (pretty, compact, json)
    #[arg(long, global = true, default_value = "pretty")]
    log_format: String,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape, validate and write every output (default)
    Run,
    /// Scrape sources and write raw configs only
    Scrape,
    /// Extract configs from a local page or text file
    Extract {
        /// Input file containing page content
        input: PathBuf,
        /// Output file for extracted configs
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate configs listed in a file and write validated outputs
    Validate {
        /// Input file containing configs, one per line
        input: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_format: LogFormat = cli.log_format.parse().map_err(|e: String| anyhow!(e))?;
    init_logging(log_format, level_for(cli.verbose, cli.quiet));

    match cli.command {
        Some(Commands::Run) | None => {
            let pipeline = Pipeline::from_config(pipeline_config(&cli)?)?;
            pipeline.run_from_file(&cli.sources).await?;
        }
        Some(Commands::Scrape) => {
            let pipeline = Pipeline::from_config(pipeline_config(&cli)?)?;
            let sources = config_collector::load_sources(&cli.sources)?;
            let configs = pipeline.scrape(&sources).await?;
            info!(count = configs.len(), "Scraping finished");
        }
        Some(Commands::Extract { ref input, ref output }) => {
            let content = fs::read_to_string(input)
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let configs = ConfigExtractor::extract_from_page(&content);
            let lines: Vec<&str> = configs.iter().map(|c| c.as_str()).collect();

            info!(count = lines.len(), input = %input.display(), "Extracted configs");

            if let Some(output_path) = output {
                fs::write(output_path, lines.join("\n"))
                    .with_context(|| format!("Failed to write {}", output_path.display()))?;
                println!("Saved {} configs to {:?}", lines.len(), output_path);
            } else {
                for line in lines {
                    println!("{}", line);
                }
            }
        }
        Some(Commands::Validate { ref input }) => {
            let content = fs::read_to_string(input)
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let configs = ConfigExtractor::extract(&content);
            let pipeline = Pipeline::from_config(pipeline_config(&cli)?)?;
            let report = pipeline.validate(configs).await?;
            println!(
                "Results: {} valid, {} rejected",
                report.records.len(),
                report.rejected_total()
            );
        }
    }

    Ok(())
}

fn pipeline_config(cli: &Cli) -> Result<PipelineConfig> {
    let label_policy: LabelPolicy = cli.label_policy.parse().map_err(|e: String| anyhow!(e))?;
    let fetcher = FetcherConfig::new()
        .with_timeout(Duration::from_secs(cli.timeout))
        .with_max_retries(cli.retries)
        .with_url_template(cli.url_template.clone());

    let mut geo = GeoConfig::new()
        .with_api_url(cli.geo_url.clone())
        .with_timeout(Duration::from_secs(cli.timeout));
    if let Some(path) = &cli.mmdb {
        geo = geo.with_mmdb_path(path.clone());
    }

    Ok(PipelineConfig {
        scraper: ScraperConfig::new()
            .with_concurrency(cli.scrape_workers)
            .with_source_timeout(fetcher.deadline()),
        fetcher,
        validator: ValidatorConfig::new()
            .with_concurrency(cli.validate_workers)
            .with_probe_timeout(Duration::from_secs(cli.probe_timeout))
            .with_dns_timeout(Duration::from_secs(cli.timeout.min(5)))
            .with_max_latency_ms(cli.max_latency)
            .with_label_policy(label_policy),
        geo,
        output: OutputConfig::new()
            .with_raw_dir(cli.raw_dir.clone())
            .with_validated_dir(cli.validated_dir.clone()),
        probe: parse_probe_backend(&cli.probe, &cli.probe_program, &cli.probe_args)?,
    })
}

fn parse_probe_backend(s: &str, program: &str, args: &[String]) -> Result<ProbeBackend> {
    match s.to_lowercase().as_str() {
        "command" => Ok(ProbeBackend::Command {
            program: program.to_string(),
            args: args.to_vec(),
        }),
        "tcp" => Ok(ProbeBackend::Tcp),
        _ => Err(anyhow!("Invalid probe backend: {}. Use: command, tcp", s)),
    }
}

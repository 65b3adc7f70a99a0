use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tagnav_core::discovery::{connect, list_ports};
use tagnav_core::events::{NavEvent, NavObserver, TracingObserver};
use tagnav_core::mapping::{LoadOutcome, MappingStore};
use tagnav_core::reader::DEFAULT_READ_TIMEOUT;
use tagnav_core::tag::uid_hex;
use tagnav_core::writer::{BatchProgress, DEFAULT_TAG_WAIT, PageTagWriter};
use tagnav_core::{
    NavigationSession, Pn532, SerialTransport, SessionConfig, Strategy, Transport, UdpEmitter,
    run_console,
};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "NFC page navigation over a PN532 reader", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch for page tags and send navigation events
    Run(RunArgs),
    /// Write one page marker to a tag
    Write {
        #[command(flatten)]
        reader: ReaderArgs,
        /// Page number to write
        #[arg(long)]
        page: u32,
        /// Total pages of the document
        #[arg(long, default_value_t = 10)]
        pages: u32,
        /// Seconds to wait for a tag
        #[arg(long, default_value_t = DEFAULT_TAG_WAIT.as_secs())]
        timeout: u64,
    },
    /// Write page markers 1..N, one tag per page
    WriteAll {
        #[command(flatten)]
        reader: ReaderArgs,
        /// Total pages of the document
        #[arg(long, default_value_t = 10)]
        pages: u32,
        /// Seconds to wait for each tag
        #[arg(long, default_value_t = DEFAULT_TAG_WAIT.as_secs())]
        timeout: u64,
    },
    /// Read the page marker of a tag
    Read {
        #[command(flatten)]
        reader: ReaderArgs,
        /// Total pages of the document
        #[arg(long, default_value_t = 10)]
        pages: u32,
        /// Seconds to wait for a tag
        #[arg(long, default_value_t = DEFAULT_TAG_WAIT.as_secs())]
        timeout: u64,
    },
    /// List serial ports
    Ports,
}

#[derive(Args, Debug)]
struct ReaderArgs {
    /// Serial port of the reader (discovered when omitted)
    #[arg(long)]
    port: Option<String>,

    /// Baud rate
    #[arg(long, default_value_t = 115_200)]
    baud: u32,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Serial port of the reader (discovered when omitted)
    #[arg(long)]
    port: Option<String>,

    /// Baud rate
    #[arg(long)]
    baud: Option<u32>,

    /// Total pages of the document
    #[arg(long)]
    pages: Option<u32>,

    /// Viewer address (host:port)
    #[arg(long)]
    udp: Option<String>,

    /// Mapping file
    #[arg(long)]
    mappings: Option<PathBuf>,

    /// Tag selection strategy (closest, newest, specific, first)
    #[arg(long)]
    strategy: Option<String>,

    /// Tags detected per poll (1 or 2)
    #[arg(long)]
    max_tags: Option<u8>,

    /// Do not map unknown tags from their content
    #[arg(long)]
    no_auto_map: bool,

    /// Write the effective configuration to this file and exit
    #[arg(long)]
    save_config: Option<PathBuf>,
}

impl RunArgs {
    fn into_config(self) -> Result<(SessionConfig, Option<PathBuf>)> {
        let mut config = match &self.config {
            Some(path) => SessionConfig::load_from_file(path)?,
            None => SessionConfig::default(),
        };
        if self.port.is_some() {
            config.port = self.port;
        }
        if let Some(baud) = self.baud {
            config.baud_rate = baud;
        }
        if let Some(pages) = self.pages {
            config.total_pages = pages;
        }
        if let Some(udp) = self.udp {
            config.udp_target = udp;
        }
        if let Some(path) = self.mappings {
            config.mapping_file = path;
        }
        if let Some(name) = self.strategy {
            config.strategy = Strategy::from_name(&name);
        }
        if let Some(max_tags) = self.max_tags {
            config.max_tags = max_tags;
        }
        if self.no_auto_map {
            config.auto_map = false;
        }
        Ok((config.validate()?, self.save_config))
    }
}

/// Prints operator messages to stdout. Only events without a console
/// rendering, and the debug-level detection detail, go to the log.
struct ConsoleObserver {
    log: TracingObserver,
}

impl ConsoleObserver {
    fn forwards_to_log(event: &NavEvent) -> bool {
        matches!(event, NavEvent::Log { .. } | NavEvent::TagsDetected { .. })
    }
}

impl NavObserver for ConsoleObserver {
    fn on_event(&self, event: &NavEvent) {
        match event {
            NavEvent::Started {
                total_pages,
                max_tags,
                strategy,
            } => {
                println!(
                    "Page navigation ready: {} pages, up to {} tags, strategy {}",
                    total_pages, max_tags, strategy
                );
                println!("Commands: learn, mappings, stats, strategy, history, help, quit");
            }
            NavEvent::TagsDetected { tags } => {
                println!("{} tags detected:", tags.len());
                for (i, tag) in tags.iter().enumerate() {
                    println!("  {}. {}", i + 1, tag);
                }
            }
            NavEvent::Navigated { page, uid, total_tags } => {
                if *total_tags > 1 {
                    println!("Tag {} -> page {} (selected from {} tags)", uid, page, total_tags);
                } else {
                    println!("Tag {} -> page {}", uid, page);
                }
            }
            NavEvent::AutoMapped { page, uid } => println!("Auto-mapped {} -> page {}", uid, page),
            NavEvent::UnknownTag { uid } => {
                println!("Unknown tag {}. Map it with: add_mapping {} <page>", uid, uid);
            }
            NavEvent::LearningStarted { .. } => {
                println!("Learning mode: touch each page's tag in order. Waiting for page 1");
                println!("Type 'stop_learning' to finish early");
            }
            NavEvent::LearningProgress { page, uid, next_page } => {
                println!("Page {} <- {}. Next: page {}", page, uid, next_page);
            }
            NavEvent::LearningDuplicate { uid, page } => {
                println!("Tag {} is already page {}; use another tag", uid, page);
            }
            NavEvent::LearningComplete { total_pages } => {
                println!("Learning complete: {} pages configured", total_pages)
            }
            NavEvent::LearningStopped { .. } => println!("Learning mode ended"),
            NavEvent::MappingAdded { page, uid } => println!("Mapped page {} <- {}", page, uid),
            NavEvent::MappingRemoved {
                page,
                uid: Some(uid),
            } => println!("Removed page {} ({})", page, uid),
            NavEvent::MappingRemoved { page, uid: None } => {
                println!("Page {} has no mapping", page)
            }
            NavEvent::StrategyChanged { strategy } => println!("Strategy: {}", strategy),
            NavEvent::Report { title, body } => {
                println!("=== {} ===", title);
                print!("{}", body);
            }
            NavEvent::Stopped => println!("Navigation stopped"),
            NavEvent::ReaderReady { port, firmware } => {
                println!("Reader {} on {}", firmware, port)
            }
            NavEvent::Log { .. } => {}
        }
        if Self::forwards_to_log(event) {
            self.log.on_event(event);
        }
    }
}

fn init_tracing(verbose: bool) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber failed")
}

fn run(args: RunArgs) -> Result<()> {
    let (config, save_to) = args.into_config()?;
    if let Some(path) = save_to {
        config.save_to_file(&path)?;
        info!(path = %path.display(), "Configuration saved");
        return Ok(());
    }

    let observer = Arc::new(ConsoleObserver { log: TracingObserver });

    let mut mappings = MappingStore::new(config.total_pages, &config.mapping_file);
    match mappings.load() {
        Ok(LoadOutcome::Loaded { stored_total_pages: Some(stored), .. }) => {
            println!(
                "Mapping file was made for {} pages; now using {}",
                stored, config.total_pages
            );
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Starting with empty mappings"),
    }

    let (reader, firmware) = connect(
        config.port.as_deref(),
        config.baud_rate,
        config.read_timeout(),
    )?;
    observer.on_event(&NavEvent::ReaderReady {
        port: reader.transport().port_name().to_string(),
        firmware: firmware.to_string(),
    });

    let sink = UdpEmitter::bind(config.udp_target.clone()).context("Failed to open UDP socket")?;
    info!(udp = %sink.target(), "Sending navigation events");

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || r.store(false, Ordering::SeqCst))
        .context("Failed to install Ctrl-C handler")?;

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        if let Err(e) = run_console(io::stdin().lock(), io::stdout(), tx) {
            warn!(error = %e, "Console stopped");
        }
    });

    let mut session = NavigationSession::with_observer(config, reader, sink, mappings, observer);
    session.run(&rx, &running)
}

fn open_writer(reader: &ReaderArgs) -> Result<PageTagWriter<Pn532<SerialTransport>>> {
    let (pn532, firmware) = connect(reader.port.as_deref(), reader.baud, DEFAULT_READ_TIMEOUT)?;
    info!(firmware = %firmware, "Reader ready");
    Ok(PageTagWriter::new(pn532))
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.verbose) {
        eprintln!("{:#}", e);
        std::process::exit(1);
    }

    let result = match cli.command {
        Command::Run(args) => run(args),
        Command::Write {
            reader,
            page,
            pages,
            timeout,
        } => open_writer(&reader).and_then(|mut writer| {
            println!("Present the tag for page {}...", page);
            let written = writer.write_page(page, pages, Duration::from_secs(timeout), None)?;
            println!("Page {} written to tag {}", written.page, written.uid);
            Ok(())
        }),
        Command::WriteAll {
            reader,
            pages,
            timeout,
        } => open_writer(&reader).and_then(|mut writer| {
            let wait = Duration::from_secs(timeout);
            let report = writer.write_all(pages, wait, |progress| match progress {
                BatchProgress::Waiting { page, total_pages } => {
                    println!("[{}/{}] Present the tag for page {}...", page, total_pages, page)
                }
                BatchProgress::Written(tag) => println!("  page {} -> {}", tag.page, tag.uid),
                BatchProgress::Failed { page, reason } => {
                    println!("  page {} failed: {}", page, reason)
                }
            })?;
            println!("Written: {}/{}", report.written.len(), pages);
            if !report.failed.is_empty() {
                println!("Failed pages: {:?}; rerun `write --page N` for each", report.failed);
            }
            Ok(())
        }),
        Command::Read {
            reader,
            pages,
            timeout,
        } => open_writer(&reader).and_then(|mut writer| {
            println!("Present a tag...");
            let content = writer.read_page(Duration::from_secs(timeout), pages)?;
            println!("Tag: {}", content.uid);
            println!("Block 4: {}", uid_hex(&content.block));
            match (content.page, content.marker) {
                (Some(page), Some(marker)) => {
                    println!("Page {} of {} ({})", page, marker.total_pages, marker.text)
                }
                (Some(page), None) => println!("Page {}", page),
                (None, _) => println!("No page marker"),
            }
            Ok(())
        }),
        Command::Ports => list_ports().map(|ports| {
            if ports.is_empty() {
                println!("No serial ports found");
            }
            for port in ports {
                let mark = if port.is_bridge { "*" } else { " " };
                println!("{} {:<20} {}", mark, port.name, port.description);
            }
        }),
    };

    if let Err(e) = result {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

//! tailwatch CLI
//!
//! Watches a descriptor root and prints every event as one JSON object per
//! line on stdout. Diagnostics go to stderr through `tracing`.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tailwatch::{
    InstanceSubscriber, JsonObject, LiveSessionSubscriber, Scheduler, StateSubscriber, WatchConfig,
    WatchResult, WorldLogSubscriber,
};

/// CLI options
struct Options {
    /// Overrides `root_dir` from the config
    root: Option<PathBuf>,
    /// JSON config override file
    config: Option<PathBuf>,
    /// Subscriber interval
    interval: Duration,
    /// Skip live-session tailing
    no_live: bool,
    /// Stop after this long; run forever when absent
    duration: Option<Duration>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            root: None,
            config: None,
            interval: Duration::from_millis(100),
            no_live: false,
            duration: None,
        }
    }
}

fn value_of(args: &[String], i: usize, flag: &str) -> String {
    if let Some(value) = args.get(i + 1) {
        return value.clone();
    }
    eprintln!("error: {flag} requires a value");
    std::process::exit(1);
}

fn parse_millis(raw: &str, flag: &str) -> u64 {
    raw.parse().unwrap_or_else(|_| {
        eprintln!("error: invalid value for {flag}: {raw}");
        std::process::exit(1);
    })
}

fn parse_args() -> Options {
    let args: Vec<String> = std::env::args().collect();
    let mut options = Options::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--root" | "-r" => {
                options.root = Some(PathBuf::from(value_of(&args, i, "--root")));
                i += 2;
            }
            "--config" | "-c" => {
                options.config = Some(PathBuf::from(value_of(&args, i, "--config")));
                i += 2;
            }
            "--interval" | "-i" => {
                let raw = value_of(&args, i, "--interval");
                options.interval = Duration::from_millis(parse_millis(&raw, "--interval"));
                i += 2;
            }
            "--duration" | "-d" => {
                let raw = value_of(&args, i, "--duration");
                options.duration = Some(Duration::from_millis(parse_millis(&raw, "--duration")));
                i += 2;
            }
            "--no-live" => {
                options.no_live = true;
                i += 1;
            }
            "--help" | "-h" => {
                println!("tailwatch - watch game instances and print their events as JSON lines");
                println!();
                println!("USAGE:");
                println!("    tailwatch [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    -r, --root <DIR>          Descriptor root [default: platform data dir]");
                println!("    -c, --config <FILE>       JSON config override");
                println!("    -i, --interval <MS>       Poll interval [default: 100]");
                println!("    -d, --duration <MS>       Stop after this many milliseconds");
                println!("        --no-live             Do not tail live-session logs");
                println!("    -h, --help                Print help information");
                std::process::exit(0);
            }
            arg => {
                eprintln!("error: unknown argument: {arg}");
                std::process::exit(1);
            }
        }
    }

    options
}

/// Writes each event as one line, never interleaving two events.
struct JsonLinePrinter {
    out: Mutex<io::Stdout>,
}

impl JsonLinePrinter {
    fn emit(&self, event: &Value) {
        let mut out = self.out.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Err(e) = writeln!(out, "{event}").and_then(|()| out.flush()) {
            tracing::error!(error = %e, "failed to write event");
        }
    }
}

impl InstanceSubscriber for JsonLinePrinter {
    fn on_new_instance(&self, instance: &JsonObject, is_new: bool) {
        self.emit(&json!({"event": "instance", "instance": instance, "is_new": is_new}));
    }

    fn on_instance_closed(&self, instance: &JsonObject) {
        self.emit(&json!({"event": "instance_closed", "instance": instance}));
    }
}

impl StateSubscriber for JsonLinePrinter {
    fn on_state_change(&self, instance: &JsonObject, state: &JsonObject) {
        self.emit(&json!({"event": "state", "instance": instance, "state": state}));
    }
}

impl WorldLogSubscriber for JsonLinePrinter {
    fn on_world_log_entry(&self, instance: &JsonObject, entry: &JsonObject, is_new: bool) {
        self.emit(&json!({"event": "world_log", "instance": instance, "entry": entry, "is_new": is_new}));
    }
}

impl LiveSessionSubscriber for JsonLinePrinter {
    fn on_live_session_entry(&self, instance: &JsonObject, world_path: &Path, line: &[u8]) {
        self.emit(&json!({
            "event": "live_session",
            "instance": instance,
            "world": world_path.display().to_string(),
            "len": line.len(),
            "line": String::from_utf8_lossy(line),
        }));
    }
}

fn load_config(options: &Options) -> WatchConfig {
    let mut config = match options.config.as_deref() {
        Some(path) => WatchConfig::from_json_file(path).unwrap_or_else(|e| {
            eprintln!("error: {e}");
            std::process::exit(1);
        }),
        None => WatchConfig::default(),
    };
    if let Some(root) = options.root.clone() {
        config.root_dir = root;
    }
    config
}

fn register(scheduler: &mut Scheduler, printer: &Arc<JsonLinePrinter>, options: &Options) -> WatchResult<()> {
    scheduler.subscribe_instances(printer.clone(), options.interval, None)?;
    scheduler.subscribe_state(printer.clone(), options.interval, None)?;
    scheduler.subscribe_world_log(printer.clone(), options.interval, None)?;
    if !options.no_live {
        scheduler.subscribe_live_session(printer.clone(), options.interval, None)?;
    }
    Ok(())
}

fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tailwatch=info")))
        .init();

    let options = parse_args();
    let config = load_config(&options);
    tracing::info!(root = %config.root_dir.display(), "watching");

    let printer = Arc::new(JsonLinePrinter {
        out: Mutex::new(io::stdout()),
    });
    let mut scheduler = Scheduler::new(config);
    if let Err(e) = register(&mut scheduler, &printer, &options).and_then(|()| scheduler.start()) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }

    match options.duration {
        Some(duration) => {
            thread::sleep(duration);
            if !scheduler.stop() {
                tracing::warn!("scheduler did not stop cleanly");
            }
        }
        None => loop {
            thread::sleep(Duration::from_secs(1));
            if scheduler.has_stopped() {
                tracing::error!("scheduler stopped unexpectedly");
                std::process::exit(1);
            }
        },
    }
}

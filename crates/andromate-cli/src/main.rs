//! Command line front end for Android automation via andromate.
//!
//! Every command runs one operation against the device (through `adb`), the
//! intercepting proxy or the OCR helpers, then exits.
//!
//! # Usage
//!
//! ```bash
//! # Tap a view by resource id
//! andromate tap login_button
//!
//! # Tap by visible text, waiting up to 10s for it to appear
//! andromate tap "Sign in" --by text --wait 10
//!
//! # Tap at coordinates
//! andromate tap-location 100 200
//!
//! # Swipe up from the center of a list
//! andromate swipe up --from feed_list
//!
//! # Identifiable views on screen, or the full tree
//! andromate dump
//! andromate dump --full -f json
//!
//! # Wait for an activity after launching
//! andromate launch com.example.app
//! andromate wait-activity MainActivity -t 10
//!
//! # Proxy control
//! andromate proxy clear
//! andromate proxy throttle 512
//! andromate proxy first-entry /api/login --newest
//!
//! # Tap a character found by OCR
//! andromate ocr locate K screen.png --tap
//!
//! # Target a specific device
//! andromate -s emulator-5554 home
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use andromate_core::adb::AdbError;
use andromate_core::config::{config_path, AndromateConfig, ConfigError};
use andromate_core::device::{Device, Direction};
use andromate_core::element::{Point, ViewNode, BOUNDS, CONTENT_DESC, RESOURCE_ID, TEXT};
use andromate_core::hierarchy::Selector;
use andromate_core::ocr::{self, OcrElement, OcrError, Tesseract};
use andromate_core::proxy::{self, ProxyControl, ProxyError};
use base64::Engine;
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// CLI for Android device, proxy and OCR automation.
#[derive(Parser)]
#[command(name = "andromate")]
#[command(about = "Drive an Android device, an intercepting proxy and OCR lookups")]
#[command(version)]
struct Cli {
    /// Config file to use instead of ~/.andromate/config.json
    #[arg(short, long, env = "ANDROMATE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Device serial, overriding the config
    #[arg(short, long, env = "ANDROID_SERIAL", global = true)]
    serial: Option<String>,

    /// Output format: text or json
    #[arg(short, long, default_value = "text", global = true)]
    format: OutputFormat,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log verbosity: -v info, -vv debug, -vvv trace
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum Toggle {
    On,
    Off,
}

impl Toggle {
    fn enabled(self) -> bool {
        self == Toggle::On
    }
}

#[derive(Subcommand)]
enum Command {
    /// Print the identifiable views on screen
    Dump {
        /// Print the whole hierarchy (XML in text mode, a JSON tree in json mode)
        #[arg(long)]
        full: bool,
    },

    /// Find the first view whose attribute contains a value
    Find {
        value: String,
        /// Attribute to match: id, desc or text
        #[arg(short, long, default_value = "id")]
        by: Selector,
    },

    /// Tap a view
    Tap {
        value: String,
        /// Attribute to match: id, desc or text
        #[arg(short, long, default_value = "id")]
        by: Selector,
        /// Wait up to this many seconds for the view first
        #[arg(short, long)]
        wait: Option<u64>,
    },

    /// Tap at screen coordinates
    TapLocation { x: i32, y: i32 },

    /// Long press a view
    LongPress {
        value: String,
        /// Attribute to match: id, desc or text
        #[arg(short, long, default_value = "id")]
        by: Selector,
    },

    /// Swipe in a direction
    Swipe {
        /// up, down, left or right
        direction: Direction,
        /// Start at the center of the view with this resource id
        #[arg(long)]
        from: Option<String>,
        /// Distance in pixels
        #[arg(short, long)]
        delta: Option<i32>,
    },

    /// Press back
    Back,
    /// Press home
    Home,
    /// Press enter
    Enter,
    /// Press power
    Power,
    /// Lock the screen
    Lock,
    /// Unlock a device without a secure lock screen
    Unlock,
    /// Open the recent apps overview
    Overview,
    /// Return to the most recent app from the overview
    LatestApp,

    /// Type text into the focused field
    Text { value: String },

    /// Print the text of a view
    GetText { res_id: String },

    /// Wait for a view to appear
    WaitFor {
        value: String,
        /// Attribute to match: id, desc or text
        #[arg(short, long, default_value = "id")]
        by: Selector,
        /// Timeout in seconds
        #[arg(short, long, default_value = "5")]
        timeout: u64,
    },

    /// Wait for an activity to come to the foreground
    WaitActivity {
        activity: String,
        /// Timeout in seconds
        #[arg(short, long, default_value = "5")]
        timeout: u64,
    },

    /// Wait for a view to show some text
    WaitText {
        res_id: String,
        text: String,
        /// Timeout in seconds
        #[arg(short, long, default_value = "5")]
        timeout: u64,
    },

    /// Accept the runtime permission prompt
    AcceptPermission {
        /// Timeout in seconds
        #[arg(short, long, default_value = "5")]
        timeout: u64,
    },

    /// Launch an app
    Launch {
        package: String,
        /// Activity to start instead of the launcher intent
        #[arg(short, long)]
        activity: Option<String>,
    },

    /// Force-stop an app
    Stop { package: String },

    /// Clear an app's data
    Clear { package: String },

    /// Install an APK
    Install { apk: PathBuf },

    /// Uninstall a package
    Uninstall { package: String },

    /// Open a deep link
    Deeplink {
        url: String,
        /// Activity expected to open
        #[arg(short, long)]
        activity: Option<String>,
    },

    /// Print the foreground package and activity
    CurrentApp,

    /// Print the screen size
    ScreenSize,

    /// Print the display height
    DisplayHeight,

    /// Print the device API level
    ApiLevel,

    /// Print a message and write it to the device log
    Log { message: String },

    /// Print the device log
    Logcat {
        /// Clear the log instead
        #[arg(long)]
        clear: bool,
    },

    /// Capture a screenshot (base64-encoded PNG unless --output is given)
    Screenshot {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List files in a debuggable app's data directory
    Ls {
        package: String,
        /// Directory relative to the app's data directory
        path: Option<String>,
    },

    /// Set or toggle airplane mode
    Airplane { state: Option<Toggle> },

    /// Control the intercepting proxy
    #[command(subcommand)]
    Proxy(ProxyCommand),

    /// Character lookup on screenshots
    #[command(subcommand)]
    Ocr(OcrCommand),

    /// Print the effective configuration
    Config {
        /// Write the configuration file if it does not exist
        #[arg(long)]
        init: bool,
    },
}

#[derive(Subcommand)]
enum ProxyCommand {
    /// Print the recorded session
    Session,
    /// Clear the recorded session
    Clear,
    /// Enable or disable map-local
    MapLocal { state: Toggle },
    /// Activate throttling with a configured preset
    Throttle {
        /// Preset key; reuses the last preset if omitted
        preset: Option<String>,
        /// Deactivate throttling
        #[arg(long, conflicts_with = "preset")]
        off: bool,
    },
    /// Disable rewrite rules
    RewriteOff,
    /// Kill and restart the proxy application
    Launch {
        /// Proxy configuration file to start with
        #[arg(long)]
        proxy_config: Option<PathBuf>,
    },
    /// Kill the proxy application
    Kill,
    /// Print the first recorded request with a path
    FirstEntry {
        path: String,
        /// Search from the most recent request
        #[arg(long)]
        newest: bool,
    },
    /// Check whether a request was recorded
    HasRequest {
        /// Path substring to look for
        #[arg(long, required_unless_present = "host", conflicts_with = "host")]
        path: Option<String>,
        /// Exact host to look for
        #[arg(long)]
        host: Option<String>,
    },
    /// Point map-local destinations in a config directory at a new root
    RewriteRoots { dir: PathBuf, new_root: String },
}

#[derive(Subcommand)]
enum OcrCommand {
    /// Print every recognised character box
    Boxes {
        #[command(flatten)]
        source: OcrSource,
    },
    /// Print the tap point for a character
    Locate {
        ch: String,
        #[command(flatten)]
        source: OcrSource,
        /// Tap the character on the device
        #[arg(long)]
        tap: bool,
    },
}

#[derive(Args)]
struct OcrSource {
    /// Screenshot to run through tesseract
    #[arg(required_unless_present = "boxes_file")]
    image: Option<PathBuf>,
    /// Read tesseract box output from a file instead
    #[arg(long, conflicts_with = "image")]
    boxes_file: Option<PathBuf>,
    /// Display height for the y flip; queried from the device if omitted
    #[arg(long)]
    height: Option<i32>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_file.as_deref());

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(e.code())
        }
    }
}

fn init_logging(verbose: u8, log_file: Option<&Path>) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("andromate_core=info,andromate=info"),
        2 => EnvFilter::new("andromate_core=debug,andromate=debug"),
        _ => EnvFilter::new("andromate_core=trace,andromate=trace"),
    };

    match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("andromate.log"));
            let appender = tracing_appender::rolling::never(dir, name);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(appender)
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

#[derive(Debug)]
enum CliError {
    ActionFailed(String),
    External(String),
    Malformed(String),
}

impl CliError {
    fn code(&self) -> u8 {
        match self {
            CliError::ActionFailed(_) => 1,
            CliError::External(_) => 2,
            CliError::Malformed(_) => 3,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::ActionFailed(msg) => write!(f, "Action failed: {}", msg),
            CliError::External(msg) => write!(f, "External tool error: {}", msg),
            CliError::Malformed(msg) => write!(f, "Malformed response: {}", msg),
        }
    }
}

impl From<AdbError> for CliError {
    fn from(e: AdbError) -> Self {
        let message = e.to_string();
        match e {
            AdbError::ViewNotFound { .. } | AdbError::PermissionPromptMissing => CliError::ActionFailed(message),
            AdbError::MalformedResponse(_) | AdbError::Bounds(_) => CliError::Malformed(message),
            AdbError::CommandFailed { .. } | AdbError::NotInstalled | AdbError::Io(_) => {
                CliError::External(message)
            }
        }
    }
}

impl From<ProxyError> for CliError {
    fn from(e: ProxyError) -> Self {
        let message = e.to_string();
        match e {
            ProxyError::UnknownPreset(_) => CliError::ActionFailed(message),
            ProxyError::MalformedResponse(_) => CliError::Malformed(message),
            ProxyError::Http(_) | ProxyError::Status { .. } | ProxyError::Io(_) => CliError::External(message),
        }
    }
}

impl From<OcrError> for CliError {
    fn from(e: OcrError) -> Self {
        match e {
            OcrError::Device(inner) => CliError::from(inner),
            OcrError::MalformedLine { .. } => CliError::Malformed(e.to_string()),
            OcrError::NotInstalled | OcrError::CommandFailed(_) | OcrError::Io(_) => CliError::External(e.to_string()),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::External(e.to_string())
    }
}

fn view_not_found(selector: Selector, value: &str) -> CliError {
    AdbError::ViewNotFound {
        selector,
        value: value.to_string(),
    }
    .into()
}

/// Loaded configuration and output settings shared by every command.
struct Ctx {
    config: AndromateConfig,
    format: OutputFormat,
    quiet: bool,
}

impl Ctx {
    fn json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    fn device(&self) -> Device {
        Device::from_config(self.config.clone())
    }

    fn proxy(&self) -> Result<ProxyControl, CliError> {
        Ok(ProxyControl::new(self.config.proxy.clone())?)
    }

    /// Reports a completed action: a JSON object, or a status line on stderr.
    fn done(&self, action: &str, target: &str, started: Instant) -> Result<(), CliError> {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        if self.json() {
            return print_json(&json!({
                "success": true,
                "action": action,
                "target": target,
                "elapsed_ms": elapsed_ms,
            }));
        }
        if !self.quiet {
            let now = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3fZ");
            eprintln!("|{}|{}|{}|{}ms|", now, action, target, elapsed_ms);
        }
        Ok(())
    }

    /// Prints a query result.
    fn value(&self, text: impl fmt::Display, value: Value) -> Result<(), CliError> {
        if self.json() {
            print_json(&value)
        } else {
            println!("{}", text);
            Ok(())
        }
    }
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let text = serde_json::to_string_pretty(value).map_err(|e| CliError::Malformed(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, CliError> {
    serde_json::to_value(value).map_err(|e| CliError::Malformed(e.to_string()))
}

fn run(cli: Cli) -> Result<(), CliError> {
    if let Command::Config { init } = cli.command {
        return show_config(&cli, init);
    }

    let mut config = match &cli.config {
        Some(path) => AndromateConfig::load_from(path)?,
        None => AndromateConfig::load(),
    };
    if let Some(serial) = &cli.serial {
        config.serial = Some(serial.clone());
    }
    debug!(adb = %config.adb_path, serial = ?config.serial, "configuration loaded");

    let ctx = Ctx {
        config,
        format: cli.format,
        quiet: cli.quiet,
    };

    match cli.command {
        Command::Proxy(command) => run_proxy(&ctx, command),
        Command::Ocr(command) => run_ocr(&ctx, command),
        // Handled before the configuration is loaded
        Command::Config { .. } => unreachable!(),
        command => run_device(&ctx, command),
    }
}

fn show_config(cli: &Cli, init: bool) -> Result<(), CliError> {
    let path = cli.config.clone().unwrap_or_else(config_path);
    let exists = path.exists();
    let config = if exists || (cli.config.is_some() && !init) {
        AndromateConfig::load_from(&path)?
    } else {
        AndromateConfig::default()
    };

    if init && !exists {
        config
            .save_to(&path)
            .map_err(|e| CliError::External(format!("writing {}: {}", path.display(), e)))?;
        if !cli.quiet {
            eprintln!("Wrote {}", path.display());
        }
    }

    if cli.format == OutputFormat::Json {
        print_json(&json!({ "path": path, "config": to_json(&config)? }))
    } else {
        let text = serde_json::to_string_pretty(&config).map_err(|e| CliError::Malformed(e.to_string()))?;
        println!("{}", text);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Device commands
// ---------------------------------------------------------------------------

fn run_device(ctx: &Ctx, command: Command) -> Result<(), CliError> {
    let device = ctx.device();
    let started = Instant::now();

    match command {
        Command::Dump { full } => {
            if full && !ctx.json() {
                println!("{}", device.view_hierarchy_xml()?);
                return Ok(());
            }
            let hierarchy = device.view_hierarchy()?;
            if full {
                return print_json(&to_json(&hierarchy)?);
            }
            let views = hierarchy.identifiable();
            if ctx.json() {
                let concise: Vec<Value> = views.iter().map(|v| concise_json(v)).collect();
                print_json(&Value::Array(concise))?;
            } else {
                for view in &views {
                    println!("{}", describe(view));
                }
            }
            if !ctx.quiet {
                eprintln!("{} views", views.len());
            }
            Ok(())
        }
        Command::Find { value, by } => match device.find_view(by, &value)? {
            Some(view) => ctx.value(describe(&view), concise_json(&view)),
            None => Err(view_not_found(by, &value)),
        },
        Command::Tap { value, by, wait } => {
            if let Some(secs) = wait {
                if !device.wait_for(by, &value, Duration::from_secs(secs)) {
                    return Err(view_not_found(by, &value));
                }
            }
            if !device.tap_view_by(by, &value)? {
                return Err(view_not_found(by, &value));
            }
            ctx.done("tap", &format!("{}={}", by, value), started)
        }
        Command::TapLocation { x, y } => {
            let point = device.tap(Some(Point::new(x, y)))?;
            ctx.done("tap-location", &point.to_string(), started)
        }
        Command::LongPress { value, by } => {
            let view = device
                .find_view(by, &value)?
                .ok_or_else(|| view_not_found(by, &value))?;
            if !device.long_press_view(&view)? {
                return Err(view_not_found(by, &value));
            }
            ctx.done("long-press", &format!("{}={}", by, value), started)
        }
        Command::Swipe { direction, from, delta } => {
            device.swipe(direction, from.as_deref(), delta)?;
            ctx.done("swipe", &direction.to_string(), started)
        }
        Command::Back => {
            device.back()?;
            ctx.done("back", "", started)
        }
        Command::Home => {
            device.home()?;
            ctx.done("home", "", started)
        }
        Command::Enter => {
            device.enter()?;
            ctx.done("enter", "", started)
        }
        Command::Power => {
            device.power()?;
            ctx.done("power", "", started)
        }
        Command::Lock => {
            device.lock()?;
            ctx.done("lock", "", started)
        }
        Command::Unlock => {
            device.unlock()?;
            ctx.done("unlock", "", started)
        }
        Command::Overview => {
            device.overview()?;
            ctx.done("overview", "", started)
        }
        Command::LatestApp => {
            device.latest_app_in_overview()?;
            ctx.done("latest-app", "", started)
        }
        Command::Text { value } => {
            device.input_text(&value)?;
            ctx.done("text", &value, started)
        }
        Command::GetText { res_id } => match device.get_text_from_view(&res_id)? {
            Some(text) => ctx.value(&text, json!({ "id": res_id, "text": text })),
            None => Err(view_not_found(Selector::ResourceId, &res_id)),
        },
        Command::WaitFor { value, by, timeout } => {
            if !device.wait_for(by, &value, Duration::from_secs(timeout)) {
                return Err(CliError::ActionFailed(format!(
                    "timed out after {}s waiting for {} '{}'",
                    timeout, by, value
                )));
            }
            ctx.done("wait-for", &format!("{}={}", by, value), started)
        }
        Command::WaitActivity { activity, timeout } => {
            if !device.wait_for_activity(&activity, Duration::from_secs(timeout)) {
                return Err(CliError::ActionFailed(format!(
                    "timed out after {}s waiting for activity '{}'",
                    timeout, activity
                )));
            }
            ctx.done("wait-activity", &activity, started)
        }
        Command::WaitText { res_id, text, timeout } => {
            if !device.wait_for_text(&res_id, &text, Duration::from_secs(timeout)) {
                return Err(CliError::ActionFailed(format!(
                    "timed out after {}s waiting for '{}' in {}",
                    timeout, text, res_id
                )));
            }
            ctx.done("wait-text", &res_id, started)
        }
        Command::AcceptPermission { timeout } => {
            device.accept_permission(Duration::from_secs(timeout))?;
            ctx.done("accept-permission", "", started)
        }
        Command::Launch { package, activity } => {
            device.launch(&package, activity.as_deref())?;
            ctx.done("launch", &package, started)
        }
        Command::Stop { package } => {
            device.stop(&package)?;
            ctx.done("stop", &package, started)
        }
        Command::Clear { package } => {
            device.clear(&package)?;
            ctx.done("clear", &package, started)
        }
        Command::Install { apk } => {
            device.install(&apk)?;
            ctx.done("install", &apk.display().to_string(), started)
        }
        Command::Uninstall { package } => {
            let removed = device.uninstall(&package)?;
            if !removed && !ctx.quiet && !ctx.json() {
                eprintln!("{} was not uninstalled", package);
            }
            ctx.done("uninstall", &package, started)
        }
        Command::Deeplink { url, activity } => {
            if !device.launch_deeplink(&url, activity.as_deref())? {
                return Err(CliError::ActionFailed(format!(
                    "activity '{}' did not open for {}",
                    activity.unwrap_or_default(),
                    url
                )));
            }
            ctx.done("deeplink", &url, started)
        }
        Command::CurrentApp => {
            let top = device.top_activity()?;
            ctx.value(format!("{} {}", top.package, top.activity), to_json(&top)?)
        }
        Command::ScreenSize => {
            let size = device.screen_size()?;
            ctx.value(format!("{}x{}", size.width, size.height), to_json(&size)?)
        }
        Command::DisplayHeight => {
            let height = device.display_height()?;
            ctx.value(height, json!({ "height": height }))
        }
        Command::ApiLevel => {
            let level = device.api_level()?;
            ctx.value(level, json!({ "api_level": level }))
        }
        Command::Log { message } => {
            device.log(&message)?;
            Ok(())
        }
        Command::Logcat { clear } => {
            if clear {
                device.clear_logcat()?;
                return ctx.done("logcat-clear", "", started);
            }
            let log = device.logcat()?;
            ctx.value(&log, json!({ "logcat": log }))
        }
        Command::Screenshot { output } => match output {
            Some(path) => {
                device.save_screenshot(&path)?;
                ctx.done("screenshot", &path.display().to_string(), started)
            }
            None => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(device.screenshot()?);
                ctx.value(&encoded, json!({ "screenshot": encoded }))
            }
        },
        Command::Ls { package, path } => {
            let entries = device.ls(&package, path.as_deref().unwrap_or_default())?;
            ctx.value(entries.join("\n"), json!({ "entries": entries }))
        }
        Command::Airplane { state } => {
            let enabled = device.airplane_mode(state.map(Toggle::enabled))?;
            let label = if enabled { "on" } else { "off" };
            ctx.value(label, json!({ "airplane_mode": enabled }))
        }
        Command::Proxy(_) | Command::Ocr(_) | Command::Config { .. } => unreachable!(),
    }
}

/// One-line summary: `[class] id "text" desc="..." @bounds`.
fn describe(view: &ViewNode) -> String {
    fn non_empty(v: Option<&str>) -> Option<&str> {
        v.filter(|s| !s.is_empty())
    }
    let mut parts = vec![format!("[{}]", view.attr("class").unwrap_or("View"))];
    if let Some(id) = non_empty(view.resource_id()) {
        parts.push(id.to_string());
    }
    if let Some(text) = non_empty(view.text()) {
        parts.push(format!("\"{}\"", text));
    }
    if let Some(desc) = non_empty(view.content_desc()) {
        parts.push(format!("desc=\"{}\"", desc));
    }
    if let Some(bounds) = view.attr(BOUNDS) {
        parts.push(format!("@{}", bounds));
    }
    parts.join(" ")
}

/// The identifying attributes of a view, without empty values.
fn concise_json(view: &ViewNode) -> Value {
    let mut map = serde_json::Map::new();
    for (key, name) in [
        ("class", "class"),
        (RESOURCE_ID, "id"),
        (TEXT, "text"),
        (CONTENT_DESC, "desc"),
        (BOUNDS, "bounds"),
    ] {
        if let Some(value) = view.attr(key).filter(|s| !s.is_empty()) {
            map.insert(name.into(), Value::String(value.to_string()));
        }
    }
    Value::Object(map)
}

// ---------------------------------------------------------------------------
// Proxy commands
// ---------------------------------------------------------------------------

fn run_proxy(ctx: &Ctx, command: ProxyCommand) -> Result<(), CliError> {
    let started = Instant::now();

    match command {
        ProxyCommand::Session => {
            let session = ctx.proxy()?.session()?;
            if ctx.json() {
                return print_json(&to_json(&session)?);
            }
            for entry in &session {
                println!(
                    "{} {}{}",
                    entry.method.as_deref().unwrap_or("-"),
                    entry.host,
                    entry.path
                );
            }
            if !ctx.quiet {
                eprintln!("{} requests", session.len());
            }
            Ok(())
        }
        ProxyCommand::Clear => {
            ctx.proxy()?.clear_session()?;
            ctx.done("proxy-clear", "", started)
        }
        ProxyCommand::MapLocal { state } => {
            let proxy = ctx.proxy()?;
            if state.enabled() {
                proxy.enable_local_mapping()?;
            } else {
                proxy.disable_local_mapping()?;
            }
            ctx.done("map-local", if state.enabled() { "on" } else { "off" }, started)
        }
        ProxyCommand::Throttle { preset, off } => {
            let proxy = ctx.proxy()?;
            if off {
                proxy.disable_throttling()?;
                return ctx.done("throttle", "off", started);
            }
            proxy.enable_throttling(preset.as_deref())?;
            ctx.done("throttle", preset.as_deref().unwrap_or("last"), started)
        }
        ProxyCommand::RewriteOff => {
            ctx.proxy()?.disable_rewrite()?;
            ctx.done("rewrite-off", "", started)
        }
        ProxyCommand::Launch { proxy_config } => {
            let child = ctx.proxy()?.launch(proxy_config.as_deref())?;
            ctx.value(child.id(), json!({ "pid": child.id() }))
        }
        ProxyCommand::Kill => {
            ctx.proxy()?.kill()?;
            ctx.done("proxy-kill", "", started)
        }
        ProxyCommand::FirstEntry { path, newest } => match ctx.proxy()?.first_entry_in_session(&path, newest)? {
            Some(entry) => print_json(&to_json(&entry)?),
            None => Err(CliError::ActionFailed(format!("no request to {}", path))),
        },
        ProxyCommand::HasRequest { path, host } => {
            let proxy = ctx.proxy()?;
            let (found, target) = match (path, host) {
                (Some(path), _) => (proxy.has_request_to_path(&path)?, path),
                (None, Some(host)) => (proxy.has_request_to_host(&host)?, host),
                (None, None) => return Err(CliError::ActionFailed("--path or --host is required".to_string())),
            };
            if !found {
                return Err(CliError::ActionFailed(format!("no request to {}", target)));
            }
            ctx.value(true, json!({ "found": true, "target": target }))
        }
        ProxyCommand::RewriteRoots { dir, new_root } => {
            let changed = proxy::rewrite_mapping_roots(&dir, &new_root)?;
            ctx.value(changed, json!({ "changed": changed }))
        }
    }
}

// ---------------------------------------------------------------------------
// OCR commands
// ---------------------------------------------------------------------------

fn load_elements(ctx: &Ctx, source: &OcrSource) -> Result<Vec<OcrElement>, CliError> {
    let raw = match (&source.boxes_file, &source.image) {
        (Some(file), _) => std::fs::read_to_string(file)
            .map_err(|e| CliError::External(format!("reading {}: {}", file.display(), e)))?,
        (None, Some(image)) => Tesseract::from_config(&ctx.config).image_to_boxes(image)?,
        (None, None) => return Err(CliError::ActionFailed("an image or --boxes-file is required".to_string())),
    };
    let height = match source.height {
        Some(height) => height,
        None => ctx.device().display_height()?,
    };
    Ok(ocr::parse_boxes(&raw, height)?)
}

fn element_json(element: &OcrElement) -> Value {
    json!({
        "char": element.ch,
        "bottom_left": element.bottom_left,
        "top_right": element.top_right,
        "center": element.center(),
    })
}

fn run_ocr(ctx: &Ctx, command: OcrCommand) -> Result<(), CliError> {
    match command {
        OcrCommand::Boxes { source } => {
            let elements = load_elements(ctx, &source)?;
            if ctx.json() {
                return print_json(&Value::Array(elements.iter().map(element_json).collect()));
            }
            for element in &elements {
                println!("{} {} {}", element.ch, element.bottom_left, element.top_right);
            }
            Ok(())
        }
        OcrCommand::Locate { ch, source, tap } => {
            let elements = load_elements(ctx, &source)?;
            let point = ocr::tap_point_for_char(&elements, &ch)
                .ok_or_else(|| CliError::ActionFailed(format!("character '{}' not found", ch)))?;
            if tap {
                ctx.device().tap(Some(point))?;
            }
            ctx.value(
                format!("{} {}", point.x, point.y),
                json!({ "char": ch, "x": point.x, "y": point.y, "tapped": tap }),
            )
        }
    }
}

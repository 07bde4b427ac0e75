//! CLI command implementations.

use crate::config::Settings;
use crate::host::DirectoryHost;
use colored::Colorize;
use futures_util::{SinkExt, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use pixsync_core::TickScheduler;
use pixsync_server::protocol::{GET_IMAGES, SYNC_TEXTURE};
use pixsync_server::{Envelope, LoggingObserver, StartOutcome, StopOutcome};
use pixsync_watcher::Bridge;
use serde_json::{json, Value};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;
type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Longest the owner loop sleeps before checking the console again.
const IDLE_WAIT: Duration = Duration::from_millis(50);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_ID: i64 = 1;

/// Initialize pixsync in a directory.
pub fn init(path: &Path) -> Result<()> {
    if Settings::path(path).exists() {
        println!("{} Already initialized", "✓".green());
        return Ok(());
    }

    let written = Settings::default().save(path)?;

    println!("{} Initialized pixsync in {}", "✓".green(), path.display());
    println!("  Settings: {}", written.display().to_string().dimmed());
    println!("  Run {} to start the bridge", "pixsync serve".cyan());

    Ok(())
}

/// Serve a directory of images to connected peers.
pub async fn serve(
    path: &Path,
    port: Option<u16>,
    host: Option<String>,
    no_autostart: bool,
) -> Result<()> {
    let mut settings = Settings::load(path)?;
    if let Some(port) = port {
        settings.port = port;
    }
    if let Some(host) = host {
        settings.host = host;
    }
    let autostart = settings.autostart && !no_autostart;

    println!(
        "{} {}",
        "Serving".cyan(),
        path.display().to_string().bold()
    );

    let (console_tx, console_rx) = mpsc::channel();
    spawn_console(console_tx.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = console_tx.send(ConsoleCommand::Quit);
        }
    });

    // The bridge is tied to the thread that created it, so the whole owner
    // loop lives on one blocking thread.
    let root = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        run_owner_loop(root, settings, autostart, console_rx).map_err(|e| e.to_string())
    })
    .await??;

    println!("{} Bye", "✓".green());
    Ok(())
}

/// Commands accepted on stdin while serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConsoleCommand {
    Start,
    Stop,
    Status,
    Help,
    Quit,
}

impl ConsoleCommand {
    fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "start" => Some(Self::Start),
            "stop" => Some(Self::Stop),
            "status" => Some(Self::Status),
            "help" | "?" => Some(Self::Help),
            "quit" | "exit" | "q" => Some(Self::Quit),
            _ => None,
        }
    }
}

fn spawn_console(tx: Sender<ConsoleCommand>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            match ConsoleCommand::parse(&line) {
                Some(command) => {
                    if tx.send(command).is_err() {
                        break;
                    }
                }
                None => println!(
                    "{} Unknown command '{}', try {}",
                    "?".yellow(),
                    line.trim(),
                    "help".cyan()
                ),
            }
        }
    });
}

fn run_owner_loop(
    root: PathBuf,
    settings: Settings,
    autostart: bool,
    console: Receiver<ConsoleCommand>,
) -> Result<()> {
    let host = Rc::new(DirectoryHost::new(&root)?);
    println!("  Images: {}", host.root().display().to_string().dimmed());

    let mut bridge = Bridge::new(
        settings.bridge_config(),
        settings.server_config()?,
        host,
        Arc::new(LoggingObserver),
    );
    let mut scheduler = TickScheduler::new();
    bridge.attach(&mut scheduler)?;

    if autostart {
        start_server(&bridge);
    }
    print_help();

    loop {
        scheduler.run_due(Instant::now());

        let wait = scheduler
            .next_due()
            .map(|due| due.saturating_duration_since(Instant::now()))
            .unwrap_or(IDLE_WAIT)
            .min(IDLE_WAIT);

        match console.recv_timeout(wait) {
            Ok(ConsoleCommand::Quit) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(ConsoleCommand::Start) => start_server(&bridge),
            Ok(ConsoleCommand::Stop) => stop_server(&bridge),
            Ok(ConsoleCommand::Status) => print_status(&bridge),
            Ok(ConsoleCommand::Help) => print_help(),
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    println!("{}", "Shutting down...".cyan());
    bridge.shutdown(&mut scheduler)?;
    Ok(())
}

fn start_server(bridge: &Bridge) {
    match bridge.start() {
        Ok(StartOutcome::Started(addr)) => {
            println!("{} Listening on ws://{}", "✓".green(), addr)
        }
        Ok(StartOutcome::AlreadyRunning) => println!("{} Server already running", "•".cyan()),
        Err(e) => eprintln!("{} Failed to start server: {}", "✗".red(), e),
    }
}

fn stop_server(bridge: &Bridge) {
    match bridge.stop() {
        Ok(StopOutcome::Stopped) => println!("{} Server stopped", "✓".green()),
        Ok(StopOutcome::AlreadyStopped) => println!("{} Server already stopped", "•".cyan()),
        Err(e) => eprintln!("{} {}", "✗".red(), e),
    }
}

fn print_status(bridge: &Bridge) {
    let status = bridge.status();
    let state = if status.running {
        "running".green()
    } else {
        "stopped".yellow()
    };

    println!("{}", "pixsync status".cyan().bold());
    println!("  {} {}", "State:".dimmed(), state);
    if let Some(addr) = bridge.server().local_addr() {
        println!("  {} ws://{}", "Address:".dimmed(), addr);
    }
    println!("  {} {}", "Clients:".dimmed(), status.client_count);
}

fn print_help() {
    println!(
        "  Commands: {}, {}, {}, {} ({} also quits)",
        "start".cyan(),
        "stop".cyan(),
        "status".cyan(),
        "quit".cyan(),
        "Ctrl+C".cyan()
    );
}

/// List the images a running bridge serves.
pub async fn inventory(addr: &str) -> Result<()> {
    let mut socket = connect(addr).await?;
    let reply = request(
        &mut socket,
        Envelope::reply(GET_IMAGES, Value::Null, REQUEST_ID),
    )
    .await?;
    let _ = socket.close(None).await;

    let images = reply.data.as_array().cloned().unwrap_or_default();
    if images.is_empty() {
        println!("No images");
        return Ok(());
    }

    println!("Found {} images:\n", images.len());
    for image in images {
        let name = image["name"].as_str().unwrap_or("?");
        let size = format!("{}x{}", image["size"][0], image["size"][1]);
        let path = image["path"].as_str().unwrap_or("");
        println!(
            "  {} {} {}",
            name.cyan(),
            size.yellow(),
            path.dimmed()
        );
    }

    Ok(())
}

/// Ask a running bridge to ingest `file` as `image`.
pub async fn sync(image: &str, file: &Path, addr: &str) -> Result<()> {
    let file_path = std::fs::canonicalize(file)
        .map_err(|e| format!("Cannot read {}: {}", file.display(), e))?;

    let mut socket = connect(addr).await?;
    let message = Envelope::reply(
        SYNC_TEXTURE,
        json!({ "image": image, "file_path": file_path }),
        REQUEST_ID,
    );
    let reply = request(&mut socket, message).await?;
    let _ = socket.close(None).await;

    if reply.data["success"].as_bool().unwrap_or(false) {
        println!(
            "{} Synced {} ({}x{})",
            "✓".green(),
            image.cyan(),
            reply.data["size"][0],
            reply.data["size"][1]
        );
        Ok(())
    } else {
        let error = reply.data["error"].as_str().unwrap_or("unknown error");
        Err(format!("Sync of {} failed: {}", image, error).into())
    }
}

async fn connect(addr: &str) -> Result<Socket> {
    let url = format!("ws://{}", addr);
    let (socket, _) = connect_async(url.as_str())
        .await
        .map_err(|e| format!("Cannot reach {}: {}", url, e))?;
    Ok(socket)
}

/// Sends `message` and waits for the response carrying its request id.
/// Pushes arriving in the meantime are skipped.
async fn request(socket: &mut Socket, message: Envelope) -> Result<Envelope> {
    let request_id = message.request_id;
    socket.send(Message::Text(message.to_frame()?)).await?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner.set_message(format!("Waiting for {}...", message.kind));

    let wait = async {
        while let Some(frame) = socket.next().await {
            if let Message::Text(text) = frame? {
                match serde_json::from_str::<Envelope>(&text) {
                    Ok(reply) if reply.request_id == request_id => return Ok(Some(reply)),
                    Ok(push) => tracing::debug!("Skipping {} push", push.kind),
                    Err(_) => tracing::debug!("Skipping non-envelope frame"),
                }
            }
        }
        Ok::<_, tokio_tungstenite::tungstenite::Error>(None)
    };
    let outcome = tokio::time::timeout(RESPONSE_TIMEOUT, wait).await;
    spinner.finish_and_clear();

    match outcome {
        Ok(Ok(Some(reply))) => Ok(reply),
        Ok(Ok(None)) => Err("Server closed the connection".into()),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(format!("No response within {:?}", RESPONSE_TIMEOUT).into()),
    }
}

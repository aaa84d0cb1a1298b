mod clipboard;
mod core;
mod stdio;

use player_proto::config::Config;
use player_proto::protocol::Notification;
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const USAGE: &str = "usage: altplayer [--use-system-deps] [PATH...]";

/// A custom tracing layer that forwards warnings and errors to the renderer
/// as `Notification::Log`.
struct NotificationLayer {
    sender: broadcast::Sender<Notification>,
}

impl NotificationLayer {
    fn new(sender: broadcast::Sender<Notification>) -> Self {
        Self { sender }
    }
}

impl<S> tracing_subscriber::Layer<S> for NotificationLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut body = String::new();
        let mut visitor = MessageVisitor(&mut body);
        event.record(&mut visitor);

        // no receivers is fine
        let _ = self.sender.send(Notification::Log {
            message: format_log_line(chrono::Local::now(), level, &body),
        });
    }
}

fn format_log_line<Tz: chrono::TimeZone>(
    at: chrono::DateTime<Tz>,
    level: &tracing::Level,
    body: &str,
) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("{} [{}] {}", at.format("%H:%M:%S"), level, body)
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

#[derive(Debug, Default, PartialEq)]
struct Args {
    use_system_deps: bool,
    help: bool,
    paths: Vec<PathBuf>,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Args {
    let mut parsed = Args::default();
    for arg in args {
        match arg.as_str() {
            "--use-system-deps" => parsed.use_system_deps = true,
            "-h" | "--help" => parsed.help = true,
            _ => parsed.paths.push(PathBuf::from(arg)),
        }
    }
    parsed
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args(std::env::args().skip(1));
    if args.help {
        println!("{}", USAGE);
        return Ok(());
    }

    // Setup broadcast channel first so we can use it for logging
    let (broadcast_tx, _) = broadcast::channel::<Notification>(256);

    let config = Config::load()?;
    if args.use_system_deps || config.transcoder.use_system_deps {
        player_proto::platform::set_use_system_deps(true);
    }

    let log_path = config.daemon.log_file.clone();
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // stdout carries the protocol, so logs only go to the file and the renderer
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(NotificationLayer::new(broadcast_tx.clone()))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,altplayer=debug,player_core=debug")
            }),
        )
        .init();

    info!("Log file: {:?}", log_path);
    info!("Config loaded from: {:?}", Config::config_path());

    // all external inputs funnel into DaemonCore
    let (event_tx, event_rx) = tokio::sync::mpsc::channel::<core::DaemonEvent>(256);

    let daemon_core =
        core::DaemonCore::new(&config, args.paths, broadcast_tx.clone(), event_tx.clone());

    // subscribe before the core emits Hello
    let _stdio_handle = stdio::start(
        daemon_core.release_handle(),
        event_tx.clone(),
        broadcast_tx.subscribe(),
    );

    info!("Daemon initialised, running event loop");
    daemon_core.run(event_rx).await?;

    Ok(())
}

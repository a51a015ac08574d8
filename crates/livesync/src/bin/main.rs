use clap::Parser;
use livesync::{Config, HttpEventSource, LiveClient};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Follow a live event's questions and chat in real time", long_about = None)]
struct Args {
    /// Config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Slug of the event to load before connecting
    #[arg(short, long)]
    event: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = Config::from_file(&args.config)?;
    info!("Starting livesync watcher");
    info!("Channel: {}", config.connection.channel);

    let source = HttpEventSource::new(&config.api)?;
    let mut client = LiveClient::from_config(&config)?;
    let store = client.store().clone();

    let events = store.load_events(&source).await?;
    info!("{} events known", events.len());

    if let Some(slug) = args.event.as_deref() {
        let event = store.load_event(&source, slug).await?;
        let questions = store.load_questions(&source).await?;
        let messages = store.load_messages(&source).await?;
        info!(
            "Watching \"{}\": {} questions, {} messages",
            event.title,
            questions.len(),
            messages.len()
        );
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down..."),
            Err(e) => error!("Unable to listen for Ctrl+C: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    client.run(shutdown_rx).await;

    let state = store.read().await;
    if let Some(event) = state.event() {
        for question in state.questions() {
            info!("[{}] {}", question.stats.score, question.text);
        }
        info!("{} chat messages in {}", state.messages().len(), event.title);
    }

    info!("Shutdown complete");
    Ok(())
}

use anyhow::{Context, bail};
use bluebubbles_sync::api::ApiClient;
use bluebubbles_sync::app::{self, Settings};
use bluebubbles_sync::storage::ChatCache;
use bluebubbles_sync::sync::{ActivityEvent, ChatSync, Scheduler, SyncEvent, Syncer};
use bluebubbles_sync::utils::unix_now_secs;
use clap::Parser;
use log::{error, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// Poll a BlueBubbles server and print chat/message changes as they arrive.
///
/// While running, every line typed on stdin counts as user activity.
/// `r` forces a refresh, `s <text>` sends to the first tracked chat, `q` quits.
#[derive(Parser, Debug)]
#[command(name = "bb-sync", author, version, about)]
struct Args {
    /// Settings file (defaults to <config dir>/bb-sync.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server URL, overrides the settings file
    #[arg(long)]
    server: Option<String>,

    /// Server password, overrides the settings file
    #[arg(long)]
    password: Option<String>,

    /// Also poll messages for this chat guid (repeatable)
    #[arg(long = "chat")]
    chats: Vec<String>,

    /// Run a single reconciliation cycle and exit
    #[arg(long)]
    once: bool,

    /// Do not read or write the chat cache
    #[arg(long)]
    no_cache: bool,

    #[arg(short, long)]
    verbose: bool,
}

fn print_event(event: &SyncEvent) {
    match event {
        SyncEvent::Chats(changes) => {
            for chat in &changes.added {
                println!("+ {} [{}] {}", chat.name, chat.id, chat.last_message);
            }
            for chat in &changes.updated {
                let unread = if chat.unread_count > 0 {
                    format!(" ({} unread)", chat.unread_count)
                } else {
                    String::new()
                };
                println!("~ {}{}: {}", chat.name, unread, chat.last_message);
            }
            for id in &changes.removed {
                println!("- {id}");
            }
        }
        SyncEvent::Messages { chat_id, messages } => {
            println!("== {chat_id}");
            for msg in messages {
                let who = if msg.from_me { "me" } else { "them" };
                let status = msg.status.map(|s| format!(" [{s}]")).unwrap_or_default();
                println!("  {who}: {}{status}", msg.text);
            }
        }
    }
}

/// Wait for in-flight sends so their placeholders resolve before shutdown.
async fn drain_sends(sends: &mut JoinSet<()>) {
    while let Some(joined) = sends.join_next().await {
        if let Err(err) = joined {
            warn!("send task ended abnormally: {err}");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut settings = match &args.config {
        Some(path) => app::load_from_path(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => Settings::load().context("reading settings")?,
    };
    if let Some(server) = args.server {
        settings.base_url = server;
    }
    if let Some(password) = args.password {
        settings.password = password;
    }
    if !settings.is_configured() {
        bail!("no server configured: pass --server and --password or fill in the settings file");
    }

    let client = ApiClient::new(&settings.base_url, &settings.password)?
        .with_token(settings.token.clone());

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let mut chat_sync = ChatSync::new(client, settings.sync).with_events(events_tx);
    if !args.no_cache {
        match ChatCache::open_default() {
            Ok(cache) => chat_sync = chat_sync.with_cache(cache)?,
            Err(err) => warn!("chat cache unavailable, continuing without it: {err}"),
        }
    }
    for chat_id in &args.chats {
        chat_sync.track(chat_id);
    }
    let chat_sync = Arc::new(chat_sync);

    if args.once {
        chat_sync.sync().await?;
        while let Ok(event) = events_rx.try_recv() {
            print_event(&event);
        }
        return Ok(());
    }

    let scheduler = Scheduler::start(settings.sync.scheduler_config(), Arc::clone(&chat_sync));
    let activity = scheduler.activity_reporter();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut sends = JoinSet::new();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some(event) = events_rx.recv() => print_event(&event),
            Some(_) = sends.join_next(), if !sends.is_empty() => {}
            line = stdin.next_line() => {
                let Ok(Some(line)) = line else { break };
                activity.report(ActivityEvent::KeyPress);
                let line = line.trim();
                match line {
                    "q" => break,
                    "r" => scheduler.force_sync(),
                    _ => {
                        if let Some(text) = line.strip_prefix("s ") {
                            let Some(chat_id) = args.chats.first() else {
                                warn!("no chat tracked, pass --chat to send");
                                continue;
                            };
                            let sync = Arc::clone(&chat_sync);
                            let chat_id = chat_id.clone();
                            let text = text.to_string();
                            sends.spawn(async move {
                                if let Err(err) = sync.send_text(&chat_id, &text, unix_now_secs()).await {
                                    error!("send failed: {err}");
                                }
                            });
                        }
                    }
                }
            }
        }
    }

    drain_sends(&mut sends).await;
    while let Ok(event) = events_rx.try_recv() {
        print_event(&event);
    }
    scheduler.stop().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn send_that_panics() {
        panic!("send task blew up");
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_pending_sends() {
        let done = Arc::new(AtomicUsize::new(0));
        let mut sends = JoinSet::new();
        for delay in [10, 250] {
            let done = Arc::clone(&done);
            sends.spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        sends.spawn(send_that_panics());

        drain_sends(&mut sends).await;
        assert_eq!(done.load(Ordering::SeqCst), 2);
        assert!(sends.is_empty());
    }
}

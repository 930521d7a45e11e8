use clap::{Parser, Subcommand};
use estate_client::api::models::{Id, UserId};
use estate_client::config::{AppConfig, Concern};
use estate_client::payment::{complete_payment, PaymentBridgeMessage};
use estate_client::realtime::connection::{socket_url_builder, CHAT_SOCKET_PATH, NOTIFICATIONS_SOCKET_PATH};
use estate_client::realtime::{
    notifications, threads, FavoriteBook, NotificationReducer, Reconciler, ThreadReducer,
    UnreadSlot, UnreadStore, WsPushChannel,
};
use estate_client::{utils, ApiClient, DeviceStore, Result, Session};
use log::{error, info, warn};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "estate-client", about = "Command-line front-end for the listing marketplace client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Set the server address and the signed-in user's id
    Configure {
        #[arg(long)]
        base_url: String,
        #[arg(long)]
        ws_base_url: Option<String>,
        #[arg(long)]
        user_id: Option<String>,
    },
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    Logout,
    /// List conversation threads once
    Threads,
    /// Mark every unread message from a user as read
    MarkRead { counterpart: String },
    Notifications {
        #[arg(long)]
        mark_all_read: bool,
    },
    /// Keep threads and notifications live and print unread counts until Ctrl-C
    Watch,
    /// Like or unlike a property
    Favorite { property: String },
    Search { query: String },
    Recent {
        #[arg(long)]
        clear: bool,
    },
    /// Complete a subscription payment from the payment page's result message
    PayResult {
        message: String,
        #[arg(long)]
        plan: String,
    },
}

struct Ctx {
    cfg: AppConfig,
    store: Arc<DeviceStore>,
    api: Arc<ApiClient>,
}

impl Ctx {
    fn open() -> Result<Self> {
        let cfg = AppConfig::load();
        let store = Arc::new(DeviceStore::open_default()?);
        let api = Arc::new(ApiClient::from_config(&cfg, store.clone())?);
        Ok(Self { cfg, store, api })
    }

    fn session(&self) -> Session {
        Session::new(self.store.clone(), self.api.clone())
    }

    async fn viewer(&self) -> Result<UserId> {
        if let Some(id) = self.cfg.user_id.as_deref().filter(|s| !s.is_empty()) {
            return Ok(Id::from(id));
        }
        Ok(self.api.profile().await?.id)
    }

    async fn threads(&self) -> Result<Reconciler<ThreadReducer>> {
        Ok(Reconciler::new(
            "threads",
            ThreadReducer::new(self.viewer().await?),
            self.api.clone(),
            Arc::new(WsPushChannel),
            self.store.clone(),
        ))
    }

    fn notifications(&self) -> Reconciler<NotificationReducer> {
        Reconciler::new(
            "notifications",
            NotificationReducer,
            self.api.clone(),
            Arc::new(WsPushChannel),
            self.store.clone(),
        )
    }
}

async fn run(command: Command) -> Result<()> {
    let command = match command {
        Command::Configure { base_url, ws_base_url, user_id } => {
            let mut cfg = AppConfig::load();
            cfg.base_url = utils::normalize_url(&base_url);
            cfg.ws_base_url = ws_base_url;
            cfg.user_id = user_id;
            cfg.save()?;
            info!("Saved configuration for {}", cfg.base_url);
            return Ok(());
        }
        other => other,
    };

    let ctx = Ctx::open()?;
    let session = ctx.session();

    match command {
        // Needs no server context; dealt with above.
        Command::Configure { .. } => {}
        Command::Login { email, password } => session.login(&email, &password).await?,
        Command::Logout => session.logout()?,
        Command::Threads => {
            let threads = ctx.threads().await?;
            session.with_auth_retry(|| threads.poll_now()).await?;
            for (_, t) in threads.entries() {
                let marker = if t.is_unread() { "*" } else { " " };
                println!(
                    "{} {:<24} {}  {}",
                    marker,
                    t.counterpart_name,
                    t.last_timestamp.format("%Y-%m-%d %H:%M"),
                    t.preview
                );
            }
            println!("{} unread", threads.aggregate());
        }
        Command::MarkRead { counterpart } => {
            let inbox = ctx.threads().await?;
            session.with_auth_retry(|| inbox.poll_now()).await?;
            let n = threads::mark_thread_read(&inbox, &ctx.api, &Id::from(counterpart.as_str())).await?;
            println!("Marked {} messages as read", n);
        }
        Command::Notifications { mark_all_read } => {
            let notes = ctx.notifications();
            session.with_auth_retry(|| notes.poll_now()).await?;
            if mark_all_read {
                let n = notifications::mark_all_read(&notes, &ctx.api).await?;
                println!("Marked {} notifications as read", n);
            }
            for (_, n) in notes.entries() {
                let marker = if n.is_read { " " } else { "*" };
                println!("{} {}  {}", marker, n.timestamp.format("%Y-%m-%d %H:%M"), n.body);
            }
            println!("{} unread", notes.aggregate());
        }
        Command::Watch => {
            let threads = ctx.threads().await?;
            let notes = ctx.notifications();
            let unread = Arc::new(UnreadStore::new());
            unread.bind(&threads, UnreadSlot::Messages);
            unread.bind(&notes, UnreadSlot::Notifications);

            let ws_base = ctx.cfg.ws_base()?;
            threads.start(
                ctx.cfg.poll_schedule(Concern::Threads),
                socket_url_builder(ws_base.clone(), CHAT_SOCKET_PATH),
            );
            notes.start(
                ctx.cfg.poll_schedule(Concern::Notifications),
                socket_url_builder(ws_base, NOTIFICATIONS_SOCKET_PATH),
            );

            let mut rx = unread.watch();
            loop {
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let c = *rx.borrow_and_update();
                        println!("messages: {}  notifications: {}", c.messages, c.notifications);
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            threads.stop();
            notes.stop();
        }
        Command::Favorite { property } => {
            let book = FavoriteBook::new();
            book.refresh(ctx.api.as_ref()).await?;
            let liked = book.toggle(ctx.api.as_ref(), &Id::from(property.as_str())).await?;
            println!("{} {}", if liked { "Liked" } else { "Unliked" }, property);
        }
        Command::Search { query } => {
            let results = estate_client::search::search_listings(&ctx.api, &ctx.store, &query).await?;
            for p in results {
                println!("{:>6}  {}  {}", p.id, p.title, p.location.unwrap_or_default());
            }
        }
        Command::Recent { clear } => {
            if clear {
                ctx.store.clear_recent_searches()?;
            }
            for q in ctx.store.recent_searches()? {
                println!("{}", q);
            }
        }
        Command::PayResult { message, plan } => {
            let outcome = PaymentBridgeMessage::parse(&message)?.outcome()?;
            match complete_payment(ctx.api.as_ref(), outcome, &Id::from(plan.as_str())).await? {
                Some(sub) => println!("Subscription active: {}", sub.is_active),
                None => println!("Payment cancelled"),
            }
        }
    }
    Ok(())
}

/// Drops stored credentials after an auth failure. Failures are logged, not fatal.
fn forget_tokens(store: Result<DeviceStore>) {
    match store.and_then(|s| s.clear_tokens()) {
        Ok(()) => {}
        Err(err) => warn!("Could not clear stored tokens: {}", err),
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    if let Err(e) = utils::block_on(run(cli.command)) {
        error!("{}", e);
        if e.is_auth() {
            forget_tokens(DeviceStore::open_default());
            eprintln!("{} Run `estate-client login` to continue.", e.user_message());
        } else {
            eprintln!("{}", e.user_message());
        }
        std::process::exit(1);
    }
}

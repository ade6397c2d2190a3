use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tally_core::RecordId;
use tally_sync::{FirebaseAuth, FirestoreStore, LedgerView, Session};

mod auth;
mod config;
mod render;
mod state;

use config::Config;

const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(
    name = "tally",
    version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("TALLY_BUILD_SHA"), ")"),
    about = "Personal expense tracker synced to a Firestore ledger"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a default ~/.tally/config.toml
    InitConfig,

    /// Create an account and sign in
    Signup {
        #[arg(long)]
        email: Option<String>,
    },

    /// Sign in with email and password
    Login {
        #[arg(long)]
        email: Option<String>,
    },

    /// Forget the saved session
    Logout,

    /// Add an expense dated today
    Add {
        name: String,
        amount: String,

        /// Food, Rent, Travel or Others (default: Food)
        #[arg(long, short)]
        category: Option<String>,
    },

    /// Show every expense in the ledger
    List,

    /// Delete one expense by id
    Delete { id: String },

    /// Delete every expense
    Clear {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// Per-category totals
    Totals,

    /// Keep the ledger on screen and redraw on every change (Ctrl-C to stop)
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    match cli.command {
        Command::InitConfig => {
            config::init_config()?;
        }

        Command::Signup { email } => {
            auth::signup(&config::load_config()?, email).await?;
        }

        Command::Login { email } => {
            auth::login(&config::load_config()?, email).await?;
        }

        Command::Logout => {
            logout().await?;
        }

        Command::Add {
            name,
            amount,
            category,
        } => {
            let cfg = config::load_config()?;
            let session = open(&cfg).await?;
            let id = session
                .add_expense(&name, &amount, category.as_deref())
                .await
                .context("could not add expense")?;
            let view = settle(&session, |v| v.records.iter().any(|r| r.id == id)).await?;
            println!("Added {id}\n");
            print!("{}", render::totals_chart(&view.totals, &cfg.sync.currency));
        }

        Command::List => {
            let cfg = config::load_config()?;
            let session = open(&cfg).await?;
            print!("{}", render::ledger_table(&session.records(), &cfg.sync.currency));
        }

        Command::Delete { id } => {
            let cfg = config::load_config()?;
            let session = open(&cfg).await?;
            let id = RecordId::new(id);
            if !session.records().iter().any(|r| r.id == id) {
                println!("No expense with id {id}");
                return Ok(());
            }
            session
                .delete_expense(&id)
                .await
                .context("could not delete expense")?;
            settle(&session, |v| v.records.iter().all(|r| r.id != id)).await?;
            println!("Deleted {id}");
        }

        Command::Clear { yes } => {
            let cfg = config::load_config()?;
            let session = open(&cfg).await?;
            if session.records().is_empty() {
                println!("No expenses added yet.");
                return Ok(());
            }
            if !yes
                && !auth::confirm(
                    "Are you sure you want to clear all expenses? This cannot be undone.",
                )?
            {
                println!("Cancelled.");
                return Ok(());
            }
            let n = session.clear_all().await.context("could not clear expenses")?;
            settle(&session, |v| v.records.is_empty()).await?;
            println!("Deleted {n} expenses");
        }

        Command::Totals => {
            let cfg = config::load_config()?;
            let session = open(&cfg).await?;
            print!("{}", render::totals_chart(&session.totals(), &cfg.sync.currency));
        }

        Command::Watch => {
            let cfg = config::load_config()?;
            let session = open(&cfg).await?;
            watch(&session, &cfg.sync.currency).await?;
        }
    }

    Ok(())
}

/// Resume the saved login and attach its ledger, waiting for the first snapshot
async fn open(cfg: &Config) -> Result<Session> {
    let (firebase, user) = auth::resume(cfg).await?;
    let store = Arc::new(FirestoreStore::new(cfg.firestore()?, firebase.clone()));
    let session = Session::new(store, firebase).with_timezone(cfg.timezone()?);

    session
        .attach(&user.user_id)
        .await
        .context("could not open ledger")?;
    settle(&session, |v| !v.loading).await?;
    Ok(session)
}

/// Wait for a view matching `pred`; a channel error ends the wait early
async fn settle(session: &Session, mut pred: impl FnMut(&LedgerView) -> bool) -> Result<LedgerView> {
    let view = tokio::time::timeout(
        SNAPSHOT_TIMEOUT,
        session.wait_for(|v| v.error.is_some() || pred(v)),
    )
    .await
    .context("timed out waiting for the ledger")?;
    if let Some(e) = &view.error {
        bail!("ledger sync failed: {e}");
    }
    Ok(view)
}

async fn watch(session: &Session, currency: &str) -> Result<()> {
    let mut rx = session.watch();
    let mut view = rx.borrow_and_update().clone();
    loop {
        // clear screen, cursor home
        print!("\x1b[2J\x1b[H");
        println!("{} expenses\n", view.records.len());
        print!("{}", render::ledger_table(&view.records, currency));
        println!();
        print!("{}", render::totals_chart(&view.totals, currency));
        if let Some(e) = &view.error {
            bail!("ledger sync failed: {e}");
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                view = rx.borrow_and_update().clone();
            }
        }
    }
    Ok(())
}

async fn logout() -> Result<()> {
    let Some(saved) = state::read_session()? else {
        println!("Not signed in.");
        return Ok(());
    };
    let cfg = config::load_config()?;
    let firebase = Arc::new(FirebaseAuth::new(cfg.firebase.api_key.trim()));
    firebase.restore(saved.clone());
    let session = Session::new(
        Arc::new(FirestoreStore::new(cfg.firestore()?, firebase.clone())),
        firebase,
    );
    session.logout().await.context("sign out failed")?;
    state::clear_session()?;
    println!("Signed out {}", saved.email);
    Ok(())
}

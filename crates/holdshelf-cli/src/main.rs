//! holdshelf - library reservation desk.
//!
//! Every command loads the JSON data file, runs one operation against the
//! core and writes the file back if anything changed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use holdshelf_core::domain::{BookId, MemberId, ReservationId, ReservationStatus};
use holdshelf_core::impls::{InMemoryStore, StoreSnapshot};
use holdshelf_core::ports::{Clock, FixedClock, ReservationFilter, ReservationOrder, SystemClock};
use holdshelf_core::{
    ExpirationSweep, HoldshelfConfig, NewReservation, ReservationService, SweepLoop, SweepMode,
};

/// Reservation desk for a lending library.
#[derive(Parser)]
#[command(name = "holdshelf", about = "Library reservation queue")]
struct Cli {
    /// JSON data file holding members, books and reservations.
    #[arg(long, global = true, env = "HOLDSHELF_DATA", default_value = "holdshelf.json")]
    data: PathBuf,

    /// JSON config file (policy and sweep settings).
    #[arg(long, global = true, env = "HOLDSHELF_CONFIG")]
    config: Option<PathBuf>,

    /// Pin the clock to this instant (RFC 3339).
    #[arg(long, global = true, env = "HOLDSHELF_NOW")]
    now: Option<DateTime<Utc>>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage members.
    Member {
        #[command(subcommand)]
        command: MemberCommand,
    },

    /// Manage the catalog.
    Book {
        #[command(subcommand)]
        command: BookCommand,
    },

    /// Create a reservation.
    Reserve {
        #[arg(long)]
        member: MemberId,

        #[arg(long)]
        book: BookId,

        /// Create it Ready for pickup instead of Queued.
        #[arg(long)]
        ready: bool,

        /// Expiry (RFC 3339). Defaults to the policy's hold period.
        #[arg(long)]
        expires: Option<DateTime<Utc>>,
    },

    /// Cancel a reservation.
    Cancel { id: ReservationId },

    /// Mark a queued reservation ready for pickup.
    Ready { id: ReservationId },

    /// Promote the head of a book's queue, or the selected reservations.
    Promote {
        #[arg(long, conflicts_with = "reservation", required_unless_present = "reservation")]
        book: Option<BookId>,

        #[arg(long)]
        reservation: Vec<ReservationId>,
    },

    /// The holder returned the book: release it and promote the next in line.
    Return { book: BookId },

    /// Cancel expired reservations and refill ready slots.
    Sweep {
        /// Report what would happen without writing.
        #[arg(long, conflicts_with_all = ["verify", "only"])]
        dry_run: bool,

        /// Re-run at once and report whether the second pass was a no-op.
        #[arg(long, conflicts_with = "only")]
        verify: bool,

        /// Restrict to these reservations.
        #[arg(long)]
        only: Vec<ReservationId>,
    },

    /// Sweep periodically until interrupted.
    Watch {
        /// Seconds between sweeps. Overrides the config file.
        #[arg(long, env = "HOLDSHELF_SWEEP_INTERVAL")]
        interval: Option<u64>,
    },

    /// List reservations.
    List {
        #[arg(long, value_enum)]
        status: Vec<StatusArg>,

        #[arg(long)]
        member: Option<MemberId>,

        #[arg(long)]
        book: Option<BookId>,

        #[arg(long, value_enum, default_value_t = OrderArg::Created)]
        order: OrderArg,
    },

    /// Find reservations by member name, email, book title or author.
    Search { term: String },

    /// Books that can be picked up now.
    Available,

    /// Reservation counts, or per-member / per-book figures.
    Status {
        #[arg(long)]
        member: Option<MemberId>,

        #[arg(long)]
        book: Option<BookId>,
    },
}

#[derive(Subcommand)]
enum MemberCommand {
    Add {
        #[arg(long)]
        name: String,

        #[arg(long)]
        email: String,

        #[arg(long)]
        phone: Option<String>,
    },
}

#[derive(Subcommand)]
enum BookCommand {
    Add {
        #[arg(long)]
        title: String,

        #[arg(long)]
        author: String,

        #[arg(long)]
        isbn: String,

        /// Catalogue it as not on the shelf.
        #[arg(long)]
        unavailable: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum StatusArg {
    Queued,
    Ready,
    Cancelled,
}

impl From<StatusArg> for ReservationStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Queued => ReservationStatus::Queued,
            StatusArg::Ready => ReservationStatus::Ready,
            StatusArg::Cancelled => ReservationStatus::Cancelled,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum OrderArg {
    Created,
    Expires,
}

/// Wall clock, or the instant given with `--now`.
#[derive(Clone)]
enum DeskClock {
    System(SystemClock),
    Fixed(FixedClock),
}

impl Clock for DeskClock {
    fn now(&self) -> DateTime<Utc> {
        match self {
            DeskClock::System(clock) => clock.now(),
            DeskClock::Fixed(clock) => clock.now(),
        }
    }
}

type Service = ReservationService<InMemoryStore, DeskClock>;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "holdshelf=info,holdshelf_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => HoldshelfConfig::from_json_file(path)?,
        None => HoldshelfConfig::default(),
    };
    let clock = match cli.now {
        Some(at) => DeskClock::Fixed(FixedClock::new(at)),
        None => DeskClock::System(SystemClock),
    };
    let store = Arc::new(load_store(&cli.data)?);
    let service = Arc::new(ReservationService::new(
        Arc::clone(&store),
        clock,
        config.policy.clone(),
    ));

    let changed = run(cli.command, &service, &config).await?;
    if changed {
        save_store(&cli.data, &store)?;
    }
    Ok(())
}

/// Returns whether the data file needs writing back.
async fn run(command: Commands, service: &Arc<Service>, config: &HoldshelfConfig) -> Result<bool> {
    match command {
        Commands::Member {
            command: MemberCommand::Add { name, email, phone },
        } => {
            print_json(&service.register_member(&name, &email, phone.as_deref())?)?;
            Ok(true)
        }

        Commands::Book {
            command:
                BookCommand::Add {
                    title,
                    author,
                    isbn,
                    unavailable,
                },
        } => {
            print_json(&service.add_book(&title, &author, &isbn, !unavailable)?)?;
            Ok(true)
        }

        Commands::Reserve {
            member,
            book,
            ready,
            expires,
        } => {
            let mut request = if ready {
                NewReservation::ready(member, book)
            } else {
                NewReservation::queued(member, book)
            };
            if let Some(at) = expires {
                request = request.expires_at(at);
            }
            print_json(&service.create(request)?)?;
            Ok(true)
        }

        Commands::Cancel { id } => {
            print_json(&service.cancel(id)?)?;
            Ok(true)
        }

        Commands::Ready { id } => {
            print_json(&service.mark_ready(id)?)?;
            Ok(true)
        }

        Commands::Promote { book, reservation } => {
            let promoted = match book {
                Some(book) => service.promote_if_eligible(book)?.into_iter().collect(),
                None => service.promote_selected(&reservation)?,
            };
            print_json(&promoted)?;
            Ok(!promoted.is_empty())
        }

        Commands::Return { book } => {
            let outcome = service.return_book(book)?;
            print_json(&serde_json::json!({
                "released": outcome.released,
                "promoted": outcome.promoted,
            }))?;
            Ok(true)
        }

        Commands::Sweep {
            dry_run,
            verify,
            only,
        } => {
            if !only.is_empty() {
                let cancelled = service.cancel_expired_selected(&only)?;
                print_json(&serde_json::json!({ "cancelled": cancelled }))?;
                return Ok(cancelled > 0);
            }
            let sweep = ExpirationSweep::new(Arc::clone(service));
            let report = match (dry_run, verify) {
                (true, _) => sweep.run(SweepMode::DryRun)?,
                (false, true) => sweep.run_verified()?,
                (false, false) => sweep.run(SweepMode::Apply)?,
            };
            print_json(&report)?;
            Ok(!report.dry_run)
        }

        Commands::Watch { interval } => {
            let mut settings = config.sweep.clone();
            if let Some(secs) = interval {
                settings.interval_secs = secs;
            }
            let handle =
                SweepLoop::spawn(ExpirationSweep::new(Arc::clone(service)), settings.interval());
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for ctrl-c")?;
            tracing::info!("shutting down");
            handle.shutdown_and_join().await;
            Ok(true)
        }

        Commands::List {
            status,
            member,
            book,
            order,
        } => {
            let mut filter = ReservationFilter::new();
            if !status.is_empty() {
                filter = filter.statuses(status.into_iter().map(ReservationStatus::from));
            }
            if let Some(member) = member {
                filter = filter.member(member);
            }
            if let Some(book) = book {
                filter = filter.book(book);
            }
            let order = match order {
                OrderArg::Created => ReservationOrder::CreatedAt,
                OrderArg::Expires => ReservationOrder::ExpiresAt,
            };
            print_json(&service.reservations(&filter, order)?)?;
            Ok(false)
        }

        Commands::Search { term } => {
            print_json(&service.search_reservations(&term)?)?;
            Ok(false)
        }

        Commands::Available => {
            print_json(&service.available_books()?)?;
            Ok(false)
        }

        Commands::Status { member, book } => {
            let counts = service.counts()?;
            let mut status = serde_json::json!({ "counts": counts, "live": counts.live() });
            if let Some(member) = member {
                status["member"] = serde_json::to_value(service.member(member)?)?;
                status["member_active"] = service.member_active_count(member)?.into();
            }
            if let Some(book) = book {
                status["book"] = serde_json::to_value(service.book(book)?)?;
                status["queue_length"] = service.queue_length(book)?.into();
                status["has_ready"] = service.has_active_reservation(book)?.into();
            }
            print_json(&status)?;
            Ok(false)
        }
    }
}

fn load_store(path: &Path) -> Result<InMemoryStore> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no data file, starting empty");
        return Ok(InMemoryStore::new());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let snapshot: StoreSnapshot = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    InMemoryStore::from_snapshot(snapshot)
        .with_context(|| format!("inconsistent data in {}", path.display()))
}

fn save_store(path: &Path, store: &InMemoryStore) -> Result<()> {
    let raw = serde_json::to_string_pretty(&store.snapshot())?;
    // Write then rename so an interrupted save keeps the old file.
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, raw).with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

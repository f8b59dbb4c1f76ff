use anyhow::{Context, Result, anyhow};
use bitsynq_core::config::Config;
use bitsynq_core::db::{self, MeetingUpload};
use bitsynq_core::matcher::match_participants;
use bitsynq_core::parser::parse_transcript_with;
use bitsynq_core::schema::{ContributionEntry, MemberRole, RosterMember, UserBalance};
use bitsynq_core::service::{self, DistributionRequest};
use bitsynq_core::settlement::RecordingSettlement;
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use schemars::schema_for;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bitsynq")]
#[command(about = "Meeting-driven contribution ledger and token distribution CLI", long_about = None)]
struct Cli {
    /// SQLite ledger path (overrides [ledger] db_path)
    #[arg(long, global = true, env = "BITSYNQ_DB")]
    db: Option<PathBuf>,

    /// Config file (default: ./bitsynq.toml when present)
    #[arg(long, global = true, env = "BITSYNQ_CONFIG")]
    config: Option<PathBuf>,

    /// User id the command acts as
    #[arg(long = "as", global = true, env = "BITSYNQ_ACTOR")]
    actor: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage users, aliases and wallets
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// Create projects and manage membership
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },
    /// Parse, upload and process meeting transcripts
    Meeting {
        #[command(subcommand)]
        command: MeetingCommands,
    },
    /// Record and inspect contribution ratios
    Contribution {
        #[command(subcommand)]
        command: ContributionCommands,
    },
    /// Preview and run token distributions
    Distribution {
        #[command(subcommand)]
        command: DistributionCommands,
    },
    /// Show token balances
    Balance {
        #[command(subcommand)]
        command: BalanceCommands,
    },
    /// Render a project as an Obsidian vault
    Vault {
        #[command(subcommand)]
        command: VaultCommands,
    },
    /// Export canonical JSON Schemas to the ./schemas directory
    Schema {
        #[command(subcommand)]
        command: SchemaCommands,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Register a user
    Add {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: String,
    },
    /// Replace a user's aliases
    Alias {
        user_id: String,
        aliases: Vec<String>,
    },
    /// Set a user's wallet address
    Wallet { user_id: String, address: String },
}

#[derive(Subcommand)]
enum ProjectCommands {
    /// Create a project owned by the acting user
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        symbol: Option<String>,
    },
    /// Projects the acting user belongs to
    List,
    /// Add a member (admins only)
    AddMember {
        project_id: String,
        user_id: String,
        #[arg(long, default_value = "member", value_parser = parse_role)]
        role: MemberRole,
    },
    /// Members in join order
    Roster { project_id: String },
}

#[derive(Subcommand)]
enum MeetingCommands {
    /// Parse a transcript file without storing it
    Parse {
        file: PathBuf,
        /// Match participants against this project's roster
        #[arg(long)]
        project: Option<String>,
    },
    /// Parse, match and store a transcript as a pending meeting
    Upload {
        project_id: String,
        file: PathBuf,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        date: Option<String>,
    },
    Show {
        project_id: String,
        meeting_id: String,
    },
    List { project_id: String },
    /// Turn a reviewed meeting into contributions
    Process {
        project_id: String,
        meeting_id: String,
        /// `USER_ID=RATIO`, repeatable
        #[arg(long = "entry", value_parser = parse_entry, required = true)]
        entries: Vec<ContributionEntry>,
    },
    Delete {
        project_id: String,
        meeting_id: String,
    },
}

#[derive(Subcommand)]
enum ContributionCommands {
    /// Add a manual contribution (admins only)
    Add {
        project_id: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        ratio: f64,
        #[arg(long)]
        description: Option<String>,
    },
    /// Import a JSON array of `{user_id, ratio, description?}`
    Import {
        project_id: String,
        file: PathBuf,
        #[arg(long)]
        source_id: Option<String>,
    },
    List {
        project_id: String,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    /// Per-user totals and shares
    Summary { project_id: String },
    Delete {
        project_id: String,
        contribution_id: String,
    },
}

#[derive(Subcommand)]
enum DistributionCommands {
    /// Show the allocation without writing anything
    Preview {
        project_id: String,
        #[arg(long)]
        tokens: u64,
        #[arg(long)]
        milestone: Option<String>,
    },
    /// Allocate, optionally settle, and record
    Run {
        project_id: String,
        #[arg(long)]
        tokens: u64,
        #[arg(long)]
        milestone: Option<String>,
        /// Write the transfer batch to the settlement outbox
        #[arg(long)]
        on_chain: bool,
    },
    List { project_id: String },
    Show {
        project_id: String,
        distribution_id: String,
    },
}

#[derive(Subcommand)]
enum BalanceCommands {
    List { project_id: String },
    Show { project_id: String, user_id: String },
}

#[derive(Subcommand)]
enum VaultCommands {
    Build {
        project_id: String,
        /// Vault root directory
        #[arg(long, default_value = "vault")]
        out_dir: PathBuf,
    },
}

#[derive(Subcommand)]
enum SchemaCommands {
    /// Export JSON Schema files for canonical types
    Export {
        /// Output directory (default: ./schemas)
        #[arg(long, default_value = "schemas")]
        out_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    init_tracing(&config.logging.filter);

    if let Commands::Schema { command } = &cli.command {
        return match command {
            SchemaCommands::Export { out_dir } => schema_export(out_dir),
        };
    }

    let db_path = cli.db.clone().unwrap_or_else(|| config.ledger.db_path.clone());
    debug!(db = %db_path.display(), "opening ledger");
    let conn = db::open(&db_path)
        .with_context(|| format!("failed to open ledger at {}", db_path.display()))?;
    let actor = cli.actor.as_deref();

    match cli.command {
        Commands::User { command } => run_user(&conn, command),
        Commands::Project { command } => run_project(&conn, actor, command),
        Commands::Meeting { command } => run_meeting(&conn, &config, actor, command),
        Commands::Contribution { command } => run_contribution(&conn, actor, command),
        Commands::Distribution { command } => run_distribution(&conn, &config, actor, command),
        Commands::Balance { command } => run_balance(&conn, actor, command),
        Commands::Vault { command } => match command {
            VaultCommands::Build { project_id, out_dir } => {
                let report = vault::build_vault(&conn, &project_id, require_actor(actor)?, &out_dir)?;
                println!(
                    "Built vault at {} ({} meetings, {} distributions, {} contributors)",
                    out_dir.display(),
                    report.meetings,
                    report.distributions,
                    report.contributors
                );
                Ok(())
            }
        },
        Commands::Schema { .. } => Ok(()),
    }
}

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn require_actor(actor: Option<&str>) -> Result<&str> {
    actor.ok_or_else(|| anyhow!("this command needs an acting user: pass --as <USER_ID> or set BITSYNQ_ACTOR"))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_user(conn: &Connection, command: UserCommands) -> Result<()> {
    match command {
        UserCommands::Add { email, name } => print_json(&db::create_user(conn, &email, &name)?),
        UserCommands::Alias { user_id, aliases } => {
            db::set_aliases(conn, &user_id, &aliases)?;
            print_json(&db::get_user(conn, &user_id)?)
        }
        UserCommands::Wallet { user_id, address } => {
            db::set_wallet(conn, &user_id, &address)?;
            print_json(&db::get_user(conn, &user_id)?)
        }
    }
}

fn run_project(conn: &Connection, actor: Option<&str>, command: ProjectCommands) -> Result<()> {
    let actor = require_actor(actor)?;
    match command {
        ProjectCommands::Create {
            name,
            description,
            symbol,
        } => print_json(&db::create_project(
            conn,
            actor,
            &name,
            description.as_deref(),
            symbol.as_deref(),
        )?),
        ProjectCommands::List => print_json(&db::list_projects(conn, actor)?),
        ProjectCommands::AddMember {
            project_id,
            user_id,
            role,
        } => {
            db::add_member(conn, &project_id, actor, &user_id, role)?;
            println!("Added {user_id} to {project_id} as {}", role.as_str());
            Ok(())
        }
        ProjectCommands::Roster { project_id } => {
            db::require_member(conn, &project_id, actor)?;
            print_json(&db::roster(conn, &project_id)?)
        }
    }
}

fn run_meeting(conn: &Connection, config: &Config, actor: Option<&str>, command: MeetingCommands) -> Result<()> {
    let lexicon = config.lexicon()?;
    match command {
        MeetingCommands::Parse { file, project } => {
            let transcript = read_text(&file)?;
            let mut parsed = parse_transcript_with(&transcript, &lexicon);
            if let Some(project_id) = project {
                db::require_member(conn, &project_id, require_actor(actor)?)?;
                let roster: Vec<RosterMember> = db::roster(conn, &project_id)?;
                parsed.participants = match_participants(&parsed.participants, &roster);
            }
            print_json(&parsed)
        }
        MeetingCommands::Upload {
            project_id,
            file,
            title,
            date,
        } => {
            let upload = MeetingUpload {
                title,
                meeting_date: date,
                raw_transcript: read_text(&file)?,
            };
            let meeting = db::create_meeting(conn, &project_id, require_actor(actor)?, &upload, &lexicon)?;
            print_json(&meeting)
        }
        MeetingCommands::Show {
            project_id,
            meeting_id,
        } => {
            db::require_member(conn, &project_id, require_actor(actor)?)?;
            print_json(&db::get_meeting(conn, &project_id, &meeting_id)?)
        }
        MeetingCommands::List { project_id } => {
            db::require_member(conn, &project_id, require_actor(actor)?)?;
            print_json(&db::list_meetings(conn, &project_id)?)
        }
        MeetingCommands::Process {
            project_id,
            meeting_id,
            entries,
        } => print_json(&db::process_meeting(
            conn,
            &project_id,
            &meeting_id,
            require_actor(actor)?,
            &entries,
        )?),
        MeetingCommands::Delete {
            project_id,
            meeting_id,
        } => {
            db::delete_meeting(conn, &project_id, &meeting_id, require_actor(actor)?)?;
            println!("Deleted meeting {meeting_id}");
            Ok(())
        }
    }
}

fn run_contribution(conn: &Connection, actor: Option<&str>, command: ContributionCommands) -> Result<()> {
    let actor = require_actor(actor)?;
    match command {
        ContributionCommands::Add {
            project_id,
            user,
            ratio,
            description,
        } => {
            let entry = ContributionEntry {
                user_id: user,
                ratio,
                description,
            };
            print_json(&db::add_contribution(conn, &project_id, actor, &entry)?)
        }
        ContributionCommands::Import {
            project_id,
            file,
            source_id,
        } => {
            let entries: Vec<ContributionEntry> = serde_json::from_str(&read_text(&file)?)
                .with_context(|| format!("{} is not a JSON array of contributions", file.display()))?;
            let records = db::import_contributions(conn, &project_id, actor, source_id.as_deref(), &entries)?;
            println!("Imported {} contributions", records.len());
            Ok(())
        }
        ContributionCommands::List {
            project_id,
            page,
            limit,
        } => print_json(&db::list_contributions(conn, &project_id, actor, page, limit)?),
        ContributionCommands::Summary { project_id } => {
            print_json(&db::contribution_summary(conn, &project_id, actor)?)
        }
        ContributionCommands::Delete {
            project_id,
            contribution_id,
        } => {
            db::delete_contribution(conn, &project_id, &contribution_id, actor)?;
            println!("Deleted contribution {contribution_id}");
            Ok(())
        }
    }
}

fn run_distribution(
    conn: &Connection,
    config: &Config,
    actor: Option<&str>,
    command: DistributionCommands,
) -> Result<()> {
    let actor = require_actor(actor)?;
    match command {
        DistributionCommands::Preview {
            project_id,
            tokens,
            milestone,
        } => {
            let request = DistributionRequest {
                milestone_name: milestone,
                total_tokens: tokens,
                on_chain: false,
            };
            print_json(&service::preview(conn, &project_id, actor, &request)?)
        }
        DistributionCommands::Run {
            project_id,
            tokens,
            milestone,
            on_chain,
        } => {
            let request = DistributionRequest {
                milestone_name: milestone,
                total_tokens: tokens,
                on_chain,
            };
            let settlement = RecordingSettlement::new(&config.settlement.outbox_dir);
            let distribution = service::distribute(
                conn,
                &project_id,
                actor,
                &request,
                Some(&settlement),
                config.tokens.decimals,
            )?;
            print_json(&distribution)
        }
        DistributionCommands::List { project_id } => {
            db::require_member(conn, &project_id, actor)?;
            print_json(&db::list_distributions(conn, &project_id)?)
        }
        DistributionCommands::Show {
            project_id,
            distribution_id,
        } => {
            db::require_member(conn, &project_id, actor)?;
            print_json(&db::get_distribution(conn, &project_id, &distribution_id)?)
        }
    }
}

fn run_balance(conn: &Connection, actor: Option<&str>, command: BalanceCommands) -> Result<()> {
    let actor = require_actor(actor)?;
    match command {
        BalanceCommands::List { project_id } => {
            db::require_member(conn, &project_id, actor)?;
            let balances = db::balances(conn, &project_id)?;
            let total = db::total_distributed(conn, &project_id)?;
            print_json(&serde_json::json!({
                "balances": balances,
                "total_tokens_distributed": total,
            }))
        }
        BalanceCommands::Show {
            project_id,
            user_id,
        } => print_json(&member_balance(conn, &project_id, actor, &user_id)?),
    }
}

/// Balances are only reported for members of the project.
fn member_balance(conn: &Connection, project_id: &str, actor: &str, user_id: &str) -> Result<UserBalance> {
    db::require_member(conn, project_id, actor)?;
    if db::membership_role(conn, project_id, user_id)?.is_none() {
        return Err(anyhow!("user {user_id} is not a member of project {project_id}"));
    }
    Ok(db::balance_of(conn, project_id, user_id)?)
}

fn schema_export(out_dir: &Path) -> Result<()> {
    fs::create_dir_all(out_dir)?;

    write_schema(out_dir, "ParsedMeetingData", &schema_for!(bitsynq_core::schema::ParsedMeetingData))?;
    write_schema(out_dir, "RosterMember", &schema_for!(bitsynq_core::schema::RosterMember))?;
    write_schema(out_dir, "ContributionRecord", &schema_for!(bitsynq_core::schema::ContributionRecord))?;
    write_schema(out_dir, "ContributionEntry", &schema_for!(bitsynq_core::schema::ContributionEntry))?;
    write_schema(out_dir, "ContributorBalance", &schema_for!(bitsynq_core::schema::ContributorBalance))?;
    write_schema(out_dir, "TokenDistribution", &schema_for!(bitsynq_core::schema::TokenDistribution))?;
    write_schema(out_dir, "DistributionRequest", &schema_for!(DistributionRequest))?;

    println!("Exported schemas to {}", out_dir.display());
    Ok(())
}

fn write_schema(out_dir: &Path, name: &str, schema: &schemars::schema::RootSchema) -> Result<()> {
    let json = serde_json::to_string_pretty(schema)?;
    fs::write(out_dir.join(format!("{name}.schema.json")), json)?;
    Ok(())
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn parse_role(value: &str) -> std::result::Result<MemberRole, String> {
    MemberRole::parse(value).map_err(|err| err.to_string())
}

fn parse_entry(value: &str) -> std::result::Result<ContributionEntry, String> {
    let (user_id, ratio) = value
        .split_once('=')
        .ok_or_else(|| format!("expected USER_ID=RATIO, got {value:?}"))?;
    let ratio: f64 = ratio
        .trim()
        .parse()
        .map_err(|_| format!("invalid ratio in {value:?}"))?;
    Ok(ContributionEntry {
        user_id: user_id.trim().to_string(),
        ratio,
        description: None,
    })
}

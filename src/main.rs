use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

mod db;
mod models;
mod recap;
mod report;

use models::{AssessmentPeriod, Gender, Role, ASPECT_ORDER};

#[derive(Parser)]
#[command(name = "crew-recap")]
#[command(about = "Peer and supervisor performance recap for multi-outlet crews", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Bulk-import crew (and their outlets) from a CSV file
    ImportCrew {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Record one crew member's ratings of a peer
    SubmitAssessment {
        #[arg(long)]
        assessor_id: Uuid,
        #[arg(long)]
        assessed_id: Uuid,
        /// JSON object of aspect-key to 1-5 rating, e.g. '{"cashier":4,"packing":5}'
        #[arg(long)]
        scores: String,
        /// Defaults to the active period
        #[arg(long)]
        period_id: Option<Uuid>,
    },
    /// Record a supervisor's 0-100 score for a crew member
    SubmitSupervisorScore {
        #[arg(long)]
        supervisor_id: Uuid,
        #[arg(long)]
        crew_id: Uuid,
        #[arg(long)]
        score: f64,
        /// Defaults to the active period
        #[arg(long)]
        period_id: Option<Uuid>,
    },
    /// Rank crew by weighted final score for a period
    Recap {
        /// Defaults to the active period
        #[arg(long)]
        period_id: Option<Uuid>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Generate a markdown recap report
    Report {
        /// Defaults to the active period
        #[arg(long)]
        period_id: Option<Uuid>,
        #[arg(long, default_value = "recap.md")]
        out: PathBuf,
    },
    /// Snapshot a period's top-25 ranking and deactivate it
    ArchivePeriod {
        #[arg(long)]
        period_id: Uuid,
    },
    /// Create a new (inactive) assessment period
    CreatePeriod {
        #[arg(long)]
        name: String,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
    },
    /// Activate one period, deactivating every other
    ActivatePeriod {
        #[arg(long)]
        id: Uuid,
    },
    /// List all assessment periods
    ListPeriods,
    /// List the aspect weight table
    ListWeights,
    /// Create or update one (role, gender, aspect) weight
    SetWeight {
        #[arg(long)]
        role: String,
        #[arg(long)]
        gender: String,
        #[arg(long)]
        aspect: String,
        #[arg(long)]
        max_score: f64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::ImportCrew { csv } => {
            let imported = db::import_crew_csv(&pool, &csv).await?;
            println!("Imported {imported} crew members from {}.", csv.display());
        }
        Commands::SubmitAssessment {
            assessor_id,
            assessed_id,
            scores,
            period_id,
        } => {
            let period = resolve_period(&pool, period_id).await?;
            let scores: BTreeMap<String, i32> = serde_json::from_str(&scores)
                .context("--scores must be a JSON object of aspect-key to rating")?;
            db::submit_peer_assessment(&pool, period.id, assessor_id, assessed_id, &scores)
                .await?;
            println!("Assessment saved for period {}.", period.name);
        }
        Commands::SubmitSupervisorScore {
            supervisor_id,
            crew_id,
            score,
            period_id,
        } => {
            let period = resolve_period(&pool, period_id).await?;
            db::submit_supervisor_score(&pool, period.id, supervisor_id, crew_id, score).await?;
            println!("Supervisor score saved for period {}.", period.name);
        }
        Commands::Recap { period_id, limit } => {
            let period = resolve_period(&pool, period_id).await?;
            let inputs = db::fetch_recap_inputs(&pool, period.id).await?;
            let output = recap::compute_recap(
                &inputs.roster,
                &inputs.peer_assessments,
                &inputs.supervisor_assessments,
                &inputs.weights,
                &ASPECT_ORDER,
            )?;

            if output.rows.is_empty() {
                println!("No crew to rank for period {}.", period.name);
                return Ok(());
            }

            println!("Ranking for {}:", period.name);
            for row in output.rows.iter().take(limit) {
                println!(
                    "{}. {} ({}) final {:.2} (crew {:.2}, spv avg {:.2}) rated by {}/{}",
                    row.rank,
                    row.full_name,
                    row.outlet,
                    row.final_score,
                    row.crew_score,
                    row.supervisor_average,
                    row.actual_assessors,
                    row.potential_assessors
                );
            }
        }
        Commands::Report { period_id, out } => {
            let period = resolve_period(&pool, period_id).await?;
            let inputs = db::fetch_recap_inputs(&pool, period.id).await?;
            let output = recap::compute_recap(
                &inputs.roster,
                &inputs.peer_assessments,
                &inputs.supervisor_assessments,
                &inputs.weights,
                &ASPECT_ORDER,
            )?;
            let report = report::build_recap_report(&period.name, &output);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::ArchivePeriod { period_id } => match db::archive_period(&pool, period_id)
            .await?
        {
            db::ArchiveOutcome::AlreadyArchived => {
                println!("Period {period_id} is already archived; nothing written.");
            }
            db::ArchiveOutcome::Archived { rows_written } => {
                println!("Archived {rows_written} ranking rows and deactivated the period.");
            }
        },
        Commands::CreatePeriod { name, start, end } => {
            let id = db::create_period(&pool, &name, start, end).await?;
            println!("Created period '{name}' with id {id}.");
        }
        Commands::ActivatePeriod { id } => {
            db::activate_period(&pool, id).await?;
            println!("Period {id} is now the active period.");
        }
        Commands::ListPeriods => {
            let periods = db::fetch_periods(&pool).await?;
            if periods.is_empty() {
                println!("No periods yet.");
            }
            for period in periods {
                println!(
                    "{} {} ({} to {}){}",
                    period.id,
                    period.name,
                    period.start_date,
                    period.end_date,
                    if period.is_active { " [active]" } else { "" }
                );
            }
        }
        Commands::ListWeights => {
            let weights = db::fetch_weights(&pool).await?;
            if weights.is_empty() {
                println!("No weights configured.");
            }
            for weight in weights {
                println!(
                    "{} / {} / {}: {}",
                    weight.role, weight.gender, weight.aspect_key, weight.max_score
                );
            }
        }
        Commands::SetWeight {
            role,
            gender,
            aspect,
            max_score,
        } => {
            let role = Role::from_str(&role)?;
            let gender = Gender::from_str(&gender)?;
            db::upsert_weight(&pool, role, gender, &aspect, max_score).await?;
            println!("Weight saved for {role} / {gender} / {aspect}.");
        }
    }

    Ok(())
}

async fn resolve_period(
    pool: &PgPool,
    period_id: Option<Uuid>,
) -> anyhow::Result<AssessmentPeriod> {
    match period_id {
        Some(id) => db::fetch_period(pool, id)
            .await?
            .with_context(|| format!("no period with id {id}")),
        None => db::fetch_active_period(pool)
            .await?
            .context("no active assessment period; pass --period-id or activate one"),
    }
}

use std::collections::BTreeMap;
use std::str::FromStr;

use anyhow::{bail, Context};
use chrono::NaiveDate;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{
    AspectWeight, AssessmentPeriod, CrewMember, Gender, PeerAssessment, RecapRow, Role,
    SupervisorAssessment, ASPECT_ORDER,
};
use crate::recap;

/// How many ranked rows survive a period archive.
const ARCHIVE_TOP_N: usize = 25;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[derive(Debug)]
pub enum ArchiveOutcome {
    /// Rankings already exist for this period; nothing was written.
    AlreadyArchived,
    Archived { rows_written: usize },
}

/// Everything the recap engine needs for one period.
pub struct RecapInputs {
    pub roster: Vec<CrewMember>,
    pub peer_assessments: Vec<PeerAssessment>,
    pub supervisor_assessments: Vec<SupervisorAssessment>,
    pub weights: Vec<AspectWeight>,
}

pub async fn fetch_recap_inputs(pool: &PgPool, period_id: Uuid) -> anyhow::Result<RecapInputs> {
    Ok(RecapInputs {
        roster: fetch_roster(pool).await?,
        peer_assessments: fetch_peer_assessments(pool, period_id).await?,
        supervisor_assessments: fetch_supervisor_assessments(pool, period_id).await?,
        weights: fetch_weights(pool).await?,
    })
}

pub async fn fetch_roster(pool: &PgPool) -> anyhow::Result<Vec<CrewMember>> {
    let records = sqlx::query(
        "SELECT c.id, c.full_name, c.role, c.gender, c.outlet_id, c.is_active, o.name AS outlet_name \
         FROM crew_recap.crew c \
         LEFT JOIN crew_recap.outlets o ON o.id = c.outlet_id \
         ORDER BY c.full_name",
    )
    .fetch_all(pool)
    .await
    .context("failed to fetch crew roster")?;

    let mut roster = Vec::with_capacity(records.len());
    for row in records {
        let role: String = row.get("role");
        let gender: String = row.get("gender");
        roster.push(CrewMember {
            id: row.get("id"),
            full_name: row.get("full_name"),
            role: Role::from_str(&role)?,
            gender: Gender::from_str(&gender)?,
            outlet_id: row.get("outlet_id"),
            outlet_name: row.get("outlet_name"),
            is_active: row.get("is_active"),
        });
    }

    Ok(roster)
}

pub async fn fetch_peer_assessments(
    pool: &PgPool,
    period_id: Uuid,
) -> anyhow::Result<Vec<PeerAssessment>> {
    let records = sqlx::query(
        "SELECT assessed_id, scores FROM crew_recap.assessments WHERE period_id = $1",
    )
    .bind(period_id)
    .fetch_all(pool)
    .await
    .context("failed to fetch peer assessments")?;

    let mut assessments = Vec::with_capacity(records.len());
    for row in records {
        let scores: serde_json::Value = row.get("scores");
        let scores: BTreeMap<String, i32> = serde_json::from_value(scores)
            .context("assessment scores column is not an aspect->rating map")?;
        assessments.push(PeerAssessment {
            assessed_id: row.get("assessed_id"),
            scores,
        });
    }

    Ok(assessments)
}

/// Arrival order (created_at, id) is what makes the first two scores the
/// "Spv 1"/"Spv 2" display slots downstream.
pub async fn fetch_supervisor_assessments(
    pool: &PgPool,
    period_id: Uuid,
) -> anyhow::Result<Vec<SupervisorAssessment>> {
    let records = sqlx::query(
        "SELECT assessed_crew_id, score FROM crew_recap.supervisor_assessments \
         WHERE period_id = $1 ORDER BY created_at, id",
    )
    .bind(period_id)
    .fetch_all(pool)
    .await
    .context("failed to fetch supervisor assessments")?;

    Ok(records
        .into_iter()
        .map(|row| SupervisorAssessment {
            assessed_crew_id: row.get("assessed_crew_id"),
            score: row.get("score"),
        })
        .collect())
}

pub async fn fetch_weights(pool: &PgPool) -> anyhow::Result<Vec<AspectWeight>> {
    let records = sqlx::query(
        "SELECT role, gender, aspect_key, max_score FROM crew_recap.assessment_weights \
         ORDER BY role, gender, aspect_key",
    )
    .fetch_all(pool)
    .await
    .context("failed to fetch assessment weights")?;

    let mut weights = Vec::with_capacity(records.len());
    for row in records {
        let role: String = row.get("role");
        let gender: String = row.get("gender");
        weights.push(AspectWeight {
            role: Role::from_str(&role)?,
            gender: Gender::from_str(&gender)?,
            aspect_key: row.get("aspect_key"),
            max_score: row.get("max_score"),
        });
    }

    Ok(weights)
}

pub async fn fetch_active_period(pool: &PgPool) -> anyhow::Result<Option<AssessmentPeriod>> {
    let row = sqlx::query(
        "SELECT id, name, start_date, end_date, is_active \
         FROM crew_recap.assessment_periods WHERE is_active",
    )
    .fetch_optional(pool)
    .await
    .context("failed to fetch the active period")?;

    Ok(row.map(period_from_row))
}

pub async fn fetch_period(pool: &PgPool, id: Uuid) -> anyhow::Result<Option<AssessmentPeriod>> {
    let row = sqlx::query(
        "SELECT id, name, start_date, end_date, is_active \
         FROM crew_recap.assessment_periods WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch period")?;

    Ok(row.map(period_from_row))
}

pub async fn fetch_periods(pool: &PgPool) -> anyhow::Result<Vec<AssessmentPeriod>> {
    let rows = sqlx::query(
        "SELECT id, name, start_date, end_date, is_active \
         FROM crew_recap.assessment_periods ORDER BY start_date DESC",
    )
    .fetch_all(pool)
    .await
    .context("failed to list periods")?;

    Ok(rows.into_iter().map(period_from_row).collect())
}

fn period_from_row(row: sqlx::postgres::PgRow) -> AssessmentPeriod {
    AssessmentPeriod {
        id: row.get("id"),
        name: row.get("name"),
        start_date: row.get("start_date"),
        end_date: row.get("end_date"),
        is_active: row.get("is_active"),
    }
}

pub async fn create_period(
    pool: &PgPool,
    name: &str,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> anyhow::Result<Uuid> {
    if end_date < start_date {
        bail!("period end date {end_date} is before start date {start_date}");
    }
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO crew_recap.assessment_periods (id, name, start_date, end_date, is_active) \
         VALUES ($1, $2, $3, $4, FALSE)",
    )
    .bind(id)
    .bind(name)
    .bind(start_date)
    .bind(end_date)
    .execute(pool)
    .await
    .context("failed to create period")?;
    Ok(id)
}

/// Deactivate all, activate one, in a single transaction. Replaces the
/// store-side procedure that used to guard the single-active-period invariant;
/// the partial unique index on is_active backs it up.
pub async fn activate_period(pool: &PgPool, id: Uuid) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE crew_recap.assessment_periods SET is_active = FALSE WHERE is_active")
        .execute(&mut *tx)
        .await?;
    let updated = sqlx::query(
        "UPDATE crew_recap.assessment_periods SET is_active = TRUE WHERE id = $1",
    )
    .bind(id)
    .execute(&mut *tx)
    .await?;
    if updated.rows_affected() == 0 {
        bail!("no period with id {id}");
    }

    tx.commit().await.context("failed to activate period")?;
    Ok(())
}

pub async fn submit_peer_assessment(
    pool: &PgPool,
    period_id: Uuid,
    assessor_id: Uuid,
    assessed_id: Uuid,
    scores: &BTreeMap<String, i32>,
) -> anyhow::Result<()> {
    if assessor_id == assessed_id {
        bail!("crew members cannot rate themselves");
    }
    if scores.is_empty() {
        bail!("assessment carries no aspect ratings");
    }
    for (aspect_key, rating) in scores {
        if !(1..=5).contains(rating) {
            bail!("rating {rating} for aspect '{aspect_key}' is outside the 1-5 scale");
        }
    }

    sqlx::query(
        "INSERT INTO crew_recap.assessments (id, period_id, assessor_id, assessed_id, scores) \
         VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT (period_id, assessor_id, assessed_id) \
         DO UPDATE SET scores = EXCLUDED.scores",
    )
    .bind(Uuid::new_v4())
    .bind(period_id)
    .bind(assessor_id)
    .bind(assessed_id)
    .bind(serde_json::to_value(scores)?)
    .execute(pool)
    .await
    .context("failed to save peer assessment")?;

    Ok(())
}

pub async fn submit_supervisor_score(
    pool: &PgPool,
    period_id: Uuid,
    supervisor_id: Uuid,
    assessed_crew_id: Uuid,
    score: f64,
) -> anyhow::Result<()> {
    if !(0.0..=100.0).contains(&score) {
        bail!("supervisor score {score} is outside the 0-100 scale");
    }

    sqlx::query(
        "INSERT INTO crew_recap.supervisor_assessments \
         (id, period_id, supervisor_id, assessed_crew_id, score) \
         VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT (period_id, supervisor_id, assessed_crew_id) \
         DO UPDATE SET score = EXCLUDED.score",
    )
    .bind(Uuid::new_v4())
    .bind(period_id)
    .bind(supervisor_id)
    .bind(assessed_crew_id)
    .bind(score)
    .execute(pool)
    .await
    .context("failed to save supervisor score")?;

    Ok(())
}

pub async fn upsert_weight(
    pool: &PgPool,
    role: Role,
    gender: Gender,
    aspect_key: &str,
    max_score: f64,
) -> anyhow::Result<()> {
    if max_score < 0.0 {
        bail!("max score must not be negative");
    }

    sqlx::query(
        "INSERT INTO crew_recap.assessment_weights (id, role, gender, aspect_key, max_score) \
         VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT (role, gender, aspect_key) \
         DO UPDATE SET max_score = EXCLUDED.max_score",
    )
    .bind(Uuid::new_v4())
    .bind(role.as_str())
    .bind(gender.as_str())
    .bind(aspect_key)
    .bind(max_score)
    .execute(pool)
    .await
    .context("failed to save weight")?;

    Ok(())
}

/// Close a period: snapshot its top-25 final scores into monthly_rankings and
/// deactivate it, all in one transaction so a partial archive can never be
/// observed. Re-archiving is rejected before any write; the unique
/// (period_id, crew_id) constraint aborts the loser if two archivals race past
/// the check.
pub async fn archive_period(pool: &PgPool, period_id: Uuid) -> anyhow::Result<ArchiveOutcome> {
    let period = fetch_period(pool, period_id)
        .await?
        .with_context(|| format!("no period with id {period_id}"))?;

    let inputs = fetch_recap_inputs(pool, period.id).await?;
    let output = recap::compute_recap(
        &inputs.roster,
        &inputs.peer_assessments,
        &inputs.supervisor_assessments,
        &inputs.weights,
        &ASPECT_ORDER,
    )?;

    let mut tx = pool.begin().await?;

    let existing = sqlx::query(
        "SELECT 1 AS present FROM crew_recap.monthly_rankings WHERE period_id = $1 LIMIT 1",
    )
    .bind(period.id)
    .fetch_optional(&mut *tx)
    .await?;
    if existing.is_some() {
        return Ok(ArchiveOutcome::AlreadyArchived);
    }

    let top: Vec<&RecapRow> = output.rows.iter().take(ARCHIVE_TOP_N).collect();
    for row in &top {
        sqlx::query(
            "INSERT INTO crew_recap.monthly_rankings (id, period_id, crew_id, rank, final_score) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(Uuid::new_v4())
        .bind(period.id)
        .bind(row.crew_id)
        .bind(row.rank as i32)
        .bind(row.final_score)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query("UPDATE crew_recap.assessment_periods SET is_active = FALSE WHERE id = $1")
        .bind(period.id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await.context("failed to archive period")?;

    Ok(ArchiveOutcome::Archived {
        rows_written: top.len(),
    })
}

pub async fn import_crew_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        full_name: String,
        outlet_code: String,
        outlet_name: String,
        role: String,
        gender: String,
        is_active: Option<bool>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut imported = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let role = Role::from_str(&row.role)?;
        let gender = Gender::from_str(&row.gender)?;

        let outlet_id: Uuid = sqlx::query(
            "INSERT INTO crew_recap.outlets (id, outlet_code, name) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (outlet_code) DO UPDATE SET name = EXCLUDED.name \
             RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(row.outlet_code.to_uppercase())
        .bind(&row.outlet_name)
        .fetch_one(pool)
        .await?
        .get("id");

        sqlx::query(
            "INSERT INTO crew_recap.crew (id, full_name, role, gender, outlet_id, is_active) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (full_name, outlet_id) \
             DO UPDATE SET role = EXCLUDED.role, gender = EXCLUDED.gender, \
                           is_active = EXCLUDED.is_active",
        )
        .bind(Uuid::new_v4())
        .bind(&row.full_name)
        .bind(role.as_str())
        .bind(gender.as_str())
        .bind(outlet_id)
        .bind(row.is_active.unwrap_or(true))
        .execute(pool)
        .await?;

        imported += 1;
    }

    Ok(imported)
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let outlets = vec![
        (
            Uuid::parse_str("6f1c2b4a-8d35-4a2e-9c1f-2b7e91d3a450")?,
            "KBP",
            "Kota Baru Parahyangan",
        ),
        (
            Uuid::parse_str("b8a45c1d-03e2-47f9-8d66-51c09e2f7ab3")?,
            "DGO",
            "Dago",
        ),
    ];

    for (id, code, name) in &outlets {
        sqlx::query(
            "INSERT INTO crew_recap.outlets (id, outlet_code, name) VALUES ($1, $2, $3) \
             ON CONFLICT (outlet_code) DO UPDATE SET name = EXCLUDED.name",
        )
        .bind(id)
        .bind(code)
        .bind(name)
        .execute(pool)
        .await?;
    }

    let crew = vec![
        ("Budi Santoso", "crew", "male", outlets[0].0),
        ("Sari Dewi", "crew", "female", outlets[0].0),
        ("Agus Wijaya", "leader", "male", outlets[0].0),
        ("Rina Marlina", "crew", "female", outlets[1].0),
        ("Dedi Kurniawan", "crew", "male", outlets[1].0),
        ("Hendra Gunawan", "supervisor", "male", outlets[0].0),
    ];

    for (name, role, gender, outlet_id) in &crew {
        sqlx::query(
            "INSERT INTO crew_recap.crew (id, full_name, role, gender, outlet_id, is_active) \
             VALUES ($1, $2, $3, $4, $5, TRUE) \
             ON CONFLICT (full_name, outlet_id) DO UPDATE \
             SET role = EXCLUDED.role, gender = EXCLUDED.gender",
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(role)
        .bind(gender)
        .bind(outlet_id)
        .execute(pool)
        .await?;
    }

    // Max scores per (role, gender, aspect); leadership only counts for leaders.
    let weights = vec![
        ("crew", "male", "preparation", 15.0),
        ("crew", "male", "cashier", 20.0),
        ("crew", "male", "order_making", 20.0),
        ("crew", "male", "packing", 15.0),
        ("crew", "male", "stock_opname", 15.0),
        ("crew", "male", "cleanliness", 15.0),
        ("crew", "female", "preparation", 15.0),
        ("crew", "female", "cashier", 20.0),
        ("crew", "female", "order_making", 20.0),
        ("crew", "female", "packing", 15.0),
        ("crew", "female", "stock_opname", 15.0),
        ("crew", "female", "cleanliness", 15.0),
        ("leader", "male", "leadership", 25.0),
        ("leader", "male", "preparation", 10.0),
        ("leader", "male", "cashier", 15.0),
        ("leader", "male", "order_making", 15.0),
        ("leader", "male", "packing", 10.0),
        ("leader", "male", "stock_opname", 10.0),
        ("leader", "male", "cleanliness", 15.0),
        ("leader", "female", "leadership", 25.0),
        ("leader", "female", "preparation", 10.0),
        ("leader", "female", "cashier", 15.0),
        ("leader", "female", "order_making", 15.0),
        ("leader", "female", "packing", 10.0),
        ("leader", "female", "stock_opname", 10.0),
        ("leader", "female", "cleanliness", 15.0),
    ];

    for (role, gender, aspect_key, max_score) in weights {
        sqlx::query(
            "INSERT INTO crew_recap.assessment_weights (id, role, gender, aspect_key, max_score) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (role, gender, aspect_key) DO UPDATE \
             SET max_score = EXCLUDED.max_score",
        )
        .bind(Uuid::new_v4())
        .bind(role)
        .bind(gender)
        .bind(aspect_key)
        .bind(max_score)
        .execute(pool)
        .await?;
    }

    let period_id = Uuid::parse_str("4e9d2c70-5b1f-4f63-9a8e-7d204c6b3f91")?;
    sqlx::query(
        "INSERT INTO crew_recap.assessment_periods (id, name, start_date, end_date, is_active) \
         VALUES ($1, $2, $3, $4, TRUE) \
         ON CONFLICT (id) DO NOTHING",
    )
    .bind(period_id)
    .bind("Agustus 2026")
    .bind(NaiveDate::from_ymd_opt(2026, 8, 1).context("invalid date")?)
    .bind(NaiveDate::from_ymd_opt(2026, 8, 31).context("invalid date")?)
    .execute(pool)
    .await?;

    let budi = crew_id_by_name(pool, "Budi Santoso").await?;
    let sari = crew_id_by_name(pool, "Sari Dewi").await?;
    let agus = crew_id_by_name(pool, "Agus Wijaya").await?;
    let hendra = crew_id_by_name(pool, "Hendra Gunawan").await?;

    let mut budi_scores = BTreeMap::new();
    budi_scores.insert("cashier".to_string(), 4);
    budi_scores.insert("packing".to_string(), 5);
    budi_scores.insert("cleanliness".to_string(), 3);
    submit_peer_assessment(pool, period_id, sari, budi, &budi_scores).await?;

    let mut sari_scores = BTreeMap::new();
    sari_scores.insert("cashier".to_string(), 5);
    sari_scores.insert("order_making".to_string(), 4);
    submit_peer_assessment(pool, period_id, budi, sari, &sari_scores).await?;

    let mut agus_scores = BTreeMap::new();
    agus_scores.insert("leadership".to_string(), 4);
    agus_scores.insert("preparation".to_string(), 4);
    submit_peer_assessment(pool, period_id, budi, agus, &agus_scores).await?;

    submit_supervisor_score(pool, period_id, hendra, budi, 82.0).await?;
    submit_supervisor_score(pool, period_id, hendra, sari, 88.0).await?;
    submit_supervisor_score(pool, period_id, hendra, agus, 79.0).await?;

    Ok(())
}

async fn crew_id_by_name(pool: &PgPool, name: &str) -> anyhow::Result<Uuid> {
    let row = sqlx::query("SELECT id FROM crew_recap.crew WHERE full_name = $1")
        .bind(name)
        .fetch_one(pool)
        .await
        .with_context(|| format!("seed crew member '{name}' not found"))?;
    Ok(row.get("id"))
}

use crate::DbError;
use chrono::{DateTime, Utc};
use core_types::{
    Commodity, MonthlyImport, MonthlyTotal, ProgressSnapshot, SectorCombine, SortKey, YearMonth,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPool, Postgres};
use sqlx::{FromRow, QueryBuilder, Row};

/// The `DbRepository` provides a high-level, application-specific interface
/// to the database. It encapsulates all SQL queries and data access logic.
#[derive(Debug, Clone)]
pub struct DbRepository {
    pool: PgPool,
}

/// Filter and ordering for the commodity listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommodityFilter {
    pub sectors: Vec<String>,
    pub combine: SectorCombine,
    pub min_capex: Option<Decimal>,
    pub max_capex: Option<Decimal>,
    pub sort: SortKey,
    pub limit: i64,
}

/// A commodity joined with its latest snapshot metrics, as served to
/// listing and leaderboard callers.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CommodityCard {
    pub code: String,
    pub title: String,
    pub sectors: Vec<String>,
    pub capex_min: Option<Decimal>,
    pub capex_max: Option<Decimal>,
    pub current_value: Option<f64>,
    pub reduction_pct: Option<f64>,
    pub opportunity_score: Option<f64>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// One raw monthly observation, as returned on the detail endpoint.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub year: i32,
    pub month: i32,
    pub value: Option<Decimal>,
    pub qty: Option<Decimal>,
    pub partner: String,
}

/// A partner with its all-time total import value for one commodity.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PartnerTotal {
    pub partner: String,
    pub total: Option<Decimal>,
}

/// Everything the detail view needs for one commodity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommodityDetail {
    pub commodity: Commodity,
    pub snapshot: Option<ProgressSnapshot>,
    pub timeseries: Vec<SeriesPoint>,
    pub partners: Vec<PartnerTotal>,
}

/// A community-submitted capability estimate; always lands unverified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCapability {
    pub code: String,
    pub capex_min: Option<Decimal>,
    pub capex_max: Option<Decimal>,
    pub machines: Option<JsonValue>,
    pub skills: Option<JsonValue>,
    pub notes: Option<String>,
    pub source: Option<String>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CapabilityRow {
    pub id: i64,
    pub code: String,
    pub capex_min: Option<Decimal>,
    pub capex_max: Option<Decimal>,
    pub machines: Option<JsonValue>,
    pub skills: Option<JsonValue>,
    pub notes: Option<String>,
    pub source: Option<String>,
    pub verified: bool,
}

impl DbRepository {
    /// Creates a new `DbRepository` with a shared database connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // --- Ingestion sink ------------------------------------------------------

    /// Upserts commodity metadata. The code is immutable: it is the conflict
    /// key, and every other field is refreshed. Capex bounds only overwrite
    /// when the new row actually carries them.
    pub async fn upsert_commodity(&self, commodity: &Commodity) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO commodities (code, title, description, sectors, capex_min, capex_max, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, now())
            ON CONFLICT (code) DO UPDATE
            SET title = EXCLUDED.title,
                description = EXCLUDED.description,
                sectors = EXCLUDED.sectors,
                capex_min = COALESCE(EXCLUDED.capex_min, commodities.capex_min),
                capex_max = COALESCE(EXCLUDED.capex_max, commodities.capex_max),
                updated_at = now()
            "#,
        )
        .bind(&commodity.code)
        .bind(&commodity.title)
        .bind(&commodity.description)
        .bind(&commodity.sectors)
        .bind(commodity.capex_min)
        .bind(commodity.capex_max)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Upserts one monthly observation on its `(code, year, month, partner)`
    /// uniqueness key, so re-fetching a period never duplicates rows.
    pub async fn upsert_monthly_import(&self, record: &MonthlyImport) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO monthly_imports (code, year, month, value, qty, partner)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (code, year, month, partner) DO UPDATE
            SET value = EXCLUDED.value,
                qty = EXCLUDED.qty
            "#,
        )
        .bind(&record.code)
        .bind(record.year)
        .bind(record.month as i32)
        .bind(record.value)
        .bind(record.qty)
        .bind(&record.partner)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // --- Recompute reads -----------------------------------------------------

    /// Every commodity code with its sector tags, ordered by code.
    pub async fn list_codes_with_sectors(&self) -> Result<Vec<(String, Vec<String>)>, DbError> {
        let rows = sqlx::query("SELECT code, sectors FROM commodities ORDER BY code")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get("code"), row.get("sectors")))
            .collect())
    }

    /// The full chronological monthly series for one commodity, summed over
    /// partners. A month whose values are all null yields a null total.
    pub async fn monthly_totals(&self, code: &str) -> Result<Vec<MonthlyTotal>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT year, month, SUM(value) AS total
            FROM monthly_imports
            WHERE code = $1
            GROUP BY year, month
            ORDER BY year, month
            "#,
        )
        .bind(code)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| MonthlyTotal {
                year: row.get::<i32, _>("year"),
                month: row.get::<i32, _>("month") as u32,
                total: row
                    .get::<Option<Decimal>, _>("total")
                    .and_then(|d| d.to_f64()),
            })
            .collect())
    }

    /// Per-partner totals for one commodity within an inclusive month window.
    /// Partners whose window total is entirely null are excluded.
    pub async fn partner_values(
        &self,
        code: &str,
        start: YearMonth,
        end: YearMonth,
    ) -> Result<Vec<f64>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT SUM(value) AS total
            FROM monthly_imports
            WHERE code = $1
              AND (year > $2 OR (year = $2 AND month >= $3))
              AND (year < $4 OR (year = $4 AND month <= $5))
            GROUP BY partner
            HAVING SUM(value) IS NOT NULL
            "#,
        )
        .bind(code)
        .bind(start.year)
        .bind(start.month as i32)
        .bind(end.year)
        .bind(end.month as i32)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                row.get::<Option<Decimal>, _>("total").and_then(|d| d.to_f64())
            })
            .collect())
    }

    /// The most recent (year, month) carrying any observation, if one
    /// exists. Admin tooling uses this to pick default ETL ranges.
    pub async fn latest_year_month(&self) -> Result<Option<YearMonth>, DbError> {
        let row = sqlx::query(
            "SELECT year, month FROM monthly_imports ORDER BY year DESC, month DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(|row| {
            YearMonth::new(row.get::<i32, _>("year"), row.get::<i32, _>("month") as u32).ok()
        }))
    }

    // --- Recompute writes ----------------------------------------------------

    /// Persists one full recompute pass: for every commodity, its baseline
    /// row and its progress snapshot, inside a single transaction. A failed
    /// run therefore leaves every previously persisted row untouched, and
    /// baseline and snapshot can never disagree for the same commodity.
    pub async fn save_recompute(&self, snapshots: &[ProgressSnapshot]) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;

        for snapshot in snapshots {
            sqlx::query(
                r#"
                INSERT INTO baselines (code, baseline_value, baseline_period, updated_at)
                VALUES ($1, $2, $3, now())
                ON CONFLICT (code) DO UPDATE
                SET baseline_value = EXCLUDED.baseline_value,
                    baseline_period = EXCLUDED.baseline_period,
                    updated_at = now()
                "#,
            )
            .bind(&snapshot.code)
            .bind(snapshot.baseline_value)
            .bind(&snapshot.baseline_period)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO progress_snapshots (
                    code, baseline_value, current_value, reduction_abs, reduction_pct,
                    hhi_baseline, hhi_current, concentration_shift, opportunity_score, last_updated
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now())
                ON CONFLICT (code) DO UPDATE
                SET baseline_value = EXCLUDED.baseline_value,
                    current_value = EXCLUDED.current_value,
                    reduction_abs = EXCLUDED.reduction_abs,
                    reduction_pct = EXCLUDED.reduction_pct,
                    hhi_baseline = EXCLUDED.hhi_baseline,
                    hhi_current = EXCLUDED.hhi_current,
                    concentration_shift = EXCLUDED.concentration_shift,
                    opportunity_score = EXCLUDED.opportunity_score,
                    last_updated = now()
                "#,
            )
            .bind(&snapshot.code)
            .bind(snapshot.baseline_value)
            .bind(snapshot.current_value)
            .bind(snapshot.reduction_abs)
            .bind(snapshot.reduction_pct)
            .bind(snapshot.hhi_baseline)
            .bind(snapshot.hhi_current)
            .bind(snapshot.concentration_shift)
            .bind(snapshot.opportunity_score)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    // --- Query interface -----------------------------------------------------

    /// Lists commodities joined with their snapshot, filtered by sectors
    /// (AND/OR combine), capex overlap, sorted by the requested metric.
    pub async fn list_commodities(
        &self,
        filter: &CommodityFilter,
    ) -> Result<Vec<CommodityCard>, DbError> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"
            SELECT c.code, c.title, c.sectors, c.capex_min, c.capex_max,
                   ps.current_value, ps.reduction_pct, ps.opportunity_score, ps.last_updated
            FROM commodities c
            LEFT JOIN progress_snapshots ps ON ps.code = c.code
            WHERE TRUE
            "#,
        );

        if !filter.sectors.is_empty() {
            match filter.combine {
                SectorCombine::And => qb.push(" AND c.sectors @> "),
                SectorCombine::Or => qb.push(" AND c.sectors && "),
            };
            qb.push_bind(&filter.sectors);
        }
        if let Some(min_capex) = filter.min_capex {
            qb.push(" AND (c.capex_max IS NULL OR c.capex_max >= ");
            qb.push_bind(min_capex);
            qb.push(")");
        }
        if let Some(max_capex) = filter.max_capex {
            qb.push(" AND (c.capex_min IS NULL OR c.capex_min <= ");
            qb.push_bind(max_capex);
            qb.push(")");
        }

        qb.push(" ORDER BY ");
        qb.push(order_clause(filter.sort));
        qb.push(" LIMIT ");
        qb.push_bind(filter.limit.clamp(1, 200));

        let cards = qb
            .build_query_as::<CommodityCard>()
            .fetch_all(&self.pool)
            .await?;
        Ok(cards)
    }

    /// The leaderboard is the unfiltered listing ranked by one metric.
    pub async fn leaderboard(
        &self,
        metric: SortKey,
        limit: i64,
    ) -> Result<Vec<CommodityCard>, DbError> {
        self.list_commodities(&CommodityFilter {
            sort: metric,
            limit,
            ..CommodityFilter::default()
        })
        .await
    }

    /// Metadata + snapshot + last 36 observations + top-5 partners for one
    /// commodity. `DbError::NotFound` when the code is unknown.
    pub async fn commodity_detail(&self, code: &str) -> Result<CommodityDetail, DbError> {
        let commodity = sqlx::query_as::<_, Commodity>(
            "SELECT code, title, description, sectors, capex_min, capex_max FROM commodities WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DbError::NotFound)?;

        let snapshot = sqlx::query_as::<_, ProgressSnapshot>(
            r#"
            SELECT ps.code, ps.baseline_value, b.baseline_period, ps.current_value,
                   ps.reduction_abs, ps.reduction_pct, ps.hhi_baseline, ps.hhi_current,
                   ps.concentration_shift, ps.opportunity_score, ps.last_updated
            FROM progress_snapshots ps
            LEFT JOIN baselines b ON b.code = ps.code
            WHERE ps.code = $1
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        let mut timeseries = sqlx::query_as::<_, SeriesPoint>(
            r#"
            SELECT year, month, value, qty, partner
            FROM monthly_imports
            WHERE code = $1
            ORDER BY year DESC, month DESC
            LIMIT 36
            "#,
        )
        .bind(code)
        .fetch_all(&self.pool)
        .await?;
        timeseries.reverse();

        let partners = sqlx::query_as::<_, PartnerTotal>(
            r#"
            SELECT partner, SUM(value) AS total
            FROM monthly_imports
            WHERE code = $1
            GROUP BY partner
            ORDER BY total DESC NULLS LAST
            LIMIT 5
            "#,
        )
        .bind(code)
        .fetch_all(&self.pool)
        .await?;

        Ok(CommodityDetail {
            commodity,
            snapshot,
            timeseries,
            partners,
        })
    }

    // --- Domestic capability -------------------------------------------------

    /// Appends a capability submission. Always lands with `verified = false`;
    /// moderation happens through `set_capability_verified`.
    pub async fn insert_capability(&self, entry: &NewCapability) -> Result<i64, DbError> {
        let row = sqlx::query(
            r#"
            INSERT INTO domestic_capability (code, capex_min, capex_max, machines, skills, notes, source, verified)
            VALUES ($1, $2, $3, $4, $5, $6, $7, false)
            RETURNING id
            "#,
        )
        .bind(&entry.code)
        .bind(entry.capex_min)
        .bind(entry.capex_max)
        .bind(&entry.machines)
        .bind(&entry.skills)
        .bind(&entry.notes)
        .bind(&entry.source)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("id"))
    }

    /// Verified capability entries for one commodity, newest first.
    pub async fn verified_capabilities(&self, code: &str) -> Result<Vec<CapabilityRow>, DbError> {
        let rows = sqlx::query_as::<_, CapabilityRow>(
            r#"
            SELECT id, code, capex_min, capex_max, machines, skills, notes, source, verified
            FROM domestic_capability
            WHERE code = $1 AND verified = true
            ORDER BY created_at DESC
            "#,
        )
        .bind(code)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// The explicit moderation action: the only writer of the verification
    /// flag. Returns whether a row was actually updated.
    pub async fn set_capability_verified(&self, id: i64, verified: bool) -> Result<bool, DbError> {
        let result = sqlx::query("UPDATE domestic_capability SET verified = $1 WHERE id = $2")
            .bind(verified)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn order_clause(sort: SortKey) -> &'static str {
    match sort {
        SortKey::Opportunity => "COALESCE(ps.opportunity_score, 0) DESC",
        SortKey::Progress => "COALESCE(ps.reduction_pct, 0) DESC",
        SortKey::Value => "COALESCE(ps.current_value, 0) DESC",
    }
}

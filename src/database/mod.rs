use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, migrate::MigrateDatabase};
use tracing::{debug, info};

use crate::models::AdvertRecord;
use crate::traits::AdvertStore;

const LIST_SEPARATOR: &str = ", ";

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        if let Some(parent) = db_url
            .strip_prefix("sqlite:")
            .map(|path| std::path::Path::new(path.trim_start_matches("//")))
            .and_then(|path| path.parent())
            .filter(|parent| !parent.as_os_str().is_empty())
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Create database file if it doesn't exist
        if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
            info!("Creating database file");
            Sqlite::create_database(db_url).await?;
        }

        let pool = SqlitePool::connect(db_url).await?;
        Self::migrate(pool).await
    }

    /// Private in-memory database, mainly for tests
    pub async fn in_memory() -> Result<Self> {
        // Every connection would otherwise get its own empty database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("Database initialized successfully");
        Ok(Self { pool })
    }
}

fn join_list(values: &[String]) -> Option<String> {
    if values.is_empty() {
        None
    } else {
        Some(values.join(LIST_SEPARATOR))
    }
}

fn split_list(value: Option<String>) -> Vec<String> {
    value
        .map(|joined| {
            joined
                .split(LIST_SEPARATOR)
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn advert_from_row(row: &SqliteRow) -> AdvertRecord {
    AdvertRecord {
        sid: row.get("sid"),
        title: row.get("title"),
        job_title: row.get("job_title"),
        address: row.get("address"),
        location: row.get("location"),
        type_offer: row.get("type_offer"),
        posted_date: row.get("posted_date"),
        posted_date_text: row.get("posted_date_text"),
        employer_company_name: row.get("employer_company_name"),
        employer_contact_person: row.get("employer_contact_person"),
        emails: split_list(row.get("email")),
        phones: split_list(row.get("phone")),
        link: row.get("link"),
        collected_at: row.get("collected_at"),
        session_id: row.get("session_id"),
    }
}

#[async_trait]
impl AdvertStore for Database {
    async fn upsert_advert(&self, advert: &AdvertRecord) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO adverts (
                sid, title, job_title, address, location, type_offer, posted_date,
                posted_date_text, employer_company_name, employer_contact_person,
                email, phone, link, collected_at, session_id
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(sid) DO UPDATE SET
                title = excluded.title,
                job_title = excluded.job_title,
                address = excluded.address,
                location = excluded.location,
                type_offer = excluded.type_offer,
                posted_date = excluded.posted_date,
                posted_date_text = excluded.posted_date_text,
                employer_company_name = excluded.employer_company_name,
                employer_contact_person = excluded.employer_contact_person,
                email = excluded.email,
                phone = excluded.phone,
                link = excluded.link,
                collected_at = excluded.collected_at,
                session_id = excluded.session_id
            ",
        )
        .bind(&advert.sid)
        .bind(&advert.title)
        .bind(&advert.job_title)
        .bind(&advert.address)
        .bind(&advert.location)
        .bind(&advert.type_offer)
        .bind(advert.posted_date)
        .bind(&advert.posted_date_text)
        .bind(&advert.employer_company_name)
        .bind(&advert.employer_contact_person)
        .bind(join_list(&advert.emails))
        .bind(join_list(&advert.phones))
        .bind(&advert.link)
        .bind(advert.collected_at)
        .bind(advert.session_id)
        .execute(&self.pool)
        .await?;

        debug!("Stored advert {}", advert.sid);
        Ok(())
    }

    async fn list_adverts(
        &self,
        max_age_days: Option<u32>,
        session_id: Option<DateTime<Utc>>,
    ) -> Result<Vec<AdvertRecord>> {
        let collected_after = max_age_days
            .filter(|days| *days > 0)
            .map(|days| Duration::days(i64::from(days)))
            .and_then(|window| Utc::now().checked_sub_signed(window));

        let rows = sqlx::query(
            r"
            SELECT * FROM adverts
            WHERE (?1 IS NULL OR collected_at > ?1)
              AND (?2 IS NULL OR session_id = ?2)
            ORDER BY collected_at
            ",
        )
        .bind(collected_after)
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(advert_from_row).collect())
    }
}

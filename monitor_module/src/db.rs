use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::NaiveDateTime;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlRow};
use sqlx::{MySql, MySqlPool, QueryBuilder, Row};
use tokio::runtime::Runtime;
use tracing::{debug, info};

use crate::config::DbConfig;
use crate::model::{parse_locations, Account, AccountId, AccountStatus, ProjectRow};

const ACCOUNT_SELECT: &str = "SELECT CAST(p.id AS SIGNED) AS id, \
     CAST(p.name AS CHAR) AS name, \
     CAST(p.status AS CHAR) AS status, \
     p.inactivity_date AS inactivity_date, \
     p.update_time AS update_time, \
     CAST(p.status_change_reason AS CHAR) AS change_reason \
     FROM publishers p";

const PROJECT_SELECT: &str = "SELECT CAST(gp.project_id AS CHAR) AS project_id, \
     CAST(gp.campaign_id AS SIGNED) AS campaign_id, \
     CAST(c.status AS CHAR) AS campaign_status, \
     CAST(c.syndicator_id AS SIGNED) AS account_id, \
     CAST(p.name AS CHAR) AS account_name, \
     CAST(p.status AS CHAR) AS account_status, \
     CAST(gp.locations AS CHAR) AS locations, \
     gp.creation_date AS creation_date \
     FROM geo_edge_projects gp \
     JOIN sp_campaigns c ON gp.campaign_id = c.id \
     JOIN publishers p ON p.id = c.syndicator_id";

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("mysql error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("database runtime error: {0}")]
    Runtime(String),
    #[error("database query failed: {0}")]
    Query(String),
}

/// Read-only access to the publisher / campaign / project schema.
pub trait AccountDirectory {
    fn fetch_accounts(&self) -> Result<Vec<Account>, DbError>;
    fn fetch_accounts_by_id(&self, ids: &[AccountId]) -> Result<Vec<Account>, DbError>;
    /// Joins account -> campaign -> project. Accounts without projects yield no rows.
    fn fetch_projects_for_accounts(&self, ids: &[AccountId]) -> Result<Vec<ProjectRow>, DbError>;
    fn fetch_projects_created_since(&self, days: u32) -> Result<Vec<ProjectRow>, DbError>;
    fn fetch_accounts_for_projects(
        &self,
        project_ids: &[String],
    ) -> Result<BTreeMap<String, AccountId>, DbError>;
}

impl<T: AccountDirectory + ?Sized> AccountDirectory for &T {
    fn fetch_accounts(&self) -> Result<Vec<Account>, DbError> {
        (**self).fetch_accounts()
    }

    fn fetch_accounts_by_id(&self, ids: &[AccountId]) -> Result<Vec<Account>, DbError> {
        (**self).fetch_accounts_by_id(ids)
    }

    fn fetch_projects_for_accounts(&self, ids: &[AccountId]) -> Result<Vec<ProjectRow>, DbError> {
        (**self).fetch_projects_for_accounts(ids)
    }

    fn fetch_projects_created_since(&self, days: u32) -> Result<Vec<ProjectRow>, DbError> {
        (**self).fetch_projects_created_since(days)
    }

    fn fetch_accounts_for_projects(
        &self,
        project_ids: &[String],
    ) -> Result<BTreeMap<String, AccountId>, DbError> {
        (**self).fetch_accounts_for_projects(project_ids)
    }
}

/// Splits `ids` into deduplicated chunks of at most `size` for `IN (...)` lists.
pub(crate) fn plan_chunks<T: Ord + Clone>(ids: &[T], size: usize) -> Vec<Vec<T>> {
    let unique: Vec<T> = ids
        .iter()
        .cloned()
        .collect::<BTreeSet<T>>()
        .into_iter()
        .collect();
    unique
        .chunks(size.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}

pub struct MySqlAccountDirectory {
    runtime: Runtime,
    pool: MySqlPool,
    in_chunk: usize,
}

impl MySqlAccountDirectory {
    pub fn connect(config: &DbConfig) -> Result<Self, DbError> {
        let runtime = Runtime::new().map_err(|err| DbError::Runtime(err.to_string()))?;
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database);
        let pool = runtime.block_on(
            MySqlPoolOptions::new()
                .max_connections(4)
                .acquire_timeout(Duration::from_secs(10))
                .connect_with(options),
        )?;
        info!(
            "connected to mysql {}:{}/{}",
            config.host, config.port, config.database
        );
        Ok(Self {
            runtime,
            pool,
            in_chunk: config.in_chunk,
        })
    }

    fn fetch_rows(&self, mut builder: QueryBuilder<'_, MySql>) -> Result<Vec<MySqlRow>, DbError> {
        debug!("mysql query: {}", builder.sql());
        let query = builder.build().fetch_all(&self.pool);
        let rows = self.runtime.block_on(query)?;
        Ok(rows)
    }

    fn fetch_account_rows(&self, ids: Option<&[AccountId]>) -> Result<Vec<Account>, DbError> {
        let chunks = match ids {
            Some(ids) => plan_chunks(ids, self.in_chunk),
            None => {
                let rows = self.fetch_rows(QueryBuilder::new(ACCOUNT_SELECT))?;
                return rows.iter().map(account_from_row).collect();
            }
        };
        let mut accounts = Vec::new();
        for chunk in chunks {
            let mut builder = QueryBuilder::new(ACCOUNT_SELECT);
            builder.push(" WHERE p.id IN (");
            let mut separated = builder.separated(", ");
            for id in &chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");
            for row in self.fetch_rows(builder)? {
                accounts.push(account_from_row(&row)?);
            }
        }
        Ok(accounts)
    }
}

impl AccountDirectory for MySqlAccountDirectory {
    fn fetch_accounts(&self) -> Result<Vec<Account>, DbError> {
        let accounts = self.fetch_account_rows(None)?;
        info!("loaded {} accounts", accounts.len());
        Ok(accounts)
    }

    fn fetch_accounts_by_id(&self, ids: &[AccountId]) -> Result<Vec<Account>, DbError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.fetch_account_rows(Some(ids))
    }

    fn fetch_projects_for_accounts(&self, ids: &[AccountId]) -> Result<Vec<ProjectRow>, DbError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut projects = Vec::new();
        for chunk in plan_chunks(ids, self.in_chunk) {
            let mut builder = QueryBuilder::new(PROJECT_SELECT);
            builder.push(" WHERE c.syndicator_id IN (");
            let mut separated = builder.separated(", ");
            for id in &chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(") ORDER BY gp.creation_date DESC");
            for row in self.fetch_rows(builder)? {
                projects.push(project_from_row(&row)?);
            }
        }
        info!(
            "resolved {} projects for {} accounts",
            projects.len(),
            ids.len()
        );
        Ok(projects)
    }

    fn fetch_projects_created_since(&self, days: u32) -> Result<Vec<ProjectRow>, DbError> {
        let mut builder = QueryBuilder::new(PROJECT_SELECT);
        builder.push(" WHERE gp.creation_date >= DATE_SUB(NOW(), INTERVAL ");
        builder.push_bind(i64::from(days));
        builder.push(" DAY) ORDER BY gp.creation_date DESC");
        self.fetch_rows(builder)?
            .iter()
            .map(project_from_row)
            .collect()
    }

    fn fetch_accounts_for_projects(
        &self,
        project_ids: &[String],
    ) -> Result<BTreeMap<String, AccountId>, DbError> {
        let mut owners = BTreeMap::new();
        for chunk in plan_chunks(project_ids, self.in_chunk) {
            let mut builder = QueryBuilder::new(
                "SELECT CAST(gp.project_id AS CHAR) AS project_id, \
                 CAST(c.syndicator_id AS SIGNED) AS account_id \
                 FROM geo_edge_projects gp \
                 JOIN sp_campaigns c ON gp.campaign_id = c.id \
                 WHERE gp.project_id IN (",
            );
            let mut separated = builder.separated(", ");
            for id in &chunk {
                separated.push_bind(id.clone());
            }
            separated.push_unseparated(")");
            for row in self.fetch_rows(builder)? {
                let project_id: String = row.try_get("project_id")?;
                let account_id: i64 = row.try_get("account_id")?;
                owners.insert(project_id, account_id);
            }
        }
        Ok(owners)
    }
}

fn account_from_row(row: &MySqlRow) -> Result<Account, DbError> {
    let status: Option<String> = row.try_get("status")?;
    Ok(Account {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        status: AccountStatus::parse(status.as_deref().unwrap_or_default()),
        inactivity_date: row.try_get::<Option<NaiveDateTime>, _>("inactivity_date")?,
        update_time: row.try_get::<Option<NaiveDateTime>, _>("update_time")?,
        change_reason: row.try_get("change_reason")?,
    })
}

fn project_from_row(row: &MySqlRow) -> Result<ProjectRow, DbError> {
    let status: Option<String> = row.try_get("account_status")?;
    let locations: Option<String> = row.try_get("locations")?;
    Ok(ProjectRow {
        project_id: row.try_get("project_id")?,
        campaign_id: row.try_get("campaign_id")?,
        campaign_status: row.try_get("campaign_status")?,
        account_id: row.try_get("account_id")?,
        account_name: row.try_get("account_name")?,
        account_status: AccountStatus::parse(status.as_deref().unwrap_or_default()),
        locations: parse_locations(locations.as_deref().unwrap_or_default()),
        creation_date: row.try_get::<Option<NaiveDateTime>, _>("creation_date")?,
    })
}

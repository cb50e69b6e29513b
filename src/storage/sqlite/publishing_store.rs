//! SQLite PublishingStore implementation.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Expr, OnConflict, Order, Query, SqliteQueryBuilder};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::pool::PoolConnection;
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::model::{
    Action, ActionKind, ActionTarget, AuditRecord, Document, DocumentKey, DocumentSnapshot,
    Edition, EditionContent, EditionState, Event, LinkSet, Links, PathReservation,
    ReservationOutcome, ReservationRequest, Unpublishing,
};
use crate::storage::schema::{
    self, Actions, Documents, Editions, Events, LinkRows, LinkSets, PathReservations,
    Unpublishings,
};
use crate::storage::{
    DocumentFilter, EditionWrite, EventEntry, LinkPatch, Mutation, PublishingStore, Result,
    StorageError,
};

/// SQLite implementation of PublishingStore.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a store over an existing pool. Call [`SqliteStore::init`] before use.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database at `path` and create the schema.
    ///
    /// `:memory:` opens a private in-memory database on a single connection.
    pub async fn connect(path: &str) -> Result<Self> {
        let (opts, max_connections) = if path == ":memory:" {
            (SqliteConnectOptions::from_str("sqlite::memory:")?, 1)
        } else {
            let opts = SqliteConnectOptions::new()
                .filename(path)
                .journal_mode(SqliteJournalMode::Wal)
                .busy_timeout(Duration::from_secs(30))
                .create_if_missing(true);
            (opts, 5)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self::new(pool);
        store.init().await?;
        Ok(store)
    }

    /// Create tables and indexes if they do not exist.
    pub async fn init(&self) -> Result<()> {
        for statement in schema::statements() {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Start a write transaction.
    async fn begin(&self) -> Result<PoolConnection<Sqlite>> {
        // BEGIN IMMEDIATE acquires the write lock upfront, preventing deadlocks
        // when concurrent DEFERRED transactions race to upgrade from shared to exclusive.
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        Ok(conn)
    }

    /// Commit on success, roll back on any error.
    async fn finish<T>(mut conn: PoolConnection<Sqlite>, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                Ok(value)
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

fn parse_opt_time(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_time).transpose()
}

fn parse_diff(value: Option<String>) -> Result<Option<Vec<String>>> {
    Ok(value.as_deref().map(serde_json::from_str).transpose()?)
}

fn encode_diff(diff: &Option<Vec<String>>) -> Result<Option<String>> {
    Ok(diff.as_ref().map(serde_json::to_string).transpose()?)
}

/// Unique violations are how SQLite reports a lost race. Base path clashes
/// are caught by `check_base_path` before the write, so any index violation
/// left over is a conflict and the retry re-reads.
fn classify(err: StorageError, key: &DocumentKey) -> StorageError {
    if let StorageError::Database(sqlx::Error::Database(db)) = &err {
        if db.is_unique_violation() {
            debug!(%key, message = db.message(), "Unique index violation");
            return StorageError::Conflict {
                key: key.to_string(),
            };
        }
    }
    err
}

fn document_from_row(row: &SqliteRow) -> Result<Document> {
    let id: String = row.get("id");
    let content_id: String = row.get("content_id");
    Ok(Document {
        id: Uuid::parse_str(&id)?,
        content_id: Uuid::parse_str(&content_id)?,
        locale: row.get("locale"),
        stale_lock_version: row.get("stale_lock_version"),
    })
}

fn edition_from_row(row: &SqliteRow) -> Result<Edition> {
    let id: String = row.get("id");
    let document_id: String = row.get("document_id");
    let state: String = row.get("state");
    let content: String = row.get("content");
    let last_edited_at: String = row.get("last_edited_at");
    Ok(Edition {
        id: Uuid::parse_str(&id)?,
        document_id: Uuid::parse_str(&document_id)?,
        user_facing_version: row.get("user_facing_version"),
        state: state.parse()?,
        content: serde_json::from_str::<EditionContent>(&content)?,
        first_published_at: parse_opt_time(row.get("first_published_at"))?,
        published_at: parse_opt_time(row.get("published_at"))?,
        last_edited_at: parse_time(&last_edited_at)?,
    })
}

fn event_from_row(row: &SqliteRow) -> Result<Event> {
    let action: String = row.get("action");
    let content_id: String = row.get("content_id");
    let created_at: String = row.get("created_at");
    Ok(Event {
        id: row.get("id"),
        action: action.parse()?,
        content_id: Uuid::parse_str(&content_id)?,
        locale: row.get("locale"),
        user: row.get("user"),
        created_at: parse_time(&created_at)?,
        edition_diff: parse_diff(row.get("edition_diff"))?,
    })
}

async fn fetch_document(conn: &mut SqliteConnection, key: &DocumentKey) -> Result<Option<Document>> {
    let query = Query::select()
        .columns([
            Documents::Id,
            Documents::ContentId,
            Documents::Locale,
            Documents::StaleLockVersion,
        ])
        .from(Documents::Table)
        .and_where(Expr::col(Documents::ContentId).eq(key.content_id.to_string()))
        .and_where(Expr::col(Documents::Locale).eq(key.locale.as_str()))
        .to_string(SqliteQueryBuilder);

    let row = sqlx::query(&query).fetch_optional(&mut *conn).await?;
    row.as_ref().map(document_from_row).transpose()
}

async fn fetch_editions(conn: &mut SqliteConnection, document_id: Uuid) -> Result<Vec<Edition>> {
    let query = Query::select()
        .columns([
            Editions::Id,
            Editions::DocumentId,
            Editions::UserFacingVersion,
            Editions::State,
            Editions::Content,
            Editions::FirstPublishedAt,
            Editions::PublishedAt,
            Editions::LastEditedAt,
        ])
        .from(Editions::Table)
        .and_where(Expr::col(Editions::DocumentId).eq(document_id.to_string()))
        .order_by(Editions::UserFacingVersion, Order::Asc)
        .to_string(SqliteQueryBuilder);

    let rows = sqlx::query(&query).fetch_all(&mut *conn).await?;
    rows.iter().map(edition_from_row).collect()
}

async fn fetch_unpublishing(conn: &mut SqliteConnection, edition_id: Uuid) -> Result<Option<Unpublishing>> {
    let query = Query::select()
        .columns([
            Unpublishings::EditionId,
            Unpublishings::Type,
            Unpublishings::Explanation,
            Unpublishings::AlternativePath,
            Unpublishings::CreatedAt,
        ])
        .from(Unpublishings::Table)
        .and_where(Expr::col(Unpublishings::EditionId).eq(edition_id.to_string()))
        .to_string(SqliteQueryBuilder);

    let Some(row) = sqlx::query(&query).fetch_optional(&mut *conn).await? else {
        return Ok(None);
    };
    let kind: String = row.get("type");
    let created_at: String = row.get("created_at");
    Ok(Some(Unpublishing {
        edition_id,
        kind: kind.parse()?,
        explanation: row.get("explanation"),
        alternative_path: row.get("alternative_path"),
        created_at: parse_time(&created_at)?,
    }))
}

async fn fetch_link_set(conn: &mut SqliteConnection, content_id: Uuid) -> Result<Option<LinkSet>> {
    let query = Query::select()
        .column(LinkSets::StaleLockVersion)
        .from(LinkSets::Table)
        .and_where(Expr::col(LinkSets::ContentId).eq(content_id.to_string()))
        .to_string(SqliteQueryBuilder);

    let Some(row) = sqlx::query(&query).fetch_optional(&mut *conn).await? else {
        return Ok(None);
    };
    let stale_lock_version: i64 = row.get("stale_lock_version");

    let query = Query::select()
        .columns([LinkRows::LinkType, LinkRows::TargetContentId])
        .from(LinkRows::Table)
        .and_where(Expr::col(LinkRows::LinkSetContentId).eq(content_id.to_string()))
        .order_by(LinkRows::LinkType, Order::Asc)
        .order_by(LinkRows::Position, Order::Asc)
        .to_string(SqliteQueryBuilder);

    let mut links = Links::new();
    for row in sqlx::query(&query).fetch_all(&mut *conn).await? {
        let link_type: String = row.get("link_type");
        let target: String = row.get("target_content_id");
        links
            .entry(link_type)
            .or_default()
            .push(Uuid::parse_str(&target)?);
    }

    Ok(Some(LinkSet {
        content_id,
        stale_lock_version,
        links,
    }))
}

async fn fetch_reservation(conn: &mut SqliteConnection, base_path: &str) -> Result<Option<PathReservation>> {
    let query = Query::select()
        .columns([
            PathReservations::BasePath,
            PathReservations::PublishingApp,
            PathReservations::CreatedAt,
            PathReservations::UpdatedAt,
        ])
        .from(PathReservations::Table)
        .and_where(Expr::col(PathReservations::BasePath).eq(base_path))
        .to_string(SqliteQueryBuilder);

    let Some(row) = sqlx::query(&query).fetch_optional(&mut *conn).await? else {
        return Ok(None);
    };
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");
    Ok(Some(PathReservation {
        base_path: row.get("base_path"),
        publishing_app: row.get("publishing_app"),
        created_at: parse_time(&created_at)?,
        updated_at: parse_time(&updated_at)?,
    }))
}

async fn read_snapshot(conn: &mut SqliteConnection, key: &DocumentKey) -> Result<Option<DocumentSnapshot>> {
    let Some(document) = fetch_document(conn, key).await? else {
        return Ok(None);
    };
    let editions = fetch_editions(conn, document.id).await?;
    let unpublishing = match editions.iter().find(|e| e.state == EditionState::Unpublished) {
        Some(edition) => fetch_unpublishing(conn, edition.id).await?,
        None => None,
    };
    let link_set = fetch_link_set(conn, document.content_id).await?;

    Ok(Some(DocumentSnapshot {
        document,
        editions,
        unpublishing,
        link_set,
    }))
}

async fn swap_document(conn: &mut SqliteConnection, mutation: &Mutation) -> Result<()> {
    let key = mutation.key();
    let expected_next = mutation.expected_lock.map(|v| v + 1).unwrap_or(0);
    if mutation.document.stale_lock_version != expected_next {
        return Err(StorageError::Corrupt(format!(
            "document {} lock version must advance to {}",
            key, expected_next
        )));
    }

    match mutation.expected_lock {
        None => {
            let query = Query::insert()
                .into_table(Documents::Table)
                .columns([
                    Documents::Id,
                    Documents::ContentId,
                    Documents::Locale,
                    Documents::StaleLockVersion,
                ])
                .values_panic([
                    mutation.document.id.to_string().into(),
                    key.content_id.to_string().into(),
                    key.locale.clone().into(),
                    0i64.into(),
                ])
                .to_string(SqliteQueryBuilder);
            sqlx::query(&query).execute(&mut *conn).await?;
        }
        Some(expected) => {
            let query = Query::update()
                .table(Documents::Table)
                .values([(Documents::StaleLockVersion, (expected + 1).into())])
                .and_where(Expr::col(Documents::Id).eq(mutation.document.id.to_string()))
                .and_where(Expr::col(Documents::StaleLockVersion).eq(expected))
                .to_string(SqliteQueryBuilder);
            let result = sqlx::query(&query).execute(&mut *conn).await?;
            if result.rows_affected() == 0 {
                return Err(StorageError::Conflict {
                    key: key.to_string(),
                });
            }
        }
    }
    Ok(())
}

async fn reserve(
    conn: &mut SqliteConnection,
    request: &ReservationRequest,
    now: DateTime<Utc>,
) -> Result<PathReservation> {
    let existing = fetch_reservation(conn, &request.base_path).await?;
    let outcome = request
        .resolve(existing.as_ref())
        .map_err(|owner| StorageError::PathConflict {
            base_path: request.base_path.clone(),
            owner,
        })?;
    let row = outcome.apply(request, existing.as_ref(), now);
    if outcome == ReservationOutcome::Unchanged {
        return Ok(row);
    }

    let query = Query::insert()
        .into_table(PathReservations::Table)
        .columns([
            PathReservations::BasePath,
            PathReservations::PublishingApp,
            PathReservations::CreatedAt,
            PathReservations::UpdatedAt,
        ])
        .values_panic([
            row.base_path.clone().into(),
            row.publishing_app.clone().into(),
            row.created_at.to_rfc3339().into(),
            row.updated_at.to_rfc3339().into(),
        ])
        .on_conflict(
            OnConflict::column(PathReservations::BasePath)
                .update_columns([PathReservations::PublishingApp, PathReservations::UpdatedAt])
                .to_owned(),
        )
        .to_string(SqliteQueryBuilder);
    sqlx::query(&query).execute(&mut *conn).await?;

    debug!(base_path = %row.base_path, publishing_app = %row.publishing_app, ?outcome, "Path reserved");
    Ok(row)
}

/// Reject an edition whose base path is already held, in the same state
/// class, by another document of the same locale.
async fn check_base_path(conn: &mut SqliteConnection, edition: &Edition, document: &Document) -> Result<()> {
    let states: Vec<&str> = match edition.state {
        EditionState::Draft => vec![EditionState::Draft.as_str()],
        EditionState::Published | EditionState::Unpublished => vec![
            EditionState::Published.as_str(),
            EditionState::Unpublished.as_str(),
        ],
        EditionState::Superseded => return Ok(()),
    };

    let query = Query::select()
        .column((Documents::Table, Documents::ContentId))
        .from(Editions::Table)
        .inner_join(
            Documents::Table,
            Expr::col((Documents::Table, Documents::Id)).equals((Editions::Table, Editions::DocumentId)),
        )
        .and_where(Expr::col((Editions::Table, Editions::BasePath)).eq(edition.base_path()))
        .and_where(Expr::col((Editions::Table, Editions::Locale)).eq(document.locale.as_str()))
        .and_where(Expr::col((Editions::Table, Editions::State)).is_in(states))
        .and_where(Expr::col((Editions::Table, Editions::DocumentId)).ne(document.id.to_string()))
        .limit(1)
        .to_string(SqliteQueryBuilder);

    if let Some(row) = sqlx::query(&query).fetch_optional(&mut *conn).await? {
        return Err(StorageError::BasePathTaken {
            base_path: edition.base_path().to_string(),
            content_id: row.get("content_id"),
            locale: document.locale.clone(),
        });
    }
    Ok(())
}

/// Reject a write that would give the document a second draft or a second
/// live edition.
async fn check_slot(conn: &mut SqliteConnection, edition: &Edition, document: &Document) -> Result<()> {
    let states: Vec<&str> = match edition.state {
        EditionState::Draft => vec![EditionState::Draft.as_str()],
        EditionState::Published | EditionState::Unpublished => vec![
            EditionState::Published.as_str(),
            EditionState::Unpublished.as_str(),
        ],
        EditionState::Superseded => return Ok(()),
    };

    let query = Query::select()
        .column(Editions::Id)
        .from(Editions::Table)
        .and_where(Expr::col(Editions::DocumentId).eq(document.id.to_string()))
        .and_where(Expr::col(Editions::State).is_in(states))
        .and_where(Expr::col(Editions::Id).ne(edition.id.to_string()))
        .limit(1)
        .to_string(SqliteQueryBuilder);

    if sqlx::query(&query).fetch_optional(&mut *conn).await?.is_some() {
        return Err(StorageError::Conflict {
            key: DocumentKey::new(document.content_id, document.locale.clone()).to_string(),
        });
    }
    Ok(())
}

async fn write_edition(conn: &mut SqliteConnection, write: &EditionWrite, document: &Document) -> Result<()> {
    match write {
        EditionWrite::Insert(edition) => {
            check_slot(conn, edition, document).await?;
            check_base_path(conn, edition, document).await?;
            let query = Query::insert()
                .into_table(Editions::Table)
                .columns([
                    Editions::Id,
                    Editions::DocumentId,
                    Editions::Locale,
                    Editions::UserFacingVersion,
                    Editions::State,
                    Editions::BasePath,
                    Editions::DocumentType,
                    Editions::Content,
                    Editions::FirstPublishedAt,
                    Editions::PublishedAt,
                    Editions::LastEditedAt,
                ])
                .values_panic([
                    edition.id.to_string().into(),
                    edition.document_id.to_string().into(),
                    document.locale.clone().into(),
                    edition.user_facing_version.into(),
                    edition.state.as_str().into(),
                    edition.base_path().into(),
                    edition.document_type().into(),
                    serde_json::to_string(&edition.content)?.into(),
                    edition.first_published_at.map(|t| t.to_rfc3339()).into(),
                    edition.published_at.map(|t| t.to_rfc3339()).into(),
                    edition.last_edited_at.to_rfc3339().into(),
                ])
                .to_string(SqliteQueryBuilder);
            sqlx::query(&query).execute(&mut *conn).await?;
        }
        EditionWrite::Update(edition) => {
            check_slot(conn, edition, document).await?;
            check_base_path(conn, edition, document).await?;
            let query = Query::update()
                .table(Editions::Table)
                .values([
                    (Editions::UserFacingVersion, edition.user_facing_version.into()),
                    (Editions::State, edition.state.as_str().into()),
                    (Editions::BasePath, edition.base_path().into()),
                    (Editions::DocumentType, edition.document_type().into()),
                    (Editions::Content, serde_json::to_string(&edition.content)?.into()),
                    (
                        Editions::FirstPublishedAt,
                        edition.first_published_at.map(|t| t.to_rfc3339()).into(),
                    ),
                    (
                        Editions::PublishedAt,
                        edition.published_at.map(|t| t.to_rfc3339()).into(),
                    ),
                    (Editions::LastEditedAt, edition.last_edited_at.to_rfc3339().into()),
                ])
                .and_where(Expr::col(Editions::Id).eq(edition.id.to_string()))
                .and_where(Expr::col(Editions::DocumentId).eq(document.id.to_string()))
                .to_string(SqliteQueryBuilder);
            let result = sqlx::query(&query).execute(&mut *conn).await?;
            if result.rows_affected() == 0 {
                return Err(StorageError::Conflict {
                    key: edition.id.to_string(),
                });
            }
        }
        EditionWrite::Delete(id) => {
            let query = Query::delete()
                .from_table(Unpublishings::Table)
                .and_where(Expr::col(Unpublishings::EditionId).eq(id.to_string()))
                .to_string(SqliteQueryBuilder);
            sqlx::query(&query).execute(&mut *conn).await?;

            let query = Query::delete()
                .from_table(Editions::Table)
                .and_where(Expr::col(Editions::Id).eq(id.to_string()))
                .and_where(Expr::col(Editions::DocumentId).eq(document.id.to_string()))
                .to_string(SqliteQueryBuilder);
            let result = sqlx::query(&query).execute(&mut *conn).await?;
            if result.rows_affected() == 0 {
                return Err(StorageError::Conflict { key: id.to_string() });
            }
        }
    }
    Ok(())
}

async fn upsert_unpublishing(conn: &mut SqliteConnection, unpublishing: &Unpublishing) -> Result<()> {
    let query = Query::insert()
        .into_table(Unpublishings::Table)
        .columns([
            Unpublishings::EditionId,
            Unpublishings::Type,
            Unpublishings::Explanation,
            Unpublishings::AlternativePath,
            Unpublishings::CreatedAt,
        ])
        .values_panic([
            unpublishing.edition_id.to_string().into(),
            unpublishing.kind.as_str().into(),
            unpublishing.explanation.clone().into(),
            unpublishing.alternative_path.clone().into(),
            unpublishing.created_at.to_rfc3339().into(),
        ])
        .on_conflict(
            OnConflict::column(Unpublishings::EditionId)
                .update_columns([
                    Unpublishings::Type,
                    Unpublishings::Explanation,
                    Unpublishings::AlternativePath,
                    Unpublishings::CreatedAt,
                ])
                .to_owned(),
        )
        .to_string(SqliteQueryBuilder);
    sqlx::query(&query).execute(&mut *conn).await?;
    Ok(())
}

async fn patch_links(conn: &mut SqliteConnection, patch: &LinkPatch) -> Result<LinkSet> {
    let current = fetch_link_set(conn, patch.content_id).await?;
    if current.as_ref().map(|s| s.stale_lock_version) != patch.expected_lock {
        return Err(StorageError::Conflict {
            key: format!("link set {}", patch.content_id),
        });
    }
    let next = current
        .unwrap_or_else(|| LinkSet {
            stale_lock_version: -1,
            ..LinkSet::new(patch.content_id)
        })
        .patched(&patch.links);
    let content_id = patch.content_id.to_string();

    let query = Query::insert()
        .into_table(LinkSets::Table)
        .columns([LinkSets::ContentId, LinkSets::StaleLockVersion])
        .values_panic([content_id.clone().into(), next.stale_lock_version.into()])
        .on_conflict(
            OnConflict::column(LinkSets::ContentId)
                .update_column(LinkSets::StaleLockVersion)
                .to_owned(),
        )
        .to_string(SqliteQueryBuilder);
    sqlx::query(&query).execute(&mut *conn).await?;

    let query = Query::delete()
        .from_table(LinkRows::Table)
        .and_where(Expr::col(LinkRows::LinkSetContentId).eq(content_id.as_str()))
        .to_string(SqliteQueryBuilder);
    sqlx::query(&query).execute(&mut *conn).await?;

    for (link_type, targets) in &next.links {
        for (position, target) in targets.iter().enumerate() {
            let query = Query::insert()
                .into_table(LinkRows::Table)
                .columns([
                    LinkRows::LinkSetContentId,
                    LinkRows::LinkType,
                    LinkRows::Position,
                    LinkRows::TargetContentId,
                ])
                .values_panic([
                    content_id.clone().into(),
                    link_type.clone().into(),
                    (position as i64).into(),
                    target.to_string().into(),
                ])
                .to_string(SqliteQueryBuilder);
            sqlx::query(&query).execute(&mut *conn).await?;
        }
    }

    Ok(next)
}

async fn insert_event(
    conn: &mut SqliteConnection,
    entry: EventEntry,
    edition_diff: Option<Vec<String>>,
    now: DateTime<Utc>,
) -> Result<Event> {
    let query = Query::insert()
        .into_table(Events::Table)
        .columns([
            Events::Action,
            Events::ContentId,
            Events::Locale,
            Events::User,
            Events::CreatedAt,
            Events::EditionDiff,
        ])
        .values_panic([
            entry.action.to_string().into(),
            entry.content_id.to_string().into(),
            entry.locale.clone().into(),
            entry.user.clone().into(),
            now.to_rfc3339().into(),
            encode_diff(&edition_diff)?.into(),
        ])
        .to_string(SqliteQueryBuilder);
    let result = sqlx::query(&query).execute(&mut *conn).await?;

    Ok(Event {
        id: result.last_insert_rowid(),
        action: entry.action,
        content_id: entry.content_id,
        locale: entry.locale,
        user: entry.user,
        created_at: now,
        edition_diff,
    })
}

async fn insert_action(conn: &mut SqliteConnection, action: &Action) -> Result<()> {
    let (edition_id, link_set_content_id) = match action.target {
        ActionTarget::Edition(id) => (Some(id.to_string()), None),
        ActionTarget::LinkSet(id) => (None, Some(id.to_string())),
    };
    let query = Query::insert()
        .into_table(Actions::Table)
        .columns([
            Actions::EventId,
            Actions::Action,
            Actions::ContentId,
            Actions::Locale,
            Actions::User,
            Actions::EditionId,
            Actions::LinkSetContentId,
            Actions::EditionDiff,
            Actions::CreatedAt,
        ])
        .values_panic([
            action.event_id.into(),
            action.action.to_string().into(),
            action.content_id.to_string().into(),
            action.locale.clone().into(),
            action.user.clone().into(),
            edition_id.into(),
            link_set_content_id.into(),
            encode_diff(&action.edition_diff)?.into(),
            action.created_at.to_rfc3339().into(),
        ])
        .to_string(SqliteQueryBuilder);
    sqlx::query(&query).execute(&mut *conn).await?;
    Ok(())
}

async fn apply_mutation(conn: &mut SqliteConnection, mutation: Mutation) -> Result<Event> {
    let key = mutation.key();

    swap_document(conn, &mutation).await?;
    if let Some(request) = &mutation.reservation {
        reserve(conn, request, mutation.now).await?;
    }
    for write in &mutation.edition_writes {
        write_edition(conn, write, &mutation.document).await?;
    }
    if let Some(unpublishing) = &mutation.unpublishing {
        upsert_unpublishing(conn, unpublishing).await?;
    }
    if let Some(patch) = &mutation.link_patch {
        patch_links(conn, patch).await?;
    }

    let event = insert_event(
        conn,
        EventEntry {
            action: mutation.log.action,
            content_id: key.content_id,
            locale: Some(key.locale.clone()),
            user: mutation.log.user.clone(),
        },
        mutation.log.edition_diff.clone(),
        mutation.now,
    )
    .await?;
    insert_action(conn, &Action::for_event(&event, mutation.log.target)).await?;
    Ok(event)
}

#[async_trait]
impl PublishingStore for SqliteStore {
    async fn load_document(&self, content_id: Uuid, locale: &str) -> Result<Option<DocumentSnapshot>> {
        let key = DocumentKey::new(content_id, locale);
        let mut conn = self.pool.acquire().await?;
        // A read transaction keeps the snapshot at one lock version under WAL.
        sqlx::query("BEGIN").execute(&mut *conn).await?;
        let result = read_snapshot(&mut conn, &key).await;
        Self::finish(conn, result).await
    }

    async fn documents(&self, filter: &DocumentFilter) -> Result<Vec<DocumentKey>> {
        // The statement is not Send, so render it before the first await.
        let sql = {
            let mut query = Query::select();
            query
                .columns([Documents::ContentId, Documents::Locale])
                .from(Documents::Table)
                .order_by(Documents::ContentId, Order::Asc)
                .order_by(Documents::Locale, Order::Asc);

            if let Some(ids) = &filter.content_ids {
                query.and_where(
                    Expr::col(Documents::ContentId).is_in(ids.iter().map(|id| id.to_string())),
                );
            }
            if let Some(types) = &filter.document_types {
                query.and_where(
                    Expr::col(Documents::Id).in_subquery(
                        Query::select()
                            .column(Editions::DocumentId)
                            .from(Editions::Table)
                            .and_where(
                                Expr::col(Editions::DocumentType).is_in(types.iter().cloned()),
                            )
                            .to_owned(),
                    ),
                );
            }
            query.to_string(SqliteQueryBuilder)
        };

        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                let content_id: String = row.get("content_id");
                Ok(DocumentKey::new(
                    Uuid::parse_str(&content_id)?,
                    row.get::<String, _>("locale"),
                ))
            })
            .collect()
    }

    async fn commit(&self, mutation: Mutation) -> Result<Event> {
        let key = mutation.key();
        let mut conn = self.begin().await?;
        let result = apply_mutation(&mut conn, mutation).await;
        Self::finish(conn, result)
            .await
            .map_err(|e| classify(e, &key))
    }

    async fn reserve_path(&self, request: &ReservationRequest) -> Result<PathReservation> {
        let mut conn = self.begin().await?;
        let result = reserve(&mut conn, request, Utc::now()).await;
        Self::finish(conn, result).await
    }

    async fn path_reservation(&self, base_path: &str) -> Result<Option<PathReservation>> {
        let mut conn = self.pool.acquire().await?;
        fetch_reservation(&mut conn, base_path).await
    }

    async fn link_set(&self, content_id: Uuid) -> Result<Option<LinkSet>> {
        let mut conn = self.pool.acquire().await?;
        fetch_link_set(&mut conn, content_id).await
    }

    async fn patch_link_set(&self, patch: LinkPatch, user: Option<String>) -> Result<(LinkSet, Event)> {
        let key = DocumentKey::new(patch.content_id, "");
        let mut conn = self.begin().await?;
        let result: Result<(LinkSet, Event)> = async {
            let link_set = patch_links(&mut conn, &patch).await?;
            let event = insert_event(
                &mut conn,
                EventEntry {
                    action: ActionKind::PatchLinkSet,
                    content_id: patch.content_id,
                    locale: None,
                    user,
                },
                None,
                Utc::now(),
            )
            .await?;
            insert_action(
                &mut conn,
                &Action::for_event(&event, ActionTarget::LinkSet(patch.content_id)),
            )
            .await?;
            Ok((link_set, event))
        }
        .await;
        Self::finish(conn, result)
            .await
            .map_err(|e| classify(e, &key))
    }

    async fn dependents(&self, target: Uuid) -> Result<Vec<Uuid>> {
        let query = Query::select()
            .distinct()
            .column(LinkRows::LinkSetContentId)
            .from(LinkRows::Table)
            .and_where(Expr::col(LinkRows::TargetContentId).eq(target.to_string()))
            .order_by(LinkRows::LinkSetContentId, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                let id: String = row.get("link_set_content_id");
                Ok(Uuid::parse_str(&id)?)
            })
            .collect()
    }

    async fn append_event(&self, entry: EventEntry) -> Result<Event> {
        let mut conn = self.begin().await?;
        let result = insert_event(&mut conn, entry, None, Utc::now()).await;
        Self::finish(conn, result).await
    }

    async fn events(&self, content_id: Uuid) -> Result<Vec<Event>> {
        let query = Query::select()
            .columns([
                Events::Id,
                Events::Action,
                Events::ContentId,
                Events::Locale,
                Events::User,
                Events::CreatedAt,
                Events::EditionDiff,
            ])
            .from(Events::Table)
            .and_where(Expr::col(Events::ContentId).eq(content_id.to_string()))
            .order_by(Events::Id, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(event_from_row).collect()
    }

    async fn audit_trail(&self, content_id: Uuid) -> Result<Vec<AuditRecord>> {
        let query = Query::select()
            .columns([
                Actions::EventId,
                Actions::Action,
                Actions::ContentId,
                Actions::Locale,
                Actions::User,
                Actions::EditionDiff,
            ])
            .from(Actions::Table)
            .and_where(Expr::col(Actions::ContentId).eq(content_id.to_string()))
            .order_by(Actions::EventId, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                let action: String = row.get("action");
                let content_id: String = row.get("content_id");
                Ok(AuditRecord {
                    event_id: row.get("event_id"),
                    action: action.parse()?,
                    content_id: Uuid::parse_str(&content_id)?,
                    locale: row.get("locale"),
                    user: row.get("user"),
                    edition_diff: parse_diff(row.get("edition_diff"))?,
                })
            })
            .collect()
    }
}


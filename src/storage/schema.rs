//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.
//! The partial unique indexes on `editions` are what keep the cardinality
//! and base path rules true under concurrent writers.

use sea_query::Iden;

/// Documents table schema.
#[derive(Iden)]
pub enum Documents {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "content_id"]
    ContentId,
    #[iden = "locale"]
    Locale,
    #[iden = "stale_lock_version"]
    StaleLockVersion,
}

/// Editions table schema.
///
/// `content` holds the JSON-encoded caller content; `base_path`,
/// `document_type` and `locale` are copied out of it so they can be indexed.
#[derive(Iden)]
pub enum Editions {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "document_id"]
    DocumentId,
    #[iden = "locale"]
    Locale,
    #[iden = "user_facing_version"]
    UserFacingVersion,
    #[iden = "state"]
    State,
    #[iden = "base_path"]
    BasePath,
    #[iden = "document_type"]
    DocumentType,
    #[iden = "content"]
    Content,
    #[iden = "first_published_at"]
    FirstPublishedAt,
    #[iden = "published_at"]
    PublishedAt,
    #[iden = "last_edited_at"]
    LastEditedAt,
}

/// Unpublishings table schema.
#[derive(Iden)]
pub enum Unpublishings {
    Table,
    #[iden = "edition_id"]
    EditionId,
    #[iden = "type"]
    Type,
    #[iden = "explanation"]
    Explanation,
    #[iden = "alternative_path"]
    AlternativePath,
    #[iden = "created_at"]
    CreatedAt,
}

/// Path reservations table schema.
#[derive(Iden)]
pub enum PathReservations {
    Table,
    #[iden = "base_path"]
    BasePath,
    #[iden = "publishing_app"]
    PublishingApp,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// Link sets table schema.
#[derive(Iden)]
pub enum LinkSets {
    Table,
    #[iden = "content_id"]
    ContentId,
    #[iden = "stale_lock_version"]
    StaleLockVersion,
}

/// Links table schema. One row per target, ordered within its link type.
#[derive(Iden)]
pub enum LinkRows {
    #[iden = "links"]
    Table,
    #[iden = "link_set_content_id"]
    LinkSetContentId,
    #[iden = "link_type"]
    LinkType,
    #[iden = "position"]
    Position,
    #[iden = "target_content_id"]
    TargetContentId,
}

/// Events table schema.
#[derive(Iden)]
pub enum Events {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "action"]
    Action,
    #[iden = "content_id"]
    ContentId,
    #[iden = "locale"]
    Locale,
    #[iden = "user"]
    User,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "edition_diff"]
    EditionDiff,
}

/// Actions table schema.
#[derive(Iden)]
pub enum Actions {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "event_id"]
    EventId,
    #[iden = "action"]
    Action,
    #[iden = "content_id"]
    ContentId,
    #[iden = "locale"]
    Locale,
    #[iden = "user"]
    User,
    #[iden = "edition_id"]
    EditionId,
    #[iden = "link_set_content_id"]
    LinkSetContentId,
    #[iden = "edition_diff"]
    EditionDiff,
    #[iden = "created_at"]
    CreatedAt,
}

/// SQL for creating the documents table.
pub const CREATE_DOCUMENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    content_id TEXT NOT NULL,
    locale TEXT NOT NULL,
    stale_lock_version INTEGER NOT NULL DEFAULT 0,
    UNIQUE (content_id, locale)
);
"#;

/// SQL for creating the editions table.
pub const CREATE_EDITIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS editions (
    id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL REFERENCES documents(id),
    locale TEXT NOT NULL,
    user_facing_version INTEGER NOT NULL,
    state TEXT NOT NULL,
    base_path TEXT NOT NULL,
    document_type TEXT NOT NULL,
    content TEXT NOT NULL,
    first_published_at TEXT,
    published_at TEXT,
    last_edited_at TEXT NOT NULL,
    UNIQUE (document_id, user_facing_version)
);
"#;

/// One draft and one live edition per document; one draft and one live
/// edition per base path within a locale.
pub const CREATE_EDITIONS_INDEXES: &[&str] = &[
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_editions_one_draft
        ON editions(document_id) WHERE state = 'draft'",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_editions_one_live
        ON editions(document_id) WHERE state IN ('published', 'unpublished')",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_editions_draft_base_path
        ON editions(base_path, locale) WHERE state = 'draft'",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_editions_live_base_path
        ON editions(base_path, locale) WHERE state IN ('published', 'unpublished')",
    "CREATE INDEX IF NOT EXISTS idx_editions_document_type ON editions(document_type)",
];

/// SQL for creating the unpublishings table.
pub const CREATE_UNPUBLISHINGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS unpublishings (
    edition_id TEXT PRIMARY KEY REFERENCES editions(id),
    type TEXT NOT NULL,
    explanation TEXT,
    alternative_path TEXT,
    created_at TEXT NOT NULL
);
"#;

/// SQL for creating the path reservations table.
pub const CREATE_PATH_RESERVATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS path_reservations (
    base_path TEXT PRIMARY KEY,
    publishing_app TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// SQL for creating the link set tables.
pub const CREATE_LINK_TABLES: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS link_sets (
        content_id TEXT PRIMARY KEY,
        stale_lock_version INTEGER NOT NULL DEFAULT 0
    )"#,
    r#"CREATE TABLE IF NOT EXISTS links (
        link_set_content_id TEXT NOT NULL REFERENCES link_sets(content_id),
        link_type TEXT NOT NULL,
        position INTEGER NOT NULL,
        target_content_id TEXT NOT NULL,
        PRIMARY KEY (link_set_content_id, link_type, position)
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_links_target ON links(target_content_id)",
];

/// SQL for creating the events table. `id` is the global ordering token.
pub const CREATE_EVENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    action TEXT NOT NULL,
    content_id TEXT NOT NULL,
    locale TEXT,
    user TEXT,
    created_at TEXT NOT NULL,
    edition_diff TEXT
);
"#;

/// SQL for creating the actions table.
pub const CREATE_ACTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS actions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id INTEGER NOT NULL REFERENCES events(id),
    action TEXT NOT NULL,
    content_id TEXT NOT NULL,
    locale TEXT,
    user TEXT,
    edition_id TEXT,
    link_set_content_id TEXT,
    edition_diff TEXT,
    created_at TEXT NOT NULL,
    CHECK ((edition_id IS NULL) <> (link_set_content_id IS NULL))
);
"#;

/// Every schema statement, in dependency order.
pub fn statements() -> Vec<&'static str> {
    let mut all = vec![CREATE_DOCUMENTS_TABLE, CREATE_EDITIONS_TABLE];
    all.extend_from_slice(CREATE_EDITIONS_INDEXES);
    all.push(CREATE_UNPUBLISHINGS_TABLE);
    all.push(CREATE_PATH_RESERVATIONS_TABLE);
    all.extend_from_slice(CREATE_LINK_TABLES);
    all.push(CREATE_EVENTS_TABLE);
    all.push(CREATE_ACTIONS_TABLE);
    all.push("CREATE INDEX IF NOT EXISTS idx_actions_content_id ON actions(content_id)");
    all
}

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use super::Store;
use super::schema::SCHEMA;
use crate::error::{Entity, Error, Result};
use crate::types::*;

const USER_COLUMNS: &str = "u.id, u.full_name, u.username, u.email, u.picture, u.email_confirmed, \
     u.password_hash, u.create_time, u.update_time";

const FILE_COLUMNS: &str = "f.id, f.workspace_id, f.name, f.type, f.parent_id, f.snapshot_id, \
     f.text, f.create_time, f.update_time";

const WORKSPACE_COLUMNS: &str = "w.id, w.name, w.organization_id, w.root_id, w.storage_capacity, \
     w.bucket, w.create_time, w.update_time";

const SNAPSHOT_COLUMNS: &str = "s.id, s.version, s.original, s.preview, s.text, s.ocr, s.entities, \
     s.mosaic, s.watermark, s.thumbnail, s.status, s.error, s.language, s.task_id, s.create_time, \
     s.update_time";

const TASK_COLUMNS: &str = "t.id, t.name, t.error, t.percentage, t.is_indeterminate, t.user_id, \
     t.status, t.payload, t.cancelled, t.create_time, t.update_time";

const INVITATION_COLUMNS: &str =
    "i.id, i.organization_id, i.owner_id, i.email, i.status, i.create_time, i.update_time";

/// Maps a permission column to its rank so upserts can keep the max.
fn rank_sql(column: &str) -> String {
    format!("(CASE {column} WHEN 'owner' THEN 3 WHEN 'editor' THEN 2 ELSE 1 END)")
}

#[derive(Clone, Copy)]
enum Principal {
    User,
    Group,
}

impl Principal {
    fn table(self) -> &'static str {
        match self {
            Self::User => "userpermission",
            Self::Group => "grouppermission",
        }
    }

    fn column(self) -> &'static str {
        match self {
            Self::User => "user_id",
            Self::Group => "group_id",
        }
    }
}

#[derive(Clone, Copy)]
enum Upsert {
    /// Keep whatever is there.
    Ignore,
    /// Overwrite with the new level.
    Set,
    /// Keep the higher of the two levels.
    Max,
}

fn upsert_sql(principal: Principal, mode: Upsert) -> String {
    let table = principal.table();
    let column = principal.column();
    let on_conflict = match mode {
        Upsert::Ignore => "DO NOTHING".to_string(),
        Upsert::Set => "DO UPDATE SET permission = excluded.permission".to_string(),
        Upsert::Max => format!(
            "DO UPDATE SET permission = CASE WHEN {} > {} THEN excluded.permission ELSE {table}.permission END",
            rank_sql("excluded.permission"),
            rank_sql(&format!("{table}.permission")),
        ),
    };
    format!(
        "INSERT INTO {table} (id, {column}, resource_id, permission, create_time)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT ({column}, resource_id) {on_conflict}"
    )
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        Self::configure(conn)
    }

    /// Private in-memory database, used by tests and single process setups.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure(conn)
    }

    fn configure(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns a guard to the underlying database connection.
    /// This allows consuming applications to execute custom SQL.
    pub fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn()
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Handle SQLite's default datetime format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

fn parse_optional_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.as_deref().map(parse_datetime)
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn now() -> String {
    format_datetime(&Utc::now())
}

fn parse_column<T>(idx: usize, value: String, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    match parse(&value) {
        Some(v) => Ok(v),
        None => Err(rusqlite::Error::InvalidColumnType(idx, value, Type::Text)),
    }
}

fn json_column<T: DeserializeOwned>(value: Option<String>) -> Option<T> {
    let value = value?;
    match serde_json::from_str(&value) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::error!("Invalid JSON in database: '{}' - {}", value, e);
            None
        }
    }
}

fn to_json<T: Serialize>(value: &Option<T>) -> Result<Option<String>> {
    value
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(Error::from)
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation)
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        full_name: row.get(1)?,
        username: row.get(2)?,
        email: row.get(3)?,
        picture: row.get(4)?,
        email_confirmed: row.get(5)?,
        password_hash: row.get(6)?,
        create_time: parse_datetime(&row.get::<_, String>(7)?),
        update_time: parse_optional_datetime(row.get(8)?),
    })
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<File> {
    Ok(File {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        name: row.get(2)?,
        file_type: parse_column(3, row.get(3)?, FileType::parse)?,
        parent_id: row.get(4)?,
        snapshot_id: row.get(5)?,
        text: row.get(6)?,
        user_permissions: Vec::new(),
        group_permissions: Vec::new(),
        create_time: parse_datetime(&row.get::<_, String>(7)?),
        update_time: parse_optional_datetime(row.get(8)?),
    })
}

fn workspace_from_row(row: &Row<'_>) -> rusqlite::Result<Workspace> {
    Ok(Workspace {
        id: row.get(0)?,
        name: row.get(1)?,
        organization_id: row.get(2)?,
        root_id: row.get(3)?,
        storage_capacity: row.get(4)?,
        bucket: row.get(5)?,
        user_permissions: Vec::new(),
        group_permissions: Vec::new(),
        create_time: parse_datetime(&row.get::<_, String>(6)?),
        update_time: parse_optional_datetime(row.get(7)?),
    })
}

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<Snapshot> {
    Ok(Snapshot {
        id: row.get(0)?,
        version: row.get(1)?,
        original: json_column(row.get(2)?),
        preview: json_column(row.get(3)?),
        text: json_column(row.get(4)?),
        ocr: json_column(row.get(5)?),
        entities: json_column(row.get(6)?),
        mosaic: json_column(row.get(7)?),
        watermark: json_column(row.get(8)?),
        thumbnail: json_column(row.get(9)?),
        status: parse_column(10, row.get(10)?, SnapshotStatus::parse)?,
        error: row.get(11)?,
        language: row.get(12)?,
        task_id: row.get(13)?,
        create_time: parse_datetime(&row.get::<_, String>(14)?),
        update_time: parse_optional_datetime(row.get(15)?),
    })
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        name: row.get(1)?,
        error: row.get(2)?,
        percentage: row.get(3)?,
        is_indeterminate: row.get(4)?,
        user_id: row.get(5)?,
        status: parse_column(6, row.get(6)?, TaskStatus::parse)?,
        payload: json_column::<HashMap<String, String>>(row.get(7)?),
        cancelled: row.get(8)?,
        create_time: parse_datetime(&row.get::<_, String>(9)?),
        update_time: parse_optional_datetime(row.get(10)?),
    })
}

fn invitation_from_row(row: &Row<'_>) -> rusqlite::Result<Invitation> {
    Ok(Invitation {
        id: row.get(0)?,
        organization_id: row.get(1)?,
        owner_id: row.get(2)?,
        email: row.get(3)?,
        status: parse_column(4, row.get(4)?, InvitationStatus::parse)?,
        create_time: parse_datetime(&row.get::<_, String>(5)?),
        update_time: parse_optional_datetime(row.get(6)?),
    })
}

fn query_list<T>(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
    map: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, map)?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

fn query_ids(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<String>> {
    query_list(conn, sql, params, |row| row.get(0))
}

fn load_user_permissions(conn: &Connection, resource_id: &str) -> Result<Vec<UserPermission>> {
    let mut stmt = conn.prepare(
        "SELECT user_id, permission FROM userpermission WHERE resource_id = ?1 ORDER BY create_time",
    )?;
    let rows = stmt.query_map(params![resource_id], |row| {
        Ok(UserPermission {
            user_id: row.get(0)?,
            permission: parse_column(1, row.get(1)?, PermissionLevel::parse)?,
        })
    })?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

fn load_group_permissions(conn: &Connection, resource_id: &str) -> Result<Vec<GroupPermission>> {
    let mut stmt = conn.prepare(
        "SELECT group_id, permission FROM grouppermission WHERE resource_id = ?1 ORDER BY create_time",
    )?;
    let rows = stmt.query_map(params![resource_id], |row| {
        Ok(GroupPermission {
            group_id: row.get(0)?,
            permission: parse_column(1, row.get(1)?, PermissionLevel::parse)?,
        })
    })?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

fn with_file_permissions(conn: &Connection, mut file: File) -> Result<File> {
    file.user_permissions = load_user_permissions(conn, &file.id)?;
    file.group_permissions = load_group_permissions(conn, &file.id)?;
    Ok(file)
}

fn with_files_permissions(conn: &Connection, files: Vec<File>) -> Result<Vec<File>> {
    files
        .into_iter()
        .map(|f| with_file_permissions(conn, f))
        .collect()
}

fn with_workspace_permissions(conn: &Connection, mut ws: Workspace) -> Result<Workspace> {
    ws.user_permissions = load_user_permissions(conn, &ws.id)?;
    ws.group_permissions = load_group_permissions(conn, &ws.id)?;
    Ok(ws)
}

fn get_file_row(conn: &Connection, id: &str) -> Result<Option<File>> {
    conn.query_row(
        &format!("SELECT {FILE_COLUMNS} FROM file f WHERE f.id = ?1"),
        params![id],
        file_from_row,
    )
    .optional()
    .map_err(Error::from)
}

fn get_snapshot_row(conn: &Connection, id: &str) -> Result<Option<Snapshot>> {
    conn.query_row(
        &format!("SELECT {SNAPSHOT_COLUMNS} FROM snapshot s WHERE s.id = ?1"),
        params![id],
        snapshot_from_row,
    )
    .optional()
    .map_err(Error::from)
}

fn ancestor_ids(conn: &Connection, id: &str) -> Result<Vec<String>> {
    query_ids(
        conn,
        "WITH RECURSIVE rec (id, parent_id, depth) AS (
             SELECT id, parent_id, 0 FROM file WHERE id = ?1
             UNION ALL
             SELECT f.id, f.parent_id, rec.depth + 1 FROM file f JOIN rec ON f.id = rec.parent_id
         )
         SELECT id FROM rec WHERE depth > 0 ORDER BY depth DESC",
        params![id],
    )
}

fn tree_ids(conn: &Connection, id: &str) -> Result<Vec<String>> {
    query_ids(
        conn,
        "WITH RECURSIVE rec (id, depth) AS (
             SELECT id, 0 FROM file WHERE id = ?1
             UNION ALL
             SELECT f.id, rec.depth + 1 FROM file f JOIN rec ON f.parent_id = rec.id
         )
         SELECT rec.id FROM rec JOIN file f ON f.id = rec.id ORDER BY rec.depth, f.create_time",
        params![id],
    )
}

fn workspace_id_of(conn: &Connection, file_id: &str) -> Result<String> {
    conn.query_row(
        "SELECT workspace_id FROM file WHERE id = ?1",
        params![file_id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or(Error::NotFound(Entity::File))
}

fn upsert_permission(
    conn: &Connection,
    principal: Principal,
    mode: Upsert,
    principal_id: &str,
    resource_id: &str,
    level: PermissionLevel,
) -> Result<()> {
    conn.execute(
        &upsert_sql(principal, mode),
        params![
            Uuid::new_v4().to_string(),
            principal_id,
            resource_id,
            level.as_str(),
            now(),
        ],
    )?;
    Ok(())
}

fn grant_on_tree(
    conn: &mut Connection,
    principal: Principal,
    file_id: &str,
    principal_id: &str,
    level: PermissionLevel,
) -> Result<()> {
    let tx = conn.transaction()?;

    let workspace_id = workspace_id_of(&tx, file_id)?;
    upsert_permission(
        &tx,
        principal,
        Upsert::Ignore,
        principal_id,
        &workspace_id,
        PermissionLevel::Viewer,
    )?;

    for ancestor in ancestor_ids(&tx, file_id)? {
        upsert_permission(
            &tx,
            principal,
            Upsert::Ignore,
            principal_id,
            &ancestor,
            PermissionLevel::Viewer,
        )?;
    }

    for id in tree_ids(&tx, file_id)? {
        upsert_permission(&tx, principal, Upsert::Max, principal_id, &id, level)?;
    }

    tx.commit()?;
    Ok(())
}

fn revoke_on_tree(
    conn: &mut Connection,
    principal: Principal,
    file_id: &str,
    principal_id: &str,
) -> Result<()> {
    let tx = conn.transaction()?;
    let sql = format!(
        "DELETE FROM {} WHERE {} = ?1 AND resource_id = ?2",
        principal.table(),
        principal.column()
    );
    for id in tree_ids(&tx, file_id)? {
        tx.execute(&sql, params![principal_id, id])?;
    }
    tx.commit()?;
    Ok(())
}

fn file_values(file: &File) -> [Value; 9] {
    let opt = |v: &Option<String>| match v {
        Some(s) => Value::Text(s.clone()),
        None => Value::Null,
    };
    [
        Value::Text(file.id.clone()),
        Value::Text(file.workspace_id.clone()),
        Value::Text(file.name.clone()),
        Value::Text(file.file_type.as_str().to_string()),
        opt(&file.parent_id),
        opt(&file.snapshot_id),
        opt(&file.text),
        Value::Text(format_datetime(&file.create_time)),
        match &file.update_time {
            Some(t) => Value::Text(format_datetime(t)),
            None => Value::Null,
        },
    ]
}

fn insert_file_row(conn: &Connection, file: &File) -> Result<()> {
    conn.execute(
        "INSERT INTO file (id, workspace_id, name, type, parent_id, snapshot_id, text, create_time, update_time)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params_from_iter(file_values(file)),
    )?;
    Ok(())
}

fn insert_snapshot_row(conn: &Connection, snapshot: &Snapshot) -> Result<()> {
    conn.execute(
        "INSERT INTO snapshot (id, version, original, preview, text, ocr, entities, mosaic, watermark,
                               thumbnail, status, error, language, task_id, create_time, update_time)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            snapshot.id,
            snapshot.version,
            to_json(&snapshot.original)?,
            to_json(&snapshot.preview)?,
            to_json(&snapshot.text)?,
            to_json(&snapshot.ocr)?,
            to_json(&snapshot.entities)?,
            to_json(&snapshot.mosaic)?,
            to_json(&snapshot.watermark)?,
            to_json(&snapshot.thumbnail)?,
            snapshot.status.as_str(),
            snapshot.error,
            snapshot.language,
            snapshot.task_id,
            format_datetime(&snapshot.create_time),
            snapshot.update_time.as_ref().map(format_datetime),
        ],
    )?;
    Ok(())
}

fn save_snapshot_row(conn: &Connection, snapshot: &Snapshot) -> Result<()> {
    conn.execute(
        "UPDATE snapshot SET version = ?1, original = ?2, preview = ?3, text = ?4, ocr = ?5,
             entities = ?6, mosaic = ?7, watermark = ?8, thumbnail = ?9, status = ?10, error = ?11,
             language = ?12, task_id = ?13, update_time = ?14
         WHERE id = ?15",
        params![
            snapshot.version,
            to_json(&snapshot.original)?,
            to_json(&snapshot.preview)?,
            to_json(&snapshot.text)?,
            to_json(&snapshot.ocr)?,
            to_json(&snapshot.entities)?,
            to_json(&snapshot.mosaic)?,
            to_json(&snapshot.watermark)?,
            to_json(&snapshot.thumbnail)?,
            snapshot.status.as_str(),
            snapshot.error,
            snapshot.language,
            snapshot.task_id,
            snapshot.update_time.as_ref().map(format_datetime),
            snapshot.id,
        ],
    )?;
    Ok(())
}

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // User operations

    fn create_user(&self, user: &User) -> Result<()> {
        let result = self.conn().execute(
            "INSERT INTO \"user\" (id, full_name, username, email, picture, email_confirmed, password_hash, create_time, update_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                user.id,
                user.full_name,
                user.username,
                user.email,
                user.picture,
                user.email_confirmed,
                user.password_hash,
                format_datetime(&user.create_time),
                user.update_time.as_ref().map(format_datetime),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => Err(Error::conflict(
                "user_already_exists",
                "a user with this username or email already exists",
            )),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn get_user(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM \"user\" u WHERE u.id = ?1"),
            params![id],
            user_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM \"user\" u WHERE u.username = ?1"),
            params![username],
            user_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM \"user\" u WHERE lower(u.email) = lower(?1)"),
            params![email],
            user_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    // Token operations

    fn create_token(&self, token: &Token) -> Result<()> {
        let result = self.conn().execute(
            "INSERT INTO token (id, user_id, kind, token_lookup, token_hash, expires_at, create_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                token.id,
                token.user_id,
                token.kind.as_str(),
                token.token_lookup,
                token.token_hash,
                format_datetime(&token.expires_at),
                format_datetime(&token.create_time),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => Err(Error::conflict(
                "token_lookup_collision",
                "token lookup collision",
            )),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn get_token_by_lookup(&self, lookup: &str) -> Result<Option<Token>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, user_id, kind, token_hash, token_lookup, expires_at, create_time
             FROM token WHERE token_lookup = ?1",
            params![lookup],
            |row| {
                Ok(Token {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    kind: parse_column(2, row.get(2)?, TokenKind::parse)?,
                    token_hash: row.get(3)?,
                    token_lookup: row.get(4)?,
                    expires_at: parse_datetime(&row.get::<_, String>(5)?),
                    create_time: parse_datetime(&row.get::<_, String>(6)?),
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    fn delete_token(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM token WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn delete_expired_tokens(&self) -> Result<usize> {
        let rows = self
            .conn()
            .execute("DELETE FROM token WHERE expires_at < ?1", params![now()])?;
        Ok(rows)
    }

    // Organization operations

    fn create_organization(&self, org: &Organization) -> Result<()> {
        self.conn().execute(
            "INSERT INTO organization (id, name, create_time, update_time) VALUES (?1, ?2, ?3, ?4)",
            params![
                org.id,
                org.name,
                format_datetime(&org.create_time),
                org.update_time.as_ref().map(format_datetime),
            ],
        )?;
        Ok(())
    }

    fn get_organization(&self, id: &str) -> Result<Option<Organization>> {
        let conn = self.conn();
        let org = conn
            .query_row(
                "SELECT id, name, create_time, update_time FROM organization WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Organization {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        user_permissions: Vec::new(),
                        group_permissions: Vec::new(),
                        members: Vec::new(),
                        create_time: parse_datetime(&row.get::<_, String>(2)?),
                        update_time: parse_optional_datetime(row.get(3)?),
                    })
                },
            )
            .optional()?;

        let Some(mut org) = org else {
            return Ok(None);
        };
        org.user_permissions = load_user_permissions(&conn, &org.id)?;
        org.group_permissions = load_group_permissions(&conn, &org.id)?;
        org.members = query_ids(
            &conn,
            "SELECT user_id FROM organization_user WHERE organization_id = ?1 ORDER BY create_time",
            params![org.id],
        )?;
        Ok(Some(org))
    }

    fn list_organizations_for_user(&self, user_id: &str) -> Result<Vec<Organization>> {
        let ids = {
            let conn = self.conn();
            query_ids(
                &conn,
                "SELECT o.id FROM organization o
                 WHERE o.id IN (SELECT resource_id FROM userpermission WHERE user_id = ?1)
                    OR o.id IN (SELECT gp.resource_id FROM grouppermission gp
                                JOIN group_user gu ON gu.group_id = gp.group_id
                                WHERE gu.user_id = ?1)
                 ORDER BY o.create_time",
                params![user_id],
            )?
        };
        let mut orgs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(org) = self.get_organization(&id)? {
                orgs.push(org);
            }
        }
        Ok(orgs)
    }

    fn update_organization_name(&self, id: &str, name: &str) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE organization SET name = ?1, update_time = ?2 WHERE id = ?3",
            params![name, now(), id],
        )?;
        if rows == 0 {
            return Err(Error::NotFound(Entity::Organization));
        }
        Ok(())
    }

    fn delete_organization(&self, id: &str) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM userpermission WHERE resource_id = ?1", params![id])?;
        tx.execute("DELETE FROM grouppermission WHERE resource_id = ?1", params![id])?;
        let rows = tx.execute("DELETE FROM organization WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(rows > 0)
    }

    fn add_organization_member(&self, org_id: &str, user_id: &str) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO organization_user (organization_id, user_id, create_time)
             VALUES (?1, ?2, ?3)",
            params![org_id, user_id, now()],
        )?;
        Ok(())
    }

    fn remove_organization_member(&self, org_id: &str, user_id: &str) -> Result<()> {
        self.conn().execute(
            "DELETE FROM organization_user WHERE organization_id = ?1 AND user_id = ?2",
            params![org_id, user_id],
        )?;
        Ok(())
    }

    fn list_organization_members(&self, org_id: &str) -> Result<Vec<User>> {
        let conn = self.conn();
        query_list(
            &conn,
            &format!(
                "SELECT {USER_COLUMNS} FROM \"user\" u
                 JOIN organization_user ou ON ou.user_id = u.id
                 WHERE ou.organization_id = ?1 ORDER BY u.full_name"
            ),
            params![org_id],
            user_from_row,
        )
    }

    fn count_organization_owners(&self, org_id: &str) -> Result<i64> {
        let conn = self.conn();
        conn.query_row(
            "SELECT COUNT(*) FROM userpermission WHERE resource_id = ?1 AND permission = 'owner'",
            params![org_id],
            |row| row.get(0),
        )
        .map_err(Error::from)
    }

    // Group operations

    fn create_group(&self, group: &Group) -> Result<()> {
        self.conn().execute(
            "INSERT INTO \"group\" (id, name, organization_id, create_time, update_time)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                group.id,
                group.name,
                group.organization_id,
                format_datetime(&group.create_time),
                group.update_time.as_ref().map(format_datetime),
            ],
        )?;
        Ok(())
    }

    fn get_group(&self, id: &str) -> Result<Option<Group>> {
        let conn = self.conn();
        let group = conn
            .query_row(
                "SELECT id, name, organization_id, create_time, update_time FROM \"group\" WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Group {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        organization_id: row.get(2)?,
                        user_permissions: Vec::new(),
                        group_permissions: Vec::new(),
                        members: Vec::new(),
                        create_time: parse_datetime(&row.get::<_, String>(3)?),
                        update_time: parse_optional_datetime(row.get(4)?),
                    })
                },
            )
            .optional()?;

        let Some(mut group) = group else {
            return Ok(None);
        };
        group.user_permissions = load_user_permissions(&conn, &group.id)?;
        group.group_permissions = load_group_permissions(&conn, &group.id)?;
        group.members = query_ids(
            &conn,
            "SELECT user_id FROM group_user WHERE group_id = ?1 ORDER BY create_time",
            params![group.id],
        )?;
        Ok(Some(group))
    }

    fn list_groups_for_organization(&self, org_id: &str) -> Result<Vec<Group>> {
        let ids = {
            let conn = self.conn();
            query_ids(
                &conn,
                "SELECT id FROM \"group\" WHERE organization_id = ?1 ORDER BY create_time",
                params![org_id],
            )?
        };
        let mut groups = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(group) = self.get_group(&id)? {
                groups.push(group);
            }
        }
        Ok(groups)
    }

    fn list_groups_for_user(&self, user_id: &str) -> Result<Vec<Group>> {
        let ids = {
            let conn = self.conn();
            query_ids(
                &conn,
                "SELECT g.id FROM \"group\" g
                 WHERE g.id IN (SELECT resource_id FROM userpermission WHERE user_id = ?1)
                    OR g.id IN (SELECT group_id FROM group_user WHERE user_id = ?1)
                 ORDER BY g.create_time",
                params![user_id],
            )?
        };
        let mut groups = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(group) = self.get_group(&id)? {
                groups.push(group);
            }
        }
        Ok(groups)
    }

    fn update_group_name(&self, id: &str, name: &str) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE \"group\" SET name = ?1, update_time = ?2 WHERE id = ?3",
            params![name, now(), id],
        )?;
        if rows == 0 {
            return Err(Error::NotFound(Entity::Group));
        }
        Ok(())
    }

    fn delete_group(&self, id: &str) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM userpermission WHERE resource_id = ?1", params![id])?;
        tx.execute("DELETE FROM grouppermission WHERE resource_id = ?1", params![id])?;
        let rows = tx.execute("DELETE FROM \"group\" WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(rows > 0)
    }

    fn add_group_member(&self, group_id: &str, user_id: &str) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO group_user (group_id, user_id, create_time) VALUES (?1, ?2, ?3)",
            params![group_id, user_id, now()],
        )?;
        Ok(())
    }

    fn remove_group_member(&self, group_id: &str, user_id: &str) -> Result<()> {
        self.conn().execute(
            "DELETE FROM group_user WHERE group_id = ?1 AND user_id = ?2",
            params![group_id, user_id],
        )?;
        Ok(())
    }

    fn list_group_members(&self, group_id: &str) -> Result<Vec<User>> {
        let conn = self.conn();
        query_list(
            &conn,
            &format!(
                "SELECT {USER_COLUMNS} FROM \"user\" u
                 JOIN group_user gu ON gu.user_id = u.id
                 WHERE gu.group_id = ?1 ORDER BY u.full_name"
            ),
            params![group_id],
            user_from_row,
        )
    }

    // Workspace operations

    fn create_workspace(&self, workspace: &Workspace, root: &File) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO workspace (id, name, organization_id, root_id, storage_capacity, bucket, create_time, update_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                workspace.id,
                workspace.name,
                workspace.organization_id,
                workspace.root_id,
                workspace.storage_capacity,
                workspace.bucket,
                format_datetime(&workspace.create_time),
                workspace.update_time.as_ref().map(format_datetime),
            ],
        )?;
        insert_file_row(&tx, root)?;
        tx.commit()?;
        Ok(())
    }

    fn get_workspace(&self, id: &str) -> Result<Option<Workspace>> {
        let conn = self.conn();
        let ws = conn
            .query_row(
                &format!("SELECT {WORKSPACE_COLUMNS} FROM workspace w WHERE w.id = ?1"),
                params![id],
                workspace_from_row,
            )
            .optional()?;
        ws.map(|w| with_workspace_permissions(&conn, w)).transpose()
    }

    fn get_workspace_by_name(&self, name: &str) -> Result<Vec<Workspace>> {
        let conn = self.conn();
        let list = query_list(
            &conn,
            &format!(
                "SELECT {WORKSPACE_COLUMNS} FROM workspace w WHERE w.name = ?1 ORDER BY w.create_time"
            ),
            params![name],
            workspace_from_row,
        )?;
        list.into_iter()
            .map(|w| with_workspace_permissions(&conn, w))
            .collect()
    }

    fn list_workspaces_for_user(&self, user_id: &str) -> Result<Vec<Workspace>> {
        let conn = self.conn();
        let list = query_list(
            &conn,
            &format!(
                "SELECT {WORKSPACE_COLUMNS} FROM workspace w
                 WHERE w.id IN (SELECT resource_id FROM userpermission WHERE user_id = ?1)
                    OR w.id IN (SELECT gp.resource_id FROM grouppermission gp
                                JOIN group_user gu ON gu.group_id = gp.group_id
                                WHERE gu.user_id = ?1)
                 ORDER BY w.create_time"
            ),
            params![user_id],
            workspace_from_row,
        )?;
        list.into_iter()
            .map(|w| with_workspace_permissions(&conn, w))
            .collect()
    }

    fn list_workspace_ids_for_organization(&self, org_id: &str) -> Result<Vec<String>> {
        let conn = self.conn();
        query_ids(
            &conn,
            "SELECT id FROM workspace WHERE organization_id = ?1 ORDER BY create_time",
            params![org_id],
        )
    }

    fn update_workspace_name(&self, id: &str, name: &str) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE workspace SET name = ?1, update_time = ?2 WHERE id = ?3",
            params![name, now(), id],
        )?;
        if rows == 0 {
            return Err(Error::NotFound(Entity::Workspace));
        }
        Ok(())
    }

    fn update_workspace_storage_capacity(&self, id: &str, capacity: i64) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE workspace SET storage_capacity = ?1, update_time = ?2 WHERE id = ?3",
            params![capacity, now(), id],
        )?;
        if rows == 0 {
            return Err(Error::NotFound(Entity::Workspace));
        }
        Ok(())
    }

    fn delete_workspace(&self, id: &str) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM userpermission WHERE resource_id = ?1
                OR resource_id IN (SELECT id FROM file WHERE workspace_id = ?1)",
            params![id],
        )?;
        tx.execute(
            "DELETE FROM grouppermission WHERE resource_id = ?1
                OR resource_id IN (SELECT id FROM file WHERE workspace_id = ?1)",
            params![id],
        )?;
        let rows = tx.execute("DELETE FROM workspace WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(rows > 0)
    }

    // Permission operations

    fn grant_user_permission(
        &self,
        resource_id: &str,
        user_id: &str,
        level: PermissionLevel,
    ) -> Result<()> {
        let conn = self.conn();
        upsert_permission(&conn, Principal::User, Upsert::Set, user_id, resource_id, level)
    }

    fn revoke_user_permission(&self, resource_id: &str, user_id: &str) -> Result<()> {
        self.conn().execute(
            "DELETE FROM userpermission WHERE resource_id = ?1 AND user_id = ?2",
            params![resource_id, user_id],
        )?;
        Ok(())
    }

    fn grant_group_permission(
        &self,
        resource_id: &str,
        group_id: &str,
        level: PermissionLevel,
    ) -> Result<()> {
        let conn = self.conn();
        upsert_permission(&conn, Principal::Group, Upsert::Set, group_id, resource_id, level)
    }

    fn revoke_group_permission(&self, resource_id: &str, group_id: &str) -> Result<()> {
        self.conn().execute(
            "DELETE FROM grouppermission WHERE resource_id = ?1 AND group_id = ?2",
            params![resource_id, group_id],
        )?;
        Ok(())
    }

    fn list_user_permissions(&self, resource_id: &str) -> Result<Vec<UserPermission>> {
        let conn = self.conn();
        load_user_permissions(&conn, resource_id)
    }

    fn list_group_permissions(&self, resource_id: &str) -> Result<Vec<GroupPermission>> {
        let conn = self.conn();
        load_group_permissions(&conn, resource_id)
    }

    fn delete_permissions_for_resources(&self, resource_ids: &[String]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for id in resource_ids {
            tx.execute("DELETE FROM userpermission WHERE resource_id = ?1", params![id])?;
            tx.execute("DELETE FROM grouppermission WHERE resource_id = ?1", params![id])?;
        }
        tx.commit()?;
        Ok(())
    }

    // File operations

    fn insert_file(&self, file: &File) -> Result<()> {
        let conn = self.conn();
        insert_file_row(&conn, file)
    }

    fn insert_files(&self, files: &[File], chunk_size: usize) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for chunk in files.chunks(chunk_size.max(1)) {
            let placeholders = (0..chunk.len())
                .map(|i| {
                    let base = i * 9;
                    format!(
                        "(?{}, ?{}, ?{}, ?{}, ?{}, ?{}, ?{}, ?{}, ?{})",
                        base + 1,
                        base + 2,
                        base + 3,
                        base + 4,
                        base + 5,
                        base + 6,
                        base + 7,
                        base + 8,
                        base + 9
                    )
                })
                .collect::<Vec<_>>()
                .join(", ");
            let values: Vec<Value> = chunk.iter().flat_map(file_values).collect();
            tx.execute(
                &format!(
                    "INSERT INTO file (id, workspace_id, name, type, parent_id, snapshot_id, text, create_time, update_time)
                     VALUES {placeholders}"
                ),
                params_from_iter(values),
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn get_file(&self, id: &str) -> Result<Option<File>> {
        let conn = self.conn();
        get_file_row(&conn, id)?
            .map(|f| with_file_permissions(&conn, f))
            .transpose()
    }

    fn get_files(&self, ids: &[String]) -> Result<Vec<File>> {
        let conn = self.conn();
        let mut files = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(file) = get_file_row(&conn, id)? {
                files.push(with_file_permissions(&conn, file)?);
            }
        }
        Ok(files)
    }

    fn list_children(&self, id: &str) -> Result<Vec<File>> {
        let conn = self.conn();
        let files = query_list(
            &conn,
            &format!(
                "SELECT {FILE_COLUMNS} FROM file f WHERE f.parent_id = ?1 ORDER BY f.create_time, f.rowid"
            ),
            params![id],
            file_from_row,
        )?;
        with_files_permissions(&conn, files)
    }

    fn list_children_ids(&self, id: &str) -> Result<Vec<String>> {
        let conn = self.conn();
        query_ids(
            &conn,
            "SELECT id FROM file WHERE parent_id = ?1 ORDER BY create_time, rowid",
            params![id],
        )
    }

    fn find_child_by_name(&self, parent_id: &str, name: &str) -> Result<Option<File>> {
        let conn = self.conn();
        let file = conn
            .query_row(
                &format!(
                    "SELECT {FILE_COLUMNS} FROM file f WHERE f.parent_id = ?1 AND f.name = ?2 LIMIT 1"
                ),
                params![parent_id, name],
                file_from_row,
            )
            .optional()?;
        file.map(|f| with_file_permissions(&conn, f)).transpose()
    }

    fn find_path(&self, id: &str) -> Result<Vec<File>> {
        let conn = self.conn();
        let files = query_list(
            &conn,
            &format!(
                "WITH RECURSIVE rec (id, parent_id, depth) AS (
                     SELECT id, parent_id, 0 FROM file WHERE id = ?1
                     UNION ALL
                     SELECT f.id, f.parent_id, rec.depth + 1 FROM file f JOIN rec ON f.id = rec.parent_id
                 )
                 SELECT {FILE_COLUMNS} FROM rec JOIN file f ON f.id = rec.id ORDER BY rec.depth DESC"
            ),
            params![id],
            file_from_row,
        )?;
        with_files_permissions(&conn, files)
    }

    fn find_tree(&self, id: &str) -> Result<Vec<File>> {
        let conn = self.conn();
        let files = query_list(
            &conn,
            &format!(
                "WITH RECURSIVE rec (id, depth) AS (
                     SELECT id, 0 FROM file WHERE id = ?1
                     UNION ALL
                     SELECT f.id, rec.depth + 1 FROM file f JOIN rec ON f.parent_id = rec.id
                 )
                 SELECT {FILE_COLUMNS} FROM rec JOIN file f ON f.id = rec.id
                 ORDER BY rec.depth, f.create_time, f.rowid"
            ),
            params![id],
            file_from_row,
        )?;
        with_files_permissions(&conn, files)
    }

    fn find_tree_ids(&self, id: &str) -> Result<Vec<String>> {
        let conn = self.conn();
        tree_ids(&conn, id)
    }

    fn is_grand_child_of(&self, id: &str, ancestor_id: &str) -> Result<bool> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "WITH RECURSIVE rec (id, parent_id) AS (
                 SELECT id, parent_id FROM file WHERE id = ?1
                 UNION ALL
                 SELECT f.id, f.parent_id FROM file f JOIN rec ON f.id = rec.parent_id
             )
             SELECT COUNT(*) FROM rec WHERE id = ?2",
            params![id, ancestor_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn get_tree_size(&self, id: &str) -> Result<i64> {
        let conn = self.conn();
        conn.query_row(
            "WITH RECURSIVE rec (id) AS (
                 SELECT id FROM file WHERE id = ?1
                 UNION ALL
                 SELECT f.id FROM file f JOIN rec ON f.parent_id = rec.id
             )
             SELECT COALESCE(SUM(json_extract(s.original, '$.size')), 0) FROM rec
             JOIN snapshot_file sf ON sf.file_id = rec.id
             JOIN snapshot s ON s.id = sf.snapshot_id",
            params![id],
            |row| row.get(0),
        )
        .map_err(Error::from)
    }

    fn count_tree_items(&self, id: &str) -> Result<i64> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "WITH RECURSIVE rec (id) AS (
                 SELECT id FROM file WHERE id = ?1
                 UNION ALL
                 SELECT f.id FROM file f JOIN rec ON f.parent_id = rec.id
             )
             SELECT COUNT(*) FROM rec",
            params![id],
            |row| row.get(0),
        )?;
        Ok((count - 1).max(0))
    }

    fn update_file_name(&self, id: &str, name: &str) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE file SET name = ?1, update_time = ?2 WHERE id = ?3",
            params![name, now(), id],
        )?;
        if rows == 0 {
            return Err(Error::NotFound(Entity::File));
        }
        Ok(())
    }

    fn update_file_parent(&self, id: &str, parent_id: &str) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE file SET parent_id = ?1, update_time = ?2 WHERE id = ?3",
            params![parent_id, now(), id],
        )?;
        if rows == 0 {
            return Err(Error::NotFound(Entity::File));
        }
        Ok(())
    }

    fn update_file_snapshot(&self, id: &str, snapshot_id: Option<&str>) -> Result<()> {
        self.conn().execute(
            "UPDATE file SET snapshot_id = ?1, update_time = ?2 WHERE id = ?3",
            params![snapshot_id, now(), id],
        )?;
        Ok(())
    }

    fn update_file_text(&self, id: &str, text: Option<&str>) -> Result<()> {
        self.conn().execute(
            "UPDATE file SET text = ?1 WHERE id = ?2",
            params![text, id],
        )?;
        Ok(())
    }

    fn touch_file(&self, id: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE file SET update_time = ?1 WHERE id = ?2",
            params![now(), id],
        )?;
        Ok(())
    }

    fn delete_files(&self, ids: &[String]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for id in ids {
            tx.execute("DELETE FROM userpermission WHERE resource_id = ?1", params![id])?;
            tx.execute("DELETE FROM grouppermission WHERE resource_id = ?1", params![id])?;
            tx.execute("DELETE FROM snapshot_file WHERE file_id = ?1", params![id])?;
        }
        // Children first so the parent FK never dangles mid-statement.
        for id in ids.iter().rev() {
            tx.execute("DELETE FROM file WHERE id = ?1", params![id])?;
        }
        tx.commit()?;
        Ok(())
    }

    // Tree permission operations

    fn grant_user_permission_on_tree(
        &self,
        file_id: &str,
        user_id: &str,
        level: PermissionLevel,
    ) -> Result<()> {
        let mut conn = self.conn();
        grant_on_tree(&mut conn, Principal::User, file_id, user_id, level)
    }

    fn revoke_user_permission_on_tree(&self, file_id: &str, user_id: &str) -> Result<()> {
        let mut conn = self.conn();
        revoke_on_tree(&mut conn, Principal::User, file_id, user_id)
    }

    fn grant_group_permission_on_tree(
        &self,
        file_id: &str,
        group_id: &str,
        level: PermissionLevel,
    ) -> Result<()> {
        let mut conn = self.conn();
        grant_on_tree(&mut conn, Principal::Group, file_id, group_id, level)
    }

    fn revoke_group_permission_on_tree(&self, file_id: &str, group_id: &str) -> Result<()> {
        let mut conn = self.conn();
        revoke_on_tree(&mut conn, Principal::Group, file_id, group_id)
    }

    fn grant_owner_on_files(
        &self,
        file_ids: &[String],
        user_id: &str,
        chunk_size: usize,
    ) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let created = now();
        for chunk in file_ids.chunks(chunk_size.max(1)) {
            let placeholders = (0..chunk.len())
                .map(|i| {
                    let base = i * 5;
                    format!(
                        "(?{}, ?{}, ?{}, ?{}, ?{})",
                        base + 1,
                        base + 2,
                        base + 3,
                        base + 4,
                        base + 5
                    )
                })
                .collect::<Vec<_>>()
                .join(", ");
            let values: Vec<Value> = chunk
                .iter()
                .flat_map(|id| {
                    [
                        Value::Text(Uuid::new_v4().to_string()),
                        Value::Text(user_id.to_string()),
                        Value::Text(id.clone()),
                        Value::Text(PermissionLevel::Owner.as_str().to_string()),
                        Value::Text(created.clone()),
                    ]
                })
                .collect();
            tx.execute(
                &format!(
                    "INSERT INTO userpermission (id, user_id, resource_id, permission, create_time)
                     VALUES {placeholders}
                     ON CONFLICT (user_id, resource_id) DO UPDATE SET permission = 'owner'"
                ),
                params_from_iter(values),
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn sweep_user_uplift(&self, workspace_id: &str, user_id: &str) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut removed = 0;

        loop {
            let candidates = query_ids(
                &tx,
                "SELECT f.id FROM file f
                 JOIN userpermission p ON p.resource_id = f.id
                 WHERE f.workspace_id = ?1 AND f.type = 'folder'
                   AND p.user_id = ?2 AND p.permission = 'viewer'
                   AND EXISTS (SELECT 1 FROM file c WHERE c.parent_id = f.id)",
                params![workspace_id, user_id],
            )?;

            let mut pass = 0;
            for id in candidates {
                let covered: i64 = tx.query_row(
                    "WITH RECURSIVE rec (id) AS (
                         SELECT id FROM file WHERE parent_id = ?1
                         UNION ALL
                         SELECT f.id FROM file f JOIN rec ON f.parent_id = rec.id
                     )
                     SELECT COUNT(*) FROM rec JOIN userpermission p ON p.resource_id = rec.id
                     WHERE p.user_id = ?2",
                    params![id, user_id],
                    |row| row.get(0),
                )?;
                if covered == 0 {
                    pass += tx.execute(
                        "DELETE FROM userpermission WHERE resource_id = ?1 AND user_id = ?2",
                        params![id, user_id],
                    )?;
                }
            }

            removed += pass;
            if pass == 0 {
                break;
            }
        }

        let remaining: i64 = tx.query_row(
            "SELECT COUNT(*) FROM userpermission p JOIN file f ON f.id = p.resource_id
             WHERE f.workspace_id = ?1 AND p.user_id = ?2",
            params![workspace_id, user_id],
            |row| row.get(0),
        )?;
        if remaining == 0 {
            removed += tx.execute(
                "DELETE FROM userpermission WHERE resource_id = ?1 AND user_id = ?2 AND permission = 'viewer'",
                params![workspace_id, user_id],
            )?;
        }

        tx.commit()?;
        Ok(removed)
    }

    // Snapshot operations

    fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let conn = self.conn();
        insert_snapshot_row(&conn, snapshot)
    }

    fn create_snapshot_for_file(&self, file_id: &str, snapshot: &Snapshot) -> Result<Snapshot> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let latest: i64 = tx.query_row(
            "SELECT COALESCE(MAX(s.version), 0) FROM snapshot s
             JOIN snapshot_file sf ON sf.snapshot_id = s.id WHERE sf.file_id = ?1",
            params![file_id],
            |row| row.get(0),
        )?;
        let mut snapshot = snapshot.clone();
        snapshot.version = latest + 1;

        insert_snapshot_row(&tx, &snapshot)?;
        tx.execute(
            "INSERT INTO snapshot_file (snapshot_id, file_id, create_time) VALUES (?1, ?2, ?3)",
            params![snapshot.id, file_id, now()],
        )?;
        let rows = tx.execute(
            "UPDATE file SET snapshot_id = ?1, update_time = ?2 WHERE id = ?3",
            params![snapshot.id, now(), file_id],
        )?;
        if rows == 0 {
            return Err(Error::NotFound(Entity::File));
        }
        tx.commit()?;

        Ok(snapshot)
    }

    fn get_snapshot(&self, id: &str) -> Result<Option<Snapshot>> {
        let conn = self.conn();
        get_snapshot_row(&conn, id)
    }

    fn patch_snapshot(&self, id: &str, patch: &SnapshotPatch) -> Result<Snapshot> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let mut snapshot = get_snapshot_row(&tx, id)?.ok_or(Error::NotFound(Entity::Snapshot))?;

        if let Some(expected) = patch.expected_status {
            if snapshot.status != expected {
                return Err(Error::StatusConflict {
                    expected,
                    actual: snapshot.status,
                });
            }
        }

        if let (true, Some(next)) = (patch.has(SnapshotField::Status), patch.status) {
            if !snapshot.status.can_transition_to(next) {
                return Err(Error::conflict(
                    "invalid_snapshot_status_transition",
                    format!("cannot move snapshot from {} to {}", snapshot.status, next),
                ));
            }
        }

        patch.apply(&mut snapshot);
        snapshot.update_time = Some(Utc::now());
        save_snapshot_row(&tx, &snapshot)?;
        tx.commit()?;

        Ok(snapshot)
    }

    fn delete_snapshot(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM snapshot WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn map_snapshot_with_file(&self, snapshot_id: &str, file_id: &str) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO snapshot_file (snapshot_id, file_id, create_time) VALUES (?1, ?2, ?3)",
            params![snapshot_id, file_id, now()],
        )?;
        Ok(())
    }

    fn detach_snapshot(&self, snapshot_id: &str, file_id: &str) -> Result<()> {
        self.conn().execute(
            "DELETE FROM snapshot_file WHERE snapshot_id = ?1 AND file_id = ?2",
            params![snapshot_id, file_id],
        )?;
        Ok(())
    }

    fn delete_mappings_for_file(&self, file_id: &str) -> Result<()> {
        self.conn().execute(
            "DELETE FROM snapshot_file WHERE file_id = ?1",
            params![file_id],
        )?;
        Ok(())
    }

    fn count_snapshot_associations(&self, snapshot_id: &str) -> Result<i64> {
        let conn = self.conn();
        conn.query_row(
            "SELECT COUNT(*) FROM snapshot_file WHERE snapshot_id = ?1",
            params![snapshot_id],
            |row| row.get(0),
        )
        .map_err(Error::from)
    }

    fn list_snapshots_for_file(&self, file_id: &str) -> Result<Vec<Snapshot>> {
        let conn = self.conn();
        query_list(
            &conn,
            &format!(
                "SELECT {SNAPSHOT_COLUMNS} FROM snapshot s
                 JOIN snapshot_file sf ON sf.snapshot_id = s.id
                 WHERE sf.file_id = ?1 ORDER BY s.version"
            ),
            params![file_id],
            snapshot_from_row,
        )
    }

    fn list_file_ids_for_snapshot(&self, snapshot_id: &str) -> Result<Vec<String>> {
        let conn = self.conn();
        query_ids(
            &conn,
            "SELECT file_id FROM snapshot_file WHERE snapshot_id = ?1 ORDER BY create_time",
            params![snapshot_id],
        )
    }

    fn find_dangling_snapshots(&self) -> Result<Vec<Snapshot>> {
        let conn = self.conn();
        query_list(
            &conn,
            &format!(
                "SELECT {SNAPSHOT_COLUMNS} FROM snapshot s
                 LEFT JOIN snapshot_file sf ON sf.snapshot_id = s.id
                 WHERE sf.snapshot_id IS NULL ORDER BY s.create_time"
            ),
            [],
            snapshot_from_row,
        )
    }

    fn delete_dangling_snapshots(&self) -> Result<usize> {
        let rows = self.conn().execute(
            "DELETE FROM snapshot WHERE id NOT IN (SELECT snapshot_id FROM snapshot_file)",
            [],
        )?;
        Ok(rows)
    }

    fn get_latest_snapshot_version(&self, file_id: &str) -> Result<i64> {
        let conn = self.conn();
        conn.query_row(
            "SELECT COALESCE(MAX(s.version), 0) FROM snapshot s
             JOIN snapshot_file sf ON sf.snapshot_id = s.id WHERE sf.file_id = ?1",
            params![file_id],
            |row| row.get(0),
        )
        .map_err(Error::from)
    }

    fn ocr_language_exists(&self, id: &str) -> Result<bool> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM ocrlanguage WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // Invitation operations

    fn create_invitation(&self, invitation: &Invitation) -> Result<()> {
        self.conn().execute(
            "INSERT INTO invitation (id, organization_id, owner_id, email, status, create_time, update_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                invitation.id,
                invitation.organization_id,
                invitation.owner_id,
                invitation.email,
                invitation.status.as_str(),
                format_datetime(&invitation.create_time),
                invitation.update_time.as_ref().map(format_datetime),
            ],
        )?;
        Ok(())
    }

    fn get_invitation(&self, id: &str) -> Result<Option<Invitation>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {INVITATION_COLUMNS} FROM invitation i WHERE i.id = ?1"),
            params![id],
            invitation_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn update_invitation_status(&self, id: &str, status: InvitationStatus) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE invitation SET status = ?1, update_time = ?2 WHERE id = ?3",
            params![status.as_str(), now(), id],
        )?;
        if rows == 0 {
            return Err(Error::NotFound(Entity::Invitation));
        }
        Ok(())
    }

    fn delete_invitation(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM invitation WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn list_incoming_invitations(&self, email: &str) -> Result<Vec<Invitation>> {
        let conn = self.conn();
        query_list(
            &conn,
            &format!(
                "SELECT {INVITATION_COLUMNS} FROM invitation i
                 WHERE i.email = lower(?1) AND i.status = 'pending' ORDER BY i.create_time"
            ),
            params![email],
            invitation_from_row,
        )
    }

    fn list_outgoing_invitations(&self, org_id: &str, owner_id: &str) -> Result<Vec<Invitation>> {
        let conn = self.conn();
        query_list(
            &conn,
            &format!(
                "SELECT {INVITATION_COLUMNS} FROM invitation i
                 WHERE i.organization_id = ?1 AND i.owner_id = ?2 ORDER BY i.create_time"
            ),
            params![org_id, owner_id],
            invitation_from_row,
        )
    }

    // Task operations

    fn create_task(&self, task: &Task) -> Result<()> {
        self.conn().execute(
            "INSERT INTO task (id, name, error, percentage, is_indeterminate, user_id, status, payload,
                               cancelled, create_time, update_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                task.id,
                task.name,
                task.error,
                task.percentage,
                task.is_indeterminate,
                task.user_id,
                task.status.as_str(),
                to_json(&task.payload)?,
                task.cancelled,
                format_datetime(&task.create_time),
                task.update_time.as_ref().map(format_datetime),
            ],
        )?;
        Ok(())
    }

    fn get_task(&self, id: &str) -> Result<Option<Task>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {TASK_COLUMNS} FROM task t WHERE t.id = ?1"),
            params![id],
            task_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn save_task(&self, task: &Task) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE task SET name = ?1, error = ?2, percentage = ?3, is_indeterminate = ?4,
                 status = ?5, payload = ?6, cancelled = ?7, update_time = ?8
             WHERE id = ?9",
            params![
                task.name,
                task.error,
                task.percentage,
                task.is_indeterminate,
                task.status.as_str(),
                to_json(&task.payload)?,
                task.cancelled,
                now(),
                task.id,
            ],
        )?;
        if rows == 0 {
            return Err(Error::NotFound(Entity::Task));
        }
        Ok(())
    }

    fn delete_task(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM task WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn list_tasks_for_user(&self, user_id: &str) -> Result<Vec<Task>> {
        let conn = self.conn();
        query_list(
            &conn,
            &format!("SELECT {TASK_COLUMNS} FROM task t WHERE t.user_id = ?1 ORDER BY t.create_time"),
            params![user_id],
            task_from_row,
        )
    }

    fn count_tasks_for_user(&self, user_id: &str) -> Result<i64> {
        let conn = self.conn();
        conn.query_row(
            "SELECT COUNT(*) FROM task WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> SqliteStore {
        let store = SqliteStore::in_memory().unwrap();
        store.initialize().unwrap();
        store
    }

    fn user(id: &str) -> User {
        User {
            id: id.to_string(),
            full_name: format!("User {id}"),
            username: id.to_string(),
            email: format!("{id}@example.com"),
            picture: None,
            email_confirmed: true,
            password_hash: String::new(),
            create_time: Utc::now(),
            update_time: None,
        }
    }

    fn file(id: &str, ws: &str, parent: Option<&str>, kind: FileType) -> File {
        File {
            id: id.to_string(),
            workspace_id: ws.to_string(),
            name: id.to_string(),
            file_type: kind,
            parent_id: parent.map(str::to_string),
            snapshot_id: None,
            text: None,
            user_permissions: Vec::new(),
            group_permissions: Vec::new(),
            create_time: Utc::now(),
            update_time: None,
        }
    }

    fn snapshot(id: &str, version: i64, size: i64) -> Snapshot {
        Snapshot {
            id: id.to_string(),
            version,
            original: Some(S3Object::new("bucket", format!("{id}/original.txt"), size)),
            preview: None,
            text: None,
            ocr: None,
            entities: None,
            mosaic: None,
            watermark: None,
            thumbnail: None,
            status: SnapshotStatus::Waiting,
            error: None,
            language: None,
            task_id: None,
            create_time: Utc::now(),
            update_time: None,
        }
    }

    /// Organization "o1", workspace "w1" with root "r", folders r/a/b and file r/a/b/c.
    fn seeded() -> SqliteStore {
        let store = store();
        store.create_user(&user("u1")).unwrap();
        store.create_user(&user("u2")).unwrap();
        store
            .create_organization(&Organization {
                id: "o1".into(),
                name: "Org".into(),
                user_permissions: vec![],
                group_permissions: vec![],
                members: vec![],
                create_time: Utc::now(),
                update_time: None,
            })
            .unwrap();
        let ws = Workspace {
            id: "w1".into(),
            name: "W1".into(),
            organization_id: "o1".into(),
            root_id: "r".into(),
            storage_capacity: 1_000_000,
            bucket: "bucket".into(),
            user_permissions: vec![],
            group_permissions: vec![],
            create_time: Utc::now(),
            update_time: None,
        };
        store
            .create_workspace(&ws, &file("r", "w1", None, FileType::Folder))
            .unwrap();
        store
            .insert_file(&file("a", "w1", Some("r"), FileType::Folder))
            .unwrap();
        store
            .insert_file(&file("b", "w1", Some("a"), FileType::Folder))
            .unwrap();
        store
            .insert_file(&file("c", "w1", Some("b"), FileType::File))
            .unwrap();
        store
    }

    #[test]
    fn test_open_on_disk() {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteStore::new(temp_dir.path().join("voltcore.db")).unwrap();
        store.initialize().unwrap();
        store.initialize().unwrap();
        assert!(store.ocr_language_exists("eng").unwrap());
    }

    #[test]
    fn test_find_path_and_tree() {
        let store = seeded();
        let path: Vec<_> = store.find_path("c").unwrap().into_iter().map(|f| f.id).collect();
        assert_eq!(path, vec!["r", "a", "b", "c"]);

        let tree = store.find_tree_ids("a").unwrap();
        assert_eq!(tree, vec!["a", "b", "c"]);
        assert_eq!(store.count_tree_items("r").unwrap(), 3);
        assert_eq!(store.count_tree_items("c").unwrap(), 0);
    }

    #[test]
    fn test_is_grand_child_of() {
        let store = seeded();
        assert!(store.is_grand_child_of("c", "a").unwrap());
        assert!(store.is_grand_child_of("b", "r").unwrap());
        assert!(!store.is_grand_child_of("a", "c").unwrap());
    }

    #[test]
    fn test_grant_on_tree_uplifts_ancestors() {
        let store = seeded();
        store
            .grant_user_permission_on_tree("b", "u2", PermissionLevel::Editor)
            .unwrap();

        let level = |id: &str| {
            store
                .list_user_permissions(id)
                .unwrap()
                .into_iter()
                .find(|p| p.user_id == "u2")
                .map(|p| p.permission)
        };
        assert_eq!(level("w1"), Some(PermissionLevel::Viewer));
        assert_eq!(level("r"), Some(PermissionLevel::Viewer));
        assert_eq!(level("a"), Some(PermissionLevel::Viewer));
        assert_eq!(level("b"), Some(PermissionLevel::Editor));
        assert_eq!(level("c"), Some(PermissionLevel::Editor));
    }

    #[test]
    fn test_tree_grant_keeps_higher_level() {
        let store = seeded();
        store
            .grant_user_permission_on_tree("c", "u2", PermissionLevel::Owner)
            .unwrap();
        store
            .grant_user_permission_on_tree("b", "u2", PermissionLevel::Viewer)
            .unwrap();
        let perms = store.list_user_permissions("c").unwrap();
        assert_eq!(perms[0].permission, PermissionLevel::Owner);
    }

    #[test]
    fn test_revoke_leaves_uplift_and_sweep_clears_it() {
        let store = seeded();
        store
            .grant_user_permission_on_tree("c", "u2", PermissionLevel::Editor)
            .unwrap();
        store.revoke_user_permission_on_tree("c", "u2").unwrap();

        assert!(store.list_user_permissions("c").unwrap().is_empty());
        assert_eq!(store.list_user_permissions("b").unwrap().len(), 1);

        let removed = store.sweep_user_uplift("w1", "u2").unwrap();
        assert_eq!(removed, 4);
        assert!(store.list_user_permissions("a").unwrap().is_empty());
        assert!(store.list_user_permissions("w1").unwrap().is_empty());
    }

    #[test]
    fn test_tree_size_sums_original_sizes() {
        let store = seeded();
        store.insert_snapshot(&snapshot("s1", 1, 5)).unwrap();
        store.insert_snapshot(&snapshot("s2", 1, 7)).unwrap();
        store.map_snapshot_with_file("s1", "c").unwrap();
        store
            .insert_file(&file("d", "w1", Some("a"), FileType::File))
            .unwrap();
        store.map_snapshot_with_file("s2", "d").unwrap();

        assert_eq!(store.get_tree_size("r").unwrap(), 12);
        assert_eq!(store.get_tree_size("b").unwrap(), 5);
    }

    #[test]
    fn test_patch_snapshot_enforces_expected_status() {
        let store = seeded();
        store.insert_snapshot(&snapshot("s1", 1, 5)).unwrap();

        let patched = store
            .patch_snapshot(
                "s1",
                &SnapshotPatch::new()
                    .status(SnapshotStatus::Processing)
                    .expect_status(SnapshotStatus::Waiting),
            )
            .unwrap();
        assert_eq!(patched.status, SnapshotStatus::Processing);
        assert!(patched.original.is_some());

        let err = store
            .patch_snapshot(
                "s1",
                &SnapshotPatch::new()
                    .status(SnapshotStatus::Processing)
                    .expect_status(SnapshotStatus::Waiting),
            )
            .unwrap_err();
        assert!(matches!(err, Error::StatusConflict { .. }));
    }

    #[test]
    fn test_dangling_snapshots() {
        let store = seeded();
        store.insert_snapshot(&snapshot("s1", 1, 5)).unwrap();
        store.insert_snapshot(&snapshot("s2", 1, 5)).unwrap();
        store.map_snapshot_with_file("s1", "c").unwrap();

        let dangling: Vec<_> = store
            .find_dangling_snapshots()
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(dangling, vec!["s2"]);

        assert_eq!(store.delete_dangling_snapshots().unwrap(), 1);
        assert!(store.get_snapshot("s2").unwrap().is_none());
        assert!(store.get_snapshot("s1").unwrap().is_some());
    }

    #[test]
    fn test_latest_version() {
        let store = seeded();
        assert_eq!(store.get_latest_snapshot_version("c").unwrap(), 0);
        store.insert_snapshot(&snapshot("s1", 1, 5)).unwrap();
        store.insert_snapshot(&snapshot("s2", 2, 5)).unwrap();
        store.map_snapshot_with_file("s1", "c").unwrap();
        store.map_snapshot_with_file("s2", "c").unwrap();
        assert_eq!(store.get_latest_snapshot_version("c").unwrap(), 2);
    }

    #[test]
    fn test_create_snapshot_for_file_bumps_version() {
        let store = seeded();
        let first = store.create_snapshot_for_file("c", &snapshot("s1", 0, 5)).unwrap();
        let second = store.create_snapshot_for_file("c", &snapshot("s2", 0, 7)).unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert_eq!(store.get_file("c").unwrap().unwrap().snapshot_id.as_deref(), Some("s2"));
        assert!(store.find_dangling_snapshots().unwrap().is_empty());

        let err = store
            .create_snapshot_for_file("missing", &snapshot("s3", 0, 1))
            .unwrap_err();
        assert!(err.is_not_found() || matches!(err, Error::Database(_)));
        assert!(store.get_snapshot("s3").unwrap().is_none());
    }

    #[test]
    fn test_bulk_insert_in_chunks() {
        let store = seeded();
        let files: Vec<File> = (0..250)
            .map(|i| file(&format!("bulk-{i}"), "w1", Some("r"), FileType::File))
            .collect();
        store.insert_files(&files, 100).unwrap();
        let ids: Vec<String> = files.iter().map(|f| f.id.clone()).collect();
        store.grant_owner_on_files(&ids, "u1", 100).unwrap();

        assert_eq!(store.list_children_ids("r").unwrap().len(), 251);
        assert_eq!(
            store.list_user_permissions("bulk-249").unwrap()[0].permission,
            PermissionLevel::Owner
        );
    }

    #[test]
    fn test_duplicate_user_is_conflict() {
        let store = store();
        store.create_user(&user("u1")).unwrap();
        let err = store.create_user(&user("u1")).unwrap_err();
        assert_eq!(err.code(), "user_already_exists");
    }

    #[test]
    fn test_owner_count() {
        let store = seeded();
        store
            .grant_user_permission("o1", "u1", PermissionLevel::Owner)
            .unwrap();
        store
            .grant_user_permission("o1", "u2", PermissionLevel::Viewer)
            .unwrap();
        assert_eq!(store.count_organization_owners("o1").unwrap(), 1);
        store
            .grant_user_permission("o1", "u2", PermissionLevel::Owner)
            .unwrap();
        assert_eq!(store.count_organization_owners("o1").unwrap(), 2);
    }
}

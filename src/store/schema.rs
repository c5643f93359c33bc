pub const SCHEMA: &str = r#"
-- Users authenticate through the token endpoint; password_hash is argon2id PHC
CREATE TABLE IF NOT EXISTS "user" (
    id TEXT PRIMARY KEY,
    full_name TEXT NOT NULL,
    username TEXT NOT NULL UNIQUE,
    email TEXT NOT NULL UNIQUE,
    picture TEXT,
    email_confirmed INTEGER NOT NULL DEFAULT 0,
    password_hash TEXT NOT NULL DEFAULT '',
    create_time TEXT NOT NULL,
    update_time TEXT
);

-- Access and refresh tokens, only the hash is stored
CREATE TABLE IF NOT EXISTS token (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES "user"(id) ON DELETE CASCADE,
    kind TEXT NOT NULL CHECK (kind IN ('access', 'refresh')),
    token_lookup TEXT NOT NULL UNIQUE,
    token_hash TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    create_time TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS organization (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    create_time TEXT NOT NULL,
    update_time TEXT
);

CREATE TABLE IF NOT EXISTS organization_user (
    organization_id TEXT NOT NULL REFERENCES organization(id) ON DELETE CASCADE,
    user_id TEXT NOT NULL REFERENCES "user"(id) ON DELETE CASCADE,
    create_time TEXT NOT NULL,
    PRIMARY KEY (organization_id, user_id)
);

CREATE TABLE IF NOT EXISTS "group" (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    organization_id TEXT NOT NULL REFERENCES organization(id) ON DELETE CASCADE,
    create_time TEXT NOT NULL,
    update_time TEXT
);

CREATE TABLE IF NOT EXISTS group_user (
    group_id TEXT NOT NULL REFERENCES "group"(id) ON DELETE CASCADE,
    user_id TEXT NOT NULL REFERENCES "user"(id) ON DELETE CASCADE,
    create_time TEXT NOT NULL,
    PRIMARY KEY (group_id, user_id)
);

-- Each workspace owns exactly one bucket, never reused
CREATE TABLE IF NOT EXISTS workspace (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    organization_id TEXT NOT NULL REFERENCES organization(id) ON DELETE CASCADE,
    root_id TEXT NOT NULL,
    storage_capacity INTEGER NOT NULL,
    bucket TEXT NOT NULL UNIQUE,
    create_time TEXT NOT NULL,
    update_time TEXT
);

-- The root file of a workspace has a NULL parent
CREATE TABLE IF NOT EXISTS file (
    id TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL REFERENCES workspace(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    type TEXT NOT NULL CHECK (type IN ('file', 'folder')),
    parent_id TEXT REFERENCES file(id) ON DELETE CASCADE,
    snapshot_id TEXT,
    text TEXT,
    create_time TEXT NOT NULL,
    update_time TEXT
);

-- Grants are keyed by opaque resource id (organization, group, workspace or file)
CREATE TABLE IF NOT EXISTS userpermission (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES "user"(id) ON DELETE CASCADE,
    resource_id TEXT NOT NULL,
    permission TEXT NOT NULL CHECK (permission IN ('viewer', 'editor', 'owner')),
    create_time TEXT NOT NULL,
    UNIQUE (user_id, resource_id)
);

CREATE TABLE IF NOT EXISTS grouppermission (
    id TEXT PRIMARY KEY,
    group_id TEXT NOT NULL REFERENCES "group"(id) ON DELETE CASCADE,
    resource_id TEXT NOT NULL,
    permission TEXT NOT NULL CHECK (permission IN ('viewer', 'editor', 'owner')),
    create_time TEXT NOT NULL,
    UNIQUE (group_id, resource_id)
);

-- S3 object columns hold JSON
CREATE TABLE IF NOT EXISTS snapshot (
    id TEXT PRIMARY KEY,
    version INTEGER NOT NULL,
    original TEXT,
    preview TEXT,
    text TEXT,
    ocr TEXT,
    entities TEXT,
    mosaic TEXT,
    watermark TEXT,
    thumbnail TEXT,
    status TEXT NOT NULL CHECK (status IN ('waiting', 'processing', 'ready', 'error')),
    error TEXT,
    language TEXT,
    task_id TEXT,
    create_time TEXT NOT NULL,
    update_time TEXT
);

-- Many-to-many so copies can share immutable snapshots
CREATE TABLE IF NOT EXISTS snapshot_file (
    snapshot_id TEXT NOT NULL REFERENCES snapshot(id) ON DELETE CASCADE,
    file_id TEXT NOT NULL REFERENCES file(id) ON DELETE CASCADE,
    create_time TEXT NOT NULL,
    PRIMARY KEY (snapshot_id, file_id)
);

CREATE TABLE IF NOT EXISTS invitation (
    id TEXT PRIMARY KEY,
    organization_id TEXT NOT NULL REFERENCES organization(id) ON DELETE CASCADE,
    owner_id TEXT NOT NULL REFERENCES "user"(id) ON DELETE CASCADE,
    email TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('pending', 'accepted', 'declined')),
    create_time TEXT NOT NULL,
    update_time TEXT
);

CREATE TABLE IF NOT EXISTS task (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    error TEXT,
    percentage INTEGER,
    is_indeterminate INTEGER NOT NULL DEFAULT 0,
    user_id TEXT NOT NULL REFERENCES "user"(id) ON DELETE CASCADE,
    status TEXT NOT NULL CHECK (status IN ('waiting', 'running', 'success', 'error')),
    payload TEXT,
    cancelled INTEGER NOT NULL DEFAULT 0,
    create_time TEXT NOT NULL,
    update_time TEXT
);

CREATE TABLE IF NOT EXISTS ocrlanguage (
    id TEXT PRIMARY KEY,
    iso639_3 TEXT NOT NULL,
    name TEXT NOT NULL
);

INSERT OR IGNORE INTO ocrlanguage (id, iso639_3, name) VALUES
    ('ara', 'ara', 'Arabic'),
    ('chi_sim', 'zho', 'Chinese Simplified'),
    ('deu', 'deu', 'German'),
    ('eng', 'eng', 'English'),
    ('fra', 'fra', 'French'),
    ('hin', 'hin', 'Hindi'),
    ('ita', 'ita', 'Italian'),
    ('jpn', 'jpn', 'Japanese'),
    ('nld', 'nld', 'Dutch'),
    ('por', 'por', 'Portuguese'),
    ('rus', 'rus', 'Russian'),
    ('spa', 'spa', 'Spanish'),
    ('swe', 'swe', 'Swedish');

-- Indexes
CREATE INDEX IF NOT EXISTS idx_file_parent ON file(parent_id);
CREATE INDEX IF NOT EXISTS idx_file_workspace ON file(workspace_id);
CREATE INDEX IF NOT EXISTS idx_userpermission_resource ON userpermission(resource_id);
CREATE INDEX IF NOT EXISTS idx_grouppermission_resource ON grouppermission(resource_id);
CREATE INDEX IF NOT EXISTS idx_snapshot_file_file ON snapshot_file(file_id);
CREATE INDEX IF NOT EXISTS idx_group_organization ON "group"(organization_id);
CREATE INDEX IF NOT EXISTS idx_workspace_organization ON workspace(organization_id);
CREATE INDEX IF NOT EXISTS idx_invitation_email ON invitation(email);
CREATE INDEX IF NOT EXISTS idx_task_user ON task(user_id);
CREATE INDEX IF NOT EXISTS idx_token_user ON token(user_id);
"#;

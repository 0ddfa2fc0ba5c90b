//! SQL schema for the georesolve SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS geography_units (
    geoid       TEXT NOT NULL,
    level       TEXT NOT NULL,   -- 'nation' | 'state' | 'metro' | 'county' | 'place' | 'zip'
    name        TEXT NOT NULL,
    shape_json  TEXT,            -- JSON-encoded Shape or NULL
    updated_at  TEXT NOT NULL,
    PRIMARY KEY (geoid, level)
);

CREATE TABLE IF NOT EXISTS markets (
    region_id    TEXT PRIMARY KEY,
    region_name  TEXT NOT NULL,
    region_type  TEXT NOT NULL,
    state_code   TEXT,
    county_fips  TEXT,
    external_ids TEXT NOT NULL DEFAULT '{}',
    source       TEXT NOT NULL,
    updated_at   TEXT NOT NULL
);

-- At most one link per market; overwritten by each resolver run.
CREATE TABLE IF NOT EXISTS market_geography_links (
    region_id  TEXT PRIMARY KEY REFERENCES markets(region_id),
    geoid      TEXT NOT NULL,
    level      TEXT NOT NULL,
    strategy   TEXT NOT NULL,    -- 'exact_id' | 'composite_key' | 'state_prefix'
    linked_at  TEXT NOT NULL,
    FOREIGN KEY (geoid, level) REFERENCES geography_units(geoid, level)
);

-- Endpoints are not foreign keys: overlap files may arrive before the
-- canonical units they mention.
CREATE TABLE IF NOT EXISTS crosswalk_edges (
    child_geoid      TEXT NOT NULL,
    child_level      TEXT NOT NULL,
    parent_geoid     TEXT NOT NULL,
    parent_level     TEXT NOT NULL,
    overlap_fraction REAL NOT NULL CHECK (overlap_fraction BETWEEN 0.0 AND 1.0),
    is_primary       INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (child_geoid, child_level, parent_geoid, parent_level),
    CHECK (child_level != parent_level)
);

CREATE TABLE IF NOT EXISTS hierarchy_edges (
    child_region_id  TEXT NOT NULL REFERENCES markets(region_id),
    parent_region_id TEXT NOT NULL REFERENCES markets(region_id),
    child_level      TEXT NOT NULL,
    parent_level     TEXT NOT NULL,
    overlap_fraction REAL,        -- NULL for geometric and state-prefix edges
    is_primary       INTEGER NOT NULL,
    origin           TEXT NOT NULL,
    updated_at       TEXT NOT NULL,
    PRIMARY KEY (child_region_id, parent_region_id),
    CHECK (child_region_id != parent_region_id)
);

CREATE TABLE IF NOT EXISTS batch_failures (
    failure_id  INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id      TEXT NOT NULL,
    stage       TEXT NOT NULL,
    table_name  TEXT NOT NULL,
    first_key   TEXT NOT NULL,
    last_key    TEXT NOT NULL,
    row_count   INTEGER NOT NULL,
    error       TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS units_level_idx        ON geography_units(level);
CREATE INDEX IF NOT EXISTS markets_type_idx       ON markets(region_type);
CREATE INDEX IF NOT EXISTS links_unit_idx         ON market_geography_links(geoid, level);
CREATE INDEX IF NOT EXISTS crosswalk_relation_idx ON crosswalk_edges(child_level, parent_level);
CREATE INDEX IF NOT EXISTS hierarchy_parent_idx   ON hierarchy_edges(parent_region_id);
CREATE INDEX IF NOT EXISTS failures_run_idx       ON batch_failures(run_id);

PRAGMA user_version = 1;
";

//! SQL schema for the SQLite version store.
//!
//! Executed once at connection startup via `PRAGMA user_version`. Future
//! migrations will be gated on that version number.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

-- One row per dimension version. Rows are updated (closed) but never deleted.
CREATE TABLE IF NOT EXISTS dimension_versions (
    dimension     TEXT    NOT NULL,   -- TableKind, e.g. 'prod_dim'
    surrogate_key INTEGER NOT NULL,   -- signed XXH3-64 of tracked attributes
    natural_key   TEXT    NOT NULL,
    attributes    TEXT    NOT NULL,   -- JSON object, tracked + untracked
    is_current    INTEGER NOT NULL CHECK (is_current IN (0, 1)),
    valid_from    TEXT    NOT NULL,   -- RFC 3339 UTC, fixed width; inclusive
    valid_to      TEXT,               -- exclusive; NULL while current
    -- A fingerprint reopened after a revert is a new row.
    PRIMARY KEY (dimension, surrogate_key, valid_from),
    CHECK ((is_current = 1) = (valid_to IS NULL))
);

-- At most one current version per natural key.
CREATE UNIQUE INDEX IF NOT EXISTS versions_one_current
    ON dimension_versions(dimension, natural_key) WHERE is_current = 1;

CREATE INDEX IF NOT EXISTS versions_by_key
    ON dimension_versions(dimension, natural_key, valid_from);

PRAGMA user_version = 1;
";

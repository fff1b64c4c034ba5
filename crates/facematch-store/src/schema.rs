pub struct Table {
    pub name: &'static str,
    pub schema: &'static str,
    pub columns: &'static [&'static str],
    pub indices: &'static [&'static str],
}

const PHOTO_TABLE_V_1: Table = Table {
    name: "photo",
    schema: "CREATE TABLE photo (id TEXT NOT NULL PRIMARY KEY, doc TEXT NOT NULL, updated INTEGER DEFAULT (cast(strftime('%s','now') as int)))",
    columns: &["id", "doc", "updated"],
    indices: &[],
};

const PERSON_TABLE_V_1: Table = Table {
    name: "person",
    schema: "CREATE TABLE person (id TEXT NOT NULL PRIMARY KEY, has_descriptor INTEGER NOT NULL DEFAULT 0, doc TEXT NOT NULL, updated INTEGER DEFAULT (cast(strftime('%s','now') as int)))",
    columns: &["id", "has_descriptor", "doc", "updated"],
    indices: &["CREATE INDEX person_descriptor_index ON person (has_descriptor);"],
};

pub struct VersionedSchema {
    pub version: u32,
    pub tables: &'static [Table],
}

pub const VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[PHOTO_TABLE_V_1, PERSON_TABLE_V_1],
}];

pub fn current() -> &'static VersionedSchema {
    &VERSIONED_SCHEMAS[VERSIONED_SCHEMAS.len() - 1]
}

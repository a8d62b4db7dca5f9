//! Local SQLite store: the equipment hierarchy, cannot-patrol reports and
//! cached credentials

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use rust_decimal::Decimal;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{
    Area, CannotPatrolReport, EquipmentGroup, EquipmentType, FormType, Parameter, Plant,
    ReportStatus, StoredReport, Tag,
};

/// Row counts per hierarchy level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HierarchyCounts {
    pub plants: usize,
    pub areas: usize,
    pub groups: usize,
    pub types: usize,
    pub tags: usize,
    pub parameters: usize,
}

impl HierarchyCounts {
    pub fn total(&self) -> usize {
        self.plants + self.areas + self.groups + self.types + self.tags + self.parameters
    }
}

/// Hierarchy tables, children first
const HIERARCHY_TABLES: [&str; 6] = [
    "parameters",
    "tags",
    "equipment_types",
    "equipment_groups",
    "areas",
    "plants",
];

/// Thread-safe database wrapper. All access goes through a single connection,
/// so there is exactly one writer at a time.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create the database
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::PersistenceError(format!("failed to create database directory: {e}"))
            })?;
        }

        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Open a throwaway in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()?;
        Ok(db)
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::PersistenceError("database lock poisoned".to_string()))
    }

    /// Initialize the database schema
    fn init(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS plants (
                id INTEGER PRIMARY KEY,
                plant_id INTEGER NOT NULL UNIQUE,
                name TEXT NOT NULL
            );

            -- Children are scoped by their parent's row: natural ids are only
            -- unique under the same parent.
            CREATE TABLE IF NOT EXISTS areas (
                id INTEGER PRIMARY KEY,
                area_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                plant_row INTEGER NOT NULL REFERENCES plants(id) ON DELETE CASCADE,
                plant_id INTEGER NOT NULL,
                UNIQUE (plant_row, area_id)
            );

            CREATE TABLE IF NOT EXISTS equipment_groups (
                id INTEGER PRIMARY KEY,
                group_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                area_row INTEGER NOT NULL REFERENCES areas(id) ON DELETE CASCADE,
                area_id INTEGER NOT NULL,
                UNIQUE (area_row, group_id)
            );

            CREATE TABLE IF NOT EXISTS equipment_types (
                id INTEGER PRIMARY KEY,
                type_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                group_row INTEGER NOT NULL REFERENCES equipment_groups(id) ON DELETE CASCADE,
                group_id INTEGER NOT NULL,
                UNIQUE (group_row, type_id)
            );

            CREATE TABLE IF NOT EXISTS tags (
                id INTEGER PRIMARY KEY,
                tag_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                type_row INTEGER NOT NULL REFERENCES equipment_types(id) ON DELETE CASCADE,
                type_id INTEGER NOT NULL,
                UNIQUE (type_row, tag_id)
            );

            CREATE TABLE IF NOT EXISTS parameters (
                id INTEGER PRIMARY KEY,
                param_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                unit TEXT NOT NULL,
                form_type TEXT NOT NULL,
                boolean_options TEXT NOT NULL,
                correct_option TEXT NOT NULL,
                gap TEXT NOT NULL,
                mandatory INTEGER NOT NULL DEFAULT 0,
                min INTEGER,
                max INTEGER,
                ordering INTEGER NOT NULL DEFAULT 0,
                tag_row INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
                tag_id INTEGER NOT NULL,
                UNIQUE (tag_row, param_id)
            );

            -- Cannot-patrol reports are written once and never updated
            CREATE TABLE IF NOT EXISTS cannot_patrol_reports (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                username TEXT NOT NULL,
                department TEXT NOT NULL,
                role TEXT NOT NULL,
                submitted_at TEXT NOT NULL,
                status TEXT NOT NULL,
                reason TEXT NOT NULL,
                location TEXT NOT NULL,
                longitude TEXT NOT NULL,
                latitude TEXT NOT NULL,
                reason_date TEXT NOT NULL,
                photo_name TEXT NOT NULL,
                photo BLOB NOT NULL,
                created_at TEXT NOT NULL
            );

            -- Upload state, kept apart from the immutable report rows
            CREATE TABLE IF NOT EXISTS report_sync (
                report_id TEXT PRIMARY KEY REFERENCES cannot_patrol_reports(id),
                synced_at TEXT NOT NULL
            );

            -- Cached credentials and session fields
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_parameters_ordering ON parameters(tag_row, ordering);
            CREATE INDEX IF NOT EXISTS idx_reports_created ON cannot_patrol_reports(created_at);
            "#,
        )?;

        Ok(())
    }

    // ----------------------------------------------------------------------
    // Hierarchy
    // ----------------------------------------------------------------------

    /// Merge a fetched hierarchy into the local tables.
    ///
    /// Runs top-down in a single transaction: either every level is applied or
    /// nothing is. Rows missing from `plants` are left in place.
    pub fn upsert_hierarchy(&self, plants: &[Plant]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        for plant in plants {
            let plant_row = upsert_plant(&tx, plant)?;
            for area in &plant.areas {
                let area_row = upsert_area(&tx, area, plant_row, plant.plant_id)?;
                for group in &area.groups {
                    let group_row = upsert_group(&tx, group, area_row, area.area_id)?;
                    for ty in &group.types {
                        let type_row = upsert_type(&tx, ty, group_row, group.group_id)?;
                        for tag in &ty.tags {
                            let tag_row = upsert_tag(&tx, tag, type_row, ty.type_id)?;
                            for param in &tag.parameters {
                                upsert_parameter(&tx, param, tag_row, tag.tag_id)?;
                            }
                        }
                    }
                }
            }
        }

        tx.commit()?;

        tracing::debug!(plants = plants.len(), "Hierarchy upserted");
        Ok(())
    }

    /// Rebuild the nested hierarchy from local rows.
    ///
    /// Parameters come back sorted by `ordering`; an empty store yields an
    /// empty list.
    pub fn load_hierarchy(&self) -> Result<Vec<Plant>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare("SELECT id, plant_id, name FROM plants ORDER BY plant_id, id")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, String>(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut plants = Vec::with_capacity(rows.len());
        for (row_id, plant_id, name) in rows {
            plants.push(Plant {
                plant_id,
                name,
                areas: collect_areas(&conn, row_id)?,
            });
        }

        Ok(plants)
    }

    /// Delete every hierarchy row
    pub fn clear_hierarchy(&self) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for table in HIERARCHY_TABLES {
            tx.execute(&format!("DELETE FROM {table}"), [])?;
        }
        tx.commit()?;

        tracing::debug!("Local hierarchy cleared");
        Ok(())
    }

    pub fn hierarchy_counts(&self) -> Result<HierarchyCounts> {
        let conn = self.lock()?;
        let count = |table: &str| -> Result<usize> {
            let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })?;
            Ok(n as usize)
        };

        Ok(HierarchyCounts {
            plants: count("plants")?,
            areas: count("areas")?,
            groups: count("equipment_groups")?,
            types: count("equipment_types")?,
            tags: count("tags")?,
            parameters: count("parameters")?,
        })
    }

    // ----------------------------------------------------------------------
    // Cannot-patrol reports
    // ----------------------------------------------------------------------

    pub fn insert_report(&self, report: &CannotPatrolReport) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"INSERT INTO cannot_patrol_reports (id, name, username, department, role,
               submitted_at, status, reason, location, longitude, latitude, reason_date,
               photo_name, photo, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"#,
            params![
                report.id.to_string(),
                &report.name,
                &report.username,
                &report.department,
                &report.role,
                &report.submitted_at,
                report.status.as_str(),
                &report.reason,
                &report.location,
                report.longitude.to_string(),
                report.latitude.to_string(),
                &report.reason_date,
                &report.photo_name,
                &report.photo,
                &report.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_report(&self, id: Uuid) -> Result<Option<StoredReport>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("{REPORT_SELECT} WHERE r.id = ?1"))?;
        let mut reports = collect_reports(&mut stmt, params![id.to_string()])?;
        Ok(reports.pop())
    }

    /// All reports, newest first
    pub fn list_reports(&self) -> Result<Vec<StoredReport>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("{REPORT_SELECT} ORDER BY r.created_at DESC"))?;
        collect_reports(&mut stmt, [])
    }

    /// Reports not yet accepted by the server, oldest first
    pub fn pending_reports(&self) -> Result<Vec<StoredReport>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{REPORT_SELECT} WHERE s.synced_at IS NULL ORDER BY r.created_at ASC"
        ))?;
        collect_reports(&mut stmt, [])
    }

    pub fn mark_report_synced(&self, id: Uuid) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO report_sync (report_id, synced_at) VALUES (?1, ?2)",
            params![id.to_string(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    // ----------------------------------------------------------------------
    // Key-value credentials
    // ----------------------------------------------------------------------

    pub fn get_value(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT value FROM kv_store WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn set_value(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO kv_store (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn delete_value(&self, key: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;
        Ok(())
    }
}

fn upsert_plant(conn: &Connection, plant: &Plant) -> Result<i64> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM plants WHERE plant_id = ?1",
            params![plant.plant_id],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(row_id) = existing {
        conn.execute(
            "UPDATE plants SET name = ?2 WHERE id = ?1",
            params![row_id, &plant.name],
        )?;
        Ok(row_id)
    } else {
        conn.execute(
            "INSERT INTO plants (plant_id, name) VALUES (?1, ?2)",
            params![plant.plant_id, &plant.name],
        )?;
        Ok(conn.last_insert_rowid())
    }
}

fn upsert_area(conn: &Connection, area: &Area, plant_row: i64, plant_id: i64) -> Result<i64> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM areas WHERE area_id = ?1 AND plant_row = ?2",
            params![area.area_id, plant_row],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(row_id) = existing {
        conn.execute(
            "UPDATE areas SET name = ?2 WHERE id = ?1",
            params![row_id, &area.name],
        )?;
        Ok(row_id)
    } else {
        conn.execute(
            "INSERT INTO areas (area_id, name, plant_row, plant_id) VALUES (?1, ?2, ?3, ?4)",
            params![area.area_id, &area.name, plant_row, plant_id],
        )?;
        Ok(conn.last_insert_rowid())
    }
}

fn upsert_group(
    conn: &Connection,
    group: &EquipmentGroup,
    area_row: i64,
    area_id: i64,
) -> Result<i64> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM equipment_groups WHERE group_id = ?1 AND area_row = ?2",
            params![group.group_id, area_row],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(row_id) = existing {
        conn.execute(
            "UPDATE equipment_groups SET name = ?2 WHERE id = ?1",
            params![row_id, &group.name],
        )?;
        Ok(row_id)
    } else {
        conn.execute(
            r#"INSERT INTO equipment_groups (group_id, name, area_row, area_id)
               VALUES (?1, ?2, ?3, ?4)"#,
            params![group.group_id, &group.name, area_row, area_id],
        )?;
        Ok(conn.last_insert_rowid())
    }
}

fn upsert_type(
    conn: &Connection,
    ty: &EquipmentType,
    group_row: i64,
    group_id: i64,
) -> Result<i64> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM equipment_types WHERE type_id = ?1 AND group_row = ?2",
            params![ty.type_id, group_row],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(row_id) = existing {
        conn.execute(
            "UPDATE equipment_types SET name = ?2 WHERE id = ?1",
            params![row_id, &ty.name],
        )?;
        Ok(row_id)
    } else {
        conn.execute(
            r#"INSERT INTO equipment_types (type_id, name, group_row, group_id)
               VALUES (?1, ?2, ?3, ?4)"#,
            params![ty.type_id, &ty.name, group_row, group_id],
        )?;
        Ok(conn.last_insert_rowid())
    }
}

fn upsert_tag(conn: &Connection, tag: &Tag, type_row: i64, type_id: i64) -> Result<i64> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM tags WHERE tag_id = ?1 AND type_row = ?2",
            params![tag.tag_id, type_row],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(row_id) = existing {
        conn.execute(
            "UPDATE tags SET name = ?2 WHERE id = ?1",
            params![row_id, &tag.name],
        )?;
        Ok(row_id)
    } else {
        conn.execute(
            "INSERT INTO tags (tag_id, name, type_row, type_id) VALUES (?1, ?2, ?3, ?4)",
            params![tag.tag_id, &tag.name, type_row, type_id],
        )?;
        Ok(conn.last_insert_rowid())
    }
}

fn upsert_parameter(conn: &Connection, param: &Parameter, tag_row: i64, tag_id: i64) -> Result<()> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM parameters WHERE param_id = ?1 AND tag_row = ?2",
            params![param.param_id, tag_row],
            |row| row.get(0),
        )
        .optional()?;

    // Parameters carry many mutable attributes, so every field is rewritten.
    if let Some(row_id) = existing {
        conn.execute(
            r#"UPDATE parameters SET name = ?2, unit = ?3, form_type = ?4, boolean_options = ?5,
               correct_option = ?6, gap = ?7, mandatory = ?8, min = ?9, max = ?10, ordering = ?11
               WHERE id = ?1"#,
            params![
                row_id,
                &param.name,
                &param.unit,
                param.form_type.as_str(),
                &param.boolean_options,
                &param.correct_option,
                &param.gap,
                param.mandatory as i32,
                param.min,
                param.max,
                param.ordering,
            ],
        )?;
    } else {
        conn.execute(
            r#"INSERT INTO parameters (param_id, name, unit, form_type, boolean_options,
               correct_option, gap, mandatory, min, max, ordering, tag_row, tag_id)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"#,
            params![
                param.param_id,
                &param.name,
                &param.unit,
                param.form_type.as_str(),
                &param.boolean_options,
                &param.correct_option,
                &param.gap,
                param.mandatory as i32,
                param.min,
                param.max,
                param.ordering,
                tag_row,
                tag_id,
            ],
        )?;
    }

    Ok(())
}

/// (row id, natural id, name, parent natural id)
type NodeRow = (i64, i64, String, i64);

fn collect_nodes(conn: &Connection, sql: &str, parent_row: i64) -> Result<Vec<NodeRow>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt.query_map(params![parent_row], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
    })?;

    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

fn collect_areas(conn: &Connection, plant_row: i64) -> Result<Vec<Area>> {
    let rows = collect_nodes(
        conn,
        "SELECT id, area_id, name, plant_id FROM areas WHERE plant_row = ?1 ORDER BY area_id, id",
        plant_row,
    )?;

    let mut areas = Vec::with_capacity(rows.len());
    for (row_id, area_id, name, plant_id) in rows {
        areas.push(Area {
            area_id,
            name,
            plant_id,
            groups: collect_groups(conn, row_id)?,
        });
    }
    Ok(areas)
}

fn collect_groups(conn: &Connection, area_row: i64) -> Result<Vec<EquipmentGroup>> {
    let rows = collect_nodes(
        conn,
        r#"SELECT id, group_id, name, area_id FROM equipment_groups
           WHERE area_row = ?1 ORDER BY group_id, id"#,
        area_row,
    )?;

    let mut groups = Vec::with_capacity(rows.len());
    for (row_id, group_id, name, area_id) in rows {
        groups.push(EquipmentGroup {
            group_id,
            name,
            area_id,
            types: collect_types(conn, row_id)?,
        });
    }
    Ok(groups)
}

fn collect_types(conn: &Connection, group_row: i64) -> Result<Vec<EquipmentType>> {
    let rows = collect_nodes(
        conn,
        r#"SELECT id, type_id, name, group_id FROM equipment_types
           WHERE group_row = ?1 ORDER BY type_id, id"#,
        group_row,
    )?;

    let mut types = Vec::with_capacity(rows.len());
    for (row_id, type_id, name, group_id) in rows {
        types.push(EquipmentType {
            type_id,
            name,
            group_id,
            tags: collect_tags(conn, row_id)?,
        });
    }
    Ok(types)
}

fn collect_tags(conn: &Connection, type_row: i64) -> Result<Vec<Tag>> {
    let rows = collect_nodes(
        conn,
        "SELECT id, tag_id, name, type_id FROM tags WHERE type_row = ?1 ORDER BY tag_id, id",
        type_row,
    )?;

    let mut tags = Vec::with_capacity(rows.len());
    for (row_id, tag_id, name, type_id) in rows {
        tags.push(Tag {
            tag_id,
            name,
            type_id,
            parameters: collect_parameters(conn, row_id)?,
        });
    }
    Ok(tags)
}

fn collect_parameters(conn: &Connection, tag_row: i64) -> Result<Vec<Parameter>> {
    let mut stmt = conn.prepare_cached(
        r#"SELECT param_id, name, unit, form_type, boolean_options, correct_option, gap,
           mandatory, min, max, ordering, tag_id
           FROM parameters WHERE tag_row = ?1 ORDER BY ordering ASC, id ASC"#,
    )?;
    let rows = stmt.query_map(params![tag_row], |row| {
        let form_type: String = row.get(3)?;
        Ok(Parameter {
            param_id: row.get(0)?,
            name: row.get(1)?,
            unit: row.get(2)?,
            form_type: FormType::from(form_type.as_str()),
            boolean_options: row.get(4)?,
            correct_option: row.get(5)?,
            gap: row.get(6)?,
            mandatory: row.get::<_, i32>(7)? != 0,
            min: row.get(8)?,
            max: row.get(9)?,
            ordering: row.get(10)?,
            tag_id: row.get(11)?,
        })
    })?;

    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

const REPORT_SELECT: &str = r#"SELECT r.id, r.name, r.username, r.department, r.role,
    r.submitted_at, r.status, r.reason, r.location, r.longitude, r.latitude, r.reason_date,
    r.photo_name, r.photo, r.created_at, s.synced_at
    FROM cannot_patrol_reports r LEFT JOIN report_sync s ON s.report_id = r.id"#;

fn collect_reports<P: rusqlite::Params>(
    stmt: &mut rusqlite::Statement,
    params: P,
) -> Result<Vec<StoredReport>> {
    let rows = stmt.query_map(params, |row| {
        Ok(RawReport {
            id: row.get(0)?,
            name: row.get(1)?,
            username: row.get(2)?,
            department: row.get(3)?,
            role: row.get(4)?,
            submitted_at: row.get(5)?,
            status: row.get(6)?,
            reason: row.get(7)?,
            location: row.get(8)?,
            longitude: row.get(9)?,
            latitude: row.get(10)?,
            reason_date: row.get(11)?,
            photo_name: row.get(12)?,
            photo: row.get(13)?,
            created_at: row.get(14)?,
            synced_at: row.get(15)?,
        })
    })?;

    rows.map(|raw| -> Result<StoredReport> { raw?.into_stored() })
        .collect()
}

/// A report row before its text columns are parsed back into typed values
struct RawReport {
    id: String,
    name: String,
    username: String,
    department: String,
    role: String,
    submitted_at: String,
    status: String,
    reason: String,
    location: String,
    longitude: String,
    latitude: String,
    reason_date: String,
    photo_name: String,
    photo: Vec<u8>,
    created_at: String,
    synced_at: Option<String>,
}

impl RawReport {
    fn into_stored(self) -> Result<StoredReport> {
        let corrupt = |field: &str, detail: String| {
            Error::PersistenceError(format!("corrupt report {}: {field}: {detail}", self.id))
        };

        let id = Uuid::parse_str(&self.id).map_err(|e| corrupt("id", e.to_string()))?;
        let status = self
            .status
            .parse::<ReportStatus>()
            .map_err(|e| corrupt("status", e))?;
        let longitude = self
            .longitude
            .parse::<Decimal>()
            .map_err(|e| corrupt("longitude", e.to_string()))?;
        let latitude = self
            .latitude
            .parse::<Decimal>()
            .map_err(|e| corrupt("latitude", e.to_string()))?;

        Ok(StoredReport {
            report: CannotPatrolReport {
                id,
                name: self.name,
                username: self.username,
                department: self.department,
                role: self.role,
                submitted_at: self.submitted_at,
                status,
                reason: self.reason,
                location: self.location,
                longitude,
                latitude,
                reason_date: self.reason_date,
                photo_name: self.photo_name,
                photo: self.photo,
                created_at: self.created_at,
            },
            synced_at: self.synced_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ReportInput, Reporter};
    use chrono::Local;

    fn param(param_id: i64, ordering: i64) -> Parameter {
        Parameter {
            param_id,
            name: format!("Param {param_id}"),
            unit: "bar".into(),
            form_type: FormType::Range,
            boolean_options: String::new(),
            correct_option: String::new(),
            gap: "0".into(),
            mandatory: true,
            min: Some(1),
            max: Some(9),
            ordering,
            tag_id: 0,
        }
    }

    fn plant(plant_id: i64, name: &str, area_id: i64, params: Vec<Parameter>) -> Plant {
        let mut plant = Plant {
            plant_id,
            name: name.into(),
            areas: vec![Area {
                area_id,
                name: format!("Area {area_id}"),
                plant_id: 0,
                groups: vec![EquipmentGroup {
                    group_id: 1,
                    name: "Pumps".into(),
                    area_id: 0,
                    types: vec![EquipmentType {
                        type_id: 1,
                        name: "Centrifugal".into(),
                        group_id: 0,
                        tags: vec![Tag {
                            tag_id: 1,
                            name: "P-101".into(),
                            type_id: 0,
                            parameters: params,
                        }],
                    }],
                }],
            }],
        };
        plant.link_parents();
        plant
    }

    fn sample_report(photo: Vec<u8>) -> CannotPatrolReport {
        CannotPatrolReport::new(
            ReportInput {
                reporter: Reporter {
                    name: "Budi".into(),
                    username: "budi@example.com".into(),
                    department: "Maintenance".into(),
                    role: "Technician".into(),
                },
                status: ReportStatus::Urgent,
                reason: "Gas leak alarm".into(),
                location: "Unit 3".into(),
                longitude: "106.845599".parse().unwrap(),
                latitude: "-6.208763".parse().unwrap(),
                photo,
            },
            Local::now(),
        )
    }

    #[test]
    fn empty_store_loads_empty_hierarchy() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.load_hierarchy().unwrap().is_empty());
    }

    #[test]
    fn upsert_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let tree = vec![plant(1, "North", 10, vec![param(1, 1), param(2, 2)])];

        db.upsert_hierarchy(&tree).unwrap();
        let counts = db.hierarchy_counts().unwrap();
        let first = db.load_hierarchy().unwrap();

        db.upsert_hierarchy(&tree).unwrap();
        assert_eq!(db.hierarchy_counts().unwrap(), counts);
        assert_eq!(db.load_hierarchy().unwrap(), first);
        assert_eq!(counts.total(), 7);
        assert_eq!(first, tree);
    }

    #[test]
    fn same_area_id_under_different_plants_stays_separate() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_hierarchy(&[
            plant(1, "North", 10, vec![param(1, 1)]),
            plant(2, "South", 10, vec![param(1, 1)]),
        ])
        .unwrap();

        let loaded = db.load_hierarchy().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(db.hierarchy_counts().unwrap().areas, 2);
        for p in &loaded {
            assert_eq!(p.areas.len(), 1);
            assert_eq!(p.areas[0].area_id, 10);
            assert_eq!(p.areas[0].plant_id, p.plant_id);
        }
    }

    #[test]
    fn parameters_load_in_ordering_order() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_hierarchy(&[plant(1, "North", 10, vec![param(30, 3), param(10, 1), param(20, 2)])])
            .unwrap();

        let loaded = db.load_hierarchy().unwrap();
        let orderings: Vec<i64> = loaded[0].areas[0].groups[0].types[0].tags[0]
            .parameters
            .iter()
            .map(|p| p.ordering)
            .collect();
        assert_eq!(orderings, vec![1, 2, 3]);
    }

    #[test]
    fn renaming_a_plant_keeps_children() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_hierarchy(&[plant(1, "North", 10, vec![param(1, 1)])])
            .unwrap();
        db.upsert_hierarchy(&[plant(1, "North Site", 10, vec![param(1, 1)])])
            .unwrap();

        let loaded = db.load_hierarchy().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "North Site");
        assert_eq!(loaded[0].areas.len(), 1);
        assert_eq!(db.hierarchy_counts().unwrap().areas, 1);
    }

    #[test]
    fn parameter_update_rewrites_every_field() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_hierarchy(&[plant(1, "North", 10, vec![param(1, 1)])])
            .unwrap();

        let mut changed = param(1, 5);
        changed.unit = "psi".into();
        changed.form_type = FormType::Option;
        changed.boolean_options = "OK,NOT OK".into();
        changed.correct_option = "OK".into();
        changed.mandatory = false;
        changed.min = None;
        changed.max = None;
        changed.tag_id = 1;
        db.upsert_hierarchy(&[plant(1, "North", 10, vec![changed.clone()])])
            .unwrap();

        let loaded = db.load_hierarchy().unwrap();
        let stored = &loaded[0].areas[0].groups[0].types[0].tags[0].parameters;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0], changed);
    }

    #[test]
    fn remote_deletions_are_not_pruned() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_hierarchy(&[
            plant(1, "North", 10, vec![param(1, 1)]),
            plant(2, "South", 20, vec![param(1, 1)]),
        ])
        .unwrap();
        db.upsert_hierarchy(&[plant(1, "North", 10, vec![param(1, 1)])])
            .unwrap();

        assert_eq!(db.load_hierarchy().unwrap().len(), 2);
    }

    #[test]
    fn failed_lookup_aborts_whole_upsert() {
        let db = Database::open_in_memory().unwrap();
        let before = vec![plant(1, "North", 10, vec![param(1, 1)])];
        db.upsert_hierarchy(&before).unwrap();

        // Break the parameter table so the existence lookup itself fails.
        db.lock()
            .unwrap()
            .execute_batch("ALTER TABLE parameters RENAME COLUMN param_id TO broken_id")
            .unwrap();

        let result = db.upsert_hierarchy(&[
            plant(1, "Renamed", 10, vec![param(1, 1)]),
            plant(2, "South", 20, vec![param(1, 1)]),
        ]);
        assert!(matches!(result, Err(Error::PersistenceError(_))));

        let conn = db.lock().unwrap();
        let names: Vec<String> = conn
            .prepare("SELECT name FROM plants ORDER BY plant_id")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(names, vec!["North".to_string()]);
    }

    #[test]
    fn clear_hierarchy_wipes_every_level() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_hierarchy(&[plant(1, "North", 10, vec![param(1, 1)])])
            .unwrap();
        db.clear_hierarchy().unwrap();

        assert_eq!(db.hierarchy_counts().unwrap().total(), 0);
        assert!(db.load_hierarchy().unwrap().is_empty());
    }

    #[test]
    fn report_round_trips_with_photo_bytes() {
        let db = Database::open_in_memory().unwrap();
        let photo: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        let report = sample_report(photo.clone());
        db.insert_report(&report).unwrap();

        let stored = db.get_report(report.id).unwrap().unwrap();
        assert_eq!(stored.report, report);
        assert_eq!(stored.report.photo, photo);
        assert!(!stored.is_synced());
    }

    #[test]
    fn reports_are_insert_only() {
        let db = Database::open_in_memory().unwrap();
        let report = sample_report(vec![1, 2, 3]);
        db.insert_report(&report).unwrap();
        assert!(db.insert_report(&report).is_err());
    }

    #[test]
    fn synced_reports_leave_pending_list() {
        let db = Database::open_in_memory().unwrap();
        let first = sample_report(vec![1]);
        let second = sample_report(vec![2]);
        db.insert_report(&first).unwrap();
        db.insert_report(&second).unwrap();

        db.mark_report_synced(first.id).unwrap();

        let pending = db.pending_reports().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].report.id, second.id);
        assert_eq!(db.list_reports().unwrap().len(), 2);
        assert!(db.get_report(first.id).unwrap().unwrap().is_synced());
    }

    #[test]
    fn kv_values_can_be_set_and_cleared() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.get_value("token").unwrap(), None);

        db.set_value("token", "abc").unwrap();
        db.set_value("token", "def").unwrap();
        assert_eq!(db.get_value("token").unwrap().as_deref(), Some("def"));

        db.delete_value("token").unwrap();
        assert_eq!(db.get_value("token").unwrap(), None);
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("patrol.sqlite");
        let db = Database::open(&path).unwrap();
        db.upsert_hierarchy(&[plant(1, "North", 10, vec![])]).unwrap();
        drop(db);

        let reopened = Database::open(&path).unwrap();
        assert_eq!(reopened.load_hierarchy().unwrap().len(), 1);
    }
}

// src/table/mod.rs

//! Tables
//!
//! A table is a schema, a primary prolly map (key tuple → value tuple),
//! one prolly map per secondary index, an AUTO_INCREMENT counter, and
//! optional conflict/violation sidecars left behind by a merge. The
//! table hash covers all of it.
//!
//! Keyless tables store rows as a multiset: the synthetic key is the
//! hash of the row and the stored tuple carries a duplicate count, so
//! the table hash stays a pure function of table contents.

pub mod row;
mod sidecar;

pub use sidecar::{ConflictRow, Conflicts, Violation, ViolationType};

use crate::codec::{Reader, Value, Writer};
use crate::hash::Addr;
use crate::prolly::{KeyOrder, MapEditor, ProllyMap};
use crate::schema::{IndexDef, Schema};
use crate::store::ChunkStore;
use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Counters at or below one are indistinguishable from "never set"
fn canonical_counter(counter: u64) -> u64 {
    if counter <= 1 {
        0
    } else {
        counter
    }
}

#[derive(Clone, Debug)]
pub struct Table {
    schema: Schema,
    primary: ProllyMap,
    indexes: BTreeMap<String, ProllyMap>,
    auto_increment: u64,
    conflicts: Option<Conflicts>,
    violations: Option<ProllyMap>,
}

/// Key ordering for a schema's primary map
fn primary_order(schema: &Schema) -> KeyOrder {
    KeyOrder::Tuple(schema.pk_collations())
}

/// Key ordering for one secondary index
fn index_order(schema: &Schema, def: &IndexDef) -> KeyOrder {
    let mut collations: Vec<_> = def
        .tags
        .iter()
        .filter_map(|tag| schema.column_by_tag(*tag))
        .map(|c| c.ty.collation())
        .collect();
    if !def.unique {
        collations.extend(schema.pk_collations());
    }
    KeyOrder::Tuple(collations)
}

impl Table {
    /// An empty table with the given schema
    pub fn new(store: Arc<dyn ChunkStore>, schema: Schema) -> Table {
        let primary = ProllyMap::empty(store.clone(), primary_order(&schema));
        let indexes = schema
            .indexes()
            .iter()
            .map(|def| {
                (
                    def.name.clone(),
                    ProllyMap::empty(store.clone(), index_order(&schema, def)),
                )
            })
            .collect();
        Table {
            schema,
            primary,
            indexes,
            auto_increment: 0,
            conflicts: None,
            violations: None,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn store(&self) -> Arc<dyn ChunkStore> {
        self.primary.store().clone()
    }

    pub fn primary(&self) -> &ProllyMap {
        &self.primary
    }

    pub fn index(&self, name: &str) -> Option<&ProllyMap> {
        self.indexes.get(name)
    }

    /// The counter value the next auto-allocated key would use
    pub fn next_auto_increment(&self) -> u64 {
        self.auto_increment.max(1)
    }

    pub fn auto_increment(&self) -> u64 {
        self.auto_increment
    }

    /// `ALTER TABLE … AUTO_INCREMENT = n`: only ever moves forward
    pub fn set_auto_increment(&self, n: u64) -> Table {
        let mut table = self.clone();
        table.auto_increment = table.auto_increment.max(n);
        table
    }

    /// Used by merge reconciliation; takes the max like the ALTER form
    pub fn with_auto_increment_floor(&self, n: u64) -> Table {
        self.set_auto_increment(n)
    }

    pub fn conflicts(&self) -> Option<&Conflicts> {
        self.conflicts.as_ref()
    }

    pub fn violations(&self) -> Option<&ProllyMap> {
        self.violations.as_ref()
    }

    pub fn has_conflicts(&self) -> bool {
        self.conflicts.as_ref().is_some_and(|c| !c.is_empty())
    }

    pub fn has_violations(&self) -> bool {
        self.violations.as_ref().is_some_and(|v| !v.is_empty())
    }

    pub fn with_conflicts(&self, conflicts: Conflicts) -> Table {
        let mut table = self.clone();
        table.conflicts = Some(conflicts);
        table
    }

    pub fn clear_conflicts(&self) -> Table {
        let mut table = self.clone();
        table.conflicts = None;
        table
    }

    pub fn with_violations(&self, violations: ProllyMap) -> Table {
        let mut table = self.clone();
        table.violations = if violations.is_empty() {
            None
        } else {
            Some(violations)
        };
        table
    }

    pub fn clear_violations(&self) -> Table {
        let mut table = self.clone();
        table.violations = None;
        table
    }

    /// Distinct primary entries (for keyless tables, distinct rows)
    pub fn entry_count(&self) -> u64 {
        self.primary.count()
    }

    /// Logical row count, expanding keyless duplicate counts
    pub fn row_count(&self) -> Result<u64> {
        if !self.schema.is_keyless() {
            return Ok(self.primary.count());
        }
        let mut total = 0u64;
        for entry in self.primary.iter()? {
            let (_, value) = entry?;
            total += keyless_count(&value)?;
        }
        Ok(total)
    }

    /// Point lookup by primary-key values
    pub fn get_row(&self, key_values: &[Value]) -> Result<Option<Vec<Value>>> {
        let key = Value::Tuple(key_values.to_vec()).to_bytes()?;
        match self.primary.get(&key)? {
            Some(value) => Ok(Some(row::decode_row(&self.schema, &key, &value)?)),
            None => Ok(None),
        }
    }

    /// Full scan in key order
    pub fn scan(&self) -> Result<Vec<Vec<Value>>> {
        let mut rows = Vec::new();
        for entry in self.primary.iter()? {
            let (key, value) = entry?;
            if self.schema.is_keyless() {
                let (count, fields) = decode_keyless(&value)?;
                let full = row::decode_row(&self.schema, &empty_key()?, &fields)?;
                for _ in 0..count {
                    rows.push(full.clone());
                }
            } else {
                rows.push(row::decode_row(&self.schema, &key, &value)?);
            }
        }
        Ok(rows)
    }

    /// Open an edit batch
    pub fn editor(&self) -> TableEditor {
        TableEditor {
            schema: self.schema.clone(),
            base_primary: self.primary.clone(),
            base_indexes: self.indexes.clone(),
            primary: self.primary.edit(),
            index_edits: self
                .schema
                .indexes()
                .iter()
                .map(|def| {
                    let map = self
                        .indexes
                        .get(&def.name)
                        .cloned()
                        .unwrap_or_else(|| {
                            ProllyMap::empty(self.store(), index_order(&self.schema, def))
                        });
                    (def.clone(), map.edit())
                })
                .collect(),
            auto_increment: self.auto_increment,
            overlay: HashMap::new(),
            unique_overlay: HashMap::new(),
            conflicts: self.conflicts.clone(),
            violations: self.violations.clone(),
        }
    }

    // ---- schema changes ----

    /// Rename a column; tags and rows are untouched
    pub fn rename_column(&self, old: &str, new: &str) -> Result<Table> {
        let mut table = self.clone();
        table.schema = self.schema.rename_column(old, new)?;
        Ok(table)
    }

    /// Append a column; existing rows read NULL for it
    pub fn add_column(
        &self,
        table_name: &str,
        name: &str,
        ty: crate::schema::SqlType,
        nullable: bool,
        default: Option<String>,
    ) -> Result<Table> {
        if !nullable && default.is_none() && !self.primary.is_empty() {
            return Err(Error::Schema(format!(
                "cannot add NOT NULL column '{}' without a default to a non-empty table",
                name
            )));
        }
        let mut table = self.clone();
        table.schema = self
            .schema
            .add_column(table_name, name, ty, nullable, default)?;
        Ok(table)
    }

    /// Drop a non-key column and rewrite the value tuples
    pub fn drop_column(&self, name: &str) -> Result<Table> {
        let new_schema = self.schema.drop_column(name)?;
        self.rewrite_with_schema(new_schema)
    }

    /// Change a column's type, converting stored values where the kind
    /// changes and re-validating them where it narrows.
    pub fn modify_column_type(
        &self,
        table_name: &str,
        name: &str,
        new_ty: crate::schema::SqlType,
    ) -> Result<Table> {
        let col = self
            .schema
            .column_by_name(name)
            .ok_or_else(|| Error::Schema(format!("column '{}' not found", name)))?;
        let old_ty = col.ty.clone();
        let col_pos = self
            .schema
            .column_position(col.tag)
            .ok_or_else(|| Error::Schema(format!("column '{}' not found", name)))?;
        let new_schema = self.schema.modify_column_type(table_name, name, new_ty.clone())?;

        if old_ty == new_ty {
            let mut table = self.clone();
            table.schema = new_schema;
            return Ok(table);
        }

        // Rebuild rows, converting the changed field
        let mut target = Table::new(self.store(), new_schema);
        target.auto_increment = self.auto_increment;
        let mut editor = target.editor();
        for old_row in self.scan()? {
            let mut new_row = old_row;
            let converted = row::convert_value(&new_row[col_pos], &old_ty, &new_ty)
                .map_err(|e| match e {
                    Error::TypeDomain { detail, .. } => Error::TypeDomain {
                        column: name.to_string(),
                        detail,
                    },
                    other => other,
                })?;
            new_ty.validate(name, &converted)?;
            new_row[col_pos] = converted;
            editor.insert_row(new_row)?;
        }
        editor.flush()
    }

    /// Drop the primary key, rewriting rows into the keyless multiset
    /// form. Refused while a foreign key depends on the key.
    pub fn drop_primary_key(&self, referenced_by_fk: bool) -> Result<Table> {
        if referenced_by_fk {
            return Err(Error::PrimaryKeyNeededByForeignKey);
        }
        let new_schema = self.schema.drop_primary_key()?;
        self.rewrite_with_schema(new_schema)
    }

    /// Add a primary key to a keyless table. Fails if any row is NULL
    /// in a key column or any two rows collide on the new key.
    pub fn add_primary_key(&self, names: &[&str]) -> Result<Table> {
        let new_schema = self.schema.add_primary_key(names)?;
        for entry in self.primary.iter()? {
            let (_, value) = entry?;
            if keyless_count(&value)? > 1 {
                return Err(Error::DuplicateKey(
                    "duplicate rows prevent adding a primary key".to_string(),
                ));
            }
        }
        self.rewrite_with_schema(new_schema)
    }

    /// Rebuild every map under a new schema; insert-time validation
    /// enforces the new key's uniqueness and non-null rules.
    fn rewrite_with_schema(&self, new_schema: Schema) -> Result<Table> {
        let mut target = Table::new(self.store(), new_schema.clone());
        target.auto_increment = self.auto_increment;
        let mut editor = target.editor();
        for old_row in self.scan()? {
            editor.insert_row(row::project_row(&self.schema, &new_schema, &old_row))?;
        }
        editor.flush()
    }

    /// Rebuild this table's rows under a (merge-resolved) sibling
    /// schema without revalidating constraints; used by the merge
    /// engine, which revalidates separately.
    pub fn reproject(&self, new_schema: Schema) -> Result<Table> {
        let mut entries: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
        if new_schema.is_keyless() {
            let mut counts: BTreeMap<Vec<u8>, (u64, Vec<Value>)> = BTreeMap::new();
            for old_row in self.scan()? {
                let new_row = row::project_row(&self.schema, &new_schema, &old_row);
                let value = row::encode_value(&new_schema, &new_row)?;
                let key = row::keyless_key(&value)?;
                counts.entry(key).or_insert((0, new_row)).0 += 1;
            }
            for (key, (count, fields)) in counts {
                entries.push((key, encode_keyless(count, &fields)?));
            }
        } else {
            for old_row in self.scan()? {
                let new_row = row::project_row(&self.schema, &new_schema, &old_row);
                let key = row::encode_key(&new_schema, &new_row)?;
                let value = row::encode_value(&new_schema, &new_row)?;
                entries.push((key, value));
            }
        }
        let order = primary_order(&new_schema);
        entries.sort_by(|a, b| order.compare(&a.0, &b.0));
        let primary =
            ProllyMap::from_sorted_entries(self.store(), order, entries)?;
        let mut table = Table {
            schema: new_schema.clone(),
            primary,
            indexes: BTreeMap::new(),
            auto_increment: self.auto_increment,
            conflicts: self.conflicts.clone(),
            violations: self.violations.clone(),
        };
        table.rebuild_indexes()?;
        Ok(table)
    }

    /// Replace the primary map wholesale; the caller owns index rebuild
    pub(crate) fn with_primary_map(&self, primary: ProllyMap) -> Table {
        let mut table = self.clone();
        table.primary = primary;
        table
    }

    /// Recompute every secondary index from the primary map
    pub fn rebuild_indexes(&mut self) -> Result<()> {
        let mut indexes = BTreeMap::new();
        for def in self.schema.indexes() {
            let order = index_order(&self.schema, def);
            let mut entries: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
            for item in self.primary.iter()? {
                let (key, value) = item?;
                let full = if self.schema.is_keyless() {
                    let (_, fields) = decode_keyless(&value)?;
                    row::decode_row(&self.schema, &empty_key()?, &fields)?
                } else {
                    row::decode_row(&self.schema, &key, &value)?
                };
                let (ikey, ivalue) = index_entry(&self.schema, def, &full, &key)?;
                entries.push((ikey, ivalue));
            }
            entries.sort_by(|a, b| order.compare(&a.0, &b.0));
            entries.dedup_by(|a, b| a.0 == b.0);
            indexes.insert(
                def.name.clone(),
                ProllyMap::from_sorted_entries(self.store(), order, entries)?,
            );
        }
        self.indexes = indexes;
        Ok(())
    }

    // ---- persistence ----

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_bytes(&self.schema.to_bytes());
        w.put_addr(&self.primary.root_addr());
        w.put_u16(self.indexes.len() as u16);
        for (name, map) in &self.indexes {
            w.put_str(name);
            w.put_addr(&map.root_addr());
        }
        w.put_u64(canonical_counter(self.auto_increment));
        match &self.conflicts {
            Some(conflicts) => {
                w.put_bool(true);
                conflicts.encode(&mut w);
            }
            None => w.put_bool(false),
        }
        match &self.violations {
            Some(map) => {
                w.put_bool(true);
                w.put_addr(&map.root_addr());
            }
            None => w.put_bool(false),
        }
        w.into_bytes()
    }

    /// The table hash: a pure function of schema, rows, indexes,
    /// counter, and sidecars.
    pub fn hash(&self) -> Addr {
        Addr::of(&self.encode())
    }

    /// Persist the table value chunk and return its address
    pub fn save(&self) -> Result<Addr> {
        self.store().put(&self.encode())
    }

    pub fn load(store: Arc<dyn ChunkStore>, addr: &Addr) -> Result<Table> {
        let bytes = store.get_required(addr)?;
        let mut r = Reader::new(&bytes);

        let schema_bytes = r.get_bytes()?;
        let mut sr = Reader::new(schema_bytes);
        let schema = Schema::decode(&mut sr)?;
        sr.finish()?;

        let primary_root = r.get_addr()?;
        let primary = ProllyMap::load(store.clone(), primary_root, primary_order(&schema))?;

        let index_count = r.get_u16()? as usize;
        let mut indexes = BTreeMap::new();
        for _ in 0..index_count {
            let name = r.get_str()?.to_string();
            let root = r.get_addr()?;
            let def = schema
                .index_by_name(&name)
                .ok_or_else(|| Error::Decode(format!("unknown index '{}' in table value", name)))?;
            let order = index_order(&schema, def);
            indexes.insert(name, ProllyMap::load(store.clone(), root, order)?);
        }

        let auto_increment = r.get_u64()?;
        let conflicts = if r.get_bool()? {
            Some(Conflicts::decode(
                &mut r,
                store.clone(),
                primary_order(&schema),
            )?)
        } else {
            None
        };
        let violations = if r.get_bool()? {
            let root = r.get_addr()?;
            Some(ProllyMap::load(store.clone(), root, KeyOrder::Bytes)?)
        } else {
            None
        };
        r.finish()?;

        Ok(Table {
            schema,
            primary,
            indexes,
            auto_increment,
            conflicts,
            violations,
        })
    }
}

fn empty_key() -> Result<Vec<u8>> {
    Value::Tuple(Vec::new()).to_bytes()
}

/// Decode a keyless stored tuple into (count, inner value tuple bytes)
fn decode_keyless(stored: &[u8]) -> Result<(u64, Vec<u8>)> {
    let fields = row::decode_tuple(stored)?;
    let Some(Value::Uint(count)) = fields.first() else {
        return Err(Error::Decode("keyless row missing count".to_string()));
    };
    let inner = Value::Tuple(fields[1..].to_vec()).to_bytes()?;
    Ok((*count, inner))
}

fn encode_keyless(count: u64, fields: &[Value]) -> Result<Vec<u8>> {
    let mut all = Vec::with_capacity(fields.len() + 1);
    all.push(Value::Uint(count));
    all.extend_from_slice(fields);
    Value::Tuple(all).to_bytes()
}

fn keyless_count(stored: &[u8]) -> Result<u64> {
    Ok(decode_keyless(stored)?.0)
}

/// Build one secondary index entry for a row
fn index_entry(
    schema: &Schema,
    def: &IndexDef,
    full_row: &[Value],
    pk_key: &[u8],
) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut fields = Vec::with_capacity(def.tags.len());
    let mut has_null = false;
    for tag in &def.tags {
        let pos = schema
            .column_position(*tag)
            .ok_or_else(|| Error::Schema(format!("index tag {} missing from schema", tag)))?;
        let v = full_row[pos].clone();
        has_null |= v.is_null();
        fields.push(v);
    }
    if def.unique && !has_null {
        // Unique entries are keyed by the index columns alone and point
        // back at the primary key.
        Ok((
            Value::Tuple(fields).to_bytes()?,
            pk_key.to_vec(),
        ))
    } else {
        // Non-unique (and NULL-holding unique) entries append the pk so
        // every row keeps a distinct entry.
        let pk_fields = row::decode_tuple(pk_key)?;
        fields.extend(pk_fields);
        Ok((Value::Tuple(fields).to_bytes()?, Value::Tuple(Vec::new()).to_bytes()?))
    }
}

/// An edit batch over one table
pub struct TableEditor {
    schema: Schema,
    base_primary: ProllyMap,
    base_indexes: BTreeMap<String, ProllyMap>,
    primary: MapEditor,
    index_edits: Vec<(IndexDef, MapEditor)>,
    auto_increment: u64,
    /// Batch-local view of primary keys: Some = live, None = deleted
    overlay: HashMap<Vec<u8>, Option<Vec<u8>>>,
    /// Batch-local view of unique-index keys → pk
    unique_overlay: HashMap<(String, Vec<u8>), Option<Vec<u8>>>,
    conflicts: Option<Conflicts>,
    violations: Option<ProllyMap>,
}

impl TableEditor {
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Allocate the next AUTO_INCREMENT value without inserting
    pub fn next_auto_increment(&self) -> u64 {
        self.auto_increment.max(1)
    }

    fn lookup_primary(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(state) = self.overlay.get(key) {
            return Ok(state.clone());
        }
        self.base_primary.get(key)
    }

    fn validate_row(&self, row: &[Value]) -> Result<()> {
        let columns = self.schema.columns();
        if row.len() != columns.len() {
            return Err(Error::Argument(format!(
                "row has {} values, table has {} columns",
                row.len(),
                columns.len()
            )));
        }
        for (value, col) in row.iter().zip(columns) {
            if value.is_null() && !col.nullable {
                return Err(Error::NotNull(col.name.clone()));
            }
            col.ty.validate(&col.name, value)?;
        }
        for check in self.schema.checks() {
            if !check.evaluate(&self.schema, row) {
                return Err(Error::CheckFailed(check.name.clone()));
            }
        }
        Ok(())
    }

    /// Insert a full row (values in schema column order)
    pub fn insert_row(&mut self, values: Vec<Value>) -> Result<()> {
        self.validate_row(&values)?;

        if self.schema.is_keyless() {
            return self.insert_keyless(values);
        }

        let key = row::encode_key(&self.schema, &values)?;
        if self.lookup_primary(&key)?.is_some() {
            return Err(Error::DuplicateKey(row::render_key(&key)));
        }
        let value = row::encode_value(&self.schema, &values)?;

        // Secondary indexes first, so a unique collision leaves the
        // batch untouched.
        let mut index_puts = Vec::with_capacity(self.index_edits.len());
        for (def, _) in &self.index_edits {
            let (ikey, ivalue) = index_entry(&self.schema, def, &values, &key)?;
            if def.unique && ivalue != Value::Tuple(Vec::new()).to_bytes()? {
                let seen = match self.unique_overlay.get(&(def.name.clone(), ikey.clone())) {
                    Some(state) => state.is_some(),
                    None => self
                        .base_indexes
                        .get(&def.name)
                        .map(|m| m.contains(&ikey))
                        .transpose()?
                        .unwrap_or(false),
                };
                if seen {
                    return Err(Error::UniqueKey(format!(
                        "index '{}' key {}",
                        def.name,
                        row::render_key(&ikey)
                    )));
                }
            }
            index_puts.push((def.name.clone(), def.unique, ikey, ivalue));
        }

        for ((_, editor), (name, unique, ikey, ivalue)) in
            self.index_edits.iter_mut().zip(index_puts)
        {
            if unique {
                self.unique_overlay
                    .insert((name, ikey.clone()), Some(key.clone()));
            }
            editor.put(ikey, ivalue);
        }

        self.primary.put(key.clone(), value.clone());
        self.overlay.insert(key, Some(value));
        self.advance_auto_increment(&values);
        Ok(())
    }

    fn insert_keyless(&mut self, values: Vec<Value>) -> Result<()> {
        let fields = values.clone();
        let value_tuple = row::encode_value(&self.schema, &values)?;
        let key = row::keyless_key(&value_tuple)?;
        let count = match self.lookup_primary(&key)? {
            Some(existing) => keyless_count(&existing)? + 1,
            None => 1,
        };
        let stored = encode_keyless(count, &fields)?;
        if count == 1 {
            for (def, editor) in &mut self.index_edits {
                let (ikey, ivalue) = index_entry(&self.schema, def, &values, &key)?;
                editor.put(ikey, ivalue);
            }
        }
        self.primary.put(key.clone(), stored.clone());
        self.overlay.insert(key, Some(stored));
        Ok(())
    }

    /// Delete by primary-key values; returns false when absent
    pub fn delete_row(&mut self, key_values: &[Value]) -> Result<bool> {
        if self.schema.is_keyless() {
            return Err(Error::Unsupported(
                "delete by key on a keyless table; delete by row instead".to_string(),
            ));
        }
        let key = Value::Tuple(key_values.to_vec()).to_bytes()?;
        let Some(value) = self.lookup_primary(&key)? else {
            return Ok(false);
        };
        let full = row::decode_row(&self.schema, &key, &value)?;
        for (def, editor) in &mut self.index_edits {
            let (ikey, _) = index_entry(&self.schema, def, &full, &key)?;
            if def.unique {
                self.unique_overlay.insert((def.name.clone(), ikey.clone()), None);
            }
            editor.delete(ikey);
        }
        self.primary.delete(key.clone());
        self.overlay.insert(key, None);
        Ok(true)
    }

    /// Delete one instance of a full row from a keyless table
    pub fn delete_keyless_row(&mut self, values: &[Value]) -> Result<bool> {
        let value_tuple = row::encode_value(&self.schema, values)?;
        let key = row::keyless_key(&value_tuple)?;
        let Some(existing) = self.lookup_primary(&key)? else {
            return Ok(false);
        };
        let count = keyless_count(&existing)?;
        if count > 1 {
            let stored = encode_keyless(count - 1, values)?;
            self.primary.put(key.clone(), stored.clone());
            self.overlay.insert(key, Some(stored));
        } else {
            for (def, editor) in &mut self.index_edits {
                let (ikey, _) = index_entry(&self.schema, def, values, &key)?;
                editor.delete(ikey);
            }
            self.primary.delete(key.clone());
            self.overlay.insert(key, None);
        }
        Ok(true)
    }

    /// Replace the row at `old_key_values` with `new_values`
    pub fn update_row(&mut self, old_key_values: &[Value], new_values: Vec<Value>) -> Result<()> {
        if !self.delete_row(old_key_values)? {
            return Err(Error::Argument(format!(
                "no row with key {}",
                row::render_key(&Value::Tuple(old_key_values.to_vec()).to_bytes()?)
            )));
        }
        self.insert_row(new_values)
    }

    fn advance_auto_increment(&mut self, values: &[Value]) {
        let Some(col) = self.schema.auto_increment_column() else {
            return;
        };
        let Some(pos) = self.schema.column_position(col.tag) else {
            return;
        };
        let observed = match values[pos] {
            Value::Int(v) if v > 0 => v as u64,
            Value::Uint(v) => v,
            _ => return,
        };
        if observed >= self.auto_increment {
            self.auto_increment = observed + 1;
        }
    }

    /// Apply the batch, producing the successor table
    pub fn flush(self) -> Result<Table> {
        let primary = self.primary.flush()?;
        let mut indexes = BTreeMap::new();
        for (def, editor) in self.index_edits {
            indexes.insert(def.name, editor.flush()?);
        }
        Ok(Table {
            schema: self.schema,
            primary,
            indexes,
            auto_increment: self.auto_increment,
            conflicts: self.conflicts,
            violations: self.violations,
        })
    }
}

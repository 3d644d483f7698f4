// src/schema/mod.rs

//! Table schemas
//!
//! A schema is an ordered list of columns plus primary-key order,
//! check constraints, and secondary index definitions. Schemas are
//! immutable; every ALTER produces a new schema value. The table name
//! is *not* part of the schema — it only feeds tag derivation at the
//! moment a column is created, which is what lets a table rename keep
//! every tag and every row byte identical.

mod column;
mod constraint;

pub use column::{derive_tag, Column, SqlType, TypeKind};
pub use constraint::{referenced_tags, CheckConstraint, ForeignKey, IndexDef};

use crate::codec::{Collation, Reader, Writer};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    columns: Vec<Column>,
    /// Primary-key column tags in key order; empty for keyless tables
    pk_tags: Vec<u16>,
    checks: Vec<CheckConstraint>,
    indexes: Vec<IndexDef>,
}

impl Schema {
    pub fn builder(table_name: &str) -> SchemaBuilder {
        SchemaBuilder {
            table_name: table_name.to_string(),
            columns: Vec::new(),
            pk_names: Vec::new(),
            checks: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn pk_tags(&self) -> &[u16] {
        &self.pk_tags
    }

    pub fn checks(&self) -> &[CheckConstraint] {
        &self.checks
    }

    pub fn indexes(&self) -> &[IndexDef] {
        &self.indexes
    }

    /// Keyless tables store rows under a synthetic key
    pub fn is_keyless(&self) -> bool {
        self.pk_tags.is_empty()
    }

    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_by_tag(&self, tag: u16) -> Option<&Column> {
        self.columns.iter().find(|c| c.tag == tag)
    }

    pub fn column_position(&self, tag: u16) -> Option<usize> {
        self.columns.iter().position(|c| c.tag == tag)
    }

    pub fn is_pk_tag(&self, tag: u16) -> bool {
        self.pk_tags.contains(&tag)
    }

    /// Non-pk column tags in schema order; the value-tuple layout
    pub fn value_tags(&self) -> Vec<u16> {
        self.columns
            .iter()
            .filter(|c| !self.is_pk_tag(c.tag))
            .map(|c| c.tag)
            .collect()
    }

    /// Collations of the pk columns in key order
    pub fn pk_collations(&self) -> Vec<Collation> {
        self.pk_tags
            .iter()
            .filter_map(|tag| self.column_by_tag(*tag))
            .map(|c| c.ty.collation())
            .collect()
    }

    pub fn auto_increment_column(&self) -> Option<&Column> {
        self.columns.iter().find(|c| c.auto_increment)
    }

    pub fn index_by_name(&self, name: &str) -> Option<&IndexDef> {
        self.indexes
            .iter()
            .find(|i| i.name.eq_ignore_ascii_case(name))
    }

    fn used_tags(&self) -> Vec<u16> {
        let mut tags: Vec<u16> = self.columns.iter().map(|c| c.tag).collect();
        for col in &self.columns {
            tags.extend(col.prior_tags.iter().map(|(_, t)| *t));
        }
        tags
    }

    /// Rename a column, keeping its tag
    pub fn rename_column(&self, old: &str, new: &str) -> Result<Schema> {
        if self.column_by_name(new).is_some() {
            return Err(Error::Schema(format!("column '{}' already exists", new)));
        }
        let mut schema = self.clone();
        let col = schema
            .columns
            .iter_mut()
            .find(|c| c.name.eq_ignore_ascii_case(old))
            .ok_or_else(|| Error::Schema(format!("column '{}' not found", old)))?;
        col.name = new.to_string();
        Ok(schema)
    }

    /// Change a column's type. A same-kind change keeps the tag; a kind
    /// change assigns the deterministic tag for the new kind, consulting
    /// the column's prior tags so a round trip restores the original.
    pub fn modify_column_type(&self, table: &str, name: &str, new_ty: SqlType) -> Result<Schema> {
        let mut schema = self.clone();
        let used = schema.used_tags();
        let col = schema
            .columns
            .iter_mut()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::Schema(format!("column '{}' not found", name)))?;

        let old_kind = col.ty.kind();
        let new_kind = new_ty.kind();
        if old_kind != new_kind {
            let new_kind_name = new_kind.name().to_string();
            if let Some(pos) = col.prior_tags.iter().position(|(k, _)| *k == new_kind_name) {
                // Reverting to a kind this column held before: restore
                // its tag and drop the excursion so the schema bytes
                // round-trip too.
                let (_, restored) = col.prior_tags.remove(pos);
                col.tag = restored;
            } else {
                col.prior_tags.push((old_kind.name().to_string(), col.tag));
                col.tag = derive_tag(table, &col.name, new_kind, &used);
            }
        }
        col.auto_increment = col.auto_increment && new_ty.is_numeric_integer();
        col.ty = new_ty;
        Ok(schema)
    }

    pub fn add_column(
        &self,
        table: &str,
        name: &str,
        ty: SqlType,
        nullable: bool,
        default: Option<String>,
    ) -> Result<Schema> {
        if self.column_by_name(name).is_some() {
            return Err(Error::Schema(format!("column '{}' already exists", name)));
        }
        let mut schema = self.clone();
        let tag = derive_tag(table, name, ty.kind(), &schema.used_tags());
        schema.columns.push(Column {
            tag,
            name: name.to_string(),
            ty,
            nullable,
            default,
            auto_increment: false,
            prior_tags: Vec::new(),
        });
        Ok(schema)
    }

    pub fn drop_column(&self, name: &str) -> Result<Schema> {
        let col = self
            .column_by_name(name)
            .ok_or_else(|| Error::Schema(format!("column '{}' not found", name)))?;
        let tag = col.tag;
        if self.is_pk_tag(tag) {
            return Err(Error::Schema(format!(
                "cannot drop column '{}': part of the primary key",
                name
            )));
        }
        if let Some(index) = self.indexes.iter().find(|i| i.tags.contains(&tag)) {
            return Err(Error::Schema(format!(
                "cannot drop column '{}': used by index '{}'",
                name, index.name
            )));
        }
        let mut schema = self.clone();
        schema.columns.retain(|c| c.tag != tag);
        schema
            .checks
            .retain(|check| !check.referenced_tags.contains(&tag));
        Ok(schema)
    }

    /// Drop the primary key. Former key columns stay NOT NULL; the
    /// table layer rewrites rows under synthetic keys.
    pub fn drop_primary_key(&self) -> Result<Schema> {
        if self.is_keyless() {
            return Err(Error::Schema("table has no primary key".to_string()));
        }
        let mut schema = self.clone();
        schema.pk_tags.clear();
        Ok(schema)
    }

    /// Add a primary key to a keyless schema. Data preconditions
    /// (uniqueness, non-null) are checked by the table layer.
    pub fn add_primary_key(&self, names: &[&str]) -> Result<Schema> {
        if !self.is_keyless() {
            return Err(Error::Schema("table already has a primary key".to_string()));
        }
        let mut schema = self.clone();
        let mut pk_tags = Vec::with_capacity(names.len());
        for name in names {
            let col = schema
                .column_by_name(name)
                .ok_or_else(|| Error::Schema(format!("column '{}' not found", name)))?;
            pk_tags.push(col.tag);
        }
        for tag in &pk_tags {
            if let Some(col) = schema.columns.iter_mut().find(|c| c.tag == *tag) {
                col.nullable = false;
            }
        }
        schema.pk_tags = pk_tags;
        Ok(schema)
    }

    pub fn add_index(&self, name: &str, column_names: &[&str], unique: bool) -> Result<Schema> {
        if self.index_by_name(name).is_some() {
            return Err(Error::Schema(format!("index '{}' already exists", name)));
        }
        let mut tags = Vec::with_capacity(column_names.len());
        for col_name in column_names {
            let col = self
                .column_by_name(col_name)
                .ok_or_else(|| Error::Schema(format!("column '{}' not found", col_name)))?;
            tags.push(col.tag);
        }
        let mut schema = self.clone();
        schema.indexes.push(IndexDef {
            name: name.to_string(),
            tags,
            unique,
        });
        Ok(schema)
    }

    pub fn drop_index(&self, name: &str) -> Result<Schema> {
        if self.index_by_name(name).is_none() {
            return Err(Error::Schema(format!("index '{}' not found", name)));
        }
        let mut schema = self.clone();
        schema.indexes.retain(|i| !i.name.eq_ignore_ascii_case(name));
        Ok(schema)
    }

    pub fn add_check(&self, name: &str, expression: &str) -> Result<Schema> {
        if self.checks.iter().any(|c| c.name.eq_ignore_ascii_case(name)) {
            return Err(Error::Schema(format!("check '{}' already exists", name)));
        }
        let mut schema = self.clone();
        schema.checks.push(CheckConstraint {
            name: name.to_string(),
            expression: expression.to_string(),
            referenced_tags: referenced_tags(expression, &schema.columns),
        });
        Ok(schema)
    }

    pub fn drop_check(&self, name: &str) -> Result<Schema> {
        let mut schema = self.clone();
        let before = schema.checks.len();
        schema.checks.retain(|c| !c.name.eq_ignore_ascii_case(name));
        if schema.checks.len() == before {
            return Err(Error::Schema(format!("check '{}' not found", name)));
        }
        Ok(schema)
    }

    pub fn encode(&self, w: &mut Writer) {
        w.put_u16(self.columns.len() as u16);
        for col in &self.columns {
            col.encode(w);
        }
        w.put_u16(self.pk_tags.len() as u16);
        for tag in &self.pk_tags {
            w.put_u16(*tag);
        }
        w.put_u16(self.checks.len() as u16);
        for check in &self.checks {
            check.encode(w);
        }
        w.put_u16(self.indexes.len() as u16);
        for index in &self.indexes {
            index.encode(w);
        }
    }

    pub fn decode(r: &mut Reader) -> Result<Schema> {
        let col_count = r.get_u16()? as usize;
        let mut columns = Vec::with_capacity(col_count);
        for _ in 0..col_count {
            columns.push(Column::decode(r)?);
        }
        let pk_count = r.get_u16()? as usize;
        let mut pk_tags = Vec::with_capacity(pk_count);
        for _ in 0..pk_count {
            pk_tags.push(r.get_u16()?);
        }
        let check_count = r.get_u16()? as usize;
        let mut checks = Vec::with_capacity(check_count);
        for _ in 0..check_count {
            checks.push(CheckConstraint::decode(r)?);
        }
        let index_count = r.get_u16()? as usize;
        let mut indexes = Vec::with_capacity(index_count);
        for _ in 0..index_count {
            indexes.push(IndexDef::decode(r)?);
        }
        Ok(Schema {
            columns,
            pk_tags,
            checks,
            indexes,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        self.encode(&mut w);
        w.into_bytes()
    }
}

/// Builds a schema, assigning deterministic tags at `build`
pub struct SchemaBuilder {
    table_name: String,
    columns: Vec<(String, SqlType, bool, Option<String>, bool)>,
    pk_names: Vec<String>,
    checks: Vec<(String, String)>,
    indexes: Vec<(String, Vec<String>, bool)>,
}

impl SchemaBuilder {
    pub fn column(mut self, name: &str, ty: SqlType, nullable: bool) -> Self {
        self.columns
            .push((name.to_string(), ty, nullable, None, false));
        self
    }

    pub fn column_with_default(
        mut self,
        name: &str,
        ty: SqlType,
        nullable: bool,
        default: &str,
    ) -> Self {
        self.columns
            .push((name.to_string(), ty, nullable, Some(default.to_string()), false));
        self
    }

    pub fn auto_increment_column(mut self, name: &str, ty: SqlType) -> Self {
        self.columns.push((name.to_string(), ty, false, None, true));
        self
    }

    pub fn primary_key(mut self, names: &[&str]) -> Self {
        self.pk_names = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn check(mut self, name: &str, expression: &str) -> Self {
        self.checks.push((name.to_string(), expression.to_string()));
        self
    }

    pub fn index(mut self, name: &str, columns: &[&str], unique: bool) -> Self {
        self.indexes.push((
            name.to_string(),
            columns.iter().map(|s| s.to_string()).collect(),
            unique,
        ));
        self
    }

    pub fn build(self) -> Result<Schema> {
        // Reject duplicate names up front
        for (i, (name, ..)) in self.columns.iter().enumerate() {
            if self.columns[..i]
                .iter()
                .any(|(other, ..)| other.eq_ignore_ascii_case(name))
            {
                return Err(Error::Schema(format!("duplicate column name '{}'", name)));
            }
        }

        let mut columns: Vec<Column> = Vec::with_capacity(self.columns.len());
        let mut used: Vec<u16> = Vec::with_capacity(self.columns.len());
        for (name, ty, nullable, default, auto_increment) in self.columns {
            let tag = derive_tag(&self.table_name, &name, ty.kind(), &used);
            used.push(tag);
            columns.push(Column {
                tag,
                name,
                ty,
                nullable,
                default,
                auto_increment,
                prior_tags: Vec::new(),
            });
        }

        let mut pk_tags = Vec::with_capacity(self.pk_names.len());
        for pk_name in &self.pk_names {
            let col = columns
                .iter_mut()
                .find(|c| c.name.eq_ignore_ascii_case(pk_name))
                .ok_or_else(|| Error::Schema(format!("pk column '{}' not found", pk_name)))?;
            // pk columns are implicitly NOT NULL
            col.nullable = false;
            pk_tags.push(col.tag);
        }

        let auto_inc: Vec<&Column> = columns.iter().filter(|c| c.auto_increment).collect();
        if auto_inc.len() > 1 {
            return Err(Error::Schema(
                "at most one AUTO_INCREMENT column per table".to_string(),
            ));
        }
        if let Some(col) = auto_inc.first() {
            if !pk_tags.contains(&col.tag) {
                return Err(Error::Schema(
                    "AUTO_INCREMENT column must be part of the primary key".to_string(),
                ));
            }
            if !col.ty.is_numeric_integer() {
                return Err(Error::Schema(
                    "AUTO_INCREMENT requires an integer column".to_string(),
                ));
            }
        }

        let mut schema = Schema {
            columns,
            pk_tags,
            checks: Vec::new(),
            indexes: Vec::new(),
        };
        for (name, expression) in self.checks {
            schema = schema.add_check(&name, &expression)?;
        }
        for (name, cols, unique) in self.indexes {
            let refs: Vec<&str> = cols.iter().map(String::as_str).collect();
            schema = schema.add_index(&name, &refs, unique)?;
        }
        Ok(schema)
    }
}

//! Prompt renderings of [`DatabaseMetadata`].
//!
//! Both formats skip disabled tables and columns, and only list foreign keys
//! whose target lives in the same schema as the referencing table.

use std::fmt::Write;

use super::metadata::{DBTable, DatabaseMetadata, TableColumn, TableForeignKey};

impl DatabaseMetadata {
    /// Markdown rendering: a header and a column table per table, then the
    /// primary-key tuple and foreign keys.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Database: {}", self.name);
        if !self.comment.is_empty() {
            let _ = writeln!(out, "{}", self.comment);
        }

        for table in self.tables.iter().filter(|t| t.enabled) {
            let _ = writeln!(out);
            let _ = writeln!(out, "## Table: {}", table.qualified_name());
            if !table.comment.is_empty() {
                let _ = writeln!(out, "Comment: {}", table.comment);
            }
            let _ = writeln!(out, "| name | description | type | examples |");
            let _ = writeln!(out, "| --- | --- | --- | --- |");
            for column in enabled_columns(table) {
                let _ = writeln!(
                    out,
                    "| {} | {} | {} | {} |",
                    markdown_cell(&column.name),
                    markdown_cell(&column.comment),
                    markdown_cell(&column.data_type.to_uppercase()),
                    markdown_cell(&column.examples.join(", ")),
                );
            }
            if !table.primary_keys.is_empty() {
                let _ = writeln!(out, "Primary key: ({})", table.primary_keys.join(", "));
            }

            let fks: Vec<_> = local_foreign_keys(table).collect();
            if !fks.is_empty() {
                let _ = writeln!(out, "Foreign keys:");
                for fk in fks {
                    let _ = writeln!(
                        out,
                        "- {}.{} -> {}.{}",
                        table.name, fk.column, fk.referenced_table, fk.referenced_column
                    );
                }
            }
        }
        out
    }

    /// M-Schema rendering.
    ///
    /// ```text
    /// 【DB_ID】 shop
    /// 【Schema】
    /// # Table: shop.orders, Customer orders
    /// [
    /// (id: INT, Primary Key, Order id, Examples: [1, 2]),
    /// (user_id: INT)
    /// ]
    /// 【Foreign keys】
    /// orders.user_id=users.id
    /// ```
    pub fn to_m_schema(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "【DB_ID】 {}", self.name);
        let _ = writeln!(out, "【Schema】");

        let mut foreign_keys = Vec::new();
        for table in self.tables.iter().filter(|t| t.enabled) {
            let prefix = table.schema.as_deref().unwrap_or(&self.name);
            let _ = write!(out, "# Table: {}.{}", prefix, table.name);
            if !table.comment.is_empty() {
                let _ = write!(out, ", {}", table.comment);
            }
            let _ = writeln!(out);

            let fields: Vec<String> = enabled_columns(table)
                .map(|column| m_schema_field(table, column))
                .collect();
            let _ = writeln!(out, "[");
            let _ = writeln!(out, "{}", fields.join(",\n"));
            let _ = writeln!(out, "]");

            foreign_keys.extend(local_foreign_keys(table).map(|fk| {
                format!(
                    "{}.{}={}.{}",
                    table.name, fk.column, fk.referenced_table, fk.referenced_column
                )
            }));
        }

        if !foreign_keys.is_empty() {
            let _ = writeln!(out, "【Foreign keys】");
            for fk in foreign_keys {
                let _ = writeln!(out, "{fk}");
            }
        }
        out
    }
}

/// Keeps a value inside one Markdown table cell.
fn markdown_cell(value: &str) -> String {
    value.replace('|', "\\|").replace(['\r', '\n'], " ")
}

fn m_schema_field(table: &DBTable, column: &TableColumn) -> String {
    let mut parts = vec![format!("{}: {}", column.name, column.data_type.to_uppercase())];
    if table.is_primary_key(&column.name) {
        parts.push("Primary Key".to_string());
    }
    if !column.comment.is_empty() {
        parts.push(column.comment.clone());
    }
    if !column.examples.is_empty() {
        parts.push(format!("Examples: [{}]", column.examples.join(", ")));
    }
    format!("({})", parts.join(", "))
}

fn enabled_columns(table: &DBTable) -> impl Iterator<Item = &TableColumn> {
    table.columns.values().filter(|c| c.enabled)
}

fn local_foreign_keys(table: &DBTable) -> impl Iterator<Item = &TableForeignKey> {
    table
        .foreign_keys
        .iter()
        .filter(move |fk| match (&fk.referenced_schema, &table.schema) {
            (Some(target), Some(own)) => target == own,
            _ => true,
        })
}

//! Product catalog database operations.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DbError, DbResult};
use crate::models::Product;

const PRODUCT_COLUMNS: &str = "p.id, p.name, p.strength, p.manufacturer, p.price, p.aliases, p.active";

impl Database {
    /// Insert or update a product.
    pub fn upsert_product(&self, product: &Product) -> DbResult<()> {
        let aliases_json = serde_json::to_string(&product.aliases)?;

        self.conn.execute(
            r#"
            INSERT INTO products (
                id, name, strength, manufacturer, price, aliases, active, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, datetime('now'))
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                strength = excluded.strength,
                manufacturer = excluded.manufacturer,
                price = excluded.price,
                aliases = excluded.aliases,
                active = excluded.active,
                updated_at = datetime('now')
            "#,
            params![
                product.id,
                product.name,
                product.strength,
                product.manufacturer,
                product.price,
                aliases_json,
                product.active,
            ],
        )?;
        Ok(())
    }

    /// Get a product by ID.
    pub fn get_product(&self, id: &str) -> DbResult<Option<Product>> {
        let sql = format!("SELECT {} FROM products p WHERE p.id = ?", PRODUCT_COLUMNS);
        self.conn
            .query_row(&sql, [id], product_row)
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// Search active products using FTS5 (BM25 ranking).
    pub fn search_products(&self, query: &str, limit: usize) -> DbResult<Vec<Product>> {
        let escaped_query = escape_fts_query(query);
        if escaped_query.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            r#"
            SELECT {}, bm25(products_fts) as rank
            FROM products p
            JOIN products_fts fts ON p.rowid = fts.rowid
            WHERE products_fts MATCH ?
            AND p.active = 1
            ORDER BY rank
            LIMIT ?
            "#,
            PRODUCT_COLUMNS
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![escaped_query, limit as i64], product_row)?;

        let mut products = Vec::new();
        for row in rows {
            products.push(row?.try_into()?);
        }
        Ok(products)
    }

    /// Mark product as inactive (soft delete).
    pub fn deactivate_product(&self, id: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE products SET active = 0, updated_at = datetime('now') WHERE id = ?",
            [id],
        )?;
        Ok(rows_affected > 0)
    }
}

/// Intermediate row struct for database mapping.
struct ProductRow {
    id: String,
    name: String,
    strength: Option<String>,
    manufacturer: Option<String>,
    price: f64,
    aliases: String,
    active: bool,
}

fn product_row(row: &Row<'_>) -> rusqlite::Result<ProductRow> {
    Ok(ProductRow {
        id: row.get(0)?,
        name: row.get(1)?,
        strength: row.get(2)?,
        manufacturer: row.get(3)?,
        price: row.get(4)?,
        aliases: row.get(5)?,
        active: row.get(6)?,
    })
}

impl TryFrom<ProductRow> for Product {
    type Error = DbError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        Ok(Product {
            id: row.id,
            name: row.name,
            strength: row.strength,
            manufacturer: row.manufacturer,
            price: row.price,
            aliases: serde_json::from_str(&row.aliases)?,
            active: row.active,
        })
    }
}

/// Escape special FTS5 characters and prepare query for prefix matching.
fn escape_fts_query(query: &str) -> String {
    let cleaned: String = query
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    cleaned
        .split_whitespace()
        // lowercase so AND/OR/NOT are never read as operators
        .map(|word| format!("{}*", word.to_lowercase()))
        .collect::<Vec<_>>()
        .join(" ")
}

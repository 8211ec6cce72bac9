//! Minimal schema bootstrap
//!
//! The business tables are owned by the invoice application; this module
//! only creates them when absent so a fresh data root is usable and the
//! reset path has something to clear.

use rusqlite::{params, Connection};

pub const SCHEMA_VERSION: &str = "1.1.0";

/// Business tables cleared by a reset, child before parent.
pub const RESET_TABLES: [&str; 5] = [
    "invoice_item_details",
    "invoice_items",
    "invoices",
    "clients",
    "companies",
];

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    version TEXT NOT NULL,
    applied_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    description TEXT
);

CREATE TABLE IF NOT EXISTS companies (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    name_en TEXT,
    business_number TEXT,
    representative TEXT,
    representative_en TEXT,
    address TEXT,
    address_en TEXT,
    phone TEXT,
    phone_en TEXT,
    email TEXT,
    email_en TEXT,
    bank_info TEXT,
    bank_info_en TEXT,
    logo_path TEXT,
    stamp_path TEXT,
    invoice_prefix TEXT DEFAULT 'INV',
    is_default INTEGER DEFAULT 0,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS clients (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    business_number TEXT,
    contact_person TEXT,
    phone TEXT,
    email TEXT,
    address TEXT,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS invoices (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    invoice_number TEXT UNIQUE NOT NULL,
    company_id INTEGER,
    client_id INTEGER,
    project_name TEXT,
    issue_date DATE,
    validity_period TEXT,
    subtotal REAL DEFAULT 0,
    tax_rate REAL DEFAULT 10,
    tax_amount REAL DEFAULT 0,
    total_amount REAL DEFAULT 0,
    currency TEXT DEFAULT 'KRW',
    notes TEXT,
    status TEXT DEFAULT 'draft',
    pdf_path TEXT,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (company_id) REFERENCES companies(id),
    FOREIGN KEY (client_id) REFERENCES clients(id)
);

CREATE TABLE IF NOT EXISTS invoice_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    invoice_id INTEGER NOT NULL,
    title TEXT NOT NULL,
    details TEXT,
    detail_mode TEXT DEFAULT 'text',
    quantity REAL DEFAULT 1,
    unit_price REAL DEFAULT 0,
    amount REAL DEFAULT 0,
    sort_order INTEGER DEFAULT 0,
    FOREIGN KEY (invoice_id) REFERENCES invoices(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS invoice_item_details (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    item_id INTEGER NOT NULL,
    title TEXT,
    description TEXT NOT NULL,
    quantity REAL DEFAULT 1,
    unit_price REAL DEFAULT 0,
    amount REAL DEFAULT 0,
    sort_order INTEGER DEFAULT 0,
    FOREIGN KEY (item_id) REFERENCES invoice_items(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS note_templates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    is_default INTEGER DEFAULT 0,
    sort_order INTEGER DEFAULT 0,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);
"#;

const DEFAULT_TEMPLATES: [(&str, &str, bool); 3] = [
    (
        "General taxable business",
        "This business is a general taxable business; quoted amounts include tax.",
        true,
    ),
    (
        "Maintenance",
        "Maintenance and periodic inspection contracts can be arranged later if needed.",
        false,
    ),
    (
        "Cost adjustment",
        "The final cost may be adjusted to the actual difficulty of the work.",
        false,
    ),
];

/// Create missing tables, seed note templates and record the schema version.
pub fn ensure_schema(conn: &mut Connection) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(SCHEMA_SQL)?;

    let templates: i64 = tx.query_row("SELECT COUNT(*) FROM note_templates", [], |r| r.get(0))?;
    if templates == 0 {
        for (order, (title, content, is_default)) in DEFAULT_TEMPLATES.iter().enumerate() {
            tx.execute(
                "INSERT INTO note_templates (title, content, is_default, sort_order) VALUES (?1, ?2, ?3, ?4)",
                params![title, content, *is_default as i64, order as i64 + 1],
            )?;
        }
    }

    let current: Option<String> = tx
        .query_row(
            "SELECT version FROM schema_version ORDER BY id DESC LIMIT 1",
            [],
            |r| r.get(0),
        )
        .ok();
    if current.as_deref() != Some(SCHEMA_VERSION) {
        let description = match &current {
            Some(prev) => format!("Upgraded from {}", prev),
            None => "Initial schema with itemized invoice details support".to_string(),
        };
        tx.execute(
            "INSERT INTO schema_version (version, description) VALUES (?1, ?2)",
            params![SCHEMA_VERSION, description],
        )?;
    }

    tx.commit()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_schema_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        ensure_schema(&mut conn).unwrap();
        ensure_schema(&mut conn).unwrap();

        let templates: i64 = conn
            .query_row("SELECT COUNT(*) FROM note_templates", [], |r| r.get(0))
            .unwrap();
        assert_eq!(templates, 3);

        let versions: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(versions, 1);
    }

    #[test]
    fn test_reset_tables_exist() {
        let mut conn = Connection::open_in_memory().unwrap();
        ensure_schema(&mut conn).unwrap();
        for table in RESET_TABLES {
            let n: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
                .unwrap();
            assert_eq!(n, 0);
        }
    }
}

//! Apply the sample conference DDL. Statements are idempotent (`IF NOT EXISTS`).

use crate::error::AppError;
use crate::models::SAMPLE_SCHEMA;
use crate::sql::quote_ident;
use sqlx::PgPool;

/// Substitute the schema qualifier into one DDL statement.
pub fn render_ddl(statement: &str, schema: Option<&str>) -> String {
    let prefix = schema.map(|s| format!("{}.", quote_ident(s))).unwrap_or_default();
    statement.replace("{schema}", &prefix)
}

/// Create the schema (when given) and the sample tables in dependency order.
pub async fn apply_sample_schema(pool: &PgPool, schema: Option<&str>) -> Result<(), AppError> {
    if let Some(s) = schema {
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(s)))
            .execute(pool)
            .await?;
    }
    for statement in SAMPLE_SCHEMA {
        let sql = render_ddl(statement, schema);
        tracing::debug!(sql = %sql, "applying ddl");
        sqlx::query(&sql).execute(pool).await?;
    }
    tracing::info!(tables = SAMPLE_SCHEMA.len(), schema = schema.unwrap_or("default"), "sample schema ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_placeholder_is_qualified_or_removed() {
        let ddl = r#"CREATE TABLE IF NOT EXISTS {schema}"levels" ("id" BIGSERIAL PRIMARY KEY)"#;
        assert_eq!(
            render_ddl(ddl, Some("conf")),
            r#"CREATE TABLE IF NOT EXISTS "conf"."levels" ("id" BIGSERIAL PRIMARY KEY)"#
        );
        assert_eq!(
            render_ddl(ddl, None),
            r#"CREATE TABLE IF NOT EXISTS "levels" ("id" BIGSERIAL PRIMARY KEY)"#
        );
    }

    #[test]
    fn every_sample_statement_has_a_placeholder() {
        assert!(SAMPLE_SCHEMA.iter().all(|s| s.contains("{schema}")));
    }
}

use sqlx::PgPool;

#[derive(Clone)]
pub struct AuditRepository {
    conn: PgPool,
}

impl AuditRepository {
    pub fn new(conn: PgPool) -> Self {
        AuditRepository { conn }
    }

    pub async fn insert_entry(
        &self,
        level: &str,
        message: &str,
        user_id: Option<i64>,
        context: Option<&str>,
    ) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (level, message, user_id, context)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(level)
        .bind(message)
        .bind(user_id)
        .bind(context)
        .execute(&self.conn)
        .await?;

        Ok(())
    }
}

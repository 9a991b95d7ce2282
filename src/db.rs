use rocket_db_pools::{Database, sqlx};

#[derive(Database)]
#[database("project_db")]
pub struct ProjectDb(sqlx::PgPool);

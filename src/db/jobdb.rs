use async_trait::async_trait;
use sqlx::Error;
use uuid::Uuid;

use super::db::DBClient;
use crate::models::jobmodel::Job;

#[async_trait]
pub trait JobExt {
    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, Error>;

    /// Store the one-way hash of a freshly issued confirmation code.
    /// Reissuing overwrites the previous hash.
    async fn set_confirmation_code(&self, job_id: Uuid, code_hash: &str) -> Result<Job, Error>;
}

#[async_trait]
impl JobExt for DBClient {
    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, Error> {
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn set_confirmation_code(&self, job_id: Uuid, code_hash: &str) -> Result<Job, Error> {
        sqlx::query_as::<_, Job>(
            "UPDATE jobs SET confirmation_code = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(job_id)
        .bind(code_hash)
        .fetch_one(&self.pool)
        .await
    }
}

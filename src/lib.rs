pub mod config;
pub mod db;
pub mod error;
pub mod excel;
pub mod import;
pub mod models;

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    use sqlx::PgPool;
    use sqlx::postgres::PgPoolOptions;
    use testcontainers::{GenericImage, ImageExt, core::WaitFor};
    use testcontainers_modules::testcontainers::{
        ContainerAsync, core::error::TestcontainersError, runners::AsyncRunner,
    };
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum TestDatabaseError {
        #[error("database error: {0}")]
        Sqlx(#[from] sqlx::Error),
        #[error("container error: {0}")]
        Container(#[from] TestcontainersError),
    }

    /// Ephemeral database factory for integration tests: each instance
    /// launches a disposable Postgres container and connects a small pool.
    pub struct TestDatabase {
        pool: Option<PgPool>,
        container: Option<ContainerAsync<GenericImage>>,
    }

    impl TestDatabase {
        /// Provision a fresh database by launching a disposable Postgres
        /// container. Tests should skip (not fail) when this errors, since
        /// a container runtime may not be available everywhere.
        pub async fn new() -> Result<Self, TestDatabaseError> {
            let image = GenericImage::new("postgres", "16-alpine")
                .with_wait_for(WaitFor::message_on_stdout(
                    "database system is ready to accept connections",
                ))
                .with_wait_for(WaitFor::message_on_stderr(
                    "database system is ready to accept connections",
                ));

            let request = image
                .with_env_var("POSTGRES_DB", "postgres")
                .with_env_var("POSTGRES_USER", "postgres")
                .with_env_var("POSTGRES_PASSWORD", "postgres");

            let container = request.start().await?;

            let host = container.get_host().await?.to_string();
            let port = container.get_host_port_ipv4(5432).await?;
            let url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(&url)
                .await?;

            Ok(Self {
                pool: Some(pool),
                container: Some(container),
            })
        }

        pub fn pool(&self) -> &PgPool {
            self.pool.as_ref().expect("test database pool is available")
        }

        /// Convenience method returning a clone of the pooled connection
        /// handle.
        pub fn pool_clone(&self) -> PgPool {
            self.pool().clone()
        }

        /// Close pool connections and stop the container.
        pub async fn close(mut self) -> Result<(), TestDatabaseError> {
            if let Some(pool) = self.pool.take() {
                pool.close().await;
            }
            if let Some(container) = self.container.take() {
                drop(container);
            }
            Ok(())
        }
    }
}

use std::sync::Arc;

use anyhow::Context;
use sqlx::PgPool;

use keel_auth::{GroupDirectory, Hs256JwtValidator, JwtValidator, NoGroupDirectory, PrincipalResolver};
use keel_infra::directory::HttpGroupDirectory;
use keel_infra::{AppConfig, SharedProjectAccessService, ensure_schema};

/// Everything a request handler needs.
pub struct AppServices {
    pub resolver: Arc<PrincipalResolver<Arc<dyn GroupDirectory>>>,
    pub access: SharedProjectAccessService,
}

impl AppServices {
    pub fn new(
        jwt_secret: &str,
        directory: Arc<dyn GroupDirectory>,
        trust_proxy_headers: bool,
        access: SharedProjectAccessService,
    ) -> Self {
        let jwt: Arc<dyn JwtValidator> = Arc::new(Hs256JwtValidator::new(jwt_secret.as_bytes()));
        let resolver = PrincipalResolver::new(jwt, directory).trusting_headers(trust_proxy_headers);

        Self {
            resolver: Arc::new(resolver),
            access,
        }
    }

    /// In-memory stores, no directory.
    pub fn in_memory(jwt_secret: &str) -> Self {
        Self::new(
            jwt_secret,
            Arc::new(NoGroupDirectory),
            false,
            SharedProjectAccessService::in_memory(),
        )
    }
}

pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let directory: Arc<dyn GroupDirectory> = match &config.group_directory_url {
        Some(url) => {
            tracing::info!(url = %url, "using HTTP group directory");
            Arc::new(
                HttpGroupDirectory::new(url, config.group_directory_timeout)
                    .context("invalid GROUP_DIRECTORY_URL")?,
            )
        }
        None => {
            tracing::info!("no group directory configured; tokens must embed groups");
            Arc::new(NoGroupDirectory)
        }
    };

    let access = match &config.database_url {
        Some(url) => {
            let pool = PgPool::connect(url)
                .await
                .context("failed to connect to Postgres")?;
            ensure_schema(&pool).await.context("failed to ensure schema")?;
            tracing::info!("using Postgres stores");
            SharedProjectAccessService::postgres(pool)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory stores");
            SharedProjectAccessService::in_memory()
        }
    };

    Ok(AppServices::new(
        &config.jwt_secret,
        directory,
        config.trust_proxy_headers,
        access,
    ))
}

use std::net::SocketAddr;
use std::sync::Arc;

use miette::IntoDiagnostic;
use sea_orm::DatabaseConnection;

use crate::acl::{self, AclState, Engine};
use crate::errors::AppError;
use crate::settings::Settings;

pub async fn serve(settings: Settings, db: DatabaseConnection, engine: Engine) -> miette::Result<()> {
    let state = Arc::new(AclState { db, engine });
    let router = acl::web::router(state);

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .into_diagnostic()?;

    tracing::info!(%addr, "ACL API listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(AppError::from)?;
    axum::serve(listener, router).await.map_err(AppError::from)?;
    Ok(())
}

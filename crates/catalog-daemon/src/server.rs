use std::{env, net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use catalog_core::{
    open_store,
    store::S3Config,
    AssetStore, CardResource, CoreError, ItemResource, RawFields, Resource, ResourceManager,
    StoreConfig, Upload, ValidationErrors,
};
use catalog_db::{CardTable, Database, ItemTable};
use serde_json::json;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{error, info};

use crate::responses::ApiRecord;

/// Uploads beyond this are refused outright.
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

pub async fn run() -> Result<()> {
    let config = AppConfig::from_env()?;

    let db = Database::connect(&config.db_url)
        .await
        .context("failed to open database")?;

    let static_root = match &config.store {
        StoreConfig::Local { root } => Some(root.clone()),
        StoreConfig::S3(_) => None,
    };
    let store = open_store(config.store.clone()).context("initializing asset store")?;
    info!(backend = store.kind(), "asset store ready");

    let app = build_router(db, store, static_root);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listen socket")?;

    info!(addr = %config.listen_addr, "catalog-daemon listening");
    axum::serve(listener, app)
        .await
        .context("HTTP server exited")?;
    Ok(())
}

/// Assembles the full route table. The four resource groups share one
/// generic handler set; only the manager wired into each sub-router differs.
pub fn build_router(
    db: Database,
    store: Arc<dyn AssetStore>,
    static_root: Option<PathBuf>,
) -> Router {
    let mut router = Router::new()
        .route("/healthz", get(healthz))
        .nest(
            "/v1/cards",
            resource_router(ResourceManager::new(
                db.clone(),
                store.clone(),
                CardResource::new(CardTable::Cards),
            )),
        )
        .nest(
            "/v1/spanish_cards",
            resource_router(ResourceManager::new(
                db.clone(),
                store.clone(),
                CardResource::new(CardTable::SpanishCards),
            )),
        )
        .nest(
            "/v1/items",
            resource_router(ResourceManager::new(
                db.clone(),
                store.clone(),
                ItemResource::new(ItemTable::Items),
            )),
        )
        .nest(
            "/v1/spanish_items",
            resource_router(ResourceManager::new(
                db,
                store,
                ItemResource::new(ItemTable::SpanishItems),
            )),
        );

    // Locally stored assets are retrieved straight from disk, bypassing the
    // manager; the S3 backend resolves to object URLs instead.
    if let Some(root) = static_root {
        router = router.nest_service("/storage", ServeDir::new(root));
    }

    router
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
}

fn resource_router<R>(manager: ResourceManager<R>) -> Router
where
    R: Resource,
    R::Record: ApiRecord,
{
    let manager = Arc::new(manager);
    Router::new()
        .route("/", get(list_records::<R>).post(create_record::<R>))
        .route(
            "/:id",
            get(show_record::<R>)
                .put(update_record::<R>)
                .patch(update_record::<R>)
                .delete(delete_record::<R>),
        )
        .with_state(manager)
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub db_url: String,
    pub store: StoreConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let listen_addr = env::var("CATALOG_API_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .context("invalid CATALOG_API_ADDR")?;

        let db_url = env::var("CATALOG_DB_DSN")
            .or_else(|_| env::var("DATABASE_URL"))
            .context("CATALOG_DB_DSN or DATABASE_URL must be configured")?;

        let backend = env::var("CATALOG_STORAGE_BACKEND").unwrap_or_else(|_| "local".to_string());
        let store = match backend.as_str() {
            "local" => StoreConfig::Local {
                root: env::var("CATALOG_STORAGE_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("./storage")),
            },
            "s3" => StoreConfig::S3(S3Config {
                bucket: env::var("CATALOG_S3_BUCKET")
                    .context("CATALOG_S3_BUCKET must be configured for the s3 backend")?,
                region: env::var("CATALOG_S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
                endpoint: env::var("CATALOG_S3_ENDPOINT").ok().filter(|v| !v.is_empty()),
                access_key_id: env::var("AWS_ACCESS_KEY_ID")
                    .context("AWS_ACCESS_KEY_ID must be configured for the s3 backend")?,
                secret_access_key: env::var("AWS_SECRET_ACCESS_KEY")
                    .context("AWS_SECRET_ACCESS_KEY must be configured for the s3 backend")?,
                public_base: env::var("CATALOG_S3_PUBLIC_BASE").ok().filter(|v| !v.is_empty()),
            }),
            other => anyhow::bail!("unknown CATALOG_STORAGE_BACKEND: {other}"),
        };

        Ok(Self {
            listen_addr,
            db_url,
            store,
        })
    }
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn list_records<R>(
    State(manager): State<Arc<ResourceManager<R>>>,
) -> Result<Json<Vec<<R::Record as ApiRecord>::Response>>, ApiError>
where
    R: Resource,
    R::Record: ApiRecord,
{
    let records = manager.list().await?;
    let store = manager.store();
    Ok(Json(
        records
            .into_iter()
            .map(|record| record.into_api(store.as_ref()))
            .collect(),
    ))
}

async fn create_record<R>(
    State(manager): State<Arc<ResourceManager<R>>>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<<R::Record as ApiRecord>::Response>), ApiError>
where
    R: Resource,
    R::Record: ApiRecord,
{
    let (fields, upload) = read_form(multipart).await?;
    let record = manager.create(&fields, upload).await?;
    Ok((
        StatusCode::CREATED,
        Json(record.into_api(manager.store().as_ref())),
    ))
}

async fn show_record<R>(
    State(manager): State<Arc<ResourceManager<R>>>,
    Path(id): Path<i64>,
) -> Result<Json<<R::Record as ApiRecord>::Response>, ApiError>
where
    R: Resource,
    R::Record: ApiRecord,
{
    let record = manager.retrieve(id).await?;
    Ok(Json(record.into_api(manager.store().as_ref())))
}

async fn update_record<R>(
    State(manager): State<Arc<ResourceManager<R>>>,
    Path(id): Path<i64>,
    multipart: Multipart,
) -> Result<Json<<R::Record as ApiRecord>::Response>, ApiError>
where
    R: Resource,
    R::Record: ApiRecord,
{
    let (fields, upload) = read_form(multipart).await?;
    let record = manager.update(id, &fields, upload).await?;
    Ok(Json(record.into_api(manager.store().as_ref())))
}

async fn delete_record<R>(
    State(manager): State<Arc<ResourceManager<R>>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError>
where
    R: Resource,
    R::Record: ApiRecord,
{
    manager.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Splits a multipart request into text fields and the optional `img` file.
async fn read_form(mut multipart: Multipart) -> Result<(RawFields, Option<Upload>), ApiError> {
    let mut fields = RawFields::new();
    let mut upload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::bad_request(format!("malformed multipart body: {err}")))?
    {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };

        if name == "img" {
            let filename = field.file_name().unwrap_or("upload").to_owned();
            let bytes = field
                .bytes()
                .await
                .map_err(|err| ApiError::bad_request(format!("failed to read upload: {err}")))?;
            upload = Some(Upload {
                filename,
                bytes: bytes.to_vec(),
            });
        } else {
            let value = field
                .text()
                .await
                .map_err(|err| ApiError::bad_request(format!("failed to read field: {err}")))?;
            fields.insert(name, value);
        }
    }

    Ok((fields, upload))
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    errors: Option<ValidationErrors>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            errors: None,
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(errors) => Self {
                status: StatusCode::UNPROCESSABLE_ENTITY,
                message: "Validation errors".to_string(),
                errors: Some(errors),
            },
            CoreError::NotFound(noun, id) => {
                Self::new(StatusCode::NOT_FOUND, format!("{noun} {id} not found"))
            }
            CoreError::Storage(inner) => {
                error!(%inner, "asset storage failure");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, inner.to_string())
            }
            CoreError::Database(inner) => {
                error!(%inner, "database failure");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, inner.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({ "message": self.message });
        if let Some(errors) = self.errors {
            body["errors"] = json!(errors);
        }
        (self.status, Json(body)).into_response()
    }
}

use structopt::StructOpt;

pub mod db;
pub mod models;
pub mod storage;
pub mod telemetry;
pub mod thumbnails;

/// Handles to everything an item needs at runtime.
#[derive(Clone, Debug)]
pub struct Context {
    pub db: sqlx::postgres::PgPool,
    pub storage: storage::MediaStorage,
    pub thumbnails: thumbnails::ThumbnailCache,
}

#[derive(Debug)]
pub enum Error {
    TelemetryInitError(anyhow::Error),
    DatabaseConnectError(sqlx::Error),
    MigrationError(sqlx::migrate::MigrateError),
}

impl From<Error> for i32 {
    fn from(error: Error) -> i32 {
        match error {
            Error::TelemetryInitError(_) => 4,
            Error::DatabaseConnectError(_) => 5,
            Error::MigrationError(_) => 6,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::TelemetryInitError(err) => {
                write!(f, "Failed to init telemetry: {}", err)
            },
            Error::DatabaseConnectError(err) => {
                write!(f, "Failed to connect to database: {}", err)
            },
            Error::MigrationError(err) => {
                write!(f, "Failed to migrate database: {}", err)
            },
        }
    }
}

impl std::error::Error for Error {}

/// Settings for the item store.
///
/// Meant to be flattened into the host application's own arguments.
#[derive(Debug, StructOpt)]
pub struct Args {
    /// PostgreSQL database url.
    #[structopt(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: String,

    /// Directory uploaded images are stored in.
    #[structopt(
        long,
        parse(from_os_str),
        default_value = "./media",
        env = "PHOTO_ITEMS_MEDIA_ROOT"
    )]
    pub media_root: std::path::PathBuf,

    /// Directory derived thumbnails are cached in.
    #[structopt(
        long,
        parse(from_os_str),
        default_value = "./media",
        env = "PHOTO_ITEMS_THUMBNAIL_CACHE_ROOT"
    )]
    pub thumbnail_cache_root: std::path::PathBuf,
}

/// Set up logging, connect to and migrate the database, and open the file areas.
pub async fn init(args: &Args) -> Result<Context, Error> {
    telemetry::init().map_err(Error::TelemetryInitError)?;

    let pool = db::get_pool(&args.database_url)
        .await
        .map_err(Error::DatabaseConnectError)?;
    db::migrate(&pool).await.map_err(Error::MigrationError)?;
    tracing::info!("Database migrated");

    Ok(Context {
        db: pool,
        storage: storage::MediaStorage::new(&args.media_root),
        thumbnails: thumbnails::ThumbnailCache::new(&args.thumbnail_cache_root),
    })
}

/// Application context and dependency injection
use crate::{
    audit::AuditLog,
    comments::CommentThread,
    config::ServerConfig,
    content::{ContentRegistry, LearningEntryStore, ReflectionStore, StudentImageStore, TopicStore},
    db,
    error::{DeskError, DeskResult},
    moderation::{ApprovalResolver, RequestRepository, SubmissionIntake},
    rate_limit::RateLimiter,
};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    // Moderation engine
    pub intake: SubmissionIntake,
    pub resolver: ApprovalResolver,
    pub requests: RequestRepository,
    // Content
    pub reflections: ReflectionStore,
    pub topics: TopicStore,
    pub images: StudentImageStore,
    pub learning: LearningEntryStore,
    pub comments: CommentThread,
    pub audit: AuditLog,
    // Rate limiter
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> DeskResult<Self> {
        // Validate configuration
        config.validate()?;

        // Create data directories if they don't exist
        Self::ensure_directories(&config).await?;

        let db = db::create_pool(&config.storage.database, db::DatabaseOptions::default()).await?;
        db::run_migrations(&db).await?;
        db::test_connection(&db).await?;

        info!("Database ready at {:?}", config.storage.database);

        Ok(Self::from_pool(config, db))
    }

    /// Wire every service onto an already migrated pool
    pub fn from_pool(config: ServerConfig, db: SqlitePool) -> Self {
        let registry = Arc::new(ContentRegistry::new());
        let rate_limiter = Arc::new(RateLimiter::new(&config.rate_limit));

        Self {
            intake: SubmissionIntake::new(db.clone(), registry.clone(), rate_limiter.clone()),
            resolver: ApprovalResolver::new(db.clone(), registry),
            requests: RequestRepository::new(db.clone()),
            reflections: ReflectionStore::new(db.clone()),
            topics: TopicStore::new(db.clone()),
            images: StudentImageStore::new(db.clone()),
            learning: LearningEntryStore::new(db.clone()),
            comments: CommentThread::new(db.clone()),
            audit: AuditLog::new(db.clone()),
            config: Arc::new(config),
            rate_limiter,
            db,
        }
    }

    /// Ensure required directories exist
    async fn ensure_directories(config: &ServerConfig) -> DeskResult<()> {
        let dir = &config.storage.data_directory;
        if !dir.exists() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                DeskError::Internal(format!("Failed to create directory {:?}: {}", dir, e))
            })?;
        }

        Ok(())
    }

    /// Get service URL
    pub fn service_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.config.service.hostname, self.config.service.port
        )
    }
}

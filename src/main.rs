use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use axum::Router;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use voltcore::auth::IdentityService;
use voltcore::cache::{KvCache, MemoryCache, RedisCache};
use voltcore::config::{Config, ServiceKind};
use voltcore::conversion::{
    ConversionState, HttpPipelineBackend, HttpPipelineLauncher, LocalLauncher,
    LocalPipelineBackend, PipelineBackend, PipelineLauncher, STATUS_LOG_INTERVAL, Scheduler,
    create_conversion_router,
};
use voltcore::search::MemorySearch;
use voltcore::server::validation::{validate_email, validate_username};
use voltcore::server::{AppState, create_router};
use voltcore::service::{Core, Services};
use voltcore::storage::{FsObjectStore, ObjectStore};
use voltcore::store::{SqliteStore, Store};
use voltcore::webdav::{
    DavBackend, HttpDavBackend, HttpIdentityProvider, IdentityProvider, LocalDavBackend,
    LocalIdentityProvider, REFRESH_INTERVAL, TokenKeeper, WebDavState, create_webdav_router,
};

#[derive(Parser)]
#[command(name = "voltcore")]
#[command(about = "A self-hostable content storage backend", long_about = None)]
struct Cli {
    /// TOML configuration file; environment variables override its values
    #[arg(long, global = true, env = "VOLTCORE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the core API
    ServeApi,

    /// Start the conversion service
    ServeConversion,

    /// Start the WebDAV gateway
    ServeWebdav,

    /// Start the API, conversion service and WebDAV gateway in one process
    ServeAll,

    /// Manage users
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Create or upgrade the database schema
    Migrate,
}

#[derive(Subcommand)]
enum UserCommands {
    /// Create a user that can sign in with a password
    Create {
        #[arg(long)]
        username: String,

        #[arg(long)]
        email: String,

        #[arg(long, default_value = "")]
        full_name: String,

        #[arg(long, env = "VOLTCORE_USER_PASSWORD")]
        password: String,
    },
}

fn open_store(config: &Config) -> anyhow::Result<Arc<dyn Store>> {
    let db_path = config.db_path();
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let store = SqliteStore::new(&db_path)?;
    store.initialize()?;
    Ok(Arc::new(store))
}

fn open_objects(config: &Config) -> anyhow::Result<Arc<dyn ObjectStore>> {
    if config.s3_url.trim().is_empty() {
        let dir = config.objects_dir();
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        info!("Storing objects in {}", dir.display());
        return Ok(Arc::new(FsObjectStore::new(dir)));
    }

    s3_objects(config)
}

#[cfg(feature = "s3")]
fn s3_objects(config: &Config) -> anyhow::Result<Arc<dyn ObjectStore>> {
    let endpoint = config.s3_endpoint();
    info!("Storing objects in S3 at {}", endpoint);
    Ok(Arc::new(voltcore::storage::S3ObjectStore::new(
        &endpoint,
        &config.s3_access_key,
        &config.s3_secret_key,
        &config.s3_region,
    )))
}

#[cfg(not(feature = "s3"))]
fn s3_objects(_config: &Config) -> anyhow::Result<Arc<dyn ObjectStore>> {
    bail!("S3_URL is set but voltcore was built without the `s3` feature")
}

async fn open_cache(config: &Config) -> anyhow::Result<Arc<dyn KvCache>> {
    if config.redis_address.trim().is_empty() {
        return Ok(Arc::new(MemoryCache::new()));
    }
    let cache = RedisCache::connect(
        &config.redis_address,
        Some(config.redis_password.as_str()),
        config.redis_db,
    )
    .await?;
    Ok(Arc::new(cache))
}

fn prepare_temp_dir(config: &Config) -> anyhow::Result<PathBuf> {
    let dir = config.temp_dir();
    fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    Ok(dir)
}

fn api_state(
    config: &Config,
    services: Services,
    identity: Arc<IdentityService>,
    temp_dir: PathBuf,
) -> Arc<AppState> {
    let mut state = AppState::new(services, identity, config.security_api_key.clone());
    state.multipart_limit = config.multipart_limit_bytes();
    state.cors_origins = config.security_cors_origins.clone();
    state.temp_dir = Some(temp_dir);
    Arc::new(state)
}

async fn core_services(
    config: &Config,
    objects: Arc<dyn ObjectStore>,
    launcher: impl FnOnce(Arc<Core>) -> anyhow::Result<Arc<dyn PipelineLauncher>>,
) -> anyhow::Result<(Services, Arc<IdentityService>)> {
    let store = open_store(config)?;
    let core = Core::new(
        store.clone(),
        objects,
        open_cache(config).await?,
        Arc::new(MemorySearch::new()),
        config.settings(),
    );
    let launcher = launcher(core.clone())?;
    let identity = Arc::new(IdentityService::new(
        store,
        config.security_access_token_ttl_seconds,
    ));
    Ok((Services::new(core, launcher), identity))
}

fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutting down");
        trigger.cancel();
    });
    token
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

async fn serve(
    kind: ServiceKind,
    addr: SocketAddr,
    app: Router,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {kind} to {addr}"))?;
    info!("Starting {} server on {}", kind, addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

async fn run_api(config: Config) -> anyhow::Result<()> {
    if config.security_api_key.is_empty() {
        tracing::warn!("SECURITY_API_KEY is empty; service-to-service routes will reject every call");
    }
    let temp_dir = prepare_temp_dir(&config)?;
    let objects = open_objects(&config)?;
    let (services, identity) = core_services(&config, objects, |_| {
        let launcher: Arc<dyn PipelineLauncher> = Arc::new(HttpPipelineLauncher::new(
            &config.conversion_url,
            &config.security_api_key,
        )?);
        Ok(launcher)
    })
    .await?;

    let app = create_router(api_state(&config, services, identity, temp_dir));
    let addr = config.server(ServiceKind::Api, true).socket_addr()?;
    serve(ServiceKind::Api, addr, app, shutdown_token()).await
}

async fn run_conversion(config: Config) -> anyhow::Result<()> {
    prepare_temp_dir(&config)?;
    let objects = open_objects(&config)?;
    let backend: Arc<dyn PipelineBackend> = Arc::new(HttpPipelineBackend::new(
        &config.api_url,
        &config.security_api_key,
    )?);
    let scheduler = Scheduler::new(backend, objects, config.scheduler_options()?);
    let status_logger = scheduler.spawn_status_logger(STATUS_LOG_INTERVAL);

    let state = Arc::new(ConversionState {
        scheduler: scheduler.clone(),
        api_key: config.security_api_key.clone(),
    });
    let addr = config.server(ServiceKind::Conversion, true).socket_addr()?;
    let result = serve(
        ServiceKind::Conversion,
        addr,
        create_conversion_router(state),
        shutdown_token(),
    )
    .await;

    status_logger.abort();
    scheduler.shutdown().await;
    result
}

async fn run_webdav(config: Config) -> anyhow::Result<()> {
    let temp_dir = prepare_temp_dir(&config)?;
    let objects = open_objects(&config)?;
    let idp: Arc<dyn IdentityProvider> = Arc::new(HttpIdentityProvider::new(&config.idp_url)?);
    let keeper = TokenKeeper::new(idp);
    let refresher = keeper.spawn_refresher(REFRESH_INTERVAL);

    let backend: Arc<dyn DavBackend> = Arc::new(HttpDavBackend::new(&config.api_url)?);
    let state = Arc::new(WebDavState {
        backend,
        keeper,
        objects,
        temp_dir: Some(temp_dir),
    });
    let addr = config.server(ServiceKind::WebDav, true).socket_addr()?;
    let result = serve(
        ServiceKind::WebDav,
        addr,
        create_webdav_router(state),
        shutdown_token(),
    )
    .await;

    refresher.abort();
    result
}

async fn run_all(config: Config) -> anyhow::Result<()> {
    let temp_dir = prepare_temp_dir(&config)?;
    let objects = open_objects(&config)?;

    let scheduler_options = config.scheduler_options()?;
    let mut scheduler_slot = None;
    let (services, identity) = core_services(&config, objects.clone(), |core| {
        let backend: Arc<dyn PipelineBackend> = Arc::new(LocalPipelineBackend::new(core));
        let scheduler = Scheduler::new(backend, objects.clone(), scheduler_options.clone());
        scheduler_slot = Some(scheduler.clone());
        let launcher: Arc<dyn PipelineLauncher> = Arc::new(LocalLauncher::new(scheduler));
        Ok(launcher)
    })
    .await?;
    let Some(scheduler) = scheduler_slot else {
        bail!("conversion scheduler was not created");
    };
    let status_logger = scheduler.spawn_status_logger(STATUS_LOG_INTERVAL);

    let idp: Arc<dyn IdentityProvider> = Arc::new(LocalIdentityProvider::new(identity.clone()));
    let keeper = TokenKeeper::new(idp);
    let refresher = keeper.spawn_refresher(REFRESH_INTERVAL);

    let webdav = Arc::new(WebDavState {
        backend: Arc::new(LocalDavBackend::new(identity.clone(), services.clone())),
        keeper,
        objects,
        temp_dir: Some(temp_dir.clone()),
    });
    let conversion = Arc::new(ConversionState {
        scheduler: scheduler.clone(),
        api_key: config.security_api_key.clone(),
    });
    let api = api_state(&config, services, identity, temp_dir);

    let shutdown = shutdown_token();
    let result = tokio::try_join!(
        serve(
            ServiceKind::Api,
            config.server(ServiceKind::Api, false).socket_addr()?,
            create_router(api),
            shutdown.clone(),
        ),
        serve(
            ServiceKind::Conversion,
            config.server(ServiceKind::Conversion, false).socket_addr()?,
            create_conversion_router(conversion),
            shutdown.clone(),
        ),
        serve(
            ServiceKind::WebDav,
            config.server(ServiceKind::WebDav, false).socket_addr()?,
            create_webdav_router(webdav),
            shutdown.clone(),
        ),
    );
    // One listener failing takes the others down with it.
    shutdown.cancel();

    refresher.abort();
    status_logger.abort();
    scheduler.shutdown().await;
    result.map(|_| ())
}

fn run_user_create(
    config: &Config,
    username: &str,
    email: &str,
    full_name: &str,
    password: &str,
) -> anyhow::Result<()> {
    validate_username(username)?;
    validate_email(email)?;
    if password.is_empty() {
        bail!("password cannot be empty");
    }

    let store = open_store(config)?;
    let identity = IdentityService::new(store, config.security_access_token_ttl_seconds);
    let user = identity.create_user(username, email, full_name, password)?;

    println!("Created user '{}' with id {}", user.username, user.id);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("voltcore=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::ServeApi => run_api(config).await?,
        Commands::ServeConversion => run_conversion(config).await?,
        Commands::ServeWebdav => run_webdav(config).await?,
        Commands::ServeAll => run_all(config).await?,
        Commands::User { command } => match command {
            UserCommands::Create {
                username,
                email,
                full_name,
                password,
            } => run_user_create(&config, &username, &email, &full_name, &password)?,
        },
        Commands::Migrate => {
            open_store(&config)?;
            println!("Database ready at {}", config.db_path().display());
        }
    }

    Ok(())
}

use std::{process, sync::Arc};

use postline::{
    application::{
        chrome::ChromeService,
        error::AppError,
        feed::FeedService,
        follow::FollowService,
        pagination::Paginator,
        posts::PostService,
        query::PostQuery,
        repos::{
            CommentsRepo, CreateGroupParams, CreateUserParams, FollowsRepo, GroupsRepo, PostsRepo,
            PostsWriteRepo, RepoError, UsersRepo,
        },
    },
    cache::{CacheConfig, CacheState},
    config,
    domain::{
        entities::validate_username,
        slug::{derive_slug, generate_unique_slug_async},
    },
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        http::{self, AdminState, AuthConfig, HttpState},
        telemetry,
        uploads::UploadStorage,
    },
};
use tokio::{sync::watch, try_join};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Migrate(_) => run_migrate(settings).await,
        config::Command::Users(args) => match args.command {
            config::UsersCommand::Create(create) => run_create_user(settings, create).await,
        },
        config::Command::Groups(args) => match args.command {
            config::GroupsCommand::Create(create) => run_create_group(settings, create).await,
        },
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let (http_state, admin_state) = build_states(repositories, &settings)?;
    serve_http(&settings, http_state, admin_state).await
}

async fn run_migrate(settings: config::Settings) -> Result<(), AppError> {
    init_repositories(&settings).await?;
    info!(target = "postline::migrate", "database schema is up to date");
    Ok(())
}

async fn run_create_user(
    settings: config::Settings,
    args: config::CreateUserArgs,
) -> Result<(), AppError> {
    let username = validate_username(&args.username)?;

    let repositories = init_repositories(&settings).await?;
    let user = repositories
        .create_user(CreateUserParams { username })
        .await
        .map_err(|err| repo_failure("user", err))?;

    info!(
        target = "postline::users",
        id = user.id,
        username = %user.username,
        "user created"
    );
    Ok(())
}

async fn run_create_group(
    settings: config::Settings,
    args: config::CreateGroupArgs,
) -> Result<(), AppError> {
    let title = args.title.trim().to_string();
    if title.is_empty() {
        return Err(AppError::validation("group title must not be empty"));
    }

    let repositories = init_repositories(&settings).await?;

    // An explicit slug is taken as given; a derived one is made unique.
    let slug = match args.slug.as_deref() {
        Some(requested) => derive_slug(requested)
            .map_err(|err| AppError::validation(format!("invalid slug: {err}")))?,
        None => {
            let lookup = repositories.clone();
            generate_unique_slug_async(&title, |candidate: &str| {
                let lookup = lookup.clone();
                let candidate = candidate.to_string();
                async move {
                    lookup
                        .find_group_by_slug(&candidate)
                        .await
                        .map(|existing| existing.is_none())
                }
            })
            .await
            .map_err(|err| AppError::validation(format!("cannot derive slug: {err}")))?
        }
    };

    let group = repositories
        .create_group(CreateGroupParams {
            title,
            slug,
            description: args.description.trim().to_string(),
        })
        .await
        .map_err(|err| repo_failure("group", err))?;

    info!(
        target = "postline::groups",
        id = group.id,
        slug = %group.slug,
        title = %group.title,
        "group created"
    );
    Ok(())
}

fn repo_failure(entity: &str, err: RepoError) -> AppError {
    match err {
        RepoError::Duplicate { constraint } => {
            AppError::validation(format!("{entity} already exists ({constraint})"))
        }
        other => AppError::from(InfraError::database(other.to_string())),
    }
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let pool = PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    Ok(Arc::new(PostgresRepositories::new(pool)))
}

fn build_states(
    repositories: Arc<PostgresRepositories>,
    settings: &config::Settings,
) -> Result<(HttpState, AdminState), AppError> {
    let users_repo: Arc<dyn UsersRepo> = repositories.clone();
    let groups_repo: Arc<dyn GroupsRepo> = repositories.clone();
    let posts_repo: Arc<dyn PostsRepo> = repositories.clone();
    let posts_write_repo: Arc<dyn PostsWriteRepo> = repositories.clone();
    let comments_repo: Arc<dyn CommentsRepo> = repositories.clone();
    let follows_repo: Arc<dyn FollowsRepo> = repositories.clone();

    let query = Arc::new(PostQuery::new(
        posts_repo.clone(),
        comments_repo.clone(),
        Paginator::new(settings.feed.page_size),
    ));
    let follows = Arc::new(FollowService::new(
        users_repo.clone(),
        follows_repo,
        query.clone(),
    ));
    let feed = Arc::new(FeedService::new(
        query,
        groups_repo.clone(),
        users_repo.clone(),
        follows.clone(),
    ));

    let upload_storage = Arc::new(
        UploadStorage::new(settings.uploads.directory.clone())
            .map_err(|err| AppError::from(InfraError::Io(err)))?,
    );
    let posts = Arc::new(PostService::new(
        posts_repo,
        posts_write_repo,
        groups_repo,
        comments_repo,
        upload_storage.clone(),
    ));

    let cache = CacheState::new(CacheConfig::from(&settings.cache));
    let upload_body_limit =
        usize::try_from(settings.uploads.max_request_bytes.get()).unwrap_or(usize::MAX);

    let http_state = HttpState {
        feed,
        posts: posts.clone(),
        follows,
        chrome: Arc::new(ChromeService::new(
            settings.site.title.clone(),
            settings.auth.login_url.clone(),
        )),
        users: users_repo,
        uploads: upload_storage,
        cache: cache.clone(),
        auth: AuthConfig::from(&settings.auth),
        upload_body_limit,
    };

    let admin_state = AdminState {
        posts,
        cache,
        health: repositories,
    };

    Ok((http_state, admin_state))
}

async fn serve_http(
    settings: &config::Settings,
    http_state: HttpState,
    admin_state: AdminState,
) -> Result<(), AppError> {
    let public_router = http::build_router(http_state);
    let admin_router = http::build_admin_router(admin_state);

    let public_listener = tokio::net::TcpListener::bind(settings.server.public_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let admin_listener = tokio::net::TcpListener::bind(settings.server.admin_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "postline::serve",
        public = %settings.server.public_addr,
        admin = %settings.server.admin_addr,
        "listening"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let public_server = axum::serve(public_listener, public_router.into_make_service())
        .with_graceful_shutdown(shutdown_requested(shutdown_rx.clone()));
    let admin_server = axum::serve(admin_listener, admin_router.into_make_service())
        .with_graceful_shutdown(shutdown_requested(shutdown_rx.clone()));

    let grace = settings.server.graceful_shutdown;
    let servers = async { try_join!(public_server, admin_server) };
    let deadline = async {
        shutdown_requested(shutdown_rx).await;
        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        result = servers => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
            info!(target = "postline::serve", "listeners stopped");
        }
        _ = deadline => {
            warn!(
                target = "postline::serve",
                grace_seconds = grace.as_secs(),
                "graceful shutdown timed out; dropping open connections"
            );
        }
    }

    Ok(())
}

async fn shutdown_requested(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!(target = "postline::serve", "shutdown requested");
}

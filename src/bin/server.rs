use std::{fs::OpenOptions, net::SocketAddr, path::PathBuf, sync::Arc};

use axum::{
    Router,
    extract::{MatchedPath, Request},
};
use axum_server::Handle;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{Layer, filter, layer::SubscriberExt, util::SubscriberInitExt};

use forint::{AppConfig, AppState, DirectoryBlobStore, build_router, graceful_shutdown};

/// The JSON API server for the forint dashboard.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Directory where application data is stored.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// The port to serve the API from.
    #[arg(short, long, default_value_t = 3000)]
    port: u16,

    /// The currency assumed when statement detection finds nothing.
    #[arg(long, default_value = "HUF")]
    fallback_currency: String,

    /// The administrative account's username.
    #[arg(long, default_value = "admin")]
    admin_username: String,

    /// Create the administrative account with this password if it does not
    /// exist yet.
    #[arg(long)]
    admin_password: Option<String>,
}

#[tokio::main]
async fn main() {
    setup_logging();

    let args = Args::parse();

    let addr = SocketAddr::from(([127, 0, 0, 1], args.port));

    let config = AppConfig::new(&args.admin_username, &args.fallback_currency);
    let store = Arc::new(DirectoryBlobStore::new(args.data_dir));
    let state = AppState::new(store, config);

    if let Some(admin_password) = &args.admin_password {
        state
            .credentials()
            .ensure_admin_account(admin_password)
            .expect("could not create the administrative account");
    }

    let handle = Handle::new();
    tokio::spawn(graceful_shutdown(handle.clone()));

    let router = add_tracing_layer(build_router(state));

    tracing::info!("API server listening on {}", addr);
    axum_server::bind(addr)
        .handle(handle)
        .serve(router.into_make_service())
        .await
        .expect("could not start the API server");
}

fn setup_logging() {
    let stdout_log = tracing_subscriber::fmt::layer().pretty();

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("debug.log")
        .expect("Could not create log file");

    let debug_log = tracing_subscriber::fmt::layer()
        .pretty()
        .with_writer(Arc::new(log_file));

    tracing_subscriber::registry()
        .with(
            stdout_log
                .with_filter(filter::LevelFilter::INFO)
                .and_then(debug_log)
                .with_filter(filter::LevelFilter::DEBUG),
        )
        .init();
}

fn add_tracing_layer(router: Router) -> Router {
    let tracing_layer = TraceLayer::new_for_http()
        .make_span_with(|req: &Request| {
            let method = req.method();
            let uri = req.uri();

            let matched_path = req
                .extensions()
                .get::<MatchedPath>()
                .map(|matched_path| matched_path.as_str());

            tracing::debug_span!("request", %method, %uri, matched_path)
        })
        // 5xx responses are already logged where the error happens.
        .on_failure(());

    router.layer(tracing_layer)
}

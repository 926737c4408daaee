use fastsearch::{HttpState, Service, ServiceConfig, SqliteStore, router, telemetry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let config_path = args.next().ok_or(
        "usage: fastsearch-server <config.json> [--listen HOST:PORT] [--db PATH] [--callback-secret SECRET] [--stale-after-minutes N] [--analytics URL] [--origin ORIGIN] [--json-logs]",
    )?;

    let mut db_path = std::path::PathBuf::from("fastsearch.sqlite");
    let mut listen_override: Option<String> = None;
    let mut json_logs = false;

    let raw = std::fs::read_to_string(&config_path)?;
    let mut config: ServiceConfig = serde_json::from_str(&raw)?;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--listen" => {
                listen_override = Some(args.next().ok_or("missing value for --listen")?);
            }
            "--db" => {
                db_path = args.next().ok_or("missing value for --db")?.into();
            }
            "--callback-secret" => {
                config.callback_secret =
                    Some(args.next().ok_or("missing value for --callback-secret")?);
            }
            "--stale-after-minutes" => {
                let raw = args
                    .next()
                    .ok_or("missing value for --stale-after-minutes")?;
                config.stale_after_minutes = raw
                    .parse::<u64>()
                    .map_err(|_| "invalid --stale-after-minutes")?;
            }
            "--analytics" => {
                config.analytics_endpoint = Some(args.next().ok_or("missing value for --analytics")?);
            }
            "--origin" => {
                config
                    .allowed_origins
                    .push(args.next().ok_or("missing value for --origin")?);
            }
            "--json-logs" => {
                json_logs = true;
            }
            other => {
                return Err(format!("unknown argument: {other}").into());
            }
        }
    }

    telemetry::init_tracing(json_logs)?;

    if let Some(listen) = listen_override {
        config.listen = listen;
    }

    let store = SqliteStore::new(&db_path);
    store.init().await?;

    let service = Service::new(store, &config);
    let listen = config.listen.clone();
    let app = router(HttpState::new(service, config));

    let listener = tokio::net::TcpListener::bind(&listen).await?;
    tracing::info!(listen = %listen, db = %db_path.display(), "fastsearch server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

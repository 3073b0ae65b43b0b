use clap::Parser;
use job_orchestrator::bootstrap::Services;
use job_orchestrator::config::{make_config_loader, JobOrchestratorConfig};
use job_orchestrator::http;
use poem::listener::TcpListener;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "job-orchestrator")]
struct Args {
    /// Print the OpenAPI spec (YAML) to stdout and exit, instead of serving.
    #[arg(long)]
    dump_openapi_yaml: bool,
}

fn main() -> Result<(), std::io::Error> {
    let args = Args::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    if args.dump_openapi_yaml {
        return runtime.block_on(dump_openapi_yaml());
    }

    let config = make_config_loader()
        .load_or_dump_config()
        .map_err(|e| std::io::Error::other(format!("config error: {e}")))?;
    config.tracing.init();

    runtime.block_on(async_main(&config))
}

async fn dump_openapi_yaml() -> Result<(), std::io::Error> {
    let config = JobOrchestratorConfig::default();
    let services = Services::new(&config).await.map_err(|e| {
        error!("services init error: {e}");
        std::io::Error::other(e)
    })?;
    let open_api_service = http::make_open_api_service(&services);
    println!("{}", open_api_service.spec_yaml());
    Ok(())
}

async fn async_main(config: &JobOrchestratorConfig) -> Result<(), std::io::Error> {
    info!("starting job-orchestrator on port {}", config.http_port);

    let services = Services::new(config).await.map_err(|e| {
        error!("services init error: {e}");
        std::io::Error::other(e)
    })?;

    let app = http::combined_routes(&services);

    poem::Server::new(TcpListener::bind(format!("0.0.0.0:{}", config.http_port)))
        .run(app)
        .await
}

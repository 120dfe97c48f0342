use httpbridge::bus::memory::MemoryBus;
use httpbridge::config::{get_config, CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};
use httpbridge::controller::Dispatcher;
use hyper::service::{make_service_fn, service_fn};
use hyper::Server;
use simple_logger::SimpleLogger;
use std::convert::Infallible;
use std::env;
use std::process::ExitCode;

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("failed to listen for ctrl-c: {e}");
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let config_path = env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let cfg = match get_config(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("config error: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Validated while loading the config.
    let level = cfg.log_filter().unwrap_or(log::LevelFilter::Info);
    if let Err(e) = SimpleLogger::new().with_level(level).init() {
        eprintln!("logger error: {e}");
        return ExitCode::FAILURE;
    }

    let bus = MemoryBus::new(&cfg, true);
    let dispatcher = Dispatcher::new(bus.clone());

    let make_svc = make_service_fn(move |_conn| {
        let dispatcher = dispatcher.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let dispatcher = dispatcher.clone();
                async move { dispatcher.handle(req).await }
            }))
        }
    });

    let addr = cfg.listen_addr;
    let server = match Server::try_bind(&addr) {
        Ok(builder) => builder.serve(make_svc),
        Err(e) => {
            log::error!("could not bind {addr}: {e}");
            return ExitCode::FAILURE;
        }
    };

    log::info!("httpbridge running on http://{}", addr);

    let result = server.with_graceful_shutdown(shutdown_signal()).await;
    bus.close().await;

    if let Err(e) = result {
        log::error!("server error: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

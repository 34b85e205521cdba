use std::env;
use std::process::ExitCode;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;
use webproc_common::WORKER_METHOD;

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();

    // args[0] = exe
    // args[1] = method
    // args[2] = connection_key (ipc one-shot server name)
    let method = args.get(1).map(|s| s.as_str()).unwrap_or("");
    let connection_key = args.get(2).map(|s| s.as_str()).unwrap_or("");

    if method != WORKER_METHOD {
        error!("unsupported method '{method}'");
        return ExitCode::from(2);
    }

    if connection_key.is_empty() {
        error!("missing connection key");
        return ExitCode::from(2);
    }

    let bootstrap = match webproc_worker::connect(connection_key) {
        Ok(bootstrap) => bootstrap,
        Err(e) => {
            error!("{e:#}");
            return ExitCode::FAILURE;
        }
    };

    let (endpoint, config) = bootstrap.into_parts();
    debug!(title = %config.title, url = %config.url, "worker starting");

    match webproc_worker::run(endpoint, config) {
        Ok(()) => ExitCode::SUCCESS,
        // Already reported to the controller and logged.
        Err(_) => ExitCode::FAILURE,
    }
}

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::process::ExitCode;
use std::sync::Arc;

use mixer::config::Config;

#[tokio::main]
async fn main() -> ExitCode {
    let (config, direct) = match Config::load() {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("mixer: {e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = simple_logger::init_with_level(config.log.level.as_level()) {
        eprintln!("mixer: failed to initialize logging: {e}");
        return ExitCode::from(1);
    }

    match mixer::startup(Arc::new(config), direct).await {
        Ok(()) => ExitCode::from(0),
        Err(e) => {
            log::error!("mixer: {e:#}");
            ExitCode::from(1)
        }
    }
}

use std::process::ExitCode;

use env_logger::Env;
use log::{error, info};
use tokio_util::sync::CancellationToken;

use q2query::browser::ServerBrowser;
use q2query::color::strip_color_codes;
use q2query::{ProbeConfiguration, ServerEntry};

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    let config = match ProbeConfiguration::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let browser = ServerBrowser::new(&config);
    let cancel = CancellationToken::new();

    // ctrl-c stops the refresh and prints whatever answered so far
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, cancelling refresh");
            ctrl_c.cancel();
        }
    });

    let print_row = |entry: ServerEntry| {
        println!(
            "{:<22} {:>4}ms {:>2}/{:<2} {:<10} {:<8} {}",
            entry.full_address(),
            entry.ping.unwrap_or_default(),
            entry.current_players(),
            entry.max_clients(),
            entry.map(),
            entry.game_mod(),
            strip_color_codes(entry.hostname()),
        );
    };

    match browser.refresh(&print_row, &cancel).await {
        Ok(servers) => {
            info!("{} server(s) responded", servers.len());
            browser.close();
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("refresh failed: {e}");
            ExitCode::FAILURE
        }
    }
}

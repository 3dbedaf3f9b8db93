//! Diagnostics subcommand

use anyhow::Result;

use drydock_daemon::config::Config;
use drydock_daemon::database::Database;
use drydock_daemon::docker::DockerService;
use drydock_daemon::proxy::ProxyManager;

pub async fn run() -> Result<()> {
    println!("drydock-daemon v{}", env!("CARGO_PKG_VERSION"));
    println!();

    let config = match Config::load() {
        Ok(config) => {
            println!("config:    ok (data dir {:?})", config.data_dir);
            Some(config)
        }
        Err(e) => {
            println!("config:    FAILED ({})", e);
            None
        }
    };

    if let Some(config) = &config {
        match Database::open(&config.database_path) {
            Ok(db) => {
                let conn = db.conn().await;
                let containers: i64 = conn
                    .query_row("SELECT COUNT(*) FROM containers", [], |row| row.get(0))
                    .unwrap_or(-1);
                println!(
                    "database:  ok ({:?}, {} containers)",
                    config.database_path, containers
                );
            }
            Err(e) => println!("database:  FAILED ({})", e),
        }
    }

    match DockerService::new() {
        Ok(docker) => {
            match docker.ping().await {
                Ok(()) => println!("engine:    ok"),
                Err(e) => println!("engine:    FAILED ({})", e),
            }

            if let Some(config) = &config {
                let proxy = ProxyManager::new(docker, config);
                match proxy.status().await {
                    Ok(status) if status.running => println!(
                        "proxy:     running (http :{}, direct {}-{})",
                        status.http_port, status.direct_range.0, status.direct_range.1
                    ),
                    Ok(_) => println!("proxy:     not running"),
                    Err(e) => println!("proxy:     FAILED ({})", e),
                }
            }
        }
        Err(e) => println!("engine:    FAILED ({})", e),
    }

    Ok(())
}

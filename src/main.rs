use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use room_chat::cache::MemoryCache;
use room_chat::realtime::Hub;
use room_chat::server::Server;
use room_chat::store::MemoryStore;
use room_chat::{ChatService, Config};

const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init();

    let config = Config::from_env();

    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(MemoryCache::new());
    let hub = Arc::new(Hub::new());
    let service = Arc::new(
        ChatService::new(
            store,
            cache.clone(),
            hub.clone(),
            config.rate_limits.clone(),
        )
        .with_password_cost(config.password_cost),
    );

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(CACHE_SWEEP_INTERVAL).await;
            let purged = cache.purge_expired().await;
            if purged > 0 {
                info!("Purged {purged} expired rate-limit counters");
            }
        }
    });

    let server = Server::new(service, hub);
    let routes = server.routes(&config.allowed_origins);

    let tls = config.tls.as_ref().filter(|tls| {
        let present = tls.cert.exists() && tls.key.exists();
        if !present {
            warn!(
                "TLS files {} / {} not found, falling back to HTTP/WS",
                tls.cert.display(),
                tls.key.display()
            );
        }
        present
    });

    match tls {
        Some(tls) => {
            info!("Starting secure server (HTTPS/WSS) on {}...", config.bind);
            warp::serve(routes)
                .tls()
                .cert_path(&tls.cert)
                .key_path(&tls.key)
                .run(config.bind)
                .await;
        }
        None => {
            info!("Starting server (HTTP/WS) on {}...", config.bind);
            warp::serve(routes).run(config.bind).await;
        }
    }
}

mod input_sink;
mod transport_client;

pub mod config;

use crate::{
    client::{config::ClientConfig, transport_client::TransportClient},
    config::{CONFIG_FILE_PATH, Config, ConfigWatcher, read_certificate, read_private_key, watch},
    logging,
};
use anyhow::{Context, Error, anyhow};
use tokio::{select, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Runs the client application until a fatal error or cancellation.
pub async fn run(token: CancellationToken) -> Result<(), Error> {
    let config = Config::read(CONFIG_FILE_PATH).await?;
    logging::init(config.log_level);

    let mut watcher = watch(CONFIG_FILE_PATH)?;
    let mut cfg = config.client()?;

    info!(?cfg, "starting client");

    loop {
        match run_generation(&cfg, &mut watcher, &token).await? {
            Outcome::ConfigChanged(new_cfg) => {
                info!("config changed, restarting");
                cfg = new_cfg;
            }
            Outcome::Cancelled => break,
        }
    }

    info!("client stopped");
    Ok(())
}

enum Outcome {
    ConfigChanged(ClientConfig),
    Cancelled,
}

async fn run_generation(
    cfg: &ClientConfig,
    watcher: &mut ConfigWatcher,
    token: &CancellationToken,
) -> Result<Outcome, Error> {
    let generation = token.child_token();

    // events from the transport to the sink; the sink consumes promptly so
    // back-pressure never reaches the wire
    let (event_tx, event_rx) = mpsc::channel(1);

    let mut transport = {
        let tls_cert = read_certificate(&cfg.tls_cert_path)
            .await
            .context("failed to read client tls cert")?;
        let tls_key = read_private_key(&cfg.tls_key_path)
            .await
            .context("failed to read client tls key")?;
        let server_tls_cert = read_certificate(&cfg.server_tls_cert_path)
            .await
            .context("failed to read server tls cert")?;
        let args = TransportClient {
            server_addr: cfg.server_addr.clone(),
            tls_cert,
            tls_key,
            server_tls_cert,
        };
        transport_client::start(args, event_tx, generation.clone())
    };

    let mut sink = input_sink::start(event_rx);

    let outcome = loop {
        select! { biased;
            _ = token.cancelled() => break Ok(Outcome::Cancelled),

            changed = watcher.changed() => match changed {
                Some(()) => match Config::read(CONFIG_FILE_PATH).await.and_then(|c| c.client()) {
                    Ok(cfg) => break Ok(Outcome::ConfigChanged(cfg)),
                    // the running generation outlives a bad reload
                    Err(err) => warn!(error = %err, "ignoring config change"),
                },
                None => break Err(anyhow!("config watcher stopped")),
            },

            result = &mut transport => {
                break Err(match result {
                    Ok(Err(err)) => err.context("transport client failed"),
                    Ok(Ok(())) => anyhow!("transport client stopped"),
                    Err(err) => Error::from(err).context("transport client panicked"),
                });
            }

            result = &mut sink => {
                break Err(match result {
                    Ok(Err(err)) => err.context("input sink failed"),
                    Ok(Ok(())) => anyhow!("input sink stopped"),
                    Err(err) => Error::from(err).context("input sink panicked"),
                });
            }
        }
    };

    generation.cancel();
    if !transport.is_finished() {
        transport.await.ok();
    }
    // the transport owned the event channel; the sink drains and stops
    if !sink.is_finished() {
        sink.await.ok();
    }

    outcome
}

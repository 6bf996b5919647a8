mod key_buffer;
mod transport_server;

pub mod config;
pub mod input_source;

use crate::{
    config::{CONFIG_FILE_PATH, Config, ConfigWatcher, read_certificate, read_private_key, watch},
    input_event::InputEvent,
    logging,
    server::{
        config::ServerConfig, input_source::InputSource, key_buffer::KeyBuffer,
        transport_server::TransportServer,
    },
};
use anyhow::{Context, Error, anyhow};
use std::time::Instant;
use tokio::{
    select,
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runs the server application until a fatal error or cancellation.
pub async fn run(token: CancellationToken) -> Result<(), Error> {
    let config = Config::read(CONFIG_FILE_PATH).await?;
    logging::init(config.log_level);

    let mut watcher = watch(CONFIG_FILE_PATH)?;
    let mut cfg = config.server()?;

    info!(?cfg, "starting server");

    loop {
        match run_generation(&cfg, &mut watcher, &token).await? {
            Outcome::ConfigChanged(new_cfg) => {
                info!("config changed, restarting");
                cfg = new_cfg;
            }
            Outcome::Cancelled => break,
        }
    }

    info!("server stopped");
    Ok(())
}

enum Outcome {
    ConfigChanged(ServerConfig),
    Cancelled,
}

/// One disposable `(source, transport)` pair. A config change tears the
/// whole pair down and the caller starts a fresh one.
async fn run_generation(
    cfg: &ServerConfig,
    watcher: &mut ConfigWatcher,
    token: &CancellationToken,
) -> Result<Outcome, Error> {
    let generation = token.child_token();

    // capacity 1: the transport takes events one at a time, stale input is
    // dropped rather than queued
    let (event_tx, event_rx) = mpsc::channel(1);

    let mut source = InputSource::start(cfg)?;

    let mut transport = {
        let tls_cert = read_certificate(&cfg.tls_cert_path)
            .await
            .context("failed to read server tls cert")?;
        let tls_key = read_private_key(&cfg.tls_key_path)
            .await
            .context("failed to read server tls key")?;
        let client_tls_cert = read_certificate(&cfg.client_tls_cert_path)
            .await
            .context("failed to read client tls cert")?;
        let args = TransportServer {
            port: cfg.port,
            tls_cert,
            tls_key,
            client_tls_cert,
        };
        transport_server::start(args, event_rx, generation.clone())
    };

    let outcome = control_loop(&mut source, &event_tx, &mut transport, watcher, token).await;

    generation.cancel();
    drop(event_tx);
    source.stop();
    if !transport.is_finished() {
        transport.await.ok();
    }

    outcome
}

async fn control_loop(
    source: &mut InputSource,
    event_tx: &mpsc::Sender<InputEvent>,
    transport: &mut JoinHandle<Result<(), Error>>,
    watcher: &mut ConfigWatcher,
    token: &CancellationToken,
) -> Result<Outcome, Error> {
    let mut key_buffer = KeyBuffer::new();
    let mut capturing = false;
    let mut toggled_at: Option<Instant> = None;

    source.set_capture(capturing)?;

    loop {
        select! { biased;
            _ = token.cancelled() => return Ok(Outcome::Cancelled),

            changed = watcher.changed() => match changed {
                Some(()) => match Config::read(CONFIG_FILE_PATH).await.and_then(|c| c.server()) {
                    Ok(cfg) => return Ok(Outcome::ConfigChanged(cfg)),
                    // the running generation outlives a bad reload
                    Err(err) => warn!(error = %err, "ignoring config change"),
                },
                None => return Err(anyhow!("config watcher stopped")),
            },

            event = source.recv() => match event {
                Some(event) => {
                    debug!(?event, "input received");

                    if let InputEvent::KeyPress(press) = event {
                        key_buffer.push(press);
                    }

                    if capturing {
                        match event_tx.try_send(event) {
                            Ok(()) => (),
                            Err(TrySendError::Full(event)) => {
                                warn!(?event, "dropping event, transport cannot keep up")
                            }
                            Err(TrySendError::Closed(_)) => (),
                        }
                    }

                    if matches!(event, InputEvent::KeyPress(_)) {
                        if let Some(at) = key_buffer.toggle_key_stroke_exists(toggled_at) {
                            capturing = !capturing;
                            toggled_at = Some(at);
                            info!(capturing, "toggling input capture");
                            source.set_capture(capturing)?;
                        }
                    }
                }
                None => return Err(source.stopped().await),
            },

            result = &mut *transport => {
                return Err(match result {
                    Ok(Err(err)) => err.context("transport server failed"),
                    Ok(Ok(())) => anyhow!("transport server stopped"),
                    Err(err) => Error::from(err).context("transport server panicked"),
                });
            }
        }
    }
}

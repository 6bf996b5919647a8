use super::EVENT_CHANNEL_CAPACITY;
use crate::{
    input_event::{
        InputEvent, KeyAction, KeyPress, MouseButtonAction, MouseClick, MouseMove, MouseScroll,
        MouseScrollDirection, Normalizer, linux as codes,
    },
    server::config::ServerConfig,
};
use anyhow::{Context, Error, anyhow, bail};
use evdev_rs::{
    Device, GrabMode, ReadFlag,
    enums::{EV_REL, EventCode},
};
use std::{
    fs::File,
    path::{Path, PathBuf},
};
use tokio::{
    select,
    sync::{
        mpsc::{self, error::TrySendError},
        watch,
    },
    task,
};
use tracing::{info, warn};

pub struct InputSource {
    events: mpsc::Receiver<InputEvent>,
    capture_tx: watch::Sender<bool>,
    errors: mpsc::Receiver<Error>,
}

impl InputSource {
    /// Spawns one reader per configured evdev device plus a pump that
    /// normalizes the merged stream.
    pub fn start(cfg: &ServerConfig) -> Result<Self, Error> {
        let mut devices: Vec<PathBuf> = Vec::new();
        devices.extend(cfg.linux.keyboard_device.clone());
        devices.extend(cfg.linux.mouse_device.clone());
        if devices.is_empty() {
            bail!("no input devices configured");
        }

        let (raw_tx, mut raw_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (event_tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (error_tx, errors) = mpsc::channel(1);
        let (capture_tx, capture_rx) = watch::channel(false);

        for path in devices {
            task::spawn(run_device_reader(
                path,
                raw_tx.clone(),
                capture_rx.clone(),
                error_tx.clone(),
            ));
        }

        // single pump so the one-slot normalizer sees the merged stream
        task::spawn(async move {
            let mut normalizer = Normalizer::default();
            while let Some(event) = raw_rx.recv().await {
                let event = normalizer.normalize(event);
                match event_tx.try_send(event) {
                    Ok(()) => (),
                    Err(TrySendError::Full(event)) => {
                        warn!(?event, "dropping input, channel is full")
                    }
                    Err(TrySendError::Closed(_)) => break,
                }
            }
        });

        Ok(Self {
            events,
            capture_tx,
            errors,
        })
    }

    /// This method is cancel safe.
    pub async fn recv(&mut self) -> Option<InputEvent> {
        self.events.recv().await
    }

    /// The reason the source stopped; resolves after [InputSource::recv]
    /// has returned `None`.
    pub async fn stopped(&mut self) -> Error {
        self.errors
            .recv()
            .await
            .unwrap_or_else(|| anyhow!("input source stopped"))
    }

    pub fn set_capture(&self, capture: bool) -> Result<(), Error> {
        self.capture_tx
            .send(capture)
            .map_err(|_| anyhow!("input source stopped"))
    }

    pub fn stop(&mut self) {
        self.events.close();
    }
}

async fn run_device_reader(
    path: PathBuf,
    raw_tx: mpsc::Sender<InputEvent>,
    mut capture_rx: watch::Receiver<bool>,
    error_tx: mpsc::Sender<Error>,
) {
    if let Err(err) = read_device_events(&path, &raw_tx, &mut capture_rx).await {
        error_tx
            .try_send(err.context(format!("input device {}", path.display())))
            .ok();
    }
}

/// Keeps the device grabbed no longer than the source is alive.
struct GrabGuard(Device);

impl Drop for GrabGuard {
    fn drop(&mut self) {
        self.0.grab(GrabMode::Ungrab).ok();
    }
}

async fn read_device_events(
    path: &Path,
    raw_tx: &mpsc::Sender<InputEvent>,
    capture_rx: &mut watch::Receiver<bool>,
) -> Result<(), Error> {
    let mut dev = task::block_in_place(|| {
        let file = File::open(path).context("failed to open device")?;
        let dev = Device::new_from_file(file).context("failed to create evdev device")?;
        Result::<_, Error>::Ok(GrabGuard(dev))
    })?;
    info!(?path, "reading input events");

    let mut capturing = *capture_rx.borrow_and_update();
    task::block_in_place(|| set_grab(&mut dev, capturing))?;

    loop {
        select! { biased;
            changed = capture_rx.changed() => match changed {
                Ok(()) => {
                    capturing = *capture_rx.borrow_and_update();
                    task::block_in_place(|| set_grab(&mut dev, capturing))?;
                }
                Err(_) => break,
            },

            event = read_event(&mut dev) => {
                let event = event?;
                if let Some(event) = translate_event(&event, capturing) {
                    match raw_tx.try_send(event) {
                        Ok(()) => (),
                        Err(TrySendError::Full(event)) => {
                            warn!(?event, "dropping input, channel is full")
                        }
                        Err(TrySendError::Closed(_)) => break,
                    }
                }
            }
        }
    }

    Ok(())
}

/// Grabbing consumes the device's events so the host desktop stops seeing
/// them while we are capturing.
fn set_grab(dev: &mut GrabGuard, capturing: bool) -> Result<(), Error> {
    let mode = if capturing {
        GrabMode::Grab
    } else {
        GrabMode::Ungrab
    };
    dev.0.grab(mode).context("failed to set grab mode")
}

async fn read_event(dev: &mut GrabGuard) -> Result<evdev_rs::InputEvent, Error> {
    task::block_in_place(|| {
        let (_, event) = dev
            .0
            .next_event(ReadFlag::NORMAL | ReadFlag::BLOCKING)
            .context("failed to read event")?;
        Ok(event)
    })
}

fn translate_event(event: &evdev_rs::InputEvent, capturing: bool) -> Option<InputEvent> {
    match &event.event_code {
        EventCode::EV_KEY(key) => {
            if let Some(button) = codes::mouse_button(key) {
                let action = match event.value {
                    1 => MouseButtonAction::Down,
                    0 => MouseButtonAction::Up,
                    _ => return None,
                };
                Some(MouseClick { button, action }.into())
            } else if let Some(key) = codes::key_code(key) {
                let action = match event.value {
                    1 => KeyAction::Down,
                    2 => KeyAction::Repeat,
                    0 => KeyAction::Up,
                    _ => return None,
                };
                Some(KeyPress { key, action }.into())
            } else {
                None
            }
        }

        EventCode::EV_REL(rel) => match rel {
            // relative motion only matters while capturing
            EV_REL::REL_X => capturing.then(|| {
                MouseMove {
                    dx: event.value as i16,
                    dy: 0,
                }
                .into()
            }),
            // positive dy is up on the wire
            EV_REL::REL_Y => capturing.then(|| {
                MouseMove {
                    dx: 0,
                    dy: -(event.value as i16),
                }
                .into()
            }),
            EV_REL::REL_WHEEL => match event.value {
                n if n > 0 => Some(
                    MouseScroll {
                        direction: MouseScrollDirection::Up,
                        count: n as u8,
                    }
                    .into(),
                ),
                n if n < 0 => Some(
                    MouseScroll {
                        direction: MouseScrollDirection::Down,
                        count: (-n) as u8,
                    }
                    .into(),
                ),
                _ => None,
            },
            _ => None,
        },

        _ => None,
    }
}

use crate::input_event::{
    InputEvent, KeyAction, KeyCode, MouseButton, MouseButtonAction, MouseScrollDirection,
    linux as codes,
};
use anyhow::{Context, Error, anyhow};
use evdev_rs::{
    DeviceWrapper, InputEvent as LinuxInputEvent, UInputDevice, UninitDevice,
    enums::{BusType, EV_REL, EV_SYN, EventCode, EventType},
};
use std::time::SystemTime;
use strum::IntoEnumIterator;
use tokio::{
    sync::mpsc,
    task::{self, JoinHandle},
};

// https://www.kernel.org/doc/html/latest/input/uinput.html
// https://www.kernel.org/doc/html/latest/input/event-codes.html

pub fn start(event_rx: mpsc::Receiver<InputEvent>) -> JoinHandle<Result<(), Error>> {
    task::spawn(run_input_sink(event_rx))
}

fn create_virtual_device() -> Result<UninitDevice, Error> {
    let dev = UninitDevice::new().ok_or_else(|| anyhow!("failed to create virtual device"))?;

    dev.set_name("Seledri Virtual Input");
    dev.set_bustype(BusType::BUS_VIRTUAL as _);

    dev.enable_event_type(&EventType::EV_SYN)?;
    dev.enable_event_code(&EventCode::EV_SYN(EV_SYN::SYN_REPORT), None)?;

    dev.enable_event_type(&EventType::EV_KEY)?;
    for button in MouseButton::iter() {
        dev.enable_event_code(&EventCode::EV_KEY(codes::ev_button(button)), None)?;
    }
    for key in KeyCode::iter() {
        dev.enable_event_code(&EventCode::EV_KEY(codes::ev_key(key)), None)?;
    }

    dev.enable_event_type(&EventType::EV_REL)?;
    dev.enable_event_code(&EventCode::EV_REL(EV_REL::REL_X), None)?;
    dev.enable_event_code(&EventCode::EV_REL(EV_REL::REL_Y), None)?;
    dev.enable_event_code(&EventCode::EV_REL(EV_REL::REL_WHEEL), None)?;

    Ok(dev)
}

async fn run_input_sink(mut event_rx: mpsc::Receiver<InputEvent>) -> Result<(), Error> {
    let dev = create_virtual_device()?;
    let uidev =
        UInputDevice::create_from_device(&dev).context("failed to create uinput device")?;

    let mut events = Vec::new();
    while let Some(event) = event_rx.recv().await {
        to_linux_events(event, &mut events)?;
        for event in &events {
            uidev.write_event(event)?;
        }
        events.clear();
    }
    Ok(())
}

fn to_linux_events(event: InputEvent, out: &mut Vec<LinuxInputEvent>) -> Result<(), Error> {
    let time = SystemTime::now().try_into()?;

    match event {
        InputEvent::MouseMove(mouse_move) => {
            out.push(LinuxInputEvent {
                time,
                event_code: EventCode::EV_REL(EV_REL::REL_X),
                value: mouse_move.dx as _,
            });
            // positive dy is up on the wire, down for evdev
            out.push(LinuxInputEvent {
                time,
                event_code: EventCode::EV_REL(EV_REL::REL_Y),
                value: -mouse_move.dy as _,
            });
        }

        InputEvent::MouseClick(click) => {
            let value = match click.action {
                MouseButtonAction::Down => 1,
                MouseButtonAction::Up => 0,
            };
            out.push(LinuxInputEvent {
                time,
                event_code: EventCode::EV_KEY(codes::ev_button(click.button)),
                value,
            });
        }

        InputEvent::MouseScroll(scroll) => {
            let value = match scroll.direction {
                MouseScrollDirection::Up => scroll.count as i32,
                MouseScrollDirection::Down => -(scroll.count as i32),
            };
            out.push(LinuxInputEvent {
                time,
                event_code: EventCode::EV_REL(EV_REL::REL_WHEEL),
                value,
            });
        }

        InputEvent::KeyPress(press) => {
            let value = match press.action {
                KeyAction::Down => 1,
                KeyAction::Repeat => 2,
                KeyAction::Up => 0,
            };
            out.push(LinuxInputEvent {
                time,
                event_code: EventCode::EV_KEY(codes::ev_key(press.key)),
                value,
            });
        }
    }

    out.push(LinuxInputEvent {
        time,
        event_code: EventCode::EV_SYN(EV_SYN::SYN_REPORT),
        value: 0,
    });

    Ok(())
}

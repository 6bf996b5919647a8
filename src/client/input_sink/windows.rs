use crate::input_event::{
    InputEvent, KeyAction, MouseButton, MouseButtonAction, MouseScrollDirection, windows as codes,
};
use anyhow::Error;
use std::mem::size_of;
use tokio::{
    sync::mpsc,
    task::{self, JoinHandle},
};
use windows::Win32::UI::{
    Input::KeyboardAndMouse::{
        INPUT, INPUT_0, INPUT_KEYBOARD, INPUT_MOUSE, KEYBDINPUT, KEYEVENTF_KEYUP,
        MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP, MOUSEEVENTF_MIDDLEDOWN, MOUSEEVENTF_MIDDLEUP,
        MOUSEEVENTF_MOVE, MOUSEEVENTF_RIGHTDOWN, MOUSEEVENTF_RIGHTUP, MOUSEEVENTF_WHEEL,
        MOUSEEVENTF_XDOWN, MOUSEEVENTF_XUP, MOUSEINPUT, SendInput, VIRTUAL_KEY,
    },
    WindowsAndMessaging::{WHEEL_DELTA, XBUTTON1, XBUTTON2},
};

pub fn start(mut event_rx: mpsc::Receiver<InputEvent>) -> JoinHandle<Result<(), Error>> {
    task::spawn_blocking(move || -> Result<(), Error> {
        while let Some(event) = event_rx.blocking_recv() {
            let input = to_windows_input(event);
            unsafe { SendInput(&[input], size_of::<INPUT>() as _) };
        }
        Ok(())
    })
}

fn to_windows_input(event: InputEvent) -> INPUT {
    match event {
        InputEvent::MouseMove(mouse_move) => mouse_input(MOUSEINPUT {
            dx: mouse_move.dx as _,
            // positive dy is up on the wire, down for SendInput
            dy: -mouse_move.dy as _,
            mouseData: 0,
            dwFlags: MOUSEEVENTF_MOVE,
            time: 0,
            dwExtraInfo: Default::default(),
        }),

        InputEvent::MouseClick(click) => mouse_input(MOUSEINPUT {
            dx: 0,
            dy: 0,
            mouseData: match click.button {
                MouseButton::Mouse4 => XBUTTON1 as _,
                MouseButton::Mouse5 => XBUTTON2 as _,
                _ => 0,
            },
            dwFlags: match (click.button, click.action) {
                (MouseButton::Left, MouseButtonAction::Down) => MOUSEEVENTF_LEFTDOWN,
                (MouseButton::Left, MouseButtonAction::Up) => MOUSEEVENTF_LEFTUP,
                (MouseButton::Right, MouseButtonAction::Down) => MOUSEEVENTF_RIGHTDOWN,
                (MouseButton::Right, MouseButtonAction::Up) => MOUSEEVENTF_RIGHTUP,
                (MouseButton::Middle, MouseButtonAction::Down) => MOUSEEVENTF_MIDDLEDOWN,
                (MouseButton::Middle, MouseButtonAction::Up) => MOUSEEVENTF_MIDDLEUP,
                (MouseButton::Mouse4 | MouseButton::Mouse5, MouseButtonAction::Down) => {
                    MOUSEEVENTF_XDOWN
                }
                (MouseButton::Mouse4 | MouseButton::Mouse5, MouseButtonAction::Up) => {
                    MOUSEEVENTF_XUP
                }
            },
            time: 0,
            dwExtraInfo: Default::default(),
        }),

        InputEvent::MouseScroll(scroll) => mouse_input(MOUSEINPUT {
            dx: 0,
            dy: 0,
            mouseData: {
                let notches = WHEEL_DELTA as i32 * scroll.count as i32;
                match scroll.direction {
                    MouseScrollDirection::Up => notches,
                    MouseScrollDirection::Down => -notches,
                }
            },
            dwFlags: MOUSEEVENTF_WHEEL,
            time: 0,
            dwExtraInfo: Default::default(),
        }),

        InputEvent::KeyPress(press) => INPUT {
            r#type: INPUT_KEYBOARD,
            Anonymous: INPUT_0 {
                ki: KEYBDINPUT {
                    wVk: VIRTUAL_KEY(codes::virtual_key(press.key)),
                    wScan: 0,
                    dwFlags: match press.action {
                        KeyAction::Down | KeyAction::Repeat => Default::default(),
                        KeyAction::Up => KEYEVENTF_KEYUP,
                    },
                    time: 0,
                    dwExtraInfo: Default::default(),
                },
            },
        },
    }
}

fn mouse_input(mi: MOUSEINPUT) -> INPUT {
    INPUT {
        r#type: INPUT_MOUSE,
        Anonymous: INPUT_0 { mi },
    }
}

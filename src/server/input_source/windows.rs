use super::EVENT_CHANNEL_CAPACITY;
use crate::{
    input_event::{
        InputEvent, KeyAction, KeyPress, MouseButton, MouseButtonAction, MouseClick, MouseMove,
        MouseScroll, MouseScrollDirection, Normalizer, windows as codes,
    },
    server::config::ServerConfig,
};
use anyhow::{Context, Error, anyhow};
use std::{cell::Cell, ffi::c_void, sync::mpsc as std_mpsc, thread};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, warn};
use windows::Win32::{
    Foundation::{HWND, LPARAM, LRESULT, POINT, RECT, WPARAM},
    System::{LibraryLoader::GetModuleHandleW, Threading::GetCurrentThreadId},
    UI::WindowsAndMessaging::{
        CallNextHookEx, GetCursorPos, GetMessageW, HHOOK, KBDLLHOOKSTRUCT, MSG, MSLLHOOKSTRUCT,
        PostMessageW, PostThreadMessageW, SPI_GETWORKAREA, SetCursorPos, SetWindowsHookExW,
        SystemParametersInfoW, SYSTEM_PARAMETERS_INFO_UPDATE_FLAGS, UnhookWindowsHookEx,
        WH_KEYBOARD_LL, WH_MOUSE_LL, WHEEL_DELTA, WM_APP, WM_KEYDOWN, WM_KEYUP, WM_LBUTTONDOWN,
        WM_LBUTTONUP, WM_MBUTTONDOWN, WM_MBUTTONUP, WM_MOUSEMOVE, WM_MOUSEWHEEL, WM_RBUTTONDOWN,
        WM_RBUTTONUP, WM_SYSKEYDOWN, WM_SYSKEYUP, WM_XBUTTONDOWN, WM_XBUTTONUP, XBUTTON1, XBUTTON2,
    },
};

// Thread messages understood by the pump. External commands arrive through
// the thread message queue, never through shared state.
const MSG_HOOK_EVENT: u32 = WM_APP;
const MSG_CONTROL_COMMAND: u32 = WM_APP + 1;
const MSG_SET_CAPTURE_INPUTS: u32 = WM_APP + 2;

const CONTROL_COMMAND_STOP: usize = 1;

/// Raw hook payload, copied by the hook callback for the pump to pick up.
/// The callback and the pump share one OS thread, so a thread local slot is
/// enough.
#[derive(Clone, Copy, Default)]
struct HookEvent {
    code: u32,
    mouse_x: i32,
    mouse_y: i32,
    xbutton: u16,
    wheel_delta: i16,
    virtual_key: u32,
}

thread_local! {
    static HOOK_EVENT: Cell<HookEvent> = const { Cell::new(HookEvent {
        code: 0,
        mouse_x: 0,
        mouse_y: 0,
        xbutton: 0,
        wheel_delta: 0,
        virtual_key: 0,
    }) };

    /// When set the hooks consume events instead of passing them on.
    static EAT_INPUT: Cell<bool> = const { Cell::new(false) };
}

/// Removes the hook on drop so every exit path uninstalls it.
struct Unhooker(HHOOK);

impl Drop for Unhooker {
    fn drop(&mut self) {
        let ok: bool = unsafe { UnhookWindowsHookEx(self.0) }.into();
        if !ok {
            error!("failed to remove hook {:?}", self.0);
        }
    }
}

pub struct InputSource {
    thread_id: u32,
    thread: Option<thread::JoinHandle<()>>,
    events: mpsc::Receiver<InputEvent>,
    errors: mpsc::Receiver<Error>,
}

impl InputSource {
    /// Spawns the hook thread. The hooks must be installed, pumped, and
    /// removed on one OS thread, so this is a plain thread rather than a
    /// runtime task.
    pub fn start(_cfg: &ServerConfig) -> Result<Self, Error> {
        let (event_tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (error_tx, errors) = mpsc::channel(1);
        let (thread_id_tx, thread_id_rx) = std_mpsc::sync_channel(1);

        let thread = thread::Builder::new()
            .name("input-source".to_owned())
            .spawn(move || {
                thread_id_tx.send(unsafe { GetCurrentThreadId() }).ok();
                if let Err(err) = run_message_pump(event_tx) {
                    error_tx.try_send(err).ok();
                }
            })
            .context("failed to spawn input source thread")?;

        let thread_id = thread_id_rx
            .recv()
            .context("input source thread died during startup")?;

        Ok(Self {
            thread_id,
            thread: Some(thread),
            events,
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
        post_thread_message(
            self.thread_id,
            MSG_SET_CAPTURE_INPUTS,
            WPARAM(capture as usize),
        )
        .context("failed to post set-capture command")
    }

    pub fn stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            post_thread_message(self.thread_id, MSG_CONTROL_COMMAND, WPARAM(CONTROL_COMMAND_STOP))
                .ok();
            thread.join().ok();
        }
    }
}

impl Drop for InputSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn post_thread_message(thread_id: u32, message: u32, wparam: WPARAM) -> Result<(), Error> {
    unsafe { PostThreadMessageW(thread_id, message, wparam, LPARAM(0)) }
        .ok()
        .map_err(Into::into)
}

fn run_message_pump(event_tx: mpsc::Sender<InputEvent>) -> Result<(), Error> {
    let screen_center = screen_center()?;

    let module = unsafe { GetModuleHandleW(None) }.context("failed to get module handle")?;

    let _mouse_hook = Unhooker(
        unsafe { SetWindowsHookExW(WH_MOUSE_LL, Some(mouse_hook_proc), module, 0) }
            .context("failed to install mouse hook")?,
    );
    let _keyboard_hook = Unhooker(
        unsafe { SetWindowsHookExW(WH_KEYBOARD_LL, Some(keyboard_hook_proc), module, 0) }
            .context("failed to install keyboard hook")?,
    );

    let mut normalizer = Normalizer::default();
    let mut capturing = false;
    let mut saved_cursor: Option<POINT> = None;

    // The pump must never block: a blocked pump starves the hook callbacks
    // and with them the whole desktop's input.
    loop {
        let mut msg = MSG::default();
        // thread messages only
        let ret = unsafe { GetMessageW(&mut msg, HWND(-1), 0, 0) };
        match ret.0 {
            -1 => return Err(windows::core::Error::from_win32()).context("failed to read message"),
            0 => return Ok(()),
            _ => (),
        }

        match msg.message {
            MSG_HOOK_EVENT => {
                let hook_event = HOOK_EVENT.get();
                let event = match msg.wParam.0 as i32 {
                    id if id == WH_MOUSE_LL.0 => {
                        translate_mouse_event(&hook_event, capturing, screen_center)
                    }
                    id if id == WH_KEYBOARD_LL.0 => translate_keyboard_event(&hook_event),
                    _ => None,
                };
                if let Some(event) = event {
                    let event = normalizer.normalize(event);
                    debug!(?event, "sending input");
                    match event_tx.try_send(event) {
                        Ok(()) => (),
                        Err(TrySendError::Full(event)) => {
                            warn!(?event, "dropping input, channel is full")
                        }
                        Err(TrySendError::Closed(_)) => return Ok(()),
                    }
                }
            }

            MSG_CONTROL_COMMAND => {
                if msg.wParam.0 == CONTROL_COMMAND_STOP {
                    if let Some(pos) = saved_cursor.take() {
                        set_cursor_pos(pos)?;
                    }
                    return Ok(());
                }
            }

            MSG_SET_CAPTURE_INPUTS => {
                let capture = msg.wParam.0 != 0;
                if capture == capturing {
                    continue;
                }
                capturing = capture;
                if capturing {
                    let pos = cursor_pos()?;
                    set_cursor_pos(screen_center)?;
                    saved_cursor = Some(pos);
                    EAT_INPUT.set(true);
                } else {
                    EAT_INPUT.set(false);
                    if let Some(pos) = saved_cursor.take() {
                        set_cursor_pos(pos)?;
                    }
                }
            }

            _ => (),
        }
    }
}

fn translate_mouse_event(
    hook_event: &HookEvent,
    capturing: bool,
    screen_center: POINT,
) -> Option<InputEvent> {
    match hook_event.code {
        WM_MOUSEMOVE => {
            // only meaningful while the cursor is pinned to the center
            if !capturing {
                return None;
            }
            let dx = hook_event.mouse_x - screen_center.x;
            let dy = -(hook_event.mouse_y - screen_center.y);
            Some(
                MouseMove {
                    dx: dx as i16,
                    dy: dy as i16,
                }
                .into(),
            )
        }

        WM_LBUTTONDOWN => Some(click(MouseButton::Left, MouseButtonAction::Down)),
        WM_LBUTTONUP => Some(click(MouseButton::Left, MouseButtonAction::Up)),
        WM_RBUTTONDOWN => Some(click(MouseButton::Right, MouseButtonAction::Down)),
        WM_RBUTTONUP => Some(click(MouseButton::Right, MouseButtonAction::Up)),
        WM_MBUTTONDOWN => Some(click(MouseButton::Middle, MouseButtonAction::Down)),
        WM_MBUTTONUP => Some(click(MouseButton::Middle, MouseButtonAction::Up)),

        WM_XBUTTONDOWN => {
            xbutton(hook_event.xbutton).map(|button| click(button, MouseButtonAction::Down))
        }
        WM_XBUTTONUP => {
            xbutton(hook_event.xbutton).map(|button| click(button, MouseButtonAction::Up))
        }

        WM_MOUSEWHEEL => {
            let notches = hook_event.wheel_delta as i32 / WHEEL_DELTA as i32;
            match notches {
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
            }
        }

        _ => None,
    }
}

fn translate_keyboard_event(hook_event: &HookEvent) -> Option<InputEvent> {
    let action = match hook_event.code {
        WM_KEYDOWN | WM_SYSKEYDOWN => KeyAction::Down,
        WM_KEYUP | WM_SYSKEYUP => KeyAction::Up,
        _ => return None,
    };
    let key = codes::key_code(hook_event.virtual_key)?;
    Some(KeyPress { key, action }.into())
}

fn click(button: MouseButton, action: MouseButtonAction) -> InputEvent {
    MouseClick { button, action }.into()
}

fn xbutton(xbutton: u16) -> Option<MouseButton> {
    // other button bits are ignored
    if xbutton as u32 == XBUTTON1 as u32 {
        Some(MouseButton::Mouse4)
    } else if xbutton as u32 == XBUTTON2 as u32 {
        Some(MouseButton::Mouse5)
    } else {
        None
    }
}

fn cursor_pos() -> Result<POINT, Error> {
    let mut pos = POINT::default();
    unsafe { GetCursorPos(&mut pos) }
        .ok()
        .context("failed to read cursor position")?;
    Ok(pos)
}

fn set_cursor_pos(pos: POINT) -> Result<(), Error> {
    unsafe { SetCursorPos(pos.x, pos.y) }
        .ok()
        .context("failed to move cursor")
}

fn screen_center() -> Result<POINT, Error> {
    let mut rect = RECT::default();
    unsafe {
        SystemParametersInfoW(
            SPI_GETWORKAREA,
            0,
            Some(&mut rect as *mut RECT as *mut c_void),
            SYSTEM_PARAMETERS_INFO_UPDATE_FLAGS(0),
        )
    }
    .ok()
    .context("failed to read work area")?;
    Ok(POINT {
        x: (rect.right - rect.left) / 2,
        y: (rect.bottom - rect.top) / 2,
    })
}

/// Low level mouse hook. The OS gives it single digit milliseconds: copy
/// the payload, post a message, get out. No allocation, no locks.
extern "system" fn mouse_hook_proc(ncode: i32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    let details = unsafe { &*(lparam.0 as *const MSLLHOOKSTRUCT) };

    let code = wparam.0 as u32;
    let mut hook_event = HookEvent {
        code,
        ..Default::default()
    };
    match code {
        WM_MOUSEMOVE => {
            hook_event.mouse_x = details.pt.x;
            hook_event.mouse_y = details.pt.y;
        }
        WM_XBUTTONDOWN | WM_XBUTTONUP => {
            hook_event.xbutton = (details.mouseData >> 16) as u16;
        }
        WM_MOUSEWHEEL => {
            hook_event.wheel_delta = (details.mouseData >> 16) as u16 as i16;
        }
        _ => (),
    }
    HOOK_EVENT.set(hook_event);

    unsafe {
        PostMessageW(None, MSG_HOOK_EVENT, WPARAM(WH_MOUSE_LL.0 as usize), LPARAM(0));
    }

    if EAT_INPUT.get() {
        return LRESULT(1);
    }
    unsafe { CallNextHookEx(None, ncode, wparam, lparam) }
}

/// Low level keyboard hook; same contract as [mouse_hook_proc].
extern "system" fn keyboard_hook_proc(ncode: i32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    let details = unsafe { &*(lparam.0 as *const KBDLLHOOKSTRUCT) };

    HOOK_EVENT.set(HookEvent {
        code: wparam.0 as u32,
        virtual_key: details.vkCode,
        ..Default::default()
    });

    unsafe {
        PostMessageW(None, MSG_HOOK_EVENT, WPARAM(WH_KEYBOARD_LL.0 as usize), LPARAM(0));
    }

    if EAT_INPUT.get() {
        return LRESULT(1);
    }
    unsafe { CallNextHookEx(None, ncode, wparam, lparam) }
}

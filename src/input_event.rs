//! The canonical input event vocabulary shared by both endpoints.

use serde::{Deserialize, Serialize};
use strum::{EnumIter, FromRepr};

/// An input event captured on the server or replayed on the client.
///
/// The payload structs are what travels on the wire; the variant itself is
/// carried by the frame tag, not by the payload encoding.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InputEvent {
    MouseMove(MouseMove),
    MouseClick(MouseClick),
    MouseScroll(MouseScroll),
    KeyPress(KeyPress),
}

impl From<MouseMove> for InputEvent {
    fn from(x: MouseMove) -> Self {
        Self::MouseMove(x)
    }
}

impl From<MouseClick> for InputEvent {
    fn from(x: MouseClick) -> Self {
        Self::MouseClick(x)
    }
}

impl From<MouseScroll> for InputEvent {
    fn from(x: MouseScroll) -> Self {
        Self::MouseScroll(x)
    }
}

impl From<KeyPress> for InputEvent {
    fn from(x: KeyPress) -> Self {
        Self::KeyPress(x)
    }
}

/// Relative pointer motion. Positive `dy` is up.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct MouseMove {
    pub dx: i16,
    pub dy: i16,
}

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct MouseClick {
    pub button: MouseButton,
    pub action: MouseButtonAction,
}

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct MouseScroll {
    pub direction: MouseScrollDirection,
    /// Wheel notches.
    pub count: u8,
}

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct KeyPress {
    pub key: KeyCode,
    pub action: KeyAction,
}

#[repr(u8)]
#[derive(FromRepr, EnumIter, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    Mouse4,
    Mouse5,
}

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub enum MouseButtonAction {
    Down,
    Up,
}

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub enum MouseScrollDirection {
    Up,
    Down,
}

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub enum KeyAction {
    Down,
    Repeat,
    Up,
}

/// Keyboard key.
#[repr(u16)]
#[derive(FromRepr, EnumIter, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub enum KeyCode {
    Escape = 0,

    // function keys
    F1,
    F2,
    F3,
    F4,
    F5,
    F6,
    F7,
    F8,
    F9,
    F10,
    F11,
    F12,

    PrintScreen,
    ScrollLock,
    PauseBreak,

    /// The tilde key.
    Grave,

    // digits
    D1,
    D2,
    D3,
    D4,
    D5,
    D6,
    D7,
    D8,
    D9,
    D0,

    Minus,
    Equal,

    A,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
    I,
    J,
    K,
    L,
    M,
    N,
    O,
    P,
    Q,
    R,
    S,
    T,
    U,
    V,
    W,
    X,
    Y,
    Z,

    LeftBrace,
    RightBrace,

    SemiColon,
    Apostrophe,

    Comma,
    Dot,
    Slash,

    Backspace,
    BackSlash,
    Enter,

    Space,

    Tab,
    CapsLock,

    LeftShift,
    RightShift,

    LeftCtrl,
    RightCtrl,

    LeftAlt,
    RightAlt,

    LeftMeta,
    RightMeta,

    Insert,
    Delete,

    Home,
    End,

    PageUp,
    PageDown,

    Up,
    Left,
    Down,
    Right,
}

/// Folds repeated key-down events into key-repeat.
///
/// One slot of state, used only from the source's pump thread. Two
/// consecutive `KeyPress` downs of the same key rewrite the second into a
/// repeat; any other event in between resets the slot.
#[derive(Default, Debug)]
pub struct Normalizer {
    prev: Option<InputEvent>,
}

impl Normalizer {
    pub fn normalize(&mut self, event: InputEvent) -> InputEvent {
        let out = match (self.prev, event) {
            (
                Some(InputEvent::KeyPress(KeyPress {
                    key: prev_key,
                    action: KeyAction::Down,
                })),
                InputEvent::KeyPress(KeyPress {
                    key,
                    action: KeyAction::Down,
                }),
            ) if prev_key == key => KeyPress {
                key,
                action: KeyAction::Repeat,
            }
            .into(),
            _ => event,
        };
        // the slot keeps the raw event so a run of downs stays a run
        self.prev = Some(event);
        out
    }
}

#[cfg(target_os = "linux")]
pub mod linux {
    use super::{KeyCode, MouseButton};
    use evdev_rs::enums::EV_KEY;

    macro_rules! key_code_map {
        { $($key:ident <=> $ev:ident,)* } => {
            pub fn ev_key(key: KeyCode) -> EV_KEY {
                match key {
                    $(KeyCode::$key => EV_KEY::$ev,)*
                }
            }

            pub fn key_code(ev: &EV_KEY) -> Option<KeyCode> {
                match ev {
                    $(EV_KEY::$ev => Some(KeyCode::$key),)*
                    _ => None,
                }
            }
        };
    }

    key_code_map! {
        Escape <=> KEY_ESC,

        F1 <=> KEY_F1,
        F2 <=> KEY_F2,
        F3 <=> KEY_F3,
        F4 <=> KEY_F4,
        F5 <=> KEY_F5,
        F6 <=> KEY_F6,
        F7 <=> KEY_F7,
        F8 <=> KEY_F8,
        F9 <=> KEY_F9,
        F10 <=> KEY_F10,
        F11 <=> KEY_F11,
        F12 <=> KEY_F12,

        PrintScreen <=> KEY_PRINT,
        ScrollLock <=> KEY_SCROLLLOCK,
        PauseBreak <=> KEY_PAUSE,

        Grave <=> KEY_GRAVE,

        D1 <=> KEY_1,
        D2 <=> KEY_2,
        D3 <=> KEY_3,
        D4 <=> KEY_4,
        D5 <=> KEY_5,
        D6 <=> KEY_6,
        D7 <=> KEY_7,
        D8 <=> KEY_8,
        D9 <=> KEY_9,
        D0 <=> KEY_0,

        Minus <=> KEY_MINUS,
        Equal <=> KEY_EQUAL,

        A <=> KEY_A,
        B <=> KEY_B,
        C <=> KEY_C,
        D <=> KEY_D,
        E <=> KEY_E,
        F <=> KEY_F,
        G <=> KEY_G,
        H <=> KEY_H,
        I <=> KEY_I,
        J <=> KEY_J,
        K <=> KEY_K,
        L <=> KEY_L,
        M <=> KEY_M,
        N <=> KEY_N,
        O <=> KEY_O,
        P <=> KEY_P,
        Q <=> KEY_Q,
        R <=> KEY_R,
        S <=> KEY_S,
        T <=> KEY_T,
        U <=> KEY_U,
        V <=> KEY_V,
        W <=> KEY_W,
        X <=> KEY_X,
        Y <=> KEY_Y,
        Z <=> KEY_Z,

        LeftBrace <=> KEY_LEFTBRACE,
        RightBrace <=> KEY_RIGHTBRACE,

        SemiColon <=> KEY_SEMICOLON,
        Apostrophe <=> KEY_APOSTROPHE,

        Comma <=> KEY_COMMA,
        Dot <=> KEY_DOT,
        Slash <=> KEY_SLASH,

        Backspace <=> KEY_BACKSPACE,
        BackSlash <=> KEY_BACKSLASH,
        Enter <=> KEY_ENTER,

        Space <=> KEY_SPACE,

        Tab <=> KEY_TAB,
        CapsLock <=> KEY_CAPSLOCK,

        LeftShift <=> KEY_LEFTSHIFT,
        RightShift <=> KEY_RIGHTSHIFT,

        LeftCtrl <=> KEY_LEFTCTRL,
        RightCtrl <=> KEY_RIGHTCTRL,

        LeftAlt <=> KEY_LEFTALT,
        RightAlt <=> KEY_RIGHTALT,

        LeftMeta <=> KEY_LEFTMETA,
        RightMeta <=> KEY_RIGHTMETA,

        Insert <=> KEY_INSERT,
        Delete <=> KEY_DELETE,

        Home <=> KEY_HOME,
        End <=> KEY_END,

        PageUp <=> KEY_PAGEUP,
        PageDown <=> KEY_PAGEDOWN,

        Up <=> KEY_UP,
        Left <=> KEY_LEFT,
        Down <=> KEY_DOWN,
        Right <=> KEY_RIGHT,
    }

    pub fn ev_button(button: MouseButton) -> EV_KEY {
        match button {
            MouseButton::Left => EV_KEY::BTN_LEFT,
            MouseButton::Right => EV_KEY::BTN_RIGHT,
            MouseButton::Middle => EV_KEY::BTN_MIDDLE,
            MouseButton::Mouse4 => EV_KEY::BTN_SIDE,
            MouseButton::Mouse5 => EV_KEY::BTN_EXTRA,
        }
    }

    pub fn mouse_button(ev: &EV_KEY) -> Option<MouseButton> {
        match ev {
            EV_KEY::BTN_LEFT => Some(MouseButton::Left),
            EV_KEY::BTN_RIGHT => Some(MouseButton::Right),
            EV_KEY::BTN_MIDDLE => Some(MouseButton::Middle),
            EV_KEY::BTN_SIDE => Some(MouseButton::Mouse4),
            EV_KEY::BTN_EXTRA => Some(MouseButton::Mouse5),
            _ => None,
        }
    }
}

#[cfg(target_os = "windows")]
pub mod windows {
    use super::KeyCode;
    use ::windows::Win32::UI::Input::KeyboardAndMouse::*;
    use once_cell::sync::Lazy;

    // Windows virtual key codes as defined in
    // https://docs.microsoft.com/en-us/windows/win32/inputdev/virtual-key-codes
    macro_rules! virtual_key_map {
        { $($key:ident => $vk:expr,)* } => {
            pub fn virtual_key(key: KeyCode) -> u16 {
                match key {
                    $(KeyCode::$key => $vk,)*
                }
            }

            /// Dense table so the hook path maps in constant time.
            static KEY_CODES: Lazy<[Option<KeyCode>; 256]> = Lazy::new(|| {
                let mut table = [None; 256];
                $(table[$vk as usize] = Some(KeyCode::$key);)*
                table
            });
        };
    }

    virtual_key_map! {
        Escape => VK_ESCAPE.0,

        F1 => VK_F1.0,
        F2 => VK_F2.0,
        F3 => VK_F3.0,
        F4 => VK_F4.0,
        F5 => VK_F5.0,
        F6 => VK_F6.0,
        F7 => VK_F7.0,
        F8 => VK_F8.0,
        F9 => VK_F9.0,
        F10 => VK_F10.0,
        F11 => VK_F11.0,
        F12 => VK_F12.0,

        PrintScreen => VK_SNAPSHOT.0,
        ScrollLock => VK_SCROLL.0,
        PauseBreak => VK_PAUSE.0,

        Grave => VK_OEM_3.0,

        D1 => 0x31u16,
        D2 => 0x32u16,
        D3 => 0x33u16,
        D4 => 0x34u16,
        D5 => 0x35u16,
        D6 => 0x36u16,
        D7 => 0x37u16,
        D8 => 0x38u16,
        D9 => 0x39u16,
        D0 => 0x30u16,

        Minus => VK_OEM_MINUS.0,
        Equal => VK_OEM_PLUS.0,

        A => 0x41u16,
        B => 0x42u16,
        C => 0x43u16,
        D => 0x44u16,
        E => 0x45u16,
        F => 0x46u16,
        G => 0x47u16,
        H => 0x48u16,
        I => 0x49u16,
        J => 0x4Au16,
        K => 0x4Bu16,
        L => 0x4Cu16,
        M => 0x4Du16,
        N => 0x4Eu16,
        O => 0x4Fu16,
        P => 0x50u16,
        Q => 0x51u16,
        R => 0x52u16,
        S => 0x53u16,
        T => 0x54u16,
        U => 0x55u16,
        V => 0x56u16,
        W => 0x57u16,
        X => 0x58u16,
        Y => 0x59u16,
        Z => 0x5Au16,

        LeftBrace => VK_OEM_4.0,
        RightBrace => VK_OEM_6.0,

        SemiColon => VK_OEM_1.0,
        Apostrophe => VK_OEM_7.0,

        Comma => VK_OEM_COMMA.0,
        Dot => VK_OEM_PERIOD.0,
        Slash => VK_OEM_2.0,

        Backspace => VK_BACK.0,
        BackSlash => VK_OEM_5.0,
        Enter => VK_RETURN.0,

        Space => VK_SPACE.0,

        Tab => VK_TAB.0,
        CapsLock => VK_CAPITAL.0,

        LeftShift => VK_LSHIFT.0,
        RightShift => VK_RSHIFT.0,

        LeftCtrl => VK_LCONTROL.0,
        RightCtrl => VK_RCONTROL.0,

        LeftAlt => VK_LMENU.0,
        RightAlt => VK_RMENU.0,

        LeftMeta => VK_LWIN.0,
        RightMeta => VK_RWIN.0,

        Insert => VK_INSERT.0,
        Delete => VK_DELETE.0,

        Home => VK_HOME.0,
        End => VK_END.0,

        PageUp => VK_PRIOR.0,
        PageDown => VK_NEXT.0,

        Up => VK_UP.0,
        Left => VK_LEFT.0,
        Down => VK_DOWN.0,
        Right => VK_RIGHT.0,
    }

    pub fn key_code(virtual_key: u32) -> Option<KeyCode> {
        KEY_CODES.get(virtual_key as usize).copied().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn down(key: KeyCode) -> InputEvent {
        KeyPress {
            key,
            action: KeyAction::Down,
        }
        .into()
    }

    fn repeat(key: KeyCode) -> InputEvent {
        KeyPress {
            key,
            action: KeyAction::Repeat,
        }
        .into()
    }

    fn up(key: KeyCode) -> InputEvent {
        KeyPress {
            key,
            action: KeyAction::Up,
        }
        .into()
    }

    #[test]
    fn test_normalize_folds_repeated_downs() {
        let mut normalizer = Normalizer::default();
        assert_eq!(normalizer.normalize(down(KeyCode::A)), down(KeyCode::A));
        assert_eq!(normalizer.normalize(down(KeyCode::A)), repeat(KeyCode::A));
        assert_eq!(normalizer.normalize(down(KeyCode::A)), repeat(KeyCode::A));
        assert_eq!(normalizer.normalize(up(KeyCode::A)), up(KeyCode::A));
        assert_eq!(normalizer.normalize(down(KeyCode::A)), down(KeyCode::A));
    }

    #[test]
    fn test_normalize_keeps_downs_of_different_keys() {
        let mut normalizer = Normalizer::default();
        assert_eq!(normalizer.normalize(down(KeyCode::A)), down(KeyCode::A));
        assert_eq!(normalizer.normalize(down(KeyCode::B)), down(KeyCode::B));
        assert_eq!(normalizer.normalize(down(KeyCode::B)), repeat(KeyCode::B));
    }

    #[test]
    fn test_normalize_intervening_event_splits_run() {
        let mut normalizer = Normalizer::default();
        assert_eq!(normalizer.normalize(down(KeyCode::A)), down(KeyCode::A));
        let move_event: InputEvent = MouseMove { dx: 1, dy: -1 }.into();
        assert_eq!(normalizer.normalize(move_event), move_event);
        assert_eq!(normalizer.normalize(down(KeyCode::A)), down(KeyCode::A));
    }

    #[test]
    fn test_normalize_passes_non_key_events_through() {
        let mut normalizer = Normalizer::default();
        let scroll: InputEvent = MouseScroll {
            direction: MouseScrollDirection::Up,
            count: 2,
        }
        .into();
        let click: InputEvent = MouseClick {
            button: MouseButton::Left,
            action: MouseButtonAction::Down,
        }
        .into();
        assert_eq!(normalizer.normalize(scroll), scroll);
        assert_eq!(normalizer.normalize(click), click);
    }
}

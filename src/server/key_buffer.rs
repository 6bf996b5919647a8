//! Detects the capture toggle gesture: the right control key pressed and
//! released twice within a 300 ms window.

use crate::input_event::{KeyAction, KeyCode, KeyPress};
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_millis(300);

/// Sliding window of recent key down/up events, ordered oldest to newest.
#[derive(Default, Debug)]
pub struct KeyBuffer {
    buf: Vec<(KeyPress, Instant)>,
}

impl KeyBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, press: KeyPress) {
        self.push_at(press, Instant::now())
    }

    fn push_at(&mut self, press: KeyPress, at: Instant) {
        // repeats never enter the buffer, so auto-repeat cannot fake a tap
        if !matches!(press.action, KeyAction::Down | KeyAction::Up) {
            return;
        }
        if let Some(cutoff) = at.checked_sub(WINDOW) {
            let stale = self.buf.partition_point(|(_, t)| *t <= cutoff);
            self.buf.drain(..stale);
        }
        self.buf.push((press, at));
    }

    /// Looks for a complete up-down-up-down walk of the right control key,
    /// newest to oldest, strictly after `last_toggle_at`. Returns the
    /// timestamp of the newest key up so a matched gesture fires only once.
    pub fn toggle_key_stroke_exists(&self, last_toggle_at: Option<Instant>) -> Option<Instant> {
        let mut count = 1;
        let mut toggled_at = None;
        for (press, at) in self.buf.iter().rev() {
            if press.key != KeyCode::RightCtrl {
                continue;
            }
            // events at or before the previous toggle must not be reused
            if let Some(last) = last_toggle_at {
                if *at <= last {
                    return None;
                }
            }
            if count == 1 && press.action == KeyAction::Up {
                toggled_at = Some(*at);
            }
            if count % 2 == 1 && press.action == KeyAction::Up {
                count += 1;
            } else if count % 2 == 0 && press.action == KeyAction::Down {
                count += 1;
            }
            // two complete up-down pairs, so all four events are in the window
            if count == 5 {
                return toggled_at;
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(key: KeyCode, action: KeyAction) -> KeyPress {
        KeyPress { key, action }
    }

    fn buffer_with(entries: &[(KeyCode, KeyAction, u64)], base: Instant) -> KeyBuffer {
        let mut buf = KeyBuffer::new();
        for (key, action, at_ms) in entries {
            buf.push_at(press(*key, *action), base + Duration::from_millis(*at_ms));
        }
        buf
    }

    #[test]
    fn test_double_tap_toggles() {
        let base = Instant::now();
        let buf = buffer_with(
            &[
                (KeyCode::RightCtrl, KeyAction::Down, 0),
                (KeyCode::RightCtrl, KeyAction::Up, 40),
                (KeyCode::RightCtrl, KeyAction::Down, 90),
                (KeyCode::RightCtrl, KeyAction::Up, 140),
            ],
            base,
        );
        assert_eq!(
            buf.toggle_key_stroke_exists(None),
            Some(base + Duration::from_millis(140)),
        );
    }

    #[test]
    fn test_matched_gesture_fires_once() {
        let base = Instant::now();
        let mut buf = buffer_with(
            &[
                (KeyCode::RightCtrl, KeyAction::Down, 0),
                (KeyCode::RightCtrl, KeyAction::Up, 40),
                (KeyCode::RightCtrl, KeyAction::Down, 90),
                (KeyCode::RightCtrl, KeyAction::Up, 140),
            ],
            base,
        );
        let toggled_at = buf.toggle_key_stroke_exists(None).unwrap();

        // the same events must not satisfy the gesture again
        assert_eq!(buf.toggle_key_stroke_exists(Some(toggled_at)), None);

        // a fresh double tap after the toggle matches again
        for (action, at_ms) in [
            (KeyAction::Down, 200),
            (KeyAction::Up, 240),
            (KeyAction::Down, 290),
            (KeyAction::Up, 340),
        ] {
            buf.push_at(
                press(KeyCode::RightCtrl, action),
                base + Duration::from_millis(at_ms),
            );
        }
        assert_eq!(
            buf.toggle_key_stroke_exists(Some(toggled_at)),
            Some(base + Duration::from_millis(340)),
        );
    }

    #[test]
    fn test_window_expires() {
        let base = Instant::now();
        let buf = buffer_with(
            &[
                (KeyCode::RightCtrl, KeyAction::Down, 0),
                (KeyCode::RightCtrl, KeyAction::Up, 120),
                (KeyCode::RightCtrl, KeyAction::Down, 240),
                (KeyCode::RightCtrl, KeyAction::Up, 350),
            ],
            base,
        );
        // the first down fell out of the 300 ms window
        assert_eq!(buf.toggle_key_stroke_exists(None), None);
    }

    #[test]
    fn test_other_keys_do_not_contribute() {
        let base = Instant::now();
        let buf = buffer_with(
            &[
                (KeyCode::RightCtrl, KeyAction::Down, 0),
                (KeyCode::A, KeyAction::Down, 20),
                (KeyCode::RightCtrl, KeyAction::Up, 40),
                (KeyCode::A, KeyAction::Up, 60),
                (KeyCode::RightCtrl, KeyAction::Down, 90),
                (KeyCode::LeftCtrl, KeyAction::Up, 120),
                (KeyCode::RightCtrl, KeyAction::Up, 140),
            ],
            base,
        );
        assert_eq!(
            buf.toggle_key_stroke_exists(None),
            Some(base + Duration::from_millis(140)),
        );
    }

    #[test]
    fn test_left_ctrl_alone_does_not_toggle() {
        let base = Instant::now();
        let buf = buffer_with(
            &[
                (KeyCode::LeftCtrl, KeyAction::Down, 0),
                (KeyCode::LeftCtrl, KeyAction::Up, 40),
                (KeyCode::LeftCtrl, KeyAction::Down, 90),
                (KeyCode::LeftCtrl, KeyAction::Up, 140),
            ],
            base,
        );
        assert_eq!(buf.toggle_key_stroke_exists(None), None);
    }

    #[test]
    fn test_repeats_are_not_buffered() {
        let base = Instant::now();
        let buf = buffer_with(
            &[
                (KeyCode::RightCtrl, KeyAction::Down, 0),
                (KeyCode::RightCtrl, KeyAction::Repeat, 20),
                (KeyCode::RightCtrl, KeyAction::Repeat, 40),
                (KeyCode::RightCtrl, KeyAction::Up, 60),
            ],
            base,
        );
        assert_eq!(buf.toggle_key_stroke_exists(None), None);
    }

    #[test]
    fn test_detection_is_deterministic() {
        let base = Instant::now();
        let buf = buffer_with(
            &[
                (KeyCode::RightCtrl, KeyAction::Down, 0),
                (KeyCode::RightCtrl, KeyAction::Up, 40),
                (KeyCode::RightCtrl, KeyAction::Down, 90),
                (KeyCode::RightCtrl, KeyAction::Up, 140),
            ],
            base,
        );
        let first = buf.toggle_key_stroke_exists(None);
        let second = buf.toggle_key_stroke_exists(None);
        assert_eq!(first, second);
    }

    #[test]
    fn test_incomplete_sequence_does_not_toggle() {
        let base = Instant::now();
        let buf = buffer_with(
            &[
                (KeyCode::RightCtrl, KeyAction::Down, 0),
                (KeyCode::RightCtrl, KeyAction::Up, 40),
                (KeyCode::RightCtrl, KeyAction::Down, 90),
            ],
            base,
        );
        assert_eq!(buf.toggle_key_stroke_exists(None), None);
    }
}

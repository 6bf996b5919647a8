//! The wire framing: big-endian tag and length, then the CBOR value.

use super::{Error, HEADER_LEN, VALUE_MAX_LENGTH};
use crate::input_event::{InputEvent, KeyPress, MouseClick, MouseMove, MouseScroll};
use bytes::{Buf, BytesMut};
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::{AsyncRead, AsyncReadExt};

#[repr(u16)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Tag {
    MouseMove = 1,
    MouseClick = 2,
    MouseScroll = 3,
    KeyPress = 4,
    Ping = 5,
}

impl TryFrom<u16> for Tag {
    type Error = Error;

    fn try_from(tag: u16) -> Result<Self, Error> {
        match tag {
            1 => Ok(Self::MouseMove),
            2 => Ok(Self::MouseClick),
            3 => Ok(Self::MouseScroll),
            4 => Ok(Self::KeyPress),
            5 => Ok(Self::Ping),
            other => Err(Error::UnknownTag(other)),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Frame {
    tag: Tag,
    value: Vec<u8>,
}

impl Frame {
    pub fn ping() -> Self {
        Self {
            tag: Tag::Ping,
            value: Vec::new(),
        }
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn from_event(event: &InputEvent) -> Result<Self, Error> {
        let (tag, value) = match event {
            InputEvent::MouseMove(mouse_move) => (Tag::MouseMove, marshal(mouse_move)?),
            InputEvent::MouseClick(click) => (Tag::MouseClick, marshal(click)?),
            InputEvent::MouseScroll(scroll) => (Tag::MouseScroll, marshal(scroll)?),
            InputEvent::KeyPress(press) => (Tag::KeyPress, marshal(press)?),
        };
        if value.len() > VALUE_MAX_LENGTH as usize {
            return Err(Error::MaxLengthExceeded);
        }
        Ok(Self { tag, value })
    }

    pub fn into_event(self) -> Result<InputEvent, Error> {
        match self.tag {
            Tag::MouseMove => unmarshal::<MouseMove>(&self.value).map(Into::into),
            Tag::MouseClick => unmarshal::<MouseClick>(&self.value).map(Into::into),
            Tag::MouseScroll => unmarshal::<MouseScroll>(&self.value).map(Into::into),
            Tag::KeyPress => unmarshal::<KeyPress>(&self.value).map(Into::into),
            Tag::Ping => Err(Error::Codec("ping frame carries no event".to_owned())),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        if self.value.len() > VALUE_MAX_LENGTH as usize {
            return Err(Error::MaxLengthExceeded);
        }
        let mut buf = Vec::with_capacity(HEADER_LEN + self.value.len());
        buf.extend_from_slice(&(self.tag as u16).to_be_bytes());
        buf.extend_from_slice(&(self.value.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.value);
        Ok(buf)
    }
}

fn marshal(value: &impl Serialize) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf).map_err(|err| Error::Codec(err.to_string()))?;
    Ok(buf)
}

fn unmarshal<T: DeserializeOwned>(value: &[u8]) -> Result<T, Error> {
    ciborium::de::from_reader(value).map_err(|err| Error::Codec(err.to_string()))
}

/// Reads a single frame.
///
/// This function is cancel safe: `buf` accumulates partial reads and nothing
/// is consumed from it until a whole frame is available.
pub(crate) async fn read_frame(
    src: &mut (impl AsyncRead + Unpin),
    buf: &mut BytesMut,
) -> Result<Frame, Error> {
    if let Err(err) = fill_buf(src, buf, HEADER_LEN).await {
        return Err(match err {
            Error::ShortRead if buf.is_empty() => Error::Closed,
            err => err,
        });
    }

    let tag = u16::from_be_bytes([buf[0], buf[1]]);
    let tag = Tag::try_from(tag)?;

    let length = u16::from_be_bytes([buf[2], buf[3]]);
    if length > VALUE_MAX_LENGTH {
        return Err(Error::MaxLengthExceeded);
    }

    fill_buf(src, buf, HEADER_LEN + length as usize).await?;

    buf.advance(HEADER_LEN);
    let value = buf.split_to(length as usize).to_vec();

    Ok(Frame { tag, value })
}

/// Fills the buffer until it holds at least `size` bytes.
///
/// This function is cancel safe.
async fn fill_buf(
    src: &mut (impl AsyncRead + Unpin),
    buf: &mut BytesMut,
    size: usize,
) -> Result<(), Error> {
    while buf.len() < size {
        let read = src.read_buf(buf).await.map_err(Error::Io)?;
        if read == 0 {
            return Err(Error::ShortRead);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input_event::{
        KeyAction, KeyCode, MouseButton, MouseButtonAction, MouseScrollDirection,
    };

    async fn decode(bytes: &[u8]) -> Result<Frame, Error> {
        let mut src = bytes;
        let mut buf = BytesMut::new();
        read_frame(&mut src, &mut buf).await
    }

    #[tokio::test]
    async fn test_ping_frame_is_four_bytes() {
        let bytes = Frame::ping().encode().unwrap();
        assert_eq!(bytes, [0x00, 0x05, 0x00, 0x00]);

        let frame = decode(&bytes).await.unwrap();
        assert_eq!(frame, Frame::ping());
    }

    #[tokio::test]
    async fn test_header_is_big_endian() {
        let event = MouseMove { dx: 7, dy: 3 }.into();
        let bytes = Frame::from_event(&event).unwrap().encode().unwrap();
        assert_eq!(bytes[0..2], [0x00, 0x01]);
        assert_eq!(bytes[2], 0x00);
        assert_eq!(bytes[3] as usize, bytes.len() - HEADER_LEN);
    }

    #[tokio::test]
    async fn test_event_round_trip() {
        let events: &[InputEvent] = &[
            MouseMove { dx: -13, dy: 27 }.into(),
            MouseClick {
                button: MouseButton::Mouse5,
                action: MouseButtonAction::Up,
            }
            .into(),
            MouseScroll {
                direction: MouseScrollDirection::Down,
                count: 3,
            }
            .into(),
            KeyPress {
                key: KeyCode::RightCtrl,
                action: KeyAction::Repeat,
            }
            .into(),
        ];

        for event in events {
            let bytes = Frame::from_event(event).unwrap().encode().unwrap();
            let frame = decode(&bytes).await.unwrap();
            assert_eq!(frame.into_event().unwrap(), *event);
        }
    }

    #[tokio::test]
    async fn test_frame_round_trip() {
        let frame = Frame {
            tag: Tag::KeyPress,
            value: vec![7; VALUE_MAX_LENGTH as usize],
        };
        let decoded = decode(&frame.encode().unwrap()).await.unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_encode_rejects_oversized_value() {
        let frame = Frame {
            tag: Tag::KeyPress,
            value: vec![0; VALUE_MAX_LENGTH as usize + 1],
        };
        assert!(matches!(frame.encode(), Err(Error::MaxLengthExceeded)));
    }

    #[tokio::test]
    async fn test_decode_rejects_oversized_length() {
        // header declares length 1024
        let err = decode(&[0x00, 0x01, 0x04, 0x00]).await.unwrap_err();
        assert!(matches!(err, Error::MaxLengthExceeded));
    }

    #[tokio::test]
    async fn test_decode_rejects_unknown_tag() {
        let err = decode(&[0x00, 0x09, 0x00, 0x00]).await.unwrap_err();
        assert!(matches!(err, Error::UnknownTag(9)));
    }

    #[tokio::test]
    async fn test_decode_short_read() {
        let err = decode(&[0x00, 0x04, 0x00, 0x0A, 0x01, 0x02]).await.unwrap_err();
        assert!(matches!(err, Error::ShortRead));
    }

    #[tokio::test]
    async fn test_decode_empty_stream_is_closed() {
        let err = decode(&[]).await.unwrap_err();
        assert!(matches!(err, Error::Closed));
    }
}

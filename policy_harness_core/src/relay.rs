//! Conversation and formatted-message callbacks handed to the plugin.
//!
//! Both callbacks relay plugin output to the harness's standard streams.
//! Neither ever supplies input: a fuzz target has no one to answer a prompt.

use std::cell::RefCell;
use std::fmt;
use std::io::{self, Write};
use thiserror::Error;
use tracing::trace;

pub const CONV_PROMPT_ECHO_OFF: i32 = 0x0001;
pub const CONV_PROMPT_ECHO_ON: i32 = 0x0002;
pub const CONV_ERROR_MSG: i32 = 0x0003;
pub const CONV_INFO_MSG: i32 = 0x0004;
pub const CONV_PROMPT_MASK: i32 = 0x0005;
/// Flag bit; ignored once the type is masked.
pub const CONV_PROMPT_ECHO_OK: i32 = 0x1000;

const CONV_TYPE_MASK: i32 = 0xff;

/// A conversation message type with its flag bits stripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvMessageType {
    PromptEchoOff,
    PromptEchoOn,
    ErrorMsg,
    InfoMsg,
    PromptMask,
}

impl ConvMessageType {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw & CONV_TYPE_MASK {
            CONV_PROMPT_ECHO_OFF => Some(Self::PromptEchoOff),
            CONV_PROMPT_ECHO_ON => Some(Self::PromptEchoOn),
            CONV_ERROR_MSG => Some(Self::ErrorMsg),
            CONV_INFO_MSG => Some(Self::InfoMsg),
            CONV_PROMPT_MASK => Some(Self::PromptMask),
            _ => None,
        }
    }

    pub fn is_prompt(self) -> bool {
        matches!(
            self,
            Self::PromptEchoOff | Self::PromptEchoOn | Self::PromptMask
        )
    }
}

/// One message the plugin wants shown (or answered).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvMessage {
    pub msg_type: i32,
    pub timeout: i32,
    pub msg: Option<String>,
}

impl ConvMessage {
    pub fn info(msg: impl Into<String>) -> Self {
        Self {
            msg_type: CONV_INFO_MSG,
            timeout: 0,
            msg: Some(msg.into()),
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            msg_type: CONV_ERROR_MSG,
            timeout: 0,
            msg: Some(msg.into()),
        }
    }
}

/// A reply slot. The harness never fills one in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvReply {
    pub reply: Option<String>,
}

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Interactive input is not supported")]
    InputNotSupported,
    #[error("Unknown message type {0:#x}")]
    UnknownType(i32),
    #[error("Relay write failed: {0}")]
    Io(#[from] io::Error),
}

/// The conversation callback.
pub trait Conversation {
    fn converse(&self, msgs: &[ConvMessage]) -> Result<Vec<ConvReply>, RelayError>;
}

/// The formatted-message callback, keyed by the same message types.
///
/// Types other than info and error fail with `io::ErrorKind::InvalidInput`.
pub trait Printf {
    fn printf(&self, msg_type: i32, args: fmt::Arguments<'_>) -> io::Result<usize>;
}

/// Relays informational output to one writer and errors to another.
pub struct StdioRelay {
    out: RefCell<Box<dyn Write>>,
    err: RefCell<Box<dyn Write>>,
}

impl StdioRelay {
    /// Relay to the process's standard output and standard error.
    pub fn stdio() -> Self {
        Self::with_writers(io::stdout(), io::stderr())
    }

    pub fn with_writers(out: impl Write + 'static, err: impl Write + 'static) -> Self {
        Self {
            out: RefCell::new(Box::new(out)),
            err: RefCell::new(Box::new(err)),
        }
    }

    fn stream(&self, kind: ConvMessageType) -> &RefCell<Box<dyn Write>> {
        match kind {
            ConvMessageType::ErrorMsg => &self.err,
            _ => &self.out,
        }
    }
}

impl fmt::Debug for StdioRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdioRelay").finish_non_exhaustive()
    }
}

impl Conversation for StdioRelay {
    fn converse(&self, msgs: &[ConvMessage]) -> Result<Vec<ConvReply>, RelayError> {
        for msg in msgs {
            let kind =
                ConvMessageType::from_raw(msg.msg_type).ok_or(RelayError::UnknownType(msg.msg_type))?;
            if kind.is_prompt() {
                trace!(msg_type = msg.msg_type, "refusing conversation prompt");
                return Err(RelayError::InputNotSupported);
            }
            let Some(text) = msg.msg.as_deref().filter(|text| !text.is_empty()) else {
                continue;
            };
            let mut stream = self.stream(kind).borrow_mut();
            stream.write_all(text.as_bytes())?;
            stream.write_all(b"\n")?;
        }
        Ok(vec![ConvReply::default(); msgs.len()])
    }
}

impl Printf for StdioRelay {
    fn printf(&self, msg_type: i32, args: fmt::Arguments<'_>) -> io::Result<usize> {
        let kind = match ConvMessageType::from_raw(msg_type) {
            Some(kind @ (ConvMessageType::ErrorMsg | ConvMessageType::InfoMsg)) => kind,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("unsupported printf message type {msg_type:#x}"),
                ));
            }
        };
        let text = fmt::format(args);
        self.stream(kind).borrow_mut().write_all(text.as_bytes())?;
        Ok(text.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SharedBuffer;
    use pretty_assertions::assert_eq;

    fn capture() -> (StdioRelay, SharedBuffer, SharedBuffer) {
        let out = SharedBuffer::new();
        let err = SharedBuffer::new();
        (
            StdioRelay::with_writers(out.clone(), err.clone()),
            out,
            err,
        )
    }

    #[test]
    fn masks_flag_bits_when_decoding_types() {
        assert_eq!(
            ConvMessageType::from_raw(CONV_PROMPT_ECHO_ON | CONV_PROMPT_ECHO_OK),
            Some(ConvMessageType::PromptEchoOn)
        );
        assert_eq!(ConvMessageType::from_raw(0x0006), None);
        assert_eq!(ConvMessageType::from_raw(0), None);
    }

    #[test]
    fn info_goes_to_out_and_errors_to_err() {
        let (relay, out, err) = capture();
        let replies = relay
            .converse(&[ConvMessage::info("hello"), ConvMessage::error("oops")])
            .unwrap();
        assert_eq!(replies.len(), 2);
        assert!(replies.iter().all(|r| r.reply.is_none()));
        assert_eq!(out.to_string_lossy(), "hello\n");
        assert_eq!(err.to_string_lossy(), "oops\n");
    }

    #[test]
    fn empty_and_missing_messages_write_nothing() {
        let (relay, out, _err) = capture();
        let missing = ConvMessage {
            msg_type: CONV_INFO_MSG,
            timeout: 0,
            msg: None,
        };
        relay
            .converse(&[ConvMessage::info(""), missing])
            .unwrap();
        assert!(out.contents().is_empty());
    }

    #[test]
    fn prompts_are_refused() {
        let (relay, out, _err) = capture();
        for msg_type in [CONV_PROMPT_ECHO_OFF, CONV_PROMPT_ECHO_ON, CONV_PROMPT_MASK] {
            let prompt = ConvMessage {
                msg_type,
                timeout: 0,
                msg: Some("Password:".into()),
            };
            let result = relay.converse(&[ConvMessage::info("before"), prompt]);
            assert!(matches!(result, Err(RelayError::InputNotSupported)));
        }
        // Messages ahead of the prompt were still relayed.
        assert_eq!(out.to_string_lossy(), "before\n".repeat(3));
    }

    #[test]
    fn unknown_conversation_type_fails() {
        let (relay, _out, _err) = capture();
        let bogus = ConvMessage {
            msg_type: 0x42,
            timeout: 0,
            msg: Some("x".into()),
        };
        assert!(matches!(
            relay.converse(&[bogus]),
            Err(RelayError::UnknownType(0x42))
        ));
    }

    #[test]
    fn printf_relays_info_and_error() {
        let (relay, out, err) = capture();
        let written = relay
            .printf(CONV_INFO_MSG, format_args!("{} {}", "uid", 0))
            .unwrap();
        assert_eq!(written, 5);
        relay
            .printf(CONV_ERROR_MSG, format_args!("bad: {}", 7))
            .unwrap();
        assert_eq!(out.to_string_lossy(), "uid 0");
        assert_eq!(err.to_string_lossy(), "bad: 7");
    }

    #[test]
    fn printf_rejects_other_types_as_invalid_input() {
        let (relay, out, err) = capture();
        let result = relay.printf(CONV_PROMPT_ECHO_OFF, format_args!("Password:"));
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::InvalidInput);
        assert!(out.contents().is_empty());
        assert!(err.contents().is_empty());
    }
}

// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Action lists.
//!
//! The forwarding engine only interprets output actions; everything else is
//! flow-table machinery and travels through here opaquely, with only the
//! framing (8-byte alignment, embedded lengths) validated.

use crate::port::PortNo;
use crate::wire::{Reader, Truncated};

/// `OFPAT_OUTPUT` type code.
pub const ACTION_OUTPUT: u16 = 0;
/// Minimum and alignment unit of an encoded action.
pub const ACTION_ALIGN: usize = 8;

/// One action from an `ofp_action_header` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send the packet out a port, escalating at most `max_len` bytes when
    /// the port is [`PortNo::CONTROLLER`].
    Output {
        /// Destination port.
        port: PortNo,
        /// Escalation truncation for controller outputs.
        max_len: u16,
    },
    /// Any non-output action, carried for the flow-table machinery.
    Other {
        /// Raw `OFPAT_*` type code.
        kind: u16,
        /// Body bytes after the 4-byte action header.
        body: Vec<u8>,
    },
}

/// Errors decoding an action list.
#[derive(Debug, thiserror::Error)]
pub enum ActionDecodeError {
    /// List ended inside an action.
    #[error(transparent)]
    Truncated(#[from] Truncated),
    /// An embedded action length was zero, unaligned, or past the buffer.
    #[error("bad action length {0}")]
    BadLength(u16),
}

impl Action {
    /// Encoded size of this action.
    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            Action::Output { .. } => 8,
            Action::Other { body, .. } => 4 + body.len(),
        }
    }

    /// Append this action to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Action::Output { port, max_len } => {
                out.extend_from_slice(&ACTION_OUTPUT.to_be_bytes());
                out.extend_from_slice(&8u16.to_be_bytes());
                out.extend_from_slice(&port.0.to_be_bytes());
                out.extend_from_slice(&max_len.to_be_bytes());
            }
            Action::Other { kind, body } => {
                out.extend_from_slice(&kind.to_be_bytes());
                #[allow(clippy::cast_possible_truncation)] // validated on decode
                out.extend_from_slice(&((4 + body.len()) as u16).to_be_bytes());
                out.extend_from_slice(body);
            }
        }
    }

    /// Decode a whole action list.
    ///
    /// # Errors
    ///
    /// Fails when any embedded length is zero, unaligned, or runs past the
    /// end of `buf`.
    pub fn decode_list(buf: &[u8]) -> Result<Vec<Action>, ActionDecodeError> {
        let mut r = Reader::new(buf);
        let mut actions = Vec::new();
        while r.remaining() > 0 {
            let kind = r.take_u16()?;
            let len = r.take_u16()?;
            if len as usize % ACTION_ALIGN != 0 || (len as usize) < 4 {
                return Err(ActionDecodeError::BadLength(len));
            }
            let body = r.take(len as usize - 4)?;
            if kind == ACTION_OUTPUT {
                if body.len() != 4 {
                    return Err(ActionDecodeError::BadLength(len));
                }
                actions.push(Action::Output {
                    port: PortNo(u16::from_be_bytes([body[0], body[1]])),
                    max_len: u16::from_be_bytes([body[2], body[3]]),
                });
            } else {
                actions.push(Action::Other {
                    kind,
                    body: body.to_vec(),
                });
            }
        }
        Ok(actions)
    }

    /// Append a whole list to `out`.
    pub fn encode_list(actions: &[Action], out: &mut Vec<u8>) {
        for action in actions {
            action.encode(out);
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn output_round_trip() {
        let actions = vec![
            Action::Output {
                port: PortNo::CONTROLLER,
                max_len: 64,
            },
            Action::Other {
                kind: 3, // strip vlan
                body: vec![0, 0, 0, 0],
            },
        ];
        let mut out = Vec::new();
        Action::encode_list(&actions, &mut out);
        assert_eq!(out.len() % ACTION_ALIGN, 0);
        assert_eq!(Action::decode_list(&out).unwrap(), actions);
    }

    #[test]
    fn unaligned_length_is_rejected() {
        let raw = [0u8, 0, 0, 6, 0, 1];
        assert!(matches!(
            Action::decode_list(&raw),
            Err(ActionDecodeError::BadLength(6))
        ));
    }

    #[test]
    fn truncated_list_is_rejected() {
        let raw = [0u8, 0, 0, 16, 0, 1, 0, 0];
        assert!(matches!(
            Action::decode_list(&raw),
            Err(ActionDecodeError::Truncated(_))
        ));
    }
}

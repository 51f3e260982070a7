//! # Wire format
//!
//! ```text
//! Start
//! 2                         SetCount
//! S1 150.0 20.5 310.0 42.0  Coordinates of side 1
//! S1z 150.0 20.5 7.0        Coordinates of side 1 with z
//! Origin S2 0.0 600.0       base origin of side 2
//! Origin S2 0.0 600.0 -4.0  base origin of side 2 with z
//! Reset
//! Resetting
//! Exit 1
//! ```
//!
//! Encoding separates fields with one space and terminates each message with `\n`.
//! Decoding accepts any run of ASCII whitespace between fields and skips blank lines.
//! Floats use the shortest representation that parses back to the same value.
//!
//! A coordinate list carries z only when every position in it has one, marked by the
//! `z` suffix on the side tag. Otherwise z is dropped from the whole list. An origin
//! carries z whenever it has one.
//!
//! # Examples
//!
//! ```
//! use flagline::{decode, encode, Message, SideId};
//!
//! let bytes = encode(&Message::Exit { winner: SideId::new(2) });
//! assert_eq!(bytes, b"Exit 2\n");
//!
//! let decoded = decode(b"Start\n\n3\n");
//! assert_eq!(decoded, vec![Ok(Message::Start), Ok(Message::SetCount(3))]);
//! ```

use std::fmt::Write as _;

use smallvec::SmallVec;

use crate::error::DecodeError;
use crate::geometry::{Position, TokenPositions};
use crate::network::messages::Message;
use crate::{SideId, MAX_TOKENS};

/// Longest accepted line in bytes, excluding the terminator.
pub const MAX_LINE_LEN: usize = 1024;

/// Encodes one message as a `\n`-terminated line.
#[must_use]
pub fn encode(message: &Message) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(64);
    encode_into(message, &mut buffer);
    buffer
}

/// Appends the encoded line for `message` to `buffer`.
pub fn encode_into(message: &Message, buffer: &mut Vec<u8>) {
    let mut line = String::with_capacity(64);
    // Writing into a String cannot fail.
    let _ = match message {
        Message::Start => line.write_str("Start"),
        Message::SetCount(count) => write!(line, "{count}"),
        Message::Coordinates { side, positions } => {
            let depths: Option<SmallVec<[f64; MAX_TOKENS]>> =
                positions.iter().map(|p| p.z).collect();
            match depths {
                Some(depths) if !depths.is_empty() => {
                    let _ = write!(line, "S{side}z");
                    positions
                        .iter()
                        .zip(depths)
                        .try_for_each(|(p, z)| write!(line, " {:?} {:?} {z:?}", p.x, p.y))
                }
                _ => {
                    let _ = write!(line, "S{side}");
                    positions
                        .iter()
                        .try_for_each(|p| write!(line, " {:?} {:?}", p.x, p.y))
                }
            }
        }
        Message::Origin { side, origin } => match origin.z {
            Some(z) => write!(line, "Origin S{side} {:?} {:?} {z:?}", origin.x, origin.y),
            None => write!(line, "Origin S{side} {:?} {:?}", origin.x, origin.y),
        },
        Message::Reset => line.write_str("Reset"),
        Message::Resetting => line.write_str("Resetting"),
        Message::Exit { winner } => write!(line, "Exit {winner}"),
    };
    buffer.extend_from_slice(line.as_bytes());
    buffer.push(b'\n');
}

/// Decodes every line in `bytes`.
///
/// A trailing line without a terminator is decoded too. Use [`MessageDecoder`] when input
/// arrives in arbitrary chunks.
#[must_use]
pub fn decode(bytes: &[u8]) -> Vec<Result<Message, DecodeError>> {
    let mut decoder = MessageDecoder::new();
    let mut results = decoder.feed(bytes);
    results.extend(decoder.finish());
    results
}

/// Incremental decoder that buffers partial lines across reads.
///
/// A malformed line yields one error and never affects the lines after it.
#[derive(Debug, Default, Clone)]
pub struct MessageDecoder {
    buffer: Vec<u8>,
    // Bytes dropped so far from an over-long line still waiting for its terminator.
    discarding: Option<usize>,
}

impl MessageDecoder {
    /// Creates an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buffered bytes belonging to an incomplete line.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Feeds a chunk of bytes and returns the results for every line completed by it.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<Message, DecodeError>> {
        let mut results = Vec::new();
        for segment in bytes.split_inclusive(|byte| *byte == b'\n') {
            let (body, complete) = match segment.split_last() {
                Some((b'\n', body)) => (body, true),
                _ => (segment, false),
            };

            if let Some(dropped) = self.discarding.as_mut() {
                *dropped += body.len();
            } else {
                self.buffer.extend_from_slice(body);
                if self.buffer.len() > MAX_LINE_LEN {
                    self.discarding = Some(self.buffer.len());
                    self.buffer.clear();
                }
            }

            if complete {
                results.extend(self.complete_line());
            }
        }
        results
    }

    /// Decodes whatever is buffered as a final, unterminated line.
    pub fn finish(&mut self) -> Option<Result<Message, DecodeError>> {
        self.complete_line()
    }

    fn complete_line(&mut self) -> Option<Result<Message, DecodeError>> {
        if let Some(len) = self.discarding.take() {
            return Some(Err(DecodeError::LineTooLong { len }));
        }
        let result = decode_line(&self.buffer);
        self.buffer.clear();
        result
    }
}

/// Decodes one line without its terminator. Returns `None` for a blank line.
#[must_use]
pub fn decode_line(line: &[u8]) -> Option<Result<Message, DecodeError>> {
    if line.len() > MAX_LINE_LEN {
        return Some(Err(DecodeError::LineTooLong { len: line.len() }));
    }
    let Ok(text) = std::str::from_utf8(line) else {
        return Some(Err(DecodeError::InvalidUtf8));
    };
    let fields: SmallVec<[&str; 3 * MAX_TOKENS + 1]> = text.split_ascii_whitespace().collect();
    let (&keyword, rest) = fields.split_first()?;
    Some(parse_fields(text, keyword, rest))
}

fn parse_fields(text: &str, keyword: &str, rest: &[&str]) -> Result<Message, DecodeError> {
    match keyword {
        "Start" => no_fields("Start", rest).map(|()| Message::Start),
        "Reset" => no_fields("Reset", rest).map(|()| Message::Reset),
        "Resetting" => no_fields("Resetting", rest).map(|()| Message::Resetting),
        "Exit" => match rest {
            [winner] => Ok(Message::Exit {
                winner: parse_side_number(winner)?,
            }),
            _ => Err(wrong_arity("Exit", rest)),
        },
        "Origin" => match rest {
            [side, x, y] => Ok(Message::Origin {
                side: parse_side_tag(side).ok_or_else(|| invalid_number(side))??,
                origin: Position::new(parse_coordinate(x)?, parse_coordinate(y)?),
            }),
            [side, x, y, z] => Ok(Message::Origin {
                side: parse_side_tag(side).ok_or_else(|| invalid_number(side))??,
                origin: Position::with_z(
                    parse_coordinate(x)?,
                    parse_coordinate(y)?,
                    parse_coordinate(z)?,
                ),
            }),
            _ => Err(wrong_arity("Origin", rest)),
        },
        _ => {
            if let Some(side) = parse_side_tag(keyword) {
                return parse_coordinates(side?, rest);
            }
            if let Some(side) = keyword.strip_suffix('z').and_then(parse_side_tag) {
                return parse_coordinates_with_z(side?, rest);
            }
            if keyword.starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '+') {
                no_fields("SetCount", rest)?;
                let count: u64 = keyword.parse().map_err(|_| invalid_number(keyword))?;
                return u8::try_from(count)
                    .ok()
                    .filter(|n| usize::from(*n) <= MAX_TOKENS)
                    .map(Message::SetCount)
                    .ok_or(DecodeError::TokenCountOutOfRange { count });
            }
            Err(DecodeError::UnknownMessage {
                line: text.trim().to_string(),
            })
        }
    }
}

fn parse_coordinates(side: SideId, rest: &[&str]) -> Result<Message, DecodeError> {
    if rest.len() % 2 != 0 || rest.len() > 2 * MAX_TOKENS {
        return Err(wrong_arity("Coordinates", rest));
    }
    let positions = rest
        .chunks_exact(2)
        .map(|pair| match pair {
            [x, y] => Ok(Position::new(parse_coordinate(x)?, parse_coordinate(y)?)),
            _ => Err(wrong_arity("Coordinates", rest)),
        })
        .collect::<Result<TokenPositions, DecodeError>>()?;
    Ok(Message::Coordinates { side, positions })
}

fn parse_coordinates_with_z(side: SideId, rest: &[&str]) -> Result<Message, DecodeError> {
    if rest.is_empty() || rest.len() % 3 != 0 || rest.len() > 3 * MAX_TOKENS {
        return Err(wrong_arity("Coordinates", rest));
    }
    let positions = rest
        .chunks_exact(3)
        .map(|triple| match triple {
            [x, y, z] => Ok(Position::with_z(
                parse_coordinate(x)?,
                parse_coordinate(y)?,
                parse_coordinate(z)?,
            )),
            _ => Err(wrong_arity("Coordinates", rest)),
        })
        .collect::<Result<TokenPositions, DecodeError>>()?;
    Ok(Message::Coordinates { side, positions })
}

/// Recognizes an `S<digits>` tag. `None` if the token is not shaped like one.
fn parse_side_tag(token: &str) -> Option<Result<SideId, DecodeError>> {
    let digits = token.strip_prefix('S')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(parse_side_number(digits).map_err(|_| invalid_number(token)))
}

fn parse_side_number(token: &str) -> Result<SideId, DecodeError> {
    token
        .parse::<u8>()
        .map(SideId::new)
        .map_err(|_| invalid_number(token))
}

fn parse_coordinate(token: &str) -> Result<f64, DecodeError> {
    token
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| invalid_number(token))
}

fn no_fields(message: &'static str, rest: &[&str]) -> Result<(), DecodeError> {
    if rest.is_empty() {
        Ok(())
    } else {
        Err(wrong_arity(message, rest))
    }
}

fn wrong_arity(message: &'static str, rest: &[&str]) -> DecodeError {
    DecodeError::WrongArity {
        message,
        found: rest.len(),
    }
}

fn invalid_number(token: &str) -> DecodeError {
    DecodeError::InvalidNumber {
        token: token.to_string(),
    }
}

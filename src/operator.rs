//! Console prompts the operators answer before a game.
//!
//! Every prompt keeps asking until they get an acceptable answer. They are generic over
//! [`BufRead`] and [`Write`] so they can be driven from stdin/stdout or from a test buffer.
//!
//! ```
//! use flagline::operator::prompt_token_count;
//! use std::io::Cursor;
//!
//! let mut input = Cursor::new("seven\n-1\n4\n2\n");
//! let mut output = Vec::new();
//! assert_eq!(prompt_token_count(&mut input, &mut output).unwrap(), 2);
//! ```

use std::io::{self, BufRead, Write};

use tracing::debug;

use crate::{SideId, MAX_TOKENS};

/// Highest team number an operator may pick.
pub const MAX_SIDE_ID: u8 = 3;

/// Asks for the number of tokens per side until an integer in `0..=MAX_TOKENS` is entered.
pub fn prompt_token_count<R: BufRead, W: Write>(input: &mut R, output: &mut W) -> io::Result<usize> {
    let question = format!("How many tokens per side (0-{MAX_TOKENS})? ");
    prompt(input, output, &question, |value| {
        usize::try_from(value)
            .ok()
            .filter(|count| *count <= MAX_TOKENS)
            .ok_or_else(|| format!("Please enter a number between 0 and {MAX_TOKENS}."))
    })
}

/// Asks for the score needed to win until a positive integer is entered.
pub fn prompt_target_score<R: BufRead, W: Write>(input: &mut R, output: &mut W) -> io::Result<u32> {
    prompt(input, output, "What score wins the game? ", |value| {
        u32::try_from(value)
            .ok()
            .filter(|score| *score > 0)
            .ok_or_else(|| "Please enter a positive number.".to_string())
    })
}

/// Asks which team this console plays for until a number in `1..=MAX_SIDE_ID` is entered.
pub fn prompt_side_id<R: BufRead, W: Write>(input: &mut R, output: &mut W) -> io::Result<SideId> {
    let question = format!("Which team is this player on (1-{MAX_SIDE_ID})? ");
    prompt(input, output, &question, |value| {
        u8::try_from(value)
            .ok()
            .filter(|id| (1..=MAX_SIDE_ID).contains(id))
            .map(SideId::new)
            .ok_or_else(|| format!("Please enter a team between 1 and {MAX_SIDE_ID}."))
    })
}

/// Asks how far apart the two robots start until a non-negative whole number is entered.
///
/// Used to place the authority's base relative to the participant's when both are measured
/// from the same starting point.
pub fn prompt_robot_distance<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
) -> io::Result<f64> {
    prompt(
        input,
        output,
        "What is the distance between the two robots (millimetres)? ",
        |value| {
            u32::try_from(value)
                .map(f64::from)
                .map_err(|_| "The distance cannot be negative.".to_string())
        },
    )
}

fn prompt<R, W, T, F>(input: &mut R, output: &mut W, question: &str, accept: F) -> io::Result<T>
where
    R: BufRead,
    W: Write,
    F: Fn(i64) -> Result<T, String>,
{
    let mut line = String::new();
    loop {
        write!(output, "{question}")?;
        output.flush()?;

        line.clear();
        if input.read_line(&mut line)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "input closed before a valid answer was given",
            ));
        }

        let answer = line.trim();
        let rejection = match answer.parse::<i64>() {
            Ok(value) => match accept(value) {
                Ok(accepted) => return Ok(accepted),
                Err(reason) => reason,
            },
            Err(_) => "That is not a whole number.".to_string(),
        };
        debug!("Rejected operator answer {:?}", answer);
        writeln!(output, "{rejection}")?;
    }
}

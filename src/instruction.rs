//! Instructions sent to the sphere's controller, and their line encoding.
//!
//! Every instruction travels as one ASCII line:
//!
//! ```text
//! ROT <theta> <phi> <roll>
//! CALIBRATE
//! ```
//!
//! Angles are in degrees, written with one decimal.

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{line_ending, space0, space1},
    combinator::{eof, map, opt, value},
    number::complete::double,
    error::Error,
    sequence::{preceded, terminated, tuple},
    Finish, IResult,
};

use std::{
    fmt::{self, Display},
    str::FromStr,
};

use crate::orientation::Rotation;

/// Something the rig can be told to do.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Instruction {
    /// Move to an absolute orientation.
    Rot(Rotation),
    /// Run the rig's homing procedure.
    Calibrate,
}

impl Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Rot(Rotation { theta, phi, roll }) => {
                write!(f, "ROT {theta:.1} {phi:.1} {roll:.1}")
            }
            Instruction::Calibrate => write!(f, "CALIBRATE"),
        }
    }
}

impl Instruction {
    /// The instruction as it is written on the wire, newline included.
    pub fn encode(&self) -> String {
        format!("{self}\n")
    }
}

fn parse_rot(s: &str) -> IResult<&str, Instruction> {
    map(
        tuple((
            tag("ROT"),
            preceded(space1, double),
            preceded(space1, double),
            preceded(space1, double),
        )),
        |(_, theta, phi, roll)| Instruction::Rot(Rotation::new(theta, phi, roll)),
    )(s)
}

fn parse_calibrate(s: &str) -> IResult<&str, Instruction> {
    value(Instruction::Calibrate, tag("CALIBRATE"))(s)
}

fn parse_instruction(s: &str) -> IResult<&str, Instruction> {
    terminated(
        preceded(space0, alt((parse_rot, parse_calibrate))),
        tuple((space0, opt(line_ending), eof)),
    )(s)
}

impl FromStr for Instruction {
    type Err = Error<String>;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match parse_instruction(s).finish() {
            Ok((_remaining, instruction)) => Ok(instruction),
            Err(Error { input, code }) => Err(Error {
                input: input.to_string(),
                code,
            }),
        }
    }
}

//! Fixed-size program header and its binary codec.
//!
//! The header is always exactly [`HEADER_LENGTH`] bytes, little-endian,
//! laid out as:
//!
//! | offset | size | field |
//! |--------|------|----------------|
//! | 0      | 4    | signature      |
//! | 4      | 1    | major          |
//! | 5      | 1    | minor          |
//! | 6      | 1    | patch          |
//! | 7      | 1    | format version |
//! | 8      | 1    | program type   |
//! | 9      | 8    | program ID     |

use thiserror::Error;

/// Magic bytes identifying a compiled turtl binary.
pub const SIGNATURE: [u8; SIGN_LENGTH] = *b"TRTL";

/// Total encoded header length in bytes.
pub const HEADER_LENGTH: usize = 17;
/// Length of the signature field in bytes.
pub const SIGN_LENGTH: usize = 4;
/// Length of the program-ID field in bytes.
pub const PROG_ID_LENGTH: usize = 8;

/// Current toolchain version stamped into new headers.
pub const MAJOR: u8 = 0;
pub const MINOR: u8 = 1;
pub const PATCH: u8 = 0;

/// Current binary format version.
pub const FORMAT_VERSION: u8 = 0;

/// Errors produced while decoding a program header.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderError {
    /// Input is too short to contain a full header.
    #[error("program header is malformed: got {len} bytes, need {HEADER_LENGTH}")]
    Malformed { len: usize },
    /// The program-type byte is not a known [`ProgramType`].
    #[error("unknown program type: {0}")]
    UnknownProgramType(u8),
}

/// Distinguishes runnable programs from linkable libraries.
///
/// The tag is inspected before execution: a `Library` carries definitions
/// only and is rejected when passed to the VM as a top-level program.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramType {
    /// Body contains a runnable entry point.
    Execute = 0,
    /// Definitions only; loaded as a dependency, never run directly.
    Library = 1,
}

impl TryFrom<u8> for ProgramType {
    type Error = HeaderError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ProgramType::Execute),
            1 => Ok(ProgramType::Library),
            other => Err(HeaderError::UnknownProgramType(other)),
        }
    }
}

/// Decoded view of the 17-byte header prefixing every compiled program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramHeader {
    /// Magic signature; [`SIGNATURE`] for valid turtl binaries.
    pub sign: [u8; SIGN_LENGTH],
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
    /// Binary format version, independent of the toolchain version.
    pub fvers: u8,
    pub ptype: ProgramType,
    /// First [`PROG_ID_LENGTH`] bytes of the SHA3-256 digest of the body.
    pub prog_id: [u8; PROG_ID_LENGTH],
}

impl ProgramHeader {
    /// Builds a header with the current version constants, the given
    /// program type, and a zeroed program-ID region.
    ///
    /// The caller appends body bytes and stamps the ID afterwards via
    /// [`Program::set_program_id`](crate::bytecode::Program::set_program_id).
    pub fn new(ptype: ProgramType) -> Self {
        Self {
            sign: SIGNATURE,
            major: MAJOR,
            minor: MINOR,
            patch: PATCH,
            fvers: FORMAT_VERSION,
            ptype,
            prog_id: [0u8; PROG_ID_LENGTH],
        }
    }

    /// Serializes the header into its fixed little-endian layout.
    ///
    /// The result is always exactly [`HEADER_LENGTH`] bytes regardless of
    /// field values.
    pub fn encode(&self) -> [u8; HEADER_LENGTH] {
        let mut out = [0u8; HEADER_LENGTH];
        out[..SIGN_LENGTH].copy_from_slice(&self.sign);
        out[4] = self.major;
        out[5] = self.minor;
        out[6] = self.patch;
        out[7] = self.fvers;
        out[8] = self.ptype as u8;
        out[HEADER_LENGTH - PROG_ID_LENGTH..].copy_from_slice(&self.prog_id);
        out
    }

    /// Parses a header from the first [`HEADER_LENGTH`] bytes of `bytes`.
    ///
    /// Fails with [`HeaderError::Malformed`] on short input. A signature
    /// mismatch is NOT a decode failure: signature validation is caller
    /// policy (see [`has_valid_signature`](Self::has_valid_signature)),
    /// which leaves room for forward-compatibility probing.
    pub fn decode(bytes: &[u8]) -> Result<Self, HeaderError> {
        if bytes.len() < HEADER_LENGTH {
            return Err(HeaderError::Malformed { len: bytes.len() });
        }
        let mut sign = [0u8; SIGN_LENGTH];
        sign.copy_from_slice(&bytes[..SIGN_LENGTH]);
        let mut prog_id = [0u8; PROG_ID_LENGTH];
        prog_id.copy_from_slice(&bytes[HEADER_LENGTH - PROG_ID_LENGTH..HEADER_LENGTH]);
        Ok(Self {
            sign,
            major: bytes[4],
            minor: bytes[5],
            patch: bytes[6],
            fvers: bytes[7],
            ptype: ProgramType::try_from(bytes[8])?,
            prog_id,
        })
    }

    /// Whether the signature field matches the turtl magic bytes.
    pub fn has_valid_signature(&self) -> bool {
        self.sign == SIGNATURE
    }
}

//! Program byte image and content hashing.

use crate::bytecode::header::{
    HeaderError, ProgramHeader, ProgramType, HEADER_LENGTH, PROG_ID_LENGTH,
};
use sha3::{Digest, Sha3_256};

/// A complete program image: 17-byte header followed by body bytes.
///
/// Programs are created by a build step ([`ProgramBuilder`]), hashed once,
/// and immutable from then on; the VM only ever reads them. The program ID
/// in the header is the first 8 bytes of the SHA3-256 digest of the body
/// (everything after the header) and must be restamped whenever the body
/// changes. Staleness is not auto-detected; [`set_program_id`] is the
/// caller's responsibility after the body is finalized.
///
/// [`ProgramBuilder`]: crate::bytecode::ProgramBuilder
/// [`set_program_id`]: Program::set_program_id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    bytes: Vec<u8>,
}

impl Program {
    /// Creates an empty program of the given type: a fresh header with a
    /// zeroed ID region and no body.
    pub fn new(ptype: ProgramType) -> Self {
        Self {
            bytes: ProgramHeader::new(ptype).encode().to_vec(),
        }
    }

    /// Wraps raw bytes as a program, validating that a header can be
    /// decoded from the front.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, HeaderError> {
        ProgramHeader::decode(&bytes)?;
        Ok(Self { bytes })
    }

    /// Decodes the header.
    pub fn header(&self) -> Result<ProgramHeader, HeaderError> {
        ProgramHeader::decode(&self.bytes)
    }

    /// The body bytes: instructions and embedded constants.
    pub fn body(&self) -> &[u8] {
        &self.bytes[HEADER_LENGTH..]
    }

    /// Appends bytes to the body. Invalidates the program ID until
    /// [`set_program_id`](Program::set_program_id) is called again.
    pub fn extend_body(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    /// Computes the SHA3-256 digest of the body and writes its first 8
    /// bytes into the header's program-ID region.
    ///
    /// Deterministic and idempotent for an unchanged body. The ID region
    /// itself is not part of the hash input.
    pub fn set_program_id(&mut self) {
        let digest = Sha3_256::digest(&self.bytes[HEADER_LENGTH..]);
        self.bytes[HEADER_LENGTH - PROG_ID_LENGTH..HEADER_LENGTH]
            .copy_from_slice(&digest[..PROG_ID_LENGTH]);
    }

    /// The program-ID field as currently stored in the header.
    pub fn program_id(&self) -> [u8; PROG_ID_LENGTH] {
        let mut id = [0u8; PROG_ID_LENGTH];
        id.copy_from_slice(&self.bytes[HEADER_LENGTH - PROG_ID_LENGTH..HEADER_LENGTH]);
        id
    }

    /// Recomputes the body digest and compares it with the stored ID.
    pub fn verify_program_id(&self) -> bool {
        let digest = Sha3_256::digest(&self.bytes[HEADER_LENGTH..]);
        digest[..PROG_ID_LENGTH] == self.program_id()
    }

    /// The full byte image, header included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the program, returning the full byte image.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fixture from the format definition: SHA3-256 of this body starts
    /// with these 8 bytes.
    const BODY: [u8; 9] = [1, 2, 3, 4, 5, 6, 7, 8, 9];
    const BODY_ID: [u8; 8] = [218, 138, 223, 26, 251, 76, 51, 4];

    #[test]
    fn program_id_fixture() {
        let mut prog = Program::new(ProgramType::Execute);
        prog.extend_body(&BODY);
        prog.set_program_id();
        assert_eq!(prog.program_id(), BODY_ID);

        let header = prog.header().unwrap();
        assert_eq!(header.prog_id, BODY_ID);
        assert_eq!((header.major, header.minor, header.patch), (0, 1, 0));
        assert_eq!(header.fvers, 0);
    }

    #[test]
    fn set_program_id_is_idempotent() {
        let mut prog = Program::new(ProgramType::Execute);
        prog.extend_body(&BODY);
        prog.set_program_id();
        let first = prog.program_id();
        prog.set_program_id();
        assert_eq!(prog.program_id(), first);
    }

    #[test]
    fn program_id_excludes_header() {
        // Same body under a different program type hashes identically.
        let mut a = Program::new(ProgramType::Execute);
        let mut b = Program::new(ProgramType::Library);
        a.extend_body(&BODY);
        b.extend_body(&BODY);
        a.set_program_id();
        b.set_program_id();
        assert_eq!(a.program_id(), b.program_id());
    }

    #[test]
    fn verify_detects_stale_id() {
        let mut prog = Program::new(ProgramType::Execute);
        prog.extend_body(&BODY);
        prog.set_program_id();
        assert!(prog.verify_program_id());

        prog.extend_body(&[42]);
        assert!(!prog.verify_program_id());
        prog.set_program_id();
        assert!(prog.verify_program_id());
    }

    #[test]
    fn from_bytes_rejects_truncated_image() {
        assert!(matches!(
            Program::from_bytes(vec![0u8; 5]),
            Err(HeaderError::Malformed { len: 5 })
        ));
    }

    #[test]
    fn empty_body_roundtrip() {
        let prog = Program::new(ProgramType::Library);
        assert!(prog.body().is_empty());
        let reparsed = Program::from_bytes(prog.as_bytes().to_vec()).unwrap();
        assert_eq!(reparsed.header().unwrap().ptype, ProgramType::Library);
    }
}

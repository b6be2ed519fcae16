//! The linked executable image and its on-disk codec.
//!
//! Layout: `magic[8] = "CATFACE\0"`, `code_length:u64` (little-endian),
//! `code_hash:SHA-256`, then the raw code bytes. Readers verify both magic
//! and hash and reject mismatches.

use std::fmt;
use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use sha2::{Digest, Sha256};

pub const EXECUTABLE_MAGIC: [u8; 8] = *b"CATFACE\0";

/// A self-contained, linked code image runnable by the VM.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Executable {
    pub code: Vec<u8>,
}

#[derive(Debug)]
pub enum ExecutableReadError {
    UnexpectedFileEnd,
    InvalidMagic { actual: [u8; 8] },
    InvalidHash,
    Io(io::Error),
}

impl fmt::Display for ExecutableReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutableReadError::UnexpectedFileEnd => {
                write!(f, "unexpected end of executable file")
            }
            ExecutableReadError::InvalidMagic { actual } => {
                write!(f, "invalid executable magic {:02x?}", actual)
            }
            ExecutableReadError::InvalidHash => write!(f, "executable code hash mismatch"),
            ExecutableReadError::Io(e) => write!(f, "executable read failed: {}", e),
        }
    }
}

impl std::error::Error for ExecutableReadError {}

impl From<io::Error> for ExecutableReadError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            ExecutableReadError::UnexpectedFileEnd
        } else {
            ExecutableReadError::Io(e)
        }
    }
}

impl Executable {
    pub fn write(&self, writer: &mut impl Write) -> io::Result<()> {
        writer.write_all(&EXECUTABLE_MAGIC)?;
        writer.write_u64::<LittleEndian>(self.code.len() as u64)?;
        writer.write_all(Sha256::digest(&self.code).as_slice())?;
        writer.write_all(&self.code)?;
        Ok(())
    }

    pub fn read(reader: &mut impl Read) -> Result<Executable, ExecutableReadError> {
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if magic != EXECUTABLE_MAGIC {
            return Err(ExecutableReadError::InvalidMagic { actual: magic });
        }

        let code_length = reader.read_u64::<LittleEndian>()? as usize;
        let mut expected_hash = [0u8; 32];
        reader.read_exact(&mut expected_hash)?;

        let mut code = vec![0u8; code_length];
        reader.read_exact(&mut code)?;

        if Sha256::digest(&code).as_slice() != expected_hash.as_slice() {
            return Err(ExecutableReadError::InvalidHash);
        }

        Ok(Executable { code })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let exe = Executable {
            code: vec![0x2A, 0x1A, 0x06, 0x2A, 0x1A, 0x07, 0x02],
        };
        let mut buffer = Vec::new();
        exe.write(&mut buffer).unwrap();
        let read = Executable::read(&mut buffer.as_slice()).unwrap();
        assert_eq!(read, exe);
    }

    #[test]
    fn test_rejects_bad_magic() {
        let exe = Executable { code: vec![0x02] };
        let mut buffer = Vec::new();
        exe.write(&mut buffer).unwrap();
        buffer[7] = b'!';
        match Executable::read(&mut buffer.as_slice()) {
            Err(ExecutableReadError::InvalidMagic { .. }) => {}
            other => panic!("expected invalid magic, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_corrupted_code() {
        let exe = Executable {
            code: vec![0x02, 0x00, 0x01],
        };
        let mut buffer = Vec::new();
        exe.write(&mut buffer).unwrap();
        let last = buffer.len() - 1;
        buffer[last] ^= 0x55;
        match Executable::read(&mut buffer.as_slice()) {
            Err(ExecutableReadError::InvalidHash) => {}
            other => panic!("expected hash mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_truncation() {
        let exe = Executable {
            code: vec![0x02, 0x00, 0x01],
        };
        let mut buffer = Vec::new();
        exe.write(&mut buffer).unwrap();
        buffer.truncate(buffer.len() - 1);
        match Executable::read(&mut buffer.as_slice()) {
            Err(ExecutableReadError::UnexpectedFileEnd) => {}
            other => panic!("expected unexpected file end, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_code_image() {
        let exe = Executable { code: Vec::new() };
        let mut buffer = Vec::new();
        exe.write(&mut buffer).unwrap();
        let read = Executable::read(&mut buffer.as_slice()).unwrap();
        assert!(read.code.is_empty());
    }
}

//! The relocatable object model and its on-disk codec.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! magic[8] = "CATJOB\0\0"
//! name_length:  u32
//! label_count:  u32
//! link_count:   u32
//! code_length:  u32
//! data_hash:    SHA-256 over name + labels + links + code
//! body: source-file-name bytes, label records, link records, code bytes
//! ```
//!
//! A label record is `{line:u32, value:u32, is_relative:u8, pad[3],
//! name:char[64]}`; a link record is `{source_line:u32, code_offset:u32,
//! name:char[64]}`. Names hold at most 63 bytes and are NUL-padded.

use std::fmt;
use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use sha2::{Digest, Sha256};

pub const OBJECT_MAGIC: [u8; 8] = *b"CATJOB\0\0";

/// Maximum label/link name length in bytes (the record holds 64 with a
/// mandatory trailing NUL).
pub const NAME_MAX: usize = 63;

const LABEL_RECORD_SIZE: usize = 4 + 4 + 1 + 3 + 64;
const LINK_RECORD_SIZE: usize = 4 + 4 + 64;

/// A named code offset (relative) or named constant (absolute).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Label {
    pub source_line: u32,
    pub value: u32,
    pub is_relative: bool,
    pub name: String,
}

/// A 4-byte hole in code plus the symbol it refers to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Link {
    pub source_line: u32,
    pub code_offset: u32,
    pub name: String,
}

/// A relocatable compilation unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Object {
    pub source_name: String,
    pub code: Vec<u8>,
    pub labels: Vec<Label>,
    pub links: Vec<Link>,
}

#[derive(Debug)]
pub enum ObjectReadError {
    UnexpectedFileEnd,
    InvalidMagic { actual: [u8; 8] },
    InvalidHash,
    Io(io::Error),
}

impl fmt::Display for ObjectReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectReadError::UnexpectedFileEnd => write!(f, "unexpected end of object file"),
            ObjectReadError::InvalidMagic { actual } => {
                write!(f, "invalid object magic {:02x?}", actual)
            }
            ObjectReadError::InvalidHash => write!(f, "object data hash mismatch"),
            ObjectReadError::Io(e) => write!(f, "object read failed: {}", e),
        }
    }
}

impl std::error::Error for ObjectReadError {}

impl From<io::Error> for ObjectReadError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            ObjectReadError::UnexpectedFileEnd
        } else {
            ObjectReadError::Io(e)
        }
    }
}

impl Object {
    /// Serialize into `writer`. Fails if any label or link name exceeds
    /// [`NAME_MAX`] bytes.
    pub fn write(&self, writer: &mut impl Write) -> io::Result<()> {
        let body = self.encode_body()?;

        writer.write_all(&OBJECT_MAGIC)?;
        writer.write_u32::<LittleEndian>(self.source_name.len() as u32)?;
        writer.write_u32::<LittleEndian>(self.labels.len() as u32)?;
        writer.write_u32::<LittleEndian>(self.links.len() as u32)?;
        writer.write_u32::<LittleEndian>(self.code.len() as u32)?;
        writer.write_all(Sha256::digest(&body).as_slice())?;
        writer.write_all(&body)?;
        Ok(())
    }

    fn encode_body(&self) -> io::Result<Vec<u8>> {
        let mut body = Vec::with_capacity(
            self.source_name.len()
                + self.labels.len() * LABEL_RECORD_SIZE
                + self.links.len() * LINK_RECORD_SIZE
                + self.code.len(),
        );

        body.extend_from_slice(self.source_name.as_bytes());

        for label in &self.labels {
            body.write_u32::<LittleEndian>(label.source_line)?;
            body.write_u32::<LittleEndian>(label.value)?;
            body.push(label.is_relative as u8);
            body.extend_from_slice(&[0; 3]);
            body.extend_from_slice(&encode_name(&label.name)?);
        }

        for link in &self.links {
            body.write_u32::<LittleEndian>(link.source_line)?;
            body.write_u32::<LittleEndian>(link.code_offset)?;
            body.extend_from_slice(&encode_name(&link.name)?);
        }

        body.extend_from_slice(&self.code);
        Ok(body)
    }

    /// Read and verify an object. Rejects bad magic and hash mismatches.
    pub fn read(reader: &mut impl Read) -> Result<Object, ObjectReadError> {
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if magic != OBJECT_MAGIC {
            return Err(ObjectReadError::InvalidMagic { actual: magic });
        }

        let name_length = reader.read_u32::<LittleEndian>()? as usize;
        let label_count = reader.read_u32::<LittleEndian>()? as usize;
        let link_count = reader.read_u32::<LittleEndian>()? as usize;
        let code_length = reader.read_u32::<LittleEndian>()? as usize;

        let mut expected_hash = [0u8; 32];
        reader.read_exact(&mut expected_hash)?;

        let body_length = name_length
            + label_count * LABEL_RECORD_SIZE
            + link_count * LINK_RECORD_SIZE
            + code_length;
        let mut body = vec![0u8; body_length];
        reader.read_exact(&mut body)?;

        if Sha256::digest(&body).as_slice() != expected_hash.as_slice() {
            return Err(ObjectReadError::InvalidHash);
        }

        let mut cursor = &body[..];

        let mut name_bytes = vec![0u8; name_length];
        cursor.read_exact(&mut name_bytes)?;
        let source_name = String::from_utf8_lossy(&name_bytes).into_owned();

        let mut labels = Vec::with_capacity(label_count);
        for _ in 0..label_count {
            let source_line = cursor.read_u32::<LittleEndian>()?;
            let value = cursor.read_u32::<LittleEndian>()?;
            let is_relative = cursor.read_u8()? != 0;
            let mut pad = [0u8; 3];
            cursor.read_exact(&mut pad)?;
            let name = decode_name(&mut cursor)?;
            labels.push(Label {
                source_line,
                value,
                is_relative,
                name,
            });
        }

        let mut links = Vec::with_capacity(link_count);
        for _ in 0..link_count {
            let source_line = cursor.read_u32::<LittleEndian>()?;
            let code_offset = cursor.read_u32::<LittleEndian>()?;
            let name = decode_name(&mut cursor)?;
            links.push(Link {
                source_line,
                code_offset,
                name,
            });
        }

        let mut code = vec![0u8; code_length];
        cursor.read_exact(&mut code)?;

        Ok(Object {
            source_name,
            code,
            labels,
            links,
        })
    }
}

fn encode_name(name: &str) -> io::Result<[u8; 64]> {
    let bytes = name.as_bytes();
    if bytes.len() > NAME_MAX {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("name '{}' exceeds {} bytes", name, NAME_MAX),
        ));
    }
    let mut record = [0u8; 64];
    record[..bytes.len()].copy_from_slice(bytes);
    Ok(record)
}

fn decode_name(reader: &mut impl Read) -> io::Result<String> {
    let mut record = [0u8; 64];
    reader.read_exact(&mut record)?;
    let len = record.iter().position(|&b| b == 0).unwrap_or(64);
    Ok(String::from_utf8_lossy(&record[..len]).into_owned())
}

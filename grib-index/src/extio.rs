//! Extend Read and Write with some convenience methods for binary i/o
//!
use std::io::{self, Read, Write};

use unsigned_varint::{
    encode::{u64 as varint_encode_u64, u64_buffer as varint_u64_buffer},
    io::{read_u64 as varint_read_u64, ReadError},
};

pub(crate) trait ExtendedRead: Read {
    /// Read a byte from a stream
    fn read_byte(&mut self) -> io::Result<u8>;

    /// Read a Big Endian encoded 16 bit unsigned integer from a stream
    fn read_u16(&mut self) -> io::Result<u16>;

    /// Read a Big Endian encoded 32 bit signed integer from a stream
    fn read_i32(&mut self) -> io::Result<i32>;

    /// Read a Big Endian encoded 32 bit unsigned integer from a stream
    fn read_u32(&mut self) -> io::Result<u32>;

    /// Read a Big Endian encoded 64 bit unsigned integer from a stream
    fn read_u64(&mut self) -> io::Result<u64>;

    /// Read a Big Endian encoded 64 bit float from a stream
    fn read_f64(&mut self) -> io::Result<f64>;

    /// Read an unsigned LEB128 varint from a stream
    fn read_varint(&mut self) -> io::Result<u64>;

    /// Read a varint length prefixed byte string from a stream
    fn read_bytes(&mut self) -> io::Result<Vec<u8>>;

    /// Read a varint length prefixed UTF-8 string from a stream
    fn read_string(&mut self) -> io::Result<String>;
}

impl<R: Read> ExtendedRead for R {
    fn read_byte(&mut self) -> io::Result<u8> {
        let mut buffer = [0; 1];
        self.read_exact(&mut buffer)?;

        Ok(buffer[0])
    }

    fn read_u16(&mut self) -> io::Result<u16> {
        let mut buffer = [0; 2];
        self.read_exact(&mut buffer)?;

        Ok(u16::from_be_bytes(buffer))
    }

    fn read_i32(&mut self) -> io::Result<i32> {
        let mut buffer = [0; 4];
        self.read_exact(&mut buffer)?;

        Ok(i32::from_be_bytes(buffer))
    }

    fn read_u32(&mut self) -> io::Result<u32> {
        let mut buffer = [0; 4];
        self.read_exact(&mut buffer)?;

        Ok(u32::from_be_bytes(buffer))
    }

    fn read_u64(&mut self) -> io::Result<u64> {
        let mut buffer = [0; 8];
        self.read_exact(&mut buffer)?;

        Ok(u64::from_be_bytes(buffer))
    }

    fn read_f64(&mut self) -> io::Result<f64> {
        let mut buffer = [0; 8];
        self.read_exact(&mut buffer)?;

        Ok(f64::from_be_bytes(buffer))
    }

    fn read_varint(&mut self) -> io::Result<u64> {
        varint_read_u64(&mut *self).map_err(|err| match err {
            ReadError::Io(err) => err,
            err => io::Error::new(io::ErrorKind::InvalidData, err.to_string()),
        })
    }

    fn read_bytes(&mut self) -> io::Result<Vec<u8>> {
        let len = self.read_varint()?;
        let mut bytes = Vec::new();

        // Read through `take` so a corrupt length can't make us allocate the world
        (&mut *self).take(len).read_to_end(&mut bytes)?;
        if bytes.len() as u64 != len {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }

        Ok(bytes)
    }

    fn read_string(&mut self) -> io::Result<String> {
        let bytes = self.read_bytes()?;

        String::from_utf8(bytes).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }
}

pub(crate) trait ExtendedWrite: Write {
    /// Write a byte to a stream
    fn write_byte(&mut self, byte: u8) -> io::Result<()>;

    /// Write a Big Endian encoded 16 bit unsigned integer to a stream
    fn write_u16(&mut self, word: u16) -> io::Result<()>;

    /// Write a Big Endian encoded 32 bit signed integer to a stream
    fn write_i32(&mut self, word: i32) -> io::Result<()>;

    /// Write a Big Endian encoded 32 bit unsigned integer to a stream
    fn write_u32(&mut self, word: u32) -> io::Result<()>;

    /// Write a Big Endian encoded 64 bit unsigned integer to a stream
    fn write_u64(&mut self, word: u64) -> io::Result<()>;

    /// Write a Big Endian encoded 64 bit float to a stream
    fn write_f64(&mut self, word: f64) -> io::Result<()>;

    /// Write an unsigned LEB128 varint to a stream
    fn write_varint(&mut self, n: u64) -> io::Result<()>;

    /// Write a varint length prefixed byte string to a stream
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Write a varint length prefixed UTF-8 string to a stream
    fn write_str(&mut self, s: &str) -> io::Result<()>;
}

impl<W: Write> ExtendedWrite for W {
    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        self.write_all(&[byte])
    }

    fn write_u16(&mut self, word: u16) -> io::Result<()> {
        self.write_all(&word.to_be_bytes())
    }

    fn write_i32(&mut self, word: i32) -> io::Result<()> {
        self.write_all(&word.to_be_bytes())
    }

    fn write_u32(&mut self, word: u32) -> io::Result<()> {
        self.write_all(&word.to_be_bytes())
    }

    fn write_u64(&mut self, word: u64) -> io::Result<()> {
        self.write_all(&word.to_be_bytes())
    }

    fn write_f64(&mut self, word: f64) -> io::Result<()> {
        self.write_all(&word.to_be_bytes())
    }

    fn write_varint(&mut self, n: u64) -> io::Result<()> {
        let mut buffer = varint_u64_buffer();
        self.write_all(varint_encode_u64(n, &mut buffer))
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_varint(bytes.len() as u64)?;
        self.write_all(bytes)
    }

    fn write_str(&mut self, s: &str) -> io::Result<()> {
        self.write_bytes(s.as_bytes())
    }
}

/// Number of bytes `n` takes up when encoded as a varint
pub(crate) fn varint_len(n: u64) -> usize {
    let mut buffer = varint_u64_buffer();
    varint_encode_u64(n, &mut buffer).len()
}

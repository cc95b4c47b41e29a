//! Wire framing: `u64 BE length || JSON payload || u32 BE CRC-32(length || payload)`.
//! A frame whose checksum does not match is dropped rather than causing the
//! connection to be torn down on its own — that's left to the caller.

use crc::{Crc, CRC_32_ISO_HDLC};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

pub fn encode(payload: &[u8]) -> Vec<u8> {
    let len = payload.len() as u64;
    let mut digest = CRC32.digest();
    digest.update(&len.to_be_bytes());
    digest.update(payload);
    let checksum = digest.finalize();

    let mut frame = Vec::with_capacity(8 + payload.len() + 4);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    frame.extend_from_slice(&checksum.to_be_bytes());
    frame
}

#[derive(Debug)]
pub enum FrameError {
    ChecksumMismatch,
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::ChecksumMismatch => write!(f, "frame checksum mismatch"),
        }
    }
}

impl std::error::Error for FrameError {}

/// Verify `payload` against a trailing CRC read separately from the stream.
pub fn verify(len: u64, payload: &[u8], checksum: u32) -> Result<(), FrameError> {
    let mut digest = CRC32.digest();
    digest.update(&len.to_be_bytes());
    digest.update(payload);
    if digest.finalize() == checksum {
        Ok(())
    } else {
        Err(FrameError::ChecksumMismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_frame_round_trips_through_verify() {
        let payload = b"hello consensus".to_vec();
        let frame = encode(&payload);
        let len = u64::from_be_bytes(frame[0..8].try_into().unwrap());
        let body = &frame[8..8 + len as usize];
        let checksum = u32::from_be_bytes(frame[8 + len as usize..].try_into().unwrap());
        assert_eq!(body, payload.as_slice());
        assert!(verify(len, body, checksum).is_ok());
    }

    #[test]
    fn corrupted_payload_fails_verification() {
        let payload = b"hello consensus".to_vec();
        let frame = encode(&payload);
        let len = u64::from_be_bytes(frame[0..8].try_into().unwrap());
        let mut body = frame[8..8 + len as usize].to_vec();
        body[0] ^= 0xFF;
        let checksum = u32::from_be_bytes(frame[8 + len as usize..].try_into().unwrap());
        assert!(verify(len, &body, checksum).is_err());
    }
}

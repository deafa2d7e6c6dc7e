//! Salted password hash used by the lobby's login challenge
//!
//! The server hands out a salt shaped like `$H$<iter><salt1:8><salt2:8>`.
//! The client runs the portable phpass MD5 scheme over the plain password
//! with `salt1` and `2^iter` rounds, then runs it again over that encoded
//! result with `salt2` and `2^10` rounds.

use md5::{Digest, Md5};
use thiserror::Error;

const ITOA64: &[u8; 64] = b"./0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const SECOND_PASS_LOG2: u32 = 10;
const MAX_LOG2: u32 = 30;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HashError {
    #[error("salt `{0}` is too short")]
    SaltTooShort(String),

    #[error("salt `{0}` has an invalid iteration marker")]
    BadIterations(String),
}

pub fn lobby_password_hash(password: &str, salt: &str) -> Result<String, HashError> {
    let bytes = salt.as_bytes();
    if bytes.len() < 20 || !salt.is_ascii() {
        return Err(HashError::SaltTooShort(salt.to_string()));
    }

    let log2 = ITOA64
        .iter()
        .position(|&c| c == bytes[3])
        .map(|p| p as u32)
        .filter(|&p| p <= MAX_LOG2)
        .ok_or_else(|| HashError::BadIterations(salt.to_string()))?;

    let first = phpass_round(password.as_bytes(), &bytes[4..12], log2);
    Ok(phpass_round(first.as_bytes(), &bytes[12..20], SECOND_PASS_LOG2))
}

fn phpass_round(password: &[u8], salt: &[u8], log2: u32) -> String {
    let mut hash = Md5::new().chain_update(salt).chain_update(password).finalize();
    for _ in 0..(1u64 << log2) {
        hash = Md5::new().chain_update(hash).chain_update(password).finalize();
    }
    encode64(&hash)
}

fn encode64(input: &[u8]) -> String {
    let itoa = |v: u32| ITOA64[(v & 0x3f) as usize] as char;
    let count = input.len();
    let mut out = String::with_capacity(count * 4 / 3 + 2);
    let mut i = 0;

    while i < count {
        let mut value = u32::from(input[i]);
        i += 1;
        out.push(itoa(value));
        if i < count {
            value |= u32::from(input[i]) << 8;
        }
        out.push(itoa(value >> 6));
        if i >= count {
            break;
        }
        i += 1;
        if i < count {
            value |= u32::from(input[i]) << 16;
        }
        out.push(itoa(value >> 12));
        if i >= count {
            break;
        }
        i += 1;
        out.push(itoa(value >> 18));
    }
    out
}

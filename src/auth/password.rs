use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use super::AuthError;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "pbkdf2_sha256";

/// Hash a password as `pbkdf2_sha256$<rounds>$<salt hex>$<hash hex>`.
pub fn hash_password(password: &str, rounds: u32) -> Result<String, AuthError> {
    let salt = Uuid::new_v4();
    let derived = pbkdf2_sha256(password.as_bytes(), salt.as_bytes(), rounds)?;
    Ok(format!(
        "{ALGORITHM}${rounds}${}${}",
        hex::encode(salt.as_bytes()),
        hex::encode(derived)
    ))
}

/// Check a password against an encoded hash. Malformed hashes never verify.
pub fn verify_password(password: &str, encoded: &str) -> bool {
    let parts: Vec<&str> = encoded.split('$').collect();
    let [algorithm, rounds, salt, expected] = parts.as_slice() else {
        return false;
    };
    if *algorithm != ALGORITHM {
        return false;
    }
    let (Ok(rounds), Ok(salt), Ok(expected)) =
        (rounds.parse::<u32>(), hex::decode(salt), hex::decode(expected))
    else {
        return false;
    };
    match pbkdf2_sha256(password.as_bytes(), &salt, rounds) {
        Ok(derived) => constant_time_eq(&derived, &expected),
        Err(_) => false,
    }
}

/// PBKDF2-HMAC-SHA256 producing a single 32-byte block.
fn pbkdf2_sha256(password: &[u8], salt: &[u8], rounds: u32) -> Result<[u8; 32], AuthError> {
    if rounds == 0 {
        return Err(AuthError::Crypto("pbkdf2 rounds must be positive".to_string()));
    }
    let keyed = HmacSha256::new_from_slice(password).map_err(|e| AuthError::Crypto(e.to_string()))?;

    let mut block = [0u8; 32];
    let mut mac = keyed.clone();
    mac.update(salt);
    mac.update(&1u32.to_be_bytes());
    block.copy_from_slice(&mac.finalize().into_bytes());
    let mut output = block;

    for _ in 1..rounds {
        let mut mac = keyed.clone();
        mac.update(&block);
        block.copy_from_slice(&mac.finalize().into_bytes());
        for (out, b) in output.iter_mut().zip(block.iter()) {
            *out ^= b;
        }
    }
    Ok(output)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

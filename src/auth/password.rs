//! Legacy password verification.
//!
//! Stored credentials use the NTLM hash format: the password is encoded as
//! UTF-16LE, digested with MD4 and rendered as uppercase hex. There is no salt
//! and no work factor; the format is fixed by the existing account records.

use md4::{Digest, Md4};

/// Compute the uppercase hex NTLM hash of `password`.
#[must_use]
pub fn ntlm_hash(password: &str) -> String {
    let utf16le: Vec<u8> = password.encode_utf16().flat_map(u16::to_le_bytes).collect();

    let mut hasher = Md4::new();
    hasher.update(&utf16le);

    hex::encode_upper(hasher.finalize())
}

/// Check `password` against a stored hash. The comparison is case-sensitive.
#[must_use]
pub fn verify(password: &str, stored_hash: &str) -> bool {
    ntlm_hash(password) == stored_hash
}

/// Same as [`verify`] for raw request bytes.
///
/// Input that cannot be decoded as UTF-8 cannot be re-encoded as UTF-16LE and
/// is reported as a mismatch.
#[must_use]
pub fn verify_bytes(password: &[u8], stored_hash: &str) -> bool {
    std::str::from_utf8(password).is_ok_and(|password| verify(password, stored_hash))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Reference values from the NTLM test vectors.
    const PASSWORD_HASH: &str = "8846F7EAEE8FB117AD06BDD830B7586C";
    const EMPTY_HASH: &str = "31D6CFE0D16AE931B73C59D7E0C089C0";

    #[test]
    fn ntlm_hash_matches_known_vectors() {
        assert_eq!(ntlm_hash("password"), PASSWORD_HASH);
        assert_eq!(ntlm_hash(""), EMPTY_HASH);
    }

    #[test]
    fn ntlm_hash_is_uppercase_hex() {
        let hash = ntlm_hash("Sécurité-测试");
        assert_eq!(hash.len(), 32);
        assert!(hash
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn verify_accepts_matching_password() {
        assert!(verify("password", PASSWORD_HASH));
    }

    #[test]
    fn verify_is_case_sensitive_on_stored_hash() {
        assert!(!verify("password", &PASSWORD_HASH.to_lowercase()));
    }

    #[test]
    fn verify_rejects_single_bit_mutations() {
        let password = "correct horse battery staple";
        let stored = ntlm_hash(password);

        for (index, byte) in password.bytes().enumerate() {
            for bit in 0..7 {
                let mut mutated = password.as_bytes().to_vec();
                mutated[index] = byte ^ (1 << bit);
                assert!(
                    !verify_bytes(&mutated, &stored),
                    "mutation at byte {index} bit {bit} must not verify"
                );
            }
        }
    }

    #[test]
    fn verify_bytes_rejects_invalid_utf8() {
        assert!(!verify_bytes(&[0xff, 0xfe, 0x00], PASSWORD_HASH));
        assert!(verify_bytes(b"password", PASSWORD_HASH));
    }
}

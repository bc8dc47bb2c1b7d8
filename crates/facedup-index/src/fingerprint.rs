//! Source fingerprints: lowercase hex SHA-256 of the photo's filename.
//!
//! Content is not hashed, so a renamed photo gets a new fingerprint.

use sha2::{Digest, Sha256};

pub fn of(filename: &str) -> String {
    format!("{:x}", Sha256::digest(filename.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_sha256_hex() {
        assert_eq!(
            of("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_fingerprint_depends_on_name_only() {
        assert_eq!(of("IMG_0001.jpg"), of("IMG_0001.jpg"));
        assert_ne!(of("IMG_0001.jpg"), of("img_0001.jpg"));
    }
}

use aes::Aes128;
use cbc::cipher::{
    block_padding::{NoPadding, Pkcs7},
    BlockDecryptMut, BlockEncryptMut, KeyIvInit,
};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// AES-128 key length in bytes.
pub const KEY_LEN: usize = 16;
/// AES block size; also the IV length.
pub const BLOCK_SIZE: usize = 16;

/// Why a ciphertext/IV pair was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CiphertextFault {
    #[error("invalid IV length: {0}")]
    IvLength(usize),
    #[error("ciphertext is empty")]
    Empty,
    #[error("ciphertext length {0} is not a multiple of block size")]
    NotBlockAligned(usize),
    /// Final pad byte is 0 or larger than a block.
    #[error("invalid padding byte {0:#04x}")]
    PaddingByte(u8),
    /// Pad bytes disagree with the pad value.
    #[error("inconsistent padding")]
    InconsistentPadding,
}

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("encryption key must be exactly {KEY_LEN} bytes, got {len}")]
    InvalidKey { len: usize },
    #[error("invalid ciphertext: {0}")]
    InvalidCiphertext(CiphertextFault),
    #[error("random source unavailable: {0}")]
    Rng(String),
}

#[derive(Zeroize, ZeroizeOnDrop)]
struct CipherKey([u8; KEY_LEN]);

/// AES-128-CBC with PKCS#7 padding and a fresh random IV per encryption.
pub struct Cipher {
    key: CipherKey,
}

impl Cipher {
    /// Build a cipher from raw key bytes. Anything but 16 bytes is refused.
    pub fn new(key: &[u8]) -> Result<Self, CipherError> {
        let key: [u8; KEY_LEN] = key
            .try_into()
            .map_err(|_| CipherError::InvalidKey { len: key.len() })?;
        Ok(Self {
            key: CipherKey(key),
        })
    }

    /// Encrypt `plaintext`, returning `(ciphertext, nonce)`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<(Vec<u8>, [u8; BLOCK_SIZE]), CipherError> {
        let mut nonce = [0u8; BLOCK_SIZE];
        OsRng
            .try_fill_bytes(&mut nonce)
            .map_err(|e| CipherError::Rng(e.to_string()))?;
        Ok((self.encrypt_with_nonce(plaintext, nonce), nonce))
    }

    /// Deterministic encryption under a caller-supplied IV.
    pub fn encrypt_with_nonce(&self, plaintext: &[u8], nonce: [u8; BLOCK_SIZE]) -> Vec<u8> {
        Aes128CbcEnc::new(&self.key.0.into(), &nonce.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
    }

    /// Decrypt `ciphertext` with `nonce` and strip the PKCS#7 padding.
    pub fn decrypt(&self, ciphertext: &[u8], nonce: &[u8]) -> Result<Vec<u8>, CipherError> {
        let nonce: [u8; BLOCK_SIZE] = nonce
            .try_into()
            .map_err(|_| invalid(CiphertextFault::IvLength(nonce.len())))?;
        if ciphertext.is_empty() {
            return Err(invalid(CiphertextFault::Empty));
        }
        if ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(invalid(CiphertextFault::NotBlockAligned(ciphertext.len())));
        }

        // Padding is checked by hand so each failure keeps its own fault.
        let padded = Aes128CbcDec::new(&self.key.0.into(), &nonce.into())
            .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
            .map_err(|_| invalid(CiphertextFault::NotBlockAligned(ciphertext.len())))?;

        strip_padding(padded)
    }
}

fn invalid(fault: CiphertextFault) -> CipherError {
    CipherError::InvalidCiphertext(fault)
}

fn strip_padding(mut data: Vec<u8>) -> Result<Vec<u8>, CipherError> {
    let pad = *data.last().ok_or(invalid(CiphertextFault::Empty))?;
    if pad == 0 || usize::from(pad) > BLOCK_SIZE {
        data.zeroize();
        return Err(invalid(CiphertextFault::PaddingByte(pad)));
    }
    let start = data.len() - usize::from(pad);
    if data[start..].iter().any(|&b| b != pad) {
        data.zeroize();
        return Err(invalid(CiphertextFault::InconsistentPadding));
    }
    data.truncate(start);
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 16] = *b"0123456789abcdef";

    fn cipher() -> Cipher {
        Cipher::new(&KEY).unwrap()
    }

    /// Encrypt one raw block with no padding so the decrypted tail is whatever we choose.
    fn raw_block(block: [u8; 16], iv: [u8; 16]) -> Vec<u8> {
        Aes128CbcEnc::new(&KEY.into(), &iv.into()).encrypt_padded_vec_mut::<NoPadding>(&block)
    }

    #[test]
    fn round_trip() {
        let c = cipher();
        for len in [0usize, 1, 15, 16, 17, 31, 32, 100, 4096] {
            let plaintext: Vec<u8> = (0..len).map(|i| (i * 7 % 251) as u8).collect();
            let (ct, nonce) = c.encrypt(&plaintext).unwrap();
            assert_eq!(ct.len() % BLOCK_SIZE, 0);
            assert!(ct.len() > plaintext.len());
            assert_eq!(c.decrypt(&ct, &nonce).unwrap(), plaintext);
        }
    }

    #[test]
    fn key_length_is_enforced() {
        for len in [0usize, 15, 17, 24, 32] {
            let key = vec![7u8; len];
            assert!(matches!(
                Cipher::new(&key),
                Err(CipherError::InvalidKey { len: l }) if l == len
            ));
        }
    }

    #[test]
    fn nist_cbc_aes128_first_block() {
        // NIST SP 800-38A, F.2.1 CBC-AES128.Encrypt, block #1.
        let key = hex::decode("2b7e151628aed2a6abf7158809cf4f3c").unwrap();
        let iv: [u8; 16] = hex::decode("000102030405060708090a0b0c0d0e0f")
            .unwrap()
            .try_into()
            .unwrap();
        let plaintext = hex::decode("6bc1bee22e409f96e93d7e117393172a").unwrap();

        let c = Cipher::new(&key).unwrap();
        let ct = c.encrypt_with_nonce(&plaintext, iv);

        // A full block of PKCS#7 padding follows the aligned plaintext.
        assert_eq!(ct.len(), 32);
        assert_eq!(hex::encode(&ct[..16]), "7649abac8119b246cee98e9b12e9197d");
        assert_eq!(c.decrypt(&ct, &iv).unwrap(), plaintext);
    }

    #[test]
    fn deterministic_for_same_nonce() {
        let c = cipher();
        let nonce = [9u8; 16];
        assert_eq!(
            c.encrypt_with_nonce(b"same input", nonce),
            c.encrypt_with_nonce(b"same input", nonce)
        );
    }

    #[test]
    fn fresh_nonce_per_encryption() {
        let c = cipher();
        let (ct1, n1) = c.encrypt(b"hello").unwrap();
        let (ct2, n2) = c.encrypt(b"hello").unwrap();
        assert_ne!(n1, n2);
        assert_ne!(ct1, ct2);
    }

    #[test]
    fn rejects_bad_iv_length() {
        let c = cipher();
        let (ct, _) = c.encrypt(b"x").unwrap();
        for len in [0usize, 8, 15, 17, 32] {
            let err = c.decrypt(&ct, &vec![0u8; len]).unwrap_err();
            assert!(matches!(
                err,
                CipherError::InvalidCiphertext(CiphertextFault::IvLength(l)) if l == len
            ));
        }
    }

    #[test]
    fn rejects_unaligned_and_empty_ciphertext() {
        let c = cipher();
        let (ct, nonce) = c.encrypt(b"some secret").unwrap();
        let err = c.decrypt(&ct[..ct.len() - 1], &nonce).unwrap_err();
        assert!(matches!(
            err,
            CipherError::InvalidCiphertext(CiphertextFault::NotBlockAligned(15))
        ));
        let err = c.decrypt(&[], &nonce).unwrap_err();
        assert!(matches!(
            err,
            CipherError::InvalidCiphertext(CiphertextFault::Empty)
        ));
    }

    #[test]
    fn rejects_zero_padding_byte() {
        let iv = [3u8; 16];
        let mut block = [0x41u8; 16];
        block[15] = 0;
        let err = cipher().decrypt(&raw_block(block, iv), &iv).unwrap_err();
        assert!(matches!(
            err,
            CipherError::InvalidCiphertext(CiphertextFault::PaddingByte(0))
        ));
    }

    #[test]
    fn rejects_oversized_padding_byte() {
        let iv = [4u8; 16];
        for pad in [17u8, 32, 0xff] {
            let block = [pad; 16];
            let err = cipher().decrypt(&raw_block(block, iv), &iv).unwrap_err();
            assert!(matches!(
                err,
                CipherError::InvalidCiphertext(CiphertextFault::PaddingByte(p)) if p == pad
            ));
        }
    }

    #[test]
    fn fault_messages() {
        let err = CipherError::InvalidCiphertext(CiphertextFault::PaddingByte(0x11));
        assert_eq!(err.to_string(), "invalid ciphertext: invalid padding byte 0x11");
        assert_eq!(
            CiphertextFault::NotBlockAligned(15).to_string(),
            "ciphertext length 15 is not a multiple of block size"
        );
    }

    #[test]
    fn rejects_inconsistent_padding() {
        let iv = [5u8; 16];
        // Claims 4 bytes of padding but one of them differs.
        let mut block = [0x41u8; 16];
        block[12..].copy_from_slice(&[4, 4, 3, 4]);
        let err = cipher().decrypt(&raw_block(block, iv), &iv).unwrap_err();
        assert!(matches!(
            err,
            CipherError::InvalidCiphertext(CiphertextFault::InconsistentPadding)
        ));
    }

    #[test]
    fn wrong_key_never_panics() {
        let (ct, nonce) = cipher().encrypt(b"secret payload").unwrap();
        let other = Cipher::new(b"fedcba9876543210").unwrap();
        // Either a padding fault or garbage; never the original plaintext.
        match other.decrypt(&ct, &nonce) {
            Ok(pt) => assert_ne!(pt, b"secret payload"),
            Err(e) => assert!(matches!(e, CipherError::InvalidCiphertext(_))),
        }
    }
}

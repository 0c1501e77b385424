//! Cipher suite implementations using RustCrypto.

use aes::{Aes128, Aes256};
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, InnerIvInit};

use crate::buffer::Buf;
use crate::crypto::provider::{BlockCipher, BulkCipher, Cipher, SupportedCipherSuite};
use crate::types::{CipherSuite, HashAlgorithm};

/// AES-GCM cipher.
enum AesGcm {
    Aes128(Box<Aes128Gcm>),
    Aes256(Box<Aes256Gcm>),
}

impl std::fmt::Debug for AesGcm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AesGcm::Aes128(_) => f.debug_tuple("AesGcm::Aes128").finish(),
            AesGcm::Aes256(_) => f.debug_tuple("AesGcm::Aes256").finish(),
        }
    }
}

impl AesGcm {
    fn new(key: &[u8]) -> Result<Self, String> {
        match key.len() {
            16 => Aes128Gcm::new_from_slice(key)
                .map(|c| AesGcm::Aes128(Box::new(c)))
                .map_err(|_| "AES-128-GCM key".to_string()),
            32 => Aes256Gcm::new_from_slice(key)
                .map(|c| AesGcm::Aes256(Box::new(c)))
                .map_err(|_| "AES-256-GCM key".to_string()),
            _ => Err(format!("Invalid key size for AES-GCM: {}", key.len())),
        }
    }
}

impl Cipher for AesGcm {
    fn encrypt(&self, data: &mut Buf, aad: &[u8], nonce: &[u8; 12]) -> Result<(), String> {
        let nonce = Nonce::from_slice(nonce);
        let result = match self {
            AesGcm::Aes128(cipher) => cipher.encrypt_in_place(nonce, aad, data),
            AesGcm::Aes256(cipher) => cipher.encrypt_in_place(nonce, aad, data),
        };
        result.map_err(|_| "AES-GCM encryption failed".to_string())
    }

    fn decrypt(&self, data: &mut Buf, aad: &[u8], nonce: &[u8; 12]) -> Result<(), String> {
        if data.len() < 16 {
            return Err(format!("Ciphertext too short: {}", data.len()));
        }
        let nonce = Nonce::from_slice(nonce);
        let result = match self {
            AesGcm::Aes128(cipher) => cipher.decrypt_in_place(nonce, aad, data),
            AesGcm::Aes256(cipher) => cipher.decrypt_in_place(nonce, aad, data),
        };
        result.map_err(|_| "AES-GCM decryption failed".to_string())
    }
}

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// AES in CBC mode. The key schedule is expanded once and wiped on drop.
enum AesCbc {
    Aes128(Box<Aes128>),
    Aes256(Box<Aes256>),
}

impl std::fmt::Debug for AesCbc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AesCbc::Aes128(_) => f.debug_tuple("AesCbc::Aes128").finish(),
            AesCbc::Aes256(_) => f.debug_tuple("AesCbc::Aes256").finish(),
        }
    }
}

impl AesCbc {
    fn new(key: &[u8]) -> Result<Self, String> {
        match key.len() {
            16 => Aes128::new_from_slice(key)
                .map(|c| AesCbc::Aes128(Box::new(c)))
                .map_err(|_| "AES-128 key".to_string()),
            32 => Aes256::new_from_slice(key)
                .map(|c| AesCbc::Aes256(Box::new(c)))
                .map_err(|_| "AES-256 key".to_string()),
            _ => Err(format!("Invalid key size for AES-CBC: {}", key.len())),
        }
    }
}

// TLS padding is applied and checked by the record transform, so the
// mode itself runs with NoPadding over whole blocks.
impl BlockCipher for AesCbc {
    fn encrypt_cbc(&self, iv: &[u8], data: &mut [u8]) -> Result<(), String> {
        let len = data.len();
        let iv_err = |_| format!("Invalid IV length: {}", iv.len());
        let result = match self {
            AesCbc::Aes128(c) => Aes128CbcEnc::inner_iv_slice_init((**c).clone(), iv)
                .map_err(iv_err)?
                .encrypt_padded_mut::<NoPadding>(data, len)
                .map(|_| ()),
            AesCbc::Aes256(c) => Aes256CbcEnc::inner_iv_slice_init((**c).clone(), iv)
                .map_err(iv_err)?
                .encrypt_padded_mut::<NoPadding>(data, len)
                .map(|_| ()),
        };
        result.map_err(|_| format!("Data not block aligned: {}", len))
    }

    fn decrypt_cbc(&self, iv: &[u8], data: &mut [u8]) -> Result<(), String> {
        let len = data.len();
        let iv_err = |_| format!("Invalid IV length: {}", iv.len());
        let result = match self {
            AesCbc::Aes128(c) => Aes128CbcDec::inner_iv_slice_init((**c).clone(), iv)
                .map_err(iv_err)?
                .decrypt_padded_mut::<NoPadding>(data)
                .map(|_| ()),
            AesCbc::Aes256(c) => Aes256CbcDec::inner_iv_slice_init((**c).clone(), iv)
                .map_err(iv_err)?
                .decrypt_padded_mut::<NoPadding>(data)
                .map(|_| ()),
        };
        result.map_err(|_| format!("Data not block aligned: {}", len))
    }
}

/// Raw AES-CBC for callers outside the record layer.
pub(crate) fn aes_cbc(key: &[u8]) -> Result<Box<dyn BlockCipher>, String> {
    Ok(Box::new(AesCbc::new(key)?))
}

/// Static description of one suite: which bulk cipher, which key sizes.
#[derive(Debug)]
struct Suite {
    suite: CipherSuite,
    aead: bool,
    mac_key_len: usize,
    enc_key_len: usize,
}

impl SupportedCipherSuite for Suite {
    fn suite(&self) -> CipherSuite {
        self.suite
    }

    fn hash_algorithm(&self) -> HashAlgorithm {
        self.suite.hash_algorithm()
    }

    fn key_lengths(&self) -> (usize, usize, usize) {
        if self.aead {
            (0, self.enc_key_len, 4)
        } else {
            (self.mac_key_len, self.enc_key_len, 16)
        }
    }

    fn create_cipher(&self, key: &[u8]) -> Result<BulkCipher, String> {
        if key.len() != self.enc_key_len {
            return Err(format!(
                "{:?} expects a {} byte key, got {}",
                self.suite,
                self.enc_key_len,
                key.len()
            ));
        }
        if self.aead {
            Ok(BulkCipher::Aead(Box::new(AesGcm::new(key)?)))
        } else {
            Ok(BulkCipher::Block(Box::new(AesCbc::new(key)?)))
        }
    }
}

static ECDHE_ECDSA_AES128_GCM_SHA256: Suite = Suite {
    suite: CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256,
    aead: true,
    mac_key_len: 0,
    enc_key_len: 16,
};

static ECDHE_ECDSA_AES256_GCM_SHA384: Suite = Suite {
    suite: CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384,
    aead: true,
    mac_key_len: 0,
    enc_key_len: 32,
};

static ECDHE_ECDSA_AES128_CBC_SHA256: Suite = Suite {
    suite: CipherSuite::ECDHE_ECDSA_AES128_CBC_SHA256,
    aead: false,
    mac_key_len: 32,
    enc_key_len: 16,
};

static ECDHE_ECDSA_AES256_CBC_SHA384: Suite = Suite {
    suite: CipherSuite::ECDHE_ECDSA_AES256_CBC_SHA384,
    aead: false,
    mac_key_len: 48,
    enc_key_len: 32,
};

static PSK_AES128_GCM_SHA256: Suite = Suite {
    suite: CipherSuite::PSK_AES128_GCM_SHA256,
    aead: true,
    mac_key_len: 0,
    enc_key_len: 16,
};

static PSK_AES256_GCM_SHA384: Suite = Suite {
    suite: CipherSuite::PSK_AES256_GCM_SHA384,
    aead: true,
    mac_key_len: 0,
    enc_key_len: 32,
};

static ECDHE_PSK_AES128_CBC_SHA256: Suite = Suite {
    suite: CipherSuite::ECDHE_PSK_AES128_CBC_SHA256,
    aead: false,
    mac_key_len: 32,
    enc_key_len: 16,
};

pub(super) static ALL_CIPHER_SUITES: &[&dyn SupportedCipherSuite] = &[
    &ECDHE_ECDSA_AES128_GCM_SHA256,
    &ECDHE_ECDSA_AES256_GCM_SHA384,
    &ECDHE_ECDSA_AES128_CBC_SHA256,
    &ECDHE_ECDSA_AES256_CBC_SHA384,
    &PSK_AES128_GCM_SHA256,
    &PSK_AES256_GCM_SHA384,
    &ECDHE_PSK_AES128_CBC_SHA256,
];

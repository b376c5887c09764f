//! Cipher suite registry, key derivation and XOR-stream crypters
//!
//! The registry is a closed set of stream ciphers keyed by method name. A
//! [`Cipher`] owns only the passphrase-derived key; per-direction keystream
//! state lives in the crypters handed out by [`Cipher::encryptor`] /
//! [`Cipher::decryptor`], so a cloned `Cipher` never shares IVs between
//! connections.

use crate::{Error, Result};
use cipher::{KeyInit, KeyIvInit, StreamCipher};
use md5::{Digest, Md5};

type Aes128CfbEnc = cfb_mode::BufEncryptor<aes::Aes128>;
type Aes128CfbDec = cfb_mode::BufDecryptor<aes::Aes128>;
type Aes192CfbEnc = cfb_mode::BufEncryptor<aes::Aes192>;
type Aes192CfbDec = cfb_mode::BufDecryptor<aes::Aes192>;
type Aes256CfbEnc = cfb_mode::BufEncryptor<aes::Aes256>;
type Aes256CfbDec = cfb_mode::BufDecryptor<aes::Aes256>;
type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;
type Aes192Ctr = ctr::Ctr128BE<aes::Aes192>;
type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;
type Rc4 = rc4::Rc4<rc4::consts::U16>;

/// Keystream direction. AES-CFB needs to know which side it is on; the
/// counter and RC4 based methods do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

/// Supported cipher method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherKind {
    Aes128Cfb,
    Aes192Cfb,
    Aes256Cfb,
    Aes128Ctr,
    Aes192Ctr,
    Aes256Ctr,
    Rc4Md5,
    ChaCha20,
    ChaCha20Ietf,
}

/// Every method in the registry, in declaration order
pub const METHODS: [CipherKind; 9] = [
    CipherKind::Aes128Cfb,
    CipherKind::Aes192Cfb,
    CipherKind::Aes256Cfb,
    CipherKind::Aes128Ctr,
    CipherKind::Aes192Ctr,
    CipherKind::Aes256Ctr,
    CipherKind::Rc4Md5,
    CipherKind::ChaCha20,
    CipherKind::ChaCha20Ietf,
];

impl CipherKind {
    pub fn key_len(&self) -> usize {
        match self {
            CipherKind::Aes128Cfb | CipherKind::Aes128Ctr | CipherKind::Rc4Md5 => 16,
            CipherKind::Aes192Cfb | CipherKind::Aes192Ctr => 24,
            CipherKind::Aes256Cfb | CipherKind::Aes256Ctr => 32,
            CipherKind::ChaCha20 | CipherKind::ChaCha20Ietf => 32,
        }
    }

    pub fn iv_len(&self) -> usize {
        match self {
            CipherKind::ChaCha20 => 8,
            CipherKind::ChaCha20Ietf => 12,
            _ => 16,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CipherKind::Aes128Cfb => "aes-128-cfb",
            CipherKind::Aes192Cfb => "aes-192-cfb",
            CipherKind::Aes256Cfb => "aes-256-cfb",
            CipherKind::Aes128Ctr => "aes-128-ctr",
            CipherKind::Aes192Ctr => "aes-192-ctr",
            CipherKind::Aes256Ctr => "aes-256-ctr",
            CipherKind::Rc4Md5 => "rc4-md5",
            CipherKind::ChaCha20 => "chacha20",
            CipherKind::ChaCha20Ietf => "chacha20-ietf",
        }
    }
}

impl TryFrom<&str> for CipherKind {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "aes-128-cfb" => Ok(CipherKind::Aes128Cfb),
            "aes-192-cfb" => Ok(CipherKind::Aes192Cfb),
            "aes-256-cfb" => Ok(CipherKind::Aes256Cfb),
            "aes-128-ctr" => Ok(CipherKind::Aes128Ctr),
            "aes-192-ctr" => Ok(CipherKind::Aes192Ctr),
            "aes-256-ctr" => Ok(CipherKind::Aes256Ctr),
            "rc4-md5" => Ok(CipherKind::Rc4Md5),
            "chacha20" => Ok(CipherKind::ChaCha20),
            "chacha20-ietf" => Ok(CipherKind::ChaCha20Ietf),
            _ => Err(Error::crypto(format!("unsupported crypto method: {}", s))),
        }
    }
}

/// Derive a key of `key_len` bytes from a passphrase with iterated MD5
/// (EVP_BytesToKey without a salt, compatible with the classic tooling).
pub fn derive_key(password: &str, key_len: usize) -> Vec<u8> {
    let mut key = Vec::with_capacity(key_len);
    let mut prev: Vec<u8> = Vec::new();

    while key.len() < key_len {
        let mut hasher = Md5::new();
        hasher.update(&prev);
        hasher.update(password.as_bytes());
        prev = hasher.finalize().to_vec();
        key.extend_from_slice(&prev);
    }

    key.truncate(key_len);
    key
}

/// A keyed XOR-stream for one direction of one connection
pub enum StreamCrypter {
    Aes128CfbEnc(Aes128CfbEnc),
    Aes128CfbDec(Aes128CfbDec),
    Aes192CfbEnc(Aes192CfbEnc),
    Aes192CfbDec(Aes192CfbDec),
    Aes256CfbEnc(Aes256CfbEnc),
    Aes256CfbDec(Aes256CfbDec),
    Aes128Ctr(Aes128Ctr),
    Aes192Ctr(Aes192Ctr),
    Aes256Ctr(Aes256Ctr),
    Rc4Md5(Rc4),
    ChaCha20(chacha20::ChaCha20Legacy),
    ChaCha20Ietf(chacha20::ChaCha20),
}

impl StreamCrypter {
    /// XOR the keystream over `data` in place. Input and output lengths are
    /// equal by construction.
    pub fn apply(&mut self, data: &mut [u8]) {
        match self {
            StreamCrypter::Aes128CfbEnc(c) => c.encrypt(data),
            StreamCrypter::Aes128CfbDec(c) => c.decrypt(data),
            StreamCrypter::Aes192CfbEnc(c) => c.encrypt(data),
            StreamCrypter::Aes192CfbDec(c) => c.decrypt(data),
            StreamCrypter::Aes256CfbEnc(c) => c.encrypt(data),
            StreamCrypter::Aes256CfbDec(c) => c.decrypt(data),
            StreamCrypter::Aes128Ctr(c) => c.apply_keystream(data),
            StreamCrypter::Aes192Ctr(c) => c.apply_keystream(data),
            StreamCrypter::Aes256Ctr(c) => c.apply_keystream(data),
            StreamCrypter::Rc4Md5(c) => c.apply_keystream(data),
            StreamCrypter::ChaCha20(c) => c.apply_keystream(data),
            StreamCrypter::ChaCha20Ietf(c) => c.apply_keystream(data),
        }
    }
}

/// Passphrase-derived cipher state shared by both endpoints of a tunnel.
///
/// Cloning yields an independent cipher with the same key and no keystream
/// state; every connection derives its own IVs.
#[derive(Clone, Debug)]
pub struct Cipher {
    kind: CipherKind,
    key: Vec<u8>,
}

impl Cipher {
    pub fn new(method: &str, password: &str) -> Result<Self> {
        if password.is_empty() {
            return Err(Error::crypto("empty password"));
        }
        let kind = CipherKind::try_from(method)?;
        let key = derive_key(password, kind.key_len());
        Ok(Cipher { kind, key })
    }

    pub fn kind(&self) -> CipherKind {
        self.kind
    }

    pub fn encryptor(&self, iv: &[u8]) -> Result<StreamCrypter> {
        self.new_crypter(iv, Direction::Encrypt)
    }

    pub fn decryptor(&self, iv: &[u8]) -> Result<StreamCrypter> {
        self.new_crypter(iv, Direction::Decrypt)
    }

    fn new_crypter(&self, iv: &[u8], direction: Direction) -> Result<StreamCrypter> {
        if iv.len() != self.kind.iv_len() {
            return Err(Error::crypto(format!(
                "{}: IV length {} != {}",
                self.kind.name(),
                iv.len(),
                self.kind.iv_len()
            )));
        }

        let bad_len = |_| Error::crypto("invalid key or IV length");
        let crypter = match (self.kind, direction) {
            (CipherKind::Aes128Cfb, Direction::Encrypt) => StreamCrypter::Aes128CfbEnc(
                Aes128CfbEnc::new_from_slices(&self.key, iv).map_err(bad_len)?,
            ),
            (CipherKind::Aes128Cfb, Direction::Decrypt) => StreamCrypter::Aes128CfbDec(
                Aes128CfbDec::new_from_slices(&self.key, iv).map_err(bad_len)?,
            ),
            (CipherKind::Aes192Cfb, Direction::Encrypt) => StreamCrypter::Aes192CfbEnc(
                Aes192CfbEnc::new_from_slices(&self.key, iv).map_err(bad_len)?,
            ),
            (CipherKind::Aes192Cfb, Direction::Decrypt) => StreamCrypter::Aes192CfbDec(
                Aes192CfbDec::new_from_slices(&self.key, iv).map_err(bad_len)?,
            ),
            (CipherKind::Aes256Cfb, Direction::Encrypt) => StreamCrypter::Aes256CfbEnc(
                Aes256CfbEnc::new_from_slices(&self.key, iv).map_err(bad_len)?,
            ),
            (CipherKind::Aes256Cfb, Direction::Decrypt) => StreamCrypter::Aes256CfbDec(
                Aes256CfbDec::new_from_slices(&self.key, iv).map_err(bad_len)?,
            ),
            (CipherKind::Aes128Ctr, _) => StreamCrypter::Aes128Ctr(
                Aes128Ctr::new_from_slices(&self.key, iv).map_err(bad_len)?,
            ),
            (CipherKind::Aes192Ctr, _) => StreamCrypter::Aes192Ctr(
                Aes192Ctr::new_from_slices(&self.key, iv).map_err(bad_len)?,
            ),
            (CipherKind::Aes256Ctr, _) => StreamCrypter::Aes256Ctr(
                Aes256Ctr::new_from_slices(&self.key, iv).map_err(bad_len)?,
            ),
            (CipherKind::Rc4Md5, _) => {
                // The session key mixes the IV into the RC4 key schedule.
                let mut hasher = Md5::new();
                hasher.update(&self.key);
                hasher.update(iv);
                let session_key = hasher.finalize();
                StreamCrypter::Rc4Md5(Rc4::new_from_slice(&session_key).map_err(bad_len)?)
            }
            (CipherKind::ChaCha20, _) => StreamCrypter::ChaCha20(
                chacha20::ChaCha20Legacy::new_from_slices(&self.key, iv).map_err(bad_len)?,
            ),
            (CipherKind::ChaCha20Ietf, _) => StreamCrypter::ChaCha20Ietf(
                chacha20::ChaCha20::new_from_slices(&self.key, iv).map_err(bad_len)?,
            ),
        };
        Ok(crypter)
    }
}

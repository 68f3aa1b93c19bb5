use core::convert::From;

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockSizeUser, Key, Unsigned};
use cbc::cipher::{BlockEncryptMut, KeyIvInit};
use crypto_common::{IvSizeUser, KeySizeUser, OutputSizeUser};
use hmac::{Hmac, Mac};
use rand_core::CryptoRngCore;
use sha2::Sha256;

use crate::error::RnsError;

#[cfg(feature = "fernet-aes128")]
type AesAlgo = aes::Aes128;
#[cfg(not(feature = "fernet-aes128"))]
type AesAlgo = aes::Aes256;

type AesCbcEnc = cbc::Encryptor<AesAlgo>;
type AesCbcDec = cbc::Decryptor<AesAlgo>;
type AesKey = Key<AesAlgo>;

type HmacSha256 = Hmac<Sha256>;

const HMAC_OUT_SIZE: usize = <<HmacSha256 as OutputSizeUser>::OutputSize as Unsigned>::USIZE;
const AES_KEY_SIZE: usize = <<AesAlgo as KeySizeUser>::KeySize as Unsigned>::USIZE;
const IV_SIZE: usize = <<AesCbcEnc as IvSizeUser>::IvSize as Unsigned>::USIZE;
const AES_BLOCK_SIZE: usize = <<AesAlgo as BlockSizeUser>::BlockSize as Unsigned>::USIZE;

pub const FERNET_OVERHEAD_SIZE: usize = IV_SIZE + HMAC_OUT_SIZE;
pub const FERNET_MAX_PADDING_SIZE: usize = AES_BLOCK_SIZE;

pub struct PlainText<'a>(&'a [u8]);
pub struct Token<'a>(&'a [u8]);
pub struct VerifiedToken<'a>(&'a [u8]);

// Token layout is the Fernet spec minus the version and timestamp
// fields, which Reticulum strips because they leak initiator metadata:
// IV || ciphertext || HMAC.
pub struct Fernet<R: CryptoRngCore> {
    rng: R,
    sign_key: [u8; AES_KEY_SIZE],
    enc_key: AesKey,
}

impl<'a> PlainText<'a> {
    pub fn as_bytes(&self) -> &'a [u8] {
        self.0
    }
}

impl<'a> From<&'a [u8]> for PlainText<'a> {
    fn from(item: &'a [u8]) -> Self {
        Self(item)
    }
}

impl<'a> From<&'a str> for PlainText<'a> {
    fn from(item: &'a str) -> Self {
        Self(item.as_bytes())
    }
}

impl<'a> Token<'a> {
    pub fn as_bytes(&self) -> &'a [u8] {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> From<&'a [u8]> for Token<'a> {
    fn from(item: &'a [u8]) -> Self {
        Self(item)
    }
}

impl<R: CryptoRngCore + Copy> Fernet<R> {
    pub fn new(sign_key: [u8; AES_KEY_SIZE], enc_key: AesKey, rng: R) -> Self {
        Self { rng, sign_key, enc_key }
    }

    /// Builds keys from arbitrary-length slices, zero-padding short input.
    pub fn new_from_slices(sign_key: &[u8], enc_key: &[u8], rng: R) -> Self {
        let mut sign = [0u8; AES_KEY_SIZE];
        let take = sign_key.len().min(AES_KEY_SIZE);
        sign[..take].copy_from_slice(&sign_key[..take]);

        let mut enc = [0u8; AES_KEY_SIZE];
        let take = enc_key.len().min(AES_KEY_SIZE);
        enc[..take].copy_from_slice(&enc_key[..take]);

        Self { rng, sign_key: sign, enc_key: enc.into() }
    }

    pub fn new_rand(mut rng: R) -> Self {
        let mut sign_key = [0u8; AES_KEY_SIZE];
        rng.fill_bytes(&mut sign_key);
        let enc_key = AesCbcEnc::generate_key(&mut rng);

        Self { rng, sign_key, enc_key }
    }

    pub fn encrypt<'a>(
        &self,
        text: PlainText,
        out_buf: &'a mut [u8],
    ) -> Result<Token<'a>, RnsError> {
        let padded_len = text
            .0
            .len()
            .checked_div(AES_BLOCK_SIZE)
            .and_then(|blocks| blocks.checked_add(1))
            .and_then(|blocks| blocks.checked_mul(AES_BLOCK_SIZE))
            .ok_or(RnsError::InvalidArgument)?;
        let required_len =
            FERNET_OVERHEAD_SIZE.checked_add(padded_len).ok_or(RnsError::InvalidArgument)?;

        if out_buf.len() < required_len {
            return Err(RnsError::InvalidArgument);
        }

        let iv = AesCbcEnc::generate_iv(self.rng);
        out_buf[..IV_SIZE].copy_from_slice(iv.as_slice());

        let cipher_len = AesCbcEnc::new(&self.enc_key, &iv)
            .encrypt_padded_b2b_mut::<Pkcs7>(text.0, &mut out_buf[IV_SIZE..])
            .map_err(|_| RnsError::InvalidArgument)?
            .len();

        let signed_len = IV_SIZE + cipher_len;
        let tag = self.signing_mac(&out_buf[..signed_len]).finalize().into_bytes();
        out_buf[signed_len..signed_len + HMAC_OUT_SIZE].copy_from_slice(tag.as_slice());

        Ok(Token(&out_buf[..signed_len + HMAC_OUT_SIZE]))
    }

    pub fn verify<'a>(&self, token: Token<'a>) -> Result<VerifiedToken<'a>, RnsError> {
        let data = token.0;
        if data.len() <= FERNET_OVERHEAD_SIZE {
            return Err(RnsError::InvalidArgument);
        }

        let tag_start = data.len() - HMAC_OUT_SIZE;
        self.signing_mac(&data[..tag_start])
            .verify_slice(&data[tag_start..])
            .map_err(|_| RnsError::IncorrectSignature)?;

        Ok(VerifiedToken(data))
    }

    pub fn decrypt<'b>(
        &self,
        token: VerifiedToken<'_>,
        out_buf: &'b mut [u8],
    ) -> Result<PlainText<'b>, RnsError> {
        let data = token.0;
        let tag_start = data.len() - HMAC_OUT_SIZE;

        let iv: [u8; IV_SIZE] =
            data[..IV_SIZE].try_into().map_err(|_| RnsError::InvalidArgument)?;

        let plain = AesCbcDec::new(&self.enc_key, &iv.into())
            .decrypt_padded_b2b_mut::<Pkcs7>(&data[IV_SIZE..tag_start], out_buf)
            .map_err(|_| RnsError::CryptoError)?;

        Ok(PlainText(plain))
    }

    fn signing_mac(&self, data: &[u8]) -> HmacSha256 {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.sign_key)
            .expect("hmac accepts any key length");
        mac.update(data);
        mac
    }
}

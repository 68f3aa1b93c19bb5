//! Hash and key derivation checked against vectors produced with the
//! reference implementation's algorithms.

use reticulum_core::destination::{DestinationName, PlainInputDestination, SingleInputDestination};
use reticulum_core::identity::{self, PrivateIdentity};

const ENC_PRV: &str = "0102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f20";
const SIG_PRV: &str = "a0a1a2a3a4a5a6a7a8a9aaabacadaeafb0b1b2b3b4b5b6b7b8b9babbbcbdbebf";
const PUB_SIGN: &str = "4fd099ccd47d7893dfe9ec24414ecb0d9b5420232aad30d91c465be33cbe65c4";
const IDENTITY_HASH: &str = "baa50106e220d8e2cc78d5a26d9b3724";
const DESTINATION_HASH: &str = "41bcd8430fe74cb1ce9e4d103c537813";
const PLAIN_DESTINATION_HASH: &str = "03453e4fa729ce7354d01a0179e8b164";

fn fixed_identity() -> PrivateIdentity {
    let mut bytes = hex::decode(ENC_PRV).unwrap();
    bytes.extend(hex::decode(SIG_PRV).unwrap());
    PrivateIdentity::from_private_key_bytes(&bytes).expect("valid key bytes")
}

#[test]
fn identity_hash_matches_reference() {
    let identity = fixed_identity();
    assert_eq!(hex::encode(identity.address_hash().as_slice()), IDENTITY_HASH);
}

#[test]
fn destination_hash_matches_reference() {
    let destination = SingleInputDestination::new(
        fixed_identity(),
        DestinationName::new("example_utilities", "announcesample.fruits"),
    );
    assert_eq!(hex::encode(destination.desc.address_hash.as_slice()), DESTINATION_HASH);
}

#[test]
fn plain_destination_hash_matches_reference() {
    let destination =
        PlainInputDestination::new(DestinationName::new("example_utilities", "open.channel"));
    assert_eq!(hex::encode(destination.desc.address_hash.as_slice()), PLAIN_DESTINATION_HASH);
}

#[test]
fn signature_verifies_with_raw_public_key() {
    let identity = fixed_identity();
    let signature = identity.sign(b"hello");

    let mut public_key = [0u8; 32];
    public_key.copy_from_slice(&hex::decode(PUB_SIGN).unwrap());

    assert!(identity::verify(public_key, b"hello", &signature.to_bytes()));
    assert!(!identity::verify(public_key, b"hullo", &signature.to_bytes()));
}

//! IFAC derivation and wire processing checked against vectors produced
//! with the reference algorithms.

use reticulum_core::crypt::kdf;
use reticulum_core::hash::full_hash;
use reticulum_core::ifac::{IfacCredentials, DEFAULT_IFAC_SIZE, IFAC_SALT};

const IFAC_KEY_NET1: &str = "167ddd6caa4e148c0f41530e38510dd2142c20d23e61efe2ff62b0f4957ba0105a8e1836b8a07bef3ab59a5ca3232e01d8704a71e3bfc1af4f58b8e1bc0d66a0";
const IFAC_KEY_BOTH: &str = "6bf05e0b5e2593e6ccae7edfc669df9082b910a7ed5a1f0728e63ba2a27f8201d4407628c6ce33b01bdeb0a5896327b24e762377195e36c25285b49ce1c31541";
const IFAC_IDENTITY_HASH_BOTH: &str = "696e1379d6a9296d93ec05b5de761786";

const ANNOUNCE_FRAME: &str = "010041bcd8430fe74cb1ce9e4d103c5378130007a37cbc142093c8b755dc1b10e86cb426374ad16aa853ed0bdfc0b2b86d1c7c4fd099ccd47d7893dfe9ec24414ecb0d9b5420232aad30d91c465be33cbe65c46f233dfd9aa4cbd4a1e2001122334455667788996cb6fb69665de4e557a8275ce3d0959e252b849f4809f553f34711bddaa37a14643dc2fe76f51dc84e29f3004c4ecd7e89b7a56184a16f508034a2a0ede2b40d48656c6c6f2c20776f726c6421";
const MASKED_FRAME: &str = "c314128cd924b95ea25c2fc55d445639790d1b97aa1e9e7ca5b749130401580caaa9bd6b57bcada519334ae12d4e637ee3004dc5fda3185d1bafb34b5c67f9002662b62c3d185040daee89343203be72ab4609b41b28d8e2564d226629b92819ade49e019f97d8e9a1e562e9006d66b750b119fb1304a8ce14ce3168a503e71541d44c0c1172d20d6bf349c21feeda615e247994f7e03f5118cf802f064da07151fbc96b375152a133e727329bcf88db9ead950673a4731cad758ca276ab14f296008527";

fn both_credentials() -> IfacCredentials {
    IfacCredentials::derive(Some("testnet"), Some("password"), DEFAULT_IFAC_SIZE)
        .expect("valid derivation")
        .expect("credentials present")
}

#[test]
fn netname_only_key_matches_reference() {
    let credentials = IfacCredentials::derive(Some("net1"), None, DEFAULT_IFAC_SIZE)
        .expect("valid derivation")
        .expect("credentials present");
    assert_eq!(hex::encode(credentials.key_bytes()), IFAC_KEY_NET1);

    // Same thing spelled out: hkdf(64, full_hash(full_hash(netname)), salt).
    let origin_hash = full_hash(&full_hash(b"net1"));
    let manual = kdf::hkdf(64, &origin_hash, Some(&IFAC_SALT), None).expect("derive");
    assert_eq!(manual.as_slice(), credentials.key_bytes());
}

#[test]
fn netname_and_netkey_match_reference() {
    let credentials = both_credentials();
    assert_eq!(hex::encode(credentials.key_bytes()), IFAC_KEY_BOTH);
    assert_eq!(
        hex::encode(credentials.identity().address_hash().as_slice()),
        IFAC_IDENTITY_HASH_BOTH
    );
}

#[test]
fn absent_inputs_yield_no_credentials() {
    assert!(IfacCredentials::derive(None, None, DEFAULT_IFAC_SIZE)
        .expect("valid derivation")
        .is_none());
}

#[test]
fn outbound_masking_matches_reference() {
    let credentials = both_credentials();
    let frame = hex::decode(ANNOUNCE_FRAME).unwrap();

    let masked = credentials.mask_outbound(&frame).expect("maskable frame");
    assert_eq!(hex::encode(&masked), MASKED_FRAME);
}

#[test]
fn inbound_unmasking_matches_reference() {
    let credentials = both_credentials();
    let masked = hex::decode(MASKED_FRAME).unwrap();

    let (open, code) = credentials.unmask_inbound(&masked).expect("authentic frame");
    assert_eq!(hex::encode(&open), ANNOUNCE_FRAME);
    assert_eq!(code.as_slice().len(), DEFAULT_IFAC_SIZE);
}

#[test]
fn foreign_network_frame_is_dropped() {
    let masked = hex::decode(MASKED_FRAME).unwrap();
    let other = IfacCredentials::derive(Some("testnet"), Some("hunter2"), DEFAULT_IFAC_SIZE)
        .expect("valid derivation")
        .expect("credentials present");
    assert!(other.unmask_inbound(&masked).is_none());
}

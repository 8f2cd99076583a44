//! Property-based tests for content digests and platform tags.
//!
//! - Determinism: the same bytes always hash to the same digest
//! - Sensitivity: flipping any byte changes the digest
//! - Tags survive a print/parse cycle

use bottler_core::PlatformTag;
use bottler_core::digest::{is_sha256_hex, sha256_bytes, sha256_reader};
use proptest::prelude::*;

fn tag_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("all".to_string()),
        prop::sample::select(vec!["big_sur", "monterey", "ventura", "sonoma", "sequoia"])
            .prop_map(String::from),
        prop::sample::select(vec!["big_sur", "monterey", "ventura", "sonoma", "sequoia"])
            .prop_map(|c| format!("arm64_{c}")),
        prop::sample::select(vec!["x86_64", "arm64"]).prop_map(|a| format!("{a}_linux")),
        (
            prop::sample::select(vec!["linux", "macos"]),
            prop::sample::select(vec!["x64", "arm64"])
        )
            .prop_map(|(os, arch)| format!("{os}-{arch}")),
    ]
}

proptest! {
    #[test]
    fn digest_is_deterministic(bytes in prop::collection::vec(any::<u8>(), 0..4096)) {
        let a = sha256_bytes(&bytes);
        let b = sha256_reader(bytes.as_slice()).unwrap();
        prop_assert_eq!(&a, &b);
        prop_assert!(is_sha256_hex(&a));
    }

    #[test]
    fn digest_changes_with_any_byte(
        bytes in prop::collection::vec(any::<u8>(), 1..1024),
        index in any::<prop::sample::Index>(),
        flip in 1u8..=255,
    ) {
        let mut changed = bytes.clone();
        let i = index.index(changed.len());
        changed[i] ^= flip;
        prop_assert_ne!(sha256_bytes(&bytes), sha256_bytes(&changed));
    }

    #[test]
    fn tag_display_roundtrips(raw in tag_strategy()) {
        let tag = PlatformTag::parse(&raw).unwrap();
        prop_assert_eq!(tag.to_string(), raw.clone());
        prop_assert_eq!(PlatformTag::parse(&tag.to_string()).unwrap(), tag);
    }
}

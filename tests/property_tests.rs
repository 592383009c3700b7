//! Property-based tests for the wire envelope codec.

use proptest::prelude::*;

use courier_core::wire::{Envelope, split_target};

fn frames_strategy() -> impl Strategy<Value = Vec<Vec<u8>>> {
    proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..128), 0..8)
}

proptest! {
    /// Decoding arbitrary bytes must never panic, only error.
    #[test]
    fn decode_never_panics(data in proptest::collection::vec(any::<u8>(), 0..2048)) {
        let _ = Envelope::decode(&data);
    }

    #[test]
    fn send_roundtrip(
        target in "[a-z]{1,12}\\.[a-z]{1,12}",
        frames in frames_strategy(),
    ) {
        let envelope = Envelope::Send { target, frames };
        let decoded = Envelope::decode(&envelope.encode().unwrap()).unwrap();
        prop_assert_eq!(decoded, envelope);
    }

    #[test]
    fn request_roundtrip(
        tag in any::<u64>(),
        target in "[a-z]{1,12}\\.[a-z]{1,12}",
        frames in frames_strategy(),
    ) {
        let envelope = Envelope::Request { tag, target, frames };
        let decoded = Envelope::decode(&envelope.encode().unwrap()).unwrap();
        prop_assert_eq!(decoded, envelope);
    }

    #[test]
    fn reply_roundtrip(
        tag in any::<u64>(),
        ok in any::<bool>(),
        frames in frames_strategy(),
    ) {
        let envelope = Envelope::Reply { tag, ok, frames };
        let decoded = Envelope::decode(&envelope.encode().unwrap()).unwrap();
        prop_assert_eq!(decoded, envelope);
    }

    /// A decoded envelope re-encodes to the identical byte sequence.
    #[test]
    fn encode_is_canonical(
        tag in any::<u64>(),
        target in "[a-z]{1,12}\\.[a-z]{1,12}",
        frames in frames_strategy(),
    ) {
        let encoded = Envelope::Request { tag, target, frames }.encode().unwrap();
        let reencoded = Envelope::decode(&encoded).unwrap().encode().unwrap();
        prop_assert_eq!(reencoded, encoded);
    }

    /// Truncating a valid envelope anywhere must produce an error, not a
    /// wrong-but-successful parse.
    #[test]
    fn truncation_always_errors(
        tag in any::<u64>(),
        target in "[a-z]{1,8}\\.[a-z]{1,8}",
        frames in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 1..64), 1..4),
        cut_fraction in 0.0f64..1.0,
    ) {
        let encoded = Envelope::Request { tag, target, frames }.encode().unwrap();
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let cut = (encoded.len() as f64 * cut_fraction) as usize;
        prop_assume!(cut < encoded.len());
        prop_assert!(Envelope::decode(&encoded[..cut]).is_err());
    }

    #[test]
    fn split_target_rejoins(category in "[a-z]{1,8}", command in "[a-z]{1,8}") {
        let target = format!("{category}.{command}");
        prop_assert_eq!(split_target(&target), (category.as_str(), command.as_str()));
    }
}

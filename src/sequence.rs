//! Sequence number bookkeeping for KRB-SAFE, KRB-PRIV and KRB-CRED.
//!
//! Some peers (old Heimdal releases) encode a sequence number as a signed
//! INTEGER without the leading zero octet, so `0x80` leaves the wire as
//! `0xffffff80` once decoded. Until the peer's behavior is known, numbers in
//! the affected ranges are matched both ways.

use bitflags::bitflags;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::Result;

bitflags! {
    /// What is known about the peer's sequence number encoding.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
    pub struct SequenceFlags: u32 {
        /// The peer encodes sequence numbers correctly.
        const SANE_SEQ = 0x00000001;
        /// The peer drops the leading zero octet of sequence numbers.
        const HEIMDAL_SEQ = 0x00000002;
    }
}

/// Outcome of [classify_and_check].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceCheck {
    pub accepted: bool,
    pub flags: SequenceFlags,
    /// Expected number after a resynchronisation. The caller advances it by one on acceptance.
    pub expected: u32,
}

const AMBIGUOUS_MASK: u32 = 0xff80_0000;

/// Ranges whose top bit set in the most significant octet makes a signed encoding ambiguous.
const AMBIGUOUS_RANGES: [(u32, u32); 3] = [
    (0x0000_0080, 0x0000_00ff),
    (0x0000_8000, 0x0000_ffff),
    (0x0080_0000, 0x00ff_ffff),
];

fn in_ambiguous_range(seq: u32) -> bool {
    AMBIGUOUS_RANGES.iter().any(|(low, high)| (*low..=*high).contains(&seq))
}

/// Whether `received` is `expected` as a Heimdal peer would have encoded it.
fn matches_heimdal_encoding(expected: u32, received: u32) -> bool {
    if (0x80..=0xff).contains(&expected) && received == 0xffff_ff00 | expected {
        return true;
    }
    if (0x8000..=0xffff).contains(&expected) && received == 0xffff_0000 | expected {
        return true;
    }
    if (0x0080_0000..=0x00ff_ffff).contains(&expected) && received == 0xff00_0000 | expected {
        return true;
    }

    false
}

/// Classifies the received sequence number against the expected one.
///
/// This is a pure function: the caller stores the returned flags and, on acceptance,
/// sets the next expected number to `expected + 1`.
pub fn classify_and_check(expected: u32, received: u32, flags: SequenceFlags) -> SequenceCheck {
    let reject = SequenceCheck {
        accepted: false,
        flags,
        expected,
    };
    let accept = |flags: SequenceFlags, expected: u32| SequenceCheck {
        accepted: true,
        flags,
        expected,
    };

    if flags.contains(SequenceFlags::SANE_SEQ) {
        return if received == expected {
            accept(flags, expected)
        } else {
            reject
        };
    }

    if received & AMBIGUOUS_MASK == AMBIGUOUS_MASK {
        if expected & AMBIGUOUS_MASK == AMBIGUOUS_MASK && received == expected {
            return accept(flags, expected);
        }

        if !flags.contains(SequenceFlags::HEIMDAL_SEQ) && received == expected {
            return accept(flags, expected);
        }

        if matches_heimdal_encoding(expected, received) {
            return accept(flags | SequenceFlags::HEIMDAL_SEQ, expected);
        }

        return reject;
    }

    if received == expected {
        let flags = if in_ambiguous_range(expected) {
            flags | SequenceFlags::SANE_SEQ
        } else {
            flags
        };

        return accept(flags, expected);
    }

    if expected == 0
        && !flags.contains(SequenceFlags::HEIMDAL_SEQ)
        && matches!(received, 0x0000_0100 | 0x0001_0000 | 0x0100_0000)
    {
        return accept(flags | SequenceFlags::HEIMDAL_SEQ, received);
    }

    reject
}

/// Generates an initial sequence number.
///
/// The top bits are cleared so the counter stays far from the ambiguous ranges for a long time.
pub fn generate_seq_number() -> Result<u32> {
    let mut bytes = [0; 4];
    OsRng.try_fill_bytes(&mut bytes)?;

    let seq_number = u32::from_be_bytes(bytes) & 0x3fff_ffff;

    Ok(if seq_number == 0 { 1 } else { seq_number })
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn heimdal_encoding_is_detected_at_0x80() {
        let check = classify_and_check(0x80, 0xffff_ff80, SequenceFlags::empty());

        assert!(check.accepted);
        assert!(check.flags.contains(SequenceFlags::HEIMDAL_SEQ));
        assert_eq!(check.expected, 0x80);

        // The next number must follow the same encoding.
        let next = classify_and_check(0x81, 0xffff_ff81, check.flags);
        assert!(next.accepted);

        let exact = classify_and_check(0x81, 0x81, check.flags);
        assert!(exact.accepted);
        assert!(exact.flags.contains(SequenceFlags::SANE_SEQ));
    }

    #[test]
    fn sane_peer_is_latched_at_boundary() {
        let check = classify_and_check(0x8000, 0x8000, SequenceFlags::empty());

        assert!(check.accepted);
        assert_eq!(check.flags, SequenceFlags::SANE_SEQ);

        let heimdal = classify_and_check(0x8001, 0xffff_8001, check.flags);
        assert!(!heimdal.accepted);
    }

    #[test]
    fn small_numbers_do_not_latch() {
        let check = classify_and_check(5, 5, SequenceFlags::empty());

        assert!(check.accepted);
        assert_eq!(check.flags, SequenceFlags::empty());
    }

    #[test]
    fn wrapped_heimdal_counter_resynchronises() {
        for received in [0x100, 0x10000, 0x1000000] {
            let check = classify_and_check(0, received, SequenceFlags::empty());

            assert!(check.accepted);
            assert_eq!(check.expected, received);
            assert!(check.flags.contains(SequenceFlags::HEIMDAL_SEQ));
        }

        assert!(!classify_and_check(0, 0x100, SequenceFlags::HEIMDAL_SEQ).accepted);
    }

    #[test]
    fn ambiguous_expected_matches_exactly() {
        let check = classify_and_check(0xffff_ff90, 0xffff_ff90, SequenceFlags::HEIMDAL_SEQ);

        assert!(check.accepted);
        assert_eq!(check.flags, SequenceFlags::HEIMDAL_SEQ);
    }

    #[test]
    fn out_of_order_is_rejected() {
        assert!(!classify_and_check(10, 11, SequenceFlags::empty()).accepted);
        assert!(!classify_and_check(10, 9, SequenceFlags::empty()).accepted);
        assert!(!classify_and_check(0x80, 0xffff_ff81, SequenceFlags::empty()).accepted);
    }

    #[test]
    fn generated_numbers_are_nonzero_and_small() {
        for _ in 0..32 {
            let seq_number = generate_seq_number().unwrap();

            assert_ne!(seq_number, 0);
            assert!(seq_number <= 0x3fff_ffff);
        }
    }

    proptest! {
        #[test]
        fn sane_peer_only_accepts_exact_numbers(expected in any::<u32>(), received in any::<u32>()) {
            let check = classify_and_check(expected, received, SequenceFlags::SANE_SEQ);

            prop_assert_eq!(check.accepted, expected == received);
            prop_assert_eq!(check.flags, SequenceFlags::SANE_SEQ);
        }

        #[test]
        fn in_order_stream_is_never_rejected(start in 0_u32..0x3fff_ffff, count in 1_usize..64) {
            let mut flags = SequenceFlags::empty();
            let mut expected = start;

            for offset in 0..count as u32 {
                let check = classify_and_check(expected, start.wrapping_add(offset), flags);
                prop_assert!(check.accepted);

                flags = check.flags;
                expected = check.expected.wrapping_add(1);
            }
        }
    }
}

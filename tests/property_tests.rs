//! Property-based tests for the session table and drain loop.

use proptest::prelude::*;
use xwiipoll::{
    Capabilities, Key, MAX_DEVICES, PollOutcome, SessionError, SessionManager, VirtualTransport,
};

fn single_remote() -> (SessionManager<VirtualTransport>, xwiipoll::VirtualDevice) {
    let transport = VirtualTransport::new();
    let device = transport.add_device("/sys/wiimote/0", Capabilities::CORE);
    (SessionManager::new(transport), device)
}

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(200))]

    /// Indices outside 1..=MAX_DEVICES never reach the transport.
    #[test]
    fn prop_out_of_range_open_is_rejected(
        n in prop_oneof![Just(0usize), (MAX_DEVICES + 1)..10_000usize]
    ) {
        let (mut manager, device) = single_remote();
        prop_assert!(matches!(manager.open(n), Err(SessionError::InvalidIndex(m)) if m == n));
        prop_assert_eq!(device.connections(), 0);
    }

    /// A burst of n keys yields exactly n key outcomes, then no event.
    #[test]
    fn prop_drain_count_matches_burst(codes in prop::collection::vec(0u32..28, 0..64)) {
        let (mut manager, device) = single_remote();
        let handle = manager.open(1).expect("device is attached");
        for code in &codes {
            device.press(Key::from_code(*code).expect("code in range"));
        }

        for code in &codes {
            match manager.poll(handle) {
                PollOutcome::Key(key) => prop_assert_eq!(key.code, *code),
                other => prop_assert!(false, "expected key {}, got {:?}", code, other),
            }
        }
        prop_assert_eq!(manager.poll(handle), PollOutcome::NoEvent);
    }

    /// Whatever is written to the LEDs reads back unchanged.
    #[test]
    fn prop_indicator_mask_reads_back(mask in 0u8..16) {
        let (mut manager, _device) = single_remote();
        let handle = manager.open(1).expect("device is attached");

        prop_assert!(manager.set_indicators(handle, mask).is_ok());
        prop_assert_eq!(manager.indicators(handle).ok(), Some(mask));
    }
}

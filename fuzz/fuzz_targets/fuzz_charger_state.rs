#![no_main]
use libfuzzer_sys::fuzz_target;

use helios::status::ChargerState;

fuzz_target!(|data: &[u8]| {
    if data.len() < 8 {
        return;
    }
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&data[..8]);
    let word = u64::from_le_bytes(raw);

    // The packed word must survive a decode/encode cycle except for the
    // reserved byte, which unpack drops.
    let state = ChargerState::unpack(word);
    assert_eq!(state.pack(), word & 0xFFFF_FFFF_FFFF_00FF);
    assert_eq!(ChargerState::unpack(state.pack()), state);
});

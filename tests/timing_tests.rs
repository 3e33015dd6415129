use tracing_subscriber::fmt;
use zxtiming::{
    bank::{RomSet, PAGE_SIZE},
    config::{Architecture, MachineConfig},
    error::ConfigError,
    timing::{TimingProfile, WAIT_STATES},
    video::DrawState,
    Bus,
};

#[cfg(test)]
#[ctor::ctor]
fn init() {
    let fmt_subscriber = fmt::Subscriber::builder()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(fmt_subscriber)
        .expect("Unable to set global tracing subscriber");
}

fn bus(arch: Architecture) -> Bus {
    let rom0 = vec![0u8; PAGE_SIZE];
    let rom1 = vec![0u8; PAGE_SIZE];
    Bus::new(&MachineConfig::new(arch), &RomSet::new(&[&rom0, &rom1])).unwrap()
}

/// Wait states a read of screen memory picks up `offset` T-states into the
/// first pixel line.
fn wait_at(arch: Architecture, offset: u32) -> u64 {
    let mut bus = bus(arch);
    let start = bus.profile().screen_start;
    bus.draw(start + offset, false);
    assert_eq!(bus.clock.tstates, start + offset);
    let before = bus.clock.wait_states;
    bus.peek8(0x4000);
    bus.clock.wait_states - before
}

#[test]
fn test_contention_table_coverage() {
    for group in WAIT_STATES.chunks(8) {
        assert!(group.iter().all(|&wait| wait <= 6));
        assert!(group.windows(2).all(|pair| pair[0] >= pair[1]));
    }

    for arch in [Architecture::Spectrum48, Architecture::Spectrum128] {
        let waits: Vec<u64> = (0..128).map(|offset| wait_at(arch, offset)).collect();
        for (offset, &wait) in waits.iter().enumerate() {
            assert!(wait <= 6);
            assert_eq!(wait, WAIT_STATES[offset] as u64, "{:?} offset {}", arch, offset);
        }
        for group in waits.chunks(8) {
            assert!(group.windows(2).all(|pair| pair[0] >= pair[1]));
        }
    }
}

#[test]
fn test_no_contention_outside_fetch_window() {
    assert_eq!(wait_at(Architecture::Spectrum48, 150), 0);
    assert_eq!(wait_at(Architecture::Spectrum48, 200), 0);

    let mut bus = bus(Architecture::Spectrum48);
    bus.draw(1000, false);
    bus.peek8(0x4000);
    assert_eq!(bus.clock.wait_states, 0);
}

#[test]
fn test_pentagon_never_contends() {
    for offset in 0..128 {
        assert_eq!(wait_at(Architecture::Pentagon, offset), 0);
    }
}

#[test]
fn test_beam_goes_blank_after_pixel_area() {
    let mut bus = bus(Architecture::Spectrum128);
    let profile = *bus.profile();
    bus.draw(profile.screen_start, false);
    for _ in 0..191 {
        bus.draw(profile.tstates_per_line, false);
        assert_ne!(bus.video.state(), DrawState::Blank);
    }
    bus.draw(profile.tstates_per_line, false);
    assert_eq!(bus.video.state(), DrawState::Blank);
}

#[test]
fn test_profiles_per_architecture() {
    let cases = [
        (Architecture::Spectrum48, 224, 312, 69888, 32, 14335, 19968),
        (Architecture::Spectrum128, 228, 311, 70908, 36, 14361, 19992),
        (Architecture::Alf, 228, 311, 70908, 36, 14361, 19992),
        (Architecture::Pentagon, 224, 320, 71680, 32, 17988, 20480),
        (Architecture::Pentagon512, 224, 320, 71680, 32, 17988, 20480),
    ];
    for (arch, line, lines, frame, int_end, screen, micros) in cases {
        let profile = TimingProfile::for_arch(arch, false);
        assert_eq!(profile.tstates_per_line, line);
        assert_eq!(profile.lines_per_frame, lines);
        assert_eq!(profile.states_in_frame, frame);
        assert_eq!(profile.int_end, int_end);
        assert_eq!(profile.screen_start, screen);
        assert_eq!(profile.micros_per_frame, micros);
        assert_eq!(profile.contended, !arch.is_pentagon());
        assert_eq!(profile.floating_bus.is_some(), !arch.is_pentagon());
        assert!(profile.validate().is_ok());
    }
}

#[test]
fn test_late_timing_and_turbo_windows() {
    let late = TimingProfile::for_arch(Architecture::Spectrum48, true);
    assert_eq!(late.int_end, 33);
    assert_eq!(late.int_window_end(1), 66);
    assert_eq!(late.frame_states(3), 69888 * 8);

    let config = MachineConfig {
        late_timing: true,
        turbo: 1,
        ..MachineConfig::new(Architecture::Spectrum128)
    };
    let bus = Bus::new(&config, &RomSet::new(&[&[0u8; 16][..], &[0u8; 16][..]])).unwrap();
    assert_eq!(bus.int_end(), 74);
    assert_eq!(bus.frame_states(), 70908 * 2);
}

#[test]
fn test_invalid_profile_is_rejected() {
    let profile = TimingProfile {
        int_end: 80000,
        ..TimingProfile::SPECTRUM_48
    };
    assert!(matches!(
        profile.validate(),
        Err(ConfigError::Timing { .. })
    ));

    let config = MachineConfig {
        turbo: 4,
        ..MachineConfig::new(Architecture::Spectrum48)
    };
    assert!(matches!(config.validate(), Err(ConfigError::Turbo(4))));
}
